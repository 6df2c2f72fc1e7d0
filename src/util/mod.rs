pub mod memory;
pub mod time;

pub use memory::{resident_bytes, PeakMemory};
pub use time::format_time;
