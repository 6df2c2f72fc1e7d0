pub mod model;
pub mod network;
pub mod spec;

pub use model::{Mode, ModeGuard, SegmentationModel};
pub use network::PatchNet;
pub use spec::{LayerSpec, ModelSpec};
