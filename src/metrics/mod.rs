pub mod ari;
pub mod confusion;
pub mod engine;
pub mod segcover;

pub use ari::adjusted_rand_index;
pub use confusion::{drc_sums, ConfusionMatrix, UNION_EPSILON};
pub use engine::{evaluate, Metric, MetricResultBundle};
pub use segcover::{average_segcover, SegCover};
