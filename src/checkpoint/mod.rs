pub mod store;

pub use store::{CheckpointStore, SnapshotRef};

use serde_json::Value;

use crate::error::Result;

/// Anything whose full state can be captured into and restored from a
/// snapshot section.
pub trait Stateful {
    fn state_dict(&self) -> Result<Value>;

    fn load_state_dict(&mut self, state: Value) -> Result<()>;
}
