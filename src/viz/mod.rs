pub mod grid;

pub use grid::{save_seg_grid, GridPanel};
