//! The built-in passes, grouped by concern.
//!
//! Each pass is a unit struct implementing [`Pass`](crate::pass::Pass); the
//! order they run in is decided by [`crate::pipeline`].

pub mod compile;
pub mod constants;
pub mod fusing;
pub mod init;
pub mod order;
pub mod output_size;
pub mod padding;
pub mod reorders;
pub mod trim;

pub use compile::{Cleanup, CompileGraph};
pub use constants::PropagateConstants;
pub use fusing::{PrepareBufferFusing, PreparePrimitiveFusing};
pub use init::{GraphInitializations, MarkNodes};
pub use order::BfsProcessingOrder;
pub use output_size::AnalyzeOutputSizeHandling;
pub use padding::PreparePadding;
pub use reorders::{RemoveRedundantReorders, ReorderInputs};
pub use trim::TrimToOutputs;
