pub mod batch_accumulator;
pub mod unit_ctx;

pub use batch_accumulator::{AccumulatorSettings, BatchAccumulator};
pub use unit_ctx::UnitCtx;
