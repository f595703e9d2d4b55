pub mod unit_ctx;
pub mod unit_flow;

pub use unit_ctx::{RunContext, UnitCtx};
pub use unit_flow::{UnitFlow, UnitResult};
