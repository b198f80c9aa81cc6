//! The LIR, its cleanup passes and the lowering pipeline that schedules them.

pub mod lir;
pub mod optimization;
pub mod pipeline;
pub mod sample;
