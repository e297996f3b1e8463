// src/job/mod.rs
// Per-job coordination: channel, ledger, merge policy and workflow in one loop

mod context;
mod driver;

pub use context::{JobContext, JobEffect, JobView};
pub use driver::{JobCommand, JobDriver, StopCondition};
