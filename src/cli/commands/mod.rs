//! CLI command implementations.

mod config;
mod demo;
mod encode;
mod plan;

pub use config::{run_config, ConfigArgs};
pub use demo::{run_demo, DemoArgs};
pub use encode::{run_decode, run_encode, DecodeArgs, EncodeArgs};
pub use plan::{run_plan, PlanArgs};
