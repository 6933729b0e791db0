//! Loop rolling over straight-line code
//!
//! The crate holds a small SSA IR (`ir`) and the rolling transformation
//! (`rolling`) that turns unrolled, repeated code back into loops when the
//! loop is smaller.

pub mod config;
pub mod error;
pub mod ir;
pub mod logging;
pub mod rolling;

pub use config::RollingConfig;
pub use error::{RollError, RollResult};
pub use rolling::{roll_function, LoopRollingPass, RollStats};
