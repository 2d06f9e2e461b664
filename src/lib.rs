#![doc = "Waterfowl habitat energy supply/demand model over reporting units"]
mod common;
mod error;

pub mod aggregate;
pub mod cli;
pub mod commands;
pub mod config;
pub mod habitat;
pub mod io;
pub mod pipeline;
pub mod protected;
pub mod summary;

#[doc(inline)]
pub use error::{is_config_error, AllocationError, ModelError};

#[doc(inline)]
pub use config::ModelConfig;

#[doc(inline)]
pub use pipeline::{run_model, Diagnostics, RunOutcome};
