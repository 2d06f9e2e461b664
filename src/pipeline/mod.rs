//! Model orchestration: stage selection, checkpoints, and the per-AOI run.

mod checkpoint;
mod diagnostics;
mod model;
mod stages;
mod workspace;

pub use checkpoint::{CheckpointState, FileHash, Fingerprint, Manifest, StageRecord};
pub use diagnostics::{Diagnostics, SourceReport};
pub use model::{areas_of_interest, outputs, run_aoi, run_model, Aoi, RunOutcome};
pub use stages::{Stage, StageSet};
pub use workspace::Workspace;
