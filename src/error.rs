use thiserror::Error;

/// Failure categories the caller can branch on.
///
/// Everything else (I/O, parse failures) travels as plain `anyhow` context.
/// Data-quality gaps are never errors; see [`crate::Diagnostics`].
#[derive(Debug, Error)]
pub enum ModelError {
    /// Missing input, missing field, mismatched pairing, bad stage vector.
    /// Raised before any geometry work begins.
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Allocation(#[from] AllocationError),

    /// An overlay failed even after one repair attempt.
    #[error("geometry fault in stage '{stage}': {source}")]
    Geometry {
        stage: String,
        #[source]
        source: geoverlay::OverlayError,
    },

    #[error("checkpoint error in stage '{stage}': {detail}")]
    Checkpoint { stage: String, detail: String },
}

impl ModelError {
    pub fn config(msg: impl Into<String>) -> Self { ModelError::Config(msg.into()) }

    pub fn geometry(stage: impl Into<String>, source: geoverlay::OverlayError) -> Self {
        ModelError::Geometry { stage: stage.into(), source }
    }
}

/// Demand could not be distributed from an admin unit to reporting units.
#[derive(Debug, Error, PartialEq)]
pub enum AllocationError {
    /// The admin unit carries demand but no habitat energy falls inside it.
    #[error("admin unit '{admin}' has demand {demand} but zero available energy to allocate against")]
    ZeroEnergy { admin: String, demand: f64 },

    /// The admin unit carries demand but never intersects a reporting unit with habitat.
    #[error("admin unit '{admin}' has demand {demand} but no (reporting unit, admin) energy pair to join on")]
    MissingJoin { admin: String, demand: f64 },
}

/// True when `err` (or anything it wraps) is a configuration error.
pub fn is_config_error(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| matches!(cause.downcast_ref::<ModelError>(), Some(ModelError::Config(_))))
}
