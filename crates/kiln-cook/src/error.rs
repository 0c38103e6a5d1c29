pub type Result<T> = std::result::Result<T, CookError>;

/// Errors produced while persisting cook state.
///
/// Malformed persisted state is never reported through this type when reading: it degrades to
/// conservative defaults instead.
#[derive(Debug, thiserror::Error)]
pub enum CookError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// An untyped directory dependency whose name ends in a known extension would be read back
    /// as a typed path.
    #[error("directory dependency {path} cannot be recorded unambiguously")]
    AmbiguousDirectory { path: String },

    #[error("invalid version table: {reason}")]
    InvalidVersionTable { reason: String },
}
