use thiserror::Error;

/// Errors raised by frame buffers, displays and shared arrays.
#[derive(Debug, Error)]
pub enum DisplayError {
    #[error("invalid dimensions: {len} bytes for {width}x{height}x{depth}")]
    InvalidDimensions {
        len: usize,
        width: usize,
        height: usize,
        depth: usize,
    },
    #[error("cannot create window: {0}")]
    WindowCreation(String),
    #[error("shared array {namespace}@{name} not found")]
    ArrayNotFound { namespace: String, name: String },
    #[error("shared array disconnected")]
    Disconnected,
    #[error("invalid shared array name: {0:?}")]
    InvalidArrayName(String),
    #[error("malformed shared array: {0}")]
    ArrayLayout(String),
    #[error("renderer process: {0}")]
    Renderer(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl DisplayError {
    /// True for the kinds a caller is expected to retry or ride out.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            DisplayError::ArrayNotFound { .. } | DisplayError::Disconnected
        )
    }
}
