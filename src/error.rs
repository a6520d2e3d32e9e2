use thiserror::Error;

/// Failures local to a single page. None of these ever abort layout or
/// visibility processing for the rest of the document.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PageError {
    #[error("failed to read {page}: {reason}")]
    Read { page: String, reason: String },
    #[error("failed to decode {page}: {reason}")]
    Decode { page: String, reason: String },
    #[error("cannot resize page {index} to {width}x{height}")]
    EmptyTarget {
        index: usize,
        width: u32,
        height: u32,
    },
    #[error("image worker is no longer running")]
    Disconnected,
}
