//! Error taxonomy for the writer (spec.md §7). Kinds, not exhaustive detail:
//! every fallible operation surfaces through the call that caused it, usually
//! `add()` or `close()`.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ArchiveError {
    /// Malformed name, illegal options, or `add()`/`close()` called after close.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Compression level > 0 and the estimator was invoked without a predicted
    /// compressed size.
    #[error("unknown size: {0}")]
    UnknownSize(String),

    /// Compression or encryption failed mid-stream. The entry enters `Failed`
    /// and the archive is poisoned: the cursor has already advanced over
    /// partial bytes for that entry, so a later `close()` also fails.
    #[error("codec error: {0}")]
    CodecError(String),

    /// Cancellation observed on an entry or archive-level token.
    #[error("operation aborted: {0}")]
    AbortError(String),

    /// Inconsistency between declared sizes and archive options (e.g.
    /// declared size exceeds 4 GiB while `zip64` is forced off).
    #[error("estimation error: {0}")]
    EstimationError(String),

    /// The downstream sink rejected a write; fatal and propagated.
    #[error("sink error: {0}")]
    SinkError(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ArchiveError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        ArchiveError::InvalidArgument(msg.into())
    }

    pub fn codec(msg: impl Into<String>) -> Self {
        ArchiveError::CodecError(msg.into())
    }

    pub fn abort(msg: impl Into<String>) -> Self {
        ArchiveError::AbortError(msg.into())
    }

    pub fn estimation(msg: impl Into<String>) -> Self {
        ArchiveError::EstimationError(msg.into())
    }

    /// Whether this archive is poisoned past recovery once observed — a
    /// `CodecError` or `SinkError` means bytes already hit the sink, so the
    /// assembler cannot roll back.
    pub fn poisons_archive(&self) -> bool {
        matches!(self, ArchiveError::CodecError(_) | ArchiveError::SinkError(_))
    }
}
