//! A streaming ZIP / ZIP64 archive writer.
//!
//! ## Features
//!
//! - Stream entries from any `AsyncRead` straight onto an `AsyncWrite` sink —
//!   no temporary files, no seeking back to patch sizes after the fact (sizes
//!   and CRC-32 are carried in a trailing data descriptor instead).
//! - Store or deflate compression, optional WinZIP AE-2 (AES-256) encryption.
//! - Automatic ZIP64 promotion, entry-by-entry and archive-wide, once a size,
//!   offset, or entry count crosses the 32-bit range — or force it up front
//!   with [`ArchiveOptions::force_zip64`]/[`EntryOptions::force_zip64`].
//! - Exact pre-flight size estimation via [`estimate_stream_size`], so a
//!   caller can set `Content-Length` before a single byte is written.
//! - A process-wide worker pool ([`configure`]) that runs compression off the
//!   calling task, and a higher-level [`ZipWriterStream`] facade that
//!   compresses several entries concurrently while still emitting them to the
//!   sink in submission order.
//!
//! ## Limitations
//!
//! - Write-only: there is no reader for existing archives in this crate.
//! - No archive splitting across multiple physical files (an
//!   [`ArchiveOptions::split_archive_size`] field is recorded but not yet
//!   enforced by the assembler).
//!
//! ## Example
//!
//! ```rust
//! use std::io::Cursor;
//! use zipwright::{ArchiveOptions, EntryOptions, ZipWriter};
//!
//! # async fn run() -> Result<(), zipwright::ArchiveError> {
//! let mut writer = ZipWriter::with_options(Vec::new(), ArchiveOptions::default());
//! writer
//!     .add(
//!         "hello.txt",
//!         EntryOptions::store().declared_size(11),
//!         Cursor::new(b"hello world".to_vec()),
//!     )
//!     .await?;
//! let bytes = writer.close(None).await?;
//! # Ok(())
//! # }
//! ```

mod archive;
mod async_write_wrapper;
mod codec;
mod constants;
mod descriptor;
mod error;
mod estimate;
mod options;
mod pipeline;
mod stream;
mod types;
mod worker_pool;

#[cfg(test)]
mod tests;

pub use archive::{EntryMetadata, ZipWriter};
pub use error::ArchiveError;
pub use estimate::{effective_method, estimate_stream_size, EstimatedEntry};
pub use options::{ArchiveOptions, EntryOptions, WorkerPoolConfig};
pub use pipeline::EntryObserver;
pub use stream::{EntryWriter, ZipWriterStream};
pub use types::{DateTimeCS, FileCompatibilitySystem, FileDateTime};

/// Configure the process-wide worker pool used by [`ZipWriter::new`] and
/// [`ZipWriterStream::new`] (spec.md §4.2 `configure(...)`).
pub fn configure(config: WorkerPoolConfig) {
    worker_pool::configure(config);
}

/// Shut down the process-wide worker pool's threads. Idempotent; the next
/// `add()`/`writable()` call against the default pool respawns it.
pub fn terminate_workers() {
    worker_pool::terminate_all();
}
