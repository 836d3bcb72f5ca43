//! Archive assembler: the `ZipWriter` that drives one or more entries through
//! `crate::pipeline`, tracks the write cursor, and writes the central
//! directory and end-of-central-directory records on `close()`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::async_write_wrapper::AsyncWriteWrapper;
use crate::constants::*;
use crate::descriptor::ArchiveDescriptor;
use crate::error::ArchiveError;
use crate::options::{ArchiveOptions, EntryOptions};
use crate::pipeline::{self, EntryObserver, NullObserver};
use crate::types::{zip64_presence_for_entry, ArchiveFileEntry, Zip64ExtraField};
use crate::worker_pool::WorkerPool;

/// What a caller learns back once an entry has been fully streamed and
/// committed to the central directory.
#[derive(Debug, Clone)]
pub struct EntryMetadata {
    pub name: String,
    pub uncompressed_size: u64,
    pub compressed_size: u64,
    pub crc32: u32,
    pub offset: u64,
    pub zip64: bool,
}

impl From<&ArchiveFileEntry> for EntryMetadata {
    fn from(entry: &ArchiveFileEntry) -> Self {
        Self {
            name: String::from_utf8_lossy(&entry.file_name_as_bytes).into_owned(),
            uncompressed_size: entry.uncompressed_size,
            compressed_size: entry.compressed_size,
            crc32: entry.crc32,
            offset: entry.offset,
            zip64: entry.zip64,
        }
    }
}

/// A streaming ZIP/ZIP64 archive writer over an `AsyncWrite` sink.
///
/// Entries are added one at a time, in submission order, with `add()`; each
/// entry's local header, payload, and data descriptor land on the sink before
/// `add()` returns. The codec work for one entry can run on the process-wide
/// worker pool, but entries themselves are not pipelined
/// concurrently here — use `crate::stream::ZipWriterStream` for that.
pub struct ZipWriter<W: AsyncWrite + Unpin> {
    sink: AsyncWriteWrapper<W>,
    options: ArchiveOptions,
    pool: Option<Arc<WorkerPool>>,
    committed: Vec<ArchiveFileEntry>,
    archive_zip64: bool,
    cancel: Arc<AtomicBool>,
    closed: bool,
    poisoned: Option<String>,
    chunk_size: usize,
}

impl<W: AsyncWrite + Unpin> ZipWriter<W> {
    /// A writer backed by the process-wide worker pool and default archive options.
    pub fn new(sink: W) -> Self {
        Self::with_options(sink, ArchiveOptions::default())
    }

    pub fn with_options(sink: W, options: ArchiveOptions) -> Self {
        Self {
            sink: AsyncWriteWrapper::new(sink),
            options,
            pool: Some(crate::worker_pool::global()),
            committed: Vec::new(),
            archive_zip64: false,
            cancel: Arc::new(AtomicBool::new(false)),
            closed: false,
            poisoned: None,
            chunk_size: 64 * 1024,
        }
    }

    /// Use a specific worker pool instead of the process-wide default.
    pub fn with_pool(sink: W, options: ArchiveOptions, pool: Arc<WorkerPool>) -> Self {
        Self {
            pool: Some(pool),
            ..Self::with_options(sink, options)
        }
    }

    /// Run every codec inline, on the calling task, instead of leasing a worker.
    pub fn without_worker_pool(sink: W, options: ArchiveOptions) -> Self {
        Self {
            pool: None,
            ..Self::with_options(sink, options)
        }
    }

    pub fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }

    /// Number of entries committed to the central directory so far.
    pub fn entry_count(&self) -> usize {
        self.committed.len()
    }

    /// Current write cursor, i.e. how many bytes have hit the sink so far.
    pub fn bytes_written(&self) -> u64 {
        self.sink.get_compress_length() as u64
    }

    /// Cancel this archive: any in-flight or future `add()` fails with
    /// `AbortError`.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// Append one entry, reading its payload from `reader`.
    pub async fn add<R>(
        &mut self,
        name: &str,
        options: EntryOptions,
        reader: R,
    ) -> Result<EntryMetadata, ArchiveError>
    where
        R: AsyncRead + Unpin,
    {
        self.add_with_observer(name, options, reader, &NullObserver).await
    }

    /// Append one entry, reporting start/progress/end through `observer`.
    pub async fn add_with_observer<R>(
        &mut self,
        name: &str,
        options: EntryOptions,
        reader: R,
        observer: &dyn EntryObserver,
    ) -> Result<EntryMetadata, ArchiveError>
    where
        R: AsyncRead + Unpin,
    {
        if self.closed {
            return Err(ArchiveError::invalid_argument("add() called after close()"));
        }
        if let Some(reason) = &self.poisoned {
            return Err(ArchiveError::invalid_argument(format!(
                "archive is poisoned by a previous error: {reason}"
            )));
        }
        if self.cancel.load(Ordering::SeqCst) {
            return Err(ArchiveError::abort("archive was cancelled"));
        }

        let offset = self.bytes_written();
        let is_first_entry = self.committed.is_empty();
        let forced_zip64 = self.options.force_zip64 || options.force_zip64;

        let prepared = pipeline::prepare_entry(name, &options, &self.options, offset)?;

        let result = pipeline::stream_entry(
            name,
            reader,
            &mut self.sink,
            prepared,
            &options,
            &self.options,
            is_first_entry,
            self.pool.clone(),
            Some(Arc::clone(&self.cancel)),
            self.chunk_size,
            observer,
        )
        .await;

        let mut entry = match result {
            Ok(entry) => entry,
            Err(err) => {
                if err.poisons_archive() {
                    self.poisoned = Some(err.to_string());
                }
                return Err(err);
            }
        };

        finalize_zip64_fields(&mut entry, is_first_entry, forced_zip64);
        if entry.needs_zip64() {
            self.archive_zip64 = true;
        }

        debug!(name, offset, "entry committed to central directory");

        let metadata = EntryMetadata::from(&entry);
        self.committed.push(entry);
        Ok(metadata)
    }

    /// Write the central directory and the end-of-central-directory record
    /// (ZIP64 variants included if needed), then hand back the underlying
    /// sink.
    pub async fn close(mut self, comment: Option<String>) -> Result<W, ArchiveError> {
        if let Some(reason) = &self.poisoned {
            return Err(ArchiveError::invalid_argument(format!(
                "archive is poisoned by a previous error: {reason}"
            )));
        }
        self.closed = true;

        let archive_comment = comment.or_else(|| self.options.comment.clone());
        write_archive_tail(
            &mut self.sink,
            &self.committed,
            &self.options,
            self.archive_zip64,
            archive_comment,
        )
        .await?;

        self.sink.flush().await.map_err(ArchiveError::Io)?;
        debug!(entries = self.committed.len(), "archive closed");

        Ok(self.sink.retrieve_writer())
    }
}

/// Write the central directory plus the (ZIP64) end-of-central-directory
/// records for every committed entry, in call order. Shared by `ZipWriter::close` and
/// `crate::stream::ZipWriterStream::close`.
pub(crate) async fn write_archive_tail<W: AsyncWrite + Unpin>(
    sink: &mut AsyncWriteWrapper<W>,
    committed: &[ArchiveFileEntry],
    options: &ArchiveOptions,
    archive_zip64: bool,
    comment: Option<String>,
) -> Result<(), ArchiveError> {
    let central_directory_offset = sink.get_compress_length() as u64;
    let mut central_directory_size = 0u64;

    for entry in committed {
        let record = build_central_directory_record(entry);
        sink.write_all(&record).await.map_err(ArchiveError::Io)?;
        central_directory_size += record.len() as u64;
    }

    let comment_bytes = comment.as_ref().map(|c| c.as_bytes().to_vec()).unwrap_or_default();

    let too_many_entries = committed.len() as u64 > MAX_ENTRIES_NON_ZIP64;
    let needs_zip64 = archive_zip64
        || options.force_zip64
        || too_many_entries
        || central_directory_offset > ZIP64_THRESHOLD
        || central_directory_size > ZIP64_THRESHOLD
        || (central_directory_offset + central_directory_size) > ZIP64_THRESHOLD;

    if needs_zip64 {
        let zip64_eocd_offset = central_directory_offset + central_directory_size;

        let mut zip64_eocd = ArchiveDescriptor::new(ZIP64_END_OF_CENTRAL_DIRECTORY_SIZE);
        zip64_eocd.write_u32(ZIP64_CENTRAL_DIRECTORY_END_SIGNATURE);
        zip64_eocd.write_u64(ZIP64_END_OF_CENTRAL_DIRECTORY_SIZE - 12);
        zip64_eocd.write_u16(options.version_made_by);
        zip64_eocd.write_u16(VERSION_NEEDED_ZIP64);
        zip64_eocd.write_u32(0); // number of this disk
        zip64_eocd.write_u32(0); // disk with the start of the central directory
        zip64_eocd.write_u64(committed.len() as u64);
        zip64_eocd.write_u64(committed.len() as u64);
        zip64_eocd.write_u64(central_directory_size);
        zip64_eocd.write_u64(central_directory_offset);
        sink.write_all(&zip64_eocd.finish()).await.map_err(ArchiveError::Io)?;

        let mut locator = ArchiveDescriptor::new(ZIP64_END_OF_CENTRAL_DIR_LOCATOR_SIZE);
        locator.write_u32(ZIP64_END_OF_CENTRAL_DIR_LOCATOR_SIGNATURE);
        locator.write_u32(0); // disk with the ZIP64 EOCD record
        locator.write_u64(zip64_eocd_offset);
        locator.write_u32(1); // total number of disks
        sink.write_all(&locator.finish()).await.map_err(ArchiveError::Io)?;
    }

    let entries_field = if too_many_entries { 0xFFFFu16 } else { committed.len() as u16 };
    let cd_size_field = if central_directory_size > ZIP64_THRESHOLD {
        u32::MAX
    } else {
        central_directory_size as u32
    };
    let cd_offset_field = if central_directory_offset > ZIP64_THRESHOLD {
        u32::MAX
    } else {
        central_directory_offset as u32
    };

    let mut eocd = ArchiveDescriptor::new(END_OF_CENTRAL_DIRECTORY_SIZE + comment_bytes.len() as u64);
    eocd.write_u32(CENTRAL_DIRECTORY_END_SIGNATURE);
    eocd.write_u16(0); // number of this disk
    eocd.write_u16(0); // disk with the start of the central directory
    eocd.write_u16(entries_field);
    eocd.write_u16(entries_field);
    eocd.write_u32(cd_size_field);
    eocd.write_u32(cd_offset_field);
    eocd.write_u16(comment_bytes.len() as u16);
    eocd.write_bytes(&comment_bytes);
    sink.write_all(&eocd.finish()).await.map_err(ArchiveError::Io)?;

    Ok(())
}

/// Decide and attach the central-directory ZIP64 extra field for one entry,
/// now that its true offset is known (spec.md §4.5 "ZIP64 extra field sizing
/// rule"). Shared between the sequential `ZipWriter::add` and
/// `crate::stream::ZipWriterStream`'s reorder-buffer drain, both of which
/// only learn an entry's true offset once every earlier entry has flushed.
pub(crate) fn finalize_zip64_fields(entry: &mut ArchiveFileEntry, is_first_entry: bool, forced_zip64: bool) {
    let central_presence = zip64_presence_for_entry(
        entry.uncompressed_size,
        entry.compressed_size,
        entry.offset,
        is_first_entry,
        forced_zip64,
    );
    entry.zip64_presence = central_presence;
    if !central_presence.is_empty() {
        entry.zip64 = true;
        entry.extra_fields.insert(
            0,
            Box::new(Zip64ExtraField {
                present: central_presence,
                uncompressed_size: entry.uncompressed_size,
                compressed_size: entry.compressed_size,
                offset: entry.offset,
                disk_number: 0,
            }),
        );
    }
}

/// Render one entry's committed state as a central-directory record (spec.md
/// §4.5). Base 32-bit fields are promoted to the `0xFFFFFFFF` sentinel
/// exactly where `entry.zip64_presence` says the ZIP64 extra field carries
/// the real value.
pub(crate) fn build_central_directory_record(entry: &ArchiveFileEntry) -> Vec<u8> {
    let extra_size = entry.extra_field_central_size();
    let capacity = CENTRAL_DIRECTORY_ENTRY_BASE_SIZE
        + entry.file_name_as_bytes.len() as u64
        + extra_size as u64
        + entry.file_comment_length() as u64;

    let mut out = ArchiveDescriptor::new(capacity);
    out.write_u32(CENTRAL_DIRECTORY_ENTRY_SIGNATURE);
    out.write_u16(entry.version_made_by);
    out.write_u16(entry.version_needed);
    out.write_u16(entry.general_purpose_flags);
    out.write_u16(entry.compression_method);
    out.write_u16(entry.last_mod_file_time);
    out.write_u16(entry.last_mod_file_date);
    out.write_u32(entry.crc32);
    out.write_u32(if entry.zip64_presence.compressed_size {
        u32::MAX
    } else {
        entry.compressed_size as u32
    });
    out.write_u32(if entry.zip64_presence.uncompressed_size {
        u32::MAX
    } else {
        entry.uncompressed_size as u32
    });
    out.write_u16(entry.file_name_len());
    out.write_u16(extra_size);
    out.write_u16(entry.file_comment_length());
    out.write_u16(0); // disk number start
    out.write_u16(entry.internal_file_attributes);
    out.write_u32(entry.external_file_attributes);
    out.write_u32(if entry.zip64_presence.offset {
        u32::MAX
    } else {
        entry.offset as u32
    });
    out.write_bytes(&entry.file_name_as_bytes);
    for field in &entry.extra_fields {
        field.write_central(&mut out);
    }
    if let Some(comment) = &entry.file_comment {
        out.write_bytes(comment);
    }

    out.finish()
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;

    fn no_pool_options() -> ArchiveOptions {
        ArchiveOptions::default()
    }

    #[tokio::test]
    async fn test_single_store_entry_round_trips_through_zip_crate() {
        let mut writer = ZipWriter::without_worker_pool(Vec::new(), no_pool_options());
        let reader = Cursor::new(b"hello world".to_vec());
        let meta = writer
            .add("hello.txt", EntryOptions::store().declared_size(11), reader)
            .await
            .unwrap();
        assert_eq!(meta.uncompressed_size, 11);
        assert_eq!(meta.offset, 0);

        let bytes = writer.close(None).await.unwrap();

        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        assert_eq!(archive.len(), 1);
        let mut file = archive.by_name("hello.txt").unwrap();
        let mut contents = String::new();
        std::io::Read::read_to_string(&mut file, &mut contents).unwrap();
        assert_eq!(contents, "hello world");
    }

    #[tokio::test]
    async fn test_multiple_entries_preserve_submission_order() {
        let mut writer = ZipWriter::without_worker_pool(Vec::new(), no_pool_options());
        for (name, body) in [("a.txt", "aaa"), ("b.txt", "bb"), ("c.txt", "c")] {
            writer
                .add(
                    name,
                    EntryOptions::store().declared_size(body.len() as u64),
                    Cursor::new(body.as_bytes().to_vec()),
                )
                .await
                .unwrap();
        }
        let bytes = writer.close(None).await.unwrap();

        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        assert_eq!(archive.len(), 3);
        let names: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect();
        assert_eq!(names, vec!["a.txt", "b.txt", "c.txt"]);
    }

    #[tokio::test]
    async fn test_deflate_entry_round_trips() {
        let mut writer = ZipWriter::without_worker_pool(Vec::new(), no_pool_options());
        let body = "the quick brown fox jumps over the lazy dog ".repeat(50);
        writer
            .add(
                "fox.txt",
                EntryOptions::default()
                    .compression_level(6)
                    .declared_size(body.len() as u64),
                Cursor::new(body.clone().into_bytes()),
            )
            .await
            .unwrap();
        let bytes = writer.close(None).await.unwrap();

        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut file = archive.by_name("fox.txt").unwrap();
        let mut contents = String::new();
        std::io::Read::read_to_string(&mut file, &mut contents).unwrap();
        assert_eq!(contents, body);
    }

    #[tokio::test]
    async fn test_empty_archive_closes_successfully() {
        let writer = ZipWriter::without_worker_pool(Vec::new(), no_pool_options());
        let bytes = writer.close(None).await.unwrap();
        let archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        assert_eq!(archive.len(), 0);
    }

    #[tokio::test]
    async fn test_add_after_close_errors() {
        let mut writer = ZipWriter::without_worker_pool(Vec::new(), no_pool_options());
        writer
            .add("a.txt", EntryOptions::store().declared_size(1), Cursor::new(vec![b'a']))
            .await
            .unwrap();
        writer.closed = true;
        let err = writer
            .add("b.txt", EntryOptions::store().declared_size(1), Cursor::new(vec![b'b']))
            .await
            .unwrap_err();
        assert!(matches!(err, ArchiveError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_cancel_aborts_subsequent_add() {
        let mut writer = ZipWriter::without_worker_pool(Vec::new(), no_pool_options());
        writer.cancel();
        let err = writer
            .add("a.txt", EntryOptions::store().declared_size(1), Cursor::new(vec![b'a']))
            .await
            .unwrap_err();
        assert!(matches!(err, ArchiveError::AbortError(_)));
    }

    #[tokio::test]
    async fn test_declared_size_mismatch_does_not_poison_archive() {
        let mut writer = ZipWriter::without_worker_pool(Vec::new(), no_pool_options());
        let err = writer
            .add(
                "bad.bin",
                EntryOptions::store().declared_size(100),
                Cursor::new(b"short".to_vec()),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ArchiveError::InvalidArgument(_)));

        // InvalidArgument does not poison: no central-directory bytes were
        // committed for the rejected entry, so close() still succeeds.
        assert!(writer.close(None).await.is_ok());
    }

    #[tokio::test]
    async fn test_estimate_matches_actual_bytes_written() {
        let options = EntryOptions::store().declared_size(11);
        let archive_options = no_pool_options();
        let estimated = crate::estimate::estimate_stream_size(
            &[crate::estimate::EstimatedEntry::new("hello.txt", options.clone())],
            &archive_options,
        )
        .unwrap();

        let mut writer = ZipWriter::without_worker_pool(Vec::new(), archive_options);
        writer
            .add("hello.txt", options, Cursor::new(b"hello world".to_vec()))
            .await
            .unwrap();
        let bytes = writer.close(None).await.unwrap();

        assert_eq!(bytes.len() as u64, estimated);
    }

    #[tokio::test]
    async fn test_archive_comment_is_written_byte_exact() {
        let mut writer = ZipWriter::without_worker_pool(Vec::new(), no_pool_options());
        writer
            .add("a.txt", EntryOptions::store().declared_size(1), Cursor::new(vec![b'a']))
            .await
            .unwrap();
        let bytes = writer.close(Some("a trailing comment".to_string())).await.unwrap();

        let archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        assert_eq!(archive.comment(), b"a trailing comment");
    }
}
