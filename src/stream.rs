//! Streaming facade (spec.md §6 `ZipWriterStream`, §9 "re-architect as a
//! message-passing pipeline"): lets entries compress concurrently, bounded by
//! `maxWorkers`, while the archive's bytes still land on the sink in `add()`
//! call order.
//!
//! Each `writable()` call hands the caller one half of a `tokio::io::duplex`
//! and spawns a task that drives the other half through
//! `crate::pipeline::stream_entry` into a private, in-memory buffer — so
//! concurrent entries never contend over the real sink's cursor. A single
//! drain task collects finished entries into a `BTreeMap` keyed by
//! submission index (spec.md §9's "keep-order reordering buffer") and writes
//! each one to the real sink as soon as every earlier entry has been flushed.

use std::collections::BTreeMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::io::{AsyncWrite, AsyncWriteExt, DuplexStream};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::trace;

use crate::archive::{finalize_zip64_fields, write_archive_tail};
use crate::async_write_wrapper::AsyncWriteWrapper;
use crate::error::ArchiveError;
use crate::options::{ArchiveOptions, EntryOptions};
use crate::pipeline::{self, EntryObserver, NullObserver};
use crate::types::ArchiveFileEntry;
use crate::worker_pool::WorkerPool;

/// One entry's write half, handed back by [`ZipWriterStream::writable`].
/// Call `shutdown()` (or drop it) once the entry's payload is fully written,
/// to signal EOF to its pipeline.
pub struct EntryWriter {
    inner: DuplexStream,
}

impl AsyncWrite for EntryWriter {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<Result<usize, std::io::Error>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), std::io::Error>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), std::io::Error>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

struct Completion {
    index: usize,
    forced_zip64: bool,
    result: Result<(ArchiveFileEntry, Vec<u8>), ArchiveError>,
}

struct DrainOutcome<W: AsyncWrite + Unpin> {
    sink: AsyncWriteWrapper<W>,
    committed: Vec<ArchiveFileEntry>,
    archive_zip64: bool,
}

async fn drain_loop<W: AsyncWrite + Unpin>(
    mut sink: AsyncWriteWrapper<W>,
    mut completion_rx: mpsc::UnboundedReceiver<Completion>,
    keep_order: bool,
) -> Result<DrainOutcome<W>, ArchiveError> {
    let mut pending: BTreeMap<usize, (bool, ArchiveFileEntry, Vec<u8>)> = BTreeMap::new();
    let mut next_flush = 0usize;
    let mut flushed_count = 0usize;
    let mut committed: Vec<(usize, ArchiveFileEntry)> = Vec::new();
    let mut archive_zip64 = false;

    while let Some(completion) = completion_rx.recv().await {
        let (entry, bytes) = completion.result?;

        if keep_order {
            pending.insert(completion.index, (completion.forced_zip64, entry, bytes));
            while let Some((forced_zip64, mut entry, bytes)) = pending.remove(&next_flush) {
                entry.offset = sink.get_compress_length() as u64;
                finalize_zip64_fields(&mut entry, flushed_count == 0, forced_zip64);
                if entry.needs_zip64() {
                    archive_zip64 = true;
                }
                sink.write_all(&bytes).await.map_err(ArchiveError::Io)?;
                trace!(index = next_flush, offset = entry.offset, "stream: entry flushed to sink");
                committed.push((next_flush, entry));
                flushed_count += 1;
                next_flush += 1;
            }
        } else {
            // Physical bytes land in completion order; the central directory
            // is still reordered back into submission order below (spec.md
            // §5/§8 property #3: "central directory always lists entries in
            // `add()` call order regardless of `keepOrder`").
            let mut entry = entry;
            entry.offset = sink.get_compress_length() as u64;
            finalize_zip64_fields(&mut entry, flushed_count == 0, completion.forced_zip64);
            if entry.needs_zip64() {
                archive_zip64 = true;
            }
            sink.write_all(&bytes).await.map_err(ArchiveError::Io)?;
            trace!(index = completion.index, offset = entry.offset, "stream: entry flushed to sink (completion order)");
            committed.push((completion.index, entry));
            flushed_count += 1;
        }
    }

    committed.sort_by_key(|(index, _)| *index);
    let committed = committed.into_iter().map(|(_, entry)| entry).collect();

    Ok(DrainOutcome { sink, committed, archive_zip64 })
}

/// The `ZipWriterStream` facade (spec.md §6): `{ writable, close() }` plus a
/// `cancel()` aborting every in-flight and future entry.
pub struct ZipWriterStream<W: AsyncWrite + Unpin + Send + 'static> {
    options: ArchiveOptions,
    pool: Option<Arc<WorkerPool>>,
    cancel: Arc<AtomicBool>,
    chunk_size: usize,
    next_index: Arc<AtomicUsize>,
    permits: Arc<Semaphore>,
    completion_tx: mpsc::UnboundedSender<Completion>,
    drainer: JoinHandle<Result<DrainOutcome<W>, ArchiveError>>,
}

impl<W: AsyncWrite + Unpin + Send + 'static> ZipWriterStream<W> {
    /// A stream backed by the process-wide worker pool.
    pub fn new(sink: W, options: ArchiveOptions) -> Self {
        Self::build(sink, options, Some(crate::worker_pool::global()))
    }

    /// Use a specific worker pool instead of the process-wide default.
    pub fn with_pool(sink: W, options: ArchiveOptions, pool: Arc<WorkerPool>) -> Self {
        Self::build(sink, options, Some(pool))
    }

    /// Run every codec inline, on each entry's own spawned task.
    pub fn without_worker_pool(sink: W, options: ArchiveOptions) -> Self {
        Self::build(sink, options, None)
    }

    fn build(sink: W, options: ArchiveOptions, pool: Option<Arc<WorkerPool>>) -> Self {
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let permits = Arc::new(Semaphore::new(options.max_workers.max(1)));
        let keep_order = options.keep_order;
        let drainer = tokio::spawn(drain_loop(AsyncWriteWrapper::new(sink), completion_rx, keep_order));

        Self {
            options,
            pool,
            cancel: Arc::new(AtomicBool::new(false)),
            chunk_size: 64 * 1024,
            next_index: Arc::new(AtomicUsize::new(0)),
            permits,
            completion_tx,
            drainer,
        }
    }

    pub fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }

    /// Cancel the stream: every in-flight entry's pipeline fails with
    /// `AbortError` and future `writable()` calls are rejected (spec.md §5).
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// Open a per-entry write handle. The caller writes the entry's raw
    /// (uncompressed) payload into it, then shuts it down to mark EOF;
    /// compression runs concurrently with other open entries, bounded by
    /// `max_workers`, but flushes to the real sink strictly in call order.
    pub fn writable(&self, name: &str, options: EntryOptions) -> Result<EntryWriter, ArchiveError> {
        self.writable_with_observer(name, options, Arc::new(NullObserver))
    }

    /// Like [`Self::writable`], but reports progress through `observer`
    /// (spec.md §4.3 "onstart/onprogress/onend"). `observer` must tolerate
    /// being driven from a background task, since the entry it describes may
    /// still be streaming after this call returns.
    pub fn writable_with_observer(
        &self,
        name: &str,
        options: EntryOptions,
        observer: Arc<dyn EntryObserver>,
    ) -> Result<EntryWriter, ArchiveError> {
        if self.cancel.load(Ordering::SeqCst) {
            return Err(ArchiveError::abort("stream was cancelled"));
        }

        let index = self.next_index.fetch_add(1, Ordering::SeqCst);
        let is_first_entry = index == 0;
        let forced_zip64 = self.options.force_zip64 || options.force_zip64;
        let name = name.to_owned();
        let (writer_half, reader_half) = tokio::io::duplex(self.chunk_size.max(4096));

        let permits = Arc::clone(&self.permits);
        let pool = self.pool.clone();
        let cancel = Arc::clone(&self.cancel);
        let chunk_size = self.chunk_size;
        let archive_options = self.options.clone();
        let tx = self.completion_tx.clone();

        tokio::spawn(async move {
            let _permit = permits.acquire_owned().await;
            let result = run_entry(
                &name,
                options,
                &archive_options,
                is_first_entry,
                reader_half,
                pool,
                cancel,
                chunk_size,
                observer.as_ref(),
            )
            .await;
            let _ = tx.send(Completion { index, forced_zip64, result });
        });

        Ok(EntryWriter { inner: writer_half })
    }

    /// Wait for every open entry to finish, then write the central directory
    /// and end-of-central-directory records (spec.md §4.4 "close protocol").
    pub async fn close(self, comment: Option<String>) -> Result<W, ArchiveError> {
        let ZipWriterStream {
            options,
            completion_tx,
            drainer,
            ..
        } = self;
        // Drop our own sender clone; the drain loop's `recv()` only returns
        // `None` once every spawned entry task has also dropped its clone,
        // i.e. once every open entry has finished (or been cancelled).
        drop(completion_tx);

        let outcome = drainer
            .await
            .map_err(|_| ArchiveError::codec("stream drain task panicked"))??;
        let DrainOutcome {
            mut sink,
            committed,
            archive_zip64,
        } = outcome;

        let archive_comment = comment.or_else(|| options.comment.clone());
        write_archive_tail(&mut sink, &committed, &options, archive_zip64, archive_comment).await?;
        sink.flush().await.map_err(ArchiveError::Io)?;

        Ok(sink.retrieve_writer())
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_entry<R>(
    name: &str,
    options: EntryOptions,
    archive_options: &ArchiveOptions,
    is_first_entry: bool,
    reader: R,
    pool: Option<Arc<WorkerPool>>,
    cancel: Arc<AtomicBool>,
    chunk_size: usize,
    observer: &dyn EntryObserver,
) -> Result<(ArchiveFileEntry, Vec<u8>), ArchiveError>
where
    R: tokio::io::AsyncRead + Unpin,
{
    // The offset passed to `prepare_entry` only seeds `ArchiveFileEntry::offset`;
    // the local header never encodes it (see `types::local_zip64_reservation`),
    // so streaming into a private buffer with a placeholder of 0 is safe. The
    // drain loop overwrites it with the real cursor value once this entry's
    // turn to flush arrives.
    let prepared = pipeline::prepare_entry(name, &options, archive_options, 0)?;

    let mut private_sink: Vec<u8> = Vec::new();
    let entry = pipeline::stream_entry(
        name,
        reader,
        &mut private_sink,
        prepared,
        &options,
        archive_options,
        is_first_entry,
        pool,
        Some(cancel),
        chunk_size,
        observer,
    )
    .await?;

    Ok((entry, private_sink))
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;

    async fn write_and_shut(mut writer: EntryWriter, body: &[u8]) {
        writer.write_all(body).await.unwrap();
        writer.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_single_entry_round_trips_through_zip_crate() {
        let stream = ZipWriterStream::without_worker_pool(Vec::new(), ArchiveOptions::default());
        let writer = stream
            .writable("hello.txt", EntryOptions::store().declared_size(11))
            .unwrap();
        write_and_shut(writer, b"hello world").await;

        let bytes = stream.close(None).await.unwrap();

        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        assert_eq!(archive.len(), 1);
        let mut file = archive.by_name("hello.txt").unwrap();
        let mut contents = String::new();
        std::io::Read::read_to_string(&mut file, &mut contents).unwrap();
        assert_eq!(contents, "hello world");
    }

    struct RecordingObserver {
        started: std::sync::Mutex<Vec<String>>,
        ended: std::sync::Mutex<Vec<String>>,
    }

    impl EntryObserver for RecordingObserver {
        fn on_start(&self, name: &str) {
            self.started.lock().unwrap().push(name.to_owned());
        }

        fn on_end(&self, name: &str, result: &Result<(), ArchiveError>) {
            assert!(result.is_ok());
            self.ended.lock().unwrap().push(name.to_owned());
        }
    }

    #[tokio::test]
    async fn test_writable_with_observer_reports_start_and_end() {
        let observer = Arc::new(RecordingObserver {
            started: std::sync::Mutex::new(Vec::new()),
            ended: std::sync::Mutex::new(Vec::new()),
        });
        let stream = ZipWriterStream::without_worker_pool(Vec::new(), ArchiveOptions::default());
        let writer = stream
            .writable_with_observer(
                "hello.txt",
                EntryOptions::store().declared_size(5),
                observer.clone(),
            )
            .unwrap();
        write_and_shut(writer, b"hello").await;
        stream.close(None).await.unwrap();

        assert_eq!(*observer.started.lock().unwrap(), vec!["hello.txt".to_string()]);
        assert_eq!(*observer.ended.lock().unwrap(), vec!["hello.txt".to_string()]);
    }

    #[tokio::test]
    async fn test_concurrent_entries_flush_in_submission_order() {
        let stream = ZipWriterStream::without_worker_pool(Vec::new(), ArchiveOptions::default());

        // Open "a" first but finish writing "b" first: the drain loop must
        // still flush "a" before "b" since it was *submitted* first.
        let writer_a = stream.writable("a.txt", EntryOptions::store().declared_size(1)).unwrap();
        let writer_b = stream.writable("b.txt", EntryOptions::store().declared_size(1)).unwrap();

        write_and_shut(writer_b, b"b").await;
        tokio::task::yield_now().await;
        write_and_shut(writer_a, b"a").await;

        let bytes = stream.close(None).await.unwrap();

        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        assert_eq!(archive.len(), 2);
        assert_eq!(archive.by_index(0).unwrap().name(), "a.txt");
        assert_eq!(archive.by_index(1).unwrap().name(), "b.txt");
    }

    #[tokio::test]
    async fn test_keep_order_false_still_lists_central_directory_in_submission_order() {
        // spec.md §5/§8 property #3: with `keepOrder` off, physical bytes may
        // land in completion order, but the central directory must still
        // reflect `add()`/`writable()` call order.
        let stream = ZipWriterStream::without_worker_pool(
            Vec::new(),
            ArchiveOptions::default().keep_order(false),
        );

        let writer_a = stream.writable("a.txt", EntryOptions::store().declared_size(1)).unwrap();
        let writer_b = stream.writable("b.txt", EntryOptions::store().declared_size(1)).unwrap();

        write_and_shut(writer_b, b"b").await;
        tokio::task::yield_now().await;
        write_and_shut(writer_a, b"a").await;

        let bytes = stream.close(None).await.unwrap();

        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        assert_eq!(archive.len(), 2);
        assert_eq!(archive.by_index(0).unwrap().name(), "a.txt");
        assert_eq!(archive.by_index(1).unwrap().name(), "b.txt");
    }

    #[tokio::test]
    async fn test_cancel_rejects_new_writable_calls() {
        let stream = ZipWriterStream::without_worker_pool(Vec::new(), ArchiveOptions::default());
        stream.cancel();
        let err = stream
            .writable("a.txt", EntryOptions::store().declared_size(1))
            .unwrap_err();
        assert!(matches!(err, ArchiveError::AbortError(_)));
        let _ = stream.close(None).await;
    }

    #[tokio::test]
    async fn test_empty_stream_closes_successfully() {
        let stream = ZipWriterStream::without_worker_pool(Vec::new(), ArchiveOptions::default());
        let bytes = stream.close(None).await.unwrap();
        let archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        assert_eq!(archive.len(), 0);
    }
}
