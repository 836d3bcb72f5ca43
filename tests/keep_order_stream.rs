//! `ZipWriterStream` keeps entries in submission order on the sink even
//! though their compression runs concurrently (spec.md §8 scenario S5).

use std::io::Cursor;

use tokio::io::AsyncWriteExt;
use zipwright::{ArchiveOptions, EntryOptions, WorkerPoolConfig, ZipWriterStream};

#[tokio::test]
async fn hundred_entries_flush_in_submission_order() {
    let stream = ZipWriterStream::without_worker_pool(Vec::new(), ArchiveOptions::default());

    let mut writers = Vec::new();
    for i in 0..100 {
        let name = format!("entry-{i:03}.txt");
        let writer = stream.writable(&name, EntryOptions::store().declared_size(3)).unwrap();
        writers.push(writer);
    }
    // Finish writing in reverse order: the last-opened entry is the first to
    // reach the drain loop's reorder buffer.
    for (i, mut writer) in writers.into_iter().enumerate().rev() {
        let body = format!("{i:03}");
        writer.write_all(body.as_bytes()).await.unwrap();
        writer.shutdown().await.unwrap();
    }

    let bytes = stream.close(None).await.unwrap();

    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
    assert_eq!(archive.len(), 100);
    for i in 0..100 {
        let expected = format!("entry-{i:03}.txt");
        assert_eq!(archive.by_index(i).unwrap().name(), expected);
    }
}

#[tokio::test]
async fn max_workers_one_is_equivalent_to_sequential_order() {
    let pool = WorkerPoolConfig::conservative();
    assert_eq!(pool.max_workers, 1);

    let stream = ZipWriterStream::without_worker_pool(
        Vec::new(),
        ArchiveOptions::default().max_workers(1),
    );
    for (name, body) in [("a.txt", "a"), ("b.txt", "b"), ("c.txt", "c")] {
        let mut writer = stream.writable(name, EntryOptions::store().declared_size(1)).unwrap();
        writer.write_all(body.as_bytes()).await.unwrap();
        writer.shutdown().await.unwrap();
    }
    let bytes = stream.close(None).await.unwrap();

    let archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
    assert_eq!(archive.len(), 3);
}

#[tokio::test]
async fn worker_pool_config_balanced_scales_with_cpus() {
    let config = WorkerPoolConfig::balanced();
    assert!(config.max_workers >= 1);
}
