//! End-to-end round trips through the independent `zip` crate reader,
//! since this crate never reads archives itself.

use std::io::{Cursor, Read};

use zipwright::{ArchiveOptions, EntryOptions, FileDateTime, ZipWriter};

#[tokio::test]
async fn mixed_store_and_deflate_entries_round_trip() {
    let mut writer = ZipWriter::without_worker_pool(Vec::new(), ArchiveOptions::default());

    writer
        .add(
            "readme.txt",
            EntryOptions::store().declared_size(5),
            Cursor::new(b"hello".to_vec()),
        )
        .await
        .unwrap();

    let body = "lorem ipsum dolor sit amet ".repeat(200);
    writer
        .add(
            "lorem.txt",
            EntryOptions::default()
                .compression_level(9)
                .declared_size(body.len() as u64)
                .last_modified_time(FileDateTime::UnixCustom(1_700_000_000)),
            Cursor::new(body.clone().into_bytes()),
        )
        .await
        .unwrap();

    let bytes = writer.close(Some("built by zipwright".to_string())).await.unwrap();

    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
    assert_eq!(archive.len(), 2);
    assert_eq!(archive.comment(), b"built by zipwright");

    let mut readme = String::new();
    archive.by_name("readme.txt").unwrap().read_to_string(&mut readme).unwrap();
    assert_eq!(readme, "hello");

    let mut lorem = String::new();
    archive.by_name("lorem.txt").unwrap().read_to_string(&mut lorem).unwrap();
    assert_eq!(lorem, body);
}

#[tokio::test]
async fn directory_entries_round_trip() {
    let mut writer = ZipWriter::without_worker_pool(Vec::new(), ArchiveOptions::default());
    writer
        .add("photos/", EntryOptions::store().directory(true).declared_size(0), Cursor::new(Vec::new()))
        .await
        .unwrap();
    let bytes = writer.close(None).await.unwrap();

    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
    let entry = archive.by_index(0).unwrap();
    assert!(entry.is_dir());
}

#[tokio::test]
async fn passthrough_entries_preserve_raw_bytes() {
    // Pre-compressed bytes handed in as-is; the codec only computes CRC/sizes.
    let mut writer = ZipWriter::without_worker_pool(Vec::new(), ArchiveOptions::default());
    writer
        .add(
            "already_stored.bin",
            EntryOptions::store().declared_size(4).pass_through(true),
            Cursor::new(b"data".to_vec()),
        )
        .await
        .unwrap();
    let bytes = writer.close(None).await.unwrap();

    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
    let mut out = Vec::new();
    archive.by_name("already_stored.bin").unwrap().read_to_end(&mut out).unwrap();
    assert_eq!(out, b"data");
}
