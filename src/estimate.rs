//! Size estimator (C5, spec.md §4.5): a pure function mirroring the
//! assembler's exact byte layout, so callers can learn an archive's final
//! size before (or instead of) writing it.
//!
//! Every constant and branch here must track `pipeline::prepare_entry` /
//! `pipeline::stream_entry` and `archive::ZipWriter::close` byte-for-byte —
//! that agreement is this crate's "estimator exactness" testable property.

use crate::codec::CompressionMethod;
use crate::constants::*;
use crate::error::ArchiveError;
use crate::options::{ArchiveOptions, EntryOptions};
use crate::types::{local_zip64_reservation, zip64_presence_for_entry};

/// One entry as seen by the estimator: a name, its options, and — for
/// level > 0 — a caller-supplied predicted compressed size (spec.md §4.5:
/// "for level>0 the caller must supply a predicted compressed size, or the
/// estimator fails with `UnknownSize`").
pub struct EstimatedEntry<'a> {
    pub name: &'a str,
    pub options: EntryOptions,
    pub predicted_compressed_size: Option<u64>,
}

impl<'a> EstimatedEntry<'a> {
    pub fn new(name: &'a str, options: EntryOptions) -> Self {
        Self {
            name,
            options,
            predicted_compressed_size: None,
        }
    }

    pub fn predicted_compressed_size(mut self, size: u64) -> Self {
        self.predicted_compressed_size = Some(size);
        self
    }
}

fn extra_fields_size(options: &EntryOptions) -> u16 {
    let mut size = 0u16;
    if options.extended_timestamp || options.last_modified_time.wants_extended_timestamp() {
        size += 4 + 5; // X5455_EXTENDED_TIMESTAMP: tag+len(4) + flags+mtime(5)
    }
    if options.ntfs_timestamp {
        size += 4 + NTFS_TIMESTAMP_DATA_SIZE;
    }
    if options.is_encrypted() {
        size += 4 + AES_EXTRA_FIELD_DATA_SIZE;
    }
    size
}

/// Estimate the total number of bytes `ZipWriter` will emit for an archive
/// holding exactly these entries, in this order, under these archive-wide
/// options. Fails with [`ArchiveError::UnknownSize`] if a level > 0 entry has
/// no declared size and no predicted compressed size.
pub fn estimate_stream_size(
    entries: &[EstimatedEntry],
    archive_options: &ArchiveOptions,
) -> Result<u64, ArchiveError> {
    let mut offset = 0u64;
    let mut central_directory_size = 0u64;
    let mut any_entry_needs_zip64 = false;

    for (index, entry) in entries.iter().enumerate() {
        let is_first_entry = index == 0;
        let options = &entry.options;

        let uncompressed_size = options.declared_size.ok_or_else(|| {
            ArchiveError::estimation(format!(
                "entry {}: declared_size is required to estimate archive size",
                entry.name
            ))
        })?;

        let compressed_size = if options.pass_through || options.compression_level == 0 {
            uncompressed_size
        } else {
            entry.predicted_compressed_size.ok_or_else(|| {
                ArchiveError::UnknownSize(format!(
                    "entry {}: level {} requires a predicted compressed size",
                    entry.name, options.compression_level
                ))
            })?
        };

        let forced_zip64 = archive_options.force_zip64 || options.force_zip64;

        // Local header: fixed fields + name + extra fields (timestamps, AES,
        // and — when reservation is possible — a ZIP64 field) + payload +
        // data descriptor (always emitted; see pipeline::stream_entry).
        let name_len = entry.name.as_bytes().len() as u64;

        let local_zip64_presence = local_zip64_reservation(options.declared_size, forced_zip64);
        let local_zip64_size = if local_zip64_presence.is_empty() {
            0
        } else {
            4 + local_zip64_presence.data_size() as u64
        };

        let local_extra_size = extra_fields_size(options) as u64 + local_zip64_size;

        // Mirrors `ArchiveFileEntry::needs_zip64` (types.rs), which the
        // assembler consults both to size the trailing data descriptor
        // (pipeline::stream_entry) and to decide whether this entry tips the
        // whole archive into ZIP64 (archive::ZipWriter::add). The offset term
        // matters: an entry landing past the 4 GiB mark needs a 24-byte
        // descriptor even with small, known, unforced sizes.
        let entry_offset = offset;
        let needs_zip64 = forced_zip64
            || uncompressed_size > ZIP64_THRESHOLD
            || compressed_size > ZIP64_THRESHOLD
            || entry_offset > ZIP64_THRESHOLD;
        any_entry_needs_zip64 |= needs_zip64;

        let descriptor_size = if needs_zip64 {
            ZIP64_DESCRIPTOR_SIZE
        } else {
            DESCRIPTOR_SIZE
        };

        offset += FILE_HEADER_BASE_SIZE + name_len + local_extra_size + compressed_size + descriptor_size;

        // Central directory record: fixed fields + name + extra fields
        // (final ZIP64 presence, decided from the real sizes) + comment.
        let central_presence = zip64_presence_for_entry(
            uncompressed_size,
            compressed_size,
            entry_offset,
            is_first_entry,
            forced_zip64,
        );
        let central_zip64_size = if central_presence.is_empty() {
            0
        } else {
            4 + central_presence.data_size() as u64
        };
        let central_extra_size = extra_fields_size(options) as u64 + central_zip64_size;
        let comment_len = options.comment.as_ref().map_or(0, |c| c.as_bytes().len() as u64);

        central_directory_size +=
            CENTRAL_DIRECTORY_ENTRY_BASE_SIZE + name_len + central_extra_size + comment_len;
    }

    // `any_entry_needs_zip64` folds in every per-entry `force_zip64` and
    // size/offset promotion, matching `ZipWriter::add`'s
    // `self.archive_zip64 = true` whenever `entry.needs_zip64()` — not just
    // the archive-wide `force_zip64`/aggregate-size terms below.
    let archive_needs_zip64 = archive_options.force_zip64
        || any_entry_needs_zip64
        || entries.len() as u64 > MAX_ENTRIES_NON_ZIP64
        || offset > ZIP64_THRESHOLD
        || central_directory_size > ZIP64_THRESHOLD
        || (offset + central_directory_size) > ZIP64_THRESHOLD;

    let mut total = offset + central_directory_size;
    if archive_needs_zip64 {
        total += ZIP64_END_OF_CENTRAL_DIRECTORY_SIZE + ZIP64_END_OF_CENTRAL_DIR_LOCATOR_SIZE;
    }
    total += END_OF_CENTRAL_DIRECTORY_SIZE;
    total += archive_options.comment.as_ref().map_or(0, |c| c.as_bytes().len() as u64);

    Ok(total)
}

/// Record the effective compression method an entry estimate would use, for
/// callers that want to sanity-check their predicted compressed size against
/// a real codec (e.g. in tests).
pub fn effective_method(options: &EntryOptions) -> CompressionMethod {
    CompressionMethod::from_options(options.compression_level, options.is_encrypted())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_estimate_single_store_entry() {
        let options = EntryOptions::store().declared_size(100);
        let entries = vec![EstimatedEntry::new("a.txt", options)];
        let archive_options = ArchiveOptions::default();
        let estimated = estimate_stream_size(&entries, &archive_options).unwrap();
        assert!(estimated > 100);
    }

    #[test]
    fn test_estimate_requires_predicted_size_for_deflate() {
        let options = EntryOptions::default().compression_level(6).declared_size(100);
        let entries = vec![EstimatedEntry::new("a.txt", options)];
        let archive_options = ArchiveOptions::default();
        let err = estimate_stream_size(&entries, &archive_options).unwrap_err();
        assert!(matches!(err, ArchiveError::UnknownSize(_)));
    }

    #[test]
    fn test_estimate_accepts_predicted_compressed_size() {
        let options = EntryOptions::default().compression_level(6).declared_size(1000);
        let entries = vec![EstimatedEntry::new("a.txt", options).predicted_compressed_size(200)];
        let archive_options = ArchiveOptions::default();
        assert!(estimate_stream_size(&entries, &archive_options).is_ok());
    }

    #[test]
    fn test_estimate_fails_without_declared_size() {
        let options = EntryOptions::store();
        let entries = vec![EstimatedEntry::new("a.txt", options)];
        let archive_options = ArchiveOptions::default();
        assert!(estimate_stream_size(&entries, &archive_options).is_err());
    }

    #[test]
    fn test_estimate_grows_with_forced_zip64() {
        let options = EntryOptions::store().declared_size(100);
        let entries = vec![EstimatedEntry::new("a.txt", options)];
        let plain = estimate_stream_size(&entries, &ArchiveOptions::default()).unwrap();

        let options = EntryOptions::store().declared_size(100).force_zip64(true);
        let entries = vec![EstimatedEntry::new("a.txt", options)];
        let forced = estimate_stream_size(&entries, &ArchiveOptions::default()).unwrap();

        assert!(forced > plain);
    }
}
