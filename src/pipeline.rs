//! Entry pipeline (C3, spec.md §4.3): drives one entry through
//! `Created -> HeaderPending -> Streaming -> Finalizing -> Committed`, or
//! `Failed`/`Aborted` on the way. The states are not reified as a typestate
//! enum; instead the stream_entry future below walks through them in order,
//! logging each transition, since the whole lifecycle of one entry is a
//! single linear borrow of the archive's sink.
//!
//! Grounded on `compress/tokio/archive.rs`'s `append_file()` (build header ->
//! stream through a compressor -> compute CRC/sizes -> emit a trailer),
//! generalized to route each chunk through either an inline codec or a
//! leased worker (`crate::worker_pool`).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

use crate::codec::{Codec, CodecTotals, CompressionMethod, DeflateCodec, StoreCodec};
#[cfg(feature = "encryption")]
use crate::codec::AesWrapperCodec;
use crate::constants::*;
use crate::descriptor::ArchiveDescriptor;
use crate::error::ArchiveError;
use crate::options::{ArchiveOptions, EntryOptions};
use crate::types::{
    local_zip64_reservation, AesExtraField, ArchiveFileEntry, ExtendedTimestamp, ExtraField,
    NtfsTimestamp, Zip64ExtraField,
};
use crate::worker_pool::WorkerPool;

/// Observer hooks for one entry's progress (spec.md §4.3 "onstart/onprogress/onend").
/// Default bodies are no-ops; implement only the hooks a caller cares about.
pub trait EntryObserver: Send + Sync {
    fn on_start(&self, _name: &str) {}
    fn on_progress(&self, _name: &str, _bytes_read: u64, _bytes_written: u64) {}
    fn on_end(&self, _name: &str, _result: &Result<(), ArchiveError>) {}
}

/// A no-op observer, used when the caller supplies none.
pub struct NullObserver;
impl EntryObserver for NullObserver {}

/// Everything decided before the entry's payload starts streaming: the local
/// header bytes already laid out, the draft central-directory record (sizes
/// and CRC still placeholders), and the codec that will transform the bytes.
pub struct PreparedEntry {
    pub header_bytes: Vec<u8>,
    pub entry: ArchiveFileEntry,
    codec: Box<dyn Codec>,
    use_data_descriptor: bool,
}

fn build_codec(options: &EntryOptions) -> Result<Box<dyn Codec>, ArchiveError> {
    // Passthrough entries are already in their final on-disk form (the
    // caller vouches for it); only CRC/byte-count bookkeeping is needed, so
    // the identity codec runs regardless of the declared compression level.
    if options.pass_through {
        return Ok(Box::new(StoreCodec::new()));
    }

    let method = CompressionMethod::from_options(options.compression_level, options.is_encrypted());

    let plain: Box<dyn Codec> = match method {
        CompressionMethod::Store | CompressionMethod::AesWrapper if options.compression_level == 0 => {
            Box::new(StoreCodec::new())
        }
        _ => Box::new(DeflateCodec::new(options.compression_level)),
    };

    if let Some(password) = options.password.as_deref() {
        #[cfg(feature = "encryption")]
        {
            return Ok(Box::new(AesWrapperCodec::new(plain, password)));
        }
        #[cfg(not(feature = "encryption"))]
        {
            let _ = password;
            return Err(ArchiveError::invalid_argument(
                "entry requests a password but the `encryption` feature is disabled",
            ));
        }
    }

    Ok(plain)
}

/// Build the local header bytes and the draft central-directory record for
/// one entry (spec.md §4.3 "HeaderPending"). `offset` is the assembler's
/// current write cursor, which becomes this entry's local-header offset.
pub fn prepare_entry(
    name: &str,
    options: &EntryOptions,
    archive_options: &ArchiveOptions,
    offset: u64,
) -> Result<PreparedEntry, ArchiveError> {
    if name.is_empty() {
        return Err(ArchiveError::invalid_argument("entry name must not be empty"));
    }
    if name.as_bytes().len() > MAX_NAME_LEN {
        return Err(ArchiveError::invalid_argument(format!(
            "entry name {name} exceeds the {MAX_NAME_LEN}-byte limit"
        )));
    }
    if options.pass_through && options.is_encrypted() {
        return Err(ArchiveError::invalid_argument(
            "passthrough entries cannot also request encryption",
        ));
    }

    let codec = build_codec(options)?;
    let encrypted = options.is_encrypted();
    // In passthrough mode the codec is always an identity `StoreCodec` (see
    // `build_codec`), but the header must still record the method the
    // caller-supplied bytes are already encoded with.
    let compression_method = if options.pass_through {
        CompressionMethod::from_options(options.compression_level, encrypted).zip_code()
    } else {
        codec.compression_method()
    };

    let forced_zip64 = archive_options.force_zip64 || options.force_zip64;
    let mut version_needed = options.system.update_version_needed(
        CompressionMethod::from_options(options.compression_level, encrypted).version_needed(),
    );
    if forced_zip64 {
        version_needed = version_needed.max(options.system.update_version_needed(VERSION_NEEDED_ZIP64));
    }

    let mut flags = GPBF_DATA_DESCRIPTOR | GPBF_UTF8;
    if encrypted {
        flags |= GPBF_ENCRYPTED;
    }

    let (date, time) = options.last_modified_time.ms_dos();
    let file_name_as_bytes = name.as_bytes().to_vec();

    let mut extra_fields: Vec<Box<dyn ExtraField>> = Vec::new();
    if options.extended_timestamp || options.last_modified_time.wants_extended_timestamp() {
        extra_fields.push(Box::new(ExtendedTimestamp {
            modify_time: options.last_modified_time.timestamp(),
        }));
    }
    if options.ntfs_timestamp {
        let filetime = NtfsTimestamp::filetime_from_unix(options.last_modified_time.timestamp() as i64);
        extra_fields.push(Box::new(NtfsTimestamp {
            mtime_filetime: filetime,
            atime_filetime: filetime,
            ctime_filetime: filetime,
        }));
    }
    #[cfg(feature = "encryption")]
    if encrypted {
        extra_fields.push(Box::new(AesExtraField {
            vendor_version: 2, // AE-2
            strength_code: crate::codec::AES256_STRENGTH_CODE,
            inner_compression_method: if options.compression_level == 0 {
                COMPRESSION_METHOD_STORE
            } else {
                COMPRESSION_METHOD_DEFLATE
            },
        }));
    }

    let zip64_reservation = local_zip64_reservation(options.declared_size, forced_zip64);
    let reserve_zip64 = !zip64_reservation.is_empty();
    let local_zip64 = Zip64ExtraField {
        present: zip64_reservation,
        uncompressed_size: options.declared_size.unwrap_or(0),
        compressed_size: 0,
        offset,
        disk_number: 0,
    };

    let extra_field_local_size: u16 = extra_fields.iter().map(|f| f.local_size()).sum::<u16>()
        + if reserve_zip64 { local_zip64.local_size() } else { 0 };

    let mut header = ArchiveDescriptor::new(FILE_HEADER_BASE_SIZE + file_name_as_bytes.len() as u64 + extra_field_local_size as u64);
    header.write_u32(LOCAL_FILE_HEADER_SIGNATURE);
    header.write_u16(version_needed);
    header.write_u16(flags);
    header.write_u16(compression_method);
    header.write_u16(time);
    header.write_u16(date);
    header.write_u32(0); // crc32 placeholder; authoritative value is in the data descriptor
    header.write_u32(0); // compressed size placeholder
    header.write_u32(0); // uncompressed size placeholder
    header.write_u16(file_name_as_bytes.len() as u16);
    header.write_u16(extra_field_local_size);
    header.write_bytes(&file_name_as_bytes);
    if reserve_zip64 {
        local_zip64.write_local(&mut header);
    }
    for field in &extra_fields {
        field.write_local(&mut header);
    }

    let unix_mode = options.unix_permissions.unwrap_or(if options.directory { 0o40755 } else { 0o100644 });
    let external_file_attributes = (unix_mode << 16) | if options.directory { 0x10 } else { 0 };

    let entry = ArchiveFileEntry {
        version_made_by: archive_options.version_made_by,
        version_needed,
        general_purpose_flags: flags,
        compression_method,
        last_mod_file_time: time,
        last_mod_file_date: date,
        crc32: 0,
        compressed_size: 0,
        uncompressed_size: 0,
        file_name_as_bytes,
        offset,
        internal_file_attributes: 0,
        external_file_attributes,
        file_comment: options.comment.as_ref().map(|c| c.as_bytes().to_vec()),
        extra_fields: Vec::new(), // filled in with the final central set once streaming completes
        zip64: forced_zip64,
        is_directory: options.directory,
        zip64_presence: crate::types::Zip64FieldPresence::default(),
    };

    Ok(PreparedEntry {
        header_bytes: header.finish(),
        entry,
        codec,
        use_data_descriptor: true,
    })
}

/// Stream `reader`'s bytes through the prepared entry's codec into `sink`,
/// then emit the data descriptor. Returns the entry's final, committed
/// central-directory record (spec.md §4.3 "Streaming" -> "Finalizing" ->
/// "Committed").
pub async fn stream_entry<R, W>(
    name: &str,
    mut reader: R,
    sink: &mut W,
    prepared: PreparedEntry,
    options: &EntryOptions,
    archive_options: &ArchiveOptions,
    is_first_entry: bool,
    pool: Option<Arc<WorkerPool>>,
    cancel: Option<Arc<AtomicBool>>,
    chunk_size: usize,
    observer: &dyn EntryObserver,
) -> Result<ArchiveFileEntry, ArchiveError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    observer.on_start(name);
    debug!(name, "entry: HeaderPending -> Streaming");

    let PreparedEntry {
        header_bytes,
        mut entry,
        mut codec,
        use_data_descriptor,
    } = prepared;

    let result = async {
        sink.write_all(&header_bytes).await.map_err(ArchiveError::Io)?;

        let mut buf = vec![0u8; chunk_size.max(1)];
        let mut bytes_read: u64 = 0;
        let mut bytes_written: u64 = 0;

        loop {
            if let Some(flag) = &cancel {
                if flag.load(Ordering::SeqCst) {
                    return Err(ArchiveError::abort("entry cancelled mid-stream"));
                }
            }

            let n = reader.read(&mut buf).await.map_err(ArchiveError::Io)?;
            if n == 0 {
                break;
            }
            bytes_read += n as u64;

            // Passthrough entries are already in their final on-disk form:
            // the raw bytes go straight to the sink, while the codec (always
            // a `StoreCodec` in this mode, see `build_codec`) still runs so
            // its CRC/byte-count bookkeeping stays in one place.
            let (returned_codec, transformed) = run_update(codec, buf[..n].to_vec(), pool.as_ref()).await?;
            codec = returned_codec;
            let chunk = if options.pass_through { buf[..n].to_vec() } else { transformed };

            sink.write_all(&chunk).await.map_err(ArchiveError::Io)?;
            bytes_written += chunk.len() as u64;
            observer.on_progress(name, bytes_read, bytes_written);

            trace!(name, bytes_read, bytes_written, "entry: chunk written");
        }

        debug!(name, "entry: Streaming -> Finalizing");

        let (trailer, totals) = run_finish(codec, pool.as_ref()).await?;
        sink.write_all(&trailer).await.map_err(ArchiveError::Io)?;
        bytes_written += trailer.len() as u64;

        if let Some(declared) = options.declared_size {
            if declared != totals.input_bytes {
                return Err(ArchiveError::invalid_argument(format!(
                    "entry {name}: declared size {declared} does not match the {} bytes actually read",
                    totals.input_bytes
                )));
            }
        }

        entry.crc32 = totals.signature;
        entry.uncompressed_size = totals.input_bytes;
        entry.compressed_size = totals.output_bytes;

        let forced_zip64 = archive_options.force_zip64 || options.force_zip64;
        entry.zip64 = entry.zip64
            || forced_zip64
            || entry.uncompressed_size > ZIP64_THRESHOLD
            || entry.compressed_size > ZIP64_THRESHOLD;

        // The entry's true offset (and thus whether the *offset* sub-field
        // needs ZIP64 promotion) is only known once the assembler has
        // flushed every earlier entry ahead of it in the keep-order buffer;
        // `crate::archive::ZipWriter` fills in the authoritative offset and
        // rebuilds the ZIP64 extra field, if any, at flush time.
        let mut central_extra: Vec<Box<dyn ExtraField>> = Vec::new();
        if options.extended_timestamp || options.last_modified_time.wants_extended_timestamp() {
            central_extra.push(Box::new(ExtendedTimestamp {
                modify_time: options.last_modified_time.timestamp(),
            }));
        }
        if options.ntfs_timestamp {
            let filetime = NtfsTimestamp::filetime_from_unix(options.last_modified_time.timestamp() as i64);
            central_extra.push(Box::new(NtfsTimestamp {
                mtime_filetime: filetime,
                atime_filetime: filetime,
                ctime_filetime: filetime,
            }));
        }
        #[cfg(feature = "encryption")]
        if options.is_encrypted() {
            central_extra.push(Box::new(AesExtraField {
                vendor_version: 2,
                strength_code: crate::codec::AES256_STRENGTH_CODE,
                inner_compression_method: if options.compression_level == 0 {
                    COMPRESSION_METHOD_STORE
                } else {
                    COMPRESSION_METHOD_DEFLATE
                },
            }));
        }
        entry.extra_fields = central_extra;

        // WinZIP AE-2: the central directory's own CRC-32 field is suppressed
        // (left at zero) for strongly encrypted entries since the AES wrapper
        // already authenticates the ciphertext with its own HMAC tag.
        let central_crc = if options.is_encrypted() { 0 } else { entry.crc32 };

        if use_data_descriptor {
            let mut descriptor = ArchiveDescriptor::new(ZIP64_DESCRIPTOR_SIZE);
            descriptor.write_u32(DATA_DESCRIPTOR_SIGNATURE);
            descriptor.write_u32(central_crc);
            if entry.needs_zip64() {
                descriptor.write_u64(entry.compressed_size);
                descriptor.write_u64(entry.uncompressed_size);
            } else {
                descriptor.write_u32(entry.compressed_size as u32);
                descriptor.write_u32(entry.uncompressed_size as u32);
            }
            let bytes = descriptor.finish();
            sink.write_all(&bytes).await.map_err(ArchiveError::Io)?;
            bytes_written += bytes.len() as u64;
        }

        entry.crc32 = central_crc;

        debug!(name, "entry: Finalizing -> Committed");
        Ok(entry)
    }
    .await;

    let observed = result.as_ref().map(|_| ()).map_err(|e: &ArchiveError| match e {
        ArchiveError::AbortError(msg) => ArchiveError::abort(msg.clone()),
        other => ArchiveError::codec(other.to_string()),
    });
    observer.on_end(name, &observed);

    result
}

async fn run_update(
    codec: Box<dyn Codec>,
    chunk: Vec<u8>,
    pool: Option<&Arc<WorkerPool>>,
) -> Result<(Box<dyn Codec>, Vec<u8>), ArchiveError> {
    match pool {
        None => {
            let mut codec = codec;
            let out = codec.update(&chunk)?;
            Ok((codec, out))
        }
        Some(pool) => {
            let (_lease, rx) = pool.submit_update(codec, chunk);
            match rx.await {
                Ok(crate::worker_pool::JobOutcome::Update { codec, result }) => Ok((codec, result?)),
                Ok(crate::worker_pool::JobOutcome::Finish { .. }) => {
                    Err(ArchiveError::codec("worker pool returned a finish outcome for an update job"))
                }
                Err(_) => Err(ArchiveError::codec("worker pool dropped the reply channel")),
            }
        }
    }
}

async fn run_finish(
    codec: Box<dyn Codec>,
    pool: Option<&Arc<WorkerPool>>,
) -> Result<(Vec<u8>, CodecTotals), ArchiveError> {
    match pool {
        None => {
            let mut codec = codec;
            codec.finish()
        }
        Some(pool) => {
            let (_lease, rx) = pool.submit_finish(codec);
            match rx.await {
                Ok(crate::worker_pool::JobOutcome::Finish { result }) => result,
                Ok(crate::worker_pool::JobOutcome::Update { .. }) => {
                    Err(ArchiveError::codec("worker pool returned an update outcome for a finish job"))
                }
                Err(_) => Err(ArchiveError::codec("worker pool dropped the reply channel")),
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn test_stream_entry_store_roundtrip() {
        let options = EntryOptions::store().declared_size(5);
        let archive_options = ArchiveOptions::default();
        let prepared = prepare_entry("hello.txt", &options, &archive_options, 0).unwrap();

        let mut sink: Vec<u8> = Vec::new();
        let reader = Cursor::new(b"world".to_vec());
        let entry = stream_entry(
            "hello.txt",
            reader,
            &mut sink,
            prepared,
            &options,
            &archive_options,
            true,
            None,
            None,
            8,
            &NullObserver,
        )
        .await
        .unwrap();

        assert_eq!(entry.uncompressed_size, 5);
        assert_eq!(entry.compressed_size, 5);
        assert!(!entry.needs_zip64());
        // local header + payload + data descriptor
        assert!(sink.len() > 5);
    }

    #[tokio::test]
    async fn test_stream_entry_rejects_size_mismatch() {
        let options = EntryOptions::store().declared_size(100);
        let archive_options = ArchiveOptions::default();
        let prepared = prepare_entry("x.bin", &options, &archive_options, 0).unwrap();

        let mut sink: Vec<u8> = Vec::new();
        let reader = Cursor::new(b"short".to_vec());
        let err = stream_entry(
            "x.bin",
            reader,
            &mut sink,
            prepared,
            &options,
            &archive_options,
            true,
            None,
            None,
            8,
            &NullObserver,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ArchiveError::InvalidArgument(_)));
    }

    #[test]
    fn test_prepare_entry_rejects_empty_name() {
        let options = EntryOptions::default();
        let archive_options = ArchiveOptions::default();
        assert!(prepare_entry("", &options, &archive_options, 0).is_err());
    }
}
