use crate::descriptor::ArchiveDescriptor;
use crate::types::{AesExtraField, ExtendedTimestamp, ExtraField, NtfsTimestamp};

#[test]
fn test_extended_timestamp_local_layout() {
    let field = ExtendedTimestamp { modify_time: 1582248020 };
    let mut out = ArchiveDescriptor::new(field.local_size() as u64);
    field.write_local(&mut out);
    let bytes = out.finish();

    assert_eq!(bytes.len(), field.local_size() as usize);
    assert_eq!(&bytes[0..2], &0x5455u16.to_le_bytes()); // tag
    assert_eq!(&bytes[2..4], &5u16.to_le_bytes()); // data size
    assert_eq!(bytes[4], 1); // modify-time-present flag only
    assert_eq!(&bytes[5..9], &1582248020i32.to_le_bytes());
}

#[test]
fn test_extended_timestamp_central_matches_local() {
    let field = ExtendedTimestamp { modify_time: 42 };
    let mut local = ArchiveDescriptor::new(field.local_size() as u64);
    field.write_local(&mut local);
    let mut central = ArchiveDescriptor::new(field.central_size() as u64);
    field.write_central(&mut central);
    assert_eq!(local.finish(), central.finish());
}

#[test]
fn test_ntfs_timestamp_layout() {
    let field = NtfsTimestamp {
        mtime_filetime: 1,
        atime_filetime: 2,
        ctime_filetime: 3,
    };
    let mut out = ArchiveDescriptor::new(field.local_size() as u64);
    field.write_local(&mut out);
    let bytes = out.finish();

    assert_eq!(bytes.len(), 36); // 4-byte tag+len header + 32 data bytes
    assert_eq!(&bytes[0..2], &0x000au16.to_le_bytes());
    assert_eq!(&bytes[2..4], &32u16.to_le_bytes());
    assert_eq!(&bytes[4..8], &0u32.to_le_bytes()); // reserved
    assert_eq!(&bytes[8..10], &1u16.to_le_bytes()); // attribute tag 1
    assert_eq!(&bytes[10..12], &24u16.to_le_bytes()); // attribute size
    assert_eq!(&bytes[12..20], &1u64.to_le_bytes());
    assert_eq!(&bytes[20..28], &2u64.to_le_bytes());
    assert_eq!(&bytes[28..36], &3u64.to_le_bytes());
}

#[test]
fn test_ntfs_filetime_from_unix_epoch() {
    // The Unix epoch is 1970-01-01, which is 116444736000000000 ticks after
    // the FILETIME epoch (1601-01-01).
    assert_eq!(NtfsTimestamp::filetime_from_unix(0), 116_444_736_000_000_000);
}

#[test]
fn test_aes_extra_field_layout() {
    let field = AesExtraField {
        vendor_version: 2,
        strength_code: 3,
        inner_compression_method: 8,
    };
    let mut out = ArchiveDescriptor::new(field.local_size() as u64);
    field.write_local(&mut out);
    let bytes = out.finish();

    assert_eq!(bytes.len(), 11); // 4-byte tag+len header + 7 data bytes
    assert_eq!(&bytes[0..2], &0x9901u16.to_le_bytes());
    assert_eq!(&bytes[2..4], &7u16.to_le_bytes());
    assert_eq!(&bytes[4..6], &2u16.to_le_bytes()); // vendor version
    assert_eq!(&bytes[6..8], b"AE"); // vendor id
    assert_eq!(bytes[8], 3); // strength code
    assert_eq!(&bytes[9..11], &8u16.to_le_bytes()); // inner method
}
