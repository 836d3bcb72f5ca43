use std::mem::size_of;

pub const FILE_HEADER_BASE_SIZE: u64 = (7 * size_of::<u16>() + 4 * size_of::<u32>()) as u64;
pub const DESCRIPTOR_SIZE: u64 = 4 * size_of::<u32>() as u64;
pub const ZIP64_DESCRIPTOR_SIZE: u64 = 4 + 4 + 8 + 8;
pub const CENTRAL_DIRECTORY_ENTRY_BASE_SIZE: u64 =
    (11 * size_of::<u16>() + 6 * size_of::<u32>()) as u64;
pub const END_OF_CENTRAL_DIRECTORY_SIZE: u64 = (5 * size_of::<u16>() + 3 * size_of::<u32>()) as u64;
pub const ZIP64_END_OF_CENTRAL_DIRECTORY_SIZE: u64 = 56;
pub const ZIP64_END_OF_CENTRAL_DIR_LOCATOR_SIZE: u64 = 20;
pub const FILE_HEADER_CRC_OFFSET: u64 = 14;

pub const CENTRAL_DIRECTORY_END_SIGNATURE: u32 = 0x06054b50;
pub const ZIP64_CENTRAL_DIRECTORY_END_SIGNATURE: u32 = 0x06064b50;
pub const ZIP64_END_OF_CENTRAL_DIR_LOCATOR_SIGNATURE: u32 = 0x07064b50;
pub const CENTRAL_DIRECTORY_ENTRY_SIGNATURE: u32 = 0x02014b50;
pub const LOCAL_FILE_HEADER_SIGNATURE: u32 = 0x04034b50; // Local file header signature.
pub const DATA_DESCRIPTOR_SIGNATURE: u32 = 0x08074b50; // Data descriptor signature.

pub const UNIX: u8 = 3;

/// Version needed to extract: baseline, ZIP64 and AES, per APPNOTE.TXT 4.4.3.2.
pub const VERSION_NEEDED_BASE: u16 = 20;
pub const VERSION_NEEDED_ZIP64: u16 = 45;
pub const VERSION_NEEDED_AES: u16 = 51;
pub const VERSION_MADE_BY: u16 = (UNIX as u16) << 8 | VERSION_NEEDED_BASE;

/// General purpose bit flag bits (APPNOTE.TXT 4.4.4).
pub const GPBF_ENCRYPTED: u16 = 1 << 0;
pub const GPBF_DATA_DESCRIPTOR: u16 = 1 << 3;
pub const GPBF_UTF8: u16 = 1 << 11;
pub const EXTENDED_LOCAL_HEADER_FLAG: u16 = GPBF_DATA_DESCRIPTOR;

/// Maximum value a field can hold before ZIP64 promotion is required. APPNOTE
/// reserves `0xFFFFFFFF` as the placeholder, so the real ceiling is one less.
pub const ZIP64_THRESHOLD: u64 = 0xFFFFFFFE;
pub const MAX_ENTRIES_NON_ZIP64: u64 = 65_534;
pub const MAX_NAME_LEN: usize = 65_535;

/// Extra field tags (APPNOTE.TXT 4.5.2 + WinZIP / NTFS conventions).
pub const ZIP64_EXTRA_FIELD_TAG: u16 = 0x0001;
pub const X5455_EXTENDED_TIMESTAMP: u16 = 0x5455;
pub const X000A_NTFS_TIMESTAMP: u16 = 0x000a;
pub const X9901_AES_EXTRA_FIELD: u16 = 0x9901;

pub const NTFS_TIMESTAMP_DATA_SIZE: u16 = 32;
pub const AES_EXTRA_FIELD_DATA_SIZE: u16 = 7;

/// Compression methods as recorded on disk (spec.md §6).
pub const COMPRESSION_METHOD_STORE: u16 = 0;
pub const COMPRESSION_METHOD_DEFLATE: u16 = 8;
pub const COMPRESSION_METHOD_AES: u16 = 99;
