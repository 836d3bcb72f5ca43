extern crate chrono;
use core::fmt;
use std::fmt::Debug;

use chrono::{DateTime, Datelike, Local, NaiveDate, TimeZone, Timelike, Utc};

use crate::constants::{
    AES_EXTRA_FIELD_DATA_SIZE, NTFS_TIMESTAMP_DATA_SIZE, X000A_NTFS_TIMESTAMP,
    X5455_EXTENDED_TIMESTAMP, X9901_AES_EXTRA_FIELD, ZIP64_EXTRA_FIELD_TAG, ZIP64_THRESHOLD,
};
use crate::descriptor::ArchiveDescriptor;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct DateTimeCS {
    year: u16,
    month: u16,
    day: u16,
    hour: u16,
    minute: u16,
    second: u16,
}

impl Default for DateTimeCS {
    fn default() -> Self {
        Self {
            year: 1980,
            month: 1,
            day: 1,
            hour: 0,
            minute: 0,
            second: 0,
        }
    }
}

impl DateTimeCS {
    pub fn from_chrono_datetime<Tz: TimeZone>(datetime: DateTime<Tz>) -> Self {
        Self {
            year: datetime.year() as u16,
            month: datetime.month() as u16,
            day: datetime.day() as u16,
            hour: datetime.hour() as u16,
            minute: datetime.minute() as u16,
            second: datetime.second() as u16,
        }
    }

    pub fn now() -> Self {
        Self::from_chrono_datetime(Local::now())
    }

    pub fn from_timestamp(timestamp: i32) -> Self {
        match Utc.timestamp_opt(timestamp as i64, 0) {
            chrono::LocalResult::None => Self::default(),
            chrono::LocalResult::Single(single) => Self::from_chrono_datetime(single),
            chrono::LocalResult::Ambiguous(single, _) => Self::from_chrono_datetime(single),
        }
    }

    pub fn from_msdos(datepart: u16, timepart: u16) -> Self {
        let seconds = (timepart & 0b0000000000011111) << 1;
        let minutes = (timepart & 0b0000011111100000) >> 5;
        let hours = (timepart & 0b1111100000000000) >> 11;
        let days = datepart & 0b0000000000011111;
        let months = (datepart & 0b0000000111100000) >> 5;
        let years = (datepart & 0b1111111000000000) >> 9;

        Self {
            year: years + 1980,
            month: months,
            day: days,
            hour: hours,
            minute: minutes,
            second: seconds,
        }
    }

    pub fn to_time(&self) -> chrono::NaiveDateTime {
        Self::to_time_dry(
            self.year as i32,
            self.month as u32,
            self.day as u32,
            self.hour as u32,
            self.minute as u32,
            self.second as u32,
        )
    }

    fn to_time_dry(
        year: i32,
        month: u32,
        day: u32,
        hour: u32,
        minute: u32,
        second: u32,
    ) -> chrono::NaiveDateTime {
        let date = NaiveDate::from_ymd_opt(year, month, day).unwrap_or_else(|| {
            let zero = DateTimeCS::default();
            NaiveDate::from_ymd_opt(zero.year as i32, zero.month as u32, zero.day as u32)
                .expect("default DOS epoch is a valid date")
        });

        date.and_hms_opt(hour, minute, second).unwrap_or_default()
    }

    /// Pack into the MS-DOS (date, time) pair. Seconds are quantized to even,
    /// per the DOS format's two-second resolution.
    pub fn ms_dos(&self) -> (u16, u16) {
        let date = self.day | (self.month << 5) | self.year.saturating_sub(1980) << 9;
        let time = (self.second / 2) | (self.minute << 5) | self.hour << 11;
        (date, time)
    }

    pub fn to_timestamp(&self) -> i32 {
        let local = &self.to_time();

        match local.and_local_timezone(Utc) {
            chrono::LocalResult::None => Self::default().to_timestamp(),
            chrono::LocalResult::Single(single) => Self::convert_timestamp(single),
            chrono::LocalResult::Ambiguous(first, _) => Self::convert_timestamp(first),
        }
    }

    fn convert_timestamp(timezone_aware_datetime: DateTime<Utc>) -> i32 {
        let timestamp = timezone_aware_datetime.timestamp();
        i32::try_from(timestamp).map_or(i32::MAX, |val| val)
    }
}

impl fmt::Display for DateTimeCS {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:}", self.to_time())
    }
}

/// The (timezone-less) date and time written in the archive alongside an entry.
///
/// Use [`FileDateTime::Zero`] if the date and time are insignificant. Use
/// [`FileDateTime::Custom`] for an explicit date/time. [`FileDateTime::UnixNow`]
/// and [`FileDateTime::UnixCustom`] additionally request an extended-timestamp
/// extra field carrying a Unix epoch value alongside the DOS-encoded one.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum FileDateTime {
    /// MS-DOS origin time, i.e. 1980, January 1st, 12AM.
    Zero,
    /// Explicit (year, month, day, hour, minute, second).
    Custom(DateTimeCS),
    /// The current local time, DOS-encoded only.
    Now,
    /// The current time, also requesting an extended-timestamp extra field.
    UnixNow,
    /// A custom time in Unix format (seconds since the epoch), also requesting
    /// an extended-timestamp extra field.
    UnixCustom(i32),
    /// No timestamp significance; behaves like `Zero`.
    None,
}

impl FileDateTime {
    fn tuple(&self) -> DateTimeCS {
        match self {
            FileDateTime::Zero | FileDateTime::None => DateTimeCS::default(),
            FileDateTime::Custom(date_time) => *date_time,
            FileDateTime::Now | FileDateTime::UnixNow => DateTimeCS::now(),
            FileDateTime::UnixCustom(timestamp) => DateTimeCS::from_timestamp(*timestamp),
        }
    }

    pub fn ms_dos(&self) -> (u16, u16) {
        self.tuple().ms_dos()
    }

    pub fn to_time(&self) -> chrono::NaiveDateTime {
        self.tuple().to_time()
    }

    pub fn timestamp(&self) -> i32 {
        match self {
            FileDateTime::Zero | FileDateTime::None => DateTimeCS::default().to_timestamp(),
            FileDateTime::Custom(date_time) => date_time.to_timestamp(),
            FileDateTime::Now | FileDateTime::UnixNow => {
                DateTimeCS::convert_timestamp(chrono::offset::Utc::now())
            }
            FileDateTime::UnixCustom(timestamp) => *timestamp,
        }
    }

    pub fn wants_extended_timestamp(&self) -> bool {
        matches!(self, FileDateTime::UnixNow | FileDateTime::UnixCustom(_))
    }
}

impl Default for FileDateTime {
    fn default() -> Self {
        FileDateTime::Zero
    }
}

/// Compatibility system recorded in the high byte of `version made by`, per
/// [PKWARE's APPNOTE.TXT](https://pkware.cachefly.net/webdocs/casestudies/APPNOTE.TXT) section 4.4.2.1.
#[derive(Clone, Debug, PartialEq)]
pub enum FileCompatibilitySystem {
    /// MS-DOS and OS/2 (FAT / VFAT / FAT32 file systems).
    Dos,
    Unix,
    WindowsNTFS,
    OsX,
    Unknown(u8),
}

impl FileCompatibilitySystem {
    pub fn from_u8(system_code: u8) -> FileCompatibilitySystem {
        use self::FileCompatibilitySystem::*;

        match system_code {
            0 => Dos,
            3 => Unix,
            10 => WindowsNTFS,
            19 => OsX,
            _ => Unknown(system_code),
        }
    }

    pub fn value(&self) -> u8 {
        match *self {
            FileCompatibilitySystem::Dos => 0,
            FileCompatibilitySystem::Unix => 3,
            FileCompatibilitySystem::WindowsNTFS => 10,
            FileCompatibilitySystem::OsX => 19,
            FileCompatibilitySystem::Unknown(val) => val,
        }
    }

    /// Fold the system code into the high byte of a `version needed`/`version made by` word.
    pub fn update_version_needed(&self, version_needed: u16) -> u16 {
        (version_needed & 0xFF) | ((self.value() as u16) << 8)
    }
}

impl Default for FileCompatibilitySystem {
    fn default() -> Self {
        FileCompatibilitySystem::Unix
    }
}

impl fmt::Display for FileCompatibilitySystem {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let label = match self {
            FileCompatibilitySystem::Dos => "MS-DOS, OS/2 or NT FAT".to_owned(),
            FileCompatibilitySystem::Unix => "Unix".to_owned(),
            FileCompatibilitySystem::WindowsNTFS => "Windows NTFS".to_owned(),
            FileCompatibilitySystem::OsX => "OsX".to_owned(),
            FileCompatibilitySystem::Unknown(val) => format!("unknown ({})", val),
        };

        write!(f, "{}", label)
    }
}

/// A self-contained, tagged local/central extra field.
///
/// Implementors write their own 2-byte tag and 2-byte length as part of
/// `write_local`/`write_central`; the `*_size` methods must report the exact
/// total (header included) so callers can size buffers ahead of time. This is
/// the seam the estimator and the assembler share, so the two must agree
/// byte-for-byte.
pub trait ExtraField: Debug + Send + Sync {
    fn local_size(&self) -> u16;
    fn central_size(&self) -> u16;
    fn write_local(&self, out: &mut ArchiveDescriptor);
    fn write_central(&self, out: &mut ArchiveDescriptor);
}

/// Extended timestamp extra field, tag `0x5455`. The local copy and the
/// central copy both carry only the modification time (5 data bytes: 1 byte
/// of flags + a 4-byte Unix timestamp), matching the accounting in
/// spec.md §4.5/§6 rather than the fuller optional access/create-time variant
/// some writers emit.
#[derive(Debug)]
pub struct ExtendedTimestamp {
    pub modify_time: i32,
}

impl ExtendedTimestamp {
    const MODIFY_TIME_BIT: u8 = 1;
    const DATA_SIZE: u16 = 5;
    const TOTAL_SIZE: u16 = 4 + Self::DATA_SIZE;
}

impl ExtraField for ExtendedTimestamp {
    fn local_size(&self) -> u16 {
        Self::TOTAL_SIZE
    }

    fn central_size(&self) -> u16 {
        Self::TOTAL_SIZE
    }

    fn write_local(&self, out: &mut ArchiveDescriptor) {
        out.write_u16(X5455_EXTENDED_TIMESTAMP);
        out.write_u16(Self::DATA_SIZE);
        out.write_u8(Self::MODIFY_TIME_BIT);
        out.write_i32(self.modify_time);
    }

    fn write_central(&self, out: &mut ArchiveDescriptor) {
        self.write_local(out);
    }
}

/// NTFS timestamp extra field, tag `0x000a`, 32 data bytes: a 4-byte reserved
/// block followed by one attribute sub-block (tag `0x0001`, size 24) holding
/// mtime/atime/ctime as Windows FILETIME (100ns ticks since 1601-01-01), each
/// 8 bytes.
#[derive(Debug)]
pub struct NtfsTimestamp {
    pub mtime_filetime: u64,
    pub atime_filetime: u64,
    pub ctime_filetime: u64,
}

impl NtfsTimestamp {
    const TOTAL_SIZE: u16 = 4 + NTFS_TIMESTAMP_DATA_SIZE;

    /// Convert a Unix timestamp (seconds since 1970) to Windows FILETIME ticks.
    pub fn filetime_from_unix(unix_seconds: i64) -> u64 {
        const TICKS_PER_SECOND: i64 = 10_000_000;
        const UNIX_EPOCH_IN_TICKS: i64 = 116_444_736_000_000_000;
        (unix_seconds * TICKS_PER_SECOND + UNIX_EPOCH_IN_TICKS).max(0) as u64
    }
}

impl ExtraField for NtfsTimestamp {
    fn local_size(&self) -> u16 {
        Self::TOTAL_SIZE
    }

    fn central_size(&self) -> u16 {
        Self::TOTAL_SIZE
    }

    fn write_local(&self, out: &mut ArchiveDescriptor) {
        out.write_u16(X000A_NTFS_TIMESTAMP);
        out.write_u16(NTFS_TIMESTAMP_DATA_SIZE);
        out.write_u32(0); // reserved
        out.write_u16(0x0001); // attribute tag 1: file times
        out.write_u16(24); // attribute size
        out.write_u64(self.mtime_filetime);
        out.write_u64(self.atime_filetime);
        out.write_u64(self.ctime_filetime);
    }

    fn write_central(&self, out: &mut ArchiveDescriptor) {
        self.write_local(out);
    }
}

/// WinZIP AES extra field, tag `0x9901`, 7 data bytes (vendor version, vendor
/// ID `"AE"`, strength code, and the true inner compression method).
#[derive(Debug)]
pub struct AesExtraField {
    pub vendor_version: u16,
    pub strength_code: u8,
    pub inner_compression_method: u16,
}

impl AesExtraField {
    const TOTAL_SIZE: u16 = 4 + AES_EXTRA_FIELD_DATA_SIZE;
}

impl ExtraField for AesExtraField {
    fn local_size(&self) -> u16 {
        Self::TOTAL_SIZE
    }

    fn central_size(&self) -> u16 {
        Self::TOTAL_SIZE
    }

    fn write_local(&self, out: &mut ArchiveDescriptor) {
        out.write_u16(X9901_AES_EXTRA_FIELD);
        out.write_u16(AES_EXTRA_FIELD_DATA_SIZE);
        out.write_u16(self.vendor_version);
        out.write_bytes(b"AE");
        out.write_u8(self.strength_code);
        out.write_u16(self.inner_compression_method);
    }

    fn write_central(&self, out: &mut ArchiveDescriptor) {
        self.write_local(out);
    }
}

/// Which 64-bit fields a ZIP64 extra field needs to carry, decided per
/// spec.md §4.5's "ZIP64 extra field sizing rule".
#[derive(Debug, Clone, Copy, Default)]
pub struct Zip64FieldPresence {
    pub uncompressed_size: bool,
    pub compressed_size: bool,
    pub offset: bool,
    pub disk_number: bool,
}

impl Zip64FieldPresence {
    pub fn data_size(&self) -> u16 {
        let mut size = 0u16;
        if self.uncompressed_size {
            size += 8;
        }
        if self.compressed_size {
            size += 8;
        }
        if self.offset {
            size += 8;
        }
        if self.disk_number {
            size += 4;
        }
        size
    }

    pub fn is_empty(&self) -> bool {
        self.data_size() == 0
    }
}

/// ZIP64 extra field, tag `0x0001`. Local copies carry the fields that are
/// unknown at header-write time (always present when promotion is merely
/// *possible*); central copies carry whichever fields ended up exceeding the
/// 32-bit range (or are forced). `is_first_entry` suppresses the offset field
/// for the archive's first entry, whose offset is necessarily zero.
#[derive(Debug)]
pub struct Zip64ExtraField {
    pub present: Zip64FieldPresence,
    pub uncompressed_size: u64,
    pub compressed_size: u64,
    pub offset: u64,
    pub disk_number: u32,
}

impl Zip64ExtraField {
    fn total_size(&self) -> u16 {
        let data = self.present.data_size();
        if data == 0 {
            0
        } else {
            4 + data
        }
    }

    fn write(&self, out: &mut ArchiveDescriptor) {
        if self.present.is_empty() {
            return;
        }
        out.write_u16(ZIP64_EXTRA_FIELD_TAG);
        out.write_u16(self.present.data_size());
        if self.present.uncompressed_size {
            out.write_u64(self.uncompressed_size);
        }
        if self.present.compressed_size {
            out.write_u64(self.compressed_size);
        }
        if self.present.offset {
            out.write_u64(self.offset);
        }
        if self.present.disk_number {
            out.write_u32(self.disk_number);
        }
    }
}

impl ExtraField for Zip64ExtraField {
    fn local_size(&self) -> u16 {
        self.total_size()
    }

    fn central_size(&self) -> u16 {
        self.total_size()
    }

    fn write_local(&self, out: &mut ArchiveDescriptor) {
        self.write(out);
    }

    fn write_central(&self, out: &mut ArchiveDescriptor) {
        self.write(out);
    }
}

/// Decide which ZIP64 fields the *local* header must reserve space for,
/// before the entry's payload is streamed (spec.md §4.3: "reserved space for
/// a ZIP64 local extra field if promotion is possible, i.e. declared size
/// unknown OR forced"). A declared size that is already known to exceed the
/// threshold is also reserved (not merely "possible" but certain), using the
/// same field shape; only a known, small, unforced declared size skips
/// reservation entirely.
///
/// Deliberately never reserves the offset/disk-number sub-fields: a local
/// header has no self-referential need for its own offset, and leaving it
/// out means an entry's local header never depends on where the archive's
/// write cursor ends up landing, which in turn means concurrent entries can
/// be compressed without waiting on each other's final sizes.
pub fn local_zip64_reservation(
    declared_uncompressed_size: Option<u64>,
    forced: bool,
) -> Zip64FieldPresence {
    let reserve = forced
        || declared_uncompressed_size.is_none()
        || declared_uncompressed_size.is_some_and(|n| n > ZIP64_THRESHOLD);

    if !reserve {
        return Zip64FieldPresence::default();
    }

    Zip64FieldPresence {
        uncompressed_size: true,
        compressed_size: true,
        offset: false,
        disk_number: false,
    }
}

/// Decide which ZIP64 fields the *central* directory copy needs, using the
/// entry's final, post-stream values (spec.md §4.5 "ZIP64 extra field sizing
/// rule").
pub fn zip64_presence_for_entry(
    uncompressed_size: u64,
    compressed_size: u64,
    offset: u64,
    is_first_entry: bool,
    forced: bool,
) -> Zip64FieldPresence {
    Zip64FieldPresence {
        uncompressed_size: forced || uncompressed_size > ZIP64_THRESHOLD,
        compressed_size: forced || compressed_size > ZIP64_THRESHOLD,
        offset: !is_first_entry && (forced || offset > ZIP64_THRESHOLD),
        disk_number: false,
    }
}

/// An entry's state as recorded in the central directory (spec.md §3).
#[derive(Debug)]
pub struct ArchiveFileEntry {
    pub version_made_by: u16,
    pub version_needed: u16,
    pub general_purpose_flags: u16,
    pub compression_method: u16,
    pub last_mod_file_time: u16,
    pub last_mod_file_date: u16,
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub file_name_as_bytes: Vec<u8>,
    pub offset: u64,
    pub internal_file_attributes: u16,
    pub external_file_attributes: u32,
    pub file_comment: Option<Vec<u8>>,
    pub extra_fields: Vec<Box<dyn ExtraField>>,
    /// Sticky once true: forces this entry (and thus the archive) into ZIP64.
    pub zip64: bool,
    pub is_directory: bool,
    /// Which central-directory base fields were promoted to the `0xFFFFFFFF`
    /// sentinel in favor of the ZIP64 extra field, decided once the entry's
    /// true offset is known. Empty until the assembler fills it in.
    pub zip64_presence: Zip64FieldPresence,
}

impl ArchiveFileEntry {
    pub fn file_name_len(&self) -> u16 {
        self.file_name_as_bytes.len() as u16
    }

    pub fn file_comment_length(&self) -> u16 {
        self.file_comment.as_ref().map_or(0, |c| c.len() as u16)
    }

    pub fn extra_field_central_size(&self) -> u16 {
        self.extra_fields.iter().map(|f| f.central_size()).sum()
    }

    pub fn needs_zip64(&self) -> bool {
        self.zip64
            || self.uncompressed_size > ZIP64_THRESHOLD
            || self.compressed_size > ZIP64_THRESHOLD
            || self.offset > ZIP64_THRESHOLD
    }
}
