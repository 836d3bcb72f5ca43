//! Typed option bags for entries and archives (spec.md §3/§4.4), and the
//! process-wide worker pool's configuration (spec.md §4.2), replacing the
//! "dynamic option bag" the design notes call out.

use std::time::Duration;

use crate::types::{FileCompatibilitySystem, FileDateTime};

/// Per-entry submission metadata (spec.md §3 "Entry as submitted").
///
/// Fields that could be borrowed (`comment`, `password`) are owned `String`s
/// instead: an owned, `'static`, `Clone`-able option bag is what lets the
/// assembler (`crate::archive`) hand an entry off to a `tokio::spawn`ed task
/// and compress several entries concurrently ahead of writing them to the
/// sink in submission order.
#[derive(Debug, Clone)]
pub struct EntryOptions {
    pub compression_level: u8,
    pub last_modified_time: FileDateTime,
    pub unix_permissions: Option<u32>,
    pub system: FileCompatibilitySystem,
    pub comment: Option<String>,
    pub directory: bool,
    pub declared_size: Option<u64>,
    pub password: Option<String>,
    pub extended_timestamp: bool,
    pub ntfs_timestamp: bool,
    pub pass_through: bool,
    pub force_zip64: bool,
}

impl Default for EntryOptions {
    fn default() -> Self {
        Self {
            compression_level: 6,
            last_modified_time: FileDateTime::Now,
            unix_permissions: None,
            system: FileCompatibilitySystem::Unix,
            comment: None,
            directory: false,
            declared_size: None,
            password: None,
            extended_timestamp: true,
            ntfs_timestamp: false,
            pass_through: false,
            force_zip64: false,
        }
    }
}

impl EntryOptions {
    pub fn store() -> Self {
        Self {
            compression_level: 0,
            ..Self::default()
        }
    }

    pub fn compression_level(mut self, level: u8) -> Self {
        self.compression_level = level;
        self
    }

    pub fn last_modified_time(mut self, time: FileDateTime) -> Self {
        self.last_modified_time = time;
        self
    }

    pub fn unix_permissions(mut self, mode: u32) -> Self {
        self.unix_permissions = Some(mode);
        self
    }

    pub fn system(mut self, system: FileCompatibilitySystem) -> Self {
        self.system = system;
        self
    }

    pub fn set_file_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn directory(mut self, is_directory: bool) -> Self {
        self.directory = is_directory;
        self
    }

    pub fn declared_size(mut self, size: u64) -> Self {
        self.declared_size = Some(size);
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn extended_timestamp(mut self, enabled: bool) -> Self {
        self.extended_timestamp = enabled;
        self
    }

    pub fn ntfs_timestamp(mut self, enabled: bool) -> Self {
        self.ntfs_timestamp = enabled;
        self
    }

    pub fn pass_through(mut self, enabled: bool) -> Self {
        self.pass_through = enabled;
        self
    }

    pub fn force_zip64(mut self, enabled: bool) -> Self {
        self.force_zip64 = enabled;
        self
    }

    pub fn is_encrypted(&self) -> bool {
        self.password.is_some()
    }
}

/// Archive-wide options (spec.md §4.4 "Archive options").
#[derive(Debug, Clone)]
pub struct ArchiveOptions {
    pub force_zip64: bool,
    pub keep_order: bool,
    pub extended_timestamp: bool,
    pub ms_dos_compatible_flag: bool,
    pub version_made_by: u16,
    pub comment: Option<String>,
    pub max_workers: usize,
    pub split_archive_size: Option<u64>,
}

impl Default for ArchiveOptions {
    fn default() -> Self {
        Self {
            force_zip64: false,
            keep_order: true,
            extended_timestamp: true,
            ms_dos_compatible_flag: false,
            version_made_by: crate::constants::VERSION_MADE_BY,
            comment: None,
            max_workers: num_cpus::get().max(1),
            split_archive_size: None,
        }
    }
}

impl ArchiveOptions {
    pub fn force_zip64(mut self, enabled: bool) -> Self {
        self.force_zip64 = enabled;
        self
    }

    pub fn keep_order(mut self, enabled: bool) -> Self {
        self.keep_order = enabled;
        self
    }

    pub fn extended_timestamp(mut self, enabled: bool) -> Self {
        self.extended_timestamp = enabled;
        self
    }

    pub fn set_archive_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn max_workers(mut self, count: usize) -> Self {
        self.max_workers = count.max(1);
        self
    }

    pub fn split_archive_size(mut self, size: u64) -> Self {
        self.split_archive_size = Some(size);
        self
    }
}

/// Process-wide worker pool configuration (spec.md §4.2 `configure(...)`).
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    pub use_workers: bool,
    pub max_workers: usize,
    pub terminate_timeout: Duration,
    pub chunk_size: usize,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            use_workers: true,
            max_workers: num_cpus::get().max(1),
            terminate_timeout: Duration::from_secs(60),
            chunk_size: 64 * 1024,
        }
    }
}

impl WorkerPoolConfig {
    /// A single worker, no idle recycling delay: minimal resource footprint.
    pub fn conservative() -> Self {
        Self {
            use_workers: true,
            max_workers: 1,
            terminate_timeout: Duration::from_secs(5),
            ..Self::default()
        }
    }

    /// Half the host's CPUs, a moderate idle timeout.
    pub fn balanced() -> Self {
        Self {
            max_workers: (num_cpus::get() / 2).max(1),
            terminate_timeout: Duration::from_secs(30),
            ..Self::default()
        }
    }

    /// All host CPUs, a long idle timeout to avoid repeated spin-up cost.
    pub fn aggressive() -> Self {
        Self {
            max_workers: num_cpus::get().max(1),
            terminate_timeout: Duration::from_secs(120),
            ..Self::default()
        }
    }

    pub fn with_max_workers(mut self, count: usize) -> Self {
        assert!(
            (1..=256).contains(&count),
            "max_workers must be between 1 and 256, got {count}"
        );
        self.max_workers = count;
        self
    }

    pub fn use_workers(mut self, enabled: bool) -> Self {
        self.use_workers = enabled;
        self
    }

    pub fn terminate_timeout(mut self, timeout: Duration) -> Self {
        self.terminate_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_entry_options_builder() {
        let options = EntryOptions::default()
            .compression_level(0)
            .declared_size(1024)
            .set_file_comment("hello");
        assert_eq!(options.compression_level, 0);
        assert_eq!(options.declared_size, Some(1024));
        assert_eq!(options.comment.as_deref(), Some("hello"));
    }

    #[test]
    fn test_archive_options_defaults_keep_order() {
        let options = ArchiveOptions::default();
        assert!(options.keep_order);
        assert!(options.extended_timestamp);
        assert!(!options.force_zip64);
    }

    #[test]
    #[should_panic]
    fn test_worker_pool_config_rejects_zero_workers() {
        WorkerPoolConfig::default().with_max_workers(0);
    }
}
