//! Snapshot file naming: `<prefix>_<yyyyMMddHHmmss><extension>`.
//!
//! The timestamp is fixed-width so lexical order of file names equals
//! chronological order. Every file in the backup folder that matches this
//! scheme is treated as part of the snapshot history.

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use std::path::{Path, PathBuf};

pub const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";
const TIMESTAMP_LEN: usize = 14;
const DEFAULT_PREFIX: &str = "backup";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotNaming {
    folder: PathBuf,
    prefix: String,
    extension: String,
    use_local_time: bool,
}

impl SnapshotNaming {
    pub fn new(
        folder: impl Into<PathBuf>,
        prefix: impl Into<String>,
        extension: impl Into<String>,
        use_local_time: bool,
    ) -> Self {
        Self {
            folder: folder.into(),
            prefix: prefix.into(),
            extension: extension.into(),
            use_local_time,
        }
    }

    /// Derive folder and prefix from the source database path.
    ///
    /// Without an explicit folder, snapshots land next to the database.
    pub fn for_database(
        database: &Path,
        folder: Option<&Path>,
        extension: &str,
        use_local_time: bool,
    ) -> Self {
        let prefix = database
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_PREFIX.to_string());

        let folder = match folder {
            Some(f) => f.to_path_buf(),
            None => database
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(".")),
        };

        Self::new(folder, prefix, extension, use_local_time)
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn file_name(&self, at: DateTime<Utc>) -> String {
        let stamp = if self.use_local_time {
            at.with_timezone(&Local).format(TIMESTAMP_FORMAT).to_string()
        } else {
            at.format(TIMESTAMP_FORMAT).to_string()
        };
        format!("{}_{}{}", self.prefix, stamp, self.extension)
    }

    pub fn path_for(&self, at: DateTime<Utc>) -> PathBuf {
        self.folder.join(self.file_name(at))
    }

    /// Path of a per-database sidecar file such as `<prefix>.lastHash`.
    pub fn sidecar(&self, suffix: &str) -> PathBuf {
        self.folder.join(format!("{}{}", self.prefix, suffix))
    }

    /// Timestamp embedded in `file_name`, if it follows the naming scheme.
    pub fn parse_timestamp(&self, file_name: &str) -> Option<DateTime<Utc>> {
        let rest = file_name.strip_suffix(self.extension.as_str())?;
        self.parse_stamp(rest)
    }

    /// Like `parse_timestamp`, but also accepts files derived from a
    /// snapshot by appending a suffix (`.zst` after compression).
    fn parse_history_timestamp(&self, file_name: &str) -> Option<DateTime<Utc>> {
        let at = file_name.find(self.extension.as_str())?;
        let derived_from = &file_name[at + self.extension.len()..];
        if derived_from.is_empty() || derived_from.starts_with('.') {
            self.parse_stamp(&file_name[..at])
        } else {
            None
        }
    }

    fn parse_stamp(&self, name_without_extension: &str) -> Option<DateTime<Utc>> {
        let stamp = name_without_extension
            .strip_prefix(self.prefix.as_str())?
            .strip_prefix('_')?;

        if stamp.len() != TIMESTAMP_LEN || !stamp.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }

        let naive = NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT).ok()?;
        if self.use_local_time {
            Local
                .from_local_datetime(&naive)
                .earliest()
                .map(|t| t.with_timezone(&Utc))
        } else {
            Some(Utc.from_utc_datetime(&naive))
        }
    }

    pub fn is_snapshot(&self, file_name: &str) -> bool {
        self.parse_timestamp(file_name).is_some()
    }

    /// Snapshot files currently in the folder, oldest first.
    pub fn list(&self) -> std::io::Result<Vec<PathBuf>> {
        let mut names: Vec<String> = std::fs::read_dir(&self.folder)?
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|name| self.is_snapshot(name))
            .collect();

        names.sort();
        Ok(names.into_iter().map(|n| self.folder.join(n)).collect())
    }

    /// Timestamp of the newest snapshot on disk, compressed or not.
    pub fn latest_timestamp(&self) -> Option<DateTime<Utc>> {
        std::fs::read_dir(&self.folder)
            .ok()?
            .filter_map(|e| e.ok())
            .filter_map(|e| self.parse_history_timestamp(&e.file_name().to_string_lossy()))
            .max()
    }

    /// Glob mask matching snapshots plus anything derived from them
    /// (e.g. `db_20240101120000.bak.zst`).
    pub fn retention_mask(&self) -> String {
        format!(
            "{}_{}{}*",
            glob::Pattern::escape(&self.prefix),
            "?".repeat(TIMESTAMP_LEN),
            glob::Pattern::escape(&self.extension)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_for_database_defaults() {
        let naming = SnapshotNaming::for_database(Path::new("/var/lib/app/data.db"), None, ".bak", false);
        assert_eq!(naming.folder(), Path::new("/var/lib/app"));
        assert_eq!(naming.prefix(), "data");

        let naming = SnapshotNaming::for_database(Path::new("app.db"), Some(Path::new("/backups")), ".bak", false);
        assert_eq!(naming.folder(), Path::new("/backups"));

        let naming = SnapshotNaming::for_database(Path::new("app.db"), None, ".bak", false);
        assert_eq!(naming.folder(), Path::new("."));
    }

    #[test]
    fn test_file_name_is_fixed_width_utc() {
        let naming = SnapshotNaming::new("/b", "data", ".bak", false);
        assert_eq!(naming.file_name(at("2024-03-05T07:08:09Z")), "data_20240305070809.bak");
        assert_eq!(naming.path_for(at("2024-03-05T07:08:09Z")), PathBuf::from("/b/data_20240305070809.bak"));
    }

    #[test]
    fn test_parse_timestamp() {
        let naming = SnapshotNaming::new("/b", "data", ".bak", false);
        let t = at("2024-12-31T23:59:58Z");
        assert_eq!(naming.parse_timestamp(&naming.file_name(t)), Some(t));

        assert!(naming.parse_timestamp("data_2024123123595.bak").is_none());
        assert!(naming.parse_timestamp("data_20241231235958.bak.zst").is_none());
        assert!(naming.parse_timestamp("other_20241231235958.bak").is_none());
        assert!(naming.parse_timestamp("data_2024123123595x.bak").is_none());
        assert!(naming.parse_timestamp("data.lastHash").is_none());
    }

    #[test]
    fn test_local_time_round_trip() {
        let naming = SnapshotNaming::new("/b", "data", ".bak", true);
        let t = at("2024-06-15T12:00:00Z");
        assert_eq!(naming.parse_timestamp(&naming.file_name(t)), Some(t));
    }

    #[test]
    fn test_list_and_latest() -> std::io::Result<()> {
        let dir = TempDir::new()?;
        let naming = SnapshotNaming::new(dir.path(), "data", ".bak", false);
        assert!(naming.latest_timestamp().is_none());

        fs::write(dir.path().join("data_20240102000000.bak"), b"b")?;
        fs::write(dir.path().join("data_20240101000000.bak"), b"a")?;
        fs::write(dir.path().join("data_20240103000000.bak.zst"), b"c")?;
        fs::write(dir.path().join("data.lastHash"), b"ABC")?;

        let files = naming.list()?;
        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with("data_20240101000000.bak"));
        assert_eq!(naming.latest_timestamp(), Some(at("2024-01-03T00:00:00Z")));

        fs::write(dir.path().join("data_20240104000000.bakery"), b"d")?;
        assert_eq!(naming.latest_timestamp(), Some(at("2024-01-03T00:00:00Z")));
        Ok(())
    }

    #[test]
    fn test_retention_mask_covers_derived_files() {
        let naming = SnapshotNaming::new("/b", "data", ".bak", false);
        let mask = glob::Pattern::new(&naming.retention_mask()).unwrap();
        assert!(mask.matches("data_20240101000000.bak"));
        assert!(mask.matches("data_20240101000000.bak.zst"));
        assert!(!mask.matches("data.lastHash"));
        assert!(!mask.matches("other_20240101000000.bak"));
    }
}
