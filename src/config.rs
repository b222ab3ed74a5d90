use config::Config;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{HelperError, HelperResult};

/// Sub-directory of the application data directory holding database files
pub const DATABASES_DIR: &str = "databases";

/// Application id used for the default storage directory
pub const DEFAULT_APPLICATION_ID: &str = "sqlhelper";

/// Prefix for environment overrides, e.g. `SQLHELPER_VERSION=3`
pub const ENV_PREFIX: &str = "SQLHELPER";

const EXAMPLE_CONFIG: &str = r#"### sqlhelper configuration file

### database file name (required)
name = "app.db"

### schema version the application expects, starting at 1 (required)
version = 1

### directory holding the database file; must already exist and be writable
# storage_dir = "/var/lib/myapp"

### used for the default directory: <data dir>/<application_id>/databases
# application_id = "sqlhelper"

### connection tuning
# write_ahead_logging = false
# busy_timeout_ms = 5000
"#;

/// Construction-time configuration of an [`OpenHelper`](crate::OpenHelper)
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HelperConfig {
    /// Name of the database file
    pub name: String,

    /// Target schema version (>= 1)
    pub version: u32,

    /// Directory holding the database file. `None` selects the application data directory.
    #[serde(default)]
    pub storage_dir: Option<PathBuf>,

    #[serde(default = "default_application_id")]
    pub application_id: String,

    /// Switch read-write connections to `journal_mode=WAL`
    #[serde(default)]
    pub write_ahead_logging: bool,

    /// How long SQLite waits on a locked file before giving up
    #[serde(default)]
    pub busy_timeout_ms: Option<u64>,
}

fn default_application_id() -> String {
    DEFAULT_APPLICATION_ID.to_string()
}

impl HelperConfig {
    /// Create a configuration for `name` at schema `version`
    pub fn new(name: impl Into<String>, version: u32) -> HelperResult<Self> {
        let config = HelperConfig {
            name: name.into(),
            version,
            storage_dir: None,
            application_id: default_application_id(),
            write_ahead_logging: false,
            busy_timeout_ms: None,
        };
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file layered with `SQLHELPER_*` environment variables
    ///
    /// With `path == None` only the environment is consulted.
    pub fn load(path: Option<&Path>) -> HelperResult<Self> {
        let mut builder = Config::builder();

        if let Some(p) = path {
            builder = builder.add_source(config::File::from(p));
        }

        // E.g., `SQLHELPER_STORAGE_DIR=/data ./app` overrides the storage directory
        builder = builder.add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true));

        let config: HelperConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Write a commented configuration template to `path`
    pub fn write_template(path: &Path) -> HelperResult<()> {
        std::fs::write(path, EXAMPLE_CONFIG)?;
        Ok(())
    }

    pub fn with_storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.storage_dir = Some(dir.into());
        self
    }

    pub fn with_application_id(mut self, application_id: impl Into<String>) -> Self {
        self.application_id = application_id.into();
        self
    }

    pub fn with_write_ahead_logging(mut self, enabled: bool) -> Self {
        self.write_ahead_logging = enabled;
        self
    }

    pub fn with_busy_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.busy_timeout_ms = Some(timeout_ms);
        self
    }

    /// Reject values that can never produce a usable database
    pub fn validate(&self) -> HelperResult<()> {
        if self.name.trim().is_empty() {
            return Err(HelperError::Configuration(
                "Database name cannot be empty".to_string(),
            ));
        }
        if self.version < 1 {
            return Err(HelperError::Configuration(format!(
                "Version must be >= 1, was {}",
                self.version
            )));
        }
        if let Some(dir) = &self.storage_dir {
            if !dir.is_absolute() {
                return Err(HelperError::Configuration(format!(
                    "Storage directory must be an absolute path, was '{}'",
                    dir.display()
                )));
            }
        }
        if self.application_id.trim().is_empty() {
            return Err(HelperError::Configuration(
                "Application id cannot be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Directory the database file lives in
    pub fn storage_dir(&self) -> PathBuf {
        match &self.storage_dir {
            Some(dir) => dir.clone(),
            None => default_storage_dir(&self.application_id),
        }
    }

    /// Get the path to the SQLite database file
    pub fn database_path(&self) -> PathBuf {
        resolve_database_path(
            &self.name,
            self.storage_dir.as_deref(),
            &self.application_id,
        )
    }

    /// Display configuration summary
    pub fn summary(&self) -> String {
        let mut lines = vec![
            format!("Database Name:      {}", self.name),
            format!("Schema Version:     {}", self.version),
            format!("Database Path:      {}", self.database_path().display()),
        ];

        if self.storage_dir.is_none() {
            lines.push(format!("Application Id:     {}", self.application_id));
        }
        lines.push(format!(
            "Journal Mode:       {}",
            if self.write_ahead_logging {
                "WAL"
            } else {
                "default"
            }
        ));
        if let Some(ms) = self.busy_timeout_ms {
            lines.push(format!("Busy Timeout:       {} ms", ms));
        }

        lines.join("\n")
    }
}

/// Default storage directory: `<data dir>/<application_id>/databases`
pub fn default_storage_dir(application_id: &str) -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(application_id)
        .join(DATABASES_DIR)
}

/// Compute the file path used for every open attempt
///
/// An explicit `storage_dir` is used verbatim; the caller is responsible for it
/// existing and being writable.
pub fn resolve_database_path(
    name: &str,
    storage_dir: Option<&Path>,
    application_id: &str,
) -> PathBuf {
    match storage_dir {
        Some(dir) => dir.join(name),
        None => default_storage_dir(application_id).join(name),
    }
}

// =============================================================================
// Database info
// =============================================================================

/// Lifecycle status reported by [`DatabaseInfo`]
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HelperStatus {
    /// No connection is cached
    Idle,
    /// A connection is being opened and migrated
    Initializing,
    /// A connection is cached and open
    Ready,
}

impl std::fmt::Display for HelperStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HelperStatus::Idle => write!(f, "idle"),
            HelperStatus::Initializing => write!(f, "initializing"),
            HelperStatus::Ready => write!(f, "ready"),
        }
    }
}

/// Snapshot of the database file and the helper's cache
#[derive(Debug, Serialize, Clone)]
pub struct DatabaseInfo {
    pub name: String,
    pub path: PathBuf,
    pub exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    pub status: HelperStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_only: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<u32>,
    pub target_version: u32,
}

impl DatabaseInfo {
    /// File facts for `path`; cache fields are left empty
    pub(crate) fn from_path(name: &str, path: PathBuf, target_version: u32) -> Self {
        let size_bytes = std::fs::metadata(&path).ok().map(|m| m.len());
        DatabaseInfo {
            name: name.to_string(),
            exists: size_bytes.is_some(),
            path,
            size_bytes,
            status: HelperStatus::Idle,
            read_only: None,
            schema_version: None,
            target_version,
        }
    }

    pub fn summary(&self) -> String {
        let mut lines = vec![
            format!("Database:           {}", self.name),
            format!("Path:               {}", self.path.display()),
            format!("Status:             {}", self.status),
        ];
        match self.size_bytes {
            Some(size) => lines.push(format!("Size:               {}", format_size(size))),
            None => lines.push("Size:               (file does not exist)".to_string()),
        }
        if let Some(read_only) = self.read_only {
            lines.push(format!(
                "Mode:               {}",
                if read_only { "read-only" } else { "read-write" }
            ));
        }
        if let Some(version) = self.schema_version {
            lines.push(format!(
                "Schema Version:     {} (target {})",
                version, self.target_version
            ));
        }
        lines.join("\n")
    }
}

/// Format bytes as human-readable size
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rstest::rstest;

    #[test]
    fn test_new_config_defaults() {
        let config = HelperConfig::new("app.db", 3).unwrap();
        assert_eq!(config.storage_dir, None);
        assert_eq!(config.application_id, DEFAULT_APPLICATION_ID);
        assert!(!config.write_ahead_logging);
        assert_eq!(config.busy_timeout_ms, None);
    }

    #[rstest]
    #[case("", 1)]
    #[case("   ", 1)]
    #[case("app.db", 0)]
    fn test_invalid_config_rejected(#[case] name: &str, #[case] version: u32) {
        assert_matches!(
            HelperConfig::new(name, version),
            Err(HelperError::Configuration(_))
        );
    }

    #[test]
    fn test_relative_storage_dir_rejected() {
        let config = HelperConfig::new("app.db", 1)
            .unwrap()
            .with_storage_dir("relative/dir");
        assert_matches!(config.validate(), Err(HelperError::Configuration(_)));
    }

    #[test]
    fn test_paths() {
        let config = HelperConfig::new("app.db", 1)
            .unwrap()
            .with_storage_dir("/test/dir");

        assert_eq!(config.database_path(), PathBuf::from("/test/dir/app.db"));
        assert_eq!(config.storage_dir(), PathBuf::from("/test/dir"));
    }

    #[test]
    fn test_default_path() {
        let config = HelperConfig::new("app.db", 1)
            .unwrap()
            .with_application_id("com.example.books");

        let path = config.database_path();
        assert!(path.ends_with("com.example.books/databases/app.db"));
        assert_eq!(
            path,
            resolve_database_path("app.db", None, "com.example.books")
        );
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sqlhelper.toml");
        std::fs::write(
            &path,
            r#"
            name = "books.db"
            version = 4
            storage_dir = "/srv/books"
            write_ahead_logging = true
            busy_timeout_ms = 2500
            "#,
        )
        .unwrap();

        let config = HelperConfig::load(Some(&path)).unwrap();
        assert_eq!(config.name, "books.db");
        assert_eq!(config.version, 4);
        assert_eq!(config.storage_dir, Some(PathBuf::from("/srv/books")));
        assert!(config.write_ahead_logging);
        assert_eq!(config.busy_timeout_ms, Some(2500));
        assert_eq!(config.application_id, DEFAULT_APPLICATION_ID);
    }

    #[test]
    fn test_load_rejects_invalid_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sqlhelper.toml");
        std::fs::write(&path, "name = \"books.db\"\nversion = 0\n").unwrap();

        assert_matches!(
            HelperConfig::load(Some(&path)),
            Err(HelperError::Configuration(_))
        );
    }

    #[test]
    fn test_template_parses() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sqlhelper.toml");
        HelperConfig::write_template(&path).unwrap();

        let config = HelperConfig::load(Some(&path)).unwrap();
        assert_eq!(config.name, "app.db");
        assert_eq!(config.version, 1);
    }

    #[test]
    fn test_summary() {
        let config = HelperConfig::new("app.db", 2)
            .unwrap()
            .with_storage_dir("/data")
            .with_busy_timeout_ms(1000);
        let summary = config.summary();
        assert!(summary.contains("/data/app.db"));
        assert!(summary.contains("1000 ms"));
        assert!(!summary.contains("Application Id"));
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(500), "500 B");
        assert_eq!(format_size(1024), "1.00 KB");
        assert_eq!(format_size(1536), "1.50 KB");
        assert_eq!(format_size(1048576), "1.00 MB");
        assert_eq!(format_size(1073741824), "1.00 GB");
    }

    #[test]
    fn test_helper_status_display() {
        assert_eq!(format!("{}", HelperStatus::Idle), "idle");
        assert_eq!(format!("{}", HelperStatus::Initializing), "initializing");
        assert_eq!(format!("{}", HelperStatus::Ready), "ready");
    }
}
