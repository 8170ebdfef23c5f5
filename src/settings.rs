//! Settings file and command-line overrides.

use std::path::{Path, PathBuf};

use color_eyre::eyre::{Context, Result, bail, eyre};
use serde::{Deserialize, Serialize};

use dropsync_core::SyncConfig;

/// Contents of `config.toml`. Every field is optional; flags take precedence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Directory tree to mirror.
    pub source: Option<PathBuf>,
    /// Directory synchronized files are stored in.
    pub destination: Option<PathBuf>,
    /// Only files under this feed folder are stored.
    pub folder: Option<String>,
    /// Milliseconds between scans.
    pub interval_ms: Option<u64>,
    /// Cap on simultaneous downloads.
    pub max_concurrent_downloads: Option<usize>,
}

impl Settings {
    /// `<config dir>/dropsync/config.toml`, when the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("dropsync").join("config.toml"))
    }

    /// Load settings from `explicit`, or from the default location if present.
    ///
    /// An explicit path must exist; a missing default file yields empty settings.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) if path.is_file() => path,
                _ => return Ok(Self::default()),
            },
        };

        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;
        let settings = Self::parse(&text)
            .with_context(|| format!("Invalid settings in {}", path.display()))?;
        tracing::debug!(path = %path.display(), "settings loaded");
        Ok(settings)
    }

    /// Parse settings from TOML text.
    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }
}

/// Values given on the command line for a sync run.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub source: Option<PathBuf>,
    pub destination: Option<PathBuf>,
    pub folder: Option<String>,
    pub interval_ms: Option<u64>,
    pub max_concurrent_downloads: Option<usize>,
}

/// Fully resolved inputs for a sync run.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub config: SyncConfig,
}

impl RunPlan {
    /// Merge flags over file settings and validate the result.
    pub fn resolve(settings: Settings, overrides: Overrides) -> Result<Self> {
        let source = overrides
            .source
            .or(settings.source)
            .unwrap_or_else(|| PathBuf::from("."));
        if !source.is_dir() {
            bail!("Source {} is not a directory", source.display());
        }
        let source = source
            .canonicalize()
            .with_context(|| format!("Invalid source path {}", source.display()))?;

        let destination = resolve_destination(overrides.destination, settings.destination)?;

        let mut builder = SyncConfig::builder();
        if let Some(folder) = overrides.folder.or(settings.folder) {
            builder.folder_to_scan(folder);
        }
        if let Some(interval_ms) = overrides.interval_ms.or(settings.interval_ms) {
            builder.interval_ms(interval_ms);
        }
        if let Some(limit) = overrides
            .max_concurrent_downloads
            .or(settings.max_concurrent_downloads)
        {
            builder.max_concurrent_downloads(Some(limit));
        }
        let config = builder.build().map_err(|e| eyre!("Invalid sync settings: {e}"))?;

        Ok(Self {
            source,
            destination,
            config,
        })
    }
}

/// Pick the destination directory from a flag or the settings file.
pub fn resolve_destination(flag: Option<PathBuf>, file: Option<PathBuf>) -> Result<PathBuf> {
    flag.or(file).ok_or_else(|| {
        eyre!("No destination directory; pass --dest or set `destination` in config.toml")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_parse_full_settings() {
        let settings = Settings::parse(
            r#"
            source = "/srv/inbox"
            destination = "/srv/cache"
            folder = "/Camera Uploads"
            interval_ms = 30000
            max_concurrent_downloads = 4
            "#,
        )
        .unwrap();

        assert_eq!(settings.source, Some(PathBuf::from("/srv/inbox")));
        assert_eq!(settings.folder.as_deref(), Some("/Camera Uploads"));
        assert_eq!(settings.interval_ms, Some(30_000));
        assert_eq!(settings.max_concurrent_downloads, Some(4));
    }

    #[test]
    fn test_parse_empty_settings() {
        assert_eq!(Settings::parse("").unwrap(), Settings::default());
    }

    #[test]
    fn test_parse_rejects_unknown_keys() {
        assert!(Settings::parse("intervall_ms = 5").is_err());
    }

    #[test]
    fn test_load_explicit_path_must_exist() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("missing.toml");

        assert!(Settings::load(Some(&missing)).is_err());
    }

    #[test]
    fn test_load_explicit_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "folder = \"/Docs\"\n").unwrap();

        let settings = Settings::load(Some(&path)).unwrap();

        assert_eq!(settings.folder.as_deref(), Some("/Docs"));
    }

    #[test]
    fn test_flags_override_file() {
        let source = TempDir::new().unwrap();
        let settings = Settings {
            source: Some(PathBuf::from("/does/not/exist")),
            destination: Some(PathBuf::from("/from/file")),
            folder: Some("/FromFile".into()),
            interval_ms: Some(60_000),
            max_concurrent_downloads: Some(2),
        };
        let overrides = Overrides {
            source: Some(source.path().to_path_buf()),
            destination: Some(PathBuf::from("/from/flag")),
            interval_ms: Some(500),
            ..Default::default()
        };

        let plan = RunPlan::resolve(settings, overrides).unwrap();

        assert_eq!(plan.source, source.path().canonicalize().unwrap());
        assert_eq!(plan.destination, PathBuf::from("/from/flag"));
        assert_eq!(plan.config.folder_to_scan, "/FromFile");
        assert_eq!(plan.config.interval(), Duration::from_millis(500));
        assert_eq!(plan.config.max_concurrent_downloads, Some(2));
    }

    #[test]
    fn test_missing_destination_is_an_error() {
        let source = TempDir::new().unwrap();
        let overrides = Overrides {
            source: Some(source.path().to_path_buf()),
            ..Default::default()
        };

        assert!(RunPlan::resolve(Settings::default(), overrides).is_err());
    }

    #[test]
    fn test_zero_interval_is_rejected() {
        let source = TempDir::new().unwrap();
        let overrides = Overrides {
            source: Some(source.path().to_path_buf()),
            destination: Some(PathBuf::from("/cache")),
            interval_ms: Some(0),
            ..Default::default()
        };

        assert!(RunPlan::resolve(Settings::default(), overrides).is_err());
    }
}
