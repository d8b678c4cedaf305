//! User preferences, read from TOML.
//!
//! ```toml
//! mapping = "positional"
//!
//! [math]
//! timeout_ms = 2000
//! cache = { policy = "lru", capacity = 256 }
//!
//! [math.display]
//! font_size_px = 20.0
//! canvas_width = 1500
//! canvas_height = 120
//!
//! [editor]
//! tick_ms = 100
//! ```

use std::{
    env, fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::{
    error::{ExternalIoError, IoOperation},
    math::RasterConfig,
    styles::MappingStrategy,
};

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct PreviewConfig {
    pub mapping: MappingStrategy,
    pub math: RasterConfig,
    pub editor: EditorConfig,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EditorConfig {
    pub tick_ms: u64,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self { tick_ms: 250 }
    }
}

impl EditorConfig {
    pub fn tick_rate(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(1))
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Io(#[from] ExternalIoError),

    #[error("invalid config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

impl PreviewConfig {
    pub fn from_toml(source: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(source)
    }

    /// Reads `path`. A missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let source = match fs::read_to_string(path) {
            Ok(source) => source,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(err) => return Err(ExternalIoError::new(IoOperation::Read, path, err).into()),
        };
        Self::from_toml(&source).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// `$XDG_CONFIG_HOME/mathdown/config.toml`, else under `~/.config`.
    pub fn default_path() -> Option<PathBuf> {
        let base = env::var_os("XDG_CONFIG_HOME")
            .filter(|dir| !dir.is_empty())
            .map(PathBuf::from)
            .or_else(|| env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")))?;
        Some(base.join("mathdown").join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::{EvictionPolicy, RasterParams};
    use std::num::NonZeroUsize;

    #[test]
    fn empty_source_gives_defaults() {
        let config = PreviewConfig::from_toml("").unwrap();
        assert_eq!(config, PreviewConfig::default());
        assert_eq!(config.mapping, MappingStrategy::Structured);
        assert_eq!(config.math.cache, EvictionPolicy::Unbounded);
        assert_eq!(config.math.display, RasterParams::display());
        assert_eq!(config.math.timeout(), Some(Duration::from_millis(2000)));
        assert_eq!(config.editor.tick_rate(), Duration::from_millis(250));
    }

    #[test]
    fn zero_timeout_removes_the_bound() {
        let config = PreviewConfig::from_toml("[math]\ntimeout_ms = 0\n").unwrap();
        assert_eq!(config.math.timeout(), None);
    }

    #[test]
    fn full_config_parses() {
        let config = PreviewConfig::from_toml(
            r#"
            mapping = "positional"

            [math]
            timeout_ms = 1500
            cache = { policy = "lru", capacity = 64 }

            [math.display]
            font_size_px = 20.0
            canvas_width = 1600
            canvas_height = 120

            [editor]
            tick_ms = 50
            "#,
        )
        .unwrap();
        assert_eq!(config.mapping, MappingStrategy::Positional);
        assert_eq!(
            config.math.cache,
            EvictionPolicy::Lru {
                capacity: NonZeroUsize::new(64).unwrap()
            }
        );
        assert_eq!(config.math.timeout(), Some(Duration::from_millis(1500)));
        assert_eq!(config.math.display.font_size_px, 20.0);
        assert_eq!(config.math.display.canvas_height, 120);
        assert_eq!(config.math.inline, RasterParams::inline());
        assert_eq!(config.editor.tick_ms, 50);
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let err = PreviewConfig::from_toml("[math]\ncache = { policy = \"lru\", capacity = 0 }\n");
        assert!(err.is_err());
    }

    #[test]
    fn raster_tables_must_be_complete() {
        assert!(PreviewConfig::from_toml("[math.inline]\nfont_size_px = 10.0\n").is_err());
    }

    #[test]
    fn unknown_strategy_is_rejected() {
        assert!(PreviewConfig::from_toml("mapping = \"fuzzy\"").is_err());
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = PreviewConfig::load_from(&dir.path().join("config.toml")).unwrap();
        assert_eq!(config, PreviewConfig::default());
    }

    #[test]
    fn parse_errors_name_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "mapping = [").unwrap();
        let err = PreviewConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("config.toml"));
    }
}
