//! Runtime configuration.
//!
//! Defaults, overridden by an optional s-expression config file, overridden
//! in turn by command-line flags (applied in `main`).

use std::path::{Path, PathBuf};

use lexpr::Value;
use tracing::debug;

use crate::catalog::{DEFAULT_MIN_DISPLAY_WIDTH, DEFAULT_PLACEHOLDER_NAME};
use crate::error::ConfigError;
use crate::sexp::{atom_string, escape_string, get_string, get_u64, list_items, plist_value};

/// Largest accepted `:min-display-width`.
pub const MAX_DISPLAY_WIDTH: usize = 1024;

/// Largest accepted `:body-count`; each body runs its own worker thread.
pub const MAX_BODY_COUNT: usize = 64;

// ── Config ─────────────────────────────────────────────────

/// Where gesture definitions come from and how the catalog is padded.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogConfig {
    /// Definition source files, in load order.
    pub sources: Vec<PathBuf>,
    /// Catalogs shorter than this are padded with placeholders.
    pub min_display_width: usize,
    /// Id given to placeholder entries.
    pub placeholder_name: String,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            min_display_width: DEFAULT_MIN_DISPLAY_WIDTH,
            placeholder_name: DEFAULT_PLACEHOLDER_NAME.to_string(),
        }
    }
}

/// Settings of the replay sensor and driver.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayConfig {
    /// Script steps per second; 0 runs as fast as possible.
    pub frame_rate_hz: u32,
    /// Trackable bodies of the simulated sensor.
    pub body_count: usize,
    /// Log pool status every N steps; 0 logs only at the end.
    pub status_every: u64,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            frame_rate_hz: 30,
            body_count: 6,
            status_every: 0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Config {
    pub catalog: CatalogConfig,
    pub replay: ReplayConfig,
}

impl Config {
    /// Read a config file on top of the defaults.  Relative source paths
    /// are resolved against the file's directory.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let base = path.parent().filter(|p| !p.as_os_str().is_empty());

        let mut config = Self::default();
        config
            .apply_sexp(&text, base)
            .map_err(|reason| ConfigError::Parse {
                path: path.to_path_buf(),
                reason,
            })?;
        debug!(path = %path.display(), sources = config.catalog.sources.len(), "config loaded");
        Ok(config)
    }

    /// Apply every key present in the plist `text`.  Unknown keys are
    /// ignored.
    pub fn apply_sexp(&mut self, text: &str, base: Option<&Path>) -> Result<(), String> {
        let value = lexpr::from_str(text).map_err(|e| e.to_string())?;
        if list_items(&value).is_none() {
            return Err("expected a plist".to_string());
        }

        if let Some(sources) = plist_value(&value, "sources") {
            self.catalog.sources = parse_sources(sources, base)?;
        }
        if let Some(width) = get_number(&value, "min-display-width")? {
            self.catalog.min_display_width = usize::try_from(width)
                .ok()
                .filter(|w| *w <= MAX_DISPLAY_WIDTH)
                .ok_or_else(|| {
                    format!(":min-display-width {width} exceeds {MAX_DISPLAY_WIDTH}")
                })?;
        }
        if let Some(name) = get_string(&value, "placeholder") {
            if name.is_empty() {
                return Err(":placeholder must not be empty".to_string());
            }
            self.catalog.placeholder_name = name;
        }
        if let Some(rate) = get_number(&value, "frame-rate")? {
            self.replay.frame_rate_hz =
                u32::try_from(rate).map_err(|_| format!(":frame-rate {rate} out of range"))?;
        }
        if let Some(bodies) = get_number(&value, "body-count")? {
            if bodies == 0 {
                return Err(":body-count must be positive".to_string());
            }
            self.replay.body_count = usize::try_from(bodies)
                .ok()
                .filter(|b| *b <= MAX_BODY_COUNT)
                .ok_or_else(|| format!(":body-count {bodies} exceeds {MAX_BODY_COUNT}"))?;
        }
        if let Some(every) = get_number(&value, "status-every")? {
            self.replay.status_every = every;
        }
        Ok(())
    }

    /// Generate s-expression for config output.
    pub fn config_sexp(&self) -> String {
        let sources: Vec<String> = self
            .catalog
            .sources
            .iter()
            .map(|p| format!("\"{}\"", escape_string(&p.to_string_lossy())))
            .collect();
        format!(
            "(:sources ({}) :min-display-width {} :placeholder \"{}\" :frame-rate {} :body-count {} :status-every {})",
            sources.join(" "),
            self.catalog.min_display_width,
            escape_string(&self.catalog.placeholder_name),
            self.replay.frame_rate_hz,
            self.replay.body_count,
            self.replay.status_every,
        )
    }
}

/// A present key must hold a non-negative integer.
fn get_number(value: &Value, key: &str) -> Result<Option<u64>, String> {
    match plist_value(value, key) {
        None => Ok(None),
        Some(_) => get_u64(value, key)
            .map(Some)
            .ok_or_else(|| format!(":{key} must be a non-negative integer")),
    }
}

fn parse_sources(value: &Value, base: Option<&Path>) -> Result<Vec<PathBuf>, String> {
    let items = list_items(value).ok_or(":sources must be a list")?;
    items
        .into_iter()
        .map(|item| {
            let path = atom_string(item)
                .map(PathBuf::from)
                .ok_or_else(|| format!(":sources entry {item} is not a path"))?;
            Ok(match base {
                Some(base) if path.is_relative() => base.join(path),
                _ => path,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.catalog.sources.is_empty());
        assert_eq!(config.catalog.min_display_width, 8);
        assert_eq!(config.catalog.placeholder_name, "temp");
        assert_eq!(config.replay.frame_rate_hz, 30);
        assert_eq!(config.replay.body_count, 6);
    }

    #[test]
    fn test_apply_overrides_present_keys_only() {
        let mut config = Config::default();
        config
            .apply_sexp(r#"(:frame-rate 60 :placeholder "blank")"#, None)
            .unwrap();
        assert_eq!(config.replay.frame_rate_hz, 60);
        assert_eq!(config.catalog.placeholder_name, "blank");
        assert_eq!(config.replay.body_count, 6);
        assert_eq!(config.catalog.min_display_width, 8);
    }

    #[test]
    fn test_sources_resolved_against_base() {
        let mut config = Config::default();
        config
            .apply_sexp(
                r#"(:sources ("Database/Seated.gbd" "/abs/Standing.gbd"))"#,
                Some(Path::new("/etc/gestures")),
            )
            .unwrap();
        assert_eq!(
            config.catalog.sources,
            vec![
                PathBuf::from("/etc/gestures/Database/Seated.gbd"),
                PathBuf::from("/abs/Standing.gbd"),
            ]
        );
    }

    #[test]
    fn test_bad_values_rejected() {
        let mut config = Config::default();
        assert!(config.apply_sexp("(:body-count 0)", None).is_err());
        assert!(config.apply_sexp(r#"(:frame-rate "fast")"#, None).is_err());
        assert!(config.apply_sexp("(:sources 3)", None).is_err());
        assert!(config.apply_sexp("42", None).is_err());
        assert!(config.apply_sexp("(:a", None).is_err());
    }

    #[test]
    fn test_sizes_bounded() {
        let mut config = Config::default();
        config.apply_sexp("(:min-display-width 1024 :body-count 64)", None).unwrap();
        assert_eq!(config.catalog.min_display_width, MAX_DISPLAY_WIDTH);
        assert_eq!(config.replay.body_count, MAX_BODY_COUNT);

        let err = config.apply_sexp("(:min-display-width 1025)", None).unwrap_err();
        assert!(err.contains("min-display-width"));
        assert!(config
            .apply_sexp("(:min-display-width 18446744073709551615)", None)
            .is_err());
        assert!(config.apply_sexp("(:body-count 65)", None).is_err());
        assert_eq!(config.catalog.min_display_width, MAX_DISPLAY_WIDTH);
    }

    #[test]
    fn test_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pool.el");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, r#"(:sources ("Seated.gbd") :min-display-width 4 :body-count 2)"#).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.catalog.sources, vec![dir.path().join("Seated.gbd")]);
        assert_eq!(config.catalog.min_display_width, 4);
        assert_eq!(config.replay.body_count, 2);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(&dir.path().join("absent.el")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_load_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.el");
        std::fs::write(&path, "(:frame-rate -3)").unwrap();
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_config_sexp() {
        let mut config = Config::default();
        config.catalog.sources.push(PathBuf::from("db/Seated.gbd"));
        let sexp = config.config_sexp();
        assert!(sexp.contains(r#":sources ("db/Seated.gbd")"#));
        assert!(sexp.contains(":min-display-width 8"));
        assert!(sexp.contains(r#":placeholder "temp""#));
        assert!(sexp.contains(":frame-rate 30"));
        assert!(sexp.contains(":body-count 6"));
    }

    #[test]
    fn test_config_sexp_reads_back() {
        let mut config = Config::default();
        config.catalog.sources.push(PathBuf::from("/db/Seated.gbd"));
        config.replay.status_every = 5;
        let mut reread = Config::default();
        reread.apply_sexp(&config.config_sexp(), None).unwrap();
        assert_eq!(reread, config);
    }
}
