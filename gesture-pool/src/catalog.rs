//! Gesture catalog: the fixed, ordered list of discrete gestures shared by
//! every recognizer slot.
//!
//! The catalog is loaded once from an ordered list of definition sources.
//! Entries keep their source order and each source's own enumeration order;
//! duplicate names across sources are kept as separate entries.  A catalog
//! narrower than the configured display width is padded with inert
//! placeholders so a display can assume a fixed-width table.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info};

use crate::error::CatalogLoadError;
use crate::sexp;

/// Default minimum number of catalog entries shown per slot.
pub const DEFAULT_MIN_DISPLAY_WIDTH: usize = 8;

/// Name given to padding entries.
pub const DEFAULT_PLACEHOLDER_NAME: &str = "temp";

// ── Definitions ────────────────────────────────────────────

/// One catalog entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GestureDefinition {
    /// Gesture name; this is also the key looked up in sensor frames.
    pub id: String,
    /// Index of the definition source this entry came from.  `None` for
    /// padding placeholders.
    pub source_index: Option<usize>,
}

impl GestureDefinition {
    /// Whether this entry is display padding that never detects.
    pub fn is_placeholder(&self) -> bool {
        self.source_index.is_none()
    }
}

/// The gestures enumerated by a single source, in source order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceGestures {
    pub name: String,
    pub gestures: Vec<String>,
}

// ── Sources ────────────────────────────────────────────────

/// Something that can enumerate gesture definitions.
pub trait DefinitionSource {
    /// Human-readable name used in logs and errors.
    fn name(&self) -> String;

    /// Enumerate the source's gesture names in its own order.
    fn enumerate(&self) -> Result<SourceGestures, CatalogLoadError>;
}

/// A definition file holding one plist:
///
/// ```text
/// (:database "Seated" :gestures ("Seated_Wave" "Seated_Clap"))
/// ```
///
/// `:database` defaults to the file stem.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn default_name(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

impl DefinitionSource for FileSource {
    fn name(&self) -> String {
        self.path.display().to_string()
    }

    fn enumerate(&self) -> Result<SourceGestures, CatalogLoadError> {
        let text = std::fs::read_to_string(&self.path).map_err(|source| CatalogLoadError::Open {
            path: self.path.clone(),
            source,
        })?;
        parse_definitions(&text, &self.default_name())
    }
}

/// Parse the text of a definition source.
pub fn parse_definitions(text: &str, default_name: &str) -> Result<SourceGestures, CatalogLoadError> {
    let parse_err = |reason: String| CatalogLoadError::Parse {
        name: default_name.to_string(),
        reason,
    };

    let value = lexpr::from_str(text).map_err(|e| parse_err(e.to_string()))?;
    let name = sexp::get_string(&value, "database").unwrap_or_else(|| default_name.to_string());
    let list = sexp::plist_value(&value, "gestures")
        .ok_or_else(|| parse_err("missing :gestures".to_string()))?;
    let items = sexp::list_items(list)
        .ok_or_else(|| parse_err(":gestures is not a list".to_string()))?;

    let mut gestures = Vec::with_capacity(items.len());
    for item in items {
        match sexp::atom_string(item) {
            Some(g) if !g.is_empty() => gestures.push(g),
            _ => return Err(parse_err(format!("invalid gesture entry {}", item))),
        }
    }

    Ok(SourceGestures { name, gestures })
}

// ── Catalog ────────────────────────────────────────────────

/// The shared gesture catalog.  Cloning is cheap and every clone sees the
/// same entries in the same order.
#[derive(Debug, Clone, PartialEq)]
pub struct GestureCatalog {
    entries: Arc<[GestureDefinition]>,
    sources: Arc<[SourceGestures]>,
}

impl GestureCatalog {
    /// Load the catalog from `sources` in order.
    ///
    /// Any failing source aborts the whole load.  The result is padded with
    /// `placeholder_name` entries up to `min_width`.
    pub fn load(
        sources: &[&dyn DefinitionSource],
        min_width: usize,
        placeholder_name: &str,
    ) -> Result<Self, CatalogLoadError> {
        let mut entries = Vec::new();
        let mut per_source = Vec::with_capacity(sources.len());

        for (source_index, source) in sources.iter().enumerate() {
            let set = source.enumerate()?;
            debug!(
                source = %source.name(),
                database = %set.name,
                count = set.gestures.len(),
                "loaded definition source"
            );
            entries.extend(set.gestures.iter().map(|id| GestureDefinition {
                id: id.clone(),
                source_index: Some(source_index),
            }));
            per_source.push(set);
        }

        let real = entries.len();
        while entries.len() < min_width {
            entries.push(GestureDefinition {
                id: placeholder_name.to_string(),
                source_index: None,
            });
        }

        info!(
            sources = per_source.len(),
            gestures = real,
            padded = entries.len() - real,
            "gesture catalog loaded"
        );

        Ok(Self {
            entries: entries.into(),
            sources: per_source.into(),
        })
    }

    /// Load from file paths.
    pub fn load_files(
        paths: &[PathBuf],
        min_width: usize,
        placeholder_name: &str,
    ) -> Result<Self, CatalogLoadError> {
        let files: Vec<FileSource> = paths.iter().map(FileSource::new).collect();
        let sources: Vec<&dyn DefinitionSource> =
            files.iter().map(|f| f as &dyn DefinitionSource).collect();
        Self::load(&sources, min_width, placeholder_name)
    }

    pub fn entries(&self) -> &[GestureDefinition] {
        &self.entries
    }

    /// Gesture sets per source, in source order.
    pub fn sources(&self) -> &[SourceGestures] {
        &self.sources
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Names of all entries, placeholders included.
    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.id.clone()).collect()
    }

    /// Distinct real gesture names in first-seen order.  This is what gets
    /// registered with the sensor; duplicates share one detector.
    pub fn detector_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for entry in self.entries.iter().filter(|e| !e.is_placeholder()) {
            if !names.iter().any(|n| n == &entry.id) {
                names.push(entry.id.clone());
            }
        }
        names
    }

    /// Whether two handles point at the very same catalog.
    pub fn shares_with(&self, other: &GestureCatalog) -> bool {
        Arc::ptr_eq(&self.entries, &other.entries)
    }
}

/// In-memory definition source for tests.
#[cfg(test)]
pub(crate) struct StaticSource {
    pub name: &'static str,
    pub gestures: Vec<&'static str>,
    pub fail: bool,
}

#[cfg(test)]
impl StaticSource {
    pub fn new(name: &'static str, gestures: &[&'static str]) -> Self {
        Self {
            name,
            gestures: gestures.to_vec(),
            fail: false,
        }
    }
}

#[cfg(test)]
impl DefinitionSource for StaticSource {
    fn name(&self) -> String {
        self.name.to_string()
    }

    fn enumerate(&self) -> Result<SourceGestures, CatalogLoadError> {
        if self.fail {
            return Err(CatalogLoadError::Parse {
                name: self.name.to_string(),
                reason: "corrupt".to_string(),
            });
        }
        Ok(SourceGestures {
            name: self.name.to_string(),
            gestures: self.gestures.iter().map(|g| g.to_string()).collect(),
        })
    }
}

/// Build a catalog straight from names, no padding.
#[cfg(test)]
pub(crate) fn test_catalog(names: &[&'static str]) -> GestureCatalog {
    let source = StaticSource::new("test", names);
    GestureCatalog::load(&[&source], 0, DEFAULT_PLACEHOLDER_NAME).unwrap()
}

// ── Tests ──────────────────────────────────────────────────
