//! Unit lookup for the run-by-name entry point.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use tracing::{debug, info};

use crate::error::{EngineError, Result};
use crate::unit::Unit;

pub trait UnitCatalog: Send + Sync {
    fn get_by_name(&self, name: &str) -> Option<Unit>;

    fn names(&self) -> Vec<String>;
}

/// Units held in memory, keyed by their unique name.
#[derive(Debug, Default, Clone)]
pub struct InMemoryCatalog {
    units: BTreeMap<String, Unit>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a unit; names must be unique within the catalog.
    pub fn insert(&mut self, unit: Unit) -> Result<()> {
        if self.units.contains_key(&unit.name) {
            return Err(EngineError::Config(format!(
                "duplicate unit name '{}'",
                unit.name
            )));
        }
        self.units.insert(unit.name.clone(), unit);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Load every `*.yaml` / `*.yml` unit file in `dir`.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let mut catalog = Self::new();
        for ext in ["yaml", "yml"] {
            let pattern = dir.join(format!("*.{}", ext));
            let pattern = pattern.to_string_lossy();
            let paths = glob::glob(&pattern).map_err(|e| {
                EngineError::Config(format!("invalid unit pattern {}: {}", pattern, e))
            })?;
            for path in paths.flatten() {
                let unit = load_unit_file(&path)?;
                debug!(unit = %unit.name, path = %path.display(), "catalog:loaded");
                catalog.insert(unit)?;
            }
        }
        info!(dir = %dir.display(), count = catalog.len(), "catalog:loaded units");
        Ok(catalog)
    }
}

impl UnitCatalog for InMemoryCatalog {
    fn get_by_name(&self, name: &str) -> Option<Unit> {
        self.units.get(name).cloned()
    }

    fn names(&self) -> Vec<String> {
        self.units.keys().cloned().collect()
    }
}

/// Read one unit definition from a YAML file.
///
/// A unit without an explicit id takes the file stem.
pub fn load_unit_file(path: &Path) -> Result<Unit> {
    let contents = fs::read_to_string(path)
        .map_err(|e| EngineError::io(format!("Failed to read {}", path.display()), e))?;
    let mut unit: Unit = serde_yaml::from_str(&contents)
        .map_err(|e| EngineError::Config(format!("Failed to parse {}: {}", path.display(), e)))?;
    if unit.id.is_empty()
        && let Some(stem) = path.file_stem()
    {
        unit.id = stem.to_string_lossy().into_owned();
    }
    Ok(unit)
}

/// Write a unit definition back to a YAML file.
pub fn save_unit_file(path: &Path, unit: &Unit) -> Result<()> {
    let yaml = serde_yaml::to_string(unit)
        .map_err(|e| EngineError::Config(format!("Failed to serialize unit: {}", e)))?;
    fs::write(path, yaml)
        .map_err(|e| EngineError::io(format!("Failed to write {}", path.display()), e))
}
