//! Where migration units come from.

use camino::{Utf8Path, Utf8PathBuf};

use crate::migrate::{MigrationUnit, Operation};
use crate::{Error, Result};

/// A provider of migration units.
pub trait MigrationSource: Send + Sync {
    fn load(&self) -> Result<Vec<MigrationUnit>>;
}

/// Units declared in code.
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    units: Vec<MigrationUnit>,
}

impl StaticSource {
    pub fn new(units: impl IntoIterator<Item = MigrationUnit>) -> Self {
        Self {
            units: units.into_iter().collect(),
        }
    }

    pub fn with(mut self, unit: MigrationUnit) -> Self {
        self.units.push(unit);
        self
    }
}

impl MigrationSource for StaticSource {
    fn load(&self) -> Result<Vec<MigrationUnit>> {
        Ok(self.units.clone())
    }
}

/// SQL files in a directory.
///
/// Each unit is `<version>_<label>.up.sql` with an optional
/// `<version>_<label>.down.sql` next to it. Other files are ignored.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    dir: Utf8PathBuf,
    namespace: String,
}

#[derive(Debug, PartialEq, Eq)]
enum Direction {
    Up,
    Down,
}

/// Split `0003_add_users.up.sql` into `(3, "add_users", Up)`.
fn parse_file_name(name: &str) -> Option<(u64, &str, Direction)> {
    let (stem, direction) = if let Some(stem) = name.strip_suffix(".up.sql") {
        (stem, Direction::Up)
    } else if let Some(stem) = name.strip_suffix(".down.sql") {
        (stem, Direction::Down)
    } else {
        return None;
    };
    let (version, label) = stem.split_once('_')?;
    if version.is_empty() || !version.bytes().all(|b| b.is_ascii_digit()) || label.is_empty() {
        return None;
    }
    Some((version.parse().ok()?, label, direction))
}

impl DirectorySource {
    pub fn new(dir: impl Into<Utf8PathBuf>, namespace: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            namespace: namespace.into(),
        }
    }

    pub fn dir(&self) -> &Utf8Path {
        &self.dir
    }

    fn source_error(&self, path: &Utf8Path, e: impl std::fmt::Display) -> Error {
        Error::Source {
            path: path.to_string(),
            message: e.to_string(),
        }
    }
}

impl MigrationSource for DirectorySource {
    fn load(&self) -> Result<Vec<MigrationUnit>> {
        let entries = self
            .dir
            .read_dir_utf8()
            .map_err(|e| self.source_error(&self.dir, e))?;

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| self.source_error(&self.dir, e))?;
            let path = entry.path().to_path_buf();
            match parse_file_name(entry.file_name()) {
                Some((version, label, direction)) => {
                    files.push((version, label.to_string(), direction, path))
                }
                None => tracing::debug!(path = %path, "not a migration file, skipping"),
            }
        }
        // Ups before downs, so every down finds its unit.
        files.sort_by(|a, b| {
            (a.0, &a.1, a.2 == Direction::Down).cmp(&(b.0, &b.1, b.2 == Direction::Down))
        });

        let mut units: Vec<MigrationUnit> = Vec::new();
        for (version, label, direction, path) in files {
            let sql = std::fs::read_to_string(&path).map_err(|e| self.source_error(&path, e))?;
            match direction {
                Direction::Up => units.push(
                    MigrationUnit::new(&self.namespace, version, label).up(Operation::Sql(sql)),
                ),
                Direction::Down => {
                    let unit = units
                        .iter_mut()
                        .find(|u| u.version == version && u.label == label)
                        .ok_or_else(|| self.source_error(&path, "down migration without an up"))?;
                    *unit = std::mem::take(unit).down(Operation::Sql(sql));
                }
            }
        }
        tracing::debug!(dir = %self.dir, units = units.len(), "loaded migrations");
        Ok(units)
    }
}
