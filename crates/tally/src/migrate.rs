//! Versioned migrations with drift detection.
//!
//! A [`MigrationUnit`] is applied at most once per namespace. When it is
//! applied, a record with a hash of its normalized `up` operations goes into
//! the tracking table (see [`crate::meta`]). Later runs recompute the hash:
//! a mismatch means the unit was edited after it ran, and the run stops with
//! [`Error::Drift`] before touching anything.
//!
//! Comment and whitespace edits don't change the hash.
//!
//! ```ignore
//! let source = StaticSource::new([
//!     MigrationUnit::new("public", 1, "create_users").up(Operation::CreateTable(users)),
//!     MigrationUnit::new("public", 2, "add_nickname")
//!         .up("ALTER TABLE {{namespace}}.users ADD nickname text")
//!         .down("ALTER TABLE {{namespace}}.users DROP nickname"),
//! ]);
//! let migrator = Migrator::new(MigratorConfig::default(), source)?;
//! let report = migrator.migrate(&db).await?;
//! ```

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use tally_schema::TableSchema;
use tally_sql::{normalize_sql, quote_ident};

use crate::meta::{MigrationRecord, Tracker};
use crate::schema::{drop_table_sql, generate_ddl};
use crate::source::{DirectorySource, MigrationSource};
use crate::traced::transaction;
use crate::{Error, Executor, ExecutorExt, Result};

/// Placeholder substituted with the quoted target namespace.
pub const NAMESPACE_PLACEHOLDER: &str = "{{namespace}}";

/// One step of a migration.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// Raw SQL, possibly several statements.
    Sql(String),
    /// The full DDL of a schema-declared table.
    CreateTable(TableSchema),
}

impl Operation {
    /// The text that is hashed: SQL before namespace substitution.
    fn source_text(&self) -> String {
        match self {
            Operation::Sql(sql) => sql.clone(),
            Operation::CreateTable(schema) => generate_ddl(schema).to_sql(),
        }
    }

    /// The SQL to execute against `namespace`.
    fn render(&self, namespace: &str) -> String {
        self.source_text()
            .replace(NAMESPACE_PLACEHOLDER, &quote_ident(namespace))
    }

    /// The automatic inverse, when there is one.
    fn inverse(&self) -> Option<Operation> {
        match self {
            Operation::Sql(_) => None,
            Operation::CreateTable(schema) => Some(Operation::Sql(drop_table_sql(schema))),
        }
    }
}

impl From<&str> for Operation {
    fn from(sql: &str) -> Self {
        Operation::Sql(sql.to_string())
    }
}

impl From<String> for Operation {
    fn from(sql: String) -> Self {
        Operation::Sql(sql)
    }
}

impl From<TableSchema> for Operation {
    fn from(schema: TableSchema) -> Self {
        Operation::CreateTable(schema)
    }
}

/// A versioned, labeled set of operations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MigrationUnit {
    pub namespace: String,
    pub version: u64,
    pub label: String,
    pub up: Vec<Operation>,
    /// Explicit down procedure. Units made only of `CreateTable` operations
    /// get one automatically.
    pub down: Option<Vec<Operation>>,
}

impl MigrationUnit {
    pub fn new(namespace: impl Into<String>, version: u64, label: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            version,
            label: label.into(),
            up: Vec::new(),
            down: None,
        }
    }

    pub fn up(mut self, op: impl Into<Operation>) -> Self {
        self.up.push(op.into());
        self
    }

    pub fn down(mut self, op: impl Into<Operation>) -> Self {
        self.down.get_or_insert_with(Vec::new).push(op.into());
        self
    }

    /// blake3 over the normalized `up` operations, hex encoded.
    pub fn hash(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        for op in &self.up {
            hasher.update(normalize_sql(&op.source_text()).as_bytes());
            hasher.update(b"\n");
        }
        hasher.finalize().to_hex().to_string()
    }

    /// The operations that revert this unit.
    pub fn down_operations(&self) -> Option<Vec<Operation>> {
        if let Some(down) = &self.down {
            return Some(down.clone());
        }
        if self.up.is_empty() {
            return None;
        }
        self.up.iter().rev().map(Operation::inverse).collect()
    }
}

/// Where a unit stands relative to the tracking table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationState {
    Pending,
    Applied,
    /// Applied, but the unit has changed since.
    Drifted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MigrationStatus {
    pub version: u64,
    pub label: String,
    pub state: MigrationState,
    pub hash: String,
    pub recorded_hash: Option<String>,
    pub applied_at: Option<DateTime<Utc>>,
}

/// Every unit's state, plus records no unit accounts for.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    pub namespace: String,
    pub migrations: Vec<MigrationStatus>,
    pub orphaned: Vec<MigrationRecord>,
}

impl StatusReport {
    pub fn pending(&self) -> impl Iterator<Item = &MigrationStatus> {
        self.migrations
            .iter()
            .filter(|m| m.state == MigrationState::Pending)
    }

    pub fn is_up_to_date(&self) -> bool {
        self.migrations
            .iter()
            .all(|m| m.state == MigrationState::Applied)
    }
}

/// The outcome of a successful [`Migrator::migrate`] run.
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationReport {
    /// Versions applied by this run, in order.
    pub applied: Vec<u64>,
    /// State of every unit after the run.
    pub status: StatusReport,
}

/// Which namespace to migrate and where its records live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigratorConfig {
    pub namespace: String,
    pub tracking_namespace: String,
    pub tracking_table: String,
}

impl Default for MigratorConfig {
    fn default() -> Self {
        tally_config::MigrationsConfig::default().into()
    }
}

impl From<tally_config::MigrationsConfig> for MigratorConfig {
    fn from(config: tally_config::MigrationsConfig) -> Self {
        Self {
            namespace: config.namespace,
            tracking_namespace: config.tracking_namespace,
            tracking_table: config.tracking_table,
        }
    }
}

/// The session-level advisory lock key for a namespace.
pub fn lock_key(namespace: &str) -> i64 {
    let hash = blake3::hash(format!("tally:migrations:{namespace}").as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&hash.as_bytes()[..8]);
    i64::from_le_bytes(bytes)
}

/// Applies and reverts migration units for one namespace.
pub struct Migrator {
    config: MigratorConfig,
    source: Box<dyn MigrationSource>,
    tracker: Tracker,
}

impl Migrator {
    pub fn new(config: MigratorConfig, source: impl MigrationSource + 'static) -> Result<Self> {
        let tracker = Tracker::new(&config.tracking_namespace, &config.tracking_table)?;
        Ok(Self {
            config,
            source: Box::new(source),
            tracker,
        })
    }

    /// A migrator over the configured migrations directory.
    pub fn from_config(config: &tally_config::Config) -> Result<Self> {
        let source = DirectorySource::new(
            config.migrations.directory.clone(),
            config.migrations.namespace.clone(),
        );
        Self::new(config.migrations.clone().into(), source)
    }

    pub fn config(&self) -> &MigratorConfig {
        &self.config
    }

    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    /// Load this namespace's units, ordered by version.
    fn units(&self) -> Result<BTreeMap<u64, MigrationUnit>> {
        let namespace = &self.config.namespace;
        let mut units = BTreeMap::new();
        for unit in self.source.load()? {
            if unit.namespace != *namespace {
                tracing::debug!(
                    namespace = %unit.namespace,
                    version = unit.version,
                    "skipping migration for another namespace"
                );
                continue;
            }
            let version = unit.version;
            if units.insert(version, unit).is_some() {
                return Err(Error::DuplicateVersion {
                    namespace: namespace.clone(),
                    version,
                });
            }
        }
        Ok(units)
    }

    fn status_of(
        &self,
        units: &BTreeMap<u64, MigrationUnit>,
        records: &IndexMap<u64, MigrationRecord>,
    ) -> StatusReport {
        let migrations = units
            .values()
            .map(|unit| {
                let hash = unit.hash();
                let record = records.get(&unit.version);
                let state = match record {
                    None => MigrationState::Pending,
                    Some(r) if r.hash == hash => MigrationState::Applied,
                    Some(_) => MigrationState::Drifted,
                };
                MigrationStatus {
                    version: unit.version,
                    label: unit.label.clone(),
                    state,
                    hash,
                    recorded_hash: record.map(|r| r.hash.clone()),
                    applied_at: record.map(|r| r.applied_at),
                }
            })
            .collect();
        let orphaned = records
            .values()
            .filter(|r| !units.contains_key(&r.version))
            .cloned()
            .collect();
        StatusReport {
            namespace: self.config.namespace.clone(),
            migrations,
            orphaned,
        }
    }

    /// Report the state of every unit without changing anything.
    pub async fn status<E: Executor + ?Sized>(&self, db: &E) -> Result<StatusReport> {
        let units = self.units()?;
        let records = if self.tracker.exists(db).await? {
            self.tracker.records(db, &self.config.namespace).await?
        } else {
            IndexMap::new()
        };
        Ok(self.status_of(&units, &records))
    }

    /// Apply every pending unit, in version order.
    ///
    /// Holds the namespace's advisory lock for the whole run. Each unit runs
    /// in its own transaction together with its tracking record; the first
    /// failure rolls that unit back and stops the run.
    pub async fn migrate<E: Executor + ?Sized>(&self, db: &E) -> Result<MigrationReport> {
        self.locked(db, self.migrate_locked(db)).await
    }

    /// Revert every applied unit with a version above `target`, newest
    /// first.
    ///
    /// Returns the reverted versions.
    pub async fn rollback_to<E: Executor + ?Sized>(&self, db: &E, target: u64) -> Result<Vec<u64>> {
        self.locked(db, self.rollback_locked(db, target)).await
    }

    async fn locked<E, T>(
        &self,
        db: &E,
        work: impl std::future::Future<Output = Result<T>>,
    ) -> Result<T>
    where
        E: Executor + ?Sized,
    {
        let key = lock_key(&self.config.namespace);
        db.advisory_lock(key).await?;
        tracing::debug!(namespace = %self.config.namespace, key, "acquired migration lock");

        let result = work.await;
        let unlocked = db.advisory_unlock(key).await;

        match (result, unlocked) {
            (Err(e), Err(unlock_err)) => {
                tracing::warn!(error = %unlock_err, "failed to release migration lock");
                Err(e)
            }
            (Err(e), Ok(())) => Err(e),
            (Ok(_), Err(unlock_err)) => Err(unlock_err),
            (Ok(value), Ok(())) => Ok(value),
        }
    }

    async fn migrate_locked<E: Executor + ?Sized>(&self, db: &E) -> Result<MigrationReport> {
        let namespace = &self.config.namespace;
        self.tracker.bootstrap(db).await?;
        let mut records = self.tracker.records(db, namespace).await?;
        let units = self.units()?;

        let status = self.status_of(&units, &records);
        for orphan in &status.orphaned {
            tracing::warn!(
                namespace = %namespace,
                version = orphan.version,
                label = %orphan.label,
                "tracking record has no matching migration"
            );
        }
        if let Some(drifted) = status
            .migrations
            .iter()
            .find(|m| m.state == MigrationState::Drifted)
        {
            let recorded = drifted.recorded_hash.clone().unwrap_or_default();
            tracing::error!(
                namespace = %namespace,
                version = drifted.version,
                label = %drifted.label,
                recorded = %recorded,
                computed = %drifted.hash,
                "migration changed after it was applied"
            );
            return Err(Error::Drift {
                namespace: namespace.clone(),
                version: drifted.version,
                recorded,
                computed: drifted.hash.clone(),
            });
        }

        let mut applied = Vec::new();
        for unit in units.values() {
            if records.contains_key(&unit.version) {
                continue;
            }
            let hash = unit.hash();
            let ran = self
                .apply_unit(db, unit, &hash)
                .await
                .map_err(|e| failed(unit, e))?;
            if ran {
                tracing::info!(
                    namespace = %namespace,
                    version = unit.version,
                    label = %unit.label,
                    "applied migration"
                );
                applied.push(unit.version);
            }
        }

        if !applied.is_empty() {
            records = self.tracker.records(db, namespace).await?;
        }
        Ok(MigrationReport {
            applied,
            status: self.status_of(&units, &records),
        })
    }

    /// Returns `false` when the record appeared since the run started.
    async fn apply_unit<E: Executor + ?Sized>(
        &self,
        db: &E,
        unit: &MigrationUnit,
        hash: &str,
    ) -> Result<bool> {
        let namespace = &self.config.namespace;
        transaction(db, async {
            if self.tracker.find(db, namespace, unit.version).await?.is_some() {
                return Ok(false);
            }
            for op in &unit.up {
                db.batch_execute(&op.render(namespace)).await?;
            }
            self.tracker
                .insert(db, namespace, unit.version, hash, &unit.label)
                .await?;
            Ok(true)
        })
        .await
    }

    async fn rollback_locked<E: Executor + ?Sized>(&self, db: &E, target: u64) -> Result<Vec<u64>> {
        let namespace = &self.config.namespace;
        self.tracker.bootstrap(db).await?;
        let records = self.tracker.records(db, namespace).await?;
        let units = self.units()?;

        // Check everything before reverting anything.
        let mut plan = Vec::new();
        for record in records.values().rev().filter(|r| r.version > target) {
            let unit = units
                .get(&record.version)
                .ok_or_else(|| Error::UnknownMigration {
                    namespace: namespace.clone(),
                    version: record.version,
                })?;
            let computed = unit.hash();
            if computed != record.hash {
                return Err(Error::Drift {
                    namespace: namespace.clone(),
                    version: unit.version,
                    recorded: record.hash.clone(),
                    computed,
                });
            }
            let down = unit
                .down_operations()
                .ok_or_else(|| Error::NoRollbackAvailable {
                    namespace: namespace.clone(),
                    version: unit.version,
                })?;
            plan.push((unit, down));
        }

        let mut reverted = Vec::new();
        for (unit, down) in plan {
            transaction(db, async {
                for op in &down {
                    db.batch_execute(&op.render(namespace)).await?;
                }
                self.tracker.delete(db, namespace, unit.version).await?;
                Ok(())
            })
            .await
            .map_err(|e| failed(unit, e))?;
            tracing::info!(
                namespace = %namespace,
                version = unit.version,
                label = %unit.label,
                "rolled back migration"
            );
            reverted.push(unit.version);
        }
        Ok(reverted)
    }
}

fn failed(unit: &MigrationUnit, source: Error) -> Error {
    Error::MigrationFailed {
        namespace: unit.namespace.clone(),
        version: unit.version,
        label: unit.label.clone(),
        source: Box::new(source),
    }
}
