//! An in-memory executor that records statements and emulates the
//! migration tracking table.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::Utc;
use tally::{BoxFuture, Error, Executor, Result, Row, Value};

#[derive(Debug, Clone)]
struct Record {
    namespace: String,
    version: i64,
    hash: String,
    label: String,
}

impl Record {
    fn to_row(&self) -> Row {
        [
            ("namespace", Value::from(self.namespace.as_str())),
            ("version", Value::I64(self.version)),
            ("hash", Value::from(self.hash.as_str())),
            ("label", Value::from(self.label.as_str())),
            ("applied_at", Value::Timestamp(Utc::now())),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
    }
}

#[derive(Default)]
struct State {
    log: Vec<(String, Vec<Value>)>,
    responses: VecDeque<Vec<Row>>,
    affected: u64,
    tracker_exists: bool,
    records: Vec<Record>,
    snapshot: Option<Vec<Record>>,
    fail_on: Vec<String>,
}

#[derive(Default)]
pub struct FakeDb {
    state: Mutex<State>,
    actor: Option<String>,
}

pub fn row(pairs: &[(&str, Value)]) -> Row {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

impl FakeDb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_actor(mut self, actor: &str) -> Self {
        self.actor = Some(actor.to_string());
        self
    }

    /// Rows returned by the next non-tracker query.
    pub fn respond(&self, rows: Vec<Row>) {
        self.state.lock().unwrap().responses.push_back(rows);
    }

    pub fn set_affected(&self, n: u64) {
        self.state.lock().unwrap().affected = n;
    }

    /// Fail every statement containing `needle`.
    pub fn fail_on(&self, needle: &str) {
        self.state.lock().unwrap().fail_on.push(needle.to_string());
    }

    pub fn clear_failures(&self) {
        self.state.lock().unwrap().fail_on.clear();
    }

    pub fn clear_log(&self) {
        self.state.lock().unwrap().log.clear();
    }

    /// Every statement so far, in order.
    pub fn statements(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state.log.iter().map(|(sql, _)| sql.clone()).collect()
    }

    pub fn params(&self, index: usize) -> Vec<Value> {
        self.state.lock().unwrap().log[index].1.clone()
    }

    /// Statements containing `needle`.
    pub fn matching(&self, needle: &str) -> Vec<String> {
        self.statements()
            .into_iter()
            .filter(|s| s.contains(needle))
            .collect()
    }

    /// Statements beginning with `prefix`.
    pub fn starting_with(&self, prefix: &str) -> Vec<String> {
        self.statements()
            .into_iter()
            .filter(|s| s.starts_with(prefix))
            .collect()
    }

    /// Recorded versions of `namespace`, ascending.
    pub fn recorded(&self, namespace: &str) -> Vec<u64> {
        let state = self.state.lock().unwrap();
        let mut versions: Vec<u64> = state
            .records
            .iter()
            .filter(|r| r.namespace == namespace)
            .map(|r| r.version as u64)
            .collect();
        versions.sort();
        versions
    }

    pub fn recorded_hash(&self, namespace: &str, version: u64) -> Option<String> {
        let state = self.state.lock().unwrap();
        state
            .records
            .iter()
            .find(|r| r.namespace == namespace && r.version == version as i64)
            .map(|r| r.hash.clone())
    }

    /// Plant a tracking record directly.
    pub fn record(&self, namespace: &str, version: u64, hash: &str, label: &str) {
        let mut state = self.state.lock().unwrap();
        state.tracker_exists = true;
        state.records.push(Record {
            namespace: namespace.to_string(),
            version: version as i64,
            hash: hash.to_string(),
            label: label.to_string(),
        });
    }

    fn enter(&self, sql: &str, params: &[Value]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.log.push((sql.to_string(), params.to_vec()));
        if state.fail_on.iter().any(|needle| sql.contains(needle.as_str())) {
            return Err(Error::Database(format!("injected failure: {sql}")));
        }
        Ok(())
    }

    fn handle_query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.enter(sql, params)?;
        let mut state = self.state.lock().unwrap();
        if sql.contains("to_regclass") {
            return Ok(vec![row(&[("present", Value::Bool(state.tracker_exists))])]);
        }
        if sql.contains("_tally_migrations") {
            let namespace = params.first().and_then(Value::as_str).unwrap_or_default();
            let version = params.get(1).and_then(Value::as_i64);
            let mut found: Vec<Record> = state
                .records
                .iter()
                .filter(|r| r.namespace == namespace && version.is_none_or(|v| r.version == v))
                .cloned()
                .collect();
            found.sort_by_key(|r| r.version);
            return Ok(found.iter().map(Record::to_row).collect());
        }
        Ok(state.responses.pop_front().unwrap_or_default())
    }

    fn handle_execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        self.enter(sql, params)?;
        let mut state = self.state.lock().unwrap();
        if sql.contains("_tally_migrations") {
            let text = |i: usize| {
                params
                    .get(i)
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string()
            };
            let version = params.get(1).and_then(Value::as_i64).unwrap_or_default();
            if sql.starts_with("INSERT") {
                state.records.push(Record {
                    namespace: text(0),
                    version,
                    hash: text(2),
                    label: text(3),
                });
                return Ok(1);
            }
            if sql.starts_with("DELETE") {
                let namespace = text(0);
                let before = state.records.len();
                state
                    .records
                    .retain(|r| !(r.namespace == namespace && r.version == version));
                return Ok((before - state.records.len()) as u64);
            }
        }
        if sql.contains("pg_advisory") {
            return Ok(1);
        }
        Ok(state.affected)
    }

    fn handle_batch(&self, sql: &str) -> Result<()> {
        self.enter(sql, &[])?;
        let mut state = self.state.lock().unwrap();
        match sql {
            "BEGIN" => state.snapshot = Some(state.records.clone()),
            "COMMIT" => state.snapshot = None,
            "ROLLBACK" => {
                if let Some(records) = state.snapshot.take() {
                    state.records = records;
                }
            }
            _ if sql.contains("CREATE TABLE IF NOT EXISTS") && sql.contains("_tally_migrations") => {
                state.tracker_exists = true
            }
            _ => {}
        }
        Ok(())
    }
}

impl Executor for FakeDb {
    fn execute<'a>(&'a self, sql: &'a str, params: &'a [Value]) -> BoxFuture<'a, Result<u64>> {
        Box::pin(async move { self.handle_execute(sql, params) })
    }

    fn query<'a>(&'a self, sql: &'a str, params: &'a [Value]) -> BoxFuture<'a, Result<Vec<Row>>> {
        Box::pin(async move { self.handle_query(sql, params) })
    }

    fn batch_execute<'a>(&'a self, sql: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move { self.handle_batch(sql) })
    }

    fn actor(&self) -> Option<&str> {
        self.actor.as_deref()
    }
}
