//! An in-memory `ConnectionPool`/`Transaction` double, grounded in the
//! teacher's `test_harness.rs` style of giving integration tests a
//! realistic but dependency-free stand-in for the live database. Good
//! enough to exercise Loader/Saver/Deleter/ExclusiveAllocator behavior
//! without a real connection.
//!
//! Not a SQL engine: interprets `db::Op` directly against in-memory
//! tables, including a small evaluator for `Filter::Raw` clauses of the
//! `COL = 'val'` / `COL >= 'val'` / `COL IS NULL` / `COL IN (...)` /
//! `A AND B` shapes this crate's own callers produce.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::db::{ConnectionPool, Filter, Op, OpResult, Transaction};
use crate::error::{PersistError, Result};
use crate::value::{FieldValue, Row};

pub type TableRow = BTreeMap<String, FieldValue>;

#[derive(Default, Clone)]
struct Database {
    tables: BTreeMap<String, Vec<TableRow>>,
}

/// A shared in-memory database. Clone to get another handle to the same
/// underlying tables (mirrors a connection pool sharing one backing
/// store).
#[derive(Clone, Default)]
pub struct InMemoryPool {
    inner: Arc<Mutex<Database>>,
    /// Fault injection: every `Op::Update` touching this `(table, column)`
    /// pair fails instead of applying, until cleared. Models a column-level
    /// constraint a real database would reject consistently (e.g. a CHECK
    /// constraint), so Saver's per-column recovery path can be exercised
    /// without a real database to report the write failure.
    fail_column_update: Arc<Mutex<Option<(String, String)>>>,
}

impl InMemoryPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a table, replacing any existing rows. Useful for pre-loading
    /// schema-binding fixtures or a known starting state.
    pub fn seed_table(&self, name: impl Into<String>, rows: Vec<TableRow>) {
        self.inner.lock().unwrap().tables.insert(name.into(), rows);
    }

    pub fn snapshot_table(&self, name: &str) -> Vec<TableRow> {
        self.inner.lock().unwrap().tables.get(name).cloned().unwrap_or_default()
    }

    pub fn row_count(&self, name: &str) -> usize {
        self.snapshot_table(name).len()
    }

    /// Arms fault injection: every update that writes to `column` on
    /// `table` fails instead of applying, until the pool is dropped.
    pub fn fail_updates_to(&self, table: impl Into<String>, column: impl Into<String>) {
        *self.fail_column_update.lock().unwrap() = Some((table.into(), column.into()));
    }
}

#[async_trait]
impl ConnectionPool for InMemoryPool {
    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        Ok(Box::new(InMemoryTransaction {
            pool: self.inner.clone(),
            fail_column_update: self.fail_column_update.clone(),
            staged: Database::default(),
            committed: false,
        }))
    }
}

/// A transaction stages its writes locally and applies them to the shared
/// database only on commit, so a caller that rolls back (or drops the
/// transaction) leaves the shared state untouched — this is what lets
/// Saver's partial-failure recovery and Deleter's rollback-on-veto tests
/// observe "nothing changed" after an aborted operation.
struct InMemoryTransaction {
    pool: Arc<Mutex<Database>>,
    fail_column_update: Arc<Mutex<Option<(String, String)>>>,
    staged: Database,
    committed: bool,
}

impl InMemoryTransaction {
    fn visible_table(&self, name: &str) -> Vec<TableRow> {
        if let Some(rows) = self.staged.tables.get(name) {
            return rows.clone();
        }
        self.pool.lock().unwrap().tables.get(name).cloned().unwrap_or_default()
    }

    fn matches(row: &TableRow, filter: &Filter) -> Result<bool> {
        Ok(match filter {
            Filter::All => true,
            Filter::Eq(col, value) => row.get(col).unwrap_or(&FieldValue::Null) == value,
            Filter::In(col, values) => {
                let actual = row.get(col).unwrap_or(&FieldValue::Null);
                values.iter().any(|v| v == actual)
            }
            Filter::And(parts) => {
                for p in parts {
                    if !Self::matches(row, p)? {
                        return Ok(false);
                    }
                }
                true
            }
            Filter::Raw(clause) => eval_raw_clause(row, clause)?,
        })
    }
}

#[async_trait]
impl Transaction for InMemoryTransaction {
    async fn run(&mut self, op: &Op) -> Result<OpResult> {
        match op {
            Op::Select {
                table,
                columns,
                filter,
                order_by,
                limit,
            } => {
                let mut rows: Vec<TableRow> = self
                    .visible_table(table)
                    .into_iter()
                    .map(|r| Ok((r.clone(), Self::matches(&r, filter)?)))
                    .collect::<Result<Vec<_>>>()?
                    .into_iter()
                    .filter_map(|(r, keep)| keep.then_some(r))
                    .collect();

                if let Some((col, ascending)) = order_by {
                    rows.sort_by(|a, b| {
                        let av = a.get(col).cloned().unwrap_or(FieldValue::Null);
                        let bv = b.get(col).cloned().unwrap_or(FieldValue::Null);
                        let ord = compare_values(&av, &bv);
                        if *ascending {
                            ord
                        } else {
                            ord.reverse()
                        }
                    });
                }
                if let Some(limit) = limit {
                    rows.truncate(*limit);
                }

                let projected = rows
                    .into_iter()
                    .map(|r| {
                        if columns.is_empty() {
                            Row(r)
                        } else {
                            Row(r
                                .into_iter()
                                .filter(|(k, _)| columns.contains(k))
                                .collect())
                        }
                    })
                    .collect();
                Ok(OpResult { rows: projected, rows_affected: 0 })
            }
            Op::Insert { table, values } => {
                let staged = self.staged.tables.entry(table.clone()).or_insert_with(|| {
                    self.pool.lock().unwrap().tables.get(table).cloned().unwrap_or_default()
                });
                staged.push(values.clone());
                Ok(OpResult { rows: vec![], rows_affected: 1 })
            }
            Op::Update { table, set, filter } => {
                if let Some((fail_table, fail_column)) = self.fail_column_update.lock().unwrap().clone() {
                    if table == &fail_table && set.contains_key(&fail_column) {
                        return Err(PersistError::Persistence(format!(
                            "injected failure writing {fail_table}.{fail_column}"
                        )));
                    }
                }
                let existing = self.visible_table(table);
                let staged = self.staged.tables.entry(table.clone()).or_insert_with(Vec::new);
                *staged = existing;
                let mut affected = 0u64;
                for row in staged.iter_mut() {
                    if Self::matches(row, filter)? {
                        for (k, v) in set {
                            row.insert(k.clone(), v.clone());
                        }
                        affected += 1;
                    }
                }
                Ok(OpResult { rows: vec![], rows_affected: affected })
            }
            Op::Delete { table, filter } => {
                let existing = self.visible_table(table);
                let before = existing.len();
                let retained: Vec<TableRow> = existing
                    .into_iter()
                    .map(|r| Ok((r.clone(), Self::matches(&r, filter)?)))
                    .collect::<Result<Vec<_>>>()?
                    .into_iter()
                    .filter_map(|(r, remove)| (!remove).then_some(r))
                    .collect();
                let affected = (before - retained.len()) as u64;
                self.staged.tables.insert(table.clone(), retained);
                Ok(OpResult { rows: vec![], rows_affected: affected })
            }
            Op::Raw { sql, .. } => Err(PersistError::Persistence(format!(
                "in-memory testkit cannot execute raw SQL: {sql}"
            ))),
        }
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        let mut db = self.pool.lock().unwrap();
        for (table, rows) in self.staged.tables.drain() {
            db.tables.insert(table, rows);
        }
        self.committed = true;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

fn compare_values(a: &FieldValue, b: &FieldValue) -> std::cmp::Ordering {
    a.canonical_key().cmp(&b.canonical_key())
}

/// Evaluates a small subset of SQL WHERE-clause grammar: `AND`-joined
/// predicates of the form `COL = literal`, `COL IS [NOT] NULL`, and
/// `COL IN (lit, lit, ...)`, column names matching this crate's own
/// canonical naming. Sufficient for the caller-supplied predicates this
/// crate's own tests issue; not a general SQL parser.
fn eval_raw_clause(row: &TableRow, clause: &str) -> Result<bool> {
    for part in clause.split(" AND ") {
        let part = part.trim();
        if !eval_predicate(row, part)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn eval_predicate(row: &TableRow, predicate: &str) -> Result<bool> {
    let upper = predicate.to_ascii_uppercase();
    if let Some(col) = upper.strip_suffix("IS NOT NULL") {
        let col = col.trim();
        return Ok(!matches!(row.get(col).unwrap_or(&FieldValue::Null), FieldValue::Null));
    }
    if let Some(col) = upper.strip_suffix("IS NULL") {
        let col = col.trim();
        return Ok(matches!(row.get(col).unwrap_or(&FieldValue::Null), FieldValue::Null));
    }
    if let Some(idx) = predicate.find(" IN ") {
        let col = predicate[..idx].trim();
        let list = predicate[idx + 4..].trim().trim_start_matches('(').trim_end_matches(')');
        let actual = row.get(col).unwrap_or(&FieldValue::Null);
        return Ok(list.split(',').any(|lit| values_equal(actual, lit.trim())));
    }
    // Order matters: ">="/"<=" both contain '=', so they have to be checked
    // before the bare-equality branch below.
    if let Some(idx) = predicate.find(">=") {
        let col = predicate[..idx].trim();
        let lit = predicate[idx + 2..].trim();
        return Ok(values_compare(row.get(col).unwrap_or(&FieldValue::Null), lit).map(|o| o.is_ge()).unwrap_or(false));
    }
    if let Some(idx) = predicate.find("<=") {
        let col = predicate[..idx].trim();
        let lit = predicate[idx + 2..].trim();
        return Ok(values_compare(row.get(col).unwrap_or(&FieldValue::Null), lit).map(|o| o.is_le()).unwrap_or(false));
    }
    if let Some(idx) = predicate.find('=') {
        let col = predicate[..idx].trim();
        let lit = predicate[idx + 1..].trim();
        let actual = row.get(col).unwrap_or(&FieldValue::Null);
        return Ok(values_equal(actual, lit));
    }
    Err(PersistError::Persistence(format!(
        "in-memory testkit cannot evaluate predicate: {predicate}"
    )))
}

/// Ordering comparison for the `>=`/`<=` predicates the Loader's
/// data-horizon cutoff filter produces (`LAST_MODIFIED >= '<rfc3339>'`).
fn values_compare(actual: &FieldValue, literal: &str) -> Option<std::cmp::Ordering> {
    let quoted = literal.strip_prefix('\'').and_then(|s| s.strip_suffix('\''));
    if let (FieldValue::DateTime(actual), Some(literal)) = (actual, quoted) {
        let parsed = chrono::DateTime::parse_from_rfc3339(literal).ok()?;
        return Some(actual.cmp(&parsed.with_timezone(&chrono::Utc)));
    }
    if let Some(literal) = quoted {
        if let FieldValue::Text(actual) = actual {
            return Some(actual.as_str().cmp(literal));
        }
    }
    if let Ok(n) = literal.parse::<i64>() {
        let actual = match actual {
            FieldValue::BigInt(v) => *v,
            FieldValue::Int(v) => *v as i64,
            FieldValue::SmallInt(v) => *v as i64,
            _ => return None,
        };
        return Some(actual.cmp(&n));
    }
    None
}

fn values_equal(actual: &FieldValue, literal: &str) -> bool {
    if let Some(inner) = literal.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')) {
        return matches!(actual, FieldValue::Text(s) if s == inner)
            || matches!(actual, FieldValue::Enum(s) if s == inner);
    }
    if let Ok(n) = literal.parse::<i64>() {
        return match actual {
            FieldValue::BigInt(v) => *v == n,
            FieldValue::Int(v) => *v as i64 == n,
            FieldValue::SmallInt(v) => *v as i64 == n,
            FieldValue::Reference(Some(v)) => *v == n as u64,
            _ => false,
        };
    }
    false
}
