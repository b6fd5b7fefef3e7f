//! The connection/pooling boundary. Spec §1 scopes "connection pooling and
//! raw SQL execution helpers" out of the core as an external collaborator,
//! and explicitly has no expression DSL (§1 Non-goals: "callers provide a
//! raw predicate clause as a string"). The core therefore issues
//! *structured* operations (`Op`) rather than hand-assembled SQL text —
//! that keeps it dialect-agnostic — with a `Filter::Raw` escape hatch for
//! caller-supplied WHERE clauses (spec §6 WHERE clause surface). A real
//! adapter renders `Op` to text via the bound `Dialect` (e.g. over
//! `sqlx::AnyPool`, matching the teacher's `database::DatabaseManager`
//! wrapping `PgPool`); the in-memory `testkit` interprets `Op` directly.

use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::error::Result;
use crate::value::{FieldValue, Row};

#[derive(Debug, Clone)]
pub enum Filter {
    All,
    Eq(String, FieldValue),
    In(String, Vec<FieldValue>),
    /// A caller-supplied predicate clause, used verbatim against the
    /// bound dialect's naming convention (spec §6).
    Raw(String),
    And(Vec<Filter>),
}

#[derive(Debug, Clone)]
pub enum Op {
    Select {
        table: String,
        columns: Vec<String>,
        filter: Filter,
        order_by: Option<(String, bool)>,
        limit: Option<usize>,
    },
    Insert {
        table: String,
        values: BTreeMap<String, FieldValue>,
    },
    Update {
        table: String,
        set: BTreeMap<String, FieldValue>,
        filter: Filter,
    },
    Delete {
        table: String,
        filter: Filter,
    },
    /// Escape hatch for operations with no natural structured form
    /// (sequence bumps, advisory-style coordination).
    Raw {
        sql: String,
        params: Vec<FieldValue>,
    },
}

#[derive(Debug, Clone, Default)]
pub struct OpResult {
    pub rows: Vec<Row>,
    pub rows_affected: u64,
}

/// A live transaction. All persistence operations in this crate run
/// inside one (spec §5: "every persistence call ... performs blocking I/O
/// ... atomically via the enclosing transaction").
#[async_trait]
pub trait Transaction: Send {
    async fn run(&mut self, op: &Op) -> Result<OpResult>;
    async fn commit(self: Box<Self>) -> Result<()>;
    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Scoped acquisition of a connection/transaction from a pool, with
/// guaranteed release on all exit paths (spec §5).
#[async_trait]
pub trait ConnectionPool: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn Transaction>>;
}
