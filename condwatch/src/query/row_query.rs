use std::fmt;

use async_trait::async_trait;
use sqlx::AnyPool;
use sqlx::any::{AnyRow, AnyStatement};
use sqlx::{Executor, Row, Statement};
use tracing::trace;

use super::{Attempt, ConditionQuery, SqlParam};
use crate::error::{Result, WatchError};

/// Decides whether the row returned by a [`RowQuery`] satisfies it.
///
/// The set is closed on purpose: existence and projection cover the
/// built-in factories, and `Custom` takes a plain function so the
/// predicate stays free of captured state.
#[derive(Clone, Copy)]
pub enum RowPredicate {
    /// Any returned row satisfies the condition; its payload is ignored.
    Exists,
    /// Any returned row satisfies the condition; its columns are the payload.
    Projection,
    /// Caller-defined test over the returned row.
    Custom(fn(&AnyRow) -> std::result::Result<bool, sqlx::Error>),
}

impl RowPredicate {
    fn evaluate(&self, row: AnyRow) -> Result<Attempt> {
        let satisfied = match self {
            Self::Exists => {
                row.try_get_raw(0).map_err(WatchError::Attempt)?;
                true
            }
            Self::Projection => true,
            Self::Custom(test) => test(&row).map_err(WatchError::Attempt)?,
        };

        Ok(if satisfied {
            Attempt::Satisfied(row)
        } else {
            Attempt::Pending
        })
    }
}

impl fmt::Debug for RowPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exists => f.write_str("Exists"),
            Self::Projection => f.write_str("Projection"),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// A single-row condition query.
///
/// The SQL text and parameters are fixed at construction; only the
/// compiled statement changes, populated by `prepare` and dropped by
/// `close`.
pub struct RowQuery {
    sql: String,
    params: Vec<SqlParam>,
    predicate: RowPredicate,
    statement: Option<AnyStatement<'static>>,
}

/// Wait for at least one row of `table` matching `where_clause`.
///
/// Builds `SELECT 1 FROM <table> WHERE <where_clause> LIMIT 1`. The
/// delivered row carries no useful data; use [`once`] to read columns.
/// `table` and `where_clause` are spliced verbatim; only `params` are bound.
pub fn exists<I, P>(table: &str, where_clause: &str, params: I) -> RowQuery
where
    I: IntoIterator<Item = P>,
    P: Into<SqlParam>,
{
    RowQuery::select(table, "1", where_clause, RowPredicate::Exists)
        .bind_all(params)
}

/// Like [`exists`], but the delivered row carries `columns` of the
/// matching record, in order.
pub fn once<C, S, I, P>(
    table: &str,
    columns: C,
    where_clause: &str,
    params: I,
) -> RowQuery
where
    C: IntoIterator<Item = S>,
    S: AsRef<str>,
    I: IntoIterator<Item = P>,
    P: Into<SqlParam>,
{
    let projected = columns
        .into_iter()
        .map(|column| column.as_ref().to_string())
        .collect::<Vec<_>>()
        .join(",");
    let projected = if projected.is_empty() {
        "1".to_string()
    } else {
        projected
    };

    RowQuery::select(table, &projected, where_clause, RowPredicate::Projection)
        .bind_all(params)
}

impl RowQuery {
    /// Condition over arbitrary SQL returning at most one meaningful row.
    pub fn custom(sql: impl Into<String>, predicate: RowPredicate) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
            predicate,
            statement: None,
        }
    }

    fn select(
        table: &str,
        columns: &str,
        where_clause: &str,
        predicate: RowPredicate,
    ) -> Self {
        Self::custom(
            format!(
                "SELECT {columns} FROM {table} WHERE {where_clause} LIMIT 1"
            ),
            predicate,
        )
    }

    /// Append a parameter for the next placeholder.
    pub fn bind(mut self, value: impl Into<SqlParam>) -> Self {
        self.params.push(value.into());
        self
    }

    fn bind_all<I, P>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<SqlParam>,
    {
        self.params.extend(params.into_iter().map(Into::into));
        self
    }

    /// The SQL text sent to the store.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Bound parameters, in placeholder order.
    pub fn params(&self) -> &[SqlParam] {
        &self.params
    }

    /// Test applied to the returned row.
    pub fn predicate(&self) -> RowPredicate {
        self.predicate
    }

    /// Whether a compiled statement is currently held.
    pub fn is_prepared(&self) -> bool {
        self.statement.is_some()
    }
}

impl fmt::Debug for RowQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RowQuery")
            .field("sql", &self.sql)
            .field("params", &self.params)
            .field("predicate", &self.predicate)
            .field("prepared", &self.statement.is_some())
            .finish()
    }
}

#[async_trait]
impl ConditionQuery for RowQuery {
    async fn prepare(&mut self, store: &AnyPool) -> Result<()> {
        let statement = store
            .prepare(self.sql.as_str())
            .await
            .map_err(WatchError::Prepare)?;
        self.statement = Some(Statement::to_owned(&statement));
        trace!(sql = %self.sql, "prepared condition query");
        Ok(())
    }

    async fn attempt(&mut self, store: &AnyPool) -> Result<Attempt> {
        let statement =
            self.statement.as_ref().ok_or(WatchError::NotPrepared)?;

        let query = self
            .params
            .iter()
            .fold(statement.query(), |query, param| param.bind_to(query));

        match query
            .fetch_optional(store)
            .await
            .map_err(WatchError::Attempt)?
        {
            Some(row) => self.predicate.evaluate(row),
            None => Ok(Attempt::Pending),
        }
    }

    fn close(&mut self) {
        if self.statement.take().is_some() {
            trace!(sql = %self.sql, "released condition query");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exists_builds_limited_select() {
        let query = exists("tt", "id = ?", [1]);

        assert_eq!(query.sql(), "SELECT 1 FROM tt WHERE id = ? LIMIT 1");
        assert_eq!(query.params(), &[SqlParam::Int(1)]);
        assert!(matches!(query.predicate(), RowPredicate::Exists));
        assert!(!query.is_prepared());
    }

    #[test]
    fn once_projects_columns_in_order() {
        let query = once(
            "users",
            ["id", "name"],
            "name = ? AND active = ?",
            Vec::<SqlParam>::new(),
        )
        .bind("x")
        .bind(true);

        assert_eq!(
            query.sql(),
            "SELECT id,name FROM users WHERE name = ? AND active = ? LIMIT 1"
        );
        assert_eq!(
            query.params(),
            &[SqlParam::Text("x".into()), SqlParam::Bool(true)]
        );
        assert!(matches!(query.predicate(), RowPredicate::Projection));
    }

    #[test]
    fn once_without_columns_selects_constant() {
        let query = once("tt", Vec::<String>::new(), "1 = 1", [0i64]);

        assert_eq!(query.sql(), "SELECT 1 FROM tt WHERE 1 = 1 LIMIT 1");
        assert_eq!(query.params(), &[SqlParam::BigInt(0)]);
    }

    #[test]
    fn optional_params_bind_null() {
        let query = exists("tt", "id IS ?", [None::<i64>]);
        assert_eq!(query.params(), &[SqlParam::Null]);
    }

    #[test]
    fn close_on_unprepared_query_is_a_no_op() {
        let mut query = exists("tt", "id = ?", [1]);
        query.close();
        query.close();
        assert!(!query.is_prepared());
    }

    #[test]
    fn debug_output_hides_custom_predicate() {
        fn never(_: &AnyRow) -> std::result::Result<bool, sqlx::Error> {
            Ok(false)
        }

        let query = RowQuery::custom("SELECT 1", RowPredicate::Custom(never));
        let rendered = format!("{query:?}");

        assert!(rendered.contains("Custom(..)"));
        assert!(rendered.contains("prepared: false"));
    }
}
