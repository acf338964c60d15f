//! Condition strategies polled by a [`Watcher`](crate::Watcher).
//!
//! A strategy owns everything needed to evaluate one condition: the SQL
//! text, its bound parameters, the compiled statement, and the test that
//! decides whether a returned row satisfies the condition. The watcher
//! drives it through [`ConditionQuery`] and never inspects its internals.

mod param;
mod row_query;

use std::fmt;

use async_trait::async_trait;
use sqlx::AnyPool;
use sqlx::any::AnyRow;

use crate::error::Result;

pub use param::SqlParam;
pub use row_query::{RowPredicate, RowQuery, exists, once};

/// Outcome of a single successful poll.
pub enum Attempt {
    /// The condition holds; the row is handed to the caller.
    Satisfied(AnyRow),
    /// The query ran but the condition does not hold yet. This is the
    /// steady state while waiting and is never reported as an error.
    Pending,
}

impl Attempt {
    /// Whether the condition held on this attempt.
    pub fn is_satisfied(&self) -> bool {
        matches!(self, Self::Satisfied(_))
    }
}

impl fmt::Debug for Attempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Satisfied(row) => f
                .debug_struct("Satisfied")
                .field("columns", &sqlx::Row::len(row))
                .finish(),
            Self::Pending => f.write_str("Pending"),
        }
    }
}

/// Lifecycle every condition strategy follows under a watcher:
/// `prepare` once, `attempt` any number of times (strictly serially),
/// then `close` once.
#[async_trait]
pub trait ConditionQuery: Send {
    /// Compile the query against `store`. A failure here is fatal to the
    /// watcher, which reports it and stops without polling.
    async fn prepare(&mut self, store: &AnyPool) -> Result<()>;

    /// Run the compiled query and evaluate the condition.
    ///
    /// "No matching row" must come back as [`Attempt::Pending`]; any other
    /// execution or decode failure is an error.
    async fn attempt(&mut self, store: &AnyPool) -> Result<Attempt>;

    /// Release the compiled statement. Must tolerate being called on a
    /// strategy whose `prepare` never succeeded.
    fn close(&mut self);
}

#[async_trait]
impl<Q> ConditionQuery for Box<Q>
where
    Q: ConditionQuery + ?Sized,
{
    async fn prepare(&mut self, store: &AnyPool) -> Result<()> {
        (**self).prepare(store).await
    }

    async fn attempt(&mut self, store: &AnyPool) -> Result<Attempt> {
        (**self).attempt(store).await
    }

    fn close(&mut self) {
        (**self).close();
    }
}
