//! Storage seam. Services talk to an [`Executor`]; writes run on a [`Transaction`] handed out by a [`Store`].

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::{row_to_map, PgStore};

use crate::config::Row;
use crate::error::AppError;
use crate::sql::{Predicate, Select};
use async_trait::async_trait;

/// Runs queries on one connection (or one open transaction).
#[async_trait]
pub trait Executor: Send {
    async fn fetch_all(&mut self, select: &Select) -> Result<Vec<Row>, AppError>;

    async fn fetch_optional(&mut self, select: &Select) -> Result<Option<Row>, AppError> {
        let mut one = select.clone();
        one.limit = Some(1);
        Ok(self.fetch_all(&one).await?.into_iter().next())
    }

    /// Number of rows `select` matches, ignoring order and paging.
    async fn count(&mut self, select: &Select) -> Result<u64, AppError>;

    /// Insert one row and return it as stored (generated columns included).
    async fn insert(&mut self, table: &str, row: &Row) -> Result<Row, AppError>;

    /// Set `row`'s columns on every row matching `filter`. Returns the number of matched rows;
    /// an empty `row` changes nothing and only counts.
    async fn update(&mut self, table: &str, filter: &Predicate, row: &Row) -> Result<u64, AppError>;

    async fn delete(&mut self, table: &str, filter: &Predicate) -> Result<u64, AppError>;
}

#[async_trait]
pub trait Transaction: Executor {
    async fn commit(self: Box<Self>) -> Result<(), AppError>;
    async fn rollback(self: Box<Self>) -> Result<(), AppError>;
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Autocommit executor for reads.
    async fn acquire(&self) -> Result<Box<dyn Executor>, AppError>;
    async fn begin(&self) -> Result<Box<dyn Transaction>, AppError>;
}
