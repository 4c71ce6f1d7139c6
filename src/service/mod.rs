//! Request-time engine: validation, shifting, querying, relation resolution and writes.

mod crud;
pub mod query;
pub mod relations;
pub mod shift;
mod validation;
pub mod write;

pub use crud::{CrudService, Listing};
pub use query::{Pagination, QueryBuilder, QuerySummary};
pub use validation::RequestValidator;
pub use write::WriteMode;
