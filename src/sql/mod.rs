//! Safe SQL: identifiers from validated documents only, values as parameters.

pub mod builder;
pub mod params;
mod select;
pub use builder::QueryBuf;
pub use params::*;
pub use select::*;
