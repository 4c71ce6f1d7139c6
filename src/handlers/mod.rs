//! HTTP handlers for document-driven resources.

pub mod resource;
pub use resource::*;
