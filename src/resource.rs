//! Immutable resource descriptor derived from the route's kind and table token.

use crate::error::AppError;
use crate::inflect::{pluralize, singularize};

/// Route family. Decides how a token like "product" maps to a table name and labels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResourceKind {
    /// Table is the plural token itself: "product" -> "products".
    Catalog,
    /// "product" -> "product_comments".
    Comment,
    /// "product" -> "product_groups".
    Group,
    /// "product" -> "product_items".
    Item,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 4] = [
        ResourceKind::Catalog,
        ResourceKind::Comment,
        ResourceKind::Group,
        ResourceKind::Item,
    ];

    pub fn segment(&self) -> &'static str {
        match self {
            ResourceKind::Catalog => "catalog",
            ResourceKind::Comment => "comment",
            ResourceKind::Group => "group",
            ResourceKind::Item => "item",
        }
    }
}

impl std::str::FromStr for ResourceKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceKind::ALL
            .into_iter()
            .find(|k| k.segment() == s)
            .ok_or_else(|| AppError::BadRequest(format!("unknown resource kind: {}", s)))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resource {
    pub kind: ResourceKind,
    pub singular: String,
    pub plural: String,
    /// Physical table; also the directory name of the resource's documents.
    pub table: String,
    pub singular_label: String,
    pub plural_label: String,
}

impl Resource {
    pub fn new(kind: ResourceKind, token: &str) -> Result<Self, AppError> {
        let token = token.trim();
        if token.is_empty() || !token.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(AppError::BadRequest(format!("invalid resource name: {:?}", token)));
        }
        let singular = singularize(token);
        let plural = pluralize(token);
        let (table, singular_label, plural_label) = match kind {
            ResourceKind::Catalog => (plural.clone(), singular.clone(), plural.clone()),
            ResourceKind::Comment => (
                format!("{}_comments", singular),
                format!("{} comment", singular),
                format!("{} comments", singular),
            ),
            ResourceKind::Group => (
                format!("{}_groups", singular),
                format!("{} group", singular),
                format!("{} groups", singular),
            ),
            ResourceKind::Item => (
                format!("{}_items", singular),
                format!("{} item", singular),
                format!("{} items", singular),
            ),
        };
        Ok(Resource {
            kind,
            singular,
            plural,
            table,
            singular_label,
            plural_label,
        })
    }

    /// Catalog resource, the common case.
    pub fn catalog(token: &str) -> Result<Self, AppError> {
        Self::new(ResourceKind::Catalog, token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_uses_plural_table() {
        let r = Resource::catalog("product").unwrap();
        assert_eq!(r.table, "products");
        assert_eq!(r.singular_label, "product");
        assert_eq!(r.plural_label, "products");
        assert_eq!(Resource::catalog("products").unwrap(), r);
    }

    #[test]
    fn comment_group_item_tables() {
        let c = Resource::new(ResourceKind::Comment, "products").unwrap();
        assert_eq!(c.table, "product_comments");
        assert_eq!(c.plural_label, "product comments");
        let g = Resource::new(ResourceKind::Group, "product").unwrap();
        assert_eq!(g.table, "product_groups");
        let i = Resource::new(ResourceKind::Item, "categories").unwrap();
        assert_eq!(i.table, "category_items");
        assert_eq!(i.singular_label, "category item");
    }

    #[test]
    fn rejects_injection_tokens() {
        assert!(Resource::catalog("products; drop table x").is_err());
        assert!(Resource::catalog("../etc").is_err());
        assert!(Resource::catalog("").is_err());
    }

    #[test]
    fn kind_from_segment() {
        assert_eq!("comment".parse::<ResourceKind>().unwrap(), ResourceKind::Comment);
        assert!("review".parse::<ResourceKind>().is_err());
    }
}
