//! Copy values from a stored row or a request body into the slots of a document template.

use crate::config::{Document, Row};

/// Fill `template` from `source`: each slot reads its source column; absent keys keep the default.
/// Explicit nulls overwrite.
pub fn shift(template: &mut Row, source: &Row, doc: Option<&Document>) {
    for (field, slot) in template.iter_mut() {
        let column = doc.map(|d| d.column_for(field)).unwrap_or(field);
        if let Some(v) = source.get(column) {
            *slot = v.clone();
        }
    }
}

/// One shaped row per source row, each starting from a fresh copy of the template.
pub fn shift_many(template: &Row, sources: &[Row], doc: Option<&Document>) -> Vec<Row> {
    sources
        .iter()
        .map(|source| {
            let mut row = template.clone();
            shift(&mut row, source, doc);
            row
        })
        .collect()
}

/// Drop top-level null values. Nested payloads are left alone.
pub fn strip_nulls(row: &mut Row) {
    row.retain(|_, v| !v.is_null());
}
