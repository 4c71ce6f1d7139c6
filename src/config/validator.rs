//! Document validation: identifier safety, relation references and has-many dependency order.

use crate::config::resolved::{Document, HasMany};
use crate::config::DuplicateConfig;
use crate::error::ConfigError;
use std::collections::HashSet;

/// Table and column names are interpolated (quoted) into SQL, so only plain identifiers are accepted.
pub fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn malformed(path: &str, reason: String) -> ConfigError {
    ConfigError::Malformed {
        path: path.to_string(),
        reason,
    }
}

fn check_ident(path: &str, what: &str, s: &str) -> Result<(), ConfigError> {
    if is_identifier(s) {
        Ok(())
    } else {
        Err(malformed(path, format!("{} `{}` is not a valid identifier", what, s)))
    }
}

/// Reorder groups so every group follows its parent. Stable for independent groups.
/// Fails on unknown parents and cycles.
pub fn sort_groups(path: &str, groups: &mut Vec<HasMany>) -> Result<(), ConfigError> {
    let names: HashSet<&str> = groups.iter().map(|g| g.name.as_str()).collect();
    for g in groups.iter() {
        if let Some(parent) = &g.parent {
            if !names.contains(parent.as_str()) {
                return Err(malformed(path, format!("has_many `{}`: unknown parent group `{}`", g.name, parent)));
            }
            if parent == &g.name {
                return Err(malformed(path, format!("has_many `{}` cannot be its own parent", g.name)));
            }
        }
    }
    let mut remaining: Vec<HasMany> = std::mem::take(groups);
    let mut placed: HashSet<String> = HashSet::new();
    while !remaining.is_empty() {
        let before = remaining.len();
        let mut rest = Vec::with_capacity(remaining.len());
        for g in remaining {
            let ready = g.parent.as_ref().map(|p| placed.contains(p)).unwrap_or(true);
            if ready {
                placed.insert(g.name.clone());
                groups.push(g);
            } else {
                rest.push(g);
            }
        }
        if rest.len() == before {
            let names: Vec<_> = rest.iter().map(|g| g.name.as_str()).collect();
            return Err(malformed(path, format!("has_many parent cycle among {:?}", names)));
        }
        remaining = rest;
    }
    Ok(())
}

pub fn validate(path: &str, doc: &Document) -> Result<(), ConfigError> {
    for field in doc.template.keys() {
        check_ident(path, "field", field)?;
    }
    for col in doc.columns.values() {
        check_ident(path, "column", col)?;
    }

    for b in &doc.belongs_to {
        check_ident(path, "table", &b.table)?;
        check_ident(path, "column", &b.fk)?;
        check_ident(path, "column", &b.key)?;
        for f in b.fields.keys() {
            check_ident(path, "column", f)?;
        }
    }

    let mut seen: HashSet<&str> = HashSet::new();
    let mut group_names: HashSet<&str> = HashSet::new();
    for g in &doc.has_many {
        check_ident(path, "table", &g.table)?;
        check_ident(path, "column", &g.fk)?;
        if let Some(parent) = &g.parent {
            if !seen.contains(parent.as_str()) {
                return Err(malformed(path, format!("has_many `{}` is not after its parent `{}`", g.name, parent)));
            }
        }
        seen.insert(g.name.as_str());
        group_names.insert(g.name.as_str());
    }
    for g in &doc.many_to_many {
        check_ident(path, "table", &g.config.table)?;
        check_ident(path, "column", &g.config.fk_1)?;
        check_ident(path, "column", &g.config.fk_2)?;
        check_ident(path, "column", &g.config.target_key)?;
        if let Some(t) = &g.config.target {
            check_ident(path, "table", t)?;
        }
        if !group_names.insert(g.name.as_str()) {
            return Err(malformed(path, format!("group `{}` declared twice", g.name)));
        }
    }
    for b in &doc.belongs_to {
        if group_names.contains(b.field.as_str()) {
            return Err(malformed(path, format!("field `{}` is both a group and a belongs_to", b.field)));
        }
    }

    for f in doc.filterable.iter().chain(doc.searchable.iter()) {
        match f.split_once('.') {
            Some((alias, column)) => {
                if doc.belongs_to_field(alias).is_none() {
                    return Err(malformed(path, format!("`{}` refers to unknown belongs_to `{}`", f, alias)));
                }
                check_ident(path, "column", column)?;
            }
            None => check_ident(path, "field", f)?,
        }
    }
    for f in &doc.summary {
        check_ident(path, "summary field", f)?;
    }
    for (field, rule) in &doc.rules {
        if let Some(pattern) = &rule.pattern {
            pattern
                .regex()
                .map_err(|e| malformed(path, format!("field `{}`: invalid pattern: {}", field, e)))?;
        }
    }

    if let Some(tree) = &doc.tree {
        check_ident(path, "column", &tree.parent_key)?;
        check_ident(path, "field", &tree.field)?;
    }

    if let Some(DuplicateConfig::Groups(rules)) = &doc.duplicate {
        for (group, rule) in rules {
            match doc.has_many_group(group) {
                Some(g) if g.parent.is_none() => {}
                Some(_) => return Err(malformed(path, format!("duplicate: `{}` is a nested group", group))),
                None => return Err(malformed(path, format!("duplicate: unknown has_many group `{}`", group))),
            }
            if rule.values.is_some() && rule.from.is_some() {
                return Err(malformed(path, format!("duplicate `{}`: `values` and `from` are exclusive", group)));
            }
            if (rule.values.is_some() || rule.from.is_some()) && rule.key.is_none() {
                return Err(malformed(path, format!("duplicate `{}`: `key` is required with `values`/`from`", group)));
            }
        }
    }
    Ok(())
}
