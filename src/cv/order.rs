//! Reindexing predictions to an externally recorded key order.

use std::collections::HashSet;

use super::{CvError, PredictionTable, RowOrder};
use crate::dataset::RecordKey;

const MAX_LISTED_KEYS: usize = 5;

/// Reorder `table` to `canonical`, which must hold exactly the table's keys once each.
///
/// `None` returns the table unchanged.
pub fn restore_order(
    mut table: PredictionTable,
    canonical: Option<&[RecordKey]>,
) -> Result<PredictionTable, CvError> {
    let Some(canonical) = canonical else {
        return Ok(table);
    };

    let mut seen = HashSet::with_capacity(canonical.len());
    let mut positions = Vec::with_capacity(canonical.len());
    let mut unknown = Vec::new();
    let mut repeated = Vec::new();
    for key in canonical {
        if !seen.insert(key) {
            repeated.push(key);
            continue;
        }
        match table.position(key) {
            Some(pos) => positions.push(pos),
            None => unknown.push(key),
        }
    }
    let missing: Vec<&RecordKey> = table.keys().filter(|key| !seen.contains(key)).collect();

    if !unknown.is_empty() || !repeated.is_empty() || !missing.is_empty() {
        let mut problems = Vec::new();
        if canonical.len() != table.len() {
            problems.push(format!(
                "{} canonical keys for {} predictions",
                canonical.len(),
                table.len()
            ));
        }
        if !unknown.is_empty() {
            problems.push(format!("unknown keys {}", list_keys(&unknown)));
        }
        if !missing.is_empty() {
            problems.push(format!("keys without a canonical position {}", list_keys(&missing)));
        }
        if !repeated.is_empty() {
            problems.push(format!("repeated keys {}", list_keys(&repeated)));
        }
        return Err(CvError::OrderMismatch(problems.join("; ")));
    }

    table.reorder(&positions, RowOrder::Canonical);
    Ok(table)
}

fn list_keys(keys: &[&RecordKey]) -> String {
    let mut listed = keys
        .iter()
        .take(MAX_LISTED_KEYS)
        .map(|key| key.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    if keys.len() > MAX_LISTED_KEYS {
        listed.push_str(&format!(" and {} more", keys.len() - MAX_LISTED_KEYS));
    }
    listed
}
