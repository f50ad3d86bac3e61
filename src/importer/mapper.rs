//! Column-to-field mapping
//!
//! Mapped keys are overlaid onto the original row, so unmapped original
//! columns stay available to later stages such as meta-field capture.

use std::collections::HashMap;

use crate::models::Row;

/// Apply a column mapping to a row, producing a new merged row. Pure: the
/// result is derivable from the row and mapping alone, and the input row is
/// never touched. Mapping pairs are applied in sorted source-column order so
/// two sources mapping to the same target resolve deterministically.
pub fn apply(row: &Row, mapping: &HashMap<String, String>) -> Row {
    if mapping.is_empty() {
        return row.clone();
    }

    let mut values = row.values.clone();
    let mut pairs: Vec<(&String, &String)> = mapping.iter().collect();
    pairs.sort();

    for (source_column, target_field) in pairs {
        if target_field.trim().is_empty() {
            continue;
        }
        if let Some(value) = row.values.get(source_column) {
            values.insert(target_field.clone(), value.clone());
        }
    }

    Row {
        number: row.number,
        values,
    }
}
