//! CSV parsing with delimiter auto-detection
//!
//! The delimiter may be configured explicitly or as `auto`, in which case a
//! small set of common delimiters is probed against the leading lines and
//! the candidate yielding the most consistent column count wins.

use tracing::debug;

use crate::errors::{ImportError, ImportResult};
use crate::models::{CsvDocument, Row};

/// Delimiters probed by auto-detection, in preference order
const CANDIDATE_DELIMITERS: [char; 4] = [',', ';', '\t', '|'];

/// How many leading lines the detector samples
const DETECT_SAMPLE_LINES: usize = 10;

/// Parse CSV text into a document. `delimiter_setting` is "auto", "tab" or
/// a single character.
pub fn parse(text: &str, delimiter_setting: &str) -> ImportResult<CsvDocument> {
    let line_count = text.lines().filter(|l| !l.trim().is_empty()).count();
    if line_count < 2 {
        return Err(ImportError::parse(
            "file has fewer than 2 lines; a header and at least one data row are required",
        ));
    }

    let delimiter = resolve_delimiter(text, delimiter_setting)?;
    debug!("Parsing CSV with delimiter {:?}", delimiter);

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter as u8)
        .trim(csv::Trim::All)
        .flexible(true)
        .has_headers(true)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| ImportError::parse(format!("failed to read header: {e}")))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    if headers.iter().all(|h| h.is_empty()) {
        return Err(ImportError::parse("header line contains no column names"));
    }

    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result.map_err(|e| ImportError::parse(format!("malformed CSV: {e}")))?;

        // Skip blank lines and rows with no values at all
        if record.iter().all(|field| field.trim().is_empty()) {
            continue;
        }

        let values = headers
            .iter()
            .zip(record.iter())
            .filter(|(header, _)| !header.is_empty())
            .map(|(header, field)| (header.clone(), field.to_string()))
            .collect();

        rows.push(Row {
            number: rows.len() + 1,
            values,
        });
    }

    Ok(CsvDocument {
        headers,
        rows,
        delimiter,
    })
}

/// True when a delimiter setting is one this parser understands
pub fn valid_delimiter_setting(setting: &str) -> bool {
    let setting = setting.trim();
    matches!(setting, "auto" | "" | "tab" | "\\t") || setting.chars().count() == 1
}

fn resolve_delimiter(text: &str, setting: &str) -> ImportResult<char> {
    match setting.trim() {
        "auto" | "" => detect_delimiter(text),
        "tab" | "\\t" | "\t" => Ok('\t'),
        explicit => {
            let mut chars = explicit.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Ok(c),
                _ => Err(ImportError::parse(format!(
                    "delimiter must be a single character, \"tab\" or \"auto\", got {explicit:?}"
                ))),
            }
        }
    }
}

/// Probe each candidate against the leading lines and keep the one whose
/// column count is most consistent. Ties go to the wider header.
fn detect_delimiter(text: &str) -> ImportResult<char> {
    let sample: Vec<&str> = text
        .lines()
        .filter(|l| !l.trim().is_empty())
        .take(DETECT_SAMPLE_LINES)
        .collect();

    let mut best: Option<(char, usize, usize)> = None;
    for candidate in CANDIDATE_DELIMITERS {
        let header_columns = match sample.first() {
            Some(line) => line.split(candidate).count(),
            None => 0,
        };
        if header_columns < 2 {
            continue;
        }
        let consistent = sample
            .iter()
            .filter(|line| line.split(candidate).count() == header_columns)
            .count();

        let better = match best {
            None => true,
            Some((_, best_consistent, best_columns)) => {
                consistent > best_consistent
                    || (consistent == best_consistent && header_columns > best_columns)
            }
        };
        if better {
            best = Some((candidate, consistent, header_columns));
        }
    }

    // Single-column files give every candidate one column; comma is the
    // conventional default
    match best {
        Some((delimiter, _, _)) => Ok(delimiter),
        None => Ok(','),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_comma_auto() {
        let doc = parse("title,price\nWidget,9.99\nGadget,19.99\n", "auto").unwrap();
        assert_eq!(doc.delimiter, ',');
        assert_eq!(doc.headers, vec!["title", "price"]);
        assert_eq!(doc.rows.len(), 2);
        assert_eq!(doc.rows[0].get("title"), Some("Widget"));
        assert_eq!(doc.rows[1].number, 2);
    }

    #[test]
    fn test_auto_detects_semicolon() {
        let doc = parse("title;price\nWidget;9,99\nGadget;19,99\n", "auto").unwrap();
        assert_eq!(doc.delimiter, ';');
        assert_eq!(doc.rows[0].get("price"), Some("9,99"));
    }

    #[test]
    fn test_auto_detects_tab() {
        let doc = parse("title\tprice\nWidget\t9.99\n", "auto").unwrap();
        assert_eq!(doc.delimiter, '\t');
    }

    #[test]
    fn test_single_column_defaults_to_comma() {
        let doc = parse("title\nWidget\nGadget\n", "auto").unwrap();
        assert_eq!(doc.delimiter, ',');
        assert_eq!(doc.rows.len(), 2);
        assert_eq!(doc.rows[0].get("title"), Some("Widget"));
    }

    #[test]
    fn test_explicit_tab_keyword() {
        let doc = parse("a\tb\n1\t2\n", "tab").unwrap();
        assert_eq!(doc.delimiter, '\t');
        assert_eq!(doc.rows[0].get("b"), Some("2"));
    }

    #[test]
    fn test_explicit_pipe() {
        let doc = parse("a|b\n1|2\n", "|").unwrap();
        assert_eq!(doc.rows[0].get("a"), Some("1"));
    }

    #[test]
    fn test_single_line_rejected() {
        let err = parse("title,price\n", "auto").unwrap_err();
        assert!(matches!(err, ImportError::Parse { .. }));
    }

    #[test]
    fn test_blank_lines_skipped_and_numbering_stays_dense() {
        let doc = parse("title,price\nWidget,1\n\n  \nGadget,2\n", "auto").unwrap();
        assert_eq!(doc.rows.len(), 2);
        assert_eq!(doc.rows[1].number, 2);
        assert_eq!(doc.rows[1].get("title"), Some("Gadget"));
    }

    #[test]
    fn test_quoted_fields_keep_embedded_delimiter() {
        let doc = parse("title,description\n\"Widget, large\",\"A, B and C\"\n", ",").unwrap();
        assert_eq!(doc.rows[0].get("title"), Some("Widget, large"));
        assert_eq!(doc.rows[0].get("description"), Some("A, B and C"));
    }

    #[test]
    fn test_short_rows_omit_missing_keys() {
        let doc = parse("a,b,c\n1,2\n", ",").unwrap();
        assert_eq!(doc.rows[0].get("a"), Some("1"));
        assert_eq!(doc.rows[0].get("c"), None);
    }

    #[test]
    fn test_values_are_trimmed() {
        let doc = parse("title , price \n Widget , 9.99 \n", ",").unwrap();
        assert_eq!(doc.headers, vec!["title", "price"]);
        assert_eq!(doc.rows[0].get("price"), Some("9.99"));
    }

    #[test]
    fn test_bad_explicit_delimiter() {
        let err = parse("a,b\n1,2\n", "ab").unwrap_err();
        assert!(matches!(err, ImportError::Parse { .. }));
    }
}
