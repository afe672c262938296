use super::{MAX_TABLE_ROWS, ROW_TRUNCATION_MARKER};
use crate::util::utf8_dropping_invalid;

/// First rows of a CSV file, cells trimmed and joined with `", "`.
pub(super) fn extract_csv(bytes: &[u8]) -> String {
    let decoded = utf8_dropping_invalid(bytes);
    let mut rows = CsvRows::new(&decoded);
    let mut out: Vec<String> = Vec::new();
    for (i, row) in rows.by_ref().enumerate() {
        if i >= MAX_TABLE_ROWS {
            out.push(ROW_TRUNCATION_MARKER.to_string());
            break;
        }
        let cells: Vec<&str> = row.iter().map(|cell| cell.trim()).collect();
        out.push(cells.join(", "));
    }
    out.join("\n")
}

/// Minimal RFC 4180 record reader: quoted fields may hold commas, doubled
/// quotes and newlines.
struct CsvRows<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> CsvRows<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }
}

impl Iterator for CsvRows<'_> {
    type Item = Vec<String>;

    fn next(&mut self) -> Option<Vec<String>> {
        let bytes = self.input.as_bytes();
        if self.pos >= bytes.len() {
            return None;
        }

        let mut row = Vec::new();
        let mut field = String::new();
        let mut in_quotes = false;
        let mut chars = self.input[self.pos..].char_indices();

        while let Some((offset, ch)) = chars.next() {
            if in_quotes {
                if ch == '"' {
                    if self.input[self.pos + offset + 1..].starts_with('"') {
                        field.push('"');
                        chars.next();
                    } else {
                        in_quotes = false;
                    }
                } else {
                    field.push(ch);
                }
                continue;
            }
            match ch {
                '"' if field.is_empty() => in_quotes = true,
                ',' => row.push(std::mem::take(&mut field)),
                '\n' | '\r' => {
                    let mut consumed = offset + 1;
                    if ch == '\r' && self.input[self.pos + consumed..].starts_with('\n') {
                        consumed += 1;
                    }
                    self.pos += consumed;
                    row.push(field);
                    return Some(row);
                }
                _ => field.push(ch),
            }
        }

        self.pos = bytes.len();
        row.push(field);
        Some(row)
    }
}
