//! `.docx` and `.xlsx` extraction straight from the OOXML parts.

use std::io::{Cursor, Read};

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use rustc_hash::FxHashMap;

use super::{AnalysisError, MAX_SHEETS, MAX_TABLE_ROWS, ROW_TRUNCATION_MARKER};

type Archive<'a> = zip::ZipArchive<Cursor<&'a [u8]>>;

fn read_part(archive: &mut Archive<'_>, path: &str) -> Result<String, AnalysisError> {
    let mut file = archive.by_name(path)?;
    let mut out = String::new();
    file.read_to_string(&mut out)?;
    Ok(out)
}

fn read_optional_part(archive: &mut Archive<'_>, path: &str) -> Result<Option<String>, AnalysisError> {
    match read_part(archive, path) {
        Ok(xml) => Ok(Some(xml)),
        Err(AnalysisError::Zip(zip::result::ZipError::FileNotFound)) => Ok(None),
        Err(err) => Err(err),
    }
}

fn attr(e: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == key)
        .map(|a| String::from_utf8_lossy(&a.value).into_owned())
}

/// Non-empty paragraphs of `word/document.xml`, one per line.
pub(super) fn extract_docx(bytes: &[u8]) -> Result<String, AnalysisError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
    let xml = read_part(&mut archive, "word/document.xml")?;

    let mut reader = Reader::from_str(&xml);
    let mut paragraphs = Vec::new();
    let mut current = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"p" => current.clear(),
                b"t" => in_text = true,
                b"tab" => current.push('\t'),
                b"br" | b"cr" => current.push('\n'),
                _ => {}
            },
            Event::Empty(e) => match e.local_name().as_ref() {
                b"tab" => current.push('\t'),
                b"br" | b"cr" => current.push('\n'),
                _ => {}
            },
            Event::Text(t) if in_text => current.push_str(&t.unescape()?),
            Event::CData(t) if in_text => current.push_str(&String::from_utf8_lossy(&t)),
            Event::End(e) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    if !current.trim().is_empty() {
                        paragraphs.push(std::mem::take(&mut current));
                    }
                    current.clear();
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(paragraphs.join("\n"))
}

/// Up to five sheets, each `Sheet: NAME` then up to 120 rows of `a | b | c`.
pub(super) fn extract_spreadsheet(bytes: &[u8]) -> Result<String, AnalysisError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
    let workbook = read_part(&mut archive, "xl/workbook.xml")?;
    let rels = read_optional_part(&mut archive, "xl/_rels/workbook.xml.rels")?;
    let shared = match read_optional_part(&mut archive, "xl/sharedStrings.xml")? {
        Some(xml) => parse_shared_strings(&xml)?,
        None => Vec::new(),
    };

    let targets = rels.as_deref().map(parse_relationships).transpose()?.unwrap_or_default();
    let sheets = parse_sheet_list(&workbook)?;

    let mut snippets = Vec::new();
    for (index, (name, rel_id)) in sheets.into_iter().take(MAX_SHEETS).enumerate() {
        let path = rel_id
            .and_then(|id| targets.get(&id).cloned())
            .map_or_else(|| format!("xl/worksheets/sheet{}.xml", index + 1), |t| resolve_target(&t));
        snippets.push(format!("Sheet: {name}"));
        let Some(xml) = read_optional_part(&mut archive, &path)? else {
            continue;
        };
        append_sheet_rows(&xml, &shared, &mut snippets)?;
    }
    Ok(snippets.join("\n"))
}

fn resolve_target(target: &str) -> String {
    match target.strip_prefix('/') {
        Some(absolute) => absolute.to_string(),
        None => format!("xl/{target}"),
    }
}

fn parse_sheet_list(xml: &str) -> Result<Vec<(String, Option<String>)>, AnalysisError> {
    let mut reader = Reader::from_str(xml);
    let mut sheets = Vec::new();
    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"sheet" => {
                let name = attr(&e, b"name").unwrap_or_default();
                sheets.push((name, attr(&e, b"r:id")));
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(sheets)
}

fn parse_relationships(xml: &str) -> Result<FxHashMap<String, String>, AnalysisError> {
    let mut reader = Reader::from_str(xml);
    let mut map = FxHashMap::default();
    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"Relationship" => {
                if let (Some(id), Some(target)) = (attr(&e, b"Id"), attr(&e, b"Target")) {
                    map.insert(id, target);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(map)
}

fn parse_shared_strings(xml: &str) -> Result<Vec<String>, AnalysisError> {
    let mut reader = Reader::from_str(xml);
    let mut strings = Vec::new();
    let mut current = String::new();
    let mut in_item = false;
    let mut in_text = false;
    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"si" => {
                    in_item = true;
                    current.clear();
                }
                b"t" => in_text = in_item,
                _ => {}
            },
            Event::Empty(e) if e.local_name().as_ref() == b"si" => strings.push(String::new()),
            Event::Text(t) if in_text => current.push_str(&t.unescape()?),
            Event::End(e) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"si" => {
                    in_item = false;
                    strings.push(std::mem::take(&mut current));
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(strings)
}

/// Last column a worksheet may address (`XFD`).
const MAX_COLUMN: usize = 16_383;

/// Zero-based column index of a cell reference such as `AB12`.
///
/// Saturates instead of overflowing, so oversized references stay past
/// [`MAX_COLUMN`].
fn column_index(reference: &str) -> Option<usize> {
    let mut index = 0usize;
    let mut seen = false;
    for b in reference.bytes().take_while(u8::is_ascii_alphabetic) {
        index = index
            .saturating_mul(26)
            .saturating_add(usize::from(b.to_ascii_uppercase() - b'A' + 1));
        seen = true;
    }
    seen.then(|| index - 1)
}

#[derive(Default)]
struct CellState {
    column: Option<usize>,
    kind: Option<String>,
    value: String,
    capture: bool,
}

fn render_cell(cell: &CellState, shared: &[String]) -> String {
    match cell.kind.as_deref() {
        Some("s") => cell
            .value
            .trim()
            .parse::<usize>()
            .ok()
            .and_then(|i| shared.get(i).cloned())
            .unwrap_or_default(),
        Some("b") => match cell.value.trim() {
            "1" => "True".to_string(),
            "0" => "False".to_string(),
            other => other.to_string(),
        },
        _ => cell.value.clone(),
    }
}

fn append_sheet_rows(
    xml: &str,
    shared: &[String],
    out: &mut Vec<String>,
) -> Result<(), AnalysisError> {
    let mut reader = Reader::from_str(xml);
    let mut row: Vec<String> = Vec::new();
    let mut cell = CellState::default();
    let mut row_count = 0usize;

    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"row" => {
                    if row_count >= MAX_TABLE_ROWS {
                        out.push(ROW_TRUNCATION_MARKER.to_string());
                        return Ok(());
                    }
                    row.clear();
                }
                b"c" => {
                    cell = CellState {
                        column: attr(&e, b"r").and_then(|r| column_index(&r)),
                        kind: attr(&e, b"t"),
                        ..CellState::default()
                    };
                }
                b"v" | b"t" => cell.capture = true,
                _ => {}
            },
            Event::Empty(e) if e.local_name().as_ref() == b"row" => {
                if row_count >= MAX_TABLE_ROWS {
                    out.push(ROW_TRUNCATION_MARKER.to_string());
                    return Ok(());
                }
                out.push(String::new());
                row_count += 1;
            }
            Event::Text(t) if cell.capture => cell.value.push_str(&t.unescape()?),
            Event::End(e) => match e.local_name().as_ref() {
                b"v" | b"t" => cell.capture = false,
                b"c" => {
                    let column = cell.column.unwrap_or(row.len());
                    if column > MAX_COLUMN {
                        return Err(AnalysisError::Malformed(format!(
                            "cell column {} is past XFD",
                            column + 1
                        )));
                    }
                    if column >= row.len() {
                        row.resize(column + 1, String::new());
                    }
                    row[column] = render_cell(&cell, shared);
                }
                b"row" => {
                    out.push(row.join(" | "));
                    row_count += 1;
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(())
}
