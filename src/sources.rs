//! Document fragment sources: PDF pages and workbook rows.
//!
//! Each source turns a raw document into locator-tagged text fragments.
//! Parsing is pipeline-layer: the ingest loop supplies bytes, sources
//! return `(locator, text)` pairs, and a failed document is reported and
//! skipped without aborting the batch.

use std::io::Read;
use std::path::Path;

use crate::models::Locator;

/// Maximum decompressed bytes to read from a single ZIP entry.
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Parse failure inside a single document.
#[derive(Debug)]
pub enum SourceError {
    Pdf(String),
    Workbook(String),
}

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceError::Pdf(e) => write!(f, "PDF extraction failed: {}", e),
            SourceError::Workbook(e) => write!(f, "workbook extraction failed: {}", e),
        }
    }
}

impl std::error::Error for SourceError {}

/// A document format that can be split into locator-tagged fragments.
pub trait FragmentSource {
    /// Whether this source handles the given file, by extension.
    fn matches(&self, path: &Path) -> bool;

    /// Split raw bytes into `(locator, text)` pairs, blank text dropped.
    fn fragments(&self, bytes: &[u8]) -> Result<Vec<(Locator, String)>, SourceError>;
}

/// Registered sources, in match order.
pub fn all_sources() -> Vec<Box<dyn FragmentSource>> {
    vec![Box::new(PdfSource), Box::new(TabularSource)]
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default()
}

// ============ PDF ============

/// PDF documents, one fragment per non-blank page (1-based).
pub struct PdfSource;

impl FragmentSource for PdfSource {
    fn matches(&self, path: &Path) -> bool {
        extension_of(path) == "pdf"
    }

    fn fragments(&self, bytes: &[u8]) -> Result<Vec<(Locator, String)>, SourceError> {
        let pages = pdf_extract::extract_text_from_mem_by_pages(bytes)
            .map_err(|e| SourceError::Pdf(e.to_string()))?;
        Ok(pages
            .into_iter()
            .enumerate()
            .filter(|(_, text)| !text.trim().is_empty())
            .map(|(i, text)| {
                (
                    Locator::Page {
                        page: i as u32 + 1,
                    },
                    text,
                )
            })
            .collect())
    }
}

// ============ Workbooks ============

/// XLSX workbooks, one fragment per non-empty data row.
///
/// The first row of every sheet is treated as a header and skipped; data
/// rows are numbered positionally from 1, so an empty row advances the
/// numbering without producing a fragment. Row text is the
/// space-joined, trimmed cell values. Legacy `.xls` files are claimed by
/// extension but fail at the ZIP layer, which surfaces as a per-file skip.
pub struct TabularSource;

impl FragmentSource for TabularSource {
    fn matches(&self, path: &Path) -> bool {
        matches!(extension_of(path).as_str(), "xlsx" | "xls")
    }

    fn fragments(&self, bytes: &[u8]) -> Result<Vec<(Locator, String)>, SourceError> {
        let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
            .map_err(|e| SourceError::Workbook(e.to_string()))?;

        let shared = match read_entry(&mut archive, "xl/sharedStrings.xml")? {
            Some(xml) => parse_shared_strings(&xml)?,
            None => Vec::new(),
        };
        let names = match read_entry(&mut archive, "xl/workbook.xml")? {
            Some(xml) => parse_sheet_names(&xml)?,
            None => Vec::new(),
        };
        let sheet_files = list_sheet_files(&archive);

        let mut out = Vec::new();
        for (sheet_idx, sheet_file) in sheet_files.iter().enumerate() {
            let xml = read_entry(&mut archive, sheet_file)?.ok_or_else(|| {
                SourceError::Workbook(format!("missing worksheet entry: {}", sheet_file))
            })?;
            let rows = parse_sheet_rows(&xml, &shared)?;
            let sheet_name = names
                .get(sheet_idx)
                .cloned()
                .unwrap_or_else(|| format!("Sheet{}", sheet_idx + 1));
            // first row is the header
            for (row_idx, text) in rows.iter().enumerate().skip(1) {
                if text.is_empty() {
                    continue;
                }
                out.push((
                    Locator::Cell {
                        sheet: sheet_name.clone(),
                        row: row_idx as u32,
                    },
                    text.clone(),
                ));
            }
        }
        Ok(out)
    }
}

/// Read one ZIP entry fully, bounded. A missing entry is `None`.
fn read_entry(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    name: &str,
) -> Result<Option<Vec<u8>>, SourceError> {
    let entry = match archive.by_name(name) {
        Ok(e) => e,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(SourceError::Workbook(e.to_string())),
    };
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| SourceError::Workbook(e.to_string()))?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(SourceError::Workbook(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, MAX_XML_ENTRY_BYTES
        )));
    }
    Ok(Some(out))
}

/// Worksheet entry names sorted by sheet number.
fn list_sheet_files(archive: &zip::ZipArchive<std::io::Cursor<&[u8]>>) -> Vec<String> {
    let mut names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("xl/worksheets/sheet") && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    names.sort_by_key(|name| {
        name.trim_start_matches("xl/worksheets/sheet")
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });
    names
}

/// Shared string table, one entry per `<si>`, rich-text runs concatenated.
fn parse_shared_strings(xml: &[u8]) -> Result<Vec<String>, SourceError> {
    let mut strings = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut in_si = false;
    let mut current = String::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                if e.local_name().as_ref() == b"si" {
                    in_si = true;
                    current.clear();
                } else if in_si && e.local_name().as_ref() == b"t" {
                    if let Ok(quick_xml::events::Event::Text(te)) = reader.read_event_into(&mut buf)
                    {
                        current.push_str(te.unescape().unwrap_or_default().as_ref());
                    }
                }
            }
            Ok(quick_xml::events::Event::End(e)) => {
                if e.local_name().as_ref() == b"si" {
                    strings.push(std::mem::take(&mut current));
                    in_si = false;
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(SourceError::Workbook(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

/// Sheet display names from `xl/workbook.xml`, in document order.
fn parse_sheet_names(xml: &[u8]) -> Result<Vec<String>, SourceError> {
    let mut names = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e))
            | Ok(quick_xml::events::Event::Empty(e)) => {
                if e.local_name().as_ref() == b"sheet" {
                    for attr in e.attributes().flatten() {
                        if attr.key.as_ref() == b"name" {
                            let value = attr
                                .unescape_value()
                                .map_err(|e| SourceError::Workbook(e.to_string()))?;
                            names.push(value.into_owned());
                        }
                    }
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(SourceError::Workbook(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(names)
}

#[derive(PartialEq)]
enum CellKind {
    Raw,
    Shared,
    Inline,
}

/// All row texts of one sheet in document order, header included.
///
/// Supports shared strings (`t="s"`), inline strings (`t="inlineStr"`),
/// and raw `<v>` values (numbers, formula results).
fn parse_sheet_rows(xml: &[u8], shared: &[String]) -> Result<Vec<String>, SourceError> {
    let mut rows: Vec<String> = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut parts: Vec<String> = Vec::new();
    let mut cell_kind = CellKind::Raw;
    let mut in_v = false;
    let mut in_inline_t = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => match e.local_name().as_ref() {
                b"row" => parts.clear(),
                b"c" => {
                    cell_kind = CellKind::Raw;
                    for attr in e.attributes().flatten() {
                        if attr.key.as_ref() == b"t" {
                            cell_kind = match attr.value.as_ref() {
                                b"s" => CellKind::Shared,
                                b"inlineStr" => CellKind::Inline,
                                _ => CellKind::Raw,
                            };
                        }
                    }
                }
                b"v" => in_v = true,
                b"t" if cell_kind == CellKind::Inline => in_inline_t = true,
                _ => {}
            },
            Ok(quick_xml::events::Event::Empty(e)) => {
                if e.local_name().as_ref() == b"row" {
                    rows.push(String::new());
                }
            }
            Ok(quick_xml::events::Event::Text(te)) => {
                let value = te.unescape().unwrap_or_default();
                let value = value.trim();
                if value.is_empty() {
                    // skip
                } else if in_v {
                    match cell_kind {
                        CellKind::Shared => {
                            if let Ok(i) = value.parse::<usize>() {
                                if let Some(s) = shared.get(i) {
                                    let s = s.trim();
                                    if !s.is_empty() {
                                        parts.push(s.to_string());
                                    }
                                }
                            }
                        }
                        _ => parts.push(value.to_string()),
                    }
                } else if in_inline_t {
                    parts.push(value.to_string());
                }
            }
            Ok(quick_xml::events::Event::End(e)) => match e.local_name().as_ref() {
                b"row" => rows.push(parts.join(" ")),
                b"v" => in_v = false,
                b"t" => in_inline_t = false,
                b"c" => cell_kind = CellKind::Raw,
                _ => {}
            },
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(SourceError::Workbook(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(rows)
}
