//! Core data models used throughout Dossier.
//!
//! These types represent the text fragments, ranked hits, and evidence
//! items that flow through the indexing and extraction pipeline.

use serde::{Deserialize, Serialize};

/// Position of a fragment inside its source document.
///
/// Exactly one locator kind per fragment: PDF fragments carry a page
/// number, tabular fragments carry a sheet name and row number. The
/// untagged/flattened representation keeps JSONL rows in the shape
/// `{"page": 3}` or `{"sheet": "Plan", "row": 2}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Locator {
    /// 1-based page of a PDF document.
    Page { page: u32 },
    /// Sheet name and 1-based data row of a tabular document.
    Cell { sheet: String, row: u32 },
}

impl Locator {
    /// Page number for PDF locators; tabular locators map to 0.
    pub fn page_or_zero(&self) -> u32 {
        match self {
            Locator::Page { page } => *page,
            Locator::Cell { .. } => 0,
        }
    }
}

impl std::fmt::Display for Locator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Locator::Page { page } => write!(f, "page {}", page),
            Locator::Cell { sheet, row } => write!(f, "sheet {} row {}", sheet, row),
        }
    }
}

/// Smallest retrievable unit of extracted document text.
///
/// Fragments are produced once during ingest and are immutable afterwards;
/// they are identified positionally by their index within the fragment
/// file, and that order must match the fitted index rows and the stored
/// fragment ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fragment {
    pub file_path: String,
    pub project_id: String,
    #[serde(default)]
    pub project_title: String,
    pub text: String,
    #[serde(flatten)]
    pub locator: Locator,
}

/// Transient result of ranking the fragment matrix against a query.
///
/// `index` points into the fragment collection the index was fitted over.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedHit {
    pub index: usize,
    pub score: f32,
}

/// A fragment selected to support a project's extracted metadata.
///
/// Deduplicated by `(file_path, locator)` during aggregation; discarded
/// once the extraction record has been written.
#[derive(Debug, Clone)]
pub struct EvidenceItem {
    pub file_path: String,
    pub locator: Locator,
    pub snippet: String,
    pub score: f32,
}

/// Truncate to at most `max` characters without splitting a code point.
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locator_roundtrip_page() {
        let frag = Fragment {
            file_path: "data/P/plan.pdf".to_string(),
            project_id: "PRJ-P".to_string(),
            project_title: "P".to_string(),
            text: "hello".to_string(),
            locator: Locator::Page { page: 3 },
        };
        let json = serde_json::to_string(&frag).unwrap();
        assert!(json.contains("\"page\":3"));
        assert!(!json.contains("sheet"));
        let back: Fragment = serde_json::from_str(&json).unwrap();
        assert_eq!(back.locator, Locator::Page { page: 3 });
    }

    #[test]
    fn locator_roundtrip_cell() {
        let frag = Fragment {
            file_path: "data/P/budget.xlsx".to_string(),
            project_id: "PRJ-P".to_string(),
            project_title: "P".to_string(),
            text: "row text".to_string(),
            locator: Locator::Cell {
                sheet: "Plan".to_string(),
                row: 2,
            },
        };
        let json = serde_json::to_string(&frag).unwrap();
        assert!(json.contains("\"sheet\":\"Plan\""));
        assert!(json.contains("\"row\":2"));
        let back: Fragment = serde_json::from_str(&json).unwrap();
        assert_eq!(
            back.locator,
            Locator::Cell {
                sheet: "Plan".to_string(),
                row: 2
            }
        );
    }

    #[test]
    fn locator_display() {
        assert_eq!(Locator::Page { page: 7 }.to_string(), "page 7");
        assert_eq!(
            Locator::Cell {
                sheet: "Q1".to_string(),
                row: 4
            }
            .to_string(),
            "sheet Q1 row 4"
        );
    }

    #[test]
    fn page_or_zero() {
        assert_eq!(Locator::Page { page: 9 }.page_or_zero(), 9);
        assert_eq!(
            Locator::Cell {
                sheet: "S".to_string(),
                row: 1
            }
            .page_or_zero(),
            0
        );
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("hello", 10), "hello");
        assert_eq!(truncate_chars("hello", 3), "hel");
        // Hebrew is multi-byte; a byte-based cut would panic.
        assert_eq!(truncate_chars("שלום עולם", 4), "שלום");
        assert_eq!(truncate_chars("", 5), "");
    }
}
