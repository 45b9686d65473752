//! Append-only JSONL ledger of LLM spend, shared across runs.

use anyhow::Result;
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

/// Per-1K-token USD prices as `(prompt, completion)`.
///
/// Unknown models are billed at the gpt-4o-mini tier rather than dropped,
/// so every call leaves a ledger record.
fn price_for(model: &str) -> (f64, f64) {
    match model {
        "gpt-4o" => (0.005, 0.015),
        _ => (0.00015, 0.0006),
    }
}

/// One ledger line. `error` is `null` for successful provider calls and a
/// short reason string for zero-cost stub records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostRecord {
    pub timestamp: String,
    pub model: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cost_usd: f64,
    pub error: Option<String>,
}

pub struct CostLedger {
    path: PathBuf,
}

impl CostLedger {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    /// Append one record with the cost computed from the price table,
    /// rounded to 6 decimal places.
    pub fn log(
        &self,
        model: &str,
        prompt_tokens: u64,
        completion_tokens: u64,
        error: Option<&str>,
    ) -> Result<()> {
        let (price_in, price_out) = price_for(model);
        let raw = prompt_tokens as f64 / 1000.0 * price_in
            + completion_tokens as f64 / 1000.0 * price_out;
        let cost_usd = (raw * 1e6).round() / 1e6;
        let record = CostRecord {
            timestamp: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            model: model.to_string(),
            prompt_tokens,
            completion_tokens,
            cost_usd,
            error: error.map(str::to_string),
        };
        crate::jsonl::append_jsonl(&self.path, &record)
    }

    /// Total spend across every record in the ledger.
    ///
    /// Malformed lines are skipped, a missing ledger reads as 0.0. The
    /// total is global over all models and runs.
    pub fn total_cost(&self) -> f64 {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(_) => return 0.0,
        };
        let mut total = 0.0;
        for line in BufReader::new(file).lines().map_while(Result::ok) {
            if let Ok(value) = serde_json::from_str::<serde_json::Value>(&line) {
                total += value.get("cost_usd").and_then(|v| v.as_f64()).unwrap_or(0.0);
            }
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_ledger_totals_zero() {
        let dir = TempDir::new().unwrap();
        let ledger = CostLedger::new(&dir.path().join("cost_log.jsonl"));
        assert_eq!(ledger.total_cost(), 0.0);
    }

    #[test]
    fn log_accumulates_cost() {
        let dir = TempDir::new().unwrap();
        let ledger = CostLedger::new(&dir.path().join("cost_log.jsonl"));
        ledger.log("gpt-4o-mini", 1000, 1000, None).unwrap();
        ledger.log("gpt-4o", 1000, 1000, None).unwrap();
        // 0.00015 + 0.0006 + 0.005 + 0.015
        assert!((ledger.total_cost() - 0.02075).abs() < 1e-9);
    }

    #[test]
    fn unknown_model_uses_mini_tier() {
        let dir = TempDir::new().unwrap();
        let ledger = CostLedger::new(&dir.path().join("cost_log.jsonl"));
        ledger.log("some-future-model", 2000, 0, None).unwrap();
        assert!((ledger.total_cost() - 0.0003).abs() < 1e-9);
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cost_log.jsonl");
        let ledger = CostLedger::new(&path);
        ledger.log("gpt-4o-mini", 1000, 0, None).unwrap();
        let mut content = std::fs::read_to_string(&path).unwrap();
        content.push_str("not json at all\n");
        std::fs::write(&path, content).unwrap();
        ledger.log("gpt-4o-mini", 1000, 0, None).unwrap();
        assert!((ledger.total_cost() - 0.0003).abs() < 1e-9);
    }

    #[test]
    fn stub_records_carry_reason_and_zero_cost() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cost_log.jsonl");
        let ledger = CostLedger::new(&path);
        ledger
            .log("gpt-4o-mini", 0, 0, Some("budget_exceeded"))
            .unwrap();
        let records: Vec<CostRecord> = crate::jsonl::read_jsonl(&path).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].cost_usd, 0.0);
        assert_eq!(records[0].error.as_deref(), Some("budget_exceeded"));
    }
}
