//! Budget-aware, cache-backed LLM gateway.
//!
//! `chat` returns a string payload in every case. Gates run in a strict
//! order: cache hit, budget, credentials, provider call. Provider errors
//! become `{"error": ...}` payloads rather than failures, and every
//! outcome is cached, so a repeated prompt never spends twice.

use serde::{Deserialize, Serialize};

use crate::cache::FileCache;
use crate::config::LlmConfig;
use crate::costlog::CostLedger;

const SYSTEM_PROMPT: &str = "You are an extraction service. Output only JSON.";

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize, Default)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

pub struct LlmGateway {
    config: LlmConfig,
    cache: FileCache,
    ledger: CostLedger,
    client: reqwest::Client,
}

impl LlmGateway {
    pub fn new(config: LlmConfig, cache: FileCache, ledger: CostLedger) -> Self {
        Self {
            config,
            cache,
            ledger,
            client: reqwest::Client::new(),
        }
    }

    /// Stable cache key over (model, prompt).
    fn cache_key(&self, content: &str) -> String {
        serde_json::json!({"m": self.config.model, "c": content}).to_string()
    }

    /// Log a ledger record and cache the payload. Bookkeeping failures are
    /// warnings; they never interrupt the extraction batch.
    fn record(&self, key: &str, payload: &str, pt: u64, ct: u64, error: Option<&str>) {
        if let Err(e) = self.ledger.log(&self.config.model, pt, ct, error) {
            eprintln!("Warning: failed to write cost log: {}", e);
        }
        if let Err(e) = self.cache.set(key, payload) {
            eprintln!("Warning: failed to write cache entry: {}", e);
        }
    }

    /// Send a prompt and return the raw response string.
    ///
    /// An empty cached value counts as a miss. Budget and credential
    /// stubs are zero-cost ledger records.
    pub async fn chat(&self, content: &str) -> String {
        let key = self.cache_key(content);
        if let Some(cached) = self.cache.get(&key) {
            if !cached.is_empty() {
                return cached;
            }
        }

        if self.ledger.total_cost() >= self.config.budget_usd {
            let stub = serde_json::json!({
                "error": "budget_exceeded",
                "message": format!(
                    "Token budget (${}) exceeded. Skipping call.",
                    self.config.budget_usd
                ),
            })
            .to_string();
            self.record(&key, &stub, 0, 0, Some("budget_exceeded"));
            return stub;
        }

        let Some(api_key) = self.config.api_key.as_deref() else {
            let stub = serde_json::json!({
                "error": "no_api_key_or_client",
                "message": "Skipped LLM call due to missing API key.",
            })
            .to_string();
            self.record(&key, &stub, 0, 0, Some("no_api_key_or_client"));
            return stub;
        };

        match self.call_provider(api_key, content).await {
            Ok((text, pt, ct)) => {
                self.record(&key, &text, pt, ct, None);
                text
            }
            Err(e) => {
                let message = e.to_string();
                let stub = serde_json::json!({"error": message}).to_string();
                self.record(&key, &stub, 0, 0, Some(&message));
                stub
            }
        }
    }

    async fn call_provider(
        &self,
        api_key: &str,
        content: &str,
    ) -> anyhow::Result<(String, u64, u64)> {
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content,
                },
            ],
        };
        let url = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );
        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await?
            .error_for_status()?;
        let body: ChatResponse = response.json().await?;
        let text = body
            .choices
            .first()
            .and_then(|c| c.message.content.as_deref())
            .unwrap_or_default()
            .trim()
            .to_string();
        let usage = body.usage.unwrap_or_default();
        Ok((text, usage.prompt_tokens, usage.completion_tokens))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tempfile::TempDir;

    fn gateway(dir: &Path, api_key: Option<&str>, budget: f64) -> LlmGateway {
        LlmGateway::new(
            LlmConfig {
                api_key: api_key.map(str::to_string),
                model: "gpt-4o-mini".to_string(),
                // unreachable; these tests never get past the gates
                base_url: "http://127.0.0.1:9".to_string(),
                budget_usd: budget,
            },
            FileCache::new(&dir.join("cache")),
            CostLedger::new(&dir.join("cost_log.jsonl")),
        )
    }

    #[tokio::test]
    async fn missing_key_yields_cached_stub() {
        let dir = TempDir::new().unwrap();
        let gw = gateway(dir.path(), None, 3.0);

        let out = gw.chat("extract something").await;
        let parsed: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed["error"], "no_api_key_or_client");

        let ledger = CostLedger::new(&dir.path().join("cost_log.jsonl"));
        assert_eq!(ledger.total_cost(), 0.0);
        let records: Vec<crate::costlog::CostRecord> =
            crate::jsonl::read_jsonl(&dir.path().join("cost_log.jsonl")).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].error.as_deref(), Some("no_api_key_or_client"));

        // second identical call is served from cache: same payload, no new record
        let again = gw.chat("extract something").await;
        assert_eq!(again, out);
        let records: Vec<crate::costlog::CostRecord> =
            crate::jsonl::read_jsonl(&dir.path().join("cost_log.jsonl")).unwrap();
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn exhausted_budget_yields_stub_at_zero_cost() {
        let dir = TempDir::new().unwrap();
        let ledger = CostLedger::new(&dir.path().join("cost_log.jsonl"));
        // spend past the budget: 1M prompt tokens of gpt-4o is $5
        ledger.log("gpt-4o", 1_000_000, 0, None).unwrap();
        let spent = ledger.total_cost();

        let gw = gateway(dir.path(), Some("sk-test"), 3.0);
        let out = gw.chat("anything").await;
        let parsed: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed["error"], "budget_exceeded");
        // the stub call itself cost nothing
        assert!((ledger.total_cost() - spent).abs() < 1e-9);
    }

    #[tokio::test]
    async fn cache_hit_precedes_all_gates() {
        let dir = TempDir::new().unwrap();
        let gw = gateway(dir.path(), None, 0.0);
        let cache = FileCache::new(&dir.path().join("cache"));
        let key = serde_json::json!({"m": "gpt-4o-mini", "c": "the prompt"}).to_string();
        cache.set(&key, "{\"cached\": true}").unwrap();

        let out = gw.chat("the prompt").await;
        assert_eq!(out, "{\"cached\": true}");
        // nothing was logged
        let ledger = CostLedger::new(&dir.path().join("cost_log.jsonl"));
        assert_eq!(ledger.total_cost(), 0.0);
        assert!(!dir.path().join("cost_log.jsonl").exists());
    }

    #[tokio::test]
    async fn empty_cache_entry_is_a_miss() {
        let dir = TempDir::new().unwrap();
        let gw = gateway(dir.path(), None, 3.0);
        let cache = FileCache::new(&dir.path().join("cache"));
        let key = serde_json::json!({"m": "gpt-4o-mini", "c": "p"}).to_string();
        cache.set(&key, "").unwrap();

        let out = gw.chat("p").await;
        let parsed: serde_json::Value = serde_json::from_str(&out).unwrap();
        // fell through to the credential gate and replaced the empty entry
        assert_eq!(parsed["error"], "no_api_key_or_client");
        assert_eq!(cache.get(&key).as_deref(), Some(out.as_str()));
    }
}
