//! Per-project evidence aggregation and LLM metadata extraction.
//!
//! For each project: run the fixed bilingual sub-queries against the
//! index, collect deduplicated evidence, send one prompt through the
//! gateway, and merge the response into the schema. Only known schema
//! keys are accepted from the model; `project_id` and `evidence` are
//! always set from local data, so a confused response can never
//! misattribute a record.

use std::collections::HashSet;

use anyhow::{bail, Context, Result};
use serde_json::{json, Map, Value};
use sqlx::SqlitePool;

use crate::cache::FileCache;
use crate::config::Config;
use crate::costlog::CostLedger;
use crate::db;
use crate::jsonl;
use crate::llm::LlmGateway;
use crate::migrate;
use crate::models::{truncate_chars, EvidenceItem, Fragment, Locator};
use crate::rank;
use crate::tfidf::FittedIndex;

/// Schema the model is asked to fill, verbatim in the prompt. Its key set
/// is also the whitelist when merging the response.
const SCHEMA_EXAMPLE: &str = r#"{"project_id": "", "project_title": "", "start_date": "", "end_date": "", "key_dates": [], "contacts": [], "work_summary": "", "top_keywords": [], "evidence": []}"#;

/// Retrieval topics, each issued in English and Hebrew.
const SUB_QUERIES: [&str; 8] = [
    "start date end date milestones schedule",
    "תאריך התחלה תאריך סיום לוח זמנים אבני דרך",
    "contacts email phone",
    "אנשי קשר אימייל טלפון",
    "project summary scope overview",
    "סיכום פרויקט היקף סקירה",
    "top keywords topics",
    "מילות מפתח נושאים",
];

const SUB_QUERY_K: usize = 12;
const EVIDENCE_CAP: usize = 8;
const FALLBACK_CAP: usize = 5;
const EXCERPT_LIMIT: usize = 10;
const EXCERPT_CHARS: usize = 1200;
const SNIPPET_CHARS: usize = 400;

fn build_prompt(schema: &str, excerpts: &str) -> String {
    format!(
        "System: You are an extraction service. Output only JSON matching the schema.\n\
         User: Given these document excerpts, extract fields and return JSON exactly matching the schema.\n\
         Schema: {}\n\
         Excerpts:\n{}\n",
        schema, excerpts
    )
}

fn schema_defaults() -> Map<String, Value> {
    match serde_json::from_str(SCHEMA_EXAMPLE) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

/// Collect up to [`EVIDENCE_CAP`] evidence items for one project.
///
/// Hits outside the project are dropped; duplicates are keyed by
/// `(file_path, locator)`. A project whose fragments never reach the
/// per-query top k falls back to its first fragments at score 0.0.
fn gather_evidence(
    project_id: &str,
    index: &FittedIndex,
    fragments: &[Fragment],
) -> Vec<EvidenceItem> {
    let mut evidence: Vec<EvidenceItem> = Vec::new();
    let mut seen: HashSet<(String, Locator)> = HashSet::new();

    for query in SUB_QUERIES {
        for hit in rank::rank(index, query, SUB_QUERY_K) {
            let fragment = &fragments[hit.index];
            if fragment.project_id != project_id {
                continue;
            }
            if !seen.insert((fragment.file_path.clone(), fragment.locator.clone())) {
                continue;
            }
            evidence.push(EvidenceItem {
                file_path: fragment.file_path.clone(),
                locator: fragment.locator.clone(),
                snippet: truncate_chars(&fragment.text, EXCERPT_CHARS).to_string(),
                score: hit.score,
            });
            if evidence.len() >= EVIDENCE_CAP {
                break;
            }
        }
        if evidence.len() >= EVIDENCE_CAP {
            break;
        }
    }

    if evidence.is_empty() {
        for fragment in fragments.iter().filter(|f| f.project_id == project_id) {
            if !seen.insert((fragment.file_path.clone(), fragment.locator.clone())) {
                continue;
            }
            evidence.push(EvidenceItem {
                file_path: fragment.file_path.clone(),
                locator: fragment.locator.clone(),
                snippet: truncate_chars(&fragment.text, EXCERPT_CHARS).to_string(),
                score: 0.0,
            });
            if evidence.len() >= FALLBACK_CAP {
                break;
            }
        }
    }

    evidence
}

fn render_excerpts(evidence: &[EvidenceItem]) -> String {
    evidence
        .iter()
        .take(EXCERPT_LIMIT)
        .map(|item| {
            format!(
                "[{} | {} | score {:.3}]\n{}",
                item.file_path, item.locator, item.score, item.snippet
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Extract one project's record. Never fails the batch: an unparseable
/// or stub response leaves the schema defaults in place.
pub async fn extract_for_project(
    project_id: &str,
    index: &FittedIndex,
    fragments: &[Fragment],
    llm: &LlmGateway,
) -> Value {
    let evidence = gather_evidence(project_id, index, fragments);
    let prompt = build_prompt(SCHEMA_EXAMPLE, &render_excerpts(&evidence));

    let out = llm.chat(&prompt).await;
    let raw: Map<String, Value> = if out.trim().starts_with('{') {
        serde_json::from_str(&out).unwrap_or_default()
    } else {
        Map::new()
    };

    let mut data = schema_defaults();
    for (key, value) in raw {
        if data.contains_key(&key) {
            data.insert(key, value);
        }
    }

    data.insert("project_id".to_string(), json!(project_id));
    data.insert(
        "evidence".to_string(),
        Value::Array(
            evidence
                .iter()
                .map(|item| {
                    json!({
                        "doc_path": item.file_path,
                        "page": item.locator.page_or_zero(),
                        "snippet": truncate_chars(&item.snippet, SNIPPET_CHARS),
                    })
                })
                .collect(),
        ),
    );
    Value::Object(data)
}

/// Run extraction for every project seen in the fragment file, write the
/// per-project JSON outputs, persist records, and write the manifest.
pub async fn run_extract(config: &Config) -> Result<()> {
    config.paths.ensure()?;

    let fragments: Vec<Fragment> = jsonl::read_jsonl(&config.paths.fragments_file())?;
    let index = FittedIndex::load(&config.paths.index_file())?;
    if index.num_rows() != fragments.len() {
        bail!(
            "Index rows ({}) != fragment count ({}); re-run build-index",
            index.num_rows(),
            fragments.len()
        );
    }

    // project id -> title, first seen wins
    let mut projects: Vec<(String, String)> = Vec::new();
    let mut seen = HashSet::new();
    for fragment in &fragments {
        if fragment.project_id.is_empty() || !seen.insert(fragment.project_id.clone()) {
            continue;
        }
        projects.push((fragment.project_id.clone(), fragment.project_title.clone()));
    }

    let llm = LlmGateway::new(
        config.llm.clone(),
        FileCache::new(&config.paths.cache_dir),
        CostLedger::new(&config.paths.cost_log_file()),
    );

    let pool = db::connect(config).await?;
    migrate::run_migrations(&pool).await?;

    for (project_id, project_title) in &projects {
        let mut data = extract_for_project(project_id, &index, &fragments, &llm).await;
        let needs_title = match data.get("project_title") {
            None | Some(Value::Null) => true,
            Some(Value::String(s)) => s.is_empty(),
            Some(_) => false,
        };
        if needs_title {
            data["project_title"] = json!(project_title);
        }

        let out_path = config
            .paths
            .outputs_dir
            .join(format!("{}_key_params.json", project_id));
        std::fs::write(&out_path, serde_json::to_string_pretty(&data)?)
            .with_context(|| format!("Failed to write {}", out_path.display()))?;
        println!("Wrote {}", out_path.display());

        store_extraction(&pool, project_id, project_title, &data).await?;
    }
    pool.close().await;

    write_manifest(config, &fragments)?;
    Ok(())
}

/// Nullable TEXT form of a JSON value: strings pass through, null maps to
/// NULL, anything else is stored as compact JSON.
fn text_of(value: Option<&Value>) -> Option<String> {
    match value {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => Some(other.to_string()),
    }
}

/// Upsert the project row and replace its child collections in one
/// transaction, so re-running extract never duplicates children.
async fn store_extraction(
    pool: &SqlitePool,
    project_id: &str,
    fallback_title: &str,
    data: &Value,
) -> Result<()> {
    let mut tx = pool.begin().await?;

    let title = data
        .get("project_title")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .unwrap_or(fallback_title);
    sqlx::query(
        r#"
        INSERT INTO projects (project_id, project_title, start_date, end_date, work_summary)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(project_id) DO UPDATE SET
            project_title = excluded.project_title,
            start_date = excluded.start_date,
            end_date = excluded.end_date,
            work_summary = excluded.work_summary
        "#,
    )
    .bind(project_id)
    .bind(title)
    .bind(text_of(data.get("start_date")))
    .bind(text_of(data.get("end_date")))
    .bind(text_of(data.get("work_summary")).unwrap_or_default())
    .execute(&mut *tx)
    .await?;

    sqlx::query("DELETE FROM key_dates WHERE project_id = ?")
        .bind(project_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM contacts WHERE project_id = ?")
        .bind(project_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM keywords WHERE project_id = ?")
        .bind(project_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM evidence WHERE project_id = ?")
        .bind(project_id)
        .execute(&mut *tx)
        .await?;

    if let Some(items) = data.get("key_dates").and_then(Value::as_array) {
        for kd in items {
            sqlx::query(
                "INSERT INTO key_dates (project_id, label, date_val, source_file, page) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(project_id)
            .bind(text_of(kd.get("label")))
            .bind(text_of(kd.get("date")))
            .bind(text_of(kd.get("source_file")))
            .bind(text_of(kd.get("page")))
            .execute(&mut *tx)
            .await?;
        }
    }

    if let Some(items) = data.get("contacts").and_then(Value::as_array) {
        for contact in items {
            sqlx::query(
                "INSERT INTO contacts (project_id, name, role, email_addr, phone) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(project_id)
            .bind(text_of(contact.get("name")))
            .bind(text_of(contact.get("role")))
            .bind(text_of(contact.get("email")))
            .bind(text_of(contact.get("phone")))
            .execute(&mut *tx)
            .await?;
        }
    }

    if let Some(items) = data.get("top_keywords").and_then(Value::as_array) {
        for kw in items {
            let (word, weight) = match kw {
                Value::Object(map) => (
                    ["keyword", "word", "text"].iter().find_map(|k| {
                        map.get(*k)
                            .and_then(|v| text_of(Some(v)))
                            .filter(|s| !s.is_empty())
                    }),
                    map.get("weight").and_then(Value::as_f64),
                ),
                other => (text_of(Some(other)), None),
            };
            sqlx::query("INSERT INTO keywords (project_id, keyword, weight) VALUES (?, ?, ?)")
                .bind(project_id)
                .bind(word)
                .bind(weight)
                .execute(&mut *tx)
                .await?;
        }
    }

    if let Some(items) = data.get("evidence").and_then(Value::as_array) {
        for ev in items {
            sqlx::query(
                "INSERT INTO evidence (project_id, file_path, page, snippet, score) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(project_id)
            .bind(text_of(ev.get("doc_path")))
            .bind(text_of(ev.get("page")))
            .bind(text_of(ev.get("snippet")))
            .bind(ev.get("score").and_then(Value::as_f64))
            .execute(&mut *tx)
            .await?;
        }
    }

    tx.commit().await?;
    Ok(())
}

/// Unique document paths in fragment order, one manifest line each.
fn write_manifest(config: &Config, fragments: &[Fragment]) -> Result<()> {
    let mut seen = HashSet::new();
    let mut manifest = Vec::new();
    for fragment in fragments {
        if fragment.file_path.is_empty() || !seen.insert(fragment.file_path.clone()) {
            continue;
        }
        manifest.push(json!({
            "doc_path": fragment.file_path,
            "project_id": fragment.project_id,
            "project_title": fragment.project_title,
        }));
    }
    let manifest_file = config.paths.manifest_file();
    jsonl::write_jsonl(&manifest_file, &manifest)?;
    println!("Wrote {}", manifest_file.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LlmConfig;
    use crate::tfidf;
    use std::path::Path;
    use tempfile::TempDir;

    fn fragment(project: &str, file: &str, page: u32, text: &str) -> Fragment {
        Fragment {
            file_path: file.to_string(),
            project_id: project.to_string(),
            project_title: project.trim_start_matches("PRJ-").to_string(),
            text: text.to_string(),
            locator: Locator::Page { page },
        }
    }

    fn offline_gateway(dir: &Path) -> LlmGateway {
        LlmGateway::new(
            LlmConfig {
                api_key: None,
                model: "gpt-4o-mini".to_string(),
                base_url: "http://127.0.0.1:9".to_string(),
                budget_usd: 3.0,
            },
            FileCache::new(&dir.join("cache")),
            CostLedger::new(&dir.join("cost_log.jsonl")),
        )
    }

    #[test]
    fn evidence_is_deduplicated_and_capped() {
        let fragments: Vec<Fragment> = (1..=10)
            .map(|i| {
                fragment(
                    "PRJ-A",
                    "data/A/plan.pdf",
                    i,
                    "schedule milestones start date contacts email summary keywords",
                )
            })
            .collect();
        let texts: Vec<String> = fragments.iter().map(|f| f.text.clone()).collect();
        let index = tfidf::fit(&texts);

        let evidence = gather_evidence("PRJ-A", &index, &fragments);
        assert_eq!(evidence.len(), EVIDENCE_CAP);
        let unique: HashSet<_> = evidence
            .iter()
            .map(|e| (e.file_path.clone(), e.locator.clone()))
            .collect();
        assert_eq!(unique.len(), EVIDENCE_CAP);
        assert!(evidence.iter().all(|e| e.score > 0.0));
    }

    #[test]
    fn hits_from_other_projects_are_filtered() {
        let fragments = vec![
            fragment("PRJ-A", "data/A/a.pdf", 1, "start date schedule"),
            fragment("PRJ-B", "data/B/b.pdf", 1, "start date schedule"),
        ];
        let texts: Vec<String> = fragments.iter().map(|f| f.text.clone()).collect();
        let index = tfidf::fit(&texts);

        let evidence = gather_evidence("PRJ-B", &index, &fragments);
        assert_eq!(evidence.len(), 1);
        assert_eq!(evidence[0].file_path, "data/B/b.pdf");
    }

    #[test]
    fn crowded_out_project_falls_back_to_its_fragments() {
        // 12 fragments that dominate every sub-query's top 12, then a
        // project whose text shares no terms with any sub-query
        let mut fragments: Vec<Fragment> = (1..=12)
            .map(|i| {
                fragment(
                    "PRJ-Noise",
                    "data/Noise/noise.pdf",
                    i,
                    "schedule milestones contacts email phone summary scope overview keywords topics",
                )
            })
            .collect();
        fragments.push(fragment("PRJ-Quiet", "data/Quiet/q.pdf", 1, "quartz obelisk"));
        fragments.push(fragment("PRJ-Quiet", "data/Quiet/q.pdf", 2, "basalt rhyolite"));
        let texts: Vec<String> = fragments.iter().map(|f| f.text.clone()).collect();
        let index = tfidf::fit(&texts);

        let evidence = gather_evidence("PRJ-Quiet", &index, &fragments);
        assert_eq!(evidence.len(), 2);
        assert!(evidence.iter().all(|e| e.score == 0.0));
        assert_eq!(evidence[0].locator, Locator::Page { page: 1 });
        assert_eq!(evidence[1].locator, Locator::Page { page: 2 });
    }

    #[test]
    fn excerpts_render_headers_and_snippets() {
        let evidence = vec![EvidenceItem {
            file_path: "data/A/plan.pdf".to_string(),
            locator: Locator::Page { page: 2 },
            snippet: "the snippet".to_string(),
            score: 0.29618,
        }];
        let rendered = render_excerpts(&evidence);
        assert_eq!(
            rendered,
            "[data/A/plan.pdf | page 2 | score 0.296]\nthe snippet"
        );
    }

    #[tokio::test]
    async fn stub_response_leaves_schema_defaults() {
        let dir = TempDir::new().unwrap();
        let fragments = vec![fragment("PRJ-A", "data/A/a.pdf", 1, "start date 2024-01-01")];
        let texts: Vec<String> = fragments.iter().map(|f| f.text.clone()).collect();
        let index = tfidf::fit(&texts);
        let llm = offline_gateway(dir.path());

        let data = extract_for_project("PRJ-A", &index, &fragments, &llm).await;
        // the no-key stub parses as JSON but carries no schema keys
        assert_eq!(data["project_id"], "PRJ-A");
        assert_eq!(data["start_date"], "");
        assert_eq!(data["key_dates"], json!([]));
        let evidence = data["evidence"].as_array().unwrap();
        assert_eq!(evidence.len(), 1);
        assert_eq!(evidence[0]["doc_path"], "data/A/a.pdf");
        assert_eq!(evidence[0]["page"], 1);
    }

    #[tokio::test]
    async fn parsed_response_merges_known_keys_only() {
        let dir = TempDir::new().unwrap();
        let fragments = vec![fragment("PRJ-A", "data/A/a.pdf", 1, "start date 2024-01-01")];
        let texts: Vec<String> = fragments.iter().map(|f| f.text.clone()).collect();
        let index = tfidf::fit(&texts);

        // seed the cache with a crafted response for the exact prompt
        let evidence = gather_evidence("PRJ-A", &index, &fragments);
        let prompt = build_prompt(SCHEMA_EXAMPLE, &render_excerpts(&evidence));
        let key = serde_json::json!({"m": "gpt-4o-mini", "c": prompt}).to_string();
        let cache = FileCache::new(&dir.path().join("cache"));
        cache
            .set(
                &key,
                r#"{"project_id": "SPOOFED", "start_date": "2024-01-01", "top_keywords": ["survey"], "bogus": 42, "evidence": [{"doc_path": "fake"}]}"#,
            )
            .unwrap();

        let llm = offline_gateway(dir.path());
        let data = extract_for_project("PRJ-A", &index, &fragments, &llm).await;

        assert_eq!(data["start_date"], "2024-01-01");
        assert_eq!(data["top_keywords"], json!(["survey"]));
        // unknown keys are dropped
        assert!(data.get("bogus").is_none());
        // forced fields win over the model's values
        assert_eq!(data["project_id"], "PRJ-A");
        assert_eq!(data["evidence"][0]["doc_path"], "data/A/a.pdf");
    }

    #[tokio::test]
    async fn non_json_response_is_ignored() {
        let dir = TempDir::new().unwrap();
        let fragments = vec![fragment("PRJ-A", "data/A/a.pdf", 1, "alpha beta")];
        let texts: Vec<String> = fragments.iter().map(|f| f.text.clone()).collect();
        let index = tfidf::fit(&texts);

        let evidence = gather_evidence("PRJ-A", &index, &fragments);
        let prompt = build_prompt(SCHEMA_EXAMPLE, &render_excerpts(&evidence));
        let key = serde_json::json!({"m": "gpt-4o-mini", "c": prompt}).to_string();
        FileCache::new(&dir.path().join("cache"))
            .set(&key, "Sorry, I cannot help with that.")
            .unwrap();

        let llm = offline_gateway(dir.path());
        let data = extract_for_project("PRJ-A", &index, &fragments, &llm).await;
        assert_eq!(data["start_date"], "");
        assert_eq!(data["work_summary"], "");
    }

    async fn test_pool(dir: &TempDir) -> SqlitePool {
        let config = Config {
            paths: crate::config::Paths::new(dir.path()),
            db_path: dir.path().join("test.sqlite"),
            llm: LlmConfig {
                api_key: None,
                model: "gpt-4o-mini".to_string(),
                base_url: String::new(),
                budget_usd: 3.0,
            },
        };
        let pool = db::connect(&config).await.unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        pool
    }

    async fn count(pool: &SqlitePool, table: &str) -> i64 {
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn store_extraction_replaces_children_on_rerun() {
        let dir = TempDir::new().unwrap();
        let pool = test_pool(&dir).await;
        let data = json!({
            "project_id": "PRJ-A",
            "project_title": "Alpha",
            "start_date": "2024-01-01",
            "end_date": null,
            "key_dates": [{"label": "kickoff", "date": "2024-01-05", "source_file": "a.pdf", "page": 1}],
            "contacts": [{"name": "Dana Levi", "email": "dana@example.com"}],
            "work_summary": "Survey work.",
            "top_keywords": ["survey", {"keyword": "mapping", "weight": 0.4}],
            "evidence": [{"doc_path": "data/A/a.pdf", "page": 1, "snippet": "s"}],
        });

        store_extraction(&pool, "PRJ-A", "Alpha", &data).await.unwrap();
        store_extraction(&pool, "PRJ-A", "Alpha", &data).await.unwrap();

        assert_eq!(count(&pool, "projects").await, 1);
        assert_eq!(count(&pool, "key_dates").await, 1);
        assert_eq!(count(&pool, "contacts").await, 1);
        assert_eq!(count(&pool, "keywords").await, 2);
        assert_eq!(count(&pool, "evidence").await, 1);

        let (start, end): (Option<String>, Option<String>) =
            sqlx::query_as("SELECT start_date, end_date FROM projects WHERE project_id = 'PRJ-A'")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(start.as_deref(), Some("2024-01-01"));
        assert_eq!(end, None);

        let (word, weight): (Option<String>, Option<f64>) =
            sqlx::query_as("SELECT keyword, weight FROM keywords WHERE keyword = 'mapping'")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(word.as_deref(), Some("mapping"));
        assert_eq!(weight, Some(0.4));
    }

    #[test]
    fn text_of_coerces_values() {
        assert_eq!(text_of(None), None);
        assert_eq!(text_of(Some(&Value::Null)), None);
        assert_eq!(text_of(Some(&json!("x"))), Some("x".to_string()));
        assert_eq!(text_of(Some(&json!(3))), Some("3".to_string()));
        assert_eq!(
            text_of(Some(&json!(["a", "b"]))),
            Some("[\"a\",\"b\"]".to_string())
        );
    }
}
