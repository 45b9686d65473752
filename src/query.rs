use anyhow::{bail, Result};
use serde::Serialize;

use crate::config::Config;
use crate::db;
use crate::jsonl;
use crate::models::{truncate_chars, Fragment, Locator};
use crate::rank;
use crate::tfidf::FittedIndex;

const RESULT_LIMIT: usize = 5;

#[derive(Serialize)]
struct QueryResult<'a> {
    file_path: &'a str,
    #[serde(flatten)]
    locator: &'a Locator,
    score: f32,
    snippet: &'a str,
}

#[derive(Serialize)]
struct QueryOutput<'a> {
    query: &'a str,
    results: Vec<QueryResult<'a>>,
}

/// Rank stored fragment vectors against an ad-hoc query and print the top
/// results as JSON. No LLM calls.
///
/// An empty index degrades to `{"results": []}`; a count mismatch between
/// fragments and stored vectors is a hard error rather than a silent
/// truncation.
pub async fn run_query(config: &Config, query: &str) -> Result<()> {
    let index = FittedIndex::load(&config.paths.index_file())?;
    let fragments: Vec<Fragment> = jsonl::read_jsonl(&config.paths.fragments_file())?;

    let ids_file = config.paths.fragment_ids_file();
    let fragment_ids: Vec<i64> = if ids_file.exists() {
        jsonl::read_jsonl(&ids_file)?
    } else {
        Vec::new()
    };

    let pool = db::connect(config).await?;
    let by_id = db::fetch_vectors(&pool, &fragment_ids).await?;
    pool.close().await;

    let vectors: Vec<Vec<f32>> = fragment_ids
        .iter()
        .filter_map(|id| by_id.get(id).cloned())
        .collect();

    if vectors.is_empty() {
        let empty = QueryOutput {
            query,
            results: Vec::new(),
        };
        println!("{}", serde_json::to_string_pretty(&empty)?);
        return Ok(());
    }

    if vectors.len() != fragments.len() {
        bail!(
            "Stored vectors ({}) != fragment count ({}); re-run ingest and build-index",
            vectors.len(),
            fragments.len()
        );
    }

    let hits = rank::rank_dense(&index, &vectors, query, RESULT_LIMIT);
    let results: Vec<QueryResult> = hits
        .iter()
        .map(|hit| {
            let fragment = &fragments[hit.index];
            QueryResult {
                file_path: &fragment.file_path,
                locator: &fragment.locator,
                score: hit.score,
                snippet: truncate_chars(&fragment.text, 400),
            }
        })
        .collect();

    let output = QueryOutput { query, results };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
