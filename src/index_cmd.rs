use anyhow::{bail, Context, Result};

use crate::config::Config;
use crate::db;
use crate::jsonl;
use crate::migrate;
use crate::models::Fragment;
use crate::tfidf;

/// Fit the TF-IDF index over the ingested fragments and persist it.
///
/// Writes the fitted index as one artifact, copies the fragment file to
/// `outputs/index.jsonl`, and stores one dense vector per fragment id. A
/// row/id count mismatch is a hard error: it means the artifacts are out
/// of sync and retrieval results would silently point at the wrong
/// fragments.
pub async fn run_build_index(config: &Config) -> Result<()> {
    config.paths.ensure()?;

    let fragments_file = config.paths.fragments_file();
    let fragments: Vec<Fragment> = jsonl::read_jsonl(&fragments_file)?;
    let texts: Vec<String> = fragments.iter().map(|f| f.text.clone()).collect();

    let index = tfidf::fit(&texts);
    let index_file = config.paths.index_file();
    index.save(&index_file)?;
    println!("Built TF-IDF index -> {}", index_file.display());

    let index_copy = config.paths.index_copy_file();
    std::fs::copy(&fragments_file, &index_copy)
        .with_context(|| format!("Failed to copy fragments to {}", index_copy.display()))?;
    println!("Wrote {}", index_copy.display());

    let fragment_ids: Vec<i64> = jsonl::read_jsonl(&config.paths.fragment_ids_file())?;
    if index.num_rows() != fragment_ids.len() {
        bail!(
            "Vector rows ({}) != fragment id count ({})",
            index.num_rows(),
            fragment_ids.len()
        );
    }

    let pool = db::connect(config).await?;
    migrate::run_migrations(&pool).await?;
    for (i, id) in fragment_ids.iter().enumerate() {
        db::store_vector(&pool, *id, &index.dense_row(i)).await?;
    }
    pool.close().await;
    println!("Stored {} vectors into database", fragment_ids.len());
    Ok(())
}
