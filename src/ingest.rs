//! Ingest pipeline: walk project directories, parse documents into
//! fragments, persist them, and write the positional artifact files.
//!
//! Fragment order is load-bearing: `fragments.jsonl` and
//! `fragment_ids.jsonl` are written in the same pass and every later
//! stage identifies fragments by position.

use anyhow::{Context, Result};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use std::path::PathBuf;
use walkdir::WalkDir;

use crate::config::Config;
use crate::db;
use crate::jsonl;
use crate::migrate;
use crate::models::Fragment;
use crate::sources::all_sources;

const INCLUDE_GLOBS: [&str; 3] = ["**/*.pdf", "**/*.xlsx", "**/*.xls"];

pub async fn run_ingest(config: &Config) -> Result<()> {
    config.paths.ensure()?;

    let fragments = scan_data_dir(config)?;
    jsonl::write_jsonl(&config.paths.fragments_file(), &fragments)?;

    let pool = db::connect(config).await?;
    migrate::run_migrations(&pool).await?;
    let mut fragment_ids = Vec::with_capacity(fragments.len());
    for fragment in &fragments {
        fragment_ids.push(db::upsert_fragment(&pool, fragment).await?);
    }
    pool.close().await;

    jsonl::write_jsonl(&config.paths.fragment_ids_file(), &fragment_ids)?;

    println!("Saved {} fragments to database", fragment_ids.len());
    println!(
        "Ingested {} fragments -> {}",
        fragments.len(),
        config.paths.fragments_file().display()
    );
    Ok(())
}

/// Walk `data/<ProjectDir>/` in sorted order and parse every supported
/// document. A file that fails to parse is reported and skipped; it never
/// aborts the batch.
fn scan_data_dir(config: &Config) -> Result<Vec<Fragment>> {
    let data_dir = &config.paths.data_dir;
    let sources = all_sources();
    let include_set = build_globset(&INCLUDE_GLOBS)?;

    let mut project_dirs: Vec<PathBuf> = std::fs::read_dir(data_dir)
        .with_context(|| format!("Failed to read data dir: {}", data_dir.display()))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    project_dirs.sort();

    let mut fragments = Vec::new();
    for project_dir in &project_dirs {
        let project_title = project_dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let project_id = format!("PRJ-{}", project_title);

        for entry in WalkDir::new(project_dir).sort_by_file_name() {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let relative = path.strip_prefix(project_dir).unwrap_or(path);
            if !include_set.is_match(relative) {
                continue;
            }
            let Some(source) = sources.iter().find(|s| s.matches(path)) else {
                continue;
            };

            let bytes = match std::fs::read(path) {
                Ok(b) => b,
                Err(e) => {
                    eprintln!("Warning: skipping {}: {}", path.display(), e);
                    continue;
                }
            };
            match source.fragments(&bytes) {
                Ok(pairs) => {
                    for (locator, text) in pairs {
                        fragments.push(Fragment {
                            file_path: path.display().to_string(),
                            project_id: project_id.clone(),
                            project_title: project_title.clone(),
                            text,
                            locator,
                        });
                    }
                }
                Err(e) => {
                    eprintln!("Warning: skipping {}: {}", path.display(), e);
                }
            }
        }
    }
    Ok(fragments)
}

fn build_globset(patterns: &[&str]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        // document extensions are matched regardless of case
        builder.add(GlobBuilder::new(pattern).case_insensitive(true).build()?);
    }
    Ok(builder.build()?)
}
