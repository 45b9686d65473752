use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::collections::HashMap;
use std::str::FromStr;

use crate::config::Config;
use crate::models::{Fragment, Locator};
use crate::rank::{blob_to_vec, vec_to_blob};

pub async fn connect(config: &Config) -> Result<SqlitePool> {
    let db_path = &config.db_path;

    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    Ok(pool)
}

/// Locator columns for the fragments table: `(page, sheet, row_idx)`.
///
/// PDF fragments store their page with empty sheet columns; workbook
/// fragments store page 0 with their sheet and row. Together with
/// `project_id` and `file_path` these form the fragment identity, so two
/// rows of the same workbook never collapse into one.
fn locator_columns(locator: &Locator) -> (i64, &str, i64) {
    match locator {
        Locator::Page { page } => (*page as i64, "", 0),
        Locator::Cell { sheet, row } => (0, sheet.as_str(), *row as i64),
    }
}

/// Insert a fragment and return its id. Re-ingesting an existing fragment
/// returns the stored id, keeping the positional id file in sync.
pub async fn upsert_fragment(pool: &SqlitePool, fragment: &Fragment) -> Result<i64> {
    let (page, sheet, row_idx) = locator_columns(&fragment.locator);
    let inserted: Option<i64> = sqlx::query_scalar(
        r#"
        INSERT INTO fragments (project_id, project_title, file_path, page, sheet, row_idx, text)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(project_id, file_path, page, sheet, row_idx) DO NOTHING
        RETURNING id
        "#,
    )
    .bind(&fragment.project_id)
    .bind(&fragment.project_title)
    .bind(&fragment.file_path)
    .bind(page)
    .bind(sheet)
    .bind(row_idx)
    .bind(&fragment.text)
    .fetch_optional(pool)
    .await?;

    if let Some(id) = inserted {
        return Ok(id);
    }

    let id: i64 = sqlx::query_scalar(
        r#"
        SELECT id FROM fragments
        WHERE project_id = ? AND file_path = ? AND page = ? AND sheet = ? AND row_idx = ?
        "#,
    )
    .bind(&fragment.project_id)
    .bind(&fragment.file_path)
    .bind(page)
    .bind(sheet)
    .bind(row_idx)
    .fetch_one(pool)
    .await
    .context("Fragment conflicted on insert but was not found")?;
    Ok(id)
}

/// Store one dense vector per fragment, replacing any previous vector.
pub async fn store_vector(pool: &SqlitePool, fragment_id: i64, vector: &[f32]) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO fragment_vectors (fragment_id, vector)
        VALUES (?, ?)
        ON CONFLICT(fragment_id) DO UPDATE SET vector = excluded.vector
        "#,
    )
    .bind(fragment_id)
    .bind(vec_to_blob(vector))
    .execute(pool)
    .await?;
    Ok(())
}

/// Fetch stored vectors for the given fragment ids, keyed by id.
pub async fn fetch_vectors(pool: &SqlitePool, ids: &[i64]) -> Result<HashMap<i64, Vec<f32>>> {
    if ids.is_empty() {
        return Ok(HashMap::new());
    }
    let placeholders = vec!["?"; ids.len()].join(", ");
    let sql = format!(
        "SELECT fragment_id, vector FROM fragment_vectors WHERE fragment_id IN ({})",
        placeholders
    );
    let mut query = sqlx::query_as::<_, (i64, Vec<u8>)>(&sql);
    for id in ids {
        query = query.bind(id);
    }
    let rows = query.fetch_all(pool).await?;
    Ok(rows
        .into_iter()
        .map(|(id, blob)| (id, blob_to_vec(&blob)))
        .collect())
}
