use anyhow::Result;
use sqlx::SqlitePool;

/// Create the schema idempotently. Safe to run before every command.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Fragments keyed by full locator so distinct workbook rows of the
    // same file never collide.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS fragments (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            project_id TEXT NOT NULL,
            project_title TEXT NOT NULL DEFAULT '',
            file_path TEXT NOT NULL,
            page INTEGER NOT NULL DEFAULT 0,
            sheet TEXT NOT NULL DEFAULT '',
            row_idx INTEGER NOT NULL DEFAULT 0,
            text TEXT NOT NULL,
            UNIQUE(project_id, file_path, page, sheet, row_idx)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS fragment_vectors (
            fragment_id INTEGER PRIMARY KEY,
            vector BLOB NOT NULL,
            FOREIGN KEY (fragment_id) REFERENCES fragments(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS projects (
            project_id TEXT PRIMARY KEY,
            project_title TEXT NOT NULL DEFAULT '',
            start_date TEXT,
            end_date TEXT,
            work_summary TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS key_dates (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            project_id TEXT NOT NULL,
            label TEXT,
            date_val TEXT,
            source_file TEXT,
            page TEXT,
            FOREIGN KEY (project_id) REFERENCES projects(project_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS contacts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            project_id TEXT NOT NULL,
            name TEXT,
            role TEXT,
            email_addr TEXT,
            phone TEXT,
            FOREIGN KEY (project_id) REFERENCES projects(project_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS keywords (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            project_id TEXT NOT NULL,
            keyword TEXT,
            weight REAL,
            FOREIGN KEY (project_id) REFERENCES projects(project_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS evidence (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            project_id TEXT NOT NULL,
            file_path TEXT,
            page TEXT,
            snippet TEXT,
            score REAL,
            FOREIGN KEY (project_id) REFERENCES projects(project_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_fragments_project_id ON fragments(project_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_key_dates_project_id ON key_dates(project_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_contacts_project_id ON contacts(project_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_keywords_project_id ON keywords(project_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_evidence_project_id ON evidence(project_id)")
        .execute(pool)
        .await?;

    Ok(())
}
