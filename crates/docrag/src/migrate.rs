use anyhow::Result;
use sqlx::SqlitePool;

/// Create the document-store schema. Idempotent.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // One row per user collection
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS collections (
            name TEXT PRIMARY KEY,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // One row per ingested document or image
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            collection TEXT NOT NULL,
            doc_name TEXT NOT NULL,
            doc_content TEXT NOT NULL,
            doc_summary TEXT NOT NULL DEFAULT '',
            uploaded_at TEXT NOT NULL,
            is_image INTEGER NOT NULL DEFAULT 0,
            score_json TEXT NOT NULL DEFAULT '{}',
            image_json TEXT,
            UNIQUE(collection, doc_name),
            FOREIGN KEY (collection) REFERENCES collections(name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_collection ON documents(collection)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_documents_uploaded_at ON documents(collection, uploaded_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
