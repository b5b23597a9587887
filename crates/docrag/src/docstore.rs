//! SQLite-backed [`DocumentStore`].
//!
//! A user collection is a row in `collections`; documents are rows in
//! `documents` keyed by `(collection, doc_name)`. Pool timeouts, I/O
//! errors and lock contention map to `StoreUnavailable` and are retried.

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use docrag_core::models::{DocumentRecord, DocumentUpdate, RougeScores, StoredDocument};
use docrag_core::store::DocumentStore;
use docrag_core::{RagError, Result};

use crate::retry::RetryPolicy;

const SERVICE: &str = "sqlite";

pub struct SqliteDocumentStore {
    pool: SqlitePool,
    policy: RetryPolicy,
}

impl SqliteDocumentStore {
    pub fn new(pool: SqlitePool, policy: RetryPolicy) -> Self {
        Self { pool, policy }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn map_sqlx(err: sqlx::Error) -> RagError {
    match &err {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            RagError::unavailable(SERVICE, err.to_string())
        }
        sqlx::Error::Database(db) if db.message().contains("database is locked") => {
            RagError::unavailable(SERVICE, err.to_string())
        }
        _ => RagError::backend(SERVICE, err.to_string()),
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| RagError::backend(SERVICE, e.to_string()))
}

fn row_to_document(row: &SqliteRow) -> Result<StoredDocument> {
    let score_json: String = row.get("score_json");
    let image_json: Option<String> = row.get("image_json");
    let rouge_score: RougeScores = serde_json::from_str(&score_json).unwrap_or_default();
    let image = match image_json {
        Some(json) => Some(
            serde_json::from_str(&json)
                .map_err(|e| RagError::backend(SERVICE, format!("bad image_json: {}", e)))?,
        ),
        None => None,
    };
    Ok(StoredDocument {
        id: row.get("id"),
        record: DocumentRecord {
            doc_name: row.get("doc_name"),
            doc_content: row.get("doc_content"),
            doc_summary: row.get("doc_summary"),
            uploaded_at: row.get("uploaded_at"),
            is_image: row.get::<i64, _>("is_image") != 0,
            rouge_score,
            image,
        },
    })
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn collection_exists(&self, collection: &str) -> Result<bool> {
        self.policy
            .run("sqlite.collection_exists", || async {
                let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM collections WHERE name = ?")
                    .bind(collection)
                    .fetch_one(&self.pool)
                    .await
                    .map_err(map_sqlx)?;
                Ok(n > 0)
            })
            .await
    }

    async fn get_or_create_collection(&self, collection: &str) -> Result<()> {
        self.policy
            .run("sqlite.create_collection", || async {
                sqlx::query("INSERT OR IGNORE INTO collections (name, created_at) VALUES (?, ?)")
                    .bind(collection)
                    .bind(chrono::Utc::now().timestamp())
                    .execute(&self.pool)
                    .await
                    .map_err(map_sqlx)?;
                Ok(())
            })
            .await
    }

    async fn find_by_doc_name(
        &self,
        collection: &str,
        doc_name: &str,
    ) -> Result<Option<StoredDocument>> {
        self.policy
            .run("sqlite.find_by_doc_name", || async {
                let row = sqlx::query(
                    "SELECT * FROM documents WHERE collection = ? AND doc_name = ?",
                )
                .bind(collection)
                .bind(doc_name)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx)?;
                row.as_ref().map(row_to_document).transpose()
            })
            .await
    }

    async fn insert(&self, collection: &str, record: &DocumentRecord) -> Result<String> {
        let score_json = to_json(&record.rouge_score)?;
        let image_json = record.image.as_ref().map(to_json).transpose()?;

        self.policy
            .run("sqlite.insert", || async {
                let id = uuid::Uuid::new_v4().to_string();
                let mut tx = self.pool.begin().await.map_err(map_sqlx)?;
                sqlx::query("INSERT OR IGNORE INTO collections (name, created_at) VALUES (?, ?)")
                    .bind(collection)
                    .bind(chrono::Utc::now().timestamp())
                    .execute(&mut *tx)
                    .await
                    .map_err(map_sqlx)?;
                let inserted = sqlx::query(
                    r#"
                    INSERT INTO documents (id, collection, doc_name, doc_content, doc_summary,
                                           uploaded_at, is_image, score_json, image_json)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&id)
                .bind(collection)
                .bind(&record.doc_name)
                .bind(&record.doc_content)
                .bind(&record.doc_summary)
                .bind(&record.uploaded_at)
                .bind(record.is_image as i64)
                .bind(&score_json)
                .bind(&image_json)
                .execute(&mut *tx)
                .await;
                match inserted {
                    Ok(_) => {}
                    Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                        return Err(RagError::DuplicateDocument(record.doc_name.clone()));
                    }
                    Err(e) => return Err(map_sqlx(e)),
                }
                tx.commit().await.map_err(map_sqlx)?;
                Ok(id)
            })
            .await
    }

    async fn update_fields(
        &self,
        collection: &str,
        doc_name: &str,
        update: &DocumentUpdate,
    ) -> Result<bool> {
        if update.is_empty() {
            return Ok(self.find_by_doc_name(collection, doc_name).await?.is_some());
        }
        let score_json = update.rouge_score.as_ref().map(to_json).transpose()?;

        self.policy
            .run("sqlite.update_fields", || async {
                let result = sqlx::query(
                    r#"
                    UPDATE documents SET
                        doc_summary = COALESCE(?, doc_summary),
                        score_json = COALESCE(?, score_json)
                    WHERE collection = ? AND doc_name = ?
                    "#,
                )
                .bind(&update.doc_summary)
                .bind(&score_json)
                .bind(collection)
                .bind(doc_name)
                .execute(&self.pool)
                .await
                .map_err(map_sqlx)?;
                Ok(result.rows_affected() > 0)
            })
            .await
    }

    async fn delete_by_doc_name(&self, collection: &str, doc_name: &str) -> Result<bool> {
        self.policy
            .run("sqlite.delete_by_doc_name", || async {
                let result = sqlx::query("DELETE FROM documents WHERE collection = ? AND doc_name = ?")
                    .bind(collection)
                    .bind(doc_name)
                    .execute(&self.pool)
                    .await
                    .map_err(map_sqlx)?;
                Ok(result.rows_affected() > 0)
            })
            .await
    }

    async fn list_all(&self, collection: &str) -> Result<Vec<StoredDocument>> {
        self.policy
            .run("sqlite.list_all", || async {
                let rows = sqlx::query(
                    "SELECT * FROM documents WHERE collection = ? ORDER BY uploaded_at, doc_name",
                )
                .bind(collection)
                .fetch_all(&self.pool)
                .await
                .map_err(map_sqlx)?;
                rows.iter().map(row_to_document).collect()
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docrag_core::models::ImageMetadata;

    async fn store() -> (tempfile::TempDir, SqliteDocumentStore) {
        let dir = tempfile::tempdir().unwrap();
        let pool = crate::db::connect_path(&dir.path().join("docrag.sqlite"))
            .await
            .unwrap();
        crate::migrate::run_migrations(&pool).await.unwrap();
        (dir, SqliteDocumentStore::new(pool, RetryPolicy::new(0)))
    }

    fn record(name: &str) -> DocumentRecord {
        DocumentRecord {
            doc_name: name.to_string(),
            doc_content: "Alpha Beta".to_string(),
            doc_summary: String::new(),
            uploaded_at: "2026-01-01T00:00:00+00:00".to_string(),
            is_image: false,
            rouge_score: RougeScores::default(),
            image: None,
        }
    }

    #[tokio::test]
    async fn collection_lifecycle() {
        let (_dir, store) = store().await;
        assert!(!store.collection_exists("user_a").await.unwrap());
        store.get_or_create_collection("user_a").await.unwrap();
        store.get_or_create_collection("user_a").await.unwrap();
        assert!(store.collection_exists("user_a").await.unwrap());
    }

    #[tokio::test]
    async fn insert_find_and_duplicate() {
        let (_dir, store) = store().await;
        let id = store.insert("user_a", &record("notes.txt")).await.unwrap();
        assert!(store.collection_exists("user_a").await.unwrap());

        let found = store
            .find_by_doc_name("user_a", "notes.txt")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, id);
        assert_eq!(found.record, record("notes.txt"));

        let err = store.insert("user_a", &record("notes.txt")).await.unwrap_err();
        assert!(matches!(err, RagError::DuplicateDocument(_)));

        // Same name in another collection is fine
        store.insert("user_b", &record("notes.txt")).await.unwrap();
    }

    #[tokio::test]
    async fn image_metadata_round_trips() {
        let (_dir, store) = store().await;
        let mut rec = record("cat.png");
        rec.is_image = true;
        rec.image = Some(ImageMetadata {
            width: 640,
            height: 480,
            format: "png".into(),
            size_bytes: 1234,
        });
        store.insert("user_a", &rec).await.unwrap();
        let found = store.find_by_doc_name("user_a", "cat.png").await.unwrap().unwrap();
        assert_eq!(found.record, rec);
    }

    #[tokio::test]
    async fn update_delete_and_list() {
        let (_dir, store) = store().await;
        store.insert("user_a", &record("a.txt")).await.unwrap();
        store.insert("user_a", &record("b.txt")).await.unwrap();

        let update = DocumentUpdate {
            doc_summary: Some("Alpha".into()),
            rouge_score: Some(RougeScores {
                rouge1: 0.5,
                rouge2: 0.0,
                rouge_l: 0.5,
            }),
        };
        assert!(store.update_fields("user_a", "a.txt", &update).await.unwrap());
        assert!(!store.update_fields("user_a", "zzz.txt", &update).await.unwrap());
        let a = store.find_by_doc_name("user_a", "a.txt").await.unwrap().unwrap();
        assert_eq!(a.record.doc_summary, "Alpha");
        assert_eq!(a.record.rouge_score.rouge1, 0.5);

        assert_eq!(store.list_all("user_a").await.unwrap().len(), 2);
        assert!(store.delete_by_doc_name("user_a", "a.txt").await.unwrap());
        assert!(!store.delete_by_doc_name("user_a", "a.txt").await.unwrap());
        let rest = store.list_all("user_a").await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].record.doc_name, "b.txt");
        assert!(store.list_all("user_nobody").await.unwrap().is_empty());
    }
}
