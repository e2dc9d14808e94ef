use crate::error::AppResult;
use crate::infrastructure::db::DbPool;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use std::sync::Arc;
use uuid::Uuid;

/// Descriptive data stored next to a generated image
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactMetadata {
    pub owner_id: Uuid,
    pub title: String,
    pub prompt: String,
    pub model: String,
    pub provider: String,
    pub size: String,
    pub style: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct StoredArtifact {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub content_type: String,
    pub data: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

/// Opaque binary store for generated images
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn store(
        &self,
        bytes: &[u8],
        content_type: &str,
        metadata: &ArtifactMetadata,
    ) -> AppResult<Uuid>;

    async fn find(&self, id: Uuid) -> AppResult<Option<StoredArtifact>>;
}

pub struct ArtifactRepository {
    pool: Arc<DbPool>,
}

impl ArtifactRepository {
    pub fn new(pool: Arc<DbPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ArtifactStore for ArtifactRepository {
    async fn store(
        &self,
        bytes: &[u8],
        content_type: &str,
        metadata: &ArtifactMetadata,
    ) -> AppResult<Uuid> {
        let pool = self.pool.as_ref();
        let id = Uuid::new_v4();

        sqlx::query(
            r#"
            INSERT INTO generated_images
                (id, owner_id, title, prompt, model, provider, size, style, content_type, data, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(id)
        .bind(metadata.owner_id)
        .bind(&metadata.title)
        .bind(&metadata.prompt)
        .bind(&metadata.model)
        .bind(&metadata.provider)
        .bind(&metadata.size)
        .bind(&metadata.style)
        .bind(content_type)
        .bind(bytes)
        .bind(Utc::now())
        .execute(pool)
        .await?;

        Ok(id)
    }

    async fn find(&self, id: Uuid) -> AppResult<Option<StoredArtifact>> {
        let pool = self.pool.as_ref();
        let artifact = sqlx::query_as::<_, StoredArtifact>(
            "SELECT id, owner_id, content_type, data, created_at FROM generated_images WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(artifact)
    }
}
