use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    application::repos::{PostsRepo, RepoError},
    domain::entities::PostRecord,
};

use super::{PostgresRepositories, map_sqlx_error};

#[derive(sqlx::FromRow)]
struct PostRow {
    id: Uuid,
    author_id: Uuid,
    content: String,
    created_at: OffsetDateTime,
}

impl From<PostRow> for PostRecord {
    fn from(row: PostRow) -> Self {
        Self {
            id: row.id,
            author_id: row.author_id,
            content: row.content,
            created_at: row.created_at,
        }
    }
}

#[async_trait]
impl PostsRepo for PostgresRepositories {
    async fn find_post(&self, id: Uuid) -> Result<Option<PostRecord>, RepoError> {
        let row = sqlx::query_as::<_, PostRow>(
            r#"
            SELECT id, author_id, content, created_at
              FROM posts
             WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(PostRecord::from))
    }
}
