use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    application::repos::{FriendshipsRepo, RepoError},
    domain::entities::FollowEdge,
};

use super::{PostgresRepositories, map_sqlx_error};

#[derive(sqlx::FromRow)]
struct FollowRow {
    from_user_id: Uuid,
    to_user_id: Uuid,
    created_at: OffsetDateTime,
}

impl From<FollowRow> for FollowEdge {
    fn from(row: FollowRow) -> Self {
        Self {
            from_user_id: row.from_user_id,
            to_user_id: row.to_user_id,
            created_at: row.created_at,
        }
    }
}

#[async_trait]
impl FriendshipsRepo for PostgresRepositories {
    async fn followers(&self, user_id: Uuid) -> Result<Vec<Uuid>, RepoError> {
        let rows = sqlx::query_as::<_, FollowRow>(
            r#"
            SELECT from_user_id, to_user_id, created_at
              FROM friendships
             WHERE to_user_id = $1
             ORDER BY created_at, from_user_id
            "#,
        )
        .bind(user_id)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows
            .into_iter()
            .map(FollowEdge::from)
            .map(|edge| edge.from_user_id)
            .collect())
    }
}
