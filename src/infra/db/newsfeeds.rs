use std::collections::HashSet;

use async_trait::async_trait;
use sqlx::{Postgres, QueryBuilder};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    application::{
        pagination::{FeedCursor, PageRequest},
        repos::{InsertOutcome, NewsfeedRepo, RepoError},
    },
    domain::entities::NewsfeedEntryRecord,
};

use super::{PostgresRepositories, map_sqlx_error};

const NEWSFEED_COLUMNS: &str = "id, user_id, post_id, created_at";

#[derive(sqlx::FromRow)]
struct NewsfeedRow {
    id: Uuid,
    user_id: Uuid,
    post_id: Uuid,
    created_at: OffsetDateTime,
}

impl From<NewsfeedRow> for NewsfeedEntryRecord {
    fn from(row: NewsfeedRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            post_id: row.post_id,
            created_at: row.created_at,
        }
    }
}

#[async_trait]
impl NewsfeedRepo for PostgresRepositories {
    async fn insert_entries(
        &self,
        entries: &[NewsfeedEntryRecord],
    ) -> Result<InsertOutcome, RepoError> {
        let mut outcome = InsertOutcome::default();
        if entries.is_empty() {
            return Ok(outcome);
        }

        let mut tx = self.begin().await.map_err(map_sqlx_error)?;
        for chunk in entries.chunks(self.insert_chunk_size) {
            let mut qb = QueryBuilder::<Postgres>::new("INSERT INTO newsfeeds (");
            qb.push(NEWSFEED_COLUMNS);
            qb.push(") ");
            qb.push_values(chunk, |mut row, entry| {
                row.push_bind(entry.id)
                    .push_bind(entry.user_id)
                    .push_bind(entry.post_id)
                    .push_bind(entry.created_at);
            });
            qb.push(" ON CONFLICT ON CONSTRAINT newsfeeds_user_post_key DO NOTHING RETURNING ");
            qb.push(NEWSFEED_COLUMNS);

            let rows: Vec<NewsfeedRow> = qb
                .build_query_as()
                .fetch_all(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;

            let inserted: HashSet<Uuid> = rows.iter().map(|row| row.user_id).collect();
            outcome.already_present.extend(
                chunk
                    .iter()
                    .map(|entry| entry.user_id)
                    .filter(|user_id| !inserted.contains(user_id)),
            );
            outcome
                .inserted
                .extend(rows.into_iter().map(NewsfeedEntryRecord::from));
        }
        tx.commit().await.map_err(map_sqlx_error)?;

        Ok(outcome)
    }

    async fn list_entries(
        &self,
        user_id: Uuid,
        page: PageRequest<FeedCursor>,
    ) -> Result<Vec<NewsfeedEntryRecord>, RepoError> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT ");
        qb.push(NEWSFEED_COLUMNS);
        qb.push(" FROM newsfeeds WHERE user_id = ");
        qb.push_bind(user_id);

        if let Some(cursor) = page.cursor {
            qb.push(" AND (created_at, id) < (");
            qb.push_bind(cursor.created_at());
            qb.push(", ");
            qb.push_bind(cursor.id());
            qb.push(")");
        }

        qb.push(" ORDER BY created_at DESC, id DESC LIMIT ");
        qb.push_bind(i64::from(page.limit));

        let rows: Vec<NewsfeedRow> = qb
            .build_query_as()
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(NewsfeedEntryRecord::from).collect())
    }

    async fn list_entries_after(
        &self,
        user_id: Uuid,
        after: FeedCursor,
        limit: u32,
    ) -> Result<Vec<NewsfeedEntryRecord>, RepoError> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT ");
        qb.push(NEWSFEED_COLUMNS);
        qb.push(" FROM (SELECT ");
        qb.push(NEWSFEED_COLUMNS);
        qb.push(" FROM newsfeeds WHERE user_id = ");
        qb.push_bind(user_id);
        qb.push(" AND (created_at, id) > (");
        qb.push_bind(after.created_at());
        qb.push(", ");
        qb.push_bind(after.id());
        qb.push(") ORDER BY created_at ASC, id ASC LIMIT ");
        qb.push_bind(i64::from(limit));
        qb.push(") newer ORDER BY created_at DESC, id DESC");

        let rows: Vec<NewsfeedRow> = qb
            .build_query_as()
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(NewsfeedEntryRecord::from).collect())
    }
}
