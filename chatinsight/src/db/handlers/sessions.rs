//! Database repository for reading sessions that are waiting for analysis.

use std::collections::HashMap;

use sqlx::PgConnection;
use tracing::instrument;

use crate::db::errors::Result;
use crate::db::models::sessions::{Message, Session, SessionRow};
use crate::types::SessionId;

/// Repository for session reads.
pub struct Sessions<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Sessions<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Sessions with no analysis and at least one message, oldest first, with their messages.
    ///
    /// `limit` caps the number of sessions returned; `None` returns every eligible session.
    #[instrument(skip(self), err)]
    pub async fn find_eligible(&mut self, limit: Option<i64>) -> Result<Vec<Session>> {
        let rows = sqlx::query_as::<_, SessionRow>(
            r#"
            SELECT s.id, s.created_at
            FROM session s
            WHERE NOT EXISTS (SELECT 1 FROM analysis a WHERE a.session_id = s.id)
              AND EXISTS (SELECT 1 FROM message m WHERE m.session_id = s.id)
            ORDER BY s.created_at ASC, s.id ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&mut *self.db)
        .await?;

        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<SessionId> = rows.iter().map(|row| row.id).collect();
        let mut messages = self.messages_for(&ids).await?;

        Ok(rows
            .into_iter()
            .map(|row| Session {
                id: row.id,
                created_at: row.created_at,
                messages: messages.remove(&row.id).unwrap_or_default(),
            })
            .collect())
    }

    /// Messages for the given sessions, keyed by session and ordered by creation time.
    #[instrument(skip(self, ids), fields(count = ids.len()), err)]
    pub async fn messages_for(&mut self, ids: &[SessionId]) -> Result<HashMap<SessionId, Vec<Message>>> {
        let messages = sqlx::query_as::<_, Message>(
            r#"
            SELECT id, session_id, content, remote, created_at
            FROM message
            WHERE session_id = ANY($1)
            ORDER BY session_id, created_at, id
            "#,
        )
        .bind(ids)
        .fetch_all(&mut *self.db)
        .await?;

        let mut by_session: HashMap<SessionId, Vec<Message>> = HashMap::with_capacity(ids.len());
        for message in messages {
            by_session.entry(message.session_id).or_default().push(message);
        }

        Ok(by_session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{insert_analysis_row, insert_message_row, insert_session_row};
    use sqlx::PgPool;

    #[sqlx::test]
    async fn test_find_eligible_skips_analyzed_and_empty_sessions(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();

        let pending = insert_session_row(&mut conn).await;
        insert_message_row(&mut conn, pending, "hello", true).await;
        insert_message_row(&mut conn, pending, "hi, how can I help?", false).await;

        let analyzed = insert_session_row(&mut conn).await;
        insert_message_row(&mut conn, analyzed, "bye", true).await;
        insert_analysis_row(&mut conn, analyzed).await;

        let _empty = insert_session_row(&mut conn).await;

        let sessions = Sessions::new(&mut conn).find_eligible(None).await.unwrap();

        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].id, pending);
        assert_eq!(sessions[0].messages.len(), 2);
        assert_eq!(sessions[0].messages[0].content, "hello");
    }

    #[sqlx::test]
    async fn test_find_eligible_respects_limit(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();

        for _ in 0..3 {
            let id = insert_session_row(&mut conn).await;
            insert_message_row(&mut conn, id, "hello", true).await;
        }

        let sessions = Sessions::new(&mut conn).find_eligible(Some(2)).await.unwrap();
        assert_eq!(sessions.len(), 2);
    }
}
