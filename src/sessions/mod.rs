use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use rand::rngs::SysRng;
use rand::TryRng;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::db::Database;
use crate::error::{GoalListError, Result};
use crate::schema::sessions;

const TOKEN_BYTES: usize = 32;

#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: i32,
    pub user_id: i32,
    pub remember: bool,
    pub created_at: i64,
    pub expires_at: i64,
}

#[derive(Queryable)]
struct SessionRow {
    id: i32,
    #[allow(dead_code)]
    token_digest: String,
    user_id: i32,
    remember: bool,
    created_at: i64,
    expires_at: i64,
}

#[derive(Insertable)]
#[diesel(table_name = sessions)]
struct NewSession<'a> {
    token_digest: &'a str,
    user_id: i32,
    remember: bool,
    created_at: i64,
    expires_at: i64,
}

/// Server-side login sessions. Only the SHA-256 digest of a token is stored;
/// the raw token lives in the client's cookie.
pub struct SessionStore {
    db: Database,
}

impl SessionStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Opens a session for `user_id` valid for `ttl_secs` from `now`.
    /// Returns the raw token to hand to the client.
    pub async fn create(
        &self,
        user_id: i32,
        remember: bool,
        now: i64,
        ttl_secs: i64,
    ) -> Result<(String, Session)> {
        let token = generate_token()?;
        let digest = token_digest(&token);
        let new = NewSession {
            token_digest: &digest,
            user_id,
            remember,
            created_at: now,
            expires_at: now.saturating_add(ttl_secs),
        };

        let mut conn = self.db.conn().await?;
        diesel::insert_into(sessions::table)
            .values(&new)
            .execute(&mut conn)
            .await
            .map_err(|e| GoalListError::Runtime(e.to_string()))?;
        let row: SessionRow = sessions::table
            .filter(sessions::token_digest.eq(&digest))
            .first(&mut conn)
            .await
            .map_err(|e| GoalListError::Runtime(e.to_string()))?;
        tracing::debug!(user_id, remember, "Opened session");
        Ok((token, map_row(row)))
    }

    /// Looks up a live session for `token`. Expired sessions resolve to `None`.
    pub async fn resolve(&self, token: &str, now: i64) -> Result<Option<Session>> {
        let token = token.trim();
        if token.is_empty() {
            return Ok(None);
        }
        let mut conn = self.db.conn().await?;
        let row: Option<SessionRow> = sessions::table
            .filter(sessions::token_digest.eq(token_digest(token)))
            .filter(sessions::expires_at.gt(now))
            .first(&mut conn)
            .await
            .optional()
            .map_err(|e| GoalListError::Runtime(e.to_string()))?;
        Ok(row.map(map_row))
    }

    /// Removes the session behind `token`. Unknown tokens are not an error.
    pub async fn revoke(&self, token: &str) -> Result<()> {
        let mut conn = self.db.conn().await?;
        diesel::delete(sessions::table.filter(sessions::token_digest.eq(token_digest(token))))
            .execute(&mut conn)
            .await
            .map_err(|e| GoalListError::Runtime(e.to_string()))?;
        Ok(())
    }

    pub async fn purge_expired(&self, now: i64) -> Result<usize> {
        let mut conn = self.db.conn().await?;
        let removed = diesel::delete(sessions::table.filter(sessions::expires_at.le(now)))
            .execute(&mut conn)
            .await
            .map_err(|e| GoalListError::Runtime(e.to_string()))?;
        if removed > 0 {
            tracing::info!(removed, "Purged expired sessions");
        }
        Ok(removed)
    }

    pub async fn count_for_user(&self, user_id: i32) -> Result<i64> {
        let mut conn = self.db.conn().await?;
        sessions::table
            .filter(sessions::user_id.eq(user_id))
            .count()
            .get_result(&mut conn)
            .await
            .map_err(|e| GoalListError::Runtime(e.to_string()))
    }
}

fn generate_token() -> Result<String> {
    let mut bytes = [0u8; TOKEN_BYTES];
    SysRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| GoalListError::Runtime(e.to_string()))?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

fn token_digest(token: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(token.as_bytes()))
}

fn map_row(row: SessionRow) -> Session {
    Session {
        id: row.id,
        user_id: row.user_id,
        remember: row.remember,
        created_at: row.created_at,
        expires_at: row.expires_at,
    }
}
