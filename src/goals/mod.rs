use diesel::prelude::*;
use diesel::sql_types::{BigInt, Integer, Text};
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, RunQueryDsl};
use serde::Serialize;

use crate::db::{now_ts, Database, SqliteAsyncConn};
use crate::error::{GoalListError, Result};
use crate::forms::GoalForm;
use crate::schema::{goals, tasks};

/// Maximum number of goals a single user may own.
pub const MAX_GOALS_PER_USER: i64 = 100;

// The count check and the insert are one statement, so two concurrent
// creates cannot both slip under the limit.
const INSERT_GOAL_WITHIN_QUOTA: &str = "INSERT INTO goals \
     (user_id, title, detail, progress, created_at, updated_at) \
     SELECT ?, ?, ?, 0, ?, ? \
     WHERE (SELECT COUNT(*) FROM goals WHERE user_id = ?) < ? \
     RETURNING id";

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Goal {
    pub id: i32,
    pub user_id: i32,
    pub title: String,
    pub detail: String,
    pub progress: i32,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Queryable)]
struct GoalRow {
    id: i32,
    user_id: i32,
    title: String,
    detail: String,
    progress: i32,
    created_at: i64,
    updated_at: i64,
}

#[derive(QueryableByName)]
struct InsertedId {
    #[diesel(sql_type = Integer)]
    id: i32,
}

/// Percentage of finished tasks, rounded half up. A goal without tasks is at 0.
pub fn progress_percent(done: i64, total: i64) -> i32 {
    if total <= 0 {
        return 0;
    }
    let done = done.clamp(0, total);
    ((done * 200 + total) / (2 * total)) as i32
}

/// Recounts the tasks of `goal_id` and stores the derived progress on the goal.
/// Callers run this inside the transaction that changed the tasks.
pub(crate) async fn recompute_progress(conn: &mut SqliteAsyncConn, goal_id: i32) -> Result<i32> {
    let total: i64 = tasks::table
        .filter(tasks::goal_id.eq(goal_id))
        .count()
        .get_result(conn)
        .await?;
    let done: i64 = tasks::table
        .filter(tasks::goal_id.eq(goal_id))
        .filter(tasks::done.eq(true))
        .count()
        .get_result(conn)
        .await?;
    let progress = progress_percent(done, total);
    diesel::update(goals::table.filter(goals::id.eq(goal_id)))
        .set(goals::progress.eq(progress))
        .execute(conn)
        .await?;
    Ok(progress)
}

pub struct GoalStore {
    db: Database,
}

impl GoalStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn create_goal(&self, user_id: i32, form: GoalForm) -> Result<Goal> {
        let form = form.clean()?;
        let now = now_ts();
        let mut conn = self.db.conn().await?;
        let inserted: Option<InsertedId> = diesel::sql_query(INSERT_GOAL_WITHIN_QUOTA)
            .bind::<Integer, _>(user_id)
            .bind::<Text, _>(&form.title)
            .bind::<Text, _>(form.detail_text())
            .bind::<BigInt, _>(now)
            .bind::<BigInt, _>(now)
            .bind::<Integer, _>(user_id)
            .bind::<BigInt, _>(MAX_GOALS_PER_USER)
            .get_result(&mut conn)
            .await
            .optional()
            .map_err(|e| GoalListError::Runtime(e.to_string()))?;

        let Some(inserted) = inserted else {
            tracing::warn!(user_id, "Goal quota reached");
            return Err(GoalListError::Domain("goal list limit reached".to_string()));
        };
        tracing::info!(user_id, goal_id = inserted.id, "Created goal");
        load_goal(&mut conn, inserted.id).await
    }

    /// Goals of `user_id`, newest first.
    pub async fn list_goals(&self, user_id: i32) -> Result<Vec<Goal>> {
        let mut conn = self.db.conn().await?;
        let rows: Vec<GoalRow> = goals::table
            .filter(goals::user_id.eq(user_id))
            .order((goals::created_at.desc(), goals::id.desc()))
            .load(&mut conn)
            .await
            .map_err(|e| GoalListError::Runtime(e.to_string()))?;
        Ok(rows.into_iter().map(map_row).collect())
    }

    /// Reads a goal owned by `user_id`. Reading never writes.
    pub async fn get_goal(&self, user_id: i32, goal_id: i32) -> Result<Goal> {
        let mut conn = self.db.conn().await?;
        let row: Option<GoalRow> = goals::table
            .filter(goals::id.eq(goal_id))
            .filter(goals::user_id.eq(user_id))
            .first(&mut conn)
            .await
            .optional()
            .map_err(|e| GoalListError::Runtime(e.to_string()))?;
        row.map(map_row)
            .ok_or_else(|| GoalListError::not_found("goal", goal_id))
    }

    /// Reads any goal regardless of owner. Used by admin tooling.
    pub async fn find_goal(&self, goal_id: i32) -> Result<Goal> {
        let mut conn = self.db.conn().await?;
        load_goal(&mut conn, goal_id).await
    }

    /// Edits title and detail. Quota does not apply to edits.
    pub async fn update_goal(&self, user_id: i32, goal_id: i32, form: GoalForm) -> Result<Goal> {
        let form = form.clean()?;
        let mut conn = self.db.conn().await?;
        let count = diesel::update(
            goals::table
                .filter(goals::id.eq(goal_id))
                .filter(goals::user_id.eq(user_id)),
        )
        .set((
            goals::title.eq(&form.title),
            goals::detail.eq(form.detail_text()),
            goals::updated_at.eq(now_ts()),
        ))
        .execute(&mut conn)
        .await
        .map_err(|e| GoalListError::Runtime(e.to_string()))?;
        if count == 0 {
            return Err(GoalListError::not_found("goal", goal_id));
        }
        tracing::info!(user_id, goal_id, "Updated goal");
        load_goal(&mut conn, goal_id).await
    }

    /// Deletes a goal and, through the foreign key, its tasks.
    pub async fn delete_goal(&self, user_id: i32, goal_id: i32) -> Result<()> {
        let mut conn = self.db.conn().await?;
        let count = diesel::delete(
            goals::table
                .filter(goals::id.eq(goal_id))
                .filter(goals::user_id.eq(user_id)),
        )
        .execute(&mut conn)
        .await
        .map_err(|e| GoalListError::Runtime(e.to_string()))?;
        if count == 0 {
            return Err(GoalListError::not_found("goal", goal_id));
        }
        tracing::info!(user_id, goal_id, "Deleted goal");
        Ok(())
    }

    pub async fn count_goals(&self, user_id: i32) -> Result<i64> {
        let mut conn = self.db.conn().await?;
        goals::table
            .filter(goals::user_id.eq(user_id))
            .count()
            .get_result(&mut conn)
            .await
            .map_err(|e| GoalListError::Runtime(e.to_string()))
    }

    /// Recomputes and stores progress for any goal. Returns the new value.
    pub async fn refresh_progress(&self, goal_id: i32) -> Result<i32> {
        let mut conn = self.db.conn().await?;
        conn.transaction::<_, GoalListError, _>(|conn| {
            async move {
                let exists: Option<i32> = goals::table
                    .filter(goals::id.eq(goal_id))
                    .select(goals::id)
                    .first(conn)
                    .await
                    .optional()?;
                if exists.is_none() {
                    return Err(GoalListError::not_found("goal", goal_id));
                }
                recompute_progress(conn, goal_id).await
            }
            .scope_boxed()
        })
        .await
    }
}

async fn load_goal(conn: &mut SqliteAsyncConn, goal_id: i32) -> Result<Goal> {
    let row: Option<GoalRow> = goals::table
        .filter(goals::id.eq(goal_id))
        .first(conn)
        .await
        .optional()
        .map_err(|e| GoalListError::Runtime(e.to_string()))?;
    row.map(map_row)
        .ok_or_else(|| GoalListError::not_found("goal", goal_id))
}

fn map_row(row: GoalRow) -> Goal {
    Goal {
        id: row.id,
        user_id: row.user_id,
        title: row.title,
        detail: row.detail,
        progress: row.progress,
        created_at: row.created_at,
        updated_at: row.updated_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::UserStore;

    async fn stores() -> (tempfile::TempDir, UserStore, GoalStore) {
        let dir = tempfile::tempdir().expect("temp dir");
        let db_path = dir.path().join("goals.db");
        let db = Database::open(db_path.to_string_lossy()).await.expect("db");
        (dir, UserStore::new(db.clone()), GoalStore::new(db))
    }

    fn goal(title: &str) -> GoalForm {
        GoalForm {
            title: title.to_string(),
            detail: None,
        }
    }

    #[test]
    fn progress_rounds_half_up() {
        assert_eq!(progress_percent(0, 0), 0);
        assert_eq!(progress_percent(3, 4), 75);
        assert_eq!(progress_percent(1, 3), 33);
        assert_eq!(progress_percent(2, 3), 67);
        assert_eq!(progress_percent(1, 8), 13);
        assert_eq!(progress_percent(5, 5), 100);
    }

    #[tokio::test]
    async fn quota_blocks_the_hundred_and_first_goal() {
        let (_dir, users, store) = stores().await;
        let user = users
            .create_user("aonori", "a@example.com", "correct-horse")
            .await
            .expect("user");

        let mut last = None;
        for n in 0..MAX_GOALS_PER_USER {
            last = Some(store.create_goal(user.id, goal(&format!("g{n}"))).await.expect("goal"));
        }
        let err = store.create_goal(user.id, goal("one more")).await.unwrap_err();
        assert!(matches!(err, GoalListError::Domain(ref m) if m == "goal list limit reached"));
        assert_eq!(store.count_goals(user.id).await.expect("count"), MAX_GOALS_PER_USER);

        // Editing at the limit is still allowed.
        let last = last.expect("last goal");
        let edited = store
            .update_goal(
                user.id,
                last.id,
                GoalForm {
                    title: "renamed".to_string(),
                    detail: Some("still here".to_string()),
                },
            )
            .await
            .expect("edit at quota");
        assert_eq!(edited.title, "renamed");
        assert_eq!(edited.detail, "still here");
    }

    #[tokio::test]
    async fn foreign_goals_look_missing() {
        let (_dir, users, store) = stores().await;
        let owner = users
            .create_user("owner", "owner@example.com", "correct-horse")
            .await
            .expect("owner");
        let other = users
            .create_user("other", "other@example.com", "correct-horse")
            .await
            .expect("other");
        let created = store.create_goal(owner.id, goal("Marathon")).await.expect("goal");
        assert_eq!(created.progress, 0);
        assert_eq!(created.detail, "");

        assert!(matches!(
            store.get_goal(other.id, created.id).await,
            Err(GoalListError::NotFound { entity: "goal", .. })
        ));
        assert!(matches!(
            store.update_goal(other.id, created.id, goal("mine now")).await,
            Err(GoalListError::NotFound { .. })
        ));
        assert!(matches!(
            store.delete_goal(other.id, created.id).await,
            Err(GoalListError::NotFound { .. })
        ));
        assert_eq!(store.get_goal(owner.id, created.id).await.expect("still there").title, "Marathon");
    }

    #[tokio::test]
    async fn list_is_newest_first_and_user_delete_cascades() {
        let (_dir, users, store) = stores().await;
        let user = users
            .create_user("aonori", "a@example.com", "correct-horse")
            .await
            .expect("user");
        let first = store.create_goal(user.id, goal("first")).await.expect("first");
        let second = store.create_goal(user.id, goal("second")).await.expect("second");

        let listed: Vec<i32> = store
            .list_goals(user.id)
            .await
            .expect("list")
            .into_iter()
            .map(|g| g.id)
            .collect();
        assert_eq!(listed, vec![second.id, first.id]);

        users.delete_user(user.id).await.expect("delete user");
        assert_eq!(store.count_goals(user.id).await.expect("count"), 0);
        assert!(matches!(
            store.find_goal(first.id).await,
            Err(GoalListError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn unchanged_edit_still_touches_updated_at() {
        let (_dir, users, store) = stores().await;
        let user = users
            .create_user("aonori", "a@example.com", "correct-horse")
            .await
            .expect("user");
        let created = store.create_goal(user.id, goal("Marathon")).await.expect("goal");

        let mut conn = store.db.conn().await.expect("conn");
        diesel::update(goals::table.filter(goals::id.eq(created.id)))
            .set(goals::updated_at.eq(0_i64))
            .execute(&mut conn)
            .await
            .expect("rewind");
        drop(conn);

        let edited = store
            .update_goal(user.id, created.id, goal("Marathon"))
            .await
            .expect("edit");
        assert_eq!(edited.title, "Marathon");
        assert!(edited.updated_at > 0);
    }

    #[tokio::test]
    async fn refresh_progress_of_missing_goal_is_not_found() {
        let (_dir, _users, store) = stores().await;
        assert!(matches!(
            store.refresh_progress(9).await,
            Err(GoalListError::NotFound { entity: "goal", id: 9 })
        ));
    }
}
