use chrono::NaiveDate;
use diesel::prelude::*;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, RunQueryDsl};
use serde::Serialize;

use crate::db::{now_ts, Database, SqliteAsyncConn};
use crate::error::{GoalListError, Result};
use crate::forms::{TaskForm, TaskUpdateForm};
use crate::goals::recompute_progress;
use crate::schema::{goals, tasks};

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Task {
    pub id: i32,
    pub goal_id: i32,
    pub title: String,
    pub done: bool,
    pub priority: i32,
    pub due: Option<NaiveDate>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Queryable)]
struct TaskRow {
    id: i32,
    goal_id: i32,
    title: String,
    done: bool,
    priority: i32,
    due: Option<NaiveDate>,
    created_at: i64,
    updated_at: i64,
}

#[derive(Insertable)]
#[diesel(table_name = tasks)]
struct NewTask<'a> {
    goal_id: i32,
    title: &'a str,
    done: bool,
    priority: i32,
    due: Option<NaiveDate>,
    created_at: i64,
    updated_at: i64,
}

/// Tasks of goals. Every write recomputes the parent goal's progress in the
/// same transaction.
pub struct TaskStore {
    db: Database,
}

impl TaskStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn create_task(&self, user_id: i32, goal_id: i32, form: TaskForm) -> Result<Task> {
        let form = form.clean()?;
        let now = now_ts();
        let new = NewTask {
            goal_id,
            title: &form.title,
            done: false,
            // clean() rejects a missing priority.
            priority: form.priority.unwrap_or_default(),
            due: form.due,
            created_at: now,
            updated_at: now,
        };

        let mut conn = self.db.conn().await?;
        let task = conn
            .transaction::<_, GoalListError, _>(|conn| {
                async move {
                    ensure_goal_owned(conn, user_id, goal_id).await?;
                    diesel::insert_into(tasks::table)
                        .values(&new)
                        .execute(conn)
                        .await?;
                    let row: TaskRow = tasks::table
                        .filter(tasks::goal_id.eq(goal_id))
                        .order(tasks::id.desc())
                        .first(conn)
                        .await?;
                    recompute_progress(conn, goal_id).await?;
                    Ok(map_row(row))
                }
                .scope_boxed()
            })
            .await?;
        tracing::info!(user_id, goal_id, task_id = task.id, "Created task");
        Ok(task)
    }

    /// Tasks of one goal ordered by priority, then creation.
    pub async fn list_tasks(&self, user_id: i32, goal_id: i32) -> Result<Vec<Task>> {
        let mut conn = self.db.conn().await?;
        ensure_goal_owned(&mut conn, user_id, goal_id).await?;
        let rows: Vec<TaskRow> = tasks::table
            .filter(tasks::goal_id.eq(goal_id))
            .order((tasks::priority.asc(), tasks::id.asc()))
            .load(&mut conn)
            .await
            .map_err(|e| GoalListError::Runtime(e.to_string()))?;
        Ok(rows.into_iter().map(map_row).collect())
    }

    pub async fn get_task(&self, user_id: i32, task_id: i32) -> Result<Task> {
        let mut conn = self.db.conn().await?;
        owned_task(&mut conn, user_id, task_id).await.map(map_row)
    }

    pub async fn update_task(
        &self,
        user_id: i32,
        task_id: i32,
        form: TaskUpdateForm,
    ) -> Result<Task> {
        let form = form.clean()?;
        let now = now_ts();
        let mut conn = self.db.conn().await?;
        let task = conn
            .transaction::<_, GoalListError, _>(|conn| {
                let form = &form;
                async move {
                    let current = owned_task(conn, user_id, task_id).await?;
                    diesel::update(tasks::table.filter(tasks::id.eq(task_id)))
                        .set((
                            tasks::title.eq(&form.title),
                            tasks::done.eq(form.done),
                            tasks::priority.eq(form.priority.unwrap_or_default()),
                            tasks::due.eq(form.due),
                            tasks::updated_at.eq(now),
                        ))
                        .execute(conn)
                        .await?;
                    recompute_progress(conn, current.goal_id).await?;
                    let row: TaskRow = tasks::table
                        .filter(tasks::id.eq(task_id))
                        .first(conn)
                        .await?;
                    Ok(map_row(row))
                }
                .scope_boxed()
            })
            .await?;
        tracing::info!(user_id, task_id, done = task.done, "Updated task");
        Ok(task)
    }

    pub async fn delete_task(&self, user_id: i32, task_id: i32) -> Result<()> {
        let mut conn = self.db.conn().await?;
        conn.transaction::<_, GoalListError, _>(|conn| {
            async move {
                let current = owned_task(conn, user_id, task_id).await?;
                diesel::delete(tasks::table.filter(tasks::id.eq(task_id)))
                    .execute(conn)
                    .await?;
                recompute_progress(conn, current.goal_id).await?;
                Ok(())
            }
            .scope_boxed()
        })
        .await?;
        tracing::info!(user_id, task_id, "Deleted task");
        Ok(())
    }
}

async fn ensure_goal_owned(conn: &mut SqliteAsyncConn, user_id: i32, goal_id: i32) -> Result<()> {
    let found: Option<i32> = goals::table
        .filter(goals::id.eq(goal_id))
        .filter(goals::user_id.eq(user_id))
        .select(goals::id)
        .first(conn)
        .await
        .optional()?;
    found
        .map(|_| ())
        .ok_or_else(|| GoalListError::not_found("goal", goal_id))
}

async fn owned_task(conn: &mut SqliteAsyncConn, user_id: i32, task_id: i32) -> Result<TaskRow> {
    let row: Option<TaskRow> = tasks::table
        .inner_join(goals::table)
        .filter(tasks::id.eq(task_id))
        .filter(goals::user_id.eq(user_id))
        .select(tasks::all_columns)
        .first(conn)
        .await
        .optional()?;
    row.ok_or_else(|| GoalListError::not_found("task", task_id))
}

fn map_row(row: TaskRow) -> Task {
    Task {
        id: row.id,
        goal_id: row.goal_id,
        title: row.title,
        done: row.done,
        priority: row.priority,
        due: row.due,
        created_at: row.created_at,
        updated_at: row.updated_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::UserStore;
    use crate::forms::GoalForm;
    use crate::goals::GoalStore;

    struct Fixture {
        _dir: tempfile::TempDir,
        users: UserStore,
        goals: GoalStore,
        tasks: TaskStore,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().expect("temp dir");
        let db_path = dir.path().join("tasks.db");
        let db = Database::open(db_path.to_string_lossy()).await.expect("db");
        Fixture {
            _dir: dir,
            users: UserStore::new(db.clone()),
            goals: GoalStore::new(db.clone()),
            tasks: TaskStore::new(db),
        }
    }

    fn task(title: &str, priority: i32) -> TaskForm {
        TaskForm {
            title: title.to_string(),
            priority: Some(priority),
            due: None,
        }
    }

    fn finished(task: &Task, done: bool) -> TaskUpdateForm {
        TaskUpdateForm {
            title: task.title.clone(),
            done,
            priority: Some(task.priority),
            due: task.due,
        }
    }

    #[tokio::test]
    async fn progress_follows_done_flags() {
        let f = fixture().await;
        let user = f
            .users
            .create_user("aonori", "a@example.com", "correct-horse")
            .await
            .expect("user");
        let goal = f
            .goals
            .create_goal(
                user.id,
                GoalForm {
                    title: "Marathon".to_string(),
                    detail: None,
                },
            )
            .await
            .expect("goal");

        let mut created = Vec::new();
        for n in 0..4 {
            created.push(
                f.tasks
                    .create_task(user.id, goal.id, task(&format!("run {n}"), 2))
                    .await
                    .expect("task"),
            );
        }
        assert_eq!(f.goals.get_goal(user.id, goal.id).await.expect("goal").progress, 0);

        for t in &created[..3] {
            f.tasks
                .update_task(user.id, t.id, finished(t, true))
                .await
                .expect("finish");
        }
        assert_eq!(f.goals.get_goal(user.id, goal.id).await.expect("goal").progress, 75);

        f.tasks
            .update_task(user.id, created[0].id, finished(&created[0], false))
            .await
            .expect("reopen");
        assert_eq!(f.goals.get_goal(user.id, goal.id).await.expect("goal").progress, 50);

        f.tasks.delete_task(user.id, created[3].id).await.expect("delete");
        assert_eq!(f.goals.get_goal(user.id, goal.id).await.expect("goal").progress, 67);
    }

    #[tokio::test]
    async fn list_orders_by_priority_then_id() {
        let f = fixture().await;
        let user = f
            .users
            .create_user("aonori", "a@example.com", "correct-horse")
            .await
            .expect("user");
        let goal = f
            .goals
            .create_goal(
                user.id,
                GoalForm {
                    title: "Garden".to_string(),
                    detail: None,
                },
            )
            .await
            .expect("goal");
        let low = f.tasks.create_task(user.id, goal.id, task("weed", 3)).await.expect("low");
        let high = f.tasks.create_task(user.id, goal.id, task("seed", 1)).await.expect("high");
        let high2 = f.tasks.create_task(user.id, goal.id, task("water", 1)).await.expect("high2");

        let ids: Vec<i32> = f
            .tasks
            .list_tasks(user.id, goal.id)
            .await
            .expect("list")
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(ids, vec![high.id, high2.id, low.id]);
    }

    #[tokio::test]
    async fn foreign_tasks_and_goals_are_not_found() {
        let f = fixture().await;
        let owner = f
            .users
            .create_user("owner", "owner@example.com", "correct-horse")
            .await
            .expect("owner");
        let other = f
            .users
            .create_user("other", "other@example.com", "correct-horse")
            .await
            .expect("other");
        let goal = f
            .goals
            .create_goal(
                owner.id,
                GoalForm {
                    title: "Private".to_string(),
                    detail: None,
                },
            )
            .await
            .expect("goal");
        let t = f.tasks.create_task(owner.id, goal.id, task("secret", 1)).await.expect("task");

        assert!(matches!(
            f.tasks.create_task(other.id, goal.id, task("sneaky", 1)).await,
            Err(GoalListError::NotFound { entity: "goal", .. })
        ));
        assert!(matches!(
            f.tasks.get_task(other.id, t.id).await,
            Err(GoalListError::NotFound { entity: "task", .. })
        ));
        assert!(matches!(
            f.tasks.update_task(other.id, t.id, finished(&t, true)).await,
            Err(GoalListError::NotFound { .. })
        ));
        assert!(matches!(
            f.tasks.delete_task(other.id, t.id).await,
            Err(GoalListError::NotFound { .. })
        ));
        assert!(!f.tasks.get_task(owner.id, t.id).await.expect("task").done);
    }

    #[tokio::test]
    async fn unchanged_edit_still_touches_updated_at() {
        let f = fixture().await;
        let user = f
            .users
            .create_user("aonori", "a@example.com", "correct-horse")
            .await
            .expect("user");
        let goal = f
            .goals
            .create_goal(
                user.id,
                GoalForm {
                    title: "Marathon".to_string(),
                    detail: None,
                },
            )
            .await
            .expect("goal");
        let t = f.tasks.create_task(user.id, goal.id, task("run", 1)).await.expect("task");

        let mut conn = f.tasks.db.conn().await.expect("conn");
        diesel::update(tasks::table.filter(tasks::id.eq(t.id)))
            .set(tasks::updated_at.eq(0_i64))
            .execute(&mut conn)
            .await
            .expect("rewind");
        drop(conn);

        let edited = f
            .tasks
            .update_task(user.id, t.id, finished(&t, false))
            .await
            .expect("edit");
        assert_eq!(edited.title, t.title);
        assert!(edited.updated_at > 0);
    }

    #[tokio::test]
    async fn deleting_goal_removes_tasks() {
        let f = fixture().await;
        let user = f
            .users
            .create_user("aonori", "a@example.com", "correct-horse")
            .await
            .expect("user");
        let goal = f
            .goals
            .create_goal(
                user.id,
                GoalForm {
                    title: "Short".to_string(),
                    detail: None,
                },
            )
            .await
            .expect("goal");
        let t = f.tasks.create_task(user.id, goal.id, task("only", 1)).await.expect("task");
        f.goals.delete_goal(user.id, goal.id).await.expect("delete goal");
        assert!(matches!(
            f.tasks.get_task(user.id, t.id).await,
            Err(GoalListError::NotFound { .. })
        ));
    }
}
