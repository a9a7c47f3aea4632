use chrono::NaiveDate;
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel_async::RunQueryDsl;
use serde::Serialize;

use crate::db::{now_ts, Database};
use crate::error::{GoalListError, Result};
use crate::forms::{LoginForm, ProfileForm, RegisterForm};
use crate::schema::users;

pub mod password;

/// A registered account. The password hash never leaves this module.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct User {
    pub id: i32,
    pub username: String,
    pub address: String,
    pub job: Option<String>,
    pub introduction: Option<String>,
    pub birthday: Option<NaiveDate>,
    pub picture: Option<String>,
    pub is_active: bool,
    pub is_staff: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Queryable)]
struct UserRow {
    id: i32,
    username: String,
    address: String,
    password_hash: String,
    job: Option<String>,
    introduction: Option<String>,
    birthday: Option<NaiveDate>,
    picture: Option<String>,
    is_active: bool,
    is_staff: bool,
    created_at: i64,
    updated_at: i64,
}

#[derive(Insertable)]
#[diesel(table_name = users)]
struct NewUser<'a> {
    username: &'a str,
    address: &'a str,
    password_hash: &'a str,
    is_active: bool,
    is_staff: bool,
    created_at: i64,
    updated_at: i64,
}

pub struct UserStore {
    db: Database,
}

impl UserStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Registers an account from a submitted form. Nothing is written unless
    /// every field rule, the confirmation match and the strength rules pass.
    pub async fn register(&self, form: RegisterForm) -> Result<User> {
        let form = form.clean()?;
        self.insert_user(&form.username, &form.address, &form.password, false)
            .await
    }

    pub async fn create_user(&self, username: &str, address: &str, password: &str) -> Result<User> {
        self.create_account(username, address, password, false).await
    }

    pub async fn create_superuser(
        &self,
        username: &str,
        address: &str,
        password: &str,
    ) -> Result<User> {
        self.create_account(username, address, password, true).await
    }

    async fn create_account(
        &self,
        username: &str,
        address: &str,
        password: &str,
        is_staff: bool,
    ) -> Result<User> {
        let form = RegisterForm {
            username: username.to_string(),
            address: address.to_string(),
            password: password.to_string(),
            confirm_password: password.to_string(),
        }
        .clean()?;
        self.insert_user(&form.username, &form.address, &form.password, is_staff)
            .await
    }

    async fn insert_user(
        &self,
        username: &str,
        address: &str,
        password: &str,
        is_staff: bool,
    ) -> Result<User> {
        let password_hash = password::hash_password(password)?;
        let now = now_ts();
        let new = NewUser {
            username,
            address,
            password_hash: &password_hash,
            is_active: true,
            is_staff,
            created_at: now,
            updated_at: now,
        };

        let mut conn = self.db.conn().await?;
        diesel::insert_into(users::table)
            .values(&new)
            .execute(&mut conn)
            .await
            .map_err(map_unique_address)?;

        let row: UserRow = users::table
            .filter(users::address.eq(address))
            .first(&mut conn)
            .await
            .map_err(|e| GoalListError::Runtime(e.to_string()))?;
        tracing::info!(user_id = row.id, is_staff, "Registered user");
        Ok(map_row(row))
    }

    /// Checks e-mail and password. Unknown address, wrong password and
    /// inactive account all produce the same error.
    pub async fn authenticate(&self, form: LoginForm) -> Result<User> {
        let form = form.clean()?;
        let mut conn = self.db.conn().await?;
        let row: Option<UserRow> = users::table
            .filter(users::address.eq(&form.address))
            .first(&mut conn)
            .await
            .optional()
            .map_err(|e| GoalListError::Runtime(e.to_string()))?;

        let invalid = || GoalListError::Unauthorized("invalid credentials".to_string());
        let Some(row) = row else {
            return Err(invalid());
        };
        if !row.is_active || !password::verify_password(&row.password_hash, &form.password)? {
            return Err(invalid());
        }
        Ok(map_row(row))
    }

    pub async fn get_user(&self, id: i32) -> Result<User> {
        let mut conn = self.db.conn().await?;
        let row: Option<UserRow> = users::table
            .filter(users::id.eq(id))
            .first(&mut conn)
            .await
            .optional()
            .map_err(|e| GoalListError::Runtime(e.to_string()))?;
        row.map(map_row)
            .ok_or_else(|| GoalListError::not_found("user", id))
    }

    /// Saves the profile screen. `updated_at` moves even when nothing changed.
    pub async fn update_profile(&self, user_id: i32, form: ProfileForm) -> Result<User> {
        let form = form.clean()?;
        let now = now_ts();
        let mut conn = self.db.conn().await?;
        let count = diesel::update(users::table.filter(users::id.eq(user_id)))
            .set((
                users::username.eq(&form.username),
                users::address.eq(&form.address),
                users::job.eq(form.job.as_deref()),
                users::introduction.eq(form.introduction.as_deref()),
                users::birthday.eq(form.birthday),
                users::updated_at.eq(now),
            ))
            .execute(&mut conn)
            .await
            .map_err(map_unique_address)?;
        if count == 0 {
            return Err(GoalListError::not_found("user", user_id));
        }
        drop(conn);
        self.get_user(user_id).await
    }

    /// Removes the account; goals, tasks and sessions go with it.
    pub async fn delete_user(&self, user_id: i32) -> Result<()> {
        let mut conn = self.db.conn().await?;
        let count = diesel::delete(users::table.filter(users::id.eq(user_id)))
            .execute(&mut conn)
            .await
            .map_err(|e| GoalListError::Runtime(e.to_string()))?;
        if count == 0 {
            return Err(GoalListError::not_found("user", user_id));
        }
        tracing::info!(user_id, "Deleted user");
        Ok(())
    }

    pub async fn count_users(&self) -> Result<i64> {
        let mut conn = self.db.conn().await?;
        users::table
            .count()
            .get_result(&mut conn)
            .await
            .map_err(|e| GoalListError::Runtime(e.to_string()))
    }
}

fn map_unique_address(err: DieselError) -> GoalListError {
    match err {
        DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
            GoalListError::field("address", "A user with this email address already exists.")
        }
        other => GoalListError::Runtime(other.to_string()),
    }
}

fn map_row(row: UserRow) -> User {
    User {
        id: row.id,
        username: row.username,
        address: row.address,
        job: row.job,
        introduction: row.introduction,
        birthday: row.birthday,
        picture: row.picture,
        is_active: row.is_active,
        is_staff: row.is_staff,
        created_at: row.created_at,
        updated_at: row.updated_at,
    }
}
