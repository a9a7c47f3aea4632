//! Submitted forms and the server-side rules they must satisfy.
//!
//! Every form follows the same shape: `clean()` trims the submitted text,
//! folds blank optional fields into `None`, then runs the declarative
//! `validator` rules. Failures come back as [`FieldErrors`] so a handler can
//! render one message list per field.

use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError, ValidationErrors};

use crate::error::{GoalListError, Result};

pub const PASSWORD_MIN_CHARS: usize = 8;

/// Per-field error messages, ordered by field name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FieldErrors(BTreeMap<String, Vec<String>>);

impl FieldErrors {
    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.0
            .entry(field.to_string())
            .or_default()
            .push(message.into());
    }

    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.0.get(field).map(Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_result(self) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(GoalListError::Validation(self))
        }
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, messages) in &self.0 {
            for message in messages {
                if !first {
                    f.write_str("; ")?;
                }
                write!(f, "{field}: {message}")?;
                first = false;
            }
        }
        Ok(())
    }
}

impl From<ValidationErrors> for FieldErrors {
    fn from(errors: ValidationErrors) -> Self {
        let mut out = FieldErrors::default();
        for (field, list) in errors.field_errors() {
            for error in list {
                let message = error
                    .message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| error.code.to_string());
                out.add(&field, message);
            }
        }
        out
    }
}

fn check<T: Validate>(form: &T) -> Result<()> {
    form.validate()
        .map_err(|errors| GoalListError::Validation(errors.into()))
}

fn required(value: &str) -> std::result::Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new("required").with_message("This field is required.".into()));
    }
    Ok(())
}

fn trimmed(value: String) -> String {
    value.trim().to_string()
}

fn blank_to_none(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RegisterForm {
    #[validate(
        custom(function = "required"),
        length(max = 10, message = "Enter at most 10 characters.")
    )]
    #[serde(default)]
    pub username: String,
    #[validate(email(message = "Enter a valid email address."))]
    #[serde(default)]
    pub address: String,
    #[validate(
        custom(function = "required"),
        length(max = 30, message = "Enter at most 30 characters.")
    )]
    #[serde(default)]
    pub password: String,
    #[validate(
        custom(function = "required"),
        length(max = 30, message = "Enter at most 30 characters.")
    )]
    #[serde(default)]
    pub confirm_password: String,
}

impl RegisterForm {
    /// Field rules first, then the confirmation match, then password strength.
    pub fn clean(mut self) -> Result<Self> {
        self.username = trimmed(self.username);
        self.address = trimmed(self.address);
        check(&self)?;

        if self.password != self.confirm_password {
            return Err(GoalListError::Domain("passwords do not match".to_string()));
        }

        let mut errors = FieldErrors::default();
        for problem in password_problems(&self.password, &self.username, &self.address) {
            errors.add("password", problem);
        }
        errors.into_result()?;
        Ok(self)
    }
}

/// Strength rules applied to a new password. Returns one message per violated rule.
pub fn password_problems(password: &str, username: &str, address: &str) -> Vec<String> {
    let mut problems = Vec::new();
    if password.chars().count() < PASSWORD_MIN_CHARS {
        problems.push(format!(
            "This password is too short. It must contain at least {PASSWORD_MIN_CHARS} characters."
        ));
    }
    if !password.is_empty() && password.chars().all(|c| c.is_ascii_digit()) {
        problems.push("This password is entirely numeric.".to_string());
    }
    let lowered = password.to_lowercase();
    let local_part = address.split('@').next().unwrap_or_default().to_lowercase();
    if lowered == username.to_lowercase() || (!local_part.is_empty() && lowered == local_part) {
        problems.push("The password is too similar to your account details.".to_string());
    }
    problems
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct LoginForm {
    #[validate(email(message = "Enter a valid email address."))]
    #[serde(default)]
    pub address: String,
    #[validate(
        custom(function = "required"),
        length(max = 30, message = "Enter at most 30 characters.")
    )]
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub remember: bool,
}

impl LoginForm {
    pub fn clean(mut self) -> Result<Self> {
        self.address = trimmed(self.address);
        check(&self)?;
        Ok(self)
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ProfileForm {
    #[validate(
        custom(function = "required"),
        length(max = 10, message = "Enter at most 10 characters.")
    )]
    #[serde(default)]
    pub username: String,
    #[validate(email(message = "Enter a valid email address."))]
    #[serde(default)]
    pub address: String,
    #[validate(length(max = 10, message = "Enter at most 10 characters."))]
    #[serde(default)]
    pub job: Option<String>,
    #[validate(length(max = 15, message = "Enter at most 15 characters."))]
    #[serde(default)]
    pub introduction: Option<String>,
    #[serde(default)]
    pub birthday: Option<NaiveDate>,
}

impl ProfileForm {
    pub fn clean(mut self) -> Result<Self> {
        self.username = trimmed(self.username);
        self.address = trimmed(self.address);
        self.job = blank_to_none(self.job);
        self.introduction = blank_to_none(self.introduction);
        check(&self)?;
        Ok(self)
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct GoalForm {
    #[validate(
        custom(function = "required"),
        length(max = 15, message = "Enter at most 15 characters.")
    )]
    #[serde(default)]
    pub title: String,
    #[validate(length(max = 30, message = "Enter at most 30 characters."))]
    #[serde(default)]
    pub detail: Option<String>,
}

impl GoalForm {
    pub fn clean(mut self) -> Result<Self> {
        self.title = trimmed(self.title);
        self.detail = blank_to_none(self.detail);
        check(&self)?;
        Ok(self)
    }

    pub fn detail_text(&self) -> &str {
        self.detail.as_deref().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct TaskForm {
    #[validate(
        custom(function = "required"),
        length(max = 50, message = "Enter at most 50 characters.")
    )]
    #[serde(default)]
    pub title: String,
    #[validate(required(message = "This field is required."))]
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default)]
    pub due: Option<NaiveDate>,
}

impl TaskForm {
    pub fn clean(mut self) -> Result<Self> {
        self.title = trimmed(self.title);
        check(&self)?;
        Ok(self)
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct TaskUpdateForm {
    #[validate(
        custom(function = "required"),
        length(max = 50, message = "Enter at most 50 characters.")
    )]
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub done: bool,
    #[validate(required(message = "This field is required."))]
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default)]
    pub due: Option<NaiveDate>,
}

impl TaskUpdateForm {
    pub fn clean(mut self) -> Result<Self> {
        self.title = trimmed(self.title);
        check(&self)?;
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn register(username: &str, password: &str, confirm: &str) -> RegisterForm {
        RegisterForm {
            username: username.to_string(),
            address: "aonori@example.com".to_string(),
            password: password.to_string(),
            confirm_password: confirm.to_string(),
        }
    }

    #[test]
    fn register_mismatch_is_a_domain_error() {
        let err = register("aonori", "correct-horse", "correct-hors")
            .clean()
            .unwrap_err();
        assert!(matches!(err, GoalListError::Domain(ref m) if m == "passwords do not match"));
    }

    #[test]
    fn register_rejects_weak_passwords_per_field() {
        let GoalListError::Validation(errors) =
            register("aonori", "1234567", "1234567").clean().unwrap_err()
        else {
            panic!("expected validation error");
        };
        let messages = errors.get("password").expect("password errors");
        assert_eq!(messages.len(), 2);
    }

    #[test]
    fn username_limit_counts_characters_not_bytes() {
        // Ten multi-byte characters fit; eleven do not.
        assert!(register("あいうえおかきくけこ", "correct-horse", "correct-horse")
            .clean()
            .is_ok());
        let GoalListError::Validation(errors) =
            register("あいうえおかきくけこさ", "correct-horse", "correct-horse")
                .clean()
                .unwrap_err()
        else {
            panic!("expected validation error");
        };
        assert!(errors.get("username").is_some());
    }

    #[test]
    fn blank_goal_title_is_required_and_detail_is_optional() {
        let GoalListError::Validation(errors) = GoalForm {
            title: "   ".to_string(),
            detail: None,
        }
        .clean()
        .unwrap_err() else {
            panic!("expected validation error");
        };
        assert_eq!(
            errors.get("title"),
            Some(&["This field is required.".to_string()][..])
        );

        let form = GoalForm {
            title: "Marathon".to_string(),
            detail: Some("  ".to_string()),
        }
        .clean()
        .expect("valid goal");
        assert_eq!(form.detail, None);
        assert_eq!(form.detail_text(), "");
    }

    #[test]
    fn goal_limits_match_the_data_model() {
        let err = GoalForm {
            title: "x".repeat(16),
            detail: Some("y".repeat(31)),
        }
        .clean()
        .unwrap_err();
        let GoalListError::Validation(errors) = err else {
            panic!("expected validation error");
        };
        assert!(errors.get("title").is_some());
        assert!(errors.get("detail").is_some());
    }

    #[test]
    fn task_title_limit_is_fifty() {
        assert!(TaskForm {
            title: "t".repeat(50),
            priority: Some(1),
            due: None,
        }
        .clean()
        .is_ok());
        assert!(TaskForm {
            title: "t".repeat(51),
            priority: Some(1),
            due: None,
        }
        .clean()
        .is_err());
    }

    #[test]
    fn omitted_fields_are_reported_per_field() {
        let form: TaskForm =
            serde_json::from_value(serde_json::json!({"title": "run"})).expect("task body");
        let GoalListError::Validation(errors) = form.clean().unwrap_err() else {
            panic!("expected validation error");
        };
        assert_eq!(
            errors.get("priority"),
            Some(&["This field is required.".to_string()][..])
        );

        let form: GoalForm =
            serde_json::from_value(serde_json::json!({"detail": "x"})).expect("goal body");
        let GoalListError::Validation(errors) = form.clean().unwrap_err() else {
            panic!("expected validation error");
        };
        assert!(errors.get("title").is_some());
        assert!(errors.get("detail").is_none());
    }

    #[test]
    fn field_errors_display_is_stable() {
        let mut errors = FieldErrors::default();
        errors.add("title", "too long");
        errors.add("detail", "too long");
        assert_eq!(errors.to_string(), "detail: too long; title: too long");
    }
}
