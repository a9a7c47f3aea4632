use thiserror::Error;

use crate::forms::FieldErrors;

#[derive(Debug, Error)]
pub enum GoalListError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("validation failed: {0}")]
    Validation(FieldErrors),
    #[error("{0}")]
    Domain(String),
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i32 },
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("resource error: {0}")]
    Resource(String),
    #[error("runtime error: {0}")]
    Runtime(String),
}

impl GoalListError {
    pub fn not_found(entity: &'static str, id: i32) -> Self {
        Self::NotFound { entity, id }
    }

    pub fn field(field: &str, message: impl Into<String>) -> Self {
        let mut errors = FieldErrors::default();
        errors.add(field, message);
        Self::Validation(errors)
    }
}

// Lets store code use `?` on diesel results inside transactions.
impl From<diesel::result::Error> for GoalListError {
    fn from(err: diesel::result::Error) -> Self {
        Self::Runtime(err.to_string())
    }
}

pub use crate::Result;
