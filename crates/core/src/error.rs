use crate::status::RunStatus;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: String },

    /// A control operation was requested for a status that does not permit it.
    #[error("Cannot {action} a run in status '{status}'")]
    InvalidTransition {
        action: &'static str,
        status: RunStatus,
    },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Shorthand for a missing (or foreign) test run.
    pub fn run_not_found(id: impl ToString) -> Self {
        CoreError::NotFound {
            entity: "TestRun",
            id: id.to_string(),
        }
    }
}

impl From<validator::ValidationErrors> for CoreError {
    fn from(errors: validator::ValidationErrors) -> Self {
        CoreError::Validation(errors.to_string())
    }
}
