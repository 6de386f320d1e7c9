use atl_db::StoreError;
use atl_schemas::ErrorKind;
use uuid::Uuid;

use crate::state_machine::TransitionError;

/// Failure of a workflow operation. Every variant aborts before commit, so
/// no partial write is ever observable.
#[derive(Debug)]
pub enum WorkflowError {
    /// Malformed or out-of-range input. Nothing was written.
    Validation(String),
    NotFound { entity: &'static str, id: Uuid },
    /// Role or ownership guard refused the actor. Nothing was written.
    Forbidden { action: &'static str, reason: String },
    /// Another writer changed the order first.
    Conflict(String),
    NoEmployeeAvailable,
    /// The order's status does not allow the operation.
    InvalidState(TransitionError),
    Store(StoreError),
}

impl WorkflowError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WorkflowError::Validation(_) => ErrorKind::ValidationError,
            WorkflowError::NotFound { .. } => ErrorKind::NotFound,
            WorkflowError::Forbidden { .. } => ErrorKind::Forbidden,
            WorkflowError::Conflict(_)
            | WorkflowError::NoEmployeeAvailable
            | WorkflowError::InvalidState(_) => ErrorKind::Conflict,
            WorkflowError::Store(e) => e.kind(),
        }
    }

    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        WorkflowError::Validation(msg.into())
    }

    pub(crate) fn forbidden(action: &'static str, reason: impl Into<String>) -> Self {
        WorkflowError::Forbidden {
            action,
            reason: reason.into(),
        }
    }

    pub(crate) fn not_found(entity: &'static str, id: Uuid) -> Self {
        WorkflowError::NotFound { entity, id }
    }
}

impl std::fmt::Display for WorkflowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkflowError::Validation(m) => write!(f, "{m}"),
            WorkflowError::NotFound { entity, id } => write!(f, "{entity} introuvable : {id}"),
            WorkflowError::Forbidden { action, reason } => {
                write!(f, "action « {action} » refusée : {reason}")
            }
            WorkflowError::Conflict(m) => write!(f, "{m}"),
            WorkflowError::NoEmployeeAvailable => write!(f, "Aucun employé disponible."),
            WorkflowError::InvalidState(e) => write!(f, "{e}"),
            WorkflowError::Store(StoreError::UniqueViolation { constraint }) => {
                write!(f, "Cette valeur existe déjà ({constraint}).")
            }
            WorkflowError::Store(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for WorkflowError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WorkflowError::InvalidState(e) => Some(e),
            WorkflowError::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for WorkflowError {
    fn from(e: StoreError) -> Self {
        WorkflowError::Store(e)
    }
}

impl From<TransitionError> for WorkflowError {
    fn from(e: TransitionError) -> Self {
        WorkflowError::InvalidState(e)
    }
}

pub type WorkflowResult<T> = Result<T, WorkflowError>;
