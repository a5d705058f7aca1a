pub mod clock;
pub mod repository;
pub mod validation;

pub use clock::{Clock, ManualClock, SystemClock};
pub use repository::{OfferStore, TransitionQueue};
pub use validation::ValidationErrors;

use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Offer not found: {0}")]
    NotFound(Uuid),
    #[error("Validation failed: {0}")]
    ValidationFailed(ValidationErrors),
    #[error("Scheduling failed: {0}")]
    SchedulingFailed(String),
    #[error("Offer {0} was modified concurrently")]
    Conflict(Uuid),
    #[error("Storage error: {0}")]
    Storage(String),
}

pub type CoreResult<T> = Result<T, CoreError>;

impl From<ValidationErrors> for CoreError {
    fn from(errors: ValidationErrors) -> Self {
        CoreError::ValidationFailed(errors)
    }
}
