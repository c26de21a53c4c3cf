pub mod models;
pub mod reference;
pub mod repository;
pub mod pnr;
pub mod validation;
pub mod booking;
pub mod allocation;
pub mod cancellation;
pub mod memory;

pub use booking::BookingManager;
pub use allocation::{AllocationOutcome, AllocationReport, SeatAllocator};
pub use cancellation::{CancellationCascade, CancellationOutcome};
pub use reference::ReferenceData;
pub use repository::{BookingStore, BookingTx};

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    Validation(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Failed to {step}: {source}")]
    Step {
        step: String,
        #[source]
        source: Box<CoreError>,
    },
    #[error("Failed to create booking with passengers: {source}")]
    BookingFailed {
        #[source]
        source: Box<CoreError>,
    },
}

impl CoreError {
    /// Wrap an error with the name of the step that produced it.
    pub fn step(step: impl Into<String>, source: CoreError) -> Self {
        CoreError::Step {
            step: step.into(),
            source: Box::new(source),
        }
    }

    /// The innermost error, skipping contextual wrappers.
    pub fn root(&self) -> &CoreError {
        match self {
            CoreError::Step { source, .. } | CoreError::BookingFailed { source } => source.root(),
            other => other,
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self.root(), CoreError::Validation(_))
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
