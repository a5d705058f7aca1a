pub mod executor;
pub mod lifecycle;
pub mod scheduler;
pub mod worker;

pub use executor::{TransitionExecutor, TransitionOutcome};
pub use lifecycle::{OfferLifecycle, OfferWrite};
pub use scheduler::TransitionScheduler;
pub use worker::{TransitionWorker, WorkerReport, WorkerSettings};
