pub mod error;
pub mod limits;
pub mod model;
pub mod reset;
pub mod service;

pub use error::QuotaError;
pub use limits::{limit_for, UNLIMITED_SENTINEL};
pub use model::{PlanType, QuotaCheck, QuotaDenial, ServiceType, UsageRecord};
pub use reset::{compute_next_state, ResetCadence, Transition};
pub use service::{QuotaLedger, QuotaService};
