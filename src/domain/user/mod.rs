pub mod model;

pub use model::{BillingProfile, User, UserRole};
