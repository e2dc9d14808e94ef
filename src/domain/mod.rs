pub mod auth;
pub mod generation;
pub mod quota;
pub mod shared;
pub mod user;
