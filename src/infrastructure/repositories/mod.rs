pub mod account_repository;
pub mod artifact_repository;
pub mod usage_repository;

pub use account_repository::{AccountRepository, AccountStore};
pub use artifact_repository::{ArtifactMetadata, ArtifactRepository, ArtifactStore, StoredArtifact};
pub use usage_repository::{UsageRepository, UsageStore};
