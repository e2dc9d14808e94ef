pub mod capability;
pub mod error;
pub mod model;
pub mod orchestrator;
pub mod polling;
pub mod service;

pub use capability::{resolve_profile, ModelProfile, ProviderKind, DEFAULT_MODEL};
pub use error::{FailureClass, GenerationError, ImageServiceError, ProviderError};
pub use model::{
    AttemptOutcome, GenerationOutcome, GenerationRequest, ImageDimensions, ImageOutput,
    JobStatus, ProviderAttempt, ProviderInput, ProviderOperation, ReferenceConvention,
    ReferenceImage, StepKind, Submission,
};
pub use orchestrator::ImageOrchestrator;
pub use polling::PollSettings;
pub use service::{GenerationReceipt, ImageGenerationService};
