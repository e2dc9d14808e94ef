pub mod image_provider;
pub mod openai_image_provider;
pub mod replicate_image_provider;

pub use image_provider::ImageProvider;
pub use openai_image_provider::OpenAiImageProvider;
pub use replicate_image_provider::ReplicateImageProvider;
