//! Model gateway for DeckWeaver: chat (streaming, tools, structured JSON)
//! and image generation behind provider-agnostic traits.

pub mod images;
pub mod openai_compat;
pub mod registry;
pub mod structured;
pub mod traits;
pub(crate) mod sse;
pub(crate) mod util;

// Re-exports for convenience.
pub use images::OpenAiImageProvider;
pub use registry::{ProviderRegistry, ResolvedModel};
pub use structured::generate_object;
pub use traits::{
    ChatRequest, ChatResponse, GeneratedImage, ImageProvider, ImageRequest, LlmProvider,
    ResponseFormat,
};
