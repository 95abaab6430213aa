//! Clients for the external generative collaborators.

use async_trait::async_trait;

use crate::error::Result;
use crate::scene::{SceneDescriptor, UserInput};

mod gemini;

pub use gemini::GeminiClient;

/// The three generative operations the orchestrator depends on. One
/// network round trip per call, no retries; quota conditions surface as
/// `PromptError::QuotaExceeded` from the implementation, never inferred
/// from message prose downstream.
#[async_trait]
pub trait GenerativeBackend: Send + Sync {
    /// One text-generation round trip producing the validated, ordered
    /// scene list for a run.
    async fn generate_sequence(&self, input: &UserInput) -> Result<Vec<SceneDescriptor>>;

    /// One keyframe image for a scene, returned as a data URL.
    async fn generate_image(&self, prompt: &str, aspect_ratio: &str) -> Result<String>;

    /// Full replacement image conditioned on the existing keyframe plus a
    /// free-text instruction, returned as a data URL.
    async fn revise_image(&self, image: &[u8], mime_type: &str, instruction: &str)
        -> Result<String>;
}
