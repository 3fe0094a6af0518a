pub mod provider;
pub mod retry;

use veyra_core::config::ModelConfig;
use veyra_core::traits::ModelClient;

pub use provider::OpenAiCompatClient;
pub use retry::RetryingClient;

/// Create a model client for the configured provider, wrapped with
/// retries when a retry section is present.
pub fn create_client(config: &ModelConfig) -> Box<dyn ModelClient> {
    // Every supported provider speaks the OpenAI-compatible protocol.
    let base: Box<dyn ModelClient> = Box::new(OpenAiCompatClient::new());
    match &config.retry {
        Some(retry) => Box::new(RetryingClient::new(base, retry.clone())),
        None => base,
    }
}
