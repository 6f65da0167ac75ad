pub mod llm;
pub mod stt;
pub mod traits;
pub mod tts;

pub use llm::OpenAiLlmClient;
pub use stt::DeepgramSttClient;
pub use traits::{
    Intent, LeadContext, LlmClient, LlmRequest, LlmResponseJson, LlmResult, NextAction,
    SttClient, Transcript, TtsClient,
};
pub use tts::ElevenLabsTtsClient;
