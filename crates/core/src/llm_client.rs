use crate::capabilities::LanguageModel;
use crate::error::{BackendError, ErrorKind};
use crate::instructions::SystemInstruction;
use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
    },
};
use async_trait::async_trait;
use tracing::debug;

/// Default endpoint for the hosted Llama models the agent is tuned for.
pub const DEFAULT_API_BASE: &str = "https://api.cerebras.ai/v1";
pub const DEFAULT_CHAT_MODEL: &str = "llama-3.3-70b";

/// An implementation of `LanguageModel` for any OpenAI-compatible API.
pub struct OpenAICompatibleClient {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAICompatibleClient {
    /// Creates a new client for an OpenAI-compatible service.
    ///
    /// # Arguments
    ///
    /// * `config` - The configuration for the OpenAI client, including API key and base URL.
    /// * `model` - The model identifier to use for chat completions (e.g., "llama-3.3-70b").
    pub fn new(config: OpenAIConfig, model: String) -> Self {
        Self {
            client: Client::with_config(config),
            model,
        }
    }

    fn build_messages(
        instruction: &SystemInstruction,
        user_turn: &str,
    ) -> Result<Vec<ChatCompletionRequestMessage>, BackendError> {
        Ok(vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(instruction.as_str())
                .build()
                .map_err(generation_error)?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(user_turn)
                .build()
                .map_err(generation_error)?
                .into(),
        ])
    }
}

fn generation_error(e: impl std::fmt::Display) -> BackendError {
    BackendError::llm(ErrorKind::GenerationFailed, e.to_string())
}

#[async_trait]
impl LanguageModel for OpenAICompatibleClient {
    async fn generate_reply(
        &self,
        instruction: &SystemInstruction,
        user_turn: &str,
    ) -> Result<String, BackendError> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(Self::build_messages(instruction, user_turn)?)
            .build()
            .map_err(generation_error)?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(generation_error)?;

        let reply = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or_else(|| generation_error("LLM response had no text content"))?;

        debug!(model = %self.model, chars = reply.len(), "Generated reply");
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Corpus;
    use crate::instructions::InstructionComposer;

    #[test]
    fn test_build_messages_orders_system_then_user() {
        let instruction = InstructionComposer::default().compose(&Corpus::from_documents(&[]));
        let messages =
            OpenAICompatibleClient::build_messages(&instruction, "What plans do you sell?")
                .unwrap();

        assert_eq!(messages.len(), 2);
        assert!(matches!(messages[0], ChatCompletionRequestMessage::System(_)));
        assert!(matches!(messages[1], ChatCompletionRequestMessage::User(_)));
    }

    #[test]
    fn test_generation_error_is_tagged() {
        let err = generation_error("rate limited");
        assert_eq!(err.kind, ErrorKind::GenerationFailed);
        assert_eq!(err.backend, crate::error::Backend::Llm);
        assert_eq!(err.message, "rate limited");
    }
}
