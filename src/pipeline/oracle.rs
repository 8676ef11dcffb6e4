//! The generative rewrite oracle: role-tagged messages in, text out.
//!
//! The convergence loop only ever sees the [`Oracle`] trait. The default
//! implementation, [`ProviderOracle`], forwards to any `edgequake_llm`
//! provider; tests substitute scripted oracles.
//!
//! Providers differ in one way the loop cares about: some accept a distinct
//! system turn and some do not. [`RequestShape`] captures that difference so
//! the prompts in [`crate::prompts`] can always be written with a system turn.

use crate::error::FitError;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Speaker of an [`OracleMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One turn sent to the oracle.
///
/// `images` holds base64 PNG page rasters; only user turns carry them.
#[derive(Debug, Clone, PartialEq)]
pub struct OracleMessage {
    pub role: Role,
    pub text: String,
    pub images: Vec<String>,
}

impl OracleMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            text: text.into(),
            images: Vec::new(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            images: Vec::new(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
            images: Vec::new(),
        }
    }

    /// A user turn with rendered pages attached, in page order.
    pub fn user_with_images(text: impl Into<String>, images: Vec<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            images,
        }
    }
}

/// Raw oracle response plus token accounting.
#[derive(Debug, Clone, Default)]
pub struct OracleReply {
    pub text: String,
    pub input_tokens: usize,
    pub output_tokens: usize,
}

/// A text + vision chat capability.
///
/// `stage` names the loop state issuing the call and is only used to label
/// errors. Implementations must not retry internally: an oracle failure is
/// fatal to the run.
#[async_trait]
pub trait Oracle: Send + Sync {
    async fn send(
        &self,
        stage: &'static str,
        messages: &[OracleMessage],
    ) -> Result<OracleReply, FitError>;
}

/// How system text reaches the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RequestShape {
    /// System turns are sent as-is.
    #[default]
    SeparateSystem,
    /// System text is prepended to the first user turn.
    MergedSystem,
}

impl RequestShape {
    /// Default shape for a provider name.
    ///
    /// Local runtimes serve arbitrary chat templates, many of which silently
    /// drop the system turn, so their instructions are folded into the user turn.
    pub fn for_provider(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "ollama" | "lmstudio" | "lm-studio" => RequestShape::MergedSystem,
            _ => RequestShape::SeparateSystem,
        }
    }

    /// Apply the shape to a message list.
    pub fn shape(self, messages: &[OracleMessage]) -> Vec<OracleMessage> {
        match self {
            RequestShape::SeparateSystem => messages.to_vec(),
            RequestShape::MergedSystem => merge_system_turns(messages),
        }
    }
}

fn merge_system_turns(messages: &[OracleMessage]) -> Vec<OracleMessage> {
    let system: Vec<&str> = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.text.as_str())
        .collect();
    let mut rest: Vec<OracleMessage> = messages
        .iter()
        .filter(|m| m.role != Role::System)
        .cloned()
        .collect();
    if system.is_empty() {
        return rest;
    }
    let preamble = system.join("\n\n");
    match rest.iter_mut().find(|m| m.role == Role::User) {
        Some(first_user) => {
            first_user.text = format!("{preamble}\n\n{}", first_user.text);
        }
        None => rest.insert(0, OracleMessage::user(preamble)),
    }
    rest
}

/// [`Oracle`] backed by an `edgequake_llm` provider.
pub struct ProviderOracle {
    provider: Arc<dyn LLMProvider>,
    shape: RequestShape,
    temperature: f32,
    max_tokens: usize,
    timeout: Duration,
}

impl ProviderOracle {
    pub fn new(
        provider: Arc<dyn LLMProvider>,
        shape: RequestShape,
        temperature: f32,
        max_tokens: usize,
        timeout_secs: u64,
    ) -> Self {
        Self {
            provider,
            shape,
            temperature,
            max_tokens,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    fn build_options(&self) -> CompletionOptions {
        CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        }
    }
}

/// Convert our messages into the provider's chat format.
fn to_chat_messages(messages: &[OracleMessage]) -> Vec<ChatMessage> {
    messages
        .iter()
        .map(|m| match m.role {
            Role::System => ChatMessage::system(m.text.as_str()),
            Role::Assistant => ChatMessage::assistant(m.text.as_str()),
            Role::User if m.images.is_empty() => ChatMessage::user(m.text.as_str()),
            Role::User => ChatMessage::user_with_images(
                m.text.as_str(),
                m.images
                    .iter()
                    .map(|b64| ImageData::new(b64.clone(), "image/png").with_detail("high"))
                    .collect(),
            ),
        })
        .collect()
}

#[async_trait]
impl Oracle for ProviderOracle {
    async fn send(
        &self,
        stage: &'static str,
        messages: &[OracleMessage],
    ) -> Result<OracleReply, FitError> {
        let start = Instant::now();
        let shaped = self.shape.shape(messages);
        let chat = to_chat_messages(&shaped);
        let options = self.build_options();
        let images: usize = shaped.iter().map(|m| m.images.len()).sum();
        debug!("Oracle [{}]: {} messages, {} images", stage, chat.len(), images);

        let response = tokio::time::timeout(self.timeout, self.provider.chat(&chat, Some(&options)))
            .await
            .map_err(|_| FitError::OracleTimeout {
                stage,
                secs: self.timeout.as_secs(),
            })?
            .map_err(|e| FitError::OracleFailed {
                stage,
                message: e.to_string(),
            })?;

        debug!(
            "Oracle [{}]: {} input tokens, {} output tokens, {:?}",
            stage,
            response.prompt_tokens,
            response.completion_tokens,
            start.elapsed()
        );

        Ok(OracleReply {
            text: response.content,
            input_tokens: response.prompt_tokens,
            output_tokens: response.completion_tokens,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_for_known_providers() {
        assert_eq!(RequestShape::for_provider("openai"), RequestShape::SeparateSystem);
        assert_eq!(RequestShape::for_provider("Ollama"), RequestShape::MergedSystem);
        assert_eq!(RequestShape::for_provider("lmstudio"), RequestShape::MergedSystem);
    }

    #[test]
    fn separate_shape_is_identity() {
        let msgs = vec![OracleMessage::system("rules"), OracleMessage::user("doc")];
        assert_eq!(RequestShape::SeparateSystem.shape(&msgs), msgs);
    }

    #[test]
    fn merged_shape_folds_system_into_first_user() {
        let msgs = vec![
            OracleMessage::system("rules"),
            OracleMessage::assistant("earlier reply"),
            OracleMessage::user_with_images("fix this", vec!["AAAA".into()]),
            OracleMessage::user("and this"),
        ];
        let shaped = RequestShape::MergedSystem.shape(&msgs);
        assert_eq!(shaped.len(), 3);
        assert!(shaped.iter().all(|m| m.role != Role::System));
        assert_eq!(shaped[1].text, "rules\n\nfix this");
        assert_eq!(shaped[1].images, vec!["AAAA".to_string()]);
        assert_eq!(shaped[2].text, "and this");
    }

    #[test]
    fn merged_shape_without_user_turn_creates_one() {
        let msgs = vec![OracleMessage::system("only rules")];
        let shaped = RequestShape::MergedSystem.shape(&msgs);
        assert_eq!(shaped, vec![OracleMessage::user("only rules")]);
    }

    #[test]
    fn chat_conversion_keeps_order_and_count() {
        let msgs = vec![
            OracleMessage::system("s"),
            OracleMessage::user("u"),
            OracleMessage::assistant("a"),
            OracleMessage::user_with_images("img", vec!["x".into(), "y".into()]),
        ];
        assert_eq!(to_chat_messages(&msgs).len(), 4);
    }
}
