//! OpenAI-compatible chat-completions client with usage accounting.
use std::time::Duration;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::prompt::{PromptBuilder, PromptMessage};
use super::{Generation, GenerationError, GenerationRequest, Generator};
use crate::config::GenerationConfig;

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatUsage {
    prompt_tokens: i64,
    completion_tokens: i64,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

pub struct OpenAiGenerator {
    endpoint: String,
    model: String,
    api_key: String,
    temperature: f32,
    timeout: Duration,
}

impl OpenAiGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let api_key = match std::env::var(&config.api_key_env) {
            Ok(key) if !key.is_empty() => key,
            _ => bail!("{} environment variable not set", config.api_key_env),
        };

        Ok(Self {
            endpoint: format!("{}/chat/completions", config.api_base.trim_end_matches('/')),
            model: config.model.clone(),
            api_key,
            temperature: config.temperature,
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }
}

fn parse_generation(response: ChatResponse) -> Result<Generation, GenerationError> {
    let answer = response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| GenerationError::InvalidResponse("response has no answer".to_string()))?;

    let (input_tokens, output_tokens) = match response.usage {
        Some(usage) => (usage.prompt_tokens, usage.completion_tokens),
        None => {
            warn!("Generation response carried no usage; recording zero tokens");
            (0, 0)
        }
    };

    Ok(Generation {
        answer: answer.trim().to_string(),
        input_tokens,
        output_tokens,
    })
}

impl OpenAiGenerator {
    /// One chat-completions call.
    fn complete(&self, prompt: &[PromptMessage]) -> Result<Generation, GenerationError> {
        let body = ChatRequest {
            model: &self.model,
            messages: prompt
                .iter()
                .map(|m| ChatMessage {
                    role: m.role,
                    content: &m.content,
                })
                .collect(),
            temperature: self.temperature,
        };

        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| GenerationError::RequestFailed(e.to_string()))?;

        let response = client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .map_err(|e| GenerationError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(GenerationError::Provider {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatResponse = response
            .json()
            .map_err(|e| GenerationError::InvalidResponse(e.to_string()))?;
        parse_generation(parsed)
    }
}

impl Generator for OpenAiGenerator {
    fn generate(&self, request: &GenerationRequest) -> Result<Generation, GenerationError> {
        debug!(
            "Generating with {} ({} context chunks, {} history turns)",
            self.model,
            request.context.len(),
            request.history.len()
        );
        self.complete(&PromptBuilder::build_messages(request))
    }

    fn condense(
        &self,
        question: &str,
        history: &[(String, String)],
    ) -> Result<Generation, GenerationError> {
        if history.is_empty() {
            return Ok(Generation {
                answer: question.to_string(),
                input_tokens: 0,
                output_tokens: 0,
            });
        }
        debug!("Condensing follow-up over {} turns", history.len());
        self.complete(&PromptBuilder::build_condense_messages(question, history))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let body = ChatRequest {
            model: "gpt-3.5-turbo",
            messages: vec![ChatMessage {
                role: "user",
                content: "hi",
            }],
            temperature: 0.0,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["model"], "gpt-3.5-turbo");
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["temperature"], 0.0);
    }

    #[test]
    fn test_parse_generation_with_usage() {
        let json = serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": " Refunds within 30 days. "}}],
            "usage": {"prompt_tokens": 200, "completion_tokens": 15, "total_tokens": 215}
        });
        let response: ChatResponse = serde_json::from_value(json).unwrap();
        let generation = parse_generation(response).unwrap();
        assert_eq!(generation.answer, "Refunds within 30 days.");
        assert_eq!(generation.input_tokens, 200);
        assert_eq!(generation.output_tokens, 15);
    }

    #[test]
    fn test_parse_generation_without_usage() {
        let json = serde_json::json!({"choices": [{"message": {"content": "ok"}}]});
        let response: ChatResponse = serde_json::from_value(json).unwrap();
        let generation = parse_generation(response).unwrap();
        assert_eq!((generation.input_tokens, generation.output_tokens), (0, 0));
    }

    #[test]
    fn test_parse_generation_no_choices() {
        let json = serde_json::json!({"choices": []});
        let response: ChatResponse = serde_json::from_value(json).unwrap();
        assert!(matches!(
            parse_generation(response),
            Err(GenerationError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_condense_without_history_makes_no_request() {
        let generator = OpenAiGenerator {
            endpoint: "http://127.0.0.1:9/chat/completions".to_string(),
            model: "gpt-3.5-turbo".to_string(),
            api_key: "unused".to_string(),
            temperature: 0.0,
            timeout: Duration::from_millis(100),
        };
        let condensed = generator.condense("What is the refund policy?", &[]).unwrap();
        assert_eq!(condensed.answer, "What is the refund policy?");
        assert_eq!((condensed.input_tokens, condensed.output_tokens), (0, 0));
    }

    #[test]
    fn test_new_requires_api_key() {
        let config = GenerationConfig {
            api_key_env: "CHATRAG_TEST_GEN_KEY_THAT_IS_NEVER_SET".to_string(),
            ..GenerationConfig::default()
        };
        assert!(OpenAiGenerator::new(&config).is_err());
    }
}
