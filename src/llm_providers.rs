use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};

/// Common message structure for chat-style requests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// Sampling knobs for a single completion request
#[derive(Debug, Clone, Copy)]
pub struct CompletionOptions {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 2048,
        }
    }
}

/// Provider-agnostic completion client. Implementations are constructed once
/// at startup and injected into the services that need them.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Run a completion with optional system message
    async fn complete(
        &self,
        system_message: Option<&str>,
        prompt: &str,
        options: CompletionOptions,
    ) -> Result<String>;

    /// Provider name for logging
    fn provider_name(&self) -> &'static str;

    /// Model name being used
    fn model_name(&self) -> &str;
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum ProviderKind {
    OpenAI,
    Gemini,
}

/// Create the configured model client
pub fn build_model_client(
    kind: ProviderKind,
    api_key: String,
    base_url: Option<String>,
    model: Option<String>,
) -> Arc<dyn ModelClient> {
    match kind {
        ProviderKind::OpenAI => Arc::new(OpenAIClient::new(api_key, base_url, model)),
        ProviderKind::Gemini => Arc::new(GeminiClient::new(api_key, base_url, model)),
    }
}

/// OpenAI chat completions client
#[derive(Debug, Clone)]
pub struct OpenAIClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

/// OpenAI-specific request structures
#[derive(Debug, Clone, Serialize, Deserialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OpenAIChoice {
    message: ChatMessage,
}

impl OpenAIClient {
    pub fn new(api_key: String, base_url: Option<String>, model: Option<String>) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: base_url.unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            model: model.unwrap_or_else(|| "gpt-4o-mini".to_string()),
        }
    }
}

#[async_trait]
impl ModelClient for OpenAIClient {
    async fn complete(
        &self,
        system_message: Option<&str>,
        prompt: &str,
        options: CompletionOptions,
    ) -> Result<String> {
        let mut messages = Vec::new();

        if let Some(sys_msg) = system_message {
            messages.push(ChatMessage {
                role: "system".to_string(),
                content: sys_msg.to_string(),
            });
        }

        messages.push(ChatMessage {
            role: "user".to_string(),
            content: prompt.to_string(),
        });

        let request_body = OpenAIRequest {
            model: self.model.clone(),
            messages,
            temperature: options.temperature,
            max_tokens: options.max_tokens,
        };

        info!(
            provider = self.provider_name(),
            model = %self.model,
            base_url = %self.base_url,
            prompt_length = prompt.len(),
            "Sending completion request"
        );

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request_body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            error!(
                provider = self.provider_name(),
                status = %status,
                error = %error_text,
                "Completion request failed"
            );
            return Err(anyhow::anyhow!("OpenAI API request failed: {}", error_text));
        }

        let openai_response: OpenAIResponse = response.json().await?;

        if openai_response.choices.is_empty() {
            return Err(anyhow::anyhow!("No choices in OpenAI response"));
        }

        let response_content = openai_response.choices[0].message.content.clone();
        info!(
            provider = self.provider_name(),
            response_length = response_content.len(),
            "Received completion response"
        );

        Ok(response_content)
    }

    fn provider_name(&self) -> &'static str {
        "OpenAI"
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Gemini generateContent client
#[derive(Debug, Clone)]
pub struct GeminiClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

/// Gemini-specific request structures
#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(rename = "generationConfig")]
    generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiContent {
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiPart {
    text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiGenerationConfig {
    temperature: f32,
    #[serde(rename = "topK")]
    top_k: i32,
    #[serde(rename = "topP")]
    top_p: f32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiResponse {
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiCandidate {
    content: GeminiContent,
}

impl GeminiClient {
    pub fn new(api_key: String, base_url: Option<String>, model: Option<String>) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: base_url
                .unwrap_or_else(|| "https://generativelanguage.googleapis.com/v1beta".to_string()),
            model: model.unwrap_or_else(|| "gemini-2.0-flash-exp".to_string()),
        }
    }
}

#[async_trait]
impl ModelClient for GeminiClient {
    async fn complete(
        &self,
        system_message: Option<&str>,
        prompt: &str,
        options: CompletionOptions,
    ) -> Result<String> {
        // Gemini has no separate system role; prepend to the prompt
        let full_prompt = match system_message {
            Some(sys_msg) => format!("{}\n\n{}", sys_msg, prompt),
            None => prompt.to_string(),
        };

        let request_body = GeminiRequest {
            contents: vec![GeminiContent {
                parts: vec![GeminiPart { text: full_prompt }],
            }],
            generation_config: GeminiGenerationConfig {
                temperature: options.temperature,
                top_k: 40,
                top_p: 0.9,
                max_output_tokens: options.max_tokens as i32,
            },
        };

        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );

        info!(
            provider = self.provider_name(),
            model = %self.model,
            base_url = %self.base_url,
            prompt_length = prompt.len(),
            "Sending completion request"
        );

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&request_body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            error!(
                provider = self.provider_name(),
                status = %status,
                error = %error_text,
                "Completion request failed"
            );
            return Err(anyhow::anyhow!("Gemini API request failed: {}", error_text));
        }

        let gemini_response: GeminiResponse = response.json().await?;

        if gemini_response.candidates.is_empty() {
            return Err(anyhow::anyhow!("No candidates in Gemini response"));
        }

        if gemini_response.candidates[0].content.parts.is_empty() {
            return Err(anyhow::anyhow!("No parts in Gemini response"));
        }

        let response_content = gemini_response.candidates[0].content.parts[0].text.clone();
        info!(
            provider = self.provider_name(),
            response_length = response_content.len(),
            "Received completion response"
        );

        Ok(response_content)
    }

    fn provider_name(&self) -> &'static str {
        "Gemini"
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Centralized JSON response parser with robust extraction logic.
/// Model output arrives as prose, fenced markdown, or bare JSON.
#[derive(Debug, Clone)]
pub struct JsonResponseParser {
    fence: Regex,
}

impl JsonResponseParser {
    pub fn new() -> Self {
        Self {
            fence: Regex::new(r"```(?:json)?\s*([\s\S]*?)\s*```").unwrap(),
        }
    }

    /// Extract JSON from responses that might be wrapped in markdown or prose
    pub fn extract_json(&self, content: &str) -> String {
        // Fenced code block first
        if let Some(captures) = self.fence.captures(content) {
            if let Some(body) = captures.get(1) {
                let candidate = body.as_str().trim();
                if candidate.starts_with('{') || candidate.starts_with('[') {
                    return candidate.to_string();
                }
            }
        }

        // Outermost object or array, whichever opens first
        let array_opens_first = match (content.find('{'), content.find('[')) {
            (Some(object_start), Some(array_start)) => array_start < object_start,
            (None, Some(_)) => true,
            _ => false,
        };

        if array_opens_first {
            if let (Some(start), Some(end)) = (content.find('['), content.rfind(']')) {
                if end > start {
                    return content[start..=end].to_string();
                }
            }
        } else if let (Some(start), Some(end)) = (content.find('{'), content.rfind('}')) {
            if end > start {
                return content[start..=end].to_string();
            }
        }

        content.trim().to_string()
    }

    /// Parse a response into a specific type with error handling
    pub fn parse<T>(&self, content: &str) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        let json_content = self.extract_json(content);
        serde_json::from_str::<T>(&json_content)
            .map_err(|e| anyhow::anyhow!("Failed to parse JSON response: {}", e))
    }
}

impl Default for JsonResponseParser {
    fn default() -> Self {
        Self::new()
    }
}
