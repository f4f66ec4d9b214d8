//! OpenAI-compatible chat completion client with structured-output support.
//!
//! Completes the integration the teacher's `ShadowDeepResearchConfig` only
//! half-built: it resolved `llm_base_url` / `llm_api_key` / `llm_model` but
//! never issued the HTTP call. This module does, reusing the crate's shared
//! `reqwest::Client` the way every other external call in this crate does.
use crate::core::config::{ModelTier, ResearchConfig};
use anyhow::{anyhow, Context, Result};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(45);

#[derive(Debug, Clone, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

pub struct LlmClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl LlmClient {
    pub fn new(http: reqwest::Client, config: &ResearchConfig) -> Self {
        Self {
            http,
            base_url: config.llm_base_url.trim_end_matches('/').to_string(),
            api_key: config.llm_api_key.clone(),
        }
    }

    /// Issue a single chat completion and return the raw text content.
    pub async fn complete(&self, model: &str, system: &str, user: &str) -> Result<String> {
        let body = ChatRequest {
            model: model.to_string(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: user.to_string(),
                },
            ],
            temperature: 0.3,
            max_tokens: None,
        };

        let mut req = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .json(&body);
        if let Some(key) = &self.api_key {
            if !key.is_empty() {
                req = req.bearer_auth(key);
            }
        }

        let resp = tokio::time::timeout(DEFAULT_CALL_TIMEOUT, req.send())
            .await
            .context("llm call timed out")?
            .context("llm call transport error")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("llm call failed ({status}): {text}"));
        }

        let parsed: ChatResponse = resp.json().await.context("llm response was not valid JSON")?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| anyhow!("llm response had no message content"))?;

        Ok(content)
    }

    /// Issue a chat completion and parse the response as `T`, following the
    /// fallback-on-parse-failure convention required throughout spec.md §9:
    /// one retry with a stricter "JSON only" instruction, then give up and
    /// let the caller apply its own documented fallback.
    pub async fn complete_structured<T: DeserializeOwned>(
        &self,
        tier: ModelTier,
        config: &ResearchConfig,
        system: &str,
        user: &str,
    ) -> Result<T> {
        let model = config.model_for(tier);

        let first = self.complete(model, system, user).await?;
        match extract_json(&first).and_then(|v| serde_json::from_value(v).map_err(|e| anyhow!(e)))
        {
            Ok(value) => Ok(value),
            Err(e) => {
                debug!("structured parse failed on first attempt: {e}; retrying strictly");
                let strict_system =
                    format!("{system}\n\nRespond with ONLY a single valid JSON object. No prose, no markdown fences.");
                let second = self.complete(model, &strict_system, user).await?;
                extract_json(&second)
                    .and_then(|v| serde_json::from_value(v).map_err(|e| anyhow!(e)))
                    .with_context(|| format!("structured parse failed after retry: {e}"))
            }
        }
    }
}

/// Pull a JSON value out of LLM text that may be wrapped in a fenced code
/// block or preceded/followed by prose (spec.md §4.6 "accept JSON embedded in
/// fenced code blocks").
pub fn extract_json(text: &str) -> Result<Value> {
    let trimmed = text.trim();

    if let Ok(v) = serde_json::from_str::<Value>(trimmed) {
        return Ok(v);
    }

    if let Some(fenced) = extract_fenced_block(trimmed) {
        if let Ok(v) = serde_json::from_str::<Value>(&fenced) {
            return Ok(v);
        }
    }

    // Last resort: find the first balanced {...} or [...] span.
    if let Some(span) = extract_balanced_span(trimmed) {
        if let Ok(v) = serde_json::from_str::<Value>(&span) {
            return Ok(v);
        }
    }

    warn!("could not extract JSON from LLM response");
    Err(anyhow!("no JSON object found in response"))
}

fn extract_fenced_block(text: &str) -> Option<String> {
    let start = text.find("```")?;
    let after_fence = &text[start + 3..];
    let after_fence = after_fence.strip_prefix("json").unwrap_or(after_fence);
    let end = after_fence.find("```")?;
    Some(after_fence[..end].trim().to_string())
}

fn extract_balanced_span(text: &str) -> Option<String> {
    let bytes = text.as_bytes();
    let start = bytes.iter().position(|&b| b == b'{' || b == b'[')?;
    let open = bytes[start];
    let close = if open == b'{' { b'}' } else { b']' };

    let mut depth = 0i32;
    for (i, &b) in bytes[start..].iter().enumerate() {
        if b == open {
            depth += 1;
        } else if b == close {
            depth -= 1;
            if depth == 0 {
                return Some(text[start..start + i + 1].to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_plain_json() {
        let v = extract_json(r#"{"a": 1}"#).unwrap();
        assert_eq!(v["a"], 1);
    }

    #[test]
    fn extracts_fenced_json() {
        let text = "Here you go:\n```json\n{\"a\": 2}\n```\nThanks.";
        let v = extract_json(text).unwrap();
        assert_eq!(v["a"], 2);
    }

    #[test]
    fn extracts_balanced_span_amid_prose() {
        let text = "Sure, the answer is {\"a\": 3, \"nested\": {\"b\": 4}} as requested.";
        let v = extract_json(text).unwrap();
        assert_eq!(v["a"], 3);
        assert_eq!(v["nested"]["b"], 4);
    }

    #[test]
    fn fails_on_garbage() {
        assert!(extract_json("no json here at all").is_err());
    }
}
