use crate::error::{ReportError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Characters of a non-JSON error body kept in the error message.
const ERROR_BODY_LIMIT: usize = 200;

/// Prompt in, text out. The only thing the pipeline knows about the model.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    #[default]
    Gemini,
    OpenAi,
}

impl LlmProvider {
    pub fn default_base_url(&self) -> &'static str {
        match self {
            LlmProvider::Gemini => "https://generativelanguage.googleapis.com/v1beta",
            LlmProvider::OpenAi => "https://api.openai.com/v1",
        }
    }

    /// Environment variable that may carry this provider's credential.
    pub fn api_key_env(&self) -> &'static str {
        match self {
            LlmProvider::Gemini => "GOOGLE_API_KEY",
            LlmProvider::OpenAi => "OPENAI_API_KEY",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmSettings {
    #[serde(default)]
    pub provider: LlmProvider,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_output_tokens: Option<u32>,
}

fn default_model() -> String {
    "gemini-pro".to_string()
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider: LlmProvider::default(),
            model: default_model(),
            base_url: None,
            temperature: None,
            max_output_tokens: None,
        }
    }
}

pub struct LlmClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    settings: LlmSettings,
}

impl LlmClient {
    pub fn new(api_key: String, settings: LlmSettings) -> Self {
        Self::with_http_client(reqwest::Client::new(), api_key, settings)
    }

    /// Use a caller-built client, e.g. one with its own proxy or timeout setup.
    pub fn with_http_client(http: reqwest::Client, api_key: String, settings: LlmSettings) -> Self {
        let base_url = settings
            .base_url
            .clone()
            .unwrap_or_else(|| settings.provider.default_base_url().to_string())
            .trim_end_matches('/')
            .to_string();
        Self {
            http,
            api_key,
            base_url,
            settings,
        }
    }

    pub fn model(&self) -> &str {
        &self.settings.model
    }

    fn request(&self, prompt: &str) -> reqwest::RequestBuilder {
        match self.settings.provider {
            LlmProvider::Gemini => {
                let mut generation_config = serde_json::Map::new();
                if let Some(t) = self.settings.temperature {
                    generation_config.insert("temperature".into(), serde_json::json!(t));
                }
                if let Some(n) = self.settings.max_output_tokens {
                    generation_config.insert("maxOutputTokens".into(), serde_json::json!(n));
                }
                let body = serde_json::json!({
                    "contents": [{"role": "user", "parts": [{"text": prompt}]}],
                    "generationConfig": generation_config,
                });
                self.http
                    .post(format!(
                        "{}/models/{}:generateContent",
                        self.base_url, self.settings.model
                    ))
                    .header("x-goog-api-key", &self.api_key)
                    .json(&body)
            }
            LlmProvider::OpenAi => {
                let mut body = serde_json::json!({
                    "model": self.settings.model,
                    "messages": [
                        {"role": "user", "content": prompt}
                    ],
                });
                if let Some(t) = self.settings.temperature {
                    body["temperature"] = serde_json::json!(t);
                }
                if let Some(n) = self.settings.max_output_tokens {
                    body["max_tokens"] = serde_json::json!(n);
                }
                self.http
                    .post(format!("{}/chat/completions", self.base_url))
                    .header("Authorization", format!("Bearer {}", self.api_key))
                    .json(&body)
            }
        }
    }
}

#[async_trait]
impl TextGenerator for LlmClient {
    async fn generate(&self, prompt: &str) -> Result<String> {
        debug!(
            "Calling {:?} model {} with a {} byte prompt",
            self.settings.provider,
            self.settings.model,
            prompt.len()
        );

        let response = self
            .request(prompt)
            .send()
            .await
            .map_err(|e| ReportError::generation_with("LLM API call failed", e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ReportError::generation_with("Failed to read LLM response", e))?;

        if !status.is_success() {
            return Err(ReportError::generation(format!(
                "LLM API returned {}: {}",
                status,
                error_detail(&body)
            )));
        }

        let response_json: serde_json::Value = serde_json::from_str(&body)
            .map_err(|e| ReportError::generation_with("Failed to parse LLM response", e))?;
        extract_text(self.settings.provider, &response_json)
    }
}

/// Both providers report failures as `{"error": {"message": ...}}`; gateways
/// in front of them often answer with plain text or HTML instead.
fn error_detail(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| {
            let body = body.trim();
            if body.is_empty() {
                "empty response body".to_string()
            } else {
                body.chars().take(ERROR_BODY_LIMIT).collect()
            }
        })
}

/// Pull the generated text out of a successful response body.
pub fn extract_text(provider: LlmProvider, response: &serde_json::Value) -> Result<String> {
    match provider {
        LlmProvider::Gemini => {
            let parts = response["candidates"][0]["content"]["parts"]
                .as_array()
                .ok_or_else(|| {
                    let reason = response["promptFeedback"]["blockReason"]
                        .as_str()
                        .or_else(|| response["candidates"][0]["finishReason"].as_str())
                        .unwrap_or("no candidates");
                    ReportError::generation(format!("No content in LLM response ({})", reason))
                })?;
            let text: String = parts.iter().filter_map(|p| p["text"].as_str()).collect();
            if text.is_empty() {
                return Err(ReportError::generation("No text in LLM response"));
            }
            Ok(text)
        }
        LlmProvider::OpenAi => response["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ReportError::generation("No content in LLM response")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Answers a single HTTP request with `status` and `body`, returning
    /// the base URL to point a client at.
    async fn serve_once(status: &'static str, content_type: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            read_request(&mut socket).await;
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                content_type,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
        });
        format!("http://{}", addr)
    }

    /// Consume headers and a `Content-Length` body so the client sees a
    /// clean response rather than a reset.
    async fn read_request(socket: &mut tokio::net::TcpStream) {
        let mut request = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                return;
            }
            request.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&request);
            if let Some(end) = text.find("\r\n\r\n") {
                let length = text[..end]
                    .lines()
                    .find_map(|line| {
                        let (name, value) = line.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if request.len() >= end + 4 + length {
                    return;
                }
            }
        }
    }

    fn client_for(base_url: String, provider: LlmProvider) -> LlmClient {
        let settings = LlmSettings {
            provider,
            base_url: Some(base_url),
            ..LlmSettings::default()
        };
        let http = reqwest::Client::builder().no_proxy().build().unwrap();
        LlmClient::with_http_client(http, "test-key".into(), settings)
    }

    #[tokio::test]
    async fn test_successful_call_returns_text() {
        let body = r#"{"candidates":[{"content":{"parts":[{"text":"Vendas cresceram."}]}}]}"#;
        let base = serve_once("200 OK", "application/json", body).await;

        let text = client_for(base, LlmProvider::Gemini).generate("prompt").await.unwrap();
        assert_eq!(text, "Vendas cresceram.");
    }

    #[tokio::test]
    async fn test_non_json_error_body_keeps_status() {
        let base = serve_once("502 Bad Gateway", "text/html", "<html>upstream down</html>").await;

        let err = client_for(base, LlmProvider::Gemini).generate("prompt").await.unwrap_err();
        assert!(err.is_retryable());
        let message = err.to_string();
        assert!(message.contains("502"), "got {}", message);
        assert!(message.contains("upstream down"), "got {}", message);
    }

    #[tokio::test]
    async fn test_json_error_body_reports_api_message() {
        let body = r#"{"error":{"message":"API key not valid"}}"#;
        let base = serve_once("500 Internal Server Error", "application/json", body).await;

        let err = client_for(base, LlmProvider::OpenAi).generate("prompt").await.unwrap_err();
        let message = err.to_string();
        assert!(message.contains("500"), "got {}", message);
        assert!(message.contains("API key not valid"), "got {}", message);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_generation_error_with_cause() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = client_for(format!("http://{}", addr), LlmProvider::Gemini)
            .generate("prompt")
            .await
            .unwrap_err();
        assert!(matches!(err, ReportError::Generation { .. }));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_error_detail_falls_back_to_body() {
        assert_eq!(error_detail(r#"{"error":{"message":"quota"}}"#), "quota");
        assert_eq!(error_detail("  Service Unavailable \n"), "Service Unavailable");
        assert_eq!(error_detail(""), "empty response body");
        assert_eq!(error_detail(&"x".repeat(500)).len(), ERROR_BODY_LIMIT);
    }

    #[test]
    fn test_gemini_parts_are_concatenated() {
        let body = json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "# Report\n"}, {"text": "Sales grew."}]},
                "finishReason": "STOP"
            }]
        });
        assert_eq!(
            extract_text(LlmProvider::Gemini, &body).unwrap(),
            "# Report\nSales grew."
        );
    }

    #[test]
    fn test_gemini_blocked_prompt_is_generation_error() {
        let body = json!({"promptFeedback": {"blockReason": "SAFETY"}});
        let err = extract_text(LlmProvider::Gemini, &body).unwrap_err();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("SAFETY"));
    }

    #[test]
    fn test_openai_content() {
        let body = json!({"choices": [{"message": {"role": "assistant", "content": "Relatório"}}]});
        assert_eq!(extract_text(LlmProvider::OpenAi, &body).unwrap(), "Relatório");
        assert!(extract_text(LlmProvider::OpenAi, &json!({})).is_err());
    }

    #[test]
    fn test_base_url_defaults_per_provider() {
        let client = LlmClient::new("k".into(), LlmSettings::default());
        assert_eq!(client.base_url, "https://generativelanguage.googleapis.com/v1beta");
        assert_eq!(client.model(), "gemini-pro");

        let settings = LlmSettings {
            provider: LlmProvider::OpenAi,
            base_url: Some("http://localhost:8080/v1/".into()),
            ..LlmSettings::default()
        };
        let client = LlmClient::new("k".into(), settings);
        assert_eq!(client.base_url, "http://localhost:8080/v1");
    }
}
