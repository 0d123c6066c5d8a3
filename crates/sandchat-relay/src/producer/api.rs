//! Hosted Messages API producer.
//!
//! Sends the persona as the system instruction together with the structured
//! conversation, and relays `text_delta` fragments from the streamed reply.

use std::time::Duration;

use futures::StreamExt;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use sandchat_core::config::ChatConfig;
use sandchat_core::event::{MAX_ERROR_DETAIL, truncate_chars};
use serde_json::{Value, json};
use tracing::{info, warn};

use super::sse::{SseDecoder, SseFrame};
use super::{Fragment, FragmentStream, Producer, ProducerError, ProducerInput};

/// Connection settings for the Messages API.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub base_url: String,
    pub api_key: String,
    pub api_version: String,
    pub model: String,
    pub max_tokens: u32,
}

impl ApiConfig {
    pub fn from_chat_config(config: &ChatConfig, api_key: String) -> Self {
        Self {
            base_url: config.api_base_url.clone(),
            api_key,
            api_version: config.api_version.clone(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
        }
    }
}

/// Producer that streams completions from the hosted API.
#[derive(Debug)]
pub struct ApiProducer {
    http: reqwest::Client,
    messages_url: String,
    model: String,
    max_tokens: u32,
}

impl ApiProducer {
    pub fn new(config: ApiConfig) -> Result<Self, ProducerError> {
        if config.api_key.trim().is_empty() {
            return Err(ProducerError::Config("api_key is empty".into()));
        }

        let mut headers = HeaderMap::new();
        let key = HeaderValue::from_str(&config.api_key)
            .map_err(|_| ProducerError::Config("Invalid api_key format".into()))?;
        headers.insert("x-api-key", key);
        let version = HeaderValue::from_str(&config.api_version)
            .map_err(|_| ProducerError::Config("Invalid api_version format".into()))?;
        headers.insert("anthropic-version", version);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        // reqwest is built with rustls-no-provider; an `Err` here only means a
        // provider is already installed.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ProducerError::Config(format!("failed to build HTTP client: {e}")))?;

        let messages_url = format!("{}/v1/messages", config.base_url.trim_end_matches('/'));
        Ok(Self {
            http,
            messages_url,
            model: config.model,
            max_tokens: config.max_tokens,
        })
    }

    fn request_body(&self, input: &ProducerInput) -> Value {
        json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "system": input.system,
            "messages": input.messages,
            "stream": true,
        })
    }
}

#[async_trait::async_trait]
impl Producer for ApiProducer {
    fn name(&self) -> &'static str {
        "api"
    }

    async fn start(&self, input: ProducerInput) -> Result<FragmentStream, ProducerError> {
        info!(
            model = %self.model,
            messages = input.messages.len(),
            "Sending streaming request to Messages API"
        );

        let response = self
            .http
            .post(&self.messages_url)
            .json(&self.request_body(&input))
            .send()
            .await
            .map_err(|e| ProducerError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            warn!(status = status.as_u16(), "Messages API request rejected");
            return Err(ProducerError::Api {
                status: status.as_u16(),
                message: truncate_chars(&api_error_message(&body), MAX_ERROR_DETAIL).to_string(),
            });
        }

        let mut bytes = response.bytes_stream();
        let stream = async_stream::stream! {
            let mut decoder = SseDecoder::default();
            let mut finished = false;
            'body: while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        yield Err(ProducerError::Http(e.to_string()));
                        finished = true;
                        break 'body;
                    }
                };
                for frame in decoder.push_chunk(&chunk) {
                    match map_frame(&frame) {
                        Ok(Some(fragment)) => {
                            let stop = matches!(fragment, Fragment::Exit(_));
                            yield Ok(fragment);
                            if stop {
                                finished = true;
                                break 'body;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => {
                            yield Err(e);
                            finished = true;
                            break 'body;
                        }
                    }
                }
            }
            if !finished {
                warn!("Messages API stream ended without message_stop");
                yield Err(ProducerError::Stream("stream ended before message_stop".into()));
            }
        };

        Ok(Box::pin(stream))
    }
}

/// Translate one streamed API event into a fragment.
fn map_frame(frame: &SseFrame) -> Result<Option<Fragment>, ProducerError> {
    if frame.data.trim().is_empty() {
        return Ok(None);
    }
    let value: Value = serde_json::from_str(&frame.data)
        .map_err(|e| ProducerError::Stream(format!("invalid event JSON: {e}")))?;

    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .or(frame.event.as_deref());
    match kind {
        Some("content_block_delta") => Ok(value
            .get("delta")
            .filter(|d| d.get("type").and_then(Value::as_str) == Some("text_delta"))
            .and_then(|d| d.get("text"))
            .and_then(Value::as_str)
            .map(|text| Fragment::Delta(text.to_string()))),
        Some("message_stop") => Ok(Some(Fragment::Exit(None))),
        Some("error") => Err(ProducerError::Stream(
            value
                .get("error")
                .and_then(|e| e.get("message"))
                .and_then(Value::as_str)
                .unwrap_or("Messages API stream error")
                .to_string(),
        )),
        _ => Ok(None),
    }
}

/// Pull `error.message` out of an API error body, falling back to the body.
fn api_error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(Value::as_str)
                .map(ToOwned::to_owned)
        })
        .unwrap_or_else(|| body.to_string())
}
