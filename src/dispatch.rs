//! Inference dispatch: the `POST {endpoint}/chat/completions` exchange.

use std::error::Error as _;
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::auth::AuthHeaders;
use crate::error::InferenceError;
use crate::redact::redact_sensitive_detail;

/// Conversation role of one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// An immutable conversation plus optional sampling parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceRequest {
    messages: Vec<ChatMessage>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

impl InferenceRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// The serialized message array that request headers are bound to.
    ///
    /// Only the messages are covered. `temperature` and `max_tokens` travel
    /// in the request body unsigned, matching what providers verify.
    pub fn signing_payload(&self) -> Result<String, InferenceError> {
        serde_json::to_string(&self.messages).map_err(|e| InferenceError::Signing {
            reason: format!("failed to serialize messages: {e}"),
        })
    }
}

#[derive(Debug, Serialize)]
struct CompletionRequestBody<'a> {
    messages: &'a [ChatMessage],
    model: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

/// Successful completion extracted from a 2xx response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatCompletion {
    pub chat_id: String,
    pub content: String,
}

/// Outcome of one dispatch that reached the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InferenceResult {
    Completed(ChatCompletion),
    /// Non-2xx status with the raw body, verbatim.
    Rejected { status: u16, body: String },
}

impl InferenceResult {
    pub fn into_completion(self) -> Result<ChatCompletion, InferenceError> {
        match self {
            Self::Completed(completion) => Ok(completion),
            Self::Rejected { status, body } => Err(InferenceError::InferenceHttp { status, body }),
        }
    }
}

/// Pull `id` and `choices[0].message.content` out of a completion body.
pub fn parse_completion(body: &str) -> Result<ChatCompletion, InferenceError> {
    let value: serde_json::Value =
        serde_json::from_str(body).map_err(|e| InferenceError::MalformedResponse {
            reason: format!("response is not JSON: {e}"),
        })?;

    let chat_id = value
        .get("id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| InferenceError::MalformedResponse {
            reason: "missing string field 'id'".to_string(),
        })?;
    let content = value
        .pointer("/choices/0/message/content")
        .and_then(|v| v.as_str())
        .ok_or_else(|| InferenceError::MalformedResponse {
            reason: "missing string field 'choices[0].message.content'".to_string(),
        })?;

    Ok(ChatCompletion {
        chat_id: chat_id.to_string(),
        content: content.to_string(),
    })
}

/// Sends completion requests with a bounded timeout. No retries.
pub struct InferenceDispatcher {
    client: Client,
    timeout: Duration,
}

impl InferenceDispatcher {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_else(|_| Client::new()),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn send(
        &self,
        url: &str,
        model: &str,
        request: &InferenceRequest,
        headers: &AuthHeaders,
    ) -> Result<InferenceResult, InferenceError> {
        let body = CompletionRequestBody {
            messages: request.messages(),
            model,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        let mut builder = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .json(&body);
        for (name, value) in headers.iter() {
            builder = builder.header(name, value);
        }

        tracing::debug!(
            url,
            model,
            messages = request.messages().len(),
            "Dispatching inference request"
        );

        let exchange = async {
            let response = builder.send().await?;
            let status = response.status();
            let text = response.text().await?;
            Ok::<_, reqwest::Error>((status, text))
        };

        let (status, text) = match tokio::time::timeout(self.timeout, exchange).await {
            Ok(Ok(pair)) => pair,
            Ok(Err(error)) => return Err(self.classify_transport_error(url, &error)),
            Err(_) => {
                return Err(InferenceError::Timeout {
                    target: url.to_string(),
                    timeout_ms: self.timeout_ms(),
                });
            }
        };

        if !status.is_success() {
            tracing::debug!(
                url,
                status = status.as_u16(),
                "Inference endpoint rejected request"
            );
            return Ok(InferenceResult::Rejected {
                status: status.as_u16(),
                body: text,
            });
        }

        parse_completion(&text).map(InferenceResult::Completed)
    }

    fn timeout_ms(&self) -> u64 {
        u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX)
    }

    fn classify_transport_error(&self, url: &str, error: &reqwest::Error) -> InferenceError {
        if error.is_timeout() {
            return InferenceError::Timeout {
                target: url.to_string(),
                timeout_ms: self.timeout_ms(),
            };
        }
        InferenceError::Network {
            target: url.to_string(),
            reason: describe_transport_error(error),
        }
    }
}

/// Short, redacted description of a transport failure (DNS, refused, ...).
pub(crate) fn describe_transport_error(error: &reqwest::Error) -> String {
    let mut source = error.source();
    while let Some(err) = source {
        if let Some(io_error) = err.downcast_ref::<std::io::Error>() {
            let kind = match io_error.kind() {
                std::io::ErrorKind::NotFound => "dns failure",
                std::io::ErrorKind::ConnectionRefused => "connection refused",
                std::io::ErrorKind::ConnectionReset | std::io::ErrorKind::ConnectionAborted => {
                    "connection reset"
                }
                _ => "connect failure",
            };
            return format!("{kind}: {}", redact_sensitive_detail(&io_error.to_string()));
        }
        source = err.source();
    }

    let detail = redact_sensitive_detail(&error.to_string());
    let lowered = detail.to_ascii_lowercase();
    if lowered.contains("dns")
        || lowered.contains("lookup")
        || lowered.contains("name or service not known")
        || lowered.contains("no such host")
    {
        format!("dns failure: {detail}")
    } else {
        detail
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_completion() {
        let completion =
            parse_completion(r#"{"id":"c1","choices":[{"message":{"content":"hello"}}]}"#)
                .unwrap();
        assert_eq!(
            completion,
            ChatCompletion {
                chat_id: "c1".to_string(),
                content: "hello".to_string(),
            }
        );
    }

    #[test]
    fn extra_fields_are_ignored() {
        let body = r#"{
            "id": "chatcmpl-9",
            "object": "chat.completion",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "hi"}}],
            "usage": {"prompt_tokens": 3, "completion_tokens": 1}
        }"#;
        let completion = parse_completion(body).unwrap();
        assert_eq!(completion.chat_id, "chatcmpl-9");
        assert_eq!(completion.content, "hi");
    }

    #[test]
    fn missing_fields_are_malformed_not_panics() {
        for body in [
            "not json",
            r#"{"choices":[{"message":{"content":"x"}}]}"#,
            r#"{"id":"c1","choices":[]}"#,
            r#"{"id":"c1","choices":[{"message":{"content":null}}]}"#,
            r#"{"id":7,"choices":[{"message":{"content":"x"}}]}"#,
        ] {
            let err = parse_completion(body).unwrap_err();
            assert!(
                matches!(err, InferenceError::MalformedResponse { .. }),
                "{body}"
            );
        }
    }

    #[test]
    fn request_body_omits_unset_sampling_fields() {
        let request = InferenceRequest::new(vec![ChatMessage::user("Say hello")]);
        let body = CompletionRequestBody {
            messages: request.messages(),
            model: "llama-3.3-70b",
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            serde_json::json!({
                "messages": [{"role": "user", "content": "Say hello"}],
                "model": "llama-3.3-70b"
            })
        );

        let tuned = request.clone().with_temperature(0.5).with_max_tokens(1000);
        let body = CompletionRequestBody {
            messages: tuned.messages(),
            model: "m",
            temperature: tuned.temperature,
            max_tokens: tuned.max_tokens,
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["temperature"], serde_json::json!(0.5));
        assert_eq!(value["max_tokens"], serde_json::json!(1000));
    }

    #[test]
    fn signing_payload_is_the_message_array() {
        let request = InferenceRequest::new(vec![ChatMessage::user("Say hello")]);
        assert_eq!(
            request.signing_payload().unwrap(),
            r#"[{"role":"user","content":"Say hello"}]"#
        );
    }

    #[test]
    fn sampling_fields_do_not_change_the_signed_payload() {
        let plain = InferenceRequest::new(vec![ChatMessage::user("Say hello")]);
        let tuned = plain.clone().with_temperature(0.2).with_max_tokens(64);
        assert_eq!(
            tuned.signing_payload().unwrap(),
            plain.signing_payload().unwrap()
        );
    }

    #[test]
    fn rejected_result_becomes_http_error() {
        let err = InferenceResult::Rejected {
            status: 500,
            body: "server overloaded".to_string(),
        }
        .into_completion()
        .unwrap_err();
        assert_eq!(
            err,
            InferenceError::InferenceHttp {
                status: 500,
                body: "server overloaded".to_string(),
            }
        );
    }
}
