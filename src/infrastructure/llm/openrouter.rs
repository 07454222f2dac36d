use super::retry::RetryPolicy;
use super::{ChatClient, ChatRequest};
use crate::core::error::ApiError;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// 首次尝试的超时时间
const FIRST_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(120);
/// 重试时放宽超时，容忍响应缓慢但仍然存活的端点
const RETRY_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(180);

const BODY_EXCERPT_LEN: usize = 500;

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    message: String,
    #[serde(rename = "type", default)]
    kind: String,
}

/// OpenRouter 客户端，带重试与错误分类
pub struct OpenRouterClient {
    client: Client,
    base_url: String,
    api_key: String,
    retry: RetryPolicy,
}

impl OpenRouterClient {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            retry: RetryPolicy::default(),
        }
    }

    /// 单次请求发送。超时随重试次数放宽。
    async fn send_once(&self, request: &ChatRequest, attempt: u32) -> Result<ChatCompletion, ApiError> {
        let timeout = if attempt == 0 {
            FIRST_ATTEMPT_TIMEOUT
        } else {
            RETRY_ATTEMPT_TIMEOUT
        };

        debug!(
            "正在发送请求: model={}, attempt={}",
            request.model,
            attempt + 1
        );

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(timeout)
            .json(request)
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::BAD_REQUEST {
            let body = response.text().await.unwrap_or_default();
            return Err(translate_bad_request(&request.model, &body));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Remote {
                status: status.as_u16(),
                body: excerpt(&body),
            });
        }

        response
            .json::<ChatCompletion>()
            .await
            .map_err(|e| ApiError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl ChatClient for OpenRouterClient {
    async fn complete(&self, request: &ChatRequest) -> Result<String, ApiError> {
        let completion = self
            .retry
            .run(|attempt| self.send_once(request, attempt))
            .await?;

        completion
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| ApiError::InvalidResponse("response contained no choices".to_string()))
    }
}

/// 400 响应立即转译为 BadRequest，绝不与瞬时网络错误混淆
fn translate_bad_request(model: &str, body: &str) -> ApiError {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(ErrorBody { error: Some(detail) }) if !detail.message.is_empty() => {
            ApiError::BadRequest {
                error_type: if detail.kind.is_empty() {
                    "Bad Request".to_string()
                } else {
                    detail.kind
                },
                message: detail.message,
                model: model.to_string(),
            }
        }
        _ => ApiError::BadRequest {
            error_type: "Bad Request".to_string(),
            message: excerpt(body),
            model: model.to_string(),
        },
    }
}

fn excerpt(body: &str) -> String {
    if body.len() <= BODY_EXCERPT_LEN {
        return body.to_string();
    }
    let mut end = BODY_EXCERPT_LEN;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    body[..end].to_string()
}
