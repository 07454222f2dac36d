use super::{ChatClient, ChatRequest};
use crate::core::error::ApiError;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use tracing::info;

/// Scripted stand-in for the upstream provider. Replies are consumed in
/// push order; every request is recorded for assertions.
#[derive(Default)]
pub struct MockChatClient {
    script: Mutex<VecDeque<Result<String, ApiError>>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl MockChatClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_ok(&self, content: impl Into<String>) {
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(Ok(content.into()));
    }

    pub fn push_err(&self, err: ApiError) {
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(Err(err));
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl ChatClient for MockChatClient {
    async fn complete(&self, request: &ChatRequest) -> Result<String, ApiError> {
        info!("[Mock] Completing request for {}", request.model);
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.clone());
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or_else(|| {
                Err(ApiError::InvalidResponse(
                    "mock script exhausted".to_string(),
                ))
            })
    }
}
