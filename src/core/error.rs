use thiserror::Error;

/// 上游模型 API 错误类型
#[derive(Error, Debug)]
pub enum ApiError {
    /// Transient transport failure (connection reset, read timeout, etc.).
    /// Eligible for retry; never surfaced to callers directly.
    #[error("transient network error: {0}")]
    Network(String),

    /// All retry attempts consumed. Terminal for the request.
    #[error("network error after {attempts} attempts: {cause}")]
    NetworkExhausted { attempts: u32, cause: String },

    /// The remote service rejected the request. Never retried.
    #[error("bad request ({error_type}) for model {model}: {message}")]
    BadRequest {
        error_type: String,
        message: String,
        model: String,
    },

    /// Unclassified non-2xx status.
    #[error("remote error (status {status}): {body}")]
    Remote { status: u16, body: String },

    /// 2xx response whose body did not match the expected shape.
    #[error("malformed upstream response: {0}")]
    InvalidResponse(String),
}

impl ApiError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ApiError::Network(_))
    }
}

/// 应用错误类型
#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// 应用级别通用 Result 类型
pub type AppResult<T> = Result<T, AppError>;
