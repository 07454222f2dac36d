use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;

pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// Fallback run settings read from the environment. Per-run settings
/// supplied by the CLI or a start request always win over these.
#[derive(Clone, Debug)]
pub struct RunDefaults {
    pub model_one: String,
    pub model_two: String,
    pub judge_model: String,
    pub num_iterations: u32,
    pub temperature: f64,
    pub judge_temperature: f64,
    pub max_tokens: u32,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub api_key: String,
    pub base_url: String,
    pub results_dir: PathBuf,
    pub defaults: RunDefaults,
}

impl AppConfig {
    /// Load from environment variables
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let api_key =
            env::var("OPENROUTER_API_KEY").context("必须设置 OPENROUTER_API_KEY 环境变量")?;
        let base_url =
            env::var("OPENROUTER_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());

        Ok(Self {
            api_key,
            base_url,
            results_dir: results_dir_from_env(),
            defaults: RunDefaults::from_env()?,
        })
    }
}

/// Results directory alone, for commands that only read persisted runs.
pub fn results_dir_from_env() -> PathBuf {
    dotenv::dotenv().ok();
    PathBuf::from(env::var("RESULTS_DIR").unwrap_or_else(|_| "results".to_string()))
}

impl RunDefaults {
    fn baked_in() -> Self {
        Self {
            model_one: "openai/gpt-4.1-mini".to_string(),
            model_two: "anthropic/claude-3.7-sonnet".to_string(),
            judge_model: "meta-llama/llama-3.1-70b-instruct".to_string(),
            num_iterations: 3,
            temperature: 0.1,
            judge_temperature: 0.0,
            max_tokens: 1000,
        }
    }

    fn from_env() -> Result<Self> {
        let baked = Self::baked_in();
        Ok(Self {
            model_one: env::var("RESPONSE_MODEL_1").unwrap_or(baked.model_one),
            model_two: env::var("RESPONSE_MODEL_2").unwrap_or(baked.model_two),
            judge_model: env::var("JUDGE_MODEL").unwrap_or(baked.judge_model),
            num_iterations: parse_env("NUM_ITERATIONS", baked.num_iterations)?,
            temperature: parse_env("TEMPERATURE", baked.temperature)?,
            judge_temperature: parse_env("JUDGE_TEMPERATURE", baked.judge_temperature)?,
            max_tokens: parse_env("MAX_TOKENS", baked.max_tokens)?,
        })
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .with_context(|| format!("解析环境变量 {} 失败: {}", key, raw)),
        Err(_) => Ok(default),
    }
}
