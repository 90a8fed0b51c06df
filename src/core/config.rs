use std::env;
use std::time::Duration;

use crate::core::error::{ChatError, DEFAULT_TIMEOUT_MS};

const DEFAULT_BODY_LIMIT: &str = "10mb";
const DEFAULT_SYSTEM_ROLE: &str = "You are a helpful assistant.";
const DEFAULT_KEEP_ALIVE_MS: u64 = 15_000;

/// Server side configuration, read once at process start.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub deepseek_api_url: String,
    pub deepseek_api_key: String,
    pub deepseek_model: String,
    pub upstream_timeout: Duration,
    /// Gap after which an idle event stream gets a comment line.
    pub keep_alive_interval: Duration,
    pub body_limit: usize,
    pub cors_origin: String,
    pub static_dir: String,
}

impl AppConfig {
    /// Load `.env.<APP_ENV>` (if present) then read the environment.
    /// Missing upstream settings fail here rather than per request.
    pub fn from_env() -> Result<Self, ChatError> {
        load_dotenv();

        let deepseek_api_url =
            required_var("DEEPSEEK_API_URL").ok_or_else(|| ChatError::missing_field("DEEPSEEK_API_URL"))?;
        let deepseek_api_key = required_var("DEEPSEEK_API_KEY").ok_or_else(ChatError::api_key)?;
        let deepseek_model =
            required_var("DEEPSEEK_MODEL").ok_or_else(|| ChatError::missing_field("DEEPSEEK_MODEL"))?;

        let body_limit_raw = env::var("BODY_LIMIT").unwrap_or_else(|_| DEFAULT_BODY_LIMIT.to_string());
        let body_limit = parse_byte_size(&body_limit_raw).ok_or_else(|| {
            ChatError::validation(
                format!("Invalid BODY_LIMIT: {body_limit_raw}"),
                Some(serde_json::json!({ "field": "BODY_LIMIT" })),
            )
        })?;

        let upstream_timeout_ms = millis_var("DEEPSEEK_TIMEOUT_MS", DEFAULT_TIMEOUT_MS)?;
        let keep_alive_ms = millis_var("SSE_KEEP_ALIVE_MS", DEFAULT_KEEP_ALIVE_MS)?;

        Ok(Self {
            deepseek_api_url,
            deepseek_api_key,
            deepseek_model,
            upstream_timeout: Duration::from_millis(upstream_timeout_ms),
            keep_alive_interval: Duration::from_millis(keep_alive_ms),
            body_limit,
            cors_origin: env::var("CORS_ORIGIN").unwrap_or_else(|_| "*".to_string()),
            static_dir: env::var("STATIC_DIR").unwrap_or_else(|_| "./public".to_string()),
        })
    }
}

/// Configuration for the terminal chat client.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub api_base_url: String,
    pub system_role: String,
    pub storage_path: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        load_dotenv();

        let api_base_url = env::var("CHAT_API_BASE_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:3000/api".to_string());
        let system_role =
            env::var("CHAT_SYSTEM_ROLE").unwrap_or_else(|_| DEFAULT_SYSTEM_ROLE.to_string());
        let storage_path =
            env::var("CHAT_STORAGE_PATH").unwrap_or_else(|_| "./chats.json".to_string());

        Self {
            api_base_url,
            system_role,
            storage_path,
        }
    }
}

/// Environment specific dotenv file, e.g. `.env.development`. Values
/// already present in the process environment are not overridden.
fn load_dotenv() {
    let app_env = env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());
    let _ = dotenv::from_filename(format!(".env.{app_env}"));
}

fn millis_var(name: &str, default: u64) -> Result<u64, ChatError> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse::<u64>().map_err(|_| {
            ChatError::validation(
                format!("Invalid {name}: {raw}"),
                Some(serde_json::json!({ "field": name })),
            )
        }),
        Err(_) => Ok(default),
    }
}

fn required_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Parse sizes like `10mb`, `512kb`, `1gb` or a plain byte count.
pub fn parse_byte_size(raw: &str) -> Option<usize> {
    let raw = raw.trim().to_ascii_lowercase();
    let (digits, multiplier) = if let Some(n) = raw.strip_suffix("gb") {
        (n, 1024 * 1024 * 1024)
    } else if let Some(n) = raw.strip_suffix("mb") {
        (n, 1024 * 1024)
    } else if let Some(n) = raw.strip_suffix("kb") {
        (n, 1024)
    } else if let Some(n) = raw.strip_suffix('b') {
        (n, 1)
    } else {
        (raw.as_str(), 1)
    };
    digits.trim().parse::<usize>().ok()?.checked_mul(multiplier)
}
