// SPDX-FileCopyrightText: 2026 Botfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs.
//!
//! All structs use `#[serde(deny_unknown_fields)]` so typos in config
//! keys fail loudly at startup.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Top-level botfleet configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FleetConfig {
    #[serde(default)]
    pub app: AppConfig,
    #[serde(default)]
    pub manager: ManagerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub ingress: IngressConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSection,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub whisper: WhisperConfig,
    #[serde(default)]
    pub pricing: PricingConfig,
    #[serde(default)]
    pub payments: PaymentsConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
    #[serde(default)]
    pub sender: SenderConfig,
    #[serde(default)]
    pub recovery: RecoverySection,
}

/// Application environment and logging.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// One of dev, staging, prod. Toggles log verbosity and safety nets.
    #[serde(default = "default_app_env")]
    pub env: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Accepted for parity with the deployment env; recorded at startup.
    #[serde(default)]
    pub sentry_dsn: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            env: default_app_env(),
            log_level: default_log_level(),
            sentry_dsn: None,
        }
    }
}

fn default_app_env() -> String {
    "dev".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    pub fn is_prod(&self) -> bool {
        self.env == "prod"
    }
}

/// Manager bot and webhook registration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ManagerConfig {
    /// Token for manager-bot outbound calls. Empty disables the manager.
    #[serde(default)]
    pub bot_token: String,
    /// Value expected in `X-Telegram-Bot-Api-Secret-Token` for /webhook/manager.
    #[serde(default)]
    pub webhook_secret: String,
    /// Public base URL used when registering webhooks.
    #[serde(default = "default_webhook_base_url")]
    pub webhook_base_url: String,
}

fn default_webhook_base_url() -> String {
    "http://localhost:8000".to_string()
}

/// SQLite storage settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    #[serde(default = "default_database_path")]
    pub database_path: String,
    /// Per-call SQL timeout in seconds.
    #[serde(default = "default_sql_timeout")]
    pub timeout_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            timeout_secs: default_sql_timeout(),
        }
    }
}

fn default_database_path() -> String {
    "botfleet.db".to_string()
}

fn default_sql_timeout() -> u64 {
    5
}

/// Shared KV / broker settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RedisConfig {
    /// Empty string selects the in-process KV (tests, single node).
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_redis_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_kv_timeout")]
    pub timeout_secs: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: default_redis_max_connections(),
            timeout_secs: default_kv_timeout(),
        }
    }
}

fn default_redis_max_connections() -> u32 {
    100
}

fn default_kv_timeout() -> u64 {
    2
}

/// Encryption key, admin allowlist and rate limits.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SecurityConfig {
    /// 32-byte key, base64 encoded (`base64:` prefix tolerated).
    #[serde(default)]
    pub encryption_key: String,
    /// Comma-separated Telegram ids: unlimited-credit set + legacy allowlist.
    #[serde(default)]
    pub allowed_admin_ids: String,
    /// JSON map `action -> {"limit": n, "window": secs}`.
    #[serde(default = "default_rate_limits_json")]
    pub rate_limits_json: String,
}

fn default_rate_limits_json() -> String {
    r#"{"default":{"limit":30,"window":60}}"#.to_string()
}

/// One sliding-window rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct RateLimitRule {
    pub limit: u32,
    pub window: u64,
}

impl Default for RateLimitRule {
    fn default() -> Self {
        Self { limit: 30, window: 60 }
    }
}

impl SecurityConfig {
    /// Parses the comma-separated admin allowlist, skipping blanks.
    pub fn allowed_admin_ids(&self) -> Vec<i64> {
        self.allowed_admin_ids
            .split(',')
            .filter_map(|part| part.trim().parse::<i64>().ok())
            .collect()
    }

    /// Parses the rate-limit map; a malformed JSON value falls back to
    /// the compiled default rather than disabling limiting.
    pub fn rate_limits(&self) -> HashMap<String, RateLimitRule> {
        serde_json::from_str(&self.rate_limits_json).unwrap_or_else(|_| {
            let mut map = HashMap::new();
            map.insert("default".to_string(), RateLimitRule::default());
            map
        })
    }
}

/// HTTP ingress bind settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct IngressConfig {
    #[serde(default = "default_bind_host")]
    pub host: String,
    #[serde(default = "default_bind_port")]
    pub port: u16,
}

impl Default for IngressConfig {
    fn default() -> Self {
        Self {
            host: default_bind_host(),
            port: default_bind_port(),
        }
    }
}

fn default_bind_host() -> String {
    "127.0.0.1".to_string()
}

fn default_bind_port() -> u16 {
    8000
}

/// Task runtime tuning.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct QueueConfig {
    /// Workers per queue; unknown queues fall back to `default`.
    #[serde(default = "default_concurrency")]
    pub concurrency: HashMap<String, u32>,
    /// Poll interval of idle workers, milliseconds.
    #[serde(default = "default_poll_ms")]
    pub poll_interval_ms: u64,
    /// Scheduler sweep cadence, seconds.
    #[serde(default = "default_sweep_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            poll_interval_ms: default_poll_ms(),
            sweep_interval_secs: default_sweep_secs(),
        }
    }
}

fn default_concurrency() -> HashMap<String, u32> {
    [
        ("default", 10u32),
        ("ai", 4),
        ("audio", 4),
        ("media", 4),
        ("recovery", 2),
        ("notifications", 2),
        ("scheduler", 2),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

fn default_poll_ms() -> u64 {
    250
}

fn default_sweep_secs() -> u64 {
    60
}

/// Circuit breaker thresholds shared by the external clients.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CircuitBreakerSection {
    #[serde(default = "default_fail_max")]
    pub fail_max: u32,
    #[serde(default = "default_breaker_timeout")]
    pub timeout_secs: u64,
}

impl Default for CircuitBreakerSection {
    fn default() -> Self {
        Self {
            fail_max: default_fail_max(),
            timeout_secs: default_breaker_timeout(),
        }
    }
}

fn default_fail_max() -> u32 {
    5
}

fn default_breaker_timeout() -> u64 {
    60
}

/// LLM chat-completion endpoint settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LlmConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_llm_base")]
    pub api_base: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_llm_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_llm_temperature")]
    pub temperature: f64,
    /// Conversation pairs kept in the prompt window.
    #[serde(default = "default_history_pairs")]
    pub history_pairs: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_base: default_llm_base(),
            model: default_llm_model(),
            timeout_secs: default_llm_timeout(),
            max_tokens: default_llm_max_tokens(),
            temperature: default_llm_temperature(),
            history_pairs: default_history_pairs(),
        }
    }
}

fn default_llm_base() -> String {
    "https://api.x.ai/v1".to_string()
}

fn default_llm_model() -> String {
    "grok-4-fast-non-reasoning".to_string()
}

fn default_llm_timeout() -> u64 {
    60
}

fn default_llm_max_tokens() -> u32 {
    2000
}

fn default_llm_temperature() -> f64 {
    0.7
}

fn default_history_pairs() -> usize {
    7
}

/// Whisper transcription settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct WhisperConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_whisper_base")]
    pub api_base: String,
    #[serde(default = "default_whisper_model")]
    pub model: String,
    #[serde(default = "default_whisper_timeout")]
    pub timeout_secs: u64,
    /// Longest accepted voice note, seconds.
    #[serde(default = "default_audio_max_duration")]
    pub max_duration_secs: u32,
    #[serde(default = "default_audio_max_size_mb")]
    pub max_size_mb: u32,
}

impl Default for WhisperConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_base: default_whisper_base(),
            model: default_whisper_model(),
            timeout_secs: default_whisper_timeout(),
            max_duration_secs: default_audio_max_duration(),
            max_size_mb: default_audio_max_size_mb(),
        }
    }
}

fn default_whisper_base() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_whisper_model() -> String {
    "whisper-1".to_string()
}

fn default_whisper_timeout() -> u64 {
    120
}

fn default_audio_max_duration() -> u32 {
    300
}

fn default_audio_max_size_mb() -> u32 {
    20
}

/// Unit prices and currency conversion for the credit ledger.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PricingConfig {
    #[serde(default = "default_price_input")]
    pub text_input_per_mtok_usd: f64,
    #[serde(default = "default_price_output")]
    pub text_output_per_mtok_usd: f64,
    #[serde(default = "default_price_cached")]
    pub text_cached_per_mtok_usd: f64,
    #[serde(default = "default_whisper_per_minute")]
    pub whisper_cost_per_minute_usd: f64,
    #[serde(default = "default_usd_brl")]
    pub usd_to_brl_rate: f64,
    #[serde(default = "default_chars_per_token")]
    pub estimated_chars_per_token: f64,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            text_input_per_mtok_usd: default_price_input(),
            text_output_per_mtok_usd: default_price_output(),
            text_cached_per_mtok_usd: default_price_cached(),
            whisper_cost_per_minute_usd: default_whisper_per_minute(),
            usd_to_brl_rate: default_usd_brl(),
            estimated_chars_per_token: default_chars_per_token(),
        }
    }
}

fn default_price_input() -> f64 {
    0.20
}

fn default_price_output() -> f64 {
    0.50
}

fn default_price_cached() -> f64 {
    0.05
}

fn default_whisper_per_minute() -> f64 {
    0.006
}

fn default_usd_brl() -> f64 {
    5.80
}

fn default_chars_per_token() -> f64 {
    4.0
}

/// PIX gateway settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PaymentsConfig {
    #[serde(default = "default_gateway_base")]
    pub gateway_base_url: String,
    #[serde(default = "default_gateway_timeout")]
    pub timeout_secs: u64,
    /// Dedicated gateway token used for credit top-ups.
    #[serde(default)]
    pub topup_token: String,
    /// Seconds between polling passes over pending transactions.
    #[serde(default = "default_payment_poll")]
    pub poll_interval_secs: u64,
    /// Widens upsell activation from "first delivered" to "any paid".
    #[serde(default)]
    pub upsell_on_any_paid: bool,
}

impl Default for PaymentsConfig {
    fn default() -> Self {
        Self {
            gateway_base_url: default_gateway_base(),
            timeout_secs: default_gateway_timeout(),
            topup_token: String::new(),
            poll_interval_secs: default_payment_poll(),
            upsell_on_any_paid: false,
        }
    }
}

fn default_gateway_base() -> String {
    "https://api.pushinpay.com.br".to_string()
}

fn default_gateway_timeout() -> u64 {
    10
}

fn default_payment_poll() -> u64 {
    60
}

/// Sale notification fan-out switches.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct NotificationsConfig {
    #[serde(default = "default_true")]
    pub enable_sale_notifications: bool,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            enable_sale_notifications: default_true(),
        }
    }
}

fn default_true() -> bool {
    true
}

/// Typing-effect tuning for the block sender.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SenderConfig {
    #[serde(default = "default_chars_per_minute")]
    pub typing_chars_per_minute: f64,
    #[serde(default = "default_min_typing")]
    pub min_typing_delay_secs: f64,
    #[serde(default = "default_max_typing")]
    pub max_typing_delay_secs: f64,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            typing_chars_per_minute: default_chars_per_minute(),
            min_typing_delay_secs: default_min_typing(),
            max_typing_delay_secs: default_max_typing(),
        }
    }
}

fn default_chars_per_minute() -> f64 {
    900.0
}

fn default_min_typing() -> f64 {
    0.8
}

fn default_max_typing() -> f64 {
    4.0
}

/// Recovery defaults applied when a campaign leaves fields unset.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RecoverySection {
    #[serde(default = "default_inactivity_threshold")]
    pub inactivity_threshold_secs: u64,
}

impl Default for RecoverySection {
    fn default() -> Self {
        Self {
            inactivity_threshold_secs: default_inactivity_threshold(),
        }
    }
}

fn default_inactivity_threshold() -> u64 {
    600
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allowed_admin_ids_parses_comma_list() {
        let config = SecurityConfig {
            allowed_admin_ids: "123, 456,,789 ".to_string(),
            ..Default::default()
        };
        assert_eq!(config.allowed_admin_ids(), vec![123, 456, 789]);
    }

    #[test]
    fn allowed_admin_ids_empty_is_empty() {
        let config = SecurityConfig::default();
        assert!(config.allowed_admin_ids().is_empty());
    }

    #[test]
    fn rate_limits_parse_and_fall_back() {
        let config = SecurityConfig {
            rate_limits_json: r#"{"default":{"limit":30,"window":60},"cmd:/start":{"limit":5,"window":60}}"#
                .to_string(),
            ..Default::default()
        };
        let limits = config.rate_limits();
        assert_eq!(limits["cmd:/start"].limit, 5);

        let broken = SecurityConfig {
            rate_limits_json: "not json".to_string(),
            ..Default::default()
        };
        assert_eq!(broken.rate_limits()["default"], RateLimitRule::default());
    }

    #[test]
    fn queue_concurrency_defaults_cover_all_queues() {
        let queue = QueueConfig::default();
        for name in [
            "default",
            "ai",
            "audio",
            "media",
            "recovery",
            "notifications",
            "scheduler",
        ] {
            assert!(queue.concurrency.contains_key(name), "missing {name}");
        }
        assert_eq!(queue.concurrency["default"], 10);
        assert_eq!(queue.concurrency["ai"], 4);
        assert_eq!(queue.concurrency["recovery"], 2);
    }
}
