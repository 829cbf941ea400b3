// SPDX-FileCopyrightText: 2026 Botfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Figment-based layered configuration loading.
//!
//! Merge order (later overrides earlier):
//! 1. Compiled defaults
//! 2. `/etc/botfleet/botfleet.toml`
//! 3. `~/.config/botfleet/botfleet.toml`
//! 4. `./botfleet.toml`
//! 5. Historical bare environment variables (`MANAGER_BOT_TOKEN`, ...)
//! 6. `BOTFLEET_*` environment variables

#![allow(clippy::result_large_err)] // figment::Error is external and cannot be boxed without wrapper

use std::path::Path;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};

use crate::model::FleetConfig;

/// Historical environment variable names and the config keys they feed.
///
/// Kept so deployments migrating from the scripted stack work unchanged.
const ENV_ALIASES: &[(&str, &str)] = &[
    ("APP_ENV", "app.env"),
    ("LOG_LEVEL", "app.log_level"),
    ("SENTRY_DSN", "app.sentry_dsn"),
    ("MANAGER_BOT_TOKEN", "manager.bot_token"),
    ("TELEGRAM_WEBHOOK_SECRET", "manager.webhook_secret"),
    ("WEBHOOK_BASE_URL", "manager.webhook_base_url"),
    ("DB_URL", "storage.database_path"),
    ("REDIS_URL", "redis.url"),
    ("REDIS_MAX_CONNECTIONS", "redis.max_connections"),
    ("ENCRYPTION_KEY", "security.encryption_key"),
    ("ALLOWED_ADMIN_IDS", "security.allowed_admin_ids"),
    ("RATE_LIMITS_JSON", "security.rate_limits_json"),
    ("CIRCUIT_BREAKER_FAIL_MAX", "circuit_breaker.fail_max"),
    ("CIRCUIT_BREAKER_TIMEOUT", "circuit_breaker.timeout_secs"),
    ("WHISPER_API_KEY", "whisper.api_key"),
    ("WHISPER_API_BASE", "whisper.api_base"),
    ("WHISPER_MODEL", "whisper.model"),
    ("WHISPER_TIMEOUT", "whisper.timeout_secs"),
    ("AUDIO_MAX_DURATION", "whisper.max_duration_secs"),
    ("AUDIO_MAX_SIZE_MB", "whisper.max_size_mb"),
    ("PRICE_TEXT_INPUT_PER_MTOK_USD", "pricing.text_input_per_mtok_usd"),
    ("PRICE_TEXT_OUTPUT_PER_MTOK_USD", "pricing.text_output_per_mtok_usd"),
    ("PRICE_TEXT_CACHED_PER_MTOK_USD", "pricing.text_cached_per_mtok_usd"),
    ("WHISPER_COST_PER_MINUTE_USD", "pricing.whisper_cost_per_minute_usd"),
    ("USD_TO_BRL_RATE", "pricing.usd_to_brl_rate"),
    ("ESTIMATED_CHARS_PER_TOKEN", "pricing.estimated_chars_per_token"),
    ("PUSHINRECARGA", "payments.topup_token"),
    ("ENABLE_SALE_NOTIFICATIONS", "notifications.enable_sale_notifications"),
];

/// Load configuration from the standard hierarchy with env overrides.
pub fn load_config() -> Result<FleetConfig, figment::Error> {
    base_figment().extract()
}

/// Load configuration from inline TOML (tests, diagnostics).
pub fn load_config_from_str(toml_content: &str) -> Result<FleetConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(FleetConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Load configuration from an explicit file path with env overrides.
pub fn load_config_from_path(path: &Path) -> Result<FleetConfig, figment::Error> {
    let mut figment = Figment::new()
        .merge(Serialized::defaults(FleetConfig::default()))
        .merge(Toml::file(path));
    figment = merge_env_aliases(figment);
    figment.merge(prefixed_env_provider()).extract()
}

fn base_figment() -> Figment {
    let mut figment = Figment::new()
        .merge(Serialized::defaults(FleetConfig::default()))
        .merge(Toml::file("/etc/botfleet/botfleet.toml"))
        .merge(Toml::file(
            dirs::config_dir()
                .map(|d| d.join("botfleet/botfleet.toml"))
                .unwrap_or_default(),
        ))
        .merge(Toml::file("botfleet.toml"));
    figment = merge_env_aliases(figment);
    figment.merge(prefixed_env_provider())
}

fn merge_env_aliases(mut figment: Figment) -> Figment {
    for (var, key) in ENV_ALIASES {
        figment = figment.merge(Env::raw().only(&[*var]).map(move |_| (*key).into()));
    }
    figment
}

/// `BOTFLEET_*` provider using explicit section mapping.
///
/// Uses `Env::map()` instead of `Env::split("_")` so key names that
/// themselves contain underscores map correctly: `BOTFLEET_MANAGER_BOT_TOKEN`
/// must become `manager.bot_token`, not `manager.bot.token`.
fn prefixed_env_provider() -> Env {
    Env::prefixed("BOTFLEET_").map(|key| {
        let key_str = key.as_str();
        let mapped = key_str
            .replacen("app_", "app.", 1)
            .replacen("manager_", "manager.", 1)
            .replacen("storage_", "storage.", 1)
            .replacen("redis_", "redis.", 1)
            .replacen("security_", "security.", 1)
            .replacen("ingress_", "ingress.", 1)
            .replacen("queue_", "queue.", 1)
            .replacen("circuit_breaker_", "circuit_breaker.", 1)
            .replacen("llm_", "llm.", 1)
            .replacen("whisper_", "whisper.", 1)
            .replacen("pricing_", "pricing.", 1)
            .replacen("payments_", "payments.", 1)
            .replacen("notifications_", "notifications.", 1)
            .replacen("sender_", "sender.", 1)
            .replacen("recovery_", "recovery.", 1);
        mapped.into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_extract_cleanly() {
        let config = load_config_from_str("").unwrap();
        assert_eq!(config.app.env, "dev");
        assert_eq!(config.storage.database_path, "botfleet.db");
        assert_eq!(config.queue.concurrency["default"], 10);
        assert!(config.notifications.enable_sale_notifications);
    }

    #[test]
    fn toml_overrides_defaults() {
        let config = load_config_from_str(
            r#"
            [app]
            env = "prod"
            log_level = "warn"

            [manager]
            bot_token = "111:abc"
            webhook_secret = "s3cr3t"

            [payments]
            upsell_on_any_paid = true
            "#,
        )
        .unwrap();
        assert!(config.app.is_prod());
        assert_eq!(config.app.log_level, "warn");
        assert_eq!(config.manager.webhook_secret, "s3cr3t");
        assert!(config.payments.upsell_on_any_paid);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let result = load_config_from_str(
            r#"
            [app]
            environment = "prod"
            "#,
        );
        assert!(result.is_err(), "typo'd key must fail extraction");
    }

    #[test]
    fn env_aliases_cover_the_historical_names() {
        // The alias table is the contract with the deployment scripts;
        // keep the historically exported names present.
        for name in [
            "MANAGER_BOT_TOKEN",
            "TELEGRAM_WEBHOOK_SECRET",
            "WEBHOOK_BASE_URL",
            "ENCRYPTION_KEY",
            "ALLOWED_ADMIN_IDS",
            "RATE_LIMITS_JSON",
            "PUSHINRECARGA",
            "ENABLE_SALE_NOTIFICATIONS",
        ] {
            assert!(
                ENV_ALIASES.iter().any(|(var, _)| *var == name),
                "missing alias for {name}"
            );
        }
    }
}
