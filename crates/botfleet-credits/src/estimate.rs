// SPDX-FileCopyrightText: 2026 Botfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Token estimation and BRL-cents cost math.

use botfleet_config::model::PricingConfig;
use botfleet_core::TokenUsage;

/// Conservative pad applied to pre-check estimates.
const PRECHECK_PAD: f64 = 0.25;

/// Rough prompt-token estimate from character count.
///
/// Rule of thumb: ~4 characters per token for PT-BR, configurable via
/// `pricing.estimated_chars_per_token`. A provider tokenizer endpoint,
/// when available, replaces this at the call site.
pub fn estimate_prompt_tokens(char_count: usize, chars_per_token: f64) -> u32 {
    let cpt = chars_per_token.max(1.0);
    (char_count as f64 / cpt).round() as u32
}

/// Completion-token estimate from the moving average, clamped to
/// [64, max_tokens]; falls back to min(300, max_tokens) with no history.
pub fn estimate_completion_tokens(history_avg: Option<u32>, max_tokens: u32) -> u32 {
    match history_avg {
        Some(avg) if avg > 0 => avg.clamp(64, max_tokens),
        _ => 300.min(max_tokens),
    }
}

/// Pricing-aware converter between usage and BRL cents.
#[derive(Debug, Clone)]
pub struct Estimator {
    pricing: PricingConfig,
}

impl Estimator {
    pub fn new(pricing: PricingConfig) -> Self {
        Self { pricing }
    }

    pub fn chars_per_token(&self) -> f64 {
        self.pricing.estimated_chars_per_token
    }

    /// USD -> BRL cents at the configured fixed rate, rounded to the
    /// nearest centavo.
    pub fn usd_to_brl_cents(&self, usd: f64) -> i64 {
        (usd * self.pricing.usd_to_brl_rate * 100.0).round() as i64
    }

    /// True cost of a completed text call.
    pub fn text_cost_cents(&self, usage: &TokenUsage) -> i64 {
        let input_usd =
            (usage.prompt_tokens as f64 / 1_000_000.0) * self.pricing.text_input_per_mtok_usd;
        let output_usd =
            (usage.completion_tokens as f64 / 1_000_000.0) * self.pricing.text_output_per_mtok_usd;
        let cached_usd =
            (usage.cached_tokens as f64 / 1_000_000.0) * self.pricing.text_cached_per_mtok_usd;
        self.usd_to_brl_cents(input_usd + output_usd + cached_usd)
    }

    /// Audio cost: whole minutes, rounded up.
    pub fn audio_cost_cents(&self, seconds: f64) -> i64 {
        let minutes = (seconds.max(0.0) / 60.0).ceil();
        self.usd_to_brl_cents(minutes * self.pricing.whisper_cost_per_minute_usd)
    }

    /// Padded pre-check estimate for a text call about to happen.
    ///
    /// Estimated tokens are priced as uncached input plus output, then
    /// padded 25 %; the result is >= the true cost in the overwhelming
    /// majority of calls. Floored at one centavo so an empty wallet
    /// never admits a call, however short.
    pub fn precheck_estimate_cents(&self, prompt_tokens: u32, completion_tokens: u32) -> i64 {
        let usage = TokenUsage {
            prompt_tokens,
            completion_tokens,
            cached_tokens: 0,
        };
        let base = self.text_cost_cents(&usage);
        (((base as f64) * (1.0 + PRECHECK_PAD)).ceil() as i64).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn estimator() -> Estimator {
        Estimator::new(PricingConfig {
            text_input_per_mtok_usd: 0.20,
            text_output_per_mtok_usd: 0.50,
            text_cached_per_mtok_usd: 0.05,
            whisper_cost_per_minute_usd: 0.006,
            usd_to_brl_rate: 5.0,
            estimated_chars_per_token: 4.0,
        })
    }

    #[test]
    fn prompt_tokens_from_chars() {
        assert_eq!(estimate_prompt_tokens(400, 4.0), 100);
        assert_eq!(estimate_prompt_tokens(0, 4.0), 0);
        // A broken configuration (cpt < 1) is clamped, not divided by.
        assert_eq!(estimate_prompt_tokens(100, 0.0), 100);
    }

    #[test]
    fn completion_estimate_clamps_history_average() {
        assert_eq!(estimate_completion_tokens(None, 2000), 300);
        assert_eq!(estimate_completion_tokens(None, 200), 200);
        assert_eq!(estimate_completion_tokens(Some(10), 2000), 64);
        assert_eq!(estimate_completion_tokens(Some(500), 2000), 500);
        assert_eq!(estimate_completion_tokens(Some(5000), 2000), 2000);
        assert_eq!(estimate_completion_tokens(Some(0), 2000), 300);
    }

    #[test]
    fn usd_conversion_rounds_to_centavo() {
        let e = estimator();
        assert_eq!(e.usd_to_brl_cents(1.0), 500);
        assert_eq!(e.usd_to_brl_cents(0.001), 1, "0.005 BRL rounds to 1 centavo");
        assert_eq!(e.usd_to_brl_cents(0.0), 0);
    }

    #[test]
    fn text_cost_includes_cached_tier() {
        let e = estimator();
        let usage = TokenUsage {
            prompt_tokens: 1_000_000,
            completion_tokens: 1_000_000,
            cached_tokens: 1_000_000,
        };
        // (0.20 + 0.50 + 0.05) USD * 5.0 = 3.75 BRL = 375 cents.
        assert_eq!(e.text_cost_cents(&usage), 375);
    }

    #[test]
    fn audio_cost_rounds_minutes_up() {
        let e = estimator();
        // 61s -> 2 minutes -> 0.012 USD -> 6 cents.
        assert_eq!(e.audio_cost_cents(61.0), 6);
        // 60s -> 1 minute -> 3 cents.
        assert_eq!(e.audio_cost_cents(60.0), 3);
        assert_eq!(e.audio_cost_cents(-5.0), 0);
    }

    #[test]
    fn precheck_estimate_covers_true_cost() {
        let e = estimator();
        // The padded estimate for N tokens must cover the true cost of
        // the same N tokens, even if all input turns out uncached.
        let usage = TokenUsage {
            prompt_tokens: 50_000,
            completion_tokens: 400,
            cached_tokens: 0,
        };
        let estimate = e.precheck_estimate_cents(50_000, 400);
        assert!(estimate >= e.text_cost_cents(&usage));
    }

    #[test]
    fn precheck_estimate_never_rounds_to_zero() {
        let e = estimator();
        assert_eq!(e.precheck_estimate_cents(0, 0), 1);
        assert!(e.precheck_estimate_cents(10, 50) >= 1);
    }
}
