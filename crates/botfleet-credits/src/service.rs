// SPDX-FileCopyrightText: 2026 Botfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Wallet admission control and debits.

use botfleet_core::{FleetError, TokenUsage};
use botfleet_storage::queries::credits;
use botfleet_storage::Database;
use tracing::{debug, info};

use crate::estimate::Estimator;

/// Credit operations for one deployment.
pub struct CreditService {
    db: Database,
    estimator: Estimator,
    /// Admins whose balance is never checked nor debited.
    unlimited_admins: Vec<i64>,
}

impl CreditService {
    pub fn new(db: Database, estimator: Estimator, unlimited_admins: Vec<i64>) -> Self {
        Self {
            db,
            estimator,
            unlimited_admins,
        }
    }

    pub fn estimator(&self) -> &Estimator {
        &self.estimator
    }

    pub fn is_unlimited(&self, admin_id: i64) -> bool {
        self.unlimited_admins.contains(&admin_id)
    }

    /// Pre-check before an LLM call.
    ///
    /// `Err(InsufficientCredits)` tells the conversation engine to drop
    /// the message silently; unlimited admins always pass.
    pub async fn precheck_text(
        &self,
        admin_id: i64,
        prompt_tokens: u32,
        completion_estimate: u32,
    ) -> Result<(), FleetError> {
        if self.is_unlimited(admin_id) {
            return Ok(());
        }
        let estimate_cents = self
            .estimator
            .precheck_estimate_cents(prompt_tokens, completion_estimate);
        let balance_cents = credits::balance(&self.db, admin_id).await?;
        if balance_cents < estimate_cents {
            debug!(
                admin_id,
                balance_cents, estimate_cents, "credit pre-check failed"
            );
            return Err(FleetError::InsufficientCredits {
                balance_cents,
                estimate_cents,
            });
        }
        Ok(())
    }

    /// Audio pre-check (duration known before transcription).
    pub async fn precheck_audio(&self, admin_id: i64, seconds: f64) -> Result<(), FleetError> {
        if self.is_unlimited(admin_id) {
            return Ok(());
        }
        let estimate_cents = self.estimator.audio_cost_cents(seconds);
        let balance_cents = credits::balance(&self.db, admin_id).await?;
        if balance_cents < estimate_cents {
            return Err(FleetError::InsufficientCredits {
                balance_cents,
                estimate_cents,
            });
        }
        Ok(())
    }

    /// Post-hoc debit with real token counts. Always applied for
    /// non-unlimited admins.
    pub async fn debit_text(
        &self,
        admin_id: i64,
        usage: &TokenUsage,
        ref_id: Option<String>,
    ) -> Result<i64, FleetError> {
        if self.is_unlimited(admin_id) {
            return Ok(0);
        }
        let cost_cents = self.estimator.text_cost_cents(usage);
        credits::debit(&self.db, admin_id, cost_cents, "text", ref_id).await?;
        debug!(admin_id, cost_cents, "text usage debited");
        Ok(cost_cents)
    }

    /// Debit for a transcription, by audio length.
    pub async fn debit_audio(
        &self,
        admin_id: i64,
        seconds: f64,
        ref_id: Option<String>,
    ) -> Result<i64, FleetError> {
        if self.is_unlimited(admin_id) {
            return Ok(0);
        }
        let cost_cents = self.estimator.audio_cost_cents(seconds);
        credits::debit(&self.db, admin_id, cost_cents, "whisper", ref_id).await?;
        debug!(admin_id, cost_cents, "audio usage debited");
        Ok(cost_cents)
    }

    /// Credits a confirmed top-up payment.
    pub async fn apply_topup(
        &self,
        admin_id: i64,
        amount_cents: i64,
        transaction_ref: String,
    ) -> Result<(), FleetError> {
        credits::credit(&self.db, admin_id, amount_cents, "topup", Some(transaction_ref)).await?;
        info!(admin_id, amount_cents, "top-up credited");
        Ok(())
    }

    /// Refund path used when a paid flow fails past the debit.
    pub async fn refund(
        &self,
        admin_id: i64,
        amount_cents: i64,
        ref_id: String,
    ) -> Result<(), FleetError> {
        credits::credit(&self.db, admin_id, amount_cents, "refund", Some(ref_id)).await
    }

    pub async fn balance(&self, admin_id: i64) -> Result<i64, FleetError> {
        credits::balance(&self.db, admin_id).await
    }

    /// Self-healing check: the wallet must equal the ledger sum.
    pub async fn verify_wallet(&self, admin_id: i64) -> Result<bool, FleetError> {
        let (stored, summed) = credits::recompute(&self.db, admin_id).await?;
        if stored != summed {
            tracing::warn!(admin_id, stored, summed, "wallet out of sync with ledger");
        }
        Ok(stored == summed)
    }
}
