// SPDX-FileCopyrightText: 2026 Botfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The per-message conversation pipeline.
//!
//! Stages run in a fixed order: attribution, activity ping, debug
//! short-circuit, credit pre-check, session load, LLM call, post-debit,
//! and the trigger post-scan that turns LLM output into block
//! sequences. End users never see raw errors: failures either retry
//! through the task runtime or drop silently with a structured log.

use std::sync::Arc;

use botfleet_config::model::LlmConfig;
use botfleet_core::update::MessageEnvelope;
use botfleet_core::{
    CircuitBreaker, ContainerKind, ContainerRef, FleetError, UpdateEnvelope,
};
use botfleet_credits::{estimate_completion_tokens, estimate_prompt_tokens, CreditService};
use botfleet_crypto::{CallbackSigner, TokenCipher};
use botfleet_kv::{ActivityTracker, RateLimiter};
use botfleet_llm::{ChatClient, ChatOutcome, WhisperClient};
use botfleet_payments::PaymentsService;
use botfleet_queue::{EnqueueOptions, QueueName, TaskQueue};
use botfleet_recovery::RecoveryService;
use botfleet_sender::{BlockSender, SendContext};
use botfleet_storage::queries::{
    actions, blocks, offers, phases, sessions, transactions, upsells,
};
use botfleet_storage::{Bot, Database, HistoryEntry, Offer, PixCategory};
use botfleet_telegram::BotApi;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn, Instrument};

use crate::detection::{contains_term, first_match, should_replace_message};
use crate::discount::detect_discount;
use crate::prompt::{build_messages, system_prompt, ActionStatusLine};
use crate::start::{StartDecision, StartFlow};
use crate::tracking::{StartAttribution, TrackingService};

/// Task name of the audio transcription stage.
pub const PROCESS_AUDIO_TASK: &str = "process_audio";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessAudioPayload {
    pub bot_id: i64,
    pub user_telegram_id: i64,
    pub chat_id: i64,
    pub voice_file_id: String,
    pub duration_secs: u32,
    pub file_size: Option<u64>,
}

/// One item of the outbound plan built by the post-scan.
enum SendItem {
    Text(String),
    Blocks {
        container: ContainerRef,
        pix_code: Option<String>,
    },
}

/// Constructor dependencies of [`ConversationEngine`].
pub struct EngineDeps {
    pub db: Database,
    pub activity: Arc<ActivityTracker>,
    pub limiter: RateLimiter,
    pub credits: Arc<CreditService>,
    pub chat: ChatClient,
    pub llm_breaker: Arc<CircuitBreaker>,
    pub whisper: WhisperClient,
    pub whisper_breaker: Arc<CircuitBreaker>,
    pub sender: Arc<BlockSender>,
    pub tasks: TaskQueue,
    pub recovery: Arc<RecoveryService>,
    pub payments: Arc<PaymentsService>,
    pub tracking: TrackingService,
    pub start_flow: StartFlow,
    pub cipher: TokenCipher,
    pub signer: CallbackSigner,
    pub manager_api: BotApi,
    pub llm_config: LlmConfig,
    pub antispam: Arc<dyn crate::antispam::AntiSpamHook>,
}

/// The conversation engine and its collaborators.
pub struct ConversationEngine {
    pub(crate) db: Database,
    pub(crate) activity: Arc<ActivityTracker>,
    pub(crate) limiter: RateLimiter,
    pub(crate) credits: Arc<CreditService>,
    pub(crate) chat: ChatClient,
    pub(crate) llm_breaker: Arc<CircuitBreaker>,
    pub(crate) whisper: WhisperClient,
    pub(crate) whisper_breaker: Arc<CircuitBreaker>,
    pub(crate) sender: Arc<BlockSender>,
    pub(crate) tasks: TaskQueue,
    pub(crate) recovery: Arc<RecoveryService>,
    pub(crate) payments: Arc<PaymentsService>,
    pub(crate) tracking: TrackingService,
    pub(crate) start_flow: StartFlow,
    pub(crate) cipher: TokenCipher,
    pub(crate) signer: CallbackSigner,
    pub(crate) manager_api: BotApi,
    pub(crate) llm_config: LlmConfig,
    pub(crate) antispam: Arc<dyn crate::antispam::AntiSpamHook>,
}

impl ConversationEngine {
    pub fn new(deps: EngineDeps) -> Self {
        Self {
            db: deps.db,
            activity: deps.activity,
            limiter: deps.limiter,
            credits: deps.credits,
            chat: deps.chat,
            llm_breaker: deps.llm_breaker,
            whisper: deps.whisper,
            whisper_breaker: deps.whisper_breaker,
            sender: deps.sender,
            tasks: deps.tasks,
            recovery: deps.recovery,
            payments: deps.payments,
            tracking: deps.tracking,
            start_flow: deps.start_flow,
            cipher: deps.cipher,
            signer: deps.signer,
            manager_api: deps.manager_api,
            llm_config: deps.llm_config,
            antispam: deps.antispam,
        }
    }

    /// Tracker attribution service (manager flows, tests).
    pub fn tracking_service(&self) -> &TrackingService {
        &self.tracking
    }

    pub(crate) fn bot_api(&self, bot: &Bot) -> Result<BotApi, FleetError> {
        let token = self.cipher.open_token(&bot.token_cipher, &bot.token_nonce)?;
        BotApi::new(&token)
    }

    /// Entry point of the `process_update` task.
    pub async fn process_update(
        &self,
        bot_id: i64,
        update: UpdateEnvelope,
    ) -> Result<(), FleetError> {
        let Some(bot) = botfleet_storage::queries::bots::get_active(&self.db, bot_id).await?
        else {
            debug!(bot_id, "update for inactive or unknown bot dropped");
            return Ok(());
        };
        let Some(message) = update.message else {
            // Non-message updates carry nothing the secondary bots act on.
            return Ok(());
        };
        let Some(user_id) = message.from.as_ref().and_then(|f| f.id) else {
            return Ok(());
        };
        let chat_id = message
            .chat
            .as_ref()
            .and_then(|c| c.id)
            .unwrap_or(user_id);

        // Rate-limit gate: over-limit messages drop silently for end
        // users; the log line carries the retry window.
        match self.limiter.check(bot_id, user_id, "default").await {
            Ok(()) => {}
            Err(FleetError::RateLimited { retry_after_secs }) => {
                info!(bot_id, user_id, retry_after_secs, "rate limited, dropping message");
                return Ok(());
            }
            Err(other) => return Err(other),
        }

        // Anti-spam hook: the detector is an external collaborator; a
        // verdict here drops the message, enforcement (the ban itself)
        // belongs to the hook implementor.
        let text_for_check = message.text.as_deref().unwrap_or_default();
        if let Some(reason) = self
            .antispam
            .check(bot_id, user_id, text_for_check)
            .await?
        {
            warn!(bot_id, user_id, reason = reason.as_str(), "anti-spam verdict, message dropped");
            return Ok(());
        }

        botfleet_metrics::record_message("user");
        self.process_message(&bot, user_id, chat_id, &message)
            .instrument(tracing::info_span!("update", bot_id, user_id))
            .await
    }

    async fn process_message(
        &self,
        bot: &Bot,
        user_id: i64,
        chat_id: i64,
        message: &MessageEnvelope,
    ) -> Result<(), FleetError> {
        let text = message.text.clone().unwrap_or_default();

        // /start: attribution first, then the template flow.
        if let Some(args) = start_command_args(&text) {
            match self.tracking.handle_start(bot.id, user_id, args).await? {
                StartAttribution::Rejected => {
                    info!(bot_id = bot.id, user_id, "untracked /start dropped");
                    return Ok(());
                }
                StartAttribution::Attributed { .. } | StartAttribution::Untracked => {}
            }

            botfleet_storage::queries::users::get_or_create(&self.db, bot.id, user_id).await?;
            self.ping_activity(bot.id, user_id).await?;

            match self.start_flow.handle_start(bot.id, user_id, chat_id).await? {
                StartDecision::Scheduled => return Ok(()),
                // Already delivered (or no template): the normal flow
                // continues with the /start text.
                StartDecision::Skipped | StartDecision::NoTemplate => {
                    return self.converse(bot, user_id, chat_id, &text).await;
                }
            }
        }

        botfleet_storage::queries::users::get_or_create(&self.db, bot.id, user_id).await?;
        self.ping_activity(bot.id, user_id).await?;

        // Voice notes detour through the audio queue.
        if let Some(voice) = &message.voice {
            let payload = ProcessAudioPayload {
                bot_id: bot.id,
                user_telegram_id: user_id,
                chat_id,
                voice_file_id: voice.file_id.clone(),
                duration_secs: voice.duration,
                file_size: voice.file_size,
            };
            self.tasks
                .enqueue(
                    QueueName::Audio,
                    PROCESS_AUDIO_TASK,
                    serde_json::to_value(&payload)
                        .map_err(|e| FleetError::Internal(e.to_string()))?,
                    EnqueueOptions::default(),
                )
                .await?;
            return Ok(());
        }

        if text.is_empty() {
            return Ok(());
        }

        // Debug commands short-circuit the AI path.
        if text.starts_with('/') {
            if crate::debug::handle_debug_command(self, bot, user_id, chat_id, &text).await? {
                return Ok(());
            }
        }

        self.converse(bot, user_id, chat_id, &text).await
    }

    /// Stamps activity and arms the inactivity watchdog.
    async fn ping_activity(&self, bot_id: i64, user_id: i64) -> Result<(), FleetError> {
        let version = self
            .activity
            .bump_activity(bot_id, user_id, chrono::Utc::now().timestamp())
            .await?;
        self.recovery
            .schedule_inactivity_check(bot_id, user_id, version)
            .await?;
        Ok(())
    }

    /// The LLM leg: pre-check, call, post-debit, post-scan, send.
    pub async fn converse(
        &self,
        bot: &Bot,
        user_id: i64,
        chat_id: i64,
        text: &str,
    ) -> Result<(), FleetError> {
        let ai_config = phases::ai_config(&self.db, bot.id).await?;
        if !ai_config.is_enabled {
            debug!(bot_id = bot.id, "AI disabled for bot, message ignored");
            return Ok(());
        }

        let session = sessions::get_or_create(&self.db, bot.id, user_id).await?;
        let history_limit = self.llm_config.history_pairs * 2;
        let history = sessions::recent_history(&self.db, bot.id, user_id, history_limit).await?;
        let all_phases = phases::list_by_bot(&self.db, bot.id).await?;
        let current_phase = match session.current_phase_id {
            Some(id) => all_phases.iter().find(|p| p.id == id),
            None => None,
        };

        // Action-status lines for tracked actions.
        let bot_actions = actions::list_active(&self.db, bot.id).await?;
        let mut status_lines = Vec::new();
        for action in bot_actions.iter().filter(|a| a.track_usage) {
            let status = actions::user_status(&self.db, bot.id, user_id, action.id).await?;
            status_lines.push((action.clone(), status));
        }
        let status_refs: Vec<ActionStatusLine<'_>> = status_lines
            .iter()
            .map(|(action, status)| ActionStatusLine { action, status })
            .collect();

        // Phase prompt of an armed preset upsell rides along.
        let bot_upsells = upsells::list_active(&self.db, bot.id).await?;
        let mut armed_upsell_prompt = None;
        for upsell in bot_upsells.iter().filter(|u| u.trigger_term.is_some()) {
            if let Some(delivery) =
                upsells::armed_delivery(&self.db, bot.id, user_id, upsell.id).await?
            {
                if delivery.scheduled_for.is_none() {
                    armed_upsell_prompt = upsell.phase_prompt.as_deref();
                    break;
                }
            }
        }

        let system = system_prompt(&ai_config, current_phase, &status_refs, armed_upsell_prompt);
        let messages = build_messages(system.clone(), &history, text);

        // Credit pre-check: silent drop on shortfall.
        let prompt_chars: usize = system.chars().count()
            + history.iter().map(|h| h.content.chars().count()).sum::<usize>()
            + text.chars().count();
        let prompt_estimate = estimate_prompt_tokens(
            prompt_chars,
            self.credits.estimator().chars_per_token(),
        );
        let completion_avg =
            sessions::avg_completion_tokens(&self.db, bot.id, user_id, 10).await?;
        let completion_estimate =
            estimate_completion_tokens(completion_avg, ai_config.max_tokens);
        match self
            .credits
            .precheck_text(bot.admin_id, prompt_estimate, completion_estimate)
            .await
        {
            Ok(()) => {}
            Err(FleetError::InsufficientCredits {
                balance_cents,
                estimate_cents,
            }) => {
                warn!(
                    bot_id = bot.id,
                    admin_id = bot.admin_id,
                    balance_cents,
                    estimate_cents,
                    "message dropped: insufficient credits"
                );
                return Ok(());
            }
            Err(other) => return Err(other),
        }

        // LLM call behind the breaker.
        let outcome = self.call_llm(&messages, &ai_config).await?;

        // Post-debit with the real usage.
        let debited = self
            .credits
            .debit_text(bot.admin_id, &outcome.usage, Some(format!("bot:{}", bot.id)))
            .await?;
        botfleet_metrics::record_credit_debit("text", debited);

        // Phase transition before anything else reads the phase.
        if let Some(phase) =
            first_match(&outcome.text, &all_phases, |p| p.trigger_term.as_deref())
        {
            sessions::set_phase(&self.db, bot.id, user_id, Some(phase.id)).await?;
            info!(bot_id = bot.id, user_id, phase = phase.name.as_str(), "phase transition");
        }

        // Persist the turn pair under CAS.
        sessions::append_turns(
            &self.db,
            bot.id,
            user_id,
            session.history_version,
            vec![
                HistoryEntry {
                    role: "user".into(),
                    content: text.to_string(),
                    prompt_tokens: 0,
                    cached_tokens: 0,
                    completion_tokens: 0,
                },
                HistoryEntry {
                    role: "assistant".into(),
                    content: outcome.text.clone(),
                    prompt_tokens: outcome.usage.prompt_tokens,
                    cached_tokens: outcome.usage.cached_tokens,
                    completion_tokens: outcome.usage.completion_tokens,
                },
            ],
            history_limit,
        )
        .await?;

        // Post-scan and delivery.
        let plan = self.post_scan(bot, user_id, chat_id, &outcome.text).await?;
        self.deliver_plan(bot, user_id, chat_id, plan).await
    }

    async fn call_llm(
        &self,
        messages: &[botfleet_llm::ChatMessage],
        ai_config: &botfleet_storage::AiConfig,
    ) -> Result<ChatOutcome, FleetError> {
        self.llm_breaker.acquire()?;
        match self
            .chat
            .complete(messages, ai_config.temperature, ai_config.max_tokens)
            .await
        {
            Ok(outcome) => {
                self.llm_breaker.record_success();
                Ok(outcome)
            }
            Err(e) => {
                if matches!(
                    e,
                    FleetError::TransientExternal { .. } | FleetError::Timeout { .. }
                ) {
                    self.llm_breaker.record_failure();
                    botfleet_metrics::record_external_error("llm");
                }
                Err(e)
            }
        }
    }

    /// Orders the post-scan: discount, offer, action, upsell trigger,
    /// manual verification. The first replacement-grade match decides
    /// whether the LLM text survives; later matches append.
    async fn post_scan(
        &self,
        bot: &Bot,
        user_id: i64,
        chat_id: i64,
        answer: &str,
    ) -> Result<Vec<SendItem>, FleetError> {
        let mut reply_text = Some(answer.to_string());
        let mut items: Vec<SendItem> = Vec::new();

        let bot_offers = offers::list_active(&self.db, bot.id).await?;
        let tracker_id = self.tracking.attribution_of(bot.id, user_id).await?;

        // Discount negotiation: the trigger encodes the amount inline.
        for offer in bot_offers.iter() {
            let Some(trigger) = offer.discount_trigger.as_deref() else {
                continue;
            };
            if let Some(hit) = detect_discount(answer, trigger) {
                let tx = self
                    .payments
                    .create_charge(
                        bot.admin_id,
                        bot.id,
                        user_id,
                        chat_id,
                        Some(offer.id),
                        None,
                        tracker_id,
                        PixCategory::Offer,
                        hit.amount_cents,
                    )
                    .await?;
                info!(
                    bot_id = bot.id,
                    user_id,
                    offer_id = offer.id,
                    amount_cents = hit.amount_cents,
                    "negotiated discount charge created"
                );
                // The trigger fragment is an internal codeword; the raw
                // reply never reaches the user.
                reply_text = None;
                items.push(SendItem::Blocks {
                    container: ContainerRef::new(ContainerKind::OfferDiscount, offer.id),
                    pix_code: Some(tx.qr_code),
                });
                break;
            }
        }

        // Offer detection (skipped if a discount already replaced it).
        if items.is_empty() {
            if let Some(offer) = first_match(answer, &bot_offers, |o| Some(o.name.as_str())) {
                let tx = self
                    .payments
                    .create_charge(
                        bot.admin_id,
                        bot.id,
                        user_id,
                        chat_id,
                        Some(offer.id),
                        None,
                        tracker_id,
                        PixCategory::Offer,
                        offer.price_cents,
                    )
                    .await?;
                if should_replace_message(answer, &offer.name) {
                    reply_text = None;
                }
                items.push(SendItem::Blocks {
                    container: ContainerRef::new(ContainerKind::OfferPitch, offer.id),
                    pix_code: Some(tx.qr_code),
                });
                info!(bot_id = bot.id, user_id, offer_id = offer.id, "offer pitch triggered");
            }
        }

        // Action detection.
        let bot_actions = actions::list_active(&self.db, bot.id).await?;
        if let Some(action) = first_match(answer, &bot_actions, |a| Some(a.name.as_str())) {
            if action.track_usage {
                actions::mark_activated(&self.db, bot.id, user_id, action.id).await?;
            }
            if should_replace_message(answer, &action.name) {
                reply_text = None;
            }
            items.push(SendItem::Blocks {
                container: ContainerRef::new(ContainerKind::Action, action.id),
                pix_code: None,
            });
            info!(bot_id = bot.id, user_id, action_id = action.id, "action triggered");
        }

        // Upsell trigger against armed deliveries.
        let bot_upsells = upsells::list_active(&self.db, bot.id).await?;
        for upsell in bot_upsells.iter() {
            let Some(trigger) = upsell.trigger_term.as_deref() else {
                continue;
            };
            if !contains_term(answer, trigger) {
                continue;
            }
            let Some(delivery) =
                upsells::armed_delivery(&self.db, bot.id, user_id, upsell.id).await?
            else {
                continue;
            };
            if delivery.scheduled_for.is_some() {
                continue;
            }
            if !upsells::mark_sent(&self.db, delivery.id).await? {
                continue;
            }
            let tx = self
                .payments
                .create_charge(
                    bot.admin_id,
                    bot.id,
                    user_id,
                    chat_id,
                    None,
                    Some(upsell.id),
                    tracker_id,
                    PixCategory::Upsell,
                    upsell.price_cents,
                )
                .await?;
            if should_replace_message(answer, trigger) {
                reply_text = None;
            }
            items.push(SendItem::Blocks {
                container: ContainerRef::new(ContainerKind::UpsellAnnouncement, upsell.id),
                pix_code: Some(tx.qr_code),
            });
            info!(bot_id = bot.id, user_id, upsell_id = upsell.id, "upsell announced");
            break;
        }

        // Manual verification trigger.
        for offer in bot_offers.iter() {
            let Some(trigger) = offer.manual_verification_trigger.as_deref() else {
                continue;
            };
            if !contains_term(answer, trigger) {
                continue;
            }
            match self.manual_verification(bot, user_id, offer).await? {
                ManualVerification::Delivered => {
                    // The fan-out already sent the deliverable.
                }
                ManualVerification::NotPaid => {
                    items.push(SendItem::Blocks {
                        container: ContainerRef::new(
                            ContainerKind::OfferManualVerification,
                            offer.id,
                        ),
                        pix_code: None,
                    });
                }
                ManualVerification::NoPendingCharge => {}
            }
            break;
        }

        let mut plan = Vec::new();
        if let Some(text) = reply_text {
            plan.push(SendItem::Text(text));
        }
        plan.extend(items);
        Ok(plan)
    }

    async fn manual_verification(
        &self,
        bot: &Bot,
        user_id: i64,
        offer: &Offer,
    ) -> Result<ManualVerification, FleetError> {
        let pending =
            transactions::pending_by_user_offer(&self.db, bot.id, user_id, offer.id, 15).await?;
        let Some(tx) = pending.first() else {
            info!(
                bot_id = bot.id,
                user_id,
                offer_id = offer.id,
                "manual verification without a pending charge"
            );
            return Ok(ManualVerification::NoPendingCharge);
        };
        if self.payments.verify_now(tx.id).await? {
            Ok(ManualVerification::Delivered)
        } else {
            Ok(ManualVerification::NotPaid)
        }
    }

    async fn deliver_plan(
        &self,
        bot: &Bot,
        _user_id: i64,
        chat_id: i64,
        plan: Vec<SendItem>,
    ) -> Result<(), FleetError> {
        if plan.is_empty() {
            return Ok(());
        }
        let api = self.bot_api(bot)?;
        for item in plan {
            match item {
                SendItem::Text(text) => {
                    let ctx = SendContext {
                        api: &api,
                        origin_api: &self.manager_api,
                        bot_id: bot.id,
                        chat_id,
                        pix_code: None,
                        preview: false,
                    };
                    self.sender.send_reply(&ctx, &text).await?;
                }
                SendItem::Blocks { container, pix_code } => {
                    let container_blocks = blocks::list(&self.db, container).await?;
                    if container_blocks.is_empty() {
                        continue;
                    }
                    let ctx = SendContext {
                        api: &api,
                        origin_api: &self.manager_api,
                        bot_id: bot.id,
                        chat_id,
                        pix_code: pix_code.as_deref(),
                        preview: false,
                    };
                    self.sender.send_blocks(&ctx, &container_blocks).await?;
                }
            }
        }
        Ok(())
    }

    /// Audio task body: caps, transcription, debit, then the normal
    /// text pipeline over the transcription.
    pub async fn process_audio(&self, payload: ProcessAudioPayload) -> Result<(), FleetError> {
        let Some(bot) =
            botfleet_storage::queries::bots::get_active(&self.db, payload.bot_id).await?
        else {
            return Ok(());
        };

        let size = payload.file_size.unwrap_or(0) as usize;
        if let Err(e) = self.whisper.check_limits(payload.duration_secs, size) {
            info!(bot_id = bot.id, error = %e, "voice note rejected by caps");
            return Ok(());
        }
        if let Err(FleetError::InsufficientCredits { .. }) = self
            .credits
            .precheck_audio(bot.admin_id, payload.duration_secs as f64)
            .await
        {
            warn!(bot_id = bot.id, "audio dropped: insufficient credits");
            return Ok(());
        }

        let api = self.bot_api(&bot)?;
        let bytes = api.download_file(&payload.voice_file_id).await?;

        self.whisper_breaker.acquire()?;
        let transcription = match self.whisper.transcribe(bytes, "voice.ogg").await {
            Ok(text) => {
                self.whisper_breaker.record_success();
                text
            }
            Err(e) => {
                if matches!(
                    e,
                    FleetError::TransientExternal { .. } | FleetError::Timeout { .. }
                ) {
                    self.whisper_breaker.record_failure();
                    botfleet_metrics::record_external_error("whisper");
                }
                return Err(e);
            }
        };

        let debited = self
            .credits
            .debit_audio(
                bot.admin_id,
                payload.duration_secs as f64,
                Some(payload.voice_file_id.clone()),
            )
            .await?;
        botfleet_metrics::record_credit_debit("whisper", debited);

        if transcription.trim().is_empty() {
            return Ok(());
        }
        self.converse(&bot, payload.user_telegram_id, payload.chat_id, &transcription)
            .await
    }

    /// Periodic sweep over due scheduled upsell deliveries.
    pub async fn sweep_due_upsells(&self) -> Result<usize, FleetError> {
        let mut dispatched = 0;
        while let Some(delivery) =
            upsells::claim_due_delivery(&self.db, botfleet_storage::now_iso()).await?
        {
            if let Err(e) = self.dispatch_scheduled_upsell(&delivery).await {
                warn!(
                    delivery_id = delivery.id,
                    error = %e,
                    "scheduled upsell dispatch failed"
                );
                continue;
            }
            dispatched += 1;
        }
        Ok(dispatched)
    }

    async fn dispatch_scheduled_upsell(
        &self,
        delivery: &botfleet_storage::UpsellDelivery,
    ) -> Result<(), FleetError> {
        let Some(bot) =
            botfleet_storage::queries::bots::get_active(&self.db, delivery.bot_id).await?
        else {
            return Ok(());
        };
        let Some(upsell) = upsells::get(&self.db, delivery.upsell_id).await? else {
            return Ok(());
        };
        if !upsell.is_active {
            return Ok(());
        }

        let tracker_id = self
            .tracking
            .attribution_of(bot.id, delivery.user_telegram_id)
            .await?;
        let tx = self
            .payments
            .create_charge(
                bot.admin_id,
                bot.id,
                delivery.user_telegram_id,
                delivery.user_telegram_id,
                None,
                Some(upsell.id),
                tracker_id,
                PixCategory::Upsell,
                upsell.price_cents,
            )
            .await?;

        let container = ContainerRef::new(ContainerKind::UpsellAnnouncement, upsell.id);
        let announcement = blocks::list(&self.db, container).await?;
        if announcement.is_empty() {
            return Ok(());
        }
        let api = self.bot_api(&bot)?;
        let ctx = SendContext {
            api: &api,
            origin_api: &self.manager_api,
            bot_id: bot.id,
            chat_id: delivery.user_telegram_id,
            pix_code: Some(&tx.qr_code),
            preview: false,
        };
        self.sender.send_blocks(&ctx, &announcement).await?;
        info!(
            bot_id = bot.id,
            user_telegram_id = delivery.user_telegram_id,
            upsell_id = upsell.id,
            "scheduled upsell announced"
        );
        Ok(())
    }
}

enum ManualVerification {
    Delivered,
    NotPaid,
    NoPendingCharge,
}

/// Extracts the payload of a `/start [code]` command.
fn start_command_args(text: &str) -> Option<Option<&str>> {
    let rest = text.strip_prefix("/start")?;
    if rest.is_empty() {
        return Some(None);
    }
    let rest = rest.strip_prefix(' ')?;
    let code = rest.split_whitespace().next();
    Some(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_command_parsing() {
        assert_eq!(start_command_args("/start"), Some(None));
        assert_eq!(start_command_args("/start abc12345"), Some(Some("abc12345")));
        assert_eq!(
            start_command_args("/start abc12345 extra"),
            Some(Some("abc12345"))
        );
        assert_eq!(start_command_args("/started"), None);
        assert_eq!(start_command_args("oi"), None);
    }
}
