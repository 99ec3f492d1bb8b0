//! Swap lifecycle state machine
//!
//! Every operation takes the per-id lock, reads the persisted record, talks to
//! the escrow or payment collaborator, and writes the resulting transition
//! before returning. Both directions share commit, claim and refund; only the
//! payment reference differs.

use super::retry::{with_retry, RetryPolicy};
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::error::{
    ClientError, ClientResult, ExpiryRace, StoreError, SwapError, SwapResult, ValidationError,
};
use crate::escrow::{ClaimOutcome, EscrowClient, EscrowStatus, RefundOutcome};
use crate::locks::{KeyedGuard, KeyedLocks};
use crate::metrics;
use crate::payment::{PaymentProof, PaymentWatcher};
use crate::price::{PriceAggregator, PriceQuote};
use crate::store::{mutator, SwapStore};
use crate::swap::{derive_swap_id, SuccessAction, SwapKind, SwapRecord, SwapRequest, SwapState};

use chrono::Utc;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{watch, Notify, Semaphore};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Drives swap records through their lifecycle
pub struct SwapEngine {
    pub(super) config: EngineConfig,
    pub(super) store: Arc<dyn SwapStore>,
    escrow: Arc<dyn EscrowClient>,
    payments: Arc<dyn PaymentWatcher>,
    clock: Arc<dyn Clock>,
    aggregator: PriceAggregator,
    pub(super) retry: RetryPolicy,
    /// Serialises transitions on one swap
    locks: KeyedLocks,
    /// Swaps with a running driver task
    pub(super) drivers: DashMap<String, ()>,
    /// Wakes a driver when a payment is pushed
    pub(super) wakers: DashMap<String, Arc<Notify>>,
    /// Bounds how many driver steps run at once
    pub(super) permits: Semaphore,
    pub(super) shutdown: watch::Sender<bool>,
    /// Set once the recovery sweep has finished
    pub(super) ready: AtomicBool,
}

impl SwapEngine {
    /// Create an engine on the system clock
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn SwapStore>,
        escrow: Arc<dyn EscrowClient>,
        payments: Arc<dyn PaymentWatcher>,
    ) -> SwapResult<Self> {
        Self::with_clock(config, store, escrow, payments, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: EngineConfig,
        store: Arc<dyn SwapStore>,
        escrow: Arc<dyn EscrowClient>,
        payments: Arc<dyn PaymentWatcher>,
        clock: Arc<dyn Clock>,
    ) -> SwapResult<Self> {
        config.validate()?;

        let (shutdown, _) = watch::channel(false);
        Ok(Self {
            aggregator: PriceAggregator::from_config(&config),
            retry: RetryPolicy::from_config(&config),
            permits: Semaphore::new(config.max_concurrent_swaps),
            config,
            store,
            escrow,
            payments,
            clock,
            locks: KeyedLocks::new(),
            drivers: DashMap::new(),
            wakers: DashMap::new(),
            shutdown,
            ready: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn SwapStore> {
        &self.store
    }

    /// True once recovery has re-attached every in-flight swap
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub async fn get_swap(&self, id: &str) -> SwapResult<SwapRecord> {
        Ok(self.store.get(id).await?)
    }

    /// Validate an intermediary quote and persist a new swap in `Created`.
    ///
    /// Nothing is written when validation fails.
    pub async fn create_swap(
        &self,
        request: SwapRequest,
        quotes: &[PriceQuote],
    ) -> SwapResult<SwapRecord> {
        if !self.is_ready() {
            return Err(SwapError::NotReady);
        }

        let now = self.clock.now();
        let hash = request.payment_hash_bytes()?;
        request.validate_reference()?;
        request
            .validate_amounts(self.config.max_fee_ppm)
            .map_err(|e| rejected("fee", e))?;

        let consensus = self
            .aggregator
            .consensus_price(&request.pair, quotes, now)
            .map_err(|e| rejected("consensus", e))?;
        let deviation_ppm = self
            .aggregator
            .validate_intermediary_price(
                &request.pair,
                request.proposed_price,
                &consensus,
                self.config.price_tolerance_ppm,
            )
            .map_err(|e| rejected("tolerance", e))?;

        let default_expiry = now.saturating_add(self.config.swap_expiry_secs);
        let expiry = request
            .expiry_timestamp
            .map_or(default_expiry, |t| t.min(default_expiry));
        if expiry <= now {
            return Err(ValidationError::ExpiryInPast { expiry, now }.into());
        }

        let id = derive_swap_id(&hash, Uuid::new_v4().as_bytes());
        let kind = match request.kind {
            SwapKind::ToLightning {
                invoice,
                success_action,
            } => SwapKind::ToLightning {
                invoice,
                success_action: SuccessAction::sanitize(success_action, &id),
            },
            SwapKind::FromLightning => SwapKind::FromLightning,
        };

        let created_at = Utc::now();
        let record = SwapRecord {
            id,
            kind,
            state: SwapState::Created,
            input_amount: request.input_amount,
            output_amount: request.output_amount,
            fee: request.fee,
            price: request.proposed_price,
            expiry_timestamp: expiry,
            payment_hash: request.payment_hash,
            escrow_reference: None,
            payment_proof: None,
            last_error: None,
            created_at,
            updated_at: created_at,
        };

        self.store.create(&record).await?;
        metrics::record_swap_created(record.direction());
        info!(
            "Created {} swap {}: input {} output {} fee {} price {} ({} sources, {} ppm off consensus), expires at {}",
            record.direction(),
            record.id,
            record.input_amount,
            record.output_amount,
            record.fee,
            record.price,
            consensus.source_count,
            deviation_ppm,
            record.expiry_timestamp
        );

        Ok(record)
    }

    /// Register the swap with the escrow (`Created -> Committed`).
    ///
    /// An expired swap moves to `Expired` instead. Committing an already
    /// committed swap is a no-op.
    pub async fn commit(&self, id: &str) -> SwapResult<SwapRecord> {
        let _guard = self.lock(id).await;
        let record = self.store.get(id).await?;

        match record.state {
            SwapState::Created => {}
            SwapState::Committed => return Ok(record),
            state => return Err(wrong_state(id, "commit", state)),
        }

        if record.is_expired(self.clock.now()) {
            warn!("Swap {} expired before commitment", id);
            return self.advance(&record, SwapState::Expired, |_| {}).await;
        }

        let started = Instant::now();
        let result = with_retry("commit", id, &self.retry, || self.escrow.commit(&record)).await;
        observe("commit", started, &result);

        match result {
            Ok(reference) => {
                debug!("Swap {} committed with escrow reference {}", id, reference);
                self.advance(&record, SwapState::Committed, move |r| {
                    r.escrow_reference = Some(reference);
                    r.last_error = None;
                })
                .await
            }
            Err(ClientError::Permanent(message)) => {
                error!("Escrow rejected commitment for swap {}: {}", id, message);
                let note = message.clone();
                self.advance(&record, SwapState::Failed, move |r| {
                    r.last_error = Some(note);
                })
                .await?;
                Err(SwapError::EscrowProtocol {
                    swap_id: id.to_string(),
                    message,
                })
            }
            Err(ClientError::Transient(message)) => Err(transient("commit", message)),
        }
    }

    /// Ask the payment watcher for a proof (`Committed -> PaymentDetected`).
    ///
    /// Moves to `Expired` when the deadline passed without payment. Returns the
    /// record unchanged while still waiting.
    pub async fn poll_payment(&self, id: &str) -> SwapResult<SwapRecord> {
        let _guard = self.lock(id).await;
        let record = self.store.get(id).await?;

        if record.state != SwapState::Committed {
            return Err(wrong_state(id, "poll_payment", record.state));
        }

        let now = self.clock.now();
        if record.is_expired(now) {
            info!("Swap {} reached expiry {} without payment", id, record.expiry_timestamp);
            return self.advance(&record, SwapState::Expired, |_| {}).await;
        }

        let proof = with_retry("check_payment", id, &self.retry, || {
            self.payments.check_payment(&record)
        })
        .await
        .map_err(|e| transient("check_payment", e.to_string()))?;

        let Some(proof) = proof else {
            debug!("No payment yet for swap {} on {}", id, record.payment_reference());
            return Ok(record);
        };

        match self.accept_proof(&record, proof, now).await {
            Err(SwapError::Validation(e)) => {
                warn!("Swap {} ignoring payment proof: {}", id, e);
                Ok(record)
            }
            other => other,
        }
    }

    /// Accept a pushed payment proof, e.g. from a webhook.
    ///
    /// Proofs for swaps that already expired are rejected with
    /// `ExpiryRace::PaymentAfterExpiry` and never lead to a claim.
    pub async fn notify_payment(&self, id: &str, proof: PaymentProof) -> SwapResult<SwapRecord> {
        let guard = self.lock(id).await;
        let record = self.store.get(id).await?;

        let result = match record.state {
            SwapState::Committed => self.accept_proof(&record, proof, self.clock.now()).await,
            SwapState::PaymentDetected | SwapState::Claimed
                if record.payment_proof.as_ref() == Some(&proof) =>
            {
                debug!("Duplicate payment notification for swap {}", id);
                Ok(record)
            }
            SwapState::Expired | SwapState::Refunded => {
                Err(self.payment_after_expiry(&record).await)
            }
            state => Err(wrong_state(id, "notify_payment", state)),
        };

        drop(guard);
        if let Some(waker) = self.wakers.get(id) {
            waker.notify_one();
        }
        result
    }

    async fn accept_proof(
        &self,
        record: &SwapRecord,
        proof: PaymentProof,
        now: u64,
    ) -> SwapResult<SwapRecord> {
        if record.is_expired(now) {
            self.advance(record, SwapState::Expired, |_| {}).await?;
            return Err(self.payment_after_expiry(record).await);
        }

        if !proof.matches(&record.payment_hash) {
            return Err(ValidationError::ProofMismatch {
                payment_hash: record.payment_hash.clone(),
            }
            .into());
        }
        if proof.amount < record.output_amount {
            return Err(ValidationError::InsufficientPayment {
                required: record.output_amount,
                received: proof.amount,
            }
            .into());
        }

        info!("Payment of {} detected for swap {}", proof.amount, record.id);
        self.advance(record, SwapState::PaymentDetected, move |r| {
            r.payment_proof = Some(proof);
            r.last_error = None;
        })
        .await
    }

    async fn payment_after_expiry(&self, record: &SwapRecord) -> SwapError {
        let race = ExpiryRace::PaymentAfterExpiry;
        metrics::record_expiry_race(race.name());
        warn!(
            "Payment proof for swap {} arrived after expiry {}, not claiming",
            record.id, record.expiry_timestamp
        );
        if let Err(e) = self.note_error(&record.id, race.to_string()).await {
            warn!("Failed to record expiry race on swap {}: {}", record.id, e);
        }
        SwapError::ExpiryRace {
            swap_id: record.id.clone(),
            race,
        }
    }

    /// Release escrow funds with the payment proof (`PaymentDetected -> Claimed`).
    ///
    /// Never claims past expiry. Claiming a swap that is already `Claimed`
    /// returns `AlreadyClaimed` without calling the escrow again.
    pub async fn claim(&self, id: &str) -> SwapResult<ClaimOutcome> {
        let _guard = self.lock(id).await;
        let record = self.store.get(id).await?;

        match record.state {
            SwapState::PaymentDetected => {}
            SwapState::Claimed => {
                debug!("Swap {} already claimed", id);
                return Ok(ClaimOutcome::AlreadyClaimed);
            }
            state => return Err(wrong_state(id, "claim", state)),
        }

        let now = self.clock.now();
        if record.is_expired(now) {
            let race = ExpiryRace::ClaimAfterExpiry;
            metrics::record_expiry_race(race.name());
            error!(
                "Swap {} was paid but expiry {} passed (now {}), manual reconciliation required",
                id, record.expiry_timestamp, now
            );
            self.note_error(id, race.to_string()).await?;
            return Err(SwapError::ExpiryRace {
                swap_id: id.to_string(),
                race,
            });
        }

        let (Some(reference), Some(proof)) = (&record.escrow_reference, &record.payment_proof)
        else {
            return Err(StoreError::Corrupt(format!(
                "swap {} is in {} without escrow reference or proof",
                id, record.state
            ))
            .into());
        };

        let started = Instant::now();
        let result = with_retry("claim", id, &self.retry, || {
            self.escrow.claim(reference, proof)
        })
        .await;
        observe("claim", started, &result);

        match result {
            Ok(outcome) => {
                if outcome == ClaimOutcome::AlreadyClaimed {
                    info!("Escrow for swap {} was already claimed", id);
                }
                self.advance(&record, SwapState::Claimed, |r| r.last_error = None)
                    .await?;
                Ok(outcome)
            }
            Err(ClientError::Permanent(message)) => {
                error!("Escrow rejected claim for swap {}: {}", id, message);
                self.note_error(id, message.clone()).await?;
                Err(SwapError::EscrowProtocol {
                    swap_id: id.to_string(),
                    message,
                })
            }
            Err(ClientError::Transient(message)) => Err(transient("claim", message)),
        }
    }

    /// Return escrowed funds after expiry (`Expired -> Refunded`).
    ///
    /// A swap still in `Created` or `Committed` past its expiry is expired
    /// first. If the escrow already shows a claim, local state follows the
    /// escrow and `ExpiryRace::RefundAfterClaim` is returned.
    pub async fn refund(&self, id: &str) -> SwapResult<RefundOutcome> {
        let _guard = self.lock(id).await;
        let mut record = self.store.get(id).await?;

        match record.state {
            SwapState::Expired => {}
            SwapState::Created | SwapState::Committed if record.is_expired(self.clock.now()) => {
                record = self.advance(&record, SwapState::Expired, |_| {}).await?;
            }
            SwapState::Refunded => return Ok(RefundOutcome::AlreadyRefunded),
            SwapState::Claimed => return Err(self.refund_after_claim(&record).await),
            state => return Err(wrong_state(id, "refund", state)),
        }

        let Some(reference) = record.escrow_reference.clone() else {
            info!("Swap {} never reached the escrow, refunding locally", id);
            self.advance(&record, SwapState::Refunded, |r| r.last_error = None)
                .await?;
            return Ok(RefundOutcome::Refunded);
        };

        let status = self.escrow_status(id, &reference).await?;
        match status {
            EscrowStatus::Claimed => {
                self.reconcile_state(&record, SwapState::Claimed).await?;
                return Err(self.refund_after_claim(&record).await);
            }
            EscrowStatus::Refunded => {
                self.reconcile_state(&record, SwapState::Refunded).await?;
                return Ok(RefundOutcome::AlreadyRefunded);
            }
            _ => {}
        }

        let started = Instant::now();
        let result = with_retry("refund", id, &self.retry, || self.escrow.refund(&reference)).await;
        observe("refund", started, &result);

        match result {
            Ok(outcome) => {
                self.advance(&record, SwapState::Refunded, |r| r.last_error = None)
                    .await?;
                Ok(outcome)
            }
            Err(ClientError::Permanent(message)) => {
                error!("Escrow rejected refund for swap {}: {}", id, message);
                self.note_error(id, message.clone()).await?;
                Err(SwapError::EscrowProtocol {
                    swap_id: id.to_string(),
                    message,
                })
            }
            Err(ClientError::Transient(message)) => Err(transient("refund", message)),
        }
    }

    async fn refund_after_claim(&self, record: &SwapRecord) -> SwapError {
        let race = ExpiryRace::RefundAfterClaim;
        metrics::record_expiry_race(race.name());
        error!("Refund requested for swap {} but escrow was claimed", record.id);
        if let Err(e) = self.note_error(&record.id, race.to_string()).await {
            warn!("Failed to record expiry race on swap {}: {}", record.id, e);
        }
        SwapError::ExpiryRace {
            swap_id: record.id.clone(),
            race,
        }
    }

    /// Run whichever operation the current state calls for
    pub async fn step(&self, id: &str) -> SwapResult<SwapRecord> {
        let record = self.store.get(id).await?;
        match record.state {
            SwapState::Created => self.commit(id).await,
            SwapState::Committed => self.poll_payment(id).await,
            SwapState::PaymentDetected => {
                self.claim(id).await?;
                self.get_swap(id).await
            }
            SwapState::Expired => {
                self.refund(id).await?;
                self.get_swap(id).await
            }
            SwapState::Claimed | SwapState::Refunded | SwapState::Failed => Ok(record),
        }
    }

    /// Align the local record with the escrow's view.
    ///
    /// Never claims or refunds; only moves local state to what the escrow
    /// already shows.
    pub async fn reconcile(&self, id: &str) -> SwapResult<SwapRecord> {
        let _guard = self.lock(id).await;
        let record = self.store.get(id).await?;

        if record.state.is_terminal() {
            return Ok(record);
        }
        // Not yet committed; an idempotent re-commit recovers the reference
        let Some(reference) = record.escrow_reference.clone() else {
            return Ok(record);
        };

        let status = self.escrow_status(id, &reference).await?;
        let target = match (status, record.state) {
            (EscrowStatus::Claimed, _) => SwapState::Claimed,
            (EscrowStatus::Refunded, _) => SwapState::Refunded,
            (EscrowStatus::Expired, SwapState::Created | SwapState::Committed) => {
                SwapState::Expired
            }
            (EscrowStatus::Funded, SwapState::Created) => SwapState::Committed,
            _ => {
                debug!("Swap {} in {} agrees with escrow status {}", id, record.state, status);
                return Ok(record);
            }
        };

        self.reconcile_state(&record, target).await
    }

    async fn escrow_status(&self, id: &str, reference: &str) -> SwapResult<EscrowStatus> {
        let started = Instant::now();
        let result = with_retry("get_status", id, &self.retry, || {
            self.escrow.get_status(reference)
        })
        .await;
        observe("get_status", started, &result);

        result.map_err(|e| match e {
            ClientError::Transient(message) => transient("get_status", message),
            ClientError::Permanent(message) => SwapError::EscrowProtocol {
                swap_id: id.to_string(),
                message,
            },
        })
    }

    pub(super) async fn lock(&self, id: &str) -> KeyedGuard<'_> {
        self.locks.lock(id).await
    }

    /// Persist a regular lifecycle transition
    async fn advance<F>(&self, record: &SwapRecord, next: SwapState, change: F) -> SwapResult<SwapRecord>
    where
        F: FnOnce(&mut SwapRecord) + Send + 'static,
    {
        let from = record.state;
        let updated = self
            .store
            .update(
                &record.id,
                mutator(move |r| {
                    change(r);
                    r.transition(next)
                }),
            )
            .await?;

        metrics::record_transition(updated.direction(), from, updated.state);
        info!("Swap {} {} -> {}", updated.id, from, updated.state);
        Ok(updated)
    }

    /// Persist a state observed on the escrow
    async fn reconcile_state(&self, record: &SwapRecord, next: SwapState) -> SwapResult<SwapRecord> {
        let from = record.state;
        let updated = self
            .store
            .update(&record.id, mutator(move |r| r.reconcile(next)))
            .await?;

        if from != updated.state {
            metrics::record_reconciliation(from, updated.state);
            metrics::record_transition(updated.direction(), from, updated.state);
            warn!("Swap {} reconciled {} -> {} from escrow status", updated.id, from, updated.state);
        }
        Ok(updated)
    }

    /// Record an operator-facing condition without changing state
    async fn note_error(&self, id: &str, message: String) -> SwapResult<()> {
        self.store
            .update(
                id,
                mutator(move |r| {
                    r.last_error = Some(message);
                    Ok(())
                }),
            )
            .await?;
        Ok(())
    }
}

fn observe<T>(operation: &str, started: Instant, result: &ClientResult<T>) {
    metrics::record_escrow_latency(operation, started.elapsed().as_secs_f64());
    if let Err(e) = result {
        metrics::record_escrow_error(operation, e.kind());
    }
}

fn rejected(reason: &str, e: ValidationError) -> ValidationError {
    metrics::record_price_rejection(reason);
    warn!("Rejected swap quote ({}): {}", reason, e);
    e
}

fn transient(operation: &str, message: String) -> SwapError {
    SwapError::TransientInfra {
        operation: operation.to_string(),
        message,
    }
}

fn wrong_state(id: &str, operation: &'static str, state: SwapState) -> SwapError {
    SwapError::WrongState {
        swap_id: id.to_string(),
        operation,
        state,
    }
}
