#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use mockall::mock;

use swap_engine::config::EngineConfig;
use swap_engine::error::{ClientError, ClientResult};
use swap_engine::payment::payment_hash;
use swap_engine::price::{Price, PriceQuote, TradingPair};
use swap_engine::{
    ClaimOutcome, Clock, EscrowClient, EscrowStatus, ManualClock, PaymentProof, PaymentWatcher,
    RefundOutcome, SwapEngine, SwapKind, SwapRecord, SwapRequest, SwapStore,
};

pub const NOW: u64 = 1_700_000_000;

mock! {
    pub Escrow {}

    #[async_trait]
    impl EscrowClient for Escrow {
        async fn commit(&self, record: &SwapRecord) -> ClientResult<String>;
        async fn get_status(&self, escrow_reference: &str) -> ClientResult<EscrowStatus>;
        async fn claim(&self, escrow_reference: &str, proof: &PaymentProof) -> ClientResult<ClaimOutcome>;
        async fn refund(&self, escrow_reference: &str) -> ClientResult<RefundOutcome>;
    }
}

/// Escrow that keeps per-reference status and counts calls
#[derive(Default)]
pub struct FakeEscrow {
    pub escrows: Mutex<HashMap<String, EscrowStatus>>,
    /// Errors returned by the next commit calls, in order
    pub commit_errors: Mutex<VecDeque<ClientError>>,
    pub status_errors: Mutex<VecDeque<ClientError>>,
    pub commits: AtomicUsize,
    pub claims: AtomicUsize,
    pub refunds: AtomicUsize,
}

impl FakeEscrow {
    pub fn reference_for(swap_id: &str) -> String {
        format!("escrow-{swap_id}")
    }

    pub fn set_status(&self, reference: &str, status: EscrowStatus) {
        self.escrows
            .lock()
            .unwrap()
            .insert(reference.to_string(), status);
    }

    pub fn status(&self, reference: &str) -> Option<EscrowStatus> {
        self.escrows.lock().unwrap().get(reference).copied()
    }

    pub fn fail_next_commit(&self, error: ClientError) {
        self.commit_errors.lock().unwrap().push_back(error);
    }

    pub fn fail_next_status(&self, error: ClientError) {
        self.status_errors.lock().unwrap().push_back(error);
    }

    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    pub fn claims(&self) -> usize {
        self.claims.load(Ordering::SeqCst)
    }

    pub fn refunds(&self) -> usize {
        self.refunds.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EscrowClient for FakeEscrow {
    async fn commit(&self, record: &SwapRecord) -> ClientResult<String> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.commit_errors.lock().unwrap().pop_front() {
            return Err(error);
        }
        let reference = Self::reference_for(&record.id);
        self.escrows
            .lock()
            .unwrap()
            .entry(reference.clone())
            .or_insert(EscrowStatus::Funded);
        Ok(reference)
    }

    async fn get_status(&self, escrow_reference: &str) -> ClientResult<EscrowStatus> {
        if let Some(error) = self.status_errors.lock().unwrap().pop_front() {
            return Err(error);
        }
        self.status(escrow_reference)
            .ok_or_else(|| ClientError::Permanent(format!("unknown escrow {escrow_reference}")))
    }

    async fn claim(&self, escrow_reference: &str, _proof: &PaymentProof) -> ClientResult<ClaimOutcome> {
        self.claims.fetch_add(1, Ordering::SeqCst);
        let mut escrows = self.escrows.lock().unwrap();
        match escrows.get(escrow_reference).copied() {
            Some(EscrowStatus::Funded) => {
                escrows.insert(escrow_reference.to_string(), EscrowStatus::Claimed);
                Ok(ClaimOutcome::Claimed)
            }
            Some(EscrowStatus::Claimed) => Ok(ClaimOutcome::AlreadyClaimed),
            other => Err(ClientError::Permanent(format!("cannot claim escrow in {other:?}"))),
        }
    }

    async fn refund(&self, escrow_reference: &str) -> ClientResult<RefundOutcome> {
        self.refunds.fetch_add(1, Ordering::SeqCst);
        let mut escrows = self.escrows.lock().unwrap();
        match escrows.get(escrow_reference).copied() {
            Some(EscrowStatus::Funded | EscrowStatus::Expired | EscrowStatus::Pending) => {
                escrows.insert(escrow_reference.to_string(), EscrowStatus::Refunded);
                Ok(RefundOutcome::Refunded)
            }
            Some(EscrowStatus::Refunded) => Ok(RefundOutcome::AlreadyRefunded),
            other => Err(ClientError::Permanent(format!("cannot refund escrow in {other:?}"))),
        }
    }
}

/// Payment watcher fed by the test
#[derive(Default)]
pub struct FakePayments {
    proofs: Mutex<HashMap<String, PaymentProof>>,
}

impl FakePayments {
    pub fn pay(&self, swap_id: &str, proof: PaymentProof) {
        self.proofs
            .lock()
            .unwrap()
            .insert(swap_id.to_string(), proof);
    }
}

#[async_trait]
impl PaymentWatcher for FakePayments {
    async fn check_payment(&self, record: &SwapRecord) -> ClientResult<Option<PaymentProof>> {
        Ok(self.proofs.lock().unwrap().get(&record.id).cloned())
    }
}

pub fn test_config() -> EngineConfig {
    EngineConfig {
        min_price_sources: 3,
        poll_interval_ms: 10,
        request_timeout_ms: 1_000,
        max_retries: 2,
        retry_delay_ms: 1,
        max_retry_delay_ms: 5,
        ..EngineConfig::default()
    }
}

pub fn pair() -> TradingPair {
    TradingPair::new("SOL", "BTC")
}

/// Price with one decimal, e.g. `price(1005)` is 100.5
pub fn price(tenths: u128) -> Price {
    Price::from_ratio(tenths, 10).unwrap()
}

/// Three fresh sources around 100.0
pub fn quotes(now: u64) -> Vec<PriceQuote> {
    [("kraken", 1000), ("binance", 1005), ("coinbase", 998)]
        .into_iter()
        .map(|(source, tenths)| PriceQuote {
            pair: pair(),
            price: price(tenths),
            source_id: source.to_string(),
            timestamp: now,
        })
        .collect()
}

pub fn preimage(seed: u8) -> [u8; 32] {
    [seed; 32]
}

pub fn proof(seed: u8, amount: u64) -> PaymentProof {
    PaymentProof::from_preimage(&preimage(seed), amount)
}

/// Incoming swap: 100000 out, 250 fee
pub fn from_lightning_request(seed: u8) -> SwapRequest {
    SwapRequest {
        kind: SwapKind::FromLightning,
        pair: pair(),
        payment_hash: payment_hash(&preimage(seed)),
        input_amount: 100_250,
        output_amount: 100_000,
        fee: 250,
        proposed_price: price(1000),
        expiry_timestamp: None,
    }
}

pub fn to_lightning_request(seed: u8, expiry: Option<u64>) -> SwapRequest {
    SwapRequest {
        kind: SwapKind::ToLightning {
            invoice: "lntb1000u1pjexampleinvoice".to_string(),
            success_action: None,
        },
        expiry_timestamp: expiry,
        ..from_lightning_request(seed)
    }
}

pub fn engine(
    store: Arc<dyn SwapStore>,
    escrow: Arc<dyn EscrowClient>,
    payments: Arc<dyn PaymentWatcher>,
    clock: Arc<ManualClock>,
) -> Arc<SwapEngine> {
    engine_with_config(test_config(), store, escrow, payments, clock)
}

pub fn engine_with_config(
    config: EngineConfig,
    store: Arc<dyn SwapStore>,
    escrow: Arc<dyn EscrowClient>,
    payments: Arc<dyn PaymentWatcher>,
    clock: Arc<ManualClock>,
) -> Arc<SwapEngine> {
    let clock: Arc<dyn Clock> = clock;
    Arc::new(SwapEngine::with_clock(config, store, escrow, payments, clock).unwrap())
}

/// Poll the store until `id` reaches `state`
pub async fn wait_for_state(
    engine: &SwapEngine,
    id: &str,
    state: swap_engine::SwapState,
) -> SwapRecord {
    tokio::time::timeout(std::time::Duration::from_secs(5), async {
        loop {
            let record = engine.get_swap(id).await.unwrap();
            if record.state == state {
                return record;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("swap {id} never reached {state}"))
}

/// Engine that has finished its (empty) recovery sweep
pub async fn ready_engine(
    store: Arc<dyn SwapStore>,
    escrow: Arc<dyn EscrowClient>,
    payments: Arc<dyn PaymentWatcher>,
    clock: Arc<ManualClock>,
) -> Arc<SwapEngine> {
    let engine = engine(store, escrow, payments, clock);
    engine.recover().await.unwrap();
    engine
}

pub fn sample_record(id: &str, state: swap_engine::SwapState) -> SwapRecord {
    let now = chrono::Utc::now();
    SwapRecord {
        id: id.to_string(),
        kind: SwapKind::FromLightning,
        state,
        input_amount: 100_250,
        output_amount: 100_000,
        fee: 250,
        price: price(1000),
        expiry_timestamp: NOW + 600,
        payment_hash: payment_hash(&preimage(1)),
        escrow_reference: None,
        payment_proof: None,
        last_error: None,
        created_at: now,
        updated_at: now,
    }
}

/// Behaviour every `SwapStore` backend has to share
pub async fn store_contract(store: &dyn SwapStore) {
    use swap_engine::store::mutator;
    use swap_engine::{StoreError, SwapState};

    let record = sample_record("c0ffee01", SwapState::Created);
    store.create(&record).await.unwrap();
    assert!(matches!(
        store.create(&record).await,
        Err(StoreError::DuplicateId(_))
    ));
    assert_eq!(store.get("c0ffee01").await.unwrap(), record);
    assert!(matches!(
        store.get("c0ffee02").await,
        Err(StoreError::NotFound(_))
    ));
    assert!(matches!(
        store.get("../etc/passwd").await,
        Err(StoreError::InvalidId(_))
    ));

    let updated = store
        .update(
            "c0ffee01",
            mutator(|r| {
                r.escrow_reference = Some("escrow-1".to_string());
                r.transition(SwapState::Committed)
            }),
        )
        .await
        .unwrap();
    assert_eq!(updated.state, SwapState::Committed);
    assert!(updated.updated_at >= record.updated_at);
    assert_eq!(store.get("c0ffee01").await.unwrap(), updated);

    // Rejected mutations change nothing
    assert!(matches!(
        store
            .update("c0ffee01", mutator(|r| r.transition(SwapState::Claimed)))
            .await,
        Err(StoreError::InvalidTransition { .. })
    ));
    assert!(matches!(
        store
            .update(
                "c0ffee01",
                mutator(|r| {
                    r.output_amount = 1;
                    Ok(())
                })
            )
            .await,
        Err(StoreError::ImmutableField { .. })
    ));
    assert_eq!(store.get("c0ffee01").await.unwrap(), updated);

    store
        .create(&sample_record("c0ffee03", SwapState::Refunded))
        .await
        .unwrap();
    let committed = store.list_by_state(SwapState::Committed).await.unwrap();
    assert_eq!(committed.len(), 1);
    assert_eq!(committed[0].id, "c0ffee01");

    let stats = store.stats().await.unwrap();
    assert_eq!(stats.total(), 2);
    assert_eq!(stats.by_state.get("refunded"), Some(&1));

    assert!(matches!(
        store.delete("c0ffee01").await,
        Err(StoreError::NotTerminal { .. })
    ));
    store.delete("c0ffee03").await.unwrap();
    assert!(matches!(
        store.get("c0ffee03").await,
        Err(StoreError::NotFound(_))
    ));

    store.health_check().await.unwrap();
}
