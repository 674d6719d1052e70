//! Orchestrator
//!
//! Drives the monitor -> evaluator -> governor -> provisioner ->
//! attribution pipeline on a fixed interval. Single-flight is enforced
//! by the persisted batch state machine, not an in-memory lock, so the
//! guarantee survives restarts: on startup any batch left `Submitted`
//! is resolved against the chain before a new one may be proposed.

use crate::attribution::AttributionLedger;
use crate::evaluator::evaluate;
use crate::governor::{SafetyGovernor, Verdict};
use crate::monitor::BalanceMonitor;
use crate::provisioner::{plan_provision, LiquidityProvisioner, ProvisionPlan};
use chrono::Utc;
use poolwarden_core::{
    utc_day, AppConfig, Batch, BatchConfirmedEvent, BatchLifecycleEvent, BatchProposedEvent,
    BatchStatus, BatchSubmittedEvent, ChainGateway, EngineEvent, GatewayError,
    SnapshotRecordedEvent, TxOutcome,
};
use poolwarden_ledger::{BatchRepository, Database, DailyUsageRepository, LedgerError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Invariant violation in the ledger; fatal, the loop halts rather
    /// than risk a double-spend
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// The scheduling loop
pub struct Orchestrator {
    db: Database,
    gateway: Arc<dyn ChainGateway>,
    governor: Arc<SafetyGovernor>,
    monitor: BalanceMonitor,
    provisioner: LiquidityProvisioner,
    attribution: AttributionLedger,
    event_tx: broadcast::Sender<EngineEvent>,
    pair: String,
    poll_interval: Duration,
    confirmation_timeout: Duration,
    confirmation_poll: Duration,
}

impl Orchestrator {
    pub fn new(
        config: &AppConfig,
        db: Database,
        gateway: Arc<dyn ChainGateway>,
        governor: Arc<SafetyGovernor>,
        event_tx: broadcast::Sender<EngineEvent>,
    ) -> Self {
        let monitor = BalanceMonitor::new(gateway.clone(), db.clone(), &config.chain);
        let provisioner =
            LiquidityProvisioner::new(gateway.clone(), &config.chain, &config.engine);
        let attribution = AttributionLedger::new(db.clone());

        Self {
            db,
            gateway,
            governor,
            monitor,
            provisioner,
            attribution,
            event_tx,
            pair: config.chain.pair.clone(),
            poll_interval: Duration::from_secs(config.engine.poll_interval_secs),
            confirmation_timeout: Duration::from_secs(config.engine.confirmation_timeout_secs),
            confirmation_poll: Duration::from_secs(config.engine.confirmation_poll_secs),
        }
    }

    /// Run until the shutdown signal fires. Recovery always precedes
    /// the first tick.
    pub async fn run(
        &self,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<(), OrchestratorError> {
        self.recover().await?;

        let mut ticker = interval(self.poll_interval);

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Orchestrator shutting down");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        match e {
                            OrchestratorError::Ledger(LedgerError::Corruption(_)) => {
                                error!(error = %e, "Halting on ledger corruption");
                                return Err(e);
                            }
                            e => error!(error = %e, "Tick failed"),
                        }
                    }
                }
            }
        }
    }

    /// Resolve any batch the previous process left behind. A batch in
    /// `Submitted` must reach a terminal status before anything else
    /// happens; `Proposed`/`Approved` leftovers never touched the chain
    /// and are simply aborted.
    pub async fn recover(&self) -> Result<(), OrchestratorError> {
        let batches = BatchRepository::new(&self.db);

        let open = match batches.current_open().await {
            Ok(open) => open,
            Err(e @ LedgerError::Corruption(_)) => {
                error!(error = %e, "Ledger corruption detected during recovery");
                return Err(e.into());
            }
            Err(e) => return Err(e.into()),
        };

        let Some(batch) = open else {
            return Ok(());
        };

        info!(
            batch_id = %batch.id,
            status = %batch.status,
            "Recovering interrupted batch"
        );

        match batch.status {
            BatchStatus::Proposed | BatchStatus::Approved => {
                batches
                    .mark_aborted(&batch.id, "recovered at startup before submission")
                    .await?;
                self.publish_aborted(&batch, "recovered at startup before submission");
            }
            BatchStatus::Submitted => {
                self.resolve_submitted(&batch).await?;
            }
            // current_open never returns terminal statuses
            _ => {}
        }

        Ok(())
    }

    /// Resolve a `Submitted` batch by querying the chain for its
    /// outcome, bounded by the confirmation timeout.
    async fn resolve_submitted(&self, batch: &Batch) -> Result<(), OrchestratorError> {
        let batches = BatchRepository::new(&self.db);
        let day = utc_day(batch.created_at);

        let Some(tx_ref) = batch.tx_ref.as_deref() else {
            // Crashed between the status transition and the broadcast;
            // nothing can be on chain
            batches
                .mark_failed(&batch.id, "no broadcast recorded", &day)
                .await?;
            self.publish_failed(&batch.id, "no broadcast recorded");
            return Ok(());
        };

        let deadline = tokio::time::Instant::now() + self.confirmation_timeout;
        loop {
            match self.gateway.tx_outcome(tx_ref).await {
                Ok(TxOutcome::Confirmed {
                    lp_tokens, ..
                }) => {
                    let confirmed_at = Utc::now();
                    batches
                        .mark_confirmed(&batch.id, lp_tokens, confirmed_at, &day)
                        .await?;
                    if let Some(confirmed) = batches.get(&batch.id).await? {
                        self.attribution.attribute(&confirmed).await?;
                    }
                    info!(batch_id = %batch.id, tx_ref = %tx_ref, "Recovered batch confirmed");
                    self.event_tx
                        .send(EngineEvent::BatchConfirmed(BatchConfirmedEvent {
                            batch_id: batch.id.clone(),
                            lp_tokens,
                            tx_ref: tx_ref.to_string(),
                            timestamp: confirmed_at,
                        }))
                        .ok();
                    return Ok(());
                }
                Ok(TxOutcome::Reverted) => {
                    batches
                        .mark_failed(&batch.id, "transaction reverted", &day)
                        .await?;
                    self.publish_failed(&batch.id, "transaction reverted");
                    return Ok(());
                }
                Err(GatewayError::TxNotFound(_)) => {
                    batches
                        .mark_failed(&batch.id, "transaction not found on chain", &day)
                        .await?;
                    self.publish_failed(&batch.id, "transaction not found on chain");
                    return Ok(());
                }
                Ok(TxOutcome::Pending) => {
                    debug!(batch_id = %batch.id, "Recovered batch still pending");
                }
                Err(e) => {
                    warn!(batch_id = %batch.id, error = %e, "Receipt lookup failed during recovery");
                }
            }

            if tokio::time::Instant::now() >= deadline {
                batches
                    .mark_failed(&batch.id, "confirmation timeout during recovery", &day)
                    .await?;
                self.publish_failed(&batch.id, "confirmation timeout during recovery");
                return Ok(());
            }

            tokio::time::sleep(self.confirmation_poll).await;
        }
    }

    /// One pass of the pipeline
    pub async fn tick(&self) -> Result<(), OrchestratorError> {
        let batches = BatchRepository::new(&self.db);

        // Single-flight: an open batch means a previous tick is not
        // fully resolved; corruption here is fatal
        if let Some(open) = batches.current_open().await? {
            warn!(batch_id = %open.id, status = %open.status, "Open batch found, skipping tick");
            return Ok(());
        }

        let snapshot = match self.monitor.tick().await {
            Ok(snapshot) => snapshot,
            Err(crate::monitor::MonitorError::Ledger(e)) => return Err(e.into()),
            Err(e) => {
                warn!(error = %e, "Balance read failed, skipping tick");
                return Ok(());
            }
        };
        self.event_tx
            .send(EngineEvent::SnapshotRecorded(SnapshotRecordedEvent {
                balance_a: snapshot.balance_a,
                balance_b: snapshot.balance_b,
                timestamp: snapshot.taken_at,
            }))
            .ok();

        // Safety limits are re-read on every decision
        let safety = self.governor.current_config().await;
        let day = utc_day(Utc::now());
        let usage = DailyUsageRepository::new(&self.db).get_or_create(&day).await?;

        let Some(proposal) = evaluate(&snapshot, &safety, &usage) else {
            debug!(
                balance_a = %snapshot.balance_a,
                balance_b = %snapshot.balance_b,
                "No trigger"
            );
            return Ok(());
        };

        // Reserves are needed by both the governor and the plan; a
        // failed read leaves no trace and the next tick retries
        let reserves = match self.gateway.pool_reserves(&self.pair).await {
            Ok(reserves) => reserves,
            Err(e) => {
                warn!(error = %e, "Reserve read failed, skipping tick");
                return Ok(());
            }
        };

        let batch = Batch::proposed(proposal.amount_a, proposal.amount_b, Utc::now());
        batches.insert(&batch).await?;
        info!(
            batch_id = %batch.id,
            amount_a = %proposal.amount_a,
            amount_b = %proposal.amount_b,
            "Batch proposed"
        );
        self.event_tx
            .send(EngineEvent::BatchProposed(BatchProposedEvent {
                batch_id: batch.id.clone(),
                amount_a: proposal.amount_a,
                amount_b: proposal.amount_b,
                timestamp: batch.created_at,
            }))
            .ok();

        match self.governor.review(&proposal, &usage, &reserves, &day).await {
            Verdict::Approved => {}
            Verdict::Rejected { reason } => {
                warn!(batch_id = %batch.id, reason = %reason, "Batch rejected");
                batches.mark_aborted(&batch.id, &reason).await?;
                self.publish_aborted(&batch, &reason);
                return Ok(());
            }
            Verdict::Wait { reason } => {
                debug!(batch_id = %batch.id, reason = %reason, "Batch waiting");
                batches.mark_aborted(&batch.id, &reason).await?;
                self.publish_aborted(&batch, &reason);
                return Ok(());
            }
        }

        batches.mark_approved(&batch.id).await?;
        self.event_tx
            .send(EngineEvent::BatchApproved(BatchLifecycleEvent {
                batch_id: batch.id.clone(),
                reason: None,
                timestamp: Utc::now(),
            }))
            .ok();

        let plan = match plan_provision(&proposal, &reserves, &safety) {
            Ok(plan) => plan,
            Err(e) => {
                batches.mark_aborted(&batch.id, &e.to_string()).await?;
                self.publish_aborted(&batch, &e.to_string());
                return Ok(());
            }
        };

        self.execute(&batch, &plan, &day).await
    }

    /// Execute an approved batch: approve, submit, await confirmation,
    /// attribute.
    async fn execute(
        &self,
        batch: &Batch,
        plan: &ProvisionPlan,
        day: &str,
    ) -> Result<(), OrchestratorError> {
        let batches = BatchRepository::new(&self.db);

        // A late-arriving stop must prevent submission even though the
        // batch is already approved
        if self.governor.is_stopped().await {
            batches
                .mark_aborted(&batch.id, "emergency stop before submission")
                .await?;
            self.publish_aborted(batch, "emergency stop before submission");
            return Ok(());
        }

        if let Err(e) = self.provisioner.approve_pair(plan).await {
            warn!(batch_id = %batch.id, error = %e, "Token approval failed");
            batches.mark_aborted(&batch.id, &e.to_string()).await?;
            self.publish_aborted(batch, &e.to_string());
            return Ok(());
        }

        // The reservation and the status change land atomically; from
        // here on the batch must reach Confirmed or Failed
        batches
            .mark_submitted(&batch.id, plan.matched_a, plan.matched_b, plan.expected_lp, day)
            .await?;

        let tx_ref = match self.provisioner.submit(plan).await {
            Ok(tx_ref) => tx_ref,
            Err(e) => {
                error!(batch_id = %batch.id, error = %e, "Broadcast failed");
                batches.mark_failed(&batch.id, &e.to_string(), day).await?;
                self.publish_failed(&batch.id, &e.to_string());
                return Ok(());
            }
        };
        batches.set_tx_ref(&batch.id, &tx_ref).await?;
        self.event_tx
            .send(EngineEvent::BatchSubmitted(BatchSubmittedEvent {
                batch_id: batch.id.clone(),
                matched_a: plan.matched_a,
                matched_b: plan.matched_b,
                tx_ref: tx_ref.clone(),
                timestamp: Utc::now(),
            }))
            .ok();

        match self.provisioner.await_outcome(&tx_ref).await {
            Ok(outcome) => {
                let confirmed_at = Utc::now();
                batches
                    .mark_confirmed(&batch.id, outcome.lp_tokens, confirmed_at, day)
                    .await?;
                info!(
                    batch_id = %batch.id,
                    tx_ref = %outcome.tx_ref,
                    lp_tokens = %outcome.lp_tokens,
                    used_a = %outcome.used_a,
                    used_b = %outcome.used_b,
                    "Batch confirmed"
                );
                self.event_tx
                    .send(EngineEvent::BatchConfirmed(BatchConfirmedEvent {
                        batch_id: batch.id.clone(),
                        lp_tokens: outcome.lp_tokens,
                        tx_ref: outcome.tx_ref,
                        timestamp: confirmed_at,
                    }))
                    .ok();

                if let Some(confirmed) = batches.get(&batch.id).await? {
                    self.attribution.attribute(&confirmed).await?;
                }
            }
            // Revert, confirmation timeout, and lookup failures all end
            // the same way: the reservation is released and the next
            // monitor tick re-measures the untouched balances
            Err(e) => {
                error!(batch_id = %batch.id, error = %e, "Batch failed after submission");
                batches.mark_failed(&batch.id, &e.to_string(), day).await?;
                self.publish_failed(&batch.id, &e.to_string());
            }
        }

        Ok(())
    }

    fn publish_aborted(&self, batch: &Batch, reason: &str) {
        self.event_tx
            .send(EngineEvent::BatchAborted(BatchLifecycleEvent {
                batch_id: batch.id.clone(),
                reason: Some(reason.to_string()),
                timestamp: Utc::now(),
            }))
            .ok();
    }

    fn publish_failed(&self, batch_id: &str, reason: &str) {
        self.event_tx
            .send(EngineEvent::BatchFailed(BatchLifecycleEvent {
                batch_id: batch_id.to_string(),
                reason: Some(reason.to_string()),
                timestamp: Utc::now(),
            }))
            .ok();
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::governor::SafetyGovernor;
    use async_trait::async_trait;
    use poolwarden_core::{
        AddLiquidityRequest, ApprovalSource, ChainConfig, EngineConfig, PoolReserves,
        SafetyConfig,
    };
    use poolwarden_ledger::ContributionRepository;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Scripted chain gateway for pipeline tests
    pub struct MockGateway {
        pub balance_a: Mutex<Decimal>,
        pub balance_b: Mutex<Decimal>,
        pub reserves: Mutex<PoolReserves>,
        pub fail_reads: bool,
        /// Outcome returned for any tx lookup
        pub outcome: Mutex<TxOutcome>,
        pub fail_submit: bool,
        pub submissions: AtomicU32,
        pub approvals: AtomicU32,
    }

    impl MockGateway {
        pub fn healthy(balance_a: Decimal, balance_b: Decimal) -> Self {
            Self {
                balance_a: Mutex::new(balance_a),
                balance_b: Mutex::new(balance_b),
                reserves: Mutex::new(PoolReserves {
                    reserve_a: dec!(1000000),
                    reserve_b: dec!(100000),
                    lp_supply: dec!(316227),
                }),
                fail_reads: false,
                outcome: Mutex::new(TxOutcome::Confirmed {
                    used_a: dec!(1000),
                    used_b: dec!(100),
                    lp_tokens: dec!(316),
                }),
                fail_submit: false,
                submissions: AtomicU32::new(0),
                approvals: AtomicU32::new(0),
            }
        }

        pub fn unreachable() -> Self {
            let mut gateway = Self::healthy(Decimal::ZERO, Decimal::ZERO);
            gateway.fail_reads = true;
            gateway
        }
    }

    #[async_trait]
    impl ChainGateway for MockGateway {
        async fn token_balance(
            &self,
            token: &str,
            _account: &str,
        ) -> Result<Decimal, GatewayError> {
            if self.fail_reads {
                return Err(GatewayError::Http("connection refused".to_string()));
            }
            if token == "0xaaaa" {
                Ok(*self.balance_a.lock().unwrap())
            } else {
                Ok(*self.balance_b.lock().unwrap())
            }
        }

        async fn pool_reserves(&self, _pair: &str) -> Result<PoolReserves, GatewayError> {
            if self.fail_reads {
                return Err(GatewayError::Http("connection refused".to_string()));
            }
            Ok(*self.reserves.lock().unwrap())
        }

        async fn approve(&self, _token: &str, _amount: Decimal) -> Result<(), GatewayError> {
            self.approvals.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn add_liquidity(
            &self,
            _request: AddLiquidityRequest,
        ) -> Result<String, GatewayError> {
            if self.fail_submit {
                return Err(GatewayError::Submission("broadcast refused".to_string()));
            }
            let n = self.submissions.fetch_add(1, Ordering::SeqCst);
            Ok(format!("0xtx{}", n))
        }

        async fn tx_outcome(&self, _tx_ref: &str) -> Result<TxOutcome, GatewayError> {
            Ok(self.outcome.lock().unwrap().clone())
        }

        fn is_dry_run(&self) -> bool {
            true
        }
    }

    /// Approval source that always grants
    pub struct GrantAll;

    #[async_trait]
    impl ApprovalSource for GrantAll {
        async fn is_approved(
            &self,
            _amount_a: Decimal,
            _amount_b: Decimal,
            _day: &str,
        ) -> Result<bool, GatewayError> {
            Ok(true)
        }
    }

    fn test_config() -> AppConfig {
        AppConfig {
            chain: ChainConfig {
                collection_account: "0xc011".to_string(),
                token_a: "0xaaaa".to_string(),
                token_b: "0xbbbb".to_string(),
                pair: "0xpair".to_string(),
                ..Default::default()
            },
            safety: SafetyConfig {
                min_threshold_a: dec!(1000),
                min_threshold_b: dec!(100),
                max_single_tx_a: dec!(1000),
                max_single_tx_b: dec!(1000),
                daily_limit_a: dec!(5000),
                daily_limit_b: dec!(500),
                max_price_impact_bps: dec!(100),
                emergency_stop: false,
                ..Default::default()
            },
            engine: EngineConfig {
                poll_interval_secs: 1,
                confirmation_timeout_secs: 1,
                confirmation_poll_secs: 1,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    async fn orchestrator_with(
        gateway: Arc<MockGateway>,
        config: AppConfig,
        db: Database,
    ) -> Orchestrator {
        let governor = Arc::new(SafetyGovernor::new(
            config.safety.clone(),
            Arc::new(GrantAll),
        ));
        let (event_tx, _) = broadcast::channel(64);
        Orchestrator::new(&config, db, gateway, governor, event_tx)
    }

    #[tokio::test]
    async fn happy_path_confirms_and_records_usage() {
        let db = Database::in_memory().await.unwrap();
        let gateway = Arc::new(MockGateway::healthy(dec!(1200), dec!(120)));
        let orchestrator = orchestrator_with(gateway, test_config(), db.clone()).await;

        orchestrator.tick().await.unwrap();

        let batches = BatchRepository::new(&db);
        let history = batches.history(10).await.unwrap();
        assert_eq!(history.len(), 1);
        let batch = &history[0];
        assert_eq!(batch.status, BatchStatus::Confirmed);
        assert_eq!(batch.amount_a, dec!(1000));
        assert_eq!(batch.amount_b, dec!(120));
        assert_eq!(batch.matched_a, dec!(1000));
        assert_eq!(batch.matched_b, dec!(100));
        assert_eq!(batch.actual_lp, Some(dec!(316)));

        let day = utc_day(Utc::now());
        let usage = DailyUsageRepository::new(&db)
            .get(&day)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(usage.used_a, dec!(1000));
        assert_eq!(usage.used_b, dec!(100));
        assert_eq!(usage.reserved_a, dec!(0));
    }

    #[tokio::test]
    async fn below_threshold_proposes_nothing() {
        let db = Database::in_memory().await.unwrap();
        let gateway = Arc::new(MockGateway::healthy(dec!(500), dec!(120)));
        let orchestrator = orchestrator_with(gateway, test_config(), db.clone()).await;

        orchestrator.tick().await.unwrap();

        assert!(BatchRepository::new(&db).history(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn read_failure_skips_tick_without_state() {
        let db = Database::in_memory().await.unwrap();
        let gateway = Arc::new(MockGateway::unreachable());
        let orchestrator = orchestrator_with(gateway, test_config(), db.clone()).await;

        orchestrator.tick().await.unwrap();

        assert!(BatchRepository::new(&db).history(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn price_impact_rejection_aborts_without_usage() {
        let db = Database::in_memory().await.unwrap();
        let gateway = Arc::new(MockGateway::healthy(dec!(1200), dec!(120)));
        // Thin pool: the happy-path amounts shift the price ~185 bps
        *gateway.reserves.lock().unwrap() = PoolReserves {
            reserve_a: dec!(5000),
            reserve_b: dec!(450),
            lp_supply: dec!(1500),
        };
        let mut config = test_config();
        config.safety.max_price_impact_bps = dec!(50);
        let orchestrator = orchestrator_with(gateway.clone(), config, db.clone()).await;

        orchestrator.tick().await.unwrap();

        let history = BatchRepository::new(&db).history(10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, BatchStatus::Aborted);
        assert!(history[0].reason.as_deref().unwrap().contains("price impact"));
        assert_eq!(gateway.submissions.load(Ordering::SeqCst), 0);

        let day = utc_day(Utc::now());
        let usage = DailyUsageRepository::new(&db).get(&day).await.unwrap();
        assert!(usage.map(|u| u.used_a == dec!(0)).unwrap_or(true));
    }

    #[tokio::test]
    async fn reverted_transaction_fails_and_releases_reservation() {
        let db = Database::in_memory().await.unwrap();
        let gateway = Arc::new(MockGateway::healthy(dec!(1200), dec!(120)));
        *gateway.outcome.lock().unwrap() = TxOutcome::Reverted;
        let orchestrator = orchestrator_with(gateway, test_config(), db.clone()).await;

        orchestrator.tick().await.unwrap();

        let history = BatchRepository::new(&db).history(10).await.unwrap();
        assert_eq!(history[0].status, BatchStatus::Failed);

        let day = utc_day(Utc::now());
        let usage = DailyUsageRepository::new(&db)
            .get(&day)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(usage.used_a, dec!(0));
        assert_eq!(usage.reserved_a, dec!(0));
    }

    #[tokio::test]
    async fn late_emergency_stop_prevents_submission() {
        let db = Database::in_memory().await.unwrap();
        let gateway = Arc::new(MockGateway::healthy(dec!(1200), dec!(120)));
        let config = test_config();
        let governor = Arc::new(SafetyGovernor::new(
            config.safety.clone(),
            Arc::new(GrantAll),
        ));
        let (event_tx, _) = broadcast::channel(64);
        let orchestrator = Orchestrator::new(
            &config,
            db.clone(),
            gateway.clone(),
            governor.clone(),
            event_tx,
        );

        // Build the approved batch and plan by hand, then stop before
        // execution, as a stop arriving between approval and submission
        // would
        let batch = Batch::proposed(dec!(1000), dec!(100), Utc::now());
        let batches = BatchRepository::new(&db);
        batches.insert(&batch).await.unwrap();
        batches.mark_approved(&batch.id).await.unwrap();
        let plan = plan_provision(
            &poolwarden_core::Proposal {
                amount_a: dec!(1000),
                amount_b: dec!(100),
            },
            &*gateway.reserves.lock().unwrap(),
            &config.safety,
        )
        .unwrap();

        governor.halt("operator stop");
        let day = utc_day(Utc::now());
        orchestrator.execute(&batch, &plan, &day).await.unwrap();

        let stored = batches.get(&batch.id).await.unwrap().unwrap();
        assert_eq!(stored.status, BatchStatus::Aborted);
        assert_eq!(gateway.submissions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn single_flight_across_ticks() {
        let db = Database::in_memory().await.unwrap();
        let gateway = Arc::new(MockGateway::healthy(dec!(1200), dec!(120)));
        let orchestrator = orchestrator_with(gateway, test_config(), db.clone()).await;

        // Leave an open batch behind, as a concurrent worker would
        let stuck = Batch::proposed(dec!(1000), dec!(100), Utc::now());
        let batches = BatchRepository::new(&db);
        batches.insert(&stuck).await.unwrap();

        orchestrator.tick().await.unwrap();

        // The tick refused to propose a second batch
        let history = batches.history(10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, stuck.id);
    }

    #[tokio::test]
    async fn recovery_confirms_submitted_batch() {
        let db = Database::in_memory().await.unwrap();
        let gateway = Arc::new(MockGateway::healthy(dec!(1200), dec!(120)));
        let orchestrator = orchestrator_with(gateway, test_config(), db.clone()).await;

        // Simulate a crash mid-flight: batch submitted with a known tx
        let batch = Batch::proposed(dec!(1000), dec!(100), Utc::now());
        let batches = BatchRepository::new(&db);
        batches.insert(&batch).await.unwrap();
        batches.mark_approved(&batch.id).await.unwrap();
        let day = utc_day(batch.created_at);
        batches
            .mark_submitted(&batch.id, dec!(1000), dec!(100), dec!(316), &day)
            .await
            .unwrap();
        batches.set_tx_ref(&batch.id, "0xdeadbeef").await.unwrap();

        // Seed contributions so recovery also attributes
        let contributions = ContributionRepository::new(&db);
        contributions
            .insert("0xdep1", dec!(1000), dec!(100), Utc::now())
            .await
            .unwrap();

        orchestrator.recover().await.unwrap();

        let stored = batches.get(&batch.id).await.unwrap().unwrap();
        assert_eq!(stored.status, BatchStatus::Confirmed);
        assert_eq!(stored.actual_lp, Some(dec!(316)));

        let usage = DailyUsageRepository::new(&db)
            .get(&day)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(usage.used_a, dec!(1000));
        assert_eq!(usage.reserved_a, dec!(0));

        let stamped = contributions.for_batch(&batch.id).await.unwrap();
        assert_eq!(stamped.len(), 1);
        assert_eq!(stamped[0].lp_allocation, Some(dec!(316)));
    }

    #[tokio::test]
    async fn recovery_fails_submitted_batch_on_revert() {
        let db = Database::in_memory().await.unwrap();
        let gateway = Arc::new(MockGateway::healthy(dec!(1200), dec!(120)));
        *gateway.outcome.lock().unwrap() = TxOutcome::Reverted;
        let orchestrator = orchestrator_with(gateway, test_config(), db.clone()).await;

        let batch = Batch::proposed(dec!(1000), dec!(100), Utc::now());
        let batches = BatchRepository::new(&db);
        batches.insert(&batch).await.unwrap();
        batches.mark_approved(&batch.id).await.unwrap();
        let day = utc_day(batch.created_at);
        batches
            .mark_submitted(&batch.id, dec!(1000), dec!(100), dec!(316), &day)
            .await
            .unwrap();
        batches.set_tx_ref(&batch.id, "0xdeadbeef").await.unwrap();

        orchestrator.recover().await.unwrap();

        let stored = batches.get(&batch.id).await.unwrap().unwrap();
        assert_eq!(stored.status, BatchStatus::Failed);

        let usage = DailyUsageRepository::new(&db)
            .get(&day)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(usage.reserved_a, dec!(0));
        assert_eq!(usage.used_a, dec!(0));
    }

    #[tokio::test]
    async fn recovery_fails_submitted_batch_without_tx_ref() {
        let db = Database::in_memory().await.unwrap();
        let gateway = Arc::new(MockGateway::healthy(dec!(1200), dec!(120)));
        let orchestrator = orchestrator_with(gateway, test_config(), db.clone()).await;

        let batch = Batch::proposed(dec!(1000), dec!(100), Utc::now());
        let batches = BatchRepository::new(&db);
        batches.insert(&batch).await.unwrap();
        batches.mark_approved(&batch.id).await.unwrap();
        let day = utc_day(batch.created_at);
        batches
            .mark_submitted(&batch.id, dec!(1000), dec!(100), dec!(316), &day)
            .await
            .unwrap();

        orchestrator.recover().await.unwrap();

        let stored = batches.get(&batch.id).await.unwrap().unwrap();
        assert_eq!(stored.status, BatchStatus::Failed);
        assert_eq!(stored.reason.as_deref(), Some("no broadcast recorded"));
    }

    #[tokio::test]
    async fn recovery_aborts_pre_submission_leftovers() {
        let db = Database::in_memory().await.unwrap();
        let gateway = Arc::new(MockGateway::healthy(dec!(1200), dec!(120)));
        let orchestrator = orchestrator_with(gateway, test_config(), db.clone()).await;

        let batch = Batch::proposed(dec!(1000), dec!(100), Utc::now());
        let batches = BatchRepository::new(&db);
        batches.insert(&batch).await.unwrap();

        orchestrator.recover().await.unwrap();

        let stored = batches.get(&batch.id).await.unwrap().unwrap();
        assert_eq!(stored.status, BatchStatus::Aborted);
    }

    #[tokio::test]
    async fn two_open_batches_is_fatal() {
        let db = Database::in_memory().await.unwrap();
        let gateway = Arc::new(MockGateway::healthy(dec!(1200), dec!(120)));
        let orchestrator = orchestrator_with(gateway, test_config(), db.clone()).await;

        let batches = BatchRepository::new(&db);
        batches
            .insert(&Batch::proposed(dec!(1), dec!(1), Utc::now()))
            .await
            .unwrap();
        batches
            .insert(&Batch::proposed(dec!(2), dec!(2), Utc::now()))
            .await
            .unwrap();

        assert!(matches!(
            orchestrator.recover().await,
            Err(OrchestratorError::Ledger(LedgerError::Corruption(_)))
        ));
        assert!(matches!(
            orchestrator.tick().await,
            Err(OrchestratorError::Ledger(LedgerError::Corruption(_)))
        ));
    }

    #[tokio::test]
    async fn daily_cap_partial_fill_scenario() {
        let db = Database::in_memory().await.unwrap();
        let gateway = Arc::new(MockGateway::healthy(dec!(1200), dec!(120)));
        let mut config = test_config();
        config.safety.daily_limit_a = dec!(1500);
        config.safety.min_threshold_a = dec!(400);
        let orchestrator = orchestrator_with(gateway, config, db.clone()).await;

        // First confirmed batch consumed 1000 of the 1500 limit
        let prior = Batch::proposed(dec!(1000), dec!(100), Utc::now());
        let batches = BatchRepository::new(&db);
        batches.insert(&prior).await.unwrap();
        batches.mark_approved(&prior.id).await.unwrap();
        let day = utc_day(Utc::now());
        batches
            .mark_submitted(&prior.id, dec!(1000), dec!(100), dec!(316), &day)
            .await
            .unwrap();
        batches
            .mark_confirmed(&prior.id, dec!(316), Utc::now(), &day)
            .await
            .unwrap();

        orchestrator.tick().await.unwrap();

        // The new proposal was clipped to the 500 headroom
        let history = batches.history(10).await.unwrap();
        let newest = history.iter().find(|b| b.id != prior.id).unwrap();
        assert_eq!(newest.amount_a, dec!(500));
        assert_eq!(newest.status, BatchStatus::Confirmed);

        let usage = DailyUsageRepository::new(&db)
            .get(&day)
            .await
            .unwrap()
            .unwrap();
        assert!(usage.used_a <= dec!(1500));
    }
}
