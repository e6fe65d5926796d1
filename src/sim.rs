use crate::{
    config::AppConfig,
    ledger::{
        FetchError,
        HeadroomFetcher,
        PlayerId,
        Settlement,
        SettlementRef,
        SnapshotFetcher,
        WriteDispatcher,
        WriteRejected,
        WriteRequest,
    },
    snapshot::RawGameRecord,
};
use rand::{
    Rng,
    SeedableRng,
    rngs::StdRng,
};
use std::{
    collections::{
        HashMap,
        VecDeque,
    },
    sync::{
        Arc,
        Mutex,
    },
    time::Duration,
};
use tokio::time;
use tracing::debug;

/// What one move lands on. Scriptable for tests; otherwise drawn from the
/// seeded rng with roughly the original game's odds.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MoveOutcome {
    Empty,
    Reward(u64),
    Hazard,
    Treasure(u64),
}

struct SimState {
    record: Option<RawGameRecord>,
    headroom: u64,
    claimed_total: u64,
    next_reference: u64,
    pending: HashMap<u64, WriteRequest>,
    scripted_moves: VecDeque<MoveOutcome>,
    failing_fetches: u32,
    absent_fetches: u32,
    rng: StdRng,
}

/// An in-memory stand-in for the on-ledger game, behind the same traits the
/// real node client would implement. Point-in-time reads, asynchronous write
/// settlement, no push notifications.
#[derive(Clone)]
pub struct SimLedger {
    state: Arc<Mutex<SimState>>,
    config: AppConfig,
    latency: Duration,
}

impl SimLedger {
    pub fn new(config: AppConfig, seed: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                record: None,
                headroom: 0,
                claimed_total: 0,
                next_reference: 0,
                pending: HashMap::new(),
                scripted_moves: VecDeque::new(),
                failing_fetches: 0,
                absent_fetches: 0,
                rng: StdRng::seed_from_u64(seed),
            })),
            config,
            latency: Duration::ZERO,
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Queues fixed outcomes for upcoming moves, ahead of the rng fallback.
    pub fn script_moves(&self, outcomes: &[MoveOutcome]) {
        let mut state = self.state.lock().unwrap();
        state.scripted_moves.extend(outcomes.iter().copied());
    }

    /// The next `count` game fetches fail with a transient error.
    pub fn fail_next_fetches(&self, count: u32) {
        self.state.lock().unwrap().failing_fetches = count;
    }

    /// The next `count` game fetches serve an absent record even though one
    /// exists, mimicking read-after-write lag on a stale node.
    pub fn absent_next_fetches(&self, count: u32) {
        self.state.lock().unwrap().absent_fetches = count;
    }

    pub fn grant_headroom(&self, amount: u64) {
        self.state.lock().unwrap().headroom += amount;
    }

    pub fn headroom(&self) -> u64 {
        self.state.lock().unwrap().headroom
    }

    pub fn claimed_total(&self) -> u64 {
        self.state.lock().unwrap().claimed_total
    }

    pub fn record(&self) -> Option<RawGameRecord> {
        self.state.lock().unwrap().record.clone()
    }

    fn apply(&self, request: WriteRequest) -> Settlement {
        let mut state = self.state.lock().unwrap();
        match request {
            WriteRequest::RaiseAuthorization { amount } => {
                state.headroom = state.headroom.saturating_add(amount);
                Settlement::Success
            }
            WriteRequest::StartRun => {
                if state.headroom < self.config.entry_fee {
                    return Settlement::Failure("insufficient authorization".into());
                }
                state.headroom -= self.config.entry_fee;
                state.record = Some(RawGameRecord::example(&self.config));
                Settlement::Success
            }
            WriteRequest::PerformMove { direction } => {
                if state.headroom < self.config.move_fee {
                    return Settlement::Failure("insufficient authorization".into());
                }
                let position = match state.record.as_ref() {
                    Some(record) if record.active => crate::snapshot::GridPos::new(
                        record.current_position[0] as u8,
                        record.current_position[1] as u8,
                    ),
                    _ => return Settlement::Failure("no run in progress".into()),
                };
                let Some(next) = position.step(direction, self.config.map_size) else {
                    return Settlement::Failure("move exits the grid".into());
                };
                state.headroom -= self.config.move_fee;
                let outcome = state
                    .scripted_moves
                    .pop_front()
                    .unwrap_or_else(|| roll_outcome(&mut state.rng));
                debug!(?outcome, "simulated move outcome");
                let Some(record) = state.record.as_mut() else {
                    return Settlement::Failure("no run in progress".into());
                };
                record.current_position = [u64::from(next.x), u64::from(next.y)];
                record.move_count += 1;
                match outcome {
                    MoveOutcome::Empty => {}
                    MoveOutcome::Reward(amount) => {
                        record.pending_reward += amount;
                    }
                    MoveOutcome::Hazard => {
                        if record.has_protection {
                            record.has_protection = false;
                        } else {
                            record.active = false;
                            record.pending_reward = 0;
                        }
                    }
                    MoveOutcome::Treasure(amount) => {
                        record.pending_reward += amount;
                        record.current_position = record.end_position;
                    }
                }
                Settlement::Success
            }
            WriteRequest::AcquireProtection => {
                if state.headroom < self.config.protection_cost {
                    return Settlement::Failure("insufficient authorization".into());
                }
                state.headroom -= self.config.protection_cost;
                let Some(record) = state.record.as_mut() else {
                    return Settlement::Failure("no run in progress".into());
                };
                if !record.active || record.has_protection {
                    return Settlement::Failure("protection unavailable".into());
                }
                record.has_protection = true;
                record.protection_was_purchased = true;
                Settlement::Success
            }
            WriteRequest::EndAndClaim => {
                let Some(record) = state.record.as_mut() else {
                    return Settlement::Failure("no run in progress".into());
                };
                if !record.active {
                    return Settlement::Failure("no run in progress".into());
                }
                record.active = false;
                let reward = std::mem::take(&mut record.pending_reward);
                state.claimed_total += reward;
                Settlement::Success
            }
        }
    }
}

fn roll_outcome(rng: &mut StdRng) -> MoveOutcome {
    match rng.random_range(0..100u32) {
        0..40 => MoveOutcome::Empty,
        40..75 => MoveOutcome::Reward(rng.random_range(10..100)),
        75..95 => MoveOutcome::Hazard,
        _ => MoveOutcome::Treasure(rng.random_range(200..500)),
    }
}

impl SnapshotFetcher for SimLedger {
    async fn fetch_game(
        &self,
        _player: &PlayerId,
    ) -> Result<Option<RawGameRecord>, FetchError> {
        time::sleep(self.latency).await;
        let mut state = self.state.lock().unwrap();
        if state.failing_fetches > 0 {
            state.failing_fetches -= 1;
            return Err(FetchError("simulated node outage".into()));
        }
        if state.absent_fetches > 0 && state.record.is_some() {
            state.absent_fetches -= 1;
            return Ok(None);
        }
        Ok(state.record.clone())
    }
}

impl HeadroomFetcher for SimLedger {
    async fn fetch_authorization_headroom(
        &self,
        _player: &PlayerId,
    ) -> Result<u64, FetchError> {
        time::sleep(self.latency).await;
        Ok(self.state.lock().unwrap().headroom)
    }
}

impl WriteDispatcher for SimLedger {
    async fn submit(
        &self,
        _player: &PlayerId,
        request: WriteRequest,
    ) -> Result<SettlementRef, WriteRejected> {
        if matches!(request, WriteRequest::RaiseAuthorization { amount: 0 }) {
            return Err(WriteRejected("zero-amount authorization raise".into()));
        }
        let mut state = self.state.lock().unwrap();
        let reference = state.next_reference;
        state.next_reference += 1;
        state.pending.insert(reference, request);
        Ok(SettlementRef(reference))
    }

    async fn settled(&self, reference: &SettlementRef) -> Settlement {
        time::sleep(self.latency).await;
        let request = {
            let mut state = self.state.lock().unwrap();
            state.pending.remove(&reference.0)
        };
        match request {
            Some(request) => self.apply(request),
            None => Settlement::Failure("unknown settlement reference".into()),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]

    use super::*;
    use crate::snapshot::Direction;

    fn ledger() -> SimLedger {
        SimLedger::new(AppConfig::immediate(), 7)
    }

    async fn settle(ledger: &SimLedger, request: WriteRequest) -> Settlement {
        let player = PlayerId("alice".into());
        let reference = ledger.submit(&player, request).await.unwrap();
        ledger.settled(&reference).await
    }

    #[tokio::test]
    async fn start_run__without_headroom__fails_at_settlement() {
        let ledger = ledger();

        let settlement = settle(&ledger, WriteRequest::StartRun).await;

        assert_eq!(
            settlement,
            Settlement::Failure("insufficient authorization".into())
        );
        assert!(ledger.record().is_none());
    }

    #[tokio::test]
    async fn start_run__with_headroom__charges_entry_fee_and_creates_record() {
        // given
        let ledger = ledger();
        let entry_fee = AppConfig::default().entry_fee;
        ledger.grant_headroom(entry_fee + 500);

        // when
        let settlement = settle(&ledger, WriteRequest::StartRun).await;

        // then
        assert_eq!(settlement, Settlement::Success);
        assert_eq!(ledger.headroom(), 500);
        let record = ledger.record().unwrap();
        assert!(record.active);
        assert_eq!(record.move_count, 0);
    }

    #[tokio::test]
    async fn perform_move__hazard_with_protection__consumes_it_silently() {
        // given a protected, active run
        let ledger = ledger();
        ledger.grant_headroom(100_000_000);
        settle(&ledger, WriteRequest::StartRun).await;
        settle(&ledger, WriteRequest::AcquireProtection).await;
        ledger.script_moves(&[MoveOutcome::Hazard]);

        // when
        let settlement = settle(
            &ledger,
            WriteRequest::PerformMove {
                direction: Direction::Right,
            },
        )
        .await;

        // then: the record shows neither an event nor a reset, only the flag
        assert_eq!(settlement, Settlement::Success);
        let record = ledger.record().unwrap();
        assert!(record.active);
        assert!(!record.has_protection);
        assert!(record.protection_was_purchased);
    }

    #[tokio::test]
    async fn perform_move__hazard_without_protection__ends_run_and_zeroes_reward() {
        // given
        let ledger = ledger();
        ledger.grant_headroom(100_000_000);
        settle(&ledger, WriteRequest::StartRun).await;
        ledger.script_moves(&[MoveOutcome::Reward(80), MoveOutcome::Hazard]);
        settle(
            &ledger,
            WriteRequest::PerformMove {
                direction: Direction::Right,
            },
        )
        .await;

        // when
        settle(
            &ledger,
            WriteRequest::PerformMove {
                direction: Direction::Down,
            },
        )
        .await;

        // then
        let record = ledger.record().unwrap();
        assert!(!record.active);
        assert_eq!(record.pending_reward, 0);
    }

    #[tokio::test]
    async fn end_and_claim__pays_out_and_deactivates() {
        // given
        let ledger = ledger();
        ledger.grant_headroom(100_000_000);
        settle(&ledger, WriteRequest::StartRun).await;
        ledger.script_moves(&[MoveOutcome::Reward(120)]);
        settle(
            &ledger,
            WriteRequest::PerformMove {
                direction: Direction::Down,
            },
        )
        .await;

        // when
        let settlement = settle(&ledger, WriteRequest::EndAndClaim).await;

        // then
        assert_eq!(settlement, Settlement::Success);
        assert_eq!(ledger.claimed_total(), 120);
        let record = ledger.record().unwrap();
        assert!(!record.active);
        assert_eq!(record.pending_reward, 0);
    }
}
