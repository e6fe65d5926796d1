use std::time::Duration;

/// How often the ledger is polled while a run is active and no write is pending.
pub const POLL_INTERVAL: Duration = Duration::from_secs(15);

/// Delay between observing a write's settlement and the follow-up refetch, to
/// allow ledger propagation.
pub const SETTLEMENT_REFETCH_DELAY: Duration = Duration::from_secs(2);

/// A second refetch after settlement defends against read-after-write lag on
/// nodes that serve slightly stale reads.
pub const SECOND_REFETCH_DELAY: Duration = Duration::from_secs(6);

/// Lifetime of an inferred-event notice before the sink clears it.
pub const EVENT_TTL: Duration = Duration::from_secs(5);

/// When headroom is short, raise authorization to this multiple of the
/// requirement so follow-up actions are amortized.
pub const AUTH_RAISE_MULTIPLIER: u64 = 10;

/// Grid side length; every coordinate component must stay below this.
pub const MAP_SIZE: u8 = 8;

/// Consecutive absent fetches required before a previously seen record is
/// accepted as genuinely gone.
pub const ABSENT_CONFIRMATIONS: u8 = 2;

// Contract-defined fees, opaque to this client. Smallest currency unit.
pub const ENTRY_FEE: u64 = 5_000_000;
pub const MOVE_FEE: u64 = 100;
pub const PROTECTION_COST: u64 = 1_000_000;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub poll_interval: Duration,
    pub settlement_refetch_delay: Duration,
    pub second_refetch_delay: Duration,
    pub event_ttl: Duration,
    pub auth_raise_multiplier: u64,
    pub map_size: u8,
    pub absent_confirmations: u8,
    pub entry_fee: u64,
    pub move_fee: u64,
    pub protection_cost: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            poll_interval: POLL_INTERVAL,
            settlement_refetch_delay: SETTLEMENT_REFETCH_DELAY,
            second_refetch_delay: SECOND_REFETCH_DELAY,
            event_ttl: EVENT_TTL,
            auth_raise_multiplier: AUTH_RAISE_MULTIPLIER,
            map_size: MAP_SIZE,
            absent_confirmations: ABSENT_CONFIRMATIONS,
            entry_fee: ENTRY_FEE,
            move_fee: MOVE_FEE,
            protection_cost: PROTECTION_COST,
        }
    }
}

impl AppConfig {
    /// Zero-delay configuration so tests can drain the task set without
    /// waiting on wall-clock timers.
    pub fn immediate() -> Self {
        Self {
            poll_interval: Duration::from_millis(10),
            settlement_refetch_delay: Duration::ZERO,
            second_refetch_delay: Duration::ZERO,
            ..Self::default()
        }
    }
}
