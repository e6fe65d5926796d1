use crate::snapshot::{
    Direction,
    RawGameRecord,
};
use thiserror::Error;

/// The on-ledger identity of the player whose record this client mirrors.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct PlayerId(pub String);

impl std::fmt::Display for PlayerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Opaque handle for tracking a dispatched write through settlement.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct SettlementRef(pub u64);

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum WriteKind {
    RaiseAuthorization,
    StartRun,
    PerformMove,
    AcquireProtection,
    EndAndClaim,
}

/// A mutating request with its per-kind parameters.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum WriteRequest {
    RaiseAuthorization { amount: u64 },
    StartRun,
    PerformMove { direction: Direction },
    AcquireProtection,
    EndAndClaim,
}

impl WriteRequest {
    pub fn kind(&self) -> WriteKind {
        match self {
            WriteRequest::RaiseAuthorization { .. } => WriteKind::RaiseAuthorization,
            WriteRequest::StartRun => WriteKind::StartRun,
            WriteRequest::PerformMove { .. } => WriteKind::PerformMove,
            WriteRequest::AcquireProtection => WriteKind::AcquireProtection,
            WriteRequest::EndAndClaim => WriteKind::EndAndClaim,
        }
    }
}

/// A write's eventual on-ledger outcome.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Settlement {
    Success,
    Failure(String),
}

/// Network or node failure on a read. Always retryable; never mutates what the
/// client already holds.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("transient read failure: {0}")]
pub struct FetchError(pub String);

/// The wallet or node refused the write before it ever reached the ledger.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("write rejected: {0}")]
pub struct WriteRejected(pub String);

/// One authoritative point-in-time read of the player's game record.
/// `Ok(None)` means the ledger holds no record for the player.
pub trait SnapshotFetcher {
    async fn fetch_game(
        &self,
        player: &PlayerId,
    ) -> Result<Option<RawGameRecord>, FetchError>;
}

/// Reads the remaining pre-authorized spending capacity, an independently
/// fetched scalar the Write Sequencer gates on.
pub trait HeadroomFetcher {
    async fn fetch_authorization_headroom(&self, player: &PlayerId) -> Result<u64, FetchError>;
}

/// Submits one mutating request and later resolves its settlement. Submission
/// and settlement are separate suspension points; the time between them is
/// unbounded.
pub trait WriteDispatcher {
    async fn submit(
        &self,
        player: &PlayerId,
        request: WriteRequest,
    ) -> Result<SettlementRef, WriteRejected>;

    async fn settled(&self, reference: &SettlementRef) -> Settlement;
}
