use crate::{
    config::AppConfig,
    ledger::{
        HeadroomFetcher,
        PlayerId,
        Settlement,
        SettlementRef,
        WriteDispatcher,
        WriteKind,
        WriteRequest,
    },
};
use chrono::{
    DateTime,
    Utc,
};
use std::{
    sync::Arc,
    time::Duration,
};
use thiserror::Error;
use tokio::time;
use tracing::info;

/// One in-flight write. `kind` is always the user action, never the
/// raise-authorization precursor, so timer suppression and event inference see
/// the intent rather than the plumbing.
#[derive(Clone, Debug)]
pub struct PendingWrite {
    pub kind: WriteKind,
    pub reference: Option<SettlementRef>,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum WriteFailure {
    /// Refused before submission; no ledger state is assumed changed.
    #[error("write rejected: {0}")]
    Rejected(String),
    /// Settled as a failure; partial ledger effects are possible.
    #[error("write failed at settlement: {0}")]
    Failed(String),
    #[error("authorization headroom {have} still below requirement {need} after raise")]
    AuthorizationShortfall { have: u64, need: u64 },
}

impl WriteFailure {
    /// Whether the ledger may have changed despite the failure, warranting a
    /// refetch anyway.
    pub fn may_have_ledger_effects(&self) -> bool {
        matches!(self, WriteFailure::Failed(_))
    }
}

#[derive(Clone, Debug)]
pub struct SequencedOutcome {
    pub kind: WriteKind,
    pub reference: Option<SettlementRef>,
    pub result: Result<(), WriteFailure>,
}

impl SequencedOutcome {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("a {0:?} write is already in flight")]
pub struct WriteInFlight(pub WriteKind);

/// Sequences user actions against their authorization precondition and owns
/// the single `PendingWrite` slot. Nothing else creates or clears pending
/// entries.
pub struct WriteSequencer<D, H> {
    dispatcher: Arc<D>,
    headroom: Arc<H>,
    player: PlayerId,
    raise_multiplier: u64,
    settlement_delay: Duration,
    pending: Option<PendingWrite>,
}

impl<D, H> WriteSequencer<D, H>
where
    D: WriteDispatcher + 'static,
    H: HeadroomFetcher + 'static,
{
    pub fn new(dispatcher: Arc<D>, headroom: Arc<H>, player: PlayerId, config: &AppConfig) -> Self {
        Self {
            dispatcher,
            headroom,
            player,
            raise_multiplier: config.auth_raise_multiplier,
            settlement_delay: config.settlement_refetch_delay,
            pending: None,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.pending.is_none()
    }

    /// The hint passed to event inference at the next reconciliation.
    pub fn active_kind(&self) -> Option<WriteKind> {
        self.pending.as_ref().map(|pending| pending.kind)
    }

    pub fn pending(&self) -> Option<&PendingWrite> {
        self.pending.as_ref()
    }

    /// Registers the action as pending and returns the future that drives it
    /// to settlement. Refuses while another write is in flight; callers rely
    /// on `observe_settlement` to free the slot.
    pub fn begin(
        &mut self,
        request: WriteRequest,
        required_authorization: u64,
    ) -> Result<impl Future<Output = SequencedOutcome> + use<D, H>, WriteInFlight> {
        if let Some(pending) = &self.pending {
            return Err(WriteInFlight(pending.kind));
        }
        self.pending = Some(PendingWrite {
            kind: request.kind(),
            reference: None,
            submitted_at: Utc::now(),
        });
        Ok(drive(
            self.dispatcher.clone(),
            self.headroom.clone(),
            self.player.clone(),
            request,
            required_authorization,
            self.raise_multiplier,
            self.settlement_delay,
        ))
    }

    /// Clears the pending slot once the write's settlement (success or
    /// failure) has been observed.
    pub fn observe_settlement(&mut self, outcome: &SequencedOutcome) {
        if let Some(pending) = self.pending.take() {
            debug_assert_eq!(pending.kind, outcome.kind);
        }
    }

    /// Drops a lingering pending entry when a new run start makes it moot.
    pub fn supersede(&mut self) {
        self.pending = None;
    }
}

async fn drive<D, H>(
    dispatcher: Arc<D>,
    headroom: Arc<H>,
    player: PlayerId,
    request: WriteRequest,
    required_authorization: u64,
    raise_multiplier: u64,
    settlement_delay: Duration,
) -> SequencedOutcome
where
    D: WriteDispatcher,
    H: HeadroomFetcher,
{
    let kind = request.kind();
    if required_authorization > 0
        && kind != WriteKind::RaiseAuthorization
        && let Err(failure) = ensure_headroom(
            &*dispatcher,
            &*headroom,
            &player,
            required_authorization,
            raise_multiplier,
            settlement_delay,
        )
        .await
    {
        return SequencedOutcome {
            kind,
            reference: None,
            result: Err(failure),
        };
    }

    let reference = match dispatcher.submit(&player, request).await {
        Ok(reference) => reference,
        Err(rejected) => {
            return SequencedOutcome {
                kind,
                reference: None,
                result: Err(WriteFailure::Rejected(rejected.0)),
            };
        }
    };
    let result = match dispatcher.settled(&reference).await {
        Settlement::Success => Ok(()),
        Settlement::Failure(reason) => Err(WriteFailure::Failed(reason)),
    };
    SequencedOutcome {
        kind,
        reference: Some(reference),
        result,
    }
}

/// Checks the headroom precondition and raises it when short: submit the
/// raise, await its settlement, wait out propagation, then confirm with a
/// fresh read before the action is allowed through.
async fn ensure_headroom<D, H>(
    dispatcher: &D,
    headroom: &H,
    player: &PlayerId,
    required: u64,
    raise_multiplier: u64,
    settlement_delay: Duration,
) -> Result<(), WriteFailure>
where
    D: WriteDispatcher,
    H: HeadroomFetcher,
{
    let have = headroom
        .fetch_authorization_headroom(player)
        .await
        .map_err(|err| WriteFailure::Rejected(err.to_string()))?;
    if have >= required {
        return Ok(());
    }

    // Raise to a buffered multiple so follow-up actions are amortized.
    let amount = required.saturating_mul(raise_multiplier);
    info!(have, required, amount, "raising authorization before action");
    let reference = dispatcher
        .submit(player, WriteRequest::RaiseAuthorization { amount })
        .await
        .map_err(|rejected| WriteFailure::Rejected(rejected.0))?;
    if let Settlement::Failure(reason) = dispatcher.settled(&reference).await {
        return Err(WriteFailure::Failed(format!(
            "authorization raise failed: {reason}"
        )));
    }
    time::sleep(settlement_delay).await;

    let have = headroom
        .fetch_authorization_headroom(player)
        .await
        .map_err(|err| WriteFailure::Rejected(err.to_string()))?;
    if have < required {
        return Err(WriteFailure::AuthorizationShortfall {
            have,
            need: required,
        });
    }
    Ok(())
}
