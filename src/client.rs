use crate::{
    config::AppConfig,
    infer::InferredEvent,
    ledger::{
        FetchError,
        HeadroomFetcher,
        PlayerId,
        SnapshotFetcher,
        WriteDispatcher,
        WriteKind,
        WriteRequest,
    },
    notify::NotificationSink,
    reconcile::Reconciler,
    sequencer::{
        SequencedOutcome,
        WriteSequencer,
    },
    snapshot::{
        Direction,
        RawGameRecord,
        Snapshot,
    },
};
use color_eyre::eyre::Result;
use futures::{
    FutureExt,
    StreamExt,
    future::LocalBoxFuture,
    stream::FuturesUnordered,
};
use std::{
    sync::Arc,
    time::{
        Duration,
        Instant,
    },
};
use tokio::{
    sync::mpsc,
    time,
};
use tracing::{
    error,
    info,
    warn,
};

const MAX_KEPT_ERRORS: usize = 50;

/// UI actions routed into the client loop. Thin wrappers over the write
/// sequencer, guarded on the derived `can_*` flags.
#[derive(Clone, Debug)]
pub enum Command {
    StartRun,
    Move(Direction),
    AcquireProtection,
    EndAndClaim,
    RaiseAuthorization,
    Refetch,
    Shutdown,
}

/// Completions the run loop reacts to. All state mutation happens in reaction
/// to exactly one of these at a time.
enum LoopTask {
    FetchDone(Result<Option<RawGameRecord>, FetchError>),
    WriteSettled(SequencedOutcome),
    RefetchDue,
    HeadroomRead(Result<u64, FetchError>),
}

/// Render-ready state derived from the reconciled snapshot. Read-only;
/// consumers act through `Command`s, never on this.
#[derive(Clone, Debug)]
pub struct ViewState {
    pub game: Option<Snapshot>,
    pub headroom: Option<u64>,
    /// The last fetch failed; what is shown may be behind the ledger.
    pub stale: bool,
    /// A write is in flight; actions are disabled until it settles.
    pub busy: bool,
    pub can_start: bool,
    pub allowed_moves: Vec<Direction>,
    pub can_acquire_protection: bool,
    pub can_end_and_claim: bool,
    pub status: String,
    pub errors: Vec<String>,
}

pub struct GameClient<F, D, H, N> {
    config: AppConfig,
    player: PlayerId,
    fetcher: Arc<F>,
    reconciler: Reconciler,
    sequencer: WriteSequencer<D, H>,
    headroom: Arc<H>,
    sink: N,
    tasks: FuturesUnordered<LocalBoxFuture<'static, LoopTask>>,
    // Inference hint that outlives the pending slot: a just-settled claim must
    // still suppress the hazard-fatal rule on its own follow-up refetches.
    // Held for the number of fetches scheduled by the settlement.
    settled_hint: Option<(WriteKind, u8)>,
    cached_headroom: Option<u64>,
    status: String,
    errors: Vec<String>,
}

impl<F, D, H, N> GameClient<F, D, H, N>
where
    F: SnapshotFetcher + 'static,
    D: WriteDispatcher + 'static,
    H: HeadroomFetcher + 'static,
    N: NotificationSink,
{
    pub fn new(
        fetcher: Arc<F>,
        dispatcher: Arc<D>,
        headroom: Arc<H>,
        sink: N,
        player: PlayerId,
        config: AppConfig,
    ) -> Self {
        let reconciler = Reconciler::new(config.map_size, config.absent_confirmations);
        let sequencer =
            WriteSequencer::new(dispatcher, headroom.clone(), player.clone(), &config);
        Self {
            config,
            player,
            fetcher,
            reconciler,
            sequencer,
            headroom,
            sink,
            tasks: FuturesUnordered::new(),
            settled_hint: None,
            cached_headroom: None,
            status: String::from("Ready"),
            errors: Vec::new(),
        }
    }

    pub fn sink(&self) -> &N {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut N {
        &mut self.sink
    }

    /// Drives the client until shutdown: periodic polling, task completions,
    /// and user commands, all on one cooperative loop.
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) -> Result<()> {
        info!(player = %self.player, "starting game client loop");
        self.request_refetch();
        self.refresh_headroom();
        let mut ticker = time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.should_poll() {
                        self.request_refetch();
                    }
                }
                Some(task) = self.tasks.next() => {
                    self.handle_task(task);
                }
                maybe_cmd = commands.recv() => {
                    let Some(cmd) = maybe_cmd else {
                        break;
                    };
                    if matches!(cmd, Command::Shutdown) {
                        break;
                    }
                    self.dispatch(cmd);
                }
            }
        }
        Ok(())
    }

    /// Drains the in-flight task set to quiescence. With zero configured
    /// delays this is fully deterministic, which the integration tests rely
    /// on.
    pub async fn run_until_idle(&mut self) {
        while let Some(task) = self.tasks.next().await {
            self.handle_task(task);
        }
    }

    /// Polling runs only while a run is active and nothing is in flight, to
    /// avoid racing unsettled writes and to bound background read load.
    pub fn should_poll(&self) -> bool {
        self.sequencer.is_idle()
            && self
                .reconciler
                .current()
                .map(|snapshot| snapshot.active)
                .unwrap_or(false)
    }

    /// Kicks off one authoritative read unless a fetch is already
    /// outstanding, in which case the request is dropped, not queued.
    pub fn request_refetch(&mut self) {
        if !self.reconciler.begin_fetch() {
            return;
        }
        let fetcher = self.fetcher.clone();
        let player = self.player.clone();
        self.tasks.push(
            async move { LoopTask::FetchDone(fetcher.fetch_game(&player).await) }.boxed_local(),
        );
    }

    fn refresh_headroom(&mut self) {
        let headroom = self.headroom.clone();
        let player = self.player.clone();
        self.tasks.push(
            async move {
                LoopTask::HeadroomRead(headroom.fetch_authorization_headroom(&player).await)
            }
            .boxed_local(),
        );
    }

    fn schedule_refetch(&mut self, delay: Duration) {
        self.tasks.push(
            async move {
                time::sleep(delay).await;
                LoopTask::RefetchDue
            }
            .boxed_local(),
        );
    }

    fn handle_task(&mut self, task: LoopTask) {
        match task {
            LoopTask::FetchDone(outcome) => {
                let hint = self
                    .sequencer
                    .active_kind()
                    .or(self.settled_hint.map(|(kind, _)| kind));
                let events = self.reconciler.complete_fetch(outcome, hint);
                if let Some((kind, remaining)) = self.settled_hint.take()
                    && remaining > 1
                {
                    self.settled_hint = Some((kind, remaining - 1));
                }
                if events.is_empty() {
                    return;
                }
                let expires_at = Instant::now() + self.config.event_ttl;
                for kind in events {
                    self.sink.notify(InferredEvent { kind, expires_at });
                }
            }
            LoopTask::WriteSettled(outcome) => self.handle_settlement(outcome),
            LoopTask::RefetchDue => self.request_refetch(),
            LoopTask::HeadroomRead(Ok(value)) => {
                self.cached_headroom = Some(value);
            }
            LoopTask::HeadroomRead(Err(err)) => {
                warn!(%err, "headroom read failed; keeping cached value");
            }
        }
    }

    fn handle_settlement(&mut self, outcome: SequencedOutcome) {
        self.sequencer.observe_settlement(&outcome);
        match &outcome.result {
            Ok(()) => {
                info!(kind = ?outcome.kind, reference = ?outcome.reference, "write settled");
                self.status = format!("{:?} settled", outcome.kind);
                self.settled_hint = Some((outcome.kind, 2));
                // One refetch after propagation, and a second to defend
                // against read-after-write visibility lag.
                self.schedule_refetch(self.config.settlement_refetch_delay);
                self.schedule_refetch(self.config.second_refetch_delay);
                self.refresh_headroom();
            }
            Err(failure) => {
                self.push_error(format!("{:?} failed: {failure}", outcome.kind));
                self.status = format!("{:?} failed", outcome.kind);
                if failure.may_have_ledger_effects() {
                    self.schedule_refetch(self.config.settlement_refetch_delay);
                }
                self.refresh_headroom();
            }
        }
    }

    pub fn dispatch(&mut self, cmd: Command) {
        match cmd {
            Command::StartRun => self.on_start_run(),
            Command::Move(direction) => self.on_move(direction),
            Command::AcquireProtection => self.on_acquire_protection(),
            Command::EndAndClaim => self.on_end_and_claim(),
            Command::RaiseAuthorization => self.on_raise_authorization(),
            Command::Refetch => self.request_refetch(),
            Command::Shutdown => {}
        }
    }

    pub fn on_start_run(&mut self) {
        if !self.can_start() {
            self.status = String::from("Cannot start a run right now");
            return;
        }
        // A new run invalidates every diff baseline of the old one.
        self.reconciler.clear_baseline();
        self.sequencer.supersede();
        self.settled_hint = None;
        self.begin_write(WriteRequest::StartRun, self.config.entry_fee);
    }

    pub fn on_move(&mut self, direction: Direction) {
        if !self.can_move(direction) {
            self.status = format!("Cannot move {direction:?}");
            return;
        }
        self.begin_write(
            WriteRequest::PerformMove { direction },
            self.config.move_fee,
        );
    }

    pub fn on_acquire_protection(&mut self) {
        if !self.can_acquire_protection() {
            self.status = String::from("Cannot acquire protection right now");
            return;
        }
        self.begin_write(WriteRequest::AcquireProtection, self.config.protection_cost);
    }

    pub fn on_end_and_claim(&mut self) {
        if !self.can_end_and_claim() {
            self.status = String::from("Nothing to claim");
            return;
        }
        // The claim kind is what excludes hazard-fatal when the reward drops
        // to zero as the claim's intended effect.
        self.begin_write(WriteRequest::EndAndClaim, 0);
    }

    pub fn on_raise_authorization(&mut self) {
        if !self.sequencer.is_idle() {
            self.status = String::from("A write is already in flight");
            return;
        }
        let amount = self
            .config
            .entry_fee
            .saturating_mul(self.config.auth_raise_multiplier);
        self.begin_write(WriteRequest::RaiseAuthorization { amount }, 0);
    }

    fn begin_write(&mut self, request: WriteRequest, required_authorization: u64) {
        let kind = request.kind();
        match self.sequencer.begin(request, required_authorization) {
            Ok(future) => {
                self.status = format!("Submitting {kind:?}...");
                self.tasks
                    .push(async move { LoopTask::WriteSettled(future.await) }.boxed_local());
            }
            Err(in_flight) => {
                self.push_error(in_flight.to_string());
            }
        }
    }

    pub fn can_start(&self) -> bool {
        self.sequencer.is_idle()
            && self
                .reconciler
                .current()
                .map(|snapshot| !snapshot.active)
                .unwrap_or(true)
    }

    pub fn can_move(&self, direction: Direction) -> bool {
        self.sequencer.is_idle()
            && self
                .reconciler
                .current()
                .map(|snapshot| {
                    snapshot.active
                        && snapshot
                            .current_position
                            .step(direction, self.config.map_size)
                            .is_some()
                })
                .unwrap_or(false)
    }

    pub fn can_acquire_protection(&self) -> bool {
        self.sequencer.is_idle()
            && self
                .reconciler
                .current()
                .map(|snapshot| snapshot.active && !snapshot.has_protection)
                .unwrap_or(false)
    }

    pub fn can_end_and_claim(&self) -> bool {
        self.sequencer.is_idle()
            && self
                .reconciler
                .current()
                .map(|snapshot| snapshot.active && snapshot.pending_reward > 0)
                .unwrap_or(false)
    }

    pub fn view(&self) -> ViewState {
        let state = self.reconciler.state();
        let allowed_moves = [
            Direction::Up,
            Direction::Down,
            Direction::Left,
            Direction::Right,
        ]
        .into_iter()
        .filter(|direction| self.can_move(*direction))
        .collect();
        ViewState {
            game: state.current.clone(),
            headroom: self.cached_headroom,
            stale: state.last_fetch_failed,
            busy: !self.sequencer.is_idle(),
            can_start: self.can_start(),
            allowed_moves,
            can_acquire_protection: self.can_acquire_protection(),
            can_end_and_claim: self.can_end_and_claim(),
            status: self.status.clone(),
            errors: self.errors.iter().rev().take(5).cloned().collect(),
        }
    }

    fn push_error(&mut self, message: String) {
        error!("{}", message);
        self.errors.push(message);
        if self.errors.len() > MAX_KEPT_ERRORS {
            let drain = self.errors.len() - MAX_KEPT_ERRORS;
            self.errors.drain(0..drain);
        }
    }
}
