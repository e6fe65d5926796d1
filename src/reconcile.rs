use crate::{
    infer::{
        EventKind,
        infer_events,
    },
    ledger::{
        FetchError,
        WriteKind,
    },
    snapshot::{
        RawGameRecord,
        Snapshot,
        check_succession,
    },
};
use tracing::{
    debug,
    error,
    warn,
};

/// The authoritative local snapshot plus fetch bookkeeping. `previous` exists
/// only for diffing, never for rendering.
#[derive(Clone, Debug, Default)]
pub struct ReconciliationState {
    pub current: Option<Snapshot>,
    pub previous: Option<Snapshot>,
    pub is_fetching: bool,
    pub last_fetch_failed: bool,
}

/// Owns `ReconciliationState`; every mutation of it happens inside this type,
/// in reaction to one fetch completion at a time.
pub struct Reconciler {
    state: ReconciliationState,
    map_size: u8,
    absent_confirmations: u8,
    absent_streak: u8,
    // Set when a new-run write is dispatched; the next accepted record belongs
    // to the new run and must not be diffed against the old one.
    run_boundary: bool,
}

impl Reconciler {
    pub fn new(map_size: u8, absent_confirmations: u8) -> Self {
        Self {
            state: ReconciliationState::default(),
            map_size,
            absent_confirmations,
            absent_streak: 0,
            run_boundary: false,
        }
    }

    pub fn state(&self) -> &ReconciliationState {
        &self.state
    }

    pub fn current(&self) -> Option<&Snapshot> {
        self.state.current.as_ref()
    }

    /// Takes the fetch lock. Returns `false` when a fetch is already
    /// outstanding; such a request is dropped, not queued.
    pub fn begin_fetch(&mut self) -> bool {
        if self.state.is_fetching {
            debug!("refetch requested while a fetch is outstanding; dropping");
            return false;
        }
        self.state.is_fetching = true;
        true
    }

    /// Folds one fetch result into the state and returns the events inferred
    /// from the accepted transition, if any. Releases the fetch lock.
    pub fn complete_fetch(
        &mut self,
        outcome: Result<Option<RawGameRecord>, FetchError>,
        active_write: Option<WriteKind>,
    ) -> Vec<EventKind> {
        self.state.is_fetching = false;
        match outcome {
            Err(err) => {
                // Never null out an existing snapshot on a transient failure.
                warn!(%err, "game fetch failed; keeping last good snapshot");
                self.state.last_fetch_failed = true;
                Vec::new()
            }
            Ok(None) => {
                self.state.last_fetch_failed = false;
                self.handle_absent(active_write);
                Vec::new()
            }
            Ok(Some(raw)) => self.accept_record(&raw, active_write),
        }
    }

    /// Absent reads while a record is held are suspect: right after starting a
    /// run, a lagging node can briefly serve emptiness. Only repeated absence
    /// with no write in flight is believed.
    fn handle_absent(&mut self, active_write: Option<WriteKind>) {
        if self.state.current.is_none() {
            return;
        }
        if active_write.is_some() {
            self.absent_streak = 0;
            debug!("absent read during in-flight write; keeping snapshot");
            return;
        }
        self.absent_streak = self.absent_streak.saturating_add(1);
        if self.absent_streak >= self.absent_confirmations {
            debug!(
                confirmations = self.absent_streak,
                "record absence confirmed; clearing snapshot"
            );
            self.state.current = None;
            self.state.previous = None;
            self.absent_streak = 0;
        }
    }

    fn accept_record(
        &mut self,
        raw: &RawGameRecord,
        active_write: Option<WriteKind>,
    ) -> Vec<EventKind> {
        let snapshot = match Snapshot::try_from_raw(raw, self.map_size) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                error!(%err, "malformed game record; discarding read");
                return Vec::new();
            }
        };

        if self.run_boundary {
            // First record of the new run: no baseline, no succession check
            // against the run that ended.
            self.run_boundary = false;
            self.absent_streak = 0;
            self.state.last_fetch_failed = false;
            self.state.previous = None;
            self.state.current = Some(snapshot);
            return Vec::new();
        }

        if let Some(current) = &self.state.current
            && let Err(violation) = check_succession(current, &snapshot)
        {
            error!(%violation, "snapshot violates run monotonicity; discarding read");
            return Vec::new();
        }

        self.absent_streak = 0;
        self.state.last_fetch_failed = false;
        if let Some(current) = self.state.current.take() {
            self.state.previous = Some(current);
        }
        self.state.current = Some(snapshot);
        infer_events(
            self.state.previous.as_ref(),
            self.state.current.as_ref().expect("just set"),
            active_write,
        )
    }

    /// Drops the diff baseline so residual events from an ended run cannot
    /// leak into a new one. Called when a new-run write is dispatched.
    pub fn clear_baseline(&mut self) {
        self.state.previous = None;
        self.absent_streak = 0;
        self.run_boundary = true;
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]

    use super::*;
    use crate::config::AppConfig;

    fn reconciler() -> Reconciler {
        let config = AppConfig::default();
        Reconciler::new(config.map_size, config.absent_confirmations)
    }

    fn record(active: bool, pending_reward: u64, move_count: u64) -> RawGameRecord {
        RawGameRecord {
            current_position: [2, 2],
            start_position: [0, 0],
            end_position: [7, 7],
            pending_reward,
            active,
            has_protection: false,
            protection_was_purchased: false,
            move_count,
        }
    }

    #[test]
    fn begin_fetch__twice_in_succession__second_is_dropped() {
        // given
        let mut reconciler = reconciler();

        // when / then
        assert!(reconciler.begin_fetch());
        assert!(!reconciler.begin_fetch());

        // and the lock is released by completion
        reconciler.complete_fetch(Ok(None), None);
        assert!(reconciler.begin_fetch());
    }

    #[test]
    fn complete_fetch__transient_error__keeps_snapshot_and_flags_stale() {
        // given
        let mut reconciler = reconciler();
        reconciler.begin_fetch();
        reconciler.complete_fetch(Ok(Some(record(true, 10, 1))), None);

        // when
        reconciler.begin_fetch();
        let events =
            reconciler.complete_fetch(Err(FetchError("node unreachable".into())), None);

        // then
        assert!(events.is_empty());
        assert!(reconciler.state().current.is_some());
        assert!(reconciler.state().last_fetch_failed);
        assert!(!reconciler.state().is_fetching);
    }

    #[test]
    fn complete_fetch__single_absent_read__keeps_snapshot() {
        // given
        let mut reconciler = reconciler();
        reconciler.begin_fetch();
        reconciler.complete_fetch(Ok(Some(record(true, 10, 1))), None);

        // when
        reconciler.begin_fetch();
        reconciler.complete_fetch(Ok(None), None);

        // then
        assert!(reconciler.state().current.is_some());
    }

    #[test]
    fn complete_fetch__absence_confirmed_twice__clears_snapshot() {
        // given
        let mut reconciler = reconciler();
        reconciler.begin_fetch();
        reconciler.complete_fetch(Ok(Some(record(true, 10, 1))), None);

        // when
        for _ in 0..2 {
            reconciler.begin_fetch();
            reconciler.complete_fetch(Ok(None), None);
        }

        // then
        assert!(reconciler.state().current.is_none());
        assert!(reconciler.state().previous.is_none());
    }

    #[test]
    fn complete_fetch__absent_reads_during_pending_write__never_clear() {
        // given
        let mut reconciler = reconciler();
        reconciler.begin_fetch();
        reconciler.complete_fetch(Ok(Some(record(true, 10, 1))), None);

        // when: arbitrarily many absents while a write is in flight
        for _ in 0..5 {
            reconciler.begin_fetch();
            reconciler.complete_fetch(Ok(None), Some(WriteKind::StartRun));
        }

        // then
        assert!(reconciler.state().current.is_some());
    }

    #[test]
    fn complete_fetch__present_read_resets_absent_streak() {
        // given: one absent, then a present read
        let mut reconciler = reconciler();
        reconciler.begin_fetch();
        reconciler.complete_fetch(Ok(Some(record(true, 10, 1))), None);
        reconciler.begin_fetch();
        reconciler.complete_fetch(Ok(None), None);
        reconciler.begin_fetch();
        reconciler.complete_fetch(Ok(Some(record(true, 10, 2))), None);

        // when: a single further absent
        reconciler.begin_fetch();
        reconciler.complete_fetch(Ok(None), None);

        // then: still not cleared
        assert!(reconciler.state().current.is_some());
    }

    #[test]
    fn complete_fetch__absent_with_no_prior_record__stays_empty() {
        let mut reconciler = reconciler();
        reconciler.begin_fetch();
        let events = reconciler.complete_fetch(Ok(None), None);

        assert!(events.is_empty());
        assert!(reconciler.state().current.is_none());
    }

    #[test]
    fn complete_fetch__accepted_record__rotates_previous_and_diffs() {
        // given
        let mut reconciler = reconciler();
        reconciler.begin_fetch();
        reconciler.complete_fetch(Ok(Some(record(true, 50, 3))), None);

        // when: the run ends with its reward zeroed and no claim in flight
        reconciler.begin_fetch();
        let events = reconciler.complete_fetch(Ok(Some(record(false, 0, 4))), None);

        // then
        assert_eq!(events, vec![EventKind::HazardFatal]);
        assert_eq!(reconciler.state().previous.as_ref().unwrap().move_count, 3);
        assert_eq!(reconciler.state().current.as_ref().unwrap().move_count, 4);
    }

    #[test]
    fn complete_fetch__first_snapshot_ever__no_events() {
        let mut reconciler = reconciler();
        reconciler.begin_fetch();
        let events = reconciler.complete_fetch(Ok(Some(record(false, 0, 9))), None);

        assert!(events.is_empty());
        assert!(reconciler.state().previous.is_none());
    }

    #[test]
    fn complete_fetch__monotonicity_violation__discards_read() {
        // given
        let mut reconciler = reconciler();
        reconciler.begin_fetch();
        reconciler.complete_fetch(Ok(Some(record(true, 10, 5))), None);

        // when: move count decreased while the run stayed active
        reconciler.begin_fetch();
        let events = reconciler.complete_fetch(Ok(Some(record(true, 10, 3))), None);

        // then: offending snapshot never reconciled
        assert!(events.is_empty());
        assert_eq!(reconciler.state().current.as_ref().unwrap().move_count, 5);
    }

    #[test]
    fn complete_fetch__out_of_bounds_record__discards_read() {
        // given
        let mut reconciler = reconciler();
        reconciler.begin_fetch();
        reconciler.complete_fetch(Ok(Some(record(true, 10, 1))), None);

        // when
        let mut bad = record(true, 10, 2);
        bad.current_position = [40, 2];
        reconciler.begin_fetch();
        let events = reconciler.complete_fetch(Ok(Some(bad)), None);

        // then
        assert!(events.is_empty());
        assert_eq!(reconciler.state().current.as_ref().unwrap().move_count, 1);
    }

    #[test]
    fn clear_baseline__after_run_start__first_diff_produces_no_events() {
        // given: a stale snapshot from the old run, still showing activity
        let mut reconciler = reconciler();
        reconciler.begin_fetch();
        reconciler.complete_fetch(Ok(Some(record(true, 75, 6))), None);

        // when: a new run is dispatched and its first snapshot arrives with a
        // legitimately reset move count
        reconciler.clear_baseline();
        reconciler.begin_fetch();
        let events =
            reconciler.complete_fetch(Ok(Some(record(true, 0, 0))), Some(WriteKind::StartRun));

        // then: accepted, no residual events, no false monotonicity violation
        assert!(events.is_empty());
        assert!(reconciler.state().previous.is_none());
        assert_eq!(reconciler.state().current.as_ref().unwrap().move_count, 0);
    }
}
