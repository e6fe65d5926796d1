use crate::{
    ledger::WriteKind,
    snapshot::Snapshot,
};
use std::time::Instant;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum EventKind {
    HazardFatal,
    HazardDeflected,
}

/// A domain event derived from two consecutive reconciled snapshots. Consumed
/// once by the notification sink and self-expiring.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct InferredEvent {
    pub kind: EventKind,
    pub expires_at: Instant,
}

struct DiffContext<'a> {
    previous: &'a Snapshot,
    current: &'a Snapshot,
    active_write: Option<WriteKind>,
}

struct DiffRule {
    kind: EventKind,
    applies: fn(&DiffContext<'_>) -> bool,
}

/// A run can only end with its pending reward zeroed through an unrecoverable
/// hazard. An explicit claim also zeroes the reward while ending the run, so a
/// claim in flight excludes the rule.
fn hazard_fatal(ctx: &DiffContext<'_>) -> bool {
    ctx.previous.active
        && !ctx.current.active
        && ctx.current.pending_reward == 0
        && ctx.previous.pending_reward > 0
        && ctx.active_write != Some(WriteKind::EndAndClaim)
}

/// Protection is consumed exactly once, silently, when a hazard hits while
/// protected. The run continuing (or the triggering write being a move)
/// distinguishes consumption from other ways of losing protection.
fn hazard_deflected(ctx: &DiffContext<'_>) -> bool {
    ctx.previous.has_protection
        && !ctx.current.has_protection
        && ctx.current.protection_was_purchased
        && (ctx.current.active || ctx.active_write == Some(WriteKind::PerformMove))
}

const DIFF_RULES: &[DiffRule] = &[
    DiffRule {
        kind: EventKind::HazardFatal,
        applies: hazard_fatal,
    },
    DiffRule {
        kind: EventKind::HazardDeflected,
        applies: hazard_deflected,
    },
];

/// Diffs the two most recently reconciled snapshots into zero or more domain
/// events. Pure: identical inputs always yield the identical event set.
///
/// With no `previous` there is no baseline to diff against, so nothing is
/// inferred; a dropped poll merely delays detection, it never misattributes it.
pub fn infer_events(
    previous: Option<&Snapshot>,
    current: &Snapshot,
    active_write: Option<WriteKind>,
) -> Vec<EventKind> {
    let Some(previous) = previous else {
        return Vec::new();
    };
    let ctx = DiffContext {
        previous,
        current,
        active_write,
    };
    DIFF_RULES
        .iter()
        .filter(|rule| (rule.applies)(&ctx))
        .map(|rule| rule.kind)
        .collect()
}
