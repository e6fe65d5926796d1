//! Client-side state reconciliation for an append-only on-ledger
//! grid-exploration game. The ledger is the single source of truth; this
//! crate polls point-in-time snapshots of it, folds them into one local
//! authoritative view, infers gameplay events from snapshot diffs, and
//! sequences writes so at most one is ever in flight.

pub mod client;
pub mod config;
pub mod infer;
pub mod ledger;
pub mod notify;
pub mod reconcile;
pub mod sequencer;
pub mod sim;
pub mod snapshot;

pub use client::{
    Command,
    GameClient,
    ViewState,
};
pub use config::AppConfig;
pub use infer::{
    EventKind,
    InferredEvent,
};
pub use ledger::PlayerId;
pub use notify::{
    NotificationSink,
    TransientNotices,
};
pub use snapshot::{
    Direction,
    Snapshot,
};
