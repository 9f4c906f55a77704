//! Rollback engine
//!
//! When a transaction settles, its provisional entry is removed by replaying
//! the queue from the save point without it. Replay walks entries in original
//! order; the first surviving optimistic entry becomes the new save point and
//! everything from there on is retained for future rollbacks.

use optimist_core::TransactionId;

use crate::ContainerState;

/// Rollback result counters
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RollbackReport {
    /// Entries re-applied to the current value
    pub replayed: u32,
    /// Entries kept in the rebuilt queue
    pub retained: u32,
    /// Entries folded into the new save point and dropped from the queue
    pub folded: u32,
    /// Whether the resolving transaction's entry was found
    pub discarded: bool,
}

/// Rebuild the container without `id`'s provisional entry
pub fn rollback<T: Clone>(state: &ContainerState<T>, id: TransactionId) -> ContainerState<T> {
    rollback_with_report(state, id).0
}

/// Rebuild the container without `id`'s provisional entry, reporting what happened
pub fn rollback_with_report<T: Clone>(
    state: &ContainerState<T>,
    id: TransactionId,
) -> (ContainerState<T>, RollbackReport) {
    let mut report = RollbackReport::default();

    // No open span: the current value is already canonical
    let Some(archive) = state.archive.as_ref() else {
        return (state.clone(), report);
    };

    let mut acc = ContainerState {
        optimistic: false,
        archive: None,
        queue: Vec::with_capacity(state.queue.len()),
        current: archive.clone(),
    };

    for entry in &state.queue {
        // Stage 1: drop the resolving transaction's guess
        if entry.belongs_to(id) {
            report.discarded = true;
            continue;
        }

        // Stage 2: first surviving optimistic entry opens the new span
        if entry.is_optimistic() && acc.archive.is_none() {
            acc.archive = Some(acc.current.clone());
        }

        // Stage 3: retain everything after the save point
        if acc.archive.is_some() {
            acc.queue.push(entry.clone());
            report.retained += 1;
        } else {
            report.folded += 1;
        }

        if entry.is_optimistic() {
            acc.optimistic = true;
        }

        // Stage 4: bring the value up to date
        acc.current = entry.apply(&acc.current);
        report.replayed += 1;
    }

    (acc, report)
}
