use crate::model::*;

use super::conflict::find_conflict;

// ── Table selection ───────────────────────────────────────────────

/// Best fit: the smallest capacity among `tables` that still seats
/// `party_size`, or `None` when no table is big enough.
///
/// Commits to a capacity class only. Existing reservations are not
/// consulted; this answers "is there a table big enough", not "is one free".
pub fn resolve_capacity(party_size: u32, tables: &[Table]) -> Option<u32> {
    tables
        .iter()
        .map(|t| t.capacity)
        .filter(|&c| c >= party_size)
        .min()
}

/// First fit: walk `tables` in the given order and return the first one that
/// seats the party and has no confirmed reservation in `booked` colliding
/// with `slot`.
pub fn first_free_table<'a>(
    tables: &'a [Table],
    party_size: u32,
    slot: &Slot,
    booked: &[Reservation],
    exclude: Option<&str>,
) -> Option<&'a Table> {
    tables
        .iter()
        .filter(|t| t.capacity >= party_size)
        .find(|t| find_conflict(booked, &t.id, slot, exclude).is_none())
}
