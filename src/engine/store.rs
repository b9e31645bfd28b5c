use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use crate::model::*;

/// Persistence contract the engine runs against.
///
/// Listings come back in natural storage (insertion) order; the engine's
/// area fallback and first-fit table search depend on it. Implementations
/// only filter by plain field equality; overlap checks stay in the engine.
pub trait ReservationStore: Send + Sync {
    fn list_areas(&self) -> Vec<Area>;
    fn find_area(&self, id: &str) -> Option<Area>;
    fn insert_area(&self, area: Area) -> Area;

    fn list_tables(&self, filter: &TableFilter) -> Vec<Table>;
    fn find_table(&self, id: &str) -> Option<Table>;
    fn insert_table(&self, table: Table) -> Table;

    fn list_reservations(&self, filter: &ReservationFilter) -> Vec<Reservation>;
    fn find_reservation(&self, id: &str) -> Option<Reservation>;
    fn insert_reservation(&self, reservation: Reservation) -> Reservation;
    fn update_reservation(&self, id: &str, patch: &ReservationPatch) -> Option<Reservation>;
}

struct Stored<T> {
    seq: u64,
    value: T,
}

pub struct InMemoryStore {
    seq: AtomicU64,
    areas: DashMap<String, Stored<Area>>,
    tables: DashMap<String, Stored<Table>>,
    reservations: DashMap<String, Stored<Reservation>>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            seq: AtomicU64::new(0),
            areas: DashMap::new(),
            tables: DashMap::new(),
            reservations: DashMap::new(),
        }
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    /// Insert or replace. A replaced record keeps its original position.
    fn upsert<T: Clone>(&self, map: &DashMap<String, Stored<T>>, id: &str, value: T) -> T {
        map.entry(id.to_string())
            .and_modify(|stored| stored.value = value.clone())
            .or_insert_with(|| Stored {
                seq: self.next_seq(),
                value: value.clone(),
            });
        value
    }
}

/// Snapshot the rows matching `keep`, in insertion order.
fn ordered<T: Clone>(map: &DashMap<String, Stored<T>>, keep: impl Fn(&T) -> bool) -> Vec<T> {
    let mut rows: Vec<(u64, T)> = map
        .iter()
        .filter(|e| keep(&e.value().value))
        .map(|e| (e.value().seq, e.value().value.clone()))
        .collect();
    rows.sort_by_key(|(seq, _)| *seq);
    rows.into_iter().map(|(_, v)| v).collect()
}

impl ReservationStore for InMemoryStore {
    fn list_areas(&self) -> Vec<Area> {
        ordered(&self.areas, |_| true)
    }

    fn find_area(&self, id: &str) -> Option<Area> {
        self.areas.get(id).map(|e| e.value().value.clone())
    }

    fn insert_area(&self, area: Area) -> Area {
        let id = area.id.clone();
        self.upsert(&self.areas, &id, area)
    }

    fn list_tables(&self, filter: &TableFilter) -> Vec<Table> {
        ordered(&self.tables, |t| filter.matches(t))
    }

    fn find_table(&self, id: &str) -> Option<Table> {
        self.tables.get(id).map(|e| e.value().value.clone())
    }

    fn insert_table(&self, table: Table) -> Table {
        let id = table.id.clone();
        self.upsert(&self.tables, &id, table)
    }

    fn list_reservations(&self, filter: &ReservationFilter) -> Vec<Reservation> {
        ordered(&self.reservations, |r| filter.matches(r))
    }

    fn find_reservation(&self, id: &str) -> Option<Reservation> {
        self.reservations.get(id).map(|e| e.value().value.clone())
    }

    fn insert_reservation(&self, reservation: Reservation) -> Reservation {
        let id = reservation.id.clone();
        self.upsert(&self.reservations, &id, reservation)
    }

    fn update_reservation(&self, id: &str, patch: &ReservationPatch) -> Option<Reservation> {
        self.reservations.get_mut(id).map(|mut e| {
            patch.apply(&mut e.value_mut().value);
            e.value().value.clone()
        })
    }
}
