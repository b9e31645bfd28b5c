use chrono::NaiveDateTime;
use tokio::sync::oneshot;
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability::RESERVATION_TRANSITIONS_TOTAL;
use crate::seed::SeedFile;

use super::availability::{first_free_table, resolve_capacity};
use super::conflict::*;
use super::{Engine, EngineError, WalCommand};

/// What a seed file added to the store.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SeedSummary {
    pub areas: usize,
    pub tables: usize,
}

impl Engine {
    // ── Venue provisioning ───────────────────────────────────

    pub async fn create_area(&self, id: &str, name: &str, max_tables: u32) -> Result<Area, EngineError> {
        let id = id.trim().to_lowercase();
        validate_id(&id)?;
        let name = name.trim();
        if name.is_empty() {
            return Err(EngineError::InvalidInput("area name is empty".into()));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("area name too long"));
        }
        if max_tables == 0 {
            return Err(EngineError::InvalidInput("maxTables must be positive".into()));
        }
        if max_tables > MAX_TABLES_PER_AREA {
            return Err(EngineError::LimitExceeded("maxTables too large"));
        }

        let _guard = self.lock_area(&id).await;
        if self.store.find_area(&id).is_some() {
            return Err(EngineError::AlreadyExists(id));
        }
        if self.store.list_areas().len() >= MAX_AREAS {
            return Err(EngineError::LimitExceeded("too many areas"));
        }

        let area = Area {
            id,
            name: name.to_string(),
            max_tables,
        };
        self.persist_and_apply(Event::AreaCreated { area: area.clone() }).await?;
        info!("area {} created (max {} tables)", area.id, area.max_tables);
        Ok(area)
    }

    /// Add a table to an area, enforcing the area's cap and the fixed VIP sub-cap.
    pub async fn add_table(&self, req: TableRequest) -> Result<Table, EngineError> {
        let area_id = req.area_id.trim().to_lowercase();
        let area = self
            .store
            .find_area(&area_id)
            .ok_or_else(|| EngineError::AreaNotFound(req.area_id.clone()))?;

        let _guard = self.lock_area(&area.id).await;
        let in_area = self.store.list_tables(&TableFilter::area(&area.id)).len();
        if in_area >= area.max_tables as usize {
            return Err(EngineError::AreaTableLimitReached {
                area_id: area.id,
                limit: area.max_tables as usize,
            });
        }

        let kind = req.kind.trim();
        let capacity = match req.capacity {
            Some(c) if c > 0 && !kind.is_empty() => c,
            _ => {
                return Err(EngineError::InvalidInput(
                    "table needs a type and a positive numeric capacity".into(),
                ));
            }
        };
        if capacity > MAX_TABLE_CAPACITY {
            return Err(EngineError::LimitExceeded("table capacity too large"));
        }
        if kind.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("table type too long"));
        }
        if area.id == VIP_AREA_ID && in_area >= VIP_MAX_TABLES {
            return Err(EngineError::AreaTableLimitReached {
                area_id: area.id,
                limit: VIP_MAX_TABLES,
            });
        }

        let id = req.id.unwrap_or_else(|| format!("{}_{}", area.id, Ulid::new()));
        validate_id(&id)?;
        let _claim = self.claim_table_id(&id)?;

        let table = Table {
            id,
            kind: kind.to_string(),
            capacity,
            area_id: area.id,
        };
        self.persist_and_apply(Event::TableAdded { table: table.clone() }).await?;
        debug!("table {} (cap {}) added to {}", table.id, table.capacity, table.area_id);
        Ok(table)
    }

    /// Create any seed areas and tables that are not in the store yet.
    pub async fn apply_seed(&self, seed: &SeedFile) -> Result<SeedSummary, EngineError> {
        let mut summary = SeedSummary::default();
        for area in &seed.areas {
            let area_id = area.id.trim().to_lowercase();
            if self.store.find_area(&area_id).is_none() {
                self.create_area(&area_id, &area.name, area.max_tables).await?;
                summary.areas += 1;
            }
            for table in &area.tables {
                if self.store.find_table(&table.id).is_some() {
                    continue;
                }
                self.add_table(TableRequest {
                    id: Some(table.id.clone()),
                    area_id: area_id.clone(),
                    kind: table.kind.clone(),
                    capacity: Some(table.capacity),
                })
                .await?;
                summary.tables += 1;
            }
        }
        Ok(summary)
    }

    // ── Reservations ─────────────────────────────────────────

    /// Create a pending reservation in the first candidate area that has a
    /// table big enough for the party. No table is bound and no time overlap
    /// is checked here.
    pub async fn create_reservation(&self, req: ReservationRequest) -> Result<Reservation, EngineError> {
        self.create_reservation_at(req, now_local()).await
    }

    /// [`Engine::create_reservation`] against an explicit wall-clock "now".
    pub async fn create_reservation_at(
        &self,
        req: ReservationRequest,
        now: NaiveDateTime,
    ) -> Result<Reservation, EngineError> {
        let party_size = parse_count("partySize", req.party_size.as_deref())?;
        let (name, date, start_time, party_size) = match (
            non_blank(req.name),
            non_blank(req.date),
            non_blank(req.start_time),
            party_size,
        ) {
            (Some(name), Some(date), Some(start_time), Some(party_size)) => (name, date, start_time, party_size),
            (name, date, start_time, party_size) => {
                return Err(missing_fields(&[
                    ("name", name.is_some()),
                    ("date", date.is_some()),
                    ("startTime", start_time.is_some()),
                    ("partySize", party_size.is_some()),
                ]));
            }
        };

        let date = parse_date(&date)?;
        let start_time = parse_time(&start_time)?;
        check_not_past(date, start_time, now)?;

        if name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("name too long"));
        }
        let notes = req.notes.unwrap_or_default();
        if notes.len() > MAX_NOTES_LEN {
            return Err(EngineError::LimitExceeded("notes too long"));
        }
        validate_party_size(party_size)?;
        let duration = validate_duration(req.duration)?;

        let id = req.id.unwrap_or_else(|| format!("r{}", Ulid::new()));
        validate_id(&id)?;
        let _claim = self.claim_reservation_id(&id)?;

        let mut assigned = None;
        for area in self.candidate_areas(req.area_preference.as_deref())? {
            let tables = self.store.list_tables(&TableFilter::area(&area.id));
            if let Some(capacity) = resolve_capacity(party_size, &tables) {
                assigned = Some((area, capacity));
                break;
            }
        }
        let (area, capacity) = assigned.ok_or(EngineError::NoSuitableTable { party_size })?;

        let reservation = Reservation {
            id,
            name,
            date,
            start_time,
            duration,
            party_size,
            area_id: area.id,
            table_id: None,
            status: ReservationStatus::Pending,
            notes,
        };
        self.persist_and_apply(Event::ReservationCreated {
            reservation: reservation.clone(),
        })
        .await?;
        debug!(
            "reservation {} pending in {} (capacity class {capacity})",
            reservation.id, reservation.area_id
        );
        metrics::counter!(RESERVATION_TRANSITIONS_TOTAL, "status" => "pending").increment(1);
        Ok(reservation)
    }

    /// Bind a pending reservation to the first table of its area, in storage
    /// order, that seats the party and is free for its window.
    ///
    /// Confirming an already-confirmed reservation returns it unchanged.
    pub async fn confirm_reservation(&self, id: &str) -> Result<Reservation, EngineError> {
        let area_id = self.reservation(id)?.area_id;
        let _guard = self.lock_area(&area_id).await;

        // Re-read under the lock: a cancel may have landed while we waited.
        let current = self.reservation(id)?;
        match current.status {
            ReservationStatus::Cancelled => return Err(EngineError::AlreadyCancelled(current.id)),
            ReservationStatus::Confirmed => return Ok(current),
            ReservationStatus::Pending => {}
        }

        let tables = self.store.list_tables(&TableFilter {
            area_id: Some(current.area_id.clone()),
            min_capacity: Some(current.party_size),
        });
        let booked = self.store.list_reservations(&ReservationFilter {
            date: Some(current.date),
            status: Some(ReservationStatus::Confirmed),
            ..Default::default()
        });
        let Some(table) = first_free_table(&tables, current.party_size, &current.slot(), &booked, Some(id))
        else {
            debug!(
                "no free table for {} ({} tables considered in {})",
                current.id,
                tables.len(),
                current.area_id
            );
            metrics::counter!(RESERVATION_TRANSITIONS_TOTAL, "status" => "conflict").increment(1);
            return Err(EngineError::NoAvailableTable(current.id));
        };

        let event = Event::ReservationConfirmed {
            id: current.id.clone(),
            table_id: table.id.clone(),
        };
        self.persist_and_apply(event).await?;
        metrics::counter!(RESERVATION_TRANSITIONS_TOTAL, "status" => "confirmed").increment(1);
        info!("reservation {} confirmed on table {}", current.id, table.id);
        self.reservation(id)
    }

    /// Cancel a pending or confirmed reservation, releasing its table.
    /// Cancelling twice is a no-op.
    pub async fn cancel_reservation(&self, id: &str) -> Result<Reservation, EngineError> {
        let area_id = self.reservation(id)?.area_id;
        let _guard = self.lock_area(&area_id).await;

        let current = self.reservation(id)?;
        if current.status == ReservationStatus::Cancelled {
            return Ok(current);
        }

        self.persist_and_apply(Event::ReservationCancelled { id: current.id.clone() })
            .await?;
        metrics::counter!(RESERVATION_TRANSITIONS_TOTAL, "status" => "cancelled").increment(1);
        info!("reservation {} cancelled", current.id);
        self.reservation(id)
    }

    /// Move a reservation to `status`. Only forward transitions are legal;
    /// re-applying the current status is a no-op.
    pub async fn update_status(&self, id: &str, status: ReservationStatus) -> Result<Reservation, EngineError> {
        match status {
            ReservationStatus::Confirmed => self.confirm_reservation(id).await,
            ReservationStatus::Cancelled => self.cancel_reservation(id).await,
            ReservationStatus::Pending => {
                let current = self.reservation(id)?;
                match current.status {
                    ReservationStatus::Pending => Ok(current),
                    from => Err(EngineError::InvalidTransition {
                        id: current.id,
                        from,
                        to: status,
                    }),
                }
            }
        }
    }

    fn reservation(&self, id: &str) -> Result<Reservation, EngineError> {
        self.store
            .find_reservation(id)
            .ok_or_else(|| EngineError::ReservationNotFound(id.to_string()))
    }

    // ── WAL maintenance ──────────────────────────────────────

    /// Rewrite the WAL with only the events needed to recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.commit_gate.write().await;

        let mut events = Vec::new();
        for area in self.store.list_areas() {
            events.push(Event::AreaCreated { area });
        }
        for table in self.store.list_tables(&TableFilter::default()) {
            events.push(Event::TableAdded { table });
        }
        for reservation in self.store.list_reservations(&ReservationFilter::default()) {
            events.push(Event::ReservationCreated { reservation });
        }
        let count = events.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        debug!("WAL compacted to {count} events");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
