mod availability;
mod conflict;
mod error;
mod mutations;
mod queries;
mod store;

pub use availability::{first_free_table, resolve_capacity};
pub use conflict::overlaps;
pub use error::EngineError;
pub use mutations::SeedSummary;
pub use store::{InMemoryStore, ReservationStore};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use tokio::sync::{mpsc, oneshot, Mutex, OwnedMutexGuard, RwLock};

use crate::model::*;
use crate::wal::Wal;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut pending = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                        Ok(other) => {
                            pending = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                commit_batch(&mut wal, &mut batch);
                // Non-append commands observe every append queued before them.
                if let Some(other) = pending {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("WAL flush failed for {} events: {e}", batch.len());
    }
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush, even after an append error, so buffered bytes of a failed
    // batch don't leak into the next one.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

/// Apply an event to the store. No locking here; the caller serializes per area.
fn apply_event(store: &dyn ReservationStore, event: &Event) {
    match event {
        Event::AreaCreated { area } => {
            store.insert_area(area.clone());
        }
        Event::TableAdded { table } => {
            store.insert_table(table.clone());
        }
        Event::ReservationCreated { reservation } => {
            store.insert_reservation(reservation.clone());
        }
        Event::ReservationConfirmed { id, table_id } => {
            store.update_reservation(id, &ReservationPatch::confirm(table_id.clone()));
        }
        Event::ReservationCancelled { id } => {
            store.update_reservation(id, &ReservationPatch::cancel());
        }
    }
}

/// The reservation assignment engine.
///
/// Every mutation is appended to the WAL before it touches the store, so a
/// failed write leaves no partial record behind.
pub struct Engine {
    store: Arc<dyn ReservationStore>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Serializes status changes and table additions within an area. A
    /// confirm only ever binds tables of its own area, so this scope covers
    /// every table it could double-book.
    area_locks: DashMap<String, Arc<Mutex<()>>>,
    /// Mutations hold it shared; compaction holds it exclusively so the
    /// snapshot it writes cannot miss an event appended mid-compaction.
    commit_gate: RwLock<()>,
    /// New ids between their uniqueness check and their insert.
    /// Table ids are global, so the area lock alone cannot guard them.
    table_claims: DashSet<String>,
    reservation_claims: DashSet<String>,
}

/// Exclusive hold on an id until its create is applied or abandoned.
pub(super) struct IdClaim<'a> {
    claims: &'a DashSet<String>,
    id: String,
}

impl Drop for IdClaim<'_> {
    fn drop(&mut self) {
        self.claims.remove(&self.id);
    }
}

/// Claim `id` in `claims` unless another create holds it or `taken` reports
/// it already stored.
fn claim_id<'a>(
    claims: &'a DashSet<String>,
    id: &str,
    taken: impl FnOnce(&str) -> bool,
) -> Result<IdClaim<'a>, EngineError> {
    if !claims.insert(id.to_string()) {
        return Err(EngineError::AlreadyExists(id.to_string()));
    }
    let claim = IdClaim {
        claims,
        id: id.to_string(),
    };
    if taken(id) {
        return Err(EngineError::AlreadyExists(id.to_string()));
    }
    Ok(claim)
}

impl Engine {
    pub fn new(wal_path: PathBuf) -> io::Result<Self> {
        Self::with_store(wal_path, Arc::new(InMemoryStore::new()))
    }

    /// Build an engine over `store`, replaying the WAL at `wal_path` into it.
    pub fn with_store(wal_path: PathBuf, store: Arc<dyn ReservationStore>) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        for event in &events {
            apply_event(store.as_ref(), event);
        }
        if !events.is_empty() {
            tracing::info!("replayed {} WAL events from {}", events.len(), wal_path.display());
        }

        Ok(Self {
            store,
            wal_tx,
            area_locks: DashMap::new(),
            commit_gate: RwLock::new(()),
            table_claims: DashSet::new(),
            reservation_claims: DashSet::new(),
        })
    }

    pub fn store(&self) -> &dyn ReservationStore {
        self.store.as_ref()
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// WAL-append + apply in one call.
    pub(super) async fn persist_and_apply(&self, event: Event) -> Result<(), EngineError> {
        let _gate = self.commit_gate.read().await;
        self.wal_append(&event).await?;
        apply_event(self.store.as_ref(), &event);
        Ok(())
    }

    /// Hold a table id for the rest of an `add_table` call.
    pub(super) fn claim_table_id(&self, id: &str) -> Result<IdClaim<'_>, EngineError> {
        claim_id(&self.table_claims, id, |id| self.store.find_table(id).is_some())
    }

    pub(super) fn claim_reservation_id(&self, id: &str) -> Result<IdClaim<'_>, EngineError> {
        claim_id(&self.reservation_claims, id, |id| self.store.find_reservation(id).is_some())
    }

    /// Acquire the serialization point for `area_id`.
    pub(super) async fn lock_area(&self, area_id: &str) -> OwnedMutexGuard<()> {
        let lock = self.area_locks.entry(area_id.to_string()).or_default().clone();
        lock.lock_owned().await
    }
}
