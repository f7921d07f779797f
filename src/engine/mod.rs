mod assign;
mod conflict;
mod error;
mod mutations;
mod queries;

pub use assign::{first_free_slot, occupied_slots};
pub use conflict::{collision, parse_slot, ConflictPolicy, Dimension};
pub use error::EngineError;

use std::io;
use std::path::PathBuf;

use tokio::sync::{mpsc, oneshot, RwLock};

use crate::model::*;
use crate::wal::Wal;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    /// Several events committed as one unit.
    AppendBatch {
        events: Vec<Event>,
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
/// 3. Drain all immediately available Appends.
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders with the batch result.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                commit_batch(&mut wal, &mut batch);
                if let Some(other) = deferred {
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
    let result = wal.append_all(batch.iter().map(|(event, _)| event));
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("WAL flush of {} events failed: {e}", batch.len());
    }
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::AppendBatch { events, response } => {
            let result = wal.append_all(&events);
            if let Err(e) = &result {
                tracing::error!("WAL batch of {} events failed: {e}", events.len());
            }
            let _ = response.send(result);
        }
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// One tenant's timetable: the booking table, its WAL, and the conflict policy.
///
/// Every mutation takes the table's write lock for the whole
/// check-then-append sequence, so two callers can never both pass the
/// conflict check for the same slot.
pub struct Engine {
    pub(super) state: RwLock<Timetable>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub(super) policy: ConflictPolicy,
}

/// Apply an event to the table (caller holds the write lock).
fn apply_event(tt: &mut Timetable, event: &Event) {
    match event {
        Event::BookingAdded { booking } => tt.insert(booking.clone()),
        Event::BookingEdited { booking } => {
            tt.replace(booking.clone());
        }
        Event::BookingRemoved { id } => {
            tt.remove(*id);
        }
        Event::IdReserved { next_id } => tt.next_id = tt.next_id.max(*next_id),
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, policy: ConflictPolicy) -> io::Result<Self> {
        let (events, valid_len) = Wal::replay_valid(&wal_path)?;
        // New appends must follow the last intact entry, not a torn tail.
        Wal::truncate_tail(&wal_path, valid_len)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let mut tt = Timetable::new();
        for event in &events {
            apply_event(&mut tt, event);
        }
        tracing::debug!(
            "replayed {} events from {}: {} bookings, next id {}",
            events.len(),
            wal_path.display(),
            tt.len(),
            tt.next_id
        );

        Ok(Self {
            state: RwLock::new(tt),
            wal_tx,
            policy,
        })
    }

    pub fn policy(&self) -> ConflictPolicy {
        self.policy
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

    /// WAL-append, then apply. Nothing is applied if the append fails.
    pub(super) async fn persist_and_apply(
        &self,
        tt: &mut Timetable,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_event(tt, event);
        Ok(())
    }

    /// WAL-append every event in one commit, then apply them all. Nothing is
    /// applied, and nothing stays in the WAL, if the commit fails.
    pub(super) async fn persist_and_apply_all(
        &self,
        tt: &mut Timetable,
        events: Vec<Event>,
    ) -> Result<(), EngineError> {
        let result = self
            .wal_request(|response| WalCommand::AppendBatch {
                events: events.clone(),
                response,
            })
            .await?;
        result.map_err(|e| EngineError::WalError(e.to_string()))?;
        for event in &events {
            apply_event(tt, event);
        }
        Ok(())
    }

    /// Round-trip a command through the WAL writer.
    pub(super) async fn wal_request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> WalCommand,
    ) -> Result<T, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(make(tx))
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))
    }
}
