mod admission;
mod error;
mod mutations;
mod queries;

pub use error::{EngineError, ErrorClass};
pub use mutations::{BookingPatch, NewBooking};

use std::io;
use std::path::Path;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock, mpsc, oneshot};
use tokio::time::timeout;
use ulid::Ulid;

use crate::config::EngineConfig;
use crate::directory::ResourceDirectory;
use crate::model::*;
use crate::wal::Wal;

pub type SharedBook = Arc<RwLock<ResourceBook>>;

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
/// 5. Acknowledge every sender.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // The open batch commits before the non-append command runs
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break, // channel empty, commit the batch
                    }
                }

                commit_batch(&mut wal, &mut batch);
                if let Some(cmd) = deferred {
                    handle_non_append(&mut wal, cmd);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

/// Append the whole batch, fsync once, then acknowledge every sender.
fn commit_batch(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());

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
    // Flush even on append error so partially buffered bytes don't
    // leak into the next batch; these callers are all told the batch failed.
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
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
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// The reservation engine: per-resource books behind one lock each,
/// durable through the WAL, validated against the resource directory.
pub struct Engine {
    state: DashMap<Ulid, SharedBook>,
    wal_tx: mpsc::Sender<WalCommand>,
    directory: Arc<dyn ResourceDirectory>,
    config: EngineConfig,
    /// Reverse lookup: booking id → resource id.
    booking_index: DashMap<Ulid, Ulid>,
    /// Reverse lookup: window id → resource id.
    window_index: DashMap<Ulid, Ulid>,
}

/// Apply an event directly to a book. The caller holds the lock.
fn apply_to_book(
    book: &mut ResourceBook,
    event: &Event,
    window_index: &DashMap<Ulid, Ulid>,
    booking_index: &DashMap<Ulid, Ulid>,
) {
    match event {
        Event::WindowAdded { id, resource_id, span, recurrence } => {
            book.insert_window(Window {
                id: *id,
                resource_id: *resource_id,
                span: *span,
                recurrence: *recurrence,
            });
            window_index.insert(*id, *resource_id);
        }
        Event::WindowUpdated { id, resource_id, span, recurrence } => {
            book.remove_window(*id);
            book.insert_window(Window {
                id: *id,
                resource_id: *resource_id,
                span: *span,
                recurrence: *recurrence,
            });
            window_index.insert(*id, *resource_id);
        }
        Event::WindowRemoved { id, .. } => {
            book.remove_window(*id);
            window_index.remove(id);
        }
        Event::BookingCreated { id, resource_id, requester_id, span, status, note, reference } => {
            book.insert_booking(Booking {
                id: *id,
                resource_id: *resource_id,
                requester_id: *requester_id,
                span: *span,
                status: *status,
                note: note.clone(),
                reference: reference.clone(),
            });
            booking_index.insert(*id, *resource_id);
        }
        Event::BookingAmended { id, span, status, note, reference, .. } => {
            if let Some(span) = span {
                book.reschedule_booking(*id, *span);
            }
            if let Some(b) = book.booking_mut(*id) {
                if let Some(status) = status {
                    b.status = *status;
                }
                if let Some(note) = note {
                    b.note = if note.is_empty() { None } else { Some(note.clone()) };
                }
                if let Some(reference) = reference {
                    b.reference = if reference.is_empty() { None } else { Some(reference.clone()) };
                }
            }
        }
        Event::BookingCancelled { id, .. } => {
            if let Some(b) = book.booking_mut(*id) {
                b.status = BookingStatus::Cancelled;
            }
        }
    }
}

impl Engine {
    /// Open the engine over its WAL, replay whatever is on disk, and
    /// start the group-commit writer. Must run inside a tokio runtime.
    pub fn open(
        wal_path: &Path,
        directory: Arc<dyn ResourceDirectory>,
        config: EngineConfig,
    ) -> io::Result<Self> {
        let events = Wal::replay(wal_path)?;
        let wal = Wal::open(wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(config.wal_buffer.max(1));
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            wal_tx,
            directory,
            config,
            booking_index: DashMap::new(),
            window_index: DashMap::new(),
        };

        // During replay we are the sole owner of these Arcs, so try_write
        // always succeeds. Books appear lazily at their first event;
        // directory checks gate new admissions, not recovery.
        for event in &events {
            let book = engine.book_or_create(event.resource_id());
            let mut guard = book.try_write().expect("replay: uncontended write");
            apply_to_book(&mut guard, event, &engine.window_index, &engine.booking_index);
        }
        if !events.is_empty() {
            tracing::info!(events = events.len(), books = engine.state.len(), "replayed wal");
        }

        Ok(engine)
    }

    pub(super) fn book_or_create(&self, resource_id: Ulid) -> SharedBook {
        self.state
            .entry(resource_id)
            .or_insert_with(|| Arc::new(RwLock::new(ResourceBook::new(resource_id))))
            .clone()
    }

    pub(super) fn book(&self, resource_id: &Ulid) -> Option<SharedBook> {
        self.state.get(resource_id).map(|e| e.value().clone())
    }

    pub(super) fn books(&self) -> Vec<SharedBook> {
        self.state.iter().map(|e| e.value().clone()).collect()
    }

    pub(super) fn resource_of_booking(&self, booking_id: &Ulid) -> Option<Ulid> {
        self.booking_index.get(booking_id).map(|e| *e.value())
    }

    pub(super) fn resource_of_window(&self, window_id: &Ulid) -> Option<Ulid> {
        self.window_index.get(window_id).map(|e| *e.value())
    }

    /// Fail with `ResourceNotFound` unless the directory knows `id`.
    pub(super) async fn require_resource(&self, id: Ulid) -> Result<(), EngineError> {
        if self.directory.resource_exists(id).await? {
            Ok(())
        } else {
            Err(EngineError::ResourceNotFound(id))
        }
    }

    /// Write an event through the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append { event: event.clone(), response: tx })
            .await
            .map_err(|_| EngineError::Storage("wal writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Storage("wal writer dropped response".into()))?
            .map_err(|e| EngineError::Storage(e.to_string()))
    }

    /// WAL-append then apply, in that order; the book mutates only once
    /// the event is durable.
    pub(super) async fn persist_and_apply(
        &self,
        book: &mut ResourceBook,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_book(book, event, &self.window_index, &self.booking_index);
        Ok(())
    }

    /// Acquire the book's write guard within the configured wait. This
    /// guard is the transaction scope for admission; timing out reports
    /// contention instead of queueing forever.
    pub(super) async fn write_book(
        &self,
        book: &SharedBook,
        resource_id: Ulid,
    ) -> Result<OwnedRwLockWriteGuard<ResourceBook>, EngineError> {
        timeout(self.config.lock_wait, book.clone().write_owned())
            .await
            .map_err(|_| EngineError::StoreContended(resource_id))
    }

    /// Lookup booking → resource, then lock the book for writing.
    pub(super) async fn resolve_booking_write(
        &self,
        booking_id: &Ulid,
    ) -> Result<(Ulid, OwnedRwLockWriteGuard<ResourceBook>), EngineError> {
        let resource_id = self
            .resource_of_booking(booking_id)
            .ok_or(EngineError::BookingNotFound(*booking_id))?;
        let book = self
            .book(&resource_id)
            .ok_or(EngineError::BookingNotFound(*booking_id))?;
        let guard = self.write_book(&book, resource_id).await?;
        Ok((resource_id, guard))
    }

    /// Lookup window → resource, then lock the book for writing.
    pub(super) async fn resolve_window_write(
        &self,
        window_id: &Ulid,
    ) -> Result<(Ulid, OwnedRwLockWriteGuard<ResourceBook>), EngineError> {
        let resource_id = self
            .resource_of_window(window_id)
            .ok_or(EngineError::WindowNotFound(*window_id))?;
        let book = self
            .book(&resource_id)
            .ok_or(EngineError::WindowNotFound(*window_id))?;
        let guard = self.write_book(&book, resource_id).await?;
        Ok((resource_id, guard))
    }

    /// Sleep before retry `attempt` (1-based), doubling each time.
    pub(super) async fn backoff(&self, attempt: u32) {
        let factor = 1u32 << (attempt - 1).min(16);
        tokio::time::sleep(self.config.retry_backoff * factor).await;
    }
}
