mod availability;
mod conflict;
mod error;
mod history;
mod lifecycle;
mod mutations;
mod pricing;
mod queries;
mod store;

pub use availability::{
    DayOccupancy, blocked_ranges, first_conflict, first_conflict_excluding, free_ranges, is_date_occupied,
    is_range_bookable, merge_ranges, occupied_days, subtract_ranges,
};
pub use error::EngineError;
pub use history::HistoryLog;
pub use lifecycle::{VehicleEffect, can_transition, resolve_vehicle_status, transition_effect};
pub use pricing::{
    CURRENCY_DECIMAL_PLACES, PricingInput, PricingResult, amount_from_f64, calculate_days,
    calculate_price,
};
pub use store::{RecordStore, ReservationField, ReservationPatch};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::info;
use ulid::Ulid;

use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedVehicleState = Arc<RwLock<VehicleState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: Ack,
    },
    Compact {
        events: Vec<Event>,
        response: Ack,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

pub(super) type Ack = oneshot::Sender<io::Result<()>>;

/// Appends drained from the channel together and acknowledged after one fsync.
struct Batch {
    events: Vec<Event>,
    acks: Vec<Ack>,
}

impl Batch {
    fn start(event: Event, ack: Ack) -> Self {
        Self {
            events: vec![event],
            acks: vec![ack],
        }
    }

    fn push(&mut self, event: Event, ack: Ack) {
        self.events.push(event);
        self.acks.push(ack);
    }

    /// Buffer every event, fsync once, then answer every waiter with the
    /// same outcome. The fsync runs even after a failed append so no partial
    /// batch stays buffered for the next one.
    fn commit(self, wal: &mut Wal) {
        let size = self.events.len();
        metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(size as f64);
        let started = std::time::Instant::now();
        let written = self.events.iter().try_for_each(|event| wal.append_buffered(event));
        let synced = wal.flush_sync();
        let outcome = written.and(synced);
        metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());

        if let Err(e) = &outcome {
            tracing::error!("WAL commit of {size} events failed: {e}");
        }
        for ack in self.acks {
            let reply = match &outcome {
                Ok(()) => Ok(()),
                Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
            };
            let _ = ack.send(reply);
        }
    }
}

/// Owns the WAL. Appends that queue up while a commit is running go out
/// together in the next batch; any other command waits for that batch and
/// then runs on its own.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            control => {
                run_control(&mut wal, control);
                continue;
            }
        };

        let mut batch = Batch::start(event, response);
        let mut held_back = None;
        while let Ok(next) = rx.try_recv() {
            match next {
                WalCommand::Append { event, response } => batch.push(event, response),
                control => {
                    held_back = Some(control);
                    break;
                }
            }
        }
        batch.commit(&mut wal);
        if let Some(control) = held_back {
            run_control(&mut wal, control);
        }
    }
}

fn run_control(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let swapped = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(swapped);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => Batch::start(event, response).commit(wal),
    }
}

/// Reservation store and lifecycle engine.
///
/// Each vehicle's state sits behind its own lock; every write takes that
/// lock, validates, appends one WAL record and applies it before releasing.
pub struct Engine {
    pub state: DashMap<Ulid, SharedVehicleState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    /// Reverse lookup: reservation id → vehicle id
    pub(super) reservation_to_vehicle: DashMap<Ulid, Ulid>,
    pub(super) history: HistoryLog,
    pub(super) clock: Arc<dyn Clock>,
    /// Shared by every write for its whole commit, exclusive to compaction.
    /// Writers take it before any vehicle lock.
    pub(super) commit_gate: RwLock<()>,
}

/// Apply an event directly to a VehicleState (caller holds the lock).
fn apply_to_vehicle(
    vs: &mut VehicleState,
    event: &Event,
    index: &DashMap<Ulid, Ulid>,
    history: &HistoryLog,
) {
    match event {
        Event::VehicleUpdated {
            name,
            daily_rate,
            status,
            ..
        } => {
            vs.name = name.clone();
            vs.daily_rate = *daily_rate;
            vs.status = *status;
        }
        Event::ReservationCreated { reservation, history: entry } => {
            index.insert(reservation.id, reservation.vehicle_id);
            vs.insert_reservation(reservation.clone());
            history.append(entry.clone());
        }
        Event::ReservationRestored { reservation } => {
            index.insert(reservation.id, reservation.vehicle_id);
            vs.insert_reservation(reservation.clone());
        }
        Event::ReservationRescheduled { id, range, pricing, .. } => {
            // Start date may move; re-insert to keep the sort order.
            if let Some(mut r) = vs.remove_reservation(*id) {
                r.range = *range;
                r.pricing = *pricing;
                vs.insert_reservation(r);
            }
        }
        Event::ReservationRepriced {
            id,
            extra_charges,
            discount_percent,
            pricing,
            ..
        } => {
            if let Some(r) = vs.reservation_mut(*id) {
                r.extra_charges = *extra_charges;
                r.discount_percent = *discount_percent;
                r.pricing = *pricing;
            }
        }
        Event::ReservationAmended {
            id,
            range,
            extra_charges,
            discount_percent,
            pricing,
            history: entry,
            vehicle_status,
            ..
        } => {
            if let Some(mut r) = vs.remove_reservation(*id) {
                r.range = *range;
                r.extra_charges = *extra_charges;
                r.discount_percent = *discount_percent;
                r.pricing = *pricing;
                if let Some(entry) = entry {
                    r.status = entry.new_status;
                }
                vs.insert_reservation(r);
            }
            if let Some(entry) = entry {
                history.append(entry.clone());
            }
            if let Some(status) = vehicle_status {
                vs.status = *status;
            }
        }
        Event::StatusChanged {
            id,
            history: entry,
            vehicle_status,
            ..
        } => {
            if let Some(r) = vs.reservation_mut(*id) {
                r.status = entry.new_status;
            }
            history.append(entry.clone());
            if let Some(status) = vehicle_status {
                vs.status = *status;
            }
        }
        Event::ReservationDeleted { id, .. } => {
            vs.remove_reservation(*id);
            index.remove(id);
        }
        // Registered/Removed are handled at the DashMap level, history at the log level
        Event::VehicleRegistered { .. } | Event::VehicleRemoved { .. } | Event::HistoryRestored { .. } => {}
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>, clock: Arc<dyn Clock>) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            wal_tx,
            notify,
            reservation_to_vehicle: DashMap::new(),
            history: HistoryLog::new(),
            clock,
            commit_gate: RwLock::new(()),
        };

        // Replay: we are the sole owner of these Arcs, so try_write always
        // succeeds. Never use blocking_write here: this runs inside a runtime.
        for event in &events {
            match event {
                Event::VehicleRegistered { id, name, daily_rate, status } => {
                    let vs = VehicleState::new(*id, name.clone(), *daily_rate, *status);
                    engine.state.insert(*id, Arc::new(RwLock::new(vs)));
                }
                Event::VehicleRemoved { id } => {
                    if let Some((_, vs)) = engine.state.remove(id)
                        && let Ok(guard) = vs.try_read() {
                            for r in &guard.reservations {
                                engine.reservation_to_vehicle.remove(&r.id);
                            }
                        }
                }
                Event::HistoryRestored { entries } => {
                    for entry in entries {
                        engine.history.append(entry.clone());
                    }
                }
                other => {
                    if let Some(vehicle_id) = event_vehicle_id(other)
                        && let Some(entry) = engine.state.get(&vehicle_id) {
                            let vs_arc = entry.clone();
                            if let Ok(mut guard) = vs_arc.try_write() {
                                apply_to_vehicle(
                                    &mut guard,
                                    other,
                                    &engine.reservation_to_vehicle,
                                    &engine.history,
                                );
                            }
                        }
                }
            }
        }

        if !events.is_empty() {
            info!(
                "replayed {} events: {} vehicles, {} reservations",
                events.len(),
                engine.state.len(),
                engine.reservation_to_vehicle.len()
            );
        }
        Ok(engine)
    }

    /// Open the engine described by `config` with the system clock, install
    /// the metrics exporter when a port is set and spawn the background
    /// compactor. Must run inside a Tokio runtime.
    pub fn start(config: &EngineConfig) -> io::Result<Arc<Self>> {
        crate::observability::init(config.metrics_port)
            .map_err(|e| io::Error::other(format!("metrics exporter: {e}")))?;
        std::fs::create_dir_all(&config.data_dir)?;
        let notify = Arc::new(NotifyHub::new());
        let engine = Arc::new(Self::new(config.wal_path(), notify, Arc::new(SystemClock))?);

        let compactor_engine = engine.clone();
        let threshold = config.compact_threshold;
        let interval = config.compact_interval;
        tokio::spawn(async move {
            crate::compactor::run_compactor(compactor_engine, threshold, interval).await;
        });

        info!("engine started, WAL at {}", config.wal_path().display());
        Ok(engine)
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
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

    pub fn get_vehicle_state(&self, id: &Ulid) -> Option<SharedVehicleState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn get_vehicle_for_reservation(&self, reservation_id: &Ulid) -> Option<Ulid> {
        self.reservation_to_vehicle.get(reservation_id).map(|e| *e.value())
    }

    /// WAL-append + apply + notify. The append is the commit point: if it
    /// fails, memory is untouched.
    pub(super) async fn persist_and_apply(
        &self,
        vehicle_id: Ulid,
        vs: &mut VehicleState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_vehicle(vs, event, &self.reservation_to_vehicle, &self.history);
        self.notify.send(vehicle_id, event);
        Ok(())
    }

    /// Lookup reservation → vehicle, get vehicle, acquire write lock.
    pub(super) async fn resolve_reservation_write(
        &self,
        reservation_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<VehicleState>), EngineError> {
        let vehicle_id = self
            .get_vehicle_for_reservation(reservation_id)
            .ok_or(EngineError::NotFound(*reservation_id))?;
        let vs = self
            .get_vehicle_state(&vehicle_id)
            .ok_or(EngineError::NotFound(vehicle_id))?;
        let guard = vs.write_owned().await;
        Ok((vehicle_id, guard))
    }
}

/// Extract the vehicle id from an event (for events applied under a vehicle lock).
fn event_vehicle_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::VehicleUpdated { id, .. } => Some(*id),
        Event::ReservationCreated { reservation, .. }
        | Event::ReservationRestored { reservation } => Some(reservation.vehicle_id),
        Event::ReservationRescheduled { vehicle_id, .. }
        | Event::ReservationRepriced { vehicle_id, .. }
        | Event::ReservationAmended { vehicle_id, .. }
        | Event::StatusChanged { vehicle_id, .. }
        | Event::ReservationDeleted { vehicle_id, .. } => Some(*vehicle_id),
        Event::VehicleRegistered { .. } | Event::VehicleRemoved { .. } | Event::HistoryRestored { .. } => None,
    }
}
