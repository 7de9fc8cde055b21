//! Simulation session: the per-connection state machine that drives the
//! virtual clock, schedules arrivals and departures, and funnels events to
//! the client in causal order.
//!
//! A [`Session`] is a cheap cloneable handle over shared state. Long-lived
//! work runs in background tasks (clock tick loop, arrival generator, event
//! serializer) plus one transient task per arrival/admission handler and one
//! timer task per parked car. A single session mutex protects the car map,
//! the state field and the virtual clock; the lot carries its own occupancy
//! mutex and is always taken second. No task holds either lock across a sink
//! write or a sampling call: event slots are reserved on the queue first,
//! then filled under the lock, so wire order matches lock order.

use crate::clock::VirtualClock;
use crate::events::{CarEvent, EventSink};
use crate::grid::{Parking, ParkingLot, Stall};
use crate::random::{ArrivalConfig, ParkingTimeConfig, Sampler};
use crate::tariff;
use metrics::{counter, gauge};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::time::Instant;
use tokio::sync::{Mutex, Notify, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Bound on concurrently executing arrival/admission handlers.
const ADMISSION_PERMITS: usize = 20;

/// Capacity of the event queue between producers and the serializer.
const EVENT_QUEUE_CAPACITY: usize = 256;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created but not started, or terminally stopped
    Stopped,
    /// Clock ticking, arrivals flowing
    Running,
    /// Clock and timers frozen, resumable
    Paused,
}

/// Where a tracked car is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CarState {
    /// Announced on the approach road, awaiting the client's park ack
    Arrive,
    /// Occupying a stall
    Park,
    /// Departure fired, about to be forgotten
    Leaving,
}

/// Departure countdown for one parked car. Pausing aborts the sleep task
/// and banks the remaining duration; resuming spawns a fresh task with it.
struct DepartureTimer {
    remaining: Duration,
    started: Instant,
    handle: Option<JoinHandle<()>>,
}

impl DepartureTimer {
    fn pause(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            self.remaining = self.remaining.saturating_sub(self.started.elapsed());
        }
    }

    fn abort(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// A car the session is tracking, keyed by its UUID in the car map.
struct Car {
    state: CarState,
    stall: Option<Stall>,
    /// Virtual-clock entry time, set when the car parks.
    entered_at: i64,
    /// Present only while parked.
    timer: Option<DepartureTimer>,
}

impl Car {
    fn arrived() -> Self {
        Self {
            state: CarState::Arrive,
            stall: None,
            entered_at: 0,
            timer: None,
        }
    }
}

/// Cancellation signal shared by every task of the session. Set once on
/// stop, never reset.
#[derive(Default)]
struct Cancel {
    cancelled: AtomicBool,
    notify: Notify,
}

impl Cancel {
    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    async fn cancelled(&self) {
        loop {
            if self.is_cancelled() {
                return;
            }
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register as a waiter before the final flag check so a
            // concurrent cancel() cannot slip between check and await.
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// State under the session mutex.
struct Shared {
    state: SessionState,
    clock: VirtualClock,
    cars: HashMap<String, Car>,
    clock_task: Option<JoinHandle<()>>,
    arrival_task: Option<JoinHandle<()>>,
}

struct SessionInner {
    shared: Mutex<Shared>,
    lot: ParkingLot,
    sampler: Sampler,
    arrival_cfg: ArrivalConfig,
    parking_cfg: ParkingTimeConfig,
    sem: Arc<Semaphore>,
    cancel: Cancel,
    event_tx: mpsc::Sender<CarEvent>,
    /// Taken by the serializer task on first start.
    event_rx: std::sync::Mutex<Option<mpsc::Receiver<CarEvent>>>,
    sink: Arc<dyn EventSink>,
    started: AtomicBool,
}

/// Handle to one client's simulation session.
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Clone for Session {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Session {
    /// Build a session over a validated parking descriptor. The session is
    /// created stopped; nothing runs until [`Session::start`].
    pub fn new(
        parking: &Parking,
        arrival_cfg: ArrivalConfig,
        parking_cfg: ParkingTimeConfig,
        start_time: i64,
        seed: Option<u64>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);

        Self {
            inner: Arc::new(SessionInner {
                shared: Mutex::new(Shared {
                    state: SessionState::Stopped,
                    clock: VirtualClock::starting_at(start_time),
                    cars: HashMap::new(),
                    clock_task: None,
                    arrival_task: None,
                }),
                lot: ParkingLot::new(parking),
                sampler: Sampler::new(seed),
                arrival_cfg,
                parking_cfg,
                sem: Arc::new(Semaphore::new(ADMISSION_PERMITS)),
                cancel: Cancel::default(),
                event_tx,
                event_rx: std::sync::Mutex::new(Some(event_rx)),
                sink,
                started: AtomicBool::new(false),
            }),
        }
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> SessionState {
        self.inner.shared.lock().await.state
    }

    /// Number of cars currently tracked (arrived or parked).
    pub async fn active_cars(&self) -> usize {
        self.inner.shared.lock().await.cars.len()
    }

    /// Number of stalls currently reserved.
    pub fn occupied_stalls(&self) -> usize {
        self.inner.lot.occupied_count()
    }

    /// Current virtual time, unix seconds.
    pub async fn virtual_now(&self) -> i64 {
        self.inner.shared.lock().await.clock.now()
    }

    async fn is_running(&self) -> bool {
        let shared = self.inner.shared.lock().await;
        shared.state == SessionState::Running && !self.inner.cancel.is_cancelled()
    }

    /// Start the session: clock, arrival generator and serializer begin.
    /// Only valid from the initial stopped state; once stopped via
    /// [`Session::stop`] the session is terminal and start is a no-op.
    pub async fn start(&self) {
        {
            let mut shared = self.inner.shared.lock().await;
            if shared.state != SessionState::Stopped || self.inner.cancel.is_cancelled() {
                return;
            }
            shared.state = SessionState::Running;
            shared.clock_task = Some(self.spawn_clock());
            shared.arrival_task = Some(self.spawn_arrival_loop());
        }
        self.spawn_event_loop();

        if !self.inner.started.swap(true, Ordering::SeqCst) {
            gauge!("parksim_sessions_active").increment(1.0);
        }
        info!("session started");
    }

    /// Pause: the clock stops, every parked car's departure timer banks its
    /// remaining duration, the arrival generator is parked.
    pub async fn pause(&self) {
        let mut shared = self.inner.shared.lock().await;
        if shared.state != SessionState::Running {
            return;
        }
        shared.state = SessionState::Paused;

        if let Some(task) = shared.clock_task.take() {
            task.abort();
        }
        if let Some(task) = shared.arrival_task.take() {
            task.abort();
        }
        for car in shared.cars.values_mut() {
            if let Some(timer) = car.timer.as_mut() {
                timer.pause();
            }
        }
        info!("session paused");
    }

    /// Resume from pause: clock and arrival generator restart, every banked
    /// departure timer continues with its stored remaining duration.
    pub async fn resume(&self) {
        let mut shared = self.inner.shared.lock().await;
        if shared.state != SessionState::Paused {
            return;
        }
        shared.state = SessionState::Running;

        let resumable: Vec<(String, Duration)> = shared
            .cars
            .iter()
            .filter_map(|(id, car)| {
                car.timer
                    .as_ref()
                    .map(|timer| (id.clone(), timer.remaining))
            })
            .collect();
        for (car_id, remaining) in resumable {
            let handle = self.spawn_departure_task(car_id.clone(), remaining);
            if let Some(timer) = shared.cars.get_mut(&car_id).and_then(|c| c.timer.as_mut()) {
                timer.started = Instant::now();
                timer.handle = Some(handle);
            }
        }

        shared.clock_task = Some(self.spawn_clock());
        shared.arrival_task = Some(self.spawn_arrival_loop());
        info!("session resumed");
    }

    /// Stop a running or paused session. Terminal: cancels every task,
    /// aborts every timer, discards remaining cars and frees their stalls.
    /// A stop while already stopped (including before the first start) is a
    /// no-op and leaves the session startable.
    pub async fn stop(&self) {
        let mut shared = self.inner.shared.lock().await;
        if shared.state == SessionState::Stopped {
            return;
        }
        shared.state = SessionState::Stopped;
        self.inner.cancel.cancel();
        self.inner.sem.close();

        if let Some(task) = shared.clock_task.take() {
            task.abort();
        }
        if let Some(task) = shared.arrival_task.take() {
            task.abort();
        }
        for (_, mut car) in shared.cars.drain() {
            if let Some(timer) = car.timer.as_mut() {
                timer.abort();
            }
            if let Some(stall) = car.stall {
                self.inner.lot.release(stall);
            }
        }
        gauge!("parksim_cars_active").set(0.0);
        drop(shared);

        if self.inner.started.load(Ordering::SeqCst) {
            gauge!("parksim_sessions_active").decrement(1.0);
        }
        info!("session stopped");
    }

    /// Handle a `park <id> [<id>...]` control message: run the admission
    /// decision for each syntactically valid car id. Accepted only while
    /// running; unknown ids are ignored.
    pub async fn check_park(&self, msg: &str) {
        if !self.is_running().await {
            return;
        }
        let Some(ids) = msg.strip_prefix("park") else {
            return;
        };
        for car_id in ids.split_whitespace() {
            if Uuid::parse_str(car_id).is_ok() {
                tokio::spawn(self.clone().try_to_park(car_id.to_owned()));
            } else {
                debug!(car_id = %car_id, "ignoring park ack with malformed id");
            }
        }
    }

    // -----------------------------------------------------------------
    // Background loops
    // -----------------------------------------------------------------

    /// Clock tick loop: one real second advances virtual time by one minute.
    fn spawn_clock(&self) -> JoinHandle<()> {
        let session = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick completes immediately; the clock moves one
            // interval after start.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let mut shared = session.inner.shared.lock().await;
                        if shared.state != SessionState::Running {
                            return;
                        }
                        shared.clock.advance();
                    }
                    _ = session.inner.cancel.cancelled() => return,
                }
            }
        })
    }

    /// Arrival generator: sample a delay, wait it out, spawn an arrival
    /// handler, repeat while running.
    fn spawn_arrival_loop(&self) -> JoinHandle<()> {
        let session = self.clone();
        tokio::spawn(async move {
            loop {
                let delay = session
                    .inner
                    .sampler
                    .delay(&session.inner.arrival_cfg.distribution);
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = session.inner.cancel.cancelled() => {
                        debug!("session stopped, stop scheduling cars");
                        return;
                    }
                }
                if !session.is_running().await {
                    return;
                }
                tokio::spawn(session.clone().handle_arrival());
            }
        })
    }

    /// Serializer: single consumer of the event queue; encodes and hands
    /// frames to the sink in enqueue order.
    fn spawn_event_loop(&self) {
        let rx = self
            .inner
            .event_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let Some(mut rx) = rx else {
            // Already consuming (started once before).
            return;
        };

        let session = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = rx.recv() => {
                        let Some(event) = event else {
                            debug!("event queue closed, stopping serializer");
                            return;
                        };
                        let frame = match serde_json::to_string(&event) {
                            Ok(frame) => frame,
                            Err(error) => {
                                warn!(error = %error, event = event.event.as_str(),
                                    "failed to encode event, dropping");
                                continue;
                            }
                        };
                        counter!("parksim_events_total", "event" => event.event.as_str())
                            .increment(1);
                        debug!(event = event.event.as_str(), car_id = %event.car_id,
                            timestamp = event.timestamp, "sending event");
                        if session.inner.sink.send(frame).await.is_err() {
                            warn!("event sink write failed, stopping session");
                            session.stop().await;
                            return;
                        }
                    }
                    _ = session.inner.cancel.cancelled() => {
                        // Refuse further enqueues, then drain what is already
                        // queued; nothing goes out after stop.
                        rx.close();
                        loop {
                            match rx.try_recv() {
                                Ok(_) => {}
                                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
                            }
                        }
                        debug!("session stopped, stopping serializer");
                        return;
                    }
                }
            }
        });
    }

    // -----------------------------------------------------------------
    // Handlers
    // -----------------------------------------------------------------

    /// One car arrival: register the car and announce it. The admission
    /// decision waits for the client's `park <id>` ack.
    async fn handle_arrival(self) {
        // Closed semaphore means the session is shutting down.
        let Ok(_permit) = self.inner.sem.acquire().await else {
            return;
        };
        let Ok(slot) = self.inner.event_tx.reserve().await else {
            return;
        };

        let car_id = Uuid::new_v4().to_string();
        {
            let mut shared = self.inner.shared.lock().await;
            if shared.state != SessionState::Running || self.inner.cancel.is_cancelled() {
                return;
            }
            shared.cars.insert(car_id.clone(), Car::arrived());
            gauge!("parksim_cars_active").set(shared.cars.len() as f64);
            debug!(car_id = %car_id, time = shared.clock.now(), "car arrived");
            slot.send(CarEvent::arrive(&car_id, shared.clock.now()));
        }
    }

    /// Admission decision for one acked car: Bernoulli entry, then stall
    /// reservation. Removing the car from the map for the duration of the
    /// decision makes a duplicate ack find nothing and return.
    async fn try_to_park(self, car_id: String) {
        let Ok(_permit) = self.inner.sem.acquire().await else {
            return;
        };

        let car = {
            let mut shared = self.inner.shared.lock().await;
            if shared.state != SessionState::Running || self.inner.cancel.is_cancelled() {
                return;
            }
            // Only a car still waiting on the approach road can be admitted;
            // acks for parked or unknown cars are duplicates and do nothing.
            match shared.cars.get(&car_id) {
                Some(car) if car.state == CarState::Arrive => {}
                Some(_) | None => {
                    debug!(car_id = %car_id, "park ack for unknown or already parked car");
                    return;
                }
            }
            match shared.cars.remove(&car_id) {
                Some(car) => car,
                None => return,
            }
        };
        debug!(car_id = %car_id, "trying to park car");

        if !self
            .inner
            .sampler
            .entry_granted(self.inner.arrival_cfg.parking_prob)
        {
            self.drove_away(&car_id, "refused").await;
            return;
        }

        let Some(stall) = self.inner.lot.occupy() else {
            self.drove_away(&car_id, "no_stall").await;
            return;
        };

        // Sample the stay length before re-taking the lock.
        let stay = self
            .inner
            .sampler
            .delay(&self.inner.parking_cfg.distribution);

        let Ok(slot) = self.inner.event_tx.reserve().await else {
            self.inner.lot.release(stall);
            return;
        };
        {
            let mut shared = self.inner.shared.lock().await;
            if shared.state != SessionState::Running || self.inner.cancel.is_cancelled() {
                self.inner.lot.release(stall);
                return;
            }
            let now = shared.clock.now();
            let mut car = car;
            car.state = CarState::Park;
            car.stall = Some(stall);
            car.entered_at = now;
            car.timer = Some(DepartureTimer {
                remaining: stay,
                started: Instant::now(),
                handle: Some(self.spawn_departure_task(car_id.clone(), stay)),
            });
            shared.cars.insert(car_id.clone(), car);
            debug!(car_id = %car_id, time = now, x = stall.x, y = stall.y, "car parked");
            slot.send(CarEvent::park(&car_id, now, stall));
        }
    }

    /// Emit `drove-away` for a car that refused to enter or found no stall.
    /// The car has already been removed from the map.
    async fn drove_away(&self, car_id: &str, reason: &'static str) {
        counter!("parksim_admission_rejected_total", "reason" => reason).increment(1);

        let Ok(slot) = self.inner.event_tx.reserve().await else {
            return;
        };
        let mut shared = self.inner.shared.lock().await;
        gauge!("parksim_cars_active").set(shared.cars.len() as f64);
        debug!(car_id = %car_id, time = shared.clock.now(), "car drove away");
        slot.send(CarEvent::drove_away(car_id, shared.clock.now()));
    }

    fn spawn_departure_task(&self, car_id: String, delay: Duration) -> JoinHandle<()> {
        let session = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            session.complete_departure(&car_id).await;
        })
    }

    /// Departure timer fired: price the stay, free the stall, emit `leave`,
    /// forget the car. A car that is gone (stopped session, duplicate fire)
    /// is ignored.
    async fn complete_departure(&self, car_id: &str) {
        let Ok(slot) = self.inner.event_tx.reserve().await else {
            return;
        };

        let mut shared = self.inner.shared.lock().await;
        if shared.state != SessionState::Running || self.inner.cancel.is_cancelled() {
            debug!(car_id = %car_id, "session not running, skipping departure");
            return;
        }
        let Some(car) = shared.cars.get_mut(car_id) else {
            return;
        };
        let Some(stall) = car.stall else {
            return;
        };
        car.state = CarState::Leaving;
        let entered_at = car.entered_at;

        let now = shared.clock.now();
        let price = match tariff::parking_cost(
            entered_at,
            now,
            self.inner.lot.day_tariff(),
            self.inner.lot.night_tariff(),
        ) {
            Ok(price) => price,
            Err(error) => {
                warn!(car_id = %car_id, error = %error, "failed to price the stay, charging nothing");
                0.0
            }
        };

        // Lot lock nests under the session lock, never the other way.
        self.inner.lot.release(stall);
        shared.cars.remove(car_id);
        gauge!("parksim_cars_active").set(shared.cars.len() as f64);

        debug!(car_id = %car_id, time = now, price, "car left parking");
        slot.send(CarEvent::leave(car_id, now, stall, price));
    }
}
