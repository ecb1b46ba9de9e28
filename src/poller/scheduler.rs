//! The adaptive polling scheduler.
//!
//! Every (command, device) pair with at least one subscriber has a
//! [`PollEntry`] driven by its own timer task. Entries talk to the gateway
//! only through a [`SendPath`], so the scheduler behaves the same in a
//! context that owns the socket and in one that proxies through a master.
//!
//! # Health Accounting
//!
//! | Strategy | Failure counted | On threshold |
//! |----------|-----------------|--------------|
//! | [`PollStrategy::Shifting`] | Every send, cleared by any response | Suspend |
//! | [`PollStrategy::Fixed`] | In-flight request outlives its timeout | Suspend |
//!
//! A frame with code `2004` suspends matching entries at once and marks
//! them offline. Suspended entries stay quiet until [`Poller::resume`].
//!
//! # Locking
//!
//! Decisions are made under one state lock. Sends, notices and listener
//! calls are collected as effects and performed after the lock is released.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::dispatch::{ListenerHandle, Listeners};
use crate::hooks::{Notifier, Severity};
use crate::identifiers::{DeviceId, RequestId};
use crate::protocol::{Command, Frame, codes};
use crate::transport::{RequestIdGenerator, SendPath};

use super::entry::{InFlight, PollEntry, PollKey, PollSnapshot, PollStrategy};
use super::events::{ResumeEvent, SendEvent, SuccessEvent, SuspendEvent, SuspendReason};
use super::options::PollerOptions;

// ============================================================================
// Constants
// ============================================================================

/// A fixed entry whose next due time falls further behind than this is
/// re-anchored to now.
const REANCHOR_SLACK: Duration = Duration::from_millis(50);

/// Delay used to reschedule after an interval update.
const RESCHEDULE_SOON: Duration = Duration::from_millis(1);

// ============================================================================
// PollRequest
// ============================================================================

/// Parameters of a subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct PollRequest {
    /// Command to poll.
    pub cmd: String,
    /// Target device.
    pub device: DeviceId,
    /// Active interval; the scheduler default when `None`.
    pub interval: Option<Duration>,
    /// Payload sent with every poll.
    pub data: Option<Value>,
}

impl PollRequest {
    /// Creates a request with default interval and no payload.
    #[must_use]
    pub fn new(cmd: impl Into<String>, device: impl Into<DeviceId>) -> Self {
        Self {
            cmd: cmd.into(),
            device: device.into(),
            interval: None,
            data: None,
        }
    }

    /// Sets the active interval.
    #[inline]
    #[must_use]
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    /// Sets the payload.
    #[inline]
    #[must_use]
    pub fn data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

// ============================================================================
// PollSubscription
// ============================================================================

/// Handle returned by [`Poller::subscribe`].
///
/// Dropping the handle keeps the subscription alive.
#[must_use = "call unsubscribe() to release the subscription"]
pub struct PollSubscription {
    poller: Weak<PollerInner>,
    key: Option<PollKey>,
}

impl PollSubscription {
    /// Creates a handle that releases nothing.
    #[inline]
    pub fn noop() -> Self {
        Self {
            poller: Weak::new(),
            key: None,
        }
    }

    /// Returns the entry key, or `None` for a rejected subscription.
    #[inline]
    #[must_use]
    pub fn key(&self) -> Option<&PollKey> {
        self.key.as_ref()
    }

    /// Releases one reference to the entry.
    pub fn unsubscribe(self) {
        if let (Some(inner), Some(key)) = (self.poller.upgrade(), self.key.as_ref()) {
            inner.release(key);
        }
    }
}

impl fmt::Debug for PollSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollSubscription")
            .field("key", &self.key)
            .finish()
    }
}

// ============================================================================
// Internal State
// ============================================================================

#[derive(Default)]
struct PollerState {
    entries: FxHashMap<PollKey, PollEntry>,
    /// Request id → entry, for offline lookups. Bounded, FIFO eviction.
    rid_index: FxHashMap<RequestId, PollKey>,
    rid_order: VecDeque<RequestId>,
    disposed: bool,
}

impl PollerState {
    fn index_rid(&mut self, rid: RequestId, key: PollKey, capacity: usize) {
        if self.rid_index.insert(rid, key).is_none() {
            self.rid_order.push_back(rid);
        }
        while self.rid_order.len() > capacity {
            if let Some(oldest) = self.rid_order.pop_front() {
                self.rid_index.remove(&oldest);
            }
        }
    }
}

/// Side effects collected under the lock, applied after it is released.
#[derive(Default)]
struct Effects {
    sends: Vec<(PollKey, Command, SendEvent)>,
    suspended: Vec<SuspendEvent>,
    resumed: Vec<ResumeEvent>,
    succeeded: Vec<SuccessEvent>,
}

/// Outcome of the in-flight check of a fixed entry.
enum FixedStep {
    Send,
    Wait,
    Suspend,
}

// ============================================================================
// Poller
// ============================================================================

/// Adaptive polling scheduler.
///
/// Cheap to clone; clones share the same entries.
///
/// Subscribing spawns timer tasks and must happen inside a Tokio runtime.
#[derive(Clone)]
pub struct Poller {
    inner: Arc<PollerInner>,
}

struct PollerInner {
    path: Arc<dyn SendPath>,
    notifier: Arc<dyn Notifier>,
    options: PollerOptions,
    state: Mutex<PollerState>,
    ids: Mutex<RequestIdGenerator>,
    suspend_listeners: Listeners<SuspendEvent>,
    resume_listeners: Listeners<ResumeEvent>,
    success_listeners: Listeners<SuccessEvent>,
    send_listeners: Listeners<SendEvent>,
    frames: Mutex<Option<ListenerHandle>>,
}

impl Drop for PollerInner {
    fn drop(&mut self) {
        if let Some(handle) = self.frames.get_mut().take() {
            handle.unsubscribe();
        }
    }
}

impl fmt::Debug for Poller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Poller")
            .field("entries", &self.len())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Poller - Public API
// ============================================================================

impl Poller {
    /// Creates a scheduler sending through `path` and watching its router.
    #[must_use]
    pub fn new(path: Arc<dyn SendPath>, notifier: Arc<dyn Notifier>, options: PollerOptions) -> Self {
        let router = path.router();
        let inner = Arc::new(PollerInner {
            path,
            notifier,
            options,
            state: Mutex::new(PollerState::default()),
            ids: Mutex::new(RequestIdGenerator::new()),
            suspend_listeners: Listeners::new(),
            resume_listeners: Listeners::new(),
            success_listeners: Listeners::new(),
            send_listeners: Listeners::new(),
            frames: Mutex::new(None),
        });

        let weak = Arc::downgrade(&inner);
        let handle = router.on_raw(move |frame| {
            if let Some(inner) = weak.upgrade() {
                inner.on_frame(frame);
            }
        });
        *inner.frames.lock() = Some(handle);

        Self { inner }
    }

    /// Subscribes to `cmd` on `device` at `interval`.
    ///
    /// An existing entry only gains a reference; its interval is unchanged.
    pub fn subscribe(
        &self,
        cmd: impl Into<String>,
        device: impl Into<DeviceId>,
        interval: Duration,
    ) -> PollSubscription {
        self.subscribe_with(PollRequest::new(cmd, device).interval(interval))
    }

    /// Subscribes at the default interval.
    pub fn subscribe_default(
        &self,
        cmd: impl Into<String>,
        device: impl Into<DeviceId>,
    ) -> PollSubscription {
        self.subscribe_with(PollRequest::new(cmd, device))
    }

    /// Subscribes with full parameters.
    ///
    /// An empty command yields a no-op subscription.
    pub fn subscribe_with(&self, request: PollRequest) -> PollSubscription {
        PollerInner::subscribe(&self.inner, request)
    }

    /// Releases one reference to an entry. Saturates at zero.
    pub fn unsubscribe(&self, cmd: &str, device: impl Into<DeviceId>) {
        self.inner.release(&PollKey::new(cmd, device.into()));
    }

    /// Stops polling an entry and raises its failure count to the threshold.
    pub fn suspend(&self, cmd: &str, device: impl Into<DeviceId>) {
        let key = PollKey::new(cmd, device.into());
        let mut fx = Effects::default();
        {
            let mut guard = self.inner.state.lock();
            self.inner
                .suspend_locked(&mut guard, &key, SuspendReason::Manual, &mut fx);
        }
        self.inner.apply(fx);
    }

    /// Clears failure, offline and suspended state and reschedules.
    ///
    /// With `immediate`, the next poll goes out now; otherwise after one
    /// interval.
    pub fn resume(&self, cmd: &str, device: impl Into<DeviceId>, immediate: bool) {
        PollerInner::resume(&self.inner, &PollKey::new(cmd, device.into()), immediate);
    }

    /// Polls once now, outside the schedule. Skipped while suspended.
    pub fn force_once(&self, cmd: &str, device: impl Into<DeviceId>) {
        PollerInner::force_once(&self.inner, &PollKey::new(cmd, device.into()));
    }

    /// Changes an entry's active interval and reschedules right away.
    pub fn update_interval(&self, cmd: &str, device: impl Into<DeviceId>, interval: Duration) {
        PollerInner::update_interval(&self.inner, &PollKey::new(cmd, device.into()), interval);
    }

    /// Returns a diagnostic view of an entry.
    #[must_use]
    pub fn snapshot(&self, cmd: &str, device: impl Into<DeviceId>) -> Option<PollSnapshot> {
        let key = PollKey::new(cmd, device.into());
        self.inner.state.lock().entries.get(&key).map(PollEntry::snapshot)
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.state.lock().entries.len()
    }

    /// Returns `true` if there are no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every entry and stops watching inbound frames.
    ///
    /// Later subscriptions are rejected. In-flight requests are not
    /// cancelled; their answers are ignored.
    pub fn dispose_all(&self) {
        let count = {
            let mut state = self.inner.state.lock();
            state.disposed = true;
            let count = state.entries.len();
            state.entries.clear();
            state.rid_index.clear();
            state.rid_order.clear();
            count
        };

        let handle = self.inner.frames.lock().take();
        if let Some(handle) = handle {
            handle.unsubscribe();
        }
        info!(entries = count, "Poller disposed");
    }

    /// Subscribes to suspensions.
    pub fn on_suspend<F>(&self, callback: F) -> ListenerHandle
    where
        F: Fn(&SuspendEvent) + Send + Sync + 'static,
    {
        self.inner.suspend_listeners.add(callback)
    }

    /// Subscribes to resumptions.
    pub fn on_resume<F>(&self, callback: F) -> ListenerHandle
    where
        F: Fn(&ResumeEvent) + Send + Sync + 'static,
    {
        self.inner.resume_listeners.add(callback)
    }

    /// Subscribes to accepted responses.
    pub fn on_success<F>(&self, callback: F) -> ListenerHandle
    where
        F: Fn(&SuccessEvent) + Send + Sync + 'static,
    {
        self.inner.success_listeners.add(callback)
    }

    /// Subscribes to sends.
    pub fn on_send<F>(&self, callback: F) -> ListenerHandle
    where
        F: Fn(&SendEvent) + Send + Sync + 'static,
    {
        self.inner.send_listeners.add(callback)
    }
}

// ============================================================================
// PollerInner - Entry Lifecycle
// ============================================================================

impl PollerInner {
    fn subscribe(self: &Arc<Self>, request: PollRequest) -> PollSubscription {
        let cmd = request.cmd.trim();
        if cmd.is_empty() {
            warn!(device = %request.device, "Ignoring subscription without a command");
            return PollSubscription::noop();
        }

        let interval = match request.interval {
            Some(interval) if !interval.is_zero() => interval,
            _ => self.options.default_interval,
        };
        let key = PollKey::new(cmd, request.device);

        {
            let mut guard = self.state.lock();
            if guard.disposed {
                warn!(key = %key, "Ignoring subscription on disposed poller");
                return PollSubscription::noop();
            }

            if let Some(entry) = guard.entries.get_mut(&key) {
                entry.ref_count += 1;
                debug!(key = %key, ref_count = entry.ref_count, "Subscription joined existing entry");
            } else {
                let strategy = if self.options.is_simple(cmd) {
                    PollStrategy::Shifting
                } else {
                    PollStrategy::Fixed
                };
                let mut entry = PollEntry::new(
                    cmd.to_owned(),
                    request.device,
                    request.data,
                    strategy,
                    interval,
                    self.options.idle_interval,
                );
                entry.ref_count = 1;
                entry.next_due = Some(Instant::now());
                self.schedule(&mut entry, &key, Duration::ZERO);

                info!(
                    key = %key,
                    strategy = %strategy,
                    interval_ms = entry.interval.as_millis() as u64,
                    "Polling started"
                );
                guard.entries.insert(key.clone(), entry);
            }
        }

        PollSubscription {
            poller: Arc::downgrade(self),
            key: Some(key),
        }
    }

    fn release(&self, key: &PollKey) {
        let mut state = self.state.lock();
        let Some(entry) = state.entries.get_mut(key) else {
            return;
        };

        entry.ref_count = entry.ref_count.saturating_sub(1);
        debug!(key = %key, ref_count = entry.ref_count, "Subscription released");
        if entry.ref_count == 0 {
            state.entries.remove(key);
            info!(key = %key, "Polling stopped");
        }
    }

    fn resume(self: &Arc<Self>, key: &PollKey, immediate: bool) {
        let mut fx = Effects::default();
        {
            let mut state = self.state.lock();
            let Some(entry) = state.entries.get_mut(key) else {
                debug!(key = %key, "Resume for unknown entry");
                return;
            };

            entry.failures = 0;
            if !entry.suspended && !entry.offline {
                debug!(key = %key, "Resume on active entry: counters reset");
                return;
            }

            let now = Instant::now();
            entry.offline = false;
            entry.suspended = false;
            entry.in_flight = None;
            entry.interval = entry.target_interval();

            let delay = if immediate { Duration::ZERO } else { entry.interval };
            entry.next_due = Some(now + delay);
            self.schedule(entry, key, delay);

            info!(key = %key, immediate, "Polling resumed");
            fx.resumed.push(ResumeEvent {
                cmd: entry.cmd.clone(),
                device: entry.device,
            });
        }
        self.apply(fx);
    }

    fn force_once(self: &Arc<Self>, key: &PollKey) {
        let mut fx = Effects::default();
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let Some(entry) = state.entries.get_mut(key) else {
                warn!(key = %key, "force_once for unknown entry");
                return;
            };
            if entry.suspended {
                debug!(key = %key, "force_once skipped: suspended");
                return;
            }

            let now = Instant::now();
            let strategy = entry.strategy;
            match strategy {
                PollStrategy::Shifting => {
                    entry.failures += 1;
                    let reached = entry.failures >= self.options.fail_threshold;
                    self.plan_send(state, key, true, now, &mut fx);
                    if reached {
                        self.suspend_locked(state, key, SuspendReason::FailThreshold, &mut fx);
                    }
                }
                PollStrategy::Fixed => self.plan_send(state, key, true, now, &mut fx),
            }
        }
        self.apply(fx);
    }

    fn update_interval(self: &Arc<Self>, key: &PollKey, interval: Duration) {
        if interval.is_zero() {
            warn!(key = %key, "Ignoring zero poll interval");
            return;
        }

        let mut state = self.state.lock();
        let Some(entry) = state.entries.get_mut(key) else {
            warn!(key = %key, "update_interval for unknown entry");
            return;
        };

        entry.base_active_interval = interval;
        entry.active_interval = interval;
        entry.interval = entry.target_interval();
        entry.next_due = Some(Instant::now() + RESCHEDULE_SOON);
        self.schedule(entry, key, RESCHEDULE_SOON);

        debug!(
            key = %key,
            active_ms = interval.as_millis() as u64,
            interval_ms = entry.interval.as_millis() as u64,
            "Poll interval updated"
        );
    }
}

// ============================================================================
// PollerInner - Ticks
// ============================================================================

impl PollerInner {
    /// Replaces the entry's timer with one firing after `delay`.
    fn schedule(self: &Arc<Self>, entry: &mut PollEntry, key: &PollKey, delay: Duration) {
        entry.cancel_timer();
        if entry.suspended {
            return;
        }

        let epoch = entry.epoch;
        let weak = Arc::downgrade(self);
        let key = key.clone();
        entry.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                inner.on_timer(&key, epoch);
            }
        }));
    }

    fn on_timer(self: &Arc<Self>, key: &PollKey, epoch: u64) {
        let mut fx = Effects::default();
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let Some(entry) = state.entries.get_mut(key) else {
                return;
            };
            if entry.epoch != epoch || entry.suspended {
                return;
            }
            // This task is the timer; detach rather than abort it.
            entry.timer = None;
            let strategy = entry.strategy;

            let now = Instant::now();
            match strategy {
                PollStrategy::Shifting => self.shifting_tick(state, key, now, &mut fx),
                PollStrategy::Fixed => self.fixed_tick(state, key, now, &mut fx),
            }
        }
        self.apply(fx);
    }

    fn shifting_tick(self: &Arc<Self>, state: &mut PollerState, key: &PollKey, now: Instant, fx: &mut Effects) {
        let Some(entry) = state.entries.get_mut(key) else {
            return;
        };
        entry.failures += 1;
        let reached = entry.failures >= self.options.fail_threshold;
        trace!(key = %key, failures = entry.failures, "Shifting tick");

        self.plan_send(state, key, false, now, fx);

        if reached {
            self.suspend_locked(state, key, SuspendReason::FailThreshold, fx);
            return;
        }

        if let Some(entry) = state.entries.get_mut(key) {
            let interval = entry.interval;
            entry.next_due = Some(now + interval);
            self.schedule(entry, key, interval);
        }
    }

    fn fixed_tick(self: &Arc<Self>, state: &mut PollerState, key: &PollKey, now: Instant, fx: &mut Effects) {
        let Some(entry) = state.entries.get_mut(key) else {
            return;
        };
        let planned = entry.next_due.unwrap_or(now);
        let drift = now.saturating_duration_since(planned);

        match self.check_in_flight(entry, key, drift, now) {
            FixedStep::Wait => {}
            FixedStep::Send => self.plan_send(state, key, false, now, fx),
            FixedStep::Suspend => {
                self.suspend_locked(state, key, SuspendReason::FailThreshold, fx);
                return;
            }
        }

        let Some(entry) = state.entries.get_mut(key) else {
            return;
        };
        let mut next = planned + entry.interval;
        if next + REANCHOR_SLACK < now {
            next = now + entry.interval;
        }
        entry.next_due = Some(next);
        self.schedule(entry, key, next.saturating_duration_since(now));
    }

    /// Drift-aware timeout check for the tracked request.
    fn check_in_flight(&self, entry: &mut PollEntry, key: &PollKey, drift: Duration, now: Instant) -> FixedStep {
        let interval = entry.interval;
        let timeout = interval.mul_f64(self.options.grace_factor);
        let throttled = drift > interval.mul_f64(self.options.throttle_drift_factor);

        let Some(in_flight) = entry.in_flight.as_mut() else {
            return FixedStep::Send;
        };
        if in_flight.timed_out {
            return FixedStep::Send;
        }

        let effective = if throttled {
            timeout.mul_f64(self.options.throttle_multiplier)
        } else {
            timeout
        };
        let age = now.saturating_duration_since(in_flight.started_at);

        if age <= effective {
            trace!(key = %key, request_id = %in_flight.request_id, age_ms = age.as_millis() as u64, "Poll still in flight");
            return FixedStep::Wait;
        }

        in_flight.timed_out = true;
        entry.failures += 1;
        warn!(
            key = %key,
            request_id = %in_flight.request_id,
            age_ms = age.as_millis() as u64,
            timeout_ms = effective.as_millis() as u64,
            failures = entry.failures,
            throttled,
            "Poll timed out"
        );

        if entry.failures >= self.options.fail_threshold {
            FixedStep::Suspend
        } else {
            FixedStep::Send
        }
    }

    /// Assigns a request id and records the send; the fire itself happens
    /// in [`apply`](Self::apply).
    fn plan_send(&self, state: &mut PollerState, key: &PollKey, force: bool, now: Instant, fx: &mut Effects) {
        let Some(entry) = state.entries.get_mut(key) else {
            return;
        };
        if entry.suspended {
            return;
        }

        let rid = self.ids.lock().next_id();
        entry.last_send_at = Some(now);
        entry.last_request_rid = Some(rid);
        if entry.strategy == PollStrategy::Fixed {
            entry.in_flight = Some(InFlight {
                request_id: rid,
                started_at: now,
                timed_out: false,
            });
        }

        let mut command = Command::new(entry.cmd.clone())
            .device(entry.device)
            .with_request_id(rid);
        if let Some(data) = &entry.data {
            command = command.data(data.clone());
        }
        let event = SendEvent {
            cmd: entry.cmd.clone(),
            device: entry.device,
            request_id: rid,
            force,
            strategy: entry.strategy,
        };

        state.index_rid(rid, key.clone(), self.options.rid_index_capacity);
        fx.sends.push((key.clone(), command, event));
    }

    fn suspend_locked(&self, state: &mut PollerState, key: &PollKey, reason: SuspendReason, fx: &mut Effects) {
        let Some(entry) = state.entries.get_mut(key) else {
            return;
        };
        if entry.suspended {
            return;
        }

        entry.suspended = true;
        entry.cancel_timer();
        if reason == SuspendReason::Manual {
            entry.failures = entry.failures.max(self.options.fail_threshold);
        }

        warn!(key = %key, failures = entry.failures, reason = %reason, "Polling suspended");
        fx.suspended.push(SuspendEvent {
            cmd: entry.cmd.clone(),
            device: entry.device,
            reason,
        });
    }
}

// ============================================================================
// PollerInner - Inbound
// ============================================================================

impl PollerInner {
    fn on_frame(self: &Arc<Self>, frame: &Frame) {
        if frame.has_code(codes::DEVICE_OFFLINE) {
            self.handle_offline(frame);
            return;
        }
        if let Some(origin) = frame.response_origin() {
            self.handle_success(origin, frame);
        }
    }

    fn handle_success(self: &Arc<Self>, origin: &str, frame: &Frame) {
        let Some(device) = frame.device() else {
            return;
        };
        let key = PollKey::new(origin, device);
        let now = Instant::now();
        let mut fx = Effects::default();

        {
            let mut state = self.state.lock();
            let Some(entry) = state.entries.get_mut(&key) else {
                return;
            };
            if entry.offline || entry.suspended {
                trace!(key = %key, "Response ignored: entry paused");
                return;
            }

            let request_id = match entry.strategy {
                PollStrategy::Shifting => {
                    let has_data = !frame.data_is_empty();
                    if has_data != entry.has_data {
                        entry.has_data = has_data;
                        entry.interval = entry.target_interval();
                        let interval = entry.interval;
                        entry.next_due = Some(now + interval);
                        self.schedule(entry, &key, interval);
                        debug!(key = %key, has_data, interval_ms = interval.as_millis() as u64, "Poll interval shifted");
                    }
                    None
                }

                PollStrategy::Fixed => {
                    let rid = frame.request_id;
                    if let (Some(rid), Some(current)) = (rid, entry.in_flight) {
                        if current.request_id != rid {
                            debug!(key = %key, request_id = %rid, "Late response ignored");
                            return;
                        }
                        entry.in_flight = None;
                    }
                    if rid.is_some() && entry.last_response_rid == rid {
                        return;
                    }
                    entry.last_response_rid = rid.or(entry.last_response_rid).or(entry.last_request_rid);
                    rid
                }
            };

            entry.failures = 0;
            entry.last_response_at = Some(now);
            fx.succeeded.push(SuccessEvent {
                cmd: entry.cmd.clone(),
                device: entry.device,
                request_id,
            });
        }

        self.apply(fx);
    }

    fn handle_offline(self: &Arc<Self>, frame: &Frame) {
        let mut fx = Effects::default();
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;

            let by_rid = frame
                .request_id
                .and_then(|rid| state.rid_index.get(&rid))
                .filter(|key| state.entries.contains_key(*key))
                .cloned();

            let keys: Vec<PollKey> = if let Some(key) = by_rid {
                vec![key]
            } else if let (Some(origin), Some(device)) = (frame.response_origin(), frame.device())
                && state.entries.contains_key(&PollKey::new(origin, device))
            {
                vec![PollKey::new(origin, device)]
            } else if let Some(device) = frame.device() {
                state
                    .entries
                    .keys()
                    .filter(|key| key.device() == device)
                    .cloned()
                    .collect()
            } else {
                Vec::new()
            };

            if keys.is_empty() {
                debug!(request_id = ?frame.request_id, cmd = frame.cmd(), "Offline frame matched no entry");
            }

            for key in keys {
                let Some(entry) = state.entries.get_mut(&key) else {
                    continue;
                };
                if entry.suspended {
                    debug!(key = %key, "Offline ignored: already suspended");
                    continue;
                }
                entry.failures = entry.failures.max(self.options.fail_threshold);
                entry.offline = true;
                self.suspend_locked(state, &key, SuspendReason::Offline, &mut fx);
            }
        }
        self.apply(fx);
    }

    /// Tracks the id the send path actually used when it replaced ours.
    fn rekey(&self, key: &PollKey, planned: RequestId, actual: RequestId) {
        debug!(key = %key, planned = %planned, actual = %actual, "Send path replaced poll request id");
        let mut state = self.state.lock();
        state.rid_index.remove(&planned);
        state.rid_order.retain(|rid| *rid != planned);
        if let Some(entry) = state.entries.get_mut(key) {
            if entry.last_request_rid == Some(planned) {
                entry.last_request_rid = Some(actual);
            }
            if let Some(in_flight) = entry.in_flight.as_mut()
                && in_flight.request_id == planned
            {
                in_flight.request_id = actual;
            }
        }
        state.index_rid(actual, key.clone(), self.options.rid_index_capacity);
    }

    /// Performs collected effects. Must be called without the state lock.
    fn apply(&self, fx: Effects) {
        for (key, command, mut event) in fx.sends {
            match self.path.fire(command) {
                Ok(actual) => {
                    if actual != event.request_id {
                        self.rekey(&key, event.request_id, actual);
                        event.request_id = actual;
                    }
                    self.send_listeners.emit(&event);
                }
                Err(e) => {
                    warn!(cmd = %event.cmd, device = %event.device, error = %e, "Poll send failed; counted as a miss");
                }
            }
        }

        for event in fx.suspended {
            self.notifier.notify(
                Severity::Warn,
                &format!("Device not responding, refresh paused: {}", event.device),
            );
            self.suspend_listeners.emit(&event);
        }

        for event in fx.resumed {
            self.resume_listeners.emit(&event);
        }

        for event in fx.succeeded {
            self.success_listeners.emit(&event);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
