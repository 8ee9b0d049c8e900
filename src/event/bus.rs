//! Listener registry and dispatcher.

use super::error::{DispatchError, ListenerError};
use super::param::{EventParam, ParamCache};
use super::EventId;
use crate::failure::{FailureOrigin, FailureSink};
use crate::pool::{InvalidRelease, Pooled};
use crate::tick::{TickClock, TickInfo, Tickable};
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use stillwater::validation::Validation;
use stillwater::NonEmptyVec;

/// A registered listener. Identity is the `Arc` allocation: registering the
/// same `Listener` twice for one event is rejected, and removal matches by
/// pointer.
pub type Listener =
    Arc<dyn Fn(EventId, Option<&dyn EventParam>) -> Result<(), ListenerError> + Send + Sync>;

/// Wrap a closure as a [`Listener`].
pub fn listener<F>(f: F) -> Listener
where
    F: Fn(EventId, Option<&dyn EventParam>) -> Result<(), ListenerError> + Send + Sync + 'static,
{
    Arc::new(f)
}

fn same_listener(a: &Listener, b: &Listener) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Due {
    /// Deliver on the first tick whose frame is past this one.
    AfterFrame(u64),
    /// Deliver once the clock's elapsed time reaches this point.
    At(Duration),
}

impl Due {
    fn reached(self, tick: &TickInfo) -> bool {
        match self {
            Self::AfterFrame(frame) => tick.frame > frame,
            Self::At(deadline) => tick.elapsed >= deadline,
        }
    }
}

struct Pending {
    event: EventId,
    param: Option<Box<dyn EventParam>>,
    due: Due,
}

#[derive(Default)]
struct Registry {
    listeners: HashMap<EventId, Vec<Listener>>,
    pending: Vec<Pending>,
    params: ParamCache,
    shut_down: bool,
}

/// Publish/subscribe hub keyed by integer event ids.
///
/// Immediate dispatch runs listeners on the caller's task and returns their
/// failures. Next-frame and delayed dispatch are queued and delivered from
/// [`Tickable::on_tick`], so the bus must be registered with the
/// [`TickDriver`](crate::tick::TickDriver) that owns `clock`; failures of
/// queued deliveries go to the [`FailureSink`].
///
/// Listeners are called without any lock held, so they may add or remove
/// listeners and fire further events.
pub struct EventBus {
    registry: Mutex<Registry>,
    clock: TickClock,
    failures: FailureSink,
}

impl EventBus {
    pub fn new(clock: TickClock, failures: FailureSink) -> Self {
        Self {
            registry: Mutex::new(Registry::default()),
            clock,
            failures,
        }
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Subscribe `listener` to `event`. Returns `false` (and logs an error)
    /// if it is already subscribed.
    pub fn add_listener(&self, event: EventId, listener: &Listener) -> bool {
        let mut registry = self.registry();
        let listeners = registry.listeners.entry(event).or_default();
        if listeners.iter().any(|l| same_listener(l, listener)) {
            tracing::error!(event, "listener already registered");
            return false;
        }
        listeners.push(Arc::clone(listener));
        true
    }

    /// Unsubscribe `listener` from `event`. Unknown listeners are ignored.
    pub fn remove_listener(&self, event: EventId, listener: &Listener) -> bool {
        let mut registry = self.registry();
        let Some(listeners) = registry.listeners.get_mut(&event) else {
            return false;
        };
        let before = listeners.len();
        listeners.retain(|l| !same_listener(l, listener));
        let removed = listeners.len() != before;
        if listeners.is_empty() {
            registry.listeners.remove(&event);
        }
        removed
    }

    pub fn has_listener(&self, event: EventId, listener: &Listener) -> bool {
        self.registry()
            .listeners
            .get(&event)
            .is_some_and(|ls| ls.iter().any(|l| same_listener(l, listener)))
    }

    pub fn listener_count(&self, event: EventId) -> usize {
        self.registry().listeners.get(&event).map_or(0, Vec::len)
    }

    /// Number of queued next-frame and delayed deliveries.
    pub fn pending_count(&self) -> usize {
        self.registry().pending.len()
    }

    /// Dispatch `event` to every current listener before returning.
    ///
    /// An event with no listeners is a no-op. Every listener runs even if an
    /// earlier one fails; all failures are returned together.
    pub fn fire_event(
        &self,
        event: EventId,
        param: Option<&dyn EventParam>,
    ) -> Result<(), DispatchError> {
        let listeners = self.snapshot(event);
        if listeners.is_empty() {
            return Ok(());
        }
        tracing::debug!(event, listeners = listeners.len(), "dispatching event");

        let results: Vec<Validation<(), NonEmptyVec<ListenerError>>> = listeners
            .iter()
            .map(|listener| match listener(event, param) {
                Ok(()) => Validation::success(()),
                Err(e) => Validation::fail(e),
            })
            .collect();

        match Validation::all_vec(results).map(|_| ()) {
            Validation::Success(_) => Ok(()),
            Validation::Failure(errors) => Err(DispatchError {
                event,
                failures: errors.iter().cloned().collect(),
            }),
        }
    }

    /// Queue `event` for the next tick.
    pub fn fire_event_next_frame(&self, event: EventId, param: Option<Box<dyn EventParam>>) {
        let due = Due::AfterFrame(self.clock.frame());
        self.enqueue(event, param, due);
    }

    /// Queue `event` for the first tick at which the clock has advanced by
    /// at least `delay` from now.
    pub fn fire_event_delay(
        &self,
        event: EventId,
        param: Option<Box<dyn EventParam>>,
        delay: Duration,
    ) {
        let due = Due::At(self.clock.now().elapsed + delay);
        self.enqueue(event, param, due);
    }

    fn enqueue(&self, event: EventId, param: Option<Box<dyn EventParam>>, due: Due) {
        let mut registry = self.registry();
        if registry.shut_down {
            tracing::warn!(event, "event bus is shut down; deferred event dropped");
            return;
        }
        registry.pending.push(Pending { event, param, due });
    }

    fn snapshot(&self, event: EventId) -> Vec<Listener> {
        self.registry()
            .listeners
            .get(&event)
            .cloned()
            .unwrap_or_default()
    }

    /// Take a reset parameter of type `T` from the shared cache.
    pub fn acquire_param<T: EventParam + Default>(&self) -> Pooled<T> {
        self.registry().params.acquire::<T>()
    }

    /// Give a parameter back to the shared cache.
    pub fn release_param<T: EventParam + Default>(
        &self,
        param: Pooled<T>,
    ) -> Result<(), InvalidRelease<T>> {
        self.registry().params.release(param)
    }

    /// Remove every listener and drop every queued delivery.
    pub fn clear(&self) {
        let mut registry = self.registry();
        registry.listeners.clear();
        registry.pending.clear();
    }

    /// Drop queued deliveries and refuse new ones. Immediate dispatch keeps
    /// working for listeners still registered.
    pub fn shutdown(&self) {
        let mut registry = self.registry();
        let dropped = registry.pending.len();
        registry.pending.clear();
        registry.params.clear();
        registry.shut_down = true;
        tracing::debug!(dropped, "event bus shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.registry().shut_down
    }

    /// Human-readable listing of listeners per event and queued deliveries.
    pub fn dump(&self) -> String {
        let registry = self.registry();
        let sorted: BTreeMap<_, _> = registry
            .listeners
            .iter()
            .map(|(event, ls)| (*event, ls.len()))
            .collect();

        let mut out = String::new();
        for (event, count) in sorted {
            let _ = writeln!(out, "event {event}: {count} listener(s)");
        }
        for pending in &registry.pending {
            let param = pending
                .param
                .as_deref()
                .map_or("none", |p| p.param_type());
            let _ = writeln!(
                out,
                "pending event {} ({:?}), param {param}",
                pending.event, pending.due
            );
        }
        out
    }
}

impl Tickable for EventBus {
    fn on_tick(&self, tick: &TickInfo) {
        let due: Vec<Pending> = {
            let mut registry = self.registry();
            let (due, waiting): (Vec<Pending>, Vec<Pending>) = std::mem::take(&mut registry.pending)
                .into_iter()
                .partition(|p| p.due.reached(tick));
            registry.pending = waiting;
            due
        };

        for pending in due {
            let param = pending.param.as_deref();
            if let Err(err) = self.fire_event(pending.event, param) {
                self.failures
                    .report(FailureOrigin::Event(pending.event), err.to_string());
            }
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = self.registry();
        f.debug_struct("EventBus")
            .field("events", &registry.listeners.len())
            .field("pending", &registry.pending.len())
            .field("shut_down", &registry.shut_down)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{expect_param, IntParam};
    use crate::tick::TickDriver;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const SCORE: EventId = 1;
    const QUIT: EventId = 2;

    fn bus() -> (TickDriver, Arc<EventBus>) {
        let mut driver = TickDriver::new();
        let bus = Arc::new(EventBus::new(driver.clock(), FailureSink::new()));
        driver.register(&bus);
        (driver, bus)
    }

    fn counter() -> (Arc<AtomicUsize>, Listener) {
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&hits);
        let l = listener(move |_, _| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        (hits, l)
    }

    #[test]
    fn firing_without_listeners_is_a_no_op() {
        let (_driver, bus) = bus();
        assert!(bus.fire_event(QUIT, None).is_ok());
    }

    #[test]
    fn duplicate_registration_is_ignored() {
        let (_driver, bus) = bus();
        let (hits, l) = counter();

        assert!(bus.add_listener(SCORE, &l));
        assert!(!bus.add_listener(SCORE, &l));
        assert_eq!(bus.listener_count(SCORE), 1);

        bus.fire_event(SCORE, None).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn remove_unknown_listener_is_silent() {
        let (_driver, bus) = bus();
        let (_, l) = counter();
        assert!(!bus.remove_listener(SCORE, &l));

        bus.add_listener(SCORE, &l);
        assert!(bus.remove_listener(SCORE, &l));
        assert!(!bus.has_listener(SCORE, &l));
        assert_eq!(bus.listener_count(SCORE), 0);
    }

    #[test]
    fn listeners_receive_the_param() {
        let (_driver, bus) = bus();
        let total = Arc::new(AtomicUsize::new(0));
        let sum = Arc::clone(&total);
        let l = listener(move |_, param| {
            let score = expect_param::<IntParam>(param)?;
            sum.fetch_add(score.value as usize, Ordering::SeqCst);
            Ok(())
        });
        bus.add_listener(SCORE, &l);

        bus.fire_event(SCORE, Some(&IntParam::new(5))).unwrap();
        bus.fire_event(SCORE, Some(&IntParam::new(7))).unwrap();
        assert_eq!(total.load(Ordering::SeqCst), 12);
    }

    #[test]
    fn immediate_dispatch_collects_every_failure() {
        let (_driver, bus) = bus();
        let (hits, ok) = counter();
        let strict = listener(|_, param| expect_param::<IntParam>(param).map(|_| ()));
        let broken = listener(|_, _| Err(ListenerError::msg("boom")));
        bus.add_listener(SCORE, &strict);
        bus.add_listener(SCORE, &ok);
        bus.add_listener(SCORE, &broken);

        let err = bus.fire_event(SCORE, None).unwrap_err();
        assert_eq!(err.event, SCORE);
        assert_eq!(err.failures.len(), 2);
        assert_eq!(err.failures[1], ListenerError::msg("boom"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn listener_may_unsubscribe_itself_during_dispatch() {
        let (_driver, bus) = bus();
        let slot: Arc<Mutex<Option<Listener>>> = Arc::default();
        let weak_bus = Arc::downgrade(&bus);
        let me = Arc::clone(&slot);
        let once = listener(move |event, _| {
            if let (Some(bus), Some(l)) = (weak_bus.upgrade(), me.lock().unwrap().clone()) {
                bus.remove_listener(event, &l);
            }
            Ok(())
        });
        *slot.lock().unwrap() = Some(Arc::clone(&once));
        bus.add_listener(QUIT, &once);

        bus.fire_event(QUIT, None).unwrap();
        assert_eq!(bus.listener_count(QUIT), 0);
    }

    #[test]
    fn next_frame_waits_for_a_tick() {
        let (mut driver, bus) = bus();
        let (hits, l) = counter();
        bus.add_listener(SCORE, &l);

        bus.fire_event_next_frame(SCORE, None);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(bus.pending_count(), 1);

        driver.tick(Duration::from_millis(16));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(bus.pending_count(), 0);
    }

    #[test]
    fn shutdown_drops_pending_and_refuses_new() {
        let (mut driver, bus) = bus();
        let (hits, l) = counter();
        bus.add_listener(SCORE, &l);
        bus.fire_event_delay(SCORE, None, Duration::from_secs(1));

        bus.shutdown();
        bus.fire_event_next_frame(SCORE, None);
        driver.tick(Duration::from_secs(2));

        assert!(bus.is_shut_down());
        assert_eq!(bus.pending_count(), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn clear_removes_listeners_and_pending() {
        let (_driver, bus) = bus();
        let (_, l) = counter();
        bus.add_listener(SCORE, &l);
        bus.add_listener(QUIT, &l);
        bus.fire_event_next_frame(SCORE, None);

        bus.clear();
        assert_eq!(bus.listener_count(SCORE), 0);
        assert_eq!(bus.listener_count(QUIT), 0);
        assert_eq!(bus.pending_count(), 0);
    }

    #[test]
    fn dump_lists_events_in_order() {
        let (_driver, bus) = bus();
        let (_, a) = counter();
        let (_, b) = counter();
        bus.add_listener(QUIT, &a);
        bus.add_listener(SCORE, &a);
        bus.add_listener(SCORE, &b);
        bus.fire_event_next_frame(QUIT, Some(Box::new(IntParam::new(1))));

        let dump = bus.dump();
        let lines: Vec<&str> = dump.lines().collect();
        assert_eq!(lines[0], "event 1: 2 listener(s)");
        assert_eq!(lines[1], "event 2: 1 listener(s)");
        assert!(lines[2].starts_with("pending event 2"));
        assert!(lines[2].contains("Value<i64>"));
    }

    #[test]
    fn param_cache_round_trip() {
        let (_driver, bus) = bus();
        let mut param = bus.acquire_param::<IntParam>();
        param.value = 9;
        bus.release_param(param).unwrap();

        assert_eq!(bus.acquire_param::<IntParam>().value, 0);
    }
}
