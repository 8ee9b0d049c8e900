//! Logical tick driver.
//!
//! The host calls [`TickDriver::tick`] once per frame (or per scheduler
//! interval). Each tick advances a logical clock, wakes every future waiting
//! on a [`TickClock`], and notifies registered [`Tickable`] components such
//! as the event bus. All time in this crate is measured against this clock,
//! never against the wall clock, so behaviour is deterministic under test.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;

/// Snapshot of the logical clock after a tick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickInfo {
    /// Number of ticks driven so far.
    pub frame: u64,
    /// Time advanced by the most recent tick.
    pub delta: Duration,
    /// Total time advanced since the driver was created.
    pub elapsed: Duration,
}

/// A component that wants to run once per tick.
pub trait Tickable: Send + Sync {
    fn on_tick(&self, tick: &TickInfo);
}

/// The tick driver was dropped while a future was waiting on it.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("tick driver stopped before the wait completed")]
pub struct ClockStopped;

/// Owner of the logical clock.
pub struct TickDriver {
    clock: watch::Sender<TickInfo>,
    tickables: Vec<Weak<dyn Tickable>>,
}

impl TickDriver {
    pub fn new() -> Self {
        let (clock, _) = watch::channel(TickInfo::default());
        Self {
            clock,
            tickables: Vec::new(),
        }
    }

    /// A cloneable read handle on this driver's clock.
    pub fn clock(&self) -> TickClock {
        TickClock {
            rx: self.clock.subscribe(),
        }
    }

    /// Current clock value.
    pub fn now(&self) -> TickInfo {
        *self.clock.borrow()
    }

    /// Register a component to be ticked. The driver only holds it weakly:
    /// once every strong reference is dropped the component stops ticking.
    pub fn register<T>(&mut self, tickable: &Arc<T>)
    where
        T: Tickable + 'static,
    {
        let strong: Arc<dyn Tickable> = tickable.clone();
        self.tickables.push(Arc::downgrade(&strong));
    }

    /// Advance the clock by `delta` and run one tick.
    pub fn tick(&mut self, delta: Duration) -> TickInfo {
        let previous = self.now();
        let info = TickInfo {
            frame: previous.frame + 1,
            delta,
            elapsed: previous.elapsed + delta,
        };
        self.clock.send_replace(info);

        self.tickables.retain(|weak| weak.strong_count() > 0);
        let live: Vec<Arc<dyn Tickable>> =
            self.tickables.iter().filter_map(Weak::upgrade).collect();
        for tickable in live {
            tickable.on_tick(&info);
        }

        info
    }
}

impl Default for TickDriver {
    fn default() -> Self {
        Self::new()
    }
}

/// Read handle on the logical clock; awaits are resolved by ticks.
#[derive(Clone, Debug)]
pub struct TickClock {
    rx: watch::Receiver<TickInfo>,
}

impl TickClock {
    pub fn now(&self) -> TickInfo {
        *self.rx.borrow()
    }

    pub fn frame(&self) -> u64 {
        self.now().frame
    }

    /// Resolve on the next tick.
    pub fn next_frame(&self) -> impl Future<Output = Result<TickInfo, ClockStopped>> + Send {
        self.wait_frames(1)
    }

    /// Resolve once `frames` more ticks have been driven. Counting starts at
    /// the call, not at the first poll.
    pub fn wait_frames(
        &self,
        frames: u64,
    ) -> impl Future<Output = Result<TickInfo, ClockStopped>> + Send {
        let target = self.frame() + frames;
        wait_until(self.rx.clone(), move |tick| tick.frame >= target)
    }

    /// Resolve once the clock has advanced by at least `duration` since the
    /// call.
    pub fn wait_for(
        &self,
        duration: Duration,
    ) -> impl Future<Output = Result<TickInfo, ClockStopped>> + Send {
        let deadline = self.now().elapsed + duration;
        wait_until(self.rx.clone(), move |tick| tick.elapsed >= deadline)
    }
}

async fn wait_until<F>(
    mut rx: watch::Receiver<TickInfo>,
    done: F,
) -> Result<TickInfo, ClockStopped>
where
    F: Fn(&TickInfo) -> bool,
{
    loop {
        let current = *rx.borrow_and_update();
        if done(&current) {
            return Ok(current);
        }
        rx.changed().await.map_err(|_| ClockStopped)?;
    }
}
