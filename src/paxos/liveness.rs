//! Failure injection for acceptors.
//!
//! Every replica runs a [`FailureLoop`] that takes its acceptor down for a
//! while and brings it back. A shared [`LivenessGate`] caps how many are down
//! at once, so with `N - max > N / 2` a proposer can always find a majority.

use std::{
    ops::RangeInclusive,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::{Condvar, Mutex};
use rand::{
    distributions::{Distribution, Uniform},
    thread_rng,
};
use tracing::{info, warn};

use crate::Config;

/// Counts sleeping acceptors, `0..=max`.
#[derive(Debug)]
pub struct LivenessGate {
    max: usize,
    sleeping: Mutex<usize>,
    cvar: Condvar,
}

/// One acceptor's right to be down. Dropping it wakes a waiter.
#[derive(Debug)]
pub struct SleepPermit<'a> {
    gate: &'a LivenessGate,
}

impl Drop for SleepPermit<'_> {
    fn drop(&mut self) {
        self.gate.release();
    }
}

impl LivenessGate {
    pub fn new(max: usize) -> Self {
        Self {
            max,
            sleeping: Mutex::new(0),
            cvar: Condvar::new(),
        }
    }

    pub fn sleeping(&self) -> usize {
        *self.sleeping.lock()
    }

    pub fn try_acquire(&self) -> Option<SleepPermit<'_>> {
        let mut n = self.sleeping.lock();
        if *n >= self.max {
            return None;
        }
        *n += 1;
        Some(SleepPermit { gate: self })
    }

    /// Block until a slot frees up or `timeout` passes.
    pub fn acquire_timeout(&self, timeout: Duration) -> Option<SleepPermit<'_>> {
        let mut n = self.sleeping.lock();
        while *n >= self.max {
            if self.cvar.wait_for(&mut n, timeout).timed_out() {
                if *n >= self.max {
                    return None;
                }
                break;
            }
        }
        *n += 1;
        Some(SleepPermit { gate: self })
    }

    fn release(&self) {
        let mut n = self.sleeping.lock();
        match n.checked_sub(1) {
            Some(v) => *n = v,
            None => warn!("liveness gate released with nobody sleeping"),
        }
        self.cvar.notify_all();
    }
}

/// Whether a replica's acceptor role currently answers.
#[derive(Debug, Clone)]
pub struct Availability(Arc<AtomicBool>);

impl Default for Availability {
    fn default() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }
}

impl Availability {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_up(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn set_up(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn set_down(&self) {
        self.0.store(false, Ordering::Release);
    }
}

#[derive(Debug, Clone)]
pub struct FailureTiming {
    /// How long an acceptor is down once it takes a slot.
    pub failure_interval: RangeInclusive<Duration>,
    /// Extra downtime before it answers again and gives the slot back.
    pub restart_delay: RangeInclusive<Duration>,
}

impl Default for FailureTiming {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for FailureTiming {
    fn from(cfg: &Config) -> Self {
        let ms = |r: [u64; 2]| Duration::from_millis(r[0])..=Duration::from_millis(r[1]);
        Self {
            failure_interval: ms(cfg.failure_interval_ms),
            restart_delay: ms(cfg.restart_delay_ms),
        }
    }
}

/// Wake up at least this often to notice a stop request.
const POLL: Duration = Duration::from_millis(50);

pub struct FailureLoop {
    port: u16,
    gate: Arc<LivenessGate>,
    availability: Availability,
    timing: FailureTiming,
    stop: Receiver<()>,
}

pub struct FailureLoopHandle {
    stop: Sender<()>,
    join: JoinHandle<()>,
}

impl FailureLoopHandle {
    /// Stop the loop and wait for it. The acceptor is left up.
    pub fn stop(self) {
        drop(self.stop);
        if self.join.join().is_err() {
            warn!("failure loop panicked");
        }
    }
}

impl FailureLoop {
    pub fn spawn(
        port: u16,
        gate: Arc<LivenessGate>,
        availability: Availability,
        timing: FailureTiming,
    ) -> std::io::Result<FailureLoopHandle> {
        let (stop_tx, stop) = bounded(0);
        let lp = FailureLoop {
            port,
            gate,
            availability,
            timing,
            stop,
        };
        let join = thread::Builder::new()
            .name(format!("acceptor-failure-{port}"))
            .spawn(move || lp.run())?;
        Ok(FailureLoopHandle {
            stop: stop_tx,
            join,
        })
    }

    fn stopped(&self) -> bool {
        !matches!(self.stop.try_recv(), Err(TryRecvError::Empty))
    }

    /// Sleep for `d`. True if told to stop meanwhile.
    fn pause(&self, d: Duration) -> bool {
        !matches!(self.stop.recv_timeout(d), Err(RecvTimeoutError::Timeout))
    }

    fn sample(range: &RangeInclusive<Duration>) -> Duration {
        Uniform::new_inclusive(*range.start(), *range.end()).sample(&mut thread_rng())
    }

    fn run(self) {
        while !self.stopped() {
            let Some(permit) = self.gate.acquire_timeout(POLL) else {
                continue;
            };

            self.availability.set_down();
            info!(port = self.port, "acceptor thread failed, restarting...");
            let stop = self.pause(Self::sample(&self.timing.failure_interval))
                || self.pause(Self::sample(&self.timing.restart_delay));

            // Up again before the slot is handed to someone else.
            self.availability.set_up();
            drop(permit);
            info!(port = self.port, "acceptor thread restarted");

            if stop {
                break;
            }
        }
        self.availability.set_up();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn gate_never_over_admits() {
        let gate = LivenessGate::new(2);
        let a = gate.try_acquire().unwrap();
        let _b = gate.try_acquire().unwrap();
        assert!(gate.try_acquire().is_none());
        assert_eq!(gate.sleeping(), 2);

        drop(a);
        assert_eq!(gate.sleeping(), 1);
        assert!(gate.try_acquire().is_some());
        assert_eq!(gate.sleeping(), 1);
    }

    #[test]
    fn acquire_times_out_at_capacity() {
        let gate = LivenessGate::new(1);
        let _held = gate.try_acquire().unwrap();
        let start = Instant::now();
        assert!(gate.acquire_timeout(Duration::from_millis(30)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn waiter_wakes_on_release() {
        let gate = Arc::new(LivenessGate::new(1));
        let held = gate.try_acquire().unwrap();
        let g = gate.clone();
        let waiter = thread::spawn(move || g.acquire_timeout(Duration::from_secs(5)).is_some());
        thread::sleep(Duration::from_millis(20));
        drop(held);
        assert!(waiter.join().unwrap());
        assert_eq!(gate.sleeping(), 0);
    }

    #[test]
    fn zero_capacity_never_admits() {
        let gate = LivenessGate::new(0);
        assert!(gate.try_acquire().is_none());
        assert!(gate.acquire_timeout(Duration::from_millis(5)).is_none());
    }

    #[test]
    fn timing_from_config() {
        let t = FailureTiming::default();
        assert_eq!(*t.failure_interval.start(), Duration::from_secs(5));
        assert_eq!(*t.failure_interval.end(), Duration::from_secs(10));
        assert_eq!(*t.restart_delay.start(), Duration::from_secs(2));
        assert_eq!(*t.restart_delay.end(), Duration::from_secs(5));
    }

    #[test]
    fn loop_takes_acceptor_down_and_back() {
        let gate = Arc::new(LivenessGate::new(1));
        let avail = Availability::new();
        let timing = FailureTiming {
            failure_interval: Duration::from_millis(1)..=Duration::from_millis(2),
            restart_delay: Duration::from_millis(40)..=Duration::from_millis(40),
        };
        let h = FailureLoop::spawn(1, gate.clone(), avail.clone(), timing).unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while avail.is_up() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(!avail.is_up());
        assert_eq!(gate.sleeping(), 1);

        h.stop();
        assert!(avail.is_up());
        assert_eq!(gate.sleeping(), 0);
    }

    #[test]
    fn down_as_soon_as_slot_is_taken() {
        let gate = Arc::new(LivenessGate::new(1));
        let avail = Availability::new();
        let timing = FailureTiming {
            failure_interval: Duration::from_millis(300)..=Duration::from_millis(300),
            restart_delay: Duration::ZERO..=Duration::ZERO,
        };
        let h = FailureLoop::spawn(1, gate.clone(), avail.clone(), timing).unwrap();

        let deadline = Instant::now() + Duration::from_millis(150);
        while avail.is_up() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        // Well inside the failure interval.
        assert!(!avail.is_up());
        assert_eq!(gate.sleeping(), 1);

        h.stop();
        assert!(avail.is_up());
        assert_eq!(gate.sleeping(), 0);
    }
}
