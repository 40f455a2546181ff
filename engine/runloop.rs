// Repeat-until-stopped dedicated-thread primitive
use std::io::{self, Result};
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use sock_core::{log_critical, log_error, LogHandle};

/// Default pacing between iterations.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(100);

/// Loop lifecycle. Transitions are monotonic within one activation:
/// Stopped -> Initializing -> Running -> Finished -> (joined) -> Stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Stopped,
    Initializing,
    Running,
    Finished,
}

/// What the loop body wants next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    Continue,
    Stop,
}

struct Inner<T> {
    state: LoopState,
    run: bool,
    context: T,
}

/// Runs a body function repeatedly in a dedicated OS thread until told to
/// stop. One mutex guards the run flag, the state, and the caller's context;
/// the body executes under that lock, and `lock()` hands the same lock to
/// outside callers so they can share data with the body safely.
pub struct ThreadLoop<T: Send + 'static> {
    name: String,
    shared: Arc<(Mutex<Inner<T>>, Condvar)>,
    handle: Option<JoinHandle<()>>,
    interval: Duration,
    log: LogHandle,
}

/// Guard over the loop's caller context.
pub struct LoopGuard<'a, T> {
    inner: MutexGuard<'a, Inner<T>>,
}

impl<T> Deref for LoopGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner.context
    }
}

impl<T> DerefMut for LoopGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.inner.context
    }
}

fn lock_inner<'a, T>(
    mutex: &'a Mutex<Inner<T>>,
    log: &LogHandle,
    name: &str,
) -> MutexGuard<'a, Inner<T>> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            log_error!(log, "lock on loop {} poisoned, continuing", name);
            poisoned.into_inner()
        }
    }
}

impl<T: Send + 'static> ThreadLoop<T> {
    pub fn new(name: &str, context: T, interval: Duration) -> Self {
        ThreadLoop::with_logger(name, context, interval, LogHandle::global())
    }

    pub fn with_logger(name: &str, context: T, interval: Duration, log: LogHandle) -> Self {
        ThreadLoop {
            name: name.to_string(),
            shared: Arc::new((
                Mutex::new(Inner {
                    state: LoopState::Stopped,
                    run: false,
                    context,
                }),
                Condvar::new(),
            )),
            handle: None,
            interval,
            log,
        }
    }

    /// Spawn the loop thread. Fails when the loop is already active or the
    /// OS refuses the thread; on spawn failure the state rolls back to
    /// Stopped and no thread exists. Returns once the new thread has
    /// recorded Running.
    pub fn start<F>(&mut self, mut body: F) -> Result<()>
    where
        F: FnMut(&mut T) -> Tick + Send + 'static,
    {
        {
            let mut inner = lock_inner(&self.shared.0, &self.log, &self.name);
            if inner.state != LoopState::Stopped {
                return Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("loop {} is already active", self.name),
                ));
            }
            inner.state = LoopState::Initializing;
            inner.run = true;
        }

        let shared = Arc::clone(&self.shared);
        let interval = self.interval;
        let log = self.log.clone();
        let name = self.name.clone();
        let spawned = thread::Builder::new().name(self.name.clone()).spawn(move || {
            let (mutex, condvar) = &*shared;
            {
                let mut inner = lock_inner(mutex, &log, &name);
                inner.state = LoopState::Running;
                condvar.notify_all();
            }
            loop {
                {
                    let mut inner = lock_inner(mutex, &log, &name);
                    if !inner.run {
                        break;
                    }
                    if body(&mut inner.context) == Tick::Stop {
                        inner.run = false;
                        break;
                    }
                }
                thread::sleep(interval);
            }
            let mut inner = lock_inner(mutex, &log, &name);
            inner.state = LoopState::Finished;
            condvar.notify_all();
        });

        match spawned {
            Ok(handle) => {
                self.handle = Some(handle);
                let (mutex, condvar) = &*self.shared;
                let mut inner = lock_inner(mutex, &self.log, &self.name);
                while inner.state == LoopState::Initializing {
                    inner = match condvar.wait(inner) {
                        Ok(guard) => guard,
                        Err(poisoned) => poisoned.into_inner(),
                    };
                }
                Ok(())
            }
            Err(e) => {
                log_critical!(self.log, "spawning loop {} failed: {}", self.name, e);
                let mut inner = lock_inner(&self.shared.0, &self.log, &self.name);
                inner.state = LoopState::Stopped;
                inner.run = false;
                Err(e)
            }
        }
    }

    /// Cooperative shutdown: clear the run flag, join the thread (waiting
    /// out the current iteration and its sleep), settle on Stopped. No-op
    /// when already Stopped.
    pub fn stop(&mut self) {
        {
            let mut inner = lock_inner(&self.shared.0, &self.log, &self.name);
            if inner.state == LoopState::Stopped {
                return;
            }
            inner.run = false;
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log_error!(self.log, "loop {} thread panicked", self.name);
            }
        }
        lock_inner(&self.shared.0, &self.log, &self.name).state = LoopState::Stopped;
    }

    /// Non-blocking reaper for a loop whose body requested termination:
    /// joins and returns to Stopped when the thread has Finished. Returns
    /// true when a join happened.
    pub fn manage(&mut self) -> bool {
        {
            let inner = lock_inner(&self.shared.0, &self.log, &self.name);
            if inner.state != LoopState::Finished {
                return false;
            }
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log_error!(self.log, "loop {} thread panicked", self.name);
            }
        }
        lock_inner(&self.shared.0, &self.log, &self.name).state = LoopState::Stopped;
        true
    }

    pub fn state(&self) -> LoopState {
        lock_inner(&self.shared.0, &self.log, &self.name).state
    }

    /// True while the thread is alive and has not finished its loop.
    pub fn is_running(&self) -> bool {
        matches!(self.state(), LoopState::Initializing | LoopState::Running)
    }

    /// Take the loop's lock from outside the loop. The body holds the same
    /// lock during a tick, so the guard never observes a half-finished
    /// iteration.
    pub fn lock(&self) -> LoopGuard<'_, T> {
        LoopGuard {
            inner: lock_inner(&self.shared.0, &self.log, &self.name),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<T: Send + 'static> Drop for ThreadLoop<T> {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn wait_until(deadline: Duration, mut cond: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        cond()
    }

    #[test]
    fn starts_runs_and_stops() {
        let mut runloop = ThreadLoop::new("test-count", 0u64, Duration::from_millis(1));
        assert_eq!(runloop.state(), LoopState::Stopped);

        runloop
            .start(|count| {
                *count += 1;
                Tick::Continue
            })
            .unwrap();
        assert!(runloop.is_running());

        assert!(wait_until(Duration::from_secs(2), || *runloop.lock() >= 3));

        runloop.stop();
        assert_eq!(runloop.state(), LoopState::Stopped);
        let after_stop = *runloop.lock();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(*runloop.lock(), after_stop);
    }

    #[test]
    fn double_start_is_rejected() {
        let mut runloop = ThreadLoop::new("test-double", (), Duration::from_millis(1));
        runloop.start(|_| Tick::Continue).unwrap();
        let err = runloop.start(|_| Tick::Continue).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
        runloop.stop();
    }

    #[test]
    fn body_can_request_termination() {
        let mut runloop = ThreadLoop::new("test-selfstop", 0u32, Duration::from_millis(1));
        runloop
            .start(|count| {
                *count += 1;
                if *count >= 5 {
                    Tick::Stop
                } else {
                    Tick::Continue
                }
            })
            .unwrap();

        assert!(wait_until(Duration::from_secs(2), || {
            runloop.state() == LoopState::Finished
        }));
        assert_eq!(*runloop.lock(), 5);

        // manage() reclaims without blocking on stop()
        assert!(runloop.manage());
        assert_eq!(runloop.state(), LoopState::Stopped);
        assert!(!runloop.manage());
    }

    #[test]
    fn manage_is_a_no_op_while_running() {
        let mut runloop = ThreadLoop::new("test-manage", (), Duration::from_millis(1));
        runloop.start(|_| Tick::Continue).unwrap();
        assert!(!runloop.manage());
        assert!(runloop.is_running());
        runloop.stop();
    }

    #[test]
    fn restart_after_stop() {
        let mut runloop = ThreadLoop::new("test-restart", 0u32, Duration::from_millis(1));
        runloop
            .start(|count| {
                *count += 1;
                Tick::Continue
            })
            .unwrap();
        assert!(wait_until(Duration::from_secs(2), || *runloop.lock() >= 1));
        runloop.stop();

        let first_run = *runloop.lock();
        runloop
            .start(|count| {
                *count += 1;
                Tick::Continue
            })
            .unwrap();
        assert!(wait_until(Duration::from_secs(2), || {
            *runloop.lock() > first_run
        }));
        runloop.stop();
    }

    #[test]
    fn external_lock_shares_data_with_body() {
        let mut runloop = ThreadLoop::new("test-shared", vec![0u8; 0], Duration::from_millis(1));
        runloop
            .start(|items: &mut Vec<u8>| {
                if items.len() < 3 {
                    items.push(items.len() as u8);
                }
                Tick::Continue
            })
            .unwrap();

        assert!(wait_until(Duration::from_secs(2), || {
            runloop.lock().len() == 3
        }));
        {
            let mut items = runloop.lock();
            assert_eq!(&*items, &[0, 1, 2]);
            items.clear();
        }
        assert!(wait_until(Duration::from_secs(2), || {
            runloop.lock().len() == 3
        }));
        runloop.stop();
    }

    #[test]
    fn stop_on_stopped_loop_is_a_no_op() {
        let mut runloop = ThreadLoop::new("test-idle", (), Duration::from_millis(1));
        runloop.stop();
        assert_eq!(runloop.state(), LoopState::Stopped);
    }

    #[test]
    fn drop_joins_a_running_loop() {
        let runloop = {
            let mut rl = ThreadLoop::new("test-drop", 0u32, Duration::from_millis(1));
            rl.start(|count| {
                *count += 1;
                Tick::Continue
            })
            .unwrap();
            rl
        };
        drop(runloop);
        // Nothing to assert beyond "no panic, no leaked thread blocking exit"
    }
}
