use std::time::Duration;

use futures::future::BoxFuture;
use tokio::time::Instant;

/// Stand-in deadline for ceilings too large to add to the clock.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Interval and hard ceiling for waiting on a remote page.
///
/// Most waits go through [`Poller::until`], whose check borrows the caller's
/// state mutably on each call. Loops that need more control ask a
/// [`PollClock`] when to check next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Poller {
    pub interval: Duration,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    Ready(T),
    TimedOut,
}

impl Poller {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Poller { interval, timeout }
    }

    pub fn start(&self) -> PollClock {
        let started = Instant::now();
        PollClock {
            started,
            deadline: started.checked_add(self.timeout).unwrap_or(started + FAR_FUTURE),
            interval: self.interval,
        }
    }

    /// Runs `check` immediately and then every `interval` until it returns a
    /// value or the ceiling passes.
    pub async fn until<S, T, F>(&self, state: &mut S, mut check: F) -> PollOutcome<T>
    where
        S: ?Sized + Send,
        T: Send,
        F: for<'a> FnMut(&'a mut S) -> BoxFuture<'a, Option<T>> + Send,
    {
        let mut clock = self.start();
        loop {
            if let Some(value) = check(&mut *state).await {
                return PollOutcome::Ready(value);
            }
            if !clock.wait().await {
                return PollOutcome::TimedOut;
            }
        }
    }
}

#[derive(Debug)]
pub struct PollClock {
    started: Instant,
    deadline: Instant,
    interval: Duration,
}

impl PollClock {
    /// Sleeps until the next check is due. Returns `false` once the ceiling
    /// has passed; no check should run after that.
    pub async fn wait(&mut self) -> bool {
        let now = Instant::now();
        if now >= self.deadline {
            return false;
        }
        tokio::time::sleep(self.interval.min(self.deadline - now)).await;
        Instant::now() < self.deadline
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}
