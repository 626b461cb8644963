//! Wall-clock helpers and the interruptible sleep used between attempts and gestures.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use crate::{ReproError, ReproResult};

const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// Cooperative cancellation flag. Children observe their own flag and every ancestor's.
#[derive(Debug, Clone)]
pub struct CancelToken {
    chain: Vec<Arc<AtomicBool>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            chain: vec![Arc::new(AtomicBool::new(false))],
        }
    }

    /// A token cancelled by either `self` or its own `cancel()`.
    pub fn child(&self) -> Self {
        let mut chain = self.chain.clone();
        chain.push(Arc::new(AtomicBool::new(false)));
        Self { chain }
    }

    pub fn cancel(&self) {
        if let Some(flag) = self.chain.last() {
            flag.store(true, Ordering::SeqCst);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.chain.iter().any(|f| f.load(Ordering::SeqCst))
    }

    pub fn check(&self) -> ReproResult<()> {
        if self.is_cancelled() {
            Err(ReproError::Cancelled)
        } else {
            Ok(())
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

pub trait Clock: Send + Sync {
    /// Sleeps for `d`, returning `Err(Cancelled)` early if `cancel` fires.
    fn sleep(&self, d: Duration, cancel: &CancelToken) -> ReproResult<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn sleep(&self, d: Duration, cancel: &CancelToken) -> ReproResult<()> {
        let deadline = Instant::now() + d;
        loop {
            cancel.check()?;
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            std::thread::sleep(SLEEP_SLICE.min(deadline - now));
        }
    }
}

pub fn wall_time_iso_utc() -> String {
    // Metadata only (startedAt/finishedAt).
    let now = SystemTime::now();
    let dt: time::OffsetDateTime = now.into();
    dt.format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}
