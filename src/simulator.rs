//! Resource users that drive the engines through think / request / use cycles.
//!
//! A [`Simulator`] is the only caller of its process's `acquire` and
//! `release`. It sleeps for a random "thinking" time, requests the resource,
//! waits for the grant, occupies the shared [`Resource`] for a random "using"
//! time and releases it again.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use rand::{rngs::StdRng, Rng, SeedableRng};
use tokio::{
    sync::{mpsc::Receiver, watch},
    time::sleep,
};
use tracing::{debug, error, info, warn};

use crate::{
    common::{
        error::{MutexError, Result},
        id::ProcessId,
    },
    mutex::{MutexHandle, Notification},
};

/// Lowest accepted upper bound for the thinking delay on the console.
pub const THINKING_FLOOR: Duration = Duration::from_secs(5);
/// Lowest accepted upper bound for the using delay on the console.
pub const USING_FLOOR: Duration = Duration::from_secs(10);

/// Inclusive range a random delay is drawn from. Both ends are positive.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct DelayBounds {
    min: Duration,
    max: Duration,
}

impl DelayBounds {
    pub fn new(min: Duration, max: Duration) -> Result<Self> {
        if min.is_zero() || max < min {
            return Err(MutexError::InvalidBounds { min, max });
        }
        Ok(DelayBounds { min, max })
    }

    pub fn fixed(delay: Duration) -> Result<Self> {
        Self::new(delay, delay)
    }

    pub fn min(&self) -> Duration {
        self.min
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    /// Same lower bound, new upper bound.
    pub fn with_max(&self, max: Duration) -> Result<Self> {
        Self::new(self.min, max)
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        rng.gen_range(self.min..=self.max)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Timing {
    pub thinking: DelayBounds,
    pub using: DelayBounds,
}

impl Default for Timing {
    fn default() -> Self {
        Timing {
            thinking: DelayBounds {
                min: THINKING_FLOOR,
                max: THINKING_FLOOR,
            },
            using: DelayBounds {
                min: USING_FLOOR,
                max: USING_FLOOR,
            },
        }
    }
}

/// The single-instance resource. Refuses a second concurrent user.
#[derive(Debug, Default)]
pub struct Resource {
    // 0 when free, holder id + 1 otherwise
    holder: AtomicU64,
    uses: AtomicU64,
    breaches: AtomicU64,
}

impl Resource {
    pub fn new() -> Arc<Self> {
        Arc::new(Resource::default())
    }

    pub fn enter(self: &Arc<Self>, id: ProcessId) -> Result<ResourceGuard> {
        let token = u64::from(id.as_u32()) + 1;
        match self
            .holder
            .compare_exchange(0, token, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                self.uses.fetch_add(1, Ordering::Relaxed);
                Ok(ResourceGuard {
                    resource: Arc::clone(self),
                    token,
                })
            }
            Err(current) => {
                self.breaches.fetch_add(1, Ordering::Relaxed);
                Err(MutexError::ResourceBusy {
                    holder: ProcessId((current - 1) as u32),
                })
            }
        }
    }

    pub fn holder(&self) -> Option<ProcessId> {
        match self.holder.load(Ordering::Acquire) {
            0 => None,
            token => Some(ProcessId((token - 1) as u32)),
        }
    }

    pub fn uses(&self) -> u64 {
        self.uses.load(Ordering::Relaxed)
    }

    /// How many times somebody tried to enter while it was occupied.
    pub fn breaches(&self) -> u64 {
        self.breaches.load(Ordering::Relaxed)
    }
}

/// Occupancy of the [`Resource`]; leaving scope frees it.
#[derive(Debug)]
pub struct ResourceGuard {
    resource: Arc<Resource>,
    token: u64,
}

impl Drop for ResourceGuard {
    fn drop(&mut self) {
        let _ = self
            .resource
            .holder
            .compare_exchange(self.token, 0, Ordering::AcqRel, Ordering::Acquire);
    }
}

pub struct Simulator {
    pub handle: MutexHandle,
    pub notifications: Receiver<Notification>,
    pub timing: watch::Receiver<Timing>,
    pub resource: Arc<Resource>,
}

impl Simulator {
    pub fn new(
        handle: MutexHandle,
        notifications: Receiver<Notification>,
        timing: watch::Receiver<Timing>,
        resource: Arc<Resource>,
    ) -> Self {
        Simulator {
            handle,
            notifications,
            timing,
            resource,
        }
    }

    /// Cycles until the process stops, or until `cycles` grants if given.
    pub async fn run(mut self, cycles: Option<usize>) {
        let id = self.handle.id();
        let mut rng = StdRng::from_entropy();
        let mut completed = 0;

        while cycles.map_or(true, |limit| completed < limit) {
            let thinking = self.timing.borrow().thinking.sample(&mut rng);
            debug!(process = %id, ?thinking, "thinking");
            sleep(thinking).await;

            match self.cycle(&mut rng).await {
                Ok(()) => completed += 1,
                Err(MutexError::ProcessStopped(_)) => break,
                Err(err) => warn!(process = %id, %err, "resource cycle failed"),
            }
        }

        debug!(process = %id, completed, "simulator finished");
    }

    async fn cycle(&mut self, rng: &mut StdRng) -> Result<()> {
        let id = self.handle.id();

        info!(process = %id, "requesting resource");
        self.handle.acquire().await?;
        let record = loop {
            match self.notifications.recv().await {
                Some(Notification::Granted(record)) => break record,
                Some(Notification::Released) => continue,
                None => return Err(MutexError::ProcessStopped(id)),
            }
        };

        let using = self.timing.borrow().using.sample(rng);
        {
            let _guard = match self.resource.enter(id) {
                Ok(guard) => Some(guard),
                Err(err) => {
                    error!(process = %id, %err, "mutual exclusion breached");
                    None
                }
            };
            info!(process = %id, timestamp = record.timestamp, ?using, "using resource");
            sleep(using).await;
        }

        info!(process = %id, "freeing resource");
        self.handle.release().await?;
        loop {
            match self.notifications.recv().await {
                Some(Notification::Released) => return Ok(()),
                Some(Notification::Granted(_)) => continue,
                None => return Err(MutexError::ProcessStopped(id)),
            }
        }
    }
}
