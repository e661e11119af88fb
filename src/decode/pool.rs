use super::{DecodeError, DecodeRequest, DecodeWorker, DecodedPoints, Encoding};
use crate::config::WorkerPolicy;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::trace;

/// Free list of workers for one encoding.
#[derive(Debug)]
struct WorkerSlots {
    idle: Mutex<Vec<DecodeWorker>>,
    spawned: AtomicUsize,
    permits: Option<Arc<Semaphore>>,
}

impl WorkerSlots {
    fn new(policy: WorkerPolicy) -> Self {
        let permits = match policy {
            WorkerPolicy::Unbounded => None,
            WorkerPolicy::Bounded { max_workers } => Some(Arc::new(Semaphore::new(max_workers.max(1)))),
        };

        Self {
            idle: Mutex::new(Vec::new()),
            spawned: AtomicUsize::new(0),
            permits,
        }
    }
}

/// Decode workers keyed by encoding, owned by a point cloud.
#[derive(Debug)]
pub struct DecodePool {
    policy: WorkerPolicy,
    raw: WorkerSlots,
    brotli: WorkerSlots,
}

/// Exclusive use of one worker, returned to the pool on release or drop.
#[derive(Debug)]
pub struct WorkerLease<'a> {
    pool: &'a DecodePool,
    worker: Option<DecodeWorker>,
    _permit: Option<OwnedSemaphorePermit>,
}

impl WorkerLease<'_> {
    pub fn worker(&self) -> &DecodeWorker {
        self.worker
            .as_ref()
            .expect("worker is only taken when the lease is dropped")
    }
}

impl Drop for WorkerLease<'_> {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            self.pool.put_back(worker);
        }
    }
}

impl Default for DecodePool {
    fn default() -> Self {
        Self::new(WorkerPolicy::default())
    }
}

impl DecodePool {
    pub fn new(policy: WorkerPolicy) -> Self {
        Self {
            policy,
            raw: WorkerSlots::new(policy),
            brotli: WorkerSlots::new(policy),
        }
    }

    pub fn policy(&self) -> WorkerPolicy {
        self.policy
    }

    fn slots(&self, encoding: Encoding) -> &WorkerSlots {
        match encoding {
            Encoding::Raw => &self.raw,
            Encoding::Brotli => &self.brotli,
        }
    }

    /// Takes an idle worker, starting one if none is idle. With a bounded
    /// policy this waits while every allowed worker is busy.
    pub async fn acquire(&self, encoding: Encoding) -> Result<WorkerLease<'_>, DecodeError> {
        let slots = self.slots(encoding);

        let permit = match &slots.permits {
            Some(permits) => Some(
                permits
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|_| DecodeError::WorkerLost)?,
            ),
            None => None,
        };

        let idle = slots.idle.lock().pop();
        let worker = match idle {
            Some(worker) => worker,
            None => {
                let index = slots.spawned.fetch_add(1, Ordering::AcqRel);
                DecodeWorker::spawn(encoding, index).inspect_err(|_| {
                    slots.spawned.fetch_sub(1, Ordering::AcqRel);
                })?
            }
        };

        trace!(%encoding, "acquired decode worker");

        Ok(WorkerLease {
            pool: self,
            worker: Some(worker),
            _permit: permit,
        })
    }

    /// Gives the worker back. Dropping the lease has the same effect.
    pub fn release(&self, lease: WorkerLease<'_>) {
        drop(lease);
    }

    fn put_back(&self, worker: DecodeWorker) {
        let slots = self.slots(worker.encoding());

        if worker.is_alive() {
            slots.idle.lock().push(worker);
        } else {
            // a dead thread only frees its capacity
            slots.spawned.fetch_sub(1, Ordering::AcqRel);
        }
    }

    pub async fn decode(
        &self,
        encoding: Encoding,
        request: DecodeRequest,
    ) -> Result<DecodedPoints, DecodeError> {
        let lease = self.acquire(encoding).await?;
        let result = lease.worker().decode(request).await;
        self.release(lease);
        result
    }

    pub fn idle_workers(&self, encoding: Encoding) -> usize {
        self.slots(encoding).idle.lock().len()
    }

    pub fn spawned_workers(&self, encoding: Encoding) -> usize {
        self.slots(encoding).spawned.load(Ordering::Acquire)
    }
}
