use crate::octree::NodeId;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::{Mutex, MutexGuard};
use std::collections::HashMap;
use std::fmt;

/// A load every interested caller can await. The output is cloned to each of them.
pub type SharedLoad<T> = Shared<BoxFuture<'static, T>>;

/// Loads currently running, at most one per node.
pub struct InFlight<T> {
    loads: Mutex<HashMap<NodeId, SharedLoad<T>>>,
}

impl<T> fmt::Debug for InFlight<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InFlight")
            .field("pending", &self.loads.lock().len())
            .finish()
    }
}

impl<T> Default for InFlight<T> {
    fn default() -> Self {
        Self {
            loads: Mutex::new(HashMap::new()),
        }
    }
}

/// Exclusive access to the running loads. Deciding whether to start a load
/// and registering it happen under the same guard.
pub struct InFlightGuard<'a, T> {
    loads: MutexGuard<'a, HashMap<NodeId, SharedLoad<T>>>,
}

impl<T: Clone> InFlightGuard<'_, T> {
    /// The running load of `node_id`, if any. Finished loads are dropped.
    pub fn join(&mut self, node_id: NodeId) -> Option<SharedLoad<T>> {
        match self.loads.get(&node_id) {
            Some(load) if load.peek().is_none() => Some(load.clone()),
            Some(_) => {
                self.loads.remove(&node_id);
                None
            }
            None => None,
        }
    }

    pub fn start(&mut self, node_id: NodeId, load: BoxFuture<'static, T>) -> SharedLoad<T> {
        let load = load.shared();
        self.loads.insert(node_id, load.clone());
        load
    }
}

impl<T: Clone> InFlight<T> {
    pub fn lock(&self) -> InFlightGuard<'_, T> {
        InFlightGuard {
            loads: self.loads.lock(),
        }
    }

    /// Forgets `load` once awaited, unless another load replaced it already.
    pub fn finish(&self, node_id: NodeId, load: &SharedLoad<T>) {
        let mut loads = self.loads.lock();
        if loads
            .get(&node_id)
            .is_some_and(|current| current.ptr_eq(load))
        {
            loads.remove(&node_id);
        }
    }

    pub fn len(&self) -> usize {
        self.loads.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
