use super::{decode_points, DecodeError, DecodeRequest, DecodedPoints, Encoding};
use crossbeam::channel::{self, Receiver, Sender};
use futures::channel::oneshot;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, trace, warn};

type DecodeResponse = Result<DecodedPoints, DecodeError>;

enum WorkerMessage {
    Decode {
        request: DecodeRequest,
        tx_response: oneshot::Sender<DecodeResponse>,
    },
    Shutdown,
}

/// A decode thread bound to one encoding. Runs at most one job at a time.
pub struct DecodeWorker {
    encoding: Encoding,
    tx_request: Sender<WorkerMessage>,
    thread: Option<JoinHandle<()>>,
    /// Set once a job went unanswered; the thread is not trusted afterwards.
    lost: AtomicBool,
}

impl std::fmt::Debug for DecodeWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodeWorker")
            .field("encoding", &self.encoding)
            .field("alive", &self.is_alive())
            .finish()
    }
}

impl DecodeWorker {
    pub fn spawn(encoding: Encoding, index: usize) -> Result<Self, DecodeError> {
        let (tx_request, rx_request) = channel::bounded::<WorkerMessage>(1);

        let thread = thread::Builder::new()
            .name(format!("potree-decode-{}-{}", encoding, index).to_lowercase())
            .spawn(move || Self::worker_loop(encoding, rx_request))
            .map_err(|error| DecodeError::WorkerSpawn(Arc::new(error)))?;

        debug!(%encoding, index, "spawned decode worker");

        Ok(Self {
            encoding,
            tx_request,
            thread: Some(thread),
            lost: AtomicBool::new(false),
        })
    }

    fn worker_loop(encoding: Encoding, rx_request: Receiver<WorkerMessage>) {
        while let Ok(message) = rx_request.recv() {
            match message {
                WorkerMessage::Decode {
                    request,
                    tx_response,
                } => {
                    let num_points = request.num_points;
                    let response = decode_points(encoding, request);
                    trace!(%encoding, num_points, ok = response.is_ok(), "decode job done");
                    // the caller may have gone away
                    let _ = tx_response.send(response);
                }
                WorkerMessage::Shutdown => break,
            }
        }
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    pub fn is_alive(&self) -> bool {
        !self.lost.load(Ordering::Acquire)
            && self
                .thread
                .as_ref()
                .is_some_and(|thread| !thread.is_finished())
    }

    fn mark_lost(&self) -> DecodeError {
        self.lost.store(true, Ordering::Release);
        DecodeError::WorkerLost
    }

    /// Hands `request` (and its buffer) to the worker thread and waits for the result.
    pub async fn decode(&self, request: DecodeRequest) -> DecodeResponse {
        let (tx_response, rx_response) = oneshot::channel();

        // a leased worker has no other job queued, so the slot is free
        self.tx_request
            .try_send(WorkerMessage::Decode {
                request,
                tx_response,
            })
            .map_err(|_| self.mark_lost())?;

        // dropped unanswered when the thread died mid-job
        rx_response.await.map_err(|_| self.mark_lost())?
    }

    #[cfg(test)]
    pub(crate) fn stop(&self) {
        let _ = self.tx_request.send(WorkerMessage::Shutdown);
    }
}

impl Drop for DecodeWorker {
    fn drop(&mut self) {
        let _ = self.tx_request.send(WorkerMessage::Shutdown);

        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!(encoding = %self.encoding, "decode worker panicked");
            } else {
                debug!(encoding = %self.encoding, "decode worker stopped");
            }
        }
    }
}
