//! Parse Worker
//!
//! Runs the parse stage off the owning thread. Requests go in over an
//! unbounded channel; parsed documents come back over a bounded one, so a
//! host that stops draining applies backpressure to the worker instead of
//! buffering documents without limit.
//!
//! The worker never touches GPU state. Materialisation happens when the
//! owning thread drains [`ParseWorker::try_recv`].

use std::path::PathBuf;
use std::thread::{self, JoinHandle};

use flume::{Receiver, Sender, TryRecvError};

use crate::assets::document::SceneDocument;
use crate::assets::gltf::parse_file;
use crate::assets::model::ModelId;
use crate::errors::{Error, Result};

struct ParseRequest {
    id: ModelId,
    source: String,
}

/// A finished parse, successful or not.
pub struct ParsedDocument {
    pub id: ModelId,
    pub source: String,
    pub result: Result<SceneDocument>,
}

pub struct ParseWorker {
    requests: Option<Sender<ParseRequest>>,
    completed: Option<Receiver<ParsedDocument>>,
    handle: Option<JoinHandle<()>>,
}

impl ParseWorker {
    /// Spawns the worker thread. At most `capacity` parsed documents wait in
    /// the completion queue.
    pub fn spawn(capacity: usize) -> Result<Self> {
        let (request_tx, request_rx) = flume::unbounded::<ParseRequest>();
        let (done_tx, done_rx) = flume::bounded::<ParsedDocument>(capacity.max(1));

        let handle = thread::Builder::new()
            .name("skinstance-parse".into())
            .spawn(move || {
                for request in request_rx.iter() {
                    log::debug!("Parsing '{}'", request.source);
                    let result = parse_file(PathBuf::from(&request.source));
                    let parsed = ParsedDocument {
                        id: request.id,
                        source: request.source,
                        result,
                    };
                    // Blocks while the queue is full; fails once the owner is gone.
                    if done_tx.send(parsed).is_err() {
                        break;
                    }
                }
            })
            .map_err(|e| Error::load_failed("<parse worker>", e))?;

        Ok(Self {
            requests: Some(request_tx),
            completed: Some(done_rx),
            handle: Some(handle),
        })
    }

    /// Queues `source` for parsing.
    pub fn submit(&self, id: ModelId, source: &str) -> Result<()> {
        let sender = self
            .requests
            .as_ref()
            .ok_or_else(|| Error::load_failed(source, "parse worker has shut down"))?;
        sender
            .send(ParseRequest {
                id,
                source: source.to_string(),
            })
            .map_err(|_| Error::load_failed(source, "parse worker has shut down"))
    }

    /// Takes one finished parse, if any.
    pub fn try_recv(&self) -> Option<ParsedDocument> {
        let receiver = self.completed.as_ref()?;
        match receiver.try_recv() {
            Ok(parsed) => Some(parsed),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                log::warn!("Parse worker disconnected");
                None
            }
        }
    }

    /// Documents waiting in the completion queue.
    #[must_use]
    pub fn ready_count(&self) -> usize {
        self.completed.as_ref().map_or(0, Receiver::len)
    }
}

impl Drop for ParseWorker {
    fn drop(&mut self) {
        // Closing both ends unblocks the worker whether it waits for a
        // request or on a full completion queue.
        self.requests.take();
        self.completed.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Parse worker panicked");
            }
        }
    }
}
