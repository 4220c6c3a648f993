use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::Result;
use crate::traits::{Inbox, Transport};

/// Forwards every message verbatim between two transports, both directions.
///
/// Used to bridge contexts that cannot share one transport, e.g. a stream
/// connection from another process onto an in-process bus. Messages are not
/// inspected or re-signed. Forwarding stops when either side closes, or on
/// [`Relay::stop`] / drop.
#[derive(Debug)]
pub struct Relay {
    tasks: Vec<JoinHandle<()>>,
}

impl Relay {
    /// Start relaying between `a` and `b`. Must be called inside a tokio runtime.
    pub fn spawn(a: Arc<dyn Transport>, b: Arc<dyn Transport>) -> Result<Self> {
        let a_in = a.subscribe()?;
        let b_in = b.subscribe()?;
        Ok(Self {
            tasks: vec![
                tokio::spawn(forward(a_in, Arc::clone(&b), "a->b")),
                tokio::spawn(forward(b_in, a, "b->a")),
            ],
        })
    }

    /// Stop forwarding in both directions.
    pub fn stop(&self) {
        for task in &self.tasks {
            task.abort();
        }
    }

    /// True once both forwarding directions have ended.
    pub fn is_finished(&self) -> bool {
        self.tasks.iter().all(JoinHandle::is_finished)
    }
}

impl Drop for Relay {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn forward(mut inbox: Inbox, to: Arc<dyn Transport>, direction: &'static str) {
    while let Some(message) = inbox.recv().await {
        if let Err(err) = to.send(message) {
            warn!(direction, error = %err, "relay target rejected message; stopping");
            return;
        }
    }
    debug!(direction, "relay source closed");
}
