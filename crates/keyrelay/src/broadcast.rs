//! Pushes credential updates to every connected context.
//!
//! Sends are queued on a single worker task, so updates reach each context in
//! the order they were issued. Callers get a [`Delivery`] they may ignore or
//! await; [`BroadcastSync::flush`] waits for everything queued so far.

use std::sync::Arc;

use log::{debug, warn};
use tokio::sync::{mpsc, oneshot};

use crate::host::ClientHost;
use crate::tokens::CredentialUpdate;

enum Job {
    Send {
        update: CredentialUpdate,
        done: oneshot::Sender<usize>,
    },
    Flush(oneshot::Sender<()>),
}

/// Completion signal of one broadcast.
#[derive(Debug)]
pub struct Delivery {
    done: Option<oneshot::Receiver<usize>>,
}

impl Delivery {
    const fn dropped() -> Self {
        Self { done: None }
    }

    /// Waits for the broadcast and returns how many contexts received it.
    pub async fn delivered(self) -> usize {
        match self.done {
            Some(done) => done.await.unwrap_or(0),
            None => 0,
        }
    }
}

/// Handle to the broadcast worker.
#[derive(Clone)]
pub struct BroadcastSync {
    jobs: mpsc::UnboundedSender<Job>,
}

impl BroadcastSync {
    /// Starts the broadcast worker on the current Tokio runtime.
    ///
    /// The worker stops once every handle has been dropped.
    pub fn spawn(host: Arc<dyn ClientHost>) -> Self {
        let (jobs, queue) = mpsc::unbounded_channel();
        tokio::spawn(run_worker(host, queue));
        Self { jobs }
    }

    /// Queues `update` for every connected context.
    pub fn send(&self, update: CredentialUpdate) -> Delivery {
        let (done, receiver) = oneshot::channel();
        if self.jobs.send(Job::Send { update, done }).is_err() {
            warn!("Broadcast worker stopped; credential update not delivered");
            return Delivery::dropped();
        }
        Delivery {
            done: Some(receiver),
        }
    }

    /// Waits until every update queued before this call has been delivered.
    pub async fn flush(&self) {
        let (done, receiver) = oneshot::channel();
        if self.jobs.send(Job::Flush(done)).is_ok() {
            let _ = receiver.await;
        }
    }
}

async fn run_worker(host: Arc<dyn ClientHost>, mut queue: mpsc::UnboundedReceiver<Job>) {
    while let Some(job) = queue.recv().await {
        match job {
            Job::Send { update, done } => {
                let delivered = deliver(host.as_ref(), &update).await;
                let _ = done.send(delivered);
            }
            Job::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!("Broadcast worker stopped");
}

async fn deliver(host: &dyn ClientHost, update: &CredentialUpdate) -> usize {
    let clients = match host.match_all().await {
        Ok(clients) => clients,
        Err(e) => {
            warn!("Failed to enumerate clients for credential broadcast: {e}");
            return 0;
        }
    };

    let mut delivered = 0;
    for client in clients {
        match client.post_message(update) {
            Ok(()) => delivered += 1,
            Err(e) => warn!("Failed to post credential update to {}: {e}", client.id()),
        }
    }
    debug!("Broadcast {update:?} to {delivered} client(s)");
    delivered
}
