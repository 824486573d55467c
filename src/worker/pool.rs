//! Worker tasks and message routing to them.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::app::Application;
use crate::config::ServerConfig;
use crate::http::request::RequestLayout;
use crate::http::response::HttpResponse;
use crate::lifecycle::Shutdown;
use crate::session::{SessionTable, SessionToken, TableStats};
use crate::viewmodel::ViewModel;
use crate::worker::handler::{ChannelRegistration, Delivery, Worker};
use crate::worker::WorkerError;

/// Server-side logic shipped to the owning worker.
pub type UpdateFn = Box<dyn FnOnce(&mut ViewModel) + Send>;

/// Messages a worker task accepts.
pub enum WorkerCommand {
    Request {
        buffer: Bytes,
        layout: RequestLayout,
        channel: Option<ChannelRegistration>,
        reply: oneshot::Sender<HttpResponse>,
    },
    Create {
        reply: oneshot::Sender<Result<SessionToken, WorkerError>>,
    },
    Frame {
        token: SessionToken,
        channel: u64,
        payload: Bytes,
        reply: oneshot::Sender<Result<Bytes, WorkerError>>,
    },
    Unbind {
        token: SessionToken,
        channel: u64,
    },
    Update {
        token: SessionToken,
        apply: UpdateFn,
        reply: oneshot::Sender<Result<Delivery, WorkerError>>,
    },
    Snapshot {
        token: SessionToken,
        reply: oneshot::Sender<Result<Value, WorkerError>>,
    },
    Destroy {
        token: SessionToken,
        reply: oneshot::Sender<bool>,
    },
    Stats {
        reply: oneshot::Sender<TableStats>,
    },
}

/// Handles to every worker task. Cheap to share behind an `Arc`.
#[derive(Debug)]
pub struct WorkerPool {
    senders: Vec<mpsc::Sender<WorkerCommand>>,
    next: AtomicUsize,
}

impl WorkerPool {
    /// Spawn `workers.count` worker tasks (available parallelism when 0),
    /// each owning a fresh session table.
    pub fn spawn(config: &ServerConfig, app: Arc<dyn Application>, shutdown: &Shutdown) -> Self {
        let count = match config.workers.count {
            0 => std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
            n => n,
        };
        let tick = Duration::from_millis(config.session.sweep_interval_ms);
        let idle_ticks = config.session.idle_timeout_secs.saturating_mul(1000) / config.session.sweep_interval_ms.max(1);

        let senders = (0..count as u32)
            .map(|worker_id| {
                let mut table = SessionTable::new(worker_id, config.session.slots_per_worker);
                if config.session.idle_timeout_secs > 0 {
                    table = table.with_idle_timeout(idle_ticks.max(1));
                }
                if config.patch.versioning {
                    table = table.with_versioning(config.patch.version_queue_limit);
                }
                let worker = Worker::new(table, Arc::clone(&app), config.session.prefix.clone());
                let (tx, rx) = mpsc::channel(config.workers.queue_depth);
                tokio::spawn(run_worker(worker, rx, shutdown.subscribe(), tick));
                tx
            })
            .collect();

        tracing::info!(workers = count, slots_per_worker = config.session.slots_per_worker, "Worker pool started");
        Self {
            senders,
            next: AtomicUsize::new(0),
        }
    }

    pub fn worker_count(&self) -> usize {
        self.senders.len()
    }

    /// Worker for the next new session.
    pub fn next_worker(&self) -> u32 {
        (self.next.fetch_add(1, Ordering::Relaxed) % self.senders.len()) as u32
    }

    async fn send(&self, worker_id: u32, command: WorkerCommand) -> Result<(), WorkerError> {
        let sender = self
            .senders
            .get(worker_id as usize)
            .ok_or(WorkerError::SessionNotFound)?;
        sender
            .send(command)
            .await
            .map_err(|_| WorkerError::WorkerUnavailable(worker_id))
    }

    async fn call<T>(
        &self,
        worker_id: u32,
        command: impl FnOnce(oneshot::Sender<T>) -> WorkerCommand,
    ) -> Result<T, WorkerError> {
        let (reply, rx) = oneshot::channel();
        self.send(worker_id, command(reply)).await?;
        rx.await.map_err(|_| WorkerError::WorkerUnavailable(worker_id))
    }

    /// Hand a parsed request to `worker_id`.
    pub async fn request(
        &self,
        worker_id: u32,
        buffer: Bytes,
        layout: RequestLayout,
        channel: Option<ChannelRegistration>,
    ) -> Result<HttpResponse, WorkerError> {
        self.call(worker_id, |reply| WorkerCommand::Request {
            buffer,
            layout,
            channel,
            reply,
        })
        .await
    }

    /// Start a session on the next worker in turn.
    pub async fn create_session(&self) -> Result<SessionToken, WorkerError> {
        let worker_id = self.next_worker();
        self.call(worker_id, |reply| WorkerCommand::Create { reply }).await?
    }

    /// Apply a client patch document arriving on `channel`; returns the
    /// response patch.
    pub async fn apply_patch(
        &self,
        token: &SessionToken,
        channel: u64,
        payload: Bytes,
    ) -> Result<Bytes, WorkerError> {
        let token = *token;
        self.call(token.worker_id, |reply| WorkerCommand::Frame {
            token,
            channel,
            payload,
            reply,
        })
            .await?
    }

    /// Tell the owning worker a channel closed. Best effort.
    pub async fn unbind(&self, token: &SessionToken, channel: u64) {
        let command = WorkerCommand::Unbind { token: *token, channel };
        if let Err(e) = self.send(token.worker_id, command).await {
            tracing::debug!(worker_id = token.worker_id, channel, error = %e, "Unbind not delivered");
        }
    }

    /// Run `f` against the session on its worker and return its result. A
    /// bound WebSocket receives the resulting patch.
    pub async fn update<F, R>(&self, token: &SessionToken, f: F) -> Result<(R, Delivery), WorkerError>
    where
        F: FnOnce(&mut ViewModel) -> R + Send + 'static,
        R: Send + 'static,
    {
        let token = *token;
        let (out_tx, out_rx) = oneshot::channel();
        let apply: UpdateFn = Box::new(move |vm| {
            let _ = out_tx.send(f(vm));
        });
        let delivery = self
            .call(token.worker_id, |reply| WorkerCommand::Update { token, apply, reply })
            .await??;
        let output = out_rx
            .await
            .map_err(|_| WorkerError::WorkerUnavailable(token.worker_id))?;
        Ok((output, delivery))
    }

    /// Current state of a session.
    pub async fn snapshot(&self, token: &SessionToken) -> Result<Value, WorkerError> {
        let token = *token;
        self.call(token.worker_id, |reply| WorkerCommand::Snapshot { token, reply })
            .await?
    }

    pub async fn destroy(&self, token: &SessionToken) -> Result<bool, WorkerError> {
        let token = *token;
        self.call(token.worker_id, |reply| WorkerCommand::Destroy { token, reply })
            .await
    }

    /// Table statistics of every worker, in worker order.
    pub async fn stats(&self) -> Vec<TableStats> {
        let mut all = Vec::with_capacity(self.senders.len());
        for worker_id in 0..self.senders.len() as u32 {
            match self.call(worker_id, |reply| WorkerCommand::Stats { reply }).await {
                Ok(stats) => all.push(stats),
                Err(e) => tracing::warn!(worker_id, error = %e, "Worker did not report stats"),
            }
        }
        all
    }
}

async fn run_worker(
    mut worker: Worker,
    mut commands: mpsc::Receiver<WorkerCommand>,
    mut shutdown: broadcast::Receiver<()>,
    tick_every: Duration,
) {
    let mut ticker = tokio::time::interval(tick_every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut tick: u64 = 0;

    tracing::debug!(worker_id = worker.id(), "Worker started");
    loop {
        tokio::select! {
            command = commands.recv() => {
                let Some(command) = command else { break };
                dispatch(&mut worker, command);
            }
            _ = ticker.tick() => {
                worker.sweep(tick);
                tick += 1;
            }
            _ = shutdown.recv() => break,
        }
    }
    tracing::debug!(worker_id = worker.id(), "Worker stopped");
}

fn dispatch(worker: &mut Worker, command: WorkerCommand) {
    // A dropped reply receiver means the requester went away; nothing to do.
    match command {
        WorkerCommand::Request {
            buffer,
            layout,
            channel,
            reply,
        } => {
            let _ = reply.send(worker.handle_request(&buffer, layout, channel));
        }
        WorkerCommand::Create { reply } => {
            let _ = reply.send(worker.create_session());
        }
        WorkerCommand::Frame {
            token,
            channel,
            payload,
            reply,
        } => {
            let _ = reply.send(worker.handle_frame(&token, channel, &payload));
        }
        WorkerCommand::Unbind { token, channel } => worker.unbind(&token, channel),
        WorkerCommand::Update { token, apply, reply } => {
            let _ = reply.send(worker.update(&token, apply));
        }
        WorkerCommand::Snapshot { token, reply } => {
            let _ = reply.send(worker.snapshot(&token));
        }
        WorkerCommand::Destroy { token, reply } => {
            let _ = reply.send(worker.destroy_session(&token));
        }
        WorkerCommand::Stats { reply } => {
            let _ = reply.send(worker.stats());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::EmptyApplication;
    use serde_json::json;

    fn pool(workers: usize) -> (WorkerPool, Shutdown) {
        let mut config = ServerConfig::default();
        config.workers.count = workers;
        config.session.slots_per_worker = 4;
        let shutdown = Shutdown::new();
        let pool = WorkerPool::spawn(&config, Arc::new(EmptyApplication), &shutdown);
        (pool, shutdown)
    }

    #[tokio::test]
    async fn round_robin_placement() {
        let (pool, _shutdown) = pool(3);
        let mut workers = Vec::new();
        for _ in 0..6 {
            workers.push(pool.create_session().await.unwrap().worker_id);
        }
        assert_eq!(workers, vec![0, 1, 2, 0, 1, 2]);

        let stats = pool.stats().await;
        assert_eq!(stats.len(), 3);
        assert!(stats.iter().all(|s| s.active == 2 && s.capacity == 4));
    }

    #[tokio::test]
    async fn update_returns_closure_output() {
        let (pool, _shutdown) = pool(2);
        let token = pool.create_session().await.unwrap();
        let (len, delivery) = pool
            .update(&token, |vm| {
                vm.set("/count", json!(3)).unwrap();
                vm.change_log().len()
            })
            .await
            .unwrap();
        assert_eq!(len, 1);
        assert_eq!(delivery, Delivery::Pending);
        assert_eq!(pool.snapshot(&token).await.unwrap(), json!({"count": 3}));
    }

    #[tokio::test]
    async fn foreign_worker_ids_are_not_found() {
        let (pool, _shutdown) = pool(1);
        let token = pool.create_session().await.unwrap();
        let forged = SessionToken { worker_id: 5, ..token };
        assert_eq!(pool.snapshot(&forged).await, Err(WorkerError::SessionNotFound));
        assert!(pool.destroy(&token).await.unwrap());
        assert_eq!(pool.snapshot(&token).await, Err(WorkerError::SessionNotFound));
    }

    #[tokio::test]
    async fn workers_stop_on_shutdown() {
        let (pool, shutdown) = pool(1);
        shutdown.trigger();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(pool.create_session().await, Err(WorkerError::WorkerUnavailable(0)));
    }
}
