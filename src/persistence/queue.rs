// ABOUTME: Bounded background persistence queue drained by a fixed pool of worker tasks.
// ABOUTME: Submission never blocks the turn path; job failures and panics are logged, never retried.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{Mutex, Notify, mpsc};
use tokio::task::JoinHandle;

use super::gateway::PersistenceGateway;
use super::record::{AudioAttachment, MessageRecord};

/// One unit of background persistence work.
#[derive(Debug, Clone)]
pub enum PersistenceJob {
    /// Both records of one turn, written together.
    SaveTurn(Vec<MessageRecord>),
    AttachAudio(AudioAttachment),
}

impl PersistenceJob {
    fn label(&self) -> &'static str {
        match self {
            Self::SaveTurn(_) => "save_turn",
            Self::AttachAudio(_) => "attach_audio",
        }
    }
}

/// Sizing of the worker pool.
#[derive(Debug, Clone, Copy)]
pub struct QueueSettings {
    pub workers: usize,
    pub capacity: usize,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            workers: 2,
            capacity: 64,
        }
    }
}

/// Tracks submitted-but-unfinished jobs so callers can wait for quiescence.
#[derive(Debug, Default)]
struct Pending {
    count: AtomicUsize,
    idle: Notify,
}

impl Pending {
    fn start(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    fn finish(&self) {
        if self.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

/// Handle for submitting persistence jobs. Cheap to clone.
#[derive(Clone)]
pub struct PersistenceQueue {
    tx: mpsc::Sender<PersistenceJob>,
    pending: Arc<Pending>,
    workers: Arc<std::sync::Mutex<Vec<JoinHandle<()>>>>,
}

impl PersistenceQueue {
    /// Spawn the worker pool. Must be called from within a Tokio runtime.
    pub fn start(gateway: Arc<dyn PersistenceGateway>, settings: QueueSettings) -> Self {
        let (tx, rx) = mpsc::channel(settings.capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let pending = Arc::new(Pending::default());

        let workers = (0..settings.workers.max(1))
            .map(|worker| {
                let rx = rx.clone();
                let gateway = gateway.clone();
                let pending = pending.clone();
                tokio::spawn(async move { run_worker(worker, rx, gateway, pending).await })
            })
            .collect();

        Self {
            tx,
            pending,
            workers: Arc::new(std::sync::Mutex::new(workers)),
        }
    }

    /// Queue a job without waiting. A full queue hands the job to a detached
    /// task that waits for capacity, so nothing is dropped.
    pub fn submit(&self, job: PersistenceJob) {
        self.pending.start();
        match self.tx.try_send(job) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(job)) => {
                tracing::debug!(job = job.label(), "persistence queue full, spilling");
                let tx = self.tx.clone();
                let pending = self.pending.clone();
                tokio::spawn(async move {
                    if let Err(error) = tx.send(job).await {
                        tracing::warn!(job = error.0.label(), "persistence queue closed, job lost");
                        pending.finish();
                    }
                });
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                tracing::warn!(job = job.label(), "persistence queue closed, job lost");
                self.pending.finish();
            }
        }
    }

    /// Jobs submitted and not yet finished.
    pub fn pending(&self) -> usize {
        self.pending.count.load(Ordering::SeqCst)
    }

    /// Wait until every submitted job has finished.
    pub async fn idle(&self) {
        loop {
            let notified = self.pending.idle.notified();
            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Drain outstanding jobs and stop the workers.
    pub async fn shutdown(self) {
        self.idle().await;
        let workers = std::mem::take(
            &mut *self
                .workers
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner),
        );
        for handle in &workers {
            handle.abort();
        }
        for handle in workers {
            let _ = handle.await;
        }
    }
}

async fn run_worker(
    worker: usize,
    rx: Arc<Mutex<mpsc::Receiver<PersistenceJob>>>,
    gateway: Arc<dyn PersistenceGateway>,
    pending: Arc<Pending>,
) {
    loop {
        let job = {
            let mut rx = rx.lock().await;
            rx.recv().await
        };
        let Some(job) = job else {
            break;
        };

        let label = job.label();
        let gateway = gateway.clone();
        // Run the job in its own task so a panicking gateway cannot take the worker down.
        let outcome = tokio::spawn(async move { execute(gateway.as_ref(), job).await }).await;
        match outcome {
            Ok(Ok(())) => tracing::trace!(worker, job = label, "persistence job done"),
            Ok(Err(error)) => tracing::error!(worker, job = label, %error, "persistence job failed"),
            Err(error) => tracing::error!(worker, job = label, %error, "persistence job interrupted"),
        }
        pending.finish();
    }
    tracing::debug!(worker, "persistence worker stopped");
}

async fn execute(gateway: &dyn PersistenceGateway, job: PersistenceJob) -> anyhow::Result<()> {
    match job {
        PersistenceJob::SaveTurn(records) => gateway.save_all(records).await,
        PersistenceJob::AttachAudio(attachment) => gateway.update_audio_metadata(attachment).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::{Message, MessageKind};
    use crate::persistence::MemoryGateway;
    use async_trait::async_trait;

    fn turn(millis: i64) -> PersistenceJob {
        PersistenceJob::SaveTurn(vec![
            MessageRecord::from_message(
                &Message::user("q").at(millis),
                "dev",
                "s",
                1,
                MessageKind::Normal,
            ),
            MessageRecord::from_message(
                &Message::assistant("a").at(millis),
                "dev",
                "s",
                1,
                MessageKind::Normal,
            ),
        ])
    }

    struct FailingGateway;

    #[async_trait]
    impl PersistenceGateway for FailingGateway {
        async fn save_all(&self, _records: Vec<MessageRecord>) -> anyhow::Result<()> {
            anyhow::bail!("disk full")
        }

        async fn update_audio_metadata(&self, _attachment: AudioAttachment) -> anyhow::Result<()> {
            panic!("audio store exploded")
        }

        async fn find_recent(
            &self,
            _device_id: &str,
            _role_id: i64,
            _limit: usize,
        ) -> anyhow::Result<Vec<MessageRecord>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn jobs_reach_the_gateway() {
        let gateway = Arc::new(MemoryGateway::new());
        let queue = PersistenceQueue::start(gateway.clone(), QueueSettings::default());
        for i in 0..5 {
            queue.submit(turn(i * 1_000));
        }
        queue.idle().await;
        assert_eq!(gateway.records().len(), 10);
        assert!(gateway.batches().iter().all(|b| b.len() == 2));
    }

    #[tokio::test]
    async fn full_queue_spills_without_losing_jobs() {
        let gateway = Arc::new(MemoryGateway::new());
        let queue = PersistenceQueue::start(
            gateway.clone(),
            QueueSettings {
                workers: 1,
                capacity: 1,
            },
        );
        for i in 0..20 {
            queue.submit(turn(i));
        }
        queue.idle().await;
        assert_eq!(gateway.batches().len(), 20);
        assert_eq!(queue.pending(), 0);
    }

    #[tokio::test]
    async fn failures_and_panics_are_contained() {
        let queue = PersistenceQueue::start(Arc::new(FailingGateway), QueueSettings::default());
        queue.submit(turn(1));
        queue.submit(PersistenceJob::AttachAudio(AudioAttachment {
            device_id: "dev".into(),
            role_id: 1,
            sender: crate::conversation::Role::User,
            kind: MessageKind::Normal,
            created_at_key: String::new(),
            created_at_millis: 1,
            audio_path: String::new(),
        }));
        queue.idle().await;
        assert_eq!(queue.pending(), 0);

        // Workers survive and keep serving.
        queue.submit(turn(2));
        queue.idle().await;
        assert_eq!(queue.pending(), 0);
    }

    #[tokio::test]
    async fn idle_returns_immediately_when_nothing_is_pending() {
        let queue = PersistenceQueue::start(Arc::new(MemoryGateway::new()), QueueSettings::default());
        queue.idle().await;
        queue.shutdown().await;
    }
}
