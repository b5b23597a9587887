//! Background ingestion pool.
//!
//! Upload requests hand finished batches to a bounded queue and return;
//! `workers` tasks drain it into the [`IngestionPipeline`]. Each job runs
//! in its own task so a panic is logged and the worker keeps serving.
//! Nothing is reported back to the uploader.
//!
//! Workers share the runtime with the HTTP server, so CPU-heavy scoring
//! runs on the blocking pool through [`BlockingScorer`].

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use docrag_core::ingest::IngestionPipeline;
use docrag_core::models::{IngestRecord, IngestStatus, RougeScores};
use docrag_core::score::{score_optional, SummaryScorer};
use docrag_core::{RagError, Result};

/// One upload batch awaiting storage.
#[derive(Debug, Clone)]
pub struct IngestJob {
    pub user_id: String,
    pub records: Vec<IngestRecord>,
}

#[derive(Default)]
struct Pending {
    count: AtomicUsize,
    idle: Notify,
}

impl Pending {
    fn finish(&self) {
        if self.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }
}

pub struct IngestQueue {
    tx: Mutex<Option<mpsc::Sender<IngestJob>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    pending: Arc<Pending>,
}

impl IngestQueue {
    /// Spawn `workers` tasks reading from a queue of `capacity` jobs.
    pub fn start(pipeline: Arc<IngestionPipeline>, workers: usize, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel::<IngestJob>(capacity.max(1));
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let pending = Arc::new(Pending::default());

        let handles = (0..workers.max(1))
            .map(|worker| {
                let rx = Arc::clone(&rx);
                let pipeline = Arc::clone(&pipeline);
                let pending = Arc::clone(&pending);
                tokio::spawn(async move {
                    loop {
                        let job = { rx.lock().await.recv().await };
                        let Some(job) = job else { break };
                        run_job(worker, Arc::clone(&pipeline), job).await;
                        pending.finish();
                    }
                    debug!(worker, "ingestion worker stopped");
                })
            })
            .collect();

        Self {
            tx: Mutex::new(Some(tx)),
            workers: Mutex::new(handles),
            pending,
        }
    }

    /// Queue a batch. Waits for room when the queue is full.
    pub async fn enqueue(&self, job: IngestJob) -> Result<()> {
        let tx = self
            .tx
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
            .ok_or_else(|| RagError::unavailable("ingest-queue", "queue is shut down"))?;
        self.pending.count.fetch_add(1, Ordering::AcqRel);
        if tx.send(job).await.is_err() {
            self.pending.finish();
            return Err(RagError::unavailable("ingest-queue", "workers have stopped"));
        }
        Ok(())
    }

    /// Jobs queued or running.
    pub fn pending(&self) -> usize {
        self.pending.count.load(Ordering::Acquire)
    }

    /// Resolve once no job is queued or running.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.pending.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Stop accepting jobs, let workers drain the queue, then join them.
    pub async fn shutdown(&self) {
        self.tx.lock().unwrap_or_else(|p| p.into_inner()).take();
        let handles: Vec<_> = self
            .workers
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .drain(..)
            .collect();
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "ingestion worker exited abnormally");
            }
        }
        info!("ingestion queue drained");
    }
}

/// ROUGE scoring on tokio's blocking pool.
#[derive(Debug, Clone, Copy, Default)]
pub struct BlockingScorer;

#[async_trait]
impl SummaryScorer for BlockingScorer {
    async fn score(&self, content: &str, summary: Option<&str>) -> RougeScores {
        let content = content.to_string();
        let summary = summary.map(str::to_string);
        match tokio::task::spawn_blocking(move || score_optional(&content, summary.as_deref())).await
        {
            Ok(scores) => scores,
            Err(e) => {
                error!(stage = "score", error = %e, "scoring task failed; storing zero scores");
                RougeScores::default()
            }
        }
    }
}

async fn run_job(worker: usize, pipeline: Arc<IngestionPipeline>, job: IngestJob) {
    let user = job.user_id.clone();
    let files = job.records.len();
    debug!(worker, user = %user, files, "ingestion job started");

    let task = tokio::spawn(async move { pipeline.ingest(&job.records, &job.user_id).await });
    match task.await {
        Ok(outcomes) => {
            for outcome in outcomes.iter().filter(|o| o.status == IngestStatus::Failed) {
                error!(
                    user = %user,
                    filename = %outcome.filename,
                    stage = "background_ingest",
                    error = outcome.error.as_deref().unwrap_or("unknown"),
                    "document not stored"
                );
            }
            info!(
                worker,
                user = %user,
                files,
                failed = outcomes.iter().filter(|o| o.status == IngestStatus::Failed).count(),
                "ingestion job finished"
            );
        }
        Err(e) => {
            error!(worker, user = %user, files, stage = "background_ingest", error = %e, "ingestion job panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docrag_core::chunk::{ChunkMode, Chunker};
    use docrag_core::consistency::ConsistencyCoordinator;
    use docrag_core::embedding::HashingEmbedder;
    use docrag_core::naming::CollectionNaming;
    use docrag_core::store::memory::{InMemoryDocumentStore, InMemoryVectorIndex};
    use docrag_core::store::DocumentStore;

    fn pipeline() -> (Arc<InMemoryDocumentStore>, Arc<IngestionPipeline>) {
        let docs = Arc::new(InMemoryDocumentStore::new());
        let index = Arc::new(InMemoryVectorIndex::new(Arc::new(HashingEmbedder::new(32))));
        let coordinator = Arc::new(ConsistencyCoordinator::new(
            docs.clone(),
            index.clone(),
            CollectionNaming::default(),
        ));
        let chunker = Chunker::new(ChunkMode::Lines, 25, 4).unwrap();
        let pipeline = Arc::new(IngestionPipeline::new(coordinator, docs.clone(), index, chunker));
        (docs, pipeline)
    }

    #[tokio::test]
    async fn jobs_are_drained_by_workers() {
        let (docs, pipeline) = pipeline();
        let queue = IngestQueue::start(pipeline, 2, 4);
        for i in 0..5 {
            queue
                .enqueue(IngestJob {
                    user_id: "Alice".into(),
                    records: vec![IngestRecord::text(format!("doc{}.txt", i), "Alpha Beta")],
                })
                .await
                .unwrap();
        }
        queue.wait_idle().await;
        assert_eq!(queue.pending(), 0);
        assert_eq!(docs.list_all("user_alice").await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn shutdown_drains_and_rejects_new_jobs() {
        let (docs, pipeline) = pipeline();
        let queue = IngestQueue::start(pipeline, 1, 8);
        queue
            .enqueue(IngestJob {
                user_id: "bob".into(),
                records: vec![IngestRecord::text("a.txt", "Alpha")],
            })
            .await
            .unwrap();
        queue.shutdown().await;
        assert_eq!(docs.list_all("user_bob").await.unwrap().len(), 1);

        let err = queue
            .enqueue(IngestJob {
                user_id: "bob".into(),
                records: vec![],
            })
            .await
            .unwrap_err();
        assert!(err.is_retriable());
    }

    #[tokio::test]
    async fn blocking_scorer_matches_inline_scoring() {
        let content = "Alpha Beta Gamma Delta ".repeat(200);
        let scores = BlockingScorer.score(&content, Some("Alpha Beta Gamma")).await;
        assert_eq!(scores, score_optional(&content, Some("Alpha Beta Gamma")));
        assert!(scores.rouge1 > 0.0);
        assert_eq!(BlockingScorer.score(&content, None).await, RougeScores::default());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn scoring_leaves_the_runtime_thread_free() {
        let content = "Alpha Beta ".repeat(3000);
        let summary = "Beta Alpha ".repeat(300);
        let ticks = Arc::new(AtomicUsize::new(0));
        let ticker = {
            let ticks = Arc::clone(&ticks);
            tokio::spawn(async move {
                loop {
                    ticks.fetch_add(1, Ordering::SeqCst);
                    tokio::task::yield_now().await;
                }
            })
        };
        BlockingScorer.score(&content, Some(&summary)).await;
        ticker.abort();
        // inline scoring would hold the only runtime thread until done
        assert!(ticks.load(Ordering::SeqCst) > 0);
    }

    #[tokio::test]
    async fn idle_queue_returns_immediately() {
        let (_docs, pipeline) = pipeline();
        let queue = IngestQueue::start(pipeline, 1, 1);
        queue.wait_idle().await;
    }
}
