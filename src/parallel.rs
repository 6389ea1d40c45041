use std::{sync::Arc, thread::JoinHandle};

use crossbeam_channel::Sender;
use log::{debug, error};

use crate::{
    annotate::{annotate_batch, AnnotationContext, AnnotationEngine},
    error::WorkerFailure,
    queue::{Task, TaskQueue},
    record::Batch,
};

/// Message sent from the workers (and the coordinator) to the collector
#[derive(Debug)]
pub enum Collected {
    /// An annotated batch
    Batch(Batch),
    /// Every worker has finished; no more batches will follow
    Close,
    /// The run failed; spooled data must be discarded
    Abort,
}

/// Resolve the requested worker count
///
/// `0` means one worker per available core. The count is never larger than
/// the number of batches there is work for, when that is known.
#[must_use]
pub fn resolve_workers(requested: usize, workload: Option<usize>) -> usize {
    let num_workers = if requested == 0 {
        num_cpus::get()
    } else {
        requested
    };
    match workload {
        Some(n) => num_workers.min(n.max(1)),
        None => num_workers,
    }
    .max(1)
}

/// Latches a failure on the queue if the worker unwinds mid-item
struct PanicGuard {
    worker: usize,
    queue: Arc<TaskQueue<Batch>>,
}
impl Drop for PanicGuard {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.queue.fail(WorkerFailure::Panicked {
                worker: self.worker,
                reason: "panicked while annotating a batch".to_string(),
            });
        }
    }
}

/// A pool of long-lived annotation workers draining a [`TaskQueue`]
///
/// Each worker loops: dequeue an item, exit on the stop sentinel, otherwise
/// annotate the batch, forward it to the collector and acknowledge it. Workers
/// share nothing but the queue and the result channel.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}
impl WorkerPool {
    /// Spawn `num_workers` workers
    pub fn spawn<E: AnnotationEngine + 'static>(
        num_workers: usize,
        queue: &Arc<TaskQueue<Batch>>,
        engine: &Arc<E>,
        ctx: &Arc<AnnotationContext>,
        results: &Sender<Collected>,
    ) -> Self {
        let handles = (0..num_workers)
            .map(|tid| {
                let queue = queue.clone();
                let engine = engine.clone();
                let ctx = ctx.clone();
                let results = results.clone();
                std::thread::spawn(move || {
                    let _guard = PanicGuard {
                        worker: tid,
                        queue: queue.clone(),
                    };
                    run_worker(tid, &queue, engine.as_ref(), &ctx, &results);
                })
            })
            .collect();
        debug!("Spawned {num_workers} annotation worker(s)");
        Self { handles }
    }

    #[must_use]
    pub fn num_workers(&self) -> usize {
        self.handles.len()
    }

    /// Wait for every worker to exit
    ///
    /// Only call once the queue has drained (or failed); a worker blocked in
    /// the engine would otherwise be waited on indefinitely.
    pub fn join(self) -> Result<(), WorkerFailure> {
        let mut result = Ok(());
        for (worker, handle) in self.handles.into_iter().enumerate() {
            if let Err(payload) = handle.join() {
                let reason = payload
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!("Worker {worker} panicked: {reason}");
                if result.is_ok() {
                    result = Err(WorkerFailure::Panicked { worker, reason });
                }
            }
        }
        result
    }

    /// Release the workers without waiting for them
    ///
    /// Used when a worker has stalled; stalled threads end with the process.
    pub fn detach(self) {
        debug!("Detaching {} worker(s)", self.handles.len());
    }
}

fn run_worker<E: AnnotationEngine + ?Sized>(
    tid: usize,
    queue: &TaskQueue<Batch>,
    engine: &E,
    ctx: &AnnotationContext,
    results: &Sender<Collected>,
) {
    let mut batches = 0usize;
    while let Some(task) = queue.dequeue() {
        match task {
            Task::Stop => {
                queue.mark_done();
                break;
            }
            Task::Job(mut batch) => {
                let failed = annotate_batch(engine, &mut batch, ctx);
                if failed > 0 {
                    debug!("Worker {tid}: {failed} record(s) tagged in batch {}", batch.id());
                }
                if results.send(Collected::Batch(batch)).is_err() {
                    queue.fail(WorkerFailure::CollectorGone);
                    queue.mark_done();
                    break;
                }
                queue.mark_done();
                batches += 1;
            }
        }
    }
    debug!("Worker {tid} exiting after {batches} batch(es)");
}
