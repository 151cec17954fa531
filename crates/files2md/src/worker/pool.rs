use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use log::{debug, error, info};

use crate::engine::{Device, EngineFactory};
use crate::error::WorkerError;
use crate::model::{PipelineOutcome, SkipReason};
use crate::pipeline::{Pipeline, ProgressReporter, WorkerContext};
use crate::worker::job::WorkItem;
use crate::worker::plan::{WorkerPoolPlan, WorkerSlot};

/// Fixed set of worker threads fed from one queue per accelerator, or a
/// single shared queue when no accelerator partitioning is active.
///
/// Dropping the pool closes the queues and joins every worker, so items
/// already queued still finish before scratch space is released.
pub struct WorkerPool {
    queues: Vec<Sender<WorkItem>>,
    result_sender: Option<Sender<PipelineOutcome>>,
    result_receiver: Receiver<PipelineOutcome>,
    workers: Vec<(usize, JoinHandle<()>)>,
    plan: WorkerPoolPlan,
    slots: Vec<WorkerSlot>,
    submitted: usize,
}

impl WorkerPool {
    /// Spawns every worker in the plan.
    ///
    /// Pinned workers render on their accelerator; unpinned workers use
    /// `generalist_device`.
    pub fn start(
        plan: WorkerPoolPlan,
        pipeline: Arc<Pipeline>,
        factory: Arc<dyn EngineFactory>,
        progress: Arc<dyn ProgressReporter>,
        generalist_device: Device,
    ) -> Result<Self, WorkerError> {
        let slots = plan.slots();

        let queue_sizes: Vec<usize> = if plan.is_accelerated() {
            plan.assignments().iter().map(|a| a.workers).collect()
        } else {
            vec![plan.total_workers()]
        };
        let (queues, receivers): (Vec<_>, Vec<_>) = queue_sizes
            .iter()
            .map(|workers| bounded::<WorkItem>(workers * 2))
            .unzip();
        // Unbounded so a worker never blocks on results while the
        // orchestrator is still blocked submitting.
        let (result_sender, result_receiver) = unbounded::<PipelineOutcome>();

        let mut workers = Vec::with_capacity(slots.len());
        for slot in &slots {
            let (queue, device) = match slot.accelerator {
                Some(accelerator) => (accelerator, Device::Accelerator(accelerator)),
                None => (0, generalist_device),
            };

            let job_rx = receivers[queue].clone();
            let result_tx = result_sender.clone();
            let worker_pipeline = Arc::clone(&pipeline);
            let worker_factory = Arc::clone(&factory);
            let worker_progress = Arc::clone(&progress);
            let worker_id = slot.worker_id;

            let handle = thread::Builder::new()
                .name(format!("files2md-worker-{}", worker_id))
                .spawn(move || {
                    let context = WorkerContext::new(worker_id, device, worker_factory);
                    run_worker(
                        context,
                        job_rx,
                        result_tx,
                        worker_pipeline,
                        worker_progress,
                    );
                })
                .map_err(|e| WorkerError::SpawnFailed {
                    worker_id,
                    source: e,
                })?;

            workers.push((worker_id, handle));
        }

        if plan.is_accelerated() {
            for assignment in plan.assignments() {
                info!(
                    "Accelerator {}: {} worker(s)",
                    assignment.accelerator, assignment.workers
                );
            }
        }
        info!("Started {} workers", workers.len());

        Ok(Self {
            queues,
            result_sender: Some(result_sender),
            result_receiver,
            workers,
            plan,
            slots,
            submitted: 0,
        })
    }

    pub fn plan(&self) -> &WorkerPoolPlan {
        &self.plan
    }

    /// Queues an item on the queue its index routes to. Blocks while that
    /// queue is full.
    pub fn submit(&mut self, work: WorkItem) -> Result<(), WorkerError> {
        let queue = self.plan.route(work.index, &self.slots).unwrap_or(0);
        let sender = self.queues.get(queue).ok_or(WorkerError::ChannelClosed)?;
        sender.send(work).map_err(|_| WorkerError::ChannelClosed)?;
        self.submitted += 1;
        Ok(())
    }

    /// Closes the queues, waits for every worker and returns all outcomes.
    pub fn finish(mut self) -> Result<Vec<PipelineOutcome>, WorkerError> {
        self.shutdown();
        let outcomes: Vec<PipelineOutcome> = self.result_receiver.try_iter().collect();

        if outcomes.len() != self.submitted {
            return Err(WorkerError::MissingResults {
                expected: self.submitted,
                received: outcomes.len(),
            });
        }
        Ok(outcomes)
    }

    /// Lets workers drain their queues and joins them. Outcomes stay in the
    /// results channel.
    fn shutdown(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        // Dropping the senders lets workers drain their queue and exit.
        self.queues.clear();
        self.result_sender.take();

        for (worker_id, worker) in self.workers.drain(..) {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", worker_id, e);
            } else {
                debug!("Worker {} finished", worker_id);
            }
        }
        info!("All workers have stopped");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker(
    mut context: WorkerContext,
    job_receiver: Receiver<WorkItem>,
    result_sender: Sender<PipelineOutcome>,
    pipeline: Arc<Pipeline>,
    progress: Arc<dyn ProgressReporter>,
) {
    debug!(
        "Worker {} started on device {}",
        context.worker_id, context.device
    );

    while let Ok(work) = job_receiver.recv() {
        debug!("Worker {} processing {}", context.worker_id, work.item.key);

        let run = panic::catch_unwind(AssertUnwindSafe(|| {
            pipeline.run(&work, &mut context, progress.as_ref())
        }));
        let outcome = match run {
            Ok(outcome) => outcome,
            Err(_) => {
                error!(
                    "Worker {} panicked while processing {}",
                    context.worker_id, work.item.key
                );
                // The engine may be left in an unknown state.
                context.engine.release();
                PipelineOutcome::skipped(&work.item, work.output_path.clone(), SkipReason::RenderFailed)
            }
        };

        if let Err(e) = result_sender.send(outcome) {
            error!("Worker {} failed to send result: {}", context.worker_id, e);
            break;
        }
    }

    debug!("Worker {} stopped", context.worker_id);
}
