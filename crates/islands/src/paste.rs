use std::collections::HashMap;
use std::fmt;
use std::io;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::island::{Island, IslandId};
use crate::location::BlockPos;
use crate::template::Template;
use crate::template_store::TemplateStore;
use crate::world::WorldId;

const WORKER_THREAD_NAME: &str = "island-paste";

/// Runs on the thread that issued the paste, once, after placement
/// finished successfully.
pub type Continuation = Box<dyn FnOnce()>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PasteTicket(pub u64);

impl fmt::Display for PasteTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "paste#{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct PlacementJob {
    pub ticket: PasteTicket,
    pub world: WorldId,
    pub island: IslandId,
    pub anchor: BlockPos,
    pub template: Arc<Template>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlacementSummary {
    pub blocks_written: usize,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PlacementError {
    #[error("world {world} is not available for placement")]
    WorldUnavailable { world: WorldId },
    #[error("failed to write block at {pos}: {message}")]
    Write { pos: String, message: String },
    #[error("paste worker is not running")]
    WorkerStopped,
}

/// Writes a template's content into a world. Called on the paste worker.
pub trait StructurePlacer: Send + 'static {
    fn place(&mut self, job: &PlacementJob) -> Result<PlacementSummary, PlacementError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasteRequest {
    /// The world has no island template; nothing was scheduled.
    NoTemplate,
    Scheduled(PasteTicket),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasteCompletion {
    pub ticket: PasteTicket,
    pub world: WorldId,
    pub island: IslandId,
    pub result: Result<PlacementSummary, PlacementError>,
}

struct PendingPaste {
    world: WorldId,
    island: IslandId,
    on_complete: Option<Continuation>,
}

/// Schedules template placement on a background worker and hands results
/// back to the owning thread through [`PastePipeline::pump_completions`].
///
/// Two pastes for the same island must not overlap; the pipeline does not
/// serialize them.
pub struct PastePipeline {
    jobs: Option<Sender<PlacementJob>>,
    completions: Receiver<PasteCompletion>,
    pending: HashMap<PasteTicket, PendingPaste>,
    worker: Option<JoinHandle<()>>,
    next_ticket: u64,
}

impl PastePipeline {
    pub fn spawn<P: StructurePlacer>(placer: P) -> io::Result<Self> {
        let (job_tx, job_rx) = mpsc::channel::<PlacementJob>();
        let (done_tx, done_rx) = mpsc::channel::<PasteCompletion>();
        let worker = thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || run_worker(placer, job_rx, done_tx))?;

        Ok(Self {
            jobs: Some(job_tx),
            completions: done_rx,
            pending: HashMap::new(),
            worker: Some(worker),
            next_ticket: 0,
        })
    }

    /// Schedules the template installed for `world` at `island`'s anchor.
    /// Returns [`PasteRequest::NoTemplate`] when the world has none.
    pub fn paste(
        &mut self,
        store: &TemplateStore,
        world: &WorldId,
        island: &Island,
        on_complete: Option<Continuation>,
    ) -> Result<PasteRequest, PlacementError> {
        let Some(template) = store.get(world) else {
            debug!(world = %world, island = %island.id(), "paste_skipped_no_template");
            return Ok(PasteRequest::NoTemplate);
        };
        let jobs = self.jobs.as_ref().ok_or(PlacementError::WorkerStopped)?;

        let ticket = PasteTicket(self.next_ticket);
        let job = PlacementJob {
            ticket,
            world: world.clone(),
            island: island.id(),
            anchor: island.center().block(),
            template: Arc::clone(template),
        };
        jobs.send(job).map_err(|_| PlacementError::WorkerStopped)?;
        self.next_ticket += 1;
        self.pending.insert(
            ticket,
            PendingPaste {
                world: world.clone(),
                island: island.id(),
                on_complete,
            },
        );
        debug!(
            ticket = %ticket,
            world = %world,
            island = %island.id(),
            template = %template.name(),
            "paste_scheduled"
        );
        Ok(PasteRequest::Scheduled(ticket))
    }

    pub fn paste_without_continuation(
        &mut self,
        store: &TemplateStore,
        world: &WorldId,
        island: &Island,
    ) -> Result<PasteRequest, PlacementError> {
        self.paste(store, world, island, None)
    }

    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    /// True until every paste issued for `island` has been delivered.
    pub fn is_pending(&self, island: IslandId) -> bool {
        self.pending.values().any(|pending| pending.island == island)
    }

    /// Delivers every finished placement without blocking.
    pub fn pump_completions(&mut self) -> Vec<PasteCompletion> {
        let mut delivered = Vec::new();
        loop {
            match self.completions.try_recv() {
                Ok(completion) => delivered.push(self.deliver(completion)),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.fail_orphaned(&mut delivered);
                    break;
                }
            }
        }
        delivered
    }

    /// Blocks until nothing is in flight or `timeout` elapses, delivering
    /// completions as they arrive.
    pub fn wait_for_completions(&mut self, timeout: Duration) -> Vec<PasteCompletion> {
        let deadline = Instant::now() + timeout;
        let mut delivered = Vec::new();
        while !self.pending.is_empty() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!(in_flight = self.pending.len(), "paste_wait_timed_out");
                break;
            }
            match self.completions.recv_timeout(remaining) {
                Ok(completion) => delivered.push(self.deliver(completion)),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    self.fail_orphaned(&mut delivered);
                    break;
                }
            }
        }
        delivered
    }

    fn deliver(&mut self, completion: PasteCompletion) -> PasteCompletion {
        let continuation = self
            .pending
            .remove(&completion.ticket)
            .and_then(|pending| pending.on_complete);
        match &completion.result {
            Ok(summary) => {
                info!(
                    ticket = %completion.ticket,
                    world = %completion.world,
                    island = %completion.island,
                    blocks_written = summary.blocks_written,
                    "paste_completed"
                );
                if let Some(continuation) = continuation {
                    continuation();
                }
            }
            Err(placement_error) => error!(
                ticket = %completion.ticket,
                world = %completion.world,
                island = %completion.island,
                error = %placement_error,
                "paste_failed"
            ),
        }
        completion
    }

    fn fail_orphaned(&mut self, delivered: &mut Vec<PasteCompletion>) {
        // The worker died; nothing else will ever arrive.
        self.jobs = None;
        let mut orphaned = self.pending.drain().collect::<Vec<_>>();
        orphaned.sort_by_key(|(ticket, _)| *ticket);
        for (ticket, pending) in orphaned {
            error!(ticket = %ticket, island = %pending.island, "paste_worker_lost");
            delivered.push(PasteCompletion {
                ticket,
                world: pending.world,
                island: pending.island,
                result: Err(PlacementError::WorkerStopped),
            });
        }
    }
}

impl Drop for PastePipeline {
    fn drop(&mut self) {
        self.jobs = None;
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("paste_worker_panicked");
            }
        }
    }
}

fn run_worker<P: StructurePlacer>(
    mut placer: P,
    jobs: Receiver<PlacementJob>,
    done: Sender<PasteCompletion>,
) {
    for job in jobs {
        let result = placer.place(&job);
        let completion = PasteCompletion {
            ticket: job.ticket,
            world: job.world,
            island: job.island,
            result,
        };
        if done.send(completion).is_err() {
            break;
        }
    }
}
