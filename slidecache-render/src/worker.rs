//! Render workers. Each worker owns one thread and handles one job at a
//! time; results travel back to the owning cache over a shared channel.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::Result;
use flume::{Receiver, Sender, TrySendError};
use slidecache_core::{PageIndex, PagePart, RenderImage, Renderer};
use tracing::{debug, warn};

use crate::encoded::EncodedPage;

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum JobOrigin {
    /// Chosen by the scheduler. The page holds a reservation in the cache.
    Prefetch,
    /// Explicitly requested by the display layer.
    Request { cache_page: bool },
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct RenderJob {
    pub page: PageIndex,
    pub resolution: f64,
    pub part: PagePart,
    pub origin: JobOrigin,
}

pub(crate) struct Rendered {
    pub image: RenderImage,
    pub encoded: EncodedPage,
}

pub(crate) struct RenderOutcome {
    pub worker: usize,
    pub job: RenderJob,
    pub result: Result<Rendered>,
}

pub(crate) struct Worker {
    id: usize,
    jobs: Option<Sender<RenderJob>>,
    handle: Option<JoinHandle<()>>,
    busy: bool,
}

impl Worker {
    pub fn spawn(
        id: usize,
        renderer: Arc<dyn Renderer>,
        results: Sender<RenderOutcome>,
    ) -> std::io::Result<Self> {
        let (jobs, queue) = flume::bounded(1);
        let handle = thread::Builder::new()
            .name(format!("pixcache-worker-{id}"))
            .spawn(move || run(id, renderer, queue, results))?;
        Ok(Self {
            id,
            jobs: Some(jobs),
            handle: Some(handle),
            busy: false,
        })
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    pub fn set_idle(&mut self) {
        self.busy = false;
    }

    /// Hands `job` to the worker thread. Fails if the worker is busy or its
    /// thread has gone away.
    pub fn dispatch(&mut self, job: RenderJob) -> bool {
        if self.busy {
            return false;
        }
        let Some(jobs) = self.jobs.as_ref() else {
            return false;
        };
        match jobs.try_send(job) {
            Ok(()) => {
                self.busy = true;
                true
            }
            Err(TrySendError::Full(_)) => {
                warn!(worker = self.id, page = job.page, "worker queue unexpectedly full");
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                warn!(worker = self.id, page = job.page, "worker thread has exited");
                self.jobs = None;
                false
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        // Closing the job channel ends the thread after its current render.
        self.jobs.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!(worker = self.id, "render worker panicked");
            }
        }
    }
}

fn run(
    id: usize,
    renderer: Arc<dyn Renderer>,
    queue: Receiver<RenderJob>,
    results: Sender<RenderOutcome>,
) {
    while let Ok(job) = queue.recv() {
        debug!(worker = id, page = job.page, resolution = job.resolution, "rendering");
        let result = render(renderer.as_ref(), &job);
        if results
            .send(RenderOutcome {
                worker: id,
                job,
                result,
            })
            .is_err()
        {
            break;
        }
    }
    debug!(worker = id, "render worker stopped");
}

pub(crate) fn render(renderer: &dyn Renderer, job: &RenderJob) -> Result<Rendered> {
    let image = renderer.render_page(job.page, job.resolution, job.part)?;
    let encoded = EncodedPage::encode(job.page, job.resolution, &image)?;
    Ok(Rendered { image, encoded })
}
