//! Single-threaded host loop.
//!
//! The [`Scheduler`] owns every job, the idle worker pool and the reaper.
//! [`Scheduler::poll`] waits for worker output and hands each readable job
//! exactly one frame, so jobs make progress side by side without threads.
use std::{io, os::fd::RawFd, time::Duration};

use log::debug;

use crate::{
    job::{
        CacheStore, Job, JobContext, JobError, JobHandle, JobId, JobObserver, JobOptions,
        JobRegistry,
    },
    poll::Poller,
    protocol::{MAX_PAYLOAD, Request},
    worker::{BackendRegistry, BackendResolver, Reaper, WorkerPool, pool::DEFAULT_CAPACITY},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Idle workers kept for reuse.
    pub pool_capacity: usize,
    /// Largest frame payload sent or accepted.
    pub max_payload: usize,
    /// Bytes a read-ahead buffers before pausing.
    pub preview_threshold: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            pool_capacity: DEFAULT_CAPACITY,
            max_payload: MAX_PAYLOAD,
            preview_threshold: 4096,
        }
    }
}

pub struct Scheduler<R = BackendRegistry> {
    jobs: JobRegistry,
    pool: WorkerPool,
    resolver: R,
    cache: Option<Box<dyn CacheStore>>,
    poller: Poller,
    config: SchedulerConfig,
    // Dropped last so it can wait for the workers dropped before it.
    reaper: Reaper,
}

impl<R: BackendResolver> Scheduler<R> {
    pub fn new(resolver: R) -> Self {
        Self::with_config(resolver, SchedulerConfig::default())
    }

    pub fn with_config(resolver: R, config: SchedulerConfig) -> Self {
        Self {
            jobs: JobRegistry::new(),
            pool: WorkerPool::new(config.pool_capacity),
            resolver,
            cache: None,
            poller: Poller::new(),
            config,
            reaper: Reaper::new(),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn set_cache(&mut self, cache: Box<dyn CacheStore>) {
        self.cache = Some(cache);
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn create(&mut self, options: JobOptions) -> JobHandle {
        self.jobs.insert(Job::new(options))
    }

    pub fn add_observer(
        &mut self,
        handle: JobHandle,
        observer: Box<dyn JobObserver>,
    ) -> Result<(), JobError> {
        let job = self.jobs.get_mut(handle).ok_or(JobError::UnknownJob)?;
        job.add_observer(observer);
        Ok(())
    }

    pub fn start(&mut self, handle: JobHandle, request: Request) -> Result<(), JobError> {
        self.with_job(handle, |job, ctx| job.start(request, ctx))
    }

    /// Starts a `GET` that pauses after [`SchedulerConfig::preview_threshold`]
    /// bytes or at the mime type, whichever comes first.
    pub fn preget(&mut self, handle: JobHandle, url: impl Into<String>) -> Result<(), JobError> {
        let threshold = self.config.preview_threshold;
        self.with_job(handle, |job, ctx| job.start_preget(url, threshold, ctx))
    }

    /// Continues a paused read-ahead.
    pub fn cont(&mut self, handle: JobHandle) -> Result<(), JobError> {
        self.with_job(handle, |job, ctx| job.cont(ctx))
    }

    pub fn send_data(&mut self, handle: JobHandle, bytes: &[u8]) -> Result<(), JobError> {
        self.with_job(handle, |job, _| job.send_data(bytes))
    }

    pub fn send_data_end(&mut self, handle: JobHandle) -> Result<(), JobError> {
        self.with_job(handle, |job, _| job.send_data_end())
    }

    pub fn cancel(&mut self, handle: JobHandle) -> Result<(), JobError> {
        self.with_job(handle, |job, _| {
            job.cancel();
            Ok(())
        })
    }

    pub fn kill(&mut self, handle: JobHandle) -> Result<(), JobError> {
        self.with_job(handle, |job, _| {
            job.kill();
            Ok(())
        })
    }

    pub fn job(&self, handle: JobHandle) -> Option<&Job> {
        self.jobs.get(handle)
    }

    pub fn job_mut(&mut self, handle: JobHandle) -> Option<&mut Job> {
        self.jobs.get_mut(handle)
    }

    pub fn find(&self, id: JobId) -> Option<JobHandle> {
        self.jobs.find(id)
    }

    /// Takes a job out of the scheduler. Dropping a running job kills its
    /// worker.
    pub fn remove(&mut self, handle: JobHandle) -> Option<Job> {
        self.jobs.remove(handle)
    }

    pub fn jobs(&self) -> impl Iterator<Item = (JobHandle, &Job)> {
        self.jobs.iter()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Whether some job is waiting on worker output.
    pub fn is_busy(&self) -> bool {
        self.jobs.iter().any(|(_, job)| job.readable_fd().is_some())
    }

    /// Waits up to `timeout` (forever on `None`) for worker output and
    /// handles one frame per readable job. Returns how many frames were
    /// handled. Returns at once when no job is waiting.
    pub fn poll(&mut self, timeout: Option<Duration>) -> io::Result<usize> {
        let watched = self
            .jobs
            .iter()
            .filter_map(|(handle, job)| job.readable_fd().map(|fd| (fd, handle)))
            .collect::<Vec<(RawFd, JobHandle)>>();
        if watched.is_empty() {
            return Ok(0);
        }

        let fds = watched.iter().map(|(fd, _)| *fd).collect::<Vec<_>>();
        let ready = self.poller.wait(&fds, timeout)?;

        let mut handled = 0;
        for fd in ready {
            let Some(&(_, handle)) = watched.iter().find(|(watched, _)| *watched == fd) else {
                continue;
            };
            {
                let (jobs, mut ctx) = self.parts();
                if let Some(job) = jobs.get_mut(handle) {
                    job.on_readable(&mut ctx);
                    handled += 1;
                }
            }
            self.cleanup(handle);
        }
        Ok(handled)
    }

    /// Polls until no job waits on its worker. Paused read-aheads and jobs
    /// waiting for PUT data do not count as waiting.
    pub fn run_until_idle(&mut self) -> io::Result<()> {
        while self.is_busy() {
            self.poll(None)?;
        }
        Ok(())
    }

    fn with_job<T>(
        &mut self,
        handle: JobHandle,
        f: impl FnOnce(&mut Job, &mut JobContext<'_>) -> Result<T, JobError>,
    ) -> Result<T, JobError> {
        let result = {
            let (jobs, mut ctx) = self.parts();
            let job = jobs.get_mut(handle).ok_or(JobError::UnknownJob)?;
            f(job, &mut ctx)
        };
        self.cleanup(handle);
        result
    }

    fn parts(&mut self) -> (&mut JobRegistry, JobContext<'_>) {
        let ctx = JobContext {
            pool: &mut self.pool,
            resolver: &self.resolver,
            reaper: self.reaper.handle(),
            cache: self
                .cache
                .as_mut()
                .map(|cache| &mut **cache as &mut dyn CacheStore),
            max_payload: self.config.max_payload,
        };
        (&mut self.jobs, ctx)
    }

    fn cleanup(&mut self, handle: JobHandle) {
        let done = self
            .jobs
            .get(handle)
            .is_some_and(|job| job.is_done() && job.options().auto_cleanup);
        if done {
            if let Some(job) = self.jobs.remove(handle) {
                debug!("job {} cleaned up", job.id());
            }
        }
    }
}
