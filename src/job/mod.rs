//! Jobs.
//!
//! A [`Job`] drives one logical operation: it binds a worker, issues exactly
//! one request and follows the replies until the worker reports success or
//! failure. Jobs never block waiting for a worker on their own. The host
//! loop calls [`Job::on_readable`] once per readiness notification on
//! [`Job::readable_fd`], and each call handles exactly one frame.
//!
//! ```text
//! Idle -> Active -> Ready -> Finished
//!            \        \
//!             +--------+--> Error
//! ```
use std::{
    fmt,
    os::fd::RawFd,
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, SystemTime},
};

use log::{debug, warn};
use thiserror::Error;
use url::Url;

use crate::{
    ErrorCode,
    protocol::{
        CommandClass, CommandId, CommandSender, DirectoryEntry, FrameHandler, HandlerResult, Info,
        Message, Request,
    },
    worker::{BackendResolver, ReaperHandle, Worker, WorkerIdentity, WorkerPool},
};

pub mod cache;
pub mod observer;
pub mod progress;
pub mod registry;

pub use cache::{CacheRecord, CacheStore, MemoryCache};
pub use observer::{EventLog, JobEvent, JobObserver};
pub use progress::{Progress, format_size};
pub use registry::{JobHandle, JobRegistry};

static NEXT_JOB_ID: AtomicU64 = AtomicU64::new(1);

/// Process-wide unique, increasing job number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobId(u64);

impl JobId {
    fn next() -> Self {
        JobId(NEXT_JOB_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Idle,
    Active,
    /// The worker accepts a data stream.
    Ready,
    Error,
    Finished,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    #[error("{}", .code.describe(.text))]
    Failed { code: ErrorCode, text: String },

    #[error("job is already running {0}")]
    AlreadyActive(CommandId),

    #[error("job has no active command")]
    NotActive,

    #[error("no such job")]
    UnknownJob,
}

impl JobError {
    pub fn failed(code: ErrorCode, text: impl Into<String>) -> Self {
        JobError::Failed {
            code,
            text: text.into(),
        }
    }

    /// The wire code for this error. Misuse of the job API maps to
    /// [`ErrorCode::Internal`].
    pub fn code(&self) -> ErrorCode {
        match self {
            JobError::Failed { code, .. } => *code,
            JobError::AlreadyActive(_) | JobError::NotActive | JobError::UnknownJob => {
                ErrorCode::Internal
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOptions {
    /// Hand the worker back to the pool when the job is done with it.
    pub cache_to_pool: bool,
    /// Drop the job from its registry once it finishes or fails.
    pub auto_cleanup: bool,
    /// How long a cached `GET` result stays valid. `None` leaves expiry to
    /// the cache.
    pub cache_ttl: Option<Duration>,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            cache_to_pool: true,
            auto_cleanup: true,
            cache_ttl: None,
        }
    }
}

/// Shared state a job borrows while it starts or handles a frame.
pub struct JobContext<'a> {
    pub pool: &'a mut WorkerPool,
    pub resolver: &'a dyn BackendResolver,
    pub reaper: ReaperHandle,
    pub cache: Option<&'a mut dyn CacheStore>,
    pub max_payload: usize,
}

#[derive(Debug)]
struct ReadAhead {
    threshold: usize,
    buffer: Vec<u8>,
    mime_type: Option<String>,
    pause_requested: bool,
    paused: bool,
    finished: bool,
}

#[derive(Debug)]
enum Completion {
    Finished,
    Failed(ErrorCode, String),
}

pub struct Job {
    id: JobId,
    options: JobOptions,
    state: JobState,
    active: Option<CommandId>,
    error: Option<JobError>,
    canceled: bool,
    progress: Progress,
    resumable: bool,
    mime_type: Option<String>,
    worker: Option<Worker>,
    identity: Option<WorkerIdentity>,
    observers: Vec<Box<dyn JobObserver>>,
    read_ahead: Option<ReadAhead>,
    /// Body of a `GET` collected for the cache, with its URL.
    cached: Option<(String, Vec<u8>)>,
    completion: Option<Completion>,
}

fn notify(observers: &mut [Box<dyn JobObserver>], mut f: impl FnMut(&mut dyn JobObserver)) {
    for observer in observers.iter_mut() {
        f(observer.as_mut());
    }
}

impl Job {
    pub fn new(options: JobOptions) -> Self {
        Self {
            id: JobId::next(),
            options,
            state: JobState::Idle,
            active: None,
            error: None,
            canceled: false,
            progress: Progress::default(),
            resumable: false,
            mime_type: None,
            worker: None,
            identity: None,
            observers: Vec::new(),
            read_ahead: None,
            cached: None,
            completion: None,
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn options(&self) -> &JobOptions {
        &self.options
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn active_command(&self) -> Option<CommandId> {
        self.active
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Finished, failed or canceled.
    pub fn is_done(&self) -> bool {
        matches!(self.state, JobState::Finished | JobState::Error)
    }

    pub fn error(&self) -> Option<&JobError> {
        self.error.as_ref()
    }

    pub fn was_canceled(&self) -> bool {
        self.canceled
    }

    pub fn progress(&self) -> &Progress {
        &self.progress
    }

    pub fn is_resumable(&self) -> bool {
        self.resumable
    }

    pub fn mime_type(&self) -> Option<&str> {
        self.mime_type.as_deref()
    }

    /// Whether a read-ahead is holding data back until [`Job::cont`].
    pub fn is_previewing(&self) -> bool {
        self.read_ahead.as_ref().is_some_and(|ra| ra.paused)
    }

    pub fn add_observer(&mut self, observer: Box<dyn JobObserver>) {
        self.observers.push(observer);
    }

    /// The descriptor to watch, while a command runs and the worker is not
    /// suspended.
    pub fn readable_fd(&self) -> Option<RawFd> {
        self.active?;
        self.worker
            .as_ref()
            .filter(|worker| !worker.is_suspended())
            .map(Worker::readable_fd)
    }

    /// Returns a finished or failed job to [`JobState::Idle`] so it can run
    /// another command.
    pub fn reset(&mut self) -> Result<(), JobError> {
        if let Some(active) = self.active {
            return Err(JobError::AlreadyActive(active));
        }
        self.state = JobState::Idle;
        self.error = None;
        self.canceled = false;
        self.progress = Progress::default();
        self.resumable = false;
        self.mime_type = None;
        self.read_ahead = None;
        self.cached = None;
        self.completion = None;
        Ok(())
    }

    /// Issues `request` on a pooled or freshly spawned worker.
    ///
    /// # Panics
    /// In debug builds, when a command is already active. Release builds
    /// return [`JobError::AlreadyActive`] instead.
    pub fn start(&mut self, request: Request, ctx: &mut JobContext<'_>) -> Result<(), JobError> {
        self.prepare()?;
        self.begin(request, ctx)
    }

    /// Starts a `GET` that holds data back until [`Job::cont`].
    ///
    /// Up to `threshold` bytes are buffered, or less if the mime type shows
    /// up first. The worker is then suspended and observers get
    /// [`JobObserver::on_preview`].
    pub fn start_preget(
        &mut self,
        url: impl Into<String>,
        threshold: usize,
        ctx: &mut JobContext<'_>,
    ) -> Result<(), JobError> {
        self.prepare()?;
        self.read_ahead = Some(ReadAhead {
            threshold,
            buffer: Vec::new(),
            mime_type: None,
            pause_requested: false,
            paused: false,
            finished: false,
        });
        self.begin(Request::get(url), ctx)
    }

    fn prepare(&mut self) -> Result<(), JobError> {
        debug_assert!(
            self.active.is_none(),
            "job {} is already running {:?}",
            self.id,
            self.active
        );
        self.reset()
    }

    fn begin(&mut self, request: Request, ctx: &mut JobContext<'_>) -> Result<(), JobError> {
        let command = request.command();

        let identity = match resolve_identity(&request) {
            Ok(identity) => identity,
            Err(e) => return Err(self.reject(e)),
        };
        let Some(backend) = ctx.resolver.resolve(&identity.protocol) else {
            let err = JobError::failed(ErrorCode::UnsupportedProtocol, identity.protocol);
            return Err(self.reject(err));
        };

        let cached = match (&request, ctx.cache.as_mut()) {
            (Request::Get { url }, Some(cache)) => cache.lookup(url),
            _ => None,
        };
        if let Some(record) = cached {
            debug!("job {} served {} from cache", self.id, record.url);
            // Nothing to hold back without a worker, so a preget just finishes.
            self.read_ahead = None;
            self.active = Some(command);
            self.state = JobState::Active;
            if let Some(mime_type) = record.mime_type {
                self.handle_info(Info::MimeType(mime_type));
            }
            self.handle_info(Info::TotalSize(record.data.len() as u64));
            self.handle_data(record.data);
            self.handle_finished();
            self.settle(ctx);
            return Ok(());
        }

        let mount = matches!(request, Request::Mount { .. } | Request::Unmount { .. });
        let mut worker = match ctx.pool.acquire(&identity, backend.persistent || mount) {
            Some(worker) => worker,
            None => {
                match Worker::spawn(
                    &backend.executable,
                    &identity.protocol,
                    ctx.reaper.clone(),
                    ctx.max_payload,
                ) {
                    Ok(worker) => worker,
                    Err(e) => {
                        warn!("job {}: {e}", self.id);
                        let text = backend.executable.display().to_string();
                        return Err(self.reject(JobError::failed(
                            ErrorCode::CannotLaunchProcess,
                            text,
                        )));
                    }
                }
            }
        };

        if let Err(e) = worker.send_request(&request) {
            warn!("job {}: sending {command} failed: {e}", self.id);
            drop(worker);
            let err = JobError::failed(ErrorCode::WorkerDied, identity.protocol);
            return Err(self.reject(err));
        }

        debug!("job {} started {command} on {identity}", self.id);
        if let (Request::Get { url }, true) = (&request, ctx.cache.is_some()) {
            self.cached = Some((url.clone(), Vec::new()));
        }
        self.worker = Some(worker);
        self.identity = Some(identity);
        self.active = Some(command);
        self.state = JobState::Active;
        Ok(())
    }

    /// Handles one frame from the worker.
    pub fn on_readable(&mut self, ctx: &mut JobContext<'_>) {
        let Some(mut worker) = self.worker.take() else {
            return;
        };

        let outcome = worker.dispatch(self);
        self.worker = Some(worker);

        match outcome {
            Ok(true) => self.settle(ctx),
            Ok(false) => {
                warn!("job {}: worker closed its channel", self.id);
                self.worker_died();
            }
            Err(e) => {
                warn!("job {}: {e}", self.id);
                self.worker_died();
            }
        }
    }

    /// Releases what a read-ahead held back and lets the worker continue.
    pub fn cont(&mut self, ctx: &mut JobContext<'_>) -> Result<(), JobError> {
        let Some(read_ahead) = self.read_ahead.take() else {
            return match self.active {
                Some(_) => Ok(()),
                None => Err(JobError::NotActive),
            };
        };

        let id = self.id;
        if let Some(mime_type) = &read_ahead.mime_type {
            notify(&mut self.observers, |o| o.on_mime_type(id, mime_type));
        }
        if !read_ahead.buffer.is_empty() {
            notify(&mut self.observers, |o| o.on_data(id, &read_ahead.buffer));
        }
        if let Some(worker) = self.worker.as_mut() {
            worker.resume();
        }
        if read_ahead.finished {
            self.finish(ctx);
        }
        Ok(())
    }

    /// Streams part of a `PUT` body. Call after [`JobObserver::on_ready`].
    pub fn send_data(&mut self, bytes: &[u8]) -> Result<(), JobError> {
        let id = self.id;
        let worker = self.worker.as_mut().ok_or(JobError::NotActive)?;
        let chunk_size = worker.max_payload().max(1);

        for chunk in bytes.chunks(chunk_size) {
            if let Err(e) = worker.send_data(chunk) {
                warn!("job {id}: sending data failed: {e}");
                return Err(self.worker_died());
            }
        }

        if let Some(percent) = self.progress.add_processed(bytes.len() as u64) {
            notify(&mut self.observers, |o| o.on_percent(id, percent));
        }
        Ok(())
    }

    /// Ends a `PUT` body.
    pub fn send_data_end(&mut self) -> Result<(), JobError> {
        let worker = self.worker.as_mut().ok_or(JobError::NotActive)?;
        if let Err(e) = worker.send_message(&Message::DataEnd) {
            warn!("job {}: sending data end failed: {e}", self.id);
            return Err(self.worker_died());
        }
        Ok(())
    }

    /// Kills the worker and tells observers the job was canceled.
    pub fn cancel(&mut self) {
        if self.stop() {
            let id = self.id;
            notify(&mut self.observers, |o| o.on_canceled(id));
        }
    }

    /// Like [`Job::cancel`], without notifying anyone.
    pub fn kill(&mut self) {
        self.stop();
    }

    fn stop(&mut self) -> bool {
        if self.active.is_none() {
            return false;
        }
        self.identity = None;
        if let Some(mut worker) = self.worker.take() {
            if let Err(e) = worker.terminate() {
                warn!("job {}: {e}", self.id);
            }
        }

        debug!("job {} canceled", self.id);
        self.active = None;
        self.state = JobState::Finished;
        self.canceled = true;
        self.read_ahead = None;
        self.cached = None;
        self.completion = None;
        true
    }

    /// Applies what the last frame decided once the worker is back in place.
    fn settle(&mut self, ctx: &mut JobContext<'_>) {
        let id = self.id;
        if let Some(read_ahead) = self.read_ahead.as_mut().filter(|ra| ra.pause_requested) {
            read_ahead.pause_requested = false;
            read_ahead.paused = true;
            if let Some(worker) = self.worker.as_mut() {
                worker.suspend();
            }
            debug!("job {id} paused after {} bytes", read_ahead.buffer.len());
            notify(&mut self.observers, |o| {
                o.on_preview(id, &read_ahead.buffer, read_ahead.mime_type.as_deref())
            });
        }

        match self.completion.take() {
            Some(Completion::Finished) => self.finish(ctx),
            Some(Completion::Failed(code, text)) => self.fail(ctx.pool, code, text),
            None => {}
        }
    }

    fn finish(&mut self, ctx: &mut JobContext<'_>) {
        self.release_worker(ctx.pool, true);

        if let (Some((url, data)), Some(cache)) = (self.cached.take(), ctx.cache.as_mut()) {
            cache.insert(CacheRecord {
                url,
                mime_type: self.mime_type.clone(),
                data,
                expires: self.options.cache_ttl.map(|ttl| SystemTime::now() + ttl),
            });
        }

        let id = self.id;
        if let Some(command) = self.active.take() {
            debug!("job {id} finished {command}");
        }
        self.state = JobState::Finished;
        self.read_ahead = None;
        notify(&mut self.observers, |o| o.on_finished(id));
    }

    fn fail(&mut self, pool: &mut WorkerPool, code: ErrorCode, text: String) {
        self.release_worker(pool, !code.poisons_worker());
        self.record_error(code, text);
    }

    /// Drops the worker without pooling it and reports it dead.
    fn worker_died(&mut self) -> JobError {
        let protocol = self
            .identity
            .take()
            .map(|identity| identity.protocol)
            .unwrap_or_default();
        drop(self.worker.take());
        self.record_error(ErrorCode::WorkerDied, protocol.clone());
        JobError::failed(ErrorCode::WorkerDied, protocol)
    }

    fn release_worker(&mut self, pool: &mut WorkerPool, reusable: bool) {
        let identity = self.identity.take();
        let Some(mut worker) = self.worker.take() else {
            return;
        };

        match identity {
            Some(identity) if reusable && self.options.cache_to_pool => {
                worker.resume();
                pool.release(worker, identity);
            }
            _ => debug!("job {} discards its {} worker", self.id, worker.protocol()),
        }
    }

    fn record_error(&mut self, code: ErrorCode, text: String) {
        let id = self.id;
        debug!("job {id} failed: {}", code.describe(&text));

        self.active = None;
        self.state = JobState::Error;
        self.read_ahead = None;
        self.cached = None;
        self.completion = None;
        notify(&mut self.observers, |o| o.on_error(id, code, &text));
        self.error = Some(JobError::Failed { code, text });
    }

    fn reject(&mut self, err: JobError) -> JobError {
        if let JobError::Failed { code, text } = &err {
            self.record_error(*code, text.clone());
        }
        err
    }

    fn handle_data(&mut self, bytes: Vec<u8>) {
        let id = self.id;
        if let Some(percent) = self.progress.add_processed(bytes.len() as u64) {
            notify(&mut self.observers, |o| o.on_percent(id, percent));
        }
        if let Some((_, body)) = self.cached.as_mut() {
            body.extend_from_slice(&bytes);
        }

        if let Some(read_ahead) = self.read_ahead.as_mut() {
            read_ahead.buffer.extend_from_slice(&bytes);
            if !read_ahead.paused && read_ahead.buffer.len() >= read_ahead.threshold {
                read_ahead.pause_requested = true;
            }
            return;
        }
        notify(&mut self.observers, |o| o.on_data(id, &bytes));
    }

    fn handle_info(&mut self, info: Info) {
        let id = self.id;
        if let Some(percent) = self.progress.apply(&info) {
            notify(&mut self.observers, |o| o.on_percent(id, percent));
        }

        if let Info::MimeType(mime_type) = &info {
            self.mime_type = Some(mime_type.clone());
            if let Some(read_ahead) = self.read_ahead.as_mut() {
                if read_ahead.mime_type.is_none() {
                    read_ahead.mime_type = Some(mime_type.clone());
                    if !read_ahead.paused {
                        read_ahead.pause_requested = true;
                    }
                }
                return;
            }
            notify(&mut self.observers, |o| o.on_mime_type(id, mime_type));
        }
        notify(&mut self.observers, |o| o.on_info(id, &info));
    }

    fn handle_finished(&mut self) {
        if let Some(read_ahead) = self.read_ahead.as_mut() {
            read_ahead.finished = true;
            if !read_ahead.paused {
                read_ahead.pause_requested = true;
            }
            return;
        }
        self.completion = Some(Completion::Finished);
    }
}

impl FrameHandler for Job {
    fn accepts(&self, class: CommandClass) -> bool {
        class != CommandClass::Request
    }

    fn on_data(&mut self, bytes: Vec<u8>) -> HandlerResult {
        self.handle_data(bytes);
        Ok(())
    }

    fn on_error(&mut self, code: ErrorCode, text: String) -> HandlerResult {
        if code.is_advisory() {
            let id = self.id;
            debug!("job {id} warning: {}", code.describe(&text));
            notify(&mut self.observers, |o| o.on_warning(id, code, &text));
        } else {
            self.completion = Some(Completion::Failed(code, text));
        }
        Ok(())
    }

    fn on_ready(&mut self) -> HandlerResult {
        let id = self.id;
        self.state = JobState::Ready;
        notify(&mut self.observers, |o| o.on_ready(id));
        Ok(())
    }

    fn on_finished(&mut self) -> HandlerResult {
        self.handle_finished();
        Ok(())
    }

    fn on_list_entry(&mut self, entry: DirectoryEntry) -> HandlerResult {
        let id = self.id;
        notify(&mut self.observers, |o| o.on_list_entry(id, &entry));
        Ok(())
    }

    fn on_is_directory(&mut self) -> HandlerResult {
        let id = self.id;
        notify(&mut self.observers, |o| o.on_is_directory(id));
        Ok(())
    }

    fn on_is_file(&mut self) -> HandlerResult {
        let id = self.id;
        notify(&mut self.observers, |o| o.on_is_file(id));
        Ok(())
    }

    fn on_renamed(&mut self, name: String) -> HandlerResult {
        let id = self.id;
        self.progress.renamed(&name);
        notify(&mut self.observers, |o| o.on_renamed(id, &name));
        Ok(())
    }

    fn on_resume(&mut self, resume: bool) -> HandlerResult {
        let id = self.id;
        self.resumable = resume;
        notify(&mut self.observers, |o| o.on_resume(id, resume));
        Ok(())
    }

    fn on_info(&mut self, info: Info) -> HandlerResult {
        self.handle_info(info);
        Ok(())
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("active", &self.active)
            .field("error", &self.error)
            .field("progress", &self.progress)
            .field("worker", &self.worker.as_ref().map(Worker::pid))
            .field("observers", &self.observers.len())
            .finish_non_exhaustive()
    }
}

/// Works out which worker runs `request`. Every target must agree on
/// protocol, host and user; mount and unmount go to the local `file`
/// worker.
fn resolve_identity(request: &Request) -> Result<WorkerIdentity, JobError> {
    let mut resolved: Option<WorkerIdentity> = None;

    for target in request.targets() {
        let url =
            Url::parse(target).map_err(|_| JobError::failed(ErrorCode::MalformedUrl, target))?;
        let identity = WorkerIdentity::from_url(&url);

        match &resolved {
            Some(first) if *first != identity => {
                return Err(JobError::failed(
                    ErrorCode::UnsupportedAction,
                    format!("sources on both {first} and {identity}"),
                ));
            }
            Some(_) => {}
            None => resolved = Some(identity),
        }
    }

    match resolved {
        Some(identity) => Ok(identity),
        None if matches!(request, Request::Mount { .. } | Request::Unmount { .. }) => {
            Ok(WorkerIdentity::new("file"))
        }
        None => Err(JobError::failed(ErrorCode::MalformedUrl, "no source given")),
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use tempdir::TempDir;

    use super::*;
    use crate::{
        protocol::{Command, MAX_PAYLOAD},
        testing::{replay, script},
        worker::{BackendRegistry, Reaper},
    };

    struct Harness {
        pool: WorkerPool,
        backends: BackendRegistry,
        cache: Option<MemoryCache>,
        reaper: Reaper,
        temp: TempDir,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                pool: WorkerPool::default(),
                backends: BackendRegistry::new(),
                cache: None,
                reaper: Reaper::new(),
                temp: TempDir::new("job").unwrap(),
            }
        }

        /// Registers a `file` backend replaying `replies`.
        fn replaying(mut self, replies: &[Command]) -> Self {
            let path = replay(&self.temp, "backend", replies);
            self.backends.register("file", path);
            self
        }

        fn backend(mut self, protocol: &str, path: &Path) -> Self {
            self.backends.register(protocol, path);
            self
        }

        fn ctx(&mut self) -> JobContext<'_> {
            JobContext {
                pool: &mut self.pool,
                resolver: &self.backends,
                reaper: self.reaper.handle(),
                cache: self.cache.as_mut().map(|cache| cache as &mut dyn CacheStore),
                max_payload: MAX_PAYLOAD,
            }
        }
    }

    fn observed(job: &mut Job) -> EventLog {
        let log = EventLog::new();
        job.add_observer(Box::new(log.clone()));
        log
    }

    fn msg(message: Message) -> Command {
        Command::Message(message)
    }

    fn info(info: Info) -> Command {
        Command::Info(info)
    }

    #[test]
    fn ids_are_unique_and_increasing() {
        let ids = (0..16)
            .map(|_| Job::new(JobOptions::default()).id())
            .collect::<Vec<_>>();
        assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn get_end_to_end() {
        let mut harness = Harness::new().replaying(&[
            info(Info::MimeType("text/plain".into())),
            msg(Message::Data(b"hello ".to_vec())),
            msg(Message::Data(b"world".to_vec())),
            msg(Message::Finished),
        ]);
        let mut job = Job::new(JobOptions::default());
        let log = observed(&mut job);

        job.start(Request::get("file:///tmp/x"), &mut harness.ctx())
            .unwrap();
        assert_eq!(job.state(), JobState::Active);
        assert_eq!(job.active_command(), Some(CommandId::Get));
        assert!(job.readable_fd().is_some());

        while job.is_active() {
            job.on_readable(&mut harness.ctx());
        }

        assert_eq!(job.state(), JobState::Finished);
        assert_eq!(job.progress().processed_size, 11);
        assert_eq!(job.mime_type(), Some("text/plain"));
        let id = job.id();
        assert_eq!(
            log.drain(),
            vec![
                JobEvent::MimeType(id, "text/plain".into()),
                JobEvent::Info(id, Info::MimeType("text/plain".into())),
                JobEvent::Data(id, b"hello ".to_vec()),
                JobEvent::Data(id, b"world".to_vec()),
                JobEvent::Finished(id),
            ]
        );
        assert!(
            harness
                .pool
                .acquire(&WorkerIdentity::new("file"), false)
                .is_some()
        );
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "already running")]
    fn second_start_while_active_panics() {
        let mut harness = Harness::new().replaying(&[]);
        let mut job = Job::new(JobOptions::default());

        job.start(Request::get("file:///a"), &mut harness.ctx())
            .unwrap();
        let _ = job.start(Request::get("file:///b"), &mut harness.ctx());
    }

    #[test]
    #[cfg(not(debug_assertions))]
    fn second_start_while_active_is_rejected() {
        let mut harness = Harness::new().replaying(&[]);
        let mut job = Job::new(JobOptions::default());

        job.start(Request::get("file:///a"), &mut harness.ctx())
            .unwrap();
        let err = job
            .start(Request::get("file:///b"), &mut harness.ctx())
            .unwrap_err();

        assert!(matches!(err, JobError::AlreadyActive(CommandId::Get)));
        assert!(job.is_active());
        assert_eq!(job.active_command(), Some(CommandId::Get));
    }

    #[test]
    fn malformed_url_fails_without_spawning() {
        let mut harness = Harness::new().replaying(&[]);
        let mut job = Job::new(JobOptions::default());
        let log = observed(&mut job);

        let err = job
            .start(Request::get("not a url"), &mut harness.ctx())
            .unwrap_err();

        assert_eq!(err.code(), ErrorCode::MalformedUrl);
        assert_eq!(job.state(), JobState::Error);
        assert!(job.readable_fd().is_none());
        assert!(matches!(log.pop(), Some(JobEvent::Error { .. })));
    }

    #[test]
    fn unknown_protocol_is_unsupported() {
        let mut harness = Harness::new().replaying(&[]);
        let mut job = Job::new(JobOptions::default());

        let err = job
            .start(Request::get("gopher://h/x"), &mut harness.ctx())
            .unwrap_err();
        assert_eq!(err, JobError::failed(ErrorCode::UnsupportedProtocol, "gopher"));
    }

    #[test]
    fn launch_failure_is_reported() {
        let mut harness = Harness::new().backend("file", Path::new("/nonexistent/worker"));
        let mut job = Job::new(JobOptions::default());

        let err = job
            .start(Request::get("file:///x"), &mut harness.ctx())
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::CannotLaunchProcess);
    }

    #[test]
    fn mixed_sources_are_unsupported() {
        let mut harness = Harness::new().replaying(&[]);
        let mut job = Job::new(JobOptions::default());

        let request = Request::Del {
            sources: vec!["file:///a".into(), "ftp://h/b".into()],
        };
        let err = job.start(request, &mut harness.ctx()).unwrap_err();
        assert_eq!(err.code(), ErrorCode::UnsupportedAction);
        assert!(harness.pool.is_empty());
    }

    #[test]
    fn warning_leaves_command_active() {
        let mut harness = Harness::new().replaying(&[
            msg(Message::error(ErrorCode::Warning, "slow disk")),
            msg(Message::Finished),
        ]);
        let mut job = Job::new(JobOptions::default());
        let log = observed(&mut job);

        job.start(Request::get("file:///x"), &mut harness.ctx())
            .unwrap();
        job.on_readable(&mut harness.ctx());

        assert_eq!(job.active_command(), Some(CommandId::Get));
        assert_eq!(job.state(), JobState::Active);
        assert!(job.error().is_none());
        assert!(matches!(
            log.pop(),
            Some(JobEvent::Warning {
                code: ErrorCode::Warning,
                ..
            })
        ));

        job.on_readable(&mut harness.ctx());
        assert_eq!(job.state(), JobState::Finished);
    }

    #[test]
    fn error_keeps_healthy_worker() {
        let mut harness = Harness::new().replaying(&[msg(Message::error(
            ErrorCode::DoesNotExist,
            "/tmp/missing",
        ))]);
        let mut job = Job::new(JobOptions::default());

        job.start(Request::get("file:///tmp/missing"), &mut harness.ctx())
            .unwrap();
        job.on_readable(&mut harness.ctx());

        assert_eq!(job.state(), JobState::Error);
        assert!(job.active_command().is_none());
        assert_eq!(job.error().unwrap().code(), ErrorCode::DoesNotExist);
        assert_eq!(harness.pool.len(), 1);
    }

    #[test]
    fn opting_out_of_pooling_discards_worker() {
        let mut harness = Harness::new().replaying(&[msg(Message::Finished)]);
        let mut job = Job::new(JobOptions {
            cache_to_pool: false,
            ..Default::default()
        });

        job.start(Request::get("file:///x"), &mut harness.ctx())
            .unwrap();
        job.on_readable(&mut harness.ctx());

        assert_eq!(job.state(), JobState::Finished);
        assert!(harness.pool.is_empty());
    }

    #[test]
    fn dead_worker_is_discarded() {
        let mut harness = Harness::new();
        let path = script(&harness.temp, "dies", "exit 3");
        harness.backends.register("file", path);
        let mut job = Job::new(JobOptions::default());

        job.start(Request::get("file:///x"), &mut harness.ctx())
            .unwrap_or_default();
        if job.is_active() {
            job.on_readable(&mut harness.ctx());
        }

        assert_eq!(
            job.error(),
            Some(&JobError::failed(ErrorCode::WorkerDied, "file"))
        );
        assert!(harness.pool.is_empty());
    }

    #[test]
    fn request_frames_from_a_worker_are_a_violation() {
        let mut harness =
            Harness::new().replaying(&[Command::Request(Request::get("file:///x"))]);
        let mut job = Job::new(JobOptions::default());

        job.start(Request::get("file:///x"), &mut harness.ctx())
            .unwrap();
        job.on_readable(&mut harness.ctx());

        assert_eq!(job.error().unwrap().code(), ErrorCode::WorkerDied);
        assert!(harness.pool.is_empty());
    }

    #[test]
    fn source_frames_from_a_worker_are_a_violation() {
        let mut harness = Harness::new().replaying(&[
            Command::Request(Request::Del {
                sources: vec!["file:///a".into(), "file:///b".into()],
            }),
            msg(Message::Finished),
        ]);
        let mut job = Job::new(JobOptions::default());

        job.start(Request::get("file:///x"), &mut harness.ctx())
            .unwrap();
        job.on_readable(&mut harness.ctx());

        assert_eq!(job.state(), JobState::Error);
        assert_eq!(job.error().unwrap().code(), ErrorCode::WorkerDied);
        assert!(harness.pool.is_empty());
    }

    #[test]
    fn cancel_terminates_worker() {
        let mut harness = Harness::new().replaying(&[]);
        let mut job = Job::new(JobOptions::default());
        let log = observed(&mut job);

        job.start(Request::get("file:///x"), &mut harness.ctx())
            .unwrap();
        job.cancel();

        assert!(job.was_canceled());
        assert_eq!(job.state(), JobState::Finished);
        assert!(job.readable_fd().is_none());
        assert_eq!(log.drain(), vec![JobEvent::Canceled(job.id())]);
        assert!(harness.pool.is_empty());
    }

    #[test]
    fn kill_is_quiet() {
        let mut harness = Harness::new().replaying(&[]);
        let mut job = Job::new(JobOptions::default());
        let log = observed(&mut job);

        job.start(Request::get("file:///x"), &mut harness.ctx())
            .unwrap();
        job.kill();

        assert!(!job.is_active());
        assert!(log.is_empty());
    }

    #[test]
    fn put_streams_after_ready() {
        let mut harness =
            Harness::new().replaying(&[msg(Message::Ready), msg(Message::Finished)]);
        let mut job = Job::new(JobOptions::default());
        let log = observed(&mut job);

        let request = Request::Put {
            url: "file:///tmp/out".into(),
            mode: 0o644,
            overwrite: true,
            resume: false,
            size: 6,
        };
        job.start(request, &mut harness.ctx()).unwrap();
        job.on_readable(&mut harness.ctx());
        assert_eq!(job.state(), JobState::Ready);
        assert_eq!(log.pop(), Some(JobEvent::Ready(job.id())));

        job.send_data(b"abc").unwrap();
        job.send_data(b"def").unwrap();
        job.send_data_end().unwrap();
        assert_eq!(job.progress().processed_size, 6);

        job.on_readable(&mut harness.ctx());
        assert_eq!(job.state(), JobState::Finished);
    }

    #[test]
    fn preget_pauses_at_threshold() {
        let mut harness = Harness::new().replaying(&[
            msg(Message::Data(b"abc".to_vec())),
            msg(Message::Data(b"defg".to_vec())),
            msg(Message::Data(b"hij".to_vec())),
            msg(Message::Finished),
        ]);
        let mut job = Job::new(JobOptions::default());
        let log = observed(&mut job);
        let id = job.id();

        job.start_preget("file:///x", 5, &mut harness.ctx()).unwrap();
        job.on_readable(&mut harness.ctx());
        assert!(log.is_empty());

        job.on_readable(&mut harness.ctx());
        assert!(job.is_previewing());
        assert!(job.readable_fd().is_none());
        assert_eq!(
            log.drain(),
            vec![JobEvent::Preview {
                job: id,
                data: b"abcdefg".to_vec(),
                mime_type: None,
            }]
        );

        job.cont(&mut harness.ctx()).unwrap();
        assert!(job.readable_fd().is_some());
        assert_eq!(log.drain(), vec![JobEvent::Data(id, b"abcdefg".to_vec())]);

        while job.is_active() {
            job.on_readable(&mut harness.ctx());
        }
        assert_eq!(
            log.drain(),
            vec![JobEvent::Data(id, b"hij".to_vec()), JobEvent::Finished(id)]
        );
        assert_eq!(job.progress().processed_size, 10);
    }

    #[test]
    fn preget_pauses_on_mime_type() {
        let mut harness = Harness::new().replaying(&[
            info(Info::MimeType("image/png".into())),
            msg(Message::Data(b"png".to_vec())),
            msg(Message::Finished),
        ]);
        let mut job = Job::new(JobOptions::default());
        let log = observed(&mut job);
        let id = job.id();

        job.start_preget("file:///x.png", 4096, &mut harness.ctx())
            .unwrap();
        job.on_readable(&mut harness.ctx());

        assert_eq!(
            log.drain(),
            vec![JobEvent::Preview {
                job: id,
                data: Vec::new(),
                mime_type: Some("image/png".into()),
            }]
        );

        job.cont(&mut harness.ctx()).unwrap();
        assert_eq!(log.drain(), vec![JobEvent::MimeType(id, "image/png".into())]);
    }

    #[test]
    fn preget_of_small_resource_finishes_on_cont() {
        let mut harness = Harness::new()
            .replaying(&[msg(Message::Data(b"ab".to_vec())), msg(Message::Finished)]);
        let mut job = Job::new(JobOptions::default());
        let log = observed(&mut job);
        let id = job.id();

        job.start_preget("file:///x", 4096, &mut harness.ctx())
            .unwrap();
        job.on_readable(&mut harness.ctx());
        job.on_readable(&mut harness.ctx());

        assert!(job.is_active());
        assert!(matches!(log.pop(), Some(JobEvent::Preview { .. })));

        job.cont(&mut harness.ctx()).unwrap();
        assert_eq!(
            log.drain(),
            vec![JobEvent::Data(id, b"ab".to_vec()), JobEvent::Finished(id)]
        );
        assert_eq!(job.state(), JobState::Finished);
        assert_eq!(harness.pool.len(), 1);
    }

    #[test]
    fn cached_get_skips_the_worker() {
        let mut harness = Harness::new().replaying(&[
            info(Info::MimeType("text/plain".into())),
            msg(Message::Data(b"body".to_vec())),
            msg(Message::Finished),
        ]);
        harness.cache = Some(MemoryCache::new());

        let mut first = Job::new(JobOptions::default());
        first
            .start(Request::get("file:///doc"), &mut harness.ctx())
            .unwrap();
        while first.is_active() {
            first.on_readable(&mut harness.ctx());
        }
        assert_eq!(harness.cache.as_ref().unwrap().len(), 1);
        harness.pool.clear();

        let mut second = Job::new(JobOptions::default());
        let log = observed(&mut second);
        let id = second.id();
        second
            .start(Request::get("file:///doc"), &mut harness.ctx())
            .unwrap();

        assert_eq!(second.state(), JobState::Finished);
        assert!(harness.pool.is_empty());
        let events = log.drain();
        assert!(events.contains(&JobEvent::Data(id, b"body".to_vec())));
        assert_eq!(events.last(), Some(&JobEvent::Finished(id)));
    }

    #[test]
    fn cached_preget_finishes_at_once() {
        let mut harness = Harness::new().replaying(&[]);
        let mut cache = MemoryCache::new();
        cache.insert(CacheRecord {
            url: "file:///doc".into(),
            mime_type: Some("text/plain".into()),
            data: b"body".to_vec(),
            expires: None,
        });
        harness.cache = Some(cache);

        let mut job = Job::new(JobOptions::default());
        let log = observed(&mut job);
        let id = job.id();
        job.start_preget("file:///doc", 2, &mut harness.ctx())
            .unwrap();

        assert_eq!(job.state(), JobState::Finished);
        assert!(!job.is_active());
        assert!(!job.is_previewing());
        assert!(harness.pool.is_empty());
        let events = log.drain();
        assert!(
            !events
                .iter()
                .any(|event| matches!(event, JobEvent::Preview { .. }))
        );
        assert!(events.contains(&JobEvent::MimeType(id, "text/plain".into())));
        assert!(events.contains(&JobEvent::Data(id, b"body".to_vec())));
        assert_eq!(events.last(), Some(&JobEvent::Finished(id)));
        assert!(matches!(job.cont(&mut harness.ctx()), Err(JobError::NotActive)));
    }

    #[test]
    fn mount_runs_on_the_file_worker() {
        let mut harness = Harness::new().replaying(&[msg(Message::error(
            ErrorCode::CouldNotMount,
            "/dev/sr0",
        ))]);
        let mut job = Job::new(JobOptions::default());

        let request = Request::Mount {
            read_only: true,
            fs_type: "iso9660".into(),
            device: "/dev/sr0".into(),
            point: "/mnt".into(),
        };
        job.start(request, &mut harness.ctx()).unwrap();
        job.on_readable(&mut harness.ctx());

        assert_eq!(job.error().unwrap().code(), ErrorCode::CouldNotMount);
    }

    #[test]
    fn finished_job_can_be_reset() {
        let mut harness = Harness::new().replaying(&[msg(Message::Finished)]);
        let mut job = Job::new(JobOptions::default());

        job.start(Request::get("file:///x"), &mut harness.ctx())
            .unwrap();
        assert!(matches!(job.reset(), Err(JobError::AlreadyActive(_))));
        job.on_readable(&mut harness.ctx());

        job.reset().unwrap();
        assert_eq!(job.state(), JobState::Idle);
    }
}
