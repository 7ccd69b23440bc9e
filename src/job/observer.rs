use std::{cell::RefCell, collections::VecDeque, rc::Rc};

use crate::{
    ErrorCode,
    protocol::{DirectoryEntry, Info},
};

use super::JobId;

/// Receives what a job produces. Every hook defaults to a no-op.
#[allow(unused_variables)]
pub trait JobObserver {
    fn on_data(&mut self, job: JobId, data: &[u8]) {}
    fn on_list_entry(&mut self, job: JobId, entry: &DirectoryEntry) {}
    fn on_info(&mut self, job: JobId, info: &Info) {}
    fn on_percent(&mut self, job: JobId, percent: u8) {}
    fn on_mime_type(&mut self, job: JobId, mime_type: &str) {}
    /// The worker accepts a data stream (see `Job::send_data`).
    fn on_ready(&mut self, job: JobId) {}
    fn on_is_directory(&mut self, job: JobId) {}
    fn on_is_file(&mut self, job: JobId) {}
    fn on_renamed(&mut self, job: JobId, name: &str) {}
    fn on_resume(&mut self, job: JobId, resumed: bool) {}
    /// A read-ahead paused with what it buffered so far.
    fn on_preview(&mut self, job: JobId, data: &[u8], mime_type: Option<&str>) {}
    /// An advisory error. The job keeps running.
    fn on_warning(&mut self, job: JobId, code: ErrorCode, text: &str) {}
    fn on_error(&mut self, job: JobId, code: ErrorCode, text: &str) {}
    fn on_finished(&mut self, job: JobId) {}
    fn on_canceled(&mut self, job: JobId) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobEvent {
    Data(JobId, Vec<u8>),
    ListEntry(JobId, DirectoryEntry),
    Info(JobId, Info),
    Percent(JobId, u8),
    MimeType(JobId, String),
    Ready(JobId),
    IsDirectory(JobId),
    IsFile(JobId),
    Renamed(JobId, String),
    Resume(JobId, bool),
    Preview {
        job: JobId,
        data: Vec<u8>,
        mime_type: Option<String>,
    },
    Warning {
        job: JobId,
        code: ErrorCode,
        text: String,
    },
    Error {
        job: JobId,
        code: ErrorCode,
        text: String,
    },
    Finished(JobId),
    Canceled(JobId),
}

/// An observer that queues every event for later draining.
///
/// Clones share one queue, so keep a clone and hand the other to the job.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Rc<RefCell<VecDeque<JobEvent>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pop(&self) -> Option<JobEvent> {
        self.events.borrow_mut().pop_front()
    }

    pub fn drain(&self) -> Vec<JobEvent> {
        self.events.borrow_mut().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.events.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.borrow().is_empty()
    }

    fn push(&self, event: JobEvent) {
        self.events.borrow_mut().push_back(event);
    }
}

impl JobObserver for EventLog {
    fn on_data(&mut self, job: JobId, data: &[u8]) {
        self.push(JobEvent::Data(job, data.to_vec()));
    }

    fn on_list_entry(&mut self, job: JobId, entry: &DirectoryEntry) {
        self.push(JobEvent::ListEntry(job, entry.clone()));
    }

    fn on_info(&mut self, job: JobId, info: &Info) {
        self.push(JobEvent::Info(job, info.clone()));
    }

    fn on_percent(&mut self, job: JobId, percent: u8) {
        self.push(JobEvent::Percent(job, percent));
    }

    fn on_mime_type(&mut self, job: JobId, mime_type: &str) {
        self.push(JobEvent::MimeType(job, mime_type.to_string()));
    }

    fn on_ready(&mut self, job: JobId) {
        self.push(JobEvent::Ready(job));
    }

    fn on_is_directory(&mut self, job: JobId) {
        self.push(JobEvent::IsDirectory(job));
    }

    fn on_is_file(&mut self, job: JobId) {
        self.push(JobEvent::IsFile(job));
    }

    fn on_renamed(&mut self, job: JobId, name: &str) {
        self.push(JobEvent::Renamed(job, name.to_string()));
    }

    fn on_resume(&mut self, job: JobId, resumed: bool) {
        self.push(JobEvent::Resume(job, resumed));
    }

    fn on_preview(&mut self, job: JobId, data: &[u8], mime_type: Option<&str>) {
        self.push(JobEvent::Preview {
            job,
            data: data.to_vec(),
            mime_type: mime_type.map(str::to_string),
        });
    }

    fn on_warning(&mut self, job: JobId, code: ErrorCode, text: &str) {
        self.push(JobEvent::Warning {
            job,
            code,
            text: text.to_string(),
        });
    }

    fn on_error(&mut self, job: JobId, code: ErrorCode, text: &str) {
        self.push(JobEvent::Error {
            job,
            code,
            text: text.to_string(),
        });
    }

    fn on_finished(&mut self, job: JobId) {
        self.push(JobEvent::Finished(job));
    }

    fn on_canceled(&mut self, job: JobId) {
        self.push(JobEvent::Canceled(job));
    }
}
