use std::{
    process::Child,
    sync::mpsc::{self, RecvTimeoutError},
    thread,
    time::{Duration, Instant},
};

use log::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const DEFAULT_GRACE: Duration = Duration::from_secs(2);

/// Collects terminated worker processes off the caller's thread.
///
/// A child handed to the reaper has already been asked to exit. The reaper
/// waits for it, and force-kills anything still alive once the grace
/// period runs out, so exited workers never linger as zombies.
///
/// Dropping the reaper stops its thread even while handles are still
/// around. Children handed over later are killed and waited for inline.
#[derive(Debug)]
pub struct Reaper {
    sender: mpsc::Sender<Reap>,
    thread: Option<thread::JoinHandle<()>>,
}

/// A cheap, cloneable way to hand children to a [`Reaper`].
#[derive(Debug, Clone)]
pub struct ReaperHandle {
    sender: Option<mpsc::Sender<Reap>>,
}

#[derive(Debug)]
enum Reap {
    Child(Child),
    Shutdown,
}

impl Reaper {
    pub fn new() -> Self {
        Self::with_grace(DEFAULT_GRACE)
    }

    pub fn with_grace(grace: Duration) -> Self {
        let (sender, receiver) = mpsc::channel();
        let thread = thread::spawn(move || reap(receiver, grace));

        Self {
            sender,
            thread: Some(thread),
        }
    }

    pub fn handle(&self) -> ReaperHandle {
        ReaperHandle {
            sender: Some(self.sender.clone()),
        }
    }
}

impl Default for Reaper {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Reaper {
    fn drop(&mut self) {
        // Fails only if the thread is already gone.
        let _ = self.sender.send(Reap::Shutdown);

        if let Some(thread) = self.thread.take() {
            debug!("waiting for reaper to collect remaining workers");
            if thread.join().is_err() {
                warn!("reaper thread panicked");
            }
        }
    }
}

impl ReaperHandle {
    /// Queues `child` for collection. Without a live reaper the child is
    /// killed and waited for on the spot.
    pub fn collect(&self, child: Child) {
        let mut child = match &self.sender {
            Some(sender) => match sender.send(Reap::Child(child)) {
                Ok(()) => return,
                Err(mpsc::SendError(Reap::Child(child))) => child,
                Err(mpsc::SendError(Reap::Shutdown)) => return,
            },
            None => child,
        };
        kill_and_wait(&mut child);
    }
}

fn kill_and_wait(child: &mut Child) {
    let pid = child.id();
    if let Err(e) = child.kill() {
        debug!("worker {pid} already gone: {e}");
    }
    match child.wait() {
        Ok(status) => debug!("worker {pid} collected: {status}"),
        Err(e) => warn!("failed to collect worker {pid}: {e}"),
    }
}

fn reap(receiver: mpsc::Receiver<Reap>, grace: Duration) {
    let mut pending: Vec<(Child, Instant)> = Vec::new();
    let mut receiver = Some(receiver);

    loop {
        if let Some(open) = &receiver {
            let next = if pending.is_empty() {
                open.recv().map_err(|_| RecvTimeoutError::Disconnected)
            } else {
                open.recv_timeout(POLL_INTERVAL)
            };
            match next {
                Ok(Reap::Child(child)) => pending.push((child, Instant::now())),
                Err(RecvTimeoutError::Timeout) => {}
                // Later sends fail and fall back to an inline kill.
                Ok(Reap::Shutdown) | Err(RecvTimeoutError::Disconnected) => {
                    if let Some(closing) = receiver.take() {
                        pending.extend(closing.try_iter().filter_map(|reap| match reap {
                            Reap::Child(child) => Some((child, Instant::now())),
                            Reap::Shutdown => None,
                        }));
                    }
                }
            }
        } else if pending.is_empty() {
            break;
        } else {
            thread::sleep(POLL_INTERVAL);
        }

        pending.retain_mut(|(child, since)| {
            let pid = child.id();
            match child.try_wait() {
                Ok(Some(status)) => {
                    debug!("worker {pid} exited: {status}");
                    false
                }
                Ok(None) if since.elapsed() >= grace => {
                    warn!("worker {pid} ignored termination, killing it");
                    kill_and_wait(child);
                    false
                }
                Ok(None) => true,
                Err(e) => {
                    warn!("failed to poll worker {pid}: {e}");
                    false
                }
            }
        });
    }

    debug!("reaper stopped");
}

#[cfg(test)]
mod tests {
    use std::process::{Command, Stdio};

    use super::*;

    fn alive(pid: u32) -> bool {
        unsafe { libc::kill(pid as i32, 0) == 0 }
    }

    #[test]
    fn exited_children_are_collected() {
        let reaper = Reaper::new();
        let child = Command::new("true").spawn().unwrap();
        let pid = child.id();

        reaper.handle().collect(child);
        drop(reaper);

        assert!(!alive(pid));
    }

    #[test]
    fn stubborn_children_are_killed_after_grace() {
        let reaper = Reaper::with_grace(Duration::from_millis(100));
        let child = Command::new("sleep")
            .arg("30")
            .stdin(Stdio::null())
            .spawn()
            .unwrap();
        let pid = child.id();

        let started = Instant::now();
        reaper.handle().collect(child);
        drop(reaper);

        assert!(!alive(pid));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn drop_returns_while_handles_are_alive() {
        let reaper = Reaper::with_grace(Duration::from_millis(100));
        let handle = reaper.handle();

        let (done, finished) = mpsc::channel();
        thread::spawn(move || {
            drop(reaper);
            let _ = done.send(());
        });
        finished
            .recv_timeout(Duration::from_secs(5))
            .expect("reaper drop blocked on a live handle");

        let child = Command::new("sleep").arg("30").spawn().unwrap();
        let pid = child.id();
        handle.collect(child);
        assert!(!alive(pid));
    }

    #[test]
    fn collect_without_reaper_kills_inline() {
        let handle = ReaperHandle { sender: None };
        let child = Command::new("sleep").arg("30").spawn().unwrap();
        let pid = child.id();

        handle.collect(child);
        assert!(!alive(pid));
    }
}
