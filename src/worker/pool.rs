use std::time::Instant;

use log::debug;

use super::{Worker, WorkerIdentity};

/// Default number of idle workers kept around.
pub const DEFAULT_CAPACITY: usize = 6;

/// What the pool needs from the things it keeps.
pub trait PooledWorker {
    fn is_alive(&mut self) -> bool;
}

impl PooledWorker for Worker {
    fn is_alive(&mut self) -> bool {
        Worker::is_alive(self)
    }
}

#[derive(Debug)]
struct PoolEntry<W> {
    worker: W,
    identity: WorkerIdentity,
    last_used: Instant,
}

/// Idle workers waiting to be reused.
///
/// Entries sit in an unordered bag. Capacity is small, so lookups and
/// eviction are linear scans. Evicted workers are dropped, which terminates
/// their process.
#[derive(Debug)]
pub struct WorkerPool<W = Worker> {
    entries: Vec<PoolEntry<W>>,
    capacity: usize,
}

impl<W: PooledWorker> WorkerPool<W> {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Takes an idle worker for `identity`.
    ///
    /// An exact match on every identity part wins. Otherwise, when
    /// `persistent` is set, the most recently used worker of the same
    /// protocol is handed out instead.
    pub fn acquire(&mut self, identity: &WorkerIdentity, persistent: bool) -> Option<W> {
        self.prune();

        if let Some(i) = self.entries.iter().position(|e| e.identity == *identity) {
            debug!("pool hit for {identity}");
            return Some(self.entries.swap_remove(i).worker);
        }

        if !persistent {
            debug!("pool miss for {identity}");
            return None;
        }

        let fallback = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.identity.protocol == identity.protocol)
            .max_by_key(|(_, e)| e.last_used)
            .map(|(i, _)| i);

        match fallback {
            Some(i) => {
                let entry = self.entries.swap_remove(i);
                debug!("pool reuses {} for {identity}", entry.identity);
                Some(entry.worker)
            }
            None => {
                debug!("pool miss for {identity}");
                None
            }
        }
    }

    /// Puts a worker back, evicting the least recently used entry when full.
    pub fn release(&mut self, worker: W, identity: WorkerIdentity) {
        self.release_at(worker, identity, Instant::now());
    }

    pub(crate) fn release_at(&mut self, worker: W, identity: WorkerIdentity, now: Instant) {
        self.prune();

        if self.capacity == 0 {
            debug!("pool disabled, dropping worker for {identity}");
            return;
        }

        while self.entries.len() >= self.capacity {
            let oldest = self
                .entries
                .iter()
                .enumerate()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(i, _)| i);
            let Some(i) = oldest else { break };
            let evicted = self.entries.swap_remove(i);
            debug!("pool evicts {}", evicted.identity);
        }

        debug!("pool keeps worker for {identity}");
        self.entries.push(PoolEntry {
            worker,
            identity,
            last_used: now,
        });
    }

    /// Drops every idle worker.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn prune(&mut self) {
        self.entries.retain_mut(|entry| {
            let alive = entry.worker.is_alive();
            if !alive {
                debug!("pool drops dead worker for {}", entry.identity);
            }
            alive
        });
    }
}

impl<W: PooledWorker> Default for WorkerPool<W> {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use std::{thread, time::Duration};

    use tempdir::TempDir;

    use super::*;
    use crate::{
        protocol::MAX_PAYLOAD,
        testing::script,
        worker::Reaper,
    };

    #[derive(Debug, PartialEq, Eq)]
    struct Fake {
        name: &'static str,
        alive: bool,
    }

    impl PooledWorker for Fake {
        fn is_alive(&mut self) -> bool {
            self.alive
        }
    }

    fn fake(name: &'static str) -> Fake {
        Fake { name, alive: true }
    }

    fn ident(protocol: &str, host: &str) -> WorkerIdentity {
        WorkerIdentity {
            host: host.into(),
            ..WorkerIdentity::new(protocol)
        }
    }

    #[test]
    fn exact_match_wins() {
        let mut pool = WorkerPool::default();
        pool.release(fake("a"), ident("ftp", "A"));
        pool.release(fake("b"), ident("ftp", "B"));

        assert_eq!(pool.acquire(&ident("ftp", "A"), true).unwrap().name, "a");
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn protocol_fallback() {
        let mut pool = WorkerPool::default();
        pool.release(fake("f"), ident("file", ""));

        assert_eq!(
            pool.acquire(&ident("file", "anything"), true).unwrap().name,
            "f"
        );
        assert!(pool.is_empty());
    }

    #[test]
    fn non_persistent_protocols_need_exact_match() {
        let mut pool = WorkerPool::default();
        pool.release(fake("h"), ident("http", "a.example"));

        assert!(pool.acquire(&ident("http", "b.example"), false).is_none());
        assert_eq!(pool.len(), 1);
        assert!(pool.acquire(&ident("http", "a.example"), false).is_some());
    }

    #[test]
    fn fallback_prefers_most_recent() {
        let now = Instant::now();
        let mut pool = WorkerPool::default();
        pool.release_at(fake("old"), ident("ftp", "A"), now);
        pool.release_at(fake("new"), ident("ftp", "B"), now + Duration::from_secs(1));

        assert_eq!(pool.acquire(&ident("ftp", "C"), true).unwrap().name, "new");
    }

    #[test]
    fn full_pool_evicts_oldest() {
        let now = Instant::now();
        let mut pool = WorkerPool::new(6);
        // Timestamps deliberately out of insertion order.
        let ages = [3u64, 5, 0, 4, 1, 2];
        let names = ["h3", "h5", "h0", "h4", "h1", "h2"];
        for (age, name) in ages.iter().zip(names) {
            pool.release_at(fake(name), ident("ftp", name), now + Duration::from_secs(*age));
        }
        assert_eq!(pool.len(), 6);

        pool.release_at(fake("h6"), ident("ftp", "h6"), now + Duration::from_secs(6));

        assert_eq!(pool.len(), 6);
        assert!(pool.acquire(&ident("ftp", "h0"), false).is_none());
        for name in ["h1", "h2", "h3", "h4", "h5", "h6"] {
            assert!(pool.acquire(&ident("ftp", name), false).is_some(), "{name}");
        }
    }

    #[test]
    fn dead_workers_are_pruned() {
        let mut pool = WorkerPool::default();
        pool.release(Fake { name: "dead", alive: false }, ident("file", ""));

        assert!(pool.acquire(&ident("file", ""), true).is_none());
        assert!(pool.is_empty());
    }

    #[test]
    fn exited_processes_are_pruned_quietly() {
        let temp = TempDir::new("pool").unwrap();
        let backend = script(&temp, "quit", "exit 0");
        let reaper = Reaper::new();
        let mut pool = WorkerPool::default();

        let mut worker = Worker::spawn(&backend, "file", reaper.handle(), MAX_PAYLOAD).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while worker.is_alive() {
            assert!(Instant::now() < deadline, "worker never exited");
            thread::sleep(Duration::from_millis(10));
        }
        pool.entries.push(PoolEntry {
            worker,
            identity: ident("file", ""),
            last_used: Instant::now(),
        });

        assert!(pool.acquire(&ident("file", ""), true).is_none());
        assert!(pool.is_empty());
    }

    #[test]
    fn zero_capacity_keeps_nothing() {
        let mut pool = WorkerPool::new(0);
        pool.release(fake("x"), ident("file", ""));
        assert!(pool.is_empty());
    }
}
