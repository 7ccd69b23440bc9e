//! Readiness polling over worker descriptors.
use std::{io, os::fd::RawFd, time::Duration};

use log::trace;

/// Waits until any of a set of descriptors has something to read.
#[derive(Debug, Default)]
pub struct Poller {
    fds: Vec<libc::pollfd>,
}

impl Poller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks for at most `timeout` (forever on `None`) and returns the
    /// descriptors that are readable or hung up. An interrupted wait
    /// returns nothing.
    pub fn wait(&mut self, fds: &[RawFd], timeout: Option<Duration>) -> io::Result<Vec<RawFd>> {
        self.fds.clear();
        self.fds.extend(fds.iter().map(|&fd| libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        }));

        let timeout = match timeout {
            Some(timeout) => timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int,
            None => -1,
        };

        let result = unsafe {
            libc::poll(
                self.fds.as_mut_ptr(),
                self.fds.len() as libc::nfds_t,
                timeout,
            )
        };
        if result < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                trace!("poll interrupted");
                return Ok(Vec::new());
            }
            return Err(err);
        }

        let ready = libc::POLLIN | libc::POLLHUP | libc::POLLERR | libc::POLLNVAL;
        Ok(self
            .fds
            .iter()
            .filter(|pollfd| pollfd.revents & ready != 0)
            .map(|pollfd| pollfd.fd)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io::Write,
        os::{fd::AsRawFd, unix::net::UnixStream},
    };

    use super::*;

    #[test]
    fn reports_readable_descriptors_only() {
        let (mut a, b) = UnixStream::pair().unwrap();
        let (_c, d) = UnixStream::pair().unwrap();
        let mut poller = Poller::new();

        let fds = [b.as_raw_fd(), d.as_raw_fd()];
        assert!(
            poller
                .wait(&fds, Some(Duration::from_millis(10)))
                .unwrap()
                .is_empty()
        );

        a.write_all(b"x").unwrap();
        assert_eq!(poller.wait(&fds, None).unwrap(), vec![b.as_raw_fd()]);
    }

    #[test]
    fn hang_up_counts_as_ready() {
        let (a, b) = UnixStream::pair().unwrap();
        drop(a);
        let mut poller = Poller::new();
        assert_eq!(
            poller.wait(&[b.as_raw_fd()], Some(Duration::ZERO)).unwrap(),
            vec![b.as_raw_fd()]
        );
    }
}
