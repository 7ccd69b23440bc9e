//! Numeric error taxonomy shared by workers and jobs.
//!
//! Errors never cross the wire as anything richer than a `(code, text)`
//! pair. The code is a flat, extensible number; [`ErrorCode`] gives the
//! known values names and keeps unknown ones around as
//! [`ErrorCode::Unknown`] so that a newer backend can still talk to an
//! older client.
//!
//! # Example
//! ```rust
//! use conduit::ErrorCode;
//!
//! let code = ErrorCode::from(11u16);
//! assert_eq!(code, ErrorCode::DoesNotExist);
//! assert_eq!(u16::from(code), 11);
//! assert!(!code.is_advisory());
//! ```
use std::fmt;

/// Error codes carried by `ERROR` frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    CannotOpenForReading,
    CannotOpenForWriting,
    CannotLaunchProcess,
    Internal,
    MalformedUrl,
    UnsupportedProtocol,
    NoSourceProtocol,
    UnsupportedAction,
    IsDirectory,
    IsFile,
    DoesNotExist,
    AlreadyExists,
    UnknownHost,
    AccessDenied,
    WriteAccessDenied,
    CannotEnterDirectory,
    ProtocolIsNotAFilesystem,
    CyclicLink,
    UserCanceled,
    CyclicCopy,
    CouldNotCreateSocket,
    CouldNotConnect,
    ConnectionBroken,
    NotFilterProtocol,
    CouldNotMount,
    CouldNotUnmount,
    CouldNotRead,
    CouldNotWrite,
    CouldNotBind,
    CouldNotListen,
    CouldNotAccept,
    CouldNotLogin,
    CouldNotStat,
    CouldNotCloseDir,
    CouldNotMkdir,
    CouldNotRmdir,
    CannotResume,
    CannotRename,
    CannotChmod,
    CannotDelete,
    WorkerDied,
    OutOfMemory,
    UnknownProxyHost,
    CouldNotAuthenticate,
    ChecksumMismatch,
    /// Advisory pseudo-code; never terminates a job.
    Warning,
    Unknown(u16),
}

const KNOWN: &[(u16, ErrorCode)] = &[
    (1, ErrorCode::CannotOpenForReading),
    (2, ErrorCode::CannotOpenForWriting),
    (3, ErrorCode::CannotLaunchProcess),
    (4, ErrorCode::Internal),
    (5, ErrorCode::MalformedUrl),
    (6, ErrorCode::UnsupportedProtocol),
    (7, ErrorCode::NoSourceProtocol),
    (8, ErrorCode::UnsupportedAction),
    (9, ErrorCode::IsDirectory),
    (10, ErrorCode::IsFile),
    (11, ErrorCode::DoesNotExist),
    (12, ErrorCode::AlreadyExists),
    (13, ErrorCode::UnknownHost),
    (14, ErrorCode::AccessDenied),
    (15, ErrorCode::WriteAccessDenied),
    (16, ErrorCode::CannotEnterDirectory),
    (17, ErrorCode::ProtocolIsNotAFilesystem),
    (18, ErrorCode::CyclicLink),
    (19, ErrorCode::UserCanceled),
    (20, ErrorCode::CyclicCopy),
    (21, ErrorCode::CouldNotCreateSocket),
    (22, ErrorCode::CouldNotConnect),
    (23, ErrorCode::ConnectionBroken),
    (24, ErrorCode::NotFilterProtocol),
    (25, ErrorCode::CouldNotMount),
    (26, ErrorCode::CouldNotUnmount),
    (27, ErrorCode::CouldNotRead),
    (28, ErrorCode::CouldNotWrite),
    (29, ErrorCode::CouldNotBind),
    (30, ErrorCode::CouldNotListen),
    (31, ErrorCode::CouldNotAccept),
    (32, ErrorCode::CouldNotLogin),
    (33, ErrorCode::CouldNotStat),
    (34, ErrorCode::CouldNotCloseDir),
    (35, ErrorCode::CouldNotMkdir),
    (36, ErrorCode::CouldNotRmdir),
    (37, ErrorCode::CannotResume),
    (38, ErrorCode::CannotRename),
    (39, ErrorCode::CannotChmod),
    (40, ErrorCode::CannotDelete),
    (41, ErrorCode::WorkerDied),
    (42, ErrorCode::OutOfMemory),
    (43, ErrorCode::UnknownProxyHost),
    (44, ErrorCode::CouldNotAuthenticate),
    (45, ErrorCode::ChecksumMismatch),
    (100, ErrorCode::Warning),
];

impl From<u16> for ErrorCode {
    fn from(value: u16) -> Self {
        KNOWN
            .iter()
            .find(|(raw, _)| *raw == value)
            .map(|(_, code)| *code)
            .unwrap_or(ErrorCode::Unknown(value))
    }
}

impl From<ErrorCode> for u16 {
    fn from(value: ErrorCode) -> Self {
        if let ErrorCode::Unknown(raw) = value {
            return raw;
        }
        KNOWN
            .iter()
            .find(|(_, code)| *code == value)
            .map(|(raw, _)| *raw)
            .unwrap_or_default()
    }
}

impl ErrorCode {
    /// Advisory codes are reported to observers but leave the job running.
    pub fn is_advisory(self) -> bool {
        matches!(self, ErrorCode::Warning | ErrorCode::ChecksumMismatch)
    }

    /// Whether the worker that produced (or caused) this error can no longer
    /// be trusted and must not go back into the pool.
    pub fn poisons_worker(self) -> bool {
        matches!(self, ErrorCode::WorkerDied)
    }

    /// Human readable message for a code and its detail text.
    pub fn describe(self, text: &str) -> String {
        match self {
            ErrorCode::CannotOpenForReading => format!("could not read {text}"),
            ErrorCode::CannotOpenForWriting => format!("could not write to {text}"),
            ErrorCode::CannotLaunchProcess => format!("could not start process {text}"),
            ErrorCode::Internal => format!("internal error: {text}"),
            ErrorCode::MalformedUrl => format!("malformed URL {text}"),
            ErrorCode::UnsupportedProtocol => format!("the protocol {text} is not supported"),
            ErrorCode::NoSourceProtocol => format!("the protocol {text} is only a filter protocol"),
            ErrorCode::UnsupportedAction => format!("unsupported action: {text}"),
            ErrorCode::IsDirectory => format!("{text} is a directory, but a file was expected"),
            ErrorCode::IsFile => format!("{text} is a file, but a directory was expected"),
            ErrorCode::DoesNotExist => format!("the file or directory {text} does not exist"),
            ErrorCode::AlreadyExists => format!("the file or directory {text} already exists"),
            ErrorCode::UnknownHost => format!("unknown host {text}"),
            ErrorCode::AccessDenied => format!("access denied to {text}"),
            ErrorCode::WriteAccessDenied => format!("access denied, could not write to {text}"),
            ErrorCode::CannotEnterDirectory => format!("could not enter directory {text}"),
            ErrorCode::ProtocolIsNotAFilesystem => {
                format!("the protocol {text} does not implement a directory service")
            }
            ErrorCode::CyclicLink => format!("found a cyclic link in {text}"),
            ErrorCode::UserCanceled => format!("action has been canceled by the user {text}"),
            ErrorCode::CyclicCopy => format!("found a cyclic link while copying {text}"),
            ErrorCode::CouldNotCreateSocket => {
                format!("could not create socket for accessing {text}")
            }
            ErrorCode::CouldNotConnect => format!("could not connect to host {text}"),
            ErrorCode::ConnectionBroken => format!("connection to host {text} is broken"),
            ErrorCode::NotFilterProtocol => format!("the protocol {text} is not a filter protocol"),
            ErrorCode::CouldNotMount => format!("could not mount device: {text}"),
            ErrorCode::CouldNotUnmount => format!("could not unmount device: {text}"),
            ErrorCode::CouldNotRead => format!("could not read {text}"),
            ErrorCode::CouldNotWrite => format!("could not write {text}"),
            ErrorCode::CouldNotBind => format!("could not bind {text}"),
            ErrorCode::CouldNotListen => format!("could not listen {text}"),
            ErrorCode::CouldNotAccept => format!("could not accept {text}"),
            ErrorCode::CouldNotLogin => format!("could not login into {text}"),
            ErrorCode::CouldNotStat => format!("could not access {text}"),
            ErrorCode::CouldNotCloseDir => format!("could not terminate listing {text}"),
            ErrorCode::CouldNotMkdir => format!("could not make directory {text}"),
            ErrorCode::CouldNotRmdir => format!("could not remove directory {text}"),
            ErrorCode::CannotResume => format!("could not resume file {text}"),
            ErrorCode::CannotRename => format!("could not rename file {text}"),
            ErrorCode::CannotChmod => format!("could not change permissions for {text}"),
            ErrorCode::CannotDelete => format!("could not delete file {text}"),
            ErrorCode::WorkerDied => {
                format!("the process for the {text} protocol died unexpectedly")
            }
            ErrorCode::OutOfMemory => format!("out of memory: {text}"),
            ErrorCode::UnknownProxyHost => format!("unknown proxy host {text}"),
            ErrorCode::CouldNotAuthenticate => {
                format!("authorization failed, {text} authentication not supported")
            }
            ErrorCode::ChecksumMismatch => {
                format!("warning: checksum for {text} does not match the server checksum")
            }
            ErrorCode::Warning => format!("warning: {text}"),
            ErrorCode::Unknown(raw) => format!("unknown error code {raw}: {text}"),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::Unknown(raw) => write!(f, "error {raw}"),
            code => write!(f, "{code:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_codes_are_stable() {
        for (raw, code) in KNOWN {
            assert_eq!(ErrorCode::from(*raw), *code);
            assert_eq!(u16::from(*code), *raw);
        }
    }

    #[test]
    fn unknown_codes_survive() {
        let code = ErrorCode::from(0x7777);
        assert_eq!(code, ErrorCode::Unknown(0x7777));
        assert_eq!(u16::from(code), 0x7777);
    }

    #[test]
    fn warnings_are_advisory() {
        assert!(ErrorCode::Warning.is_advisory());
        assert!(ErrorCode::ChecksumMismatch.is_advisory());
        assert!(!ErrorCode::AccessDenied.is_advisory());
    }

    #[test]
    fn only_worker_death_poisons() {
        assert!(ErrorCode::WorkerDied.poisons_worker());
        assert!(!ErrorCode::DoesNotExist.poisons_worker());
    }

    #[test]
    fn describe_includes_detail() {
        assert_eq!(
            ErrorCode::WorkerDied.describe("ftp"),
            "the process for the ftp protocol died unexpectedly"
        );
    }
}
