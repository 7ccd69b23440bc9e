//! Command id namespace.
//!
//! The id space is closed and partitioned by purpose: requests flow from the
//! client to a worker, messages and info notifications flow back. `DATA` and
//! `DATA_END` are the exception and travel both ways (a `PUT` streams its
//! body to the worker with them).
use std::fmt;

use super::ChannelError;

macro_rules! command_ids {
    ($( $(#[$doc:meta])* $name:ident = $value:literal ),* $(,)?) => {
        /// Wire command identifiers.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u16)]
        pub enum CommandId {
            $( $(#[$doc])* $name = $value, )*
        }

        impl CommandId {
            pub const ALL: &'static [CommandId] = &[$(CommandId::$name),*];
        }

        // `Self::Error` would be ambiguous: `Error` is also a variant name.
        impl TryFrom<u16> for CommandId {
            type Error = ChannelError;

            fn try_from(value: u16) -> Result<Self, ChannelError> {
                match value {
                    $( $value => Ok(CommandId::$name), )*
                    other => Err(ChannelError::UnknownCommand(other)),
                }
            }
        }
    };
}

command_ids! {
    Get = 0x01,
    GetSize = 0x02,
    Put = 0x03,
    Copy = 0x04,
    MultiCopy = 0x05,
    Move = 0x06,
    MultiMove = 0x07,
    Del = 0x08,
    MultiDel = 0x09,
    List = 0x0a,
    Mkdir = 0x0b,
    TestDir = 0x0c,
    Mount = 0x0d,
    Unmount = 0x0e,
    /// One source URL of an upcoming multi-source request.
    Source = 0x0f,

    Data = 0x20,
    DataEnd = 0x21,
    Error = 0x22,
    Ready = 0x23,
    Finished = 0x24,
    ListEntry = 0x25,
    IsDirectory = 0x26,
    IsFile = 0x27,
    Renamed = 0x28,
    Resume = 0x29,

    TotalSize = 0x40,
    TotalFiles = 0x41,
    TotalDirs = 0x42,
    ProcessedSize = 0x43,
    ProcessedFiles = 0x44,
    ProcessedDirs = 0x45,
    ScanningDir = 0x46,
    Speed = 0x47,
    CopyingFile = 0x48,
    MakingDir = 0x49,
    GettingFile = 0x4a,
    DeletingFile = 0x4b,
    Redirection = 0x4c,
    MimeType = 0x4d,
    ErrorPage = 0x4e,
}

/// Which part of the namespace an id belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandClass {
    Request,
    Message,
    Info,
}

impl CommandId {
    pub fn class(self) -> CommandClass {
        match self as u16 {
            0x01..=0x0f => CommandClass::Request,
            0x20..=0x2f => CommandClass::Message,
            _ => CommandClass::Info,
        }
    }
}

impl From<CommandId> for u16 {
    fn from(value: CommandId) -> Self {
        value as u16
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}({:#04x})", *self as u16)
    }
}
