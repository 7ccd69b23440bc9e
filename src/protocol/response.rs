use crate::ErrorCode;

use super::{
    ChannelError, CommandId, DirectoryEntry,
    field::{PayloadReader, PayloadWriter},
};

/// Replies a worker sends while running a request. `Data` and `DataEnd`
/// also carry a `PUT` body from the client to the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Data(Vec<u8>),
    DataEnd,
    Error { code: ErrorCode, text: String },
    Ready,
    Finished,
    ListEntry(DirectoryEntry),
    IsDirectory,
    IsFile,
    Renamed(String),
    Resume(bool),
}

/// Advisory progress notifications. No reply is expected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Info {
    TotalSize(u64),
    TotalFiles(u64),
    TotalDirs(u64),
    ProcessedSize(u64),
    ProcessedFiles(u64),
    ProcessedDirs(u64),
    ScanningDir(String),
    Speed(u64),
    CopyingFile { from: String, to: String },
    MakingDir(String),
    GettingFile(String),
    DeletingFile(String),
    Redirection(String),
    MimeType(String),
    ErrorPage,
}

impl Message {
    pub fn error(code: ErrorCode, text: impl Into<String>) -> Self {
        Message::Error {
            code,
            text: text.into(),
        }
    }

    pub fn command(&self) -> CommandId {
        match self {
            Message::Data(_) => CommandId::Data,
            Message::DataEnd => CommandId::DataEnd,
            Message::Error { .. } => CommandId::Error,
            Message::Ready => CommandId::Ready,
            Message::Finished => CommandId::Finished,
            Message::ListEntry(_) => CommandId::ListEntry,
            Message::IsDirectory => CommandId::IsDirectory,
            Message::IsFile => CommandId::IsFile,
            Message::Renamed(_) => CommandId::Renamed,
            Message::Resume(_) => CommandId::Resume,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, ChannelError> {
        let mut out = PayloadWriter::new();
        let payload = match self {
            Message::Data(bytes) => out.bytes(bytes).finish(),
            Message::DataEnd
            | Message::Ready
            | Message::Finished
            | Message::IsDirectory
            | Message::IsFile => Vec::new(),
            Message::Error { code, text } => out
                .hex4(u16::from(*code))
                .string("error text", text)?
                .finish(),
            Message::ListEntry(entry) => entry.encode()?,
            Message::Renamed(name) => out.string("new name", name)?.finish(),
            Message::Resume(resume) => out.flag(*resume).finish(),
        };
        Ok(payload)
    }

    pub fn decode(command: CommandId, payload: &[u8]) -> Result<Self, ChannelError> {
        let mut input = PayloadReader::new(command, payload);
        let message = match command {
            CommandId::Data => Message::Data(input.rest().to_vec()),
            CommandId::DataEnd => Message::DataEnd,
            CommandId::Error => Message::Error {
                code: ErrorCode::from(input.hex4()?),
                text: input.string()?,
            },
            CommandId::Ready => Message::Ready,
            CommandId::Finished => Message::Finished,
            CommandId::ListEntry => Message::ListEntry(DirectoryEntry::decode(payload)?),
            CommandId::IsDirectory => Message::IsDirectory,
            CommandId::IsFile => Message::IsFile,
            CommandId::Renamed => Message::Renamed(input.string()?),
            CommandId::Resume => Message::Resume(input.flag()?),
            other => return Err(ChannelError::Unexpected(other)),
        };
        Ok(message)
    }
}

impl Info {
    pub fn command(&self) -> CommandId {
        match self {
            Info::TotalSize(_) => CommandId::TotalSize,
            Info::TotalFiles(_) => CommandId::TotalFiles,
            Info::TotalDirs(_) => CommandId::TotalDirs,
            Info::ProcessedSize(_) => CommandId::ProcessedSize,
            Info::ProcessedFiles(_) => CommandId::ProcessedFiles,
            Info::ProcessedDirs(_) => CommandId::ProcessedDirs,
            Info::ScanningDir(_) => CommandId::ScanningDir,
            Info::Speed(_) => CommandId::Speed,
            Info::CopyingFile { .. } => CommandId::CopyingFile,
            Info::MakingDir(_) => CommandId::MakingDir,
            Info::GettingFile(_) => CommandId::GettingFile,
            Info::DeletingFile(_) => CommandId::DeletingFile,
            Info::Redirection(_) => CommandId::Redirection,
            Info::MimeType(_) => CommandId::MimeType,
            Info::ErrorPage => CommandId::ErrorPage,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, ChannelError> {
        let mut out = PayloadWriter::new();
        let payload = match self {
            Info::TotalSize(n)
            | Info::TotalFiles(n)
            | Info::TotalDirs(n)
            | Info::ProcessedSize(n)
            | Info::ProcessedFiles(n)
            | Info::ProcessedDirs(n)
            | Info::Speed(n) => out.number(*n).finish(),
            Info::CopyingFile { from, to } => {
                out.string("from", from)?.string("to", to)?.finish()
            }
            Info::ScanningDir(s)
            | Info::MakingDir(s)
            | Info::GettingFile(s)
            | Info::DeletingFile(s)
            | Info::Redirection(s)
            | Info::MimeType(s) => out.string("info text", s)?.finish(),
            Info::ErrorPage => Vec::new(),
        };
        Ok(payload)
    }

    pub fn decode(command: CommandId, payload: &[u8]) -> Result<Self, ChannelError> {
        let mut input = PayloadReader::new(command, payload);
        let info = match command {
            CommandId::TotalSize => Info::TotalSize(input.number()?),
            CommandId::TotalFiles => Info::TotalFiles(input.number()?),
            CommandId::TotalDirs => Info::TotalDirs(input.number()?),
            CommandId::ProcessedSize => Info::ProcessedSize(input.number()?),
            CommandId::ProcessedFiles => Info::ProcessedFiles(input.number()?),
            CommandId::ProcessedDirs => Info::ProcessedDirs(input.number()?),
            CommandId::Speed => Info::Speed(input.number()?),
            CommandId::ScanningDir => Info::ScanningDir(input.string()?),
            CommandId::CopyingFile => Info::CopyingFile {
                from: input.string()?,
                to: input.string()?,
            },
            CommandId::MakingDir => Info::MakingDir(input.string()?),
            CommandId::GettingFile => Info::GettingFile(input.string()?),
            CommandId::DeletingFile => Info::DeletingFile(input.string()?),
            CommandId::Redirection => Info::Redirection(input.string()?),
            CommandId::MimeType => Info::MimeType(input.string()?),
            CommandId::ErrorPage => Info::ErrorPage,
            other => return Err(ChannelError::Unexpected(other)),
        };
        Ok(info)
    }
}
