//! Command channel.
//!
//! Turns frames into typed calls and back. [`CommandReader::dispatch`] is
//! the one place where wire bytes become handler invocations; everything on
//! the sending side goes through [`CommandSender`].
use std::io::{Read, Write};

use log::{debug, trace};
use thiserror::Error;

use crate::ErrorCode;

use super::{
    CommandClass, CommandId, DirectoryEntry, FrameError, FrameReader, FrameSender, FrameWriter,
    Info, Message, Request, field::PayloadReader,
};

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error("unknown command id {0:#x}")]
    UnknownCommand(u16),

    #[error("malformed {command} payload: {reason}")]
    Malformed { command: CommandId, reason: String },

    #[error("{field} value {value:#x} does not fit its field")]
    FieldOverflow { field: &'static str, value: u64 },

    #[error("{0} contains a NUL byte")]
    EmbeddedNul(&'static str),

    #[error("{0} is not valid in this direction")]
    Unexpected(CommandId),
}

impl ChannelError {
    /// Framing failures leave the byte stream in an unknown position.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ChannelError::Frame(_))
    }
}

pub type HandlerResult = Result<(), ChannelError>;

/// Any decoded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Request(Request),
    Message(Message),
    Info(Info),
}

impl Command {
    pub fn command(&self) -> CommandId {
        match self {
            Command::Request(request) => request.command(),
            Command::Message(message) => message.command(),
            Command::Info(info) => info.command(),
        }
    }

    /// All frames for this call, in wire order.
    pub fn encode(&self) -> Result<Vec<(CommandId, Vec<u8>)>, ChannelError> {
        match self {
            Command::Request(request) => request.encode(),
            Command::Message(message) => Ok(vec![(message.command(), message.encode()?)]),
            Command::Info(info) => Ok(vec![(info.command(), info.encode()?)]),
        }
    }

    /// Routes the call to the matching handler hook.
    pub fn deliver<H: FrameHandler + ?Sized>(self, handler: &mut H) -> HandlerResult {
        match self {
            Command::Request(request) => match request {
                Request::Get { url } => handler.on_get(url),
                Request::GetSize { url } => handler.on_get_size(url),
                Request::Put {
                    url,
                    mode,
                    overwrite,
                    resume,
                    size,
                } => handler.on_put(url, mode, overwrite, resume, size),
                Request::Copy { sources, dest } => handler.on_copy(sources, dest),
                Request::Move { sources, dest } => handler.on_move(sources, dest),
                Request::Del { sources } => handler.on_del(sources),
                Request::List { url } => handler.on_list(url),
                Request::Mkdir { url, mode } => handler.on_mkdir(url, mode),
                Request::TestDir { url } => handler.on_test_dir(url),
                Request::Mount {
                    read_only,
                    fs_type,
                    device,
                    point,
                } => handler.on_mount(read_only, fs_type, device, point),
                Request::Unmount { point } => handler.on_unmount(point),
            },
            Command::Message(message) => match message {
                Message::Data(bytes) => handler.on_data(bytes),
                Message::DataEnd => handler.on_data_end(),
                Message::Error { code, text } => handler.on_error(code, text),
                Message::Ready => handler.on_ready(),
                Message::Finished => handler.on_finished(),
                Message::ListEntry(entry) => handler.on_list_entry(entry),
                Message::IsDirectory => handler.on_is_directory(),
                Message::IsFile => handler.on_is_file(),
                Message::Renamed(name) => handler.on_renamed(name),
                Message::Resume(resume) => handler.on_resume(resume),
            },
            Command::Info(info) => handler.on_info(info),
        }
    }
}

/// Receiving side of a conversation. Every hook defaults to doing nothing,
/// so an implementor only writes the ones it cares about.
#[allow(unused_variables)]
pub trait FrameHandler {
    /// Whether calls of this class may arrive here at all. A refused class
    /// makes dispatch fail with [`ChannelError::Unexpected`].
    fn accepts(&self, class: CommandClass) -> bool {
        true
    }

    fn on_get(&mut self, url: String) -> HandlerResult {
        Ok(())
    }
    fn on_get_size(&mut self, url: String) -> HandlerResult {
        Ok(())
    }
    fn on_put(
        &mut self,
        url: String,
        mode: u32,
        overwrite: bool,
        resume: bool,
        size: u64,
    ) -> HandlerResult {
        Ok(())
    }
    fn on_copy(&mut self, sources: Vec<String>, dest: String) -> HandlerResult {
        Ok(())
    }
    fn on_move(&mut self, sources: Vec<String>, dest: String) -> HandlerResult {
        Ok(())
    }
    fn on_del(&mut self, sources: Vec<String>) -> HandlerResult {
        Ok(())
    }
    fn on_list(&mut self, url: String) -> HandlerResult {
        Ok(())
    }
    fn on_mkdir(&mut self, url: String, mode: u32) -> HandlerResult {
        Ok(())
    }
    fn on_test_dir(&mut self, url: String) -> HandlerResult {
        Ok(())
    }
    fn on_mount(
        &mut self,
        read_only: bool,
        fs_type: String,
        device: String,
        point: String,
    ) -> HandlerResult {
        Ok(())
    }
    fn on_unmount(&mut self, point: String) -> HandlerResult {
        Ok(())
    }

    fn on_data(&mut self, bytes: Vec<u8>) -> HandlerResult {
        Ok(())
    }
    fn on_data_end(&mut self) -> HandlerResult {
        Ok(())
    }
    fn on_error(&mut self, code: ErrorCode, text: String) -> HandlerResult {
        Ok(())
    }
    fn on_ready(&mut self) -> HandlerResult {
        Ok(())
    }
    fn on_finished(&mut self) -> HandlerResult {
        Ok(())
    }
    fn on_list_entry(&mut self, entry: DirectoryEntry) -> HandlerResult {
        Ok(())
    }
    fn on_is_directory(&mut self) -> HandlerResult {
        Ok(())
    }
    fn on_is_file(&mut self) -> HandlerResult {
        Ok(())
    }
    fn on_renamed(&mut self, name: String) -> HandlerResult {
        Ok(())
    }
    fn on_resume(&mut self, resume: bool) -> HandlerResult {
        Ok(())
    }

    fn on_info(&mut self, info: Info) -> HandlerResult {
        Ok(())
    }
}

/// Typed sends on top of any [`FrameSender`].
pub trait CommandSender: FrameSender {
    fn send_command(&mut self, command: &Command) -> HandlerResult {
        for (id, payload) in command.encode()? {
            self.send_frame(id.into(), &payload)?;
        }
        Ok(())
    }

    fn send_request(&mut self, request: &Request) -> HandlerResult {
        debug!("sending {}", request.command());
        for (id, payload) in request.encode()? {
            self.send_frame(id.into(), &payload)?;
        }
        Ok(())
    }

    fn send_message(&mut self, message: &Message) -> HandlerResult {
        self.send_frame(message.command().into(), &message.encode()?)?;
        Ok(())
    }

    fn send_info(&mut self, info: &Info) -> HandlerResult {
        self.send_frame(info.command().into(), &info.encode()?)?;
        Ok(())
    }

    /// Sends raw bytes as a `DATA` frame without copying them into a
    /// [`Message`] first.
    fn send_data(&mut self, bytes: &[u8]) -> HandlerResult {
        self.send_frame(CommandId::Data.into(), bytes)?;
        Ok(())
    }

    fn send_error(&mut self, code: ErrorCode, text: &str) -> HandlerResult {
        self.send_message(&Message::error(code, text))
    }
}

impl<T: FrameSender + ?Sized> CommandSender for T {}

/// Outcome of one [`CommandReader::receive`].
#[derive(Debug, PartialEq, Eq)]
pub enum Received {
    Command(Command),
    /// A `SOURCE` frame was buffered for a multi-source request that has
    /// not arrived yet.
    Pending,
    Closed,
}

/// Receiving half of a [`CommandChannel`].
#[derive(Debug)]
pub struct CommandReader<R> {
    frames: FrameReader<R>,
    sources: Vec<String>,
}

impl<R: Read> CommandReader<R> {
    pub fn new(frames: FrameReader<R>) -> Self {
        Self {
            frames,
            sources: Vec::new(),
        }
    }

    /// Blocks for one frame and decodes it.
    pub fn receive(&mut self) -> Result<Received, ChannelError> {
        self.receive_if(|_| true)
    }

    /// Like [`receive`](Self::receive), but fails with
    /// [`ChannelError::Unexpected`] before decoding, or buffering a
    /// `SOURCE`, when `accepts` refuses the frame's class.
    fn receive_if(
        &mut self,
        accepts: impl Fn(CommandClass) -> bool,
    ) -> Result<Received, ChannelError> {
        let Some(frame) = self.frames.receive()? else {
            return Ok(Received::Closed);
        };
        let id = CommandId::try_from(frame.command)?;
        if !accepts(id.class()) {
            return Err(ChannelError::Unexpected(id));
        }

        let command = match id.class() {
            CommandClass::Request if id == CommandId::Source => {
                let source = PayloadReader::new(id, frame.payload).string()?;
                trace!("buffered source {source}");
                self.sources.push(source);
                return Ok(Received::Pending);
            }
            CommandClass::Request => {
                let request = Request::decode(id, frame.payload, &mut self.sources)?;
                self.sources.clear();
                Command::Request(request)
            }
            CommandClass::Message => Command::Message(Message::decode(id, frame.payload)?),
            CommandClass::Info => Command::Info(Info::decode(id, frame.payload)?),
        };

        Ok(Received::Command(command))
    }

    /// Receives one frame and hands it to `handler`. Returns `false` once
    /// the peer has closed the stream.
    pub fn dispatch<H: FrameHandler + ?Sized>(
        &mut self,
        handler: &mut H,
    ) -> Result<bool, ChannelError> {
        match self.receive_if(|class| handler.accepts(class))? {
            Received::Closed => Ok(false),
            Received::Pending => Ok(true),
            Received::Command(command) => {
                command.deliver(handler)?;
                Ok(true)
            }
        }
    }

    /// Dispatches until end of stream.
    pub fn dispatch_loop<H: FrameHandler + ?Sized>(
        &mut self,
        handler: &mut H,
    ) -> Result<(), ChannelError> {
        while self.dispatch(handler)? {}
        Ok(())
    }

    pub fn get_ref(&self) -> &R {
        self.frames.get_ref()
    }
}

/// Both directions of one conversation.
#[derive(Debug)]
pub struct CommandChannel<R, W> {
    reader: CommandReader<R>,
    writer: FrameWriter<W>,
}

impl<R: Read, W: Write> CommandChannel<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self::with_max_payload(input, output, super::MAX_PAYLOAD)
    }

    pub fn with_max_payload(input: R, output: W, max_payload: usize) -> Self {
        Self {
            reader: CommandReader::new(FrameReader::with_max_payload(input, max_payload)),
            writer: FrameWriter::with_max_payload(output, max_payload),
        }
    }

    pub fn receive(&mut self) -> Result<Received, ChannelError> {
        self.reader.receive()
    }

    pub fn dispatch<H: FrameHandler + ?Sized>(
        &mut self,
        handler: &mut H,
    ) -> Result<bool, ChannelError> {
        self.reader.dispatch(handler)
    }

    pub fn dispatch_loop<H: FrameHandler + ?Sized>(
        &mut self,
        handler: &mut H,
    ) -> Result<(), ChannelError> {
        self.reader.dispatch_loop(handler)
    }

    /// Borrows both halves at once, so a handler driven by the reader can
    /// reply through the writer.
    pub fn split(&mut self) -> (&mut CommandReader<R>, &mut FrameWriter<W>) {
        (&mut self.reader, &mut self.writer)
    }

    pub fn max_payload(&self) -> usize {
        self.writer.max_payload()
    }

    pub fn input(&self) -> &R {
        self.reader.get_ref()
    }

    pub fn output(&self) -> &W {
        self.writer.get_ref()
    }
}

impl<R, W: Write> FrameSender for CommandChannel<R, W> {
    fn send_frame(&mut self, command: u16, payload: &[u8]) -> Result<(), FrameError> {
        self.writer.send(command, payload)
    }
}
