//! Client/worker wire protocol.
//!
//! A client and a worker process talk over a pair of pipes. Everything that
//! crosses them is a frame (see [`frame`]); the payload of each frame is
//! shaped by its command id.
//!
//! # Key Components
//!
//! - [`FrameReader`] / [`FrameWriter`]: the frame codec, one per direction.
//! - [`CommandId`]: the closed command namespace, split into requests,
//!   messages and info notifications.
//! - [`Request`], [`Message`], [`Info`]: payload codecs for each class.
//! - [`CommandChannel`]: both directions of one conversation, plus
//!   [`FrameHandler`] dispatch.
//!
//! # Payload Format
//!
//! - Strings are NUL-terminated.
//! - Integers are fixed-width, space-padded hex followed by `_`.
//! - Booleans are a single `0`/`1` character.
//! - Fixed-width fields always precede variable-length strings so they sit
//!   at known offsets.
//!
//! Unknown command ids fail closed with [`ChannelError::UnknownCommand`].
pub mod channel;
pub mod command;
pub mod entry;
pub(crate) mod field;
pub mod frame;
pub mod request;
pub mod response;

pub use channel::{
    ChannelError, Command, CommandChannel, CommandReader, CommandSender, FrameHandler,
    HandlerResult, Received,
};
pub use command::{CommandClass, CommandId};
pub use entry::{Atom, AtomValue, DirectoryEntry, tag};
pub use frame::{
    Frame, FrameError, FrameReader, FrameSender, FrameWriter, HEADER_SIZE, MAX_COMMAND,
    MAX_PAYLOAD,
};
pub use request::Request;
pub use response::{Info, Message};
