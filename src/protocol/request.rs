use super::{
    ChannelError, CommandId,
    field::{PayloadReader, PayloadWriter},
};

/// A client to worker request.
///
/// Copy, move and delete carry a list of sources. A single source goes out
/// as the plain command; several go out as one `SOURCE` frame each followed
/// by the multi-source command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Get {
        url: String,
    },
    GetSize {
        url: String,
    },
    Put {
        url: String,
        mode: u32,
        overwrite: bool,
        resume: bool,
        size: u64,
    },
    Copy {
        sources: Vec<String>,
        dest: String,
    },
    Move {
        sources: Vec<String>,
        dest: String,
    },
    Del {
        sources: Vec<String>,
    },
    List {
        url: String,
    },
    Mkdir {
        url: String,
        mode: u32,
    },
    TestDir {
        url: String,
    },
    Mount {
        read_only: bool,
        fs_type: String,
        device: String,
        point: String,
    },
    Unmount {
        point: String,
    },
}

impl Request {
    pub fn get(url: impl Into<String>) -> Self {
        Request::Get { url: url.into() }
    }

    pub fn list(url: impl Into<String>) -> Self {
        Request::List { url: url.into() }
    }

    /// The command id that terminates this request on the wire.
    pub fn command(&self) -> CommandId {
        match self {
            Request::Get { .. } => CommandId::Get,
            Request::GetSize { .. } => CommandId::GetSize,
            Request::Put { .. } => CommandId::Put,
            Request::Copy { sources, .. } if sources.len() == 1 => CommandId::Copy,
            Request::Copy { .. } => CommandId::MultiCopy,
            Request::Move { sources, .. } if sources.len() == 1 => CommandId::Move,
            Request::Move { .. } => CommandId::MultiMove,
            Request::Del { sources } if sources.len() == 1 => CommandId::Del,
            Request::Del { .. } => CommandId::MultiDel,
            Request::List { .. } => CommandId::List,
            Request::Mkdir { .. } => CommandId::Mkdir,
            Request::TestDir { .. } => CommandId::TestDir,
            Request::Mount { .. } => CommandId::Mount,
            Request::Unmount { .. } => CommandId::Unmount,
        }
    }

    /// Every URL whose protocol and host decide which worker runs this
    /// request. Mount and unmount address no URL.
    pub fn targets(&self) -> Vec<&str> {
        match self {
            Request::Get { url }
            | Request::GetSize { url }
            | Request::Put { url, .. }
            | Request::List { url }
            | Request::Mkdir { url, .. }
            | Request::TestDir { url } => vec![url.as_str()],
            Request::Copy { sources, .. }
            | Request::Move { sources, .. }
            | Request::Del { sources } => sources.iter().map(String::as_str).collect(),
            Request::Mount { .. } | Request::Unmount { .. } => Vec::new(),
        }
    }

    /// Encodes the request into the frames that carry it, in order.
    pub fn encode(&self) -> Result<Vec<(CommandId, Vec<u8>)>, ChannelError> {
        let mut frames = Vec::new();
        let mut out = PayloadWriter::new();

        let sources: &[String] = match self {
            Request::Copy { sources, .. }
            | Request::Move { sources, .. }
            | Request::Del { sources } => sources.as_slice(),
            _ => &[],
        };
        let multi = !matches!(
            self.command(),
            CommandId::Copy | CommandId::Move | CommandId::Del
        );

        if multi {
            for source in sources {
                frames.push((CommandId::Source, out.string("source", source)?.finish()));
            }
        }

        let payload = match self {
            Request::Get { url }
            | Request::GetSize { url }
            | Request::List { url }
            | Request::TestDir { url } => out.string("url", url)?.finish(),
            Request::Put {
                url,
                mode,
                overwrite,
                resume,
                size,
            } => out
                .flag(*overwrite)
                .flag(*resume)
                .hex8("mode", u64::from(*mode))?
                .hex8("size", *size)?
                .string("url", url)?
                .finish(),
            Request::Copy { dest, .. } | Request::Move { dest, .. } if multi => {
                out.string("dest", dest)?.finish()
            }
            Request::Copy { sources, dest } | Request::Move { sources, dest } => out
                .string("source", &sources[0])?
                .string("dest", dest)?
                .finish(),
            Request::Del { .. } if multi => Vec::new(),
            Request::Del { sources } => out.string("source", &sources[0])?.finish(),
            Request::Mkdir { url, mode } => out
                .hex8("mode", u64::from(*mode))?
                .string("url", url)?
                .finish(),
            Request::Mount {
                read_only,
                fs_type,
                device,
                point,
            } => out
                .flag(*read_only)
                .string("fs type", fs_type)?
                .string("device", device)?
                .string("mount point", point)?
                .finish(),
            Request::Unmount { point } => out.string("mount point", point)?.finish(),
        };

        frames.push((self.command(), payload));
        Ok(frames)
    }

    /// Decodes a terminating request frame. Multi-source commands consume
    /// the sources buffered from preceding `SOURCE` frames.
    pub fn decode(
        command: CommandId,
        payload: &[u8],
        sources: &mut Vec<String>,
    ) -> Result<Self, ChannelError> {
        let mut input = PayloadReader::new(command, payload);

        let request = match command {
            CommandId::Get => Request::Get {
                url: input.string()?,
            },
            CommandId::GetSize => Request::GetSize {
                url: input.string()?,
            },
            CommandId::List => Request::List {
                url: input.string()?,
            },
            CommandId::TestDir => Request::TestDir {
                url: input.string()?,
            },
            CommandId::Put => {
                let overwrite = input.flag()?;
                let resume = input.flag()?;
                let mode = input.hex8()? as u32;
                let size = input.hex8()?;
                Request::Put {
                    url: input.string()?,
                    mode,
                    overwrite,
                    resume,
                    size,
                }
            }
            CommandId::Copy => Request::Copy {
                sources: vec![input.string()?],
                dest: input.string()?,
            },
            CommandId::Move => Request::Move {
                sources: vec![input.string()?],
                dest: input.string()?,
            },
            CommandId::Del => Request::Del {
                sources: vec![input.string()?],
            },
            CommandId::MultiCopy => Request::Copy {
                dest: input.string()?,
                sources: std::mem::take(sources),
            },
            CommandId::MultiMove => Request::Move {
                dest: input.string()?,
                sources: std::mem::take(sources),
            },
            CommandId::MultiDel => Request::Del {
                sources: std::mem::take(sources),
            },
            CommandId::Mkdir => {
                let mode = input.hex8()? as u32;
                Request::Mkdir {
                    url: input.string()?,
                    mode,
                }
            }
            CommandId::Mount => Request::Mount {
                read_only: input.flag()?,
                fs_type: input.string()?,
                device: input.string()?,
                point: input.string()?,
            },
            CommandId::Unmount => Request::Unmount {
                point: input.string()?,
            },
            other => return Err(ChannelError::Unexpected(other)),
        };

        Ok(request)
    }
}
