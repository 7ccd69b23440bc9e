use std::{
    env,
    error::Error,
    io::{self, Read, Write},
    path::{self, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use clap::{Parser, Subcommand};
use conduit::{
    BackendRegistry, DirectoryEntry, EventLog, JobEvent, JobOptions, Request, Scheduler,
    job::format_size,
    protocol::{Info, tag},
    worker::BackendSpec,
};
use log::debug;
use url::Url;

const FILE_BACKEND: &str = "conduit_file";

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Backend for a protocol, as `proto=executable[:stateless]`
    #[arg(long = "backend", value_name = "SPEC")]
    backends: Vec<BackendSpec>,

    #[command(subcommand)]
    action: Action,
}

#[derive(Debug, Subcommand)]
enum Action {
    /// Write a resource to stdout
    Get { url: String },
    /// Print the size of a resource
    Size { url: String },
    /// List a directory
    List { url: String },
    /// Store stdin as a resource
    Put {
        url: String,
        /// Octal permission bits
        #[arg(long, default_value = "644", value_parser = parse_mode)]
        mode: u32,
        /// Replace an existing resource
        #[arg(long)]
        overwrite: bool,
        /// Append to a partial upload
        #[arg(long)]
        resume: bool,
    },
    /// Copy sources to a destination
    Copy {
        /// Sources followed by the destination
        #[arg(num_args = 2.., required = true)]
        paths: Vec<String>,
    },
    /// Move sources to a destination
    Move {
        /// Sources followed by the destination
        #[arg(num_args = 2.., required = true)]
        paths: Vec<String>,
    },
    /// Delete resources
    Del {
        #[arg(required = true)]
        urls: Vec<String>,
    },
    /// Create a directory
    Mkdir {
        url: String,
        /// Octal permission bits
        #[arg(long, default_value = "755", value_parser = parse_mode)]
        mode: u32,
    },
    /// Tell whether a resource is a directory or a file
    Testdir { url: String },
}

fn parse_mode(s: &str) -> Result<u32, std::num::ParseIntError> {
    u32::from_str_radix(s, 8)
}

/// Accepts URLs as they are and turns anything else into a `file:` URL.
fn to_url(arg: &str) -> Result<String, Box<dyn Error>> {
    if let Ok(url) = Url::parse(arg) {
        // Windows-style drive letters parse as one-letter schemes.
        if url.scheme().len() > 1 {
            return Ok(url.into());
        }
    }
    let path = path::absolute(arg)?;
    let url = Url::from_file_path(&path)
        .map_err(|()| format!("cannot turn {} into a URL", path.display()))?;
    Ok(url.into())
}

fn to_urls(args: &[String]) -> Result<Vec<String>, Box<dyn Error>> {
    args.iter().map(|arg| to_url(arg)).collect()
}

impl Action {
    fn into_request(self) -> Result<Request, Box<dyn Error>> {
        let request = match self {
            Action::Get { url } => Request::get(to_url(&url)?),
            Action::Size { url } => Request::GetSize { url: to_url(&url)? },
            Action::List { url } => Request::list(to_url(&url)?),
            Action::Put {
                url,
                mode,
                overwrite,
                resume,
            } => Request::Put {
                url: to_url(&url)?,
                mode,
                overwrite,
                resume,
                size: 0,
            },
            Action::Copy { paths } | Action::Move { paths } if paths.len() < 2 => {
                return Err("need at least one source and a destination".into());
            }
            Action::Copy { mut paths } => {
                let dest = to_url(&paths.pop().unwrap_or_default())?;
                Request::Copy {
                    sources: to_urls(&paths)?,
                    dest,
                }
            }
            Action::Move { mut paths } => {
                let dest = to_url(&paths.pop().unwrap_or_default())?;
                Request::Move {
                    sources: to_urls(&paths)?,
                    dest,
                }
            }
            Action::Del { urls } => Request::Del {
                sources: to_urls(&urls)?,
            },
            Action::Mkdir { url, mode } => Request::Mkdir {
                url: to_url(&url)?,
                mode,
            },
            Action::Testdir { url } => Request::TestDir { url: to_url(&url)? },
        };
        Ok(request)
    }
}

/// `conduit_file` next to this executable, else the first one on `PATH`.
fn file_backend() -> Option<PathBuf> {
    let sibling = env::current_exe()
        .ok()
        .map(|exe| exe.with_file_name(FILE_BACKEND))
        .filter(|path| path.is_file());

    sibling.or_else(|| {
        let paths = env::var_os("PATH")?;
        env::split_paths(&paths)
            .map(|dir| dir.join(FILE_BACKEND))
            .find(|path| path.is_file())
    })
}

fn describe(entry: &DirectoryEntry) -> String {
    let kind = match entry.long(tag::FILE_TYPE).map(|mode| mode as u32 & libc::S_IFMT) {
        Some(libc::S_IFDIR) => 'd',
        Some(libc::S_IFLNK) => 'l',
        _ => '-',
    };
    let size = entry.size().map(format_size).unwrap_or_default();
    let name = entry.name().unwrap_or("?");
    match entry.str(tag::LINK_DEST) {
        Some(dest) => format!("{kind} {size:>10} {name} -> {dest}"),
        None => format!("{kind} {size:>10} {name}"),
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let cli = Cli::parse();

    let mut backends = BackendRegistry::new();
    if let Some(executable) = file_backend() {
        debug!("file backend at {}", executable.display());
        backends.register("file", executable);
    }
    for spec in cli.backends {
        backends.add(spec);
    }

    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let interrupted = Arc::clone(&interrupted);
        ctrlc::set_handler(move || interrupted.store(true, Ordering::SeqCst))?;
    }

    let print_size = matches!(cli.action, Action::Size { .. });
    let request = cli.action.into_request()?;

    let mut scheduler = Scheduler::new(backends);
    let handle = scheduler.create(JobOptions::default());
    let log = EventLog::new();
    scheduler.add_observer(handle, Box::new(log.clone()))?;
    scheduler.start(handle, request)?;

    let mut stdout = io::stdout().lock();
    loop {
        for event in log.drain() {
            match event {
                JobEvent::Data(_, data) => stdout.write_all(&data)?,
                JobEvent::ListEntry(_, entry) => writeln!(stdout, "{}", describe(&entry))?,
                JobEvent::Info(_, Info::TotalSize(size)) if print_size => {
                    writeln!(stdout, "{size} ({})", format_size(size))?
                }
                JobEvent::IsDirectory(_) => writeln!(stdout, "directory")?,
                JobEvent::IsFile(_) => writeln!(stdout, "file")?,
                JobEvent::Ready(_) => {
                    let mut stdin = io::stdin().lock();
                    let mut buffer = vec![0; scheduler.config().max_payload];
                    loop {
                        let n = stdin.read(&mut buffer)?;
                        if n == 0 {
                            break;
                        }
                        scheduler.send_data(handle, &buffer[..n])?;
                    }
                    scheduler.send_data_end(handle)?;
                }
                JobEvent::Warning { code, text, .. } => {
                    eprintln!("warning: {}", code.describe(&text))
                }
                JobEvent::Error { code, text, .. } => return Err(code.describe(&text).into()),
                JobEvent::Canceled(_) => return Err("canceled".into()),
                JobEvent::Finished(_) => {
                    stdout.flush()?;
                    return Ok(());
                }
                _ => {}
            }
        }

        if interrupted.swap(false, Ordering::SeqCst) {
            scheduler.cancel(handle)?;
            continue;
        }
        if !scheduler.is_busy() {
            return Err("job stopped without finishing".into());
        }
        scheduler.poll(Some(Duration::from_millis(200)))?;
    }
}
