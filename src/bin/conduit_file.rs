//! Worker backend for `file:` URLs.
//!
//! Reads requests from standard input and answers on standard output. One
//! request runs at a time, and every request ends with `FINISHED` or
//! `ERROR`.
use std::{
    error::Error,
    fs::{self, DirBuilder, File, Metadata, OpenOptions},
    io::{self, Read, Write},
    os::unix::fs::{DirBuilderExt, MetadataExt, OpenOptionsExt},
    path::{Path, PathBuf},
};

use conduit::{
    CommandChannel, CommandSender, DirectoryEntry, ErrorCode, FrameHandler,
    protocol::{ChannelError, FrameWriter, HandlerResult, Info, Message, tag},
};
use log::{debug, info, warn};
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
enum Failure {
    #[error("{}", .0.describe(.1))]
    Code(ErrorCode, String),

    #[error(transparent)]
    Channel(#[from] ChannelError),
}

type Outcome = Result<(), Failure>;

fn io_failure(err: io::Error, path: &Path, fallback: ErrorCode) -> Failure {
    let code = match err.kind() {
        io::ErrorKind::NotFound => ErrorCode::DoesNotExist,
        io::ErrorKind::PermissionDenied => ErrorCode::AccessDenied,
        io::ErrorKind::AlreadyExists => ErrorCode::AlreadyExists,
        io::ErrorKind::IsADirectory => ErrorCode::IsDirectory,
        io::ErrorKind::NotADirectory => ErrorCode::IsFile,
        _ => fallback,
    };
    debug!("{}: {err}", path.display());
    Failure::Code(code, path.display().to_string())
}

fn local_path(url: &str) -> Result<PathBuf, Failure> {
    let parsed =
        Url::parse(url).map_err(|_| Failure::Code(ErrorCode::MalformedUrl, url.to_string()))?;
    if parsed.scheme() != "file" {
        return Err(Failure::Code(
            ErrorCode::UnsupportedProtocol,
            parsed.scheme().to_string(),
        ));
    }
    parsed
        .to_file_path()
        .map_err(|_| Failure::Code(ErrorCode::MalformedUrl, url.to_string()))
}

fn mime_type(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("txt") | Some("md") | Some("rs") => "text/plain",
        Some("html") | Some("htm") => "text/html",
        Some("json") => "application/json",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("pdf") => "application/pdf",
        _ => "application/octet-stream",
    }
}

fn list_entry(name: &str, metadata: &Metadata, link: Option<PathBuf>) -> DirectoryEntry {
    let mut entry = DirectoryEntry::new()
        .with_str(tag::NAME, name)
        .with_long(tag::SIZE, metadata.len())
        .with_long(tag::FILE_TYPE, u64::from(metadata.mode() & libc::S_IFMT))
        .with_long(tag::ACCESS, u64::from(metadata.mode() & 0o7777))
        .with_long(tag::MODIFICATION_TIME, metadata.mtime().max(0) as u64)
        .with_long(tag::ACCESS_TIME, metadata.atime().max(0) as u64);
    if let Some(link) = link {
        entry = entry.with_str(tag::LINK_DEST, link.display().to_string());
    }
    entry
}

fn copy_recursive(from: &Path, to: &Path) -> io::Result<()> {
    if fs::symlink_metadata(from)?.is_dir() {
        fs::create_dir(to)?;
        for entry in fs::read_dir(from)? {
            let entry = entry?;
            copy_recursive(&entry.path(), &to.join(entry.file_name()))?;
        }
        Ok(())
    } else {
        fs::copy(from, to).map(|_| ())
    }
}

fn remove(path: &Path) -> io::Result<()> {
    if fs::symlink_metadata(path)?.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

/// Where `source` ends up: `dest` itself for a single source, inside `dest`
/// when several sources go to one directory.
fn target(source: &Path, dest: &Path, multiple: bool) -> Result<PathBuf, Failure> {
    if !multiple {
        return Ok(dest.to_path_buf());
    }
    let name = source
        .file_name()
        .ok_or_else(|| Failure::Code(ErrorCode::MalformedUrl, source.display().to_string()))?;
    Ok(dest.join(name))
}

struct Upload {
    file: File,
    path: PathBuf,
}

struct FileBackend<'a, W> {
    out: &'a mut FrameWriter<W>,
    upload: Option<Upload>,
}

impl<'a, W: Write> FileBackend<'a, W> {
    fn new(out: &'a mut FrameWriter<W>) -> Self {
        Self { out, upload: None }
    }

    /// Ends a request with `FINISHED` or the failure it ran into.
    fn conclude(&mut self, outcome: Outcome) -> HandlerResult {
        match outcome {
            Ok(()) => self.out.send_message(&Message::Finished),
            Err(Failure::Code(code, text)) => {
                info!("{}", code.describe(&text));
                self.out.send_error(code, &text)
            }
            Err(Failure::Channel(e)) => Err(e),
        }
    }

    fn get(&mut self, url: &str) -> Outcome {
        let path = local_path(url)?;
        let metadata =
            fs::metadata(&path).map_err(|e| io_failure(e, &path, ErrorCode::CouldNotStat))?;
        if metadata.is_dir() {
            return Err(Failure::Code(
                ErrorCode::IsDirectory,
                path.display().to_string(),
            ));
        }

        let mut file = File::open(&path)
            .map_err(|e| io_failure(e, &path, ErrorCode::CannotOpenForReading))?;
        self.out.send_info(&Info::TotalSize(metadata.len()))?;
        self.out
            .send_info(&Info::MimeType(mime_type(&path).to_string()))?;

        let mut buffer = vec![0; self.out.max_payload()];
        loop {
            let n = file
                .read(&mut buffer)
                .map_err(|e| io_failure(e, &path, ErrorCode::CouldNotRead))?;
            if n == 0 {
                return Ok(());
            }
            self.out.send_data(&buffer[..n])?;
        }
    }

    fn get_size(&mut self, url: &str) -> Outcome {
        let path = local_path(url)?;
        let metadata =
            fs::metadata(&path).map_err(|e| io_failure(e, &path, ErrorCode::CouldNotStat))?;
        self.out.send_info(&Info::TotalSize(metadata.len()))?;
        Ok(())
    }

    fn put(&mut self, url: &str, mode: u32, overwrite: bool, resume: bool) -> Outcome {
        let path = local_path(url)?;
        let exists = fs::symlink_metadata(&path).is_ok();
        if exists && !overwrite && !resume {
            return Err(Failure::Code(
                ErrorCode::AlreadyExists,
                path.display().to_string(),
            ));
        }

        let mut options = OpenOptions::new();
        options.write(true).create(true).mode(mode);
        if resume && exists {
            options.append(true);
        } else {
            options.truncate(true);
        }
        let file = options
            .open(&path)
            .map_err(|e| io_failure(e, &path, ErrorCode::CannotOpenForWriting))?;

        if resume {
            self.out.send_message(&Message::Resume(exists))?;
        }
        self.upload = Some(Upload { file, path });
        self.out.send_message(&Message::Ready)?;
        Ok(())
    }

    fn finish_upload(&mut self) -> Outcome {
        let Some(mut upload) = self.upload.take() else {
            return Ok(());
        };
        upload
            .file
            .flush()
            .map_err(|e| io_failure(e, &upload.path, ErrorCode::CouldNotWrite))
    }

    fn transfer(&mut self, sources: &[String], dest: &str, rename: bool) -> Outcome {
        let dest = local_path(dest)?;
        let multiple = sources.len() > 1;
        self.out.send_info(&Info::TotalFiles(sources.len() as u64))?;

        for (done, source) in sources.iter().enumerate() {
            let from = local_path(source)?;
            let to = target(&from, &dest, multiple)?;
            self.out.send_info(&Info::CopyingFile {
                from: from.display().to_string(),
                to: to.display().to_string(),
            })?;

            if fs::symlink_metadata(&to).is_ok() {
                return Err(Failure::Code(
                    ErrorCode::AlreadyExists,
                    to.display().to_string(),
                ));
            }

            if rename {
                match fs::rename(&from, &to) {
                    Ok(()) => {}
                    Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
                        copy_recursive(&from, &to)
                            .and_then(|()| remove(&from))
                            .map_err(|e| io_failure(e, &from, ErrorCode::CannotRename))?;
                    }
                    Err(e) => return Err(io_failure(e, &from, ErrorCode::CannotRename)),
                }
            } else {
                copy_recursive(&from, &to)
                    .map_err(|e| io_failure(e, &from, ErrorCode::CouldNotWrite))?;
            }
            self.out
                .send_info(&Info::ProcessedFiles(done as u64 + 1))?;
        }
        Ok(())
    }

    fn del(&mut self, sources: &[String]) -> Outcome {
        for source in sources {
            let path = local_path(source)?;
            self.out
                .send_info(&Info::DeletingFile(path.display().to_string()))?;
            remove(&path).map_err(|e| io_failure(e, &path, ErrorCode::CannotDelete))?;
        }
        Ok(())
    }

    fn list(&mut self, url: &str) -> Outcome {
        let path = local_path(url)?;
        let entries = fs::read_dir(&path)
            .map_err(|e| io_failure(e, &path, ErrorCode::CannotEnterDirectory))?;

        let mut count = 0;
        for entry in entries {
            let entry = entry.map_err(|e| io_failure(e, &path, ErrorCode::CouldNotRead))?;
            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(e) => {
                    warn!("skipping {}: {e}", entry.path().display());
                    continue;
                }
            };
            let link = metadata
                .is_symlink()
                .then(|| fs::read_link(entry.path()).ok())
                .flatten();
            let name = entry.file_name().to_string_lossy().into_owned();
            self.out
                .send_message(&Message::ListEntry(list_entry(&name, &metadata, link)))?;
            count += 1;
        }
        self.out.send_info(&Info::TotalFiles(count))?;
        Ok(())
    }

    fn mkdir(&mut self, url: &str, mode: u32) -> Outcome {
        let path = local_path(url)?;
        self.out
            .send_info(&Info::MakingDir(path.display().to_string()))?;
        DirBuilder::new()
            .mode(mode)
            .create(&path)
            .map_err(|e| io_failure(e, &path, ErrorCode::CouldNotMkdir))
    }

    fn test_dir(&mut self, url: &str) -> Outcome {
        let path = local_path(url)?;
        let metadata =
            fs::metadata(&path).map_err(|e| io_failure(e, &path, ErrorCode::CouldNotStat))?;
        if metadata.is_dir() {
            self.out.send_message(&Message::IsDirectory)?;
        } else {
            self.out.send_message(&Message::IsFile)?;
        }
        Ok(())
    }
}

impl<W: Write> FrameHandler for FileBackend<'_, W> {
    fn on_get(&mut self, url: String) -> HandlerResult {
        let outcome = self.get(&url);
        self.conclude(outcome)
    }

    fn on_get_size(&mut self, url: String) -> HandlerResult {
        let outcome = self.get_size(&url);
        self.conclude(outcome)
    }

    fn on_put(
        &mut self,
        url: String,
        mode: u32,
        overwrite: bool,
        resume: bool,
        _size: u64,
    ) -> HandlerResult {
        match self.put(&url, mode, overwrite, resume) {
            Ok(()) => Ok(()),
            outcome => self.conclude(outcome),
        }
    }

    fn on_data(&mut self, bytes: Vec<u8>) -> HandlerResult {
        let Some(upload) = self.upload.as_mut() else {
            warn!("dropping {} bytes outside an upload", bytes.len());
            return Ok(());
        };
        if let Err(e) = upload.file.write_all(&bytes) {
            let failure = io_failure(e, &upload.path, ErrorCode::CouldNotWrite);
            self.upload = None;
            return self.conclude(Err(failure));
        }
        Ok(())
    }

    fn on_data_end(&mut self) -> HandlerResult {
        if self.upload.is_none() {
            return Ok(());
        }
        let outcome = self.finish_upload();
        self.conclude(outcome)
    }

    fn on_copy(&mut self, sources: Vec<String>, dest: String) -> HandlerResult {
        let outcome = self.transfer(&sources, &dest, false);
        self.conclude(outcome)
    }

    fn on_move(&mut self, sources: Vec<String>, dest: String) -> HandlerResult {
        let outcome = self.transfer(&sources, &dest, true);
        self.conclude(outcome)
    }

    fn on_del(&mut self, sources: Vec<String>) -> HandlerResult {
        let outcome = self.del(&sources);
        self.conclude(outcome)
    }

    fn on_list(&mut self, url: String) -> HandlerResult {
        let outcome = self.list(&url);
        self.conclude(outcome)
    }

    fn on_mkdir(&mut self, url: String, mode: u32) -> HandlerResult {
        let outcome = self.mkdir(&url, mode);
        self.conclude(outcome)
    }

    fn on_test_dir(&mut self, url: String) -> HandlerResult {
        let outcome = self.test_dir(&url);
        self.conclude(outcome)
    }

    fn on_mount(
        &mut self,
        _read_only: bool,
        _fs_type: String,
        device: String,
        _point: String,
    ) -> HandlerResult {
        self.conclude(Err(Failure::Code(ErrorCode::UnsupportedAction, device)))
    }

    fn on_unmount(&mut self, point: String) -> HandlerResult {
        self.conclude(Err(Failure::Code(ErrorCode::UnsupportedAction, point)))
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let mut channel = CommandChannel::new(io::stdin().lock(), io::stdout().lock());
    let (requests, replies) = channel.split();
    let mut backend = FileBackend::new(replies);

    debug!("file backend {} ready", std::process::id());
    requests.dispatch_loop(&mut backend)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::{io::Cursor, os::unix::fs::PermissionsExt};

    use conduit::protocol::{Command, CommandReader, FrameReader, Received, Request};
    use tempdir::TempDir;

    use super::*;

    /// Runs `request` through a backend and decodes everything it replied.
    fn run(request: Request) -> Vec<Command> {
        let mut out = FrameWriter::new(Vec::new());
        {
            let mut backend = FileBackend::new(&mut out);
            Command::Request(request).deliver(&mut backend).unwrap();
        }

        let mut reader = CommandReader::new(FrameReader::new(Cursor::new(out.into_inner())));
        let mut replies = Vec::new();
        while let Received::Command(command) = reader.receive().unwrap() {
            replies.push(command);
        }
        replies
    }

    fn url(path: &Path) -> String {
        Url::from_file_path(path).unwrap().to_string()
    }

    #[test]
    fn get_streams_file() {
        let temp = TempDir::new("file").unwrap();
        let path = temp.path().join("a.txt");
        fs::write(&path, "hello").unwrap();

        assert_eq!(
            run(Request::get(url(&path))),
            vec![
                Command::Info(Info::TotalSize(5)),
                Command::Info(Info::MimeType("text/plain".into())),
                Command::Message(Message::Data(b"hello".to_vec())),
                Command::Message(Message::Finished),
            ]
        );
    }

    #[test]
    fn get_missing_file_fails() {
        let temp = TempDir::new("file").unwrap();
        let path = temp.path().join("missing");

        let replies = run(Request::get(url(&path)));
        assert_eq!(
            replies,
            vec![Command::Message(Message::error(
                ErrorCode::DoesNotExist,
                path.display().to_string()
            ))]
        );
    }

    #[test]
    fn put_refuses_existing_without_overwrite() {
        let temp = TempDir::new("file").unwrap();
        let path = temp.path().join("taken");
        fs::write(&path, "x").unwrap();

        let replies = run(Request::Put {
            url: url(&path),
            mode: 0o644,
            overwrite: false,
            resume: false,
            size: 0,
        });
        assert!(matches!(
            replies.as_slice(),
            [Command::Message(Message::Error {
                code: ErrorCode::AlreadyExists,
                ..
            })]
        ));
    }

    #[test]
    fn put_writes_streamed_data() {
        let temp = TempDir::new("file").unwrap();
        let path = temp.path().join("out");

        let mut out = FrameWriter::new(Vec::new());
        {
            let mut backend = FileBackend::new(&mut out);
            backend
                .on_put(url(&path), 0o600, false, false, 0)
                .unwrap();
            backend.on_data(b"abc".to_vec()).unwrap();
            backend.on_data(b"def".to_vec()).unwrap();
            backend.on_data_end().unwrap();
        }

        assert_eq!(fs::read(&path).unwrap(), b"abcdef");
        assert_eq!(
            fs::metadata(&path).unwrap().permissions().mode() & 0o777,
            0o600
        );
    }

    #[test]
    fn multi_copy_lands_in_directory() {
        let temp = TempDir::new("file").unwrap();
        let a = temp.path().join("a");
        let b = temp.path().join("b");
        let dest = temp.path().join("dest");
        fs::write(&a, "1").unwrap();
        fs::write(&b, "2").unwrap();
        fs::create_dir(&dest).unwrap();

        let replies = run(Request::Copy {
            sources: vec![url(&a), url(&b)],
            dest: url(&dest),
        });

        assert_eq!(replies.last(), Some(&Command::Message(Message::Finished)));
        assert_eq!(fs::read(dest.join("a")).unwrap(), b"1");
        assert_eq!(fs::read(dest.join("b")).unwrap(), b"2");
        assert!(a.exists());
    }

    #[test]
    fn move_renames() {
        let temp = TempDir::new("file").unwrap();
        let from = temp.path().join("from");
        let to = temp.path().join("to");
        fs::write(&from, "x").unwrap();

        run(Request::Move {
            sources: vec![url(&from)],
            dest: url(&to),
        });
        assert!(!from.exists());
        assert!(to.exists());
    }

    #[test]
    fn list_reports_entries() {
        let temp = TempDir::new("file").unwrap();
        fs::write(temp.path().join("one"), "12345").unwrap();
        fs::create_dir(temp.path().join("sub")).unwrap();

        let replies = run(Request::list(url(temp.path())));
        let mut names = replies
            .iter()
            .filter_map(|reply| match reply {
                Command::Message(Message::ListEntry(entry)) => {
                    Some(entry.name().unwrap().to_string())
                }
                _ => None,
            })
            .collect::<Vec<_>>();
        names.sort();

        assert_eq!(names, vec!["one", "sub"]);
        assert!(replies.contains(&Command::Info(Info::TotalFiles(2))));
    }

    #[test]
    fn mkdir_testdir_del() {
        let temp = TempDir::new("file").unwrap();
        let dir = temp.path().join("made");

        run(Request::Mkdir {
            url: url(&dir),
            mode: 0o755,
        });
        assert!(dir.is_dir());

        let replies = run(Request::TestDir { url: url(&dir) });
        assert_eq!(replies[0], Command::Message(Message::IsDirectory));

        run(Request::Del {
            sources: vec![url(&dir)],
        });
        assert!(!dir.exists());
    }

    #[test]
    fn mount_is_unsupported() {
        let replies = run(Request::Unmount {
            point: "/mnt".into(),
        });
        assert_eq!(
            replies,
            vec![Command::Message(Message::error(
                ErrorCode::UnsupportedAction,
                "/mnt"
            ))]
        );
    }
}
