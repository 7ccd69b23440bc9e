//! Scratch backends for tests.
use std::{fs, os::unix::fs::PermissionsExt, path::PathBuf};

use tempdir::TempDir;

use crate::protocol::{Command, CommandSender, FrameWriter};

pub(crate) fn script(dir: &TempDir, name: &str, body: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

pub(crate) fn wire(commands: &[Command]) -> Vec<u8> {
    let mut writer = FrameWriter::new(Vec::new());
    for command in commands {
        writer.send_command(command).unwrap();
    }
    writer.into_inner()
}

/// A backend that writes `replies` as soon as it starts, then swallows its
/// input until the client hangs up.
pub(crate) fn replay(dir: &TempDir, name: &str, replies: &[Command]) -> PathBuf {
    let frames = dir.path().join(format!("{name}.frames"));
    fs::write(&frames, wire(replies)).unwrap();
    script(
        dir,
        name,
        &format!("cat '{}'\nexec cat >/dev/null", frames.display()),
    )
}
