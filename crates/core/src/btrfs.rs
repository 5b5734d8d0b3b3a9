//! Driver implementation backed by the `btrfs` command-line tool
//!
//! Every operation spawns the tool (override the binary with the
//! `BTRFS_PROG` environment variable), captures stderr for diagnostics and
//! parses the plain-text output with small, unit-tested parser functions.

use crate::driver::{
    ChangeRecord, Driver, DriverError, ReceiveSink, SendStream, SubvolumeInfo,
};
use std::collections::HashMap;
use std::ffi::OsString;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::Mutex;
use std::thread::JoinHandle;

/// Drives the `btrfs` tool through subprocesses
///
/// Holds an explicitly owned cache of subvolume tables keyed by mountpoint;
/// invalidate it after operations performed outside this driver.
pub struct BtrfsDriver {
    program: OsString,
    subvolume_cache: Mutex<HashMap<PathBuf, Vec<SubvolumeInfo>>>,
}

impl Default for BtrfsDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl BtrfsDriver {
    pub fn new() -> Self {
        let program = std::env::var_os("BTRFS_PROG").unwrap_or_else(|| "btrfs".into());
        Self {
            program,
            subvolume_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Drop every cached subvolume table
    pub fn invalidate_cache(&self) {
        self.subvolume_cache.lock().expect("cache lock").clear();
    }

    fn command_line(&self, args: &[&str]) -> String {
        format!("{} {}", self.program.to_string_lossy(), args.join(" "))
    }

    /// Run a btrfs subcommand to completion and return its stdout
    fn run(&self, args: &[&str]) -> Result<String, DriverError> {
        let command = self.command_line(args);
        tracing::debug!("running {}", command);

        let output = Command::new(&self.program)
            .args(args)
            .output()
            .map_err(|e| DriverError::new(&command, e.to_string()))?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr)
                .lines()
                .map(|l| format!("{}: {}", args.join(" "), l))
                .collect();
            Err(DriverError::new(&command, format!("exited with {}", output.status))
                .with_stderr(stderr))
        }
    }
}

impl Driver for BtrfsDriver {
    fn list_subvolumes(&self, mountpoint: &Path) -> Result<Vec<SubvolumeInfo>, DriverError> {
        let mut cache = self.subvolume_cache.lock().expect("cache lock");
        if let Some(table) = cache.get(mountpoint) {
            return Ok(table.clone());
        }

        let mountpoint_str = mountpoint.to_string_lossy();
        let output = self.run(&["subvolume", "list", "-pcgquR", &mountpoint_str])?;
        let table = parse_subvolume_list(&output);
        cache.insert(mountpoint.to_path_buf(), table.clone());
        Ok(table)
    }

    fn generation_of(&self, subvolume: &Path) -> Result<u64, DriverError> {
        let subvolume_str = subvolume.to_string_lossy();
        let output = self.run(&["subvolume", "show", &subvolume_str])?;
        parse_generation(&output).ok_or_else(|| {
            DriverError::new(
                self.command_line(&["subvolume", "show", &subvolume_str]),
                "expected the output to contain a Generation line",
            )
        })
    }

    fn find_new(
        &self,
        subvolume: &Path,
        since_generation: u64,
    ) -> Result<Vec<ChangeRecord>, DriverError> {
        let subvolume_str = subvolume.to_string_lossy();
        let generation_str = since_generation.to_string();
        let output = self.run(&["subvolume", "find-new", &subvolume_str, &generation_str])?;
        Ok(parse_find_new(&output))
    }

    fn send(
        &self,
        subvolume: &Path,
        parent: Option<&Path>,
    ) -> Result<Box<dyn SendStream>, DriverError> {
        let mut args: Vec<String> = vec!["send".into()];
        if let Some(parent) = parent {
            args.push("-p".into());
            args.push(parent.to_string_lossy().into_owned());
        }
        args.push(subvolume.to_string_lossy().into_owned());

        let command = format!("{} {}", self.program.to_string_lossy(), args.join(" "));
        tracing::debug!("running {}", command);

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| DriverError::new(&command, e.to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DriverError::new(&command, "no stdout pipe"))?;
        let stderr = drain_stderr(&mut child, &command)?;

        Ok(Box::new(BtrfsSendStream {
            command,
            child,
            stdout,
            stderr,
        }))
    }

    fn receive(&self, target_dir: &Path) -> Result<Box<dyn ReceiveSink>, DriverError> {
        let target_str = target_dir.to_string_lossy().into_owned();
        let command = self.command_line(&["receive", &target_str]);
        tracing::debug!("running {}", command);

        let mut child = Command::new(&self.program)
            .args(["receive", &target_str])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| DriverError::new(&command, e.to_string()))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| DriverError::new(&command, "no stdin pipe"))?;
        let stderr = drain_stderr(&mut child, &command)?;

        Ok(Box::new(BtrfsReceiveSink {
            command,
            child,
            stdin: Some(stdin),
            stderr,
        }))
    }

    fn snapshot(&self, source: &Path, dest: &Path) -> Result<(), DriverError> {
        self.run(&[
            "subvolume",
            "snapshot",
            "-r",
            &source.to_string_lossy(),
            &dest.to_string_lossy(),
        ])?;
        Ok(())
    }

    fn delete_subvolume(&self, subvolume: &Path) -> Result<(), DriverError> {
        self.run(&["subvolume", "delete", &subvolume.to_string_lossy()])?;
        Ok(())
    }

    fn sync_filesystem(&self, path: &Path) -> Result<(), DriverError> {
        self.run(&["filesystem", "sync", &path.to_string_lossy()])?;
        Ok(())
    }

    fn wait_deletions(&self, path: &Path) -> Result<(), DriverError> {
        self.run(&["subvolume", "sync", &path.to_string_lossy()])?;
        Ok(())
    }
}

/// Collect a child's stderr on a helper thread so the byte pump can never
/// block on a full stderr pipe
fn drain_stderr(
    child: &mut Child,
    command: &str,
) -> Result<JoinHandle<Vec<String>>, DriverError> {
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| DriverError::new(command, "no stderr pipe"))?;
    Ok(std::thread::spawn(move || {
        BufReader::new(stderr)
            .lines()
            .map_while(|line| line.ok())
            .collect()
    }))
}

struct BtrfsSendStream {
    command: String,
    child: Child,
    stdout: ChildStdout,
    stderr: JoinHandle<Vec<String>>,
}

impl Read for BtrfsSendStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.stdout.read(buf)
    }
}

impl SendStream for BtrfsSendStream {
    fn finish(self: Box<Self>) -> Result<(), DriverError> {
        let Self {
            command,
            mut child,
            stdout,
            stderr,
        } = *self;
        // Close the read end first: a producer aborted mid-stream would
        // otherwise block forever on a full pipe nobody drains
        drop(stdout);
        let status = child
            .wait()
            .map_err(|e| DriverError::new(&command, e.to_string()))?;
        let stderr = stderr.join().unwrap_or_default();
        if status.success() {
            Ok(())
        } else {
            Err(DriverError::new(&command, format!("exited with {status}"))
                .with_stderr(stderr))
        }
    }
}

struct BtrfsReceiveSink {
    command: String,
    child: Child,
    stdin: Option<ChildStdin>,
    stderr: JoinHandle<Vec<String>>,
}

impl Write for BtrfsReceiveSink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self.stdin.as_mut() {
            Some(stdin) => stdin.write(buf),
            None => Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "receive sink already closed",
            )),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self.stdin.as_mut() {
            Some(stdin) => stdin.flush(),
            None => Ok(()),
        }
    }
}

impl ReceiveSink for BtrfsReceiveSink {
    fn finish(mut self: Box<Self>) -> Result<(), DriverError> {
        // Closing stdin signals end-of-stream to the consumer
        drop(self.stdin.take());
        let status = self
            .child
            .wait()
            .map_err(|e| DriverError::new(&self.command, e.to_string()))?;
        let stderr = self.stderr.join().unwrap_or_default();
        if status.success() {
            Ok(())
        } else {
            Err(DriverError::new(&self.command, format!("exited with {status}"))
                .with_stderr(stderr))
        }
    }
}

/// Extract the generation counter from `btrfs subvolume show` output
fn parse_generation(output: &str) -> Option<u64> {
    for line in output.lines() {
        let line = line.trim();
        // "Generation:" and "Generation (Creation):" both appear; the plain
        // one is the current generation
        if let Some(rest) = line.strip_prefix("Generation") {
            let rest = rest.trim_start();
            if let Some(value) = rest.strip_prefix(':') {
                if let Ok(generation) = value.trim().parse() {
                    return Some(generation);
                }
            }
        }
    }
    None
}

/// Sum-friendly parse of `btrfs subvolume find-new` output: every line
/// reporting a `len N` token becomes one change record
fn parse_find_new(output: &str) -> Vec<ChangeRecord> {
    let mut changes = Vec::new();
    for line in output.lines() {
        let mut tokens = line.split_whitespace();
        while let Some(token) = tokens.next() {
            if token == "len" {
                if let Some(len) = tokens.next().and_then(|v| v.parse().ok()) {
                    changes.push(ChangeRecord { len });
                }
                break;
            }
        }
    }
    changes
}

/// Parse `btrfs subvolume list -pcgquR` output
///
/// Each line is a flat sequence of key/value pairs; `-` marks an absent
/// value. The two-word `top level` key is collapsed first.
fn parse_subvolume_list(output: &str) -> Vec<SubvolumeInfo> {
    let mut table = Vec::new();
    for line in output.lines() {
        let line = line.replace("top level", "top_level");
        let mut fields: HashMap<&str, &str> = HashMap::new();
        let mut tokens = line.split_whitespace();
        while let (Some(key), Some(value)) = (tokens.next(), tokens.next()) {
            if value != "-" {
                fields.insert(key, value);
            }
        }

        let (Some(id), Some(generation), Some(uuid), Some(path)) = (
            fields.get("ID").and_then(|v| v.parse().ok()),
            fields.get("gen").and_then(|v| v.parse().ok()),
            fields.get("uuid").map(|v| v.to_string()),
            fields.get("path").map(PathBuf::from),
        ) else {
            continue;
        };

        table.push(SubvolumeInfo {
            id,
            uuid,
            parent_uuid: fields.get("parent_uuid").map(|v| v.to_string()),
            received_uuid: fields.get("received_uuid").map(|v| v.to_string()),
            generation,
            path,
        });
    }
    table
}
