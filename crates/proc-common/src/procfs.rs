//! Readers for the subset of procfs the connection-attribution pipeline needs.

use std::{
    fs::{self, File},
    io::{self, prelude::*, BufReader},
    path::{Path, PathBuf},
};

use nix::unistd::{Pid, Uid};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProcfsError {
    #[error("reading {path} failed")]
    ReadFile {
        #[source]
        source: io::Error,
        path: String,
    },

    #[error("malformed content in {path}")]
    Malformed { path: String },

    #[error("parent for process {0} not found")]
    ParentNotFound(Pid),
    #[error("user id for process {0} not found")]
    UserNotFound(Pid),

    #[error(transparent)]
    ParseIntError(#[from] std::num::ParseIntError),
}

/// Checks whether the kernel process table still has an entry for `pid`.
///
/// PIDs are recycled, so a positive answer only means *some* process currently
/// designates this number, not necessarily the one the caller knew about.
pub fn exists(pid: Pid) -> bool {
    Path::new(&format!("/proc/{pid}")).exists()
}

/// Returns the path of the executable image of a given process.
pub fn get_process_image(pid: Pid) -> Result<PathBuf, ProcfsError> {
    let path = format!("/proc/{pid}/exe");
    fs::read_link(&path).map_err(|source| ProcfsError::ReadFile { source, path })
}

/// Returns the command name for the given process.
pub fn get_process_comm(pid: Pid) -> Result<String, ProcfsError> {
    let path = format!("/proc/{pid}/comm");
    let data =
        fs::read_to_string(&path).map_err(|source| ProcfsError::ReadFile { source, path })?;
    Ok(data.trim().to_owned())
}

/// Returns the command line for the given process.
pub fn get_process_command_line(pid: Pid) -> Result<Vec<String>, ProcfsError> {
    let path = format!("/proc/{pid}/cmdline");
    let data =
        fs::read_to_string(&path).map_err(|source| ProcfsError::ReadFile { source, path })?;

    Ok(data
        .split('\0')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect())
}

/// Returns the parent of a given process.
pub fn get_process_parent_pid(pid: Pid) -> Result<Pid, ProcfsError> {
    let value = read_status_field(pid, "PPid:")?.ok_or(ProcfsError::ParentNotFound(pid))?;
    Ok(Pid::from_raw(value.parse()?))
}

/// Returns the real user id of a given process.
pub fn get_process_user_id(pid: Pid) -> Result<Uid, ProcfsError> {
    let value = read_status_field(pid, "Uid:")?.ok_or(ProcfsError::UserNotFound(pid))?;
    Ok(Uid::from_raw(value.parse()?))
}

/// Returns the birth stamp of a given process, in clock ticks since boot.
///
/// Together with the PID it identifies one process incarnation: a recycled
/// PID always carries a larger starttime than the process it replaced.
pub fn get_process_start_time(pid: Pid) -> Result<u64, ProcfsError> {
    let path = format!("/proc/{pid}/stat");
    let data = fs::read_to_string(&path).map_err(|source| ProcfsError::ReadFile {
        source,
        path: path.clone(),
    })?;

    // The comm field may contain spaces and parentheses, skip past the
    // closing one. starttime is the 20th field after it.
    let rest = data
        .rsplit_once(')')
        .map(|(_, rest)| rest)
        .ok_or_else(|| ProcfsError::Malformed { path: path.clone() })?;
    let starttime = rest
        .split_whitespace()
        .nth(19)
        .ok_or(ProcfsError::Malformed { path })?;

    Ok(starttime.parse()?)
}

/// Returns the first value of a `key: value` line in `/proc/<pid>/status`.
fn read_status_field(pid: Pid, key: &str) -> Result<Option<String>, ProcfsError> {
    let path = format!("/proc/{pid}/status");
    let file = File::open(&path).map_err(|source| ProcfsError::ReadFile { source, path })?;

    let reader = BufReader::new(file);
    for line in reader.lines().map_while(Result::ok) {
        if let Some(value) = line.strip_prefix(key) {
            return Ok(value.split_whitespace().next().map(str::to_string));
        }
    }

    Ok(None)
}
