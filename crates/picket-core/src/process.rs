//! Process snapshots and their ancestry.
//!
//! A [`Process`] is the value an event ingester hands to the cache: identity
//! (pid + starttime), executable path, ancestry and optional executable
//! checksums. The cache stores copies, so everything here is plain owned
//! data; aliveness and ancestry are resolved lazily from procfs.

use std::{
    collections::{HashMap, HashSet},
    fs::File,
    io::{self, Read},
    path::Path,
};

use md5::Md5;
use proc_common::{log_error, procfs, Pid};
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};

/// Raw process-lifecycle record as reported by an event ingester.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessEvent {
    pub filename: String,
    pub args: Vec<String>,
    pub comm: String,
    pub pid: i32,
    pub ppid: i32,
    pub uid: u32,
}

/// One link of a process ancestry chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub pid: Pid,
    pub path: String,
}

impl TreeEntry {
    /// Resolve a PID into an ancestry entry, preferring the executable path
    /// over the command name. `None` when the process table no longer has it.
    fn lookup(pid: Pid) -> Option<Self> {
        let path = procfs::get_process_image(pid)
            .map(|image| image.to_string_lossy().into_owned())
            .or_else(|_| procfs::get_process_comm(pid))
            .ok()?;
        Some(Self { pid, path })
    }
}

/// Snapshot of one observed process.
///
/// `pid` plus `starttime` identify an incarnation: the kernel recycles PIDs,
/// and a recycled PID always carries a larger starttime than the process it
/// replaced. An empty `path` means the executable was never resolved and the
/// snapshot must not be cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Process {
    pub pid: Pid,
    pub ppid: Pid,
    pub path: String,
    pub args: Vec<String>,
    pub comm: String,
    pub uid: u32,
    pub starttime: u64,
    /// Ordered ancestry, nearest ancestor first. Immutable once built.
    pub tree: Vec<TreeEntry>,
    /// Nearest ancestor, kept as a pid + path relation rather than an
    /// owning link so that incarnation replacement cannot form cycles.
    pub parent: Option<TreeEntry>,
    /// Digests of the executable, keyed by algorithm name.
    pub checksums: HashMap<String, String>,
}

impl Process {
    pub fn new(pid: Pid, path: impl Into<String>) -> Self {
        Self {
            pid,
            ppid: Pid::from_raw(0),
            path: path.into(),
            args: Vec::new(),
            comm: String::new(),
            uid: 0,
            starttime: 0,
            tree: Vec::new(),
            parent: None,
            checksums: HashMap::new(),
        }
    }

    /// Build a snapshot for a running process, reading whatever procfs still
    /// offers. Every field is best effort: the process may be gone already.
    pub fn discover(pid: Pid) -> Self {
        let mut proc = Self::new(pid, "");
        proc.path = procfs::get_process_image(pid)
            .map(|image| image.to_string_lossy().into_owned())
            .unwrap_or_default();
        proc.comm = procfs::get_process_comm(pid).unwrap_or_default();
        proc.args = procfs::get_process_command_line(pid).unwrap_or_default();
        proc.ppid = procfs::get_process_parent_pid(pid).unwrap_or(Pid::from_raw(0));
        proc.uid = procfs::get_process_user_id(pid)
            .map(|uid| uid.as_raw())
            .unwrap_or(0);
        proc.starttime = procfs::get_process_start_time(pid).unwrap_or(0);
        proc
    }

    /// Checks whether this PID still designates a running process.
    pub fn is_alive(&self) -> bool {
        procfs::exists(self.pid)
    }

    pub fn checksums_count(&self) -> usize {
        self.checksums.len()
    }

    pub fn reset_checksums(&mut self) {
        self.checksums.clear();
    }

    /// Hash the executable with every given algorithm. Digests that cannot be
    /// computed (unreadable file, unknown algorithm) are simply left absent;
    /// the cache retries on the next lookup.
    pub fn compute_checksums(&mut self, algorithms: &[String]) {
        if self.path.is_empty() {
            return;
        }
        for algorithm in algorithms {
            if self.checksums.contains_key(algorithm) {
                continue;
            }
            if let Some(digest) = hash_file(algorithm, Path::new(&self.path)) {
                self.checksums.insert(algorithm.clone(), digest);
            }
        }
    }

    /// Resolve the nearest ancestor from procfs, if not already known.
    pub fn get_parent(&mut self) {
        if self.parent.is_some() {
            return;
        }
        let ppid = match procfs::get_process_parent_pid(self.pid) {
            Ok(ppid) => ppid,
            Err(err) => {
                log::debug!("no parent found for {}: {}", self.pid, err);
                return;
            }
        };
        self.ppid = ppid;
        self.parent = TreeEntry::lookup(ppid);
    }

    /// Walk procfs upwards from the parent and record the ancestry chain.
    /// A no-op when the tree was already built.
    pub fn build_tree(&mut self) {
        if !self.tree.is_empty() {
            return;
        }

        let mut tree = Vec::new();
        let mut visited = HashSet::new();
        let mut current = match &self.parent {
            Some(parent) => parent.pid,
            None => self.ppid,
        };

        while current.as_raw() > 0 && visited.insert(current) {
            let Some(entry) = TreeEntry::lookup(current) else {
                break;
            };
            tree.push(entry);
            match procfs::get_process_parent_pid(current) {
                Ok(ppid) if ppid.as_raw() > 0 => current = ppid,
                _ => break,
            }
        }

        self.tree = tree;
    }

    /// Adopt `parent` as the nearest ancestor and derive the ancestry chain
    /// from its tree. Used when an exec replaces the identity of a cached
    /// PID: the prior incarnation becomes the logical parent of the new one.
    pub fn link_parent(&mut self, parent: &Process) {
        let entry = TreeEntry {
            pid: parent.pid,
            path: parent.path.clone(),
        };
        self.ppid = parent.pid;
        self.tree = std::iter::once(entry.clone())
            .chain(parent.tree.iter().cloned())
            .collect();
        self.parent = Some(entry);
    }
}

impl From<&ProcessEvent> for Process {
    fn from(event: &ProcessEvent) -> Self {
        let pid = Pid::from_raw(event.pid);
        let mut proc = Process::new(pid, event.filename.clone());
        proc.ppid = Pid::from_raw(event.ppid);
        proc.args = event.args.clone();
        proc.comm = event.comm.clone();
        proc.uid = event.uid;
        // Events don't carry the birth stamp, recover it while the
        // process table still knows the PID.
        proc.starttime = procfs::get_process_start_time(pid).unwrap_or(0);
        proc
    }
}

fn hash_file(algorithm: &str, path: &Path) -> Option<String> {
    let digest = match algorithm {
        "md5" => digest_file::<Md5>(path),
        "sha1" => digest_file::<Sha1>(path),
        "sha256" => digest_file::<Sha256>(path),
        "sha512" => digest_file::<Sha512>(path),
        other => {
            log::warn!("unknown checksum algorithm {other}");
            return None;
        }
    };
    match digest {
        Ok(digest) => Some(digest),
        Err(err) => {
            log_error(&format!("hashing {}", path.display()), err);
            None
        }
    }
}

fn digest_file<D: Digest>(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = D::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}
