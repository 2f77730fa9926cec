//! Time-bounded cache of process-execution events.
//!
//! The cache sits between the stream of kernel process events (exec, fork,
//! exit) and the connection-decision pipeline: when a new outbound connection
//! shows up, [`EventCache::is_in_store`] answers "which process did this?".
//! Three realities shape the design: events arrive out of order with respect
//! to the connections they explain, PIDs are recycled within milliseconds,
//! and several tasks (ingesters, lookups, checksum computation, the janitor)
//! touch the store concurrently.
//!
//! Entries are owned snapshots. Writers always go through [`EventCache::update_item`],
//! whose starttime guard discards updates that lost the race against a newer
//! incarnation of the same PID. Exited processes linger for a grace period so
//! that a connection observed after the exit can still be attributed.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock, Weak},
    time::Duration,
};

use proc_common::Pid;
use tokio::time::{self, Instant};

use crate::process::Process;

/// How long an entry may go untouched before the janitor considers it stale.
const PID_TTL: Duration = Duration::from_secs(20);

/// Delay between an exit notification and the removal of the entry.
/// A connection event can be reported after the exit of the process that
/// opened it; removing the entry immediately would leave such connections
/// unattributed.
const EXIT_DELAY: Duration = Duration::from_secs(2);

/// Period of the background sweep for stale entries.
const JANITOR_INTERVAL: Duration = Duration::from_secs(10);

const INITIAL_CAPACITY: usize = 500;

/// A cached process event.
#[derive(Debug, Clone)]
pub struct EventItem {
    pub proc: Process,
    last_seen: Instant,
    ttl: Duration,
}

impl EventItem {
    fn new(proc: Process) -> Self {
        Self {
            proc,
            last_seen: Instant::now(),
            ttl: PID_TTL,
        }
    }

    pub fn last_seen(&self) -> Instant {
        self.last_seen
    }

    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_seen) >= self.ttl
    }
}

struct Inner {
    event_by_pid: HashMap<Pid, EventItem>,
    /// Hash algorithms currently demanded by rules, with how many rules
    /// demand each. A zero count means the algorithm has been retired.
    checksum_algorithms: HashMap<String, u32>,
    checksums_enabled: bool,
}

/// Concurrent store of process-execution events, keyed by PID.
pub struct EventCache {
    inner: RwLock<Inner>,
    /// Back-handle for the timers this store arms; they must not keep a
    /// replaced store alive.
    weak: Weak<EventCache>,
}

impl EventCache {
    /// Create the store and spawn its janitor. The janitor holds a weak
    /// handle and stops on its own once the store is dropped.
    pub fn start() -> Arc<Self> {
        let cache = Arc::new_cyclic(|weak| Self {
            inner: RwLock::new(Inner {
                event_by_pid: HashMap::with_capacity(INITIAL_CAPACITY),
                checksum_algorithms: HashMap::new(),
                checksums_enabled: false,
            }),
            weak: weak.clone(),
        });

        let janitor = Arc::downgrade(&cache);
        tokio::spawn(async move {
            let mut ticker = time::interval(JANITOR_INTERVAL);
            loop {
                ticker.tick().await;
                match janitor.upgrade() {
                    Some(cache) => cache.delete_old_items(),
                    None => break,
                }
            }
        });

        cache
    }

    /// Insert or refresh a process. If checksum computation is enabled and
    /// the process lacks digests, they are computed (with no lock held) and
    /// persisted with a second write; the starttime guard in
    /// [`EventCache::update_item`] absorbs the race against a PID recycled
    /// while hashing.
    pub fn add(&self, proc: &mut Process) {
        log::debug!(
            "caching event for {} ({}, starttime {}), total {}",
            proc.pid,
            proc.path,
            proc.starttime,
            self.len()
        );
        self.update_item(proc);
        if self.compute_checksums_enabled() && self.compute_checksums(proc) {
            self.update_item(proc);
        }
    }

    /// Core writer. Snapshots with an empty path are never stored, and an
    /// update that is older than the cached incarnation of the same PID is
    /// silently discarded.
    pub fn update_item(&self, proc: &Process) {
        if proc.path.is_empty() {
            return;
        }

        let mut inner = self.inner.write().unwrap();

        if let Some(old) = inner.event_by_pid.get(&proc.pid) {
            // A slow writer (typically checksum computation) may try to
            // persist a process whose PID has been recycled meanwhile.
            // Newer starttime wins when the paths differ; same-path
            // updates always refresh.
            if old.proc.path != proc.path && old.proc.starttime > proc.starttime {
                log::trace!(
                    "skipping out-of-order update: {} ({}) -> {} ({})",
                    old.proc.path,
                    old.proc.starttime,
                    proc.path,
                    proc.starttime
                );
                return;
            }
        }

        inner
            .event_by_pid
            .insert(proc.pid, EventItem::new(proc.clone()));
    }

    /// Replace the identity of a cached PID after an exec: the kernel
    /// reported a new executable for the same number. The prior incarnation
    /// becomes the logical parent of the new one.
    pub fn replace_item(&self, old_proc: &mut Process, new_proc: &mut Process) {
        log::trace!(
            "exec replacement on {}: {} ({}) -> {} ({})",
            new_proc.pid,
            old_proc.path,
            old_proc.starttime,
            new_proc.path,
            new_proc.starttime
        );

        new_proc.ppid = old_proc.pid;
        self.update_item(new_proc);

        if new_proc.checksums_count() == 0 {
            self.compute_checksums(new_proc);
            self.update_item(new_proc);
        }

        if old_proc.tree.is_empty() {
            old_proc.get_parent();
            old_proc.build_tree();
            // Keyed by PID, so the newer incarnation just stored above
            // rejects this write. The enrichment still reaches callers
            // holding old_proc.
            self.update_item(old_proc);
        }

        if new_proc.tree.is_empty() {
            new_proc.link_parent(old_proc);
            self.update_item(new_proc);
        }
    }

    /// Reconcile a cached process with what a caller observed. An exec on
    /// the same PID routes to [`EventCache::replace_item`]; otherwise missing
    /// ancestry is resolved and written back on whichever side lacks it.
    pub fn update(&self, old_proc: &mut Process, mut proc: Option<&mut Process>) {
        log::debug!("reconciling cached {} -> {}", old_proc.pid, old_proc.path);

        if let Some(proc) = proc.as_deref_mut() {
            if proc.pid == old_proc.pid && proc.path != old_proc.path {
                self.replace_item(old_proc, proc);
                return;
            }
        }

        let mut update_old = false;
        if old_proc.tree.is_empty() {
            old_proc.get_parent();
            old_proc.build_tree();
            update_old = true;
        }

        let mut update_new = None;
        if let Some(proc) = proc {
            if !old_proc.tree.is_empty() && proc.tree.is_empty() && proc.pid == old_proc.pid {
                proc.tree = old_proc.tree.clone();
                update_new = Some(proc);
            }
        }

        if update_old {
            log::trace!(
                "storing resolved ancestry of {} ({} entries)",
                old_proc.pid,
                old_proc.tree.len()
            );
            self.update_item(old_proc);
        }
        if let Some(proc) = update_new {
            log::trace!("copying cached ancestry onto {}", proc.pid);
            self.update_item(proc);
        }
    }

    /// Whether the cached snapshot has gone stale against what the caller
    /// observed and should be refreshed through [`EventCache::update`].
    fn needs_update(cached: &Process, proc: Option<&Process>) -> bool {
        let sums_count = cached.checksums_count();

        if let Some(proc) = proc {
            // The PID was recycled or exec-replaced: without this the
            // connection would be attributed to the stale identity.
            if proc.pid == cached.pid && proc.path != cached.path {
                return true;
            }
            // Steady state: hashed and still running.
            if sums_count > 0 && cached.is_alive() {
                return false;
            }
        }

        if sums_count == 0 {
            return true;
        }
        if let Some(proc) = proc {
            if proc.tree.is_empty() {
                return true;
            }
        }
        cached.tree.is_empty()
    }

    /// Primary read: look up a PID and report whether the cached snapshot
    /// needs to be reconciled against what the caller observed.
    pub fn is_in_store(&self, pid: Pid, proc: Option<&Process>) -> Option<(EventItem, bool)> {
        let item = self.is_in_store_by_pid(pid)?;
        let needs_update = Self::needs_update(&item.proc, proc);
        if !needs_update {
            log::debug!("event found for {}: {}", pid, item.proc.path);
        }
        Some((item, needs_update))
    }

    /// Look up a PID and return a snapshot of its entry. The entry's last
    /// seen stamp is bumped: recently queried entries resist eviction, which
    /// keeps processes that still originate connections attributable.
    pub fn is_in_store_by_pid(&self, pid: Pid) -> Option<EventItem> {
        let mut inner = self.inner.write().unwrap();
        let item = inner.event_by_pid.get_mut(&pid)?;
        item.last_seen = Instant::now();
        Some(item.clone())
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().event_by_pid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Schedule the removal of an entry after the exit grace period. At fire
    /// time the PID is probed again: if it designates a running process (a
    /// recycled PID, or a false exit), the entry is kept.
    pub fn delete(&self, pid: Pid) {
        let item = { self.inner.read().unwrap().event_by_pid.get(&pid).cloned() };
        let Some(item) = item else {
            return;
        };

        let cache = self.weak.clone();
        tokio::spawn(async move {
            time::sleep(EXIT_DELAY).await;
            let Some(cache) = cache.upgrade() else {
                return;
            };
            if !item.proc.is_alive() {
                log::trace!("deleting exited {}: {}", pid, item.proc.path);
                cache.inner.write().unwrap().event_by_pid.remove(&pid);
            }
        });
    }

    /// Sweep entries that are both past their TTL and no longer running.
    /// Live processes are kept regardless of age: the daemon may still need
    /// to attribute connections to them.
    pub fn delete_old_items(&self) {
        let mut inner = self.inner.write().unwrap();
        log::debug!(
            "sweeping old events, total {}",
            inner.event_by_pid.len()
        );

        let now = Instant::now();
        inner.event_by_pid.retain(|pid, item| {
            let stale = item.is_expired(now) && !item.proc.is_alive();
            if stale {
                log::trace!("deleting stale entry {pid}");
            }
            !stale
        });
    }

    /// Compute the digests of a process under the current policy. Returns
    /// false when the policy is disabled or the process is alive and already
    /// hashed. Hashing happens with no lock held; it may take a while on big
    /// executables.
    pub fn compute_checksums(&self, proc: &mut Process) -> bool {
        let algorithms = {
            let inner = self.inner.read().unwrap();
            if !inner.checksums_enabled {
                return false;
            }
            active_algorithms(&inner.checksum_algorithms)
        };

        if proc.is_alive() && proc.checksums_count() > 0 {
            log::debug!("already hashed: {} -> {:?}", proc.path, proc.checksums);
            return false;
        }

        proc.compute_checksums(&algorithms);
        true
    }

    /// Register one more rule demanding `hash`.
    pub fn add_checksum_hash(&self, hash: &str) {
        let mut inner = self.inner.write().unwrap();
        *inner
            .checksum_algorithms
            .entry(hash.to_string())
            .or_insert(0) += 1;
    }

    /// Drop one rule's demand for `hash`. At zero the algorithm is retired
    /// but the key is kept; a later rule re-arms it.
    pub fn del_checksum_hash(&self, hash: &str) {
        let mut inner = self.inner.write().unwrap();
        if let Some(count) = inner.checksum_algorithms.get_mut(hash) {
            *count = count.saturating_sub(1);
        }
    }

    /// Enable or disable checksum computation. Disabling drops the digests
    /// already cached; enabling re-hashes every cached entry that has none,
    /// since those were stored while the policy was off.
    pub fn set_compute_checksums(&self, compute: bool) {
        let to_refresh: Vec<Process> = {
            let mut inner = self.inner.write().unwrap();
            if inner.checksums_enabled == compute {
                log::debug!("checksum computation already {compute}");
                return;
            }
            inner.checksums_enabled = compute;

            if !compute {
                log::debug!("checksum computation disabled, dropping cached digests");
                for item in inner.event_by_pid.values_mut() {
                    item.proc.reset_checksums();
                }
                return;
            }

            log::debug!("checksum computation enabled, hashing cached entries");
            inner
                .event_by_pid
                .values()
                .filter(|item| item.proc.checksums_count() == 0)
                .map(|item| item.proc.clone())
                .collect()
        };

        // hash outside the lock; the starttime guard covers the race
        for mut proc in to_refresh {
            if self.compute_checksums(&mut proc) {
                self.update_item(&proc);
            }
        }
    }

    /// Hard reset: turn the policy off and forget every registered algorithm.
    pub fn disable_checksums(&self) {
        let mut inner = self.inner.write().unwrap();
        inner.checksums_enabled = false;
        inner.checksum_algorithms.clear();
    }

    pub fn compute_checksums_enabled(&self) -> bool {
        self.inner.read().unwrap().checksums_enabled
    }
}

fn active_algorithms(table: &HashMap<String, u32>) -> Vec<String> {
    table
        .iter()
        .filter(|(_, count)| **count > 0)
        .map(|(name, _)| name.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::TreeEntry;

    fn own_pid() -> Pid {
        Pid::from_raw(std::process::id() as i32)
    }

    fn dead_pid() -> Pid {
        Pid::from_raw(i32::MAX)
    }

    fn proc_with_starttime(pid: Pid, path: &str, starttime: u64) -> Process {
        let mut proc = Process::new(pid, path);
        proc.starttime = starttime;
        proc
    }

    fn executable_fixture(name: &str) -> std::path::PathBuf {
        let file = std::env::temp_dir().join(format!("picket-cache-{}-{name}", std::process::id()));
        std::fs::write(&file, b"#!/bin/sh\nexit 0\n").unwrap();
        file
    }

    #[tokio::test]
    async fn empty_path_is_never_cached() {
        let cache = EventCache::start();
        let mut proc = Process::new(Pid::from_raw(7777), "");
        cache.add(&mut proc);

        assert!(cache.is_empty());
        assert!(cache.is_in_store_by_pid(Pid::from_raw(7777)).is_none());
    }

    #[tokio::test]
    async fn add_is_idempotent() {
        let cache = EventCache::start();
        let mut proc = proc_with_starttime(Pid::from_raw(7777), "/bin/x", 100);

        cache.add(&mut proc);
        cache.add(&mut proc);

        assert_eq!(cache.len(), 1);
        let item = cache.is_in_store_by_pid(Pid::from_raw(7777)).unwrap();
        assert_eq!(item.proc.path, "/bin/x");
    }

    #[tokio::test]
    async fn out_of_order_update_is_discarded() {
        let cache = EventCache::start();
        let mut stored = proc_with_starttime(Pid::from_raw(42), "/bin/a", 500);
        cache.add(&mut stored);

        let late = proc_with_starttime(Pid::from_raw(42), "/bin/b", 400);
        cache.update_item(&late);

        let item = cache.is_in_store_by_pid(Pid::from_raw(42)).unwrap();
        assert_eq!(item.proc.path, "/bin/a");
        assert_eq!(item.proc.starttime, 500);
    }

    #[tokio::test]
    async fn same_path_refresh_always_wins() {
        let cache = EventCache::start();
        let mut stored = proc_with_starttime(Pid::from_raw(7), "/bin/x", 100);
        cache.add(&mut stored);

        // older starttime, but the path matches: this is the checksum
        // worker persisting digests, not a recycled PID
        let mut refresh = proc_with_starttime(Pid::from_raw(7), "/bin/x", 50);
        refresh
            .checksums
            .insert("sha1".to_string(), "abc".to_string());
        cache.update_item(&refresh);

        let item = cache.is_in_store_by_pid(Pid::from_raw(7)).unwrap();
        assert_eq!(item.proc.checksums.get("sha1").unwrap(), "abc");
    }

    #[tokio::test]
    async fn exec_replacement_routed_through_update() {
        let cache = EventCache::start();
        let pid = Pid::from_raw(1234);
        let mut wrapper = proc_with_starttime(pid, "/bin/wrapper", 100);
        cache.add(&mut wrapper);

        // the ingester sees the same PID with a new executable
        let mut telnet = proc_with_starttime(pid, "/bin/telnet", 200);
        let (item, needs_update) = cache.is_in_store(pid, Some(&telnet)).unwrap();
        assert!(needs_update);

        let mut cached = item.proc;
        cache.update(&mut cached, Some(&mut telnet));

        let item = cache.is_in_store_by_pid(pid).unwrap();
        assert_eq!(item.proc.path, "/bin/telnet");
        // the replaced incarnation became the logical parent
        assert_eq!(item.proc.ppid, pid);
        assert_eq!(item.proc.tree[0].path, "/bin/wrapper");
    }

    #[tokio::test]
    async fn update_copies_cached_ancestry_onto_the_candidate() {
        let cache = EventCache::start();
        let pid = Pid::from_raw(4321);
        let mut stored = proc_with_starttime(pid, "/bin/x", 100);
        stored.tree = vec![TreeEntry {
            pid: Pid::from_raw(1),
            path: "/sbin/init".into(),
        }];
        cache.add(&mut stored);

        let mut candidate = proc_with_starttime(pid, "/bin/x", 100);
        cache.update(&mut stored, Some(&mut candidate));

        assert_eq!(candidate.tree.len(), 1);
        assert_eq!(candidate.tree[0].path, "/sbin/init");
    }

    #[tokio::test]
    async fn update_resolves_missing_ancestry_in_place() {
        let cache = EventCache::start();
        let mut proc = Process::discover(own_pid());
        cache.add(&mut proc);

        cache.update(&mut proc, None);

        let item = cache.is_in_store_by_pid(own_pid()).unwrap();
        assert!(!item.proc.tree.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn delete_keeps_a_live_process() {
        let cache = EventCache::start();
        let mut proc = Process::discover(own_pid());
        cache.add(&mut proc);

        cache.delete(own_pid());
        time::sleep(EXIT_DELAY + Duration::from_millis(100)).await;

        assert!(cache.is_in_store_by_pid(own_pid()).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn delete_removes_a_dead_process_after_the_grace_period() {
        let cache = EventCache::start();
        let mut proc = proc_with_starttime(dead_pid(), "/bin/gone", 100);
        cache.add(&mut proc);

        cache.delete(dead_pid());

        // still attributable during the grace period
        assert!(cache.is_in_store_by_pid(dead_pid()).is_some());

        time::sleep(EXIT_DELAY + Duration::from_millis(100)).await;
        assert!(cache.is_in_store_by_pid(dead_pid()).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn delete_of_an_unknown_pid_is_a_no_op() {
        let cache = EventCache::start();
        cache.delete(Pid::from_raw(9999));
        time::sleep(EXIT_DELAY + Duration::from_millis(100)).await;
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn janitor_evicts_dead_and_expired_entries() {
        let cache = EventCache::start();
        let mut proc = proc_with_starttime(dead_pid(), "/bin/dead", 100);
        cache.add(&mut proc);

        time::sleep(PID_TTL + Duration::from_secs(1)).await;
        cache.delete_old_items();

        assert_eq!(cache.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn janitor_keeps_live_processes_past_their_ttl() {
        let cache = EventCache::start();
        let mut proc = Process::discover(own_pid());
        cache.add(&mut proc);

        time::sleep(PID_TTL + Duration::from_secs(1)).await;
        cache.delete_old_items();

        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn janitor_keeps_dead_entries_until_expiry() {
        let cache = EventCache::start();
        let mut proc = proc_with_starttime(dead_pid(), "/bin/dead", 100);
        cache.add(&mut proc);

        time::sleep(Duration::from_secs(5)).await;
        cache.delete_old_items();

        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn lookups_keep_an_entry_from_expiring() {
        let cache = EventCache::start();
        let mut proc = proc_with_starttime(dead_pid(), "/bin/dead", 100);
        cache.add(&mut proc);

        time::sleep(Duration::from_secs(15)).await;
        assert!(cache.is_in_store_by_pid(dead_pid()).is_some());

        // 25s after the add, but only 10s after the touch
        time::sleep(Duration::from_secs(10)).await;
        cache.delete_old_items();
        assert_eq!(cache.len(), 1);

        time::sleep(Duration::from_secs(11)).await;
        cache.delete_old_items();
        assert_eq!(cache.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn lookup_bumps_last_seen() {
        let cache = EventCache::start();
        let mut proc = proc_with_starttime(Pid::from_raw(7777), "/bin/x", 100);
        cache.add(&mut proc);

        let first = cache.is_in_store_by_pid(Pid::from_raw(7777)).unwrap();
        time::sleep(Duration::from_secs(1)).await;
        let second = cache.is_in_store_by_pid(Pid::from_raw(7777)).unwrap();

        assert!(second.last_seen() > first.last_seen());
    }

    #[tokio::test]
    async fn needs_update_when_checksums_are_missing() {
        let cache = EventCache::start();
        let mut proc = proc_with_starttime(Pid::from_raw(7777), "/bin/x", 100);
        cache.add(&mut proc);

        let (_, needs_update) = cache.is_in_store(Pid::from_raw(7777), None).unwrap();
        assert!(needs_update);
    }

    #[tokio::test]
    async fn needs_update_when_cached_ancestry_is_missing() {
        let cache = EventCache::start();
        // hashed but dead, with no ancestry: lookups keep asking for a refresh
        let mut proc = proc_with_starttime(dead_pid(), "/bin/x", 100);
        proc.checksums
            .insert("sha256".to_string(), "cafe".to_string());
        cache.add(&mut proc);

        let (_, needs_update) = cache.is_in_store(dead_pid(), None).unwrap();
        assert!(needs_update);
    }

    #[tokio::test]
    async fn no_update_needed_for_a_live_hashed_entry() {
        let cache = EventCache::start();
        let mut proc = Process::discover(own_pid());
        proc.checksums
            .insert("sha256".to_string(), "cafe".to_string());
        cache.add(&mut proc);

        // the steady-state shortcut fires before any ancestry check
        let candidate = Process::new(own_pid(), proc.path.clone());
        let (_, needs_update) = cache.is_in_store(own_pid(), Some(&candidate)).unwrap();
        assert!(!needs_update);
    }

    #[tokio::test]
    async fn checksum_demand_is_reference_counted() {
        let cache = EventCache::start();
        let file = executable_fixture("refcount");
        cache.set_compute_checksums(true);

        // two rules demand sha256, one retires
        cache.add_checksum_hash("sha256");
        cache.add_checksum_hash("sha256");
        cache.del_checksum_hash("sha256");

        let mut proc = proc_with_starttime(dead_pid(), &file.to_string_lossy(), 100);
        cache.add(&mut proc);
        let item = cache.is_in_store_by_pid(dead_pid()).unwrap();
        assert_eq!(item.proc.checksums_count(), 1);

        // last demand gone: the algorithm is retired
        cache.del_checksum_hash("sha256");
        let mut proc = proc_with_starttime(Pid::from_raw(i32::MAX - 1), &file.to_string_lossy(), 100);
        cache.add(&mut proc);
        let item = cache.is_in_store_by_pid(Pid::from_raw(i32::MAX - 1)).unwrap();
        assert_eq!(item.proc.checksums_count(), 0);

        // decrementing below zero saturates
        cache.del_checksum_hash("sha256");
        cache.del_checksum_hash("unknown");

        std::fs::remove_file(&file).unwrap();
    }

    #[tokio::test]
    async fn enabling_checksums_hashes_cached_entries() {
        let cache = EventCache::start();
        let file = executable_fixture("lazy");
        cache.add_checksum_hash("sha256");

        // stored while the policy was off, so no digests yet
        let mut proc = proc_with_starttime(dead_pid(), &file.to_string_lossy(), 100);
        cache.add(&mut proc);
        assert_eq!(
            cache
                .is_in_store_by_pid(dead_pid())
                .unwrap()
                .proc
                .checksums_count(),
            0
        );

        cache.set_compute_checksums(true);

        let item = cache.is_in_store_by_pid(dead_pid()).unwrap();
        assert_eq!(item.proc.checksums_count(), 1);
        assert!(item.proc.checksums.contains_key("sha256"));

        std::fs::remove_file(&file).unwrap();
    }

    #[tokio::test]
    async fn disabling_checksums_drops_cached_digests() {
        let cache = EventCache::start();
        cache.set_compute_checksums(true);

        let mut proc = proc_with_starttime(dead_pid(), "/bin/x", 100);
        proc.checksums
            .insert("sha256".to_string(), "cafe".to_string());
        cache.update_item(&proc);

        cache.set_compute_checksums(false);

        let item = cache.is_in_store_by_pid(dead_pid()).unwrap();
        assert_eq!(item.proc.checksums_count(), 0);
    }

    #[tokio::test]
    async fn set_compute_checksums_is_idempotent() {
        let cache = EventCache::start();
        assert!(!cache.compute_checksums_enabled());

        cache.set_compute_checksums(true);
        cache.set_compute_checksums(true);
        assert!(cache.compute_checksums_enabled());

        cache.set_compute_checksums(false);
        cache.set_compute_checksums(false);
        assert!(!cache.compute_checksums_enabled());
    }

    #[tokio::test]
    async fn disable_checksums_forgets_the_registered_algorithms() {
        let cache = EventCache::start();
        let file = executable_fixture("hard-reset");
        cache.add_checksum_hash("sha256");
        cache.set_compute_checksums(true);

        cache.disable_checksums();
        assert!(!cache.compute_checksums_enabled());

        // re-enabling without re-registering computes nothing
        cache.set_compute_checksums(true);
        let mut proc = proc_with_starttime(dead_pid(), &file.to_string_lossy(), 100);
        cache.add(&mut proc);
        let item = cache.is_in_store_by_pid(dead_pid()).unwrap();
        assert_eq!(item.proc.checksums_count(), 0);

        std::fs::remove_file(&file).unwrap();
    }

    #[tokio::test]
    async fn compute_checksums_short_circuits() {
        let cache = EventCache::start();
        let mut proc = Process::discover(own_pid());

        // disabled policy
        assert!(!cache.compute_checksums(&mut proc));

        // alive and already hashed
        cache.set_compute_checksums(true);
        proc.checksums
            .insert("sha256".to_string(), "cafe".to_string());
        assert!(!cache.compute_checksums(&mut proc));
    }
}
