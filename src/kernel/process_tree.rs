//! Process accounting from /proc: which processes belong to a run, and
//! which ones outlived it.
//!
//! Every launched program leads a fresh session. The service marks itself a
//! child subreaper, so a process that leaves that session and loses its
//! parent is re-parented to the service rather than to init, and a scan of
//! /proc still finds it.

use crate::config::types::{Result, TutorboxError};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;

const SWEEP_PASSES: usize = 50;
const SWEEP_PAUSE: Duration = Duration::from_millis(10);

/// The fields of /proc/<pid>/stat the sweep relies on
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProcEntry {
    pub pid: i32,
    pub state: char,
    pub ppid: i32,
    pub sid: i32,
    /// Clock ticks after boot; tells a recycled pid from the original
    pub start_time: u64,
}

impl ProcEntry {
    /// The command name may contain spaces and parentheses, so fields are
    /// counted from the last `)`.
    pub fn parse(stat: &str) -> Option<Self> {
        let open = stat.find('(')?;
        let close = stat.rfind(')')?;
        let pid = stat[..open].trim().parse().ok()?;
        let fields: Vec<&str> = stat.get(close + 1..)?.split_whitespace().collect();
        Some(Self {
            pid,
            state: fields.first()?.chars().next()?,
            ppid: fields.get(1)?.parse().ok()?,
            sid: fields.get(3)?.parse().ok()?,
            start_time: fields.get(19)?.parse().ok()?,
        })
    }

    pub fn read(pid: i32) -> Option<Self> {
        let stat = std::fs::read_to_string(format!("/proc/{}/stat", pid)).ok()?;
        Self::parse(&stat)
    }

    pub fn is_zombie(&self) -> bool {
        matches!(self.state, 'Z' | 'X')
    }
}

/// Every process visible in /proc. Entries that vanish mid-scan are skipped.
pub fn snapshot() -> Vec<ProcEntry> {
    let Ok(dir) = std::fs::read_dir("/proc") else {
        return Vec::new();
    };
    dir.filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().to_str()?.parse::<i32>().ok())
        .filter_map(ProcEntry::read)
        .collect()
}

/// `roots` and everything below them, parents before children.
pub fn with_descendants(table: &[ProcEntry], roots: &[i32]) -> Vec<ProcEntry> {
    let by_pid: HashMap<i32, &ProcEntry> = table.iter().map(|e| (e.pid, e)).collect();
    let mut children: HashMap<i32, Vec<i32>> = HashMap::new();
    for entry in table {
        children.entry(entry.ppid).or_default().push(entry.pid);
    }

    let mut seen = HashSet::new();
    let mut ordered = Vec::new();
    let mut queue: VecDeque<i32> = roots.iter().copied().collect();
    while let Some(pid) = queue.pop_front() {
        if !seen.insert(pid) {
            continue;
        }
        if let Some(entry) = by_pid.get(&pid) {
            ordered.push(**entry);
        }
        if let Some(kids) = children.get(&pid) {
            queue.extend(kids.iter().copied());
        }
    }
    ordered
}

/// Live (non-zombie) members of session `sid`.
pub fn session_size(table: &[ProcEntry], sid: i32) -> usize {
    table
        .iter()
        .filter(|e| e.sid == sid && !e.is_zombie())
        .count()
}

/// Real uid and thread count from /proc/<pid>/status.
fn parse_status(status: &str) -> Option<(u32, u64)> {
    let mut uid = None;
    let mut threads = None;
    for line in status.lines() {
        if let Some(rest) = line.strip_prefix("Uid:") {
            uid = rest.split_whitespace().next()?.parse().ok();
        } else if let Some(rest) = line.strip_prefix("Threads:") {
            threads = rest.trim().parse().ok();
        }
    }
    Some((uid?, threads?))
}

/// Tasks charged to `uid`, threads included. This is what RLIMIT_NPROC
/// compares against, so a per-run cap has to start from here.
pub fn tasks_of_uid(uid: u32) -> u64 {
    let Ok(dir) = std::fs::read_dir("/proc") else {
        return 0;
    };
    dir.filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_str().is_some_and(|n| n.parse::<i32>().is_ok()))
        .filter_map(|entry| std::fs::read_to_string(entry.path().join("status")).ok())
        .filter_map(|status| parse_status(&status))
        .filter(|(owner, _)| *owner == uid)
        .map(|(_, threads)| threads)
        .sum()
}

static SUBREAPER: OnceLock<std::result::Result<(), String>> = OnceLock::new();

/// Adopt orphaned descendants instead of letting init take them. Set once
/// per process.
pub fn become_subreaper() -> Result<()> {
    SUBREAPER
        .get_or_init(|| {
            // SAFETY: prctl with integer arguments only.
            let rc = unsafe { libc::prctl(libc::PR_SET_CHILD_SUBREAPER, 1 as libc::c_ulong, 0, 0, 0) };
            if rc == 0 {
                log::debug!("Registered as child subreaper");
                Ok(())
            } else {
                Err(format!(
                    "PR_SET_CHILD_SUBREAPER failed: {}",
                    std::io::Error::last_os_error()
                ))
            }
        })
        .clone()
        .map_err(TutorboxError::Isolation)
}

static LEADERS: OnceLock<Mutex<HashSet<i32>>> = OnceLock::new();

/// Session leaders of runs still in flight.
///
/// Hold the guard across spawn and registration: a sweep takes the same
/// lock, so it never sees a fresh session before it is registered.
pub fn live_leaders() -> MutexGuard<'static, HashSet<i32>> {
    LEADERS
        .get_or_init(Default::default)
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}

/// Forget a leader once it has been reaped.
pub fn retire_leader(pid: i32) {
    live_leaders().remove(&pid);
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub killed: usize,
    pub reaped: usize,
    /// A pass found nothing left to kill or reap
    pub settled: bool,
}

/// Kill whatever a finished run left behind.
///
/// Targets are the members of `leader`'s session plus any process adopted
/// by the service from a session no live run owns, together with all their
/// descendants. Adopted zombies are reaped. Call after `leader` has been
/// reaped and retired.
pub fn sweep_after(leader: i32) -> SweepReport {
    // SAFETY: getpid/getsid take no pointers.
    let (me, my_sid) = unsafe { (libc::getpid(), libc::getsid(0)) };
    let mut report = SweepReport::default();

    for _ in 0..SWEEP_PASSES {
        let doomed = {
            let leaders = live_leaders();
            let table = snapshot();
            let roots: Vec<i32> = table
                .iter()
                .filter(|e| {
                    let in_run = e.sid == leader && !leaders.contains(&leader);
                    let adopted = e.ppid == me
                        && e.sid != my_sid
                        && !leaders.contains(&e.pid)
                        && !leaders.contains(&e.sid);
                    in_run || adopted
                })
                .map(|e| e.pid)
                .collect();
            let doomed: Vec<ProcEntry> = with_descendants(&table, &roots)
                .into_iter()
                .filter(|e| e.pid != me && !leaders.contains(&e.pid))
                .collect();

            for entry in doomed.iter().filter(|e| !e.is_zombie()) {
                let same = ProcEntry::read(entry.pid).is_some_and(|now| now.start_time == entry.start_time);
                // SAFETY: plain syscall on a pid whose identity was just re-checked.
                if same && unsafe { libc::kill(entry.pid, libc::SIGKILL) } == 0 {
                    report.killed += 1;
                }
            }
            doomed
        };

        if doomed.is_empty() {
            report.settled = true;
            break;
        }

        for entry in doomed.iter().filter(|e| e.ppid == me) {
            let mut status = 0;
            // SAFETY: valid pointer to a stack value; WNOHANG never blocks.
            if unsafe { libc::waitpid(entry.pid, &mut status, libc::WNOHANG) } == entry.pid {
                report.reaped += 1;
            }
        }
        std::thread::sleep(SWEEP_PAUSE);
    }

    report
}
