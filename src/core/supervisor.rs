use crate::config::types::{OutputIntegrity, Result, TutorboxError};
use crate::core::types::{KillReason, KillReport, LaunchEvidence, LaunchSpec, ResourceUsage};
use crate::kernel::namespace::enter_isolated_namespaces;
use crate::kernel::process_tree;
use crate::kernel::resource::{set_parent_death_signal, RlimitPlan};
use crate::kernel::signal::{kill_process_group, CancelToken};
use crate::observability::audit::events;
use crate::utils::output::OutputCollector;
use nix::errno::Errno;
use std::io::Write;
use std::os::unix::process::CommandExt;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(10);
/// Session membership is counted on every Nth poll; a /proc scan costs more
/// than a statm read.
const PROCESS_SCAN_EVERY: u32 = 5;
/// Readers get this long after the group is gone to hit EOF.
const COLLECTION_GRACE: Duration = Duration::from_secs(2);

fn to_process_error(prefix: &str, err: impl std::fmt::Display) -> TutorboxError {
    TutorboxError::Process(format!("{prefix}: {err}"))
}

/// Start `spec` as the leader of a new session and supervise it to completion.
///
/// On return the leader has been reaped and every process of the run has
/// been killed, including ones that started sessions of their own, whatever
/// the outcome. Cancellation still cleans up before failing.
pub fn launch(spec: &LaunchSpec, cancel: &CancelToken) -> Result<LaunchEvidence> {
    if !spec.program.is_absolute() {
        return Err(TutorboxError::Config(format!(
            "refusing to launch non-absolute program {:?}",
            spec.program
        )));
    }

    if let Err(e) = process_tree::become_subreaper() {
        if spec.strict_mode {
            return Err(e);
        }
        log::warn!("{}; escaped processes may outlive their run", e);
    }

    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .env_clear()
        .envs(spec.environment.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .current_dir(&spec.workdir)
        .stdin(if spec.stdin_data.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let plan = RlimitPlan::from_limits(&spec.limits).with_process_headroom(existing_tasks(spec));
    let isolate_network = spec.isolate_network;
    let strict_mode = spec.strict_mode;
    // SAFETY: the closure only issues setsid/prctl/unshare/setrlimit syscalls
    // on values prepared before fork.
    unsafe {
        cmd.pre_exec(move || {
            if libc::setsid() == -1 {
                return Err(std::io::Error::last_os_error());
            }
            set_parent_death_signal()?;
            if isolate_network {
                if let Err(e) = enter_isolated_namespaces() {
                    if strict_mode {
                        return Err(e);
                    }
                }
            }
            plan.apply(strict_mode)
        });
    }

    let started = Instant::now();
    let (mut child, pid) = {
        let mut leaders = process_tree::live_leaders();
        let child = cmd
            .spawn()
            .map_err(|e| to_process_error(&format!("spawn({})", spec.program.display()), e))?;
        let pid = child.id() as i32;
        leaders.insert(pid);
        (child, pid)
    };
    log::debug!("Launched {} as pid {} (own session)", spec.program.display(), pid);

    if let (Some(data), Some(mut stdin)) = (spec.stdin_data.clone(), child.stdin.take()) {
        let spawned = std::thread::Builder::new()
            .name("stdin-feed".to_string())
            .spawn(move || {
                // EPIPE just means the program stopped reading.
                let _ = stdin.write_all(data.as_bytes());
            });
        if let Err(e) = spawned {
            log::warn!("stdin feeder could not start for pid {}: {}", pid, e);
        }
    }

    let collector = OutputCollector::spawn(
        child.stdout.take(),
        child.stderr.take(),
        spec.limits.max_output_bytes,
    );

    let wall_limit = Duration::from_millis(spec.limits.wall_time_ms);
    let page_size = page_size();
    let mut observed_rss = 0u64;
    let mut peak_processes = 0usize;
    let mut polls = 0u32;
    let mut kill_reason = None;
    let mut kill_report = None;

    let waited = loop {
        match wait4(pid, libc::WNOHANG) {
            Ok(Some(done)) => break Ok(done),
            Ok(None) => {}
            Err(Errno::EINTR) => continue,
            Err(e) => {
                kill_process_group(pid);
                let _ = reap(pid);
                break Err(to_process_error("wait4(child)", e));
            }
        }

        if let Some(rss) = resident_bytes(pid, page_size) {
            observed_rss = observed_rss.max(rss);
        }
        if polls % PROCESS_SCAN_EVERY == 0 && spec.limits.process_limit.is_some() {
            peak_processes = peak_processes.max(process_tree::session_size(&process_tree::snapshot(), pid));
        }
        polls = polls.wrapping_add(1);

        let reason = if cancel.is_cancelled() {
            Some(KillReason::Cancelled)
        } else if started.elapsed() > wall_limit {
            Some(KillReason::WallTime)
        } else if observed_rss > spec.limits.memory_bytes {
            Some(KillReason::Memory)
        } else if spec.limits.process_limit.is_some_and(|cap| peak_processes as u64 > cap) {
            Some(KillReason::ProcessLimit)
        } else {
            None
        };

        if let Some(reason) = reason {
            let report = kill_process_group(pid);
            events::forced_kill(pid, reason, &report);
            kill_reason = Some(reason);
            kill_report = Some(report);
            break reap(pid);
        }

        std::thread::sleep(POLL_INTERVAL);
    };

    let wall_time_ms = started.elapsed().as_millis() as u64;
    process_tree::retire_leader(pid);
    let sweep = process_tree::sweep_after(pid);
    if sweep.killed > 0 || !sweep.settled {
        events::strays_killed(pid, sweep.killed, sweep.settled);
    }
    let (raw_status, usage) = waited?;

    let output = collector.finish(COLLECTION_GRACE);
    let output_integrity = output.combined_integrity();
    if output_integrity == OutputIntegrity::TruncatedByJudgeLimit {
        events::output_truncated(
            pid,
            output.stdout.total_bytes.max(output.stderr.total_bytes),
            spec.limits.max_output_bytes,
        );
    }

    if kill_reason == Some(KillReason::Cancelled) {
        return Err(TutorboxError::Cancelled);
    }

    let (exit_code, signal) = decode_status(raw_status);
    Ok(LaunchEvidence {
        exit_code,
        signal,
        kill_reason,
        kill_report,
        wall_time_ms,
        usage,
        observed_rss_bytes: observed_rss,
        stdout: output.stdout.into_text(),
        stderr: output.stderr.into_text(),
        output_integrity,
        swept_descendants: sweep.killed,
    })
}

/// Tasks the invoking uid already has; root is exempt from RLIMIT_NPROC.
fn existing_tasks(spec: &LaunchSpec) -> u64 {
    if spec.limits.process_limit.is_none() {
        return 0;
    }
    // SAFETY: getuid takes no arguments and cannot fail.
    let uid = unsafe { libc::getuid() };
    if uid == 0 {
        return 0;
    }
    process_tree::tasks_of_uid(uid)
}

fn wait4(pid: i32, flags: libc::c_int) -> std::result::Result<Option<(i32, ResourceUsage)>, Errno> {
    let mut status: libc::c_int = 0;
    // SAFETY: rusage is plain old data; zeroed is a valid value.
    let mut rusage: libc::rusage = unsafe { std::mem::zeroed() };
    // SAFETY: valid pointers to stack values for the duration of the call.
    let rc = unsafe { libc::wait4(pid, &mut status, flags, &mut rusage) };
    match rc {
        0 => Ok(None),
        rc if rc < 0 => Err(Errno::last()),
        _ => Ok(Some((status, usage_from(&rusage)))),
    }
}

/// Blocking reap after the group has been killed.
fn reap(pid: i32) -> Result<(i32, ResourceUsage)> {
    loop {
        match wait4(pid, 0) {
            Ok(Some(done)) => return Ok(done),
            Ok(None) | Err(Errno::EINTR) => continue,
            Err(e) => return Err(to_process_error("wait4(reap)", e)),
        }
    }
}

fn usage_from(rusage: &libc::rusage) -> ResourceUsage {
    let to_ms = |tv: libc::timeval| (tv.tv_sec as u64) * 1000 + (tv.tv_usec as u64) / 1000;
    ResourceUsage {
        cpu_time_ms: to_ms(rusage.ru_utime) + to_ms(rusage.ru_stime),
        // ru_maxrss is KiB on Linux
        max_rss_bytes: (rusage.ru_maxrss.max(0) as u64) * 1024,
    }
}

fn decode_status(status: i32) -> (Option<i32>, Option<i32>) {
    if libc::WIFEXITED(status) {
        (Some(libc::WEXITSTATUS(status)), None)
    } else if libc::WIFSIGNALED(status) {
        (None, Some(libc::WTERMSIG(status)))
    } else {
        (None, None)
    }
}

fn page_size() -> u64 {
    match nix::unistd::sysconf(nix::unistd::SysconfVar::PAGE_SIZE) {
        Ok(Some(size)) if size > 0 => size as u64,
        _ => 4096,
    }
}

/// Current RSS from /proc/<pid>/statm; `None` once the process is gone.
fn resident_bytes(pid: i32, page_size: u64) -> Option<u64> {
    let statm = std::fs::read_to_string(format!("/proc/{}/statm", pid)).ok()?;
    let pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    Some(pages * page_size)
}
