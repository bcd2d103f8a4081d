//! End-to-end sandbox tests against the real g++ toolchain.
//!
//! Each test returns early when the compiler is not installed.

use std::path::Path;
use std::time::Instant;
use tutorbox::catalog::TestCase;
use tutorbox::config::loader::{SandboxConfig, ToolchainConfig};
use tutorbox::config::types::{ExecutionLimits, ExecutionStatus, OutputIntegrity, Verdict};
use tutorbox::exec::sandbox::{BatchOutcome, CodeExecutor, ExecutionRequest, Sandbox};
use tutorbox::kernel::process_tree;
use tutorbox::kernel::signal::CancelToken;
use tutorbox::utils::output::TRUNCATION_MARKER;
use tutorbox::verdict::evaluator::evaluate;

macro_rules! require_gxx {
    () => {
        if !Path::new("/usr/bin/g++").exists() {
            println!("g++ not installed; skipping");
            return;
        }
    };
}

const FACTORIAL: &str = r#"
#include <iostream>
int main() {
    long long n, r = 1;
    std::cin >> n;
    for (long long i = 2; i <= n; ++i) r *= i;
    std::cout << r << "\n";
}
"#;

fn sandbox_with(root: &Path, run_limits: ExecutionLimits) -> Sandbox {
    let config = SandboxConfig {
        workspace_root: root.to_path_buf(),
        network_isolation: false,
        run_limits,
        ..SandboxConfig::default()
    };
    Sandbox::new(config, ToolchainConfig::default()).expect("sandbox")
}

fn sandbox(root: &Path) -> Sandbox {
    sandbox_with(root, ExecutionLimits::run_defaults())
}

fn leftover_entries(root: &Path) -> usize {
    std::fs::read_dir(root).map(|d| d.count()).unwrap_or(0)
}

/// Live processes whose working directory is (or was) under `root`.
/// Every sandboxed program starts in its run directory.
fn processes_under(root: &Path) -> Vec<i32> {
    let root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
    process_tree::snapshot()
        .into_iter()
        .filter(|e| !e.is_zombie())
        .filter(|e| {
            std::fs::read_link(format!("/proc/{}/cwd", e.pid))
                .is_ok_and(|cwd| cwd.starts_with(&root))
        })
        .map(|e| e.pid)
        .collect()
}

fn is_alive(pid: i32) -> bool {
    pid > 0 && process_tree::ProcEntry::read(pid).is_some_and(|e| !e.is_zombie())
}

const TWO_GIB_FILL: &str = r#"
#include <cstdio>
#include <vector>
int main() {
    std::vector<char> v(2048ull << 20, 1);
    long sum = 0;
    for (std::size_t i = 0; i < v.size(); i += 4096) sum += v[i];
    std::printf("%ld\n", sum);
}
"#;

#[test]
fn test_return_zero_succeeds_with_empty_stdout() {
    require_gxx!();
    let root = tempfile::tempdir().unwrap();
    let sandbox = sandbox(root.path());

    let result = sandbox
        .execute(&ExecutionRequest::new("int main(){return 0;}"), &CancelToken::new())
        .unwrap();

    assert_eq!(result.status, ExecutionStatus::Success);
    assert_eq!(result.stdout, "");
    assert_eq!(result.exit_code, Some(0));
    assert_eq!(result.output_integrity, OutputIntegrity::Complete);
    assert_eq!(leftover_entries(root.path()), 0);
}

#[test]
fn test_syntax_error_is_compile_error_without_host_paths() {
    require_gxx!();
    let root = tempfile::tempdir().unwrap();
    let sandbox = sandbox(root.path());

    let result = sandbox
        .execute(
            &ExecutionRequest::new("int main(){ return 0 }"),
            &CancelToken::new(),
        )
        .unwrap();

    assert_eq!(result.status, ExecutionStatus::CompileError);
    assert_eq!(result.stdout, "");
    assert!(result.stderr.contains("error"), "stderr: {}", result.stderr);
    assert!(!result.stderr.contains(&*root.path().to_string_lossy()));
    assert_eq!(leftover_entries(root.path()), 0);
}

#[test]
fn test_infinite_loop_times_out_and_leaves_nothing() {
    require_gxx!();
    let root = tempfile::tempdir().unwrap();
    let limits = ExecutionLimits {
        wall_time_ms: 1_000,
        cpu_time_ms: 3_000,
        ..ExecutionLimits::run_defaults()
    };
    let sandbox = sandbox_with(root.path(), limits);

    let start = Instant::now();
    let result = sandbox
        .execute(
            &ExecutionRequest::new("int main(){ volatile unsigned long x = 0; for(;;) ++x; }"),
            &CancelToken::new(),
        )
        .unwrap();
    let elapsed = start.elapsed();

    assert_eq!(result.status, ExecutionStatus::Timeout);
    // compile time is included; the run itself is bounded by the wall limit
    assert!(result.duration_ms < 1_500, "run took {} ms", result.duration_ms);
    assert!(elapsed.as_secs() < 30);
    assert_eq!(leftover_entries(root.path()), 0);
    assert!(processes_under(root.path()).is_empty());
}

#[test]
fn test_runtime_error_reports_exit_code() {
    require_gxx!();
    let root = tempfile::tempdir().unwrap();
    let sandbox = sandbox(root.path());

    let result = sandbox
        .execute(
            &ExecutionRequest::new("#include <cstdio>\nint main(){ std::puts(\"partial\"); return 3; }"),
            &CancelToken::new(),
        )
        .unwrap();

    assert_eq!(result.status, ExecutionStatus::RuntimeError);
    assert_eq!(result.exit_code, Some(3));
    assert_eq!(result.stdout, "partial\n");
}

#[test]
fn test_memory_hog_exceeds_resource_limit() {
    require_gxx!();
    let root = tempfile::tempdir().unwrap();
    let limits = ExecutionLimits {
        memory_bytes: 32 * 1024 * 1024,
        ..ExecutionLimits::run_defaults()
    };
    let sandbox = sandbox_with(root.path(), limits);

    let source = r#"
#include <iostream>
#include <vector>
int main() {
    std::vector<char> v(256u << 20, 1);
    std::cout << int(v[12345]) << "\n";
}
"#;
    let result = sandbox
        .execute(&ExecutionRequest::new(source), &CancelToken::new())
        .unwrap();

    assert_eq!(result.status, ExecutionStatus::ResourceLimitExceeded);
    assert_eq!(leftover_entries(root.path()), 0);
}

#[test]
fn test_identical_source_gives_identical_stdout() {
    require_gxx!();
    let root = tempfile::tempdir().unwrap();
    let sandbox = sandbox(root.path());
    let source = "#include <iostream>\nint main(){ for(int i=0;i<200;++i) std::cout<<i*i<<' '; std::cout<<'\\n'; }";
    let request = ExecutionRequest::new(source);

    let first = sandbox.execute(&request, &CancelToken::new()).unwrap();
    let second = sandbox.execute(&request, &CancelToken::new()).unwrap();

    assert_eq!(first.status, ExecutionStatus::Success);
    assert_eq!(first.stdout, second.stdout);
}

#[test]
fn test_flooding_output_is_truncated() {
    require_gxx!();
    let root = tempfile::tempdir().unwrap();
    let limits = ExecutionLimits {
        max_output_bytes: 1024,
        ..ExecutionLimits::run_defaults()
    };
    let sandbox = sandbox_with(root.path(), limits);
    let source = "#include <cstdio>\nint main(){ for(int i=0;i<200000;++i) std::puts(\"flood\"); }";

    let result = sandbox
        .execute(&ExecutionRequest::new(source), &CancelToken::new())
        .unwrap();

    assert_eq!(result.status, ExecutionStatus::Success);
    assert_eq!(result.output_integrity, OutputIntegrity::TruncatedByJudgeLimit);
    assert!(result.stdout.ends_with(TRUNCATION_MARKER));
    assert!(result.stdout.len() <= 1024 + TRUNCATION_MARKER.len());
}

#[test]
fn test_factorial_passes_its_cases() {
    require_gxx!();
    let root = tempfile::tempdir().unwrap();
    let sandbox = sandbox(root.path());
    let cases = vec![
        TestCase { input: "3\n".into(), expected_output: "6".into() },
        TestCase { input: "10\n".into(), expected_output: "3628800\n".into() },
    ];
    let inputs: Vec<String> = cases.iter().map(|c| c.input.clone()).collect();

    let outcome = sandbox
        .execute_batch(FACTORIAL, &inputs, None, &CancelToken::new())
        .unwrap();
    assert!(matches!(outcome, BatchOutcome::Compiled(ref r) if r.len() == 2));

    let evaluation = evaluate(&outcome.into_results(), Some(&cases)).unwrap();
    assert_eq!(evaluation.verdict, Verdict::Pass);
    assert!(evaluation.cases.iter().all(|c| c.passed));
    assert_eq!(leftover_entries(root.path()), 0);
}

#[test]
fn test_cancelled_run_is_killed_and_cleaned_up() {
    require_gxx!();
    let root = tempfile::tempdir().unwrap();
    let sandbox = sandbox(root.path());
    let cancel = CancelToken::new();

    let trigger = cancel.clone();
    let canceller = std::thread::spawn(move || {
        // long enough for g++ to finish
        std::thread::sleep(std::time::Duration::from_secs(3));
        trigger.cancel();
    });

    let result = sandbox.execute(
        &ExecutionRequest::new("#include <unistd.h>\nint main(){ sleep(60); }"),
        &cancel,
    );
    canceller.join().unwrap();

    let err = result.unwrap_err();
    assert_eq!(err.kind(), tutorbox::config::types::ErrorKind::Cancelled);
    assert_eq!(leftover_entries(root.path()), 0);
}

#[test]
fn test_two_gib_fill_under_default_limits_is_resource_limit() {
    require_gxx!();
    let root = tempfile::tempdir().unwrap();
    let limits = ExecutionLimits::run_defaults();
    assert_eq!(limits.memory_bytes, 256 * 1024 * 1024);
    let sandbox = sandbox_with(root.path(), limits);

    let result = sandbox
        .execute(&ExecutionRequest::new(TWO_GIB_FILL), &CancelToken::new())
        .unwrap();

    assert_eq!(result.status, ExecutionStatus::ResourceLimitExceeded, "{:?}", result);
    assert_eq!(leftover_entries(root.path()), 0);
}

#[test]
fn test_refused_allocation_under_address_space_cap_is_resource_limit() {
    require_gxx!();
    let root = tempfile::tempdir().unwrap();
    let limits = ExecutionLimits {
        address_space_bytes: Some(512 * 1024 * 1024),
        ..ExecutionLimits::run_defaults()
    };
    let sandbox = sandbox_with(root.path(), limits);

    let result = sandbox
        .execute(&ExecutionRequest::new(TWO_GIB_FILL), &CancelToken::new())
        .unwrap();

    assert_eq!(result.status, ExecutionStatus::ResourceLimitExceeded, "{:?}", result);
}

#[test]
fn test_background_child_is_killed_with_its_run() {
    require_gxx!();
    let root = tempfile::tempdir().unwrap();
    let sandbox = sandbox(root.path());
    let source = r#"
#include <cstdio>
#include <unistd.h>
int main() {
    pid_t pid = fork();
    if (pid == 0) {
        close(1);
        close(2);
        sleep(60);
        return 0;
    }
    std::printf("%d\n", (int)pid);
    return 0;
}
"#;

    let result = sandbox
        .execute(&ExecutionRequest::new(source), &CancelToken::new())
        .unwrap();

    assert_eq!(result.status, ExecutionStatus::Success);
    // a refused fork prints -1 and leaves nothing to check
    let pid: i32 = result.stdout.trim().parse().unwrap();
    assert!(!is_alive(pid), "background child {} outlived the run", pid);
    assert!(processes_under(root.path()).is_empty());
}

#[test]
fn test_detached_grandchild_is_killed_with_its_run() {
    require_gxx!();
    let root = tempfile::tempdir().unwrap();
    let sandbox = sandbox(root.path());
    // The grandchild leaves the session and is orphaned before main returns.
    let source = r#"
#include <cstdio>
#include <unistd.h>
int main() {
    int fds[2];
    if (pipe(fds) != 0) return 1;
    if (fork() == 0) {
        if (fork() == 0) {
            setsid();
            close(1);
            close(2);
            int me = getpid();
            if (write(fds[1], &me, sizeof me) != sizeof me) _exit(1);
            sleep(60);
        }
        _exit(0);
    }
    close(fds[1]);
    int pid = -1;
    if (read(fds[0], &pid, sizeof pid) != sizeof pid) pid = -1;
    std::printf("%d\n", pid);
    return 0;
}
"#;

    let result = sandbox
        .execute(&ExecutionRequest::new(source), &CancelToken::new())
        .unwrap();

    assert_eq!(result.status, ExecutionStatus::Success, "{:?}", result);
    let pid: i32 = result.stdout.trim().parse().unwrap();
    assert!(!is_alive(pid), "detached grandchild {} outlived the run", pid);
    assert!(processes_under(root.path()).is_empty());
}

#[test]
fn test_fork_bomb_is_stopped_and_leaves_nothing() {
    require_gxx!();
    let root = tempfile::tempdir().unwrap();
    let limits = ExecutionLimits {
        wall_time_ms: 2_000,
        cpu_time_ms: 1_000,
        ..ExecutionLimits::run_defaults()
    };
    let sandbox = sandbox_with(root.path(), limits);
    let source = "#include <unistd.h>\nint main(){ for(;;){ if (fork() == 0) pause(); } }";

    let start = Instant::now();
    let result = sandbox
        .execute(&ExecutionRequest::new(source), &CancelToken::new())
        .unwrap();

    assert_ne!(result.status, ExecutionStatus::Success);
    assert!(start.elapsed().as_secs() < 30);
    assert!(processes_under(root.path()).is_empty());
    assert_eq!(leftover_entries(root.path()), 0);
}
