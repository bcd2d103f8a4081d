// End-to-end latency of one sandbox call: workspace, g++ compile, run, cleanup.
// Skips when the configured compiler is missing.

use std::time::{Duration, Instant};
use tutorbox::config::loader::{SandboxConfig, ToolchainConfig};
use tutorbox::exec::sandbox::{CodeExecutor, ExecutionRequest, Sandbox};
use tutorbox::kernel::signal::CancelToken;

const ITERATIONS: usize = 20;
const WARMUP_ITERATIONS: usize = 2;

struct LatencyStats {
    p50: Duration,
    p95: Duration,
    min: Duration,
    max: Duration,
    mean: Duration,
}

impl LatencyStats {
    fn from_samples(mut samples: Vec<Duration>) -> Self {
        samples.sort();
        let len = samples.len();
        let sum: Duration = samples.iter().sum();

        Self {
            p50: samples[len / 2],
            p95: samples[((len as f64 * 0.95) as usize).min(len - 1)],
            min: samples[0],
            max: samples[len - 1],
            mean: sum / len as u32,
        }
    }

    fn print(&self, label: &str) {
        println!("\n=== {} ===", label);
        println!("  p50:  {:?}", self.p50);
        println!("  p95:  {:?}", self.p95);
        println!("  min:  {:?}", self.min);
        println!("  max:  {:?}", self.max);
        println!("  mean: {:?}", self.mean);
    }
}

fn measure(sandbox: &Sandbox, label: &str, source: &str, stdin: Option<&str>) {
    let mut request = ExecutionRequest::new(source);
    if let Some(stdin) = stdin {
        request = request.with_stdin(stdin);
    }
    let cancel = CancelToken::new();

    for _ in 0..WARMUP_ITERATIONS {
        let _ = sandbox.execute(&request, &cancel);
    }

    let mut samples = Vec::with_capacity(ITERATIONS);
    for _ in 0..ITERATIONS {
        let start = Instant::now();
        match sandbox.execute(&request, &cancel) {
            Ok(result) if result.is_success() => samples.push(start.elapsed()),
            Ok(result) => {
                println!("{}: unexpected status {}", label, result.status);
                return;
            }
            Err(e) => {
                println!("{}: {}", label, e);
                return;
            }
        }
    }
    LatencyStats::from_samples(samples).print(label);
}

fn main() {
    let toolchain = ToolchainConfig::default();
    if !toolchain.compiler.exists() {
        println!("{} not found; skipping", toolchain.compiler.display());
        return;
    }

    let root = std::env::temp_dir().join(format!("tutorbox-bench-{}", std::process::id()));
    let config = SandboxConfig {
        workspace_root: root.clone(),
        ..SandboxConfig::default()
    };
    let sandbox = match Sandbox::new(config, toolchain) {
        Ok(sandbox) => sandbox,
        Err(e) => {
            println!("cannot create sandbox: {}", e);
            return;
        }
    };
    println!("network isolation: {}", sandbox.isolation().describe());

    measure(&sandbox, "return 0", "int main(){return 0;}", None);
    measure(
        &sandbox,
        "hello world",
        "#include <iostream>\nint main(){std::cout<<\"hello\\n\";}",
        None,
    );
    measure(
        &sandbox,
        "factorial with stdin",
        "#include <iostream>\nint main(){long long n,r=1;std::cin>>n;for(long long i=2;i<=n;++i)r*=i;std::cout<<r<<'\\n';}",
        Some("10\n"),
    );

    let _ = std::fs::remove_dir_all(&root);
}
