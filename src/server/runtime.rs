/// Worker-thread sizing for the tokio runtime, aware of container CPU quotas.
///
/// Detection order:
/// 1. `PROXY_WORKER_THREADS` env var (explicit override, accepts "4" or "4000m")
/// 2. cgroup v2 quota: `/sys/fs/cgroup/cpu.max`
/// 3. Fallback: `std::thread::available_parallelism()` (host CPU count)
///
/// Tokio otherwise sizes its pool off the host CPU count, which over-commits
/// threads when the process is actually confined to a fraction of the host
/// (e.g. 2 cores on a 64-core node).
pub fn worker_thread_count() -> usize {
    if let Ok(raw) = std::env::var("PROXY_WORKER_THREADS") {
        if let Some(cores) = parse_cpu_value(&raw) {
            let threads = cores.max(1);
            tracing::info!(source = "env", threads, "sized worker pool");
            return threads;
        }
    }

    if let Ok(max) = std::fs::read_to_string("/sys/fs/cgroup/cpu.max") {
        if let Some(cores) = parse_cgroup_v2_cpu(&max) {
            let threads = cores.max(1);
            tracing::info!(source = "cgroup_v2", threads, "sized worker pool");
            return threads;
        }
    }

    let threads = std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(1);
    tracing::info!(source = "host", threads, "sized worker pool");
    threads
}

/// Parse a CPU count — either whole cores ("4") or millicores ("4000m").
fn parse_cpu_value(value: &str) -> Option<usize> {
    let value = value.trim();
    if let Some(stripped) = value.strip_suffix('m') {
        stripped.parse::<usize>().ok().map(|m| m / 1000)
    } else {
        value.parse::<usize>().ok()
    }
}

/// Parse cgroup v2 `cpu.max` — format: "quota period" or "max period".
fn parse_cgroup_v2_cpu(content: &str) -> Option<usize> {
    let parts: Vec<&str> = content.split_whitespace().collect();
    if parts.len() < 2 || parts[0] == "max" {
        return None;
    }
    let quota: i64 = parts[0].parse().ok()?;
    let period: i64 = parts[1].parse().ok()?;
    if quota > 0 && period > 0 {
        Some((quota / period) as usize)
    } else {
        None
    }
}
