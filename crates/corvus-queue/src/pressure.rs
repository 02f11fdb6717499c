use std::sync::atomic::{AtomicBool, Ordering};

static WARNED: AtomicBool = AtomicBool::new(false);

/// True when the host looks loaded enough that queue concurrency should be
/// reduced: 1-minute load average per CPU above 0.8, or free memory below
/// 20%. Degrades to `false` (no pressure, no reduction) when `/proc` isn't
/// available, which is the case off Linux and in some sandboxes — logged
/// once rather than on every 30s sample.
pub fn under_pressure() -> bool {
    let load = read_load_average();
    let mem = read_free_memory_ratio();
    if load.is_none() && mem.is_none() {
        if !WARNED.swap(true, Ordering::Relaxed) {
            tracing::warn!(
                "unable to read /proc for load/memory sampling; dynamic queue concurrency is disabled"
            );
        }
        return false;
    }
    load.map(|l| l > 0.8).unwrap_or(false) || mem.map(|m| m < 0.20).unwrap_or(false)
}

fn read_load_average() -> Option<f64> {
    let raw = std::fs::read_to_string("/proc/loadavg").ok()?;
    let one_min: f64 = raw.split_whitespace().next()?.parse().ok()?;
    let cpus = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1) as f64;
    Some(one_min / cpus)
}

fn read_free_memory_ratio() -> Option<f64> {
    let raw = std::fs::read_to_string("/proc/meminfo").ok()?;
    let mut total = None;
    let mut available = None;
    for line in raw.lines() {
        if let Some(v) = line.strip_prefix("MemTotal:") {
            total = parse_kb(v);
        } else if let Some(v) = line.strip_prefix("MemAvailable:") {
            available = parse_kb(v);
        }
    }
    match (total, available) {
        (Some(t), Some(a)) if t > 0.0 => Some(a / t),
        _ => None,
    }
}

fn parse_kb(s: &str) -> Option<f64> {
    s.trim().strip_suffix("kB").unwrap_or(s.trim()).trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_kb_strips_unit_suffix() {
        assert_eq!(parse_kb("   16384000 kB"), Some(16384000.0));
    }

    #[test]
    fn parse_kb_rejects_garbage() {
        assert_eq!(parse_kb("not a number"), None);
    }

    #[test]
    fn under_pressure_never_panics_regardless_of_host() {
        let _ = under_pressure();
    }
}
