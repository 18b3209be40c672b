// src/core/metrics_pipeline/parse.rs

//! Parses the container runtime's `stats` text output into numeric
//! quantities, and computes percent-of-limit ratios (spec §4.H).

use crate::core::driver::ContainerStats;
use once_cell::sync::Lazy;
use regex::Regex;

static MEMORY_VALUE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*([0-9]+(?:[.,][0-9]+)?)\s*([a-z]+)?\s*$").unwrap());
static CPU_PERCENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"([0-9]+(?:\.[0-9]+)?)\s*%").unwrap());
static NET_IO: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*([0-9.,]+\s*[a-z]*)\s*/\s*([0-9.,]+\s*[a-z]*)\s*$").unwrap());

/// Parses a memory quantity such as `512MiB`, `1.5 GiB`, or `512,5MiB`
/// (comma-as-decimal-point, spec §4.H) into a byte count.
pub fn parse_memory(text: &str) -> Option<f64> {
    parse_bytes(text)
}

/// Parses a byte quantity with an SI/binary suffix (`B`, `KiB`, `MiB`,
/// `GiB`, `TiB`) into a raw byte count. Accepts a comma as the decimal
/// separator, matching the container runtime's locale-dependent output.
pub fn parse_bytes(text: &str) -> Option<f64> {
    let caps = MEMORY_VALUE.captures(text.trim())?;
    let number_text = caps.get(1)?.as_str().replace(',', ".");
    let number: f64 = number_text.parse().ok()?;
    let unit = caps.get(2).map(|m| m.as_str().to_lowercase()).unwrap_or_default();
    let multiplier = match unit.as_str() {
        "" | "b" => 1.0,
        "kib" | "kb" | "k" => 1024.0,
        "mib" | "mb" | "m" => 1024.0 * 1024.0,
        "gib" | "gb" | "g" => 1024.0 * 1024.0 * 1024.0,
        "tib" | "tb" | "t" => 1024.0 * 1024.0 * 1024.0 * 1024.0,
        _ => return None,
    };
    Some(number * multiplier)
}

/// Computes `used / limit * 100`, clamped to `[0, 100]`, short-circuiting
/// to exactly `0.0` when `used` is exactly zero (spec §4.H: avoids a
/// spurious nonzero percent from floating-point division noise when the
/// container reports no usage at all).
pub fn percent_of_limit(used: f64, limit: f64) -> f64 {
    if used == 0.0 {
        return 0.0;
    }
    if limit <= 0.0 {
        return 0.0;
    }
    (used / limit * 100.0).clamp(0.0, 100.0)
}

/// Converts a host-relative CPU percentage (as reported by the runtime's
/// `stats` call, which can exceed 100% on a multi-core host) into a
/// percentage of the cluster's configured `cpu_cores` limit (spec §4.G,
/// §4.H: both the health engine and the metrics pipeline report this field
/// against the same definition).
pub fn cpu_percent_of_limit(cpu_percent_raw: f64, cpu_cores_limit: f64) -> f64 {
    if cpu_cores_limit > 0.0 && cpu_cores_limit < 1.0 {
        percent_of_limit(cpu_percent_raw, cpu_cores_limit * 100.0)
    } else if cpu_percent_raw == 0.0 {
        0.0
    } else {
        cpu_percent_raw.clamp(0.0, 100.0)
    }
}

/// Parses one line of `docker stats --format "{{.CPUPerc}}|{{.MemUsage}}|{{.NetIO}}|{{.BlockIO}}"`.
pub fn parse_stats_line(line: &str) -> Option<ContainerStats> {
    let parts: Vec<&str> = line.trim().split('|').collect();
    if parts.len() != 4 {
        return None;
    }

    let cpu_percent_raw = CPU_PERCENT
        .captures(parts[0])
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .unwrap_or(0.0);

    let (mem_used_bytes, mem_limit_bytes) = parse_mem_usage(parts[1]).unwrap_or((0, 0));
    let (net_rx_bytes, net_tx_bytes) = parse_io_pair(parts[2]).unwrap_or((0, 0));
    let (block_read_bytes, block_write_bytes) = parse_io_pair(parts[3]).unwrap_or((0, 0));

    Some(ContainerStats {
        cpu_percent_raw,
        mem_used_bytes,
        mem_limit_bytes,
        net_rx_bytes,
        net_tx_bytes,
        block_read_bytes,
        block_write_bytes,
    })
}

fn parse_mem_usage(text: &str) -> Option<(u64, u64)> {
    let (used, limit) = text.split_once('/')?;
    let used_bytes = parse_bytes(used)?;
    let limit_bytes = parse_bytes(limit)?;
    Some((used_bytes as u64, limit_bytes as u64))
}

fn parse_io_pair(text: &str) -> Option<(u64, u64)> {
    let caps = NET_IO.captures(text)?;
    let a = parse_bytes(caps.get(1)?.as_str())?;
    let b = parse_bytes(caps.get(2)?.as_str())?;
    Some((a as u64, b as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mib_suffix() {
        assert_eq!(parse_bytes("512MiB"), Some(512.0 * 1024.0 * 1024.0));
    }

    #[test]
    fn parses_comma_decimal() {
        assert_eq!(parse_bytes("1,5GiB"), Some(1.5 * 1024.0 * 1024.0 * 1024.0));
    }

    #[test]
    fn parses_bare_bytes() {
        assert_eq!(parse_bytes("512B"), Some(512.0));
    }

    #[test]
    fn rejects_unknown_suffix() {
        assert_eq!(parse_bytes("512XB"), None);
    }

    #[test]
    fn percent_of_limit_zero_used_is_exactly_zero() {
        assert_eq!(percent_of_limit(0.0, 512.0), 0.0);
    }

    #[test]
    fn percent_of_limit_clamps_above_limit() {
        assert_eq!(percent_of_limit(600.0, 512.0), 100.0);
    }

    #[test]
    fn cpu_percent_of_limit_scales_by_fractional_core_limit() {
        assert_eq!(cpu_percent_of_limit(25.0, 0.5), 50.0);
    }

    #[test]
    fn cpu_percent_of_limit_passes_through_for_whole_core_limits() {
        assert_eq!(cpu_percent_of_limit(45.0, 2.0), 45.0);
    }

    #[test]
    fn parses_full_stats_line() {
        let line = "12.50%|100MiB / 512MiB|1kB / 2kB|3kB / 4kB";
        let s = parse_stats_line(line).unwrap();
        assert_eq!(s.cpu_percent_raw, 12.5);
        assert_eq!(s.mem_used_bytes, (100.0 * 1024.0 * 1024.0) as u64);
        assert_eq!(s.mem_limit_bytes, (512.0 * 1024.0 * 1024.0) as u64);
    }
}
