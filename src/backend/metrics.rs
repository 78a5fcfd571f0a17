//! Resource metrics derived from the engine's raw stats sample.

use crate::container::ContainerStats;
use chrono::Utc;
use serde::Deserialize;
use std::collections::HashMap;

/// The subset of a Docker stats sample used for metrics.
///
/// Field names follow the Engine API. Everything is optional because the
/// engine omits sections for stopped containers and on some platforms.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawStats {
    #[serde(default)]
    pub cpu_stats: Option<CpuStats>,
    #[serde(default)]
    pub precpu_stats: Option<CpuStats>,
    #[serde(default)]
    pub memory_stats: Option<MemoryStats>,
    #[serde(default)]
    pub networks: Option<HashMap<String, NetworkStats>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CpuStats {
    #[serde(default)]
    pub cpu_usage: Option<CpuUsage>,
    #[serde(default)]
    pub system_cpu_usage: Option<u64>,
    #[serde(default)]
    pub online_cpus: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CpuUsage {
    #[serde(default)]
    pub total_usage: Option<u64>,
    #[serde(default)]
    pub percpu_usage: Option<Vec<u64>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MemoryStats {
    #[serde(default)]
    pub usage: Option<u64>,
    #[serde(default)]
    pub limit: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NetworkStats {
    #[serde(default)]
    pub rx_bytes: Option<u64>,
    #[serde(default)]
    pub tx_bytes: Option<u64>,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// CPU usage in percent of one core, summed over cores.
///
/// `(Δcontainer / Δsystem) × cpus × 100` between the previous and current
/// sample; 0 when either delta is not positive.
pub fn cpu_percent(raw: &RawStats) -> f64 {
    let (Some(cur), Some(pre)) = (raw.cpu_stats.as_ref(), raw.precpu_stats.as_ref()) else {
        return 0.0;
    };
    let cur_usage = cur.cpu_usage.as_ref();
    let total = cur_usage.and_then(|u| u.total_usage).unwrap_or(0) as f64;
    let pre_total = pre
        .cpu_usage
        .as_ref()
        .and_then(|u| u.total_usage)
        .unwrap_or(0) as f64;
    let system = cur.system_cpu_usage.unwrap_or(0) as f64;
    let pre_system = pre.system_cpu_usage.unwrap_or(0) as f64;

    let cpu_delta = total - pre_total;
    let system_delta = system - pre_system;
    if cpu_delta <= 0.0 || system_delta <= 0.0 {
        return 0.0;
    }

    let cpus = cur
        .online_cpus
        .filter(|n| *n > 0)
        .or_else(|| {
            cur_usage
                .and_then(|u| u.percpu_usage.as_ref())
                .map(|v| v.len() as u64)
                .filter(|n| *n > 0)
        })
        .unwrap_or(1) as f64;

    round2(((cpu_delta / system_delta) * cpus * 100.0).max(0.0))
}

pub fn memory_percent(usage: u64, limit: u64) -> f64 {
    if limit == 0 {
        return 0.0;
    }
    round2(usage as f64 / limit as f64 * 100.0)
}

/// Build a [`ContainerStats`] snapshot from one raw sample.
pub fn to_stats(container_id: &str, raw: &RawStats) -> ContainerStats {
    let usage = raw.memory_stats.as_ref().and_then(|m| m.usage).unwrap_or(0);
    let limit = raw.memory_stats.as_ref().and_then(|m| m.limit).unwrap_or(0);

    let (rx, tx) = raw
        .networks
        .as_ref()
        .map(|nets| {
            nets.values().fold((0u64, 0u64), |(rx, tx), n| {
                (
                    rx.saturating_add(n.rx_bytes.unwrap_or(0)),
                    tx.saturating_add(n.tx_bytes.unwrap_or(0)),
                )
            })
        })
        .unwrap_or((0, 0));

    ContainerStats {
        container_id: container_id.to_string(),
        cpu_percent: cpu_percent(raw),
        memory_usage: usage,
        memory_limit: limit,
        memory_percent: memory_percent(usage, limit),
        network_rx_bytes: rx,
        network_tx_bytes: tx,
        timestamp: Utc::now(),
    }
}

/// Human-readable byte count, base 1024, up to two decimals: `1.5 KB`.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    if bytes == 0 {
        return "0 B".to_string();
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    let rounded = round2(value);
    // Trim trailing zeros the way a float-to-string would: 1.50 -> 1.5, 2.00 -> 2
    let text = format!("{:.2}", rounded);
    let text = text.trim_end_matches('0').trim_end_matches('.');
    format!("{} {}", text, UNITS[unit])
}
