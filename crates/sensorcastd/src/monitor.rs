//! Periodic health report for the relay.
//!
//! Each tick samples the daemon's resident memory and CPU share, then
//! walks the registry. Streams that dropped readings or evicted
//! subscribers since the previous tick get a warning of their own.

use std::process;
use std::sync::Arc;
use std::time::Duration;

use sysinfo::{Pid, System};
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::registry::StreamRegistry;
use crate::stream::StreamStats;

/// Resident memory above which the report is logged as a warning.
pub const MEMORY_WARN_MB: u64 = 100;

/// Time between reports.
pub const REPORT_INTERVAL: Duration = Duration::from_secs(60);

/// Resource usage of the daemon at one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ResourceSample {
    pub rss_mb: u64,
    pub cpu_percent: f32,
}

impl ResourceSample {
    /// True when resident memory exceeds `limit_mb`.
    pub fn over_budget(&self, limit_mb: u64) -> bool {
        self.rss_mb > limit_mb
    }
}

/// Reads the daemon's own usage through sysinfo.
pub struct SelfProbe {
    system: System,
    pid: Pid,
}

impl SelfProbe {
    pub fn new() -> Self {
        Self {
            system: System::new(),
            pid: Pid::from_u32(process::id()),
        }
    }

    /// Takes a sample. CPU share is measured since the previous call, so
    /// the first sample reads zero.
    pub fn sample(&mut self) -> ResourceSample {
        self.system.refresh_all();

        let (rss_bytes, cpu_percent) = self
            .system
            .process(self.pid)
            .map(|p| (p.memory(), p.cpu_usage()))
            .unwrap_or_default();

        ResourceSample {
            rss_mb: rss_bytes / (1024 * 1024),
            cpu_percent,
        }
    }
}

impl Default for SelfProbe {
    fn default() -> Self {
        Self::new()
    }
}

/// Readings lost on one stream between two ticks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct StreamLoss {
    dropped: u64,
    evicted: u64,
}

impl StreamLoss {
    fn is_empty(&self) -> bool {
        self.dropped == 0 && self.evicted == 0
    }
}

/// Remembers each stream's loss counters from the previous tick.
#[derive(Debug, Default)]
struct LossTracker {
    previous: Vec<StreamStats>,
}

impl LossTracker {
    /// Loss per stream since the previous call, in registry order.
    fn since_last(&mut self, current: &[StreamStats]) -> Vec<StreamLoss> {
        self.previous.resize(current.len(), StreamStats::default());
        let losses = current
            .iter()
            .zip(&self.previous)
            .map(|(now, before)| StreamLoss {
                dropped: now.dropped.saturating_sub(before.dropped),
                evicted: now.evicted.saturating_sub(before.evicted),
            })
            .collect();
        self.previous = current.to_vec();
        losses
    }
}

/// Spawns the reporting task; it stops when `cancel_token` fires.
pub fn spawn_monitor_task(
    registry: Arc<StreamRegistry>,
    cancel_token: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut probe = SelfProbe::new();
        let mut losses = LossTracker::default();
        let mut tick = interval(REPORT_INTERVAL);

        // Baseline for the first CPU reading.
        probe.sample();
        info!(
            interval_secs = REPORT_INTERVAL.as_secs(),
            memory_warn_mb = MEMORY_WARN_MB,
            "Monitor started"
        );

        loop {
            tokio::select! {
                biased;

                _ = cancel_token.cancelled() => break,

                _ = tick.tick() => {
                    report_resources(probe.sample());
                    report_streams(&registry, &mut losses);
                }
            }
        }

        debug!("Monitor stopped");
    })
}

fn report_resources(sample: ResourceSample) {
    let cpu = format!("{:.1}", sample.cpu_percent);
    if sample.over_budget(MEMORY_WARN_MB) {
        warn!(
            rss_mb = sample.rss_mb,
            limit_mb = MEMORY_WARN_MB,
            cpu_percent = %cpu,
            "Relay memory above limit"
        );
    } else {
        info!(rss_mb = sample.rss_mb, cpu_percent = %cpu, "Relay resources");
    }
}

fn report_streams(registry: &StreamRegistry, losses: &mut LossTracker) {
    let named = registry.stats();
    let current: Vec<StreamStats> = named.iter().map(|(_, s)| *s).collect();

    for ((sensor, stats), loss) in named.iter().zip(losses.since_last(&current)) {
        if loss.is_empty() {
            debug!(
                sensor = %sensor,
                subscribers = stats.subscribers,
                published = stats.published,
                "Stream healthy"
            );
        } else {
            warn!(
                sensor = %sensor,
                subscribers = stats.subscribers,
                dropped = loss.dropped,
                evicted = loss.evicted,
                "Slow subscribers are losing readings"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(dropped: u64, evicted: u64) -> StreamStats {
        StreamStats {
            dropped,
            evicted,
            ..StreamStats::default()
        }
    }

    #[test]
    fn test_loss_is_measured_between_ticks() {
        let mut tracker = LossTracker::default();
        assert_eq!(
            tracker.since_last(&[stats(0, 0), stats(3, 1)]),
            vec![
                StreamLoss::default(),
                StreamLoss {
                    dropped: 3,
                    evicted: 1
                }
            ]
        );

        let second = tracker.since_last(&[stats(2, 0), stats(3, 1)]);
        assert_eq!(second[0].dropped, 2);
        assert!(second[1].is_empty());
    }

    #[test]
    fn test_memory_budget() {
        let sample = ResourceSample {
            rss_mb: 120,
            cpu_percent: 0.0,
        };
        assert!(sample.over_budget(MEMORY_WARN_MB));
        assert!(!sample.over_budget(200));
    }

    #[test]
    fn test_probe_samples_own_process() {
        let mut probe = SelfProbe::new();
        let sample = probe.sample();
        assert!(!sample.over_budget(u64::MAX));
    }
}
