use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::RwLock;

use chrono::DateTime;
use chrono::Utc;

/// Response-time window kept per gateway.
const RESPONSE_WINDOW: usize = 100;

const HEALTHY_SUCCESS_RATE: f64 = 0.95;
const DEGRADED_SUCCESS_RATE: f64 = 0.80;
const HEALTHY_AVG_MS: f64 = 2_000.0;
const DEGRADED_AVG_MS: f64 = 5_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GatewayHealth {
    pub gateway: String,
    pub total_requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub success_rate: f64,
    pub avg_response_ms: f64,
    pub p95_response_ms: u64,
    pub health_score: f64,
    pub status: GatewayStatus,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct GatewayStats {
    response_times: VecDeque<u64>,
    successes: u64,
    failures: u64,
    last_success_at: Option<DateTime<Utc>>,
    last_failure_at: Option<DateTime<Utc>>,
}

impl GatewayStats {
    fn push_response_time(&mut self, response_time_ms: u64) {
        if self.response_times.len() == RESPONSE_WINDOW {
            self.response_times.pop_front();
        }
        self.response_times.push_back(response_time_ms);
    }

    fn avg_response_ms(&self) -> f64 {
        if self.response_times.is_empty() {
            return 0.0;
        }
        let total: u64 = self.response_times.iter().sum();
        total as f64 / self.response_times.len() as f64
    }

    fn p95_response_ms(&self) -> u64 {
        if self.response_times.is_empty() {
            return 0;
        }
        let mut sorted: Vec<u64> = self.response_times.iter().copied().collect();
        sorted.sort_unstable();
        let rank = ((sorted.len() as f64) * 0.95).ceil() as usize;
        sorted[rank.saturating_sub(1).min(sorted.len() - 1)]
    }

    fn success_rate(&self) -> f64 {
        let total = self.successes + self.failures;
        if total == 0 {
            // A gateway with no history routes as healthy until proven
            // otherwise.
            return 1.0;
        }
        self.successes as f64 / total as f64
    }
}

/// Per-process gateway metrics. Mutations take a fine-grained lock per
/// gateway; replicas keep independent metrics and nothing is persisted.
#[derive(Default)]
pub struct GatewayHealthTracker {
    gateways: RwLock<HashMap<String, Arc<Mutex<GatewayStats>>>>,
}

impl GatewayHealthTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, gateway: &str) {
        if let Ok(mut guard) = self.gateways.write() {
            guard
                .entry(gateway.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(GatewayStats::default())));
        }
    }

    fn stats_for(&self, gateway: &str) -> Option<Arc<Mutex<GatewayStats>>> {
        let guard = self.gateways.read().ok()?;
        guard.get(gateway).cloned()
    }

    pub fn record_success(&self, gateway: &str, response_time_ms: u64) {
        self.register(gateway);
        if let Some(stats) = self.stats_for(gateway)
            && let Ok(mut stats) = stats.lock()
        {
            stats.successes += 1;
            stats.last_success_at = Some(Utc::now());
            stats.push_response_time(response_time_ms);
        }
    }

    pub fn record_failure(&self, gateway: &str, response_time_ms: u64) {
        self.register(gateway);
        if let Some(stats) = self.stats_for(gateway)
            && let Ok(mut stats) = stats.lock()
        {
            stats.failures += 1;
            stats.last_failure_at = Some(Utc::now());
            stats.push_response_time(response_time_ms);
        }
    }

    #[must_use]
    pub fn snapshot(&self, gateway: &str) -> Option<GatewayHealth> {
        let stats = self.stats_for(gateway)?;
        let stats = stats.lock().ok()?;

        let success_rate = stats.success_rate();
        let avg_response_ms = stats.avg_response_ms();
        let health_score = health_score(success_rate, avg_response_ms);
        let status = if success_rate >= HEALTHY_SUCCESS_RATE && avg_response_ms < HEALTHY_AVG_MS {
            GatewayStatus::Healthy
        } else if success_rate >= DEGRADED_SUCCESS_RATE && avg_response_ms < DEGRADED_AVG_MS {
            GatewayStatus::Degraded
        } else {
            GatewayStatus::Unhealthy
        };

        Some(GatewayHealth {
            gateway: gateway.to_string(),
            total_requests: stats.successes + stats.failures,
            successes: stats.successes,
            failures: stats.failures,
            success_rate,
            avg_response_ms,
            p95_response_ms: stats.p95_response_ms(),
            health_score,
            status,
            last_success_at: stats.last_success_at,
            last_failure_at: stats.last_failure_at,
        })
    }

    #[must_use]
    pub fn snapshots(&self) -> Vec<GatewayHealth> {
        let names: Vec<String> = match self.gateways.read() {
            Ok(guard) => guard.keys().cloned().collect(),
            Err(_) => return Vec::new(),
        };
        let mut snapshots = names
            .iter()
            .filter_map(|name| self.snapshot(name))
            .collect::<Vec<_>>();
        snapshots.sort_by(|a, b| a.gateway.cmp(&b.gateway));
        snapshots
    }
}

/// 70 points for the success rate plus up to 30 for responsiveness: full
/// marks at <= 1 s average, decaying linearly to zero at 5 s.
#[must_use]
pub(crate) fn health_score(success_rate: f64, avg_response_ms: f64) -> f64 {
    let response_score = if avg_response_ms <= 1_000.0 {
        30.0
    } else if avg_response_ms >= 5_000.0 {
        0.0
    } else {
        30.0 * (5_000.0 - avg_response_ms) / 4_000.0
    };
    70.0 * success_rate + response_score
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn fresh_gateway_scores_full_marks() {
        let tracker = GatewayHealthTracker::new();
        tracker.register("razorpay");
        let health = tracker.snapshot("razorpay").expect("snapshot");
        assert_eq!(health.total_requests, 0);
        assert_eq!(health.health_score, 100.0);
        assert_eq!(health.status, GatewayStatus::Healthy);
    }

    #[test]
    fn score_decays_linearly_with_latency() {
        assert_eq!(health_score(1.0, 500.0), 100.0);
        assert_eq!(health_score(1.0, 1_000.0), 100.0);
        assert_eq!(health_score(1.0, 3_000.0), 85.0);
        assert_eq!(health_score(1.0, 5_000.0), 70.0);
        assert_eq!(health_score(1.0, 9_000.0), 70.0);
        assert_eq!(health_score(0.5, 500.0), 65.0);
    }

    #[test]
    fn status_thresholds_follow_success_rate_and_latency() {
        let tracker = GatewayHealthTracker::new();
        for _ in 0..99 {
            tracker.record_success("payu", 100);
        }
        tracker.record_failure("payu", 100);
        let health = tracker.snapshot("payu").expect("snapshot");
        assert_eq!(health.success_rate, 0.99);
        assert_eq!(health.status, GatewayStatus::Healthy);

        let tracker = GatewayHealthTracker::new();
        for _ in 0..9 {
            tracker.record_success("payu", 100);
        }
        tracker.record_failure("payu", 100);
        let health = tracker.snapshot("payu").expect("snapshot");
        assert_eq!(health.success_rate, 0.9);
        assert_eq!(health.status, GatewayStatus::Degraded);

        let tracker = GatewayHealthTracker::new();
        for _ in 0..2 {
            tracker.record_success("payu", 100);
        }
        for _ in 0..2 {
            tracker.record_failure("payu", 100);
        }
        let health = tracker.snapshot("payu").expect("snapshot");
        assert_eq!(health.status, GatewayStatus::Unhealthy);
    }

    #[test]
    fn slow_gateway_is_degraded_despite_successes() {
        let tracker = GatewayHealthTracker::new();
        for _ in 0..10 {
            tracker.record_success("ccavenue", 3_000);
        }
        let health = tracker.snapshot("ccavenue").expect("snapshot");
        assert_eq!(health.success_rate, 1.0);
        assert_eq!(health.status, GatewayStatus::Degraded);
    }

    #[test]
    fn response_window_keeps_last_hundred() {
        let tracker = GatewayHealthTracker::new();
        // 50 slow calls pushed out by 100 fast ones.
        for _ in 0..50 {
            tracker.record_success("razorpay", 4_000);
        }
        for _ in 0..100 {
            tracker.record_success("razorpay", 100);
        }
        let health = tracker.snapshot("razorpay").expect("snapshot");
        assert_eq!(health.avg_response_ms, 100.0);
        assert_eq!(health.total_requests, 150);
    }

    #[test]
    fn p95_reflects_tail_latency() {
        let tracker = GatewayHealthTracker::new();
        for _ in 0..95 {
            tracker.record_success("razorpay", 100);
        }
        for _ in 0..5 {
            tracker.record_success("razorpay", 2_000);
        }
        let health = tracker.snapshot("razorpay").expect("snapshot");
        assert_eq!(health.p95_response_ms, 100);

        tracker.record_success("razorpay", 2_000);
        let health = tracker.snapshot("razorpay").expect("snapshot");
        assert_eq!(health.p95_response_ms, 2_000);
    }

    #[test]
    fn metrics_survive_concurrent_recording() {
        let tracker = Arc::new(GatewayHealthTracker::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let tracker = tracker.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..250 {
                    tracker.record_success("razorpay", 100);
                }
            }));
        }
        for handle in handles {
            handle.join().expect("thread join");
        }
        let health = tracker.snapshot("razorpay").expect("snapshot");
        assert_eq!(health.successes, 2_000);
    }
}
