use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;
use puosu_types::api::{ProcessHealth, SettlementKind, SettlementSummary};
use std::sync::atomic::AtomicU64;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use sysinfo::{Pid, ProcessesToUpdate, System};

use crate::Function;

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct FunctionLabels {
    function: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct SettlementLabels {
    kind: String,
}

type LatencyFamily = Family<FunctionLabels, Histogram, fn() -> Histogram>;

fn latency_histogram() -> Histogram {
    // 1ms .. ~16s
    Histogram::new(exponential_buckets(1.0, 2.0, 15))
}

/// Per-function invocation counters plus settlement outcomes.
pub struct FunctionMetrics {
    registry: Registry,
    invocations: Family<FunctionLabels, Counter<u64, AtomicU64>>,
    failures: Family<FunctionLabels, Counter<u64, AtomicU64>>,
    latency_ms: LatencyFamily,
    settlements: Family<SettlementLabels, Counter<u64, AtomicU64>>,
    settled_cents: Family<SettlementLabels, Counter<u64, AtomicU64>>,
    fee_cents: Counter<u64, AtomicU64>,
    process_rss_bytes: Gauge<u64, AtomicU64>,
    process_cpu_percent: Gauge<f64, AtomicU64>,
}

impl Default for FunctionMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl FunctionMetrics {
    pub fn new() -> Self {
        let mut registry = Registry::with_prefix("puosu");
        let invocations = Family::<FunctionLabels, Counter<u64, AtomicU64>>::default();
        let failures = Family::<FunctionLabels, Counter<u64, AtomicU64>>::default();
        let latency_ms: LatencyFamily = Family::new_with_constructor(latency_histogram);
        let settlements = Family::<SettlementLabels, Counter<u64, AtomicU64>>::default();
        let settled_cents = Family::<SettlementLabels, Counter<u64, AtomicU64>>::default();
        let fee_cents = Counter::<u64, AtomicU64>::default();
        let process_rss_bytes = Gauge::<u64, AtomicU64>::default();
        let process_cpu_percent = Gauge::<f64, AtomicU64>::default();

        registry.register(
            "function_invocations",
            "Function invocations by name.",
            invocations.clone(),
        );
        registry.register(
            "function_failures",
            "Function invocations that returned a failure envelope.",
            failures.clone(),
        );
        registry.register(
            "function_latency_ms",
            "Function latency in milliseconds.",
            latency_ms.clone(),
        );
        registry.register(
            "settlements",
            "Settled units by outcome.",
            settlements.clone(),
        );
        registry.register(
            "settled_cents",
            "Cents moved to participants by settlement outcome.",
            settled_cents.clone(),
        );
        registry.register(
            "platform_fee_cents",
            "Cents retained by the platform account.",
            fee_cents.clone(),
        );
        registry.register(
            "process_rss_bytes",
            "Resident set size in bytes.",
            process_rss_bytes.clone(),
        );
        registry.register(
            "process_cpu_percent",
            "Process CPU usage percentage.",
            process_cpu_percent.clone(),
        );

        Self {
            registry,
            invocations,
            failures,
            latency_ms,
            settlements,
            settled_cents,
            fee_cents,
            process_rss_bytes,
            process_cpu_percent,
        }
    }

    pub fn record_invocation(&self, function: Function, elapsed: Duration, ok: bool) {
        let labels = FunctionLabels {
            function: function.as_str().to_string(),
        };
        self.invocations.get_or_create(&labels).inc();
        if !ok {
            self.failures.get_or_create(&labels).inc();
        }
        self.latency_ms
            .get_or_create(&labels)
            .observe(elapsed.as_secs_f64() * 1_000.0);
    }

    pub fn record_settlement(&self, summary: &SettlementSummary) {
        let kind = match summary.kind {
            SettlementKind::Paid => "paid",
            SettlementKind::Refunded => "refunded",
        };
        let labels = SettlementLabels {
            kind: kind.to_string(),
        };
        self.settlements.get_or_create(&labels).inc();
        let moved: i64 = summary.lines.iter().map(|line| line.amount.cents()).sum();
        self.settled_cents
            .get_or_create(&labels)
            .inc_by(moved.max(0) as u64);
        self.fee_cents.inc_by(summary.fee.cents().max(0) as u64);
    }

    pub fn record_process(&self, process: &ProcessHealth) {
        self.process_rss_bytes.set(process.rss_bytes);
        self.process_cpu_percent.set(process.cpu_usage_percent);
    }

    pub fn invocations(&self, function: Function) -> u64 {
        self.invocations
            .get_or_create(&FunctionLabels {
                function: function.as_str().to_string(),
            })
            .get()
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        if let Err(err) = prometheus_client::encoding::text::encode(&mut out, &self.registry) {
            tracing::warn!(?err, "failed to encode metrics");
        }
        out
    }
}

/// Resident memory and CPU of this process, sampled on demand.
pub struct SystemMetrics {
    system: Mutex<System>,
    pid: Pid,
}

impl Default for SystemMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemMetrics {
    pub fn new() -> Self {
        let system = System::new();
        let pid = Pid::from_u32(std::process::id());
        Self {
            system: Mutex::new(system),
            pid,
        }
    }

    pub fn snapshot(&self) -> ProcessHealth {
        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        system.refresh_cpu_usage();
        system.refresh_processes(ProcessesToUpdate::Some(&[self.pid]), false);

        if let Some(process) = system.process(self.pid) {
            ProcessHealth {
                rss_bytes: process.memory().saturating_mul(1024),
                virtual_bytes: process.virtual_memory().saturating_mul(1024),
                cpu_usage_percent: process.cpu_usage() as f64,
            }
        } else {
            ProcessHealth {
                rss_bytes: 0,
                virtual_bytes: 0,
                cpu_usage_percent: 0.0,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use puosu_types::api::PayoutLine;
    use puosu_types::Money;
    use uuid::Uuid;

    #[test]
    fn test_render_includes_function_counters() {
        let metrics = FunctionMetrics::new();
        metrics.record_invocation(Function::SimRunner, Duration::from_millis(3), true);
        metrics.record_invocation(Function::SimRunner, Duration::from_millis(5), false);
        assert_eq!(metrics.invocations(Function::SimRunner), 2);
        assert_eq!(metrics.invocations(Function::VerifyMatch), 0);

        let text = metrics.render();
        assert!(text.contains("puosu_function_invocations_total{function=\"sim-runner\"} 2"));
        assert!(text.contains("puosu_function_failures_total{function=\"sim-runner\"} 1"));
    }

    #[test]
    fn test_settlement_counters_track_lines_and_fee() {
        let metrics = FunctionMetrics::new();
        metrics.record_settlement(&SettlementSummary {
            unit_id: Uuid::new_v4(),
            kind: SettlementKind::Paid,
            gross: Money::from_units(20),
            fee: Money::from_units(2),
            lines: vec![PayoutLine {
                user_id: Uuid::new_v4(),
                amount: Money::from_units(18),
                placement: Some(1),
            }],
            winner_id: None,
            reason: None,
        });
        let text = metrics.render();
        assert!(text.contains("puosu_settlements_total{kind=\"paid\"} 1"));
        assert!(text.contains("puosu_settled_cents_total{kind=\"paid\"} 1800"));
        assert!(text.contains("puosu_platform_fee_cents_total 200"));
    }
}
