//! Prometheus text exposition format.
//!
//! Renders a `ClusterReport` for scraping by a Prometheus server or a
//! compatible agent.

use std::fmt::Write;

use forkgrid_core::{ClusterReport, HealthState, WorkerReport};

/// Render a cluster report into Prometheus text format.
///
/// Cluster-level gauges carry no labels; per-worker gauges carry a
/// `worker` label.
pub fn render_prometheus(report: &ClusterReport) -> String {
    let mut out = String::new();
    let fleet = &report.fleet;
    let healthy = u8::from(report.health.status == HealthState::Healthy);

    gauge(&mut out, "forkgrid_cluster_healthy", "1 when the cluster health predicate holds.", healthy);
    gauge(&mut out, "forkgrid_workers_total", "Serving workers.", report.health.workers.total);
    gauge(&mut out, "forkgrid_workers_healthy", "Online workers with a fresh heartbeat.", report.health.workers.healthy);
    counter(&mut out, "forkgrid_requests_total", "Requests reported by workers since the master started.", fleet.total_requests);
    counter(&mut out, "forkgrid_errors_total", "Failed requests reported by workers since the master started.", fleet.total_errors);
    gauge(&mut out, "forkgrid_error_rate", "Error rate (0.0-1.0).", format!("{:.4}", fleet.error_rate));
    gauge(&mut out, "forkgrid_response_time_ms", "Request-weighted mean response time.", format!("{:.2}", fleet.avg_response_time));
    counter(&mut out, "forkgrid_worker_crashes_total", "Abnormal worker exits.", fleet.worker_crashes);
    counter(&mut out, "forkgrid_worker_restarts_total", "Worker restarts.", fleet.worker_restarts);

    per_worker(&mut out, "forkgrid_worker_cpu_percent", "Worker CPU usage.", &report.workers, |w| {
        format!("{:.2}", w.stats.cpu_usage)
    });
    per_worker(&mut out, "forkgrid_worker_memory_percent", "Worker memory usage.", &report.workers, |w| {
        format!("{:.2}", w.stats.memory_usage)
    });
    per_worker(&mut out, "forkgrid_worker_memory_bytes", "Worker resident memory.", &report.workers, |w| {
        w.stats.memory_bytes.to_string()
    });
    per_worker(&mut out, "forkgrid_worker_requests", "Requests handled by the worker.", &report.workers, |w| {
        w.stats.requests.to_string()
    });
    per_worker(&mut out, "forkgrid_worker_heartbeat_age_ms", "Time since the last heartbeat.", &report.workers, |w| {
        w.heartbeat_age_ms.to_string()
    });

    out
}

fn gauge(out: &mut String, name: &str, help: &str, value: impl std::fmt::Display) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} gauge");
    let _ = writeln!(out, "{name} {value}");
}

fn counter(out: &mut String, name: &str, help: &str, value: u64) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} counter");
    let _ = writeln!(out, "{name} {value}");
}

fn per_worker(
    out: &mut String,
    name: &str,
    help: &str,
    workers: &[WorkerReport],
    value: impl Fn(&WorkerReport) -> String,
) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} gauge");
    for w in workers {
        let _ = writeln!(out, "{name}{{worker=\"{}\"}} {}", w.record.id, value(w));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forkgrid_core::{WorkerRecord, WorkerStats};
    use tokio::time::Instant;

    fn report_with_worker() -> ClusterReport {
        let mut report = ClusterReport::empty();
        let mut stats = WorkerStats::new(Instant::now());
        stats.cpu_usage = 12.5;
        stats.memory_bytes = 256_000_000;
        stats.requests = 7;
        report.workers.push(WorkerReport {
            record: WorkerRecord::new(3, Some(100), 0),
            stats,
            heartbeat_age_ms: 1500,
        });
        report.fleet.total_requests = 7;
        report.fleet.error_rate = 0.012;
        report
    }

    #[test]
    fn render_empty() {
        let output = render_prometheus(&ClusterReport::empty());
        assert!(output.contains("# TYPE forkgrid_workers_total gauge"));
        assert!(output.contains("forkgrid_cluster_healthy 0"));
        assert!(output.contains("# HELP forkgrid_worker_cpu_percent"));
    }

    #[test]
    fn render_worker_labels() {
        let output = render_prometheus(&report_with_worker());
        assert!(output.contains("forkgrid_worker_cpu_percent{worker=\"3\"} 12.50"));
        assert!(output.contains("forkgrid_worker_memory_bytes{worker=\"3\"} 256000000"));
        assert!(output.contains("forkgrid_worker_requests{worker=\"3\"} 7"));
        assert!(output.contains("forkgrid_worker_heartbeat_age_ms{worker=\"3\"} 1500"));
        assert!(output.contains("forkgrid_requests_total 7"));
        assert!(output.contains("forkgrid_error_rate 0.0120"));
    }

    #[test]
    fn render_format_is_prometheus_compatible() {
        let output = render_prometheus(&report_with_worker());
        for line in output.lines() {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut parts = line.rsplitn(2, ' ');
            let value = parts.next().unwrap();
            let name = parts.next().unwrap();
            assert!(value.parse::<f64>().is_ok(), "bad value in: {line}");
            assert!(name.starts_with("forkgrid_"), "bad name in: {line}");
        }
    }
}
