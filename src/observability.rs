use std::net::SocketAddr;

use crate::engine::EngineError;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: facade operations executed. Labels: op, status.
pub const OPS_TOTAL: &str = "bayline_ops_total";

/// Histogram: facade operation latency in seconds. Labels: op.
pub const OP_DURATION_SECONDS: &str = "bayline_op_duration_seconds";

/// Counter: accepted moves/creations that carried a capacity warning.
pub const CAPACITY_WARNINGS_TOTAL: &str = "bayline_capacity_warnings_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Counter: per-resource lock acquisitions that timed out.
pub const LOCK_TIMEOUTS_TOTAL: &str = "bayline_lock_timeouts_total";

/// Gauge: number of loaded tenants.
pub const TENANTS_ACTIVE: &str = "bayline_tenants_active";

/// Histogram: journal append + fsync duration in seconds.
pub const JOURNAL_APPEND_DURATION_SECONDS: &str = "bayline_journal_append_duration_seconds";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Facade operations, as metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    ProposeBooking,
    ProposeReschedule,
    PreviewReschedule,
    RequestTransition,
    CapacitySnapshot,
    CapacityOverWindow,
    SaturatedSpans,
}

impl Op {
    pub fn label(self) -> &'static str {
        match self {
            Op::ProposeBooking => "propose_booking",
            Op::ProposeReschedule => "propose_reschedule",
            Op::PreviewReschedule => "preview_reschedule",
            Op::RequestTransition => "request_transition",
            Op::CapacitySnapshot => "capacity_snapshot",
            Op::CapacityOverWindow => "capacity_over_window",
            Op::SaturatedSpans => "saturated_spans",
        }
    }
}

/// Record one finished operation.
pub fn record<T>(op: Op, started: std::time::Instant, result: &Result<T, EngineError>) {
    let status = match result {
        Ok(_) => "ok",
        Err(e) => e.kind(),
    };
    metrics::counter!(OPS_TOTAL, "op" => op.label(), "status" => status).increment(1);
    metrics::histogram!(OP_DURATION_SECONDS, "op" => op.label())
        .record(started.elapsed().as_secs_f64());
}
