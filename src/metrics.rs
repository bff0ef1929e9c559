// ABOUTME: Prometheus metrics for the adapter: frame classification, dispatch,
// ABOUTME: command correlation, session lifecycle, and watchdog activity

use anyhow::{Context, Result};
use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the global Prometheus recorder and describe every series the
/// adapter emits. Call once at startup, before anything records; the returned
/// handle renders the /metrics endpoint.
pub fn init_metrics() -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .context("Failed to install Prometheus recorder")?;

    describe_counter!(
        "frames_received_total",
        "Inbound frames parsed and classified, by kind"
    );
    describe_counter!(
        "decode_errors_total",
        "Inbound frames dropped as undecodable"
    );
    describe_counter!(
        "unknown_kind_total",
        "Inbound frames dropped for an unrecognized post_type"
    );
    describe_counter!(
        "orphan_responses_total",
        "Command responses with no pending correlation id"
    );
    describe_counter!(
        "events_dispatched_total",
        "Events handled to completion, by kind"
    );
    describe_counter!("handler_errors_total", "Event handler failures, by kind");
    describe_counter!(
        "commands_sent_total",
        "Commands written to the gateway, by action"
    );
    describe_counter!(
        "command_timeouts_total",
        "Pending commands evicted at their deadline"
    );
    describe_counter!("sessions_opened_total", "Gateway sessions admitted");
    describe_counter!(
        "sessions_superseded_total",
        "Sessions replaced by a newer connection"
    );
    describe_counter!(
        "auth_failures_total",
        "Connections rejected by the bearer token check"
    );
    describe_counter!(
        "watchdog_closes_total",
        "Sessions force-closed for inactivity"
    );
    describe_gauge!("pending_requests", "Commands currently awaiting a response");

    tracing::info!("Prometheus metrics recorder installed");
    Ok(handle)
}

pub fn record_frame_received(kind: &str) {
    counter!("frames_received_total", "kind" => kind.to_string()).increment(1);
}

pub fn record_decode_error() {
    counter!("decode_errors_total").increment(1);
}

pub fn record_unknown_kind() {
    counter!("unknown_kind_total").increment(1);
}

pub fn record_orphan_response() {
    counter!("orphan_responses_total").increment(1);
}

pub fn record_event_dispatched(kind: &str) {
    counter!("events_dispatched_total", "kind" => kind.to_string()).increment(1);
}

pub fn record_handler_error(kind: &str) {
    counter!("handler_errors_total", "kind" => kind.to_string()).increment(1);
}

pub fn record_command_sent(action: &str) {
    counter!("commands_sent_total", "action" => action.to_string()).increment(1);
}

pub fn record_command_timeout() {
    counter!("command_timeouts_total").increment(1);
}

pub fn record_session_opened() {
    counter!("sessions_opened_total").increment(1);
}

pub fn record_session_superseded() {
    counter!("sessions_superseded_total").increment(1);
}

pub fn record_auth_failure() {
    counter!("auth_failures_total").increment(1);
}

pub fn record_watchdog_close() {
    counter!("watchdog_closes_total").increment(1);
}

pub fn set_pending_requests(count: usize) {
    gauge!("pending_requests").set(count as f64);
}
