//! Metric registration for the runtime.
//!
//! The runtime emits through the `metrics` facade only; installing an
//! exporter (Prometheus or otherwise) is the embedding application's job.
//! Call [`register_metrics`] once at startup so exporters can show
//! descriptions and units before the first sample arrives.

use metrics::{describe_counter, describe_histogram};

/// Register descriptions for every metric the runtime emits.
pub fn register_metrics() {
    describe_counter!(
        "eventum_commands_dispatched_total",
        "Commands routed to a handler, labelled by command type"
    );
    describe_counter!(
        "eventum_command_failures_total",
        "Dispatches that returned an error, labelled by command type"
    );
    describe_histogram!(
        "eventum_command_duration_seconds",
        "End-to-end duration of synchronous command dispatch"
    );
    describe_counter!(
        "eventum_events_appended_total",
        "Events committed to the store, labelled by aggregate type"
    );
    describe_counter!(
        "eventum_events_published_total",
        "Committed events handed to the subscription bus"
    );
    describe_counter!(
        "eventum_handler_failures_total",
        "Event handler failures, labelled by processor group"
    );
    describe_counter!(
        "eventum_sagas_started_total",
        "Saga instances created, labelled by saga type"
    );
    describe_counter!(
        "eventum_sagas_ended_total",
        "Saga instances ended, labelled by saga type"
    );
    describe_counter!("eventum_deadlines_fired_total", "Deadlines that fired");
    describe_counter!(
        "eventum_deadlines_cancelled_total",
        "Deadlines cancelled before firing"
    );
}
