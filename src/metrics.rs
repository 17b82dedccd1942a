use prometheus::{Encoder, TextEncoder, IntCounterVec, register_int_counter_vec};
use once_cell::sync::Lazy;
use axum::{http::StatusCode, response::IntoResponse};

pub static SELECTIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "upstream_selections_total",
        "Backends selected per upstream service",
        &["service", "strategy", "backend"]
    )
    .expect("register upstream_selections_total")
});

pub static EMPTY_SELECTIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "upstream_empty_selections_total",
        "Selections that found no backend",
        &["service"]
    )
    .expect("register upstream_empty_selections_total")
});

pub static HEALTH_EVENTS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "upstream_health_events_total",
        "Health events reported to upstream strategies",
        &["service", "event"]
    )
    .expect("register upstream_health_events_total")
});

pub static REJECTED_BACKENDS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "upstream_rejected_backends_total",
        "Configured backends that failed registration",
        &["service"]
    )
    .expect("register upstream_rejected_backends_total")
});

pub fn render() -> Result<(String, Vec<u8>), prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok((encoder.format_type().to_string(), buffer))
}

pub async fn metrics_handler() -> impl IntoResponse {
    match render() {
        Ok((content_type, buffer)) => {
            (StatusCode::OK, [(axum::http::header::CONTENT_TYPE, content_type)], buffer).into_response()
        }
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, format!("metrics error: {}", err)).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_contains_counters() {
        SELECTIONS.with_label_values(&["metrics-test", "random", "http://localhost:30000"]).inc();
        EMPTY_SELECTIONS.with_label_values(&["metrics-test"]).inc();

        let (content_type, body) = render().unwrap();
        let text = String::from_utf8(body).unwrap();
        assert!(content_type.starts_with("text/plain"));
        assert!(text.contains("upstream_selections_total"));
        assert!(text.contains("upstream_empty_selections_total"));
    }
}
