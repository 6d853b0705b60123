use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{MatchedPath, Request, State};
use axum::http::header::CONTENT_LENGTH;
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use prometheus::{CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};
use tracing::error;

/// Metrics collects and exposes HTTP server metrics.
pub struct Metrics {
    registry: Registry,
    http_requests_total: CounterVec,
    http_request_duration_seconds: HistogramVec,
    errors_total: CounterVec,
    network_traffic_bytes: CounterVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let http_requests_total = CounterVec::new(
            Opts::new("http_requests_total", "Total number of HTTP requests"),
            &["method", "endpoint", "status"],
        )?;
        let http_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "http_request_duration_seconds",
                "HTTP request duration in seconds",
            ),
            &["method", "endpoint"],
        )?;
        let errors_total = CounterVec::new(
            Opts::new("errors_total", "Total number of error responses"),
            &["class", "endpoint"],
        )?;
        let network_traffic_bytes = CounterVec::new(
            Opts::new("network_traffic_bytes", "Network traffic in bytes"),
            &["direction"],
        )?;

        registry.register(Box::new(http_requests_total.clone()))?;
        registry.register(Box::new(http_request_duration_seconds.clone()))?;
        registry.register(Box::new(errors_total.clone()))?;
        registry.register(Box::new(network_traffic_bytes.clone()))?;

        Ok(Self {
            registry,
            http_requests_total,
            http_request_duration_seconds,
            errors_total,
            network_traffic_bytes,
        })
    }

    fn record_request(&self, method: &str, endpoint: &str, status: u16, duration: Duration) {
        self.http_requests_total
            .with_label_values(&[method, endpoint, &status.to_string()])
            .inc();
        self.http_request_duration_seconds
            .with_label_values(&[method, endpoint])
            .observe(duration.as_secs_f64());
        if status >= 400 {
            let class = if status >= 500 { "server" } else { "client" };
            self.errors_total
                .with_label_values(&[class, endpoint])
                .inc();
        }
    }

    fn record_network_traffic(&self, direction: &str, bytes: usize) {
        if bytes > 0 {
            self.network_traffic_bytes
                .with_label_values(&[direction])
                .inc_by(bytes as f64);
        }
    }

    /// Renders the registry in the Prometheus text format.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

fn content_length(headers: &HeaderMap) -> usize {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

/// Records request count, latency and traffic, labelled by route template.
pub(crate) async fn track(
    State(metrics): State<Arc<Metrics>>,
    req: Request,
    next: Next,
) -> Response {
    let method = req.method().to_string();
    // The template keeps label cardinality bounded (`/api/order/{id}`, not every id).
    let endpoint = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    metrics.record_network_traffic("in", content_length(req.headers()));

    let start = Instant::now();
    let response = next.run(req).await;

    metrics.record_request(&method, &endpoint, response.status().as_u16(), start.elapsed());
    metrics.record_network_traffic("out", content_length(response.headers()));
    response
}

pub(crate) async fn handle_metrics(State(metrics): State<Arc<Metrics>>) -> Response {
    match metrics.render() {
        Ok(text) => (StatusCode::OK, text).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_are_counted_by_class() {
        let metrics = Metrics::new().unwrap();
        metrics.record_request("GET", "/api/order/{id}", 404, Duration::from_millis(3));
        metrics.record_request("POST", "/api/order/create-order", 500, Duration::from_millis(3));
        metrics.record_request("GET", "/health", 200, Duration::from_millis(1));

        let text = metrics.render().unwrap();
        let sample = |name: &str, labels: &[&str]| {
            text.lines()
                .find(|l| l.starts_with(name) && labels.iter().all(|lbl| l.contains(lbl)))
                .map(|l| l.rsplit(' ').next().unwrap_or_default().to_string())
        };
        assert_eq!(
            sample("errors_total{", &[r#"class="client""#, r#"endpoint="/api/order/{id}""#]),
            Some("1".into())
        );
        assert_eq!(
            sample("errors_total{", &[r#"class="server""#]),
            Some("1".into())
        );
        assert_eq!(
            sample("http_requests_total{", &[r#"endpoint="/health""#, r#"status="200""#]),
            Some("1".into())
        );
    }
}
