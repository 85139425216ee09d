use std::sync::Arc;

use hyper::{Body, Response};
use prometheus::{Encoder, Gauge, HistogramOpts, HistogramVec, IntCounterVec, Registry, TextEncoder};

#[derive(Clone)]
pub struct Metrics {
    inner: Arc<Inner>,
}

struct Inner {
    registry: Registry,
    requests_total: IntCounterVec,
    request_latency: HistogramVec,
    score_events_total: IntCounterVec,
    last_score: Gauge,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let requests_total = IntCounterVec::new(
            prometheus::Opts::new("ecotwin_requests_total", "Total requests"),
            &["protocol", "status"],
        )
        .expect("metric");
        let request_latency = HistogramVec::new(
            HistogramOpts::new("ecotwin_request_latency_seconds", "Request latency"),
            &["protocol"],
        )
        .expect("metric");
        let score_events_total = IntCounterVec::new(
            prometheus::Opts::new("ecotwin_score_events_total", "Scoring events recorded to history"),
            &["kind"],
        )
        .expect("metric");
        let last_score = Gauge::new("ecotwin_last_score", "Most recent baseline sustainability score").expect("metric");

        registry.register(Box::new(requests_total.clone())).expect("register");
        registry
            .register(Box::new(request_latency.clone()))
            .expect("register");
        registry
            .register(Box::new(score_events_total.clone()))
            .expect("register");
        registry.register(Box::new(last_score.clone())).expect("register");

        Self {
            inner: Arc::new(Inner { registry, requests_total, request_latency, score_events_total, last_score }),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mf = self.inner.registry.gather();
        let mut buf = Vec::new();
        // Encoding into a Vec cannot fail for well-formed families.
        let _ = TextEncoder::new().encode(&mf, &mut buf);
        buf
    }

    pub fn render(&self) -> Response<Body> {
        let mut r = Response::new(Body::from(self.encode()));
        if let Ok(v) = TextEncoder::new().format_type().parse() {
            r.headers_mut().insert(hyper::header::CONTENT_TYPE, v);
        }
        r
    }

    pub fn inc_requests(&self, protocol: &'static str, status: &'static str) {
        self.inner.requests_total.with_label_values(&[protocol, status]).inc();
    }

    pub fn observe_latency(&self, protocol: &'static str, seconds: f64) {
        self.inner.request_latency.with_label_values(&[protocol]).observe(seconds);
    }

    pub fn record_score_event(&self, kind: &'static str) {
        self.inner.score_events_total.with_label_values(&[kind]).inc();
    }

    pub fn set_last_score(&self, score: f64) {
        self.inner.last_score.set(score);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_recorded_series() {
        let m = Metrics::new();
        m.inc_requests("rest", "200");
        m.record_score_event("baseline");
        m.set_last_score(86.7);

        let text = String::from_utf8(m.encode()).unwrap();
        assert!(text.contains("ecotwin_requests_total{protocol=\"rest\",status=\"200\"} 1"));
        assert!(text.contains("ecotwin_score_events_total{kind=\"baseline\"} 1"));
        assert!(text.contains("ecotwin_last_score 86.7"));
    }
}
