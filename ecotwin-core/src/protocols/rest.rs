use std::time::Instant;

use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Body, Request, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{info_span, warn, Instrument};
use uuid::Uuid;

use crate::error::Error;
use crate::history::HistoryRow;
use crate::middleware::identity;
use crate::prediction::ImpactFeatures;
use crate::protocols::graphql;
use crate::scenario::ScenarioFactors;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ReadingBody {
    pub value: f64,
}

fn one_day() -> f64 {
    1.0
}

#[derive(Debug, Deserialize)]
pub struct PredictBody {
    #[serde(default = "one_day")]
    pub days: f64,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse<'a> {
    pub status: &'static str,
    pub project: &'a str,
}

#[derive(Debug, Serialize)]
pub struct PredictedScore {
    pub predicted_score: f64,
}

#[derive(Debug, Serialize)]
pub struct Forecast {
    pub prediction: f64,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

/// Entry point for every HTTP request.
pub async fn route(
    req: Request<Body>,
    state: AppState,
    schema: graphql::SchemaType,
) -> Result<Response<Body>, hyper::Error> {
    let started = Instant::now();
    let request_id = Uuid::new_v4();
    let span = info_span!("http", %request_id, method = %req.method(), path = %req.uri().path());

    let mut resp = dispatch(req, &state, schema).instrument(span).await?;

    state.metrics.inc_requests("rest", status_label(resp.status()));
    state.metrics.observe_latency("rest", started.elapsed().as_secs_f64());
    if let Ok(v) = HeaderValue::from_str(&request_id.to_string()) {
        resp.headers_mut().insert("x-request-id", v);
    }
    Ok(resp)
}

async fn dispatch(
    req: Request<Body>,
    state: &AppState,
    schema: graphql::SchemaType,
) -> Result<Response<Body>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    match (method.as_str(), path.as_str()) {
        ("GET", "/health") => Ok(json(
            StatusCode::OK,
            &HealthResponse { status: "running", project: &state.project_name },
        )),
        ("GET", p) if p == &*state.metrics_path => Ok(state.metrics.render()),
        ("GET", "/graphql") | ("POST", "/graphql") => graphql::handle(req, schema, &state.limiter).await,
        (_, p) if p.starts_with("/api/") => api(req, state).await,
        _ => Ok(status(StatusCode::NOT_FOUND, "not found")),
    }
}

async fn api(req: Request<Body>, state: &AppState) -> Result<Response<Body>, hyper::Error> {
    let Some(user) = identity::user_id(&req) else {
        return Ok(status(StatusCode::UNAUTHORIZED, "unauthorized"));
    };
    if !state.limiter.check(user.as_str()) {
        return Ok(status(StatusCode::TOO_MANY_REQUESTS, "rate limited"));
    }

    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let body = hyper::body::to_bytes(req.into_body()).await?;

    let outcome: Result<Response<Body>, Response<Body>> = async {
        let o = &state.orchestrator;
        Ok::<_, Response<Body>>(match (method.as_str(), path.as_str()) {
            ("GET", "/api/twin") => json(StatusCode::OK, &o.twin().read().await),
            ("POST", "/api/update/energy") => reply(o.twin().set_energy(parse::<ReadingBody>(&body)?.value).await),
            ("POST", "/api/update/water") => reply(o.twin().set_water(parse::<ReadingBody>(&body)?.value).await),
            ("POST", "/api/update/traffic") => reply(o.twin().set_traffic(parse::<ReadingBody>(&body)?.value).await),
            ("POST", "/api/simulate") => reply(o.simulate(&parse::<ScenarioFactors>(&body)?).await),
            ("GET", "/api/sustainability") => reply(o.run_baseline(&user).await),
            ("POST", "/api/compare") => reply(o.run_comparison(&user, &parse::<ScenarioFactors>(&body)?).await),
            ("GET", "/api/history") => reply(
                o.list_history()
                    .await
                    .map(|records| records.iter().map(HistoryRow::from).collect::<Vec<_>>()),
            ),
            ("GET", "/api/history/summary") => reply(o.summary().await),
            ("POST", "/api/predict") => reply(
                state
                    .predictions
                    .predict_future_score(parse::<PredictBody>(&body)?.days)
                    .map(|predicted_score| PredictedScore { predicted_score }),
            ),
            ("POST", "/api/forecast") => {
                reply(state.predictions.predict_next_value().await.map(|prediction| Forecast { prediction }))
            }
            ("POST", "/api/explain") => reply(state.predictions.explain(parse::<ImpactFeatures>(&body)?).await),
            _ => status(StatusCode::NOT_FOUND, "not found"),
        })
    }
    .await;

    let resp = outcome.unwrap_or_else(|r| r);
    if resp.status().is_client_error() || resp.status().is_server_error() {
        warn!(user_id = %user, status = resp.status().as_u16(), "api request failed");
    }
    Ok(resp)
}

/// Empty bodies parse as `{}` so all-default payloads may be omitted.
fn parse<T: DeserializeOwned>(body: &[u8]) -> Result<T, Response<Body>> {
    let body: &[u8] = if body.iter().all(u8::is_ascii_whitespace) { b"{}" } else { body };
    serde_json::from_slice(body).map_err(|e| {
        warn!(error=%e, "invalid json");
        status(StatusCode::BAD_REQUEST, "invalid json")
    })
}

fn reply<T: Serialize>(res: crate::Result<T>) -> Response<Body> {
    match res {
        Ok(v) => json(StatusCode::OK, &v),
        Err(e) => json(error_status(&e), &ErrorBody { error: e.to_string() }),
    }
}

pub fn error_status(e: &Error) -> StatusCode {
    match e {
        Error::InvalidValue { .. } | Error::InvalidFactor { .. } => StatusCode::BAD_REQUEST,
        Error::StorageUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        Error::InsufficientHistory { .. } => StatusCode::UNPROCESSABLE_ENTITY,
    }
}

fn status_label(s: StatusCode) -> &'static str {
    match s.as_u16() {
        200 => "200",
        400 => "400",
        401 => "401",
        404 => "404",
        405 => "405",
        422 => "422",
        429 => "429",
        503 => "503",
        _ => "other",
    }
}

pub(crate) fn json<T: Serialize>(code: StatusCode, v: &T) -> Response<Body> {
    match serde_json::to_vec(v) {
        Ok(body) => {
            let mut r = Response::new(Body::from(body));
            *r.status_mut() = code;
            r.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            r
        }
        Err(e) => status(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}

pub(crate) fn status(code: StatusCode, msg: &str) -> Response<Body> {
    let mut r = Response::new(Body::from(msg.to_string()));
    *r.status_mut() = code;
    r
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::Config;
    use crate::digital_twin::TwinHandle;
    use crate::history::MemoryHistoryStore;
    use crate::middleware::observability::Metrics;

    fn state() -> AppState {
        state_with_limit(50)
    }

    fn state_with_limit(per_second: u32) -> AppState {
        let yaml = format!(
            r#"
version: "1"
project_name: "EcoTwin Test"
core: {{ bind_http: "127.0.0.1:0", bind_grpc: "127.0.0.1:0", rate_limit_per_second: {per_second} }}
"#
        );
        let cfg = Config::from_slice(yaml.as_bytes()).unwrap();
        AppState::with_parts(&cfg, TwinHandle::default(), Arc::new(MemoryHistoryStore::new()), Metrics::new())
    }

    async fn call(state: &AppState, method: &str, path: &str, user: Option<&str>, body: &str) -> (StatusCode, serde_json::Value) {
        let mut b = Request::builder().method(method).uri(path);
        if let Some(u) = user {
            b = b.header("User-ID", u);
        }
        let req = b.body(Body::from(body.to_string())).unwrap();
        let schema = graphql::build_schema(state.clone());
        let resp = route(req, state.clone(), schema).await.unwrap();
        let code = resp.status();
        let bytes = hyper::body::to_bytes(resp.into_body()).await.unwrap();
        let v = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (code, v)
    }

    #[tokio::test]
    async fn health_is_public() {
        let st = state();
        let (code, v) = call(&st, "GET", "/health", None, "").await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(v["status"], "running");
        assert_eq!(v["project"], "EcoTwin Test");
    }

    #[tokio::test]
    async fn api_requires_identity() {
        let st = state();
        let (code, _) = call(&st, "GET", "/api/twin", None, "").await;
        assert_eq!(code, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn update_then_score() {
        let st = state();
        let (code, v) = call(&st, "POST", "/api/update/energy", Some("1"), r#"{"value": 1200}"#).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(v["current_usage_kwh"], 1200.0);

        let (code, v) = call(&st, "GET", "/api/sustainability", Some("1"), "").await;
        assert_eq!(code, StatusCode::OK);
        // 1200*0.2 + 3200*0.1 + 50000/5000
        assert!((v["total_environmental_impact"].as_f64().unwrap() - 570.0).abs() < 1e-9);

        let (_, v) = call(&st, "GET", "/api/history", Some("1"), "").await;
        assert_eq!(v[0]["type"], "baseline");
        assert_eq!(v[0]["user_id"], "1");
        assert!(v[0]["simulated_score"].is_null());
    }

    #[tokio::test]
    async fn invalid_reading_is_bad_request() {
        let st = state();
        let (code, v) = call(&st, "POST", "/api/update/water", Some("1"), r#"{"value": -3}"#).await;
        assert_eq!(code, StatusCode::BAD_REQUEST);
        assert!(v["error"].as_str().unwrap().contains("current_usage_liters"));

        let (code, _) = call(&st, "POST", "/api/update/water", Some("1"), r#"{"value": "lots"}"#).await;
        assert_eq!(code, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn compare_defaults_missing_factors() {
        let st = state();
        let (code, v) = call(&st, "POST", "/api/compare", Some("1"), "").await;
        assert_eq!(code, StatusCode::OK);
        assert!(v["impact_difference"].as_f64().unwrap().abs() < 1e-9);

        let (_, v) = call(&st, "GET", "/api/history/summary", Some("1"), "").await;
        assert_eq!(v["baseline_records"], 1);
        assert_eq!(v["simulation_records"], 1);
    }

    #[tokio::test]
    async fn forecast_without_history_is_unprocessable() {
        let st = state();
        let (code, v) = call(&st, "POST", "/api/forecast", Some("1"), "").await;
        assert_eq!(code, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(v["error"].as_str().unwrap().contains("insufficient history"));

        let (code, v) = call(&st, "POST", "/api/predict", Some("1"), r#"{"days": 2}"#).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(v["predicted_score"], 82.0);
    }

    #[tokio::test]
    async fn graphql_shares_the_caller_budget() {
        let st = state_with_limit(1);
        let query = r#"{"query": "mutation { runBaseline { sustainabilityScore } }"}"#;

        let (code, v) = call(&st, "POST", "/graphql", Some("7"), query).await;
        assert_eq!(code, StatusCode::OK);
        assert!((v["data"]["runBaseline"]["sustainabilityScore"].as_f64().unwrap() - 86.7).abs() < 1e-9);

        let (code, _) = call(&st, "POST", "/graphql", Some("7"), query).await;
        assert_eq!(code, StatusCode::TOO_MANY_REQUESTS);
        let (code, _) = call(&st, "GET", "/api/sustainability", Some("7"), "").await;
        assert_eq!(code, StatusCode::TOO_MANY_REQUESTS);

        // Other callers keep their own budget.
        let (code, _) = call(&st, "POST", "/graphql", Some("8"), query).await;
        assert_eq!(code, StatusCode::OK);

        assert_eq!(st.orchestrator.list_history().await.unwrap().len(), 2);
    }
}
