use async_graphql::{Context, EmptySubscription, Enum, Object, Request as GqlRequest, Schema, SimpleObject, Variables};
use hyper::{Body, Method, Request, Response, StatusCode};

use crate::digital_twin::TwinState;
use crate::history::{HistoryRow, UserId};
use crate::middleware::identity;
use crate::middleware::rate_limit::CallerRateLimiter;
use crate::orchestrator::ComparisonResult;
use crate::scenario::ScenarioFactors;
use crate::scoring::ImpactBreakdown;
use crate::state::AppState;

pub type SchemaType = Schema<QueryRoot, MutationRoot, EmptySubscription>;

pub fn build_schema(state: AppState) -> SchemaType {
    Schema::build(QueryRoot, MutationRoot, EmptySubscription)
        .data(state)
        .finish()
}

#[derive(serde::Deserialize)]
struct HttpGraphQLRequest {
    query: String,
    #[serde(default)]
    variables: serde_json::Value,
    #[serde(default, rename = "operationName")]
    operation_name: Option<String>,
}

/// Serves `/graphql`. Callers that present an identity share the REST
/// limiter budget; anonymous requests only reach resolvers that refuse them.
pub async fn handle(
    req: Request<Body>,
    schema: SchemaType,
    limiter: &CallerRateLimiter,
) -> Result<Response<Body>, hyper::Error> {
    match *req.method() {
        Method::GET => Ok(text(
            StatusCode::OK,
            "GraphQL endpoint. Send POST /graphql with {query, variables, operationName}.",
        )),
        Method::POST => {
            let user = identity::user_id(&req);
            if let Some(user) = &user {
                if !limiter.check(user.as_str()) {
                    return Ok(super::rest::status(StatusCode::TOO_MANY_REQUESTS, "rate limited"));
                }
            }
            let body = hyper::body::to_bytes(req.into_body()).await?;
            let parsed: HttpGraphQLRequest = match serde_json::from_slice(&body) {
                Ok(v) => v,
                Err(_) => return Ok(text(StatusCode::BAD_REQUEST, "invalid graphql http request")),
            };

            let mut gql = GqlRequest::new(parsed.query);
            if let Some(op) = parsed.operation_name {
                gql = gql.operation_name(op);
            }
            if !parsed.variables.is_null() {
                if let Ok(vars) = serde_json::from_value::<Variables>(parsed.variables) {
                    gql = gql.variables(vars);
                }
            }
            if let Some(user) = user {
                gql = gql.data(user);
            }

            let resp = schema.execute(gql).await;
            Ok(super::rest::json(StatusCode::OK, &resp))
        }
        _ => Ok(text(StatusCode::METHOD_NOT_ALLOWED, "method not allowed")),
    }
}

fn text(code: StatusCode, msg: &str) -> Response<Body> {
    let mut r = super::rest::status(code, msg);
    r.headers_mut()
        .insert(hyper::header::CONTENT_TYPE, hyper::header::HeaderValue::from_static("text/plain; charset=utf-8"));
    r
}

#[derive(Enum, Copy, Clone, Eq, PartialEq)]
pub enum Subsystem {
    Energy,
    Water,
    Traffic,
}

#[derive(SimpleObject)]
#[graphql(name = "Twin")]
pub struct TwinView {
    pub current_usage_kwh: f64,
    pub peak_demand_kwh: f64,
    pub energy_status: String,
    pub current_usage_liters: f64,
    pub leakage_detected: bool,
    pub water_status: String,
    pub avg_vehicle_count: f64,
    pub congestion_level: String,
    pub traffic_status: String,
}

impl From<TwinState> for TwinView {
    fn from(t: TwinState) -> Self {
        Self {
            current_usage_kwh: t.energy_system.current_usage_kwh,
            peak_demand_kwh: t.energy_system.peak_demand_kwh,
            energy_status: t.energy_system.status.as_str().to_string(),
            current_usage_liters: t.water_system.current_usage_liters,
            leakage_detected: t.water_system.leakage_detected,
            water_status: t.water_system.status.as_str().to_string(),
            avg_vehicle_count: t.traffic_system.avg_vehicle_count,
            congestion_level: t.traffic_system.congestion_level.as_str().to_string(),
            traffic_status: t.traffic_system.status.as_str().to_string(),
        }
    }
}

#[derive(SimpleObject)]
#[graphql(name = "Baseline")]
pub struct BaselineView {
    pub energy_emission_kg: f64,
    pub traffic_emission_kg: f64,
    pub water_impact_index: f64,
    pub total_environmental_impact: f64,
    pub sustainability_score: f64,
}

impl From<ImpactBreakdown> for BaselineView {
    fn from(b: ImpactBreakdown) -> Self {
        Self {
            energy_emission_kg: b.energy_emission_kg,
            traffic_emission_kg: b.traffic_emission_kg,
            water_impact_index: b.water_impact_index,
            total_environmental_impact: b.total_environmental_impact,
            sustainability_score: b.sustainability_score,
        }
    }
}

#[derive(SimpleObject)]
#[graphql(name = "Comparison")]
pub struct ComparisonView {
    pub base_impact: f64,
    pub simulated_impact: f64,
    pub impact_difference: f64,
    pub base_score: f64,
    pub simulated_score: f64,
}

impl From<ComparisonResult> for ComparisonView {
    fn from(c: ComparisonResult) -> Self {
        Self {
            base_impact: c.base_impact,
            simulated_impact: c.simulated_impact,
            impact_difference: c.impact_difference,
            base_score: c.base_score,
            simulated_score: c.simulated_score,
        }
    }
}

#[derive(SimpleObject)]
#[graphql(name = "HistoryEntry")]
pub struct HistoryView {
    pub id: u64,
    pub user_id: String,
    pub kind: String,
    pub timestamp: String,
    pub total_impact: Option<f64>,
    pub score: Option<f64>,
    pub simulated_impact: Option<f64>,
    pub simulated_score: Option<f64>,
}

impl From<HistoryRow> for HistoryView {
    fn from(r: HistoryRow) -> Self {
        Self {
            id: r.id,
            user_id: r.user_id.0,
            kind: r.kind.as_str().to_string(),
            timestamp: r.timestamp.to_rfc3339(),
            total_impact: r.total_impact,
            score: r.score,
            simulated_impact: r.simulated_impact,
            simulated_score: r.simulated_score,
        }
    }
}

#[derive(SimpleObject)]
#[graphql(name = "HistorySummary")]
pub struct SummaryView {
    pub records: u64,
    pub baseline_records: u64,
    pub simulation_records: u64,
    pub total_impact: f64,
}

fn caller<'a>(ctx: &Context<'a>) -> async_graphql::Result<&'a UserId> {
    ctx.data_opt::<UserId>()
        .ok_or_else(|| async_graphql::Error::new("unauthorized: User-ID header required"))
}

pub struct QueryRoot;

#[Object]
impl QueryRoot {
    async fn twin(&self, ctx: &Context<'_>) -> async_graphql::Result<TwinView> {
        caller(ctx)?;
        let state = ctx.data::<AppState>()?;
        Ok(state.orchestrator.twin().read().await.into())
    }

    async fn history(&self, ctx: &Context<'_>) -> async_graphql::Result<Vec<HistoryView>> {
        caller(ctx)?;
        let state = ctx.data::<AppState>()?;
        let records = state.orchestrator.list_history().await?;
        Ok(records.iter().map(|r| HistoryRow::from(r).into()).collect())
    }

    async fn summary(&self, ctx: &Context<'_>) -> async_graphql::Result<SummaryView> {
        caller(ctx)?;
        let s = ctx.data::<AppState>()?.orchestrator.summary().await?;
        Ok(SummaryView {
            records: s.records as u64,
            baseline_records: s.baseline_records as u64,
            simulation_records: s.simulation_records as u64,
            total_impact: s.total_impact,
        })
    }

    async fn predict_score(&self, ctx: &Context<'_>, #[graphql(default = 1.0)] days: f64) -> async_graphql::Result<f64> {
        caller(ctx)?;
        Ok(ctx.data::<AppState>()?.predictions.predict_future_score(days)?)
    }
}

pub struct MutationRoot;

#[Object]
impl MutationRoot {
    async fn update_reading(&self, ctx: &Context<'_>, subsystem: Subsystem, value: f64) -> async_graphql::Result<TwinView> {
        caller(ctx)?;
        let twin = ctx.data::<AppState>()?.orchestrator.twin();
        match subsystem {
            Subsystem::Energy => twin.set_energy(value).await.map(drop)?,
            Subsystem::Water => twin.set_water(value).await.map(drop)?,
            Subsystem::Traffic => twin.set_traffic(value).await.map(drop)?,
        }
        Ok(twin.read().await.into())
    }

    async fn run_baseline(&self, ctx: &Context<'_>) -> async_graphql::Result<BaselineView> {
        let user = caller(ctx)?;
        let state = ctx.data::<AppState>()?;
        Ok(state.orchestrator.run_baseline(user).await?.into())
    }

    async fn compare(
        &self,
        ctx: &Context<'_>,
        #[graphql(default = 1.0)] energy_factor: f64,
        #[graphql(default = 1.0)] water_factor: f64,
        #[graphql(default = 1.0)] traffic_factor: f64,
    ) -> async_graphql::Result<ComparisonView> {
        let user = caller(ctx)?;
        let state = ctx.data::<AppState>()?;
        let factors = ScenarioFactors::new(energy_factor, water_factor, traffic_factor);
        Ok(state.orchestrator.run_comparison(user, &factors).await?.into())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::Config;
    use crate::digital_twin::TwinHandle;
    use crate::history::MemoryHistoryStore;
    use crate::middleware::observability::Metrics;

    fn schema() -> SchemaType {
        let cfg = Config::from_slice(b"version: \"1\"\ncore: { bind_http: a, bind_grpc: b }\n").unwrap();
        build_schema(AppState::with_parts(
            &cfg,
            TwinHandle::default(),
            Arc::new(MemoryHistoryStore::new()),
            Metrics::new(),
        ))
    }

    #[tokio::test]
    async fn compare_then_read_history() {
        let schema = schema();
        let resp = schema
            .execute(GqlRequest::new("mutation { compare(energyFactor: 2.0) { impactDifference } }").data(UserId::new("9")))
            .await;
        assert!(resp.errors.is_empty(), "{:?}", resp.errors);
        let v = resp.data.into_json().unwrap();
        assert!((v["compare"]["impactDifference"].as_f64().unwrap() - 1000.0).abs() < 1e-9);

        let resp = schema
            .execute(GqlRequest::new("{ history { id kind userId } }").data(UserId::new("9")))
            .await;
        let v = resp.data.into_json().unwrap();
        assert_eq!(v["history"][0]["kind"], "baseline");
        assert_eq!(v["history"][1]["kind"], "simulation");
        assert_eq!(v["history"][1]["userId"], "9");
    }

    #[tokio::test]
    async fn anonymous_callers_are_rejected() {
        let resp = schema().execute("{ twin { currentUsageKwh } }").await;
        assert_eq!(resp.errors.len(), 1);
    }

    #[tokio::test]
    async fn update_reading_rejects_negative_values() {
        let schema = schema();
        let resp = schema
            .execute(GqlRequest::new("mutation { updateReading(subsystem: TRAFFIC, value: -4) { avgVehicleCount } }").data(UserId::new("1")))
            .await;
        assert_eq!(resp.errors.len(), 1);

        let resp = schema
            .execute(GqlRequest::new("mutation { updateReading(subsystem: TRAFFIC, value: 100) { avgVehicleCount congestionLevel } }").data(UserId::new("1")))
            .await;
        let v = resp.data.into_json().unwrap();
        assert_eq!(v["updateReading"]["avgVehicleCount"], 100.0);
        assert_eq!(v["updateReading"]["congestionLevel"], "moderate");
    }
}
