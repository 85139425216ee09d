use tonic::{Request, Response, Status};
use tracing::info;

use crate::digital_twin::TwinState;
use crate::error::Error;
use crate::history::{HistoryRow, UserId};
use crate::middleware::identity::USER_ID_HEADER;
use crate::orchestrator::ComparisonResult;
use crate::proto::{
    twin_service_server::{TwinService, TwinServiceServer},
    BaselineReport, CompareRequest, ComparisonReport, GetTwinRequest, HistoryRow as ProtoHistoryRow,
    ListHistoryRequest, ListHistoryResponse, ScoreRequest, Subsystem, TwinSnapshot, UpdateReadingRequest,
};
use crate::scenario::ScenarioFactors;
use crate::scoring::ImpactBreakdown;
use crate::state::AppState;

pub struct TwinGrpc {
    state: AppState,
}

impl TwinGrpc {
    pub fn new(state: AppState) -> TwinServiceServer<Self> {
        TwinServiceServer::new(Self { state })
    }

    fn admit<T>(&self, request: &Request<T>) -> Result<UserId, Status> {
        let user = request
            .metadata()
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(UserId::new)
            .ok_or_else(|| {
                self.state.metrics.inc_requests("grpc", "401");
                Status::unauthenticated("user-id metadata required")
            })?;
        if !self.state.limiter.check(user.as_str()) {
            self.state.metrics.inc_requests("grpc", "429");
            return Err(Status::resource_exhausted("rate limited"));
        }
        Ok(user)
    }

    fn finish<T>(&self, res: crate::Result<T>) -> Result<Response<T>, Status> {
        match res {
            Ok(v) => {
                self.state.metrics.inc_requests("grpc", "200");
                Ok(Response::new(v))
            }
            Err(e) => {
                self.state.metrics.inc_requests("grpc", "error");
                Err(to_status(e))
            }
        }
    }
}

pub fn to_status(e: Error) -> Status {
    match e {
        Error::InvalidValue { .. } | Error::InvalidFactor { .. } => Status::invalid_argument(e.to_string()),
        Error::StorageUnavailable(_) => Status::unavailable(e.to_string()),
        Error::InsufficientHistory { .. } => Status::failed_precondition(e.to_string()),
    }
}

#[tonic::async_trait]
impl TwinService for TwinGrpc {
    async fn get_twin(&self, request: Request<GetTwinRequest>) -> Result<Response<TwinSnapshot>, Status> {
        self.admit(&request)?;
        let twin = self.state.orchestrator.twin().read().await;
        self.finish(Ok(snapshot(twin)))
    }

    async fn update_reading(
        &self,
        request: Request<UpdateReadingRequest>,
    ) -> Result<Response<TwinSnapshot>, Status> {
        let user = self.admit(&request)?;
        let r = request.into_inner();
        let twin = self.state.orchestrator.twin();
        let res = match Subsystem::try_from(r.subsystem).unwrap_or(Subsystem::Unspecified) {
            Subsystem::Energy => twin.set_energy(r.value).await.map(drop),
            Subsystem::Water => twin.set_water(r.value).await.map(drop),
            Subsystem::Traffic => twin.set_traffic(r.value).await.map(drop),
            Subsystem::Unspecified => {
                self.state.metrics.inc_requests("grpc", "error");
                return Err(Status::invalid_argument("subsystem required"));
            }
        };
        let res = match res {
            Ok(()) => {
                info!(user_id = %user, subsystem = r.subsystem, "grpc reading update");
                Ok(snapshot(twin.read().await))
            }
            Err(e) => Err(e),
        };
        self.finish(res)
    }

    async fn score(&self, request: Request<ScoreRequest>) -> Result<Response<BaselineReport>, Status> {
        let user = self.admit(&request)?;
        let res = self.state.orchestrator.run_baseline(&user).await.map(baseline_report);
        self.finish(res)
    }

    async fn compare(&self, request: Request<CompareRequest>) -> Result<Response<ComparisonReport>, Status> {
        let user = self.admit(&request)?;
        let r = request.into_inner();
        let factors = ScenarioFactors::new(
            r.energy_factor.unwrap_or(1.0),
            r.water_factor.unwrap_or(1.0),
            r.traffic_factor.unwrap_or(1.0),
        );
        let res = self.state.orchestrator.run_comparison(&user, &factors).await.map(comparison_report);
        self.finish(res)
    }

    async fn list_history(
        &self,
        request: Request<ListHistoryRequest>,
    ) -> Result<Response<ListHistoryResponse>, Status> {
        self.admit(&request)?;
        let res = self.state.orchestrator.list_history().await.map(|records| ListHistoryResponse {
            rows: records.iter().map(|r| history_row(HistoryRow::from(r))).collect(),
        });
        self.finish(res)
    }
}

fn snapshot(t: TwinState) -> TwinSnapshot {
    TwinSnapshot {
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

fn baseline_report(b: ImpactBreakdown) -> BaselineReport {
    BaselineReport {
        energy_emission_kg: b.energy_emission_kg,
        traffic_emission_kg: b.traffic_emission_kg,
        water_impact_index: b.water_impact_index,
        total_environmental_impact: b.total_environmental_impact,
        sustainability_score: b.sustainability_score,
    }
}

fn comparison_report(c: ComparisonResult) -> ComparisonReport {
    ComparisonReport {
        base_impact: c.base_impact,
        simulated_impact: c.simulated_impact,
        impact_difference: c.impact_difference,
        base_score: c.base_score,
        simulated_score: c.simulated_score,
    }
}

fn history_row(r: HistoryRow) -> ProtoHistoryRow {
    ProtoHistoryRow {
        id: r.id,
        user_id: r.user_id.0,
        r#type: r.kind.as_str().to_string(),
        timestamp: r.timestamp.to_rfc3339(),
        total_impact: r.total_impact,
        score: r.score,
        simulated_impact: r.simulated_impact,
        simulated_score: r.simulated_score,
    }
}
