//! Operator HTTP gateway
//!
//! A single POST endpoint accepting fleet commands from the ground station
//! UI. The gateway validates and fans out; all actual sending goes through
//! the dispatcher.

use std::collections::HashMap;
use std::sync::Arc;

use aerolink_shared::{CommandReport, FlightCommand, Waypoint};
use axum::{extract::State, routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::dispatch::CommandDispatcher;
use crate::planner::{plan_mission, GeoPoint};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatorCommand {
    Start,
    Stop,
    Plan,
    MissionPlan,
    MissionStart,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorRequest {
    pub command: OperatorCommand,
    #[serde(default)]
    pub drone_name_list: Vec<String>,
    /// Command-specific payload; shape depends on `command`.
    #[serde(default)]
    pub fly_command: Value,
    #[serde(default)]
    pub encrypt: bool,
}

#[derive(Debug, Serialize)]
pub struct OperatorResponse {
    pub status: String,
    pub msg: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub reports: Vec<CommandReport>,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub waypoints: Value,
}

impl OperatorResponse {
    fn failed(msg: impl Into<String>) -> Self {
        Self {
            status: "failed".to_string(),
            msg: msg.into(),
            reports: Vec::new(),
            waypoints: Value::Null,
        }
    }

    fn from_reports(reports: Vec<CommandReport>) -> Self {
        let all_ok = reports.iter().all(CommandReport::is_success);
        Self {
            status: if all_ok { "success" } else { "partial" }.to_string(),
            msg: format!("{} drone(s) addressed", reports.len()),
            reports,
            waypoints: Value::Null,
        }
    }
}

pub struct GatewayState {
    dispatcher: CommandDispatcher,
    /// Plans computed by `mission_plan`, kept for a later `mission_start`.
    plan_cache: tokio::sync::RwLock<HashMap<String, Vec<Waypoint>>>,
}

impl GatewayState {
    pub fn new(dispatcher: CommandDispatcher) -> Self {
        Self {
            dispatcher,
            plan_cache: tokio::sync::RwLock::new(HashMap::new()),
        }
    }
}

pub fn router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/", post(handle_operator_request))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn handle_operator_request(
    State(state): State<Arc<GatewayState>>,
    Json(request): Json<OperatorRequest>,
) -> Json<OperatorResponse> {
    info!(command = ?request.command, drones = request.drone_name_list.len(), "operator request");
    if request.drone_name_list.is_empty() {
        return Json(OperatorResponse::failed("droneNameList must not be empty"));
    }
    let response = match request.command {
        OperatorCommand::Start | OperatorCommand::Stop => flight_command(&state, &request).await,
        OperatorCommand::Plan => direct_plan(&state, &request).await,
        OperatorCommand::MissionPlan => mission_plan(&state, &request).await,
        OperatorCommand::MissionStart => mission_start(&state, &request).await,
    };
    Json(response)
}

/// `start` and `stop` both carry a full flight command in `flyCommand`; the
/// distinction lives in its `specialInstruction` field.
async fn flight_command(state: &GatewayState, request: &OperatorRequest) -> OperatorResponse {
    let command: FlightCommand = match serde_json::from_value(request.fly_command.clone()) {
        Ok(command) => command,
        Err(e) => return OperatorResponse::failed(format!("invalid flyCommand: {e}")),
    };
    let mut reports = Vec::with_capacity(request.drone_name_list.len());
    for name in &request.drone_name_list {
        reports.push(
            state
                .dispatcher
                .dispatch_command(name, &command, request.encrypt)
                .await,
        );
    }
    OperatorResponse::from_reports(reports)
}

/// Operator-authored waypoint list, sent to every listed drone as-is.
async fn direct_plan(state: &GatewayState, request: &OperatorRequest) -> OperatorResponse {
    #[derive(Deserialize)]
    struct PlanBody {
        waypoints: Vec<Waypoint>,
    }
    let body: PlanBody = match serde_json::from_value(request.fly_command.clone()) {
        Ok(body) => body,
        Err(e) => return OperatorResponse::failed(format!("invalid flyCommand: {e}")),
    };
    let reports = request
        .drone_name_list
        .iter()
        .map(|name| state.dispatcher.dispatch_plan(name, body.waypoints.clone()))
        .collect();
    OperatorResponse::from_reports(reports)
}

/// Compute a patrol plan over the requested area, dispatch each drone's lap,
/// and cache it for a later `mission_start`.
async fn mission_plan(state: &GatewayState, request: &OperatorRequest) -> OperatorResponse {
    #[derive(Deserialize)]
    struct AreaBody {
        area: Vec<GeoPoint>,
    }
    let body: AreaBody = match serde_json::from_value(request.fly_command.clone()) {
        Ok(body) => body,
        Err(e) => return OperatorResponse::failed(format!("invalid flyCommand: {e}")),
    };
    let plan = match plan_mission(&body.area, &request.drone_name_list) {
        Ok(plan) => plan,
        Err(e) => return OperatorResponse::failed(e.to_string()),
    };

    let mut cache = state.plan_cache.write().await;
    let mut reports = Vec::with_capacity(plan.len());
    for (name, lap) in &plan {
        reports.push(state.dispatcher.dispatch_plan(name, lap.clone()));
        cache.insert(name.clone(), lap.clone());
    }
    drop(cache);

    let mut response = OperatorResponse::from_reports(reports);
    response.waypoints = json!(plan);
    response
}

/// Re-dispatch the cached plan, for drones that missed or aborted it.
async fn mission_start(state: &GatewayState, request: &OperatorRequest) -> OperatorResponse {
    let cache = state.plan_cache.read().await;
    let reports = request
        .drone_name_list
        .iter()
        .map(|name| match cache.get(name) {
            Some(lap) => state.dispatcher.dispatch_plan(name, lap.clone()),
            None => CommandReport::error(name, "no cached mission plan for this drone"),
        })
        .collect();
    OperatorResponse::from_reports(reports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use aerolink_shared::{
        DataType, Envelope, MemoryKeyStore, OutboundMessage, TransportSender,
    };
    use tokio::sync::mpsc;

    fn gateway() -> (Arc<GatewayState>, mpsc::UnboundedReceiver<OutboundMessage>) {
        let (sender, rx) = TransportSender::channel();
        let dispatcher =
            CommandDispatcher::new(sender, Arc::new(MemoryKeyStore::new()), "flightControl");
        (Arc::new(GatewayState::new(dispatcher)), rx)
    }

    fn request(command: OperatorCommand, drones: &[&str], fly_command: Value) -> OperatorRequest {
        OperatorRequest {
            command,
            drone_name_list: drones.iter().map(|s| s.to_string()).collect(),
            fly_command,
            encrypt: false,
        }
    }

    #[tokio::test]
    async fn start_fans_out_to_every_drone() {
        let (state, mut rx) = gateway();
        let req = request(
            OperatorCommand::Start,
            &["alpha", "bravo"],
            json!({ "specialInstruction": "takeOff" }),
        );
        let Json(response) = handle_operator_request(State(state), Json(req)).await;
        assert_eq!(response.status, "success");
        assert_eq!(response.reports.len(), 2);

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.routing_key, "alpha");
        assert_eq!(second.routing_key, "bravo");
    }

    #[tokio::test]
    async fn invalid_fly_command_is_rejected_without_dispatch() {
        let (state, mut rx) = gateway();
        let req = request(
            OperatorCommand::Start,
            &["alpha"],
            json!({ "specialInstruction": "selfDestruct" }),
        );
        let Json(response) = handle_operator_request(State(state), Json(req)).await;
        assert_eq!(response.status, "failed");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn empty_drone_list_is_rejected() {
        let (state, _rx) = gateway();
        let req = request(OperatorCommand::Start, &[], json!({}));
        let Json(response) = handle_operator_request(State(state), Json(req)).await;
        assert_eq!(response.status, "failed");
    }

    #[tokio::test]
    async fn mission_plan_dispatches_and_caches_per_drone_laps() {
        let (state, mut rx) = gateway();
        let area = json!({ "area": [
            { "lat": 0.0, "lon": 0.0 },
            { "lat": 0.0, "lon": 1.0 },
            { "lat": 1.0, "lon": 1.0 },
            { "lat": 1.0, "lon": 0.0 },
        ]});
        let req = request(OperatorCommand::MissionPlan, &["alpha", "bravo"], area);
        let Json(response) = handle_operator_request(State(state.clone()), Json(req)).await;
        assert_eq!(response.status, "success");
        assert!(response.waypoints.get("alpha").is_some());

        for expected in ["alpha", "bravo"] {
            let msg = rx.recv().await.unwrap();
            assert_eq!(msg.routing_key, expected);
            let envelope = Envelope::from_bytes(&msg.payload).unwrap();
            assert_eq!(envelope.data_type, DataType::Plan);
        }

        // mission_start replays the cached plan for one drone.
        let req = request(OperatorCommand::MissionStart, &["bravo"], Value::Null);
        let Json(response) = handle_operator_request(State(state), Json(req)).await;
        assert_eq!(response.status, "success");
        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.routing_key, "bravo");
    }

    #[tokio::test]
    async fn mission_start_without_a_cached_plan_reports_error() {
        let (state, _rx) = gateway();
        let req = request(OperatorCommand::MissionStart, &["ghost"], Value::Null);
        let Json(response) = handle_operator_request(State(state), Json(req)).await;
        assert_eq!(response.status, "partial");
        assert!(!response.reports[0].is_success());
    }

    #[tokio::test]
    async fn undersized_area_fails_planning() {
        let (state, _rx) = gateway();
        let area = json!({ "area": [
            { "lat": 0.0, "lon": 0.0 },
            { "lat": 1.0, "lon": 1.0 },
        ]});
        let req = request(OperatorCommand::MissionPlan, &["alpha"], area);
        let Json(response) = handle_operator_request(State(state), Json(req)).await;
        assert_eq!(response.status, "failed");
    }
}
