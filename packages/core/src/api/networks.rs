//! Per-network read endpoints.
//!
//! Every figure leaves this module in gwei except the raw samples returned
//! by `/history`, which stay in wei per gas exactly as stored.

use std::collections::BTreeMap;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::Response,
    Json,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::headers::CachePolicy;
use crate::config::NetworkConfig;
use crate::fees::types::{wei_to_gwei, AlertLevel, GasSample, Percentile};
use crate::scheduler::MonitorView;

const HISTORY_CACHE: CachePolicy = CachePolicy::new(5, 10);

pub type ApiError = (StatusCode, Json<Value>);

fn unknown_network(network: &str) -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": format!("Unknown network: {}", network) })),
    )
}

fn network_config<'a>(view: &'a MonitorView, network: &str) -> Result<&'a NetworkConfig, ApiError> {
    view.networks.get(network).ok_or_else(|| unknown_network(network))
}

/// A sample converted for display.
#[derive(Debug, Serialize, Deserialize)]
pub struct SampleView {
    pub network: String,
    pub timestamp: DateTime<Utc>,
    pub block_number: u64,
    pub base_fee_gwei: f64,
    pub priority_fees_gwei: BTreeMap<Percentile, f64>,
    pub total_fees_gwei: BTreeMap<Percentile, f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub l1_surcharge_gwei: Option<f64>,
    /// Fee the alert thresholds are compared against.
    pub alert_fee_gwei: f64,
}

impl SampleView {
    fn new(sample: &GasSample, view: &MonitorView) -> Self {
        Self {
            network: sample.network.clone(),
            timestamp: sample.timestamp,
            block_number: sample.block_number,
            base_fee_gwei: wei_to_gwei(sample.base_fee),
            priority_fees_gwei: Percentile::ALL
                .iter()
                .map(|p| (*p, wei_to_gwei(sample.priority_fees.get(*p))))
                .collect(),
            total_fees_gwei: Percentile::ALL
                .iter()
                .map(|p| (*p, wei_to_gwei(sample.total_fees.get(*p))))
                .collect(),
            l1_surcharge_gwei: sample.l1_surcharge.map(wei_to_gwei),
            alert_fee_gwei: wei_to_gwei(sample.fee_at(view.percentile, view.include_l1_surcharge)),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NetworkSummary {
    pub key: String,
    pub name: String,
    pub chain_id: u64,
    pub native_token: String,
    pub supports_eip1559: bool,
    pub rollup: bool,
    pub poll_interval_secs: u64,
    pub endpoints: usize,
    pub thresholds_gwei: BTreeMap<AlertLevel, f64>,
    pub samples: usize,
    pub latest: Option<SampleView>,
}

pub async fn list_networks(State(view): State<MonitorView>) -> Json<Vec<NetworkSummary>> {
    let summaries = view
        .networks
        .values()
        .map(|network| NetworkSummary {
            key: network.key.clone(),
            name: network.name.clone(),
            chain_id: network.chain_id,
            native_token: network.native_token.clone(),
            supports_eip1559: network.supports_eip1559,
            rollup: network.is_rollup(),
            poll_interval_secs: network.poll_interval.as_secs(),
            endpoints: network.endpoints.len(),
            thresholds_gwei: network.thresholds.clone(),
            samples: view.store.len(&network.key),
            latest: view
                .store
                .latest(&network.key)
                .map(|sample| SampleView::new(&sample, &view)),
        })
        .collect();
    Json(summaries)
}

pub async fn latest(
    State(view): State<MonitorView>,
    Path(network): Path<String>,
) -> Result<Json<SampleView>, ApiError> {
    network_config(&view, &network)?;
    let sample = view.store.latest(&network).ok_or_else(|| {
        (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("No samples yet for {}", network) })),
        )
    })?;
    Ok(Json(SampleView::new(&sample, &view)))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub window: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub network: String,
    pub window: String,
    pub count: usize,
    pub samples: Vec<GasSample>,
}

pub async fn history(
    State(view): State<MonitorView>,
    Path(network): Path<String>,
    Query(params): Query<HistoryQuery>,
    request_headers: HeaderMap,
) -> Result<Response, ApiError> {
    network_config(&view, &network)?;

    let window = params.window.unwrap_or_else(|| "all".to_string());
    let since = match window.as_str() {
        "all" => None,
        other => {
            let duration = parse_window(other).ok_or_else(|| {
                (
                    StatusCode::BAD_REQUEST,
                    Json(json!({ "error": format!("Unsupported window value: {}", other) })),
                )
            })?;
            Some(view.clock.now() - duration)
        }
    };

    let mut samples = view.store.window(&network).unwrap_or_default();
    if let Some(since) = since {
        samples.retain(|sample| sample.timestamp >= since);
    }
    if let Some(limit) = params.limit {
        let skip = samples.len().saturating_sub(limit);
        samples.drain(..skip);
    }

    let modified = samples.last().map(|s| s.timestamp).unwrap_or_else(|| view.clock.now());
    let payload = HistoryResponse {
        network,
        window,
        count: samples.len(),
        samples,
    };
    let body = serde_json::to_vec(&payload).map_err(|err| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": format!("Failed to serialize history: {}", err) })),
        )
    })?;

    Ok(HISTORY_CACHE.respond(&request_headers, body, modified))
}

fn parse_window(value: &str) -> Option<Duration> {
    match value {
        "1h" => Some(Duration::hours(1)),
        "6h" => Some(Duration::hours(6)),
        "24h" => Some(Duration::hours(24)),
        _ => None,
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatsResponse {
    pub network: String,
    pub percentile: Percentile,
    pub count: usize,
    pub min_gwei: Option<f64>,
    pub max_gwei: Option<f64>,
    pub avg_gwei: Option<f64>,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
}

pub async fn stats(
    State(view): State<MonitorView>,
    Path(network): Path<String>,
) -> Result<Json<StatsResponse>, ApiError> {
    network_config(&view, &network)?;
    let stats = view
        .store
        .stats(&network, view.percentile, view.include_l1_surcharge);

    Ok(Json(match stats {
        Some(stats) => StatsResponse {
            network,
            percentile: stats.percentile,
            count: stats.count,
            min_gwei: Some(wei_to_gwei(stats.min)),
            max_gwei: Some(wei_to_gwei(stats.max)),
            avg_gwei: Some(wei_to_gwei(stats.avg)),
            oldest: Some(stats.oldest),
            newest: Some(stats.newest),
        },
        None => StatsResponse {
            network,
            percentile: view.percentile,
            count: 0,
            min_gwei: None,
            max_gwei: None,
            avg_gwei: None,
            oldest: None,
            newest: None,
        },
    }))
}
