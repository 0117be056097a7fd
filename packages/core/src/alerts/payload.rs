use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::NetworkConfig;
use crate::fees::types::{wei_to_gwei, AlertEvent, AlertLevel, Percentile};

/// Structured, display-ready form of an [`AlertEvent`].
///
/// This is the only place fee figures are converted to gwei.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertPayload {
    pub network: String,
    pub network_name: String,
    pub level: AlertLevel,
    /// e.g. "Ultra Low".
    pub title: String,
    pub percentile: Percentile,
    pub fee_gwei: f64,
    pub threshold_gwei: f64,
    pub base_fee_gwei: f64,
    pub priority_fee_gwei: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub l1_surcharge_gwei: Option<f64>,
    pub block_number: u64,
    pub timestamp: DateTime<Utc>,
    pub recommendation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explorer_link: Option<String>,
}

impl AlertPayload {
    /// `network` supplies display name and explorer; falls back to the key.
    pub fn from_event(event: &AlertEvent, network: Option<&NetworkConfig>) -> Self {
        let sample = &event.sample;
        let explorer_link = network
            .and_then(|n| n.explorer_url.as_deref())
            .map(|base| format!("{}/block/{}", base.trim_end_matches('/'), sample.block_number));

        Self {
            network: event.network.clone(),
            network_name: network
                .map(|n| n.name.clone())
                .unwrap_or_else(|| event.network.clone()),
            level: event.level,
            title: title(event.level),
            percentile: event.percentile,
            fee_gwei: wei_to_gwei(event.fee),
            threshold_gwei: wei_to_gwei(event.threshold),
            base_fee_gwei: wei_to_gwei(sample.base_fee),
            priority_fee_gwei: wei_to_gwei(sample.priority_fees.get(event.percentile)),
            l1_surcharge_gwei: sample.l1_surcharge.map(wei_to_gwei),
            block_number: sample.block_number,
            timestamp: sample.timestamp,
            recommendation: event.level.recommendation().to_string(),
            explorer_link,
        }
    }

    /// One-line human summary used by the log notifier.
    pub fn summary(&self) -> String {
        format!(
            "{} {} gas: {:.3} Gwei at {} (threshold {} Gwei, base {:.3}, priority {:.3}) block {}. {}",
            self.network_name,
            self.title,
            self.fee_gwei,
            self.percentile,
            self.threshold_gwei,
            self.base_fee_gwei,
            self.priority_fee_gwei,
            self.block_number,
            self.recommendation
        )
    }
}

fn title(level: AlertLevel) -> String {
    level
        .as_str()
        .split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
