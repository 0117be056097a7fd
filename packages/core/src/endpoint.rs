//! Per-network RPC endpoint pool.
//!
//! Endpoints are tried in configured order. A failure bumps the endpoint's
//! consecutive-failure counter and moves the active pointer to the next
//! endpoint (wrapping around); a success resets the counter. Endpoints are
//! never removed, so a recovered endpoint rejoins as soon as the rotation
//! reaches it again. The pointer persists across cycles.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::ConfigError;

/// One upstream endpoint and its health counters.
#[derive(Debug, Clone, Serialize)]
pub struct Endpoint {
    /// Position in the configured order; used in logs and metric labels
    /// instead of the URL, which may embed an API key.
    pub index: usize,
    #[serde(skip)]
    pub url: String,
    pub consecutive_failures: u32,
    pub last_success: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct EndpointPool {
    endpoints: Vec<Endpoint>,
    active: usize,
    failed_this_cycle: Vec<bool>,
}

impl EndpointPool {
    pub fn new(network: &str, urls: &[String]) -> Result<Self, ConfigError> {
        if urls.is_empty() {
            return Err(ConfigError::NoEndpoints(network.to_string()));
        }
        let endpoints = urls
            .iter()
            .enumerate()
            .map(|(index, url)| Endpoint {
                index,
                url: url.clone(),
                consecutive_failures: 0,
                last_success: None,
            })
            .collect::<Vec<_>>();
        let failed_this_cycle = vec![false; endpoints.len()];
        Ok(Self {
            endpoints,
            active: 0,
            failed_this_cycle,
        })
    }

    /// The endpoint the next request should go to.
    pub fn current(&self) -> &Endpoint {
        &self.endpoints[self.active]
    }

    /// Start a new poll: forget which endpoints failed during the last one.
    pub fn begin_cycle(&mut self) {
        self.failed_this_cycle.iter_mut().for_each(|failed| *failed = false);
    }

    pub fn report_failure(&mut self, index: usize) {
        let Some(endpoint) = self.endpoints.get_mut(index) else {
            return;
        };
        endpoint.consecutive_failures = endpoint.consecutive_failures.saturating_add(1);
        self.failed_this_cycle[index] = true;
        if index == self.active {
            self.active = (self.active + 1) % self.endpoints.len();
        }
    }

    pub fn report_success(&mut self, index: usize, at: DateTime<Utc>) {
        if let Some(endpoint) = self.endpoints.get_mut(index) {
            endpoint.consecutive_failures = 0;
            endpoint.last_success = Some(at);
        }
    }

    /// True once every endpoint has failed since `begin_cycle`.
    pub fn is_exhausted(&self) -> bool {
        self.failed_this_cycle.iter().all(|failed| *failed)
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}
