use crate::app::ports::HttpClientPort;
use crate::config::{GeocodeConfig, PipelineConfig};
use crate::error::{PipelineError, Result};
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Coordinate pair returned by the geocoding service.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Coordinates {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointCategory {
    Residential,
}

impl fmt::Display for PointCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PointCategory::Residential => write!(f, "Residential"),
        }
    }
}

/// One successfully geocoded address. x/y are always finite.
#[derive(Debug, Clone, Copy)]
pub struct GeocodedPoint {
    pub x: f64,
    pub y: f64,
    pub category: PointCategory,
}

#[derive(Debug, Deserialize)]
struct GeocodeResponse {
    result: Option<GeocodeResult>,
}

#[derive(Debug, Deserialize)]
struct GeocodeResult {
    #[serde(rename = "addressMatches", default)]
    address_matches: Vec<AddressMatch>,
}

#[derive(Debug, Deserialize)]
struct AddressMatch {
    coordinates: Coordinates,
}

/// Client for the one-line-address geocoding endpoint. One request per
/// address; the URL is configured prefix + address query + configured
/// suffix, and the municipality/state suffix is appended to every address
/// before submission.
pub struct GeocodeClient {
    http: Arc<dyn HttpClientPort>,
    prefix_url: String,
    suffix_url: String,
    address_suffix: String,
}

impl GeocodeClient {
    pub fn new(http: Arc<dyn HttpClientPort>, config: &PipelineConfig) -> Self {
        GeocodeClient {
            http,
            prefix_url: config.geocoder_prefix_url.clone(),
            suffix_url: config.geocoder_suffix_url.clone(),
            address_suffix: config.address_suffix.clone(),
        }
    }

    fn request_url(&self, address: &str) -> String {
        let full_address = format!("{} {}", address.trim(), self.address_suffix);
        format!(
            "{}?address={}{}",
            self.prefix_url,
            encode_query_component(&full_address),
            self.suffix_url
        )
    }

    /// Resolves one address. `Ok(None)` means the service had no match for
    /// it (including malformed responses); `Err` means the transport
    /// itself failed and the batch cannot trust further progress.
    pub async fn geocode(&self, address: &str) -> Result<Option<Coordinates>> {
        let url = self.request_url(address);
        debug!("Geocoding: {}", address);

        let response = self
            .http
            .get(&url)
            .await
            .map_err(PipelineError::Transport)?;
        if !(200..300).contains(&response.status) {
            return Err(PipelineError::Transport(format!(
                "geocoder returned status {} for: {address}",
                response.status
            )));
        }

        let parsed: GeocodeResponse = match serde_json::from_str(&response.body) {
            Ok(parsed) => parsed,
            // A body the service could not shape is a no-match, not a fault.
            Err(e) => {
                debug!("Malformed geocode response for {}: {}", address, e);
                return Ok(None);
            }
        };

        let coordinates = parsed
            .result
            .and_then(|r| r.address_matches.into_iter().next())
            .map(|m| m.coordinates);
        match coordinates {
            Some(c) if c.x.is_finite() && c.y.is_finite() => Ok(Some(c)),
            _ => Ok(None),
        }
    }
}

/// Aggregate outcome of geocoding a batch of addresses. `matched`
/// preserves the input row order of the addresses that resolved.
#[derive(Debug, Default)]
pub struct GeocodeBatchReport {
    pub matched: Vec<GeocodedPoint>,
    pub no_match: Vec<String>,
    pub failed: Vec<(String, String)>,
}

impl GeocodeBatchReport {
    pub fn total(&self) -> usize {
        self.matched.len() + self.no_match.len() + self.failed.len()
    }
}

enum RowOutcome {
    Matched(GeocodedPoint),
    NoMatch(String),
    Failed(String, String),
}

/// Batch geocoder: bounded concurrency, per-address retry on transport
/// failures only. No-match outcomes are final on the first attempt.
pub struct GeocodeBatch {
    client: Arc<GeocodeClient>,
    max_in_flight: usize,
    retries: u32,
}

impl GeocodeBatch {
    pub fn new(client: Arc<GeocodeClient>, config: &GeocodeConfig) -> Self {
        GeocodeBatch {
            client,
            max_in_flight: config.max_in_flight.max(1),
            retries: config.retries,
        }
    }

    pub async fn run(&self, addresses: Vec<String>) -> GeocodeBatchReport {
        let semaphore = Arc::new(Semaphore::new(self.max_in_flight));
        let mut tasks: JoinSet<(usize, RowOutcome)> = JoinSet::new();

        for (index, address) in addresses.into_iter().enumerate() {
            let client = Arc::clone(&self.client);
            let semaphore = Arc::clone(&semaphore);
            let retries = self.retries;
            tasks.spawn(async move {
                // Semaphore is never closed while tasks run.
                let _permit = semaphore.acquire().await.unwrap();
                (index, geocode_with_retry(&client, &address, retries).await)
            });
        }

        let mut outcomes: Vec<Option<RowOutcome>> = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let (index, outcome) = match joined {
                Ok(pair) => pair,
                Err(e) => {
                    warn!("Geocode task panicked: {}", e);
                    continue;
                }
            };
            if outcomes.len() <= index {
                outcomes.resize_with(index + 1, || None);
            }
            outcomes[index] = Some(outcome);
        }

        let mut report = GeocodeBatchReport::default();
        for outcome in outcomes.into_iter().flatten() {
            match outcome {
                RowOutcome::Matched(point) => report.matched.push(point),
                RowOutcome::NoMatch(address) => {
                    warn!("No match for: {}", address);
                    report.no_match.push(address);
                }
                RowOutcome::Failed(address, reason) => {
                    warn!("Geocode failed for {}: {}", address, reason);
                    report.failed.push((address, reason));
                }
            }
        }
        report
    }
}

async fn geocode_with_retry(client: &GeocodeClient, address: &str, retries: u32) -> RowOutcome {
    let mut last_error = String::new();
    for attempt in 0..=retries {
        match client.geocode(address).await {
            Ok(Some(c)) => {
                return RowOutcome::Matched(GeocodedPoint {
                    x: c.x,
                    y: c.y,
                    category: PointCategory::Residential,
                })
            }
            Ok(None) => return RowOutcome::NoMatch(address.to_string()),
            Err(e) => {
                last_error = e.to_string();
                if attempt < retries {
                    debug!("Retrying {} after transport error: {}", address, last_error);
                }
            }
        }
    }
    RowOutcome::Failed(address.to_string(), last_error)
}

fn encode_query_component(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            b' ' => out.push('+'),
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}
