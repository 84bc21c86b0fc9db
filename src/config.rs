use crate::error::{PipelineError, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Immutable run configuration, loaded once at startup and passed by
/// reference to every pipeline stage.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Published spreadsheet URL serving the raw address table as CSV.
    pub remote_url: String,
    /// Local working directory for intermediate files and artifacts.
    pub proj_dir: PathBuf,
    /// Workspace identifier the spatial provider writes output datasets into.
    pub destination: String,
    /// Format tag of the remote table.
    #[serde(default = "default_data_format")]
    pub data_format: String,

    /// Geocoder endpoint prefix; the address query parameter is appended to it.
    pub geocoder_prefix_url: String,
    /// Geocoder endpoint suffix carrying the fixed service parameters
    /// (benchmark, response format).
    pub geocoder_suffix_url: String,
    /// Municipality/state suffix appended to every address before geocoding.
    #[serde(default = "default_address_suffix")]
    pub address_suffix: String,
    /// Header name of the column holding the street address.
    #[serde(default = "default_address_column")]
    pub address_column: String,

    /// Spatial reference code for the materialized point dataset.
    #[serde(default = "default_spatial_ref")]
    pub spatial_ref: u32,
    /// Layers buffered and intersected into the preliminary risk zone.
    #[serde(default = "default_input_layers")]
    pub input_layers: Vec<String>,
    /// Point layer joined against the risk zone.
    #[serde(default = "default_address_layer")]
    pub address_layer: String,
    /// Buffer distance in feet applied to the geocoded points when
    /// producing the avoid zone.
    #[serde(default = "default_avoid_buffer_ft")]
    pub avoid_buffer_ft: f64,

    #[serde(default)]
    pub geocode: GeocodeConfig,

    /// Base datasets seeded into the workspace before the run. Stands in
    /// for the geodatabase layers the provider would otherwise already hold.
    #[serde(default)]
    pub base_layers: Vec<BaseLayer>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeocodeConfig {
    /// Upper bound on concurrent geocode requests.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    /// Retries per address on transport failure. No-match responses are
    /// never retried.
    #[serde(default = "default_retries")]
    pub retries: u32,
}

impl Default for GeocodeConfig {
    fn default() -> Self {
        Self {
            max_in_flight: default_max_in_flight(),
            retries: default_retries(),
        }
    }
}

/// A named dataset preloaded into the provider workspace.
#[derive(Debug, Clone, Deserialize)]
pub struct BaseLayer {
    pub name: String,
    /// Polygon features as [xmin, ymin, xmax, ymax] extents.
    #[serde(default)]
    pub extents: Vec<[f64; 4]>,
    /// Point features as [x, y] pairs.
    #[serde(default)]
    pub points: Vec<[f64; 2]>,
}

fn default_data_format() -> String {
    "csv".to_string()
}

fn default_address_suffix() -> String {
    "Boulder CO".to_string()
}

fn default_address_column() -> String {
    "Street Address".to_string()
}

fn default_spatial_ref() -> u32 {
    // NAD 1983, the Census geocoder default
    4269
}

fn default_input_layers() -> Vec<String> {
    vec![
        "Mosquito_Larval_Sites".to_string(),
        "Wetlands".to_string(),
        "Lakes_and_Reservoirs___Boulder_County".to_string(),
        "OSMP_Properties".to_string(),
    ]
}

fn default_address_layer() -> String {
    "Addresses".to_string()
}

fn default_avoid_buffer_ft() -> f64 {
    1500.0
}

fn default_max_in_flight() -> usize {
    4
}

fn default_retries() -> u32 {
    2
}

impl PipelineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;

        let config: PipelineConfig = toml::from_str(&content)
            .map_err(|e| PipelineError::Config(format!("Invalid config file: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.remote_url.is_empty() {
            return Err(PipelineError::Config("remote_url must not be empty".into()));
        }
        if self.geocoder_prefix_url.is_empty() {
            return Err(PipelineError::Config(
                "geocoder_prefix_url must not be empty".into(),
            ));
        }
        if self.input_layers.is_empty() {
            return Err(PipelineError::Config(
                "input_layers must name at least one layer".into(),
            ));
        }
        if self.avoid_buffer_ft <= 0.0 {
            return Err(PipelineError::Config(
                "avoid_buffer_ft must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_fills_defaults() {
        let toml = r#"
            remote_url = "https://example.com/addresses.csv"
            proj_dir = "/tmp/wnv"
            destination = "wnv.gdb"
            geocoder_prefix_url = "https://geocoding.geo.census.gov/geocoder/locations/onelineaddress"
            geocoder_suffix_url = "&benchmark=2020&format=json"
        "#;
        let config: PipelineConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.address_column, "Street Address");
        assert_eq!(config.spatial_ref, 4269);
        assert_eq!(config.input_layers.len(), 4);
        assert_eq!(config.avoid_buffer_ft, 1500.0);
        assert_eq!(config.geocode.max_in_flight, 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_empty_layer_list() {
        let toml = r#"
            remote_url = "https://example.com/addresses.csv"
            proj_dir = "/tmp/wnv"
            destination = "wnv.gdb"
            geocoder_prefix_url = "https://example.com/geocode"
            geocoder_suffix_url = ""
            input_layers = []
        "#;
        let config: PipelineConfig = toml::from_str(toml).unwrap();
        assert!(matches!(
            config.validate(),
            Err(PipelineError::Config(_))
        ));
    }
}
