use crate::app::ports::{DatasetHandle, SpatialOpsPort, Workspace};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::etl::AVOID_ZONE_DATASET;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Post-erase risk zone, the canonical analysis result.
pub const RISK_ZONE_DATASET: &str = "Risk_Zone_Cleaned";
/// Addresses joined against the risk zone for the at-risk count.
pub const AT_RISK_DATASET: &str = "Addresses_At_Risk";
/// Addresses joined against the risk zone for presentation.
pub const TARGET_ADDRESSES_DATASET: &str = "Target_Addresses";

/// Caller-supplied analysis inputs; everything else is fixed by config.
#[derive(Debug, Clone)]
pub struct AnalysisParams {
    pub buffer_distance_ft: f64,
    pub intersect_name: String,
}

/// One buffered output per configured input layer. A layer whose buffer
/// failed holds `None`; intersect refuses to run on a partial set.
pub struct BufferSet {
    entries: Vec<(String, Option<DatasetHandle>)>,
}

impl BufferSet {
    pub fn missing(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(_, handle)| handle.is_none())
            .map(|(layer, _)| layer.as_str())
            .collect()
    }

    pub fn handles(&self) -> Vec<DatasetHandle> {
        self.entries
            .iter()
            .filter_map(|(_, handle)| handle.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug)]
pub struct AnalysisOutputs {
    pub intersect: DatasetHandle,
    pub risk_zone: DatasetHandle,
    pub addresses_at_risk: DatasetHandle,
    pub at_risk_count: usize,
    pub target_addresses: DatasetHandle,
}

/// Six-stage risk-zone derivation: buffer each input layer, intersect the
/// buffers, erase the ETL-produced avoid zone, join addresses for the
/// at-risk count, and independently join the final target addresses.
pub struct SpatialAnalysis {
    config: PipelineConfig,
    spatial: Arc<dyn SpatialOpsPort>,
    workspace: Workspace,
}

impl SpatialAnalysis {
    pub fn new(config: PipelineConfig, spatial: Arc<dyn SpatialOpsPort>) -> Self {
        let workspace = Workspace::new(config.destination.clone());
        SpatialAnalysis {
            config,
            spatial,
            workspace,
        }
    }

    /// Buffers every configured input layer at one distance. Per-layer
    /// failures are logged and recorded as missing entries rather than
    /// aborting the batch.
    pub async fn buffer_layers(&self, distance_ft: f64) -> BufferSet {
        let mut entries = Vec::with_capacity(self.config.input_layers.len());
        for layer in &self.config.input_layers {
            debug!("Buffering {} at {} ft", layer, distance_ft);
            let out_name = format!("{layer}_buffer");
            match self
                .spatial
                .buffer(&self.workspace, layer, &out_name, distance_ft, true)
                .await
            {
                Ok(handle) => {
                    info!("Buffer created for {}", layer);
                    entries.push((layer.clone(), Some(handle)));
                }
                Err(e) => {
                    error!("Error buffering {}: {}", layer, e);
                    entries.push((layer.clone(), None));
                }
            }
        }
        BufferSet { entries }
    }

    /// Intersects the whole buffer set. Fails fast when any buffer is
    /// missing rather than silently operating on a partial set.
    pub async fn intersect_buffers(
        &self,
        buffers: &BufferSet,
        out_name: &str,
    ) -> Result<DatasetHandle> {
        let missing = buffers.missing();
        if !missing.is_empty() {
            return Err(PipelineError::stage(
                "intersect",
                format!("missing buffers for: {}", missing.join(", ")),
            ));
        }
        info!("Running intersect on {} buffer layers", buffers.len());
        self.spatial
            .intersect(&self.workspace, &buffers.handles(), out_name)
            .await
            .map_err(|e| PipelineError::stage("intersect", e))
    }

    /// Subtracts the avoid zone produced by the ETL load phase, yielding
    /// the cleaned risk zone.
    pub async fn erase_avoid_zones(&self, intersect: &DatasetHandle) -> Result<DatasetHandle> {
        self.spatial
            .erase(
                &self.workspace,
                intersect,
                AVOID_ZONE_DATASET,
                RISK_ZONE_DATASET,
            )
            .await
            .map_err(|e| PipelineError::stage("erase", e))
    }

    pub async fn join_addresses_at_risk(&self, risk_zone: &DatasetHandle) -> Result<DatasetHandle> {
        self.spatial
            .spatial_join(
                &self.workspace,
                &self.config.address_layer,
                risk_zone,
                AT_RISK_DATASET,
                true,
            )
            .await
            .map_err(|e| PipelineError::stage("spatial join", e))
    }

    pub async fn count_at_risk(&self, joined: &DatasetHandle) -> Result<usize> {
        let count = self
            .spatial
            .count_where(&self.workspace, joined, "Join_Count", 1)
            .await
            .map_err(|e| PipelineError::stage("count", e))?;
        info!("Number of addresses within the risk zone: {}", count);
        Ok(count)
    }

    /// Second, independent join of the address layer against the risk
    /// zone. Kept separate from the at-risk join on purpose: the two
    /// outputs feed different consumers.
    pub async fn join_target_addresses(&self, risk_zone: &DatasetHandle) -> Result<DatasetHandle> {
        self.spatial
            .spatial_join(
                &self.workspace,
                &self.config.address_layer,
                risk_zone,
                TARGET_ADDRESSES_DATASET,
                true,
            )
            .await
            .map_err(|e| PipelineError::stage("target join", e))
    }

    /// Runs the full chain. Any stage failure halts the remainder; no
    /// handle from a failed stage ever reaches a later one.
    pub async fn run(&self, params: &AnalysisParams) -> Result<AnalysisOutputs> {
        let buffers = self.buffer_layers(params.buffer_distance_ft).await;
        let intersect = self
            .intersect_buffers(&buffers, &params.intersect_name)
            .await?;
        info!("Intersect complete: {}", intersect.name);

        let risk_zone = self.erase_avoid_zones(&intersect).await?;
        info!("Erase complete: {}", risk_zone.name);

        let addresses_at_risk = self.join_addresses_at_risk(&risk_zone).await?;
        info!("Spatial join complete: {}", addresses_at_risk.name);
        let at_risk_count = self.count_at_risk(&addresses_at_risk).await?;

        let target_addresses = self.join_target_addresses(&risk_zone).await?;
        info!("Target join complete: {}", target_addresses.name);

        Ok(AnalysisOutputs {
            intersect,
            risk_zone,
            addresses_at_risk,
            at_risk_count,
            target_addresses,
        })
    }
}
