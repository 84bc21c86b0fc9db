pub mod csv;
mod sheet_etl;

pub use sheet_etl::SheetEtl;

use crate::error::Result;
use async_trait::async_trait;
use tracing::{debug, error};

/// Raw address table written by Extract.
pub const RAW_ADDRESSES_FILE: &str = "addresses.csv";
/// Geocoded X,Y,Type table written by Transform.
pub const GEOCODED_ADDRESSES_FILE: &str = "geocoded_addresses.csv";
/// Point dataset materialized by Load.
pub const GEOCODED_POINTS_DATASET: &str = "geocoded_points";
/// Avoid-zone dataset Load produces for the analysis pipeline's erase
/// stage. Load is the sole producer of this dataset and must complete
/// before that stage runs.
pub const AVOID_ZONE_DATASET: &str = "Avoid_Points_buffer";

/// The three-phase spatial ETL contract. `process` runs the phases in
/// order; a failing phase is logged with its name and the remaining
/// phases are not attempted.
#[async_trait]
pub trait SpatialEtl {
    async fn extract(&mut self) -> Result<()>;
    async fn transform(&mut self) -> Result<()>;
    async fn load(&mut self) -> Result<()>;

    async fn process(&mut self) -> Result<()> {
        for stage in [EtlStage::Extract, EtlStage::Transform, EtlStage::Load] {
            debug!("Entering {} stage", stage.name());
            let result = match stage {
                EtlStage::Extract => self.extract().await,
                EtlStage::Transform => self.transform().await,
                EtlStage::Load => self.load().await,
            };
            if let Err(e) = result {
                error!("Error in {} stage: {}", stage.name(), e);
                return Err(e.in_stage(stage.name()));
            }
            debug!("Exiting {} stage", stage.name());
        }
        Ok(())
    }
}

#[derive(Clone, Copy)]
enum EtlStage {
    Extract,
    Transform,
    Load,
}

impl EtlStage {
    fn name(self) -> &'static str {
        match self {
            EtlStage::Extract => "extract",
            EtlStage::Transform => "transform",
            EtlStage::Load => "load",
        }
    }
}
