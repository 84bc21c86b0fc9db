use super::csv;
use super::{
    SpatialEtl, AVOID_ZONE_DATASET, GEOCODED_ADDRESSES_FILE, GEOCODED_POINTS_DATASET,
    RAW_ADDRESSES_FILE,
};
use crate::app::ports::{HttpClientPort, SpatialOpsPort, Workspace};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::geocode::{GeocodeBatch, GeocodeBatchReport, GeocodeClient};
use async_trait::async_trait;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// ETL over a published spreadsheet: fetch the CSV, geocode every row,
/// materialize the matches as points, and buffer them into the avoid zone.
pub struct SheetEtl {
    config: PipelineConfig,
    http: Arc<dyn HttpClientPort>,
    spatial: Arc<dyn SpatialOpsPort>,
    workspace: Workspace,
    local_path: Option<PathBuf>,
    transformed_path: Option<PathBuf>,
    geocode_report: Option<GeocodeBatchReport>,
}

impl SheetEtl {
    pub fn new(
        config: PipelineConfig,
        http: Arc<dyn HttpClientPort>,
        spatial: Arc<dyn SpatialOpsPort>,
    ) -> Self {
        let workspace = Workspace::new(config.destination.clone());
        SheetEtl {
            config,
            http,
            spatial,
            workspace,
            local_path: None,
            transformed_path: None,
            geocode_report: None,
        }
    }

    /// Aggregate geocoding outcome of the last Transform run.
    pub fn geocode_report(&self) -> Option<&GeocodeBatchReport> {
        self.geocode_report.as_ref()
    }
}

#[async_trait]
impl SpatialEtl for SheetEtl {
    async fn extract(&mut self) -> Result<()> {
        info!("Extracting addresses from {}", self.config.remote_url);
        let response = self
            .http
            .get(&self.config.remote_url)
            .await
            .map_err(PipelineError::Transport)?;
        if !(200..300).contains(&response.status) {
            return Err(PipelineError::Transport(format!(
                "address source returned status {}",
                response.status
            )));
        }

        fs::create_dir_all(&self.config.proj_dir)?;
        let path = self.config.proj_dir.join(RAW_ADDRESSES_FILE);
        csv::write_atomic(&path, &response.body)?;
        info!("Wrote raw address table to {}", path.display());
        self.local_path = Some(path);
        Ok(())
    }

    async fn transform(&mut self) -> Result<()> {
        let input = self.local_path.clone().ok_or_else(|| {
            PipelineError::stage("transform", "extract has not produced the raw address table")
        })?;
        info!("Transforming addresses via geocoding");

        let content = fs::read_to_string(&input)?;
        let addresses = csv::column_values(&content, &self.config.address_column)?;
        info!("Geocoding {} addresses", addresses.len());

        let client = Arc::new(GeocodeClient::new(Arc::clone(&self.http), &self.config));
        let batch = GeocodeBatch::new(client, &self.config.geocode);
        let report = batch.run(addresses).await;

        if !report.failed.is_empty() {
            // Transport-level failures poison the whole batch; a partial
            // output must not be mistaken for a complete one.
            return Err(PipelineError::stage(
                "transform",
                format!(
                    "{} of {} addresses failed at transport level",
                    report.failed.len(),
                    report.total()
                ),
            ));
        }

        let mut output = String::from("X,Y,Type\n");
        for point in &report.matched {
            output.push_str(&format!("{},{},{}\n", point.x, point.y, point.category));
        }

        let path = self.config.proj_dir.join(GEOCODED_ADDRESSES_FILE);
        csv::write_atomic(&path, &output)?;
        info!(
            "Wrote {} geocoded rows ({} without a match) to {}",
            report.matched.len(),
            report.no_match.len(),
            path.display()
        );
        if report.matched.is_empty() {
            warn!("No addresses geocoded; output holds only the header");
        }
        self.transformed_path = Some(path);
        self.geocode_report = Some(report);
        Ok(())
    }

    async fn load(&mut self) -> Result<()> {
        let table = self.transformed_path.clone().ok_or_else(|| {
            PipelineError::stage("load", "transform has not produced the geocoded table")
        })?;
        info!("Loading geocoded addresses into {}", self.workspace.0);

        let points = self
            .spatial
            .points_from_table(
                &self.workspace,
                &table,
                "X",
                "Y",
                self.config.spatial_ref,
                GEOCODED_POINTS_DATASET,
            )
            .await
            .map_err(|e| PipelineError::stage("load", e))?;
        let count = self
            .spatial
            .feature_count(&self.workspace, &points.name)
            .await
            .map_err(|e| PipelineError::stage("load", e))?;
        info!("Loaded {} geocoded points", count);

        self.spatial
            .buffer(
                &self.workspace,
                GEOCODED_POINTS_DATASET,
                AVOID_ZONE_DATASET,
                self.config.avoid_buffer_ft,
                true,
            )
            .await
            .map_err(|e| PipelineError::stage("load", e))?;
        info!(
            "Buffered avoid zone at {} ft into {}",
            self.config.avoid_buffer_ft, AVOID_ZONE_DATASET
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::ports::HttpGetResult;
    use crate::infra::memory_workspace::{Dataset, MemoryWorkspace};

    const RAW_CSV: &str = "Street Address,Owner\n1234 Main St,Smith\nUnknown Place X,Jones\n";
    const MATCH_BODY: &str =
        r#"{"result":{"addressMatches":[{"coordinates":{"x":-105.27,"y":40.01}}]}}"#;
    const EMPTY_BODY: &str = r#"{"result":{"addressMatches":[]}}"#;

    struct RoutedHttp {
        fail_geocoder: bool,
    }

    #[async_trait]
    impl HttpClientPort for RoutedHttp {
        async fn get(&self, url: &str) -> std::result::Result<HttpGetResult, String> {
            let body = if url.contains("sheet.test") {
                RAW_CSV.to_string()
            } else if self.fail_geocoder {
                return Err("connection refused".to_string());
            } else if url.contains("Main") {
                MATCH_BODY.to_string()
            } else {
                EMPTY_BODY.to_string()
            };
            Ok(HttpGetResult { status: 200, body })
        }
    }

    fn config(proj_dir: &std::path::Path) -> PipelineConfig {
        toml::from_str(&format!(
            r#"
            remote_url = "https://sheet.test/pub?output=csv"
            proj_dir = "{}"
            destination = "wnv.gdb"
            geocoder_prefix_url = "https://geocoder.test/onelineaddress"
            geocoder_suffix_url = "&benchmark=2020&format=json"
            [geocode]
            retries = 0
            "#,
            proj_dir.display()
        ))
        .unwrap()
    }

    fn etl(proj_dir: &std::path::Path, fail_geocoder: bool) -> (SheetEtl, Arc<MemoryWorkspace>) {
        let spatial = Arc::new(MemoryWorkspace::new());
        let etl = SheetEtl::new(
            config(proj_dir),
            Arc::new(RoutedHttp { fail_geocoder }),
            Arc::clone(&spatial) as Arc<dyn SpatialOpsPort>,
        );
        (etl, spatial)
    }

    #[tokio::test]
    async fn one_match_one_no_match_yields_one_row() {
        let dir = tempfile::tempdir().unwrap();
        let (mut etl, _) = etl(dir.path(), false);

        etl.extract().await.unwrap();
        etl.transform().await.unwrap();

        let geocoded =
            fs::read_to_string(dir.path().join(GEOCODED_ADDRESSES_FILE)).unwrap();
        assert_eq!(geocoded, "X,Y,Type\n-105.27,40.01,Residential\n");

        let report = etl.geocode_report().unwrap();
        assert_eq!(report.matched.len(), 1);
        assert_eq!(report.no_match, vec!["Unknown Place X".to_string()]);
    }

    #[tokio::test]
    async fn zero_matches_still_writes_the_header() {
        let dir = tempfile::tempdir().unwrap();
        let (mut etl, _) = etl(dir.path(), false);
        // Raw table whose only address never matches.
        fs::create_dir_all(dir.path()).unwrap();
        fs::write(
            dir.path().join(RAW_ADDRESSES_FILE),
            "Street Address\nUnknown Place X\n",
        )
        .unwrap();
        etl.local_path = Some(dir.path().join(RAW_ADDRESSES_FILE));

        etl.transform().await.unwrap();
        let geocoded =
            fs::read_to_string(dir.path().join(GEOCODED_ADDRESSES_FILE)).unwrap();
        assert_eq!(geocoded, "X,Y,Type\n");
    }

    #[tokio::test]
    async fn transform_requires_the_extract_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let (mut etl, _) = etl(dir.path(), false);
        assert!(matches!(
            etl.transform().await,
            Err(PipelineError::Stage { stage: "transform", .. })
        ));
    }

    #[tokio::test]
    async fn transport_failure_aborts_transform_without_an_output_file() {
        let dir = tempfile::tempdir().unwrap();
        let (mut etl, _) = etl(dir.path(), true);

        etl.extract().await.unwrap();
        assert!(etl.transform().await.is_err());
        assert!(!dir.path().join(GEOCODED_ADDRESSES_FILE).exists());
    }

    #[tokio::test]
    async fn load_materializes_points_and_the_avoid_zone() {
        let dir = tempfile::tempdir().unwrap();
        let (mut etl, spatial) = etl(dir.path(), false);
        fs::create_dir_all(dir.path()).unwrap();
        let table = dir.path().join(GEOCODED_ADDRESSES_FILE);
        fs::write(&table, "X,Y,Type\n-105.27,40.01,Residential\n-105.1,40.1,Residential\n")
            .unwrap();
        etl.transformed_path = Some(table);

        etl.load().await.unwrap();

        let workspace = Workspace::new("wnv.gdb");
        match spatial
            .dataset(&workspace, GEOCODED_POINTS_DATASET)
            .await
            .unwrap()
        {
            Dataset::Points(p) => assert_eq!(p.len(), 2),
            _ => panic!("expected points"),
        }
        // Dissolved avoid zone is a single polygon.
        match spatial.dataset(&workspace, AVOID_ZONE_DATASET).await.unwrap() {
            Dataset::Polygons(p) => assert_eq!(p.len(), 1),
            _ => panic!("expected polygons"),
        }
    }

    #[tokio::test]
    async fn process_stops_at_the_failing_stage() {
        let dir = tempfile::tempdir().unwrap();
        let (mut etl, spatial) = etl(dir.path(), true);

        let err = etl.process().await.unwrap_err();
        assert!(matches!(err, PipelineError::Stage { stage: "transform", .. }));
        // Load never ran: nothing was materialized.
        let workspace = Workspace::new("wnv.gdb");
        assert!(spatial
            .dataset(&workspace, GEOCODED_POINTS_DATASET)
            .await
            .is_none());
    }
}
