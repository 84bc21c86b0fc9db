use crate::analysis::{
    AnalysisOutputs, AnalysisParams, SpatialAnalysis, RISK_ZONE_DATASET, TARGET_ADDRESSES_DATASET,
};
use crate::app::ports::{
    HttpClientPort, LayerStyle, PresentationPort, PromptPort, SpatialOpsPort,
};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::etl::{SheetEtl, SpatialEtl};
use crate::prompt::prompt_buffer_distance;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Layout artifact exported by the presentation phase.
pub const LAYOUT_EXPORT_FILE: &str = "WestNileOutbreakMap.pdf";

/// Answers the driver would otherwise ask for interactively.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub buffer_distance_ft: Option<f64>,
    pub intersect_name: Option<String>,
    pub subtitle: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// ETL, analysis, and presentation.
    Full,
    /// ETL only.
    EtlOnly,
    /// Analysis and presentation over an existing avoid zone.
    AnalysisOnly,
}

#[derive(Debug, Serialize)]
pub struct PhaseOutcome {
    pub phase: &'static str,
    pub success: bool,
    pub detail: String,
}

/// Summary of one pipeline run, persisted alongside the other artifacts.
#[derive(Debug, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub phases: Vec<PhaseOutcome>,
    pub geocoded: Option<usize>,
    pub no_match: Option<usize>,
    pub at_risk_count: Option<usize>,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.phases.iter().all(|p| p.success)
    }
}

/// Sequences the ETL pipeline, the spatial analysis pipeline, and the
/// presentation sink. Each phase runs inside its own failure boundary: a
/// failing phase is logged with its name and reported to the user, later
/// phases are skipped, and artifacts already produced stay in place.
pub struct PipelineDriver {
    config: PipelineConfig,
    http: Arc<dyn HttpClientPort>,
    spatial: Arc<dyn SpatialOpsPort>,
    presentation: Arc<dyn PresentationPort>,
    prompt: Arc<dyn PromptPort>,
}

impl PipelineDriver {
    pub fn new(
        config: PipelineConfig,
        http: Arc<dyn HttpClientPort>,
        spatial: Arc<dyn SpatialOpsPort>,
        presentation: Arc<dyn PresentationPort>,
        prompt: Arc<dyn PromptPort>,
    ) -> Self {
        PipelineDriver {
            config,
            http,
            spatial,
            presentation,
            prompt,
        }
    }

    pub async fn run(&self, mode: RunMode, options: RunOptions) -> RunReport {
        let started_at = Utc::now();
        let mut phases = Vec::new();
        let mut geocoded = None;
        let mut no_match = None;
        let mut at_risk_count = None;

        info!("Starting West Nile Virus outbreak run");

        let etl_ok = if mode == RunMode::AnalysisOnly {
            true
        } else {
            match self.run_etl_phase().await {
                Ok((matched, unmatched)) => {
                    geocoded = Some(matched);
                    no_match = Some(unmatched);
                    phases.push(PhaseOutcome {
                        phase: "etl",
                        success: true,
                        detail: format!("{matched} geocoded, {unmatched} without a match"),
                    });
                    true
                }
                Err(e) => {
                    error!("Error in etl phase: {}", e);
                    println!("An error occurred in the etl phase. Check the log file for details.");
                    phases.push(PhaseOutcome {
                        phase: "etl",
                        success: false,
                        detail: e.to_string(),
                    });
                    false
                }
            }
        };

        if etl_ok && mode != RunMode::EtlOnly {
            match self.run_analysis_phase(&options).await {
                Ok(outputs) => {
                    at_risk_count = Some(outputs.at_risk_count);
                    phases.push(PhaseOutcome {
                        phase: "analysis",
                        success: true,
                        detail: format!("{} addresses at risk", outputs.at_risk_count),
                    });

                    match self.run_presentation_phase(&outputs, &options).await {
                        Ok(exported) => phases.push(PhaseOutcome {
                            phase: "presentation",
                            success: true,
                            detail: format!("layout exported to {exported}"),
                        }),
                        Err(e) => {
                            error!("Error in presentation phase: {}", e);
                            println!(
                                "An error occurred in the presentation phase. Check the log file for details."
                            );
                            phases.push(PhaseOutcome {
                                phase: "presentation",
                                success: false,
                                detail: e.to_string(),
                            });
                        }
                    }
                }
                Err(e) => {
                    error!("Error in analysis phase: {}", e);
                    println!(
                        "An error occurred in the analysis phase. Check the log file for details."
                    );
                    phases.push(PhaseOutcome {
                        phase: "analysis",
                        success: false,
                        detail: e.to_string(),
                    });
                }
            }
        }

        let report = RunReport {
            started_at,
            finished_at: Utc::now(),
            phases,
            geocoded,
            no_match,
            at_risk_count,
        };
        self.persist_report(&report);
        report
    }

    async fn run_etl_phase(&self) -> Result<(usize, usize)> {
        let mut etl = SheetEtl::new(
            self.config.clone(),
            Arc::clone(&self.http),
            Arc::clone(&self.spatial),
        );
        etl.process().await?;
        let report = etl
            .geocode_report()
            .ok_or_else(|| PipelineError::stage("etl", "transform produced no geocode report"))?;
        Ok((report.matched.len(), report.no_match.len()))
    }

    async fn run_analysis_phase(&self, options: &RunOptions) -> Result<AnalysisOutputs> {
        let params = self.resolve_params(options)?;
        let analysis = SpatialAnalysis::new(self.config.clone(), Arc::clone(&self.spatial));
        analysis.run(&params).await
    }

    fn resolve_params(&self, options: &RunOptions) -> Result<AnalysisParams> {
        let buffer_distance_ft = match options.buffer_distance_ft {
            Some(d) if d > 0.0 => d,
            Some(d) => {
                return Err(PipelineError::Config(format!(
                    "buffer distance must be positive, got {d}"
                )))
            }
            None => prompt_buffer_distance(self.prompt.as_ref())?,
        };
        let intersect_name = match &options.intersect_name {
            Some(name) if !name.trim().is_empty() => name.trim().to_string(),
            _ => self
                .prompt
                .ask("Enter name for the intersect output layer: ")?,
        };
        Ok(AnalysisParams {
            buffer_distance_ft,
            intersect_name,
        })
    }

    async fn run_presentation_phase(
        &self,
        outputs: &AnalysisOutputs,
        options: &RunOptions,
    ) -> Result<String> {
        let present = self.presentation.as_ref();
        for handle in [
            &outputs.intersect,
            &outputs.risk_zone,
            &outputs.addresses_at_risk,
            &outputs.target_addresses,
        ] {
            present
                .add_layer(handle)
                .await
                .map_err(|e| PipelineError::stage("presentation", e))?;
        }
        present
            .set_definition_query(TARGET_ADDRESSES_DATASET, "Join_Count = 1")
            .await
            .map_err(|e| PipelineError::stage("presentation", e))?;
        present
            .set_symbology(
                RISK_ZONE_DATASET,
                &LayerStyle {
                    fill_rgba: [255, 0, 0, 127],
                    outline_rgba: [0, 0, 0, 255],
                },
            )
            .await
            .map_err(|e| PipelineError::stage("presentation", e))?;

        let subtitle = match &options.subtitle {
            Some(subtitle) => subtitle.clone(),
            None => self.prompt.ask("Enter a subtitle for your map layout: ")?,
        };
        if !subtitle.is_empty() {
            present
                .set_subtitle(&subtitle)
                .await
                .map_err(|e| PipelineError::stage("presentation", e))?;
        }

        let layout_path = self.config.proj_dir.join(LAYOUT_EXPORT_FILE);
        let exported = present
            .export_layout(&layout_path)
            .await
            .map_err(|e| PipelineError::stage("presentation", e))?;
        present
            .save_project()
            .await
            .map_err(|e| PipelineError::stage("presentation", e))?;
        Ok(exported)
    }

    fn persist_report(&self, report: &RunReport) {
        let filename = format!("run_report_{}.json", report.started_at.format("%Y%m%d_%H%M%S"));
        let path = self.config.proj_dir.join(filename);
        let write = fs::create_dir_all(&self.config.proj_dir)
            .and_then(|_| fs::write(&path, serde_json::to_string_pretty(report).unwrap_or_default()));
        match write {
            Ok(()) => info!("Run report written to {}", path.display()),
            Err(e) => warn!("Could not write run report: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::AT_RISK_DATASET;
    use crate::app::ports::{DatasetHandle, HttpGetResult, Workspace};
    use crate::etl::AVOID_ZONE_DATASET;
    use crate::infra::map_project::MapProject;
    use crate::infra::memory_workspace::{Dataset, Extent, MemoryWorkspace, PointFeature};
    use async_trait::async_trait;
    use std::io;
    use std::sync::Mutex;

    const RAW_CSV: &str = "Street Address\n1234 Main St\nUnknown Place X\n";
    const MATCH_BODY: &str =
        r#"{"result":{"addressMatches":[{"coordinates":{"x":2000.0,"y":2000.0}}]}}"#;
    const EMPTY_BODY: &str = r#"{"result":{"addressMatches":[]}}"#;

    struct RoutedHttp {
        fail_sheet: bool,
    }

    #[async_trait]
    impl HttpClientPort for RoutedHttp {
        async fn get(&self, url: &str) -> std::result::Result<HttpGetResult, String> {
            let body = if url.contains("sheet.test") {
                if self.fail_sheet {
                    return Err("connection refused".to_string());
                }
                RAW_CSV.to_string()
            } else if url.contains("Main") {
                MATCH_BODY.to_string()
            } else {
                EMPTY_BODY.to_string()
            };
            Ok(HttpGetResult { status: 200, body })
        }
    }

    struct ScriptedPrompter {
        answers: Mutex<Vec<String>>,
    }

    impl ScriptedPrompter {
        fn new(answers: &[&str]) -> Self {
            ScriptedPrompter {
                answers: Mutex::new(answers.iter().rev().map(|s| s.to_string()).collect()),
            }
        }
    }

    impl PromptPort for ScriptedPrompter {
        fn ask(&self, _question: &str) -> io::Result<String> {
            self.answers
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "out of answers"))
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
            input_layers = ["Mosquito_Larval_Sites", "Wetlands"]
            [geocode]
            retries = 0
            "#,
            proj_dir.display()
        ))
        .unwrap()
    }

    fn ws() -> Workspace {
        Workspace::new("wnv.gdb")
    }

    async fn seeded_provider() -> Arc<MemoryWorkspace> {
        let provider = Arc::new(MemoryWorkspace::new());
        provider
            .seed(
                &ws(),
                "Mosquito_Larval_Sites",
                Dataset::Polygons(vec![Extent::new(0.0, 0.0, 4000.0, 4000.0)]),
            )
            .await;
        provider
            .seed(
                &ws(),
                "Wetlands",
                Dataset::Polygons(vec![Extent::new(500.0, 500.0, 4500.0, 4500.0)]),
            )
            .await;
        provider
            .seed(
                &ws(),
                "Addresses",
                Dataset::Points(vec![
                    PointFeature {
                        x: 1000.0,
                        y: 1000.0,
                        category: None,
                        join_count: None,
                    },
                    PointFeature {
                        x: 90000.0,
                        y: 90000.0,
                        category: None,
                        join_count: None,
                    },
                ]),
            )
            .await;
        provider
    }

    fn driver(
        proj_dir: &std::path::Path,
        provider: Arc<MemoryWorkspace>,
        fail_sheet: bool,
        answers: &[&str],
    ) -> PipelineDriver {
        PipelineDriver::new(
            config(proj_dir),
            Arc::new(RoutedHttp { fail_sheet }),
            provider as Arc<dyn SpatialOpsPort>,
            Arc::new(MapProject::new(proj_dir, "West Nile Virus Outbreak")),
            Arc::new(ScriptedPrompter::new(answers)),
        )
    }

    #[tokio::test]
    async fn full_run_reports_every_phase_and_exports_the_layout() {
        let dir = tempfile::tempdir().unwrap();
        let provider = seeded_provider().await;
        let driver = driver(
            dir.path(),
            Arc::clone(&provider),
            false,
            &["500", "High_Risk_Zones", "Boulder County"],
        );

        let report = driver.run(RunMode::Full, RunOptions::default()).await;

        assert!(report.succeeded(), "phases: {:?}", report.phases);
        assert_eq!(report.geocoded, Some(1));
        assert_eq!(report.no_match, Some(1));
        // The single geocoded point sits inside the overlap, so its avoid
        // buffer erases the area around it and leaves that address out.
        assert_eq!(report.at_risk_count, Some(0));

        assert!(dir.path().join(LAYOUT_EXPORT_FILE).exists());
        assert!(dir.path().join("project_state.json").exists());
        assert!(provider.dataset(&ws(), AVOID_ZONE_DATASET).await.is_some());
        assert!(provider.dataset(&ws(), RISK_ZONE_DATASET).await.is_some());
    }

    #[tokio::test]
    async fn flags_bypass_the_prompts() {
        let dir = tempfile::tempdir().unwrap();
        let provider = seeded_provider().await;
        // No scripted answers at all: prompting would error out.
        let driver = driver(dir.path(), provider, false, &[]);

        let report = driver
            .run(
                RunMode::Full,
                RunOptions {
                    buffer_distance_ft: Some(500.0),
                    intersect_name: Some("High_Risk_Zones".to_string()),
                    subtitle: Some("Boulder County".to_string()),
                },
            )
            .await;
        assert!(report.succeeded(), "phases: {:?}", report.phases);
    }

    #[tokio::test]
    async fn etl_failure_skips_analysis_and_presentation() {
        let dir = tempfile::tempdir().unwrap();
        let provider = seeded_provider().await;
        let driver = driver(dir.path(), Arc::clone(&provider), true, &[]);

        let report = driver.run(RunMode::Full, RunOptions::default()).await;

        assert_eq!(report.phases.len(), 1);
        assert_eq!(report.phases[0].phase, "etl");
        assert!(!report.phases[0].success);
        assert!(report.at_risk_count.is_none());
        assert!(provider.dataset(&ws(), RISK_ZONE_DATASET).await.is_none());
    }

    #[tokio::test]
    async fn analysis_failure_leaves_earlier_artifacts_in_place() {
        let dir = tempfile::tempdir().unwrap();
        // No base layers seeded: every buffer fails and intersect refuses.
        let provider = Arc::new(MemoryWorkspace::new());
        provider
            .seed(&ws(), "Addresses", Dataset::Points(vec![]))
            .await;
        let driver = driver(
            dir.path(),
            Arc::clone(&provider),
            false,
            &["500", "High_Risk_Zones"],
        );

        let report = driver.run(RunMode::Full, RunOptions::default()).await;

        assert_eq!(report.phases.len(), 2);
        assert!(report.phases[0].success);
        assert!(!report.phases[1].success);
        assert!(report.phases[1].detail.contains("missing buffers"));
        // The ETL phase's artifacts are not rolled back.
        assert!(provider.dataset(&ws(), AVOID_ZONE_DATASET).await.is_some());
        assert!(provider.dataset(&ws(), AT_RISK_DATASET).await.is_none());
    }

    #[tokio::test]
    async fn etl_only_mode_stops_after_load() {
        let dir = tempfile::tempdir().unwrap();
        let provider = seeded_provider().await;
        let driver = driver(dir.path(), Arc::clone(&provider), false, &[]);

        let report = driver.run(RunMode::EtlOnly, RunOptions::default()).await;

        assert!(report.succeeded());
        assert_eq!(report.phases.len(), 1);
        assert!(provider.dataset(&ws(), AVOID_ZONE_DATASET).await.is_some());
        assert!(provider.dataset(&ws(), RISK_ZONE_DATASET).await.is_none());
    }
}
