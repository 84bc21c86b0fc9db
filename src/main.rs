use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::error;

use wnv_pipeline::app::ports::{SpatialOpsPort, Workspace};
use wnv_pipeline::config::PipelineConfig;
use wnv_pipeline::driver::{PipelineDriver, RunMode, RunOptions};
use wnv_pipeline::infra::{MapProject, MemoryWorkspace, ReqwestHttp};
use wnv_pipeline::observability::logging::init_logging;
use wnv_pipeline::prompt::StdinPrompter;

#[derive(Parser)]
#[command(name = "wnv-pipeline")]
#[command(about = "West Nile Virus outbreak risk-zone analysis pipeline")]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run ETL, spatial analysis, and map export end to end
    Run {
        /// Buffer distance in feet (prompted for when omitted)
        #[arg(long)]
        buffer_distance: Option<f64>,
        /// Name for the intersect output layer (prompted for when omitted)
        #[arg(long)]
        intersect_name: Option<String>,
        /// Subtitle for the map layout (prompted for when omitted)
        #[arg(long)]
        subtitle: Option<String>,
    },
    /// Run only the address ETL (extract, geocode, load)
    Etl,
    /// Run only the spatial analysis and map export
    Analyze {
        #[arg(long)]
        buffer_distance: Option<f64>,
        #[arg(long)]
        intersect_name: Option<String>,
        #[arg(long)]
        subtitle: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load environment variables
    dotenv::dotenv().ok();

    // Initialize logging
    init_logging();

    let config_path = std::env::var("WNV_CONFIG")
        .map(PathBuf::from)
        .unwrap_or(cli.config);
    let config = match PipelineConfig::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration failure: {}", e);
            println!("Could not load configuration from {}: {e}", config_path.display());
            return Ok(());
        }
    };

    let (mode, options) = match cli.command {
        Commands::Run {
            buffer_distance,
            intersect_name,
            subtitle,
        } => (
            RunMode::Full,
            RunOptions {
                buffer_distance_ft: buffer_distance,
                intersect_name,
                subtitle,
            },
        ),
        Commands::Etl => (RunMode::EtlOnly, RunOptions::default()),
        Commands::Analyze {
            buffer_distance,
            intersect_name,
            subtitle,
        } => (
            RunMode::AnalysisOnly,
            RunOptions {
                buffer_distance_ft: buffer_distance,
                intersect_name,
                subtitle,
            },
        ),
    };

    let workspace = Workspace::new(config.destination.clone());
    let spatial = Arc::new(MemoryWorkspace::new());
    spatial.seed_base_layers(&workspace, &config.base_layers).await;

    let presentation = Arc::new(MapProject::new(
        config.proj_dir.clone(),
        "West Nile Virus Outbreak",
    ));

    let driver = PipelineDriver::new(
        config,
        Arc::new(ReqwestHttp),
        spatial as Arc<dyn SpatialOpsPort>,
        presentation,
        Arc::new(StdinPrompter),
    );

    let report = driver.run(mode, options).await;
    if report.succeeded() {
        println!("Pipeline run completed.");
        if let Some(count) = report.at_risk_count {
            println!("Addresses within the risk zone: {count}");
        }
    } else {
        println!("Pipeline run ended early. Check the log file for details.");
    }
    Ok(())
}
