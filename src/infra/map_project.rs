use crate::app::ports::{DatasetHandle, LayerStyle, PresentationPort};
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::info;

/// File-backed presentation sink. Layer, symbology, and definition-query
/// directives accumulate in memory; `save_project` persists them as the
/// project state JSON and `export_layout` writes the layout artifact.
pub struct MapProject {
    proj_dir: PathBuf,
    title: String,
    state: Mutex<ProjectState>,
}

#[derive(Debug, Default, Clone, Serialize)]
struct ProjectState {
    title: String,
    subtitle: Option<String>,
    layers: Vec<String>,
    definition_queries: Vec<DefinitionQuery>,
    symbology: Vec<SymbologyEntry>,
}

#[derive(Debug, Clone, Serialize)]
struct DefinitionQuery {
    layer: String,
    expr: String,
}

#[derive(Debug, Clone, Serialize)]
struct SymbologyEntry {
    layer: String,
    fill_rgba: [u8; 4],
    outline_rgba: [u8; 4],
}

impl MapProject {
    pub fn new(proj_dir: impl Into<PathBuf>, title: impl Into<String>) -> Self {
        let title = title.into();
        MapProject {
            proj_dir: proj_dir.into(),
            title: title.clone(),
            state: Mutex::new(ProjectState {
                title,
                ..ProjectState::default()
            }),
        }
    }
}

#[async_trait]
impl PresentationPort for MapProject {
    async fn add_layer(&self, dataset: &DatasetHandle) -> Result<(), String> {
        let mut state = self.state.lock().await;
        state.layers.push(dataset.name.clone());
        info!("Added layer to map: {}", dataset.name);
        Ok(())
    }

    async fn set_definition_query(&self, layer: &str, expr: &str) -> Result<(), String> {
        let mut state = self.state.lock().await;
        if !state.layers.iter().any(|l| l == layer) {
            return Err(format!("layer not in map: {layer}"));
        }
        state.definition_queries.push(DefinitionQuery {
            layer: layer.to_string(),
            expr: expr.to_string(),
        });
        Ok(())
    }

    async fn set_symbology(&self, layer: &str, style: &LayerStyle) -> Result<(), String> {
        let mut state = self.state.lock().await;
        state.symbology.push(SymbologyEntry {
            layer: layer.to_string(),
            fill_rgba: style.fill_rgba,
            outline_rgba: style.outline_rgba,
        });
        Ok(())
    }

    async fn set_subtitle(&self, subtitle: &str) -> Result<(), String> {
        let mut state = self.state.lock().await;
        state.subtitle = Some(subtitle.to_string());
        info!("Updated map title with subtitle: {}", subtitle);
        Ok(())
    }

    async fn export_layout(&self, path: &Path) -> Result<String, String> {
        let state = self.state.lock().await;
        fs::create_dir_all(&self.proj_dir).map_err(|e| e.to_string())?;
        let mut lines = vec![format!("{}", self.title)];
        if let Some(subtitle) = &state.subtitle {
            lines.push(subtitle.clone());
        }
        lines.push(format!("Exported: {}", Utc::now().format("%Y-%m-%d %H:%M:%S")));
        for layer in &state.layers {
            lines.push(format!("Layer: {layer}"));
        }
        fs::write(path, lines.join("\n")).map_err(|e| e.to_string())?;
        info!("Exported map layout to: {}", path.display());
        Ok(path.to_string_lossy().to_string())
    }

    async fn save_project(&self) -> Result<(), String> {
        let state = self.state.lock().await;
        fs::create_dir_all(&self.proj_dir).map_err(|e| e.to_string())?;
        let json = serde_json::to_string_pretty(&*state).map_err(|e| e.to_string())?;
        let path = self.proj_dir.join("project_state.json");
        fs::write(&path, json).map_err(|e| e.to_string())?;
        info!("Saved project state to: {}", path.display());
        Ok(())
    }
}
