use async_trait::async_trait;
use std::path::Path;

/// Workspace the spatial provider reads and writes datasets in. Passed
/// explicitly into every provider call; there is no process-wide
/// "current workspace" setting.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Workspace(pub String);

impl Workspace {
    pub fn new(id: impl Into<String>) -> Self {
        Workspace(id.into())
    }
}

/// Opaque reference to a named dataset held by the spatial provider.
/// Only valid once the producing operation has returned Ok.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DatasetHandle {
    pub name: String,
}

impl DatasetHandle {
    pub fn new(name: impl Into<String>) -> Self {
        DatasetHandle { name: name.into() }
    }
}

#[async_trait]
pub trait HttpClientPort: Send + Sync {
    async fn get(&self, url: &str) -> Result<HttpGetResult, String>;
}

#[derive(Clone, Debug)]
pub struct HttpGetResult {
    pub status: u16,
    pub body: String,
}

/// Narrow interface to the spatial operations engine. Every call names
/// its workspace and its output dataset; writing to an existing name
/// overwrites it.
#[async_trait]
pub trait SpatialOpsPort: Send + Sync {
    /// Materializes an X/Y table file as a point dataset.
    async fn points_from_table(
        &self,
        workspace: &Workspace,
        table: &Path,
        x_field: &str,
        y_field: &str,
        spatial_ref: u32,
        out_name: &str,
    ) -> Result<DatasetHandle, String>;

    /// Buffers a named layer by a distance in feet.
    async fn buffer(
        &self,
        workspace: &Workspace,
        input: &str,
        out_name: &str,
        distance_ft: f64,
        dissolve_all: bool,
    ) -> Result<DatasetHandle, String>;

    /// Produces the area common to all input datasets.
    async fn intersect(
        &self,
        workspace: &Workspace,
        inputs: &[DatasetHandle],
        out_name: &str,
    ) -> Result<DatasetHandle, String>;

    /// Subtracts the erase dataset's area from the input dataset.
    async fn erase(
        &self,
        workspace: &Workspace,
        input: &DatasetHandle,
        erase_with: &str,
        out_name: &str,
    ) -> Result<DatasetHandle, String>;

    /// Joins a point layer against a polygon dataset by intersection,
    /// attaching a Join_Count attribute. With `keep_common` set, rows
    /// with no match are dropped rather than nulled.
    async fn spatial_join(
        &self,
        workspace: &Workspace,
        target: &str,
        join: &DatasetHandle,
        out_name: &str,
        keep_common: bool,
    ) -> Result<DatasetHandle, String>;

    /// Counts rows whose named attribute is present and >= `at_least`.
    async fn count_where(
        &self,
        workspace: &Workspace,
        dataset: &DatasetHandle,
        attribute: &str,
        at_least: i64,
    ) -> Result<usize, String>;

    async fn feature_count(&self, workspace: &Workspace, dataset: &str) -> Result<usize, String>;
}

/// Simple-renderer polygon style, RGBA channels.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LayerStyle {
    pub fill_rgba: [u8; 4],
    pub outline_rgba: [u8; 4],
}

/// Map/project/layout surface the driver hands result datasets to.
#[async_trait]
pub trait PresentationPort: Send + Sync {
    async fn add_layer(&self, dataset: &DatasetHandle) -> Result<(), String>;
    async fn set_definition_query(&self, layer: &str, expr: &str) -> Result<(), String>;
    async fn set_symbology(&self, layer: &str, style: &LayerStyle) -> Result<(), String>;
    async fn set_subtitle(&self, subtitle: &str) -> Result<(), String>;
    /// Exports the layout and returns the artifact path.
    async fn export_layout(&self, path: &Path) -> Result<String, String>;
    async fn save_project(&self) -> Result<(), String>;
}

/// Interactive prompt source, injectable so tests can script answers.
pub trait PromptPort: Send + Sync {
    fn ask(&self, question: &str) -> std::io::Result<String>;
}
