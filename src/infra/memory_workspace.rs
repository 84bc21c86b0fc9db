use crate::app::ports::{DatasetHandle, SpatialOpsPort, Workspace};
use crate::config::BaseLayer;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tokio::sync::Mutex;

/// Axis-aligned planar extent. The in-memory provider models every polygon
/// as one or more extents, which is enough to honor the buffer/intersect/
/// erase/join contracts deterministically.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Extent {
    pub xmin: f64,
    pub ymin: f64,
    pub xmax: f64,
    pub ymax: f64,
}

impl Extent {
    pub fn new(xmin: f64, ymin: f64, xmax: f64, ymax: f64) -> Self {
        Extent { xmin, ymin, xmax, ymax }
    }

    fn expand(self, distance: f64) -> Self {
        Extent {
            xmin: self.xmin - distance,
            ymin: self.ymin - distance,
            xmax: self.xmax + distance,
            ymax: self.ymax + distance,
        }
    }

    fn union(self, other: Self) -> Self {
        Extent {
            xmin: self.xmin.min(other.xmin),
            ymin: self.ymin.min(other.ymin),
            xmax: self.xmax.max(other.xmax),
            ymax: self.ymax.max(other.ymax),
        }
    }

    fn intersection(self, other: Self) -> Option<Self> {
        let out = Extent {
            xmin: self.xmin.max(other.xmin),
            ymin: self.ymin.max(other.ymin),
            xmax: self.xmax.min(other.xmax),
            ymax: self.ymax.min(other.ymax),
        };
        (out.xmin < out.xmax && out.ymin < out.ymax).then_some(out)
    }

    fn contains(self, x: f64, y: f64) -> bool {
        x >= self.xmin && x <= self.xmax && y >= self.ymin && y <= self.ymax
    }

    /// Removes `other`'s area. Yields None when fully covered, otherwise
    /// the largest rectangular remainder.
    fn subtract(self, other: Self) -> Option<Self> {
        let overlap = match self.intersection(other) {
            Some(o) => o,
            None => return Some(self),
        };
        if overlap == self {
            return None;
        }
        let candidates = [
            Extent::new(self.xmin, self.ymin, overlap.xmin, self.ymax),
            Extent::new(overlap.xmax, self.ymin, self.xmax, self.ymax),
            Extent::new(self.xmin, self.ymin, self.xmax, overlap.ymin),
            Extent::new(self.xmin, overlap.ymax, self.xmax, self.ymax),
        ];
        candidates
            .into_iter()
            .filter(|e| e.xmin < e.xmax && e.ymin < e.ymax)
            .max_by(|a, b| {
                let area_a = (a.xmax - a.xmin) * (a.ymax - a.ymin);
                let area_b = (b.xmax - b.xmin) * (b.ymax - b.ymin);
                area_a.total_cmp(&area_b)
            })
    }
}

#[derive(Clone, Debug)]
pub struct PointFeature {
    pub x: f64,
    pub y: f64,
    pub category: Option<String>,
    pub join_count: Option<i64>,
}

#[derive(Clone, Debug)]
pub enum Dataset {
    Points(Vec<PointFeature>),
    Polygons(Vec<Extent>),
}

impl Dataset {
    fn len(&self) -> usize {
        match self {
            Dataset::Points(p) => p.len(),
            Dataset::Polygons(p) => p.len(),
        }
    }
}

/// Deterministic in-process implementation of the spatial provider.
/// Datasets live in named workspaces; writing to an existing dataset name
/// overwrites it.
pub struct MemoryWorkspace {
    datasets: Mutex<HashMap<String, HashMap<String, Dataset>>>,
}

impl MemoryWorkspace {
    pub fn new() -> Self {
        MemoryWorkspace {
            datasets: Mutex::new(HashMap::new()),
        }
    }

    pub async fn seed(&self, workspace: &Workspace, name: &str, dataset: Dataset) {
        let mut guard = self.datasets.lock().await;
        guard
            .entry(workspace.0.clone())
            .or_default()
            .insert(name.to_string(), dataset);
    }

    /// Loads configured base layers into the workspace before a run.
    pub async fn seed_base_layers(&self, workspace: &Workspace, layers: &[BaseLayer]) {
        for layer in layers {
            let dataset = if layer.points.is_empty() {
                Dataset::Polygons(
                    layer
                        .extents
                        .iter()
                        .map(|e| Extent::new(e[0], e[1], e[2], e[3]))
                        .collect(),
                )
            } else {
                Dataset::Points(
                    layer
                        .points
                        .iter()
                        .map(|p| PointFeature {
                            x: p[0],
                            y: p[1],
                            category: None,
                            join_count: None,
                        })
                        .collect(),
                )
            };
            self.seed(workspace, &layer.name, dataset).await;
        }
    }

    pub async fn dataset(&self, workspace: &Workspace, name: &str) -> Option<Dataset> {
        let guard = self.datasets.lock().await;
        guard.get(&workspace.0).and_then(|ws| ws.get(name)).cloned()
    }

    async fn get(&self, workspace: &Workspace, name: &str) -> Result<Dataset, String> {
        self.dataset(workspace, name)
            .await
            .ok_or_else(|| format!("dataset not found: {name}"))
    }

    async fn put(&self, workspace: &Workspace, name: &str, dataset: Dataset) -> DatasetHandle {
        let mut guard = self.datasets.lock().await;
        guard
            .entry(workspace.0.clone())
            .or_default()
            .insert(name.to_string(), dataset);
        DatasetHandle::new(name)
    }

    fn polygons(dataset: &Dataset, name: &str) -> Result<Vec<Extent>, String> {
        match dataset {
            Dataset::Polygons(p) => Ok(p.clone()),
            Dataset::Points(_) => Err(format!("{name} is a point dataset, expected polygons")),
        }
    }
}

impl Default for MemoryWorkspace {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SpatialOpsPort for MemoryWorkspace {
    async fn points_from_table(
        &self,
        workspace: &Workspace,
        table: &Path,
        x_field: &str,
        y_field: &str,
        _spatial_ref: u32,
        out_name: &str,
    ) -> Result<DatasetHandle, String> {
        let content = fs::read_to_string(table)
            .map_err(|e| format!("cannot read table {}: {e}", table.display()))?;
        let mut lines = content.lines();
        let header = lines.next().ok_or("table has no header")?;
        let columns: Vec<&str> = header.split(',').map(str::trim).collect();
        let x_idx = columns
            .iter()
            .position(|c| *c == x_field)
            .ok_or_else(|| format!("missing field {x_field}"))?;
        let y_idx = columns
            .iter()
            .position(|c| *c == y_field)
            .ok_or_else(|| format!("missing field {y_field}"))?;
        let category_idx = columns.iter().position(|c| *c == "Type");

        let mut points = Vec::new();
        for line in lines.filter(|l| !l.trim().is_empty()) {
            let fields: Vec<&str> = line.split(',').map(str::trim).collect();
            let x: f64 = fields
                .get(x_idx)
                .and_then(|v| v.parse().ok())
                .ok_or_else(|| format!("bad {x_field} value in row: {line}"))?;
            let y: f64 = fields
                .get(y_idx)
                .and_then(|v| v.parse().ok())
                .ok_or_else(|| format!("bad {y_field} value in row: {line}"))?;
            points.push(PointFeature {
                x,
                y,
                category: category_idx
                    .and_then(|i| fields.get(i))
                    .map(|s| s.to_string()),
                join_count: None,
            });
        }
        Ok(self.put(workspace, out_name, Dataset::Points(points)).await)
    }

    async fn buffer(
        &self,
        workspace: &Workspace,
        input: &str,
        out_name: &str,
        distance_ft: f64,
        dissolve_all: bool,
    ) -> Result<DatasetHandle, String> {
        if distance_ft <= 0.0 {
            return Err(format!("buffer distance must be positive, got {distance_ft}"));
        }
        let dataset = self.get(workspace, input).await?;
        let mut extents: Vec<Extent> = match &dataset {
            Dataset::Points(points) => points
                .iter()
                .map(|p| Extent::new(p.x, p.y, p.x, p.y).expand(distance_ft))
                .collect(),
            Dataset::Polygons(polys) => polys.iter().map(|e| e.expand(distance_ft)).collect(),
        };
        if dissolve_all {
            extents = extents
                .into_iter()
                .reduce(Extent::union)
                .into_iter()
                .collect();
        }
        Ok(self
            .put(workspace, out_name, Dataset::Polygons(extents))
            .await)
    }

    async fn intersect(
        &self,
        workspace: &Workspace,
        inputs: &[DatasetHandle],
        out_name: &str,
    ) -> Result<DatasetHandle, String> {
        if inputs.is_empty() {
            return Err("intersect requires at least one input".to_string());
        }
        let mut acc: Option<Vec<Extent>> = None;
        for handle in inputs {
            let dataset = self.get(workspace, &handle.name).await?;
            let extents = Self::polygons(&dataset, &handle.name)?;
            acc = Some(match acc {
                None => extents,
                Some(prev) => {
                    let mut next = Vec::new();
                    for a in &prev {
                        for b in &extents {
                            if let Some(overlap) = a.intersection(*b) {
                                next.push(overlap);
                            }
                        }
                    }
                    next
                }
            });
        }
        let extents = acc.unwrap_or_default();
        Ok(self
            .put(workspace, out_name, Dataset::Polygons(extents))
            .await)
    }

    async fn erase(
        &self,
        workspace: &Workspace,
        input: &DatasetHandle,
        erase_with: &str,
        out_name: &str,
    ) -> Result<DatasetHandle, String> {
        let dataset = self.get(workspace, &input.name).await?;
        let extents = Self::polygons(&dataset, &input.name)?;
        let erase_dataset = self.get(workspace, erase_with).await?;
        let erase_extents = Self::polygons(&erase_dataset, erase_with)?;

        let mut remaining = Vec::new();
        'features: for extent in extents {
            let mut current = extent;
            for erase in &erase_extents {
                match current.subtract(*erase) {
                    Some(rest) => current = rest,
                    None => continue 'features,
                }
            }
            remaining.push(current);
        }
        Ok(self
            .put(workspace, out_name, Dataset::Polygons(remaining))
            .await)
    }

    async fn spatial_join(
        &self,
        workspace: &Workspace,
        target: &str,
        join: &DatasetHandle,
        out_name: &str,
        keep_common: bool,
    ) -> Result<DatasetHandle, String> {
        let target_dataset = self.get(workspace, target).await?;
        let points = match target_dataset {
            Dataset::Points(p) => p,
            Dataset::Polygons(_) => {
                return Err(format!("{target} is a polygon dataset, expected points"))
            }
        };
        let join_dataset = self.get(workspace, &join.name).await?;
        let polygons = Self::polygons(&join_dataset, &join.name)?;

        let mut joined = Vec::new();
        for mut point in points {
            let matches = polygons
                .iter()
                .filter(|e| e.contains(point.x, point.y))
                .count() as i64;
            if matches >= 1 {
                point.join_count = Some(matches);
                joined.push(point);
            } else if !keep_common {
                point.join_count = None;
                joined.push(point);
            }
        }
        Ok(self.put(workspace, out_name, Dataset::Points(joined)).await)
    }

    async fn count_where(
        &self,
        workspace: &Workspace,
        dataset: &DatasetHandle,
        attribute: &str,
        at_least: i64,
    ) -> Result<usize, String> {
        if attribute != "Join_Count" {
            return Err(format!("unknown attribute: {attribute}"));
        }
        let dataset = self.get(workspace, &dataset.name).await?;
        let points = match dataset {
            Dataset::Points(p) => p,
            Dataset::Polygons(_) => return Err("Join_Count only exists on joined points".into()),
        };
        Ok(points
            .iter()
            .filter(|p| p.join_count.is_some_and(|c| c >= at_least))
            .count())
    }

    async fn feature_count(&self, workspace: &Workspace, dataset: &str) -> Result<usize, String> {
        Ok(self.get(workspace, dataset).await?.len())
    }
}
