//! JSON grid documents and the in-memory handle serving them
//!
//! A grid document holds named dimensions (with coordinate values and
//! attributes) and variables stored as row-major `f64` arrays over a subset
//! of those dimensions:
//!
//! ```json
//! {
//!   "dimensions": [
//!     {"name": "time", "attributes": {"units": "days since 1950-01-01"}, "values": [26727, 26728]},
//!     {"name": "depth", "values": [0.49, 1.54]}
//!   ],
//!   "variables": [
//!     {"name": "uo", "dimensions": ["time", "depth"], "data": [0.1, 0.2, 0.3, 0.4]}
//!   ]
//! }
//! ```

use super::time::{parse_datetime, TimeUnits};
use super::{DatasetError, DatasetHandle, DatasetResult, DimensionInfo};
use crate::{CoordValue, DimensionConstraint, FileRef, Selection};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

/// Bytes per stored element (coordinates and data are `f64`)
const ELEMENT_SIZE: u64 = 8;

/// One dimension and its coordinates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridDimension {
    /// Dimension name
    pub name: String,
    /// Attributes (`units`, `axis`, `calendar`...)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
    /// Coordinate values
    pub values: Vec<f64>,
}

impl GridDimension {
    /// Create a dimension without attributes
    pub fn new(name: impl Into<String>, values: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            attributes: BTreeMap::new(),
            values,
        }
    }

    /// Return a copy with `key` set to `value`
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    fn info(&self) -> DimensionInfo {
        DimensionInfo {
            name: self.name.clone(),
            axis: self.attributes.get("axis").cloned(),
            units: self.attributes.get("units").cloned(),
            length: self.values.len(),
        }
    }

    fn time_units(&self) -> Option<TimeUnits> {
        self.attributes.get("units").and_then(|u| TimeUnits::parse(u))
    }

    /// Resolve a caller value to a raw coordinate on this dimension
    fn resolve(&self, value: &CoordValue) -> DatasetResult<f64> {
        match value {
            CoordValue::Number(v) => Ok(*v),
            CoordValue::Date(s) => {
                let units = self.time_units().ok_or_else(|| {
                    DatasetError::InvalidConstraint(format!(
                        "date '{s}' given for dimension '{}' which has no time units",
                        self.name
                    ))
                })?;
                let datetime = parse_datetime(s).ok_or_else(|| {
                    DatasetError::InvalidConstraint(format!("cannot parse date '{s}'"))
                })?;
                Ok(units.encode(datetime))
            }
        }
    }

    /// Indices of the coordinates kept by `constraint`, ascending
    fn select(&self, constraint: Option<&DimensionConstraint>) -> DatasetResult<Vec<usize>> {
        match constraint {
            None => Ok((0..self.values.len()).collect()),
            Some(DimensionConstraint::Range(a, b)) => {
                let (a, b) = (self.resolve(a)?, self.resolve(b)?);
                let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
                Ok(self
                    .values
                    .iter()
                    .enumerate()
                    .filter(|(_, v)| **v >= lo && **v <= hi)
                    .map(|(i, _)| i)
                    .collect())
            }
            Some(DimensionConstraint::Values(targets)) => {
                let mut picked = BTreeSet::new();
                for target in targets {
                    let target = self.resolve(target)?;
                    let nearest = self
                        .values
                        .iter()
                        .enumerate()
                        .filter(|(_, v)| !v.is_nan())
                        .min_by(|(_, a), (_, b)| (**a - target).abs().total_cmp(&(**b - target).abs()))
                        .map(|(i, _)| i);
                    if let Some(i) = nearest {
                        picked.insert(i);
                    }
                }
                Ok(picked.into_iter().collect())
            }
        }
    }
}

/// One data variable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridVariable {
    /// Variable name
    pub name: String,
    /// Dimensions the data is laid out over, outermost first
    pub dimensions: Vec<String>,
    /// Attributes
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
    /// Row-major values
    pub data: Vec<f64>,
}

impl GridVariable {
    /// Create a variable without attributes
    pub fn new(name: impl Into<String>, dimensions: &[&str], data: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            dimensions: dimensions.iter().map(|d| d.to_string()).collect(),
            attributes: BTreeMap::new(),
            data,
        }
    }
}

/// A gridded dataset document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridDataset {
    /// Global attributes
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
    /// Dimensions in declared order
    pub dimensions: Vec<GridDimension>,
    /// Data variables in declared order
    #[serde(default)]
    pub variables: Vec<GridVariable>,
}

impl GridDataset {
    /// Build and validate a dataset
    pub fn new(dimensions: Vec<GridDimension>, variables: Vec<GridVariable>) -> DatasetResult<Self> {
        let dataset = Self {
            attributes: BTreeMap::new(),
            dimensions,
            variables,
        };
        dataset.validate()?;
        Ok(dataset)
    }

    /// Decode and validate a JSON document
    pub fn from_slice(bytes: &[u8]) -> DatasetResult<Self> {
        let dataset: Self = serde_json::from_slice(bytes)
            .map_err(|e| DatasetError::Decode(format!("invalid grid document: {e}")))?;
        dataset.validate()?;
        Ok(dataset)
    }

    /// Read a document from disk
    pub fn read(path: &Path) -> DatasetResult<Self> {
        let bytes = std::fs::read(path).map_err(|e| {
            DatasetError::Transport(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_slice(&bytes)
    }

    /// Write the document to `path`, replacing any existing file
    pub fn write(&self, path: &Path) -> DatasetResult<()> {
        let json = self.to_json()?;
        std::fs::write(path, json)
            .map_err(|e| DatasetError::Write(format!("failed to write {}: {e}", path.display())))
    }

    /// Write the document to `path` through a temporary file in the same
    /// directory, so readers never observe a half-written file
    pub fn write_atomic(&self, path: &Path) -> DatasetResult<()> {
        let json = self.to_json()?;
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let write_err = |e: std::io::Error| {
            DatasetError::Write(format!("failed to write {}: {e}", path.display()))
        };

        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
        tmp.write_all(&json).map_err(write_err)?;
        tmp.as_file().sync_all().map_err(write_err)?;
        tmp.persist(path).map_err(|e| write_err(e.error))?;
        Ok(())
    }

    fn to_json(&self) -> DatasetResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| DatasetError::Write(format!("serialization failed: {e}")))
    }

    fn validate(&self) -> DatasetResult<()> {
        let mut names = HashSet::new();
        for dim in &self.dimensions {
            if !names.insert(dim.name.as_str()) {
                return Err(DatasetError::Decode(format!("duplicate dimension '{}'", dim.name)));
            }
        }

        for var in &self.variables {
            let mut expected = 1usize;
            for dim_name in &var.dimensions {
                let dim = self.dimension(dim_name).ok_or_else(|| {
                    DatasetError::Decode(format!(
                        "variable '{}' uses undeclared dimension '{dim_name}'",
                        var.name
                    ))
                })?;
                expected *= dim.values.len();
            }
            if var.data.len() != expected {
                return Err(DatasetError::Decode(format!(
                    "variable '{}' has {} values, expected {expected}",
                    var.name,
                    var.data.len()
                )));
            }
        }
        Ok(())
    }

    /// Dimension by name
    pub fn dimension(&self, name: &str) -> Option<&GridDimension> {
        self.dimensions.iter().find(|d| d.name == name)
    }

    /// Dimension metadata in declared order
    pub fn dimension_infos(&self) -> Vec<DimensionInfo> {
        self.dimensions.iter().map(GridDimension::info).collect()
    }

    /// Variable names in declared order
    pub fn variable_names(&self) -> Vec<String> {
        self.variables.iter().map(|v| v.name.clone()).collect()
    }

    /// Selected indices per dimension
    fn select_indices(&self, selection: &Selection) -> DatasetResult<BTreeMap<String, Vec<usize>>> {
        for name in selection.constraints.keys() {
            if self.dimension(name).is_none() {
                return Err(DatasetError::UnknownDimension(name.clone()));
            }
        }

        self.dimensions
            .iter()
            .map(|dim| Ok((dim.name.clone(), dim.select(selection.constraint(&dim.name))?)))
            .collect()
    }

    fn selected_variables(&self, selection: &Selection) -> DatasetResult<Vec<&GridVariable>> {
        match &selection.variables {
            None => Ok(self.variables.iter().collect()),
            Some(names) => names
                .iter()
                .map(|name| {
                    self.variables
                        .iter()
                        .find(|v| &v.name == name)
                        .ok_or_else(|| DatasetError::UnknownVariable(name.clone()))
                })
                .collect(),
        }
    }

    /// Payload size of `selection` in bytes: every selected coordinate and
    /// every selected data element
    pub fn size_bytes(&self, selection: &Selection) -> DatasetResult<u64> {
        let indices = self.select_indices(selection)?;
        let coords: u64 = indices.values().map(|idx| idx.len() as u64).sum();
        let data: u64 = self
            .selected_variables(selection)?
            .iter()
            .map(|var| {
                var.dimensions
                    .iter()
                    .map(|d| indices.get(d).map_or(0, |idx| idx.len() as u64))
                    .product::<u64>()
            })
            .sum();
        Ok((coords + data) * ELEMENT_SIZE)
    }

    /// Coordinates of `dimension` after applying `selection`
    pub fn coordinates(&self, selection: &Selection, dimension: &str) -> DatasetResult<Vec<f64>> {
        let dim = self
            .dimension(dimension)
            .ok_or_else(|| DatasetError::UnknownDimension(dimension.to_string()))?;
        let indices = dim.select(selection.constraint(dimension))?;
        Ok(indices.into_iter().map(|i| dim.values[i]).collect())
    }

    /// Extract `selection` as a new dataset
    pub fn subset(&self, selection: &Selection) -> DatasetResult<GridDataset> {
        let indices = self.select_indices(selection)?;

        let dimensions = self
            .dimensions
            .iter()
            .map(|dim| GridDimension {
                name: dim.name.clone(),
                attributes: dim.attributes.clone(),
                values: indices[&dim.name].iter().map(|&i| dim.values[i]).collect(),
            })
            .collect();

        let variables = self
            .selected_variables(selection)?
            .into_iter()
            .map(|var| GridVariable {
                name: var.name.clone(),
                dimensions: var.dimensions.clone(),
                attributes: var.attributes.clone(),
                data: self.gather(var, &indices),
            })
            .collect();

        Ok(GridDataset {
            attributes: self.attributes.clone(),
            dimensions,
            variables,
        })
    }

    /// Copy the elements of `var` at the cartesian product of the selected
    /// indices, row-major
    fn gather(&self, var: &GridVariable, indices: &BTreeMap<String, Vec<usize>>) -> Vec<f64> {
        let picks: Vec<&[usize]> = var
            .dimensions
            .iter()
            .map(|d| indices[d].as_slice())
            .collect();
        let lengths: Vec<usize> = var
            .dimensions
            .iter()
            .map(|d| self.dimension(d).map_or(0, |dim| dim.values.len()))
            .collect();

        let mut strides = vec![1usize; lengths.len()];
        for axis in (0..lengths.len().saturating_sub(1)).rev() {
            strides[axis] = strides[axis + 1] * lengths[axis + 1];
        }

        let total: usize = picks.iter().map(|p| p.len()).product();
        let mut out = Vec::with_capacity(total);
        if total == 0 {
            return out;
        }

        // Odometer over the selected index lists
        let mut cursor = vec![0usize; picks.len()];
        loop {
            let offset: usize = cursor
                .iter()
                .zip(&picks)
                .zip(&strides)
                .map(|((&c, pick), stride)| pick[c] * stride)
                .sum();
            out.push(var.data[offset]);

            let mut axis = picks.len();
            loop {
                if axis == 0 {
                    return out;
                }
                axis -= 1;
                cursor[axis] += 1;
                if cursor[axis] < picks[axis].len() {
                    break;
                }
                cursor[axis] = 0;
            }
        }
    }

    /// Concatenate `parts` along `dimension`, ordered by each part's first
    /// coordinate on it in the direction of the axis. All other dimensions
    /// must be identical.
    ///
    /// The direction comes from the first part spanning two distinct
    /// coordinates. When every part holds a single step, the order in which
    /// the parts arrive decides.
    pub fn concat(mut parts: Vec<GridDataset>, dimension: &str) -> DatasetResult<GridDataset> {
        if parts.is_empty() {
            return Err(DatasetError::Decode("nothing to merge".to_string()));
        }
        for part in &parts {
            if part.dimension(dimension).is_none() {
                return Err(DatasetError::UnknownDimension(dimension.to_string()));
            }
        }

        let first_coord = |part: &GridDataset| {
            part.dimension(dimension)
                .and_then(|d| d.values.first().copied())
                .unwrap_or(f64::NEG_INFINITY)
        };
        let descending = axis_descending(&parts, dimension);
        parts.sort_by(|a, b| {
            let order = first_coord(a).total_cmp(&first_coord(b));
            if descending {
                order.reverse()
            } else {
                order
            }
        });

        let head = &parts[0];
        for part in &parts[1..] {
            head.check_compatible(part, dimension)?;
        }

        let dimensions = head
            .dimensions
            .iter()
            .map(|dim| {
                if dim.name != dimension {
                    return dim.clone();
                }
                let values = parts
                    .iter()
                    .flat_map(|p| p.dimension(dimension).map(|d| d.values.clone()).unwrap_or_default())
                    .collect();
                GridDimension {
                    name: dim.name.clone(),
                    attributes: dim.attributes.clone(),
                    values,
                }
            })
            .collect();

        let variables = head
            .variables
            .iter()
            .enumerate()
            .map(|(i, var)| {
                let Some(axis) = var.dimensions.iter().position(|d| d == dimension) else {
                    return var.clone();
                };
                let len_of = |part: &GridDataset, d: &str| part.dimension(d).map_or(0, |dim| dim.values.len());
                let outer: usize = var.dimensions[..axis].iter().map(|d| len_of(head, d)).product();
                let inner: usize = var.dimensions[axis + 1..].iter().map(|d| len_of(head, d)).product();

                let mut data = Vec::new();
                for o in 0..outer {
                    for part in &parts {
                        let chunk = len_of(part, dimension) * inner;
                        data.extend_from_slice(&part.variables[i].data[o * chunk..(o + 1) * chunk]);
                    }
                }
                GridVariable {
                    name: var.name.clone(),
                    dimensions: var.dimensions.clone(),
                    attributes: var.attributes.clone(),
                    data,
                }
            })
            .collect();

        Ok(GridDataset {
            attributes: head.attributes.clone(),
            dimensions,
            variables,
        })
    }

    fn check_compatible(&self, other: &GridDataset, dimension: &str) -> DatasetResult<()> {
        let incompatible = |what: String| DatasetError::Decode(format!("cannot merge parts: {what}"));

        if self.dimensions.len() != other.dimensions.len() {
            return Err(incompatible("different dimension sets".to_string()));
        }
        for (a, b) in self.dimensions.iter().zip(&other.dimensions) {
            if a.name != b.name {
                return Err(incompatible(format!("dimension '{}' vs '{}'", a.name, b.name)));
            }
            if a.name != dimension && a.values != b.values {
                return Err(incompatible(format!("coordinates of '{}' differ", a.name)));
            }
        }

        if self.variables.len() != other.variables.len() {
            return Err(incompatible("different variable sets".to_string()));
        }
        for (a, b) in self.variables.iter().zip(&other.variables) {
            if a.name != b.name || a.dimensions != b.dimensions {
                return Err(incompatible(format!("variable '{}' vs '{}'", a.name, b.name)));
            }
        }
        Ok(())
    }

    /// Minimum and maximum coordinate of `dimension`
    pub fn bounds(&self, dimension: &str) -> DatasetResult<Option<(f64, f64)>> {
        let dim = self
            .dimension(dimension)
            .ok_or_else(|| DatasetError::UnknownDimension(dimension.to_string()))?;
        Ok(dim
            .values
            .iter()
            .copied()
            .filter(|v| !v.is_nan())
            .fold(None, |acc, v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            }))
    }
}

/// Whether `dimension` runs from high to low coordinates across `parts`
fn axis_descending(parts: &[GridDataset], dimension: &str) -> bool {
    let values = || parts.iter().filter_map(|p| p.dimension(dimension)).map(|d| &d.values);

    let within = values().find_map(|v| {
        let (first, last) = (v.first()?, v.last()?);
        (first != last).then(|| first > last)
    });
    within.unwrap_or_else(|| {
        let mut heads = values().filter_map(|v| v.first());
        match heads.next() {
            Some(a) => heads.find(|&b| b != a).is_some_and(|b| a > b),
            None => false,
        }
    })
}

/// Handle over a grid document held in memory.
///
/// Subsets are computed locally and written as grid documents; merged
/// output is written atomically.
#[derive(Debug)]
pub struct GridHandle {
    origin: String,
    dataset: RwLock<Option<Arc<GridDataset>>>,
}

impl GridHandle {
    /// Wrap an opened dataset; `origin` is used in log messages
    pub fn new(origin: impl Into<String>, dataset: GridDataset) -> Self {
        Self {
            origin: origin.into(),
            dataset: RwLock::new(Some(Arc::new(dataset))),
        }
    }

    fn dataset(&self) -> DatasetResult<Arc<GridDataset>> {
        self.dataset
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(DatasetError::Closed)
    }
}

#[async_trait]
impl DatasetHandle for GridHandle {
    fn dimensions(&self) -> DatasetResult<Vec<DimensionInfo>> {
        Ok(self.dataset()?.dimension_infos())
    }

    fn variable_names(&self) -> DatasetResult<Vec<String>> {
        Ok(self.dataset()?.variable_names())
    }

    async fn size_bytes(&self, selection: &Selection) -> DatasetResult<u64> {
        self.dataset()?.size_bytes(selection)
    }

    async fn coordinates(&self, selection: &Selection, dimension: &str) -> DatasetResult<Vec<f64>> {
        self.dataset()?.coordinates(selection, dimension)
    }

    async fn materialize(&self, selection: &Selection, destination: &Path) -> DatasetResult<FileRef> {
        let subset = self.dataset()?.subset(selection)?;
        subset.write(destination)?;
        debug!(origin = %self.origin, path = %destination.display(), "Materialized subset");
        Ok(FileRef::new("block", destination))
    }

    async fn merge(
        &self,
        parts: &[FileRef],
        ordering_dimension: &str,
        destination: &Path,
    ) -> DatasetResult<FileRef> {
        let datasets = parts
            .iter()
            .map(|part| GridDataset::read(part.path()))
            .collect::<DatasetResult<Vec<_>>>()?;
        let merged = GridDataset::concat(datasets, ordering_dimension)?;
        merged.write_atomic(destination)?;
        Ok(FileRef::new("dataset", destination))
    }

    async fn bounds_of(&self, file: &FileRef, dimension: &str) -> DatasetResult<Option<(f64, f64)>> {
        GridDataset::read(file.path())?.bounds(dimension)
    }

    async fn close(&self) {
        let mut slot = self.dataset.write().unwrap_or_else(PoisonError::into_inner);
        if slot.take().is_some() {
            debug!(origin = %self.origin, "Closed dataset handle");
        }
    }
}
