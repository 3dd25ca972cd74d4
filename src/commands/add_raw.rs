//! Cut the raw data covering each crop out of the dataset-level raw volume.
use std::ops::Range;

use serde_json::Map;

use crate::{
    Error, Result,
    config::{DataConfig, DatasetInfo},
    ngff::{AxisCoordinates, MultiscaleAttrs},
    parallel::run_all,
    reader::{DataPath, Volume},
    storage,
};

use super::{class_names, label_group};

const SPATIAL_AXES: [&str; 3] = ["z", "y", "x"];

/// Voxel positions closer than this (in voxels) to an integer are aligned.
const ALIGNMENT_TOLERANCE: f64 = 1e-3;

pub fn run(config: &DataConfig, max_concurrency: Option<usize>) -> Result<()> {
    let datasets: Vec<_> = config.datasets.iter().collect();
    run_all(datasets, max_concurrency, |(name, info)| add_raw(name, info))?;
    log::info!("all done!");
    Ok(())
}

fn add_raw(name: &str, info: &DatasetInfo) -> Result<()> {
    let Some(raw) = &info.raw else {
        log::warn!("Dataset {name} has no raw data configured, skipping");
        return Ok(());
    };
    let raw = Volume::open(&DataPath::parse(raw)?.join("s0"))?;
    let raw_coords = raw.coordinates()?;
    let names: Vec<_> = raw_coords.iter().map(|c| c.name.as_str()).collect();
    if names != SPATIAL_AXES {
        return Err(Error::general(format!(
            "raw data {} has axes {names:?}, expected {SPATIAL_AXES:?}",
            raw.path()
        )));
    }
    for crop in &info.crops {
        let crop_path = DataPath::parse(info.crop_path(crop))?;
        if add_crop_raw(&raw, &raw_coords, &crop_path)? {
            log::info!("Successfully added raw in {name}: {crop}");
        } else {
            log::info!("Could not extract raw in {name}: {crop}");
        }
    }
    Ok(())
}

/// Write `crop/raw/s0`; returns `false` if the crop is not covered by `raw`.
pub fn add_crop_raw(raw: &Volume, raw_coords: &[AxisCoordinates], crop: &DataPath) -> Result<bool> {
    let labels = label_group(crop);
    let names = class_names(&labels)?;
    let reference = names
        .first()
        .ok_or_else(|| Error::general(format!("{labels} lists no class names")))?;
    let label = Volume::open(&labels.join(reference).join("s0"))?;
    let label_coords = label.coordinates()?;

    let selection = match select_region(raw_coords, &label_coords) {
        Ok(selection) => selection,
        Err(e) => {
            log::error!("{e}");
            return Ok(false);
        }
    };
    let data = raw.read_region(&selection.ranges)?;

    let mut multiscale = MultiscaleAttrs::initialize();
    multiscale.add_scalelevel("s0", selection.scale, selection.translation)?;
    let mut attributes = Map::new();
    multiscale.update_attributes(&mut attributes)?;

    let store = crop.zarr_store()?;
    let group = storage::join(&crop.node, "raw");
    if storage::node_kind(&store, &group).is_some() {
        storage::erase_node(&store, &group)?;
    }
    storage::create_group(&store, &group, attributes)?;
    let shape: Vec<u64> = selection.ranges.iter().map(|r| r.end - r.start).collect();
    storage::write_array(&store, &storage::join(&group, "s0"), &shape, &data, Map::new())?;
    Ok(true)
}

/// Raw voxels covering a label volume, in raw axis order.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub ranges: Vec<Range<u64>>,
    pub scale: Vec<f64>,
    /// World coordinate of the first selected voxel centre.
    pub translation: Vec<f64>,
}

/// Select the raw voxels whose extent matches the label extent exactly.
///
/// The label extent reaches half a label voxel beyond the first and last
/// label voxel centres.
pub fn select_region(raw: &[AxisCoordinates], label: &[AxisCoordinates]) -> Result<Selection> {
    let mut selection = Selection {
        ranges: Vec::new(),
        scale: Vec::new(),
        translation: Vec::new(),
    };
    for raw_axis in raw {
        let label_axis = label
            .iter()
            .find(|a| a.name == raw_axis.name)
            .ok_or_else(|| Error::general(format!("labels have no axis {}", raw_axis.name)))?;
        let half = (label_axis.scale - raw_axis.scale) / 2.0;
        let start = label_axis.first() - half;
        let end = label_axis.last() + half;
        let first = raw_index(raw_axis, start)?;
        let last = raw_index(raw_axis, end)?;
        if first < 0 || last < first || last >= raw_axis.len as i64 {
            return Err(Error::general(format!(
                "coordinates {start}..={end} along {} are outside of the raw data",
                raw_axis.name
            )));
        }
        selection.ranges.push(first as u64..last as u64 + 1);
        selection.scale.push(raw_axis.scale);
        selection.translation.push(start);
    }
    Ok(selection)
}

/// Index of the raw voxel centred at `coordinate`.
fn raw_index(axis: &AxisCoordinates, coordinate: f64) -> Result<i64> {
    let index = (coordinate - axis.translation) / axis.scale;
    let rounded = index.round();
    if (index - rounded).abs() > ALIGNMENT_TOLERANCE {
        return Err(Error::general(format!(
            "coordinate {coordinate} along {} is not aligned with the raw voxel grid",
            axis.name
        )));
    }
    Ok(rounded as i64)
}
