//! Write a data configuration keeping only the crops that pass some checks.
//!
//! Checks are evaluated at the level matching [`FilterOptions::scale`], or at
//! `s0` when no scale is given.
use std::path::Path;

use crate::{
    Error, Result,
    cellmap::CellmapAttrs,
    config::{DataConfig, DatasetInfo},
    ngff::MultiscaleAttrs,
    parallel::run_all,
    reader::{DataPath, Volume, read_attributes},
};

use super::{class_names, label_group};

#[derive(Debug, Clone, Default)]
pub struct FilterOptions {
    /// Keep crops annotated at this scale.
    pub scale: Option<Vec<f64>>,
    /// Keep crops with at least this shape.
    pub min_size: Option<Vec<u64>>,
    /// Keep crops where every label in `labels` is at least this fraction annotated.
    pub min_frac_annotated: Option<f64>,
    pub labels: Vec<String>,
}

/// Filter the crops of `config`, write the result to `output` and return it.
pub fn run(
    config: &DataConfig,
    output: &Path,
    options: &FilterOptions,
    max_concurrency: Option<usize>,
) -> Result<DataConfig> {
    if let Some(frac) = options.min_frac_annotated
        && frac > 1.0
    {
        return Err(Error::general(format!(
            "min_frac_annotated should be given as a fraction but got {frac}; did you use percent?"
        )));
    }
    let datasets: Vec<_> = config.datasets.iter().collect();
    let kept = run_all(datasets, max_concurrency, |(name, info)| {
        Ok((name.clone(), filter_dataset(info, options)?))
    })?;

    let mut filtered = config.clone();
    for (name, crops) in kept {
        if crops.is_empty() {
            log::info!("Removing dataset {name}, no crops left");
            filtered.datasets.shift_remove(&name);
        } else if let Some(info) = filtered.datasets.get_mut(&name) {
            info.crops = crops;
        }
    }
    filtered.to_path(output)?;
    Ok(filtered)
}

fn filter_dataset(info: &DatasetInfo, options: &FilterOptions) -> Result<Vec<String>> {
    let mut kept = Vec::new();
    for crop in &info.crops {
        if filter_crop(&DataPath::parse(info.crop_path(crop))?, options)? {
            kept.push(crop.clone());
        } else {
            log::debug!("Dropping crop {crop}");
        }
    }
    Ok(kept)
}

/// Whether a crop passes every check enabled in `options`.
pub fn filter_crop(crop: &DataPath, options: &FilterOptions) -> Result<bool> {
    let scale = options.scale.as_deref();
    if let Some(scale) = scale
        && !check_res(crop, scale)?
    {
        return Ok(false);
    }
    if let Some(min_size) = &options.min_size
        && !check_min_size(crop, min_size, scale)?
    {
        return Ok(false);
    }
    if let Some(frac) = options.min_frac_annotated {
        for label in &options.labels {
            if !check_annotated_label(crop, label, frac, scale)? {
                return Ok(false);
            }
        }
    }
    Ok(true)
}

fn reference_label(labels: &DataPath) -> Result<String> {
    class_names(labels)?
        .into_iter()
        .next()
        .ok_or_else(|| Error::general(format!("{labels} lists no class names")))
}

/// Level of the label group at `label` with the given scale, or `s0`.
fn level_at(label: &DataPath, scale: Option<&[f64]>) -> Result<String> {
    match scale {
        Some(scale) => {
            MultiscaleAttrs::from_attributes(&read_attributes(label)?)?.scalelevel(scale)
        }
        None => Ok("s0".to_string()),
    }
}

/// Whether the crop's labels have a level at `scale`.
///
/// Only the first label is checked; all labels share their levels.
pub fn check_res(crop: &DataPath, scale: &[f64]) -> Result<bool> {
    let labels = label_group(crop);
    let label = labels.join(&reference_label(&labels)?);
    match level_at(&label, Some(scale)) {
        Ok(_) => Ok(true),
        Err(Error::MissingScaleLevel { .. }) => Ok(false),
        Err(e) => Err(e),
    }
}

/// Whether the crop's first label is at least `min_size` at the given scale.
pub fn check_min_size(crop: &DataPath, min_size: &[u64], scale: Option<&[f64]>) -> Result<bool> {
    let labels = label_group(crop);
    let label = labels.join(&reference_label(&labels)?);
    let volume = Volume::open(&label.join(&level_at(&label, scale)?))?;
    Ok(volume
        .shape()
        .iter()
        .zip(min_size)
        .all(|(size, min)| size >= min))
}

/// Whether at least `min_frac` of the voxels of `label` are annotated.
///
/// A label the crop does not list is never annotated.
pub fn check_annotated_label(
    crop: &DataPath,
    label: &str,
    min_frac: f64,
    scale: Option<&[f64]>,
) -> Result<bool> {
    let labels = label_group(crop);
    if !class_names(&labels)?.iter().any(|name| name == label) {
        return Ok(false);
    }
    let label = labels.join(label);
    let volume = Volume::open(&label.join(&level_at(&label, scale)?))?;
    let num_elements = volume.num_elements() as f64;
    if num_elements == 0.0 {
        return Ok(false);
    }
    let cellmap = CellmapAttrs::from_attributes(volume.attributes())?;
    let unknown = cellmap
        .annotation
        .complement_counts
        .as_ref()
        .and_then(|counts| counts.unknown)
        .unwrap_or(0.0);
    Ok((num_elements - unknown) / num_elements >= min_frac)
}
