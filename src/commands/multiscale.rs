//! Build multiscale pyramids for crop labels and crop raw data.
//!
//! Each level `s{k+1}` is the factor-2 local mean of `s{k}`, stored as
//! float32 and cropped to an even extent.
use ndarray::ArrayD;
use serde_json::{Map, Value};

use crate::{
    Error, Result,
    cellmap::{CellmapAttrs, SEMANTIC_SEGMENTATION, check_encoding},
    config::DataConfig,
    downsample::{complement_counts, downsample_labels, downsample_raw, next_level_transform},
    element::Samples,
    ngff::MultiscaleAttrs,
    parallel::run_all,
    reader::{DataPath, to_ndarray},
    storage::{self, Store, ZarrArray},
};

use super::{class_names, crop_refs, label_group, scale_names};

/// Add levels up to `s{num_scales - 1}` to every label of every crop.
pub fn labels(
    config: &DataConfig,
    num_scales: usize,
    max_concurrency: Option<usize>,
) -> Result<()> {
    run_all(crop_refs(config)?, max_concurrency, |crop| {
        multiscale_labels(&crop.path, num_scales)
    })?;
    log::info!("all done!");
    Ok(())
}

/// Add levels up to `s{num_scales - 1}` to the `raw` group of every crop.
pub fn raw(config: &DataConfig, num_scales: usize, max_concurrency: Option<usize>) -> Result<()> {
    for (name, info) in &config.datasets {
        if let Some(raw) = &info.raw {
            log::warn!(
                "Dataset {name} has raw data at {}, only crop raw groups are downsampled",
                raw.display()
            );
        }
    }
    run_all(crop_refs(config)?, max_concurrency, |crop| {
        multiscale_raw(&crop.path, num_scales)
    })?;
    log::info!("all done!");
    Ok(())
}

/// Downsample every label of one crop.
pub fn multiscale_labels(crop: &DataPath, num_scales: usize) -> Result<()> {
    let labels = label_group(crop);
    let store = labels.zarr_store()?;
    for label in class_names(&labels)? {
        log::info!("Processing {crop} for {label}");
        let group = storage::join(&labels.node, &label);
        for (src, dst) in level_pairs(num_scales) {
            downsample_label_level(&store, &group, &src, &dst)?;
            add_next_level(&store, &group, &src, &dst)?;
        }
    }
    Ok(())
}

/// Downsample the `raw` group of one crop.
pub fn multiscale_raw(crop: &DataPath, num_scales: usize) -> Result<()> {
    let raw = crop.join("raw");
    let store = raw.zarr_store()?;
    log::info!("Processing {crop} for raw");
    for (src, dst) in level_pairs(num_scales) {
        let input = read_level(&store, &storage::join(&raw.node, &src))?;
        let down = downsample_raw(&input);
        write_level(&store, &storage::join(&raw.node, &dst), &down, Map::new())?;
        add_next_level(&store, &raw.node, &src, &dst)?;
    }
    Ok(())
}

fn level_pairs(num_scales: usize) -> Vec<(String, String)> {
    let names = scale_names(num_scales);
    names
        .iter()
        .zip(names.iter().skip(1))
        .map(|(a, b)| (a.clone(), b.clone()))
        .collect()
}

fn downsample_label_level(store: &Store, group: &str, src: &str, dst: &str) -> Result<()> {
    let src_path = storage::join(group, src);
    let mut attributes = storage::array_attributes(store, &src_path)?;
    let mut cellmap = CellmapAttrs::from_attributes(&attributes)?;
    let kind = &cellmap.annotation_type()?.kind;
    if kind != SEMANTIC_SEGMENTATION {
        return Err(Error::NotImplemented(format!(
            "smooth multiscaling of annotations of type {kind}"
        )));
    }
    let encoding = cellmap.encoding()?.clone();
    check_encoding(&encoding)?;

    let input = read_level(store, &src_path)?;
    let down = downsample_labels(&input, &encoding);
    let (absent, unknown) = complement_counts(&down, &encoding);
    cellmap.set_complement_counts(absent, unknown);
    cellmap.update_attributes(&mut attributes)?;
    write_level(store, &storage::join(group, dst), &down, attributes)
}

/// Record `dst` in the group's multiscale attributes, derived from `src`.
fn add_next_level(store: &Store, group: &str, src: &str, dst: &str) -> Result<()> {
    let mut attributes = storage::group_attributes(store, group)?;
    let mut multiscale = MultiscaleAttrs::from_attributes(&attributes)?;
    let (scale, translation) = multiscale.scale_and_translation(src)?;
    let (scale, translation) = next_level_transform(&scale, &translation);
    multiscale.add_scalelevel(dst, scale, translation)?;
    multiscale.update_attributes(&mut attributes)?;
    storage::set_group_attributes(store, group, attributes)
}

fn read_level(store: &Store, path: &str) -> Result<ArrayD<f64>> {
    let array = ZarrArray::open(store, path)?;
    to_ndarray(array.shape(), array.read()?.to_f64())
}

fn write_level(
    store: &Store,
    path: &str,
    data: &ArrayD<f32>,
    attributes: Map<String, Value>,
) -> Result<()> {
    let shape: Vec<u64> = data.shape().iter().map(|s| *s as u64).collect();
    let samples = Samples::from(data.iter().copied().collect::<Vec<f32>>());
    storage::write_array(store, path, &shape, &samples, attributes)
}
