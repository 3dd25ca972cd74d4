//! Copy the `s0` level of every crop into one Zarr hierarchy per crop.
//!
//! The output for crop `crop1` of dataset `jrc_hela-2` is
//! `DESTINATION/jrc_hela-2/crop1.zarr`, with the labels in a `labels` group.
use std::path::Path;

use serde_json::Map;

use crate::{
    Error, Result,
    config::{DataConfig, DatasetInfo},
    ngff::MultiscaleAttrs,
    parallel::run_all,
    reader::DataPath,
    storage::{self, NodeKind},
};

const LEVEL: &str = "s0";

/// Copy every crop in `config` to `destination`, one dataset per task.
pub fn run(config: &DataConfig, destination: &Path, max_concurrency: Option<usize>) -> Result<()> {
    let datasets: Vec<_> = config.datasets.iter().collect();
    run_all(datasets, max_concurrency, |(name, info)| {
        copy_dataset(name, info, destination)
    })?;
    Ok(())
}

fn copy_dataset(name: &str, info: &DatasetInfo, destination: &Path) -> Result<()> {
    let dataset_dir = destination.join(name);
    std::fs::create_dir_all(&dataset_dir).map_err(|e| Error::io(&dataset_dir, e))?;
    for crop in &info.crops {
        let src = DataPath::parse(info.crop_path(crop))?;
        log::info!("Copying crop {src}");
        let dst = dataset_dir.join(format!("{crop}.zarr"));
        copy_crop(&src, &dst)?;
    }
    Ok(())
}

/// Copy one crop group to a fresh hierarchy at `dst`.
pub fn copy_crop(src: &DataPath, dst: &Path) -> Result<()> {
    if dst.exists() {
        std::fs::remove_dir_all(dst).map_err(|e| Error::io(dst, e))?;
    }
    let src_store = src.zarr_store()?;
    let dst_store = storage::open_store(dst)?;

    storage::create_group(&dst_store, "/", Map::new())?;
    let crop_attrs = storage::group_attributes(&src_store, &src.node)?;
    storage::create_group(&dst_store, "/labels", crop_attrs)?;

    for label in storage::children(&src_store, &src.node)? {
        let src_label = storage::join(&src.node, &label);
        if storage::node_kind(&src_store, &src_label) != Some(NodeKind::Group) {
            log::debug!("Skipping array {label} in {src}");
            continue;
        }
        log::debug!("Copying {label} of {src}");
        let label_attrs = storage::group_attributes(&src_store, &src_label)?;
        let mut multiscale = MultiscaleAttrs::from_attributes(&label_attrs)?;
        multiscale.extract_single_scale(LEVEL, LEVEL)?;
        let mut dst_attrs = label_attrs;
        multiscale.update_attributes(&mut dst_attrs)?;

        let dst_label = storage::join("/labels", &label);
        storage::create_group(&dst_store, &dst_label, dst_attrs)?;

        let src_level = storage::join(&src_label, LEVEL);
        let level_attrs = storage::array_attributes(&src_store, &src_level)?;
        storage::copy_array(
            &src_store,
            &src_level,
            &dst_store,
            &storage::join(&dst_label, LEVEL),
            level_attrs,
        )?;
    }
    Ok(())
}
