//! Recompute the complement counts of every label level in place.
//!
//! Smoothly downsampled values are binarised at the midpoint between
//! `present` and `absent` before counting.
use crate::{
    Result,
    cellmap::CellmapAttrs,
    config::DataConfig,
    downsample::binarized_counts,
    parallel::run_all,
    reader::{DataPath, to_ndarray},
    storage::{self, NodeKind, ZarrArray},
};

use super::{class_names, crop_refs, label_group};

pub fn run(config: &DataConfig, max_concurrency: Option<usize>) -> Result<()> {
    run_all(crop_refs(config)?, max_concurrency, |crop| {
        correct_crop(&crop.path)
    })?;
    log::info!("all done!");
    Ok(())
}

pub fn correct_crop(crop: &DataPath) -> Result<()> {
    let labels = label_group(crop);
    let store = labels.zarr_store()?;
    for label in class_names(&labels)? {
        log::info!("Correcting attributes in {crop} for {label}");
        let group = storage::join(&labels.node, &label);
        for level in storage::children(&store, &group)? {
            let path = storage::join(&group, &level);
            if storage::node_kind(&store, &path) != Some(NodeKind::Array) {
                continue;
            }
            let array = ZarrArray::open(&store, &path)?;
            let mut attributes = array.attributes().clone();
            let mut cellmap = CellmapAttrs::from_attributes(&attributes)?;
            let data = to_ndarray(array.shape(), array.read()?.to_f64())?;
            let (absent, unknown) = binarized_counts(&data, cellmap.encoding()?);
            log::debug!("{path}: absent={absent}, unknown={unknown}");
            cellmap.set_complement_counts(absent as f64, unknown as f64);
            cellmap.update_attributes(&mut attributes)?;
            storage::set_array_attributes(&store, &path, attributes)?;
        }
    }
    Ok(())
}
