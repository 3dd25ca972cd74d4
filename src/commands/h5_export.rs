//! Export crops to HDF5, mirroring the Zarr hierarchy.
//!
//! Datasets are chunked with at most 8 elements per axis and every attribute
//! is stored as a JSON string.
use std::{path::Path, str::FromStr};

use hdf5::{H5Type, Location, types::VarLenUnicode};
use serde_json::{Map, Value};

use crate::{
    Error, Result,
    cellmap::extract_crop_name,
    config::DataConfig,
    element::with_samples,
    parallel::run_all,
    reader::DataPath,
    storage::{self, NodeKind, Store, ZarrArray},
};

use super::crop_refs;

const MAX_CHUNK: u64 = 8;

pub fn run(config: &DataConfig, destination: &Path, max_concurrency: Option<usize>) -> Result<()> {
    for name in config.datasets.keys() {
        let dir = destination.join(name);
        std::fs::create_dir_all(&dir).map_err(|e| Error::io(&dir, e))?;
    }
    run_all(crop_refs(config)?, max_concurrency, |crop| {
        let dir = destination.join(&crop.dataset);
        export_crop(&crop.path, &dir)
    })?;
    log::info!("all done!");
    Ok(())
}

/// Write the crop at `src` to `{cropname}.h5` in `dir`.
pub fn export_crop(src: &DataPath, dir: &Path) -> Result<()> {
    log::info!("{src}");
    let path = src.to_string();
    let crop_name = extract_crop_name(&path)
        .ok_or_else(|| Error::general(format!("no crop name in {path}")))?;
    let store = src.zarr_store()?;
    let file = hdf5::File::create(dir.join(format!("{crop_name}.h5")))?;
    for child in storage::children(&store, &src.node)? {
        copy_node(&store, &storage::join(&src.node, &child), &file, &child)?;
    }
    Ok(())
}

fn copy_node(store: &Store, path: &str, parent: &hdf5::Group, name: &str) -> Result<()> {
    match storage::node_kind(store, path) {
        Some(NodeKind::Group) => copy_group(store, path, parent, name),
        Some(NodeKind::Array) => copy_array(store, path, parent, name),
        None => Ok(()),
    }
}

fn copy_group(store: &Store, path: &str, parent: &hdf5::Group, name: &str) -> Result<()> {
    log::debug!("Copy group {path}");
    let group = parent.create_group(name)?;
    write_attributes(&group, &storage::group_attributes(store, path)?)?;
    for child in storage::children(store, path)? {
        log::debug!("Processing {path}'s {child}");
        copy_node(store, &storage::join(path, &child), &group, &child)?;
    }
    Ok(())
}

fn copy_array(store: &Store, path: &str, parent: &hdf5::Group, name: &str) -> Result<()> {
    let array = ZarrArray::open(store, path)?;
    let shape: Vec<usize> = array.shape().iter().map(|s| *s as usize).collect();
    let chunks = export_chunks(array.shape());
    let samples = array.read()?;
    let dataset = with_samples!(&samples, v => write_dataset(parent, name, &shape, &chunks, v)?);
    write_attributes(&dataset, array.attributes())
}

/// Chunk shape with at most 8 elements (and at least one) per axis.
pub fn export_chunks(shape: &[u64]) -> Vec<usize> {
    shape
        .iter()
        .map(|s| (*s).clamp(1, MAX_CHUNK) as usize)
        .collect()
}

fn write_dataset<T: H5Type>(
    parent: &hdf5::Group,
    name: &str,
    shape: &[usize],
    chunks: &[usize],
    data: &[T],
) -> Result<hdf5::Dataset> {
    let dataset = parent
        .new_dataset::<T>()
        .shape(shape.to_vec())
        .chunk(chunks.to_vec())
        .create(name)?;
    dataset.write_raw(data)?;
    Ok(dataset)
}

fn write_attributes(location: &Location, attributes: &Map<String, Value>) -> Result<()> {
    for (key, value) in attributes {
        let text = VarLenUnicode::from_str(&serde_json::to_string(value)?)
            .map_err(|e| Error::general(format!("cannot store attribute {key}: {e}")))?;
        location
            .new_attr::<VarLenUnicode>()
            .create(key.as_str())?
            .write_scalar(&text)?;
    }
    Ok(())
}
