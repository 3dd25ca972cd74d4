//! Fixtures: a small source dataset with one crop and dataset-level raw data.
#![allow(dead_code)]

use std::path::{Path, PathBuf};

use serde_json::{Map, Value, json};
use tempfile::TempDir;
use zarrs_cellmap::{
    config::DataConfig,
    element::Samples,
    storage::{self, Store},
};

pub const RAW_SHAPE: [u64; 3] = [16, 16, 16];
pub const LABEL_SHAPE: [u64; 3] = [4, 4, 4];

pub fn init_logging() {
    env_logger::try_init().ok();
}

pub fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected an object, got {other}"),
    }
}

pub fn multiscale_attrs(name: &str, scale: f64, translation: f64) -> Map<String, Value> {
    object(json!({
        "multiscales": [{
            "version": "0.4",
            "name": name,
            "axes": [
                {"name": "z", "type": "space", "unit": "nanometer"},
                {"name": "y", "type": "space", "unit": "nanometer"},
                {"name": "x", "type": "space", "unit": "nanometer"},
            ],
            "datasets": [{
                "path": "s0",
                "coordinateTransformations": [
                    {"type": "scale", "scale": [scale, scale, scale]},
                    {"type": "translation", "translation": [translation, translation, translation]},
                ],
            }],
        }],
    }))
}

pub fn label_array_attrs(absent: u64, unknown: u64) -> Map<String, Value> {
    object(json!({
        "cellmap": {
            "annotation": {
                "annotation_type": {
                    "type": "semantic_segmentation",
                    "encoding": {"present": 1, "absent": 0, "unknown": 255},
                },
                "complement_counts": {"absent": absent, "unknown": unknown},
            },
        },
    }))
}

/// Raw voxel value at a position.
pub fn raw_value(z: u64, y: u64, x: u64) -> u8 {
    ((z * 7 + y * 3 + x) % 256) as u8
}

/// `mito` is present in the upper half along z and unknown in the last voxel.
pub fn mito_value(z: u64, y: u64, x: u64) -> u8 {
    if [z, y, x] == [3, 3, 3] {
        255
    } else if z < 2 {
        1
    } else {
        0
    }
}

fn fill(shape: [u64; 3], f: impl Fn(u64, u64, u64) -> u8) -> Vec<u8> {
    let mut out = Vec::new();
    for z in 0..shape[0] {
        for y in 0..shape[1] {
            for x in 0..shape[2] {
                out.push(f(z, y, x));
            }
        }
    }
    out
}

pub struct SourceData {
    pub dir: TempDir,
    pub container: PathBuf,
}

impl SourceData {
    pub fn crop_group(&self) -> PathBuf {
        self.container.join("labels/groundtruth")
    }

    pub fn raw(&self) -> PathBuf {
        self.container.join("em/raw")
    }

    pub fn store(&self) -> Store {
        storage::open_store(&self.container).unwrap()
    }
}

/// A container `source.zarr` with raw data at `/em/raw` (2 nm voxels) and the
/// crop `crop1` at `/labels/groundtruth/crop1` (4 nm voxels) labelling `mito`
/// and `er`.
///
/// The crop covers raw voxels 2..10 along every axis.
pub fn source_data() -> SourceData {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let container = dir.path().join("source.zarr");
    let store = storage::open_store(&container).unwrap();

    for group in ["/", "/em", "/labels", "/labels/groundtruth"] {
        storage::create_group(&store, group, Map::new()).unwrap();
    }
    storage::create_group(&store, "/em/raw", multiscale_attrs("raw", 2.0, 1.0)).unwrap();
    storage::write_array(
        &store,
        "/em/raw/s0",
        &RAW_SHAPE,
        &Samples::from(fill(RAW_SHAPE, raw_value)),
        Map::new(),
    )
    .unwrap();

    let crop = "/labels/groundtruth/crop1";
    let crop_attrs = object(json!({
        "cellmap": {"annotation": {"class_names": ["mito", "er"]}},
        "note": "crop attributes",
    }));
    storage::create_group(&store, crop, crop_attrs).unwrap();

    let mito = format!("{crop}/mito");
    storage::create_group(&store, &mito, multiscale_attrs("mito", 4.0, 6.0)).unwrap();
    storage::write_array(
        &store,
        &format!("{mito}/s0"),
        &LABEL_SHAPE,
        &Samples::from(fill(LABEL_SHAPE, mito_value)),
        label_array_attrs(31, 1),
    )
    .unwrap();

    let er = format!("{crop}/er");
    storage::create_group(&store, &er, multiscale_attrs("er", 4.0, 6.0)).unwrap();
    storage::write_array(
        &store,
        &format!("{er}/s0"),
        &LABEL_SHAPE,
        &Samples::from(fill(LABEL_SHAPE, |_, _, _| 0)),
        label_array_attrs(64, 0),
    )
    .unwrap();

    SourceData { dir, container }
}

/// Write a configuration with a single dataset `jrc_test-1`.
pub fn write_config(
    path: &Path,
    crop_group: &Path,
    crops: &[&str],
    raw: Option<&Path>,
) -> DataConfig {
    let mut yaml = format!(
        "datasets:\n  jrc_test-1:\n    crop_group: {}\n    crops: [{}]\n",
        crop_group.display(),
        crops.join(", ")
    );
    if let Some(raw) = raw {
        yaml.push_str(&format!("    raw: {}\n", raw.display()));
    }
    let config = DataConfig::from_yaml(&yaml).unwrap();
    config.to_path(path).unwrap();
    config
}
