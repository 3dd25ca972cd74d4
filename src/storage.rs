//! Filesystem-backed Zarr hierarchies.
//!
//! Node paths follow the zarrs convention: absolute, `/`-separated, with `/`
//! for the root of the store.
use std::{path::Path, sync::Arc};

use serde_json::{Map, Value};
use zarrs::{
    array::{Array, ArrayBuilder, ArrayMetadataOptions, ArraySubset, codec::ZstdCodec},
    filesystem::FilesystemStore,
    group::{Group, GroupBuilder},
    storage::{ListableStorageTraits, StorePrefix, WritableStorageTraits},
};

use crate::{
    Error, Result,
    element::{ElementType, Samples, with_element_type, with_samples},
};

pub type Store = Arc<FilesystemStore>;

const ZSTD_LEVEL: i32 = 3;

/// Open the store rooted at `path`, which need not exist yet.
pub fn open_store(path: impl AsRef<Path>) -> Result<Store> {
    let store = FilesystemStore::new(path.as_ref()).map_err(Error::wrap)?;
    Ok(Arc::new(store))
}

/// Normalise a relative or absolute node path.
pub fn node_path(path: &str) -> String {
    let parts: Vec<_> = path.split('/').filter(|p| !p.is_empty()).collect();
    format!("/{}", parts.join("/"))
}

/// Path of `child` below the node at `parent`.
pub fn join(parent: &str, child: &str) -> String {
    node_path(&format!("{parent}/{child}"))
}

fn store_prefix(path: &str) -> Result<StorePrefix> {
    let path = node_path(path);
    if path == "/" {
        return Ok(StorePrefix::root());
    }
    StorePrefix::new(format!("{}/", &path[1..])).map_err(Error::wrap)
}

fn metadata_options() -> ArrayMetadataOptions {
    ArrayMetadataOptions::default().with_include_zarrs_metadata(false)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Array,
    Group,
}

/// Kind of node at `path`, or `None` if there is no node.
pub fn node_kind(store: &Store, path: &str) -> Option<NodeKind> {
    let path = node_path(path);
    if Array::open(store.clone(), &path).is_ok() {
        Some(NodeKind::Array)
    } else if Group::open(store.clone(), &path).is_ok() {
        Some(NodeKind::Group)
    } else {
        None
    }
}

/// Names of the nodes directly below `path`, sorted.
pub fn children(store: &Store, path: &str) -> Result<Vec<String>> {
    let listing = store.list_dir(&store_prefix(path)?)?;
    let mut out: Vec<_> = listing
        .prefixes()
        .iter()
        .filter_map(|prefix| {
            prefix
                .as_str()
                .trim_end_matches('/')
                .rsplit('/')
                .next()
                .map(str::to_string)
        })
        .filter(|name| node_kind(store, &join(path, name)).is_some())
        .collect();
    out.sort();
    Ok(out)
}

/// Remove a node and everything below it.
pub fn erase_node(store: &Store, path: &str) -> Result<()> {
    log::debug!("Erasing {}", node_path(path));
    store.erase_prefix(&store_prefix(path)?)?;
    Ok(())
}

/// Create (or overwrite the metadata of) a group.
pub fn create_group(store: &Store, path: &str, attributes: Map<String, Value>) -> Result<()> {
    GroupBuilder::new()
        .attributes(attributes)
        .build(store.clone(), &node_path(path))?
        .store_metadata()?;
    Ok(())
}

pub fn group_attributes(store: &Store, path: &str) -> Result<Map<String, Value>> {
    let group = Group::open(store.clone(), &node_path(path))?;
    Ok(group.attributes().clone())
}

/// Replace the attributes of an existing group.
pub fn set_group_attributes(
    store: &Store,
    path: &str,
    attributes: Map<String, Value>,
) -> Result<()> {
    let mut group = Group::open(store.clone(), &node_path(path))?;
    *group.attributes_mut() = attributes;
    group.store_metadata()?;
    Ok(())
}

pub fn array_attributes(store: &Store, path: &str) -> Result<Map<String, Value>> {
    let array = Array::open(store.clone(), &node_path(path))?;
    Ok(array.attributes().clone())
}

/// Replace the attributes of an existing array.
pub fn set_array_attributes(
    store: &Store,
    path: &str,
    attributes: Map<String, Value>,
) -> Result<()> {
    let mut array = Array::open(store.clone(), &node_path(path))?;
    *array.attributes_mut() = attributes;
    array.store_metadata_opt(&metadata_options())?;
    Ok(())
}

/// Shape of one chunk holding a single plane along the first axis.
pub fn plane_chunks(shape: &[u64]) -> Vec<u64> {
    shape
        .iter()
        .enumerate()
        .map(|(i, s)| if i == 0 { 1 } else { (*s).max(1) })
        .collect()
}

fn zero_of<T: Default>(_: &[T]) -> T {
    T::default()
}

/// Write `samples` to a new array at `path`, replacing any existing node.
///
/// Arrays are chunked by plane along the first axis and compressed with zstd.
pub fn write_array(
    store: &Store,
    path: &str,
    shape: &[u64],
    samples: &Samples,
    attributes: Map<String, Value>,
) -> Result<()> {
    let n_elements: u64 = shape.iter().product();
    if n_elements as usize != samples.len() {
        return Err(Error::general(format!(
            "cannot write {} elements to an array of shape {shape:?}",
            samples.len()
        )));
    }
    let path = node_path(path);
    if node_kind(store, &path).is_some() {
        erase_node(store, &path)?;
    }
    let data_type = samples.element_type().zarr_data_type();
    with_samples!(samples, v => {
        let array = ArrayBuilder::new(shape.to_vec(), plane_chunks(shape), data_type, zero_of(v))
            .bytes_to_bytes_codecs(vec![Arc::new(ZstdCodec::new(ZSTD_LEVEL, false))])
            .attributes(attributes)
            .build(store.clone(), &path)?;
        array.store_metadata_opt(&metadata_options())?;
        array.store_array_subset(&array.subset_all(), v.as_slice())?;
    });
    log::debug!("Wrote {} array {path} with shape {shape:?}", samples.element_type());
    Ok(())
}

/// A Zarr array opened for reading.
pub struct ZarrArray {
    array: Array<FilesystemStore>,
    element_type: ElementType,
}

impl ZarrArray {
    pub fn open(store: &Store, path: &str) -> Result<Self> {
        let array = Array::open(store.clone(), &node_path(path))?;
        let element_type = ElementType::from_zarr(array.data_type())?;
        Ok(Self {
            array,
            element_type,
        })
    }

    pub fn shape(&self) -> &[u64] {
        self.array.shape()
    }

    pub fn element_type(&self) -> ElementType {
        self.element_type
    }

    pub fn attributes(&self) -> &Map<String, Value> {
        self.array.attributes()
    }

    pub fn read(&self) -> Result<Samples> {
        self.read_subset(&self.array.subset_all())
    }

    /// Read the elements within `ranges`, one per axis.
    pub fn read_region(&self, ranges: &[std::ops::Range<u64>]) -> Result<Samples> {
        self.read_subset(&ArraySubset::new_with_ranges(ranges))
    }

    fn read_subset(&self, subset: &ArraySubset) -> Result<Samples> {
        let samples = with_element_type!(self.element_type, T => {
            let data = self.array.retrieve_array_subset::<Vec<T>>(subset)?;
            Samples::from(data)
        });
        Ok(samples)
    }
}

/// Copy the array at `src_path` to `dst_path`, rechunked by plane.
pub fn copy_array(
    src: &Store,
    src_path: &str,
    dst: &Store,
    dst_path: &str,
    attributes: Map<String, Value>,
) -> Result<()> {
    let array = ZarrArray::open(src, src_path)?;
    let shape = array.shape().to_vec();
    write_array(dst, dst_path, &shape, &array.read()?, attributes)
}
