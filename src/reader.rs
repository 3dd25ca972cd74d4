//! Read volumes and multiscale groups from Zarr or HDF5 containers.
//!
//! A filesystem path is split into the container (the first component with a
//! container suffix) and the node path inside it:
//!
//! ```text
//! /data/jrc_hela-2.zarr/recon-1/labels/groundtruth/crop1/mito/s0
//! \______________________/\____________________________________/
//!         container                       node
//! ```
//!
//! HDF5 attributes are stored as JSON strings and decoded on read.
use std::{
    fmt,
    ops::Range,
    path::{Path, PathBuf},
};

use hdf5::types::{VarLenAscii, VarLenUnicode};
use ndarray::{IxDyn, Slice, SliceInfo, SliceInfoElem};
use serde_json::{Map, Value};

use crate::{
    Error, Result,
    cellmap::access_attributes,
    element::{ElementType, Samples, with_element_type},
    ngff::{AxisCoordinates, MultiscaleAttrs},
    storage::{self, NodeKind, Store, ZarrArray},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Zarr,
    Hdf5,
}

impl Format {
    fn from_extension(extension: &str) -> Result<Option<Self>> {
        match extension {
            "zarr" => Ok(Some(Self::Zarr)),
            "h5" | "hdf5" | "hdf" => Ok(Some(Self::Hdf5)),
            "n5" => Err(Error::NotImplemented("reading N5 containers".to_string())),
            _ => Ok(None),
        }
    }
}

/// A node inside a container on the local filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPath {
    pub container: PathBuf,
    pub node: String,
    pub format: Format,
}

impl DataPath {
    /// Split a filesystem path at the first component with a container suffix.
    ///
    /// Paths without such a component are Zarr hierarchies rooted at the path itself.
    pub fn parse(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut container = PathBuf::new();
        let mut components = path.components();
        while let Some(component) = components.next() {
            container.push(component);
            let extension = Path::new(component.as_os_str())
                .extension()
                .and_then(|e| e.to_str());
            let format = extension
                .map(Format::from_extension)
                .transpose()?
                .flatten();
            if let Some(format) = format {
                let node = components
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join("/");
                return Ok(Self {
                    container,
                    node: storage::node_path(&node),
                    format,
                });
            }
        }
        Ok(Self {
            container: path.to_path_buf(),
            node: "/".to_string(),
            format: Format::Zarr,
        })
    }

    pub fn join(&self, child: &str) -> Self {
        Self {
            container: self.container.clone(),
            node: storage::join(&self.node, child),
            format: self.format,
        }
    }

    /// The parent node, or `None` at the container root.
    pub fn parent(&self) -> Option<Self> {
        if self.node == "/" {
            return None;
        }
        let parent = self.node.rsplit_once('/').map_or("/", |(p, _)| p);
        Some(Self {
            container: self.container.clone(),
            node: storage::node_path(parent),
            format: self.format,
        })
    }

    /// Node path relative to the ancestor `other`.
    fn relative_to(&self, other: &Self) -> Option<String> {
        let rel = if other.node == "/" {
            self.node.strip_prefix('/')?
        } else {
            self.node.strip_prefix(&other.node)?.strip_prefix('/')?
        };
        Some(rel.to_string())
    }

    pub fn exists(&self) -> bool {
        self.container.exists() && self.kind().is_some()
    }

    pub fn zarr_store(&self) -> Result<Store> {
        match self.format {
            Format::Zarr => storage::open_store(&self.container),
            Format::Hdf5 => Err(Error::general(format!("{self} is not a Zarr hierarchy"))),
        }
    }

    fn kind(&self) -> Option<NodeKind> {
        match self.format {
            Format::Zarr => self
                .zarr_store()
                .ok()
                .and_then(|store| storage::node_kind(&store, &self.node)),
            Format::Hdf5 => {
                let file = hdf5::File::open(&self.container).ok()?;
                if self.node == "/" || file.group(&self.node).is_ok() {
                    Some(NodeKind::Group)
                } else if file.dataset(&self.node).is_ok() {
                    Some(NodeKind::Array)
                } else {
                    None
                }
            }
        }
    }

    fn not_found(&self) -> Error {
        Error::general(format!("{self} does not exist"))
    }
}

impl fmt::Display for DataPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.node == "/" {
            write!(f, "{}", self.container.display())
        } else {
            write!(f, "{}{}", self.container.display(), self.node)
        }
    }
}

/// Read and decode all attributes of the node at `path`.
pub fn read_attributes(path: &DataPath) -> Result<Map<String, Value>> {
    match path.format {
        Format::Zarr => {
            let store = path.zarr_store()?;
            match storage::node_kind(&store, &path.node) {
                Some(NodeKind::Array) => storage::array_attributes(&store, &path.node),
                Some(NodeKind::Group) => storage::group_attributes(&store, &path.node),
                None => Err(path.not_found()),
            }
        }
        Format::Hdf5 => {
            let file = hdf5::File::open(&path.container)?;
            if path.node == "/" {
                hdf5_attributes(&file)
            } else if let Ok(group) = file.group(&path.node) {
                hdf5_attributes(&group)
            } else {
                let dataset = file.dataset(&path.node)?;
                hdf5_attributes(&dataset)
            }
        }
    }
}

fn hdf5_attributes(location: &hdf5::Location) -> Result<Map<String, Value>> {
    let mut out = Map::new();
    for name in location.attr_names()? {
        let attr = location.attr(&name)?;
        let text = if let Ok(v) = attr.read_scalar::<VarLenUnicode>() {
            v.as_str().to_string()
        } else if let Ok(v) = attr.read_scalar::<VarLenAscii>() {
            v.as_str().to_string()
        } else {
            log::debug!("Skipping non-string HDF5 attribute {name}");
            continue;
        };
        out.insert(name, access_attributes(&Value::String(text)));
    }
    Ok(out)
}

enum Backend {
    Zarr(ZarrArray),
    Hdf5 {
        _file: hdf5::File,
        dataset: hdf5::Dataset,
    },
}

/// A single array in a Zarr or HDF5 container.
pub struct Volume {
    path: DataPath,
    backend: Backend,
    shape: Vec<u64>,
    element_type: ElementType,
    attributes: Map<String, Value>,
}

impl fmt::Debug for Volume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Volume")
            .field("path", &self.path)
            .field("shape", &self.shape)
            .field("element_type", &self.element_type)
            .finish_non_exhaustive()
    }
}

impl Volume {
    pub fn open(path: &DataPath) -> Result<Self> {
        match path.format {
            Format::Zarr => {
                let array = ZarrArray::open(&path.zarr_store()?, &path.node)?;
                Ok(Self {
                    path: path.clone(),
                    shape: array.shape().to_vec(),
                    element_type: array.element_type(),
                    attributes: array.attributes().clone(),
                    backend: Backend::Zarr(array),
                })
            }
            Format::Hdf5 => {
                let file = hdf5::File::open(&path.container)?;
                let dataset = file.dataset(&path.node)?;
                let element_type = ElementType::from_hdf5(&dataset.dtype()?.to_descriptor()?)?;
                Ok(Self {
                    path: path.clone(),
                    shape: dataset.shape().into_iter().map(|s| s as u64).collect(),
                    element_type,
                    attributes: hdf5_attributes(&dataset)?,
                    backend: Backend::Hdf5 {
                        _file: file,
                        dataset,
                    },
                })
            }
        }
    }

    pub fn path(&self) -> &DataPath {
        &self.path
    }

    pub fn shape(&self) -> &[u64] {
        &self.shape
    }

    pub fn element_type(&self) -> ElementType {
        self.element_type
    }

    pub fn attributes(&self) -> &Map<String, Value> {
        &self.attributes
    }

    pub fn num_elements(&self) -> u64 {
        self.shape.iter().product()
    }

    pub fn read(&self) -> Result<Samples> {
        match &self.backend {
            Backend::Zarr(array) => array.read(),
            Backend::Hdf5 { dataset, .. } => Ok(with_element_type!(self.element_type, T => {
                Samples::from(dataset.read_raw::<T>()?)
            })),
        }
    }

    /// Read the elements within `ranges`, one per axis.
    pub fn read_region(&self, ranges: &[Range<u64>]) -> Result<Samples> {
        if ranges.len() != self.shape.len()
            || ranges
                .iter()
                .zip(&self.shape)
                .any(|(r, s)| r.start > r.end || r.end > *s)
        {
            return Err(Error::general(format!(
                "region {ranges:?} is out of bounds for {} with shape {:?}",
                self.path, self.shape
            )));
        }
        match &self.backend {
            Backend::Zarr(array) => array.read_region(ranges),
            Backend::Hdf5 { dataset, .. } => {
                let slices: Vec<SliceInfoElem> = ranges
                    .iter()
                    .map(|r| Slice::from(r.start as usize..r.end as usize).into())
                    .collect();
                let selection = SliceInfo::<Vec<SliceInfoElem>, IxDyn, IxDyn>::try_from(slices)
                    .map_err(Error::wrap)?;
                Ok(with_element_type!(self.element_type, T => {
                    let data = dataset.read_slice::<T, _, IxDyn>(selection)?;
                    Samples::from(data.into_iter().collect::<Vec<T>>())
                }))
            }
        }
    }

    pub fn read_f64(&self) -> Result<ndarray::ArrayD<f64>> {
        to_ndarray(&self.shape, self.read()?.to_f64())
    }

    /// Per-axis coordinates from the nearest ancestor with multiscale metadata
    /// referencing this volume.
    pub fn coordinates(&self) -> Result<Vec<AxisCoordinates>> {
        let mut ancestor = self.path.parent();
        while let Some(group) = ancestor {
            if let Ok(attributes) = read_attributes(&group)
                && attributes.contains_key("multiscales")
            {
                let multiscale = MultiscaleAttrs::from_attributes(&attributes)?;
                if let Some(rel) = self.path.relative_to(&group)
                    && multiscale.references(&rel)
                {
                    return multiscale.axis_coordinates(&rel, &self.shape);
                }
            }
            ancestor = group.parent();
        }
        Err(Error::NoMultiscaleMetadata(self.path.to_string()))
    }
}

pub fn to_ndarray<T>(shape: &[u64], data: Vec<T>) -> Result<ndarray::ArrayD<T>> {
    let shape: Vec<usize> = shape.iter().map(|s| *s as usize).collect();
    ndarray::ArrayD::from_shape_vec(ndarray::IxDyn(&shape), data).map_err(Error::wrap)
}

/// A group holding OME-NGFF multiscale metadata.
#[derive(Debug, Clone)]
pub struct MultiscaleGroup {
    path: DataPath,
    attributes: Map<String, Value>,
    multiscale: MultiscaleAttrs,
}

impl MultiscaleGroup {
    pub fn open(path: &DataPath) -> Result<Self> {
        let attributes = read_attributes(path)?;
        if !attributes.contains_key("multiscales") {
            return Err(Error::general(format!(
                "{path} is a group without multiscale metadata"
            )));
        }
        let multiscale = MultiscaleAttrs::from_attributes(&attributes)?;
        let group = Self {
            path: path.clone(),
            attributes,
            multiscale,
        };
        for level in group.levels() {
            if path.join(level).kind() != Some(NodeKind::Array) {
                return Err(Error::missing_scale_level(level, path.to_string()));
            }
        }
        Ok(group)
    }

    pub fn path(&self) -> &DataPath {
        &self.path
    }

    pub fn attributes(&self) -> &Map<String, Value> {
        &self.attributes
    }

    pub fn multiscale(&self) -> &MultiscaleAttrs {
        &self.multiscale
    }

    /// Paths of the scale levels, from highest to lowest resolution.
    pub fn levels(&self) -> Vec<&str> {
        self.multiscale
            .multiscales
            .iter()
            .flat_map(|m| m.datasets.iter().map(|d| d.path.as_str()))
            .collect()
    }

    pub fn open_level(&self, level: &str) -> Result<Volume> {
        if !self.multiscale.references(level) {
            return Err(Error::missing_scale_level(level, self.path.to_string()));
        }
        Volume::open(&self.path.join(level))
    }
}

/// A volume or a multiscale group.
#[derive(Debug)]
pub enum Node {
    Volume(Volume),
    Multiscale(MultiscaleGroup),
}

impl Node {
    pub fn open(path: &DataPath) -> Result<Self> {
        if !path.container.exists() {
            return Err(path.not_found());
        }
        match path.kind() {
            Some(NodeKind::Array) => Ok(Self::Volume(Volume::open(path)?)),
            Some(NodeKind::Group) => Ok(Self::Multiscale(MultiscaleGroup::open(path)?)),
            None => Err(path.not_found()),
        }
    }
}

/// Open the node at a filesystem path.
pub fn open_node(path: impl AsRef<Path>) -> Result<Node> {
    Node::open(&DataPath::parse(path)?)
}

/// Open the volume at a filesystem path.
pub fn open_volume(path: impl AsRef<Path>) -> Result<Volume> {
    match open_node(path)? {
        Node::Volume(v) => Ok(v),
        Node::Multiscale(g) => Err(Error::general(format!("{} is a group", g.path))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_splits_at_container() {
        let p = DataPath::parse("/data/jrc.zarr/recon-1/labels/crop1").unwrap();
        assert_eq!(p.container, PathBuf::from("/data/jrc.zarr"));
        assert_eq!(p.node, "/recon-1/labels/crop1");
        assert_eq!(p.format, Format::Zarr);
        assert_eq!(p.to_string(), "/data/jrc.zarr/recon-1/labels/crop1");

        let p = DataPath::parse("/out/jrc/crop1.h5/labels").unwrap();
        assert_eq!(p.format, Format::Hdf5);
        assert_eq!(p.node, "/labels");

        let p = DataPath::parse("/out/plain").unwrap();
        assert_eq!(p.container, PathBuf::from("/out/plain"));
        assert_eq!(p.node, "/");
        assert!(p.parent().is_none());

        assert!(matches!(
            DataPath::parse("/data/x.n5/s0"),
            Err(Error::NotImplemented(_))
        ));
    }

    #[test]
    fn parents_and_relative_paths() {
        let p = DataPath::parse("/d/c.zarr/labels/mito/s0").unwrap();
        let parent = p.parent().unwrap();
        assert_eq!(parent.node, "/labels/mito");
        assert_eq!(p.relative_to(&parent).unwrap(), "s0");
        let root = parent.parent().unwrap().parent().unwrap();
        assert_eq!(root.node, "/");
        assert_eq!(p.relative_to(&root).unwrap(), "labels/mito/s0");
        assert_eq!(root.join("raw").node, "/raw");
    }
}
