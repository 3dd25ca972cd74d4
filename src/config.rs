//! Data configuration files.
//!
//! A data configuration is a YAML document listing, per dataset, the group holding
//! the annotated crops, the crops to use, and optionally a dataset-level raw
//! multiscale group:
//!
//! ```yaml
//! datasets:
//!   jrc_hela-2:
//!     crop_group: /nrs/cellmap/data/jrc_hela-2/jrc_hela-2.zarr/recon-1/labels/groundtruth
//!     crops: [crop1, crop113]
//!     raw: /nrs/cellmap/data/jrc_hela-2/jrc_hela-2.zarr/recon-1/em/fibsem-uint8
//! ```
//!
//! Keys which are not interpreted here are kept, so a configuration can be
//! read, filtered and written back without losing information.
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataConfig {
    /// Datasets by name, in the order they appear in the file.
    pub datasets: IndexMap<String, DatasetInfo>,
    #[serde(flatten)]
    pub extra: serde_yaml::Mapping,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetInfo {
    /// Group containing one subgroup per crop.
    pub crop_group: PathBuf,
    /// Names of the crops within `crop_group`.
    pub crops: Vec<String>,
    /// Dataset-level raw multiscale group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<PathBuf>,
    #[serde(flatten)]
    pub extra: serde_yaml::Mapping,
}

impl DataConfig {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Self::from_yaml(&text)
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn to_path(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        std::fs::write(path, self.to_yaml()?).map_err(|e| Error::io(path, e))
    }

    /// Iterate over every `(dataset name, dataset info, crop name)`.
    pub fn crops(&self) -> impl Iterator<Item = (&str, &DatasetInfo, &str)> {
        self.datasets.iter().flat_map(|(name, info)| {
            info.crops
                .iter()
                .map(move |crop| (name.as_str(), info, crop.as_str()))
        })
    }
}

impl DatasetInfo {
    pub fn crop_path(&self, crop: &str) -> PathBuf {
        self.crop_group.join(crop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
name: training
datasets:
  jrc_hela-2:
    crop_group: /data/jrc_hela-2.zarr/recon-1/labels/groundtruth
    crops: [crop1, crop113]
    raw: /data/jrc_hela-2.zarr/recon-1/em/fibsem-uint8
    notes: keep me
  jrc_cos7-1a:
    crop_group: /data/jrc_cos7-1a.zarr/recon-1/labels/groundtruth
    crops: [crop234]
"#;

    #[test]
    fn parse_preserves_order_and_extras() {
        let config = DataConfig::from_yaml(YAML).unwrap();
        let names: Vec<_> = config.datasets.keys().cloned().collect();
        assert_eq!(names, vec!["jrc_hela-2", "jrc_cos7-1a"]);

        let hela = &config.datasets["jrc_hela-2"];
        assert_eq!(
            hela.crop_path("crop1"),
            PathBuf::from("/data/jrc_hela-2.zarr/recon-1/labels/groundtruth/crop1")
        );
        assert!(hela.raw.is_some());
        assert!(hela.extra.contains_key("notes"));
        assert!(config.datasets["jrc_cos7-1a"].raw.is_none());
        assert!(config.extra.contains_key("name"));

        let crops: Vec<_> = config.crops().map(|(_, _, c)| c).collect();
        assert_eq!(crops, vec!["crop1", "crop113", "crop234"]);
    }

    #[test]
    fn yaml_round_trip() {
        let config = DataConfig::from_yaml(YAML).unwrap();
        let again = DataConfig::from_yaml(&config.to_yaml().unwrap()).unwrap();
        assert_eq!(config, again);
    }

    #[test]
    fn missing_datasets_is_an_error() {
        assert!(DataConfig::from_yaml("crops: []").is_err());
    }
}
