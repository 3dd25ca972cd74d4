//! One module per `data-prep` subcommand.
//!
//! Every command takes a parsed [`DataConfig`] and works through its crops
//! with [`run_all`](crate::parallel::run_all).
use crate::{
    Result,
    cellmap::CellmapAttrs,
    config::DataConfig,
    reader::{DataPath, read_attributes},
};

pub mod add_raw;
pub mod check;
pub mod copy_crops;
pub mod correct_attrs;
pub mod filter;
pub mod h5_export;
pub mod multiscale;

/// A crop of a dataset, located on disk.
#[derive(Debug, Clone)]
pub(crate) struct CropRef {
    pub dataset: String,
    pub path: DataPath,
}

pub(crate) fn crop_refs(config: &DataConfig) -> Result<Vec<CropRef>> {
    config
        .crops()
        .map(|(dataset, info, crop)| {
            Ok(CropRef {
                dataset: dataset.to_string(),
                path: DataPath::parse(info.crop_path(crop))?,
            })
        })
        .collect()
}

/// The group holding a crop's labels: its `labels` subgroup if there is one.
pub(crate) fn label_group(crop: &DataPath) -> DataPath {
    let labels = crop.join("labels");
    if labels.exists() {
        labels
    } else {
        crop.clone()
    }
}

/// Label names listed on a label group.
pub(crate) fn class_names(label_group: &DataPath) -> Result<Vec<String>> {
    let attrs = CellmapAttrs::from_attributes(&read_attributes(label_group)?)?;
    Ok(attrs.class_names()?.to_vec())
}

/// Names of the scale levels `s0` to `s{num_scales - 1}`.
pub(crate) fn scale_names(num_scales: usize) -> Vec<String> {
    (0..num_scales).map(|k| format!("s{k}")).collect()
}
