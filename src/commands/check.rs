//! Check that everything a data configuration refers to exists and opens.
//!
//! Problems are logged and collected; a broken dataset or crop never stops
//! the remaining checks.
use std::fmt;

use crate::{
    Error, Result,
    config::{DataConfig, DatasetInfo},
    parallel::run_all,
    reader::{DataPath, Node},
};

use super::{class_names, label_group};

/// A single failed check.
#[derive(Debug, Clone, PartialEq)]
pub struct Problem {
    pub dataset: String,
    pub crop: Option<String>,
    pub message: String,
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.crop {
            Some(crop) => write!(f, "{}, crop: {crop}, dataset: {}", self.message, self.dataset),
            None => write!(f, "{}, dataset: {}", self.message, self.dataset),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CheckReport {
    pub problems: Vec<Problem>,
}

impl CheckReport {
    pub fn is_ok(&self) -> bool {
        self.problems.is_empty()
    }
}

/// Scale levels to open for each label and for raw data.
#[derive(Debug, Clone, Default)]
pub struct CheckOptions {
    pub label_scalelevels: Vec<String>,
    pub raw_scalelevels: Vec<String>,
}

pub fn run(
    config: &DataConfig,
    options: &CheckOptions,
    max_concurrency: Option<usize>,
) -> Result<CheckReport> {
    let datasets: Vec<_> = config.datasets.iter().collect();
    let problems = run_all(datasets, max_concurrency, |(name, info)| {
        Ok(check_dataset(name, info, options))
    })?;
    let report = CheckReport {
        problems: problems.into_iter().flatten().collect(),
    };
    log::info!("all done!");
    Ok(report)
}

/// Collects problems, logging each as it is found.
struct Problems<'a> {
    dataset: &'a str,
    found: Vec<Problem>,
}

impl Problems<'_> {
    fn record(&mut self, crop: Option<&str>, error: Error) {
        let problem = Problem {
            dataset: self.dataset.to_string(),
            crop: crop.map(str::to_string),
            message: error.to_string(),
        };
        log::error!("{problem}");
        self.found.push(problem);
    }
}

fn check_dataset(name: &str, info: &DatasetInfo, options: &CheckOptions) -> Vec<Problem> {
    let mut problems = Problems {
        dataset: name,
        found: Vec::new(),
    };
    if let Err(e) = check_dataset_paths(info, options) {
        problems.record(None, e);
        return problems.found;
    }
    for crop in &info.crops {
        let crop_path = match DataPath::parse(info.crop_path(crop)) {
            Ok(p) => p,
            Err(e) => {
                problems.record(Some(crop), e);
                continue;
            }
        };
        if let Err(e) = check_crop(&crop_path, &options.label_scalelevels) {
            problems.record(Some(crop), e);
        }
        if info.raw.is_none()
            && let Err(e) = check_crop_raw(&crop_path, &options.raw_scalelevels)
        {
            problems.record(Some(crop), e);
        }
    }
    problems.found
}

fn check_dataset_paths(info: &DatasetInfo, options: &CheckOptions) -> Result<()> {
    if let Some(raw) = &info.raw {
        let raw = DataPath::parse(raw)?;
        if !raw.exists() {
            return Err(Error::general(format!("{raw} does not exist")));
        }
        for level in &options.raw_scalelevels {
            open_with_coordinates(&raw.join(level))?;
        }
    }
    let crop_group = DataPath::parse(&info.crop_group)?;
    if !crop_group.exists() {
        return Err(Error::general(format!("{crop_group} does not exist")));
    }
    Ok(())
}

fn check_crop(crop: &DataPath, scalelevels: &[String]) -> Result<()> {
    if !crop.exists() {
        return Err(Error::general(format!("{crop} does not exist")));
    }
    let labels = label_group(crop);
    for label in class_names(&labels)? {
        for level in scalelevels {
            open_with_coordinates(&labels.join(&label).join(level))?;
        }
    }
    Ok(())
}

fn check_crop_raw(crop: &DataPath, scalelevels: &[String]) -> Result<()> {
    let raw = crop.join("raw");
    open_with_coordinates(&raw)?;
    for level in scalelevels {
        open_with_coordinates(&raw.join(level))?;
    }
    Ok(())
}

/// Open a node, and for volumes also resolve their coordinates.
fn open_with_coordinates(path: &DataPath) -> Result<()> {
    if !path.exists() {
        return Err(Error::general(format!("{path} does not exist")));
    }
    if let Node::Volume(volume) = Node::open(path)? {
        volume.coordinates()?;
    }
    Ok(())
}
