//! Command line surface of the `data-prep` binary.
use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

use crate::{
    Error, Result,
    commands::{
        add_raw,
        check::{self, CheckOptions},
        copy_crops, correct_attrs,
        filter::{self, FilterOptions},
        h5_export, multiscale,
    },
    config::DataConfig,
};

/// Data preparation for cellmap crops.
#[derive(Parser, Debug)]
#[command(name = "data-prep", version)]
pub struct Cli {
    /// Increase verbosity (-v for INFO, -vv for DEBUG).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,
    /// Maximum number of crops or datasets processed at once.
    #[arg(long, global = true)]
    pub max_concurrency: Option<usize>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Copy the s0 level of every crop to DESTINATION.
    CopyCrops {
        data_yaml: PathBuf,
        destination: PathBuf,
    },
    /// Check that the data in a data configuration can be opened.
    CheckDataYaml {
        data_yaml: PathBuf,
        /// Scale levels to open for every label.
        #[arg(long)]
        label_scalelevels: Vec<String>,
        /// Scale levels to open for raw data.
        #[arg(long)]
        raw_scalelevels: Vec<String>,
    },
    /// Build smoothed multiscale pyramids for labels.
    MultiscaleLabels {
        data_yaml: PathBuf,
        /// Desired number of scale levels.
        #[arg(long, default_value_t = 4)]
        num_scales: usize,
    },
    /// Add the raw data covering each crop to the crop.
    AddRaw { data_yaml: PathBuf },
    /// Build multiscale pyramids for crop raw data.
    MultiscaleRaw {
        data_yaml: PathBuf,
        /// Desired number of scale levels.
        #[arg(long, default_value_t = 4)]
        num_scales: usize,
    },
    /// Export crops to HDF5 files in DESTINATION.
    H5Export {
        data_yaml: PathBuf,
        destination: PathBuf,
    },
    /// Recompute the complement counts of every label level.
    CorrectAttrs { data_yaml: PathBuf },
    /// Write a data configuration without the crops failing the given checks.
    FilterYaml {
        data_yaml: PathBuf,
        data_yaml_filtered: PathBuf,
        /// Scale (z y x) the crops must be annotated at.
        #[arg(long, num_args = 3, value_names = ["Z", "Y", "X"])]
        scale: Option<Vec<f64>>,
        /// Minimum shape (z y x) of the crops.
        #[arg(long, num_args = 3, value_names = ["Z", "Y", "X"])]
        min_size: Option<Vec<u64>>,
        /// Minimum fraction of annotated voxels for each of `--labels`.
        #[arg(long)]
        min_frac_annotated: Option<f64>,
        /// Labels to check the annotated fraction of.
        #[arg(long)]
        labels: Vec<String>,
    },
}

/// Log level for a `-v` count; `RUST_LOG` takes precedence.
pub fn log_level(verbose: u8) -> log::LevelFilter {
    match verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        _ => log::LevelFilter::Debug,
    }
}

pub fn init_logging(verbose: u8) {
    env_logger::Builder::new()
        .filter_level(log_level(verbose))
        .parse_default_env()
        .init();
}

pub fn run(cli: Cli) -> Result<()> {
    let max = cli.max_concurrency;
    match cli.command {
        Command::CopyCrops {
            data_yaml,
            destination,
        } => copy_crops::run(&DataConfig::from_path(data_yaml)?, &destination, max),
        Command::CheckDataYaml {
            data_yaml,
            label_scalelevels,
            raw_scalelevels,
        } => {
            let options = CheckOptions {
                label_scalelevels,
                raw_scalelevels,
            };
            let report = check::run(&DataConfig::from_path(data_yaml)?, &options, max)?;
            if report.is_ok() {
                Ok(())
            } else {
                Err(Error::general(format!(
                    "found {} problems",
                    report.problems.len()
                )))
            }
        }
        Command::MultiscaleLabels {
            data_yaml,
            num_scales,
        } => multiscale::labels(&DataConfig::from_path(data_yaml)?, num_scales, max),
        Command::AddRaw { data_yaml } => add_raw::run(&DataConfig::from_path(data_yaml)?, max),
        Command::MultiscaleRaw {
            data_yaml,
            num_scales,
        } => multiscale::raw(&DataConfig::from_path(data_yaml)?, num_scales, max),
        Command::H5Export {
            data_yaml,
            destination,
        } => h5_export::run(&DataConfig::from_path(data_yaml)?, &destination, max),
        Command::CorrectAttrs { data_yaml } => {
            correct_attrs::run(&DataConfig::from_path(data_yaml)?, max)
        }
        Command::FilterYaml {
            data_yaml,
            data_yaml_filtered,
            scale,
            min_size,
            min_frac_annotated,
            labels,
        } => {
            let options = FilterOptions {
                scale,
                min_size,
                min_frac_annotated,
                labels,
            };
            filter::run(
                &DataConfig::from_path(data_yaml)?,
                &data_yaml_filtered,
                &options,
                max,
            )?;
            Ok(())
        }
    }
}
