//! Data preparation for cellmap volumetric microscopy crops.
//!
//! Crops are read from Zarr or HDF5 containers, rewritten as Zarr hierarchies
//! with OME-NGFF multiscale metadata, downsampled, filtered and exported.
//! Each `data-prep` subcommand lives in [`commands`].
pub mod cellmap;
pub mod cli;
pub mod commands;
pub mod config;
pub mod downsample;
pub mod element;
mod error;
pub mod ngff;
pub mod parallel;
pub mod reader;
pub mod storage;

pub use zarrs;

pub use error::{Error, Result};
