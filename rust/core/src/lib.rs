#![warn(clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::cast_precision_loss
)]

//! mmeval core
//!
//! This crate provides:
//! - `ParameterSet` - named parameter store restored from checkpoints
//! - `ComputationConfig` - normalization mode the model computation runs under
//! - `Structure` trait - maps an input batch to an output plus named stages
//! - `CaeShadow` / `CaeDeep` - dense autoencoder structures

pub mod cae;
pub mod norm;
pub mod params;
pub mod scope;
pub mod structure;

pub use cae::{CaeDeep, CaeShadow, StructureKind};
pub use params::{ParamError, ParameterSet};
pub use scope::{ComputationConfig, NormMode};
pub use structure::{STAGE_FINAL, STAGE_MIDDLE, StageOutput, Structure, StructureError};
