//! Dense autoencoder structures.
//!
//! Two variants: `CaeShadow` (one encode and one decode stage) and
//! `CaeDeep` (three of each). Both expose the bottleneck as the `Middle`
//! stage and the reconstruction as `Final`; `CaeDeep` additionally exposes
//! `Encode_b`. Parameter names follow `{scope}/{stage}/{weights,biases}`
//! with moving normalization statistics under `{stage}/BatchNorm/`.

use std::collections::BTreeMap;
use std::str::FromStr;

use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::norm::{batch_statistics, normalize};
use crate::params::ParameterSet;
use crate::scope::{ComputationConfig, NormMode};
use crate::structure::{STAGE_FINAL, STAGE_MIDDLE, StageOutput, Structure, StructureError};

/// One dense stage of an autoencoder.
#[derive(Debug, Clone, Copy)]
struct DenseStage {
    name: &'static str,
    input: usize,
    output: usize,
    /// Normalize the pre-activation (encode stages only).
    norm: bool,
    relu: bool,
    /// Stage name this layer's activation is published under, if any.
    emits: Option<&'static str>,
}

fn declare_stage(
    params: &mut ParameterSet,
    scope: &str,
    stage: &DenseStage,
    config: &ComputationConfig,
) -> Result<(), StructureError> {
    params.declare(
        format!("{scope}/{}/weights", stage.name),
        &[stage.input, stage.output],
    )?;
    params.declare(format!("{scope}/{}/biases", stage.name), &[stage.output])?;
    if stage.norm && config.norm_mode() == NormMode::Moving {
        params.declare(
            format!("{scope}/{}/BatchNorm/moving_mean", stage.name),
            &[stage.output],
        )?;
        params.declare(
            format!("{scope}/{}/BatchNorm/moving_variance", stage.name),
            &[stage.output],
        )?;
    }
    Ok(())
}

fn forward_stage(
    x: &Array2<f32>,
    params: &ParameterSet,
    scope: &str,
    stage: &DenseStage,
    config: &ComputationConfig,
) -> Result<Array2<f32>, StructureError> {
    let weights = params.require_2d(&format!("{scope}/{}/weights", stage.name))?;
    let biases = params.require_1d(&format!("{scope}/{}/biases", stage.name))?;
    let mut pre = x.dot(&weights) + &biases;

    if stage.norm {
        match config.norm_mode() {
            NormMode::Off => {}
            NormMode::BatchStat => {
                let (mean, var) = batch_statistics(&pre.view());
                pre = normalize(&pre.view(), &mean, &var);
            }
            NormMode::Moving => {
                let mean = params
                    .require_1d(&format!("{scope}/{}/BatchNorm/moving_mean", stage.name))?
                    .to_owned();
                let var = params
                    .require_1d(&format!("{scope}/{}/BatchNorm/moving_variance", stage.name))?
                    .to_owned();
                pre = normalize(&pre.view(), &mean, &var);
            }
        }
    }

    if stage.relu {
        pre.mapv_inplace(|v| v.max(0.0));
    }
    Ok(pre)
}

fn run_stages(
    structure: &'static str,
    stages: &[DenseStage],
    known: &'static [&'static str],
    inputs: &ArrayView2<'_, f32>,
    params: &ParameterSet,
    scope: &str,
    final_stage: &str,
    config: &ComputationConfig,
) -> Result<StageOutput, StructureError> {
    if !known.contains(&final_stage) {
        return Err(StructureError::UnknownStage {
            structure,
            stage: final_stage.to_string(),
            known,
        });
    }

    let mut emitted = BTreeMap::new();
    let mut net = inputs.to_owned();
    for stage in stages {
        net = forward_stage(&net, params, scope, stage, config)?;
        if let Some(name) = stage.emits {
            emitted.insert(name.to_string(), net.clone());
            if name == final_stage {
                return Ok(StageOutput {
                    output: net,
                    stages: emitted,
                });
            }
        }
    }

    // Unreachable while `known` matches the emitted stage names.
    Err(StructureError::UnknownStage {
        structure,
        stage: final_stage.to_string(),
        known,
    })
}

fn emitted_width(stages: &[DenseStage], stage: &str) -> Option<usize> {
    stages
        .iter()
        .find(|s| s.emits == Some(stage))
        .map(|s| s.output)
}

fn check_width(
    structure: &'static str,
    expected: usize,
    inputs: &ArrayView2<'_, f32>,
) -> Result<(), StructureError> {
    if inputs.ncols() == expected {
        Ok(())
    } else {
        Err(StructureError::InputWidth {
            structure,
            expected,
            found: inputs.ncols(),
        })
    }
}

/// Minimal autoencoder: one encode stage to the bottleneck, one decode back.
#[derive(Debug, Clone)]
pub struct CaeShadow {
    input_len: usize,
    middle_len: usize,
}

impl CaeShadow {
    #[must_use]
    pub fn new(input_len: usize, middle_len: usize) -> Self {
        Self {
            input_len,
            middle_len,
        }
    }

    fn stages(&self) -> [DenseStage; 2] {
        [
            DenseStage {
                name: "Encode",
                input: self.input_len,
                output: self.middle_len,
                norm: true,
                relu: true,
                emits: Some(STAGE_MIDDLE),
            },
            DenseStage {
                name: "Decode",
                input: self.middle_len,
                output: self.input_len,
                norm: false,
                relu: false,
                emits: Some(STAGE_FINAL),
            },
        ]
    }
}

const SHADOW_STAGES: &[&str] = &[STAGE_MIDDLE, STAGE_FINAL];

impl Structure for CaeShadow {
    fn name(&self) -> &'static str {
        "shadow"
    }

    fn stage_names(&self) -> &'static [&'static str] {
        SHADOW_STAGES
    }

    fn input_len(&self) -> usize {
        self.input_len
    }

    fn stage_width(&self, stage: &str) -> Option<usize> {
        emitted_width(&self.stages(), stage)
    }

    fn declare(
        &self,
        params: &mut ParameterSet,
        scope: &str,
        config: &ComputationConfig,
    ) -> Result<(), StructureError> {
        for stage in &self.stages() {
            declare_stage(params, scope, stage, config)?;
        }
        Ok(())
    }

    fn forward(
        &self,
        inputs: &ArrayView2<'_, f32>,
        params: &ParameterSet,
        scope: &str,
        final_stage: &str,
        config: &ComputationConfig,
    ) -> Result<StageOutput, StructureError> {
        check_width("shadow", self.input_len, inputs)?;
        run_stages(
            "shadow",
            &self.stages(),
            SHADOW_STAGES,
            inputs,
            params,
            scope,
            final_stage,
            config,
        )
    }
}

/// Deeper autoencoder: three encode and three decode stages.
#[derive(Debug, Clone)]
pub struct CaeDeep {
    input_len: usize,
    hidden_a: usize,
    hidden_b: usize,
    middle_len: usize,
}

impl CaeDeep {
    #[must_use]
    pub fn new(input_len: usize, hidden_a: usize, hidden_b: usize, middle_len: usize) -> Self {
        Self {
            input_len,
            hidden_a,
            hidden_b,
            middle_len,
        }
    }

    fn stages(&self) -> [DenseStage; 6] {
        [
            DenseStage {
                name: "Encode_a",
                input: self.input_len,
                output: self.hidden_a,
                norm: true,
                relu: true,
                emits: None,
            },
            DenseStage {
                name: "Encode_b",
                input: self.hidden_a,
                output: self.hidden_b,
                norm: true,
                relu: true,
                emits: Some("Encode_b"),
            },
            DenseStage {
                name: "Encode_c",
                input: self.hidden_b,
                output: self.middle_len,
                norm: true,
                relu: true,
                emits: Some(STAGE_MIDDLE),
            },
            DenseStage {
                name: "Decode_a",
                input: self.middle_len,
                output: self.hidden_b,
                norm: false,
                relu: true,
                emits: None,
            },
            DenseStage {
                name: "Decode_b",
                input: self.hidden_b,
                output: self.hidden_a,
                norm: false,
                relu: true,
                emits: None,
            },
            DenseStage {
                name: "Decode_c",
                input: self.hidden_a,
                output: self.input_len,
                norm: false,
                relu: false,
                emits: Some(STAGE_FINAL),
            },
        ]
    }
}

const DEEP_STAGES: &[&str] = &["Encode_b", STAGE_MIDDLE, STAGE_FINAL];

impl Structure for CaeDeep {
    fn name(&self) -> &'static str {
        "deep"
    }

    fn stage_names(&self) -> &'static [&'static str] {
        DEEP_STAGES
    }

    fn input_len(&self) -> usize {
        self.input_len
    }

    fn stage_width(&self, stage: &str) -> Option<usize> {
        emitted_width(&self.stages(), stage)
    }

    fn declare(
        &self,
        params: &mut ParameterSet,
        scope: &str,
        config: &ComputationConfig,
    ) -> Result<(), StructureError> {
        for stage in &self.stages() {
            declare_stage(params, scope, stage, config)?;
        }
        Ok(())
    }

    fn forward(
        &self,
        inputs: &ArrayView2<'_, f32>,
        params: &ParameterSet,
        scope: &str,
        final_stage: &str,
        config: &ComputationConfig,
    ) -> Result<StageOutput, StructureError> {
        check_width("deep", self.input_len, inputs)?;
        run_stages(
            "deep",
            &self.stages(),
            DEEP_STAGES,
            inputs,
            params,
            scope,
            final_stage,
            config,
        )
    }
}

/// Which structure variant to instantiate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StructureKind {
    Shadow,
    Deep,
}

impl StructureKind {
    /// Build the structure for a dataset with `input_len`-wide features.
    ///
    /// The deep variant tapers through `4 * middle_len` and `2 * middle_len`
    /// hidden stages.
    #[must_use]
    pub fn build(self, input_len: usize, middle_len: usize) -> Box<dyn Structure> {
        match self {
            Self::Shadow => Box::new(CaeShadow::new(input_len, middle_len)),
            Self::Deep => Box::new(CaeDeep::new(
                input_len,
                middle_len * 4,
                middle_len * 2,
                middle_len,
            )),
        }
    }
}

impl FromStr for StructureKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "shadow" => Ok(Self::Shadow),
            "deep" => Ok(Self::Deep),
            other => Err(format!("unknown structure: {other}")),
        }
    }
}

impl std::fmt::Display for StructureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Shadow => write!(f, "shadow"),
            Self::Deep => write!(f, "deep"),
        }
    }
}
