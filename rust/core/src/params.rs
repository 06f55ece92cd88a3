//! Named parameter store.
//!
//! Parameters are declared with a fixed shape when the model computation is
//! built, overwritten exactly once when a checkpoint is restored, and read
//! only from then on. Names are hierarchical, `/`-separated
//! (e.g. `Color/Encode/weights`), so sub-models restore into disjoint
//! namespaces.

use std::collections::BTreeMap;

use ndarray::{ArrayD, ArrayView1, ArrayView2, Ix1, Ix2};

/// Mapping from parameter name to value.
///
/// Backed by a `BTreeMap` so iteration order (and therefore restore order)
/// is deterministic.
#[derive(Debug, Default)]
pub struct ParameterSet {
    params: BTreeMap<String, ArrayD<f32>>,
}

impl ParameterSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.params.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Declare a parameter with the given shape, zero-filled until restored.
    pub fn declare(&mut self, name: impl Into<String>, shape: &[usize]) -> Result<(), ParamError> {
        let name = name.into();
        if self.params.contains_key(&name) {
            return Err(ParamError::Duplicate(name));
        }
        self.params.insert(name, ArrayD::zeros(shape.to_vec()));
        Ok(())
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ArrayD<f32>> {
        self.params.get(name)
    }

    pub fn require(&self, name: &str) -> Result<&ArrayD<f32>, ParamError> {
        self.params
            .get(name)
            .ok_or_else(|| ParamError::Missing(name.to_string()))
    }

    /// Two-dimensional view of a declared parameter (weight matrices).
    pub fn require_2d(&self, name: &str) -> Result<ArrayView2<'_, f32>, ParamError> {
        let value = self.require(name)?;
        value
            .view()
            .into_dimensionality::<Ix2>()
            .map_err(|_| ParamError::WrongRank {
                name: name.to_string(),
                expected: 2,
                found: value.ndim(),
            })
    }

    /// One-dimensional view of a declared parameter (biases, moving stats).
    pub fn require_1d(&self, name: &str) -> Result<ArrayView1<'_, f32>, ParamError> {
        let value = self.require(name)?;
        value
            .view()
            .into_dimensionality::<Ix1>()
            .map_err(|_| ParamError::WrongRank {
                name: name.to_string(),
                expected: 1,
                found: value.ndim(),
            })
    }

    #[must_use]
    pub fn shape_of(&self, name: &str) -> Option<&[usize]> {
        self.params.get(name).map(ndarray::ArrayBase::shape)
    }

    /// Overwrite the value of a declared parameter, keeping its shape.
    pub fn assign(&mut self, name: &str, value: ArrayD<f32>) -> Result<(), ParamError> {
        let Some(current) = self.params.get_mut(name) else {
            return Err(ParamError::Missing(name.to_string()));
        };
        if current.shape() != value.shape() {
            return Err(ParamError::ShapeMismatch {
                name: name.to_string(),
                expected: current.shape().to_vec(),
                found: value.shape().to_vec(),
            });
        }
        *current = value;
        Ok(())
    }

    /// Declared names in deterministic (sorted) order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.params.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ArrayD<f32>)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Errors from parameter declaration and assignment.
#[derive(Debug, thiserror::Error)]
pub enum ParamError {
    #[error("parameter {0} declared twice")]
    Duplicate(String),
    #[error("parameter {0} is not declared")]
    Missing(String),
    #[error("parameter {name}: expected shape {expected:?}, got {found:?}")]
    ShapeMismatch {
        name: String,
        expected: Vec<usize>,
        found: Vec<usize>,
    },
    #[error("parameter {name}: expected rank {expected}, got {found}")]
    WrongRank {
        name: String,
        expected: usize,
        found: usize,
    },
}
