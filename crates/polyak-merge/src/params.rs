//! Named parameter containers.
//!
//! A checkpoint is viewed as a set of parameters, each holding an ordered
//! list of blobs (typically `[weight, bias]`). Blobs keep the tensor name
//! they were stored under so an averaged set can be written back with the
//! same layout.

use std::collections::BTreeMap;

use crate::{ParamArray, Tensor};

/// One array of a parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Blob<A = Tensor> {
    /// Tensor name in the checkpoint file.
    pub name: String,
    /// Array values.
    pub data: A,
}

impl<A> Blob<A> {
    /// Create a blob.
    pub fn new(name: impl Into<String>, data: A) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }
}

/// Parameters of one checkpoint, keyed by parameter name.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSet<A = Tensor> {
    params: BTreeMap<String, Vec<Blob<A>>>,
}

/// A parameter set whose arrays hold elementwise means.
pub type AveragedParameterSet<A = Tensor> = ParameterSet<A>;

impl<A> Default for ParameterSet<A> {
    fn default() -> Self {
        Self {
            params: BTreeMap::new(),
        }
    }
}

impl<A: ParamArray> ParameterSet<A> {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a parameter, replacing any previous blobs under that name.
    pub fn insert(&mut self, name: impl Into<String>, blobs: Vec<Blob<A>>) {
        self.params.insert(name.into(), blobs);
    }

    /// Insert a parameter whose blobs are named `{name}.{index}`.
    pub fn insert_arrays(&mut self, name: impl Into<String>, arrays: Vec<A>) {
        let name = name.into();
        let blobs = arrays
            .into_iter()
            .enumerate()
            .map(|(idx, data)| Blob::new(format!("{name}.{idx}"), data))
            .collect();
        self.params.insert(name, blobs);
    }

    /// Blobs of a parameter.
    pub fn get(&self, name: &str) -> Option<&[Blob<A>]> {
        self.params.get(name).map(Vec::as_slice)
    }

    pub(crate) fn get_mut(&mut self, name: &str) -> Option<&mut Vec<Blob<A>>> {
        self.params.get_mut(name)
    }

    /// Whether a parameter is present.
    pub fn contains(&self, name: &str) -> bool {
        self.params.contains_key(name)
    }

    /// Parameter names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.params.keys().map(String::as_str)
    }

    /// Iterate over parameters in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Blob<A>])> {
        self.params
            .iter()
            .map(|(name, blobs)| (name.as_str(), blobs.as_slice()))
    }

    /// Number of parameters.
    pub fn len(&self) -> usize {
        self.params.len()
    }

    /// Whether the set holds no parameters.
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Total number of blobs across all parameters.
    pub fn num_blobs(&self) -> usize {
        self.params.values().map(Vec::len).sum()
    }
}
