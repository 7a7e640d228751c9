//! Ordered, named tensor lists

use std::fmt;

use crate::error::{Error, Result};
use crate::tensor::Tensor;

/// Ordered sequence of named tensors
///
/// Insertion order is binding order when the list is handed to a graph, and
/// the graph's declared output order when a list comes back from one. Names
/// are not required to be unique, lookups return the first match.
#[derive(Clone, Default)]
pub struct TensorList {
    entries: Vec<(String, Tensor)>,
}

impl TensorList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, name: impl Into<String>, tensor: Tensor) {
        self.entries.push((name.into(), tensor));
    }

    /// Builder-style [`push`](Self::push)
    pub fn with(mut self, name: impl Into<String>, tensor: Tensor) -> Self {
        self.push(name, tensor);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.entries
            .iter()
            .find(|(entry, _)| entry == name)
            .map(|(_, tensor)| tensor)
    }

    /// Like [`get`](Self::get) but fails with [`Error::UnknownTensor`]
    pub fn require(&self, name: &str) -> Result<&Tensor> {
        self.get(name).ok_or_else(|| Error::UnknownTensor(name.to_string()))
    }

    pub fn get_index(&self, index: usize) -> Option<&Tensor> {
        self.entries.get(index).map(|(_, tensor)| tensor)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Tensor)> {
        self.entries.iter().map(|(name, tensor)| (name.as_str(), tensor))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Wait on every tensor's signal
    ///
    /// Every tensor is awaited even after one reports a failure, so no
    /// producer is still running when this returns. The first failure is
    /// returned.
    pub fn await_all(&self) -> Result<()> {
        let mut first = None;
        for (_, tensor) in &self.entries {
            if let Err(e) = tensor.await_readable() {
                first.get_or_insert(e);
            }
        }
        first.map_or(Ok(()), Err)
    }
}

impl fmt::Debug for TensorList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.entries.iter().map(|(n, t)| (n, t))).finish()
    }
}

impl<S: Into<String>> FromIterator<(S, Tensor)> for TensorList {
    fn from_iter<I: IntoIterator<Item = (S, Tensor)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().map(|(name, tensor)| (name.into(), tensor)).collect(),
        }
    }
}

impl IntoIterator for TensorList {
    type Item = (String, Tensor);
    type IntoIter = std::vec::IntoIter<(String, Tensor)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}
