//! Model definitions that backends compile into cached ops
//!
//! A [`Model`] is the already-loaded description of a computation graph: its
//! ordered input and output signatures plus the graph body. Reading model
//! files is not this crate's concern; loaders build a `Model` and hand it to a
//! backend through [`Backend::create_cached_op`](crate::Backend::create_cached_op).

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use crate::backend::{DType, TensorSpec};
use crate::error::{BackendError, Result};
use crate::host::HostTensor;

/// Graph body: maps the bound inputs (declaration order) to the outputs (declaration order)
pub type GraphFn = Arc<dyn Fn(&[HostTensor]) -> Result<Vec<HostTensor>> + Send + Sync>;

/// A loaded computation graph with its signature
#[derive(Clone)]
pub struct Model {
    name: String,
    inputs: Vec<TensorSpec>,
    outputs: Vec<TensorSpec>,
    graph: GraphFn,
}

impl Model {
    /// Start describing a model
    pub fn builder(name: impl Into<String>) -> ModelBuilder {
        ModelBuilder {
            name: name.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            graph: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared inputs, in binding order
    pub fn inputs(&self) -> &[TensorSpec] {
        &self.inputs
    }

    /// Declared outputs, in production order
    pub fn outputs(&self) -> &[TensorSpec] {
        &self.outputs
    }

    pub fn input(&self, name: &str) -> Option<&TensorSpec> {
        self.inputs.iter().find(|spec| spec.name == name)
    }

    pub fn graph(&self) -> &GraphFn {
        &self.graph
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("name", &self.name)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Model`]
pub struct ModelBuilder {
    name: String,
    inputs: Vec<TensorSpec>,
    outputs: Vec<TensorSpec>,
    graph: Option<GraphFn>,
}

impl ModelBuilder {
    pub fn input(mut self, name: impl Into<String>, dtype: DType, shape: impl Into<Vec<usize>>) -> Self {
        self.inputs.push(TensorSpec::new(name, dtype, shape));
        self
    }

    pub fn output(mut self, name: impl Into<String>, dtype: DType, shape: impl Into<Vec<usize>>) -> Self {
        self.outputs.push(TensorSpec::new(name, dtype, shape));
        self
    }

    pub fn graph<F>(mut self, graph: F) -> Self
    where
        F: Fn(&[HostTensor]) -> Result<Vec<HostTensor>> + Send + Sync + 'static,
    {
        self.graph = Some(Arc::new(graph));
        self
    }

    /// Validate the signature and produce the model
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::InvalidModel`] if the graph body is missing, no
    /// outputs are declared, a name repeats within inputs or outputs, or a
    /// declared shape overflows.
    pub fn build(self) -> Result<Model> {
        let graph = self
            .graph
            .ok_or_else(|| BackendError::invalid_model(&self.name, "no graph body"))?;
        if self.outputs.is_empty() {
            return Err(BackendError::invalid_model(&self.name, "no outputs declared"));
        }
        ensure_unique(&self.name, "input", &self.inputs)?;
        ensure_unique(&self.name, "output", &self.outputs)?;
        for spec in self.inputs.iter().chain(&self.outputs) {
            if spec.byte_len().is_err() {
                return Err(BackendError::invalid_model(
                    &self.name,
                    format!("shape {:?} of '{}' overflows", spec.shape, spec.name),
                ));
            }
        }

        Ok(Model {
            name: self.name,
            inputs: self.inputs,
            outputs: self.outputs,
            graph,
        })
    }
}

fn ensure_unique(model: &str, what: &str, specs: &[TensorSpec]) -> Result<()> {
    let mut seen = HashSet::with_capacity(specs.len());
    for spec in specs {
        if !seen.insert(spec.name.as_str()) {
            return Err(BackendError::invalid_model(
                model,
                format!("duplicate {what} name '{}'", spec.name),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(inputs: &[HostTensor]) -> Result<Vec<HostTensor>> {
        Ok(inputs.to_vec())
    }

    #[test]
    fn test_build_valid_model() {
        let model = Model::builder("echo")
            .input("x", DType::F32, vec![4])
            .output("y", DType::F32, vec![4])
            .graph(identity)
            .build()
            .unwrap();
        assert_eq!(model.name(), "echo");
        assert_eq!(model.inputs().len(), 1);
        assert!(model.input("x").is_some());
        assert!(model.input("y").is_none());
    }

    #[test]
    fn test_missing_graph_rejected() {
        let result = Model::builder("empty").output("y", DType::F32, vec![1]).build();
        assert!(matches!(result, Err(BackendError::InvalidModel { .. })));
    }

    #[test]
    fn test_no_outputs_rejected() {
        let result = Model::builder("sink")
            .input("x", DType::F32, vec![1])
            .graph(identity)
            .build();
        assert!(matches!(result, Err(BackendError::InvalidModel { .. })));
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let result = Model::builder("dup")
            .input("x", DType::F32, vec![1])
            .input("x", DType::F32, vec![1])
            .output("y", DType::F32, vec![1])
            .graph(identity)
            .build();
        match result {
            Err(BackendError::InvalidModel { reason, .. }) => assert!(reason.contains("duplicate input")),
            other => panic!("expected InvalidModel, got {other:?}"),
        }
    }

    #[test]
    fn test_overflowing_shape_rejected() {
        let result = Model::builder("huge")
            .input("x", DType::F32, vec![1])
            .output("y", DType::F32, vec![usize::MAX, 2])
            .graph(identity)
            .build();
        match result {
            Err(BackendError::InvalidModel { reason, .. }) => assert!(reason.contains("'y' overflows")),
            other => panic!("expected InvalidModel, got {other:?}"),
        }
    }
}
