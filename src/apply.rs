//! # Apply Engine
//!
//! Runs arbitrary numeric operations against stored datasets and records
//! provenance for every output. Inputs are either container paths, resolved to
//! their datasets before the operation runs, or literal strings passed through
//! unchanged. Outputs land in a fresh numbered folder under `process/`, each
//! with a provenance record in its file footer.

use std::collections::BTreeMap;

use crate::container::{Container, ContainerError};
use crate::dataset::{ArrayData, Dataset, DatasetAttributes, DatasetError};
use crate::provenance::{ArgumentRef, ProvenanceRecord};
use crate::reference::DataPath;
use crate::schema::PROCESS_DIR;

/// Errors raised by `apply` and `multiple_apply`
#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    /// Container access error (resolution, writing, collisions)
    #[error(transparent)]
    ContainerError(#[from] ContainerError),

    /// Array construction error inside an operation
    #[error(transparent)]
    DatasetError(#[from] DatasetError),

    /// The operation returned a different number of arrays than output names
    #[error("operation returned {returned} arrays for {expected} output names")]
    OutputArityMismatch {
        /// Output names given
        expected: usize,
        /// Arrays returned
        returned: usize,
    },

    /// `multiple_apply` inputs and output names differ in length
    #[error("{inputs} inputs for {outputs} output names")]
    InputArityMismatch {
        /// Inputs given
        inputs: usize,
        /// Output names given
        outputs: usize,
    },

    /// The operation itself failed
    #[error("operation failed: {0}")]
    OperationFailed(String),
}

impl ApplyError {
    /// Failure reported from inside an operation
    pub fn operation(message: impl Into<String>) -> Self {
        Self::OperationFailed(message.into())
    }
}

/// One argument to an apply call
#[derive(Debug, Clone)]
pub enum ApplyInput {
    /// Container path, resolved to its dataset before the operation runs
    Path(DataPath),
    /// Literal string, passed through unchanged
    Literal(String),
}

impl From<DataPath> for ApplyInput {
    fn from(path: DataPath) -> Self {
        ApplyInput::Path(path)
    }
}

impl From<&str> for ApplyInput {
    fn from(literal: &str) -> Self {
        ApplyInput::Literal(literal.to_string())
    }
}

/// An argument as the operation sees it
#[derive(Debug, Clone)]
pub enum ResolvedInput {
    /// Resolved dataset for a path argument
    Array(Dataset),
    /// Literal string argument
    Literal(String),
}

impl ResolvedInput {
    /// The dataset, or an operation error naming the argument position
    pub fn array(&self, position: usize) -> Result<&Dataset, ApplyError> {
        match self {
            ResolvedInput::Array(dataset) => Ok(dataset),
            ResolvedInput::Literal(_) => Err(ApplyError::operation(format!(
                "argument {position} is a literal, expected an array"
            ))),
        }
    }
}

/// Keyword parameters passed to an operation and recorded in provenance
pub type ApplyParams = BTreeMap<String, serde_json::Value>;

fn argument_ref(input: &ApplyInput) -> ArgumentRef {
    match input {
        ApplyInput::Path(path) => ArgumentRef::Path(path.clone()),
        ApplyInput::Literal(literal) => ArgumentRef::Literal(literal.clone()),
    }
}

impl Container {
    fn resolve(&mut self, input: &ApplyInput) -> Result<ResolvedInput, ApplyError> {
        Ok(match input {
            ApplyInput::Path(path) => ResolvedInput::Array(self.read(path)?),
            ApplyInput::Literal(literal) => ResolvedInput::Literal(literal.clone()),
        })
    }

    /// Run an operation once over all inputs and store its outputs
    ///
    /// Path inputs are resolved before the call; literals pass through. The
    /// outputs are written to `process/NNN-<operation>/<output_name>`, one
    /// provenance record each. When `output_names` is empty the operation name
    /// doubles as the single output name.
    pub fn apply<F>(
        &mut self,
        operation: &str,
        function: F,
        inputs: &[ApplyInput],
        output_names: &[&str],
        params: &ApplyParams,
    ) -> Result<Vec<DataPath>, ApplyError>
    where
        F: Fn(&[ResolvedInput], &ApplyParams) -> Result<Vec<ArrayData>, ApplyError>,
    {
        let resolved: Vec<ResolvedInput> = inputs
            .iter()
            .map(|input| self.resolve(input))
            .collect::<Result<_, _>>()?;

        let outputs = function(&resolved, params)?;

        let names: Vec<&str> = if output_names.is_empty() {
            vec![operation]
        } else {
            output_names.to_vec()
        };
        if outputs.len() != names.len() {
            return Err(ApplyError::OutputArityMismatch {
                expected: names.len(),
                returned: outputs.len(),
            });
        }

        let number = self.next_process_number()?;
        let folder = DataPath::new(format!("{PROCESS_DIR}/{number}-{operation}"));
        let timestamp = chrono::Utc::now().to_rfc3339();
        let argument_refs: Vec<ArgumentRef> = inputs.iter().map(argument_ref).collect();

        log::info!(
            "apply {operation} ({} inputs) -> {folder}",
            inputs.len()
        );

        let mut paths = Vec::with_capacity(outputs.len());
        for (name, array) in names.iter().zip(outputs) {
            let path = folder.join(name);
            let record = ProvenanceRecord {
                operation: operation.to_string(),
                operation_number: number.clone(),
                output_name: name.to_string(),
                timestamp: timestamp.clone(),
                inputs: argument_refs.clone(),
                parameters: params.clone(),
            };
            let attributes = derived_attributes(name, &array, &resolved);
            let dataset = Dataset::new(array, attributes);
            self.write_output(&path, &dataset, &record, false)?;
            paths.push(path);
        }
        Ok(paths)
    }

    /// Run an operation once per input, fan-out, sharing one process folder
    ///
    /// `inputs` and `output_names` must be equal-length lists; element `i` of
    /// each pairs up. Every invocation sees exactly one input and must return
    /// exactly one array.
    pub fn multiple_apply<F>(
        &mut self,
        operation: &str,
        function: F,
        inputs: &[ApplyInput],
        output_names: &[&str],
        params: &ApplyParams,
    ) -> Result<Vec<DataPath>, ApplyError>
    where
        F: Fn(&[ResolvedInput], &ApplyParams) -> Result<Vec<ArrayData>, ApplyError>,
    {
        if inputs.len() != output_names.len() {
            return Err(ApplyError::InputArityMismatch {
                inputs: inputs.len(),
                outputs: output_names.len(),
            });
        }

        let number = self.next_process_number()?;
        let folder = DataPath::new(format!("{PROCESS_DIR}/{number}-{operation}"));
        let timestamp = chrono::Utc::now().to_rfc3339();

        log::info!(
            "multiple_apply {operation} over {} inputs -> {folder}",
            inputs.len()
        );

        let mut paths = Vec::with_capacity(inputs.len());
        for (input, name) in inputs.iter().zip(output_names) {
            let resolved = vec![self.resolve(input)?];
            let mut outputs = function(&resolved, params)?;
            if outputs.len() != 1 {
                return Err(ApplyError::OutputArityMismatch {
                    expected: 1,
                    returned: outputs.len(),
                });
            }
            let array = outputs.remove(0);

            let path = folder.join(name);
            let record = ProvenanceRecord {
                operation: operation.to_string(),
                operation_number: number.clone(),
                output_name: name.to_string(),
                timestamp: timestamp.clone(),
                inputs: vec![argument_ref(input)],
                parameters: params.clone(),
            };
            let attributes = derived_attributes(name, &array, &resolved);
            let dataset = Dataset::new(array, attributes);
            self.write_output(&path, &dataset, &record, false)?;
            paths.push(path);
        }
        Ok(paths)
    }
}

/// Attributes for a derived dataset
///
/// Physical scale carries over from the first array input when the output
/// keeps its shape; otherwise only name and shape are set.
fn derived_attributes(
    name: &str,
    array: &ArrayData,
    resolved: &[ResolvedInput],
) -> DatasetAttributes {
    let source = resolved.iter().find_map(|input| match input {
        ResolvedInput::Array(dataset) => Some(dataset),
        ResolvedInput::Literal(_) => None,
    });
    match source {
        Some(dataset) if dataset.array.shape() == array.shape() => {
            let mut attributes = dataset.attributes.clone();
            attributes.name = name.to_string();
            attributes.shape = array.shape().to_vec();
            attributes
        }
        _ => DatasetAttributes::new(name, array.shape()),
    }
}
