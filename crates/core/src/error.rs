use std::path::PathBuf;

use thiserror::Error;

use crate::onnx::{load::ModelLoadError, save::ModelSaveError};

/// Problems with what the caller handed in, detected before any graph work.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("One of input_onnx_file_path or onnx_graph must be specified")]
    NoInput,

    #[error("Only one of input_onnx_file_path or onnx_graph may be specified")]
    ConflictingInputs,

    #[error("The specified file (.onnx) does not exist. File: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("The specified file is not an onnx file. File: {}", .0.display())]
    NotOnnxFile(PathBuf),
}

/// The requested deletion cannot be applied to the graph's topology.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TopologyError {
    #[error("The number of nodes in the graph must be at least 2 (found {count})")]
    TooFewNodes { count: usize },

    #[error("At least one node is required for the graph after OP deletion")]
    NoNodesRemain,

    #[error("The number of output_nodes in the graph must be at least 1 after OP deletion")]
    NoOutputsRemain,

    #[error(
        "It is not possible to delete an OP to which two or more Input OPs of a graph are \
         connected. node_name: {node}"
    )]
    MultipleGraphInputs { node: String },

    #[error(
        "The OP following '{node}' could not be determined ({count} candidates). \
         OPs connected to the input and output of a graph simultaneously cannot be deleted"
    )]
    AmbiguousSuccessor { node: String, count: usize },

    #[error("The OP preceding '{node}' could not be determined ({count} candidates)")]
    AmbiguousPredecessor { node: String, count: usize },

    #[error("'{node}' has no producing OP to reconnect its successor to")]
    NoPredecessor { node: String },

    #[error(
        "If the number of inputs (Variable) of the OP to be deleted and the number of inputs \
         (Variable) of the next OP after the deleted OP are different, the OP cannot be deleted \
         because it cannot be connected. node_name: {node}, Remove OP inputs: {removed}, \
         Next OP inputs: {next}"
    )]
    SourceArityMismatch {
        node: String,
        removed: usize,
        next: usize,
    },

    #[error(
        "If the number of outputs of the OP immediately before the OP to be deleted is different \
         from the number of inputs of the OP immediately after the OP to be deleted, the OP cannot \
         be automatically reconnected. node_name: {node}, Previous OP outputs: {pred_outputs}, \
         Next OP inputs: {succ_inputs}"
    )]
    SpliceArityMismatch {
        node: String,
        pred_outputs: usize,
        succ_inputs: usize,
    },

    #[error("Reconnecting around '{node}' would give '{tensor}' a second producer")]
    ConflictingProducer { node: String, tensor: String },

    #[error(
        "'{node}' is both the beginning and the end of the graph and cannot be deleted \
         automatically"
    )]
    BoundaryNode { node: String },

    #[error("The graph contains a cycle ({remaining} nodes could not be ordered)")]
    Cycle { remaining: usize },
}

#[derive(Error, Debug)]
pub enum RemoveError {
    #[error("{0}")]
    Validation(#[from] ValidationError),

    #[error("{0}")]
    Topology(#[from] TopologyError),

    #[error("Failed to load model: {0}")]
    Load(#[from] ModelLoadError),

    #[error("Failed to save model: {0}")]
    Save(#[from] ModelSaveError),
}

#[test]
fn arity_message_reports_both_counts() {
    let err = TopologyError::SourceArityMismatch {
        node: "transpose_0".into(),
        removed: 1,
        next: 0,
    };
    let msg = err.to_string();
    assert!(msg.contains("Remove OP inputs: 1"));
    assert!(msg.contains("Next OP inputs: 0"));
}

#[test]
fn remove_error_is_transparent() {
    let err = RemoveError::from(ValidationError::NoInput);
    assert_eq!(err.to_string(), ValidationError::NoInput.to_string());
}
