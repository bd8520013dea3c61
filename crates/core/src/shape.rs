
use thiserror::Error;

use crate::{
    diagnostic::Diagnostics,
    dim::{Dimension, Dimensions},
    graph::Graph,
    onnx::proto::tensor_proto::DataType,
    value::{ConstantData, Value, ValueId},
};

/// Op kinds whose first output has the same shape as their first input.
pub const SHAPE_PRESERVING_OPS: &[&str] = &[
    "Abs",
    "Cast",
    "Ceil",
    "Clip",
    "Dropout",
    "Elu",
    "Erf",
    "Exp",
    "Floor",
    "Gelu",
    "HardSigmoid",
    "HardSwish",
    "Identity",
    "LeakyRelu",
    "Log",
    "LogSoftmax",
    "Neg",
    "Not",
    "Reciprocal",
    "Relu",
    "Round",
    "Selu",
    "Sigmoid",
    "Sign",
    "Softmax",
    "Softplus",
    "Sqrt",
    "Tanh",
];

#[derive(Debug, Clone, Error)]
pub enum ShapeError {
    #[error(
        "The input shape of '{node}' ({expected:?}) does not match the shape of its output \
         '{tensor}' ({found:?})"
    )]
    Mismatch {
        node: String,
        tensor: String,
        expected: Dimensions,
        found: Dimensions,
    },
}

/// Fills in shape annotations of a graph in place.
pub trait ShapeInference {
    fn infer_shapes(&self, graph: &mut Graph) -> Result<(), ShapeError>;
}

/// Forwards the first input's type and shape to the first output of shape-preserving
/// nodes, in graph order.
#[derive(Debug, Clone)]
pub struct ForwardShapeInference {
    ops: Vec<String>,
}

impl Default for ForwardShapeInference {
    fn default() -> Self {
        Self::new(SHAPE_PRESERVING_OPS.iter().copied())
    }
}

impl ForwardShapeInference {
    pub fn new<S: Into<String>>(ops: impl IntoIterator<Item = S>) -> Self {
        Self {
            ops: ops.into_iter().map(Into::into).collect(),
        }
    }
}

impl ShapeInference for ForwardShapeInference {
    fn infer_shapes(&self, graph: &mut Graph) -> Result<(), ShapeError> {
        for &node_id in &graph.order {
            let node = &graph.nodes[node_id];
            if !self.ops.iter().any(|op| *op == node.op_type) {
                continue;
            }
            let (Some(&input), Some(&output)) = (node.inputs.first(), node.outputs.first())
            else {
                continue;
            };
            let (in_elem_ty, in_dims) = typed_shape_of(&graph.values[input]);
            let elem_ty = if node.op_type == "Cast" {
                node.attribute("to")
                    .and_then(|a| a.i)
                    .and_then(|to| DataType::from_i32(to as i32))
            } else {
                in_elem_ty
            };
            let node_name = node.name.clone();

            let Some(out) = graph.values.variable_mut(output) else {
                continue;
            };
            if out.elem_ty.is_none() {
                out.elem_ty = elem_ty;
            }
            let Some(in_dims) = in_dims else {
                continue;
            };
            out.dims = Some(match out.dims.take() {
                None => in_dims,
                Some(found) if !found.is_compatible_with(&in_dims) => {
                    return Err(ShapeError::Mismatch {
                        node: node_name,
                        tensor: out.name.clone(),
                        expected: in_dims,
                        found,
                    })
                }
                Some(found) => merge_dims(&found, &in_dims),
            });
        }
        Ok(())
    }
}

fn typed_shape_of(value: &Value) -> (Option<DataType>, Option<Dimensions>) {
    match value {
        Value::Variable(v) => (v.elem_ty, v.dims.clone()),
        Value::Constant(c) => match &c.data {
            ConstantData::Dense(t) => (
                DataType::from_i32(t.data_type()),
                Some(Dimensions::from_i64(&t.dims)),
            ),
            ConstantData::Sparse(t) => (
                t.values
                    .as_ref()
                    .and_then(|v| DataType::from_i32(v.data_type())),
                Some(Dimensions::from_i64(&t.dims)),
            ),
        },
    }
}

/// Keeps the declared dimension unless the inferred one is more specific.
fn merge_dims(declared: &Dimensions, inferred: &Dimensions) -> Dimensions {
    declared
        .iter()
        .zip(inferred.iter())
        .map(|(d, i)| match (d, i) {
            (Dimension::Unknown, i) => i.clone(),
            (Dimension::Dynamic(_), Dimension::Fixed(i)) => Dimension::Fixed(*i),
            (d, _) => d.clone(),
        })
        .collect::<Vec<_>>()
        .into()
}

/// Runs `inference` on a copy of `graph` and adopts the result. On failure the graph
/// keeps its current annotations and a warning is recorded. Returns whether the
/// inferred shapes were adopted.
pub fn reconcile_shapes(
    graph: &mut Graph,
    inference: &dyn ShapeInference,
    diagnostics: &mut Diagnostics,
) -> bool {
    let mut inferred = graph.clone();
    match inference.infer_shapes(&mut inferred) {
        Ok(()) => {
            *graph = inferred;
            true
        }
        Err(e) => {
            diagnostics.warn(format!(
                "Shape inference failed: {e}. The input shape of the next OP does not match the \
                 output shape. Be sure to open the .onnx file to verify the certainty of the \
                 geometry."
            ));
            false
        }
    }
}

/// Looks up the declared dimensions of a value, if it is a variable.
pub fn dims_of(graph: &Graph, id: ValueId) -> Option<&Dimensions> {
    graph.values.variable(id).and_then(|v| v.dims.as_ref())
}
