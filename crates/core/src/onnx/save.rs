use std::{fs, io, path::Path};

use prost::{EncodeError, Message};
use thiserror::Error;

use crate::{
    dim::{Dimension as Dim, Dimensions},
    graph::Graph,
    model::Model,
    value::{ConstantData, Value, ValueId},
};

use super::proto::{
    tensor_proto::DataType,
    tensor_shape_proto::{dimension::Value as DimValue, Dimension},
    type_proto::{self, Value::TensorType},
    GraphProto, ModelProto, NodeProto, TensorShapeProto, TypeProto, ValueInfoProto,
};

#[derive(Error, Debug)]
pub enum ModelSaveError {
    #[error("{0}")]
    Io(#[from] io::Error),

    #[error("Failed to encode model: {0}")]
    Encode(#[from] EncodeError),

    #[error("Model has neither an IR version nor a default opset import")]
    NoIrVersion,

    #[error("Unknown opset version: {0}")]
    UnknownOpsetVersion(i64),
}

pub fn save_onnx(model: &Model, path: impl AsRef<Path>) -> Result<(), ModelSaveError> {
    let buf = save_onnx_to_buffer(model)?;
    fs::write(path, buf)?;
    Ok(())
}

pub fn save_onnx_to_buffer(model: &Model) -> Result<Vec<u8>, ModelSaveError> {
    let model_proto = encode_model(model)?;
    let mut buf = Vec::with_capacity(model_proto.encoded_len());
    model_proto.encode(&mut buf)?;
    Ok(buf)
}

pub fn encode_model(model: &Model) -> Result<ModelProto, ModelSaveError> {
    fn opset_to_ir_version(opset: i64) -> Result<i64, ModelSaveError> {
        match opset {
            1..=8 => Ok(3),
            9 => Ok(4),
            10 => Ok(5),
            11 => Ok(6),
            12..=14 => Ok(7),
            15..=18 => Ok(8),
            19..=20 => Ok(9),
            21..=22 => Ok(10),
            23 => Ok(11),
            _ => Err(ModelSaveError::UnknownOpsetVersion(opset)),
        }
    }

    let ir_version = match (model.ir_version, model.opset_version()) {
        (Some(ir), _) => ir,
        (None, Some(opset)) => opset_to_ir_version(opset)?,
        (None, None) => return Err(ModelSaveError::NoIrVersion),
    };

    Ok(ModelProto {
        ir_version: Some(ir_version),
        opset_import: model.opset_import.clone(),
        producer_name: model.producer_name.clone(),
        producer_version: model.producer_version.clone(),
        domain: model.domain.clone(),
        model_version: model.model_version,
        doc_string: model.doc_string.clone(),
        graph: Some(encode_graph(&model.graph)),
        metadata_props: model.metadata_props.clone(),
    })
}

fn encode_graph(graph: &Graph) -> GraphProto {
    let mut graph_proto = GraphProto {
        name: graph.name.clone(),
        doc_string: graph.doc_string.clone(),
        ..Default::default()
    };

    // Encode graph inputs and outputs.
    for (vals, proto) in [
        (&graph.inputs, &mut graph_proto.input),
        (&graph.outputs, &mut graph_proto.output),
    ] {
        for &id in vals {
            proto.push(encode_value_info(graph, id));
        }
    }

    // Encode nodes.
    for &node_id in &graph.order {
        let node = &graph.nodes[node_id];
        graph_proto.node.push(NodeProto {
            input: node
                .inputs
                .iter()
                .map(|&id| graph.values[id].name().to_owned())
                .collect(),
            output: node
                .outputs
                .iter()
                .map(|&id| graph.values[id].name().to_owned())
                .collect(),
            name: (!node.name.is_empty()).then(|| node.name.clone()),
            op_type: Some(node.op_type.clone()),
            domain: node.domain.clone(),
            attribute: node.attributes.clone(),
            doc_string: node.doc_string.clone(),
        });
    }

    // Encode initializers and intermediate type information for live values only.
    let live = graph.live_values();
    for (id, value) in graph.values.inner().iter() {
        if !live.contains(&id) {
            continue;
        }
        match value {
            Value::Constant(c) => match &c.data {
                ConstantData::Dense(t) => graph_proto.initializer.push(t.clone()),
                ConstantData::Sparse(t) => graph_proto.sparse_initializer.push(t.clone()),
            },
            Value::Variable(v)
                if !v.name.is_empty()
                    && (v.elem_ty.is_some() || v.dims.is_some())
                    && !graph.is_graph_input(id)
                    && !graph.is_graph_output(id) =>
            {
                graph_proto.value_info.push(encode_value_info(graph, id));
            }
            Value::Variable(_) => {}
        }
    }

    graph_proto.quantization_annotation = graph
        .quantization_annotation
        .iter()
        .filter(|a| {
            live.iter()
                .any(|&id| graph.values[id].name() == a.tensor_name())
        })
        .cloned()
        .collect();

    graph_proto
}

fn encode_value_info(graph: &Graph, id: ValueId) -> ValueInfoProto {
    let (name, elem_ty, dims) = match &graph.values[id] {
        Value::Variable(v) => (v.name.clone(), v.elem_ty, v.dims.clone()),
        Value::Constant(c) => match &c.data {
            ConstantData::Dense(t) => (
                c.name.clone(),
                DataType::from_i32(t.data_type()),
                Some(Dimensions::from_i64(&t.dims)),
            ),
            ConstantData::Sparse(t) => (c.name.clone(), None, Some(Dimensions::from_i64(&t.dims))),
        },
    };

    let r#type = (elem_ty.is_some() || dims.is_some()).then(|| TypeProto {
        denotation: None,
        value: Some(TensorType(type_proto::Tensor {
            elem_type: elem_ty.map(|t| t as i32),
            shape: dims.map(|dims| TensorShapeProto {
                dim: dims
                    .iter()
                    .map(|d| Dimension {
                        denotation: None,
                        value: match d {
                            Dim::Fixed(d) => Some(DimValue::DimValue(*d as i64)),
                            Dim::Dynamic(d) => Some(DimValue::DimParam(d.clone())),
                            Dim::Unknown => None,
                        },
                    })
                    .collect(),
            }),
        })),
    });

    ValueInfoProto {
        name: Some(name),
        r#type,
        doc_string: None,
    }
}
