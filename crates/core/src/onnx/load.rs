use prost::{DecodeError, Message};
use rustc_hash::FxHashMap;
use std::{fs, io, path::Path};
use thiserror::Error;

use crate::{
    dim::{Dimension, Dimensions},
    graph::Graph,
    model::Model,
    node::Node,
    value::{ConstantData, ValueArena, ValueId},
};

use super::proto::{
    tensor_proto::DataType,
    tensor_shape_proto::dimension::Value::{DimParam, DimValue},
    type_proto::Value::{SparseTensorType, TensorType},
    ModelProto, TensorShapeProto, ValueInfoProto,
};

#[derive(Error, Debug)]
pub enum ModelLoadError {
    #[error("{0}")]
    Io(#[from] io::Error),

    #[error("Model does not contain any graph")]
    NoGraph,

    #[error("Model is invalid: {0}")]
    InvalidModel(#[from] DecodeError),

    #[error("Value '{0}' is both an initializer and produced by a node")]
    ProducedInitializer(String),
}

pub fn load_onnx(path: impl AsRef<Path>) -> Result<Model, ModelLoadError> {
    let model_proto = load_onnx_model_proto(path)?;
    load_onnx_from_model_proto(model_proto)
}

pub fn load_onnx_from_buffer(buf: &[u8]) -> Result<Model, ModelLoadError> {
    let model = ModelProto::decode(buf)?;
    load_onnx_from_model_proto(model)
}

pub fn load_onnx_from_model_proto(model_proto: ModelProto) -> Result<Model, ModelLoadError> {
    let graph_proto = model_proto.graph.ok_or(ModelLoadError::NoGraph)?;
    let mut model = Model {
        graph: Graph {
            name: graph_proto.name,
            doc_string: graph_proto.doc_string,
            quantization_annotation: graph_proto.quantization_annotation,
            ..Default::default()
        },
        ir_version: model_proto.ir_version,
        opset_import: model_proto.opset_import,
        producer_name: model_proto.producer_name,
        producer_version: model_proto.producer_version,
        domain: model_proto.domain,
        model_version: model_proto.model_version,
        doc_string: model_proto.doc_string,
        metadata_props: model_proto.metadata_props,
    };
    let graph = &mut model.graph;
    let mut name_to_val: FxHashMap<String, ValueId> = FxHashMap::default();

    // Load initializers.
    for init in graph_proto.initializer {
        let name = init.name().to_owned();
        let val = graph.values.new_const(name.clone(), ConstantData::Dense(init));
        name_to_val.insert(name, val);
    }
    for init in graph_proto.sparse_initializer {
        let name = init
            .values
            .as_ref()
            .map_or("", |v| v.name())
            .to_owned();
        let val = graph.values.new_const(name.clone(), ConstantData::Sparse(init));
        name_to_val.insert(name, val);
    }

    // Load inputs. Initializers listed as graph inputs stay constants.
    for x in &graph_proto.input {
        if name_to_val.contains_key(x.name()) {
            continue;
        }
        let input = get_or_create_var(&mut graph.values, &mut name_to_val, x.name());
        annotate(&mut graph.values, input, x);
        graph.inputs.push(input);
    }

    // Load outputs.
    for x in &graph_proto.output {
        let output = get_or_create_var(&mut graph.values, &mut name_to_val, x.name());
        annotate(&mut graph.values, output, x);
        graph.outputs.push(output);
    }

    // Load intermediate type information.
    for x in &graph_proto.value_info {
        let val = get_or_create_var(&mut graph.values, &mut name_to_val, x.name());
        annotate(&mut graph.values, val, x);
    }

    // Load nodes.
    for node in graph_proto.node {
        let inputs = node
            .input
            .iter()
            .map(|input| get_or_create_var(&mut graph.values, &mut name_to_val, input))
            .collect();
        let outputs = node
            .output
            .iter()
            .map(|output| get_or_create_var(&mut graph.values, &mut name_to_val, output))
            .collect::<Vec<_>>();
        if let Some(&constant) = outputs.iter().find(|&&o| !graph.values.is_variable(o)) {
            return Err(ModelLoadError::ProducedInitializer(
                graph.values[constant].name().to_owned(),
            ));
        }

        let mut n = Node::new(node.op_type())
            .with_name(node.name())
            .with_domain(node.domain)
            .with_ins(inputs)
            .with_outs(outputs);
        n.attributes = node.attribute;
        n.doc_string = node.doc_string;
        graph.add_node(n);
    }

    log::debug!(
        "load onnx: {} node(s), {} input(s), {} output(s)",
        graph.num_nodes(),
        graph.inputs.len(),
        graph.outputs.len()
    );

    Ok(model)
}

fn get_or_create_var(
    values: &mut ValueArena,
    name_to_val: &mut FxHashMap<String, ValueId>,
    name: &str,
) -> ValueId {
    // Omitted optional slots never alias each other.
    if name.is_empty() {
        return values.new_var_named("");
    }
    *name_to_val
        .entry(name.to_owned())
        .or_insert_with(|| values.new_var_named(name))
}

fn annotate(values: &mut ValueArena, id: ValueId, info: &ValueInfoProto) {
    let Some(var) = values.variable_mut(id) else {
        return;
    };
    let (elem_type, shape) = match info.r#type.as_ref().and_then(|t| t.value.as_ref()) {
        Some(TensorType(t)) => (t.elem_type, t.shape.as_ref()),
        Some(SparseTensorType(t)) => (t.elem_type, t.shape.as_ref()),
        None => return,
    };
    if let Some(elem_ty) = elem_type.and_then(DataType::from_i32) {
        var.elem_ty = Some(elem_ty);
    }
    if let Some(shape) = shape {
        var.dims = Some(get_dims(shape));
    }
}

fn get_dims(shape: &TensorShapeProto) -> Dimensions {
    shape
        .dim
        .iter()
        .map(|d| match d.value.as_ref() {
            Some(DimValue(i)) if *i >= 0 => Dimension::Fixed(*i as usize),
            Some(DimParam(s)) => Dimension::Dynamic(s.clone()),
            _ => Dimension::Unknown,
        })
        .collect::<Vec<_>>()
        .into()
}

pub fn load_onnx_model_proto(path: impl AsRef<Path>) -> Result<ModelProto, ModelLoadError> {
    let model = ModelProto::decode(&*fs::read(path)?)?;
    Ok(model)
}

#[test]
fn load_rejects_garbage() {
    assert!(matches!(
        load_onnx_from_buffer(&[0xff, 0xff, 0xff]),
        Err(ModelLoadError::InvalidModel(_))
    ));
}

#[test]
fn load_requires_graph() {
    let buf = ModelProto::default().encode_to_vec();
    assert!(matches!(
        load_onnx_from_buffer(&buf),
        Err(ModelLoadError::NoGraph)
    ));
}

#[test]
fn omitted_slots_get_their_own_values() {
    use super::proto::{GraphProto, NodeProto};

    let node = |op: &str, ins: &[&str], outs: &[&str]| NodeProto {
        op_type: Some(op.into()),
        name: Some(format!("{}_0", op.to_lowercase())),
        input: ins.iter().map(|&s| s.into()).collect(),
        output: outs.iter().map(|&s| s.into()).collect(),
        ..Default::default()
    };
    let value = |name: &str| ValueInfoProto {
        name: Some(name.into()),
        ..Default::default()
    };
    let buf = ModelProto {
        graph: Some(GraphProto {
            node: vec![
                node("Clip", &["x", "", ""], &["b"]),
                node("Dropout", &["b"], &["y", ""]),
            ],
            input: vec![value("x")],
            output: vec![value("y")],
            ..Default::default()
        }),
        ..Default::default()
    }
    .encode_to_vec();

    let model = load_onnx_from_buffer(&buf).unwrap();
    let g = &model.graph;
    let clip = &g.nodes[g.find_node("clip_0").unwrap()];
    let dropout = &g.nodes[g.find_node("dropout_0").unwrap()];
    assert_ne!(clip.inputs[1], clip.inputs[2]);
    assert_ne!(clip.inputs[1], dropout.outputs[1]);
    assert!(g.values[dropout.outputs[1]].is_placeholder());
    assert!(g.get_value_parents().get(&clip.inputs[1]).is_none());
}
