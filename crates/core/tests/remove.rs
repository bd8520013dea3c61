use prost::Message;
use snd_core::{
    diagnostic::Diagnostics,
    dim::{Dimension, Dimensions},
    error::{RemoveError, TopologyError, ValidationError},
    graph::Graph,
    model::Model,
    node::Node,
    onnx::{
        load_onnx, load_onnx_from_buffer,
        proto::{
            tensor_proto::DataType, AttributeProto, GraphProto, ModelProto, NodeProto,
            OperatorSetIdProto, TensorProto, ValueInfoProto,
        },
        save::save_onnx,
        save_onnx_to_buffer,
    },
    remove::{remove_nodes, BothRolePolicy, RemoveOptions, RemoveRequest, Role},
    value::ConstantData,
};

fn new_model() -> Model {
    let mut model = Model::default();
    model.opset_import.push(OperatorSetIdProto {
        domain: Some("".into()),
        version: Some(13),
    });
    model
}

fn weight(graph: &mut Graph, name: &str, dims: Vec<i64>) -> snd_core::value::ValueId {
    graph.values.new_const(
        name,
        ConstantData::Dense(TensorProto {
            name: Some(name.into()),
            data_type: Some(DataType::Float as i32),
            raw_data: Some(vec![0; dims.iter().product::<i64>() as usize * 4]),
            dims,
            ..Default::default()
        }),
    )
}

// x -> Conv(w) -> conv_out -> Transpose -> tr_out -> Relu -> y
fn conv_transpose_relu() -> Model {
    let mut model = new_model();
    let g = &mut model.graph;
    let x = g.values.new_var_named_and_shaped("x", DataType::Float, vec![1, 3, 8, 8]);
    let w = weight(g, "w", vec![4, 3, 3, 3]);
    let conv_out = g.values.new_var_named_and_shaped("conv_out", DataType::Float, vec![1, 4, 6, 6]);
    let tr_out = g.values.new_var_named("tr_out");
    let y = g.values.new_var_named("y");
    g.add_node(Node::new("Conv").with_name("conv_0").with_ins(vec![x, w]).with_out(conv_out));
    g.add_node(
        Node::new("Transpose")
            .with_name("transpose_0")
            .with_in(conv_out)
            .with_out(tr_out),
    );
    g.add_node(Node::new("Relu").with_name("relu_0").with_in(tr_out).with_out(y));
    g.inputs.push(x);
    g.outputs.push(y);
    model
}

// x: int64[N, 16] -> Transpose -> t -> Cast(to=float) -> c -> Relu -> y
fn transpose_cast_relu() -> Model {
    let mut model = new_model();
    let g = &mut model.graph;
    let x = g.values.new_var_named_and_shaped(
        "x",
        DataType::Int64,
        vec![Dimension::Dynamic("N".into()), Dimension::Fixed(16)],
    );
    let t = g.values.new_var_named_and_shaped("t", DataType::Int64, vec![16, 1]);
    let c = g.values.new_var_named_and_shaped("c", DataType::Float, vec![16, 1]);
    let y = g.values.new_var_named("y");
    g.add_node(Node::new("Transpose").with_name("transpose_0").with_in(x).with_out(t));
    g.add_node(
        Node::new("Cast")
            .with_name("cast_0")
            .with_in(t)
            .with_out(c)
            .with_attr(AttributeProto {
                name: Some("to".into()),
                i: Some(DataType::Float as i64),
                ..Default::default()
            }),
    );
    g.add_node(Node::new("Relu").with_name("relu_0").with_in(c).with_out(y));
    g.inputs.push(x);
    g.outputs.push(y);
    model
}

fn names(graph: &Graph, ids: &[snd_core::value::ValueId]) -> Vec<String> {
    ids.iter()
        .map(|&id| graph.values[id].name().to_owned())
        .collect()
}

fn node_inputs(graph: &Graph, node: &str) -> Vec<String> {
    names(graph, &graph.nodes[graph.find_node(node).unwrap()].inputs)
}

/// Every consumed variable is produced upstream or is a graph input, and no tensor
/// has two producers.
fn assert_valid_dag(graph: &Graph) {
    let mut produced = vec![];
    for &id in &graph.order {
        let node = &graph.nodes[id];
        for &input in &node.inputs {
            assert!(
                !graph.values.is_variable(input)
                    || graph.values[input].is_placeholder()
                    || graph.is_graph_input(input)
                    || produced.contains(&input),
                "'{}' consumed by '{}' has no upstream producer",
                graph.values[input].name(),
                node.name
            );
        }
        for &output in &node.outputs {
            assert!(!produced.contains(&output));
            produced.push(output);
        }
    }
}

#[test]
fn interior_node_is_spliced_out() {
    let mut model = conv_transpose_relu();
    let report = remove_nodes(&mut model, &["transpose_0"], &RemoveOptions::default()).unwrap();
    let g = &model.graph;

    assert_eq!(report.steps[0].role, Role::Interior);
    assert_eq!(g.node_names(), vec!["conv_0", "relu_0"]);
    let conv = &g.nodes[g.find_node("conv_0").unwrap()];
    assert_eq!(names(g, &conv.outputs), vec!["tr_out"]);
    assert_eq!(node_inputs(g, "relu_0"), vec!["tr_out"]);
    assert_valid_dag(g);
}

#[test]
fn source_node_reconnects_graph_input() {
    let mut model = conv_transpose_relu();
    let report = remove_nodes(&mut model, &["conv_0"], &RemoveOptions::default()).unwrap();
    let g = &model.graph;

    assert_eq!(report.steps[0].role, Role::Source);
    assert_eq!(g.node_names(), vec!["transpose_0", "relu_0"]);
    assert_eq!(node_inputs(g, "transpose_0"), vec!["x"]);
    assert_eq!(names(g, &g.inputs), vec!["x"]);
    // [1, 3, 8, 8] replaces [1, 4, 6, 6].
    assert_eq!(report.diagnostics.warnings().count(), 1);
    assert_valid_dag(g);
}

#[test]
fn sink_node_promotes_its_input() {
    let mut model = conv_transpose_relu();
    let report = remove_nodes(&mut model, &["relu_0"], &RemoveOptions::default()).unwrap();
    let g = &model.graph;

    assert_eq!(report.steps[0].role, Role::Sink);
    assert_eq!(g.node_names(), vec!["conv_0", "transpose_0"]);
    assert_eq!(names(g, &g.outputs), vec!["tr_out"]);
    assert_valid_dag(g);
}

#[test]
fn sink_with_partial_graph_outputs() {
    // x -> Abs -> s -> Split -> (a, b); a is a graph output; b -> Relu -> y
    let mut model = new_model();
    let g = &mut model.graph;
    let x = g.values.new_var_named("x");
    let [s, a, b, y] = ["s", "a", "b", "y"].map(|n| g.values.new_var_named(n));
    g.add_node(Node::new("Abs").with_name("abs_0").with_in(x).with_out(s));
    g.add_node(
        Node::new("Split")
            .with_name("split_0")
            .with_in(s)
            .with_outs(vec![a, b]),
    );
    g.add_node(Node::new("Relu").with_name("relu_0").with_in(b).with_out(y));
    g.inputs.push(x);
    g.outputs.extend([a, y]);

    let report = remove_nodes(&mut model, &["split_0"], &RemoveOptions::default()).unwrap();
    let g = &model.graph;

    assert_eq!(report.steps[0].role, Role::Sink);
    assert_eq!(g.node_names(), vec!["abs_0", "relu_0"]);
    assert_eq!(names(g, &g.outputs), vec!["y", "s"]);
    // `b` lost its producer.
    let warnings = report.diagnostics.warnings().collect::<Vec<_>>();
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].message.starts_with("'b'"));
}

#[test]
fn source_node_prefers_interior_input() {
    // x -> Relu -> t; Add(x, t) -> r -> Neg -> y
    let mut model = new_model();
    let g = &mut model.graph;
    let x = g.values.new_var_named("x");
    let [t, r, y] = ["t", "r", "y"].map(|n| g.values.new_var_named(n));
    g.add_node(Node::new("Relu").with_name("relu_0").with_in(x).with_out(t));
    g.add_node(Node::new("Add").with_name("add_0").with_ins(vec![x, t]).with_out(r));
    g.add_node(Node::new("Neg").with_name("neg_0").with_in(r).with_out(y));
    g.inputs.push(x);
    g.outputs.push(y);

    let report = remove_nodes(&mut model, &["add_0"], &RemoveOptions::default()).unwrap();
    let g = &model.graph;

    assert_eq!(report.steps[0].role, Role::Source);
    assert_eq!(g.node_names(), vec!["relu_0", "neg_0"]);
    assert_eq!(node_inputs(g, "neg_0"), vec!["t"]);
    assert_valid_dag(g);
}

#[test]
fn omitted_optional_slots_do_not_link_nodes() {
    // x -> Relu -> x1 -> Clip(x1, "", "") -> b -> Dropout -> (y, "")
    let node = |op: &str, name: &str, ins: &[&str], outs: &[&str]| NodeProto {
        op_type: Some(op.into()),
        name: Some(name.into()),
        input: ins.iter().map(|&i| i.into()).collect(),
        output: outs.iter().map(|&o| o.into()).collect(),
        ..Default::default()
    };
    let value = |name: &str| ValueInfoProto {
        name: Some(name.into()),
        ..Default::default()
    };
    let buf = ModelProto {
        ir_version: Some(7),
        opset_import: vec![OperatorSetIdProto {
            domain: Some("".into()),
            version: Some(13),
        }],
        graph: Some(GraphProto {
            node: vec![
                node("Relu", "relu_0", &["x"], &["x1"]),
                node("Clip", "clip_0", &["x1", "", ""], &["b"]),
                node("Dropout", "dropout_0", &["b"], &["y", ""]),
            ],
            input: vec![value("x")],
            output: vec![value("y")],
            ..Default::default()
        }),
        ..Default::default()
    }
    .encode_to_vec();
    let mut model = load_onnx_from_buffer(&buf).unwrap();

    let report = remove_nodes(&mut model, &["relu_0"], &RemoveOptions::default()).unwrap();
    let g = &model.graph;

    assert_eq!(report.steps[0].role, Role::Source);
    assert_eq!(g.node_names(), vec!["clip_0", "dropout_0"]);
    assert_eq!(node_inputs(g, "clip_0"), vec!["x", "", ""]);
    assert_valid_dag(g);
}

#[test]
fn cast_takes_graph_input_shape() {
    let mut model = transpose_cast_relu();
    remove_nodes(&mut model, &["transpose_0"], &RemoveOptions::default()).unwrap();
    let g = &model.graph;

    assert_eq!(node_inputs(g, "cast_0"), vec!["x"]);
    let cast = &g.nodes[g.find_node("cast_0").unwrap()];
    let c = g.values.variable(cast.outputs[0]).unwrap();
    assert_eq!(format!("{:?}", c.dims.as_ref().unwrap()), "[N, 16]");
    assert_eq!(c.elem_ty, Some(DataType::Float));

    let y = g.values.variable(g.outputs[0]).unwrap();
    assert_eq!(
        y.dims,
        Some(Dimensions::from(vec![
            Dimension::Dynamic("N".into()),
            Dimension::Fixed(16)
        ]))
    );
}

#[test]
fn shape_forcing_can_be_disabled() {
    let mut model = transpose_cast_relu();
    let options = RemoveOptions::default()
        .with_shape_forcing_ops(Vec::<String>::new())
        .with_shape_inference(false);
    let report = remove_nodes(&mut model, &["transpose_0"], &options).unwrap();
    let g = &model.graph;

    assert!(!report.shapes_reconciled);
    let cast = &g.nodes[g.find_node("cast_0").unwrap()];
    let c = g.values.variable(cast.outputs[0]).unwrap();
    assert_eq!(c.dims, Some(Dimensions::from(vec![16, 1])));
}

#[test]
fn single_node_graph_is_rejected() {
    let mut model = new_model();
    let g = &mut model.graph;
    let x = g.values.new_var_named("x");
    let y = g.values.new_var_named("y");
    g.add_node(Node::new("Relu").with_name("relu_0").with_in(x).with_out(y));
    g.inputs.push(x);
    g.outputs.push(y);

    let err = remove_nodes(&mut model, &["relu_0"], &RemoveOptions::default()).unwrap_err();
    assert!(matches!(
        err,
        RemoveError::Topology(TopologyError::TooFewNodes { count: 1 })
    ));
    assert_eq!(model.graph.num_nodes(), 1);
}

#[test]
fn two_node_graph_keeps_one() {
    let mut model = conv_transpose_relu();
    remove_nodes(&mut model, &["transpose_0"], &RemoveOptions::default()).unwrap();
    remove_nodes(&mut model, &["relu_0"], &RemoveOptions::default()).unwrap();
    assert_eq!(model.graph.node_names(), vec!["conv_0"]);
    assert_valid_dag(&model.graph);
}

#[test]
fn fan_in_rejection_leaves_model_unchanged() {
    let mut model = conv_transpose_relu();
    {
        let g = &mut model.graph;
        let bias = g.values.new_var_named_and_shaped("bias", DataType::Float, vec![4]);
        g.inputs.push(bias);
        let conv = g.find_node("conv_0").unwrap();
        g.nodes[conv].inputs.push(bias);
    }
    let before = save_onnx_to_buffer(&model).unwrap();

    let err = remove_nodes(&mut model, &["transpose_0", "conv_0"], &RemoveOptions::default())
        .unwrap_err();
    assert!(matches!(
        err,
        RemoveError::Topology(TopologyError::MultipleGraphInputs { ref node }) if node == "conv_0"
    ));
    assert_eq!(save_onnx_to_buffer(&model).unwrap(), before);
}

#[test]
fn boundary_node_policies() {
    // x -> Relu -> y and x -> Neg -> z
    let mut model = new_model();
    let g = &mut model.graph;
    let x = g.values.new_var_named("x");
    let y = g.values.new_var_named("y");
    let z = g.values.new_var_named("z");
    g.add_node(Node::new("Relu").with_name("relu_0").with_in(x).with_out(y));
    g.add_node(Node::new("Neg").with_name("neg_0").with_in(x).with_out(z));
    g.inputs.push(x);
    g.outputs.extend([y, z]);

    let err = remove_nodes(&mut model.clone(), &["relu_0"], &RemoveOptions::default()).unwrap_err();
    assert!(matches!(
        err,
        RemoveError::Topology(TopologyError::BoundaryNode { .. })
    ));

    let options = RemoveOptions::default().with_both_role_policy(BothRolePolicy::Warn);
    let report = remove_nodes(&mut model, &["relu_0"], &options).unwrap();
    assert_eq!(report.steps[0].role, Role::Both);
    assert_eq!(model.graph.node_names(), vec!["neg_0"]);
    // `y` is left without a producer.
    assert_eq!(names(&model.graph, &model.graph.outputs), vec!["y", "z"]);
    assert_eq!(report.diagnostics.warnings().count(), 2);
}

#[test]
fn sequential_deletions_form_a_valid_dag() {
    // x -> a -> b -> c -> d -> e -> y
    let mut model = new_model();
    let g = &mut model.graph;
    let mut prev = g.values.new_var_named_and_shaped("x", DataType::Float, vec![2, 2]);
    g.inputs.push(prev);
    for (i, op) in ["Abs", "Neg", "Relu", "Sigmoid", "Tanh"].into_iter().enumerate() {
        let name = ((b'a' + i as u8) as char).to_string();
        let out = g.values.new_var_named(format!("{name}_out"));
        g.add_node(Node::new(op).with_name(name).with_in(prev).with_out(out));
        prev = out;
    }
    g.outputs.push(prev);

    let report =
        remove_nodes(&mut model, &["e", "b", "a", "c"], &RemoveOptions::default()).unwrap();
    let g = &model.graph;
    assert_eq!(g.node_names(), vec!["d"]);
    assert_valid_dag(g);
    insta::assert_debug_snapshot!(
        report.steps.iter().map(|s| (s.node.as_str(), s.role)).collect::<Vec<_>>(),
        @r###"
    [
        (
            "e",
            Sink,
        ),
        (
            "b",
            Interior,
        ),
        (
            "a",
            Source,
        ),
        (
            "c",
            Source,
        ),
    ]
    "###
    );
    assert_eq!(node_inputs(g, "d"), vec!["x"]);
    assert!(report.shapes_reconciled);
    let out = g.values.variable(g.outputs[0]).unwrap();
    assert_eq!(out.dims, Some(Dimensions::from(vec![2, 2])));
}

#[test]
fn request_round_trips_through_files() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.onnx");
    let output = dir.path().join("out.onnx");
    save_onnx(&conv_transpose_relu(), &input).unwrap();

    let (model, report) = RemoveRequest::new(["transpose_0"])
        .with_input_path(&input)
        .with_output_path(&output)
        .run()
        .unwrap();
    assert_eq!(report.removed_nodes().collect::<Vec<_>>(), vec!["transpose_0"]);

    let saved = load_onnx(&output).unwrap();
    assert_eq!(saved.graph.node_names(), model.graph.node_names());
    assert_eq!(saved.graph.node_names(), vec!["conv_0", "relu_0"]);
    let conv = &saved.graph.nodes[saved.graph.find_node("conv_0").unwrap()];
    assert!(!saved.graph.values.is_variable(conv.inputs[1]));
}

#[test]
fn failed_request_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.onnx");
    let output = dir.path().join("out.onnx");
    save_onnx(&conv_transpose_relu(), &input).unwrap();

    let err = RemoveRequest::new(["conv_0", "transpose_0", "relu_0"])
        .with_input_path(&input)
        .with_output_path(&output)
        .run()
        .unwrap_err();
    assert!(matches!(
        err,
        RemoveError::Topology(TopologyError::NoNodesRemain)
    ));
    assert!(!output.exists());
}

#[test]
fn failed_request_keeps_earlier_warnings() {
    let mut diagnostics = Diagnostics::default();
    let err = RemoveRequest::new(["gone_0", "conv_0", "transpose_0", "relu_0"])
        .with_model(conv_transpose_relu())
        .run_with_diagnostics(&mut diagnostics)
        .unwrap_err();
    assert!(matches!(
        err,
        RemoveError::Topology(TopologyError::NoNodesRemain)
    ));
    let warnings = diagnostics.warnings().collect::<Vec<_>>();
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].message.contains("'gone_0'"));
}

#[test]
fn request_validation() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing.onnx");
    let err = RemoveRequest::new(["a"])
        .with_input_path(&missing)
        .run()
        .unwrap_err();
    assert!(matches!(
        err,
        RemoveError::Validation(ValidationError::FileNotFound(_))
    ));

    let not_onnx = dir.path().join("model.pb");
    save_onnx(&conv_transpose_relu(), &not_onnx).unwrap();
    let err = RemoveRequest::new(["a"])
        .with_input_path(&not_onnx)
        .run()
        .unwrap_err();
    assert!(matches!(
        err,
        RemoveError::Validation(ValidationError::NotOnnxFile(_))
    ));
}
