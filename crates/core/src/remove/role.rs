use crate::{
    error::TopologyError,
    graph::Graph,
    node::NodeId,
    value::ValueId,
};

/// Position of a deletion target relative to the graph boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Consumes a graph input, produces no graph output.
    Source,
    /// Produces a graph output, consumes no graph input.
    Sink,
    /// Touches both boundaries.
    Both,
    Interior,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub role: Role,
    /// Distinct graph inputs consumed by the node, in slot order.
    pub graph_inputs: Vec<ValueId>,
    /// Node outputs that are also graph outputs, in slot order.
    pub feeds_outputs: Vec<ValueId>,
}

/// Checks that deleting `targets` leaves a usable graph. `names` are the requested
/// node names; graph outputs carrying one of them are dropped by pruning.
pub fn check_preconditions(
    graph: &Graph,
    targets: &[NodeId],
    names: &[String],
) -> Result<(), TopologyError> {
    let count = graph.num_nodes();
    if count < 2 {
        return Err(TopologyError::TooFewNodes { count });
    }
    if count.saturating_sub(targets.len()) < 1 {
        return Err(TopologyError::NoNodesRemain);
    }
    let remaining_outputs = graph
        .outputs
        .iter()
        .filter(|&&o| !names.iter().any(|n| n == graph.values[o].name()))
        .count();
    if remaining_outputs < 1 {
        return Err(TopologyError::NoOutputsRemain);
    }
    Ok(())
}

/// Classifies `node_id` against the current state of `graph`. Only `Variable` slots
/// are matched against the boundary.
pub fn classify(graph: &Graph, node_id: NodeId) -> Result<Classification, TopologyError> {
    let node = &graph.nodes[node_id];

    let mut graph_inputs = vec![];
    for &input in &node.inputs {
        if graph.values.is_variable(input)
            && graph.is_graph_input(input)
            && !graph_inputs.contains(&input)
        {
            graph_inputs.push(input);
        }
    }
    if graph_inputs.len() >= 2 {
        return Err(TopologyError::MultipleGraphInputs {
            node: node.name.clone(),
        });
    }

    let feeds_outputs = node
        .outputs
        .iter()
        .copied()
        .filter(|&o| graph.values.is_variable(o) && graph.is_graph_output(o))
        .collect::<Vec<_>>();

    let role = match (graph_inputs.is_empty(), feeds_outputs.is_empty()) {
        (false, true) => Role::Source,
        (true, false) => Role::Sink,
        (false, false) => Role::Both,
        (true, true) => Role::Interior,
    };

    Ok(Classification {
        role,
        graph_inputs,
        feeds_outputs,
    })
}
