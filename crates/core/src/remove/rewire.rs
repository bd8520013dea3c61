use crate::{
    diagnostic::Diagnostics,
    error::TopologyError,
    graph::{Graph, Neighbor},
    node::NodeId,
    shape::dims_of,
};

use super::{
    role::{Classification, Role},
    BothRolePolicy, RemoveOptions,
};

/// Reconnects the neighbours of `node_id` so that the node can be dropped, then
/// clears its outputs. The node itself stays in the graph until it is pruned.
pub fn rewire(
    graph: &mut Graph,
    node_id: NodeId,
    class: &Classification,
    options: &RemoveOptions,
    diagnostics: &mut Diagnostics,
) -> Result<(), TopologyError> {
    match class.role {
        Role::Source => splice_source(
            graph,
            node_id,
            class,
            &options.shape_forcing_ops,
            diagnostics,
        )?,
        Role::Sink => splice_sink(graph, node_id, class),
        Role::Interior => splice_interior(graph, node_id, diagnostics)?,
        Role::Both => match options.both_role_policy {
            BothRolePolicy::Reject => {
                return Err(TopologyError::BoundaryNode {
                    node: graph.nodes[node_id].name.clone(),
                })
            }
            BothRolePolicy::Warn => diagnostics.warn(format!(
                "'{}' is connected to both the input and the output of the graph. It is removed \
                 without reconnection; check the graph carefully.",
                graph.nodes[node_id].name
            )),
        },
    }
    graph.nodes[node_id].outputs.clear();
    Ok(())
}

/// `x -> [node] -> t -> [next]` becomes `x -> [next]`.
fn splice_source(
    graph: &mut Graph,
    node_id: NodeId,
    class: &Classification,
    shape_forcing_ops: &[String],
    diagnostics: &mut Diagnostics,
) -> Result<(), TopologyError> {
    let name = graph.nodes[node_id].name.clone();
    let next_id = match graph.successors(node_id) {
        Neighbor::One(id) => id,
        Neighbor::None => {
            return Err(TopologyError::AmbiguousSuccessor {
                node: name,
                count: 0,
            })
        }
        Neighbor::Many(count) => {
            return Err(TopologyError::AmbiguousSuccessor { node: name, count })
        }
    };

    let next_slots = graph.variable_slots(&graph.nodes[next_id].inputs);
    if next_slots.len() < class.graph_inputs.len() {
        return Err(TopologyError::SourceArityMismatch {
            node: name,
            removed: class.graph_inputs.len(),
            next: next_slots.len(),
        });
    }

    // Shapes to force onto the single shape-preserving consumer of a reconnected slot.
    let value_users = graph.get_value_users();
    let mut forced = vec![];
    for (&slot, &input) in next_slots.iter().zip(&class.graph_inputs) {
        let tensor = graph.nodes[next_id].inputs[slot];
        let Some(&[user]) = value_users.get(&tensor).map(Vec::as_slice) else {
            continue;
        };
        if !shape_forcing_ops.contains(&graph.nodes[user].op_type) {
            continue;
        }
        if let Some(dims) = dims_of(graph, input) {
            forced.push((user, dims.clone()));
        }
    }

    // An interior input of the removed node wins over its graph input.
    let node = &graph.nodes[node_id];
    let outputs = node.outputs.clone();
    let replacement = node
        .inputs
        .iter()
        .copied()
        .find(|&i| {
            graph.values.is_variable(i)
                && !graph.values[i].is_placeholder()
                && !graph.is_graph_input(i)
        })
        .unwrap_or(class.graph_inputs[0]);

    let next = &mut graph.nodes[next_id];
    let Some(replaced) = next.inputs.iter().copied().find(|i| outputs.contains(i)) else {
        return Ok(());
    };
    for input in next.inputs.iter_mut().filter(|i| **i == replaced) {
        *input = replacement;
    }

    diagnostics.warn(format!(
        "There may be a mismatch in the input/output shapes before and after the OP to be \
         deleted. Check the graph carefully. node_name: {name}"
    ));

    for (user, dims) in forced {
        let user = &graph.nodes[user];
        let Some(out) = user
            .outputs
            .iter()
            .copied()
            .find(|&o| graph.values.is_variable(o))
        else {
            continue;
        };
        log::debug!("source splice: '{}' output takes shape {dims:?}", user.name);
        if let Some(var) = graph.values.variable_mut(out) {
            var.dims = Some(dims);
        }
    }

    Ok(())
}

/// `[prev] -> t -> [node] -> y` becomes `[prev] -> t` with `t` as the graph output.
fn splice_sink(graph: &mut Graph, node_id: NodeId, class: &Classification) {
    graph.outputs.retain(|o| !class.feeds_outputs.contains(o));
    let inputs = graph.nodes[node_id].inputs.clone();
    for input in inputs {
        if graph.values.is_variable(input)
            && !graph.values[input].is_placeholder()
            && !graph.outputs.contains(&input)
        {
            graph.outputs.push(input);
        }
    }
}

/// `[pred] -> t0 -> [node] -> t1 -> [succ]` becomes `[pred] -> t1 -> [succ]`. The
/// predecessor's `Variable` outputs are replaced positionally by the successor's
/// `Variable` inputs.
fn splice_interior(
    graph: &mut Graph,
    node_id: NodeId,
    diagnostics: &mut Diagnostics,
) -> Result<(), TopologyError> {
    let name = graph.nodes[node_id].name.clone();
    let succ_id = match graph.successors(node_id) {
        Neighbor::One(id) => id,
        Neighbor::None => {
            diagnostics.info(format!(
                "'{name}' has no following OP and is removed without reconnection"
            ));
            return Ok(());
        }
        Neighbor::Many(count) => {
            return Err(TopologyError::AmbiguousSuccessor { node: name, count })
        }
    };
    let pred_id = match graph.predecessors(node_id) {
        Neighbor::One(id) => id,
        Neighbor::None => return Err(TopologyError::NoPredecessor { node: name }),
        Neighbor::Many(count) => {
            return Err(TopologyError::AmbiguousPredecessor { node: name, count })
        }
    };

    let pred_slots = graph.variable_slots(&graph.nodes[pred_id].outputs);
    let succ_slots = graph.variable_slots(&graph.nodes[succ_id].inputs);
    if pred_slots.len() != succ_slots.len() {
        return Err(TopologyError::SpliceArityMismatch {
            node: name,
            pred_outputs: pred_slots.len(),
            succ_inputs: succ_slots.len(),
        });
    }

    let value_parents = graph.get_value_parents();
    let value_users = graph.get_value_users();
    let pred_name = graph.nodes[pred_id].name.clone();

    for (&p, &s) in pred_slots.iter().zip(&succ_slots) {
        let tensor = graph.nodes[succ_id].inputs[s];
        let old = graph.nodes[pred_id].outputs[p];
        if old == tensor {
            continue;
        }

        let has_other_producer = value_parents
            .get(&tensor)
            .map_or(false, |&parent| parent != node_id && parent != pred_id);
        if has_other_producer || graph.is_graph_input(tensor) {
            return Err(TopologyError::ConflictingProducer {
                node: name,
                tensor: graph.values[tensor].name().to_owned(),
            });
        }

        let orphans_users = value_users
            .get(&old)
            .map_or(false, |users| users.iter().any(|&u| u != node_id));
        if orphans_users || graph.is_graph_output(old) {
            diagnostics.warn(format!(
                "'{}' produced by '{pred_name}' is used elsewhere and loses its producer when \
                 '{name}' is removed. Check the graph carefully.",
                graph.values[old].name()
            ));
        }

        graph.nodes[pred_id].outputs[p] = tensor;
    }

    Ok(())
}
