use crate::{diagnostic::Diagnostics, error::TopologyError, graph::Graph};

/// Drops everything the rewiring has orphaned and checks that a usable graph remains.
///
/// Each stage is followed by a normalization pass: dead nodes are elided and the
/// node order is made topological again.
pub fn prune(
    graph: &mut Graph,
    removed_names: &[String],
    diagnostics: &mut Diagnostics,
) -> Result<(), TopologyError> {
    graph.normalize()?;

    // Graph inputs nothing consumes any more.
    let value_users = graph.get_value_users();
    let before = graph.inputs.len();
    graph.inputs.retain(|i| value_users.contains_key(i));
    if graph.inputs.len() != before {
        log::debug!("prune: dropped {} unused graph input(s)", before - graph.inputs.len());
    }
    graph.normalize()?;

    // Graph outputs named after a removed node.
    let values = &graph.values;
    graph
        .outputs
        .retain(|&o| !removed_names.iter().any(|n| n == values[o].name()));
    graph.normalize()?;

    if graph.outputs.is_empty() {
        return Err(TopologyError::NoOutputsRemain);
    }
    if graph.num_nodes() == 0 {
        return Err(TopologyError::NoNodesRemain);
    }

    let value_parents = graph.get_value_parents();
    for &output in &graph.outputs {
        if !value_parents.contains_key(&output) && !graph.is_graph_input(output) {
            diagnostics.warn(format!(
                "Graph output '{}' is no longer produced by any OP.",
                graph.values[output].name()
            ));
        }
    }
    for value in graph.dangling_values() {
        diagnostics.warn(format!(
            "'{}' is consumed but no longer produced by any OP. Check the graph carefully.",
            graph.values[value].name()
        ));
    }

    Ok(())
}
