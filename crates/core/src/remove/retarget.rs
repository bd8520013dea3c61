use crate::{graph::Graph, node::NodeId};

use super::role::Classification;

/// Detaches the graph outputs a node produces when only some of its outputs are graph
/// outputs. The matched tensors are dropped from the graph output list and from the
/// node's outputs, so the node's remaining outputs can be spliced as usual.
///
/// Returns whether anything was detached.
pub fn retarget_outputs(graph: &mut Graph, node_id: NodeId, class: &Classification) -> bool {
    let feeds = &class.feeds_outputs;
    let num_outputs = graph.nodes[node_id].outputs.len();
    if feeds.is_empty() || feeds.len() >= num_outputs {
        return false;
    }

    graph.outputs.retain(|o| !feeds.contains(o));
    graph.nodes[node_id].outputs.retain(|o| !feeds.contains(o));
    log::debug!(
        "retarget: detached {} graph output(s) from '{}'",
        feeds.len(),
        graph.nodes[node_id].name
    );
    true
}
