use std::{cmp::Reverse, collections::BinaryHeap};

use rustc_hash::{FxHashMap, FxHashSet};

use crate::{
    error::TopologyError,
    node::{Node, NodeArena, NodeId},
    onnx::proto::TensorAnnotation,
    value::{ValueArena, ValueId},
};

#[derive(Debug, Default, Clone)]
pub struct Graph {
    pub nodes: NodeArena,
    /// Live nodes in program order.
    pub order: Vec<NodeId>,
    pub values: ValueArena,
    pub inputs: Vec<ValueId>,
    pub outputs: Vec<ValueId>,
    pub name: Option<String>,
    pub doc_string: Option<String>,
    pub quantization_annotation: Vec<TensorAnnotation>,
}

/// Result of looking up the distinct neighbours of a node in one direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Neighbor {
    None,
    One(NodeId),
    Many(usize),
}

impl Neighbor {
    fn from_ids(ids: &[NodeId]) -> Self {
        match ids {
            [] => Neighbor::None,
            [id] => Neighbor::One(*id),
            ids => Neighbor::Many(ids.len()),
        }
    }
}

impl Graph {
    pub fn add_node(&mut self, node: Node) -> NodeId {
        let id = self.nodes.alloc(node);
        self.order.push(id);
        id
    }

    pub fn num_nodes(&self) -> usize {
        self.order.len()
    }

    pub fn find_node(&self, name: &str) -> Option<NodeId> {
        self.order
            .iter()
            .copied()
            .find(|&id| self.nodes[id].name == name)
    }

    pub fn node_names(&self) -> Vec<&str> {
        self.order
            .iter()
            .map(|&id| self.nodes[id].name.as_str())
            .collect()
    }

    pub fn is_graph_input(&self, id: ValueId) -> bool {
        self.inputs.contains(&id)
    }

    pub fn is_graph_output(&self, id: ValueId) -> bool {
        self.outputs.contains(&id)
    }

    /// Maps every value to the live nodes consuming it, in program order. Placeholders
    /// for omitted optional slots are left out.
    pub fn get_value_users(&self) -> FxHashMap<ValueId, Vec<NodeId>> {
        let mut value_users: FxHashMap<ValueId, Vec<NodeId>> = FxHashMap::default();

        for &node_id in &self.order {
            for &input in &self.nodes[node_id].inputs {
                if self.values[input].is_placeholder() {
                    continue;
                }
                let users = value_users.entry(input).or_default();
                if !users.contains(&node_id) {
                    users.push(node_id);
                }
            }
        }

        value_users
    }

    /// Maps every value to the live node producing it. Placeholders are left out.
    pub fn get_value_parents(&self) -> FxHashMap<ValueId, NodeId> {
        let mut value_parents = FxHashMap::default();

        for &node_id in &self.order {
            for &output in &self.nodes[node_id].outputs {
                if self.values[output].is_placeholder() {
                    continue;
                }
                value_parents.insert(output, node_id);
            }
        }

        value_parents
    }

    /// Distinct nodes consuming any output of `node_id`.
    pub fn successors(&self, node_id: NodeId) -> Neighbor {
        let node = &self.nodes[node_id];
        let succs = self
            .order
            .iter()
            .copied()
            .filter(|&id| {
                id != node_id
                    && self.nodes[id]
                        .inputs
                        .iter()
                        .any(|&i| node.outputs.contains(&i) && !self.values[i].is_placeholder())
            })
            .collect::<Vec<_>>();
        Neighbor::from_ids(&succs)
    }

    /// Distinct nodes producing any `Variable` input of `node_id`.
    pub fn predecessors(&self, node_id: NodeId) -> Neighbor {
        let node = &self.nodes[node_id];
        let preds = self
            .order
            .iter()
            .copied()
            .filter(|&id| {
                id != node_id
                    && self.nodes[id].outputs.iter().any(|&o| {
                        node.inputs.contains(&o)
                            && self.values.is_variable(o)
                            && !self.values[o].is_placeholder()
                    })
            })
            .collect::<Vec<_>>();
        Neighbor::from_ids(&preds)
    }

    /// Indices of the `Variable` slots in `slots`.
    pub fn variable_slots(&self, slots: &[ValueId]) -> Vec<usize> {
        slots
            .iter()
            .enumerate()
            .filter(|&(_, &v)| self.values.is_variable(v))
            .map(|(i, _)| i)
            .collect()
    }

    pub fn remove_unnecessary_nodes(&mut self) {
        let nodes = &self.nodes;
        self.order.retain(|&id| !nodes[id].deleted);
    }

    /// Marks every node that does not contribute to a graph output as deleted and
    /// drops it from the node order. Returns the number of nodes removed.
    pub fn cleanup(&mut self) -> usize {
        let value_parents = self.get_value_parents();
        let mut live = FxHashSet::default();
        let mut worklist = self.outputs.clone();
        let mut seen = FxHashSet::default();

        while let Some(value) = worklist.pop() {
            if !seen.insert(value) {
                continue;
            }
            let Some(&producer) = value_parents.get(&value) else {
                continue;
            };
            if live.insert(producer) {
                worklist.extend(self.nodes[producer].inputs.iter().copied());
            }
        }

        let before = self.order.len();
        for &id in &self.order {
            if !live.contains(&id) {
                self.nodes[id].deleted = true;
            }
        }
        self.remove_unnecessary_nodes();
        before - self.order.len()
    }

    /// Reorders nodes topologically. Among ready nodes the one appearing first in
    /// the current order goes first, so an already sorted graph is left unchanged.
    pub fn toposort(&mut self) -> Result<(), TopologyError> {
        let value_parents = self.get_value_parents();
        let position = self
            .order
            .iter()
            .enumerate()
            .map(|(pos, &id)| (id, pos))
            .collect::<FxHashMap<_, _>>();

        let mut num_preds = vec![0usize; self.order.len()];
        let mut users = vec![Vec::new(); self.order.len()];
        for (pos, &id) in self.order.iter().enumerate() {
            let preds = self.nodes[id]
                .inputs
                .iter()
                .filter_map(|i| value_parents.get(i))
                .map(|p| position[p])
                .collect::<FxHashSet<_>>();
            num_preds[pos] = preds.len();
            for pred in preds {
                users[pred].push(pos);
            }
        }

        let mut que = num_preds
            .iter()
            .enumerate()
            .filter(|&(_, &n)| n == 0)
            .map(|(pos, _)| Reverse(pos))
            .collect::<BinaryHeap<_>>();
        let mut sorted = Vec::with_capacity(self.order.len());

        while let Some(Reverse(pos)) = que.pop() {
            sorted.push(self.order[pos]);
            for &user in &users[pos] {
                num_preds[user] -= 1;
                if num_preds[user] == 0 {
                    que.push(Reverse(user));
                }
            }
        }

        if sorted.len() != self.order.len() {
            return Err(TopologyError::Cycle {
                remaining: self.order.len() - sorted.len(),
            });
        }

        self.order = sorted;
        Ok(())
    }

    /// Dead-node elision followed by topological reordering.
    pub fn normalize(&mut self) -> Result<(), TopologyError> {
        let removed = self.cleanup();
        self.toposort()?;
        if removed > 0 {
            log::debug!("normalize: removed {removed} dead node(s)");
        }
        Ok(())
    }

    /// Variables consumed by live nodes that nothing produces and that are not graph
    /// inputs.
    pub fn dangling_values(&self) -> Vec<ValueId> {
        let value_parents = self.get_value_parents();
        let mut dangling = vec![];
        for &id in &self.order {
            for &input in &self.nodes[id].inputs {
                if value_parents.contains_key(&input)
                    || self.is_graph_input(input)
                    || !self.values.is_variable(input)
                    || self.values[input].is_placeholder()
                    || dangling.contains(&input)
                {
                    continue;
                }
                dangling.push(input);
            }
        }
        dangling
    }

    /// Every value referenced by a live node or by the graph boundary.
    pub fn live_values(&self) -> FxHashSet<ValueId> {
        let mut live = FxHashSet::default();
        live.extend(self.inputs.iter().copied());
        live.extend(self.outputs.iter().copied());
        for &id in &self.order {
            let node = &self.nodes[id];
            live.extend(node.inputs.iter().copied());
            live.extend(node.outputs.iter().copied());
        }
        live
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::onnx::proto::tensor_proto::DataType;

    // x -> a -> b -> y, plus a dead node `d` fed by `a`.
    fn chain_with_dead_branch() -> Graph {
        let mut g = Graph::default();
        let x = g.values.new_var_named_and_shaped("x", DataType::Float, vec![1, 4]);
        let a_out = g.values.new_var_named("a_out");
        let y = g.values.new_var_named("y");
        let d_out = g.values.new_var_named("d_out");
        g.add_node(Node::new("Relu").with_name("b").with_in(a_out).with_out(y));
        g.add_node(Node::new("Neg").with_name("d").with_in(a_out).with_out(d_out));
        g.add_node(Node::new("Abs").with_name("a").with_in(x).with_out(a_out));
        g.inputs.push(x);
        g.outputs.push(y);
        g
    }

    #[test]
    fn cleanup_drops_dead_nodes() {
        let mut g = chain_with_dead_branch();
        assert_eq!(g.cleanup(), 1);
        assert!(g.find_node("d").is_none());
        assert_eq!(g.num_nodes(), 2);
    }

    #[test]
    fn toposort_orders_producers_first() {
        let mut g = chain_with_dead_branch();
        g.normalize().unwrap();
        insta::assert_debug_snapshot!(g.node_names(), @r###"
        [
            "a",
            "b",
        ]
        "###);
    }

    #[test]
    fn normalize_is_idempotent() {
        let mut g = chain_with_dead_branch();
        g.normalize().unwrap();
        let once = g.order.clone();
        let values_once = g.live_values();
        g.normalize().unwrap();
        assert_eq!(g.order, once);
        assert_eq!(g.live_values(), values_once);
    }

    #[test]
    fn toposort_detects_cycles() {
        let mut g = Graph::default();
        let p = g.values.new_var_named("p");
        let q = g.values.new_var_named("q");
        g.add_node(Node::new("Relu").with_name("a").with_in(q).with_out(p));
        g.add_node(Node::new("Relu").with_name("b").with_in(p).with_out(q));
        g.outputs.push(q);
        assert_eq!(g.toposort(), Err(TopologyError::Cycle { remaining: 2 }));
    }

    #[test]
    fn neighbours() {
        let mut g = chain_with_dead_branch();
        let a = g.find_node("a").unwrap();
        let b = g.find_node("b").unwrap();
        assert_eq!(g.successors(a), Neighbor::Many(2));
        assert_eq!(g.predecessors(b), Neighbor::One(a));
        assert_eq!(g.predecessors(a), Neighbor::None);
        g.cleanup();
        assert_eq!(g.successors(a), Neighbor::One(b));
        assert_eq!(g.successors(b), Neighbor::None);
    }

    #[test]
    fn dangling_values_are_reported() {
        let mut g = chain_with_dead_branch();
        let a = g.find_node("a").unwrap();
        g.nodes[a].outputs.clear();
        let a_out = g.nodes[g.find_node("b").unwrap()].inputs[0];
        assert_eq!(g.dangling_values(), vec![a_out]);
    }

    #[test]
    fn placeholders_do_not_link_nodes() {
        // x -> [drop] -> (y, "") ; y -> [clip(y, "", "")] -> z
        let mut g = Graph::default();
        let x = g.values.new_var_named("x");
        let y = g.values.new_var_named("y");
        let z = g.values.new_var_named("z");
        let none = g.values.new_var_named("");
        let drop = g.add_node(
            Node::new("Dropout")
                .with_name("drop")
                .with_in(x)
                .with_outs(vec![y, none]),
        );
        let clip = g.add_node(
            Node::new("Clip")
                .with_name("clip")
                .with_ins(vec![y, none, none])
                .with_out(z),
        );
        g.add_node(
            Node::new("Relu")
                .with_name("relu")
                .with_in(none)
                .with_out(x),
        );
        g.outputs.push(z);

        assert!(!g.get_value_parents().contains_key(&none));
        assert!(!g.get_value_users().contains_key(&none));
        assert_eq!(g.predecessors(clip), Neighbor::One(drop));
        assert_eq!(g.successors(drop), Neighbor::One(clip));
        g.toposort().unwrap();
        assert_eq!(g.node_names(), vec!["relu", "drop", "clip"]);
    }
}
