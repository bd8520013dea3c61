//! Node deletion with rewiring.
//!
//! Every requested node is classified by its position relative to the graph boundary
//! and spliced out of its neighbourhood, one after another, on a staged copy of the
//! graph. The orphaned remains are then pruned and shapes are reconciled. Only when
//! every step succeeds is the staged graph committed back to the model.

pub mod prune;
pub mod request;
pub mod retarget;
pub mod rewire;
pub mod role;

use std::time::Instant;

use crate::{
    diagnostic::Diagnostics,
    error::{RemoveError, TopologyError},
    graph::Graph,
    model::Model,
    node::NodeId,
    shape::{reconcile_shapes, ForwardShapeInference, ShapeInference},
};

pub use request::{validate_onnx_path, RemoveRequest};
pub use role::Role;

/// Op kinds whose output shape is overwritten with the graph input's shape when they
/// directly consume a tensor reconnected by a source splice.
pub const DEFAULT_SHAPE_FORCING_OPS: &[&str] = &["Cast"];

/// What to do with a node connected to both a graph input and a graph output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BothRolePolicy {
    /// Fail the whole deletion.
    #[default]
    Reject,
    /// Remove the node without reconnection and record a warning.
    Warn,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoveOptions {
    pub shape_forcing_ops: Vec<String>,
    pub both_role_policy: BothRolePolicy,
    pub infer_shapes: bool,
}

impl Default for RemoveOptions {
    fn default() -> Self {
        Self {
            shape_forcing_ops: DEFAULT_SHAPE_FORCING_OPS
                .iter()
                .map(|&op| op.to_owned())
                .collect(),
            both_role_policy: BothRolePolicy::default(),
            infer_shapes: true,
        }
    }
}

impl RemoveOptions {
    pub fn with_shape_forcing_ops<S: Into<String>>(
        mut self,
        ops: impl IntoIterator<Item = S>,
    ) -> Self {
        self.shape_forcing_ops = ops.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_both_role_policy(mut self, policy: BothRolePolicy) -> Self {
        self.both_role_policy = policy;
        self
    }

    pub fn with_shape_inference(mut self, enabled: bool) -> Self {
        self.infer_shapes = enabled;
        self
    }
}

/// One deleted node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub node: String,
    pub role: Role,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Report {
    pub steps: Vec<Step>,
    pub diagnostics: Diagnostics,
    /// Whether shape inference succeeded and its annotations were kept.
    pub shapes_reconciled: bool,
}

impl Report {
    pub fn removed_nodes(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().map(|s| s.node.as_str())
    }
}

/// A fully computed deletion that has not been applied yet.
#[derive(Debug, Clone)]
pub struct RemovalPlan {
    graph: Graph,
    report: Report,
}

impl RemovalPlan {
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn report(&self) -> &Report {
        &self.report
    }

    pub fn commit(self, model: &mut Model) -> Report {
        model.graph = self.graph;
        self.report
    }
}

/// Removes the nodes named `names` from `model`, reconnecting their neighbours. On
/// error the model is left untouched.
pub fn remove_nodes<S: AsRef<str>>(
    model: &mut Model,
    names: &[S],
    options: &RemoveOptions,
) -> Result<Report, RemoveError> {
    let plan = plan_removal(model, names, options, &ForwardShapeInference::default())?;
    Ok(plan.commit(model))
}

/// Computes the result of removing `names` from `model` without modifying it.
///
/// Nodes are processed in the order given; each one sees the graph as left by the
/// ones before it. A name matching several nodes removes all of them.
pub fn plan_removal<S: AsRef<str>>(
    model: &Model,
    names: &[S],
    options: &RemoveOptions,
    inference: &dyn ShapeInference,
) -> Result<RemovalPlan, TopologyError> {
    plan_removal_with_diagnostics(model, names, options, inference, &mut Diagnostics::default())
}

/// Same as [`plan_removal`], recording events into `diagnostics` as they are raised.
/// On failure `diagnostics` keeps everything reported before the error.
pub fn plan_removal_with_diagnostics<S: AsRef<str>>(
    model: &Model,
    names: &[S],
    options: &RemoveOptions,
    inference: &dyn ShapeInference,
    diagnostics: &mut Diagnostics,
) -> Result<RemovalPlan, TopologyError> {
    let start = Instant::now();
    let mut graph = model.graph.clone();
    let mut steps = vec![];

    let mut requested: Vec<String> = vec![];
    for name in names.iter().map(AsRef::as_ref) {
        if name.is_empty() {
            diagnostics.warn("An empty node name was given and is ignored.");
            continue;
        }
        if !requested.iter().any(|r| r == name) {
            requested.push(name.to_owned());
        }
    }

    let mut targets: Vec<NodeId> = vec![];
    for name in &requested {
        let found = graph
            .order
            .iter()
            .copied()
            .filter(|&id| graph.nodes[id].name == *name)
            .collect::<Vec<_>>();
        if found.is_empty() {
            diagnostics.warn(format!("Node '{name}' is not found in the graph and is skipped."));
        }
        targets.extend(found);
    }

    role::check_preconditions(&graph, &targets, &requested)?;

    for node_id in targets {
        let class = role::classify(&graph, node_id)?;
        retarget::retarget_outputs(&mut graph, node_id, &class);
        rewire::rewire(&mut graph, node_id, &class, options, diagnostics)?;
        graph.nodes[node_id].deleted = true;
        graph.remove_unnecessary_nodes();
        steps.push(Step {
            node: graph.nodes[node_id].name.clone(),
            role: class.role,
        });
    }

    prune::prune(&mut graph, &requested, diagnostics)?;

    let shapes_reconciled =
        options.infer_shapes && reconcile_shapes(&mut graph, inference, diagnostics);

    log::info!("plan_removal({}): {:?}", steps.len(), start.elapsed());

    Ok(RemovalPlan {
        graph,
        report: Report {
            steps,
            diagnostics: diagnostics.clone(),
            shapes_reconciled,
        },
    })
}
