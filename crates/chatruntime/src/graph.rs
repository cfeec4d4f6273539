use chatcore::{ChatflowError, FlowData, FlowEdge, FlowNode, NodeData, NodeId};
use indexmap::IndexMap;
use petgraph::algo::is_cyclic_directed;
use petgraph::graph::DiGraph;
use std::collections::{HashMap, HashSet, VecDeque};

/// Adjacency lists keyed by node id, in node declaration order.
pub type NodeGraph = IndexMap<NodeId, Vec<NodeId>>;

/// Number of incoming edges per node
pub type DependencyCounts = IndexMap<NodeId, usize>;

/// Normalized distance from the ending node: starting nodes sit at 0 and
/// the ending node at the maximum depth.
pub type DepthQueue = IndexMap<NodeId, usize>;

/// Build adjacency lists and in-degree counts from a node/edge list.
///
/// Every node gets an entry in both maps, even without edges. With
/// `undirected` each edge is also recorded target -> source; in-degree is
/// counted the same way in both modes.
pub fn construct_graphs(
    nodes: &[FlowNode],
    edges: &[FlowEdge],
    undirected: bool,
) -> (NodeGraph, DependencyCounts) {
    let mut graph = NodeGraph::new();
    let mut dependencies = DependencyCounts::new();

    for node in nodes {
        graph.insert(node.id.clone(), Vec::new());
        dependencies.insert(node.id.clone(), 0);
    }

    for edge in edges {
        graph
            .entry(edge.source.clone())
            .or_default()
            .push(edge.target.clone());

        if undirected {
            graph
                .entry(edge.target.clone())
                .or_default()
                .push(edge.source.clone());
        }

        *dependencies.entry(edge.target.clone()).or_insert(0) += 1;
    }

    (graph, dependencies)
}

/// Locate the single terminal node of a flow.
///
/// A lone node is its own ending node. Otherwise the ending node is the one
/// sink with at least one incoming edge; no sink or several sinks mean the
/// flow is invalid and `None` is returned.
pub fn get_ending_node(dependencies: &DependencyCounts, graph: &NodeGraph) -> Option<NodeId> {
    if dependencies.len() == 1 && graph.len() == 1 {
        return graph.keys().next().cloned();
    }

    let mut sinks = graph.iter().filter(|(id, targets)| {
        targets.is_empty() && dependencies.get(*id).copied().unwrap_or(0) > 0
    });

    match (sinks.next(), sinks.next()) {
        (Some((id, _)), None) => Some(id.clone()),
        _ => None,
    }
}

/// Breadth-first walk from the ending node over the undirected graph.
///
/// Returns every node found at the maximum distance (the starting nodes, in
/// discovery order) together with the normalized depth of each visited node.
/// A node's depth is the one it was last enqueued with, so a node queued
/// twice before its first visit keeps the deeper of the two.
pub fn get_starting_nodes(graph: &NodeGraph, ending_node_id: &str) -> (Vec<NodeId>, DepthQueue) {
    let mut visited = HashSet::new();
    let mut queue = VecDeque::from([(ending_node_id.to_string(), 0usize)]);
    let mut depths: IndexMap<NodeId, usize> = IndexMap::from([(ending_node_id.to_string(), 0)]);

    let mut max_depth = 0;
    let mut starting_node_ids = Vec::new();

    while let Some((node_id, depth)) = queue.pop_front() {
        if !visited.insert(node_id.clone()) {
            continue;
        }

        if depth > max_depth {
            max_depth = depth;
            starting_node_ids = vec![node_id.clone()];
        } else if depth == max_depth {
            starting_node_ids.push(node_id.clone());
        }

        for neighbor in graph.get(&node_id).into_iter().flatten() {
            if !visited.contains(neighbor) {
                queue.push_back((neighbor.clone(), depth + 1));
                depths.insert(neighbor.clone(), depth + 1);
            }
        }
    }

    let depth_queue = depths
        .into_iter()
        .map(|(id, depth)| (id, depth.abs_diff(max_depth)))
        .collect();

    (starting_node_ids, depth_queue)
}

/// An ending node that declares outputs must output itself, not a
/// prediction of some other type.
pub fn check_ending_output(data: &NodeData) -> Result<(), ChatflowError> {
    if data.outputs.is_empty() || data.outputs.values().any(|v| v.as_str() == Some(data.name.as_str())) {
        return Ok(());
    }
    Err(ChatflowError::InvalidEndingOutput {
        label: data.label.clone(),
        node_id: data.id.clone(),
    })
}

/// Everything the executor needs to know about a flow's shape
#[derive(Debug, Clone)]
pub struct FlowPlan {
    pub ending_node_id: NodeId,
    pub starting_node_ids: Vec<NodeId>,
    /// Directed adjacency used for forward traversal
    pub graph: NodeGraph,
    pub depth_queue: DepthQueue,
}

/// Locate the ending node, check it, and level the flow from it.
pub fn plan_flow(flow: &FlowData) -> Result<FlowPlan, ChatflowError> {
    let (graph, dependencies) = construct_graphs(&flow.nodes, &flow.edges, false);
    let ending_node_id = get_ending_node(&dependencies, &graph).ok_or(ChatflowError::NoEndingNode)?;
    let ending = flow
        .find_node(&ending_node_id)
        .ok_or(ChatflowError::NoEndingNode)?;
    check_ending_output(&ending.data)?;

    let (undirected, _) = construct_graphs(&flow.nodes, &flow.edges, true);
    let (starting_node_ids, depth_queue) = get_starting_nodes(&undirected, &ending_node_id);

    Ok(FlowPlan {
        ending_node_id,
        starting_node_ids,
        graph,
        depth_queue,
    })
}

/// Static analysis of a flow without instantiating anything
#[derive(Debug, Clone)]
pub struct FlowSummary {
    pub plan: FlowPlan,
    /// Directed graph contains at least one cycle
    pub has_feedback_loop: bool,
    /// Nodes the breadth-first walk from the ending node never reached
    pub unreachable: Vec<NodeId>,
}

pub fn validate_flow(flow: &FlowData) -> Result<FlowSummary, ChatflowError> {
    let plan = plan_flow(flow)?;
    let unreachable = flow
        .nodes
        .iter()
        .filter(|n| !plan.depth_queue.contains_key(&n.id))
        .map(|n| n.id.clone())
        .collect();

    Ok(FlowSummary {
        plan,
        has_feedback_loop: has_cycle(flow),
        unreachable,
    })
}

fn has_cycle(flow: &FlowData) -> bool {
    let mut graph = DiGraph::<&str, ()>::new();
    let mut index = HashMap::new();
    for node in &flow.nodes {
        index.insert(node.id.as_str(), graph.add_node(node.id.as_str()));
    }
    for edge in &flow.edges {
        if let (Some(a), Some(b)) = (index.get(edge.source.as_str()), index.get(edge.target.as_str())) {
            graph.add_edge(*a, *b, ());
        }
    }
    is_cyclic_directed(&graph)
}
