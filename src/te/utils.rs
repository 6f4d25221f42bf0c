//!
//! utils
//!
use super::problem::{EdgeKey, Topology};
use super::solution::{edge_flows, SolutionMap};
use itertools::Itertools; // for tuple_windows
use petgraph::dot::Dot;
use petgraph::visit::EdgeRef;

///
/// Convert a node path `[v0, v1, ..., vn]` into its edges `[(v0, v1), ..., (vn-1, vn)]`
///
pub fn path_to_edge_list(path: &[usize]) -> Vec<EdgeKey> {
    path.iter().copied().tuple_windows().collect()
}

///
/// Truncate every cycle out of a node path.
///
/// When a node is revisited, the nodes pushed since its first visit are
/// dropped, so the result is a simple path with the same endpoints.
/// Applying it twice gives the same path.
///
pub fn remove_cycles(path: &[usize]) -> Vec<usize> {
    let mut stack: Vec<usize> = Vec::with_capacity(path.len());
    for &node in path {
        if let Some(pos) = stack.iter().position(|&v| v == node) {
            stack.truncate(pos + 1);
        } else {
            stack.push(node);
        }
    }
    stack
}

/// Dump the topology in dot format at debug level.
pub fn draw(graph: &Topology) {
    log::debug!("{:?}", Dot::with_config(graph, &[]));
}

///
/// Dump the topology with the aggregate flow of a solution on each edge
///
pub fn draw_with_flow(graph: &Topology, sol_dict: &SolutionMap) {
    let flows = edge_flows(&[sol_dict]);
    for e in graph.edge_references() {
        let key = (e.source().index(), e.target().index());
        log::debug!(
            "{:?} {} flow={}",
            key,
            e.weight(),
            flows.get(&key).copied().unwrap_or(0.0)
        );
    }
}
