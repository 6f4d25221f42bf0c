//! # `Topology` and `Problem`
//!
//! `Topology` is a DiGraph whose edge is `Link`. Nodes are identified by
//! their index (`NodeIndex::index()`), which is what commodities, paths and
//! solution maps refer to.
//!
//! `Problem` bundles a topology with a traffic matrix turned into a list of
//! commodities `(k, (s, t, d))`.
//!
use super::error::{Result, TeError};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path as FsPath;

/// Directed edge `(u, v)` named by its endpoint node ids.
pub type EdgeKey = (usize, usize);

/// Edge attribute of the topology.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    /// capacity of the link; never negative
    pub capacity: f64,
}

impl Link {
    pub fn new(capacity: f64) -> Link {
        Link {
            capacity: capacity.max(0.0),
        }
    }
}

impl std::fmt::Display for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[0,{}]", self.capacity)
    }
}

/// Topology definition
pub type Topology = DiGraph<(), Link>;

///
/// Build a topology with `num_nodes` nodes from `(u, v, capacity)` triples.
///
/// If `bidirectional` is set, every triple also adds the reverse edge with the
/// same capacity, which is how undirected topologies are represented.
///
pub fn topology_from_links(
    num_nodes: usize,
    links: &[(usize, usize, f64)],
    bidirectional: bool,
) -> Result<Topology> {
    let mut graph = Topology::with_capacity(num_nodes, links.len() * 2);
    for _ in 0..num_nodes {
        graph.add_node(());
    }
    for &(u, v, capacity) in links {
        for &(a, b) in [(u, v), (v, u)].iter().take(if bidirectional { 2 } else { 1 }) {
            if a >= num_nodes {
                return Err(TeError::UnknownNode(a));
            }
            if b >= num_nodes {
                return Err(TeError::UnknownNode(b));
            }
            let (na, nb) = (NodeIndex::new(a), NodeIndex::new(b));
            match graph.find_edge(na, nb) {
                Some(e) => graph[e] = Link::new(capacity),
                None => {
                    graph.add_edge(na, nb, Link::new(capacity));
                }
            }
        }
    }
    Ok(graph)
}

/// Capacity of the edge `(u, v)`, `None` if the edge does not exist.
pub fn capacity_of(graph: &Topology, (u, v): EdgeKey) -> Option<f64> {
    if u >= graph.node_count() || v >= graph.node_count() {
        return None;
    }
    graph
        .find_edge(NodeIndex::new(u), NodeIndex::new(v))
        .map(|e| graph[e].capacity)
}

/// A demand `d` to be routed from `src` to `dst`, keyed by `k`.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commodity {
    pub k: usize,
    pub src: usize,
    pub dst: usize,
    pub demand: f64,
}

/// Metadata of the traffic matrix a problem was generated from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrafficMatrixInfo {
    pub seed: u64,
    pub model: String,
    pub scale_factor: f64,
}

#[derive(Debug, Clone)]
pub struct Problem {
    /// topology name; part of the path cache key
    pub name: String,
    pub graph: Topology,
    pub commodity_list: Vec<Commodity>,
    pub traffic_matrix: TrafficMatrixInfo,
}

impl Problem {
    ///
    /// Create a problem from explicit `(src, dst, demand)` triples.
    /// Commodity keys are assigned in the given order.
    ///
    pub fn new(name: &str, graph: Topology, demands: &[(usize, usize, f64)]) -> Result<Problem> {
        let mut commodity_list = Vec::with_capacity(demands.len());
        for (k, &(src, dst, demand)) in demands.iter().enumerate() {
            for node in [src, dst] {
                if node >= graph.node_count() {
                    return Err(TeError::UnknownNode(node));
                }
            }
            if !(demand >= 0.0) {
                return Err(TeError::InvalidConfig(format!(
                    "commodity {} has negative demand {}",
                    k, demand
                )));
            }
            commodity_list.push(Commodity {
                k,
                src,
                dst,
                demand,
            });
        }
        Ok(Problem {
            name: name.to_string(),
            graph,
            commodity_list,
            traffic_matrix: TrafficMatrixInfo::default(),
        })
    }

    ///
    /// Create a problem from a dense `n x n` traffic matrix. Every ordered pair
    /// `s != t` becomes a commodity, including zero-demand pairs.
    ///
    pub fn from_traffic_matrix(
        name: &str,
        graph: Topology,
        matrix: &[Vec<f64>],
        info: TrafficMatrixInfo,
    ) -> Result<Problem> {
        let n = graph.node_count();
        if matrix.len() != n || matrix.iter().any(|row| row.len() != n) {
            return Err(TeError::InvalidConfig(format!(
                "traffic matrix must be {}x{}",
                n, n
            )));
        }
        let demands: Vec<(usize, usize, f64)> = (0..n)
            .flat_map(|s| (0..n).filter(move |&t| t != s).map(move |t| (s, t)))
            .map(|(s, t)| (s, t, matrix[s][t]))
            .collect();
        let mut problem = Problem::new(name, graph, &demands)?;
        problem.traffic_matrix = info;
        Ok(problem)
    }

    ///
    /// Load a problem from a node-link JSON topology and a JSON traffic matrix.
    /// The problem is named after the topology file stem.
    ///
    pub fn from_files<P: AsRef<FsPath>, Q: AsRef<FsPath>>(
        topology_path: P,
        traffic_matrix_path: Q,
    ) -> Result<Problem> {
        let topology_path = topology_path.as_ref();
        let topo: TopologyFile = serde_json::from_slice(&std::fs::read(topology_path)?)?;
        let tm: TrafficMatrixFile = serde_json::from_slice(&std::fs::read(traffic_matrix_path)?)?;

        let mut ids: Vec<usize> = topo.nodes.iter().map(|n| n.id).collect();
        ids.sort_unstable();
        if ids.iter().enumerate().any(|(i, &id)| i != id) {
            return Err(TeError::InvalidConfig(
                "node ids must be 0..n without gaps".to_string(),
            ));
        }
        let links: Vec<(usize, usize, f64)> = topo
            .links
            .iter()
            .map(|l| (l.source, l.target, l.capacity))
            .collect();
        let graph = topology_from_links(ids.len(), &links, !topo.directed)?;
        let name = topology_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let info = TrafficMatrixInfo {
            seed: tm.seed,
            model: tm.model,
            scale_factor: tm.scale_factor,
        };
        Problem::from_traffic_matrix(&name, graph, &tm.matrix, info)
    }

    /// Commodities with nonzero demand.
    pub fn sparse_commodity_list(&self) -> Vec<Commodity> {
        self.commodity_list
            .iter()
            .filter(|c| c.demand > 0.0)
            .copied()
            .collect()
    }

    pub fn total_demand(&self) -> f64 {
        self.commodity_list.iter().map(|c| c.demand).sum()
    }

    /// Position of every edge in the graph's edge order.
    pub fn edge_idx(&self) -> HashMap<EdgeKey, usize> {
        self.graph
            .edge_references()
            .map(|e| ((e.source().index(), e.target().index()), e.id().index()))
            .collect()
    }

    /// Commodity with key `k`.
    pub fn commodity(&self, k: usize) -> Option<&Commodity> {
        // keys are positional unless the problem is a partition
        match self.commodity_list.get(k) {
            Some(c) if c.k == k => Some(c),
            _ => self.commodity_list.iter().find(|c| c.k == k),
        }
    }

    /// True if every ordered node pair has a commodity.
    pub fn is_traffic_matrix_full(&self) -> bool {
        let n = self.graph.node_count();
        self.commodity_list.len() == n * n.saturating_sub(1)
    }

    ///
    /// A copy of this problem restricted to `keys`, with every edge capacity
    /// multiplied by `share`. Commodity keys are preserved.
    ///
    pub fn sub_problem(&self, keys: &[usize], share: f64) -> Problem {
        let graph = self
            .graph
            .map(|_, _| (), |_, link| Link::new(link.capacity * share));
        let commodity_list = keys
            .iter()
            .filter_map(|&k| self.commodity(k).copied())
            .collect();
        Problem {
            name: self.name.clone(),
            graph,
            commodity_list,
            traffic_matrix: self.traffic_matrix.clone(),
        }
    }
}

//
// file formats
//

#[derive(Deserialize)]
struct TopologyFile {
    #[serde(default)]
    directed: bool,
    nodes: Vec<NodeRecord>,
    links: Vec<LinkRecord>,
}

#[derive(Deserialize)]
struct NodeRecord {
    id: usize,
}

#[derive(Deserialize)]
struct LinkRecord {
    source: usize,
    target: usize,
    capacity: f64,
}

#[derive(Deserialize)]
struct TrafficMatrixFile {
    #[serde(default)]
    seed: u64,
    #[serde(default)]
    model: String,
    #[serde(default)]
    scale_factor: f64,
    matrix: Vec<Vec<f64>>,
}
