//! Path generation
//! - DistMetric
//! - PathSet
//! - generate_paths, k-shortest and edge-disjoint search
//! - cached loading through an `ArtifactStore`
//!
use super::error::{Result, TeError};
use super::problem::{Link, Problem, Topology};
use super::store::ArtifactStore;
use super::utils::remove_cycles;
use petgraph::algo::astar;
use petgraph::graph::{EdgeIndex, EdgeReference, NodeIndex};
use petgraph::visit::{EdgeFiltered, EdgeRef};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Node sequence from a commodity's source to its destination.
pub type Path = Vec<usize>;

/// Edge weighting used by the path search.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DistMetric {
    /// weight 1/capacity, favours high capacity links
    #[serde(rename = "inv-cap")]
    InvCap,
    /// weight 1, favours short paths
    #[serde(rename = "min-hop")]
    MinHop,
}

impl DistMetric {
    ///
    /// Weight of the link under this metric. Zero capacity links are
    /// unusable under `InvCap` and get an infinite weight.
    ///
    pub fn weight(&self, link: &Link) -> f64 {
        match self {
            DistMetric::InvCap => {
                if link.capacity > 0.0 {
                    1.0 / link.capacity
                } else {
                    f64::INFINITY
                }
            }
            DistMetric::MinHop => 1.0,
        }
    }
}

impl std::fmt::Display for DistMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            DistMetric::InvCap => write!(f, "inv-cap"),
            DistMetric::MinHop => write!(f, "min-hop"),
        }
    }
}

impl std::str::FromStr for DistMetric {
    type Err = TeError;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "inv-cap" => Ok(DistMetric::InvCap),
            "min-hop" => Ok(DistMetric::MinHop),
            _ => Err(TeError::InvalidDistMetric(s.to_string())),
        }
    }
}

///
/// Up to K paths for every ordered node pair.
///
/// Pairs without any path are either absent or map to an empty list; both
/// read back as an empty slice.
///
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<PathEntry>", into = "Vec<PathEntry>")]
pub struct PathSet(BTreeMap<(usize, usize), Vec<Path>>);

#[derive(Serialize, Deserialize)]
struct PathEntry {
    src: usize,
    dst: usize,
    paths: Vec<Path>,
}

impl From<Vec<PathEntry>> for PathSet {
    fn from(entries: Vec<PathEntry>) -> PathSet {
        PathSet(
            entries
                .into_iter()
                .map(|e| ((e.src, e.dst), e.paths))
                .collect(),
        )
    }
}

impl From<PathSet> for Vec<PathEntry> {
    fn from(set: PathSet) -> Vec<PathEntry> {
        set.0
            .into_iter()
            .map(|((src, dst), paths)| PathEntry { src, dst, paths })
            .collect()
    }
}

impl PathSet {
    pub fn new() -> PathSet {
        PathSet::default()
    }
    pub fn get(&self, src: usize, dst: usize) -> &[Path] {
        self.0.get(&(src, dst)).map(|p| p.as_slice()).unwrap_or(&[])
    }
    pub fn insert(&mut self, src: usize, dst: usize, paths: Vec<Path>) {
        self.0.insert((src, dst), paths);
    }
    /// number of node pairs
    pub fn len(&self) -> usize {
        self.0.len()
    }
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
    pub fn iter(&self) -> impl Iterator<Item = (&(usize, usize), &Vec<Path>)> {
        self.0.iter()
    }
    /// Strip cycles out of every path, in place.
    pub fn remove_cycles(&mut self) {
        for paths in self.0.values_mut() {
            for path in paths.iter_mut() {
                *path = remove_cycles(path);
            }
        }
    }
}

/// Parameters identifying a path set.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PathParams {
    pub num_paths: usize,
    pub edge_disjoint: bool,
    pub dist_metric: DistMetric,
}

impl PathParams {
    /// Cache key of the path set of `topology_name` under these parameters.
    pub fn cache_key(&self, topology_name: &str) -> String {
        format!(
            "{}-{}-paths_edge-disjoint-{}_dist-metric-{}-dict.json",
            topology_name, self.num_paths, self.edge_disjoint, self.dist_metric
        )
    }
}

//
// search
//

///
/// Shortest path from `src` to `dst` avoiding `banned_edges` and never
/// entering `banned_nodes`.
///
fn shortest_path(
    graph: &Topology,
    weights: &[f64],
    src: NodeIndex,
    dst: NodeIndex,
    banned_edges: &HashSet<EdgeIndex>,
    banned_nodes: &HashSet<NodeIndex>,
) -> Option<(f64, Vec<NodeIndex>)> {
    let filtered = EdgeFiltered::from_fn(graph, |e: EdgeReference<'_, Link>| {
        weights[e.id().index()].is_finite()
            && !banned_edges.contains(&e.id())
            && !banned_nodes.contains(&e.target())
    });
    astar(
        &filtered,
        src,
        |n| n == dst,
        |e| weights[e.id().index()],
        |_| 0.0,
    )
}

fn path_weight(graph: &Topology, weights: &[f64], path: &[NodeIndex]) -> f64 {
    path.windows(2)
        .map(|w| match graph.find_edge(w[0], w[1]) {
            Some(e) => weights[e.index()],
            None => f64::INFINITY,
        })
        .sum()
}

///
/// Yen's algorithm: up to `k` loopless paths in increasing weight.
///
fn k_shortest_paths(
    graph: &Topology,
    weights: &[f64],
    src: NodeIndex,
    dst: NodeIndex,
    k: usize,
) -> Vec<Vec<NodeIndex>> {
    let no_edges = HashSet::new();
    let no_nodes = HashSet::new();
    let mut found: Vec<Vec<NodeIndex>> =
        match shortest_path(graph, weights, src, dst, &no_edges, &no_nodes) {
            Some((_, path)) => vec![path],
            None => return Vec::new(),
        };
    let mut candidates: Vec<(f64, Vec<NodeIndex>)> = Vec::new();

    while found.len() < k {
        let prev = &found[found.len() - 1];
        for i in 0..prev.len() - 1 {
            let spur = prev[i];
            let root = &prev[..=i];

            let banned_edges: HashSet<EdgeIndex> = found
                .iter()
                .filter(|p| p.len() > i + 1 && &p[..=i] == root)
                .filter_map(|p| graph.find_edge(p[i], p[i + 1]))
                .collect();
            let banned_nodes: HashSet<NodeIndex> = root[..i].iter().copied().collect();

            if let Some((_, spur_path)) =
                shortest_path(graph, weights, spur, dst, &banned_edges, &banned_nodes)
            {
                let mut total = root[..i].to_vec();
                total.extend(spur_path);
                if !found.contains(&total) && !candidates.iter().any(|(_, p)| p == &total) {
                    candidates.push((path_weight(graph, weights, &total), total));
                }
            }
        }

        // lightest candidate, ties broken by hop count
        let best = candidates
            .iter()
            .enumerate()
            .min_by(|(_, (wa, pa)), (_, (wb, pb))| {
                wa.total_cmp(wb).then_with(|| pa.len().cmp(&pb.len()))
            })
            .map(|(i, _)| i);
        match best {
            Some(i) => found.push(candidates.swap_remove(i).1),
            None => break,
        }
    }
    found
}

///
/// Successive shortest paths, removing the edges of each chosen path before
/// the next search. Returns fewer than `k` paths once the pair is cut.
///
fn edge_disjoint_paths(
    graph: &Topology,
    weights: &[f64],
    src: NodeIndex,
    dst: NodeIndex,
    k: usize,
) -> Vec<Vec<NodeIndex>> {
    let mut banned_edges: HashSet<EdgeIndex> = HashSet::new();
    let no_nodes = HashSet::new();
    let mut paths = Vec::new();
    while paths.len() < k {
        match shortest_path(graph, weights, src, dst, &banned_edges, &no_nodes) {
            Some((_, path)) => {
                banned_edges.extend(path.windows(2).filter_map(|w| graph.find_edge(w[0], w[1])));
                paths.push(path);
            }
            None => break,
        }
    }
    paths
}

///
/// Paths between one node pair, cycles stripped.
///
pub fn find_paths(
    graph: &Topology,
    src: usize,
    dst: usize,
    num_paths: usize,
    edge_disjoint: bool,
    dist_metric: DistMetric,
) -> Vec<Path> {
    let weights: Vec<f64> = graph
        .edge_indices()
        .map(|e| dist_metric.weight(&graph[e]))
        .collect();
    find_paths_weighted(graph, &weights, src, dst, num_paths, edge_disjoint)
}

fn find_paths_weighted(
    graph: &Topology,
    weights: &[f64],
    src: usize,
    dst: usize,
    num_paths: usize,
    edge_disjoint: bool,
) -> Vec<Path> {
    if src == dst || src >= graph.node_count() || dst >= graph.node_count() {
        return Vec::new();
    }
    let (s, t) = (NodeIndex::new(src), NodeIndex::new(dst));
    let paths = if edge_disjoint {
        edge_disjoint_paths(graph, weights, s, t, num_paths)
    } else {
        k_shortest_paths(graph, weights, s, t, num_paths)
    };
    paths
        .iter()
        .map(|p| {
            let nodes: Vec<usize> = p.iter().map(|v| v.index()).collect();
            remove_cycles(&nodes)
        })
        .collect()
}

///
/// Compute up to `num_paths` paths for every ordered node pair.
///
pub fn generate_paths(graph: &Topology, params: &PathParams) -> Result<PathSet> {
    if params.num_paths == 0 {
        return Err(TeError::InvalidConfig("num_paths must be >= 1".to_string()));
    }
    let weights: Vec<f64> = graph
        .edge_indices()
        .map(|e| params.dist_metric.weight(&graph[e]))
        .collect();
    let mut set = PathSet::new();
    for s in graph.node_indices() {
        for t in graph.node_indices() {
            if s == t {
                continue;
            }
            let paths = find_paths_weighted(
                graph,
                &weights,
                s.index(),
                t.index(),
                params.num_paths,
                params.edge_disjoint,
            );
            set.insert(s.index(), t.index(), paths);
        }
    }
    Ok(set)
}

///
/// Load the path set of `problem` from `store`, or compute and write it back.
///
/// The cache is best effort: a missing, unreadable or undecodable blob falls
/// back to computation, and a failed write is only logged.
///
pub fn read_paths_from_store_or_compute(
    store: Option<&dyn ArtifactStore>,
    problem: &Problem,
    params: &PathParams,
) -> Result<PathSet> {
    let key = params.cache_key(&problem.name);
    if let Some(store) = store {
        log::info!("Loading paths from {}", key);
        match store.get(&key) {
            Ok(Some(blob)) => match serde_json::from_slice::<PathSet>(&blob) {
                Ok(mut set) => {
                    set.remove_cycles();
                    log::info!("paths_dict size: {}", set.len());
                    return Ok(set);
                }
                Err(e) => log::warn!("Unable to decode {}: {}", key, e),
            },
            Ok(None) => log::info!("Unable to find {}", key),
            Err(e) => log::warn!("Unable to read {}: {}", key, e),
        }
    }

    let set = generate_paths(&problem.graph, params)?;
    if let Some(store) = store {
        log::info!("Saving paths to {}", key);
        let written = serde_json::to_vec(&set)
            .map_err(TeError::from)
            .and_then(|blob| store.put(&key, &blob));
        if let Err(e) = written {
            log::warn!("Unable to save {}: {}", key, e);
        }
    }
    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::super::mocks;
    use super::super::store::MemoryStore;
    use super::super::utils::path_to_edge_list;
    use super::*;

    fn is_simple(path: &[usize]) -> bool {
        let set: HashSet<&usize> = path.iter().collect();
        set.len() == path.len()
    }

    fn params(num_paths: usize, edge_disjoint: bool, dist_metric: DistMetric) -> PathParams {
        PathParams {
            num_paths,
            edge_disjoint,
            dist_metric,
        }
    }

    #[test]
    fn dist_metric_parse() {
        assert_eq!("inv-cap".parse::<DistMetric>().unwrap(), DistMetric::InvCap);
        assert_eq!("min-hop".parse::<DistMetric>().unwrap(), DistMetric::MinHop);
        assert!(matches!(
            "geo".parse::<DistMetric>(),
            Err(TeError::InvalidDistMetric(_))
        ));
    }

    #[test]
    fn line_has_single_path() {
        let g = mocks::mock_line(10.0);
        let paths = find_paths(&g, 0, 2, 3, false, DistMetric::InvCap);
        assert_eq!(paths, vec![vec![0, 1, 2]]);
    }

    #[test]
    fn k_shortest_paths_are_simple_and_ordered() {
        let g = mocks::mock_diamond();
        let paths = find_paths(&g, 0, 3, 4, false, DistMetric::MinHop);
        // 0-3 direct, then the two 2-hop detours, then the 3-hop ones
        assert_eq!(paths[0], vec![0, 3]);
        assert_eq!(paths[1].len(), 3);
        assert_eq!(paths[2].len(), 3);
        assert_eq!(paths.len(), 4);
        for p in paths.iter() {
            assert!(is_simple(p));
            assert_eq!(p[0], 0);
            assert_eq!(*p.last().unwrap(), 3);
            for (u, v) in path_to_edge_list(p) {
                assert!(g
                    .find_edge(NodeIndex::new(u), NodeIndex::new(v))
                    .is_some());
            }
        }
        let unique: HashSet<&Path> = paths.iter().collect();
        assert_eq!(unique.len(), paths.len());
    }

    #[test]
    fn inv_cap_prefers_wide_links() {
        let g = mocks::mock_diamond();
        // 0-1-3 has capacity 100, the direct 0-3 link only 1
        let paths = find_paths(&g, 0, 3, 1, false, DistMetric::InvCap);
        assert_eq!(paths, vec![vec![0, 1, 3]]);
    }

    #[test]
    fn edge_disjoint_paths_share_no_edge() {
        let g = mocks::mock_diamond();
        let paths = find_paths(&g, 0, 3, 10, true, DistMetric::MinHop);
        // node 0 has three outgoing edges, so at most three disjoint paths
        assert_eq!(paths.len(), 3);
        let mut seen = HashSet::new();
        for p in paths.iter() {
            assert!(is_simple(p));
            for e in path_to_edge_list(p) {
                assert!(seen.insert(e), "edge {:?} reused", e);
            }
        }
    }

    #[test]
    fn unreachable_pair_yields_no_paths() {
        let g = super::super::problem::topology_from_links(3, &[(0, 1, 1.0)], false).unwrap();
        assert!(find_paths(&g, 0, 2, 2, false, DistMetric::MinHop).is_empty());
        assert!(find_paths(&g, 0, 2, 2, true, DistMetric::MinHop).is_empty());
        let set = generate_paths(&g, &params(2, false, DistMetric::MinHop)).unwrap();
        assert!(set.get(0, 2).is_empty());
        assert_eq!(set.get(0, 1), &[vec![0, 1]]);
    }

    #[test]
    fn zero_num_paths_is_rejected() {
        let g = mocks::mock_line(1.0);
        assert!(matches!(
            generate_paths(&g, &params(0, false, DistMetric::MinHop)),
            Err(TeError::InvalidConfig(_))
        ));
    }

    #[test]
    fn cache_round_trip() {
        let problem = mocks::mock_diamond_problem();
        let store = MemoryStore::new();
        let p = params(2, false, DistMetric::InvCap);
        let computed = read_paths_from_store_or_compute(Some(&store), &problem, &p).unwrap();
        assert!(store.exists(&p.cache_key(&problem.name)));
        let loaded = read_paths_from_store_or_compute(Some(&store), &problem, &p).unwrap();
        assert_eq!(computed, loaded);
        assert_eq!(computed, generate_paths(&problem.graph, &p).unwrap());
    }

    #[test]
    fn corrupt_cache_falls_back_to_computation() {
        let problem = mocks::mock_diamond_problem();
        let store = MemoryStore::new();
        let p = params(2, true, DistMetric::MinHop);
        store.put(&p.cache_key(&problem.name), b"not json").unwrap();
        let set = read_paths_from_store_or_compute(Some(&store), &problem, &p).unwrap();
        assert_eq!(set, generate_paths(&problem.graph, &p).unwrap());
    }

    #[test]
    fn cached_cycles_are_stripped_on_load() {
        let problem = mocks::mock_diamond_problem();
        let store = MemoryStore::new();
        let p = params(1, false, DistMetric::MinHop);
        let mut set = PathSet::new();
        set.insert(0, 3, vec![vec![0, 1, 0, 3]]);
        store
            .put(&p.cache_key(&problem.name), &serde_json::to_vec(&set).unwrap())
            .unwrap();
        let loaded = read_paths_from_store_or_compute(Some(&store), &problem, &p).unwrap();
        assert_eq!(loaded.get(0, 3), &[vec![0, 3]]);
    }
}
