//! Path index
//!
//! Bidirectional lookup between commodities, paths and edges, built once per
//! problem instance. Path ids are dense (`0..num_paths()`) and are the
//! indices of the per-path flow variables.
//!
use super::error::{Result, TeError};
use super::paths::{Path, PathSet};
use super::problem::{capacity_of, Commodity, EdgeKey, Topology};
use super::utils::path_to_edge_list;
use std::collections::{BTreeMap, HashMap};

/// A commodity together with the ids of its candidate paths.
#[derive(Debug, Clone, PartialEq)]
pub struct CommodityPaths {
    pub commodity: Commodity,
    pub path_ids: Vec<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct PathIndex {
    paths: Vec<Path>,
    path_edges: Vec<Vec<EdgeKey>>,
    /// path id -> commodity key
    path_commodity: Vec<usize>,
    commodities: Vec<CommodityPaths>,
    edge_paths: BTreeMap<EdgeKey, Vec<usize>>,
}

impl PathIndex {
    ///
    /// Index the paths of `commodities` in commodity order.
    ///
    pub fn build(commodities: &[Commodity], path_set: &PathSet) -> PathIndex {
        let mut index = PathIndex::default();
        for c in commodities {
            let mut path_ids = Vec::new();
            for path in path_set.get(c.src, c.dst) {
                let path_id = index.paths.len();
                let edges = path_to_edge_list(path);
                for &edge in edges.iter() {
                    index.edge_paths.entry(edge).or_default().push(path_id);
                }
                index.paths.push(path.clone());
                index.path_edges.push(edges);
                index.path_commodity.push(c.k);
                path_ids.push(path_id);
            }
            index.commodities.push(CommodityPaths {
                commodity: *c,
                path_ids,
            });
        }
        debug_assert_eq!(index.paths.len(), index.path_commodity.len());
        index
    }

    pub fn num_paths(&self) -> usize {
        self.paths.len()
    }
    pub fn path(&self, path_id: usize) -> &Path {
        &self.paths[path_id]
    }
    pub fn path_edges(&self, path_id: usize) -> &[EdgeKey] {
        &self.path_edges[path_id]
    }
    /// key of the commodity owning the path
    pub fn commodity_of(&self, path_id: usize) -> usize {
        self.path_commodity[path_id]
    }
    pub fn commodities(&self) -> &[CommodityPaths] {
        &self.commodities
    }
    /// Edges used by at least one path, with the ids of those paths.
    pub fn edge_paths(&self) -> &BTreeMap<EdgeKey, Vec<usize>> {
        &self.edge_paths
    }
    pub fn paths_on_edge(&self, edge: EdgeKey) -> &[usize] {
        self.edge_paths
            .get(&edge)
            .map(|p| p.as_slice())
            .unwrap_or(&[])
    }

    ///
    /// Smallest capacity along the path, `None` for an edgeless path.
    ///
    pub fn bottleneck(&self, graph: &Topology, path_id: usize) -> Option<f64> {
        self.path_edges[path_id]
            .iter()
            .map(|&e| capacity_of(graph, e).unwrap_or(0.0))
            .reduce(f64::min)
    }

    ///
    /// Forwarding entries implied by the path set: every source stores one
    /// entry per commodity, every node on a path stores one entry per path
    /// traversing it. Returns `(total, max over nodes)`.
    ///
    pub fn fib_entries(&self) -> Result<(usize, usize)> {
        let mut fib: HashMap<usize, HashMap<String, usize>> = HashMap::new();
        for cp in self.commodities.iter() {
            let Some(&first) = cp.path_ids.first() else {
                continue;
            };
            let src = self.paths[first][0];
            fib.entry(src)
                .or_default()
                .insert(format!("k-{}", cp.commodity.k), first);
            for &path_id in cp.path_ids.iter() {
                for &(u, v) in self.path_edges[path_id].iter() {
                    let entries = fib.entry(u).or_default();
                    let key = format!("p-{}", path_id);
                    if entries.contains_key(&key) {
                        return Err(TeError::InvalidConfig(format!(
                            "path {} visits node {} twice",
                            path_id, u
                        )));
                    }
                    entries.insert(key, v);
                }
            }
        }
        let counts: Vec<usize> = fib.values().map(|e| e.len()).collect();
        Ok((
            counts.iter().sum(),
            counts.iter().copied().max().unwrap_or(0),
        ))
    }
}
