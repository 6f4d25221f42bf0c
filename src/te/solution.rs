//! Solution definitions
//! - SolutionMap
//! - feasibility checks
//!
use super::error::{Result, TeError};
use super::problem::{capacity_of, EdgeKey, Problem};
use std::collections::{BTreeMap, HashMap};
use std::path::Path as FsPath;

/// Solution map: commodity key -> `(edge, flow)` pairs of every path carrying
/// flow for that commodity. Every commodity of the problem has an entry,
/// possibly empty.
pub type SolutionMap = BTreeMap<usize, Vec<(EdgeKey, f64)>>;

/// Absolute tolerance of the feasibility checks, scaled by the bound.
pub const FEASIBILITY_EPS: f64 = 1e-6;

fn tol(bound: f64) -> f64 {
    FEASIBILITY_EPS * bound.abs().max(1.0)
}

/// Aggregate flow on every edge over all solution maps.
pub fn edge_flows(sol_dicts: &[&SolutionMap]) -> HashMap<EdgeKey, f64> {
    let mut flows: HashMap<EdgeKey, f64> = HashMap::new();
    for sol_dict in sol_dicts {
        for allocation in sol_dict.values() {
            for &(edge, flow) in allocation {
                *flows.entry(edge).or_insert(0.0) += flow;
            }
        }
    }
    flows
}

///
/// Net flow out of `node` in one commodity's allocation
///
fn net_outflow(allocation: &[(EdgeKey, f64)], node: usize) -> f64 {
    allocation
        .iter()
        .map(|&((u, v), f)| {
            if u == node {
                f
            } else if v == node {
                -f
            } else {
                0.0
            }
        })
        .sum()
}

/// Flow delivered for one commodity: net outflow at its source.
pub fn commodity_flow(allocation: &[(EdgeKey, f64)], src: usize) -> f64 {
    net_outflow(allocation, src)
}

///
/// Check if the edges of every allocation exist in the topology
///
pub fn is_defined_on_topology(problem: &Problem, sol_dict: &SolutionMap) -> bool {
    sol_dict
        .values()
        .flatten()
        .all(|&(e, f)| f >= -tol(0.0) && capacity_of(&problem.graph, e).is_some())
}

///
/// For each edge, the aggregate flow over all solution maps must be within capacity.
///
pub fn is_in_capacity(problem: &Problem, sol_dicts: &[&SolutionMap]) -> bool {
    edge_flows(sol_dicts).iter().all(|(&e, &f)| match capacity_of(&problem.graph, e) {
        Some(c) => f <= c + tol(c),
        None => false,
    })
}

///
/// For each commodity, delivered flow must not exceed demand, and every node
/// other than the endpoints must forward what it receives.
///
pub fn is_satisfying_flow_constraint(problem: &Problem, sol_dict: &SolutionMap) -> bool {
    problem.commodity_list.iter().all(|c| {
        let Some(allocation) = sol_dict.get(&c.k) else {
            return true;
        };
        let delivered = commodity_flow(allocation, c.src);
        let mut nodes: Vec<usize> = allocation.iter().flat_map(|&((u, v), _)| [u, v]).collect();
        nodes.sort_unstable();
        nodes.dedup();
        delivered <= c.demand + tol(c.demand)
            && nodes
                .iter()
                .filter(|&&n| n != c.src && n != c.dst)
                .all(|&n| net_outflow(allocation, n).abs() <= tol(c.demand))
    })
}

///
/// Validate the combined solution maps against the true topology.
///
pub fn check_feasibility(problem: &Problem, sol_dicts: &[&SolutionMap]) -> Result<()> {
    for sol_dict in sol_dicts {
        if !is_defined_on_topology(problem, sol_dict) {
            return Err(TeError::Infeasible(
                "allocation on an edge outside the topology or negative flow".to_string(),
            ));
        }
        if !is_satisfying_flow_constraint(problem, sol_dict) {
            return Err(TeError::Infeasible(
                "commodity exceeds its demand or breaks flow conservation".to_string(),
            ));
        }
    }
    if !is_in_capacity(problem, sol_dicts) {
        return Err(TeError::Infeasible("edge capacity exceeded".to_string()));
    }
    Ok(())
}

///
/// Dense `edge x commodity` matrix of flows, rows in `problem.edge_idx()`
/// order, columns in commodity list order.
///
pub fn sol_mat(problem: &Problem, sol_dict: &SolutionMap) -> Vec<Vec<f64>> {
    let edge_idx = problem.edge_idx();
    let mut mat = vec![vec![0.0; problem.commodity_list.len()]; edge_idx.len()];
    for (col, c) in problem.commodity_list.iter().enumerate() {
        for &(e, f) in sol_dict.get(&c.k).map(|a| a.as_slice()).unwrap_or(&[]) {
            if let Some(&row) = edge_idx.get(&e) {
                mat[row][col] += f;
            }
        }
    }
    mat
}

/// Write a solution map snapshot as JSON.
pub fn save_sol_dict<P: AsRef<FsPath>>(sol_dict: &SolutionMap, path: P) -> Result<()> {
    let file = std::fs::File::create(path)?;
    serde_json::to_writer(std::io::BufWriter::new(file), sol_dict)?;
    Ok(())
}

/// Read a solution map snapshot written by `save_sol_dict`.
pub fn load_sol_dict<P: AsRef<FsPath>>(path: P) -> Result<SolutionMap> {
    let blob = std::fs::read(path)?;
    Ok(serde_json::from_slice(&blob)?)
}

//
// tests
//
#[cfg(test)]
mod tests {
    use super::super::mocks::mock_line_problem;
    use super::*;

    #[test]
    fn feasibility_tests() {
        let p = mock_line_problem(5.0);

        // this is a valid allocation
        let mut s1 = SolutionMap::new();
        s1.insert(0, vec![((0, 1), 5.0), ((1, 2), 5.0)]);
        assert!(check_feasibility(&p, &[&s1]).is_ok());

        // this one overs the demand
        let mut s2 = SolutionMap::new();
        s2.insert(0, vec![((0, 1), 8.0), ((1, 2), 8.0)]);
        assert!(is_in_capacity(&p, &[&s2]));
        assert!(!is_satisfying_flow_constraint(&p, &s2));
        assert!(check_feasibility(&p, &[&s2]).is_err());

        // two maps jointly overs the capacity
        assert!(!is_in_capacity(&p, &[&s1, &s1, &s1]));
        assert!(check_feasibility(&p, &[&s1, &s1, &s1]).is_err());

        // flow is lost at node 1
        let mut s3 = SolutionMap::new();
        s3.insert(0, vec![((0, 1), 5.0), ((1, 2), 2.0)]);
        assert!(!is_satisfying_flow_constraint(&p, &s3));

        // unknown edge
        let mut s4 = SolutionMap::new();
        s4.insert(0, vec![((0, 2), 1.0)]);
        assert!(!is_defined_on_topology(&p, &s4));
    }

    #[test]
    fn sol_mat_and_snapshot() {
        let p = mock_line_problem(5.0);
        let mut s = SolutionMap::new();
        s.insert(0, vec![((0, 1), 5.0), ((1, 2), 5.0)]);
        let mat = sol_mat(&p, &s);
        let idx = p.edge_idx();
        assert_eq!(mat[idx[&(0, 1)]][0], 5.0);
        assert_eq!(mat[idx[&(1, 0)]][0], 0.0);

        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("sol.json");
        save_sol_dict(&s, &file).unwrap();
        assert_eq!(load_sol_dict(&file).unwrap(), s);
    }
}
