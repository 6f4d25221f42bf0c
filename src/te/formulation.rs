//! Path formulation
//!
//! One continuous flow variable per candidate path, plus one auxiliary scalar
//! for the objectives that need it:
//!
//! | objective                     | aux       | sense | demand rows      |
//! | ----------------------------- | --------- | ----- | ---------------- |
//! | `TotalFlow`                   |           | max   | `sum f <= d`     |
//! | `MaxConcurrentFlow`           | a in [0,1]| max   | `d*a <= sum f <= d` |
//! | `MinMaxLinkUtil`              | z in [0,1]| min   | `sum f == d`     |
//! | `ComputeDemandScaleFactor`    | z >= 0    | min   | `sum f == d`     |
//!
use super::error::{Result, TeError};
use super::model::{CmpOp, LpModel, Sense, VarId};
use super::path_index::PathIndex;
use super::paths::{read_paths_from_store_or_compute, DistMetric, PathParams, PathSet};
use super::problem::{Commodity, Problem, Topology};
use super::solution::{sol_mat, SolutionMap};
use super::solver::{num_cores, LpSolver};
use super::store::ArtifactStore;
use super::utils::draw_with_flow;
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Lower bound fraction enforced by a flow cap
pub const SAT_FLOW_FRACTION: f64 = 0.99;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Objective {
    TotalFlow,
    MaxConcurrentFlow,
    MinMaxLinkUtil,
    ComputeDemandScaleFactor,
}

/// Adds the objective specific variables and rows to a model that already
/// holds the path variables.
type ConstraintBuilder = fn(&mut LpModel, &Topology, &PathIndex, &[VarId]) -> Option<VarId>;

impl Objective {
    pub fn sense(&self) -> Sense {
        match self {
            Objective::TotalFlow | Objective::MaxConcurrentFlow => Sense::Maximize,
            Objective::MinMaxLinkUtil | Objective::ComputeDemandScaleFactor => Sense::Minimize,
        }
    }

    fn constraint_builder(&self) -> ConstraintBuilder {
        match self {
            Objective::TotalFlow => total_flow_rows,
            Objective::MaxConcurrentFlow => max_concurrent_flow_rows,
            Objective::MinMaxLinkUtil => min_max_link_util_rows,
            Objective::ComputeDemandScaleFactor => demand_scale_factor_rows,
        }
    }

    ///
    /// Combine objective values of independent subproblems into one value:
    /// total flows add up, the concurrent fraction is limited by the worst
    /// subproblem and utilizations by the most loaded one.
    ///
    pub fn combine<I: IntoIterator<Item = f64>>(&self, values: I) -> f64 {
        let values = values.into_iter();
        match self {
            Objective::TotalFlow => values.sum(),
            Objective::MaxConcurrentFlow => values.reduce(f64::min).unwrap_or(0.0),
            Objective::MinMaxLinkUtil | Objective::ComputeDemandScaleFactor => {
                values.reduce(f64::max).unwrap_or(0.0)
            }
        }
    }
}

impl std::fmt::Display for Objective {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let s = match self {
            Objective::TotalFlow => "total_flow",
            Objective::MaxConcurrentFlow => "max_concurrent_flow",
            Objective::MinMaxLinkUtil => "min_max_link_util",
            Objective::ComputeDemandScaleFactor => "compute_demand_scale_factor",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for Objective {
    type Err = TeError;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "total_flow" => Ok(Objective::TotalFlow),
            "max_concurrent_flow" => Ok(Objective::MaxConcurrentFlow),
            "min_max_link_util" => Ok(Objective::MinMaxLinkUtil),
            "compute_demand_scale_factor" => Ok(Objective::ComputeDemandScaleFactor),
            _ => Err(TeError::InvalidObjective(s.to_string())),
        }
    }
}

/// Pin a group of commodities to at least 99% of a previously found flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SatFlow {
    pub commodities: Vec<usize>,
    pub flow: f64,
}

//
// per objective rows
//

fn path_sum(vars: &[VarId], path_ids: &[usize]) -> Vec<(VarId, f64)> {
    path_ids.iter().map(|&p| (vars[p], 1.0)).collect()
}

fn capacity_rows(model: &mut LpModel, graph: &Topology, index: &PathIndex, vars: &[VarId]) {
    for e in graph.edge_references() {
        let paths = index.paths_on_edge((e.source().index(), e.target().index()));
        if !paths.is_empty() {
            model.add_constraint(path_sum(vars, paths), CmpOp::Le, e.weight().capacity);
        }
    }
}

fn demand_rows(model: &mut LpModel, index: &PathIndex, vars: &[VarId], op: CmpOp) {
    for cp in index.commodities() {
        model.add_constraint(path_sum(vars, &cp.path_ids), op, cp.commodity.demand);
    }
}

fn total_flow_rows(
    model: &mut LpModel,
    graph: &Topology,
    index: &PathIndex,
    vars: &[VarId],
) -> Option<VarId> {
    for &v in vars {
        model.vars[v.0].obj = 1.0;
    }
    capacity_rows(model, graph, index, vars);
    demand_rows(model, index, vars, CmpOp::Le);
    None
}

fn max_concurrent_flow_rows(
    model: &mut LpModel,
    graph: &Topology,
    index: &PathIndex,
    vars: &[VarId],
) -> Option<VarId> {
    let alpha = model.add_var("a".to_string(), 1.0, (0.0, 1.0));
    for cp in index.commodities() {
        // sum f >= alpha * d
        let mut terms = path_sum(vars, &cp.path_ids);
        terms.push((alpha, -cp.commodity.demand));
        model.add_constraint(terms, CmpOp::Ge, 0.0);
    }
    capacity_rows(model, graph, index, vars);
    demand_rows(model, index, vars, CmpOp::Le);
    Some(alpha)
}

fn link_util_rows(
    model: &mut LpModel,
    graph: &Topology,
    index: &PathIndex,
    vars: &[VarId],
    z_bounds: (f64, f64),
) -> Option<VarId> {
    let z = model.add_var("z".to_string(), 1.0, z_bounds);
    for e in graph.edge_references() {
        let paths = index.paths_on_edge((e.source().index(), e.target().index()));
        if paths.is_empty() {
            continue;
        }
        let capacity = e.weight().capacity;
        let mut terms = path_sum(vars, paths);
        if capacity > 0.0 {
            // sum f / c <= z
            terms.push((z, -capacity));
        }
        model.add_constraint(terms, CmpOp::Le, 0.0);
    }
    demand_rows(model, index, vars, CmpOp::Eq);
    Some(z)
}

fn min_max_link_util_rows(
    model: &mut LpModel,
    graph: &Topology,
    index: &PathIndex,
    vars: &[VarId],
) -> Option<VarId> {
    link_util_rows(model, graph, index, vars, (0.0, 1.0))
}

fn demand_scale_factor_rows(
    model: &mut LpModel,
    graph: &Topology,
    index: &PathIndex,
    vars: &[VarId],
) -> Option<VarId> {
    // max link util can exceed 1.0
    link_util_rows(model, graph, index, vars, (0.0, f64::INFINITY))
}

/// A built path LP and the variables it is made of.
#[derive(Debug, Clone)]
pub struct PathLp {
    pub model: LpModel,
    /// flow variable of each path id
    pub path_vars: Vec<VarId>,
    /// `a` or `z`, depending on the objective
    pub aux: Option<VarId>,
}

///
/// Construct the path LP of `objective` over the paths in `index`.
///
pub fn build_path_lp(
    graph: &Topology,
    index: &PathIndex,
    objective: Objective,
    sat_flows: &[SatFlow],
) -> Result<PathLp> {
    log::debug!("Constructing Path LP, {} objective", objective);
    let mut model = LpModel::new("max-flow: path formulation", objective.sense());
    let path_vars: Vec<VarId> = (0..index.num_paths())
        .map(|p| model.add_var(format!("f[{}]", p), 0.0, (0.0, f64::INFINITY)))
        .collect();

    let aux = (objective.constraint_builder())(&mut model, graph, index, &path_vars);

    // flow cap rows
    let commodity_paths: HashMap<usize, &[usize]> = index
        .commodities()
        .iter()
        .map(|cp| (cp.commodity.k, cp.path_ids.as_slice()))
        .collect();
    for sat in sat_flows {
        let mut terms = Vec::new();
        for k in sat.commodities.iter() {
            let paths = commodity_paths.get(k).ok_or_else(|| {
                TeError::InvalidConfig(format!("flow cap on unknown commodity {}", k))
            })?;
            terms.extend(path_sum(&path_vars, paths));
        }
        model.add_constraint(terms, CmpOp::Ge, SAT_FLOW_FRACTION * sat.flow);
    }

    log::trace!("{}", model);
    Ok(PathLp {
        model,
        path_vars,
        aux,
    })
}

//
// PathFormulation
//

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathFormConfig {
    pub objective: Objective,
    pub num_paths: usize,
    pub edge_disjoint: bool,
    pub dist_metric: DistMetric,
    /// only build rows for nonzero-demand commodities
    #[serde(default)]
    pub sparse_commodities: bool,
}

impl Default for PathFormConfig {
    fn default() -> Self {
        PathFormConfig {
            objective: Objective::TotalFlow,
            num_paths: 4,
            edge_disjoint: true,
            dist_metric: DistMetric::InvCap,
            sparse_commodities: false,
        }
    }
}

impl PathFormConfig {
    ///
    /// Parse a config from the string names used on command lines.
    ///
    pub fn parse(
        objective: &str,
        num_paths: usize,
        edge_disjoint: bool,
        dist_metric: &str,
    ) -> Result<PathFormConfig> {
        Ok(PathFormConfig {
            objective: objective.parse()?,
            num_paths,
            edge_disjoint,
            dist_metric: dist_metric.parse()?,
            sparse_commodities: false,
        })
    }

    pub fn path_params(&self) -> PathParams {
        PathParams {
            num_paths: self.num_paths,
            edge_disjoint: self.edge_disjoint,
            dist_metric: self.dist_metric,
        }
    }
}

/// Result of one path formulation solve.
#[derive(Debug, Clone)]
pub struct PathFormSolution {
    pub sol_dict: SolutionMap,
    pub obj_val: f64,
    pub runtime: Duration,
    /// flow of each path id of `index`
    pub path_flows: Vec<f64>,
    pub index: PathIndex,
}

impl PathFormSolution {
    pub fn sol_mat(&self, problem: &Problem) -> Vec<Vec<f64>> {
        sol_mat(problem, &self.sol_dict)
    }
}

///
/// Build `sol_dict` from path flows. Commodities of `problem` with no flow
/// map to an empty list.
///
pub fn extract_sol_dict(problem: &Problem, index: &PathIndex, path_flows: &[f64]) -> SolutionMap {
    let mut sol_dict: SolutionMap = problem
        .commodity_list
        .iter()
        .map(|c| (c.k, Vec::new()))
        .collect();
    for (p, &x) in path_flows.iter().enumerate() {
        if x > 0.0 {
            sol_dict
                .entry(index.commodity_of(p))
                .or_default()
                .extend(index.path_edges(p).iter().map(|&e| (e, x)));
        }
    }
    sol_dict
}

#[derive(Clone)]
pub struct PathFormulation {
    config: PathFormConfig,
    store: Option<Arc<dyn ArtifactStore>>,
    num_threads: usize,
}

impl std::fmt::Debug for PathFormulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PathFormulation")
            .field("config", &self.config)
            .field("cached", &self.store.is_some())
            .field("num_threads", &self.num_threads)
            .finish()
    }
}

impl PathFormulation {
    pub fn new(config: PathFormConfig) -> Result<PathFormulation> {
        if config.num_paths == 0 {
            return Err(TeError::InvalidConfig("num_paths must be >= 1".to_string()));
        }
        Ok(PathFormulation {
            config,
            store: None,
            num_threads: num_cores(),
        })
    }

    pub fn for_objective(
        objective: Objective,
        num_paths: usize,
        edge_disjoint: bool,
        dist_metric: DistMetric,
    ) -> Result<PathFormulation> {
        PathFormulation::new(PathFormConfig {
            objective,
            num_paths,
            edge_disjoint,
            dist_metric,
            sparse_commodities: false,
        })
    }

    pub fn new_total_flow(
        num_paths: usize,
        edge_disjoint: bool,
        dist_metric: DistMetric,
    ) -> Result<PathFormulation> {
        Self::for_objective(Objective::TotalFlow, num_paths, edge_disjoint, dist_metric)
    }

    pub fn new_max_concurrent_flow(
        num_paths: usize,
        edge_disjoint: bool,
        dist_metric: DistMetric,
    ) -> Result<PathFormulation> {
        Self::for_objective(
            Objective::MaxConcurrentFlow,
            num_paths,
            edge_disjoint,
            dist_metric,
        )
    }

    pub fn new_min_max_link_util(
        num_paths: usize,
        edge_disjoint: bool,
        dist_metric: DistMetric,
    ) -> Result<PathFormulation> {
        Self::for_objective(
            Objective::MinMaxLinkUtil,
            num_paths,
            edge_disjoint,
            dist_metric,
        )
    }

    pub fn compute_demand_scale_factor(
        num_paths: usize,
        edge_disjoint: bool,
        dist_metric: DistMetric,
    ) -> Result<PathFormulation> {
        Self::for_objective(
            Objective::ComputeDemandScaleFactor,
            num_paths,
            edge_disjoint,
            dist_metric,
        )
    }

    /// Cache path sets in `store`.
    pub fn with_store(mut self, store: Arc<dyn ArtifactStore>) -> PathFormulation {
        self.store = Some(store);
        self
    }

    pub fn with_num_threads(mut self, num_threads: usize) -> PathFormulation {
        self.num_threads = num_threads.max(1);
        self
    }

    pub fn config(&self) -> &PathFormConfig {
        &self.config
    }

    pub fn get_paths(&self, problem: &Problem) -> Result<PathSet> {
        read_paths_from_store_or_compute(self.store.as_deref(), problem, &self.config.path_params())
    }

    fn commodity_list(&self, problem: &Problem) -> Vec<Commodity> {
        if self.config.sparse_commodities {
            problem.sparse_commodity_list()
        } else {
            problem.commodity_list.clone()
        }
    }

    /// Index the paths of the commodities this formulation routes.
    pub fn pre_solve(&self, problem: &Problem, paths: &PathSet) -> PathIndex {
        PathIndex::build(&self.commodity_list(problem), paths)
    }

    pub fn build(
        &self,
        problem: &Problem,
        paths: &PathSet,
        sat_flows: &[SatFlow],
    ) -> Result<(PathLp, PathIndex)> {
        let index = self.pre_solve(problem, paths);
        let lp = build_path_lp(&problem.graph, &index, self.config.objective, sat_flows)?;
        Ok((lp, index))
    }

    pub fn solve(&self, problem: &Problem, solver: &dyn LpSolver) -> Result<PathFormSolution> {
        let paths = self.get_paths(problem)?;
        self.solve_with_paths(problem, &paths, solver, &[])
    }

    ///
    /// Solve over a precomputed path set, optionally pinning flows.
    ///
    pub fn solve_with_paths(
        &self,
        problem: &Problem,
        paths: &PathSet,
        solver: &dyn LpSolver,
        sat_flows: &[SatFlow],
    ) -> Result<PathFormSolution> {
        let (lp, index) = self.build(problem, paths, sat_flows)?;
        let solution = solver.solve(&lp.model, self.num_threads)?;
        let path_flows: Vec<f64> = lp
            .path_vars
            .iter()
            .map(|v| solution.values[v.0].max(0.0))
            .collect();
        let sol_dict = extract_sol_dict(problem, &index, &path_flows);
        draw_with_flow(&problem.graph, &sol_dict);
        log::info!(
            "{} on {}: obj_val={} runtime={:?}",
            self.config.objective,
            problem.name,
            solution.objective,
            solution.runtime
        );
        Ok(PathFormSolution {
            sol_dict,
            obj_val: solution.objective,
            runtime: solution.runtime,
            path_flows,
            index,
        })
    }

    ///
    /// Total and per-node maximum forwarding entries of this formulation's
    /// path set. Needs a full traffic matrix.
    ///
    pub fn fib_entries(&self, problem: &Problem) -> Result<(usize, usize)> {
        if !problem.is_traffic_matrix_full() {
            return Err(TeError::InvalidConfig(
                "fib entries need a full traffic matrix".to_string(),
            ));
        }
        let paths = self.get_paths(problem)?;
        PathIndex::build(&problem.commodity_list, &paths).fib_entries()
    }
}
