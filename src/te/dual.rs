//! Dual subgradient solver
//!
//! Solver-free approximation of the path flow allocation. Capacity and
//! demand constraints are relaxed into multipliers
//! * `mu`   per edge
//! * `nu`   per site, i.e. per (source, destination) pair
//! * `beta` per path
//!
//! which are moved by projected subgradient steps for a fixed number of
//! rounds. Each round is a pure transition `DualState -> DualState`.
//!
//! All capacities and demands are divided by `normalization` before the
//! iteration and multiplied back when reporting flows.
//!
use super::error::{Result, TeError};
use super::path_index::PathIndex;
use super::paths::{read_paths_from_store_or_compute, DistMetric, PathParams};
use super::problem::{capacity_of, EdgeKey, Problem, Topology};
use super::store::ArtifactStore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const MU_SNAPSHOT_KEY: &str = "mu.json";
pub const NU_SNAPSHOT_KEY: &str = "nu.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DualConfig {
    pub num_paths: usize,
    pub edge_disjoint: bool,
    pub dist_metric: DistMetric,
    /// number of rounds; there is no early exit
    pub max_rounds: usize,
    /// target utilization of every edge
    pub eta: f64,
    pub normalization: f64,
    pub mu_init: f64,
    pub nu_init: f64,
    pub beta_init: f64,
    /// flow limit of a path that crosses no edge
    pub flow_default_bottleneck: f64,
}

impl Default for DualConfig {
    fn default() -> Self {
        DualConfig {
            num_paths: 4,
            edge_disjoint: true,
            dist_metric: DistMetric::InvCap,
            max_rounds: 20000,
            eta: 1.0,
            normalization: 1000.0,
            mu_init: 100.0,
            nu_init: 10.0,
            beta_init: 10.0,
            flow_default_bottleneck: 1e7,
        }
    }
}

impl DualConfig {
    fn validate(&self) -> Result<()> {
        if self.num_paths == 0 {
            return Err(TeError::InvalidConfig("num_paths must be >= 1".to_string()));
        }
        if !(self.normalization > 0.0) {
            return Err(TeError::InvalidConfig(
                "normalization must be positive".to_string(),
            ));
        }
        if self.mu_init < 0.0 || self.nu_init < 0.0 || self.beta_init < 0.0 {
            return Err(TeError::InvalidConfig(
                "initial multipliers must be nonnegative".to_string(),
            ));
        }
        Ok(())
    }
}

///
/// Multiplier map. Keys never written read as `default`.
///
#[derive(Debug, Clone, PartialEq)]
pub struct Multipliers<K: Ord> {
    values: BTreeMap<K, f64>,
    default: f64,
}

impl<K: Ord + Copy> Multipliers<K> {
    pub fn new(default: f64) -> Multipliers<K> {
        Multipliers {
            values: BTreeMap::new(),
            default,
        }
    }
    /// value of `key`, or the default if it was never set
    pub fn get(&self, key: &K) -> f64 {
        self.values.get(key).copied().unwrap_or(self.default)
    }
    pub fn set(&mut self, key: K, value: f64) {
        self.values.insert(key, value);
    }
    pub fn default_value(&self) -> f64 {
        self.default
    }
    pub fn iter(&self) -> impl Iterator<Item = (&K, &f64)> {
        self.values.iter()
    }
    pub fn len(&self) -> usize {
        self.values.len()
    }
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Multipliers<(usize, usize)> {
    /// `{ u: { v: value } }`, the layout of the multiplier snapshots
    pub fn to_nested(&self) -> BTreeMap<usize, BTreeMap<usize, f64>> {
        let mut nested: BTreeMap<usize, BTreeMap<usize, f64>> = BTreeMap::new();
        for (&(u, v), &x) in self.values.iter() {
            nested.entry(u).or_default().insert(v, x);
        }
        nested
    }
}

///
/// Step size of round `round` (1-based): large first steps, then capped.
///
pub fn step_size(round: usize) -> f64 {
    (0.5 / round.clamp(1, 10) as f64).min(0.009)
}

///
/// Normalized, index-addressed view of a problem used by the iteration.
///
#[derive(Debug, Clone)]
pub struct DualNetwork {
    /// edges used by at least one path
    edges: Vec<EdgeKey>,
    edge_capacity: Vec<f64>,
    edge_paths: Vec<Vec<usize>>,
    sites: Vec<(usize, usize)>,
    site_demand: Vec<f64>,
    site_paths: Vec<Vec<usize>>,
    path_edges: Vec<Vec<EdgeKey>>,
    path_site: Vec<(usize, usize)>,
    path_bottleneck: Vec<f64>,
    /// normalized demand of the commodity owning each path
    path_demand: Vec<f64>,
    eta: f64,
}

impl DualNetwork {
    pub fn new(graph: &Topology, index: &PathIndex, config: &DualConfig) -> DualNetwork {
        let normalization = config.normalization;
        let edges: Vec<EdgeKey> = index.edge_paths().keys().copied().collect();
        let edge_capacity: Vec<f64> = edges
            .iter()
            .map(|&e| capacity_of(graph, e).unwrap_or(0.0) / normalization)
            .collect();
        let edge_paths: Vec<Vec<usize>> = index.edge_paths().values().cloned().collect();

        let mut site_pos: BTreeMap<(usize, usize), usize> = BTreeMap::new();
        let mut sites = Vec::new();
        let mut site_demand = Vec::new();
        let mut site_paths: Vec<Vec<usize>> = Vec::new();
        let mut path_site = vec![(0, 0); index.num_paths()];
        let mut path_demand = vec![0.0; index.num_paths()];
        for cp in index.commodities() {
            let site = (cp.commodity.src, cp.commodity.dst);
            let pos = *site_pos.entry(site).or_insert_with(|| {
                sites.push(site);
                site_demand.push(0.0);
                site_paths.push(Vec::new());
                sites.len() - 1
            });
            // commodities sharing a site add up
            site_demand[pos] += cp.commodity.demand / normalization;
            site_paths[pos].extend(cp.path_ids.iter().copied());
            for &p in cp.path_ids.iter() {
                path_site[p] = site;
                path_demand[p] = cp.commodity.demand / normalization;
            }
        }

        let path_edges: Vec<Vec<EdgeKey>> = (0..index.num_paths())
            .map(|p| index.path_edges(p).to_vec())
            .collect();
        let path_bottleneck: Vec<f64> = (0..index.num_paths())
            .map(|p| match index.bottleneck(graph, p) {
                Some(c) => c / normalization,
                None => config.flow_default_bottleneck,
            })
            .collect();

        DualNetwork {
            edges,
            edge_capacity,
            edge_paths,
            sites,
            site_demand,
            site_paths,
            path_edges,
            path_site,
            path_bottleneck,
            path_demand,
            eta: config.eta,
        }
    }

    pub fn num_paths(&self) -> usize {
        self.path_edges.len()
    }

    ///
    /// State before the first round: every path carries its commodity's
    /// demand, multipliers sit at their initial values.
    ///
    pub fn initial_state(&self, config: &DualConfig) -> DualState {
        DualState {
            round: 0,
            mu: Multipliers::new(config.mu_init),
            nu: Multipliers::new(config.nu_init),
            beta: Multipliers::new(config.beta_init),
            flows: self.path_demand.clone(),
            avg_flows: vec![0.0; self.num_paths()],
        }
    }

    ///
    /// One round: edge, site and path multiplier updates, then flow
    /// recomputation from the new multipliers.
    ///
    pub fn step(&self, state: &DualState) -> DualState {
        let round = state.round + 1;
        let eps = step_size(round);
        let x_old = &state.flows;

        let mut mu = Multipliers::new(state.mu.default_value());
        for (i, &edge) in self.edges.iter().enumerate() {
            let load: f64 = self.edge_paths[i].iter().map(|&p| x_old[p]).sum();
            let target = self.eta * self.edge_capacity[i];
            mu.set(edge, (state.mu.get(&edge) + eps * (load - target)).max(0.0));
        }

        let mut nu = Multipliers::new(state.nu.default_value());
        for (i, &site) in self.sites.iter().enumerate() {
            let routed: f64 = self.site_paths[i].iter().map(|&p| x_old[p]).sum();
            nu.set(
                site,
                (state.nu.get(&site) + eps * (self.site_demand[i] - routed)).max(0.0),
            );
        }

        // kept as state only; the allocation below does not read it
        let mut beta = Multipliers::new(state.beta.default_value());
        for (p, &x) in x_old.iter().enumerate() {
            beta.set(p, (state.beta.get(&p) - eps * x).max(0.0));
        }

        let mut flows = Vec::with_capacity(self.num_paths());
        let mut avg_flows = Vec::with_capacity(self.num_paths());
        for p in 0..self.num_paths() {
            let sum_mu: f64 = self.path_edges[p].iter().map(|e| mu.get(e)).sum();
            let denominator = sum_mu - nu.get(&self.path_site[p]);
            let max_allocation = self.path_bottleneck[p];
            let x = if denominator <= 0.0 {
                max_allocation
            } else {
                (1.0 / denominator).min(max_allocation)
            };
            let avg = state.avg_flows[p];
            flows.push(x);
            avg_flows.push(avg + (x - avg) / round as f64);
        }

        DualState {
            round,
            mu,
            nu,
            beta,
            flows,
            avg_flows,
        }
    }
}

/// Multipliers and flows after `round` rounds, in normalized units.
#[derive(Debug, Clone, PartialEq)]
pub struct DualState {
    pub round: usize,
    pub mu: Multipliers<EdgeKey>,
    pub nu: Multipliers<(usize, usize)>,
    pub beta: Multipliers<usize>,
    pub flows: Vec<f64>,
    /// running mean of `flows` over rounds
    pub avg_flows: Vec<f64>,
}

#[derive(Debug, Clone)]
pub struct DualSolution {
    pub rounds: usize,
    /// last-round flow of each path, denormalized
    pub path_flows: Vec<f64>,
    /// mean flow of each path over all rounds, denormalized
    pub avg_path_flows: Vec<f64>,
    pub mu: Multipliers<EdgeKey>,
    pub nu: Multipliers<(usize, usize)>,
    pub beta: Multipliers<usize>,
    pub index: PathIndex,
    pub runtime: Duration,
}

impl DualSolution {
    /// Sum of the averaged path flows.
    pub fn total_avg_flow(&self) -> f64 {
        self.avg_path_flows.iter().sum()
    }

    ///
    /// Persist the final edge and site multipliers as `{u: {v: value}}` maps.
    ///
    pub fn save_multipliers(&self, store: &dyn ArtifactStore) -> Result<()> {
        store.put(
            MU_SNAPSHOT_KEY,
            &serde_json::to_vec_pretty(&self.mu.to_nested())?,
        )?;
        store.put(
            NU_SNAPSHOT_KEY,
            &serde_json::to_vec_pretty(&self.nu.to_nested())?,
        )?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct DualSolver {
    config: DualConfig,
    store: Option<Arc<dyn ArtifactStore>>,
}

impl std::fmt::Debug for DualSolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DualSolver")
            .field("config", &self.config)
            .field("cached", &self.store.is_some())
            .finish()
    }
}

impl DualSolver {
    pub fn new(config: DualConfig) -> Result<DualSolver> {
        config.validate()?;
        Ok(DualSolver {
            config,
            store: None,
        })
    }

    /// Cache path sets in `store` and write multiplier snapshots to it.
    pub fn with_store(mut self, store: Arc<dyn ArtifactStore>) -> DualSolver {
        self.store = Some(store);
        self
    }

    pub fn config(&self) -> &DualConfig {
        &self.config
    }

    pub fn solve(&self, problem: &Problem) -> Result<DualSolution> {
        let params = PathParams {
            num_paths: self.config.num_paths,
            edge_disjoint: self.config.edge_disjoint,
            dist_metric: self.config.dist_metric,
        };
        let paths = read_paths_from_store_or_compute(self.store.as_deref(), problem, &params)?;
        let index = PathIndex::build(&problem.commodity_list, &paths);
        let net = DualNetwork::new(&problem.graph, &index, &self.config);

        let start = Instant::now();
        let mut state = net.initial_state(&self.config);
        let norm = self.config.normalization;
        while state.round < self.config.max_rounds {
            state = net.step(&state);
            if log::log_enabled!(log::Level::Trace) {
                let total: f64 = state.flows.iter().map(|x| x * norm).sum();
                let log_utility: f64 = state.flows.iter().map(|x| (x * norm).ln()).sum();
                log::trace!(
                    "round {}: utility={} total={} flows={:?}",
                    state.round,
                    log_utility,
                    total,
                    state.flows
                );
            }
        }
        let runtime = start.elapsed();

        let solution = DualSolution {
            rounds: state.round,
            path_flows: state.flows.iter().map(|x| x * norm).collect(),
            avg_path_flows: state.avg_flows.iter().map(|x| x * norm).collect(),
            mu: state.mu,
            nu: state.nu,
            beta: state.beta,
            index,
            runtime,
        };
        log::info!(
            "dual on {}: {} rounds, total averaged flow {}, runtime {:?}",
            problem.name,
            solution.rounds,
            solution.total_avg_flow(),
            runtime
        );
        if let Some(store) = self.store.as_deref() {
            solution.save_multipliers(store)?;
        }
        Ok(solution)
    }
}

#[cfg(test)]
mod tests {
    use super::super::formulation::PathFormulation;
    use super::super::mocks;
    use super::super::solver::MicrolpSolver;
    use super::super::store::MemoryStore;
    use super::*;

    fn line_config() -> DualConfig {
        DualConfig {
            num_paths: 1,
            edge_disjoint: false,
            ..DualConfig::default()
        }
    }

    fn line_network(demand: f64, config: &DualConfig) -> DualNetwork {
        let problem = mocks::mock_line_problem(demand);
        let paths = super::super::paths::generate_paths(
            &problem.graph,
            &PathParams {
                num_paths: 1,
                edge_disjoint: false,
                dist_metric: DistMetric::InvCap,
            },
        )
        .unwrap();
        let index = PathIndex::build(&problem.commodity_list, &paths);
        DualNetwork::new(&problem.graph, &index, config)
    }

    #[test]
    fn multipliers_default_for_absent_keys() {
        let mut m: Multipliers<(usize, usize)> = Multipliers::new(100.0);
        assert_eq!(m.get(&(0, 1)), 100.0);
        m.set((0, 1), 3.0);
        m.set((0, 2), 4.0);
        m.set((1, 2), 5.0);
        assert_eq!(m.get(&(0, 1)), 3.0);
        let nested = m.to_nested();
        assert_eq!(nested[&0][&2], 4.0);
        assert_eq!(nested[&1][&2], 5.0);
    }

    #[test]
    fn step_size_schedule() {
        assert_eq!(step_size(1), 0.009);
        assert_eq!(step_size(10), 0.009);
        assert_eq!(step_size(20000), 0.009);
    }

    #[test]
    fn single_step() {
        let config = line_config();
        let net = line_network(5.0, &config);
        let s0 = net.initial_state(&config);
        assert_eq!(s0.flows, vec![0.005]);
        let s1 = net.step(&s0);
        assert_eq!(s1.round, 1);
        let eps = 0.009;
        let mu = 100.0 + eps * (0.005 - 0.01);
        assert!((s1.mu.get(&(0, 1)) - mu).abs() < 1e-12);
        assert!((s1.mu.get(&(1, 2)) - mu).abs() < 1e-12);
        assert!((s1.nu.get(&(0, 2)) - 10.0).abs() < 1e-12);
        assert!((s1.beta.get(&0) - (10.0 - eps * 0.005)).abs() < 1e-12);
        let x = 1.0 / (2.0 * mu - 10.0);
        assert!((s1.flows[0] - x).abs() < 1e-12);
        assert!((s1.avg_flows[0] - x).abs() < 1e-12);
        // the input state is untouched
        assert_eq!(s0.round, 0);
        assert!(s0.mu.is_empty());
    }

    #[test]
    fn nonpositive_denominator_routes_bottleneck() {
        let config = DualConfig {
            mu_init: 0.0,
            ..line_config()
        };
        let net = line_network(5.0, &config);
        let s1 = net.step(&net.initial_state(&config));
        // mu clamps at zero, nu stays 10: denominator is negative
        assert_eq!(s1.mu.get(&(0, 1)), 0.0);
        assert_eq!(s1.flows[0], 0.01);
    }

    #[test]
    fn multipliers_stay_nonnegative() {
        let config = DualConfig {
            mu_init: 0.001,
            nu_init: 0.0,
            beta_init: 0.0,
            ..line_config()
        };
        let net = line_network(5.0, &config);
        let mut state = net.initial_state(&config);
        for _ in 0..200 {
            state = net.step(&state);
            assert!(state.mu.iter().all(|(_, &v)| v >= 0.0));
            assert!(state.nu.iter().all(|(_, &v)| v >= 0.0));
            assert!(state.beta.iter().all(|(_, &v)| v >= 0.0));
            assert!(state.flows.iter().all(|&x| (0.0..=0.01).contains(&x)));
        }
    }

    #[test]
    fn saturated_line_converges_to_bottleneck() {
        // demand above the bottleneck: both methods saturate the line
        let problem = mocks::mock_line_problem(15.0);
        let lp = PathFormulation::new_total_flow(1, false, DistMetric::InvCap)
            .unwrap()
            .solve(&problem, &MicrolpSolver)
            .unwrap();
        let config = DualConfig {
            normalization: 1.0,
            ..line_config()
        };
        let dual = DualSolver::new(config).unwrap().solve(&problem).unwrap();
        assert_eq!(dual.rounds, 20000);
        assert!((dual.path_flows[0] - lp.obj_val).abs() < 1e-9);
        let rel = (dual.avg_path_flows[0] - lp.obj_val).abs() / lp.obj_val;
        assert!(rel < 0.05, "averaged flow {} vs {}", dual.avg_path_flows[0], lp.obj_val);
    }

    #[test]
    fn scenario_d_line_within_capacity() {
        let problem = mocks::mock_line_problem(5.0);
        let lp = PathFormulation::new_total_flow(1, false, DistMetric::InvCap)
            .unwrap()
            .solve(&problem, &MicrolpSolver)
            .unwrap();
        assert!((lp.obj_val - 5.0).abs() < 1e-6);

        // default multipliers start with 2*mu - nu = 190, above the 200 that
        // routes exactly the demand, and mu keeps sinking while the line is
        // unsaturated: the mean ends about 5.7% over the demand
        let dual = DualSolver::new(line_config()).unwrap().solve(&problem).unwrap();
        let avg = dual.avg_path_flows[0];
        assert!(avg > lp.obj_val && avg < 5.35, "averaged flow {}", avg);
        assert!(dual.path_flows[0] > avg && dual.path_flows[0] < 10.0);

        // mu_init = 105 starts on the demand: both flows within 1%
        let config = DualConfig {
            mu_init: 105.0,
            ..line_config()
        };
        let dual = DualSolver::new(config).unwrap().solve(&problem).unwrap();
        let rel = (dual.avg_path_flows[0] - lp.obj_val).abs() / lp.obj_val;
        assert!(rel < 0.01, "averaged flow {}", dual.avg_path_flows[0]);
        let rel = (dual.path_flows[0] - lp.obj_val).abs() / lp.obj_val;
        assert!(rel < 0.02, "last flow {}", dual.path_flows[0]);
    }

    #[test]
    fn multiplier_snapshots_are_written() {
        let problem = mocks::mock_line_problem(5.0);
        let store = Arc::new(MemoryStore::new());
        let config = DualConfig {
            max_rounds: 50,
            ..line_config()
        };
        let solver = DualSolver::new(config).unwrap().with_store(store.clone());
        let sol = solver.solve(&problem).unwrap();
        assert_eq!(sol.rounds, 50);
        let mu: BTreeMap<String, BTreeMap<String, f64>> =
            serde_json::from_slice(&store.get(MU_SNAPSHOT_KEY).unwrap().unwrap()).unwrap();
        let nu: BTreeMap<String, BTreeMap<String, f64>> =
            serde_json::from_slice(&store.get(NU_SNAPSHOT_KEY).unwrap().unwrap()).unwrap();
        assert!((mu["0"]["1"] - sol.mu.get(&(0, 1))).abs() < 1e-9);
        assert!((mu["1"]["2"] - sol.mu.get(&(1, 2))).abs() < 1e-9);
        assert!((nu["0"]["2"] - sol.nu.get(&(0, 2))).abs() < 1e-9);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = DualConfig {
            normalization: 0.0,
            ..DualConfig::default()
        };
        assert!(matches!(
            DualSolver::new(config),
            Err(TeError::InvalidConfig(_))
        ));
    }
}
