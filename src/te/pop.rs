//! POP: partitioned optimization
//!
//! The commodity list is split into `num_subproblems` groups. Every group is
//! solved as an independent path formulation LP over a copy of the topology
//! whose capacities are scaled by the group's capacity share, and the
//! per-group solution maps are merged.
//!
//! Shares of all groups add up to one, so the merged allocation never
//! exceeds a physical edge capacity.
//!
use super::error::{Result, TeError};
use super::formulation::{PathFormConfig, PathFormSolution, PathFormulation};
use super::problem::{Commodity, Problem};
use super::solution::SolutionMap;
use super::solver::{num_cores, LpSolver};
use super::store::ArtifactStore;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitMethod {
    /// seeded shuffle, then round robin
    Random,
    /// demand-sorted round robin; partitions get similar mean demand
    Means,
    /// all commodities of a source stay together
    Tailored,
    /// partition `i` receives a share of commodities proportional to `2^-i`
    Skewed,
    /// largest demand first into the least loaded partition
    Covs,
}

impl std::fmt::Display for SplitMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let s = match self {
            SplitMethod::Random => "random",
            SplitMethod::Means => "means",
            SplitMethod::Tailored => "tailored",
            SplitMethod::Skewed => "skewed",
            SplitMethod::Covs => "covs",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for SplitMethod {
    type Err = TeError;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "random" => Ok(SplitMethod::Random),
            "means" => Ok(SplitMethod::Means),
            "tailored" => Ok(SplitMethod::Tailored),
            "skewed" => Ok(SplitMethod::Skewed),
            "covs" => Ok(SplitMethod::Covs),
            _ => Err(TeError::InvalidSplitMethod(s.to_string())),
        }
    }
}

/// Index of the partition with the smallest load.
fn least_loaded(loads: &[f64]) -> usize {
    let mut best = 0;
    for (i, &l) in loads.iter().enumerate() {
        if l < loads[best] {
            best = i;
        }
    }
    best
}

///
/// Assign every commodity to exactly one of `n` partitions.
/// Returns the commodity keys of each partition; some may be empty.
///
pub fn split_commodities(
    commodities: &[Commodity],
    n: usize,
    method: SplitMethod,
    seed: u64,
) -> Vec<Vec<usize>> {
    let n = n.max(1);
    let mut partitions: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut by_demand: Vec<&Commodity> = commodities.iter().collect();
    by_demand.sort_by(|a, b| b.demand.total_cmp(&a.demand).then(a.k.cmp(&b.k)));

    match method {
        SplitMethod::Random => {
            let mut keys: Vec<usize> = commodities.iter().map(|c| c.k).collect();
            keys.shuffle(&mut StdRng::seed_from_u64(seed));
            for (i, k) in keys.into_iter().enumerate() {
                partitions[i % n].push(k);
            }
        }
        SplitMethod::Means => {
            for (i, c) in by_demand.iter().enumerate() {
                partitions[i % n].push(c.k);
            }
        }
        SplitMethod::Covs => {
            let mut loads = vec![0.0; n];
            for c in by_demand.iter() {
                let p = least_loaded(&loads);
                loads[p] += c.demand;
                partitions[p].push(c.k);
            }
        }
        SplitMethod::Tailored => {
            let mut groups: BTreeMap<usize, (f64, Vec<usize>)> = BTreeMap::new();
            for c in commodities {
                let g = groups.entry(c.src).or_insert((0.0, Vec::new()));
                g.0 += c.demand;
                g.1.push(c.k);
            }
            let mut groups: Vec<(f64, Vec<usize>)> = groups.into_values().collect();
            groups.sort_by(|a, b| b.0.total_cmp(&a.0));
            let mut loads = vec![0.0; n];
            for (demand, keys) in groups {
                let p = least_loaded(&loads);
                loads[p] += demand;
                partitions[p].extend(keys);
            }
        }
        SplitMethod::Skewed => {
            let mut keys: Vec<usize> = commodities.iter().map(|c| c.k).collect();
            keys.shuffle(&mut StdRng::seed_from_u64(seed));
            let weights: Vec<f64> = (0..n).map(|i| 0.5f64.powi(i as i32)).collect();
            let total: f64 = weights.iter().sum();
            let cumulative: Vec<f64> = weights
                .iter()
                .scan(0.0, |acc, w| {
                    *acc += w / total;
                    Some(*acc)
                })
                .collect();
            let m = keys.len() as f64;
            for (j, k) in keys.into_iter().enumerate() {
                let pos = (j as f64 + 0.5) / m;
                let p = cumulative.iter().position(|&c| pos <= c).unwrap_or(n - 1);
                partitions[p].push(k);
            }
        }
    }
    partitions
}

///
/// Fraction of every edge capacity given to each partition:
/// `(1 - split_fraction) / n + split_fraction * D_p / D`.
///
pub fn capacity_shares(
    problem: &Problem,
    partitions: &[Vec<usize>],
    split_fraction: f64,
) -> Vec<f64> {
    let n = partitions.len().max(1) as f64;
    let total = problem.total_demand();
    partitions
        .iter()
        .map(|keys| {
            let demand_share = if total > 0.0 {
                keys.iter()
                    .filter_map(|&k| problem.commodity(k))
                    .map(|c| c.demand)
                    .sum::<f64>()
                    / total
            } else {
                1.0 / n
            };
            (1.0 - split_fraction) / n + split_fraction * demand_share
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopConfig {
    pub num_subproblems: usize,
    pub split_method: SplitMethod,
    /// 0: even capacity split, 1: proportional to partition demand
    pub split_fraction: f64,
    pub seed: u64,
    /// solve partitions on the rayon pool
    pub parallel: bool,
    pub path_form: PathFormConfig,
}

impl Default for PopConfig {
    fn default() -> Self {
        PopConfig {
            num_subproblems: 4,
            split_method: SplitMethod::Random,
            split_fraction: 0.0,
            seed: 0,
            parallel: false,
            path_form: PathFormConfig::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PopSolution {
    /// merged map; every commodity of the problem has an entry
    pub sol_dict: SolutionMap,
    pub obj_val: f64,
    /// commodity keys of each partition
    pub partitions: Vec<Vec<usize>>,
    pub capacity_shares: Vec<f64>,
    /// objective value of each solved partition, empty ones excluded
    pub sub_obj_vals: Vec<f64>,
    /// solver runtime of each solved partition
    pub runtimes: Vec<Duration>,
}

impl PopSolution {
    /// Sum of partition runtimes, as if solved one after another.
    pub fn runtime(&self) -> Duration {
        self.runtimes.iter().sum()
    }

    ///
    /// Makespan of scheduling the partition runtimes, longest first, onto
    /// `num_cores` workers.
    ///
    pub fn runtime_est(&self, num_cores: usize) -> Duration {
        let mut runtimes = self.runtimes.clone();
        runtimes.sort_unstable_by(|a, b| b.cmp(a));
        let mut workers = vec![Duration::ZERO; num_cores.max(1)];
        for r in runtimes {
            if let Some(w) = workers.iter_mut().min() {
                *w += r;
            }
        }
        workers.into_iter().max().unwrap_or_default()
    }
}

#[derive(Clone)]
pub struct Pop {
    config: PopConfig,
    formulation: PathFormulation,
}

impl std::fmt::Debug for Pop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pop").field("config", &self.config).finish()
    }
}

impl Pop {
    pub fn new(config: PopConfig) -> Result<Pop> {
        if config.num_subproblems == 0 {
            return Err(TeError::InvalidConfig(
                "num_subproblems must be >= 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&config.split_fraction) {
            return Err(TeError::InvalidConfig(format!(
                "split_fraction {} is outside [0, 1]",
                config.split_fraction
            )));
        }
        let mut formulation = PathFormulation::new(config.path_form.clone())?;
        if config.parallel {
            formulation =
                formulation.with_num_threads(num_cores() / config.num_subproblems);
        }
        Ok(Pop {
            config,
            formulation,
        })
    }

    /// Cache path sets in `store`.
    pub fn with_store(mut self, store: Arc<dyn ArtifactStore>) -> Pop {
        self.formulation = self.formulation.with_store(store);
        self
    }

    pub fn config(&self) -> &PopConfig {
        &self.config
    }

    pub fn split(&self, problem: &Problem) -> Vec<Vec<usize>> {
        split_commodities(
            &problem.commodity_list,
            self.config.num_subproblems,
            self.config.split_method,
            self.config.seed,
        )
    }

    pub fn solve(&self, problem: &Problem, solver: &dyn LpSolver) -> Result<PopSolution> {
        let partitions = self.split(problem);
        let shares = capacity_shares(problem, &partitions, self.config.split_fraction);
        // capacity scaling never changes path choice
        let paths = self.formulation.get_paths(problem)?;

        let jobs: Vec<(usize, Problem)> = partitions
            .iter()
            .zip(shares.iter())
            .enumerate()
            .filter(|(_, (keys, _))| !keys.is_empty())
            .map(|(i, (keys, &share))| (i, problem.sub_problem(keys, share)))
            .collect();
        log::info!(
            "POP on {}: {} split into {} partitions, {} non-empty",
            problem.name,
            self.config.split_method,
            partitions.len(),
            jobs.len()
        );

        let run = |(i, sub): &(usize, Problem)| -> Result<PathFormSolution> {
            log::debug!(
                "partition {}: {} commodities, capacity share {}",
                i,
                sub.commodity_list.len(),
                shares[*i]
            );
            self.formulation.solve_with_paths(sub, &paths, solver, &[])
        };
        let sub_solutions: Vec<PathFormSolution> = if self.config.parallel {
            jobs.par_iter().map(run).collect::<Result<_>>()?
        } else {
            jobs.iter().map(run).collect::<Result<_>>()?
        };

        let mut sol_dict = SolutionMap::new();
        for sub in sub_solutions.iter() {
            for (&k, allocation) in sub.sol_dict.iter() {
                sol_dict.entry(k).or_default().extend(allocation.iter().copied());
            }
        }
        for c in problem.commodity_list.iter() {
            sol_dict.entry(c.k).or_default();
        }

        let sub_obj_vals: Vec<f64> = sub_solutions.iter().map(|s| s.obj_val).collect();
        let obj_val = self
            .config
            .path_form
            .objective
            .combine(sub_obj_vals.iter().copied());
        let runtimes: Vec<Duration> = sub_solutions.iter().map(|s| s.runtime).collect();
        log::info!("POP on {}: obj_val={}", problem.name, obj_val);

        Ok(PopSolution {
            sol_dict,
            obj_val,
            partitions,
            capacity_shares: shares,
            sub_obj_vals,
            runtimes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::formulation::Objective;
    use super::super::mocks;
    use super::super::solution::check_feasibility;
    use super::super::solver::MicrolpSolver;
    use super::*;

    const METHODS: [SplitMethod; 5] = [
        SplitMethod::Random,
        SplitMethod::Means,
        SplitMethod::Tailored,
        SplitMethod::Skewed,
        SplitMethod::Covs,
    ];

    fn config(n: usize, method: SplitMethod, split_fraction: f64) -> PopConfig {
        PopConfig {
            num_subproblems: n,
            split_method: method,
            split_fraction,
            seed: 1,
            parallel: false,
            path_form: PathFormConfig {
                num_paths: 2,
                edge_disjoint: false,
                ..PathFormConfig::default()
            },
        }
    }

    #[test]
    fn split_method_names() {
        for m in METHODS {
            assert_eq!(m.to_string().parse::<SplitMethod>().unwrap(), m);
        }
        assert!(matches!(
            "kmeans".parse::<SplitMethod>(),
            Err(TeError::InvalidSplitMethod(_))
        ));
    }

    #[test]
    fn every_commodity_in_exactly_one_partition() {
        let problem = mocks::mock_diamond_problem();
        for m in METHODS {
            let partitions = split_commodities(&problem.commodity_list, 3, m, 7);
            assert_eq!(partitions.len(), 3);
            let mut keys: Vec<usize> = partitions.into_iter().flatten().collect();
            keys.sort_unstable();
            let expected: Vec<usize> = (0..problem.commodity_list.len()).collect();
            assert_eq!(keys, expected, "{}", m);
        }
    }

    #[test]
    fn split_policies() {
        let problem = mocks::mock_diamond_problem();
        // same source, same partition
        let tailored = split_commodities(&problem.commodity_list, 2, SplitMethod::Tailored, 0);
        for part in tailored.iter() {
            let srcs: Vec<usize> = part
                .iter()
                .map(|&k| problem.commodity(k).unwrap().src)
                .collect();
            for s in srcs.iter() {
                assert!(tailored
                    .iter()
                    .filter(|p| p.iter().any(|&k| problem.commodity(k).unwrap().src == *s))
                    .count()
                    == 1);
            }
        }
        // the first partition is the largest
        let skewed = split_commodities(&problem.commodity_list, 3, SplitMethod::Skewed, 0);
        assert!(skewed[0].len() > skewed[1].len());
        assert!(skewed[1].len() >= skewed[2].len());
        // same seed, same split
        assert_eq!(
            split_commodities(&problem.commodity_list, 3, SplitMethod::Random, 5),
            split_commodities(&problem.commodity_list, 3, SplitMethod::Random, 5)
        );
    }

    #[test]
    fn capacity_shares_sum_to_one() {
        let problem = mocks::mock_diamond_problem();
        let partitions = split_commodities(&problem.commodity_list, 4, SplitMethod::Skewed, 3);
        for sf in [0.0, 0.25, 0.5, 1.0] {
            let shares = capacity_shares(&problem, &partitions, sf);
            assert!((shares.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        }
        let even = capacity_shares(&problem, &partitions, 0.0);
        assert!(even.iter().all(|&s| (s - 0.25).abs() < 1e-12));
    }

    #[test]
    fn merged_solution_is_feasible() {
        let problem = mocks::mock_ring_problem(6, 3.0);
        for m in METHODS {
            for sf in [0.0, 1.0] {
                let sol = Pop::new(config(3, m, sf))
                    .unwrap()
                    .solve(&problem, &MicrolpSolver)
                    .unwrap();
                assert_eq!(sol.sol_dict.len(), problem.commodity_list.len());
                assert!(check_feasibility(&problem, &[&sol.sol_dict]).is_ok(), "{}", m);
                assert!(sol.obj_val > 0.0);
            }
        }
    }

    #[test]
    fn single_partition_matches_full_lp() {
        let problem = mocks::mock_two_lines_problem();
        let sol = Pop::new(config(1, SplitMethod::Means, 0.5))
            .unwrap()
            .solve(&problem, &MicrolpSolver)
            .unwrap();
        assert!((sol.obj_val - 11.0).abs() < 1e-6);
        assert_eq!(sol.capacity_shares, vec![1.0]);
    }

    #[test]
    fn pop_never_beats_full_lp() {
        let problem = mocks::mock_ring_problem(5, 4.0);
        let full = PathFormulation::new(config(1, SplitMethod::Random, 0.0).path_form)
            .unwrap()
            .solve(&problem, &MicrolpSolver)
            .unwrap();
        let pop = Pop::new(config(2, SplitMethod::Covs, 0.5))
            .unwrap()
            .solve(&problem, &MicrolpSolver)
            .unwrap();
        assert!(pop.obj_val <= full.obj_val + 1e-6);
    }

    #[test]
    fn parallel_matches_sequential() {
        let problem = mocks::mock_diamond_problem();
        let mut c = config(3, SplitMethod::Means, 0.5);
        c.path_form.objective = Objective::MaxConcurrentFlow;
        let seq = Pop::new(c.clone()).unwrap().solve(&problem, &MicrolpSolver).unwrap();
        c.parallel = true;
        let par = Pop::new(c).unwrap().solve(&problem, &MicrolpSolver).unwrap();
        assert!((seq.obj_val - par.obj_val).abs() < 1e-6);
        assert_eq!(seq.partitions, par.partitions);
    }

    #[test]
    fn more_partitions_than_commodities() {
        let problem = mocks::mock_two_lines_problem();
        let sol = Pop::new(config(4, SplitMethod::Random, 0.0))
            .unwrap()
            .solve(&problem, &MicrolpSolver)
            .unwrap();
        assert_eq!(sol.sub_obj_vals.len(), 2);
        assert!(check_feasibility(&problem, &[&sol.sol_dict]).is_ok());
    }

    #[test]
    fn runtime_est_schedules_longest_first() {
        let ms = Duration::from_millis;
        let sol = PopSolution {
            sol_dict: SolutionMap::new(),
            obj_val: 0.0,
            partitions: Vec::new(),
            capacity_shares: Vec::new(),
            sub_obj_vals: Vec::new(),
            runtimes: vec![ms(1), ms(3), ms(2), ms(2)],
        };
        assert_eq!(sol.runtime(), ms(8));
        assert_eq!(sol.runtime_est(1), ms(8));
        assert_eq!(sol.runtime_est(2), ms(4));
        assert_eq!(sol.runtime_est(8), ms(3));
        assert_eq!(sol.runtime_est(0), ms(8));
    }

    #[test]
    fn invalid_config_fails_fast() {
        assert!(matches!(
            Pop::new(config(0, SplitMethod::Random, 0.0)),
            Err(TeError::InvalidConfig(_))
        ));
        assert!(matches!(
            Pop::new(config(2, SplitMethod::Random, 1.5)),
            Err(TeError::InvalidConfig(_))
        ));
    }
}
