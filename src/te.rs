pub mod dual;
pub mod error;
pub mod formulation;
pub mod mocks;
pub mod model;
pub mod path_index;
pub mod paths;
pub mod pop;
pub mod problem;
pub mod solution;
pub mod solver;
pub mod store;
pub mod utils;

pub use dual::{DualConfig, DualSolution, DualSolver};
pub use error::{Result, SolverError, TeError};
pub use formulation::{Objective, PathFormConfig, PathFormSolution, PathFormulation};
pub use paths::{DistMetric, PathSet};
pub use pop::{Pop, PopConfig, PopSolution, SplitMethod};
pub use problem::{Commodity, Problem, Topology};
pub use solution::{check_feasibility, SolutionMap};
pub use solver::{LpSolver, MicrolpSolver};
pub use store::{ArtifactStore, FsStore};

use std::sync::Arc;

//
// public functions
//

///
/// Solve the path formulation of `config` with the bundled LP solver and
/// validate the result against the topology.
///
pub fn solve_path_formulation(problem: &Problem, config: PathFormConfig) -> Result<PathFormSolution> {
    let solution = PathFormulation::new(config)?.solve(problem, &MicrolpSolver)?;
    check_feasibility(problem, &[&solution.sol_dict])?;
    Ok(solution)
}

///
/// Partition, solve and merge with the bundled LP solver; the merged
/// solution is validated against the unscaled topology.
///
pub fn solve_pop(problem: &Problem, config: PopConfig) -> Result<PopSolution> {
    let solution = Pop::new(config)?.solve(problem, &MicrolpSolver)?;
    check_feasibility(problem, &[&solution.sol_dict])?;
    Ok(solution)
}

///
/// Run the dual subgradient iteration. With a store, path sets are cached
/// there and the final multipliers are written as `mu.json` / `nu.json`.
///
pub fn solve_dual(
    problem: &Problem,
    config: DualConfig,
    store: Option<Arc<dyn ArtifactStore>>,
) -> Result<DualSolution> {
    let mut solver = DualSolver::new(config)?;
    if let Some(store) = store {
        solver = solver.with_store(store);
    }
    solver.solve(problem)
}
