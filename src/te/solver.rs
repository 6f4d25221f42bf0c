//!
//! LP solver backends.
//!
//! The formulation builder only produces an `LpModel`; turning it into
//! variable values is delegated to an `LpSolver`.
//!
use super::error::SolverError;
use super::model::{CmpOp, LpModel, Sense};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Values returned by a successful solve.
#[derive(Debug, Clone, PartialEq)]
pub struct LpSolution {
    /// one value per model variable, in variable order
    pub values: Vec<f64>,
    pub objective: f64,
    /// wall-clock solve time
    pub runtime: Duration,
}

pub trait LpSolver: Send + Sync {
    ///
    /// Solve `model`. `num_threads` is a hint; single-threaded backends ignore it.
    ///
    fn solve(&self, model: &LpModel, num_threads: usize) -> Result<LpSolution, SolverError>;
}

/// Thread count hint derived from the available cores.
pub fn num_cores() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Pure-Rust simplex backend built on `microlp`.
#[derive(Debug, Default, Clone, Copy)]
pub struct MicrolpSolver;

impl From<microlp::Error> for SolverError {
    fn from(err: microlp::Error) -> Self {
        match err {
            microlp::Error::Infeasible => SolverError::Infeasible,
            microlp::Error::Unbounded => SolverError::Unbounded,
            other => SolverError::Internal(other.to_string()),
        }
    }
}

impl LpSolver for MicrolpSolver {
    fn solve(&self, model: &LpModel, num_threads: usize) -> Result<LpSolution, SolverError> {
        log::debug!(
            "solving {}: {} vars, {} constraints, threads hint {}",
            model.name,
            model.num_vars(),
            model.constraints.len(),
            num_threads
        );
        let start = Instant::now();
        if model.vars.is_empty() {
            // nothing to choose; only constant constraints can fail
            for c in model.constraints.iter() {
                if !c.op.holds(0.0, c.rhs, 0.0) {
                    return Err(SolverError::Infeasible);
                }
            }
            return Ok(LpSolution {
                values: Vec::new(),
                objective: 0.0,
                runtime: start.elapsed(),
            });
        }

        let direction = match model.sense {
            Sense::Minimize => microlp::OptimizationDirection::Minimize,
            Sense::Maximize => microlp::OptimizationDirection::Maximize,
        };
        let mut problem = microlp::Problem::new(direction);
        let vars: Vec<microlp::Variable> = model
            .vars
            .iter()
            .map(|v| problem.add_var(v.obj, (v.lb, v.ub)))
            .collect();

        for c in model.constraints.iter() {
            if c.terms.is_empty() {
                if !c.op.holds(0.0, c.rhs, 0.0) {
                    return Err(SolverError::Infeasible);
                }
                continue;
            }
            let op = match c.op {
                CmpOp::Le => microlp::ComparisonOp::Le,
                CmpOp::Ge => microlp::ComparisonOp::Ge,
                CmpOp::Eq => microlp::ComparisonOp::Eq,
            };
            // microlp rejects a variable appearing twice in one row
            let mut merged: BTreeMap<usize, f64> = BTreeMap::new();
            for &(v, coeff) in c.terms.iter() {
                *merged.entry(v.0).or_insert(0.0) += coeff;
            }
            let expr: Vec<(microlp::Variable, f64)> = merged
                .into_iter()
                .map(|(v, coeff)| (vars[v], coeff))
                .collect();
            problem.add_constraint(expr, op, c.rhs);
        }

        let solution = problem.solve()?;
        let values: Vec<f64> = vars.iter().map(|&v| solution[v]).collect();
        Ok(LpSolution {
            objective: solution.objective(),
            values,
            runtime: start.elapsed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn microlp_solves_small_lp() {
        let mut m = LpModel::new("t", Sense::Maximize);
        let x = m.add_var("x".into(), 1.0, (0.0, f64::INFINITY));
        let y = m.add_var("y".into(), 2.0, (0.0, 3.0));
        m.add_constraint(vec![(x, 1.0), (y, 1.0)], CmpOp::Le, 4.0);
        m.add_constraint(vec![(x, 2.0), (y, 1.0)], CmpOp::Ge, 2.0);
        let sol = MicrolpSolver.solve(&m, 1).unwrap();
        assert!((sol.objective - 7.0).abs() < 1e-9);
        assert!((sol.values[0] - 1.0).abs() < 1e-9);
        assert!((sol.values[1] - 3.0).abs() < 1e-9);
    }

    #[test]
    fn infeasible_model_is_reported() {
        let mut m = LpModel::new("t", Sense::Minimize);
        let x = m.add_var("x".into(), 1.0, (0.0, 1.0));
        m.add_constraint(vec![(x, 1.0)], CmpOp::Eq, 5.0);
        assert_eq!(MicrolpSolver.solve(&m, 1), Err(SolverError::Infeasible));
    }

    #[test]
    fn empty_constraint_is_checked() {
        let mut m = LpModel::new("t", Sense::Minimize);
        m.add_var("x".into(), 1.0, (0.0, 1.0));
        m.add_constraint(vec![], CmpOp::Eq, 5.0);
        assert_eq!(MicrolpSolver.solve(&m, 1), Err(SolverError::Infeasible));
        assert!(num_cores() >= 1);
    }

    #[test]
    fn repeated_terms_are_merged() {
        let mut m = LpModel::new("t", Sense::Maximize);
        let x = m.add_var("x".into(), 1.0, (0.0, f64::INFINITY));
        m.add_constraint(vec![(x, 1.0), (x, 1.0)], CmpOp::Le, 4.0);
        let sol = MicrolpSolver.solve(&m, 1).unwrap();
        assert!((sol.values[0] - 2.0).abs() < 1e-9);
    }
}
