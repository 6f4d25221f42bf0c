//!
//! Solver-independent linear program: continuous bounded variables, linear
//! constraints and a linear objective.
//!
use serde::{Deserialize, Serialize};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VarId(pub usize);

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sense {
    Minimize,
    Maximize,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CmpOp {
    Le,
    Ge,
    Eq,
}

impl CmpOp {
    /// Whether `lhs op rhs` holds within `tol`.
    pub fn holds(&self, lhs: f64, rhs: f64, tol: f64) -> bool {
        match self {
            CmpOp::Le => lhs <= rhs + tol,
            CmpOp::Ge => lhs >= rhs - tol,
            CmpOp::Eq => (lhs - rhs).abs() <= tol,
        }
    }
}

impl std::fmt::Display for CmpOp {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            CmpOp::Le => write!(f, "<="),
            CmpOp::Ge => write!(f, ">="),
            CmpOp::Eq => write!(f, "="),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    pub lb: f64,
    pub ub: f64,
    /// objective coefficient
    pub obj: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    pub terms: Vec<(VarId, f64)>,
    pub op: CmpOp,
    pub rhs: f64,
}

impl Constraint {
    pub fn lhs(&self, values: &[f64]) -> f64 {
        self.terms.iter().map(|&(v, c)| c * values[v.0]).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LpModel {
    pub name: String,
    pub sense: Sense,
    pub vars: Vec<Variable>,
    pub constraints: Vec<Constraint>,
}

impl LpModel {
    pub fn new(name: &str, sense: Sense) -> LpModel {
        LpModel {
            name: name.to_string(),
            sense,
            vars: Vec::new(),
            constraints: Vec::new(),
        }
    }

    pub fn add_var(&mut self, name: String, obj: f64, (lb, ub): (f64, f64)) -> VarId {
        self.vars.push(Variable { name, lb, ub, obj });
        VarId(self.vars.len() - 1)
    }

    pub fn add_constraint(&mut self, terms: Vec<(VarId, f64)>, op: CmpOp, rhs: f64) {
        self.constraints.push(Constraint { terms, op, rhs });
    }

    pub fn num_vars(&self) -> usize {
        self.vars.len()
    }

    pub fn objective_value(&self, values: &[f64]) -> f64 {
        self.vars
            .iter()
            .zip(values.iter())
            .map(|(v, x)| v.obj * x)
            .sum()
    }

    ///
    /// Check variable bounds and every constraint against `values`.
    ///
    pub fn is_satisfied_by(&self, values: &[f64], tol: f64) -> bool {
        values.len() == self.vars.len()
            && self
                .vars
                .iter()
                .zip(values.iter())
                .all(|(v, &x)| x >= v.lb - tol && x <= v.ub + tol)
            && self
                .constraints
                .iter()
                .all(|c| c.op.holds(c.lhs(values), c.rhs, tol))
    }
}

/// LP-file like rendering, used for debug dumps.
impl std::fmt::Display for LpModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\\ {}", self.name)?;
        match self.sense {
            Sense::Minimize => writeln!(f, "Minimize")?,
            Sense::Maximize => writeln!(f, "Maximize")?,
        }
        let obj: Vec<String> = self
            .vars
            .iter()
            .filter(|v| v.obj != 0.0)
            .map(|v| format!("{} {}", v.obj, v.name))
            .collect();
        writeln!(f, "  {}", obj.join(" + "))?;
        writeln!(f, "Subject To")?;
        for (i, c) in self.constraints.iter().enumerate() {
            let lhs: Vec<String> = c
                .terms
                .iter()
                .map(|&(v, coeff)| format!("{} {}", coeff, self.vars[v.0].name))
                .collect();
            writeln!(f, "  R{}: {} {} {}", i, lhs.join(" + "), c.op, c.rhs)?;
        }
        writeln!(f, "Bounds")?;
        for v in self.vars.iter() {
            writeln!(f, "  {} <= {} <= {}", v.lb, v.name, v.ub)?;
        }
        write!(f, "End")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn satisfied_by() {
        let mut m = LpModel::new("t", Sense::Maximize);
        let x = m.add_var("x".into(), 1.0, (0.0, f64::INFINITY));
        let y = m.add_var("y".into(), 2.0, (0.0, 3.0));
        m.add_constraint(vec![(x, 1.0), (y, 1.0)], CmpOp::Le, 4.0);
        assert!(m.is_satisfied_by(&[1.0, 3.0], 1e-9));
        assert!(!m.is_satisfied_by(&[2.0, 3.0], 1e-9));
        assert!(!m.is_satisfied_by(&[0.0, 3.5], 1e-9));
        assert_eq!(m.objective_value(&[1.0, 3.0]), 7.0);
        let dump = m.to_string();
        assert!(dump.contains("R0: 1 x + 1 y <= 4"));
    }
}
