//! A minimal linear-programming contract.
//!
//! The analyses only need to build a problem, hand it to a solver, and read
//! variable values back; everything past that line, including which solver
//! actually runs, is replaceable. The shipped implementation is
//! [`super::Simplex`]; a remote service can stand in through the same trait.

use std::fmt;

/// Handle of a decision variable within its [`Problem`].
pub type VarId = usize;

/// Terminal state reported by a solver.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Status {
    Optimal,
    Infeasible,
    Unbounded,
    /// The solver itself failed; callers treat this as "cannot improve",
    /// never as a reason to abort.
    Invalid,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Sense {
    Minimize,
    Maximize,
}

/// Comparison of a constraint row.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Cmp {
    Le,
    Ge,
    Eq,
}

/// A linear combination of variables.
#[derive(Clone, Debug, Default)]
pub struct LinExpr {
    pub terms: Vec<(VarId, f64)>,
}

impl LinExpr {
    pub fn new() -> LinExpr {
        LinExpr::default()
    }

    pub fn term(mut self, var: VarId, coef: f64) -> LinExpr {
        self.terms.push((var, coef));
        self
    }

    pub fn single(var: VarId) -> LinExpr {
        LinExpr::new().term(var, 1.0)
    }
}

#[derive(Clone, Debug)]
pub(crate) struct VarDef {
    pub name: String,
    pub lb: f64,
    pub ub: Option<f64>,
}

#[derive(Clone, Debug)]
pub struct Constraint {
    pub expr: LinExpr,
    pub cmp: Cmp,
    pub rhs: f64,
}

/// An LP instance under construction.
#[derive(Clone, Debug)]
pub struct Problem {
    name: String,
    sense: Sense,
    pub(crate) vars: Vec<VarDef>,
    pub(crate) constraints: Vec<Constraint>,
    pub(crate) objective: LinExpr,
}

impl Problem {
    pub fn new(name: impl Into<String>, sense: Sense) -> Problem {
        Problem {
            name: name.into(),
            sense,
            vars: Vec::new(),
            constraints: Vec::new(),
            objective: LinExpr::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sense(&self) -> Sense {
        self.sense
    }

    /// Declares a variable with a finite lower bound and an optional upper
    /// bound, returning its handle.
    pub fn add_var(&mut self, name: impl Into<String>, lb: f64, ub: Option<f64>) -> VarId {
        let id = self.vars.len();
        self.vars.push(VarDef { name: name.into(), lb, ub });
        id
    }

    pub fn add_constraint(&mut self, expr: LinExpr, cmp: Cmp, rhs: f64) {
        self.constraints.push(Constraint { expr, cmp, rhs });
    }

    pub fn set_objective(&mut self, objective: LinExpr) {
        self.objective = objective;
    }

    pub fn num_vars(&self) -> usize {
        self.vars.len()
    }

    pub fn num_constraints(&self) -> usize {
        self.constraints.len()
    }
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} ({:?}, {} vars, {} rows)", self.name, self.sense, self.vars.len(), self.constraints.len())
    }
}

/// The values a solver hands back.
#[derive(Clone, Debug)]
pub struct Solution {
    pub status: Status,
    pub(crate) values: Vec<f64>,
    pub objective: f64,
}

impl Solution {
    pub fn invalid(status: Status) -> Solution {
        Solution {
            status,
            values: Vec::new(),
            objective: f64::NAN,
        }
    }

    /// The value of a variable in the optimal solution; `0` when the solve
    /// did not produce one.
    pub fn value(&self, var: VarId) -> f64 {
        self.values.get(var).copied().unwrap_or(0.0)
    }
}

/// The solver contract consumed by every LP built here.
pub trait LpSolver {
    fn solve(&self, problem: &Problem) -> Solution;
}
