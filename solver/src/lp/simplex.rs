//! Reference LP solver: a dense two-phase primal simplex.
//!
//! Small and deliberately boring: variables are shifted to a zero lower
//! bound, finite upper bounds become rows, `>=`/`=` rows get artificial
//! variables minimized away in phase one, and Bland's rule keeps the pivot
//! sequence finite. The instances built by this crate stay tiny (a handful
//! of variables per timepoint), so no effort goes into sparsity.

use crate::lp::problem::{Cmp, LpSolver, Problem, Sense, Solution, Status};
use crate::lp::MAX_FLOAT;
use tracing::{debug, trace};

#[derive(Clone, Debug)]
pub struct Simplex {
    pub tolerance: f64,
    pub max_iters: usize,
}

impl Default for Simplex {
    fn default() -> Self {
        Simplex {
            tolerance: 1e-9,
            max_iters: 10_000,
        }
    }
}

struct Tableau {
    rows: Vec<Vec<f64>>,
    basis: Vec<usize>,
    /// Columns past this index are artificial.
    first_artificial: usize,
    num_cols: usize,
    /// Largest right-hand side among the rows that received an artificial,
    /// scaling the phase-one feasibility threshold.
    artificial_scale: f64,
}

impl Tableau {
    fn num_cols(&self) -> usize {
        self.num_cols
    }

    fn rhs(&self, r: usize) -> f64 {
        *self.rows[r].last().expect("non-empty row")
    }

    fn pivot(&mut self, r: usize, c: usize) {
        let factor = self.rows[r][c];
        for x in self.rows[r].iter_mut() {
            *x /= factor;
        }
        let pivot_row = self.rows[r].clone();
        for (i, row) in self.rows.iter_mut().enumerate() {
            if i == r {
                continue;
            }
            let mult = row[c];
            if mult != 0.0 {
                for (x, p) in row.iter_mut().zip(&pivot_row) {
                    *x -= mult * p;
                }
            }
        }
        self.basis[r] = c;
    }
}

impl Simplex {
    /// Minimizes `cost` over the tableau with Bland's rule; columns for
    /// which `allowed` is false can never enter the basis.
    fn optimize(&self, tab: &mut Tableau, cost: &[f64], allow_artificials: bool) -> Result<(), Status> {
        let cols = tab.num_cols();
        let usable = if allow_artificials { cols } else { tab.first_artificial };
        for _ in 0..self.max_iters {
            // reduced costs against the current basis
            let mut entering = None;
            for j in 0..usable {
                let mut reduced = cost.get(j).copied().unwrap_or(0.0);
                for (r, &b) in tab.basis.iter().enumerate() {
                    let cb = cost.get(b).copied().unwrap_or(0.0);
                    if cb != 0.0 {
                        reduced -= cb * tab.rows[r][j];
                    }
                }
                if reduced < -self.tolerance {
                    entering = Some(j);
                    break; // Bland: smallest improving index
                }
            }
            let Some(j) = entering else { return Ok(()) };

            // ratio test, ties on the smallest basis index
            let mut leaving: Option<(usize, f64)> = None;
            for r in 0..tab.rows.len() {
                let a = tab.rows[r][j];
                if a > self.tolerance {
                    let ratio = tab.rhs(r) / a;
                    let better = match leaving {
                        None => true,
                        Some((lr, lratio)) => {
                            ratio < lratio - self.tolerance
                                || (ratio <= lratio + self.tolerance && tab.basis[r] < tab.basis[lr])
                        }
                    };
                    if better {
                        leaving = Some((r, ratio));
                    }
                }
            }
            let Some((r, _)) = leaving else { return Err(Status::Unbounded) };
            trace!(enter = j, leave = tab.basis[r], "pivot");
            tab.pivot(r, j);
        }
        debug!("simplex hit the iteration cap");
        Err(Status::Invalid)
    }

    fn build_tableau(&self, pb: &Problem) -> Result<Tableau, Status> {
        let n = pb.vars.len();

        // rows over the shifted variables y = x - lb >= 0
        let mut rows: Vec<(Vec<f64>, Cmp, f64)> = Vec::new();
        for c in &pb.constraints {
            let mut coef = vec![0.0; n];
            let mut shift = 0.0;
            for &(v, a) in &c.expr.terms {
                if v >= n || !a.is_finite() {
                    return Err(Status::Invalid);
                }
                coef[v] += a;
                shift += a * pb.vars[v].lb;
            }
            if !c.rhs.is_finite() {
                return Err(Status::Invalid);
            }
            rows.push((coef, c.cmp, c.rhs - shift));
        }
        for (i, v) in pb.vars.iter().enumerate() {
            if !v.lb.is_finite() {
                return Err(Status::Invalid);
            }
            if let Some(ub) = v.ub {
                let range = ub - v.lb;
                if range < 0.0 {
                    return Err(Status::Infeasible);
                }
                // a bound as wide as the infinity sentinel is no bound
                if range < MAX_FLOAT {
                    let mut coef = vec![0.0; n];
                    coef[i] = 1.0;
                    rows.push((coef, Cmp::Le, range));
                }
            }
        }

        // normal form: non-negative right-hand sides
        for (coef, cmp, rhs) in rows.iter_mut() {
            if *rhs < 0.0 {
                for a in coef.iter_mut() {
                    *a = -*a;
                }
                *rhs = -*rhs;
                *cmp = match *cmp {
                    Cmp::Le => Cmp::Ge,
                    Cmp::Ge => Cmp::Le,
                    Cmp::Eq => Cmp::Eq,
                };
            }
        }

        let num_slack = rows.iter().filter(|(_, cmp, _)| *cmp != Cmp::Eq).count();
        let num_art = rows.iter().filter(|(_, cmp, _)| *cmp != Cmp::Le).count();
        let first_artificial = n + num_slack;
        let total = first_artificial + num_art;

        let mut tab = Tableau {
            rows: Vec::with_capacity(rows.len()),
            basis: vec![0; rows.len()],
            first_artificial,
            num_cols: total,
            artificial_scale: rows
                .iter()
                .filter(|(_, cmp, _)| *cmp != Cmp::Le)
                .map(|(_, _, rhs)| rhs.abs())
                .fold(1.0, f64::max),
        };
        let mut slack = n;
        let mut art = first_artificial;
        for (r, (coef, cmp, rhs)) in rows.into_iter().enumerate() {
            let mut row = vec![0.0; total + 1];
            row[..n].copy_from_slice(&coef);
            row[total] = rhs;
            match cmp {
                Cmp::Le => {
                    row[slack] = 1.0;
                    tab.basis[r] = slack;
                    slack += 1;
                }
                Cmp::Ge => {
                    row[slack] = -1.0;
                    slack += 1;
                    row[art] = 1.0;
                    tab.basis[r] = art;
                    art += 1;
                }
                Cmp::Eq => {
                    row[art] = 1.0;
                    tab.basis[r] = art;
                    art += 1;
                }
            }
            tab.rows.push(row);
        }
        Ok(tab)
    }
}

impl LpSolver for Simplex {
    fn solve(&self, pb: &Problem) -> Solution {
        let n = pb.vars.len();
        let mut tab = match self.build_tableau(pb) {
            Ok(tab) => tab,
            Err(status) => return Solution::invalid(status),
        };
        let total = tab.num_cols();

        // phase one: drive the artificials to zero
        if total > tab.first_artificial {
            let mut phase1 = vec![0.0; total];
            for c in phase1.iter_mut().skip(tab.first_artificial) {
                *c = 1.0;
            }
            if let Err(status) = self.optimize(&mut tab, &phase1, true) {
                return Solution::invalid(status);
            }
            let infeasibility: f64 = tab
                .basis
                .iter()
                .enumerate()
                .filter(|(_, &b)| b >= tab.first_artificial)
                .map(|(r, _)| tab.rhs(r))
                .sum();
            if infeasibility > self.tolerance * tab.artificial_scale {
                debug!(infeasibility, "phase one failed");
                return Solution::invalid(Status::Infeasible);
            }
            // pivot lingering zero-level artificials out when possible
            for r in 0..tab.rows.len() {
                if tab.basis[r] >= tab.first_artificial {
                    if let Some(c) = (0..tab.first_artificial)
                        .find(|&c| tab.rows[r][c].abs() > self.tolerance)
                    {
                        tab.pivot(r, c);
                    }
                }
            }
        }

        // phase two: the real objective
        let mut cost = vec![0.0; total];
        for &(v, a) in &pb.objective.terms {
            if v >= n || !a.is_finite() {
                return Solution::invalid(Status::Invalid);
            }
            cost[v] += match pb.sense() {
                Sense::Minimize => a,
                Sense::Maximize => -a,
            };
        }
        if let Err(status) = self.optimize(&mut tab, &cost, false) {
            return Solution::invalid(status);
        }

        // read the solution back in the original variable space
        let mut values: Vec<f64> = pb.vars.iter().map(|v| v.lb).collect();
        for (r, &b) in tab.basis.iter().enumerate() {
            if b < n {
                values[b] += tab.rhs(r);
            }
        }
        let objective = pb
            .objective
            .terms
            .iter()
            .map(|&(v, a)| a * values[v])
            .sum();
        Solution {
            status: Status::Optimal,
            values,
            objective,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::lp::problem::LinExpr;

    fn solve(pb: &Problem) -> Solution {
        Simplex::default().solve(pb)
    }

    #[test]
    fn test_bounded_maximization() {
        // max x + y, x <= 4, y <= 3, x + y <= 5
        let mut pb = Problem::new("toy", Sense::Maximize);
        let x = pb.add_var("x", 0.0, Some(4.0));
        let y = pb.add_var("y", 0.0, Some(3.0));
        pb.add_constraint(LinExpr::new().term(x, 1.0).term(y, 1.0), Cmp::Le, 5.0);
        pb.set_objective(LinExpr::new().term(x, 1.0).term(y, 1.0));
        let sol = solve(&pb);
        assert_eq!(sol.status, Status::Optimal);
        assert!((sol.objective - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_equality_and_shifted_bounds() {
        // min x + y with x + y = 10, x >= 2, y >= 3
        let mut pb = Problem::new("eq", Sense::Minimize);
        let x = pb.add_var("x", 2.0, None);
        let y = pb.add_var("y", 3.0, None);
        pb.add_constraint(LinExpr::new().term(x, 1.0).term(y, 1.0), Cmp::Eq, 10.0);
        pb.set_objective(LinExpr::new().term(x, 1.0).term(y, 1.0));
        let sol = solve(&pb);
        assert_eq!(sol.status, Status::Optimal);
        assert!((sol.objective - 10.0).abs() < 1e-6);
        assert!(sol.value(x) >= 2.0 - 1e-9);
        assert!(sol.value(y) >= 3.0 - 1e-9);
    }

    #[test]
    fn test_ge_constraint() {
        // min 2x + y, x + y >= 4, both in [0, 10]
        let mut pb = Problem::new("ge", Sense::Minimize);
        let x = pb.add_var("x", 0.0, Some(10.0));
        let y = pb.add_var("y", 0.0, Some(10.0));
        pb.add_constraint(LinExpr::new().term(x, 1.0).term(y, 1.0), Cmp::Ge, 4.0);
        pb.set_objective(LinExpr::new().term(x, 2.0).term(y, 1.0));
        let sol = solve(&pb);
        assert_eq!(sol.status, Status::Optimal);
        assert!((sol.objective - 4.0).abs() < 1e-6);
        assert!((sol.value(y) - 4.0).abs() < 1e-6);
    }

    #[test]
    fn test_infeasible() {
        let mut pb = Problem::new("bad", Sense::Minimize);
        let x = pb.add_var("x", 0.0, Some(1.0));
        pb.add_constraint(LinExpr::single(x), Cmp::Ge, 2.0);
        pb.set_objective(LinExpr::single(x));
        assert_eq!(solve(&pb).status, Status::Infeasible);
    }

    #[test]
    fn test_unbounded() {
        let mut pb = Problem::new("free", Sense::Maximize);
        let x = pb.add_var("x", 0.0, None);
        pb.set_objective(LinExpr::single(x));
        assert_eq!(solve(&pb).status, Status::Unbounded);
    }

    #[test]
    fn test_negative_lower_bounds() {
        // min x subject to x >= -5 (via bound), x >= -3 (via row)
        let mut pb = Problem::new("neg", Sense::Minimize);
        let x = pb.add_var("x", -5.0, Some(5.0));
        pb.add_constraint(LinExpr::single(x), Cmp::Ge, -3.0);
        pb.set_objective(LinExpr::single(x));
        let sol = solve(&pb);
        assert_eq!(sol.status, Status::Optimal);
        assert!((sol.value(x) + 3.0).abs() < 1e-6);
    }
}
