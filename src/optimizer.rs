//! Constrained minimum-variance basket optimization (Method A).
//!
//! The decision variable is a signed weight per asset. The objective is
//! `0.5 w' Sigma w + alpha * CVaR(w) + beta * turnover(w, w_prev)` subject to
//! dollar neutrality, a gross exposure cap, per-asset boxes tightened by
//! liquidity caps, and an optional factor-neutrality band against the
//! leading covariance eigenvector. CVaR and turnover are linearized with
//! auxiliary variables so the whole problem stays a convex QP.
//!
//! Solvers are tried in order through [`SolverStrategy`]; when every
//! strategy fails the rebalance date is skipped rather than emitting an
//! invalid basket.

use crate::covariance::{estimate_covariance, CovarianceConfig, CovarianceEstimate};
use crate::error::{BasketError, Result};
use crate::types::{BasketKind, BasketSnapshot};
use crate::universe::{trailing_dollar_liquidity, MarketData};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Parameters for Method A and the shared cap machinery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerConfig {
    /// Gross exposure cap G: sum of absolute weights.
    pub gross_cap: f64,
    /// Per-asset absolute weight cap before liquidity tightening.
    pub max_weight: f64,
    /// Weight of the CVaR tail penalty in the objective.
    pub cvar_alpha: f64,
    /// Tail level for CVaR (0.05 = worst 5% of scenarios).
    pub cvar_level: f64,
    /// Weight of the turnover penalty against the previous snapshot.
    pub turnover_penalty: f64,
    /// Factor-neutrality band |w . v1| <= epsilon; None disables the
    /// constraint.
    pub factor_epsilon: Option<f64>,
    /// Maximum fraction of trailing daily dollar volume a position may
    /// represent.
    pub max_participation: f64,
    /// Reference portfolio notional used to convert dollar liquidity into
    /// weight caps.
    pub portfolio_notional: f64,
    /// Trailing window for the liquidity average, in calendar days.
    pub liquidity_window_days: i64,
    pub covariance: CovarianceConfig,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            gross_cap: 2.0,
            max_weight: 0.10,
            cvar_alpha: 1.0,
            cvar_level: 0.05,
            turnover_penalty: 0.0,
            factor_epsilon: None,
            max_participation: 0.05,
            portfolio_notional: 1_000_000.0,
            liquidity_window_days: 14,
            covariance: CovarianceConfig::default(),
        }
    }
}

/// A fully assembled convex problem over signed asset weights.
///
/// `lb`/`ub` are per-asset bounds on `w`; `scenarios[s][i]` is asset `i`'s
/// return in historical scenario `s`. When `leg_budgets` is set the usual
/// net-zero row is replaced by one equality per leg, which pins gross
/// investment for selection-variant weighting.
#[derive(Debug, Clone)]
pub struct QpProblem {
    pub symbols: Vec<String>,
    pub sigma: Vec<Vec<f64>>,
    pub scenarios: Vec<Vec<f64>>,
    pub prev_weights: Option<Vec<f64>>,
    pub lb: Vec<f64>,
    pub ub: Vec<f64>,
    pub gross_cap: f64,
    pub cvar_alpha: f64,
    pub cvar_level: f64,
    pub turnover_penalty: f64,
    pub factor: Option<(Vec<f64>, f64)>,
    /// (long indices, short indices, gross budget); see above.
    pub leg_budgets: Option<(Vec<usize>, Vec<usize>, f64)>,
}

impl QpProblem {
    fn n(&self) -> usize {
        self.symbols.len()
    }

    fn cvar_active(&self) -> bool {
        self.cvar_alpha > 0.0 && !self.scenarios.is_empty()
    }

    fn turnover_active(&self) -> bool {
        self.turnover_penalty > 0.0 && self.prev_weights.is_some()
    }
}

/// Column-major sparse-matrix assembly for clarabel.
#[derive(Default)]
struct CscBuilder {
    rows: usize,
    cols: usize,
    // (col, row, value)
    triplets: Vec<(usize, usize, f64)>,
}

impl CscBuilder {
    fn new(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            triplets: Vec::new(),
        }
    }

    fn push(&mut self, row: usize, col: usize, value: f64) {
        debug_assert!(row < self.rows && col < self.cols);
        if value != 0.0 {
            self.triplets.push((col, row, value));
        }
    }

    fn build(mut self) -> clarabel::algebra::CscMatrix<f64> {
        self.triplets.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));
        let mut colptr = Vec::with_capacity(self.cols + 1);
        let mut rowval = Vec::with_capacity(self.triplets.len());
        let mut nzval = Vec::with_capacity(self.triplets.len());
        colptr.push(0);
        let mut current_col = 0usize;
        for (col, row, value) in self.triplets {
            while current_col < col {
                colptr.push(rowval.len());
                current_col += 1;
            }
            rowval.push(row);
            nzval.push(value);
        }
        while current_col < self.cols {
            colptr.push(rowval.len());
            current_col += 1;
        }
        clarabel::algebra::CscMatrix::new(self.rows, self.cols, colptr, rowval, nzval)
    }
}

/// Solve one assembled problem with clarabel. Returns the signed weight
/// vector in the problem's symbol order.
pub fn solve_qp(problem: &QpProblem) -> Result<Vec<f64>> {
    use clarabel::solver::*;

    let n = problem.n();
    let n_scenarios = if problem.cvar_active() {
        problem.scenarios.len()
    } else {
        0
    };

    // Variable layout: [w(n), abs aux a(n), turnover aux d(n)?, t?, u(S)?].
    let off_a = n;
    let off_d = 2 * n;
    let n_d = if problem.turnover_active() { n } else { 0 };
    let off_t = off_d + n_d;
    let off_u = off_t + 1;
    let n_vars = if n_scenarios > 0 {
        off_u + n_scenarios
    } else {
        off_t
    };

    // Quadratic term: the covariance block over w.
    let mut p = CscBuilder::new(n_vars, n_vars);
    for i in 0..n {
        for j in 0..n {
            p.push(i, j, problem.sigma[i][j]);
        }
    }

    // Linear term.
    let mut q = vec![0.0; n_vars];
    if problem.turnover_active() {
        for i in 0..n {
            q[off_d + i] = problem.turnover_penalty;
        }
    }
    if n_scenarios > 0 {
        q[off_t] = problem.cvar_alpha;
        let tail = problem.cvar_alpha / (problem.cvar_level * n_scenarios as f64);
        for s in 0..n_scenarios {
            q[off_u + s] = tail;
        }
    }

    // Equality rows, then inequality rows.
    let n_eq = if problem.leg_budgets.is_some() { 2 } else { 1 };
    let mut n_ineq = 4 * n + 1; // abs epigraphs, boxes, gross cap
    if problem.turnover_active() {
        n_ineq += 2 * n;
    }
    if n_scenarios > 0 {
        n_ineq += 2 * n_scenarios;
    }
    if problem.factor.is_some() {
        n_ineq += 2;
    }
    let m = n_eq + n_ineq;

    let mut a = CscBuilder::new(m, n_vars);
    let mut b = vec![0.0; m];
    let mut row = 0usize;

    match &problem.leg_budgets {
        None => {
            // sum(w) = 0
            for i in 0..n {
                a.push(row, i, 1.0);
            }
            b[row] = 0.0;
            row += 1;
        }
        Some((longs, shorts, gross)) => {
            // One budget per leg; net zero follows from the pair.
            for &i in longs {
                a.push(row, i, 1.0);
            }
            b[row] = gross / 2.0;
            row += 1;
            for &i in shorts {
                a.push(row, i, 1.0);
            }
            b[row] = -gross / 2.0;
            row += 1;
        }
    }

    // a_i >= |w_i|: w_i - a_i <= 0 and -w_i - a_i <= 0.
    for i in 0..n {
        a.push(row, i, 1.0);
        a.push(row, off_a + i, -1.0);
        b[row] = 0.0;
        row += 1;
    }
    for i in 0..n {
        a.push(row, i, -1.0);
        a.push(row, off_a + i, -1.0);
        b[row] = 0.0;
        row += 1;
    }

    // sum(a) <= G.
    for i in 0..n {
        a.push(row, off_a + i, 1.0);
    }
    b[row] = problem.gross_cap;
    row += 1;

    // Boxes: w_i <= ub_i and -w_i <= -lb_i.
    for i in 0..n {
        a.push(row, i, 1.0);
        b[row] = problem.ub[i];
        row += 1;
    }
    for i in 0..n {
        a.push(row, i, -1.0);
        b[row] = -problem.lb[i];
        row += 1;
    }

    // d_i >= |w_i - prev_i|.
    if problem.turnover_active() {
        let prev = problem.prev_weights.as_ref().unwrap();
        for i in 0..n {
            a.push(row, i, 1.0);
            a.push(row, off_d + i, -1.0);
            b[row] = prev[i];
            row += 1;
        }
        for i in 0..n {
            a.push(row, i, -1.0);
            a.push(row, off_d + i, -1.0);
            b[row] = -prev[i];
            row += 1;
        }
    }

    // CVaR epigraph: u_s >= 0 and u_s >= -r_s.w - t.
    if n_scenarios > 0 {
        for s in 0..n_scenarios {
            a.push(row, off_u + s, -1.0);
            b[row] = 0.0;
            row += 1;
        }
        for (s, scenario) in problem.scenarios.iter().enumerate() {
            for i in 0..n {
                a.push(row, i, -scenario[i]);
            }
            a.push(row, off_t, -1.0);
            a.push(row, off_u + s, -1.0);
            b[row] = 0.0;
            row += 1;
        }
    }

    // Factor neutrality: |v . w| <= eps.
    if let Some((v, eps)) = &problem.factor {
        for i in 0..n {
            a.push(row, i, v[i]);
        }
        b[row] = *eps;
        row += 1;
        for i in 0..n {
            a.push(row, i, -v[i]);
        }
        b[row] = *eps;
        row += 1;
    }

    debug_assert_eq!(row, m);

    let cones = [ZeroConeT(n_eq), NonnegativeConeT(n_ineq)];

    let settings = DefaultSettingsBuilder::default()
        .max_iter(200)
        .verbose(false)
        .build()
        .map_err(|e| BasketError::OptimizationError(format!("failed to build settings: {}", e)))?;

    let p = p.build();
    let a = a.build();
    let mut solver = DefaultSolver::new(&p, &q, &a, &b, &cones, settings)
        .map_err(|e| BasketError::OptimizationError(format!("failed to create solver: {:?}", e)))?;

    solver.solve();

    if !matches!(solver.solution.status, SolverStatus::Solved) {
        return Err(BasketError::OptimizationError(format!(
            "solver finished with status {:?}",
            solver.solution.status
        )));
    }

    Ok(solver.solution.x[..n].to_vec())
}

/// One attempt in the ordered solver chain: derives the problem variant it
/// wants to solve from the base formulation.
pub trait SolverStrategy {
    fn name(&self) -> &'static str;
    fn prepare(&self, base: &QpProblem) -> QpProblem;
}

/// The full objective: variance + CVaR + turnover penalty.
pub struct FullObjective;

impl SolverStrategy for FullObjective {
    fn name(&self) -> &'static str {
        "min-variance+cvar"
    }

    fn prepare(&self, base: &QpProblem) -> QpProblem {
        base.clone()
    }
}

/// Fallback: drop the CVaR scenario terms, keep every linear and box
/// constraint unchanged.
pub struct DropCvar;

impl SolverStrategy for DropCvar {
    fn name(&self) -> &'static str {
        "min-variance"
    }

    fn prepare(&self, base: &QpProblem) -> QpProblem {
        let mut problem = base.clone();
        problem.cvar_alpha = 0.0;
        problem.scenarios.clear();
        problem
    }
}

/// Try each strategy in order until one produces a solution.
pub fn solve_with_fallback(
    base: &QpProblem,
    strategies: &[&dyn SolverStrategy],
) -> Option<(Vec<f64>, &'static str)> {
    for strategy in strategies {
        let problem = strategy.prepare(base);
        match solve_qp(&problem) {
            Ok(w) => return Some((w, strategy.name())),
            Err(e) => warn!("solver '{}' failed: {}", strategy.name(), e),
        }
    }
    None
}

/// Per-asset weight caps: min(max_weight, trailing dollar liquidity x
/// participation / notional). Assets without measurable liquidity keep the
/// plain max-weight cap; the eligibility filter already screened them.
pub fn liquidity_weight_caps(
    data: &MarketData,
    symbols: &[String],
    date: NaiveDate,
    config: &OptimizerConfig,
) -> Vec<f64> {
    symbols
        .iter()
        .map(|symbol| {
            let liquidity = trailing_dollar_liquidity(
                data,
                symbol,
                date,
                config.liquidity_window_days,
            );
            match liquidity {
                Some(adv) if config.portfolio_notional > 0.0 => config
                    .max_weight
                    .min(adv * config.max_participation / config.portfolio_notional),
                _ => config.max_weight,
            }
        })
        .collect()
}

/// Method A entry point: build and solve the constrained minimum-variance
/// problem for one rebalance date. Returns None when the date must be
/// skipped (too few assets, unusable covariance, or every solver failed).
pub fn optimize_min_variance(
    date: NaiveDate,
    eligible: &[String],
    data: &MarketData,
    calendar: &[NaiveDate],
    prev_weights: Option<&BTreeMap<String, f64>>,
    config: &OptimizerConfig,
) -> Option<BasketSnapshot> {
    if eligible.len() < 2 {
        warn!("{}: {} eligible assets, skipping optimization", date, eligible.len());
        return None;
    }

    let estimate: CovarianceEstimate = match estimate_covariance(
        &data.prices,
        eligible,
        calendar,
        date,
        &config.covariance,
    ) {
        Ok(est) => est,
        Err(e) => {
            warn!("{}: covariance unavailable ({}), skipping", date, e);
            return None;
        }
    };

    let caps = liquidity_weight_caps(data, eligible, date, config);
    let lb: Vec<f64> = caps.iter().map(|c| -c).collect();
    let ub = caps;

    let factor = config.factor_epsilon.map(|eps| {
        (estimate.cov.leading_eigenvector(), eps)
    });

    let prev = prev_weights.map(|map| {
        eligible
            .iter()
            .map(|s| map.get(s).copied().unwrap_or(0.0))
            .collect()
    });

    let base = QpProblem {
        symbols: eligible.to_vec(),
        sigma: estimate.cov.matrix.clone(),
        scenarios: estimate.scenarios.clone(),
        prev_weights: prev,
        lb,
        ub,
        gross_cap: config.gross_cap,
        cvar_alpha: config.cvar_alpha,
        cvar_level: config.cvar_level,
        turnover_penalty: config.turnover_penalty,
        factor,
        leg_budgets: None,
    };

    let strategies: [&dyn SolverStrategy; 2] = [&FullObjective, &DropCvar];
    let (mut w, method) = match solve_with_fallback(&base, &strategies) {
        Some(solution) => solution,
        None => {
            warn!("{}: all solvers failed, skipping rebalance", date);
            return None;
        }
    };

    // Zero out solver dust, then spread the neutrality residual across the
    // surviving positions so the snapshot nets to exactly zero.
    for x in &mut w {
        if x.abs() < 1e-10 {
            *x = 0.0;
        }
    }
    let nonzero = w.iter().filter(|x| **x != 0.0).count();
    if nonzero > 0 {
        let residual: f64 = w.iter().sum::<f64>() / nonzero as f64;
        for x in &mut w {
            if *x != 0.0 {
                *x -= residual;
            }
        }
    }

    let gross: f64 = w.iter().map(|x| x.abs()).sum();
    if gross < 1e-8 {
        warn!("{}: optimizer returned an empty basket, skipping", date);
        return None;
    }

    debug!(
        "{}: solved via '{}', gross {:.4}, {} scenarios over {}d",
        date,
        method,
        gross,
        estimate.scenarios.len(),
        estimate.window_days
    );

    let weights: BTreeMap<String, f64> = eligible
        .iter()
        .cloned()
        .zip(w)
        .filter(|(_, weight)| *weight != 0.0)
        .collect();
    Some(BasketSnapshot::from_weights(
        date,
        BasketKind::DollarNeutral,
        method,
        weights,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A small well-conditioned problem: three assets, mild correlation.
    fn base_problem() -> QpProblem {
        let sigma = vec![
            vec![0.040, 0.006, -0.004],
            vec![0.006, 0.090, 0.010],
            vec![-0.004, 0.010, 0.060],
        ];
        // Scenarios where asset 0 outperforms asset 2: the CVaR term
        // rewards long 0 / short 2 combinations.
        let scenarios = vec![
            vec![0.02, 0.00, -0.015],
            vec![0.01, -0.01, -0.010],
            vec![0.015, 0.005, -0.020],
            vec![-0.005, 0.01, 0.000],
            vec![0.02, -0.02, -0.010],
        ];
        QpProblem {
            symbols: vec!["AAA".to_string(), "BBB".to_string(), "CCC".to_string()],
            sigma,
            scenarios,
            prev_weights: None,
            lb: vec![-0.5; 3],
            ub: vec![0.5; 3],
            gross_cap: 1.0,
            cvar_alpha: 1.0,
            cvar_level: 0.05,
            turnover_penalty: 0.0,
            factor: None,
            leg_budgets: None,
        }
    }

    #[test]
    fn test_solution_is_dollar_neutral_and_capped() {
        let w = solve_qp(&base_problem()).unwrap();
        let net: f64 = w.iter().sum();
        let gross: f64 = w.iter().map(|x| x.abs()).sum();
        assert!(net.abs() < 1e-6, "net = {}", net);
        assert!(gross <= 1.0 + 1e-6, "gross = {}", gross);
        for x in &w {
            assert!(x.abs() <= 0.5 + 1e-6);
        }
    }

    #[test]
    fn test_cvar_tilts_toward_profitable_scenarios() {
        let w = solve_qp(&base_problem()).unwrap();
        // Every scenario pays long-0/short-2; the tail penalty should pull
        // the solution that way rather than leaving it at zero.
        assert!(w[0] > 1e-4, "w = {:?}", w);
        assert!(w[2] < -1e-4, "w = {:?}", w);
    }

    #[test]
    fn test_turnover_penalty_anchors_to_previous() {
        let mut problem = base_problem();
        problem.cvar_alpha = 0.0;
        problem.scenarios.clear();
        problem.prev_weights = Some(vec![0.3, 0.0, -0.3]);
        problem.turnover_penalty = 10.0;
        let w = solve_qp(&problem).unwrap();
        // A large penalty should hold the solution near the previous
        // weights instead of collapsing to zero variance at w = 0.
        assert!(w[0] > 0.05, "w = {:?}", w);
        assert!(w[2] < -0.05, "w = {:?}", w);
        let net: f64 = w.iter().sum();
        assert!(net.abs() < 1e-6);
    }

    #[test]
    fn test_factor_neutrality_band_binds() {
        let mut problem = base_problem();
        let v = vec![0.8, 0.5, 0.33];
        problem.factor = Some((v.clone(), 1e-4));
        let w = solve_qp(&problem).unwrap();
        let exposure: f64 = w.iter().zip(v.iter()).map(|(a, b)| a * b).sum();
        assert!(exposure.abs() <= 1e-4 + 1e-6, "exposure = {}", exposure);
    }

    #[test]
    fn test_leg_budgets_force_investment() {
        let mut problem = base_problem();
        problem.cvar_alpha = 0.0;
        problem.scenarios.clear();
        problem.leg_budgets = Some((vec![0, 1], vec![2], 1.0));
        problem.lb = vec![0.0, 0.0, -0.6];
        problem.ub = vec![0.6, 0.6, 0.0];
        let w = solve_qp(&problem).unwrap();
        let long: f64 = w[0] + w[1];
        assert!((long - 0.5).abs() < 1e-6, "long leg = {}", long);
        assert!((w[2] + 0.5).abs() < 1e-6, "short leg = {}", w[2]);
    }

    #[test]
    fn test_infeasible_problem_reports_error() {
        let mut problem = base_problem();
        // Gross cap below what the leg budgets require.
        problem.leg_budgets = Some((vec![0], vec![2], 1.0));
        problem.lb = vec![0.0, 0.0, -0.6];
        problem.ub = vec![0.6, 0.0, 0.0];
        problem.gross_cap = 0.1;
        assert!(solve_qp(&problem).is_err());
    }

    #[test]
    fn test_fallback_chain_recovers() {
        struct AlwaysBad;
        impl SolverStrategy for AlwaysBad {
            fn name(&self) -> &'static str {
                "bad"
            }
            fn prepare(&self, base: &QpProblem) -> QpProblem {
                let mut p = base.clone();
                // Contradictory bounds make the variant infeasible.
                p.lb = vec![0.4; p.symbols.len()];
                p.ub = vec![0.5; p.symbols.len()];
                p
            }
        }
        let base = base_problem();
        let strategies: [&dyn SolverStrategy; 2] = [&AlwaysBad, &DropCvar];
        let (w, name) = solve_with_fallback(&base, &strategies).unwrap();
        assert_eq!(name, "min-variance");
        assert_eq!(w.len(), 3);
    }
}
