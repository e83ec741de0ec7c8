//! Bounded Levenberg–Marquardt least squares.
//!
//! Given a [`ModelFunction`], minimize
//!
//! ```text
//! SS(p) = Σ_enabled (y_i - f(p, x_i))^2     subject to  lower <= p <= upper
//! ```
//!
//! Each iteration builds the Jacobian of `f` (analytic or finite difference),
//! solves the damped normal equations `(JᵀJ + λ·diag(JᵀJ)) Δ = Jᵀr`, clamps the
//! proposal into the bounds and keeps it only if `SS` decreases. Rejected
//! proposals raise `λ` and retry from the same point.
//!
//! Structural problems (too few points, bad bounds/scale, infeasible start) are
//! reported before the first model evaluation that matters; numerical trouble is
//! reported as [`FitError::Divergence`] or as a non-converged [`FitOutcome`].

use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::FitError;
use crate::fit::jacobian::{Difference, numeric_gradient};
use crate::fit::traits::{DataPoint, ModelFunction, ParameterVector};
use crate::math::solve_damped;

/// Smallest damping factor the solver will decrease to.
const LAMBDA_MIN: f64 = 1e-15;

/// Tuning knobs for the solver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolverConfig {
    /// Maximum number of outer iterations.
    pub max_iterations: usize,
    /// Initial damping factor λ.
    pub initial_lambda: f64,
    /// Factor applied to λ after a rejected proposal.
    pub lambda_up: f64,
    /// Factor applied to λ after an accepted proposal.
    pub lambda_down: f64,
    /// Rejected proposals allowed within one iteration before giving up.
    pub max_retries: usize,
    /// Converged when an accepted step lowers `SS` by less than `ftol * SS`.
    pub ftol: f64,
    /// Converged when the scaled step norm drops below `xtol * (‖p‖ + xtol)`.
    pub xtol: f64,
    /// Relative finite-difference step (multiplied by each parameter's scale).
    pub fd_epsilon: f64,
    /// Finite-difference scheme used when the model has no analytic gradient.
    pub difference: Difference,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            initial_lambda: 1e-3,
            lambda_up: 10.0,
            lambda_down: 0.1,
            max_retries: 40,
            ftol: 1e-15,
            xtol: 1e-12,
            fd_epsilon: 1e-6,
            difference: Difference::Central,
        }
    }
}

impl SolverConfig {
    pub fn validate(&self) -> Result<(), FitError> {
        if self.max_iterations == 0 {
            return Err(FitError::InvalidArgument(
                "max_iterations must be > 0".to_string(),
            ));
        }
        if !(self.initial_lambda.is_finite() && self.initial_lambda > 0.0) {
            return Err(FitError::InvalidArgument(
                "initial_lambda must be finite and > 0".to_string(),
            ));
        }
        if !(self.lambda_up > 1.0 && self.lambda_down > 0.0 && self.lambda_down < 1.0) {
            return Err(FitError::InvalidArgument(
                "lambda_up must be > 1 and lambda_down in (0, 1)".to_string(),
            ));
        }
        if !(self.fd_epsilon.is_finite() && self.fd_epsilon > 0.0) {
            return Err(FitError::InvalidArgument(
                "fd_epsilon must be finite and > 0".to_string(),
            ));
        }
        if !(self.ftol >= 0.0 && self.xtol >= 0.0) {
            return Err(FitError::InvalidArgument(
                "tolerances must be >= 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Why the solver stopped successfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConvergenceReason {
    /// Relative decrease of the sum of squares fell below `ftol`.
    ObjectiveDecrease,
    /// The scaled parameter step fell below `xtol`.
    StepSize,
    /// The residuals are exactly zero.
    ZeroResidual,
}

/// How the iteration ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    Converged(ConvergenceReason),
    /// Iteration cap reached; the parameters are the best seen so far.
    DidNotConverge,
}

impl Termination {
    pub fn is_converged(&self) -> bool {
        matches!(self, Termination::Converged(_))
    }
}

/// Trace of a single solve.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolverReport {
    /// Outer iterations performed.
    pub iterations: usize,
    /// Sum of squares at the start and after every accepted step.
    pub sum_squares_history: Vec<f64>,
    /// Damping factor when the solver stopped.
    pub lambda: f64,
    pub termination: Termination,
}

/// Fit quality computed from the final parameters and the enabled points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FitDiagnostics {
    /// `1 - SS_res / SS_tot`, clamped to `[0, 1]`.
    pub goodness_of_fit: f64,
    /// `sqrt(SS_res / n)` in the model's output units.
    pub rms_error: f64,
    /// Enabled points that contributed to the fit.
    pub enabled_count: usize,
    /// All points in the collection (enabled or not).
    pub total_count: usize,
    /// Residual sum of squares.
    pub sum_squares: f64,
}

/// Result of a solve that ran to completion (converged or not).
#[derive(Debug, Clone)]
pub struct FitOutcome<P> {
    pub params: P,
    pub diagnostics: FitDiagnostics,
    pub report: SolverReport,
}

impl<P: ParameterVector> FitOutcome<P> {
    pub fn converged(&self) -> bool {
        self.report.termination.is_converged()
    }

    /// Treat a non-converged outcome as an error.
    pub fn into_converged(self) -> Result<Self, FitError> {
        if self.converged() {
            Ok(self)
        } else {
            Err(FitError::DidNotConverge {
                iterations: self.report.iterations,
                best: self.params.to_array(),
            })
        }
    }
}

/// Bounded Levenberg–Marquardt solver.
#[derive(Debug, Clone, Default)]
pub struct LeastSquaresSolver {
    config: SolverConfig,
}

/// Enabled points flattened once per solve.
struct Samples {
    inputs: Vec<Vec<f64>>,
    outputs: Vec<f64>,
}

/// Validated bounds, scale and starting point.
struct Setup {
    lower: Vec<f64>,
    upper: Vec<f64>,
    scale: Vec<f64>,
    frozen: Vec<bool>,
    guess: Vec<f64>,
}

impl LeastSquaresSolver {
    pub fn new(config: SolverConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    /// Fit `model` against its enabled points.
    pub fn solve<M: ModelFunction>(&self, model: &M) -> Result<FitOutcome<M::Params>, FitError> {
        self.config.validate()?;

        let p = <M::Params as ParameterVector>::LEN;
        let samples = enabled_samples(model)?;
        let setup = setup(model, p)?;

        let mut params = setup.guess.clone();
        let mut ss = sum_squares(model, &params, &samples);
        if !ss.is_finite() {
            return Err(FitError::InvalidState(format!(
                "objective is not finite at the initial guess ({ss})"
            )));
        }

        let mut lambda = self.config.initial_lambda;
        let mut history = vec![ss];
        let mut termination = Termination::DidNotConverge;
        let mut iterations = 0;

        let mut jtj = DMatrix::<f64>::zeros(p, p);
        let mut jtr = DVector::<f64>::zeros(p);
        let mut row = vec![0.0; p];
        let mut trial = vec![0.0; p];

        'outer: for iter in 0..self.config.max_iterations {
            if ss == 0.0 {
                termination = Termination::Converged(ConvergenceReason::ZeroResidual);
                break;
            }
            iterations = iter + 1;

            self.normal_equations(model, &params, &samples, &setup.scale, &mut row, &mut jtj, &mut jtr)?;

            let param_norm = scaled_norm(params.iter().copied(), &setup.scale);
            let step_tol = self.config.xtol * (param_norm + self.config.xtol);

            let mut retries = 0;
            loop {
                let delta = solve_damped(&jtj, &jtr, lambda, &setup.frozen);

                let mut step_norm = f64::NAN;
                if let Some(delta) = delta {
                    for i in 0..p {
                        trial[i] = (params[i] + delta[i]).clamp(setup.lower[i], setup.upper[i]);
                    }
                    step_norm = scaled_norm((0..p).map(|i| trial[i] - params[i]), &setup.scale);
                    let ss_trial = sum_squares(model, &trial, &samples);

                    if ss_trial.is_finite() && ss_trial < ss {
                        let decrease = (ss - ss_trial) / ss;
                        params.copy_from_slice(&trial);
                        ss = ss_trial;
                        history.push(ss);
                        lambda = (lambda * self.config.lambda_down).max(LAMBDA_MIN);

                        debug!(
                            iteration = iterations,
                            ss,
                            lambda,
                            retries,
                            step = step_norm,
                            "accepted step"
                        );

                        if ss == 0.0 {
                            termination = Termination::Converged(ConvergenceReason::ZeroResidual);
                            break 'outer;
                        }
                        if decrease <= self.config.ftol {
                            termination =
                                Termination::Converged(ConvergenceReason::ObjectiveDecrease);
                            break 'outer;
                        }
                        if step_norm <= step_tol {
                            termination = Termination::Converged(ConvergenceReason::StepSize);
                            break 'outer;
                        }
                        continue 'outer;
                    }
                }

                // A rejected step this small means the objective cannot be
                // improved at the working precision.
                if step_norm <= step_tol {
                    debug!(iteration = iterations, ss, lambda, "step below tolerance");
                    termination = Termination::Converged(ConvergenceReason::StepSize);
                    break 'outer;
                }

                retries += 1;
                lambda *= self.config.lambda_up;
                if retries > self.config.max_retries {
                    warn!(iterations, lambda, ss, "damping exhausted without improvement");
                    return Err(FitError::Divergence {
                        iterations,
                        lambda,
                        best: params,
                    });
                }
            }
        }

        if termination == Termination::DidNotConverge {
            warn!(iterations, ss, "iteration cap reached before convergence");
        }

        let mut fitted = M::Params::default();
        fitted.from_array(&params)?;
        let diagnostics = diagnostics_for(model, ss, samples.outputs.len());

        Ok(FitOutcome {
            params: fitted,
            diagnostics,
            report: SolverReport {
                iterations,
                sum_squares_history: history,
                lambda,
                termination,
            },
        })
    }

    /// Accumulate `JᵀJ` and `Jᵀr` at `params`.
    #[allow(clippy::too_many_arguments)]
    fn normal_equations<M: ModelFunction>(
        &self,
        model: &M,
        params: &[f64],
        samples: &Samples,
        scale: &[f64],
        row: &mut [f64],
        jtj: &mut DMatrix<f64>,
        jtr: &mut DVector<f64>,
    ) -> Result<(), FitError> {
        let p = params.len();
        jtj.fill(0.0);
        jtr.fill(0.0);

        let analytic = model.use_analytic_gradient();
        for (input, &y) in samples.inputs.iter().zip(samples.outputs.iter()) {
            let f0 = model.value(params, input);
            if analytic {
                model.gradient(params, input, row)?;
            } else {
                numeric_gradient(
                    |q| model.value(q, input),
                    params,
                    f0,
                    scale,
                    self.config.fd_epsilon,
                    self.config.difference,
                    row,
                );
            }

            let r = y - f0;
            for i in 0..p {
                jtr[i] += row[i] * r;
                for j in i..p {
                    jtj[(i, j)] += row[i] * row[j];
                }
            }
        }

        for i in 1..p {
            for j in 0..i {
                jtj[(i, j)] = jtj[(j, i)];
            }
        }
        Ok(())
    }
}

/// Fit with the default solver configuration.
pub fn solve<M: ModelFunction>(model: &M) -> Result<FitOutcome<M::Params>, FitError> {
    LeastSquaresSolver::default().solve(model)
}

/// Solve independent problems in parallel, one result per model.
pub fn solve_many<M>(models: &[M], config: &SolverConfig) -> Vec<Result<FitOutcome<M::Params>, FitError>>
where
    M: ModelFunction + Sync,
    M::Params: Send,
{
    let solver = LeastSquaresSolver::new(config.clone());
    models.par_iter().map(|m| solver.solve(m)).collect()
}

/// Number of enabled points in the model's collection.
pub fn enabled_count<M: ModelFunction>(model: &M) -> usize {
    model.points().iter().filter(|pt| pt.is_enabled()).count()
}

/// Residual sum of squares over enabled points.
pub fn residual_sum_squares<M: ModelFunction>(model: &M, params: &[f64]) -> f64 {
    model
        .points()
        .iter()
        .filter(|pt| pt.is_enabled())
        .map(|pt| {
            let r = pt.to_output() - model.value(params, &pt.to_input());
            r * r
        })
        .sum()
}

/// RMS residual over enabled points (`NaN` when none are enabled).
pub fn rms_error<M: ModelFunction>(model: &M, params: &[f64]) -> f64 {
    let n = enabled_count(model);
    if n == 0 {
        return f64::NAN;
    }
    (residual_sum_squares(model, params) / n as f64).sqrt()
}

/// Coefficient of determination over enabled points, clamped to `[0, 1]`.
pub fn goodness_of_fit<M: ModelFunction>(model: &M, params: &[f64]) -> f64 {
    let ys: Vec<f64> = model
        .points()
        .iter()
        .filter(|pt| pt.is_enabled())
        .map(|pt| pt.to_output())
        .collect();
    r_squared(&ys, residual_sum_squares(model, params))
}

/// Recompute all diagnostics for `params`.
pub fn diagnostics<M: ModelFunction>(model: &M, params: &[f64]) -> FitDiagnostics {
    let ss = residual_sum_squares(model, params);
    diagnostics_for(model, ss, enabled_count(model))
}

fn diagnostics_for<M: ModelFunction>(model: &M, ss: f64, enabled: usize) -> FitDiagnostics {
    let ys: Vec<f64> = model
        .points()
        .iter()
        .filter(|pt| pt.is_enabled())
        .map(|pt| pt.to_output())
        .collect();
    let rms_error = if enabled == 0 {
        f64::NAN
    } else {
        (ss / enabled as f64).sqrt()
    };
    FitDiagnostics {
        goodness_of_fit: r_squared(&ys, ss),
        rms_error,
        enabled_count: enabled,
        total_count: model.points().len(),
        sum_squares: ss,
    }
}

fn r_squared(ys: &[f64], ss_res: f64) -> f64 {
    if ys.is_empty() || !ss_res.is_finite() {
        return 0.0;
    }
    let mean = ys.iter().sum::<f64>() / ys.len() as f64;
    let ss_tot: f64 = ys.iter().map(|y| (y - mean) * (y - mean)).sum();
    if ss_tot <= 0.0 {
        // Constant observations: a perfect fit explains everything there is.
        return if ss_res <= f64::EPSILON * mean.abs().max(1.0) { 1.0 } else { 0.0 };
    }
    (1.0 - ss_res / ss_tot).clamp(0.0, 1.0)
}

fn enabled_samples<M: ModelFunction>(model: &M) -> Result<Samples, FitError> {
    let p = <M::Params as ParameterVector>::LEN;
    let enabled = enabled_count(model);
    if enabled < p + 1 {
        return Err(FitError::Underdetermined {
            enabled,
            required: p + 1,
        });
    }

    let k = model.input_dim();
    let mut inputs = Vec::with_capacity(enabled);
    let mut outputs = Vec::with_capacity(enabled);
    for (idx, pt) in model.points().iter().enumerate() {
        if !pt.is_enabled() {
            continue;
        }
        let input = pt.to_input();
        if input.len() != k {
            return Err(FitError::InvalidArgument(format!(
                "point {idx} has {} inputs, model expects {k}",
                input.len()
            )));
        }
        let y = pt.to_output();
        if !(y.is_finite() && input.iter().all(|v| v.is_finite())) {
            return Err(FitError::InvalidArgument(format!(
                "point {idx} has non-finite values"
            )));
        }
        inputs.push(input);
        outputs.push(y);
    }
    Ok(Samples { inputs, outputs })
}

fn setup<M: ModelFunction>(model: &M, p: usize) -> Result<Setup, FitError> {
    let names = <M::Params as ParameterVector>::names();
    let name = |i: usize| names.get(i).copied().unwrap_or("?");

    let mut lower = vec![f64::NEG_INFINITY; p];
    let mut upper = vec![f64::INFINITY; p];
    model.bounds(&mut lower, &mut upper);
    for i in 0..p {
        if lower[i].is_nan() || upper[i].is_nan() || lower[i] > upper[i] {
            return Err(FitError::InvalidArgument(format!(
                "bounds for {} are not ordered: [{}, {}]",
                name(i),
                lower[i],
                upper[i]
            )));
        }
    }

    let mut scale = vec![1.0; p];
    model.scale(&mut scale);
    for i in 0..p {
        if !(scale[i].is_finite() && scale[i] > 0.0) {
            return Err(FitError::InvalidArgument(format!(
                "scale for {} must be finite and > 0, got {}",
                name(i),
                scale[i]
            )));
        }
    }

    let mut guess = vec![0.0; p];
    model.initial_guess(&mut guess);
    for i in 0..p {
        if !(guess[i].is_finite() && guess[i] >= lower[i] && guess[i] <= upper[i]) {
            return Err(FitError::InvalidState(format!(
                "initial guess for {} ({}) is outside [{}, {}]",
                name(i),
                guess[i],
                lower[i],
                upper[i]
            )));
        }
    }

    let frozen = (0..p).map(|i| lower[i] == upper[i]).collect();
    Ok(Setup {
        lower,
        upper,
        scale,
        frozen,
        guess,
    })
}

fn sum_squares<M: ModelFunction>(model: &M, params: &[f64], samples: &Samples) -> f64 {
    samples
        .inputs
        .iter()
        .zip(samples.outputs.iter())
        .map(|(input, &y)| {
            let r = y - model.value(params, input);
            r * r
        })
        .sum()
}

fn scaled_norm(values: impl Iterator<Item = f64>, scale: &[f64]) -> f64 {
    values
        .zip(scale.iter())
        .map(|(v, s)| (v / s) * (v / s))
        .sum::<f64>()
        .sqrt()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[derive(Debug, Clone)]
    struct Sample {
        x: f64,
        y: f64,
        enabled: bool,
    }

    impl DataPoint for Sample {
        fn to_input(&self) -> Vec<f64> {
            vec![self.x]
        }

        fn to_output(&self) -> f64 {
            self.y
        }

        fn is_enabled(&self) -> bool {
            self.enabled
        }
    }

    /// `y = a * exp(-b x) + c`
    #[derive(Debug, Clone, Default, PartialEq)]
    struct Decay {
        a: f64,
        b: f64,
        c: f64,
    }

    impl ParameterVector for Decay {
        const LEN: usize = 3;

        fn names() -> &'static [&'static str] {
            &["a", "b", "c"]
        }

        fn to_array(&self) -> Vec<f64> {
            vec![self.a, self.b, self.c]
        }

        fn from_array(&mut self, values: &[f64]) -> Result<(), FitError> {
            crate::fit::check_len::<Self>(values)?;
            self.a = values[0];
            self.b = values[1];
            self.c = values[2];
            Ok(())
        }
    }

    struct DecayProblem {
        points: Vec<Sample>,
        guess: [f64; 3],
        lower: [f64; 3],
        upper: [f64; 3],
        analytic: bool,
        evaluations: AtomicUsize,
    }

    impl DecayProblem {
        fn new(points: Vec<Sample>) -> Self {
            Self {
                points,
                guess: [1.0, 0.1, 0.0],
                lower: [f64::NEG_INFINITY, 0.0, f64::NEG_INFINITY],
                upper: [f64::INFINITY, 10.0, f64::INFINITY],
                analytic: false,
                evaluations: AtomicUsize::new(0),
            }
        }
    }

    impl ModelFunction for DecayProblem {
        type Point = Sample;
        type Params = Decay;

        fn points(&self) -> &[Sample] {
            &self.points
        }

        fn input_dim(&self) -> usize {
            1
        }

        fn value(&self, params: &[f64], input: &[f64]) -> f64 {
            self.evaluations.fetch_add(1, Ordering::Relaxed);
            params[0] * (-params[1] * input[0]).exp() + params[2]
        }

        fn use_analytic_gradient(&self) -> bool {
            self.analytic
        }

        fn gradient(&self, params: &[f64], input: &[f64], out: &mut [f64]) -> Result<(), FitError> {
            let e = (-params[1] * input[0]).exp();
            out[0] = e;
            out[1] = -params[0] * input[0] * e;
            out[2] = 1.0;
            Ok(())
        }

        fn initial_guess(&self, guess: &mut [f64]) {
            guess.copy_from_slice(&self.guess);
        }

        fn bounds(&self, lower: &mut [f64], upper: &mut [f64]) {
            lower.copy_from_slice(&self.lower);
            upper.copy_from_slice(&self.upper);
        }

        fn scale(&self, scale: &mut [f64]) {
            scale.copy_from_slice(&[1.0, 0.1, 1.0]);
        }
    }

    fn decay_points(truth: &Decay, n: usize) -> Vec<Sample> {
        (0..n)
            .map(|i| {
                let x = i as f64 * 0.5;
                Sample {
                    x,
                    y: truth.a * (-truth.b * x).exp() + truth.c,
                    enabled: true,
                }
            })
            .collect()
    }

    fn truth() -> Decay {
        Decay {
            a: 5.0,
            b: 0.7,
            c: 1.5,
        }
    }

    fn assert_close(actual: f64, expected: f64, rel: f64) {
        let tol = rel * expected.abs().max(1.0);
        assert!(
            (actual - expected).abs() <= tol,
            "expected {expected}, got {actual} (tol {tol})"
        );
    }

    #[test]
    fn recovers_exact_parameters() {
        let truth = truth();
        let problem = DecayProblem::new(decay_points(&truth, 20));
        let outcome = solve(&problem).unwrap();

        assert!(outcome.converged(), "termination: {:?}", outcome.report.termination);
        assert_close(outcome.params.a, truth.a, 1e-6);
        assert_close(outcome.params.b, truth.b, 1e-6);
        assert_close(outcome.params.c, truth.c, 1e-6);
        assert!(outcome.diagnostics.goodness_of_fit > 1.0 - 1e-9);
        assert!(outcome.diagnostics.rms_error < 1e-6);
        assert_eq!(outcome.diagnostics.enabled_count, 20);
    }

    #[test]
    fn analytic_and_numeric_gradients_agree() {
        let truth = truth();
        let numeric = solve(&DecayProblem::new(decay_points(&truth, 15))).unwrap();

        let mut problem = DecayProblem::new(decay_points(&truth, 15));
        problem.analytic = true;
        let analytic = solve(&problem).unwrap();

        for (a, b) in analytic.params.to_array().iter().zip(numeric.params.to_array()) {
            assert!((a - b).abs() < 1e-6, "analytic {a} vs numeric {b}");
        }
    }

    #[test]
    fn forward_differences_also_converge() {
        let truth = truth();
        let problem = DecayProblem::new(decay_points(&truth, 20));
        let config = SolverConfig {
            difference: Difference::Forward,
            ..SolverConfig::default()
        };
        let outcome = LeastSquaresSolver::new(config).solve(&problem).unwrap();
        assert_close(outcome.params.b, truth.b, 1e-5);
    }

    #[test]
    fn sum_of_squares_never_increases() {
        let problem = DecayProblem::new(decay_points(&truth(), 20));
        let outcome = solve(&problem).unwrap();
        let history = &outcome.report.sum_squares_history;
        assert!(history.len() >= 2);
        for pair in history.windows(2) {
            assert!(pair[1] <= pair[0], "history increased: {history:?}");
        }
    }

    #[test]
    fn result_respects_bounds() {
        // The data wants b = 0.7 but the box stops it at 0.4.
        let mut problem = DecayProblem::new(decay_points(&truth(), 20));
        problem.upper[1] = 0.4;
        let outcome = solve(&problem).unwrap();
        let lower = problem.lower;
        let upper = problem.upper;
        for (i, v) in outcome.params.to_array().iter().enumerate() {
            assert!(*v >= lower[i] && *v <= upper[i], "param {i}={v} outside bounds");
        }
        assert!(outcome.params.b > 0.35, "b = {}", outcome.params.b);
    }

    #[test]
    fn pinned_parameter_stays_fixed() {
        let mut problem = DecayProblem::new(decay_points(&truth(), 20));
        problem.guess[2] = 1.5;
        problem.lower[2] = 1.5;
        problem.upper[2] = 1.5;
        let outcome = solve(&problem).unwrap();
        assert_eq!(outcome.params.c, 1.5);
        assert_close(outcome.params.a, 5.0, 1e-6);
    }

    #[test]
    fn underdetermined_fit_never_evaluates() {
        let problem = DecayProblem::new(decay_points(&truth(), 3));
        let err = solve(&problem).unwrap_err();
        assert!(matches!(
            err,
            FitError::Underdetermined {
                enabled: 3,
                required: 4
            }
        ));
        assert_eq!(problem.evaluations.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn disabled_points_are_excluded() {
        let truth = truth();
        let mut points = decay_points(&truth, 20);
        for idx in [2, 7, 11] {
            points[idx].y += 50.0;
            points[idx].enabled = false;
        }
        let with_disabled = solve(&DecayProblem::new(points.clone())).unwrap();

        let only_enabled: Vec<Sample> = points.into_iter().filter(|p| p.enabled).collect();
        let direct = solve(&DecayProblem::new(only_enabled)).unwrap();

        assert_eq!(with_disabled.diagnostics.enabled_count, 17);
        assert_eq!(with_disabled.diagnostics.total_count, 20);
        assert_eq!(with_disabled.params, direct.params);
    }

    #[test]
    fn guess_outside_bounds_is_invalid_state() {
        let mut problem = DecayProblem::new(decay_points(&truth(), 10));
        problem.guess[1] = 20.0;
        assert!(matches!(solve(&problem), Err(FitError::InvalidState(_))));
    }

    #[test]
    fn crossed_bounds_are_invalid_argument() {
        let mut problem = DecayProblem::new(decay_points(&truth(), 10));
        problem.lower[1] = 5.0;
        problem.upper[1] = 1.0;
        assert!(matches!(solve(&problem), Err(FitError::InvalidArgument(_))));
    }

    #[test]
    fn missing_analytic_gradient_is_not_supported() {
        struct NoGradient(DecayProblem);

        impl ModelFunction for NoGradient {
            type Point = Sample;
            type Params = Decay;

            fn points(&self) -> &[Sample] {
                self.0.points()
            }

            fn input_dim(&self) -> usize {
                1
            }

            fn value(&self, params: &[f64], input: &[f64]) -> f64 {
                self.0.value(params, input)
            }

            fn use_analytic_gradient(&self) -> bool {
                true
            }

            fn initial_guess(&self, guess: &mut [f64]) {
                self.0.initial_guess(guess)
            }

            fn bounds(&self, lower: &mut [f64], upper: &mut [f64]) {
                self.0.bounds(lower, upper)
            }

            fn scale(&self, scale: &mut [f64]) {
                self.0.scale(scale)
            }
        }

        let problem = NoGradient(DecayProblem::new(decay_points(&truth(), 10)));
        assert!(matches!(solve(&problem), Err(FitError::NotSupported(_))));
    }

    #[test]
    fn non_finite_jacobian_diverges() {
        /// `y = sqrt(a) * x`, started at the branch point `a = 0`, where the
        /// central difference evaluates `sqrt(-h)`.
        struct SqrtProblem(Vec<Sample>);

        #[derive(Debug, Default)]
        struct One(f64);

        impl ParameterVector for One {
            const LEN: usize = 1;

            fn names() -> &'static [&'static str] {
                &["a"]
            }

            fn to_array(&self) -> Vec<f64> {
                vec![self.0]
            }

            fn from_array(&mut self, values: &[f64]) -> Result<(), FitError> {
                crate::fit::check_len::<Self>(values)?;
                self.0 = values[0];
                Ok(())
            }
        }

        impl ModelFunction for SqrtProblem {
            type Point = Sample;
            type Params = One;

            fn points(&self) -> &[Sample] {
                &self.0
            }

            fn input_dim(&self) -> usize {
                1
            }

            fn value(&self, params: &[f64], input: &[f64]) -> f64 {
                params[0].sqrt() * input[0]
            }

            fn initial_guess(&self, guess: &mut [f64]) {
                guess[0] = 0.0;
            }

            fn bounds(&self, lower: &mut [f64], upper: &mut [f64]) {
                lower[0] = 0.0;
                upper[0] = f64::INFINITY;
            }

            fn scale(&self, scale: &mut [f64]) {
                scale[0] = 1.0;
            }
        }

        let points = (1..6)
            .map(|i| Sample {
                x: i as f64,
                y: 2.0 * i as f64,
                enabled: true,
            })
            .collect();
        let err = solve(&SqrtProblem(points)).unwrap_err();
        match err {
            FitError::Divergence { best, .. } => assert_eq!(best, vec![0.0]),
            other => panic!("expected divergence, got {other:?}"),
        }
    }

    #[test]
    fn iteration_cap_returns_best_effort() {
        let problem = DecayProblem::new(decay_points(&truth(), 20));
        let config = SolverConfig {
            max_iterations: 1,
            ..SolverConfig::default()
        };
        let outcome = LeastSquaresSolver::new(config).solve(&problem).unwrap();
        assert_eq!(outcome.report.termination, Termination::DidNotConverge);
        assert_eq!(outcome.report.iterations, 1);
        let initial = outcome.report.sum_squares_history[0];
        assert!(outcome.diagnostics.sum_squares <= initial);

        let err = outcome.into_converged().unwrap_err();
        assert!(matches!(err, FitError::DidNotConverge { iterations: 1, .. }));
    }

    #[test]
    fn solve_many_matches_sequential() {
        let truth = truth();
        let problems: Vec<DecayProblem> = (10..14)
            .map(|n| DecayProblem::new(decay_points(&truth, n)))
            .collect();
        let results = solve_many(&problems, &SolverConfig::default());
        assert_eq!(results.len(), 4);
        for (problem, result) in problems.iter().zip(results) {
            let parallel = result.unwrap();
            let sequential = solve(problem).unwrap();
            assert_eq!(parallel.params, sequential.params);
        }
    }

    #[test]
    fn constant_observations_score_perfect_fit() {
        assert_eq!(r_squared(&[3.0, 3.0, 3.0], 0.0), 1.0);
        assert_eq!(r_squared(&[3.0, 3.0, 3.0], 1.0), 0.0);
        assert!((r_squared(&[1.0, 2.0, 3.0], 1.0) - 0.5).abs() < 1e-12);
    }
}
