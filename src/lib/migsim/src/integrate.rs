use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::error::Error;
use crate::operator::{FarBoundary, Operator};
use crate::solver::{solve_tridiagonal, solve_with_corner};

/// Step-change clamps and safety factor of the controller.
const STEP_SAFETY: f64 = 0.9;
const STEP_SHRINK_MIN: f64 = 0.2;
const STEP_GROW_MAX: f64 = 5.0;
/// Step-size floor relative to the integration span.
const STEP_FLOOR_REL: f64 = 1e-14;
/// Initial step relative to the integration span.
const FIRST_STEP_REL: f64 = 1e-6;

/// Options for one integration run. Times in seconds.
#[derive(Clone, Serialize, Deserialize)]
pub struct IntegrationOptions {
    /// Requested snapshot times [s]; strictly increasing, at least two
    /// entries, first entry ≥ 0 (the initial state is reported there).
    pub time_grid: Vec<f64>,
    /// Absolute tolerance on non-dimensional concentrations.
    pub atol: f64,
    /// Relative tolerance.
    pub rtol: f64,
    pub far_boundary: FarBoundary,
    /// Attempt budget (accepted + rejected steps); exceeding it cancels.
    pub max_steps: Option<usize>,
    /// Also emit snapshots at every accepted solver step.
    pub include_solver_steps: bool,
    /// Relative tolerance of the end-of-run mass audit.
    pub mass_balance_tol: f64,
    /// Promote a failed mass audit from a result warning to a fatal error.
    pub strict_mass_balance: bool,
    /// Deadline probe, polled once per attempted step; returning `true`
    /// cancels the run. The only clock the core ever consults.
    #[serde(skip)]
    pub deadline: Option<Arc<dyn Fn() -> bool + Send + Sync>>,
}

impl Default for IntegrationOptions {
    fn default() -> Self {
        IntegrationOptions {
            time_grid: Vec::new(),
            atol: 1e-8,
            rtol: 1e-6,
            far_boundary: FarBoundary::Impermeable,
            max_steps: None,
            include_solver_steps: false,
            mass_balance_tol: 1e-3,
            strict_mass_balance: false,
            deadline: None,
        }
    }
}

impl fmt::Debug for IntegrationOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IntegrationOptions")
            .field("time_grid", &self.time_grid)
            .field("atol", &self.atol)
            .field("rtol", &self.rtol)
            .field("far_boundary", &self.far_boundary)
            .field("max_steps", &self.max_steps)
            .field("include_solver_steps", &self.include_solver_steps)
            .field("mass_balance_tol", &self.mass_balance_tol)
            .field("strict_mass_balance", &self.strict_mass_balance)
            .field("deadline", &self.deadline.as_ref().map(|_| "<callback>"))
            .finish()
    }
}

impl IntegrationOptions {
    /// Evenly spaced grid over `[0, t_end]` with `n_points ≥ 2` snapshots.
    pub fn over_duration(t_end: f64, n_points: usize) -> Self {
        let n = n_points.max(2);
        let time_grid = (0..n)
            .map(|i| t_end * i as f64 / (n - 1) as f64)
            .collect();
        IntegrationOptions {
            time_grid,
            ..Default::default()
        }
    }

    pub fn with_far_boundary(mut self, far: FarBoundary) -> Self {
        self.far_boundary = far;
        self
    }

    pub fn with_tolerances(mut self, atol: f64, rtol: f64) -> Self {
        self.atol = atol;
        self.rtol = rtol;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), Error> {
        if self.time_grid.len() < 2 {
            return Err(Error::invalid(
                "time grid must contain at least two points",
            ));
        }
        if !self.time_grid.iter().all(|t| t.is_finite()) || self.time_grid[0] < 0.0 {
            return Err(Error::invalid("time grid must be finite and start at t ≥ 0"));
        }
        if !self.time_grid.windows(2).all(|w| w[1] > w[0]) {
            return Err(Error::invalid("time grid must be strictly increasing"));
        }
        for (label, v) in [
            ("atol", self.atol),
            ("rtol", self.rtol),
            ("mass balance tolerance", self.mass_balance_tol),
        ] {
            if !v.is_finite() || v <= 0.0 {
                return Err(Error::invalid(format!(
                    "{label} must be positive and finite, got: {v}"
                )));
            }
        }
        Ok(())
    }
}

/// Raw dimensionless output of the driver, one entry per emitted time.
#[derive(Debug)]
pub(crate) struct RawSolution {
    pub fo_times: Vec<f64>,
    pub states: Vec<DVector<f64>>,
    /// Cumulative desorbed areal mass, in units of L·C.
    pub desorbed: Vec<f64>,
    /// Relative drift of the conserved mass at each emitted time.
    pub mass_drift: Vec<f64>,
    pub steps: usize,
    pub rejected: usize,
    pub warnings: Vec<String>,
}

/// Advance the semi-discrete system dy/dFo = L·y over the dimensionless
/// grid with a variable-step, variable-order (1–2) BDF scheme.
///
/// Each attempted step is one or two banded direct solves; the local error
/// is estimated from the corrector-minus-predictor difference in a WRMS
/// norm and the step size adapts with a safety factor and clamped growth,
/// retrying rejected steps with a shorter dt. Dense output between accepted
/// steps is cubic Hermite (exact endpoint derivatives L·y); the cumulative
/// contact-face flux is integrated exactly along that cubic.
///
/// `tau` [s/Fo] only converts times in error reports; `cscale` scales the
/// absolute tolerance to the problem's concentration unit.
pub(crate) fn integrate(
    op: &Operator,
    y0: DVector<f64>,
    fo_grid: &[f64],
    opts: &IntegrationOptions,
    cscale: f64,
    tau: f64,
) -> Result<RawSolution, Error> {
    let t0 = fo_grid[0];
    let t_end = *fo_grid.last().expect("validated grid");
    let span = t_end - t0;
    let t_eps = span * 1e-12;
    let h_min = span * STEP_FLOOR_REL;

    let m0 = op.total_mass(&y0);
    let drift_denom = m0.abs().max(opts.atol * cscale);

    let mut out = RawSolution {
        fo_times: vec![t0],
        states: vec![y0.clone()],
        desorbed: vec![0.0],
        mass_drift: vec![0.0],
        steps: 0,
        rejected: 0,
        warnings: Vec::new(),
    };

    let mut t = t0;
    let mut y = y0;
    let mut f = op.apply(&y);
    let mut q = 0.0_f64; // cumulative desorbed mass at the current step start
    let mut h = span * FIRST_STEP_REL;
    // Last accepted points, oldest first; at most three are kept.
    let mut history: Vec<(f64, DVector<f64>)> = vec![(t, y.clone())];
    let mut gi = 1usize;
    let mut attempts = 0usize;

    while t_end - t > t_eps {
        attempts += 1;
        if let Some(max) = opts.max_steps {
            if attempts > max {
                return Err(Error::Cancelled {
                    t_last: t * tau,
                    steps: attempts - 1,
                });
            }
        }
        if let Some(deadline) = &opts.deadline {
            if deadline() {
                return Err(Error::Cancelled {
                    t_last: t * tau,
                    steps: attempts - 1,
                });
            }
        }

        h = h.min(t_end - t);

        // One implicit solve per attempt; order 2 once history allows.
        let (order, solved, y_pred) = if history.len() >= 2 {
            let (t_prev, y_prev) = {
                let p = &history[history.len() - 2];
                (p.0, p.1.clone())
            };
            let h_prev = t - t_prev;
            let rho = h / h_prev;
            let beta = (1.0 + rho) / (1.0 + 2.0 * rho);
            let rhs = (&y * (1.0 + rho).powi(2) - &y_prev * rho.powi(2)) / (1.0 + 2.0 * rho);
            let solved = implicit_solve(op, 1.0, beta * h, &rhs);
            let y_pred = if history.len() >= 3 {
                let (ta, ya) = (&history[history.len() - 3].0, &history[history.len() - 3].1);
                quadratic_extrapolate(*ta, ya, t_prev, &y_prev, t, &y, t + h)
            } else {
                // Only two points yet: linear extrapolation.
                &y + (&y - &y_prev) * rho
            };
            (2u8, solved, y_pred)
        } else {
            let solved = implicit_solve(op, 1.0, h, &y);
            let y_pred = &y + &f * h;
            (1u8, solved, y_pred)
        };

        let est = match &solved {
            Some(y_new) => {
                let err = y_new - &y_pred;
                let e = wrms(&err, y_new, &y, opts.atol * cscale, opts.rtol);
                if order == 1 { 0.5 * e } else { e }
            }
            None => f64::INFINITY,
        };

        if !est.is_finite() || est > 1.0 {
            // Reject: shrink and retry the same interval.
            out.rejected += 1;
            let fac = if est.is_finite() {
                (STEP_SAFETY * est.powf(-1.0 / (order as f64 + 1.0))).max(STEP_SHRINK_MIN)
            } else {
                STEP_SHRINK_MIN
            };
            h *= fac;
            log::debug!("step rejected at Fo={t:.3e} (order {order}, est {est:.3e})");
            if h < h_min {
                return Err(Error::IntegrationFailure {
                    t_last: t * tau,
                    residual: est,
                });
            }
            continue;
        }

        let y_new = solved.expect("accepted step has a solution");
        let f_new = op.apply(&y_new);
        let t_new = t + h;

        // Scalar flux Hermite data: the contact flux is linear in the state.
        let j0 = op.contact_flux(&y);
        let j1 = op.contact_flux(&y_new);
        let jd0 = op.contact_flux(&f);
        let jd1 = op.contact_flux(&f_new);

        // Dense output at every requested time inside (t, t_new].
        while gi < fo_grid.len() && fo_grid[gi] <= t_new + t_eps {
            let tg = fo_grid[gi];
            let theta = ((tg - t) / h).clamp(0.0, 1.0);
            let ys = hermite_state(&y, &f, &y_new, &f_new, h, theta);
            let qs = q + hermite_integral(j0, jd0, j1, jd1, h, theta);
            push_emission(&mut out, op, tg, ys, qs, drift_denom, m0);
            gi += 1;
        }
        if opts.include_solver_steps
            && out
                .fo_times
                .last()
                .map(|last| t_new - last > t_eps)
                .unwrap_or(true)
        {
            let qs = q + hermite_integral(j0, jd0, j1, jd1, h, 1.0);
            push_emission(&mut out, op, t_new, y_new.clone(), qs, drift_denom, m0);
        }

        q += hermite_integral(j0, jd0, j1, jd1, h, 1.0);
        t = t_new;
        y = y_new;
        f = f_new;
        history.push((t, y.clone()));
        if history.len() > 3 {
            history.remove(0);
        }
        out.steps += 1;

        let fac = (STEP_SAFETY * est.max(1e-10).powf(-1.0 / (order as f64 + 1.0)))
            .clamp(STEP_SHRINK_MIN, STEP_GROW_MAX);
        h *= fac;
    }

    // Round-off can leave the last grid point un-emitted.
    while gi < fo_grid.len() {
        push_emission(&mut out, op, fo_grid[gi], y.clone(), q, drift_denom, m0);
        gi += 1;
    }

    // End-of-run mass audit.
    let drift = (op.total_mass(&y) - m0).abs() / drift_denom;
    if drift > opts.mass_balance_tol {
        if opts.strict_mass_balance {
            return Err(Error::MassBalanceViolation {
                drift,
                tol: opts.mass_balance_tol,
            });
        }
        let msg = format!(
            "mass balance drift {drift:.3e} exceeds tolerance {:.3e}",
            opts.mass_balance_tol
        );
        log::warn!("{msg}");
        out.warnings.push(msg);
    }

    Ok(out)
}

fn push_emission(
    out: &mut RawSolution,
    op: &Operator,
    t: f64,
    state: DVector<f64>,
    desorbed: f64,
    drift_denom: f64,
    m0: f64,
) {
    let drift = (op.total_mass(&state) - m0).abs() / drift_denom;
    out.fo_times.push(t);
    out.desorbed.push(desorbed);
    out.mass_drift.push(drift);
    out.states.push(state);
}

/// Solve (c·I − s·L)·y = rhs. The solve runs in the potential variable
/// φ = C/k (columns scaled by the state-indexed k), where the matrix is
/// strictly diagonally dominant, so unpivoted Thomas elimination is safe
/// across arbitrary partition jumps.
fn implicit_solve(op: &Operator, c: f64, s: f64, rhs: &DVector<f64>) -> Option<DVector<f64>> {
    let (mut lower, mut diag, mut upper, corner) = op.implicit_bands(c, s);
    let ks = op.k_state();
    let m = diag.len();
    for i in 0..m {
        if i > 0 {
            lower[i] *= ks[i - 1];
        }
        diag[i] *= ks[i];
        if i + 1 < m {
            upper[i] *= ks[i + 1];
        }
    }
    let corner = corner.map(|(i, j, a_ij, a_ji)| (i, j, a_ij * ks[j], a_ji * ks[i]));
    let phi = match corner {
        Some(corner) => solve_with_corner(&lower, &diag, &upper, corner, rhs.as_slice()),
        None => solve_tridiagonal(&lower, &diag, &upper, rhs.as_slice()),
    }?;
    Some(DVector::from_iterator(
        m,
        phi.iter().zip(ks).map(|(p, k)| p * k),
    ))
}

/// Weighted RMS norm of an error vector against the larger of the step's
/// endpoint magnitudes.
fn wrms(err: &DVector<f64>, a: &DVector<f64>, b: &DVector<f64>, atol: f64, rtol: f64) -> f64 {
    let n = err.len();
    let mut acc = 0.0;
    for i in 0..n {
        let w = atol + rtol * a[i].abs().max(b[i].abs());
        let r = err[i] / w;
        acc += r * r;
    }
    (acc / n as f64).sqrt()
}

/// Quadratic (Lagrange) extrapolation through three points, evaluated at `t`.
fn quadratic_extrapolate(
    ta: f64,
    ya: &DVector<f64>,
    tb: f64,
    yb: &DVector<f64>,
    tc: f64,
    yc: &DVector<f64>,
    t: f64,
) -> DVector<f64> {
    let wa = (t - tb) * (t - tc) / ((ta - tb) * (ta - tc));
    let wb = (t - ta) * (t - tc) / ((tb - ta) * (tb - tc));
    let wc = (t - ta) * (t - tb) / ((tc - ta) * (tc - tb));
    ya * wa + yb * wb + yc * wc
}

/// Cubic Hermite interpolant on an accepted step, θ ∈ [0, 1].
fn hermite_state(
    y0: &DVector<f64>,
    f0: &DVector<f64>,
    y1: &DVector<f64>,
    f1: &DVector<f64>,
    h: f64,
    theta: f64,
) -> DVector<f64> {
    let t2 = theta * theta;
    let t3 = t2 * theta;
    let h00 = 2.0 * t3 - 3.0 * t2 + 1.0;
    let h10 = t3 - 2.0 * t2 + theta;
    let h01 = -2.0 * t3 + 3.0 * t2;
    let h11 = t3 - t2;
    y0 * h00 + f0 * (h10 * h) + y1 * h01 + f1 * (h11 * h)
}

/// ∫₀^θ of the scalar Hermite cubic, times h: the exact cumulative flux over
/// the partial step for a flux that is linear in the state.
fn hermite_integral(j0: f64, jd0: f64, j1: f64, jd1: f64, h: f64, theta: f64) -> f64 {
    let t2 = theta * theta;
    let t3 = t2 * theta;
    let t4 = t3 * theta;
    let i00 = 0.5 * t4 - t3 + theta;
    let i10 = 0.25 * t4 - 2.0 * t3 / 3.0 + 0.5 * t2;
    let i01 = t3 - 0.5 * t4;
    let i11 = 0.25 * t4 - t3 / 3.0;
    h * (j0 * i00 + h * jd0 * i10 + j1 * i01 + h * jd1 * i11)
}
