use thiserror::Error;

/// Error surface of the solver core.
///
/// Every fallible operation returns one of these kinds; partial outputs are
/// discarded on error. `Cancelled` is deliberately distinct from
/// `IntegrationFailure` so callers can tell a budget/deadline stop from a
/// solver that could not meet tolerance.
#[derive(Debug, Error)]
pub enum Error {
    /// Non-positive thickness/D/k, empty multilayer, non-finite value,
    /// malformed time grid.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Concatenating results with mismatched mesh geometry or species.
    #[error("incompatible composition: {0}")]
    IncompatibleComposition(String),

    /// The step controller hit the step-size floor before reaching the end
    /// of the time grid. `t_last` is the last converged time [s].
    #[error("integration failed at t = {t_last:.6e} s (weighted residual {residual:.3e})")]
    IntegrationFailure { t_last: f64, residual: f64 },

    /// Step budget or deadline callback tripped. `t_last` [s].
    #[error("integration cancelled at t = {t_last:.6e} s after {steps} steps")]
    Cancelled { t_last: f64, steps: usize },

    /// End-of-run mass audit exceeded tolerance and the run was configured
    /// strict. Non-strict runs record the drift as a warning instead.
    #[error("mass balance drift {drift:.3e} exceeds tolerance {tol:.3e}")]
    MassBalanceViolation { drift: f64, tol: f64 },

    /// A chained scenario aborted; `index` is the zero-based failing stage.
    #[error("chain stage {index} failed: {source}")]
    ChainStep {
        index: usize,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }
}
