use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::integrate::{IntegrationOptions, RawSolution};
use crate::material::Medium;
use crate::mesh::Mesh;
use crate::post;

/// Version of the flat persistence schema.
pub const SCHEMA_VERSION: u32 = 1;

/// Relative tolerance used when checking mesh geometry and CF continuity
/// for concatenation.
const COMPAT_RTOL: f64 = 1e-9;
const CF_CONTINUITY_RTOL: f64 = 1e-6;

/// Dimensional scales of a run: lengths in meters, times in seconds
/// (τ = L²/D_ref), concentrations in the caller's unit.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Scales {
    pub length: f64,
    pub time: f64,
    pub concentration: f64,
}

/// Descriptive metadata carried by a result.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Metadata {
    pub name: String,
    pub species: Option<String>,
    /// Accepted solver steps.
    pub steps: usize,
    /// Rejected step attempts.
    pub rejected_steps: usize,
    /// Non-fatal diagnostics (mass-balance drift and the like).
    pub warnings: Vec<String>,
}

/// One stored instant: time [s], wall cells, medium concentration and the
/// cumulative areal mass desorbed into the medium [C·m].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Snapshot {
    pub t: f64,
    pub cells: Vec<f64>,
    pub c_f: f64,
    pub desorbed: f64,
}

/// Value-typed restart record: the last snapshot plus the full parameter
/// set, sufficient to resume without back-pointers.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RestartRecord {
    pub version: u32,
    /// Time of the captured state [s], relative to its own run.
    pub t: f64,
    pub cells: Vec<f64>,
    pub c_f: f64,
    pub mesh: Mesh,
    pub medium: Medium,
    pub options: IntegrationOptions,
    pub species: Option<String>,
}

/// Flat persistence schema; field order is part of the contract:
/// times, Cxt matrix, CF vector, scales, metadata string.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResultSchema {
    pub version: u32,
    pub times: Vec<f64>,
    pub cxt: Vec<Vec<f64>>,
    pub cf: Vec<f64>,
    pub scales: Scales,
    pub metadata: String,
}

/// One simulation run. Immutable after construction: accessors hand out
/// slices, views or copies only.
#[derive(Clone, Debug)]
pub struct SimResult {
    /// Snapshot times [s], strictly increasing.
    times: Vec<f64>,
    /// Wall concentrations, shape (n_times, n_cells).
    cxt: Array2<f64>,
    /// Medium concentration per snapshot.
    cf: Vec<f64>,
    /// Cumulative desorbed areal mass per snapshot [C·m].
    desorbed: Vec<f64>,
    /// Relative drift of the conserved mass per snapshot.
    mass_drift: Vec<f64>,
    mesh: Mesh,
    medium: Medium,
    options: IntegrationOptions,
    scales: Scales,
    metadata: Metadata,
}

impl SimResult {
    pub(crate) fn from_raw(
        raw: RawSolution,
        mesh: Mesh,
        medium: Medium,
        options: IntegrationOptions,
        scales: Scales,
        name: String,
        species: Option<String>,
    ) -> Self {
        let nt = raw.fo_times.len();
        let n = mesh.n_cells();
        let times: Vec<f64> = raw.fo_times.iter().map(|fo| fo * scales.time).collect();
        let cxt = Array2::from_shape_fn((nt, n), |(r, c)| raw.states[r][c + 1]);
        let cf: Vec<f64> = raw.states.iter().map(|s| s[0]).collect();
        let desorbed: Vec<f64> = raw.desorbed.iter().map(|q| q * scales.length).collect();
        SimResult {
            times,
            cxt,
            cf,
            desorbed,
            mass_drift: raw.mass_drift,
            mesh,
            medium,
            options,
            scales,
            metadata: Metadata {
                name,
                species,
                steps: raw.steps,
                rejected_steps: raw.rejected,
                warnings: raw.warnings,
            },
        }
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    /// Snapshot times in Fourier units Fo = t/τ.
    pub fn fourier_times(&self) -> Vec<f64> {
        self.times.iter().map(|t| t / self.scales.time).collect()
    }

    pub fn n_times(&self) -> usize {
        self.times.len()
    }

    pub fn n_cells(&self) -> usize {
        self.mesh.n_cells()
    }

    pub fn cf(&self) -> &[f64] {
        &self.cf
    }

    pub fn desorbed(&self) -> &[f64] {
        &self.desorbed
    }

    pub fn mass_drift(&self) -> &[f64] {
        &self.mass_drift
    }

    /// Read-only view of the full C(x,t) matrix, shape (n_times, n_cells).
    pub fn cxt(&self) -> ArrayView2<'_, f64> {
        self.cxt.view()
    }

    pub fn mesh(&self) -> &Mesh {
        &self.mesh
    }

    pub fn medium(&self) -> &Medium {
        &self.medium
    }

    pub fn options(&self) -> &IntegrationOptions {
        &self.options
    }

    pub fn scales(&self) -> Scales {
        self.scales
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Wall concentrations of snapshot `i`.
    pub fn c_wall(&self, i: usize) -> Vec<f64> {
        self.cxt.row(i).to_vec()
    }

    pub fn snapshot(&self, i: usize) -> Snapshot {
        Snapshot {
            t: self.times[i],
            cells: self.c_wall(i),
            c_f: self.cf[i],
            desorbed: self.desorbed[i],
        }
    }

    pub fn final_snapshot(&self) -> Snapshot {
        self.snapshot(self.n_times() - 1)
    }

    /// Medium concentration at an arbitrary time [s], piecewise-cubic in t,
    /// clamped to the run's span.
    pub fn cf_at(&self, t: f64) -> f64 {
        post::interp_cubic(&self.times, &self.cf, t)
    }

    /// Wall concentrations at an arbitrary time [s], piecewise-cubic per
    /// cell.
    pub fn c_wall_at(&self, t: f64) -> Vec<f64> {
        let nt = self.n_times();
        let mut column = vec![0.0; nt];
        (0..self.n_cells())
            .map(|j| {
                for (r, slot) in column.iter_mut().enumerate() {
                    *slot = self.cxt[(r, j)];
                }
                post::interp_cubic(&self.times, &column, t)
            })
            .collect()
    }

    /// Profile (x, C) at an arbitrary time, with interface reconstructions
    /// and boundary faces included.
    pub fn profile_at(&self, t: f64) -> Vec<(f64, f64)> {
        let cells = self.c_wall_at(t);
        post::profile_points(
            &self.mesh,
            &self.medium,
            &cells,
            self.cf_at(t),
            self.options.far_boundary,
        )
    }

    /// Worst disagreement between the medium inventory (V/A)·(CF−CF(0)) and
    /// the time-integrated contact-face flux, relative to the final desorbed
    /// mass. The two are computed independently and must agree to integrator
    /// tolerance.
    pub fn flux_balance_error(&self) -> f64 {
        let va = self.medium.capacity_length();
        let denom = self
            .desorbed
            .last()
            .map(|d| d.abs())
            .unwrap_or(0.0)
            .max(f64::MIN_POSITIVE);
        self.cf
            .iter()
            .zip(&self.desorbed)
            .map(|(cf, q)| ((va * (cf - self.cf[0]) + self.desorbed[0] - q).abs()) / denom)
            .fold(0.0, f64::max)
    }

    /// Capture the end state and the full parameter set.
    pub fn savestate(&self) -> RestartRecord {
        let last = self.final_snapshot();
        RestartRecord {
            version: SCHEMA_VERSION,
            t: last.t,
            cells: last.cells,
            c_f: last.c_f,
            mesh: self.mesh.clone(),
            medium: self.medium.clone(),
            options: self.options.clone(),
            species: self.metadata.species.clone(),
        }
    }

    /// Fresh integration from the last snapshot with identical parameters
    /// over a new local time grid (starting at 0).
    pub fn resume(&self, time_grid: Vec<f64>) -> Result<SimResult, Error> {
        let last = self.final_snapshot();
        let mut options = self.options.clone();
        options.time_grid = time_grid;
        crate::run_from_state(
            &self.mesh,
            &self.medium,
            &options,
            &last.cells,
            last.c_f,
            format!("{} (resumed)", self.metadata.name),
            self.metadata.species.clone(),
        )
    }

    /// Concatenate two compatible runs: `other`'s clock is shifted to start
    /// at this run's final time and its first (duplicate) snapshot dropped.
    ///
    /// `other`'s initial CF must equal this run's final CF unless
    /// `rebase_cf` is set, in which case `other`'s CF trace is shifted to
    /// close the gap. The combined result keeps `other`'s medium (the one
    /// in contact at the end).
    pub fn concatenate(&self, other: &SimResult, rebase_cf: bool) -> Result<SimResult, Error> {
        if !self.mesh.compatible(&other.mesh, COMPAT_RTOL) {
            return Err(Error::IncompatibleComposition(
                "mesh geometry differs (cell count, widths, D or k)".into(),
            ));
        }
        if self.metadata.species != other.metadata.species {
            return Err(Error::IncompatibleComposition(format!(
                "species differ: {:?} vs {:?}",
                self.metadata.species, other.metadata.species
            )));
        }

        let t_end = *self.times.last().expect("non-empty result");
        let cf_end = *self.cf.last().expect("non-empty result");
        let gap = other.cf[0] - cf_end;
        let cf_scale = cf_end.abs().max(other.cf[0].abs()).max(1.0);
        if gap.abs() > CF_CONTINUITY_RTOL * cf_scale && !rebase_cf {
            return Err(Error::IncompatibleComposition(format!(
                "CF discontinuity {gap:.3e} at the junction; pass rebase_cf to shift"
            )));
        }
        let cf_shift = if rebase_cf { -gap } else { 0.0 };

        let t0_other = other.times[0];
        let mut times = self.times.clone();
        times.extend(other.times[1..].iter().map(|t| t - t0_other + t_end));

        let n = self.n_cells();
        let nt = self.n_times() + other.n_times() - 1;
        let mut cxt = Array2::zeros((nt, n));
        for (r, row) in self.cxt.rows().into_iter().enumerate() {
            cxt.row_mut(r).assign(&row);
        }
        for (r, row) in other.cxt.rows().into_iter().enumerate().skip(1) {
            cxt.row_mut(self.n_times() + r - 1).assign(&row);
        }

        let mut cf = self.cf.clone();
        cf.extend(other.cf[1..].iter().map(|v| v + cf_shift));

        let q_end = *self.desorbed.last().expect("non-empty result");
        let q0_other = other.desorbed[0];
        let mut desorbed = self.desorbed.clone();
        desorbed.extend(other.desorbed[1..].iter().map(|q| q - q0_other + q_end));

        let mut mass_drift = self.mass_drift.clone();
        mass_drift.extend_from_slice(&other.mass_drift[1..]);

        let mut warnings = self.metadata.warnings.clone();
        warnings.extend_from_slice(&other.metadata.warnings);

        Ok(SimResult {
            times,
            cxt,
            cf,
            desorbed,
            mass_drift,
            mesh: self.mesh.clone(),
            medium: other.medium.clone(),
            options: self.options.clone(),
            scales: self.scales,
            metadata: Metadata {
                name: format!("{}+{}", self.metadata.name, other.metadata.name),
                species: self.metadata.species.clone(),
                steps: self.metadata.steps + other.metadata.steps,
                rejected_steps: self.metadata.rejected_steps + other.metadata.rejected_steps,
                warnings,
            },
        })
    }

    /// Export to the flat versioned schema.
    pub fn to_schema(&self) -> ResultSchema {
        ResultSchema {
            version: SCHEMA_VERSION,
            times: self.times.clone(),
            cxt: self
                .cxt
                .rows()
                .into_iter()
                .map(|r| r.to_vec())
                .collect(),
            cf: self.cf.clone(),
            scales: self.scales,
            metadata: format!(
                "name={}; species={}; steps={}; rejected={}; warnings={}",
                self.metadata.name,
                self.metadata.species.as_deref().unwrap_or("-"),
                self.metadata.steps,
                self.metadata.rejected_steps,
                self.metadata.warnings.join(" | "),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::material::{Layer, Medium, Multilayer};
    use crate::simulate;

    fn small_run(n_cells: usize, days: f64) -> SimResult {
        let stack = Multilayer::new(vec![
            Layer::new(1e-4, 1e-13, 1.0, 100.0).with_cells(n_cells),
        ])
        .unwrap()
        .with_migrant("surrogate");
        let medium = Medium::new(1.0, 1e-3, 1.0, 0.0);
        let options = IntegrationOptions::over_duration(days * 86400.0, 11);
        simulate(&stack, &medium, &options).unwrap()
    }

    #[test]
    fn accessors_expose_consistent_shapes() {
        let r = small_run(12, 1.0);
        assert_eq!(r.n_times(), 11);
        assert_eq!(r.n_cells(), 12);
        assert_eq!(r.cf().len(), 11);
        assert_eq!(r.cxt().dim(), (11, 12));
        assert_eq!(r.snapshot(0).cells.len(), 12);
        assert!((r.scales().length - 1e-4).abs() < 1e-18);
    }

    #[test]
    fn cf_interpolation_matches_nodes() {
        let r = small_run(12, 1.0);
        for (i, t) in r.times().iter().enumerate() {
            assert!((r.cf_at(*t) - r.cf()[i]).abs() < 1e-12 * r.cf()[i].abs().max(1.0));
        }
    }

    #[test]
    fn flux_integral_cross_check_agrees() {
        let r = small_run(20, 5.0);
        assert!(
            r.flux_balance_error() < 1e-4,
            "cross-check error {}",
            r.flux_balance_error()
        );
    }

    #[test]
    fn concatenation_shifts_time_and_keeps_cf_continuous() {
        let r = small_run(12, 1.0);
        let resumed = r.resume(IntegrationOptions::over_duration(86400.0, 6).time_grid).unwrap();
        let joined = r.concatenate(&resumed, false).unwrap();
        assert_eq!(joined.n_times(), 11 + 6 - 1);
        for w in joined.times().windows(2) {
            assert!(w[1] > w[0]);
        }
        // CF and desorbed mass continuous at the junction.
        let j = 10;
        assert!(joined.cf()[j + 1] >= joined.cf()[j] - 1e-9);
        assert!(joined.desorbed()[j + 1] >= joined.desorbed()[j] - 1e-12);
        assert!((joined.times().last().unwrap() - 2.0 * 86400.0).abs() < 1.0);
    }

    #[test]
    fn concatenation_rejects_different_meshes() {
        let a = small_run(12, 1.0);
        let b = small_run(16, 1.0);
        assert!(matches!(
            a.concatenate(&b, false),
            Err(Error::IncompatibleComposition(_))
        ));
    }

    #[test]
    fn concatenation_rejects_cf_gap_without_rebase() {
        let a = small_run(12, 1.0);
        // A fresh run starts from CF = 0 while `a` ends above zero.
        let b = small_run(12, 1.0);
        let err = a.concatenate(&b, false).unwrap_err();
        assert!(matches!(err, Error::IncompatibleComposition(_)));
        // With rebase the CF trace is shifted so that b's (dropped) first
        // point would land exactly on a's final CF.
        let joined = a.concatenate(&b, true).unwrap();
        let j = a.n_times() - 1;
        let shift = a.cf().last().unwrap() - b.cf()[0];
        assert!((joined.cf()[j + 1] - (b.cf()[1] + shift)).abs() < 1e-12);
    }

    #[test]
    fn savestate_roundtrips_through_json() {
        let r = small_run(12, 1.0);
        let record = r.savestate();
        let text = serde_json::to_string(&record).unwrap();
        let back: RestartRecord = serde_json::from_str(&text).unwrap();
        assert_eq!(back.version, SCHEMA_VERSION);
        assert_eq!(back.cells.len(), 12);
        assert_eq!(back.species.as_deref(), Some("surrogate"));
        assert!((back.c_f - r.final_snapshot().c_f).abs() < 1e-15);
    }

    #[test]
    fn schema_export_has_contracted_field_order() {
        let r = small_run(12, 1.0);
        let text = serde_json::to_string(&r.to_schema()).unwrap();
        let t_pos = text.find("\"times\"").unwrap();
        let cxt_pos = text.find("\"cxt\"").unwrap();
        let cf_pos = text.find("\"cf\"").unwrap();
        let scales_pos = text.find("\"scales\"").unwrap();
        let meta_pos = text.find("\"metadata\"").unwrap();
        assert!(t_pos < cxt_pos && cxt_pos < cf_pos && cf_pos < scales_pos && scales_pos < meta_pos);
    }
}
