use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use sprs::{CsMat, TriMatI};

use crate::error::Error;
use crate::material::Medium;
use crate::mesh::Mesh;

/// Far-face policy for the outermost layer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FarBoundary {
    /// Zero flux through the far face (default).
    #[default]
    Impermeable,
    /// Mirror plane at the far face: the run models one half of a mirrored
    /// double stack (setoff/stacking). Same zero-flux stencil as
    /// `Impermeable`; kept distinct because the reading of the result
    /// differs and chained scenarios may switch policies per stage.
    Symmetric,
    /// The far face is in direct solid contact with the contact face
    /// (rolled stack): a wrap conductance couples the last cell to the
    /// first one.
    Periodic,
}

/// Semi-discrete flux operator L over the dimensionless state
/// y = [C_F, C_0, …, C_{N−1}] (medium ordered first, so L is tri-diagonal;
/// the periodic wrap adds one corner pair).
///
/// Built once per run from a mesh and a medium; owns copies of everything it
/// needs. Time is Fourier time Fo = D_ref·t/L²; concentrations stay in the
/// caller's unit.
#[derive(Clone, Debug)]
pub struct Operator {
    n: usize,
    /// Band arrays of L, state-indexed (length n+1).
    lower: Vec<f64>,
    diag: Vec<f64>,
    upper: Vec<f64>,
    /// Periodic wrap entries (L[1][n], L[n][1]); rows 1 and n are the first
    /// and last wall cells.
    corner: Option<(f64, f64)>,
    /// Assembled sparse form, used for matvec (dense-output derivatives,
    /// conservation checks).
    mat: CsMat<f64>,
    /// Conservation weights w: w·y = areal mass / (L·C-unit) is invariant.
    weights: Vec<f64>,
    /// Dimensionless contact conductance a_F.
    a_contact: f64,
    /// Medium-to-wall volume ratio γ = A·L/V.
    gamma: f64,
    /// State-indexed partition coefficients [k_F, k_0 … k_{N−1}]. Column
    /// scaling by these turns the implicit matrices into strictly
    /// diagonally dominant systems in the potential variable.
    k_state: Vec<f64>,
    k_f: f64,
    k0: f64,
    far: FarBoundary,
}

impl Operator {
    /// Assemble the operator.
    ///
    /// Interface conductance between cells i and i+1 (series resistance of
    /// the two half cells, the Henry jump C/k continuous by construction):
    ///   a_{i+½} = 1 / ( (Δx_i/2)/(D_i·k_i) + (Δx_{i+1}/2)/(D_{i+1}·k_{i+1}) )
    /// Contact coupling with optional film resistance:
    ///   1/a_F = 1/h + (Δx_0/2)/(D_0·k_0)
    /// Medium balance: V·dC_F/dt = −A·a_F·(φ_F − φ_0) with φ = C/k.
    pub fn assemble(mesh: &Mesh, medium: &Medium, far: FarBoundary) -> Result<Self, Error> {
        medium.validate()?;
        let n = mesh.n_cells();
        let length = mesh.length();
        let d_ref = mesh.d_ref();

        // Dimensionless cell widths and half-cell resistances
        // r_i = (Δx̂_i/2)/(D̂_i·k_i).
        let dxh: Vec<f64> = mesh.dx().iter().map(|w| w / length).collect();
        let r: Vec<f64> = (0..n)
            .map(|i| 0.5 * dxh[i] / ((mesh.d()[i] / d_ref) * mesh.k()[i]))
            .collect();

        // Interior conductances, a[i] between cell i-1 and cell i.
        let mut a = vec![0.0; n + 1];
        for i in 1..n {
            a[i] = 1.0 / (r[i - 1] + r[i]);
        }

        // Contact conductance; the film term is dropped for perfect contact.
        let a_contact = match medium.h {
            Some(h) => {
                let h_hat = h * length / d_ref;
                1.0 / (1.0 / h_hat + r[0])
            }
            None => 1.0 / r[0],
        };

        let gamma = medium.area * length / medium.volume;
        let k_f = medium.partition;
        let k = mesh.k();

        for (label, v) in [("contact conductance", a_contact), ("gamma", gamma)] {
            if !v.is_finite() || v <= 0.0 {
                return Err(Error::invalid(format!(
                    "operator assembly produced non-positive {label}: {v}"
                )));
            }
        }

        let m = n + 1;
        let mut lower = vec![0.0; m];
        let mut diag = vec![0.0; m];
        let mut upper = vec![0.0; m];

        // Medium row: dC_F/dFo = γ·a_F·(φ_0 − φ_F).
        diag[0] = -gamma * a_contact / k_f;
        upper[0] = gamma * a_contact / k[0];

        // Wall rows: dC_i/dFo = (a_{i−½}(φ_{i−1}−φ_i) − a_{i+½}(φ_i−φ_{i+1}))/Δx̂_i,
        // with the medium playing the left neighbor of cell 0.
        for i in 0..n {
            let row = i + 1;
            let (a_left, k_left) = if i == 0 {
                (a_contact, k_f)
            } else {
                (a[i], k[i - 1])
            };
            let a_right = a[i + 1]; // zero at the far face unless periodic
            lower[row] = a_left / (dxh[i] * k_left);
            diag[row] = -(a_left + a_right) / (dxh[i] * k[i]);
            if i + 1 < n {
                upper[row] = a_right / (dxh[i] * k[i + 1]);
            }
        }

        // Periodic wrap: last cell exchanges with the first one.
        let corner = match far {
            FarBoundary::Periodic if n > 1 => {
                let a_wrap = 1.0 / (r[n - 1] + r[0]);
                diag[n] -= a_wrap / (dxh[n - 1] * k[n - 1]);
                diag[1] -= a_wrap / (dxh[0] * k[0]);
                // (L[1][n], L[n][1]): cell 0 sees the last cell and vice versa.
                Some((a_wrap / (dxh[0] * k[n - 1]), a_wrap / (dxh[n - 1] * k[0])))
            }
            _ => None,
        };

        // Sparse form from triplets.
        let mut tri = TriMatI::<f64, usize>::new((m, m));
        for row in 0..m {
            if row > 0 && lower[row] != 0.0 {
                tri.add_triplet(row, row - 1, lower[row]);
            }
            tri.add_triplet(row, row, diag[row]);
            if row + 1 < m && upper[row] != 0.0 {
                tri.add_triplet(row, row + 1, upper[row]);
            }
        }
        if let Some((c01, c10)) = corner {
            tri.add_triplet(1, n, c01);
            tri.add_triplet(n, 1, c10);
        }
        let mat: CsMat<f64> = tri.to_csr();

        let mut weights = Vec::with_capacity(m);
        weights.push(1.0 / gamma);
        weights.extend(dxh.iter().copied());

        let mut k_state = Vec::with_capacity(m);
        k_state.push(k_f);
        k_state.extend_from_slice(k);

        Ok(Operator {
            n,
            lower,
            diag,
            upper,
            corner,
            mat,
            weights,
            a_contact,
            gamma,
            k_state,
            k_f,
            k0: k[0],
            far,
        })
    }

    pub fn n_cells(&self) -> usize {
        self.n
    }

    /// State length: wall cells plus the medium slot.
    pub fn state_len(&self) -> usize {
        self.n + 1
    }

    pub fn far_boundary(&self) -> FarBoundary {
        self.far
    }

    pub fn gamma(&self) -> f64 {
        self.gamma
    }

    /// Apply L to a state vector: dy/dFo = L·y.
    pub fn apply(&self, y: &DVector<f64>) -> DVector<f64> {
        let mut dydt = DVector::zeros(self.mat.rows());
        for (row, lane) in self.mat.outer_iterator().enumerate() {
            dydt[row] = lane.iter().map(|(col, a)| a * y[col]).sum::<f64>();
        }
        dydt
    }

    /// Dimensionless areal flux through the contact face, wall → medium
    /// positive: j = a_F·(φ_0 − φ_F). Linear in the state, so it can also be
    /// applied to state derivatives.
    pub fn contact_flux(&self, y: &DVector<f64>) -> f64 {
        self.a_contact * (y[1] / self.k0 - y[0] / self.k_f)
    }

    /// Conserved discrete mass in units of L·C: Σ Δx̂_i·C_i + (V/(A·L))·C_F.
    pub fn total_mass(&self, y: &DVector<f64>) -> f64 {
        self.weights
            .iter()
            .zip(y.iter())
            .map(|(w, c)| w * c)
            .sum()
    }

    pub(crate) fn k_state(&self) -> &[f64] {
        &self.k_state
    }

    /// Band arrays of M = c·I − s·L for the implicit solves, plus the
    /// corner pair when the wrap is active.
    pub(crate) fn implicit_bands(
        &self,
        c: f64,
        s: f64,
    ) -> (Vec<f64>, Vec<f64>, Vec<f64>, Option<(usize, usize, f64, f64)>) {
        let m = self.state_len();
        let mut lower = vec![0.0; m];
        let mut diag = vec![0.0; m];
        let mut upper = vec![0.0; m];
        for i in 0..m {
            lower[i] = -s * self.lower[i];
            diag[i] = c - s * self.diag[i];
            upper[i] = -s * self.upper[i];
        }
        let corner = self
            .corner
            .map(|(c01, c10)| (1usize, self.n, -s * c01, -s * c10));
        (lower, diag, upper, corner)
    }
}
