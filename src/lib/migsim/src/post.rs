use crate::material::Medium;
use crate::mesh::Mesh;
use crate::operator::FarBoundary;

/// Reconstructed concentrations at a face between two cells. `left`/`right`
/// differ exactly by the Henry jump when the face is a material boundary.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct InterfaceValue {
    /// Face position [m]
    pub x: f64,
    /// Concentration on the contact side of the face
    pub left: f64,
    /// Concentration on the far side of the face
    pub right: f64,
}

/// Half-cell resistance of cell i: (Δx_i/2)/(D_i·k_i).
fn half_resistance(mesh: &Mesh, i: usize) -> f64 {
    0.5 * mesh.dx()[i] / (mesh.d()[i] * mesh.k()[i])
}

/// Interface potential between cells i and j from flux continuity:
/// φ_s = (r_j·φ_i + r_i·φ_j)/(r_i + r_j).
fn face_potential(mesh: &Mesh, i: usize, j: usize, cells: &[f64]) -> f64 {
    let r_i = half_resistance(mesh, i);
    let r_j = half_resistance(mesh, j);
    let phi_i = cells[i] / mesh.k()[i];
    let phi_j = cells[j] / mesh.k()[j];
    (r_j * phi_i + r_i * phi_j) / (r_i + r_j)
}

/// Reconstruct concentrations at every internal face from the continuous
/// potential; with a periodic far face the wrap face at x = L is appended
/// (its `right` value belongs to cell 0 seen through the wrap).
pub fn interface_concentrations(
    mesh: &Mesh,
    cells: &[f64],
    far: FarBoundary,
) -> Vec<InterfaceValue> {
    let n = mesh.n_cells();
    let mut out = Vec::with_capacity(n);
    for i in 0..n.saturating_sub(1) {
        let phi = face_potential(mesh, i, i + 1, cells);
        out.push(InterfaceValue {
            x: mesh.face(i),
            left: mesh.k()[i] * phi,
            right: mesh.k()[i + 1] * phi,
        });
    }
    if far == FarBoundary::Periodic && n > 1 {
        let phi = face_potential(mesh, n - 1, 0, cells);
        out.push(InterfaceValue {
            x: mesh.length(),
            left: mesh.k()[n - 1] * phi,
            right: mesh.k()[0] * phi,
        });
    }
    out
}

/// Wall-side concentration at the contact face. With a film coefficient the
/// surface potential splits the film and half-cell resistances; with
/// perfect contact the surface potential equals the medium's.
pub fn surface_concentration(mesh: &Mesh, medium: &Medium, cells: &[f64], c_f: f64) -> f64 {
    let phi_f = c_f / medium.partition;
    let phi_s = match medium.h {
        Some(h) => {
            let r_film = 1.0 / h;
            let r0 = half_resistance(mesh, 0);
            let phi_0 = cells[0] / mesh.k()[0];
            (phi_f / r_film + phi_0 / r0) / (1.0 / r_film + 1.0 / r0)
        }
        None => phi_f,
    };
    mesh.k()[0] * phi_s
}

/// Wall concentration at the far face. Zero-flux faces carry the adjacent
/// cell value (vanishing gradient); the periodic wrap reuses the wrap-face
/// reconstruction.
pub fn far_face_concentration(mesh: &Mesh, cells: &[f64], far: FarBoundary) -> f64 {
    let n = mesh.n_cells();
    match far {
        FarBoundary::Periodic if n > 1 => {
            mesh.k()[n - 1] * face_potential(mesh, n - 1, 0, cells)
        }
        _ => cells[n - 1],
    }
}

/// Areal mass held by the wall: Σ Δx_i·C_i [C·m].
pub fn integrate_profile(mesh: &Mesh, cells: &[f64]) -> f64 {
    mesh.dx()
        .iter()
        .zip(cells)
        .map(|(dx, c)| dx * c)
        .sum()
}

/// Full profile as ordered (x, C) pairs: contact surface, cell centers with
/// both-sided face reconstructions in between, far face. Face pairs share
/// one x; the duplicated abscissa is the Henry jump.
pub fn profile_points(
    mesh: &Mesh,
    medium: &Medium,
    cells: &[f64],
    c_f: f64,
    far: FarBoundary,
) -> Vec<(f64, f64)> {
    let n = mesh.n_cells();
    let mut pts = Vec::with_capacity(3 * n + 2);
    pts.push((0.0, surface_concentration(mesh, medium, cells, c_f)));
    let faces = interface_concentrations(mesh, cells, far);
    for i in 0..n {
        pts.push((mesh.x()[i], cells[i]));
        if i + 1 < n {
            let f = faces[i];
            pts.push((f.x, f.left));
            pts.push((f.x, f.right));
        }
    }
    pts.push((mesh.length(), far_face_concentration(mesh, cells, far)));
    pts
}

/// Piecewise-linear sample of the cell profile at position x [m], constant
/// beyond the outermost cell centers.
pub fn sample_profile(mesh: &Mesh, cells: &[f64], x: f64) -> f64 {
    let centers = mesh.x();
    let n = centers.len();
    if x <= centers[0] {
        return cells[0];
    }
    if x >= centers[n - 1] {
        return cells[n - 1];
    }
    let hi = centers.partition_point(|&c| c < x).min(n - 1);
    let lo = hi - 1;
    let w = (x - centers[lo]) / (centers[hi] - centers[lo]);
    cells[lo] * (1.0 - w) + cells[hi] * w
}

/// Piecewise-cubic interpolation in time: 4-point Lagrange on the segment's
/// neighborhood, degrading to quadratic/linear near the ends. Clamps outside
/// the grid.
pub(crate) fn interp_cubic(ts: &[f64], ys: &[f64], t: f64) -> f64 {
    let n = ts.len();
    debug_assert_eq!(n, ys.len());
    if n == 1 || t <= ts[0] {
        return ys[0];
    }
    if t >= ts[n - 1] {
        return ys[n - 1];
    }
    // Segment [lo, lo+1] containing t.
    let hi = ts.partition_point(|&v| v <= t).min(n - 1);
    let lo = hi - 1;
    let start = lo.saturating_sub(1);
    let end = (hi + 1).min(n - 1);
    let mut acc = 0.0;
    for i in start..=end {
        let mut w = 1.0;
        for j in start..=end {
            if j != i {
                w *= (t - ts[j]) / (ts[i] - ts[j]);
            }
        }
        acc += w * ys[i];
    }
    acc
}

/// Analytic equilibrium medium concentration for a closed system
/// (impermeable, symmetric or periodic far face): the common potential from
/// total-mass conservation,
///   φ* = (Σ Δx_i·C_i(0) + (V/A)·C_F(0)) / (Σ Δx_i·k_i + (V/A)·k_F),
/// gives CF(∞) = k_F·φ*.
pub fn equilibrium_cf(mesh: &Mesh, medium: &Medium, cells0: &[f64], c_f0: f64) -> f64 {
    let m0 = integrate_profile(mesh, cells0) + medium.capacity_length() * c_f0;
    let capacity: f64 = mesh
        .dx()
        .iter()
        .zip(mesh.k())
        .map(|(dx, k)| dx * k)
        .sum::<f64>()
        + medium.capacity_length() * medium.partition;
    medium.partition * m0 / capacity
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::material::{Layer, Multilayer};
    use crate::mesh::MeshOptions;

    fn partitioned_mesh() -> (Mesh, Medium) {
        let stack = Multilayer::new(vec![
            Layer::new(5e-5, 1e-15, 1.0, 0.0).with_cells(5),
            Layer::new(1e-4, 1e-13, 5.0, 200.0).with_cells(10),
        ])
        .unwrap();
        let mesh = Mesh::build(&stack, &MeshOptions { n_min: 1 }).unwrap();
        (mesh, Medium::new(0.6, 1e-3, 2.0, 0.0))
    }

    #[test]
    fn interface_jump_preserves_potential() {
        let (mesh, _) = partitioned_mesh();
        let cells: Vec<f64> = (0..mesh.n_cells()).map(|i| 1.0 + i as f64).collect();
        for f in interface_concentrations(&mesh, &cells, FarBoundary::Impermeable) {
            // Identical potential on both sides of every face.
            let i = mesh.x().partition_point(|&c| c < f.x) - 1;
            let phi_l = f.left / mesh.k()[i];
            let phi_r = f.right / mesh.k()[i + 1];
            assert!((phi_l - phi_r).abs() < 1e-12 * phi_l.abs().max(1.0));
        }
    }

    #[test]
    fn same_material_faces_are_continuous() {
        let (mesh, _) = partitioned_mesh();
        let cells = vec![7.0; mesh.n_cells()];
        let faces = interface_concentrations(&mesh, &cells, FarBoundary::Impermeable);
        // Uniform concentration in uniform material: no jump anywhere inside
        // a layer, jump only at the material boundary (index 4).
        for (i, f) in faces.iter().enumerate() {
            if i == 4 {
                assert!((f.left / 1.0 - f.right / 5.0).abs() < 1e-12);
                assert!(f.left != f.right);
            } else {
                assert!((f.left - f.right).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn surface_concentration_perfect_contact_follows_medium() {
        let (mesh, medium) = partitioned_mesh();
        let cells = vec![0.0; mesh.n_cells()];
        let c = surface_concentration(&mesh, &medium, &cells, 10.0);
        // φ_s = C_F/k_F = 5, times k of the contact layer (1).
        assert!((c - 5.0).abs() < 1e-12);
    }

    #[test]
    fn surface_concentration_with_film_sits_between() {
        let (mesh, medium) = partitioned_mesh();
        let filmed = Medium { h: Some(1e-8), ..medium };
        let cells = vec![2.0; mesh.n_cells()];
        let c_f = 10.0;
        let c = surface_concentration(&mesh, &filmed, &cells, c_f);
        let phi_f = c_f / filmed.partition;
        let phi_0 = 2.0 / mesh.k()[0];
        let phi_s = c / mesh.k()[0];
        let (lo, hi) = if phi_f < phi_0 {
            (phi_f, phi_0)
        } else {
            (phi_0, phi_f)
        };
        assert!(phi_s > lo && phi_s < hi, "φ_s {phi_s} outside ({lo}, {hi})");
    }

    #[test]
    fn profile_integral_matches_hand_sum() {
        let (mesh, _) = partitioned_mesh();
        let cells: Vec<f64> = (0..mesh.n_cells()).map(|i| i as f64).collect();
        let want: f64 = mesh
            .dx()
            .iter()
            .zip(&cells)
            .map(|(dx, c)| dx * c)
            .sum();
        assert!((integrate_profile(&mesh, &cells) - want).abs() < 1e-18);
    }

    #[test]
    fn profile_points_are_ordered_and_bracketed() {
        let (mesh, medium) = partitioned_mesh();
        let cells: Vec<f64> = (0..mesh.n_cells()).map(|i| 1.0 + i as f64).collect();
        let pts = profile_points(&mesh, &medium, &cells, 0.0, FarBoundary::Impermeable);
        assert_eq!(pts.first().unwrap().0, 0.0);
        assert!((pts.last().unwrap().0 - mesh.length()).abs() < 1e-18);
        for w in pts.windows(2) {
            assert!(w[1].0 >= w[0].0);
        }
    }

    #[test]
    fn cubic_interpolation_hits_nodes_and_cubics() {
        let ts: Vec<f64> = (0..7).map(|i| i as f64).collect();
        let ys: Vec<f64> = ts.iter().map(|t| t * t * t - 2.0 * t + 1.0).collect();
        for (t, y) in ts.iter().zip(&ys) {
            assert!((interp_cubic(&ts, &ys, *t) - y).abs() < 1e-12);
        }
        // A cubic is reproduced exactly between nodes.
        let t = 2.6;
        let want = t * t * t - 2.0 * t + 1.0;
        assert!((interp_cubic(&ts, &ys, t) - want).abs() < 1e-10);
        // Clamped outside.
        assert_eq!(interp_cubic(&ts, &ys, -5.0), ys[0]);
        assert_eq!(interp_cubic(&ts, &ys, 50.0), *ys.last().unwrap());
    }

    #[test]
    fn sample_profile_interpolates_between_centers() {
        let (mesh, _) = partitioned_mesh();
        let cells: Vec<f64> = (0..mesh.n_cells()).map(|i| i as f64).collect();
        let x_mid = 0.5 * (mesh.x()[0] + mesh.x()[1]);
        assert!((sample_profile(&mesh, &cells, x_mid) - 0.5).abs() < 1e-12);
        assert_eq!(sample_profile(&mesh, &cells, -1.0), 0.0);
        assert_eq!(
            sample_profile(&mesh, &cells, 1.0),
            (mesh.n_cells() - 1) as f64
        );
    }

    #[test]
    fn equilibrium_matches_two_layer_hand_calculation() {
        let (mesh, medium) = partitioned_mesh();
        // M0 = 200·1e-4 = 0.02; capacity = 5e-5 + 5e-4 + (1e-3/0.6)·2.
        let cf = equilibrium_cf(&mesh, &medium, mesh.c0(), 0.0);
        let capacity = 5e-5 + 5.0 * 1e-4 + (1e-3 / 0.6) * 2.0;
        let want = 2.0 * 0.02 / capacity;
        assert!((cf - want).abs() < 1e-12 * want);
    }
}
