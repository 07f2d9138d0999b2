use std::f64;

/// Thomas elimination for a tri-diagonal system.
///
/// Band layout: `lower[i]` = M[i][i-1] (lower[0] unused), `diag[i]` = M[i][i],
/// `upper[i]` = M[i][i+1] (upper[n-1] unused). No pivoting — the implicit
/// matrices here are strictly diagonally dominant M-matrices. Returns `None`
/// on a vanishing pivot.
pub(crate) fn solve_tridiagonal(
    lower: &[f64],
    diag: &[f64],
    upper: &[f64],
    rhs: &[f64],
) -> Option<Vec<f64>> {
    let n = diag.len();
    if n == 0 {
        return Some(Vec::new());
    }
    let mut c_prime = vec![0.0; n];
    let mut d_prime = vec![0.0; n];

    if diag[0].abs() <= f64::EPSILON {
        return None;
    }
    c_prime[0] = upper[0] / diag[0];
    d_prime[0] = rhs[0] / diag[0];
    for i in 1..n {
        let denom = diag[i] - lower[i] * c_prime[i - 1];
        if denom.abs() <= f64::EPSILON * diag[i].abs().max(1.0) {
            return None;
        }
        if i + 1 < n {
            c_prime[i] = upper[i] / denom;
        }
        d_prime[i] = (rhs[i] - lower[i] * d_prime[i - 1]) / denom;
    }

    let mut x = d_prime;
    for i in (0..n - 1).rev() {
        let next = x[i + 1];
        x[i] -= c_prime[i] * next;
    }
    Some(x)
}

/// Solve a tri-diagonal system carrying one pair of off-band entries
/// M[i][j] = a_ij, M[j][i] = a_ji (the periodic far-face corner).
///
/// Sherman–Morrison: write M = T + u·vᵀ with
///   u = γ·e_i + a_ji·e_j,  v = e_i + (a_ij/γ)·e_j,
/// which reproduces both corners and perturbs T's diagonal by γ at i and
/// a_ij·a_ji/γ at j; T absorbs the compensation. Two Thomas solves and a
/// rank-one combination give the answer.
pub(crate) fn solve_with_corner(
    lower: &[f64],
    diag: &[f64],
    upper: &[f64],
    corner: (usize, usize, f64, f64),
    rhs: &[f64],
) -> Option<Vec<f64>> {
    let (i, j, a_ij, a_ji) = corner;
    let n = diag.len();
    if i == j || i >= n || j >= n {
        return None;
    }
    if a_ij == 0.0 && a_ji == 0.0 {
        return solve_tridiagonal(lower, diag, upper, rhs);
    }

    let gamma = diag[i].abs().max(1.0);
    let mut diag_t = diag.to_vec();
    diag_t[i] -= gamma;
    diag_t[j] -= a_ij * a_ji / gamma;

    let mut u = vec![0.0; n];
    u[i] = gamma;
    u[j] = a_ji;

    let y = solve_tridiagonal(lower, &diag_t, upper, rhs)?;
    let z = solve_tridiagonal(lower, &diag_t, upper, &u)?;

    // v·y and v·z with v = e_i + (a_ij/γ)·e_j
    let vy = y[i] + (a_ij / gamma) * y[j];
    let vz = z[i] + (a_ij / gamma) * z[j];
    let denom = 1.0 + vz;
    if denom.abs() <= f64::EPSILON {
        return None;
    }
    let factor = vy / denom;
    Some(
        y.iter()
            .zip(z.iter())
            .map(|(yi, zi)| yi - factor * zi)
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn residual_tridiag(
        lower: &[f64],
        diag: &[f64],
        upper: &[f64],
        corner: Option<(usize, usize, f64, f64)>,
        x: &[f64],
        rhs: &[f64],
    ) -> f64 {
        let n = diag.len();
        let mut worst = 0.0_f64;
        for r in 0..n {
            let mut sum = diag[r] * x[r];
            if r > 0 {
                sum += lower[r] * x[r - 1];
            }
            if r + 1 < n {
                sum += upper[r] * x[r + 1];
            }
            if let Some((i, j, a_ij, a_ji)) = corner {
                if r == i {
                    sum += a_ij * x[j];
                }
                if r == j {
                    sum += a_ji * x[i];
                }
            }
            worst = worst.max((sum - rhs[r]).abs());
        }
        worst
    }

    #[test]
    fn thomas_recovers_known_solution() {
        // M = [[2,-1,0],[-1,2,-1],[0,-1,2]], x = [1,2,3] -> rhs = [0,0,4]
        let lower = [0.0, -1.0, -1.0];
        let diag = [2.0, 2.0, 2.0];
        let upper = [-1.0, -1.0, 0.0];
        let rhs = [0.0, 0.0, 4.0];
        let x = solve_tridiagonal(&lower, &diag, &upper, &rhs).unwrap();
        for (got, want) in x.iter().zip([1.0, 2.0, 3.0]) {
            assert!((got - want).abs() < 1e-12, "got {got}, want {want}");
        }
    }

    #[test]
    fn thomas_single_unknown() {
        let x = solve_tridiagonal(&[0.0], &[4.0], &[0.0], &[8.0]).unwrap();
        assert!((x[0] - 2.0).abs() < 1e-15);
    }

    #[test]
    fn corner_solve_matches_direct_residual() {
        // Diagonally dominant 5x5 with a (1,4)/(4,1) coupling pair.
        let n = 5;
        let lower: Vec<f64> = (0..n).map(|i| if i == 0 { 0.0 } else { -0.7 }).collect();
        let upper: Vec<f64> = (0..n).map(|i| if i + 1 == n { 0.0 } else { -0.4 }).collect();
        let diag: Vec<f64> = (0..n).map(|i| 3.0 + 0.1 * i as f64).collect();
        let corner = (1usize, 4usize, -0.3, -0.5);
        let rhs = [1.0, -2.0, 0.5, 3.0, 0.25];
        let x = solve_with_corner(&lower, &diag, &upper, corner, &rhs).unwrap();
        let res = residual_tridiag(&lower, &diag, &upper, Some(corner), &x, &rhs);
        assert!(res < 1e-12, "residual {res}");
    }

    #[test]
    fn corner_solve_degenerates_to_thomas_when_zero() {
        let lower = [0.0, -1.0, -1.0];
        let diag = [3.0, 3.0, 3.0];
        let upper = [-1.0, -1.0, 0.0];
        let rhs = [1.0, 1.0, 1.0];
        let a = solve_tridiagonal(&lower, &diag, &upper, &rhs).unwrap();
        let b = solve_with_corner(&lower, &diag, &upper, (0, 2, 0.0, 0.0), &rhs).unwrap();
        for (ai, bi) in a.iter().zip(&b) {
            assert!((ai - bi).abs() < 1e-14);
        }
    }
}
