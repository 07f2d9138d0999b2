use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::material::Multilayer;

/// Mesh construction options.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MeshOptions {
    /// Global minimum number of cells per layer. A layer asking for fewer
    /// cells than this is refined up to it.
    pub n_min: usize,
}

impl Default for MeshOptions {
    fn default() -> Self {
        MeshOptions { n_min: 10 }
    }
}

/// Piecewise-uniform finite-volume mesh spanning all layers.
///
/// Cells are ordered from the contact face (x = 0) to the far face (x = L).
/// Interfaces sit exactly on material boundaries; cell widths are uniform
/// within a layer. Per-cell properties inherit from the owning layer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Mesh {
    /// Cell centers [m]
    x: Vec<f64>,
    /// Cell widths [m]
    dx: Vec<f64>,
    /// Per-cell diffusivity [m²/s]
    d: Vec<f64>,
    /// Per-cell partition coefficient [dimensionless]
    k: Vec<f64>,
    /// Per-cell initial concentration [C-unit]
    c0: Vec<f64>,
    /// First global cell index of each layer
    layer_start: Vec<usize>,
    /// Total wall thickness [m]
    length: f64,
}

impl Mesh {
    /// Build a mesh from a validated multilayer.
    pub fn build(stack: &Multilayer, options: &MeshOptions) -> Result<Self, Error> {
        Self::build_with_overrides(stack, options, None)
    }

    /// Build with per-layer cell-count overrides. `overrides[j]`, when
    /// present, replaces layer j's own request; the global `n_min` floor
    /// still applies.
    pub fn build_with_overrides(
        stack: &Multilayer,
        options: &MeshOptions,
        overrides: Option<&[usize]>,
    ) -> Result<Self, Error> {
        if let Some(ov) = overrides {
            if ov.len() != stack.len() {
                return Err(Error::invalid(format!(
                    "cell-count overrides cover {} layers but the stack has {}",
                    ov.len(),
                    stack.len()
                )));
            }
        }

        let n_min = options.n_min.max(1);
        let total: usize = stack
            .layers()
            .iter()
            .enumerate()
            .map(|(j, l)| {
                overrides
                    .map(|ov| ov[j])
                    .unwrap_or(l.n_cells)
                    .max(n_min)
            })
            .sum();

        let mut x = Vec::with_capacity(total);
        let mut dx = Vec::with_capacity(total);
        let mut d = Vec::with_capacity(total);
        let mut k = Vec::with_capacity(total);
        let mut c0 = Vec::with_capacity(total);
        let mut layer_start = Vec::with_capacity(stack.len());

        let mut x_left = 0.0_f64;
        for (j, layer) in stack.layers().iter().enumerate() {
            let n_j = overrides
                .map(|ov| ov[j])
                .unwrap_or(layer.n_cells)
                .max(n_min);
            let width = layer.thickness / n_j as f64;
            layer_start.push(x.len());
            for i in 0..n_j {
                x.push(x_left + (i as f64 + 0.5) * width);
                dx.push(width);
                d.push(layer.diffusivity);
                k.push(layer.partition);
                c0.push(layer.c0);
            }
            x_left += layer.thickness;
        }

        Ok(Mesh {
            x,
            dx,
            d,
            k,
            c0,
            layer_start,
            length: x_left,
        })
    }

    pub fn n_cells(&self) -> usize {
        self.x.len()
    }

    /// Cell centers [m]
    pub fn x(&self) -> &[f64] {
        &self.x
    }

    /// Cell widths [m]
    pub fn dx(&self) -> &[f64] {
        &self.dx
    }

    /// Per-cell diffusivity [m²/s]
    pub fn d(&self) -> &[f64] {
        &self.d
    }

    /// Per-cell partition coefficient
    pub fn k(&self) -> &[f64] {
        &self.k
    }

    /// Per-cell initial concentration
    pub fn c0(&self) -> &[f64] {
        &self.c0
    }

    /// First global cell index of each layer
    pub fn layer_start(&self) -> &[usize] {
        &self.layer_start
    }

    /// Total wall thickness [m]
    pub fn length(&self) -> f64 {
        self.length
    }

    /// Diffusivity of the contact layer [m²/s]; the reference for the
    /// dimensionless time Fo = D_ref·t/L².
    pub fn d_ref(&self) -> f64 {
        self.d[0]
    }

    /// Position of the face between cell i and cell i+1 [m]
    pub fn face(&self, i: usize) -> f64 {
        self.x[i] + 0.5 * self.dx[i]
    }

    /// Mesh with the contact face on the other side: cell order reversed,
    /// geometry rebuilt from the far end.
    pub fn reversed(&self) -> Self {
        let n = self.n_cells();
        let dx: Vec<f64> = self.dx.iter().rev().copied().collect();
        let d: Vec<f64> = self.d.iter().rev().copied().collect();
        let k: Vec<f64> = self.k.iter().rev().copied().collect();
        let c0: Vec<f64> = self.c0.iter().rev().copied().collect();

        let mut x = Vec::with_capacity(n);
        let mut x_left = 0.0;
        for w in &dx {
            x.push(x_left + 0.5 * w);
            x_left += w;
        }
        // Layer boundaries, walked from the far end of the original mesh.
        let mut sizes: Vec<usize> = Vec::with_capacity(self.layer_start.len());
        for (j, &s) in self.layer_start.iter().enumerate() {
            let end = self
                .layer_start
                .get(j + 1)
                .copied()
                .unwrap_or(n);
            sizes.push(end - s);
        }
        sizes.reverse();
        let mut layer_start = Vec::with_capacity(sizes.len());
        let mut acc = 0;
        for s in sizes {
            layer_start.push(acc);
            acc += s;
        }

        Mesh {
            x,
            dx,
            d,
            k,
            c0,
            layer_start,
            length: self.length,
        }
    }

    /// Geometric/material compatibility for result concatenation: same cell
    /// count and per-cell widths, diffusivities and partition coefficients
    /// within a relative tolerance.
    pub(crate) fn compatible(&self, other: &Mesh, rtol: f64) -> bool {
        if self.n_cells() != other.n_cells() {
            return false;
        }
        let close = |a: f64, b: f64| (a - b).abs() <= rtol * a.abs().max(b.abs()).max(f64::MIN_POSITIVE);
        self.dx
            .iter()
            .zip(&other.dx)
            .all(|(a, b)| close(*a, *b))
            && self.d.iter().zip(&other.d).all(|(a, b)| close(*a, *b))
            && self.k.iter().zip(&other.k).all(|(a, b)| close(*a, *b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::material::Layer;

    fn two_layer_stack() -> Multilayer {
        Multilayer::new(vec![
            Layer::new(5e-5, 1e-15, 1.0, 0.0).with_cells(5),
            Layer::new(1e-4, 1e-13, 5.0, 200.0).with_cells(10),
        ])
        .unwrap()
    }

    #[test]
    fn n_min_floor_applies() {
        let stack = two_layer_stack();
        let mesh = Mesh::build(&stack, &MeshOptions { n_min: 8 }).unwrap();
        // First layer asked for 5 cells, floored to 8; second keeps 10.
        assert_eq!(mesh.n_cells(), 18);
        assert_eq!(mesh.layer_start(), &[0, 8]);
    }

    #[test]
    fn widths_and_centers_are_uniform_per_layer() {
        let stack = two_layer_stack();
        let mesh = Mesh::build(&stack, &MeshOptions { n_min: 1 }).unwrap();
        assert_eq!(mesh.n_cells(), 15);
        for i in 0..5 {
            assert!((mesh.dx()[i] - 1e-5).abs() < 1e-20);
        }
        for i in 5..15 {
            assert!((mesh.dx()[i] - 1e-5).abs() < 1e-20);
        }
        // First center at half a width, interface exactly at 5e-5.
        assert!((mesh.x()[0] - 5e-6).abs() < 1e-20);
        assert!((mesh.face(4) - 5e-5).abs() < 1e-19);
        assert!((mesh.length() - 1.5e-4).abs() < 1e-19);
    }

    #[test]
    fn cells_inherit_layer_properties() {
        let stack = two_layer_stack();
        let mesh = Mesh::build(&stack, &MeshOptions { n_min: 1 }).unwrap();
        assert_eq!(mesh.d()[0], 1e-15);
        assert_eq!(mesh.d()[5], 1e-13);
        assert_eq!(mesh.k()[4], 1.0);
        assert_eq!(mesh.k()[5], 5.0);
        assert_eq!(mesh.c0()[0], 0.0);
        assert_eq!(mesh.c0()[14], 200.0);
    }

    #[test]
    fn override_replaces_layer_request() {
        let stack = two_layer_stack();
        let mesh =
            Mesh::build_with_overrides(&stack, &MeshOptions { n_min: 1 }, Some(&[3, 4])).unwrap();
        assert_eq!(mesh.n_cells(), 7);
        let err = Mesh::build_with_overrides(&stack, &MeshOptions::default(), Some(&[3])).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn reversal_maps_properties_and_geometry() {
        let stack = two_layer_stack();
        let mesh = Mesh::build(&stack, &MeshOptions { n_min: 1 }).unwrap();
        let rev = mesh.reversed();
        assert_eq!(rev.n_cells(), mesh.n_cells());
        assert_eq!(rev.d()[0], 1e-13);
        assert_eq!(rev.k()[0], 5.0);
        assert_eq!(rev.c0()[0], 200.0);
        assert_eq!(rev.layer_start(), &[0, 10]);
        assert!((rev.length() - mesh.length()).abs() < 1e-19);
        // Reversing twice restores the original ordering.
        let back = rev.reversed();
        for i in 0..mesh.n_cells() {
            assert_eq!(back.d()[i], mesh.d()[i]);
            assert!((back.x()[i] - mesh.x()[i]).abs() < 1e-18);
        }
    }

    #[test]
    fn compatibility_detects_geometry_changes() {
        let stack = two_layer_stack();
        let a = Mesh::build(&stack, &MeshOptions { n_min: 1 }).unwrap();
        let b = Mesh::build(&stack, &MeshOptions { n_min: 1 }).unwrap();
        assert!(a.compatible(&b, 1e-9));
        let coarser = Mesh::build_with_overrides(&stack, &MeshOptions { n_min: 1 }, Some(&[2, 10]))
            .unwrap();
        assert!(!a.compatible(&coarser, 1e-9));
        assert!(!a.compatible(&a.reversed(), 1e-9));
    }
}
