
// File: `src/lib/migsim/src/lib.rs`
//
// UNIT SYSTEM: SI UNITS (CONSISTENT THROUGHOUT)
// =============================================
// Length/thickness: meter (m)
// Time: second (s)
// Diffusivity: m²/s
// Surface area: m² / Volume: m³
// Film mass-transfer coefficient: m/s
// Partition coefficients: dimensionless
// Concentration: any unit, consistent across layers and medium
//
// INTERNAL SCALING:
// The driver integrates in Fourier time Fo = D_ref·t/L², with L the total
// wall thickness and D_ref the contact-layer diffusivity; positions are
// scaled by L. Concentrations are never rescaled — only the error weights
// use a concentration scale. Results expose both views.
//
// The model: ∂C/∂t = ∂/∂x(D·∂C/∂x) per layer, the Henry jump
// C_left/k_left = C_right/k_right with continuous flux at every internal
// interface, and a finite well-mixed medium V·dC_F/dt = −A·J at the
// contact face. The conserved quantity is Σ Δx_i·C_i + (V/A)·C_F.

mod chain;
mod error;
mod integrate;
mod material;
mod mesh;
mod operator;
mod post;
mod result;
mod solver;

pub use chain::{ChainOutcome, ContactStage, run_chain};
pub use error::Error;
pub use integrate::IntegrationOptions;
pub use material::{DEFAULT_LAYER_CELLS, Layer, Medium, Multilayer};
pub use mesh::{Mesh, MeshOptions};
pub use operator::{FarBoundary, Operator};
pub use post::{
    InterfaceValue, equilibrium_cf, far_face_concentration, integrate_profile,
    interface_concentrations, profile_points, sample_profile, surface_concentration,
};
pub use result::{
    Metadata, RestartRecord, ResultSchema, SCHEMA_VERSION, Scales, SimResult, Snapshot,
};

use nalgebra::DVector;

/// Run one simulation from the multilayer's natural initial state with the
/// default mesh refinement.
pub fn simulate(
    stack: &Multilayer,
    medium: &Medium,
    options: &IntegrationOptions,
) -> Result<SimResult, Error> {
    simulate_with_mesh(stack, medium, &MeshOptions::default(), options)
}

/// Same as [`simulate`] with explicit mesh options.
pub fn simulate_with_mesh(
    stack: &Multilayer,
    medium: &Medium,
    mesh_options: &MeshOptions,
    options: &IntegrationOptions,
) -> Result<SimResult, Error> {
    let mesh = Mesh::build(stack, mesh_options)?;
    let cells0 = mesh.c0().to_vec();
    run_from_state(
        &mesh,
        medium,
        options,
        &cells0,
        medium.c0,
        "run".to_string(),
        stack.migrant().map(str::to_string),
    )
}

/// Resume from a previously captured restart record over a new local time
/// grid (starting at 0).
pub fn resume_record(record: &RestartRecord, time_grid: Vec<f64>) -> Result<SimResult, Error> {
    let mut options = record.options.clone();
    options.time_grid = time_grid;
    run_from_state(
        &record.mesh,
        &record.medium,
        &options,
        &record.cells,
        record.c_f,
        "restart".to_string(),
        record.species.clone(),
    )
}

/// Shared entry point of `simulate`, `resume` and the chainer: integrate
/// from an explicit wall/medium state on an existing mesh.
pub(crate) fn run_from_state(
    mesh: &Mesh,
    medium: &Medium,
    options: &IntegrationOptions,
    cells0: &[f64],
    c_f0: f64,
    name: String,
    species: Option<String>,
) -> Result<SimResult, Error> {
    medium.validate()?;
    options.validate()?;
    if cells0.len() != mesh.n_cells() {
        return Err(Error::invalid(format!(
            "initial state has {} cells but the mesh has {}",
            cells0.len(),
            mesh.n_cells()
        )));
    }
    if !c_f0.is_finite() || cells0.iter().any(|c| !c.is_finite()) {
        return Err(Error::invalid("initial concentrations must be finite"));
    }

    let op = Operator::assemble(mesh, medium, options.far_boundary)?;
    let tau = mesh.length().powi(2) / mesh.d_ref();

    // Concentration scale for the absolute error weights; 1 when the whole
    // system starts empty.
    let cscale = {
        let peak = cells0
            .iter()
            .fold(c_f0.abs(), |m, c| m.max(c.abs()));
        if peak > 0.0 { peak } else { 1.0 }
    };

    let mut y0 = DVector::zeros(op.state_len());
    y0[0] = c_f0;
    for (i, c) in cells0.iter().enumerate() {
        y0[i + 1] = *c;
    }

    let fo_grid: Vec<f64> = options.time_grid.iter().map(|t| t / tau).collect();
    let raw = integrate::integrate(&op, y0, &fo_grid, options, cscale, tau)?;

    let scales = Scales {
        length: mesh.length(),
        time: tau,
        concentration: cscale,
    };
    Ok(SimResult::from_raw(
        raw,
        mesh.clone(),
        medium.clone(),
        options.clone(),
        scales,
        name,
        species,
    ))
}
