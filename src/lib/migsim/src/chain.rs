use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::integrate::IntegrationOptions;
use crate::material::{Medium, Multilayer};
use crate::mesh::{Mesh, MeshOptions};
use crate::result::SimResult;

/// One contact episode of a chained scenario: a fresh medium, a local
/// duration, and optionally a re-orientation of the wall before contact.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ContactStage {
    pub medium: Medium,
    /// Local snapshot times [s], starting at 0.
    pub time_grid: Vec<f64>,
    /// Put the contact face on the other side of the wall before this
    /// stage (cell order, D, k and C arrays are all reversed).
    pub flip: bool,
    /// Override of the fresh medium's initial concentration; defaults to
    /// the medium's own `c0`.
    pub c_f0: Option<f64>,
}

impl ContactStage {
    /// Stage over `[0, duration]` seconds with an evenly spaced grid.
    pub fn new(medium: Medium, duration: f64, n_snapshots: usize) -> Self {
        ContactStage {
            medium,
            time_grid: IntegrationOptions::over_duration(duration, n_snapshots).time_grid,
            flip: false,
            c_f0: None,
        }
    }

    pub fn with_grid(medium: Medium, time_grid: Vec<f64>) -> Self {
        ContactStage {
            medium,
            time_grid,
            flip: false,
            c_f0: None,
        }
    }

    pub fn flipped(mut self) -> Self {
        self.flip = true;
        self
    }

    pub fn with_initial_cf(mut self, c_f0: f64) -> Self {
        self.c_f0 = Some(c_f0);
        self
    }
}

/// Results of a chained run, one per stage, in order.
#[derive(Clone, Debug)]
pub struct ChainOutcome {
    stages: Vec<SimResult>,
}

impl ChainOutcome {
    pub fn stages(&self) -> &[SimResult] {
        &self.stages
    }

    pub fn into_stages(self) -> Vec<SimResult> {
        self.stages
    }

    pub fn last(&self) -> &SimResult {
        self.stages.last().expect("chain ran at least one stage")
    }

    /// Total areal mass transferred into the media across all stages [C·m]:
    /// the sum of each stage's final desorbed inventory.
    pub fn total_transferred(&self) -> f64 {
        self.stages
            .iter()
            .map(|r| r.desorbed().last().copied().unwrap_or(0.0))
            .sum()
    }

    /// Fold all stages into a single result on a common clock. Fresh media
    /// make CF discontinuous at stage boundaries, so the CF trace is
    /// rebased when `rebase_cf` is set; re-oriented stages cannot be merged
    /// and surface `IncompatibleComposition`.
    pub fn concatenated(&self, rebase_cf: bool) -> Result<SimResult, Error> {
        let mut it = self.stages.iter();
        let first = it
            .next()
            .ok_or_else(|| Error::invalid("chain produced no stages"))?;
        let mut acc = first.clone();
        for r in it {
            acc = acc.concatenate(r, rebase_cf)?;
        }
        Ok(acc)
    }
}

/// Run an ordered sequence of contact stages.
///
/// Stage 1 starts from the multilayer's natural initial state; stage m+1
/// starts from stage m's final wall profile with its own fresh medium.
/// Geometry (A, V), partition k_F and the film coefficient may change per
/// stage. Any failure aborts the chain and reports the failing stage index.
pub fn run_chain(
    stack: &Multilayer,
    mesh_options: &MeshOptions,
    base: &IntegrationOptions,
    stages: &[ContactStage],
) -> Result<ChainOutcome, Error> {
    if stages.is_empty() {
        return Err(Error::invalid("chain needs at least one contact stage"));
    }
    let mut mesh = Mesh::build(stack, mesh_options)?;
    let mut cells: Vec<f64> = mesh.c0().to_vec();
    let species = stack.migrant().map(str::to_string);

    let mut results = Vec::with_capacity(stages.len());
    for (index, stage) in stages.iter().enumerate() {
        if stage.flip {
            mesh = mesh.reversed();
            cells.reverse();
        }
        let mut options = base.clone();
        options.time_grid = stage.time_grid.clone();
        let mut medium = stage.medium.clone();
        if let Some(c_f0) = stage.c_f0 {
            medium.c0 = c_f0;
        }
        log::debug!(
            "chain stage {index}: {} s of contact, flip={}",
            options.time_grid.last().copied().unwrap_or(0.0),
            stage.flip
        );
        let result = crate::run_from_state(
            &mesh,
            &medium,
            &options,
            &cells,
            medium.c0,
            format!("stage {index}"),
            species.clone(),
        )
        .map_err(|e| Error::ChainStep {
            index,
            source: Box::new(e),
        })?;
        cells = result.final_snapshot().cells;
        results.push(result);
    }
    Ok(ChainOutcome { stages: results })
}
