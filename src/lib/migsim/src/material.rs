use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Default cell count per layer when the caller does not ask for more.
pub const DEFAULT_LAYER_CELLS: usize = 20;

/// A contiguous homogeneous material slab.
///
/// All quantities in SI; the concentration unit is free but must be the same
/// across layers and medium.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Layer {
    /// Thickness [m]
    pub thickness: f64,
    /// Diffusivity of the migrant in this material [m²/s]
    pub diffusivity: f64,
    /// Henry-like partition (solubility) coefficient [dimensionless].
    /// The potential φ = C/k is continuous across material interfaces.
    pub partition: f64,
    /// Initial uniform migrant concentration [C-unit]
    pub c0: f64,
    /// Requested number of finite-volume cells across the layer
    pub n_cells: usize,
    /// Free-form material tag; opaque to the solver
    pub tag: String,
}

impl Layer {
    pub fn new(thickness: f64, diffusivity: f64, partition: f64, c0: f64) -> Self {
        Layer {
            thickness,
            diffusivity,
            partition,
            c0,
            n_cells: DEFAULT_LAYER_CELLS,
            tag: String::new(),
        }
    }

    pub fn with_cells(mut self, n_cells: usize) -> Self {
        self.n_cells = n_cells;
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    /// Validate layer parameters to prevent NaN/Inf and unphysical values.
    pub fn validate(&self) -> Result<(), Error> {
        if !self.thickness.is_finite() || self.thickness <= 0.0 {
            return Err(Error::invalid(format!(
                "layer thickness must be positive and finite, got: {}",
                self.thickness
            )));
        }
        if !self.diffusivity.is_finite() || self.diffusivity <= 0.0 {
            return Err(Error::invalid(format!(
                "layer diffusivity must be positive and finite, got: {}",
                self.diffusivity
            )));
        }
        if !self.partition.is_finite() || self.partition <= 0.0 {
            return Err(Error::invalid(format!(
                "layer partition coefficient must be positive and finite, got: {}",
                self.partition
            )));
        }
        if !self.c0.is_finite() || self.c0 < 0.0 {
            return Err(Error::invalid(format!(
                "layer initial concentration must be non-negative and finite, got: {}",
                self.c0
            )));
        }
        if self.n_cells == 0 {
            return Err(Error::invalid("layer cell count must be at least 1"));
        }
        Ok(())
    }
}

/// An ordered stack of layers. Index 0 is the contact face (adjacent to the
/// medium); the last layer carries the far face.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Multilayer {
    layers: Vec<Layer>,
    /// Migrant species tag; results refuse to concatenate across species.
    migrant: Option<String>,
}

impl Multilayer {
    pub fn new(layers: Vec<Layer>) -> Result<Self, Error> {
        if layers.is_empty() {
            return Err(Error::invalid("multilayer must contain at least one layer"));
        }
        for (i, layer) in layers.iter().enumerate() {
            layer.validate().map_err(|e| match e {
                Error::InvalidInput(msg) => Error::invalid(format!("layer {i}: {msg}")),
                other => other,
            })?;
        }
        Ok(Multilayer {
            layers,
            migrant: None,
        })
    }

    pub fn with_migrant(mut self, migrant: impl Into<String>) -> Self {
        self.migrant = Some(migrant.into());
        self
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn migrant(&self) -> Option<&str> {
        self.migrant.as_deref()
    }

    /// Total wall thickness [m]
    pub fn total_thickness(&self) -> f64 {
        self.layers.iter().map(|l| l.thickness).sum()
    }

    /// Stack with the contact face on the other side (layer order reversed).
    pub fn reversed(&self) -> Self {
        let mut layers = self.layers.clone();
        layers.reverse();
        Multilayer {
            layers,
            migrant: self.migrant.clone(),
        }
    }
}

/// The finite, well-mixed receiving compartment (food or simulant).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Medium {
    /// Contact surface area [m²]
    pub area: f64,
    /// Compartment volume [m³]
    pub volume: f64,
    /// Partition coefficient relative to the contact layer [dimensionless]
    pub partition: f64,
    /// Initial migrant concentration in the medium [C-unit]
    pub c0: f64,
    /// External mass-transfer film coefficient [m/s]. `None` means perfect
    /// diffusive contact (the film resistance term is dropped).
    pub h: Option<f64>,
}

impl Medium {
    pub fn new(area: f64, volume: f64, partition: f64, c0: f64) -> Self {
        Medium {
            area,
            volume,
            partition,
            c0,
            h: None,
        }
    }

    pub fn with_film_coefficient(mut self, h: f64) -> Self {
        self.h = Some(h);
        self
    }

    pub fn validate(&self) -> Result<(), Error> {
        if !self.area.is_finite() || self.area <= 0.0 {
            return Err(Error::invalid(format!(
                "medium contact area must be positive and finite, got: {}",
                self.area
            )));
        }
        if !self.volume.is_finite() || self.volume <= 0.0 {
            return Err(Error::invalid(format!(
                "medium volume must be positive and finite, got: {}",
                self.volume
            )));
        }
        if !self.partition.is_finite() || self.partition <= 0.0 {
            return Err(Error::invalid(format!(
                "medium partition coefficient must be positive and finite, got: {}",
                self.partition
            )));
        }
        if !self.c0.is_finite() || self.c0 < 0.0 {
            return Err(Error::invalid(format!(
                "medium initial concentration must be non-negative and finite, got: {}",
                self.c0
            )));
        }
        if let Some(h) = self.h {
            if !h.is_finite() || h <= 0.0 {
                return Err(Error::invalid(format!(
                    "film coefficient must be positive and finite, got: {h}"
                )));
            }
        }
        Ok(())
    }

    /// Volume-to-area ratio V/A [m] — the medium's capacity per unit contact
    /// area in the conserved mass Σ Δx·C + (V/A)·C_F.
    pub fn capacity_length(&self) -> f64 {
        self.volume / self.area
    }
}
