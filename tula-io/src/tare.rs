//! Tare and net weight.
//!
//! Net weight is the gross reading minus the packaging on the scale: boxes,
//! trays and the pallet. The result is clamped at zero; a negative net mass
//! is reported as 0 with [`NetResult::clamped`] set.

use crate::core::types::WeightReading;
use crate::error::CalculationError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How to treat a reading the scale has not settled on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetMode {
    /// Compute from whatever the scale shows
    #[default]
    Lenient,
    /// Refuse unstable readings
    Strict,
}

/// Packaging on the scale, all weights in kg
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TareConfiguration {
    pub boxes_count: u32,
    pub box_weight: f64,
    pub trays_count: u32,
    pub tray_weight: f64,
    pub pallet_weight: f64,
}

impl TareConfiguration {
    /// Combined packaging weight in kg
    pub fn total(&self) -> f64 {
        f64::from(self.boxes_count) * self.box_weight
            + f64::from(self.trays_count) * self.tray_weight
            + self.pallet_weight
    }

    /// Every weight must be finite and non-negative
    pub fn validate(&self) -> Result<(), CalculationError> {
        for (field, value) in [
            ("box_weight", self.box_weight),
            ("tray_weight", self.tray_weight),
            ("pallet_weight", self.pallet_weight),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(CalculationError::InvalidTare { field, value });
            }
        }
        Ok(())
    }
}

/// Outcome of a net calculation, in kg
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NetResult {
    pub gross_kg: f64,
    pub tare_kg: f64,
    /// `max(0, gross - tare)`
    pub value: f64,
    /// Gross was below tare and the value was raised to 0
    pub clamped: bool,
}

/// Net weight of `gross` after removing `tare`
pub fn net(
    gross: &WeightReading,
    tare: &TareConfiguration,
    mode: NetMode,
) -> Result<NetResult, CalculationError> {
    let measurement = gross.measurement.ok_or(CalculationError::NoReading)?;
    if mode == NetMode::Strict && !measurement.stable {
        return Err(CalculationError::UnstableInput);
    }
    tare.validate()?;

    let gross_kg = measurement.value_kg();
    let tare_kg = tare.total();
    let raw = gross_kg - tare_kg;
    let clamped = raw < 0.0;

    Ok(NetResult {
        gross_kg,
        tare_kg,
        value: if clamped { 0.0 } else { raw },
        clamped,
    })
}

/// Named box weights per product and named tray weights
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TareCatalog {
    /// Product name -> weight of one box of it
    pub products: BTreeMap<String, f64>,
    /// Tray name -> weight of one tray
    pub trays: BTreeMap<String, f64>,
}

impl TareCatalog {
    pub fn box_weight(&self, product: &str) -> Result<f64, CalculationError> {
        self.products
            .get(product)
            .copied()
            .ok_or_else(|| CalculationError::UnknownPreset {
                kind: "product",
                name: product.to_string(),
            })
    }

    pub fn tray_weight(&self, tray: &str) -> Result<f64, CalculationError> {
        self.trays
            .get(tray)
            .copied()
            .ok_or_else(|| CalculationError::UnknownPreset {
                kind: "tray",
                name: tray.to_string(),
            })
    }

    /// Build a tare from preset names and counts
    pub fn compose(
        &self,
        product: &str,
        boxes: u32,
        tray: &str,
        trays: u32,
        pallet_kg: f64,
    ) -> Result<TareConfiguration, CalculationError> {
        let tare = TareConfiguration {
            boxes_count: boxes,
            box_weight: self.box_weight(product)?,
            trays_count: trays,
            tray_weight: self.tray_weight(tray)?,
            pallet_weight: pallet_kg,
        };
        tare.validate()?;
        Ok(tare)
    }

    /// First preset with a negative or non-finite weight
    pub fn validate(&self) -> Result<(), CalculationError> {
        let presets = self
            .products
            .values()
            .map(|&w| ("product box weight", w))
            .chain(self.trays.values().map(|&w| ("tray weight", w)));
        for (field, value) in presets {
            if !value.is_finite() || value < 0.0 {
                return Err(CalculationError::InvalidTare { field, value });
            }
        }
        Ok(())
    }
}

/// A tare picked from the catalog by name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TareSelection {
    pub product: String,
    pub boxes: u32,
    pub tray: String,
    pub trays: u32,
    pub pallet_kg: f64,
}

impl TareSelection {
    pub fn resolve(&self, catalog: &TareCatalog) -> Result<TareConfiguration, CalculationError> {
        catalog.compose(
            &self.product,
            self.boxes,
            &self.tray,
            self.trays,
            self.pallet_kg,
        )
    }
}
