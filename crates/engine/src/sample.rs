//! Bundled sample modules.
//!
//! `energy` computes energy-use intensity from annual energy and floor area.
//! `cost` prices the `energy` module's annual energy, which makes it a
//! cross-module dependent.

use crate::catalog::FieldCatalog;
use crate::field_id::FieldId;
use crate::format::{FormatTag, NOT_AVAILABLE};
use crate::module::{CalcContext, Calculator, ModeFacade};

pub const ENERGY_MODULE: &str = "energy";
pub const COST_MODULE: &str = "cost";

pub fn energy_catalog() -> FieldCatalog {
    FieldCatalog::new(ENERGY_MODULE)
        .input("energy_in", 1000.0)
        .input("area", 100.0)
        .calculated("intensity", FormatTag::Fixed { decimals: 2 })
}

/// `intensity = energy_in / area`
#[derive(Debug, Clone, Copy, Default)]
pub struct EnergyIntensity;

impl Calculator for EnergyIntensity {
    fn dependencies(&self) -> Vec<(FieldId, FieldId)> {
        vec![
            (FieldId::new("energy_in"), FieldId::new("intensity")),
            (FieldId::new("area"), FieldId::new("intensity")),
        ]
    }

    fn calculate(&self, ctx: &mut CalcContext<'_>) {
        let energy = ctx.number("energy_in");
        let area = ctx.number("area");
        if area > 0.0 {
            ctx.set_calculated("intensity", energy / area);
        } else {
            ctx.set_calculated("intensity", NOT_AVAILABLE);
        }
    }
}

pub fn cost_catalog() -> FieldCatalog {
    FieldCatalog::new(COST_MODULE)
        .input("rate", 0.12)
        .reference_default("rate", 0.10)
        .calculated("annual_cost", FormatTag::Currency { decimals: 2 })
}

/// `annual_cost = energy_in * rate`, reading `energy_in` from the energy module.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnnualCost;

impl Calculator for AnnualCost {
    fn dependencies(&self) -> Vec<(FieldId, FieldId)> {
        vec![
            (FieldId::new("energy_in"), FieldId::new("annual_cost")),
            (FieldId::new("rate"), FieldId::new("annual_cost")),
        ]
    }

    fn calculate(&self, ctx: &mut CalcContext<'_>) {
        let cost = ctx.number("energy_in") * ctx.number("rate");
        ctx.set_calculated("annual_cost", cost);
    }
}

/// Both sample modules, energy first.
pub fn sample_modules() -> Vec<ModeFacade> {
    vec![
        ModeFacade::new(energy_catalog(), EnergyIntensity),
        ModeFacade::new(cost_catalog(), AnnualCost),
    ]
}
