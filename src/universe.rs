use chrono::NaiveDate;
use log::debug;
use polars::prelude::*;
use std::collections::HashSet;

use crate::error::RiskModelError;
use crate::panel::{self, ASSET_ID, FACTOR_ID, PanelKind, SPECIFIC_RISK};

/// The deterministic, order-stable set of assets and factors usable across all
/// three input panels for a given date. Assets and factors are sorted by
/// identifier so matrix row/column order is reproducible across calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconciledUniverse {
    date: NaiveDate,
    assets: Vec<String>,
    factors: Vec<String>,
}

impl ReconciledUniverse {
    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn assets(&self) -> &[String] {
        &self.assets
    }

    pub fn factors(&self) -> &[String] {
        &self.factors
    }

    pub fn n_assets(&self) -> usize {
        self.assets.len()
    }

    pub fn n_factors(&self) -> usize {
        self.factors.len()
    }
}

/// Compute the common asset and factor sets for a date.
///
/// Factors: the intersection of the exposure panel's factor columns and the
/// factor covariance panel's labels, keeping only factors whose covariance row
/// is fully populated. Assets: the intersection of assets with a complete
/// exposure row over the retained factors and assets with known, finite
/// specific risk. Partial rows are excluded, not patched; zero-fill would bias
/// downstream optimization without the caller asking for it.
pub fn reconcile(
    date: NaiveDate,
    exposures: &DataFrame,
    factor_cov: &DataFrame,
    specific_risk: &DataFrame,
) -> Result<ReconciledUniverse, RiskModelError> {
    let factors = reconcile_factors(date, exposures, factor_cov)?;
    if factors.is_empty() {
        return Err(RiskModelError::EmptyUniverse {
            date,
            detail: "no usable factors shared by the exposure and factor covariance panels"
                .to_string(),
        });
    }

    let assets = reconcile_assets(date, exposures, specific_risk, &factors)?;
    if assets.is_empty() {
        return Err(RiskModelError::EmptyUniverse {
            date,
            detail: "no assets with complete exposures and known specific risk".to_string(),
        });
    }

    debug!(
        "reconciled universe for {}: {} assets x {} factors",
        date,
        assets.len(),
        factors.len()
    );

    Ok(ReconciledUniverse {
        date,
        assets,
        factors,
    })
}

fn reconcile_factors(
    date: NaiveDate,
    exposures: &DataFrame,
    factor_cov: &DataFrame,
) -> Result<Vec<String>, RiskModelError> {
    let exposure_factors: HashSet<String> = exposures
        .get_column_names()
        .iter()
        .map(|s| s.as_str().to_string())
        .filter(|n| n != ASSET_ID)
        .collect();

    let row_labels = panel::string_values(PanelKind::FactorCovariance, date, factor_cov, FACTOR_ID)?;
    let col_labels: HashSet<String> = factor_cov
        .get_column_names()
        .iter()
        .map(|s| s.as_str().to_string())
        .filter(|n| n != FACTOR_ID)
        .collect();

    // A factor is a candidate when all three panels know about it: exposure
    // column, covariance row, covariance column.
    let mut candidates: Vec<String> = row_labels
        .iter()
        .filter(|f| exposure_factors.contains(*f) && col_labels.contains(*f))
        .cloned()
        .collect();
    candidates.sort();
    candidates.dedup();

    // Two-stage finiteness screen. First drop factors whose own variance cell
    // is missing, then require every remaining pairwise cell to be finite. A
    // factor with a missing diagonal cannot rescue its partners, so screening
    // it first keeps otherwise-complete factors in the universe.
    let cell = |frame: &DataFrame, row: usize, col: &str| -> Option<f64> {
        frame
            .column(col)
            .ok()
            .and_then(|c| c.f64().ok())
            .and_then(|c| c.get(row))
            .filter(|v| v.is_finite())
    };
    let row_of = |label: &str| row_labels.iter().position(|l| l == label);

    let with_diagonal: Vec<String> = candidates
        .iter()
        .filter(|f| row_of(f).and_then(|i| cell(factor_cov, i, f)).is_some())
        .cloned()
        .collect();

    let retained: Vec<String> = with_diagonal
        .iter()
        .filter(|f| {
            let Some(i) = row_of(f) else { return false };
            with_diagonal
                .iter()
                .all(|g| cell(factor_cov, i, g).is_some())
        })
        .cloned()
        .collect();

    let dropped = candidates.len() - retained.len();
    if dropped > 0 {
        debug!(
            "dropped {} factor(s) with incomplete covariance rows for {}",
            dropped, date
        );
    }

    Ok(retained)
}

fn reconcile_assets(
    date: NaiveDate,
    exposures: &DataFrame,
    specific_risk: &DataFrame,
    factors: &[String],
) -> Result<Vec<String>, RiskModelError> {
    // Assets with known, finite specific risk. Unknown specific risk excludes
    // the asset for the date; defaulting to zero would understate risk and
    // silently corrupt downstream optimization.
    let risk_ids = panel::string_values(PanelKind::SpecificRisk, date, specific_risk, ASSET_ID)?;
    let risk_values = specific_risk
        .column(SPECIFIC_RISK)
        .and_then(|c| c.f64())
        .map_err(|_| RiskModelError::SchemaMismatch {
            panel: PanelKind::SpecificRisk,
            date,
            column: SPECIFIC_RISK.to_string(),
        })?;
    let mut risk_assets: HashSet<&str> = HashSet::new();
    for (i, id) in risk_ids.iter().enumerate() {
        if risk_values.get(i).is_some_and(|v| v.is_finite()) {
            risk_assets.insert(id.as_str());
        }
    }

    // Assets with a complete exposure row over the retained factors. An asset
    // with any null exposure is dropped entirely; partial rows are excluded,
    // not imputed.
    let exposure_ids = panel::string_values(PanelKind::Exposures, date, exposures, ASSET_ID)?;
    let mut factor_columns = Vec::with_capacity(factors.len());
    for factor in factors {
        let chunked = exposures
            .column(factor.as_str())
            .and_then(|c| c.f64())
            .map_err(|_| RiskModelError::SchemaMismatch {
                panel: PanelKind::Exposures,
                date,
                column: factor.clone(),
            })?;
        factor_columns.push(chunked);
    }

    let mut assets: Vec<String> = Vec::new();
    for (i, id) in exposure_ids.iter().enumerate() {
        if !risk_assets.contains(id.as_str()) {
            continue;
        }
        let complete = factor_columns
            .iter()
            .all(|c| c.get(i).is_some_and(|v| v.is_finite()));
        if complete {
            assets.push(id.clone());
        }
    }
    assets.sort();
    assets.dedup();

    Ok(assets)
}
