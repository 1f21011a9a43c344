use log::debug;
use ndarray::{Array1, Array2};
use polars::prelude::*;
use std::collections::HashMap;

use crate::config::{ModelConfig, RiskUnits};
use crate::error::RiskModelError;
use crate::matrix::AssetCovarianceMatrix;
use crate::panel::{self, ASSET_ID, FACTOR_ID, PanelKind, SPECIFIC_RISK};
use crate::universe::ReconciledUniverse;

/// The three reconciled model inputs in dense form: exposures B (N x K),
/// factor covariance F (K x K), specific variances d (N), all in decimal
/// variance space and in the universe's deterministic order.
///
/// Holding the pieces separately keeps K-scale operations cheap for consumers
/// (risk decomposition never needs the N x N matrix) while `covariance_matrix`
/// materializes the full Σ = B·F·Bᵗ + D on demand.
#[derive(Debug, Clone)]
pub struct FactorModel {
    universe: ReconciledUniverse,
    exposures: Array2<f64>,
    factor_cov: Array2<f64>,
    specific_var: Array1<f64>,
}

impl FactorModel {
    /// Build the dense model inputs from normalized panel frames.
    ///
    /// The reconciler has already excluded incomplete rows, so a missing or
    /// non-finite cell here, or a negative specific variance, is a
    /// `ContractViolation`: an upstream invariant was broken. The factor
    /// covariance is verified symmetric within `config.symmetry_tolerance`
    /// (relative) and rejected rather than symmetrized when it is not.
    pub fn from_panels(
        universe: ReconciledUniverse,
        exposures: &DataFrame,
        factor_cov: &DataFrame,
        specific_risk: &DataFrame,
        config: &ModelConfig,
    ) -> Result<Self, RiskModelError> {
        let date = universe.date();
        let violation = |detail: String| RiskModelError::ContractViolation { date, detail };

        let b = exposure_matrix(&universe, exposures)?;
        let mut f = factor_cov_matrix(&universe, factor_cov)?;
        check_factor_cov_symmetry(&universe, &f, config)?;

        // Specific variances, with percent-volatility inputs squared into
        // variance space. Sign is checked before squaring; a negative value
        // would otherwise turn into a plausible-looking variance.
        let risk_by_asset = specific_risk_by_asset(date, specific_risk)?;
        let mut d = Array1::<f64>::zeros(universe.n_assets());
        for (i, asset) in universe.assets().iter().enumerate() {
            let value = risk_by_asset
                .get(asset.as_str())
                .copied()
                .filter(|v| v.is_finite())
                .ok_or_else(|| {
                    violation(format!("specific risk for asset '{asset}' missing or non-finite"))
                })?;
            if value < 0.0 {
                return Err(violation(format!(
                    "asset '{asset}' has negative specific risk {value}"
                )));
            }
            d[i] = match config.risk_units {
                RiskUnits::Decimal => value,
                RiskUnits::Percent => value * value / (100.0 * 100.0),
            };
        }

        if config.risk_units == RiskUnits::Percent {
            f /= 100.0 * 100.0;
        }

        debug!(
            "factor model for {}: {} assets x {} factors",
            date,
            universe.n_assets(),
            universe.n_factors()
        );

        Ok(Self {
            universe,
            exposures: b,
            factor_cov: f,
            specific_var: d,
        })
    }

    pub fn universe(&self) -> &ReconciledUniverse {
        &self.universe
    }

    pub fn exposures(&self) -> &Array2<f64> {
        &self.exposures
    }

    pub fn factor_covariance(&self) -> &Array2<f64> {
        &self.factor_cov
    }

    pub fn specific_variances(&self) -> &Array1<f64> {
        &self.specific_var
    }

    /// Materialize Σ = B·F·Bᵗ + D.
    ///
    /// `(B·F)` is evaluated first so the work is O(N·K² + N²·K) and only one
    /// N x N allocation is ever formed; D is added as a diagonal update. The
    /// result is explicitly symmetrized as `(Σ + Σᵗ)/2` before returning:
    /// floating-point multiply order introduces sub-tolerance asymmetry, and
    /// downstream consumers assume exact symmetry.
    pub fn covariance_matrix(&self) -> AssetCovarianceMatrix {
        let bf = self.exposures.dot(&self.factor_cov);
        let mut sigma = bf.dot(&self.exposures.t());
        for (i, v) in self.specific_var.iter().enumerate() {
            sigma[[i, i]] += v;
        }
        let sigma = 0.5 * (&sigma + &sigma.t());
        AssetCovarianceMatrix::new(self.universe.date(), self.universe.assets().to_vec(), sigma)
    }
}

/// Combine exposures, factor covariance, and specific variance into the asset
/// covariance matrix for the reconciled universe.
pub fn assemble(
    universe: ReconciledUniverse,
    exposures: &DataFrame,
    factor_cov: &DataFrame,
    specific_risk: &DataFrame,
    config: &ModelConfig,
) -> Result<AssetCovarianceMatrix, RiskModelError> {
    let model = FactorModel::from_panels(universe, exposures, factor_cov, specific_risk, config)?;
    Ok(model.covariance_matrix())
}

fn exposure_matrix(
    universe: &ReconciledUniverse,
    exposures: &DataFrame,
) -> Result<Array2<f64>, RiskModelError> {
    let date = universe.date();
    let violation = |detail: String| RiskModelError::ContractViolation { date, detail };

    let ids = panel::string_values(PanelKind::Exposures, date, exposures, ASSET_ID)?;
    let row_of: HashMap<&str, usize> = ids
        .iter()
        .enumerate()
        .map(|(i, id)| (id.as_str(), i))
        .collect();

    let mut columns = Vec::with_capacity(universe.n_factors());
    for factor in universe.factors() {
        let chunked = exposures
            .column(factor.as_str())
            .and_then(|c| c.f64())
            .map_err(|_| violation(format!("exposure column '{factor}' missing or mistyped")))?;
        columns.push(chunked);
    }

    let mut b = Array2::<f64>::zeros((universe.n_assets(), universe.n_factors()));
    for (i, asset) in universe.assets().iter().enumerate() {
        let row = *row_of
            .get(asset.as_str())
            .ok_or_else(|| violation(format!("asset '{asset}' missing from exposure panel")))?;
        for (k, chunked) in columns.iter().enumerate() {
            let value = chunked.get(row).filter(|v| v.is_finite()).ok_or_else(|| {
                violation(format!(
                    "exposure for asset '{asset}', factor '{}' missing or non-finite",
                    universe.factors()[k]
                ))
            })?;
            b[[i, k]] = value;
        }
    }
    Ok(b)
}

fn factor_cov_matrix(
    universe: &ReconciledUniverse,
    factor_cov: &DataFrame,
) -> Result<Array2<f64>, RiskModelError> {
    let date = universe.date();
    let violation = |detail: String| RiskModelError::ContractViolation { date, detail };

    let labels = panel::string_values(PanelKind::FactorCovariance, date, factor_cov, FACTOR_ID)?;
    let row_of: HashMap<&str, usize> = labels
        .iter()
        .enumerate()
        .map(|(i, l)| (l.as_str(), i))
        .collect();

    let mut f = Array2::<f64>::zeros((universe.n_factors(), universe.n_factors()));
    for (j, factor_j) in universe.factors().iter().enumerate() {
        let chunked = factor_cov
            .column(factor_j.as_str())
            .and_then(|c| c.f64())
            .map_err(|_| {
                violation(format!("factor covariance column '{factor_j}' missing or mistyped"))
            })?;
        for (i, factor_i) in universe.factors().iter().enumerate() {
            let row = *row_of.get(factor_i.as_str()).ok_or_else(|| {
                violation(format!("factor '{factor_i}' missing from covariance rows"))
            })?;
            let value = chunked.get(row).filter(|v| v.is_finite()).ok_or_else(|| {
                violation(format!(
                    "covariance cell ({factor_i}, {factor_j}) missing or non-finite"
                ))
            })?;
            f[[i, j]] = value;
        }
    }
    Ok(f)
}

fn check_factor_cov_symmetry(
    universe: &ReconciledUniverse,
    f: &Array2<f64>,
    config: &ModelConfig,
) -> Result<(), RiskModelError> {
    let mut worst: Option<(usize, usize, f64)> = None;
    for i in 0..f.nrows() {
        for j in (i + 1)..f.ncols() {
            let a = f[[i, j]];
            let b = f[[j, i]];
            let rel = (a - b).abs() / f64::max(1.0, f64::max(a.abs(), b.abs()));
            if rel > worst.map_or(0.0, |(_, _, w)| w) {
                worst = Some((i, j, rel));
            }
        }
    }
    if let Some((i, j, rel)) = worst {
        if rel > config.symmetry_tolerance {
            return Err(RiskModelError::AsymmetricFactorCovariance {
                date: universe.date(),
                factor_i: universe.factors()[i].clone(),
                factor_j: universe.factors()[j].clone(),
                delta: rel,
            });
        }
    }
    Ok(())
}

fn specific_risk_by_asset(
    date: chrono::NaiveDate,
    specific_risk: &DataFrame,
) -> Result<HashMap<String, f64>, RiskModelError> {
    let ids = panel::string_values(PanelKind::SpecificRisk, date, specific_risk, ASSET_ID)?;
    let values = specific_risk
        .column(SPECIFIC_RISK)
        .and_then(|c| c.f64())
        .map_err(|_| RiskModelError::SchemaMismatch {
            panel: PanelKind::SpecificRisk,
            date,
            column: SPECIFIC_RISK.to_string(),
        })?;
    let mut by_asset = HashMap::with_capacity(ids.len());
    for (i, id) in ids.iter().enumerate() {
        if let Some(v) = values.get(i) {
            by_asset.insert(id.clone(), v);
        }
    }
    Ok(by_asset)
}
