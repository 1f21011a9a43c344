use ndarray::Array1;
use std::collections::HashMap;

use crate::assembler::FactorModel;
use crate::error::RiskModelError;
use crate::matrix::AssetCovarianceMatrix;

/// Risk contribution of a single asset to total portfolio risk.
#[derive(Debug, Clone)]
pub struct RiskContribution {
    pub asset_id: String,
    pub weight: f64,
    /// Marginal contribution to risk: d(sigma_p)/d(w_i).
    pub marginal_risk: f64,
    /// Share of total portfolio risk, sums to one across assets.
    pub risk_contribution: f64,
}

/// Factor/specific split of portfolio variance.
#[derive(Debug, Clone)]
pub struct RiskDecomposition {
    pub factor_variance: f64,
    pub specific_variance: f64,
    pub total_variance: f64,
}

/// Total portfolio variance w'Σw for weights keyed by asset id.
///
/// Assets in the matrix but absent from `weights` carry zero weight; a weight
/// for an asset outside the reconciled universe is rejected rather than
/// silently ignored, since it means the caller's portfolio and the risk model
/// disagree about the universe.
pub fn portfolio_variance(
    matrix: &AssetCovarianceMatrix,
    weights: &HashMap<String, f64>,
) -> Result<f64, RiskModelError> {
    let w = aligned_weights(matrix.assets(), weights, matrix.date())?;
    let sigma_w = matrix.matrix().dot(&w);
    Ok(w.dot(&sigma_w))
}

/// Portfolio volatility, the square root of `portfolio_variance`.
pub fn portfolio_volatility(
    matrix: &AssetCovarianceMatrix,
    weights: &HashMap<String, f64>,
) -> Result<f64, RiskModelError> {
    Ok(portfolio_variance(matrix, weights)?.sqrt())
}

/// Per-asset marginal and percentage risk contributions.
///
/// MCR_i = (Σw)_i / sigma_p; contribution_i = w_i * MCR_i / sigma_p. For a
/// zero-risk portfolio all contributions are zero.
pub fn risk_contributions(
    matrix: &AssetCovarianceMatrix,
    weights: &HashMap<String, f64>,
) -> Result<Vec<RiskContribution>, RiskModelError> {
    let w = aligned_weights(matrix.assets(), weights, matrix.date())?;
    let sigma_w = matrix.matrix().dot(&w);
    let volatility = w.dot(&sigma_w).max(0.0).sqrt();

    let contributions = matrix
        .assets()
        .iter()
        .enumerate()
        .map(|(i, asset)| {
            let (marginal_risk, risk_contribution) = if volatility > 0.0 {
                let marginal = sigma_w[i] / volatility;
                (marginal, w[i] * marginal / volatility)
            } else {
                (0.0, 0.0)
            };
            RiskContribution {
                asset_id: asset.clone(),
                weight: w[i],
                marginal_risk,
                risk_contribution,
            }
        })
        .collect();

    Ok(contributions)
}

/// Split portfolio variance into factor and specific components without
/// materializing the N x N matrix: factor variance is (B'w)' F (B'w), specific
/// variance is sum of w_i^2 d_i.
pub fn risk_decomposition(
    model: &FactorModel,
    weights: &HashMap<String, f64>,
) -> Result<RiskDecomposition, RiskModelError> {
    let universe = model.universe();
    let w = aligned_weights(universe.assets(), weights, universe.date())?;

    let factor_weights = model.exposures().t().dot(&w);
    let factor_variance = factor_weights.dot(&model.factor_covariance().dot(&factor_weights));

    let specific_variance = w
        .iter()
        .zip(model.specific_variances().iter())
        .map(|(wi, di)| wi * wi * di)
        .sum::<f64>();

    Ok(RiskDecomposition {
        factor_variance,
        specific_variance,
        total_variance: factor_variance + specific_variance,
    })
}

fn aligned_weights(
    assets: &[String],
    weights: &HashMap<String, f64>,
    date: chrono::NaiveDate,
) -> Result<Array1<f64>, RiskModelError> {
    for asset in weights.keys() {
        if !assets.contains(asset) {
            return Err(RiskModelError::ContractViolation {
                date,
                detail: format!("weight supplied for asset '{asset}' outside the universe"),
            });
        }
    }
    Ok(Array1::from_iter(
        assets.iter().map(|a| weights.get(a).copied().unwrap_or(0.0)),
    ))
}
