use chrono::NaiveDate;
use log::{debug, warn};
use nalgebra::{DMatrix, DVector, SymmetricEigen};

use crate::config::ModelConfig;
use crate::error::RiskModelError;
use crate::matrix::AssetCovarianceMatrix;

/// Outcome of post-construction validation for one date.
///
/// A repair is the only anomaly the engine absorbs internally, and it is
/// always recorded here, never silently discarded.
#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub date: NaiveDate,
    /// Minimum eigenvalue of the matrix as assembled, before any repair.
    pub min_eigenvalue: f64,
    pub repaired: bool,
    /// Number of eigenvalues clipped up to the repair epsilon.
    pub clipped_eigenvalues: usize,
    /// Fraction of total absolute eigenvalue mass moved by the repair.
    pub repair_fraction: f64,
}

/// Validate an assembled matrix: no NaN/Inf entries, symmetry within
/// tolerance, minimum eigenvalue at or above the configured floor.
///
/// Eigenvalues below the floor beyond `config.eigenvalue_tolerance` are
/// clipped to `config.repair_epsilon` and the matrix reconstructed from its
/// eigen-decomposition. Near-singular risk models are common (collinear
/// factors, thin universes), so in-budget violations are repaired and
/// reported rather than rejected; a repair that would move more than
/// `config.max_repair_fraction` of the eigenvalue mass fails with
/// `UnrepairablePSDViolation` instead.
pub fn validate(
    matrix: AssetCovarianceMatrix,
    config: &ModelConfig,
) -> Result<(AssetCovarianceMatrix, ValidationReport), RiskModelError> {
    let date = matrix.date();
    let n = matrix.n_assets();
    let m = matrix.matrix();

    for ((i, j), value) in m.indexed_iter() {
        if !value.is_finite() {
            return Err(RiskModelError::NonFiniteEntry {
                date,
                row_asset: matrix.assets()[i].clone(),
                col_asset: matrix.assets()[j].clone(),
            });
        }
    }

    let mut max_delta: f64 = 0.0;
    for i in 0..n {
        for j in (i + 1)..n {
            let a = m[[i, j]];
            let b = m[[j, i]];
            let rel = (a - b).abs() / f64::max(1.0, f64::max(a.abs(), b.abs()));
            max_delta = max_delta.max(rel);
        }
    }
    if max_delta > config.symmetry_tolerance {
        return Err(RiskModelError::AsymmetryExceeded { date, max_delta });
    }

    // Row-major copy; logical iteration order is layout-independent.
    let data: Vec<f64> = m.iter().copied().collect();
    let eigen = SymmetricEigen::new(DMatrix::from_row_slice(n, n, &data));
    let min_eigenvalue = eigen
        .eigenvalues
        .iter()
        .copied()
        .fold(f64::INFINITY, f64::min);

    if min_eigenvalue >= config.eigenvalue_floor - config.eigenvalue_tolerance {
        debug!(
            "covariance matrix for {} is clean: min eigenvalue {:.3e}",
            date, min_eigenvalue
        );
        let report = ValidationReport {
            date,
            min_eigenvalue,
            repaired: false,
            clipped_eigenvalues: 0,
            repair_fraction: 0.0,
        };
        return Ok((matrix, report));
    }

    // Deterministic repair: clip the violating eigenvalues and reconstruct.
    let total_mass: f64 = eigen.eigenvalues.iter().map(|v| v.abs()).sum();
    let target = f64::max(config.eigenvalue_floor, config.repair_epsilon);
    let mut clipped_eigenvalues = 0;
    let mut moved_mass = 0.0;
    let clipped: Vec<f64> = eigen
        .eigenvalues
        .iter()
        .map(|&v| {
            if v < config.eigenvalue_floor - config.eigenvalue_tolerance {
                clipped_eigenvalues += 1;
                moved_mass += (target - v).abs();
                target
            } else {
                v
            }
        })
        .collect();

    let repair_fraction = if total_mass > 0.0 {
        moved_mass / total_mass
    } else {
        1.0
    };
    if repair_fraction > config.max_repair_fraction {
        return Err(RiskModelError::UnrepairablePSDViolation {
            date,
            repair_fraction,
            budget: config.max_repair_fraction,
        });
    }

    warn!(
        "repaired covariance matrix for {}: clipped {} eigenvalue(s), min was {:.3e}, {:.3e} of eigenvalue mass moved",
        date, clipped_eigenvalues, min_eigenvalue, repair_fraction
    );

    let v = &eigen.eigenvectors;
    let rebuilt = v * DMatrix::from_diagonal(&DVector::from_vec(clipped)) * v.transpose();
    let rebuilt = 0.5 * (&rebuilt + &rebuilt.transpose());

    let mut data = Vec::with_capacity(n * n);
    for i in 0..n {
        for j in 0..n {
            data.push(rebuilt[(i, j)]);
        }
    }
    let repaired = ndarray::Array2::from_shape_vec((n, n), data)
        .map_err(|_| RiskModelError::ContractViolation {
            date,
            detail: "eigen reconstruction produced a mis-shaped matrix".to_string(),
        })?;

    let report = ValidationReport {
        date,
        min_eigenvalue,
        repaired: true,
        clipped_eigenvalues,
        repair_fraction,
    };
    Ok((
        AssetCovarianceMatrix::new(date, matrix.assets().to_vec(), repaired),
        report,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 28).unwrap()
    }

    fn matrix_of(values: ndarray::Array2<f64>) -> AssetCovarianceMatrix {
        let assets: Vec<String> = (0..values.nrows()).map(|i| format!("A{i}")).collect();
        AssetCovarianceMatrix::new(date(), assets, values)
    }

    #[test]
    fn test_clean_matrix_passes_unchanged() {
        let matrix = matrix_of(array![[4.0, 1.0], [1.0, 9.0]]);
        let config = ModelConfig::default();
        let (validated, report) = validate(matrix, &config).unwrap();
        assert!(!report.repaired);
        assert_eq!(report.clipped_eigenvalues, 0);
        assert!(report.min_eigenvalue > 0.0);
        assert_eq!(validated.matrix()[[0, 1]], 1.0);
    }

    #[test]
    fn test_numerical_noise_is_repaired_and_reported() {
        // Eigenvalues 2 + 1e-6 and -1e-6: PSD violation at noise scale.
        let matrix = matrix_of(array![[1.0, 1.000001], [1.000001, 1.0]]);
        let config = ModelConfig::default();
        let (validated, report) = validate(matrix, &config).unwrap();

        assert!(report.repaired);
        assert_eq!(report.clipped_eigenvalues, 1);
        assert!(report.min_eigenvalue < 0.0);
        assert!(report.repair_fraction < config.max_repair_fraction);

        // Repaired matrix is PSD and stays close to the input.
        let (_, recheck) = validate(validated.clone(), &config).unwrap();
        assert!(!recheck.repaired);
        assert!((validated.matrix()[[0, 1]] - 1.000001).abs() < 1e-5);
    }

    #[test]
    fn test_large_violation_is_unrepairable() {
        // Eigenvalues 11 and -1 with trace 10: far beyond the 1% mass budget.
        let matrix = matrix_of(array![[5.0, 6.0], [6.0, 5.0]]);
        let config = ModelConfig::default();
        let err = validate(matrix, &config).unwrap_err();
        match err {
            RiskModelError::UnrepairablePSDViolation {
                repair_fraction, ..
            } => assert!(repair_fraction > 0.05),
            other => panic!("expected UnrepairablePSDViolation, got {other:?}"),
        }
    }

    #[test]
    fn test_non_finite_entry_identifies_position() {
        let matrix = matrix_of(array![[1.0, f64::NAN], [f64::NAN, 1.0]]);
        let config = ModelConfig::default();
        let err = validate(matrix, &config).unwrap_err();
        match err {
            RiskModelError::NonFiniteEntry {
                row_asset,
                col_asset,
                ..
            } => {
                assert_eq!(row_asset, "A0");
                assert_eq!(col_asset, "A1");
            }
            other => panic!("expected NonFiniteEntry, got {other:?}"),
        }
    }

    #[test]
    fn test_asymmetry_beyond_tolerance_rejected() {
        let matrix = matrix_of(array![[1.0, 0.5], [0.0, 1.0]]);
        let config = ModelConfig::default();
        let err = validate(matrix, &config).unwrap_err();
        assert!(matches!(err, RiskModelError::AsymmetryExceeded { .. }));
    }

    #[test]
    fn test_raised_eigenvalue_floor() {
        // Min eigenvalue is 3; a floor above that triggers the repair path.
        let matrix = matrix_of(array![[4.0, 1.0], [1.0, 4.0]]);
        let config = ModelConfig {
            eigenvalue_floor: 3.5,
            max_repair_fraction: 0.5,
            ..ModelConfig::default()
        };
        let (validated, report) = validate(matrix, &config).unwrap();
        assert!(report.repaired);
        assert_eq!(report.clipped_eigenvalues, 1);
        // Clipped up to the floor itself, not the epsilon.
        let (_, recheck) = validate(validated, &config).unwrap();
        assert!(recheck.min_eigenvalue >= 3.5 - 1e-9);
    }
}
