use chrono::NaiveDate;
use ndarray::Array2;
use polars::prelude::*;
use statrs::statistics::Statistics;
use std::collections::HashMap;

/// The assembled N x N asset covariance matrix for one date.
///
/// Rows and columns are indexed by the reconciled universe's sorted asset
/// order. The matrix owns its storage and is immutable once returned; it never
/// aliases the input panels' buffers.
#[derive(Debug, Clone)]
pub struct AssetCovarianceMatrix {
    date: NaiveDate,
    assets: Vec<String>,
    index: HashMap<String, usize>,
    matrix: Array2<f64>,
}

impl AssetCovarianceMatrix {
    pub(crate) fn new(date: NaiveDate, assets: Vec<String>, matrix: Array2<f64>) -> Self {
        debug_assert_eq!(matrix.nrows(), assets.len());
        debug_assert_eq!(matrix.ncols(), assets.len());
        let index = assets
            .iter()
            .enumerate()
            .map(|(i, id)| (id.clone(), i))
            .collect();
        Self {
            date,
            assets,
            index,
            matrix,
        }
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    /// Ordered asset identifiers defining row/column order.
    pub fn assets(&self) -> &[String] {
        &self.assets
    }

    pub fn n_assets(&self) -> usize {
        self.assets.len()
    }

    pub fn index_of(&self, asset_id: &str) -> Option<usize> {
        self.index.get(asset_id).copied()
    }

    pub fn matrix(&self) -> &Array2<f64> {
        &self.matrix
    }

    /// Covariance between two assets, `None` when either is outside the
    /// reconciled universe.
    pub fn covariance(&self, asset_i: &str, asset_j: &str) -> Option<f64> {
        let i = self.index_of(asset_i)?;
        let j = self.index_of(asset_j)?;
        Some(self.matrix[[i, j]])
    }

    /// Variance of a single asset (diagonal entry).
    pub fn variance(&self, asset_id: &str) -> Option<f64> {
        self.covariance(asset_id, asset_id)
    }

    /// Package the matrix as a DataFrame: an `asset_id` column followed by one
    /// column per asset, in universe order.
    pub fn to_dataframe(&self) -> PolarsResult<DataFrame> {
        let mut columns = Vec::with_capacity(self.assets.len() + 1);
        columns.push(Column::new("asset_id".into(), self.assets.clone()));
        for (j, asset) in self.assets.iter().enumerate() {
            let values: Vec<f64> = (0..self.assets.len())
                .map(|i| self.matrix[[i, j]])
                .collect();
            columns.push(Column::new(asset.as_str().into(), values));
        }
        DataFrame::new(columns)
    }

    /// Descriptive statistics of the matrix, for research diagnostics and log
    /// lines.
    pub fn summary(&self) -> CovarianceSummary {
        let n = self.assets.len();
        let variances: Vec<f64> = (0..n).map(|i| self.matrix[[i, i]]).collect();

        let mut correlations: Vec<f64> = Vec::with_capacity(n.saturating_sub(1) * n / 2);
        for i in 0..n {
            for j in (i + 1)..n {
                let denom = (self.matrix[[i, i]] * self.matrix[[j, j]]).sqrt();
                if denom > 0.0 {
                    correlations.push(self.matrix[[i, j]] / denom);
                }
            }
        }

        CovarianceSummary {
            n_assets: n,
            mean_variance: (&variances).mean(),
            max_variance: variances.iter().cloned().fold(f64::NAN, f64::max),
            mean_correlation: if correlations.is_empty() {
                0.0
            } else {
                (&correlations).mean()
            },
            correlation_std_dev: if correlations.len() < 2 {
                0.0
            } else {
                (&correlations).std_dev()
            },
        }
    }
}

/// Summary statistics over an assembled covariance matrix.
#[derive(Debug, Clone)]
pub struct CovarianceSummary {
    pub n_assets: usize,
    pub mean_variance: f64,
    pub max_variance: f64,
    pub mean_correlation: f64,
    pub correlation_std_dev: f64,
}
