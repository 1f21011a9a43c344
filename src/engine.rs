use chrono::NaiveDate;
use log::info;
use rayon::prelude::*;
use std::time::Instant;

use crate::assembler::FactorModel;
use crate::config::ModelConfig;
use crate::error::RiskModelError;
use crate::matrix::AssetCovarianceMatrix;
use crate::panel::{DateSpan, PanelKind, PanelStore};
use crate::universe::{self, ReconciledUniverse};
use crate::validator::{self, ValidationReport};

/// Everything one date's construction produces: the reconciled universe, the
/// validated (possibly repaired) matrix, and the validation report.
#[derive(Debug, Clone)]
pub struct CovarianceOutput {
    pub universe: ReconciledUniverse,
    pub matrix: AssetCovarianceMatrix,
    pub report: ValidationReport,
}

/// Per-date covariance construction pipeline: load, reconcile, assemble,
/// validate.
///
/// The engine is stateless between calls; each date is independent and
/// side-effect-free with respect to other dates, so batches parallelize
/// without shared mutable state.
#[derive(Debug, Clone, Default)]
pub struct CovarianceEngine {
    config: ModelConfig,
}

impl CovarianceEngine {
    pub fn new(config: ModelConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Construct and validate the covariance matrix for one date.
    pub fn build(
        &self,
        store: &dyn PanelStore,
        date: NaiveDate,
    ) -> Result<CovarianceOutput, RiskModelError> {
        let started = Instant::now();
        let model = self.build_model(store, date)?;
        let (matrix, report) = validator::validate(model.covariance_matrix(), &self.config)?;

        info!(
            "built covariance matrix for {}: {} assets, repaired: {}, took {:?}",
            date,
            matrix.n_assets(),
            report.repaired,
            started.elapsed()
        );

        Ok(CovarianceOutput {
            universe: model.universe().clone(),
            matrix,
            report,
        })
    }

    /// Load panels and build the dense factor model for one date, without
    /// materializing the N x N matrix. Useful to consumers that only need
    /// factor-level analytics.
    pub fn build_model(
        &self,
        store: &dyn PanelStore,
        date: NaiveDate,
    ) -> Result<FactorModel, RiskModelError> {
        let span = DateSpan::Single(date);
        let exposures = store.load_panel(PanelKind::Exposures, span, None)?;
        let factor_cov = store.load_panel(PanelKind::FactorCovariance, span, None)?;
        let specific = store.load_panel(PanelKind::SpecificRisk, span, None)?;

        let exposures = exposures.expect_frame(date)?;
        let factor_cov = factor_cov.expect_frame(date)?;
        let specific = specific.expect_frame(date)?;

        let universe = universe::reconcile(date, exposures, factor_cov, specific)?;
        FactorModel::from_panels(universe, exposures, factor_cov, specific, &self.config)
    }

    /// Construct matrices for a batch of dates on a worker pool.
    ///
    /// Each date runs as an independent construction; a failure for one date
    /// never affects the others. Results are returned in input order.
    pub fn build_batch(
        &self,
        store: &dyn PanelStore,
        dates: &[NaiveDate],
    ) -> Vec<(NaiveDate, Result<CovarianceOutput, RiskModelError>)> {
        dates
            .par_iter()
            .map(|date| (*date, self.build(store, *date)))
            .collect()
    }
}
