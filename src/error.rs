use chrono::NaiveDate;
use thiserror::Error;

use crate::panel::PanelKind;

/// Failure taxonomy for covariance construction.
///
/// Every variant carries the offending date and, where applicable, the offending
/// asset/factor identifiers so a caller can log or re-run diagnostics without
/// re-deriving context. Accessor and reconciler failures abort construction for
/// that date; no partial matrix is ever returned.
#[derive(Debug, Error)]
pub enum RiskModelError {
    /// No data exists for the requested panel and date. Recoverable by caller
    /// retry or backfill.
    #[error("no {panel} data available for {date}")]
    DataUnavailable { panel: PanelKind, date: NaiveDate },

    /// The source panel lacks an expected key column, or the column has the
    /// wrong type.
    #[error("{panel} panel for {date} has a schema problem with column '{column}'")]
    SchemaMismatch {
        panel: PanelKind,
        date: NaiveDate,
        column: String,
    },

    /// Reconciliation produced zero usable assets or factors. Reportable, not
    /// retryable without new data; an empty matrix is never silently returned.
    #[error("reconciled universe for {date} is empty: {detail}")]
    EmptyUniverse { date: NaiveDate, detail: String },

    /// The factor covariance matrix is asymmetric beyond tolerance. Asymmetry
    /// usually signals a data bug rather than rounding noise, so it is never
    /// silently symmetrized.
    #[error(
        "factor covariance for {date} is asymmetric at ({factor_i}, {factor_j}): |delta| = {delta:.3e}"
    )]
    AsymmetricFactorCovariance {
        date: NaiveDate,
        factor_i: String,
        factor_j: String,
        delta: f64,
    },

    /// An upstream invariant was already broken before this stage. Always
    /// surfaced, never swallowed.
    #[error("contract violation for {date}: {detail}")]
    ContractViolation { date: NaiveDate, detail: String },

    /// The assembled matrix contains a NaN or infinite entry.
    #[error("covariance matrix for {date} has a non-finite entry at ({row_asset}, {col_asset})")]
    NonFiniteEntry {
        date: NaiveDate,
        row_asset: String,
        col_asset: String,
    },

    /// The assembled matrix is asymmetric beyond tolerance.
    #[error("covariance matrix for {date} violates symmetry tolerance: max |delta| = {max_delta:.3e}")]
    AsymmetryExceeded { date: NaiveDate, max_delta: f64 },

    /// Eigenvalue repair would change more of the matrix's eigenvalue mass than
    /// the configured budget allows; the input is too corrupted to trust.
    #[error(
        "covariance matrix for {date} is not repairable: {repair_fraction:.4} of eigenvalue mass is negative (budget {budget:.4})"
    )]
    UnrepairablePSDViolation {
        date: NaiveDate,
        repair_fraction: f64,
        budget: f64,
    },
}

pub type Result<T> = std::result::Result<T, RiskModelError>;
