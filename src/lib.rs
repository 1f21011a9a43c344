//! Factor-based risk analytics for equity portfolios.
//!
//! The core is the covariance construction engine: per-date factor exposures,
//! a factor covariance matrix, and per-asset specific risk are reconciled into
//! a common universe and combined as Σ = B·F·Bᵗ + D, with symmetry and
//! positive-semi-definiteness guaranteed on the way out.

pub mod assembler;
pub mod attribution;
pub mod config;
pub mod engine;
pub mod error;
pub mod matrix;
pub mod panel;
pub mod universe;
pub mod validator;

pub use assembler::{FactorModel, assemble};
pub use config::{ColumnAliases, ModelConfig, RiskUnits};
pub use engine::{CovarianceEngine, CovarianceOutput};
pub use error::RiskModelError;
pub use matrix::{AssetCovarianceMatrix, CovarianceSummary};
pub use panel::{DateSpan, InMemoryPanelStore, PanelKind, PanelStore, PanelTable};
pub use universe::{ReconciledUniverse, reconcile};
pub use validator::{ValidationReport, validate};
