use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;

/// Unit convention of the input risk panels.
///
/// Barra-style model files ship factor covariances in percent-squared space and
/// specific risk as percent volatility; research pipelines usually want decimal
/// variance. `Percent` squares the specific-risk column and de-scales the final
/// matrix by 100^2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RiskUnits {
    #[default]
    Decimal,
    Percent,
}

/// Identifier-normalization tables for the panel accessor.
///
/// Source panels name their key columns inconsistently (`barrid`, `factor_1`,
/// ...). The accepted aliases are passed in explicitly so reconciliation stays a
/// pure function of its arguments rather than relying on ambient lookup state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnAliases {
    #[serde(default = "default_asset_id_aliases")]
    pub asset_id: Vec<String>,
    #[serde(default = "default_factor_id_aliases")]
    pub factor_id: Vec<String>,
    #[serde(default = "default_specific_risk_aliases")]
    pub specific_risk: Vec<String>,
}

impl Default for ColumnAliases {
    fn default() -> Self {
        Self {
            asset_id: default_asset_id_aliases(),
            factor_id: default_factor_id_aliases(),
            specific_risk: default_specific_risk_aliases(),
        }
    }
}

fn default_asset_id_aliases() -> Vec<String> {
    vec![
        "barrid".to_string(),
        "asset".to_string(),
        "security_id".to_string(),
    ]
}

fn default_factor_id_aliases() -> Vec<String> {
    vec!["factor_1".to_string(), "factor".to_string()]
}

fn default_specific_risk_aliases() -> Vec<String> {
    vec!["spec_risk".to_string(), "specific_vol".to_string()]
}

/// Tolerances and policies for covariance construction and validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default)]
    pub risk_units: RiskUnits,
    /// Relative tolerance for symmetry checks on the factor covariance input
    /// and the assembled matrix.
    #[serde(default = "default_symmetry_tolerance")]
    pub symmetry_tolerance: f64,
    /// Minimum acceptable eigenvalue of the output matrix. Zero means PSD.
    #[serde(default = "default_eigenvalue_floor")]
    pub eigenvalue_floor: f64,
    /// Eigenvalues within this distance below the floor are treated as clean;
    /// anything further below triggers the repair policy.
    #[serde(default = "default_eigenvalue_tolerance")]
    pub eigenvalue_tolerance: f64,
    /// Value that clipped eigenvalues are raised to during repair.
    #[serde(default = "default_repair_epsilon")]
    pub repair_epsilon: f64,
    /// Maximum fraction of total absolute eigenvalue mass that a repair may
    /// move before the matrix is considered unrepairable.
    #[serde(default = "default_max_repair_fraction")]
    pub max_repair_fraction: f64,
    #[serde(default)]
    pub column_aliases: ColumnAliases,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            risk_units: RiskUnits::default(),
            symmetry_tolerance: default_symmetry_tolerance(),
            eigenvalue_floor: default_eigenvalue_floor(),
            eigenvalue_tolerance: default_eigenvalue_tolerance(),
            repair_epsilon: default_repair_epsilon(),
            max_repair_fraction: default_max_repair_fraction(),
            column_aliases: ColumnAliases::default(),
        }
    }
}

fn default_symmetry_tolerance() -> f64 {
    1e-8
}

fn default_eigenvalue_floor() -> f64 {
    0.0
}

fn default_eigenvalue_tolerance() -> f64 {
    1e-9
}

fn default_repair_epsilon() -> f64 {
    1e-12
}

fn default_max_repair_fraction() -> f64 {
    0.01 // 1% of eigenvalue mass
}

impl ModelConfig {
    pub fn load_from_file(path: &str) -> Result<Self> {
        let config_str = fs::read_to_string(path)?;
        let config: ModelConfig = serde_json::from_str(&config_str)?;
        Ok(config)
    }
}
