use chrono::NaiveDate;
use log::debug;
use polars::prelude::*;
use std::collections::{BTreeMap, HashMap};

use crate::config::ColumnAliases;
use crate::error::RiskModelError;

#[cfg(test)]
use mockall::automock;

/// Canonical key-column names after normalization.
pub const ASSET_ID: &str = "asset_id";
pub const FACTOR_ID: &str = "factor_id";
pub const SPECIFIC_RISK: &str = "specific_risk";

/// Discriminator for the three input panels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PanelKind {
    Exposures,
    FactorCovariance,
    SpecificRisk,
}

impl std::fmt::Display for PanelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PanelKind::Exposures => write!(f, "exposures"),
            PanelKind::FactorCovariance => write!(f, "factor covariance"),
            PanelKind::SpecificRisk => write!(f, "specific risk"),
        }
    }
}

/// A single date or an inclusive date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateSpan {
    Single(NaiveDate),
    Range { start: NaiveDate, end: NaiveDate },
}

impl DateSpan {
    pub fn contains(&self, date: NaiveDate) -> bool {
        match self {
            DateSpan::Single(d) => *d == date,
            DateSpan::Range { start, end } => *start <= date && date <= *end,
        }
    }

    /// First date of the span, used to identify the span in error reports.
    pub fn start(&self) -> NaiveDate {
        match self {
            DateSpan::Single(d) => *d,
            DateSpan::Range { start, .. } => *start,
        }
    }
}

/// A loaded panel: one normalized frame per date within the requested span.
#[derive(Debug, Clone)]
pub struct PanelTable {
    kind: PanelKind,
    frames: BTreeMap<NaiveDate, DataFrame>,
}

impl PanelTable {
    pub fn new(kind: PanelKind, frames: BTreeMap<NaiveDate, DataFrame>) -> Self {
        Self { kind, frames }
    }

    pub fn kind(&self) -> PanelKind {
        self.kind
    }

    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.frames.keys().copied()
    }

    pub fn frame(&self, date: NaiveDate) -> Option<&DataFrame> {
        self.frames.get(&date)
    }

    /// Frame for `date`, or `DataUnavailable` if the store had no data for it.
    pub fn expect_frame(&self, date: NaiveDate) -> Result<&DataFrame, RiskModelError> {
        self.frames.get(&date).ok_or(RiskModelError::DataUnavailable {
            panel: self.kind,
            date,
        })
    }
}

/// Read-only source of the three input panels.
///
/// Implementations perform deterministic column-name normalization (trim,
/// key-column alias mapping) and the upper/lower-triangular mirroring of the
/// factor covariance storage format. They never mutate the backing data.
#[cfg_attr(test, automock)]
pub trait PanelStore: Send + Sync {
    /// Load a panel for a single date or an inclusive date range, optionally
    /// restricted to an asset allow-list. Fails with `DataUnavailable` when no
    /// date in the span has data, and `SchemaMismatch` when a key column is
    /// missing or mistyped.
    fn load_panel<'a>(
        &self,
        kind: PanelKind,
        span: DateSpan,
        asset_filter: Option<&'a [String]>,
    ) -> Result<PanelTable, RiskModelError>;
}

/// Panel store backed by in-memory per-date frames.
///
/// Storage-format concerns (parquet, databases, vendor files) belong to the
/// caller; this store is the seam they load into.
#[derive(Debug, Default, Clone)]
pub struct InMemoryPanelStore {
    exposures: BTreeMap<NaiveDate, DataFrame>,
    factor_covariances: BTreeMap<NaiveDate, DataFrame>,
    specific_risks: BTreeMap<NaiveDate, DataFrame>,
    aliases: ColumnAliases,
}

impl InMemoryPanelStore {
    pub fn new(aliases: ColumnAliases) -> Self {
        Self {
            exposures: BTreeMap::new(),
            factor_covariances: BTreeMap::new(),
            specific_risks: BTreeMap::new(),
            aliases,
        }
    }

    pub fn insert(&mut self, kind: PanelKind, date: NaiveDate, frame: DataFrame) {
        match kind {
            PanelKind::Exposures => self.exposures.insert(date, frame),
            PanelKind::FactorCovariance => self.factor_covariances.insert(date, frame),
            PanelKind::SpecificRisk => self.specific_risks.insert(date, frame),
        };
    }

    fn frames_for(&self, kind: PanelKind) -> &BTreeMap<NaiveDate, DataFrame> {
        match kind {
            PanelKind::Exposures => &self.exposures,
            PanelKind::FactorCovariance => &self.factor_covariances,
            PanelKind::SpecificRisk => &self.specific_risks,
        }
    }
}

impl PanelStore for InMemoryPanelStore {
    fn load_panel(
        &self,
        kind: PanelKind,
        span: DateSpan,
        asset_filter: Option<&[String]>,
    ) -> Result<PanelTable, RiskModelError> {
        let mut frames = BTreeMap::new();
        for (date, raw) in self.frames_for(kind) {
            if !span.contains(*date) {
                continue;
            }
            let mut frame = normalize_frame(kind, *date, raw, &self.aliases)?;
            if let Some(assets) = asset_filter {
                if kind != PanelKind::FactorCovariance {
                    frame = filter_assets(kind, *date, frame, assets)?;
                }
            }
            frames.insert(*date, frame);
        }

        if frames.is_empty() {
            return Err(RiskModelError::DataUnavailable {
                panel: kind,
                date: span.start(),
            });
        }

        debug!("loaded {} panel for {} date(s)", kind, frames.len());
        Ok(PanelTable::new(kind, frames))
    }
}

/// Deterministic column normalization: trim column names, map key-column
/// aliases to canonical names, verify key columns exist with the expected
/// types, trim identifier values, and mirror triangular factor covariance
/// storage into a full matrix.
pub fn normalize_frame(
    kind: PanelKind,
    date: NaiveDate,
    raw: &DataFrame,
    aliases: &ColumnAliases,
) -> Result<DataFrame, RiskModelError> {
    let mut frame = raw.clone();

    // Trim column names and canonicalize key columns. Alias matching is
    // case-insensitive; factor column names keep their original case so they
    // keep matching the factor labels inside the covariance panel.
    let renames: Vec<(String, String)> = frame
        .get_column_names()
        .iter()
        .filter_map(|name| {
            let original = name.as_str();
            let trimmed = original.trim();
            let canonical = canonical_key_name(kind, trimmed, aliases);
            let target = canonical.unwrap_or(trimmed);
            if target != original {
                Some((original.to_string(), target.to_string()))
            } else {
                None
            }
        })
        .collect();
    for (old, new) in renames {
        frame
            .rename(&old, new.as_str().into())
            .map_err(|_| RiskModelError::SchemaMismatch {
                panel: kind,
                date,
                column: old,
            })?;
    }

    // Frames are already keyed by date in the store; a redundant date column
    // from the source extract is dropped rather than treated as a factor.
    if frame.get_column_names().iter().any(|c| c.as_str() == "date") {
        frame = frame.drop("date").map_err(|_| RiskModelError::SchemaMismatch {
            panel: kind,
            date,
            column: "date".to_string(),
        })?;
    }

    let key = match kind {
        PanelKind::FactorCovariance => FACTOR_ID,
        _ => ASSET_ID,
    };
    check_string_column(kind, date, &frame, key)?;

    match kind {
        PanelKind::Exposures => {
            for name in column_names(&frame) {
                if name != ASSET_ID {
                    check_float_column(kind, date, &frame, &name)?;
                }
            }
            trim_id_values(kind, date, &mut frame, ASSET_ID)?;
            Ok(frame)
        }
        PanelKind::SpecificRisk => {
            check_float_column(kind, date, &frame, SPECIFIC_RISK)?;
            trim_id_values(kind, date, &mut frame, ASSET_ID)?;
            Ok(frame)
        }
        PanelKind::FactorCovariance => {
            for name in column_names(&frame) {
                if name != FACTOR_ID {
                    check_float_column(kind, date, &frame, &name)?;
                }
            }
            mirror_triangular(date, &frame)
        }
    }
}

fn canonical_key_name(
    kind: PanelKind,
    trimmed: &str,
    aliases: &ColumnAliases,
) -> Option<&'static str> {
    let lowered = trimmed.to_lowercase();
    let matches = |canonical: &str, alias_list: &[String]| {
        lowered == canonical || alias_list.iter().any(|a| a.to_lowercase() == lowered)
    };
    match kind {
        PanelKind::Exposures => matches(ASSET_ID, &aliases.asset_id).then_some(ASSET_ID),
        PanelKind::FactorCovariance => matches(FACTOR_ID, &aliases.factor_id).then_some(FACTOR_ID),
        PanelKind::SpecificRisk => {
            if matches(ASSET_ID, &aliases.asset_id) {
                Some(ASSET_ID)
            } else if matches(SPECIFIC_RISK, &aliases.specific_risk) {
                Some(SPECIFIC_RISK)
            } else {
                None
            }
        }
    }
}

fn column_names(frame: &DataFrame) -> Vec<String> {
    frame
        .get_column_names()
        .iter()
        .map(|s| s.as_str().to_string())
        .collect()
}

fn check_string_column(
    kind: PanelKind,
    date: NaiveDate,
    frame: &DataFrame,
    name: &str,
) -> Result<(), RiskModelError> {
    let mismatch = || RiskModelError::SchemaMismatch {
        panel: kind,
        date,
        column: name.to_string(),
    };
    let column = frame.column(name).map_err(|_| mismatch())?;
    if column.dtype() != &DataType::String {
        return Err(mismatch());
    }
    Ok(())
}

fn check_float_column(
    kind: PanelKind,
    date: NaiveDate,
    frame: &DataFrame,
    name: &str,
) -> Result<(), RiskModelError> {
    let mismatch = || RiskModelError::SchemaMismatch {
        panel: kind,
        date,
        column: name.to_string(),
    };
    let column = frame.column(name).map_err(|_| mismatch())?;
    if column.dtype() != &DataType::Float64 {
        return Err(mismatch());
    }
    Ok(())
}

fn trim_id_values(
    kind: PanelKind,
    date: NaiveDate,
    frame: &mut DataFrame,
    name: &str,
) -> Result<(), RiskModelError> {
    let values = string_values(kind, date, frame, name)?;
    if values.iter().all(|v| v.trim() == v.as_str()) {
        return Ok(());
    }
    let trimmed: Vec<String> = values.iter().map(|v| v.trim().to_string()).collect();
    frame
        .with_column(Column::new(name.into(), trimmed))
        .map_err(|_| RiskModelError::SchemaMismatch {
            panel: kind,
            date,
            column: name.to_string(),
        })?;
    Ok(())
}

/// Non-null string values of a key column. Null identifiers are a schema
/// problem, not a reconcilable gap.
pub fn string_values(
    kind: PanelKind,
    date: NaiveDate,
    frame: &DataFrame,
    name: &str,
) -> Result<Vec<String>, RiskModelError> {
    let mismatch = || RiskModelError::SchemaMismatch {
        panel: kind,
        date,
        column: name.to_string(),
    };
    let chunked = frame
        .column(name)
        .and_then(|c| c.str())
        .map_err(|_| mismatch())?;
    let mut values = Vec::with_capacity(chunked.len());
    for v in chunked.into_iter() {
        values.push(v.ok_or_else(mismatch)?.to_string());
    }
    Ok(values)
}

fn filter_assets(
    kind: PanelKind,
    date: NaiveDate,
    frame: DataFrame,
    assets: &[String],
) -> Result<DataFrame, RiskModelError> {
    let ids = string_values(kind, date, &frame, ASSET_ID)?;
    let mask: Vec<bool> = ids.iter().map(|id| assets.contains(id)).collect();
    let mask = BooleanChunked::from_slice("mask".into(), &mask);
    frame.filter(&mask).map_err(|_| RiskModelError::SchemaMismatch {
        panel: kind,
        date,
        column: ASSET_ID.to_string(),
    })
}

/// Rebuild a factor covariance frame with the triangular storage mirrored into
/// a full matrix: a missing/NaN cell (i, j) takes the value of (j, i) when that
/// side is populated. Cells populated on both sides are left untouched; the
/// assembler checks them for symmetry.
fn mirror_triangular(date: NaiveDate, frame: &DataFrame) -> Result<DataFrame, RiskModelError> {
    let kind = PanelKind::FactorCovariance;
    let row_labels: Vec<String> = string_values(kind, date, frame, FACTOR_ID)?
        .iter()
        .map(|v| v.trim().to_string())
        .collect();
    let col_labels: Vec<String> = column_names(frame)
        .into_iter()
        .filter(|n| n != FACTOR_ID)
        .collect();

    let row_index: HashMap<&str, usize> = row_labels
        .iter()
        .enumerate()
        .map(|(i, l)| (l.as_str(), i))
        .collect();
    let col_index: HashMap<&str, usize> = col_labels
        .iter()
        .enumerate()
        .map(|(j, l)| (l.as_str(), j))
        .collect();

    let mismatch = |column: &str| RiskModelError::SchemaMismatch {
        panel: kind,
        date,
        column: column.to_string(),
    };

    // Raw cells, row-major over (row label, column label).
    let mut cells: Vec<Vec<Option<f64>>> = Vec::with_capacity(row_labels.len());
    for i in 0..row_labels.len() {
        let mut row = Vec::with_capacity(col_labels.len());
        for label in &col_labels {
            let chunked = frame
                .column(label.as_str())
                .and_then(|c| c.f64())
                .map_err(|_| mismatch(label))?;
            row.push(chunked.get(i).filter(|v| !v.is_nan()));
        }
        cells.push(row);
    }

    let mirrored = |i: usize, j: usize| -> Option<f64> {
        if let Some(v) = cells[i][j] {
            return Some(v);
        }
        // Transposed lookup: the row holding column j's factor, at the column
        // holding row i's factor.
        let ti = row_index.get(col_labels[j].as_str())?;
        let tj = col_index.get(row_labels[i].as_str())?;
        cells[*ti][*tj]
    };

    let mut columns = Vec::with_capacity(col_labels.len() + 1);
    columns.push(Column::new(FACTOR_ID.into(), row_labels.clone()));
    for (j, label) in col_labels.iter().enumerate() {
        let values: Vec<Option<f64>> = (0..row_labels.len()).map(|i| mirrored(i, j)).collect();
        columns.push(Column::new(label.as_str().into(), values));
    }

    DataFrame::new(columns).map_err(|_| mismatch(FACTOR_ID))
}
