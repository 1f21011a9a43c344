use anyhow::Result;
use chrono::NaiveDate;
use factor_risk::config::{ColumnAliases, ModelConfig, RiskUnits};
use factor_risk::engine::CovarianceEngine;
use factor_risk::error::RiskModelError;
use factor_risk::panel::{InMemoryPanelStore, PanelKind};
use polars::df;
use polars::prelude::DataFrame;

#[cfg(test)]
mod covariance_engine_tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 28).unwrap()
    }

    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn store_from(
        exposures: DataFrame,
        factor_cov: DataFrame,
        specific: DataFrame,
    ) -> InMemoryPanelStore {
        let mut store = InMemoryPanelStore::new(ColumnAliases::default());
        store.insert(PanelKind::Exposures, date(), exposures);
        store.insert(PanelKind::FactorCovariance, date(), factor_cov);
        store.insert(PanelKind::SpecificRisk, date(), specific);
        store
    }

    fn setup_three_asset_store() -> InMemoryPanelStore {
        store_from(
            df!(
                "asset_id" => ["A", "B", "C"],
                "F1" => [1.0, 0.0, 1.0],
                "F2" => [0.0, 1.0, 1.0],
            )
            .unwrap(),
            df!(
                "factor_id" => ["F1", "F2"],
                "F1" => [4.0, 1.0],
                "F2" => [1.0, 9.0],
            )
            .unwrap(),
            df!(
                "asset_id" => ["A", "B", "C"],
                "specific_risk" => [2.0, 3.0, 5.0],
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_hand_computed_end_to_end() -> Result<()> {
        init_logging();
        let store = setup_three_asset_store();
        let engine = CovarianceEngine::new(ModelConfig::default());
        let output = engine.build(&store, date())?;

        let expected = [
            [6.0, 1.0, 5.0],
            [1.0, 12.0, 10.0],
            [5.0, 10.0, 20.0],
        ];
        assert_eq!(
            output.matrix.assets(),
            &["A".to_string(), "B".to_string(), "C".to_string()]
        );
        for i in 0..3 {
            for j in 0..3 {
                let got = output.matrix.matrix()[[i, j]];
                assert!(
                    (got - expected[i][j]).abs() < 1e-12,
                    "entry ({i}, {j}): expected {}, got {got}",
                    expected[i][j]
                );
            }
        }
        assert!(!output.report.repaired);
        Ok(())
    }

    #[test]
    fn test_output_is_exactly_symmetric() -> Result<()> {
        let store = setup_three_asset_store();
        let engine = CovarianceEngine::new(ModelConfig::default());
        let output = engine.build(&store, date())?;

        let m = output.matrix.matrix();
        for i in 0..3 {
            for j in 0..3 {
                assert_eq!(m[[i, j]].to_bits(), m[[j, i]].to_bits());
            }
        }
        Ok(())
    }

    #[test]
    fn test_repeated_builds_are_bit_identical() -> Result<()> {
        let store = setup_three_asset_store();
        let engine = CovarianceEngine::new(ModelConfig::default());
        let first = engine.build(&store, date())?;
        let second = engine.build(&store, date())?;

        assert_eq!(first.matrix.assets(), second.matrix.assets());
        for (a, b) in first
            .matrix
            .matrix()
            .iter()
            .zip(second.matrix.matrix().iter())
        {
            assert_eq!(a.to_bits(), b.to_bits());
        }
        Ok(())
    }

    #[test]
    fn test_universe_excludes_asset_without_specific_risk() -> Result<()> {
        let store = store_from(
            df!(
                "asset_id" => ["A", "B", "C"],
                "F1" => [1.0, 0.5, -0.2],
            )
            .unwrap(),
            df!(
                "factor_id" => ["F1"],
                "F1" => [4.0],
            )
            .unwrap(),
            df!(
                "asset_id" => ["A", "B"],
                "specific_risk" => [2.0, 3.0],
            )
            .unwrap(),
        );
        let engine = CovarianceEngine::new(ModelConfig::default());
        let output = engine.build(&store, date())?;
        assert_eq!(output.universe.assets(), &["A".to_string(), "B".to_string()]);
        assert_eq!(output.matrix.n_assets(), 2);
        Ok(())
    }

    #[test]
    fn test_zero_factors_is_empty_universe() {
        // Exposure panel and covariance panel share no factor.
        let store = store_from(
            df!(
                "asset_id" => ["A"],
                "GROWTH" => [0.4],
            )
            .unwrap(),
            df!(
                "factor_id" => ["BETA"],
                "BETA" => [4.0],
            )
            .unwrap(),
            df!(
                "asset_id" => ["A"],
                "specific_risk" => [2.0],
            )
            .unwrap(),
        );
        let engine = CovarianceEngine::new(ModelConfig::default());
        let err = engine.build(&store, date()).unwrap_err();
        assert!(matches!(err, RiskModelError::EmptyUniverse { .. }));
    }

    #[test]
    fn test_missing_date_is_data_unavailable() {
        let store = setup_three_asset_store();
        let engine = CovarianceEngine::new(ModelConfig::default());
        let other = NaiveDate::from_ymd_opt(2024, 7, 1).unwrap();
        let err = engine.build(&store, other).unwrap_err();
        assert!(matches!(err, RiskModelError::DataUnavailable { .. }));
    }

    #[test]
    fn test_batch_isolates_failing_dates() {
        let good = date();
        let bad = NaiveDate::from_ymd_opt(2024, 7, 1).unwrap();
        let store = setup_three_asset_store();
        let engine = CovarianceEngine::new(ModelConfig::default());

        let results = engine.build_batch(&store, &[good, bad]);
        assert_eq!(results.len(), 2);
        assert!(results[0].1.is_ok());
        assert!(results[1].1.is_err());
    }

    #[test]
    fn test_source_column_aliases_are_normalized() -> Result<()> {
        // Barra-style naming: barrid / factor_1.
        let store = store_from(
            df!(
                "barrid" => ["A", "B"],
                "F1" => [1.0, 0.5],
            )
            .unwrap(),
            df!(
                "factor_1" => ["F1"],
                "F1" => [4.0],
            )
            .unwrap(),
            df!(
                "barrid" => ["A", "B"],
                "specific_risk" => [2.0, 3.0],
            )
            .unwrap(),
        );
        let engine = CovarianceEngine::new(ModelConfig::default());
        let output = engine.build(&store, date())?;
        assert_eq!(output.universe.assets(), &["A".to_string(), "B".to_string()]);
        Ok(())
    }

    #[test]
    fn test_upper_triangular_covariance_matches_full() -> Result<()> {
        let exposures = df!(
            "asset_id" => ["A", "B"],
            "F1" => [1.0, 0.0],
            "F2" => [0.5, 1.0],
        )
        .unwrap();
        let specific = df!(
            "asset_id" => ["A", "B"],
            "specific_risk" => [2.0, 3.0],
        )
        .unwrap();

        let triangular = store_from(
            exposures.clone(),
            df!(
                "factor_id" => ["F1", "F2"],
                "F1" => [Some(4.0), None],
                "F2" => [Some(1.0), Some(9.0)],
            )
            .unwrap(),
            specific.clone(),
        );
        let full = store_from(
            exposures,
            df!(
                "factor_id" => ["F1", "F2"],
                "F1" => [4.0, 1.0],
                "F2" => [1.0, 9.0],
            )
            .unwrap(),
            specific,
        );

        let engine = CovarianceEngine::new(ModelConfig::default());
        let from_triangular = engine.build(&triangular, date())?;
        let from_full = engine.build(&full, date())?;
        for (a, b) in from_triangular
            .matrix
            .matrix()
            .iter()
            .zip(from_full.matrix.matrix().iter())
        {
            assert_eq!(a.to_bits(), b.to_bits());
        }
        Ok(())
    }

    #[test]
    fn test_asymmetric_factor_covariance_is_rejected() {
        let store = store_from(
            df!(
                "asset_id" => ["A"],
                "F1" => [1.0],
                "F2" => [0.5],
            )
            .unwrap(),
            df!(
                "factor_id" => ["F1", "F2"],
                "F1" => [4.0, 1.5],
                "F2" => [1.0, 9.0],
            )
            .unwrap(),
            df!(
                "asset_id" => ["A"],
                "specific_risk" => [2.0],
            )
            .unwrap(),
        );
        let engine = CovarianceEngine::new(ModelConfig::default());
        let err = engine.build(&store, date()).unwrap_err();
        assert!(matches!(
            err,
            RiskModelError::AsymmetricFactorCovariance { .. }
        ));
    }

    #[test]
    fn test_noise_scale_psd_violation_is_repaired() -> Result<()> {
        init_logging();
        // Identity exposures and zero specific risk make Σ equal F, whose
        // eigenvalues are 2 + 1e-6 and -1e-6.
        let store = store_from(
            df!(
                "asset_id" => ["A", "B"],
                "F1" => [1.0, 0.0],
                "F2" => [0.0, 1.0],
            )
            .unwrap(),
            df!(
                "factor_id" => ["F1", "F2"],
                "F1" => [1.0, 1.000001],
                "F2" => [1.000001, 1.0],
            )
            .unwrap(),
            df!(
                "asset_id" => ["A", "B"],
                "specific_risk" => [0.0, 0.0],
            )
            .unwrap(),
        );
        let engine = CovarianceEngine::new(ModelConfig::default());
        let output = engine.build(&store, date())?;

        assert!(output.report.repaired);
        assert_eq!(output.report.clipped_eigenvalues, 1);
        assert!(output.report.min_eigenvalue < 0.0);
        assert!(output.report.repair_fraction < 0.01);
        // Repaired matrix stays close to the assembled one.
        assert!((output.matrix.covariance("A", "B").unwrap() - 1.000001).abs() < 1e-5);
        Ok(())
    }

    #[test]
    fn test_gross_psd_violation_is_unrepairable() {
        // Σ = F with eigenvalues 11 and -1 on trace 10.
        let store = store_from(
            df!(
                "asset_id" => ["A", "B"],
                "F1" => [1.0, 0.0],
                "F2" => [0.0, 1.0],
            )
            .unwrap(),
            df!(
                "factor_id" => ["F1", "F2"],
                "F1" => [5.0, 6.0],
                "F2" => [6.0, 5.0],
            )
            .unwrap(),
            df!(
                "asset_id" => ["A", "B"],
                "specific_risk" => [0.0, 0.0],
            )
            .unwrap(),
        );
        let engine = CovarianceEngine::new(ModelConfig::default());
        let err = engine.build(&store, date()).unwrap_err();
        assert!(matches!(
            err,
            RiskModelError::UnrepairablePSDViolation { .. }
        ));
    }

    #[test]
    fn test_percent_unit_inputs_end_to_end() -> Result<()> {
        let store = store_from(
            df!(
                "asset_id" => ["A"],
                "F1" => [1.0],
            )
            .unwrap(),
            df!(
                "factor_id" => ["F1"],
                "F1" => [400.0],
            )
            .unwrap(),
            df!(
                "asset_id" => ["A"],
                "specific_risk" => [3.0],
            )
            .unwrap(),
        );
        let config = ModelConfig {
            risk_units: RiskUnits::Percent,
            ..ModelConfig::default()
        };
        let engine = CovarianceEngine::new(config);
        let output = engine.build(&store, date())?;
        assert!((output.matrix.variance("A").unwrap() - 0.0409).abs() < 1e-12);
        Ok(())
    }

    #[test]
    fn test_output_dataframe_packaging() -> Result<()> {
        let store = setup_three_asset_store();
        let engine = CovarianceEngine::new(ModelConfig::default());
        let output = engine.build(&store, date())?;

        let frame = output.matrix.to_dataframe()?;
        assert_eq!(frame.height(), 3);
        assert_eq!(frame.width(), 4);
        let col_c = frame.column("C")?.f64()?;
        assert_eq!(col_c.get(2), Some(20.0));
        Ok(())
    }
}
