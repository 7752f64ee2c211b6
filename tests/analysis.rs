use housesale::cleaning::clean;
use housesale::config::AnalysisConfig;
use housesale::design::Term;
use housesale::features::derive_features;
use housesale::pipeline::{PipelineError, PreferredModel, run_analysis};
use housesale::selection::{
    Resolution, SearchStrategy, SelectionError, SelectionOutcome, best_subsets,
};
use housesale::split::train_test_split;
use housesale::synthetic::SyntheticSalesBuilder;

fn bic_config() -> AnalysisConfig {
    let mut config = AnalysisConfig::default();
    config.regression.resolution = Resolution::Bic;
    config
}

#[test]
fn recovers_living_area_slope_and_predicts_holdout() {
    let sales = SyntheticSalesBuilder::new(1000).seed(11).build();
    let report = run_analysis(sales, &bic_config()).expect("analysis runs");

    assert_eq!(report.cleaning.retained, 1000);
    assert_eq!(report.n_train, 800);
    assert_eq!(report.n_test, 200);
    assert_eq!(report.test_predictions.len(), 200);

    let regression = &report.regression;
    assert!(regression.terms.contains(&Term::SqftLiving));
    let slope = regression
        .refinement
        .fit
        .coefficient("sqft_living")
        .expect("living area is in the model");
    assert!((slope - 150.0).abs() < 2.0, "slope {slope}");
    assert!(regression.holdout.r_squared > 0.9);
    assert!(regression.holdout.rmse < 10_000.0);
    assert_eq!(regression.holdout.n_obs, 200);

    let search = regression.search.as_ref().expect("terms were searched");
    assert_eq!(search.resolve(Resolution::Bic).unwrap(), regression.terms);
}

#[test]
fn default_removal_count_matches_flagged_residuals() {
    let sales = SyntheticSalesBuilder::new(600).seed(5).build();
    let report = run_analysis(sales, &bic_config()).expect("analysis runs");
    let regression = &report.regression;

    let flagged = regression.candidate_counts.standardized;
    assert_eq!(regression.refinement.removed_ids.len(), flagged);
    assert_eq!(regression.refinement.n_before, report.n_train);
    assert_eq!(regression.refinement.n_after, report.n_train - flagged);

    let counts: Vec<usize> = regression.sensitivity.iter().map(|row| row.removed).collect();
    assert_eq!(counts, vec![0, 10, 25, 50, 100]);
    assert_eq!(regression.sensitivity[0].n_obs, report.n_train);
    for row in &regression.sensitivity {
        let slope = row.sqft_living.expect("living area is in the model");
        assert!((slope - 150.0).abs() < 3.0);
    }
}

#[test]
fn fixed_removal_count_overrides_diagnostics() {
    let sales = SyntheticSalesBuilder::new(400).seed(21).build();
    let mut config = bic_config();
    config.regression.outlier_removal = Some(7);
    let report = run_analysis(sales, &config).expect("analysis runs");
    assert_eq!(report.regression.refinement.removed_ids.len(), 7);
    assert_eq!(report.regression.refinement.n_after, report.n_train - 7);
}

#[test]
fn manual_terms_skip_the_search() {
    let sales = SyntheticSalesBuilder::new(300).seed(2).build();
    let mut config = AnalysisConfig::default();
    config.regression.manual_terms = Some(vec![Term::SqftLiving, Term::Region]);
    let report = run_analysis(sales, &config).expect("analysis runs");
    assert!(report.regression.search.is_none());
    assert!(report.regression.outcome.is_none());
    assert_eq!(report.regression.terms, vec![Term::SqftLiving, Term::Region]);
    assert!(
        report
            .regression
            .refinement
            .fit
            .coefficient("region[Suburb]")
            .is_some()
    );
}

#[test]
fn quality_premium_is_separated_by_price() {
    let sales = SyntheticSalesBuilder::new(1000)
        .seed(3)
        .quality_premium(2_000_000.0)
        .build();
    let report = run_analysis(sales, &bic_config()).expect("analysis runs");
    let classification = &report.classification;

    assert!(classification.full.layout.terms().contains(&Term::Price));
    let full = &classification.full_evaluation;
    assert_eq!(full.confusion.accuracy(), 1.0);
    assert_eq!(full.roc.auc, 1.0);
    assert_eq!(full.confusion.accuracy() + full.confusion.error_rate(), 1.0);
    assert_eq!(full.confusion.total(), report.n_test);
    assert_eq!(full.sweep.len(), 5);

    if let Some(lrt) = &classification.lrt {
        assert!(lrt.df > 0);
        assert_eq!(
            classification.preferred,
            if lrt.reject_null {
                PreferredModel::Full
            } else {
                PreferredModel::Reduced
            }
        );
    } else {
        assert_eq!(classification.preferred, PreferredModel::Full);
    }
}

#[test]
fn criteria_disagree_on_the_living_area_scenario() {
    let sales = SyntheticSalesBuilder::new(1000).seed(1).noise_sd(1_000.0).build();
    match run_analysis(sales, &AnalysisConfig::default()) {
        Err(PipelineError::Selection(SelectionError::Ambiguous {
            adjusted_r2,
            cp,
            bic,
        })) => {
            assert_ne!(adjusted_r2, bic);
            assert!(!(adjusted_r2 == cp && cp == bic));
            for terms in [&adjusted_r2, &cp, &bic] {
                assert!(terms.contains(&Term::SqftLiving), "{terms:?}");
            }
        }
        Err(e) => panic!("expected disagreeing criteria, got {e}"),
        Ok(report) => panic!(
            "expected disagreeing criteria, got {:?}",
            report.regression.outcome
        ),
    }
}

#[test]
fn agreeing_criteria_pick_the_fitted_terms() {
    let mut config = AnalysisConfig::default();
    let sales = SyntheticSalesBuilder::new(1000)
        .seed(6)
        .quality_premium(2_000_000.0)
        .build();
    let (cleaned, _) = clean(sales.clone(), &config.cleaning).unwrap();
    let dataset = derive_features(&cleaned, &config.features).unwrap();
    let split = train_test_split(
        dataset.sales.len(),
        config.split.train_fraction,
        config.split.seed,
    )
    .unwrap();
    let (train, _) = split.apply(&dataset.sales);

    // Both terms carry strong signal, so every criterion keeps both.
    let pool = [Term::SqftLiving, Term::Grade];
    let search = best_subsets(&pool, &train, SearchStrategy::Exhaustive, 20).unwrap();
    assert_eq!(search.outcome(), SelectionOutcome::Agreed(pool.to_vec()));
    let terms = search.resolve(Resolution::RequireAgreement).unwrap();
    assert_eq!(terms, pool.to_vec());

    config.regression.manual_terms = Some(terms.clone());
    let report = run_analysis(sales, &config).expect("analysis runs");
    assert_eq!(report.regression.terms, terms);
    assert_eq!(
        report.regression.refinement.fit.layout.names(),
        vec!["(Intercept)", "sqft_living", "grade"]
    );
}

#[test]
fn reduced_classifier_drops_collinear_price_terms() {
    let sales = SyntheticSalesBuilder::new(800).seed(13).build();
    let report = run_analysis(sales, &bic_config()).expect("analysis runs");
    let classification = &report.classification;

    // Without a premium, price is almost a linear function of living area.
    let dropped: Vec<Term> = classification.reduction.dropped.iter().map(|(t, _)| *t).collect();
    assert!(dropped.contains(&Term::Price));
    assert!(dropped.contains(&Term::SqftLiving));
    assert!(!classification.reduced.layout.terms().contains(&Term::Price));

    let lrt = classification.lrt.expect("terms were dropped");
    assert_eq!(
        lrt.df,
        classification.full.n_coefficients() - classification.reduced.n_coefficients()
    );
    assert!(lrt.statistic >= -1e-6);

    for prediction in &report.test_predictions {
        assert!((0.0..=1.0).contains(&prediction.probability_full));
        assert!((0.0..=1.0).contains(&prediction.probability_reduced));
    }
}

#[test]
fn same_seed_same_report() {
    let config = bic_config();
    let a = run_analysis(SyntheticSalesBuilder::new(300).seed(4).build(), &config).unwrap();
    let b = run_analysis(SyntheticSalesBuilder::new(300).seed(4).build(), &config).unwrap();
    assert_eq!(a.regression.terms, b.regression.terms);
    assert_eq!(a.regression.refinement.removed_ids, b.regression.refinement.removed_ids);
    assert_eq!(a.test_predictions, b.test_predictions);
}
