extern crate nucleus;

mod util;

use flexstr::{SharedStr as FlexStr, ToSharedStr};

use nucleus::api::query::{ExploreQuery, ExportQuery};
use nucleus::api::result::{PlotPayload, QueryError};
use nucleus::matrix::{row_mean, row_std};
use nucleus::normalize::NormalizationOptions;

const EPS: f64 = 1e-9;

fn explore_query(user: &str, gene_tokens: &[&str], conditions: &[&str])
    -> ExploreQuery
{
    ExploreQuery {
        user: user.to_shared_str(),
        gene_tokens: gene_tokens.iter().map(|t| t.to_shared_str()).collect(),
        gene_collection: None,
        conditions: conditions.iter().map(|c| c.to_shared_str()).collect(),
        normalization: None,
    }
}

fn export_query(user: &str, gene_tokens: &[&str], conditions: &[&str])
    -> ExportQuery
{
    ExportQuery {
        user: user.to_shared_str(),
        gene_tokens: gene_tokens.iter().map(|t| t.to_shared_str()).collect(),
        gene_collection: None,
        conditions: conditions.iter().map(|c| c.to_shared_str()).collect(),
    }
}

#[tokio::test]
async fn test_free_user_single_gene_series() {
    let (query_exec, site_db) = util::test_query_exec();

    let query = explore_query("carol", &["BRCA1"], &["CtrlA_d7"]);
    let result = query_exec.explore(1, &query).await.unwrap();

    assert_eq!(result.status, "ok");
    assert_eq!(result.accessible_genes,
               vec![FlexStr::from("ENSG00000012048_BRCA1")]);
    assert!(result.denied_genes.is_empty());
    assert_eq!(result.added_genes,
               vec![FlexStr::from("ENSG00000012048_BRCA1")]);

    // one accessible gene on the Free tier: untransformed series
    assert_eq!(result.applied_normalization, NormalizationOptions::identity());

    let PlotPayload::Series { gene, conditions, values } = result.payload
    else {
        panic!("expected a series payload");
    };
    assert_eq!(gene, "ENSG00000012048_BRCA1");
    assert_eq!(conditions,
               vec![FlexStr::from("CtrlA_d7_1"), FlexStr::from("CtrlA_d7_2")]);
    assert_eq!(values, vec![1.0, 3.0]);

    assert!((result.usage_percentage - 1.0).abs() < EPS);

    let request = site_db.user_request(&"carol".to_shared_str()).unwrap().unwrap();
    assert_eq!(request.gene_count(), 1);
}

#[tokio::test]
async fn test_free_user_denied_genes() {
    let (query_exec, site_db) = util::test_query_exec();

    // EGFR is Premium-only, so for a Free user only BRCA1 remains
    let query = explore_query("carol", &["BRCA1", "EGFR"], &["CtrlA_d7"]);
    let result = query_exec.explore(1, &query).await.unwrap();

    assert_eq!(result.denied_genes,
               vec![FlexStr::from("ENSG00000146648_EGFR")]);
    assert!(matches!(result.payload, PlotPayload::Series { .. }));

    // the denied gene never reaches the ledger
    let request = site_db.user_request(&"carol".to_shared_str()).unwrap().unwrap();
    assert_eq!(request.gene_count(), 1);
}

#[tokio::test]
async fn test_all_genes_denied_is_empty_not_error() {
    let (query_exec, site_db) = util::test_query_exec();

    let query = explore_query("carol", &["EGFR"], &["CtrlA_d7"]);
    let result = query_exec.explore(1, &query).await.unwrap();

    assert_eq!(result.payload, PlotPayload::Empty);
    assert!(result.accessible_genes.is_empty());
    assert!(result.added_genes.is_empty());

    let request = site_db.user_request(&"carol".to_shared_str()).unwrap().unwrap();
    assert_eq!(request.gene_count(), 0);
}

#[tokio::test]
async fn test_free_user_heatmap_is_z_scored() {
    let (query_exec, _site_db) = util::test_query_exec();

    let query = explore_query("carol", &["BRCA1", "TP53", "PTEN"], &[]);
    let result = query_exec.explore(1, &query).await.unwrap();

    assert_eq!(result.applied_normalization, NormalizationOptions::z_score());

    let PlotPayload::Heatmap { genes, conditions, matrix } = result.payload
    else {
        panic!("expected a heatmap payload");
    };

    assert_eq!(genes.len(), 3);
    assert_eq!(conditions.len(), 6);

    for row in &matrix[..2] {
        assert!(row_mean(row).abs() < EPS);
        assert!((row_std(row) - 1.0).abs() < EPS);
    }

    // PTEN is constant: its z-score is undefined and becomes all zeros
    assert_eq!(matrix[2], vec![0.0; 6]);
}

#[tokio::test]
async fn test_researcher_chooses_normalization() {
    let (query_exec, _site_db) = util::test_query_exec();

    let mut query = explore_query("rebecca", &["BRCA1", "TP53", "EGFR"], &[]);
    query.normalization = Some(NormalizationOptions {
        center: true,
        scale: false,
        replace_nan: true,
    });

    let result = query_exec.explore(1, &query).await.unwrap();

    assert_eq!(result.applied_normalization.center, true);
    assert_eq!(result.applied_normalization.scale, false);

    let PlotPayload::Heatmap { conditions, matrix, .. } = result.payload
    else {
        panic!("expected a heatmap payload");
    };

    // replicate columns come back in timepoint order
    assert_eq!(conditions[0], "CtrlA_d14_1");

    // centered but not scaled: row means are zero, spread is untouched
    for row in &matrix {
        assert!(row_mean(row).abs() < EPS);
    }
    // BRCA1 raw value for CtrlA_d14_1 is 5, row mean is 11/3
    assert!((matrix[0][0] - (5.0 - 11.0 / 3.0)).abs() < EPS);
}

#[tokio::test]
async fn test_researcher_default_is_untransformed() {
    let (query_exec, _site_db) = util::test_query_exec();

    let query = explore_query("rebecca", &["BRCA1", "TP53"], &[]);
    let result = query_exec.explore(1, &query).await.unwrap();

    assert_eq!(result.applied_normalization, NormalizationOptions::identity());
}

#[tokio::test]
async fn test_collection_selection() {
    let (query_exec, _site_db) = util::test_query_exec();

    let mut query = explore_query("rebecca", &[], &[]);
    query.gene_collection = Some("Tumour suppressors".to_shared_str());

    let result = query_exec.explore(1, &query).await.unwrap();
    assert_eq!(result.accessible_genes.len(), 2);

    // a private collection is invisible to everyone but its owner
    let mut query = explore_query("carol", &[], &[]);
    query.gene_collection = Some("Tumour suppressors".to_shared_str());

    let err = query_exec.explore(1, &query).await.unwrap_err();
    assert!(matches!(err, QueryError::UnknownCollection(_)));
}

#[tokio::test]
async fn test_resolution_failure_stops_everything() {
    let (query_exec, site_db) = util::test_query_exec();

    let query = explore_query("carol", &["BRCA1", "NOSUCHGENE"], &[]);
    let err = query_exec.explore(1, &query).await.unwrap_err();

    let QueryError::GeneResolution(report) = err
    else {
        panic!("expected a resolution failure");
    };
    assert_eq!(report.unknown_tokens, vec![FlexStr::from("NOSUCHGENE")]);

    // nothing was recorded, not even the resolvable gene
    let request = site_db.user_request(&"carol".to_shared_str()).unwrap().unwrap();
    assert_eq!(request.gene_count(), 0);
}

#[tokio::test]
async fn test_no_matching_conditions() {
    let (query_exec, _site_db) = util::test_query_exec();

    let query = explore_query("carol", &["BRCA1"], &["Nonexistent_d7"]);
    let err = query_exec.explore(1, &query).await.unwrap_err();

    assert!(matches!(err, QueryError::NoMatchingConditions));
}

#[tokio::test]
async fn test_unknown_analysis() {
    let (query_exec, _site_db) = util::test_query_exec();

    let query = explore_query("carol", &["BRCA1"], &[]);
    let err = query_exec.explore(99, &query).await.unwrap_err();

    assert!(matches!(err, QueryError::UnknownAnalysis(99)));
}

#[tokio::test]
async fn test_source_failure_after_ledger_update() {
    let (query_exec, site_db) = util::test_query_exec();

    // analysis 2 points at a file that doesn't exist
    let query = explore_query("felix", &["BRCA1"], &["CtrlA_d7"]);
    let err = query_exec.explore(2, &query).await.unwrap_err();

    assert!(matches!(err, QueryError::SourceUnavailable { .. }));

    // the ledger update happens before the matrix fetch and is kept
    let request = site_db.user_request(&"felix".to_shared_str()).unwrap().unwrap();
    assert!(request.genes.contains(&"ENSG00000012048_BRCA1".to_shared_str()));
}

#[tokio::test]
async fn test_export_csv() {
    let (query_exec, site_db) = util::test_query_exec();

    let query = export_query("edgar", &["BRCA1", "TP53"], &["CtrlA_d7", "TreatB_d7"]);
    let csv_text = query_exec.export_csv(1, &query).await.unwrap();

    let lines: Vec<&str> = csv_text.lines().collect();
    assert_eq!(lines, vec![
        "Gene,CtrlA_d7,TreatB_d7",
        "ENSG00000012048_BRCA1,2,3",
        "ENSG00000141510_TP53,2,6",
    ]);

    // exports never feed the usage ledger
    let request = site_db.user_request(&"edgar".to_shared_str()).unwrap().unwrap();
    assert_eq!(request.gene_count(), 0);
}
