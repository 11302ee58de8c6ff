use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;

use flexstr::{SharedStr as FlexStr, ToSharedStr};

use nucleus::data_types::{AnalysisOutput, Gene, GeneCollection, Tier};
use nucleus::directory::GeneDirectory;
use nucleus::matrix::MatrixLoader;
use nucleus::api::query_exec::QueryExec;
use nucleus::site_db::SiteDB;
use nucleus::types::ReplicateColumn;

#[allow(dead_code)]
pub const TEST_COLUMNS: [&str; 6] =
    ["CtrlA_d7_1", "CtrlA_d7_2", "CtrlA_d14_1", "CtrlA_d14_2",
     "TreatB_d7_1", "TreatB_d7_2"];

#[allow(dead_code)]
pub fn make_gene(ensembl_id: &str, gene_name: &str, long_name: Option<&str>) -> Gene {
    Gene {
        ensembl_id: ensembl_id.to_shared_str(),
        gene_name: gene_name.to_shared_str(),
        long_name: long_name.map(|name| name.to_shared_str()),
    }
}

// note the duplicated SNORA50 symbol under two accessions
#[allow(dead_code)]
pub fn test_genes() -> Vec<Gene> {
    vec![
        make_gene("ENSG00000012048.23", "BRCA1", Some("BRCA1 DNA repair associated")),
        make_gene("ENSG00000141510.18", "TP53", Some("tumor protein p53")),
        make_gene("ENSG00000146648.19", "EGFR", Some("epidermal growth factor receptor")),
        make_gene("ENSG00000171862.10", "PTEN", None),
        make_gene("ENSG00000207005.1", "SNORA50", None),
        make_gene("ENSG00000212283.1", "SNORA50", None),
    ]
}

#[allow(dead_code)]
pub fn test_directory() -> GeneDirectory {
    GeneDirectory::new(test_genes())
}

#[allow(dead_code)]
pub fn df_keys(keys: &[&str]) -> BTreeSet<FlexStr> {
    keys.iter().map(|key| key.to_shared_str()).collect()
}

#[allow(dead_code)]
pub fn test_conditions() -> Vec<ReplicateColumn> {
    TEST_COLUMNS.iter().map(|column| column.to_shared_str()).collect()
}

fn make_analysis(id: i64, file_path: &str) -> AnalysisOutput {
    AnalysisOutput {
        id,
        project: Some("oncology".to_shared_str()),
        product: None,
        description: None,
        origin: None,
        created_at: Utc::now(),
        is_visible_in_commercial_app: id == 1,
        file_path: file_path.to_shared_str(),
        conditions: test_conditions(),
    }
}

fn make_collection(name: &str, owner: Option<&str>, genes: &[&str],
                   private: bool, customer_visible: bool)
    -> GeneCollection
{
    GeneCollection {
        collection_name: name.to_shared_str(),
        description: FlexStr::default(),
        created_by: owner.map(|owner| owner.to_shared_str()),
        included_genes: df_keys(genes),
        linked_analyses: BTreeSet::new(),
        private_collection: private,
        customer_visible,
    }
}

// in-memory site database with the genes, the three tiers, the two
// reference collections, one private collection and three analyses (a
// readable one, one pointing at a missing file and one pointing at a
// remote locator with no gateway configured)
#[allow(dead_code)]
pub fn test_site_db() -> Arc<SiteDB> {
    let site_db = SiteDB::new_in_memory().unwrap();

    site_db.store_genes(&test_genes()).unwrap();

    for (name, max_genes) in [("Free", 100u32), ("Premium", 1000), ("Researcher", 1000000)] {
        site_db.store_tier(&Tier {
            name: name.to_shared_str(),
            description: None,
            max_genes,
        }).unwrap();
    }

    site_db.set_user_tier(&"rebecca".to_shared_str(),
                          &"Researcher".to_shared_str()).unwrap();
    site_db.set_user_tier(&"petra".to_shared_str(),
                          &"Premium".to_shared_str()).unwrap();

    let free_access =
        make_collection("Free access", None,
                        &["ENSG00000012048_BRCA1", "ENSG00000141510_TP53",
                          "ENSG00000171862_PTEN"],
                        false, true);
    let premium_access =
        make_collection("Premium access", None,
                        &["ENSG00000012048_BRCA1", "ENSG00000141510_TP53",
                          "ENSG00000171862_PTEN", "ENSG00000146648_EGFR"],
                        false, true);
    let tumour_suppressors =
        make_collection("Tumour suppressors", Some("rebecca"),
                        &["ENSG00000012048_BRCA1", "ENSG00000141510_TP53"],
                        true, false);

    site_db.store_collection(&free_access).unwrap();
    site_db.store_collection(&premium_access).unwrap();
    site_db.store_collection(&tumour_suppressors).unwrap();

    site_db.store_analysis(&make_analysis(1, "test_matrix.tsv")).unwrap();
    site_db.store_analysis(&make_analysis(2, "missing.tsv")).unwrap();
    site_db.store_analysis(&make_analysis(3, "s3://expression/matrix.tsv")).unwrap();

    Arc::new(site_db)
}

#[allow(dead_code)]
pub fn test_matrix_loader() -> MatrixLoader {
    let data_dir = format!("{}/tests", env!("CARGO_MANIFEST_DIR"));
    MatrixLoader::new(&data_dir, None)
}

#[allow(dead_code)]
pub fn test_query_exec() -> (QueryExec, Arc<SiteDB>) {
    let site_db = test_site_db();
    let directory = Arc::new(test_directory());

    let query_exec =
        QueryExec::new(directory, site_db.clone(), test_matrix_loader()).unwrap();

    (query_exec, site_db)
}
