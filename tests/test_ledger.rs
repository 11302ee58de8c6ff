extern crate nucleus;

mod util;

use flexstr::ToSharedStr;

use nucleus::ledger::UsageLedger;
use nucleus::tier::TierPolicy;

use util::{test_genes, test_site_db};

#[test]
fn test_auto_provision() {
    let site_db = test_site_db();
    let ledger = UsageLedger::new(site_db.clone());

    // a never-seen user lands in the Free tier with an empty ledger entry
    let provisioned = ledger.ensure_provisioned(&"newcomer".to_shared_str()).unwrap();

    assert_eq!(provisioned.user_tier.tier.name, "Free");
    assert_eq!(provisioned.user_tier.tier.max_genes, 100);
    assert_eq!(provisioned.request.gene_count(), 0);
    assert_eq!(provisioned.usage_percentage, 0.0);

    // provisioning is idempotent
    let again = ledger.ensure_provisioned(&"newcomer".to_shared_str()).unwrap();
    assert_eq!(again.request.gene_count(), 0);
    assert_eq!(again.request.created_at, provisioned.request.created_at);
}

#[test]
fn test_provision_assigned_tier() {
    let site_db = test_site_db();
    let ledger = UsageLedger::new(site_db.clone());

    let provisioned = ledger.ensure_provisioned(&"rebecca".to_shared_str()).unwrap();
    assert_eq!(provisioned.user_tier.tier.name, "Researcher");

    let provisioned = ledger.ensure_provisioned(&"petra".to_shared_str()).unwrap();
    assert_eq!(provisioned.user_tier.tier.name, "Premium");
    assert_eq!(provisioned.user_tier.tier.max_genes, 1000);
}

#[test]
fn test_record_grows_monotonically() {
    let site_db = test_site_db();
    let ledger = UsageLedger::new(site_db.clone());
    let user = "newcomer".to_shared_str();

    ledger.ensure_provisioned(&user).unwrap();

    let genes = test_genes();

    let outcome = ledger.record(&user, &genes[..2]);
    assert_eq!(outcome.added,
               vec!["ENSG00000012048_BRCA1".to_shared_str(),
                    "ENSG00000141510_TP53".to_shared_str()]);
    assert!(outcome.skipped.is_empty());

    // identical second request: all skipped, nothing added
    let outcome = ledger.record(&user, &genes[..2]);
    assert!(outcome.added.is_empty());
    assert_eq!(outcome.skipped,
               vec!["ENSG00000012048_BRCA1".to_shared_str(),
                    "ENSG00000141510_TP53".to_shared_str()]);

    let request = site_db.user_request(&user).unwrap().unwrap();
    assert_eq!(request.gene_count(), 2);

    // overlapping third request: only the new gene is added
    let outcome = ledger.record(&user, &genes[1..3]);
    assert_eq!(outcome.added, vec!["ENSG00000146648_EGFR".to_shared_str()]);
    assert_eq!(outcome.skipped, vec!["ENSG00000141510_TP53".to_shared_str()]);

    let request = site_db.user_request(&user).unwrap().unwrap();
    assert_eq!(request.gene_count(), 3);

    let provisioned = ledger.ensure_provisioned(&user).unwrap();
    assert_eq!(provisioned.usage_percentage, 3.0);
}

#[test]
fn test_classify_by_tier() {
    let site_db = test_site_db();
    let collections = site_db.load_collections().unwrap();
    let policy = TierPolicy::from_collections(&collections);

    let genes = test_genes();
    // BRCA1, TP53, EGFR in request order
    let requested = &genes[..3];

    let classified = policy.classify(requested, &"Free".to_shared_str());
    let accessible: Vec<_> =
        classified.accessible.iter().map(|gene| gene.gene_name.as_str()).collect();
    let denied: Vec<_> =
        classified.denied.iter().map(|gene| gene.gene_name.as_str()).collect();
    assert_eq!(accessible, vec!["BRCA1", "TP53"]);
    assert_eq!(denied, vec!["EGFR"]);

    let classified = policy.classify(requested, &"Premium".to_shared_str());
    assert_eq!(classified.accessible.len(), 3);
    assert!(classified.denied.is_empty());

    let classified = policy.classify(requested, &"Researcher".to_shared_str());
    assert_eq!(classified.accessible.len(), 3);

    // an unrecognised tier sees nothing
    let classified = policy.classify(requested, &"Trial".to_shared_str());
    assert!(classified.accessible.is_empty());
    assert_eq!(classified.denied.len(), 3);
}
