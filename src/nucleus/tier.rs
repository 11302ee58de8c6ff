use std::collections::BTreeSet;

use crate::data_types::{Gene, GeneCollection, NameCollectionMap};
use crate::types::{DfKey, TierName};

pub const FREE_TIER_NAME: &str = "Free";
pub const PREMIUM_TIER_NAME: &str = "Premium";
pub const RESEARCHER_TIER_NAME: &str = "Researcher";

pub const FREE_ACCESS_COLLECTION: &str = "Free access";
pub const PREMIUM_ACCESS_COLLECTION: &str = "Premium access";

/// Default quota for auto-provisioned users.
pub const DEFAULT_MAX_GENES: u32 = 100;

/// The accessible/denied split of a requested gene list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedGenes {
    pub accessible: Vec<Gene>,
    pub denied: Vec<Gene>,
}

/// Per-tier visibility rules, bound to the system reference collections
/// ("Free access", "Premium access") that cap what the metered tiers see.
pub struct TierPolicy {
    free_access: BTreeSet<DfKey>,
    premium_access: BTreeSet<DfKey>,
}

impl TierPolicy {
    pub fn new(free_access_collection: Option<&GeneCollection>,
               premium_access_collection: Option<&GeneCollection>)
        -> TierPolicy
    {
        TierPolicy {
            free_access: free_access_collection
                .map(|coll| coll.included_genes.clone())
                .unwrap_or_default(),
            premium_access: premium_access_collection
                .map(|coll| coll.included_genes.clone())
                .unwrap_or_default(),
        }
    }

    pub fn from_collections(collections: &NameCollectionMap) -> TierPolicy {
        TierPolicy::new(collections.get(FREE_ACCESS_COLLECTION),
                        collections.get(PREMIUM_ACCESS_COLLECTION))
    }

    /// Partition `genes` into (accessible, denied) for the named tier.
    ///
    /// Free and Premium intersect with their reference collection,
    /// Researcher sees everything, an unknown tier sees nothing.  Input
    /// order is preserved within each partition and no gene is duplicated
    /// or dropped.
    pub fn classify(&self, genes: &[Gene], tier_name: &TierName) -> ClassifiedGenes {
        let mut accessible = vec![];
        let mut denied = vec![];

        match tier_name.as_str() {
            FREE_TIER_NAME => {
                for gene in genes {
                    if self.free_access.contains(&gene.df_key()) {
                        accessible.push(gene.clone());
                    } else {
                        denied.push(gene.clone());
                    }
                }
            },
            PREMIUM_TIER_NAME => {
                for gene in genes {
                    if self.premium_access.contains(&gene.df_key()) {
                        accessible.push(gene.clone());
                    } else {
                        denied.push(gene.clone());
                    }
                }
            },
            RESEARCHER_TIER_NAME => {
                accessible.extend(genes.iter().cloned());
            },
            _ => {
                denied.extend(genes.iter().cloned());
            },
        }

        ClassifiedGenes {
            accessible,
            denied,
        }
    }
}
