use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};

use flexstr::{SharedStr as FlexStr, shared_fmt as flex_fmt};

use crate::types::*;

pub type DfKeyGeneMap = HashMap<DfKey, Gene>;
pub type SymbolGeneMap = HashMap<GeneSymbol, Vec<Gene>>;
pub type NameCollectionMap = HashMap<CollectionName, GeneCollection>;
pub type IdAnalysisMap = HashMap<AnalysisId, AnalysisOutput>;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct Gene {
    pub ensembl_id: EnsemblId,
    pub gene_name: GeneSymbol,
    #[serde(skip_serializing_if="Option::is_none")]
    pub long_name: Option<FlexStr>,
}

impl Gene {
    /// The accession with any version suffix ("ENSG00000012048.23" ->
    /// "ENSG00000012048") removed.
    pub fn base_id(&self) -> EnsemblId {
        match self.ensembl_id.split_once('.') {
            Some((base, _)) => base.into(),
            None => self.ensembl_id.clone(),
        }
    }

    /// The composite key used to address this gene as a row of an
    /// expression matrix, eg. "ENSG00000012048_BRCA1".
    pub fn df_key(&self) -> DfKey {
        flex_fmt!("{}_{}", self.base_id(), self.gene_name)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct GeneCollection {
    pub collection_name: CollectionName,
    pub description: FlexStr,
    #[serde(skip_serializing_if="Option::is_none")]
    pub created_by: Option<UserId>,
    // membership is a set: no duplicates, no order
    pub included_genes: BTreeSet<DfKey>,
    #[serde(skip_serializing_if="BTreeSet::is_empty", default)]
    pub linked_analyses: BTreeSet<AnalysisId>,
    pub private_collection: bool,
    pub customer_visible: bool,
}

impl GeneCollection {
    /// A collection is shown to a user when they own it, or when it is
    /// public and flagged for the Customer audience.
    pub fn visible_to(&self, user: &UserId) -> bool {
        if let Some(ref owner) = self.created_by {
            if owner == user {
                return true;
            }
        }
        !self.private_collection && self.customer_visible
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AnalysisOutput {
    pub id: AnalysisId,
    #[serde(skip_serializing_if="Option::is_none")]
    pub project: Option<FlexStr>,
    #[serde(skip_serializing_if="Option::is_none")]
    pub product: Option<FlexStr>,
    #[serde(skip_serializing_if="Option::is_none")]
    pub description: Option<FlexStr>,
    #[serde(skip_serializing_if="Option::is_none")]
    pub origin: Option<FlexStr>,
    pub created_at: DateTime<Utc>,
    pub is_visible_in_commercial_app: bool,
    // opaque byte-source reference: "path/to/matrix.tsv" or "s3://bucket/key"
    pub file_path: FlexStr,
    // the replicate columns of the matrix, captured at registration time so
    // that condition resolution can run before the matrix bytes are fetched
    pub conditions: Vec<ReplicateColumn>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Tier {
    pub name: TierName,
    #[serde(skip_serializing_if="Option::is_none")]
    pub description: Option<FlexStr>,
    pub max_genes: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct UserTier {
    pub user: UserId,
    pub tier: Tier,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct UserGeneRequest {
    pub user: UserId,
    // every gene this user has ever successfully been granted access to;
    // grows monotonically, never shrinks
    pub genes: BTreeSet<DfKey>,
    pub created_at: DateTime<Utc>,
}

impl UserGeneRequest {
    pub fn gene_count(&self) -> usize {
        self.genes.len()
    }
}
