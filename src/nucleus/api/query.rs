use flexstr::SharedStr as FlexStr;

use crate::normalize::NormalizationOptions;
use crate::types::{CollectionName, ConditionName, UserId};

/// An orchestrated explore request against one analysis dataset.
///
/// Genes come either from raw selection tokens (symbol, accession prefix or
/// composite "{accession}_{symbol}" strings) or from a named collection.
/// Conditions are logical names that may omit the replicate suffix; an empty
/// list means every condition in the dataset.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ExploreQuery {
    pub user: UserId,
    #[serde(default)]
    pub gene_tokens: Vec<FlexStr>,
    #[serde(skip_serializing_if="Option::is_none", default)]
    pub gene_collection: Option<CollectionName>,
    #[serde(default)]
    pub conditions: Vec<ConditionName>,
    // honoured for Researcher users only; other tiers get tier-fixed
    // defaults
    #[serde(skip_serializing_if="Option::is_none", default)]
    pub normalization: Option<NormalizationOptions>,
}

/// A replicate-averaged CSV export request.  Exports never apply
/// normalization and never touch the usage ledger.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ExportQuery {
    pub user: UserId,
    #[serde(default)]
    pub gene_tokens: Vec<FlexStr>,
    #[serde(skip_serializing_if="Option::is_none", default)]
    pub gene_collection: Option<CollectionName>,
    #[serde(default)]
    pub conditions: Vec<ConditionName>,
}
