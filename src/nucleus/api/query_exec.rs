use std::sync::{Arc, RwLock};

use uuid::Uuid;

use flexstr::{SharedStr as FlexStr, ToSharedStr};

use crate::api::query::{ExploreQuery, ExportQuery};
use crate::api::result::{ExploreApiResult, PlotPayload, QueryError};
use crate::conditions;
use crate::data_types::{Gene, GeneCollection, IdAnalysisMap, NameCollectionMap};
use crate::directory::{AmbiguousToken, GeneDirectory, GeneLookupError, ResolutionReport};
use crate::ledger::UsageLedger;
use crate::matrix::{ExpressionMatrix, MatrixLoader};
use crate::normalize::{NormalizationOptions, normalize};
use crate::site_db::SiteDB;
use crate::tier::{ClassifiedGenes, RESEARCHER_TIER_NAME, TierPolicy};
use crate::types::{AnalysisId, CollectionName, DfKey, ReplicateColumn, UserId};

/// Runs orchestrated queries: gene resolution, tier filtering, ledger
/// recording, condition expansion, matrix load, normalization and shaping,
/// in that order.  All collaborators are passed in explicitly; the
/// collection snapshot and the tier policy derived from it are reloaded
/// from the site database after collection edits.
pub struct QueryExec {
    directory: Arc<GeneDirectory>,
    site_db: Arc<SiteDB>,
    ledger: UsageLedger,
    matrix_loader: MatrixLoader,
    analyses: IdAnalysisMap,
    collections: RwLock<NameCollectionMap>,
    tier_policy: RwLock<TierPolicy>,
}

impl QueryExec {
    pub fn new(directory: Arc<GeneDirectory>,
               site_db: Arc<SiteDB>,
               matrix_loader: MatrixLoader)
        -> anyhow::Result<QueryExec>
    {
        let ledger = UsageLedger::new(site_db.clone());
        let analyses = site_db.load_analyses()?;
        let collections = site_db.load_collections()?;
        let tier_policy = TierPolicy::from_collections(&collections);

        Ok(QueryExec {
            directory,
            site_db,
            ledger,
            matrix_loader,
            analyses,
            collections: RwLock::new(collections),
            tier_policy: RwLock::new(tier_policy),
        })
    }

    pub fn get_directory(&self) -> &GeneDirectory {
        &self.directory
    }

    pub fn get_analyses(&self) -> &IdAnalysisMap {
        &self.analyses
    }

    pub fn get_ledger(&self) -> &UsageLedger {
        &self.ledger
    }

    /// Re-read collections from the site database and rebuild the tier
    /// policy, after a collection was created, edited or deleted.
    pub fn reload_collections(&self) -> anyhow::Result<()> {
        let collections = self.site_db.load_collections()?;

        *self.tier_policy.write().unwrap() =
            TierPolicy::from_collections(&collections);
        *self.collections.write().unwrap() = collections;

        Ok(())
    }

    pub fn collection(&self, collection_name: &CollectionName) -> Option<GeneCollection> {
        self.collections.read().unwrap().get(collection_name).cloned()
    }

    pub fn visible_collections(&self, user: &UserId) -> Vec<GeneCollection> {
        let mut visible: Vec<GeneCollection> =
            self.collections.read().unwrap()
            .values()
            .filter(|collection| collection.visible_to(user))
            .cloned()
            .collect();

        visible.sort_by(|a, b| a.collection_name.cmp(&b.collection_name));

        visible
    }

    pub fn store_collection(&self, collection: &GeneCollection) -> anyhow::Result<()> {
        self.site_db.store_collection(collection)?;
        self.reload_collections()
    }

    pub fn delete_collection(&self, collection_name: &CollectionName) -> anyhow::Result<()> {
        self.site_db.delete_collection(collection_name)?;
        self.reload_collections()
    }

    /// Resolve a mixed token list: composite "{accession}_{symbol}" tokens
    /// go through the df_key lookup, everything else through the
    /// symbol/accession lookup.  All failures are aggregated into one
    /// report; nothing is selected unless every token resolves.
    pub fn resolve_selection(&self, tokens: &[FlexStr])
        -> Result<Vec<Gene>, ResolutionReport>
    {
        let mut resolved = vec![];
        let mut report = ResolutionReport::default();

        for token in tokens {
            let lookup_result =
                if token.contains('_') {
                    self.directory.resolve_by_df_key(token)
                } else {
                    self.directory.resolve_one(token)
                };

            match lookup_result {
                Ok(gene) => resolved.push(gene),
                Err(GeneLookupError::NotFound { token }) =>
                    report.unknown_tokens.push(token),
                Err(GeneLookupError::Ambiguous { token, candidates }) =>
                    report.ambiguous_tokens.push(AmbiguousToken { token, candidates }),
            }
        }

        if report.is_empty() {
            Ok(resolved)
        } else {
            Err(report)
        }
    }

    fn selection_tokens(&self, user: &UserId,
                        gene_tokens: &[FlexStr],
                        gene_collection: &Option<CollectionName>)
        -> Result<Vec<FlexStr>, QueryError>
    {
        if let Some(collection_name) = gene_collection {
            let Some(collection) = self.collection(collection_name)
            else {
                return Err(QueryError::UnknownCollection(collection_name.clone()));
            };

            if !collection.visible_to(user) {
                return Err(QueryError::UnknownCollection(collection_name.clone()));
            }

            Ok(collection.included_genes.iter().cloned().collect())
        } else {
            Ok(gene_tokens.to_vec())
        }
    }

    /// The tier-fixed normalization policy: Researchers may ask for
    /// explicit flags (defaulting to no transform), everyone else gets the
    /// identity for a single-gene view and a forced z-score for the
    /// multi-gene heatmap view.
    fn applied_normalization(tier_name: &FlexStr,
                             requested: Option<NormalizationOptions>,
                             accessible_count: usize)
        -> NormalizationOptions
    {
        if tier_name.as_str() == RESEARCHER_TIER_NAME {
            requested.unwrap_or_else(NormalizationOptions::identity)
        } else if accessible_count > 1 {
            NormalizationOptions::z_score()
        } else {
            NormalizationOptions::identity()
        }
    }

    fn shape_payload(matrix: &ExpressionMatrix,
                     accessible: &[Gene],
                     columns: &[ReplicateColumn])
        -> Result<PlotPayload, QueryError>
    {
        if accessible.is_empty() {
            return Ok(PlotPayload::Empty);
        }

        let row_keys: Vec<DfKey> = accessible.iter().map(Gene::df_key).collect();
        let sliced = matrix.slice(&row_keys, columns)?;

        if let [only_key] = row_keys.as_slice() {
            let values = sliced.row(only_key)
                .expect("sliced matrix contains the requested row")
                .to_vec();

            return Ok(PlotPayload::Series {
                gene: only_key.clone(),
                conditions: columns.to_vec(),
                values,
            });
        }

        let matrix_rows: Vec<Vec<f64>> =
            row_keys.iter()
            .map(|df_key| {
                sliced.row(df_key)
                    .expect("sliced matrix contains the requested row")
                    .to_vec()
            })
            .collect();

        Ok(PlotPayload::Heatmap {
            genes: row_keys,
            conditions: columns.to_vec(),
            matrix: matrix_rows,
        })
    }

    /// Execute an explore query end to end.  Gene resolution failures stop
    /// the query before any ledger or matrix work; a denied-only selection
    /// is a valid empty outcome, not a failure.
    pub async fn explore(&self, analysis_id: AnalysisId, query: &ExploreQuery)
        -> Result<ExploreApiResult, QueryError>
    {
        let Some(analysis) = self.analyses.get(&analysis_id)
        else {
            return Err(QueryError::UnknownAnalysis(analysis_id));
        };

        let provisioned = self.ledger.ensure_provisioned(&query.user)?;
        let tier_name = provisioned.user_tier.tier.name.clone();

        let tokens =
            self.selection_tokens(&query.user, &query.gene_tokens,
                                  &query.gene_collection)?;

        let genes = self.resolve_selection(&tokens)
            .map_err(QueryError::GeneResolution)?;

        let ClassifiedGenes { accessible, denied } =
            self.tier_policy.read().unwrap().classify(&genes, &tier_name);

        // denied genes are surfaced to the caller but never recorded
        let record_outcome = self.ledger.record(&query.user, &accessible);

        let mut expanded =
            conditions::expand(&query.conditions, &analysis.conditions);

        if expanded.is_empty() {
            return Err(QueryError::NoMatchingConditions);
        }

        conditions::sort_for_display(&mut expanded);

        let mut matrix =
            self.matrix_loader.load(&analysis.file_path).await?;

        let applied_normalization =
            Self::applied_normalization(&tier_name, query.normalization,
                                        accessible.len());

        normalize(&mut matrix, &applied_normalization);

        let payload = Self::shape_payload(&matrix, &accessible, &expanded)?;

        let ledger_gene_count =
            provisioned.request.gene_count() + record_outcome.added.len();
        let usage_percentage =
            100.0 * ledger_gene_count as f64
                / provisioned.user_tier.tier.max_genes as f64;

        Ok(ExploreApiResult {
            id: Uuid::new_v4().to_string().to_shared_str(),
            status: "ok".to_shared_str(),
            payload,
            accessible_genes: accessible.iter().map(Gene::df_key).collect(),
            denied_genes: denied.iter().map(Gene::df_key).collect(),
            added_genes: record_outcome.added,
            skipped_genes: record_outcome.skipped,
            applied_normalization,
            usage_percentage,
        })
    }

    /// Produce the replicate-averaged CSV export for the accessible part of
    /// a selection.  No normalization is applied and the ledger is left
    /// untouched: only explore queries feed the usage record.
    pub async fn export_csv(&self, analysis_id: AnalysisId, query: &ExportQuery)
        -> Result<String, QueryError>
    {
        let Some(analysis) = self.analyses.get(&analysis_id)
        else {
            return Err(QueryError::UnknownAnalysis(analysis_id));
        };

        let provisioned = self.ledger.ensure_provisioned(&query.user)?;
        let tier_name = provisioned.user_tier.tier.name.clone();

        let tokens =
            self.selection_tokens(&query.user, &query.gene_tokens,
                                  &query.gene_collection)?;

        let genes = self.resolve_selection(&tokens)
            .map_err(QueryError::GeneResolution)?;

        let ClassifiedGenes { accessible, .. } =
            self.tier_policy.read().unwrap().classify(&genes, &tier_name);

        let expanded =
            conditions::expand(&query.conditions, &analysis.conditions);

        if expanded.is_empty() {
            return Err(QueryError::NoMatchingConditions);
        }

        let mut matrix =
            self.matrix_loader.load(&analysis.file_path).await?;

        // identity transform, but missing values still become 0.0
        normalize(&mut matrix, &NormalizationOptions::identity());

        let row_keys: Vec<DfKey> = accessible.iter().map(Gene::df_key).collect();
        let sliced = matrix.slice(&row_keys, &expanded)?;

        let groups = conditions::group_for_averaging(&expanded);
        let averaged = sliced.averaged_by_group(&groups)?;

        let mut csv_writer = csv::Writer::from_writer(vec![]);

        let mut header = vec!["Gene".to_owned()];
        header.extend(averaged.columns().iter().map(|column| column.to_string()));
        csv_writer.write_record(&header)
            .map_err(|err| QueryError::Internal(err.to_string().into()))?;

        for df_key in &row_keys {
            let row_values = averaged.row(df_key)
                .expect("averaged matrix keeps the sliced rows");

            let mut record = vec![df_key.to_string()];
            record.extend(row_values.iter().map(|value| value.to_string()));
            csv_writer.write_record(&record)
                .map_err(|err| QueryError::Internal(err.to_string().into()))?;
        }

        let bytes = csv_writer.into_inner()
            .map_err(|err| QueryError::Internal(err.to_string().into()))?;

        String::from_utf8(bytes)
            .map_err(|err| QueryError::Internal(err.to_string().into()))
    }
}
