use std::sync::Arc;

use flexstr::ToSharedStr;

use crate::data_types::{Gene, Tier, UserGeneRequest, UserTier};
use crate::site_db::SiteDB;
use crate::tier::{DEFAULT_MAX_GENES, FREE_TIER_NAME};
use crate::types::{DfKey, UserId};

/// A user's tier binding and ledger entry, with the advisory usage figure.
#[derive(Serialize, Debug, Clone)]
pub struct ProvisionedUser {
    pub user_tier: UserTier,
    pub request: UserGeneRequest,
    pub usage_percentage: f64,
}

/// The (added, skipped) partition returned by [`UsageLedger::record()`].
#[derive(Serialize, Debug, Clone, Default)]
pub struct RecordOutcome {
    pub added: Vec<DfKey>,
    pub skipped: Vec<DfKey>,
}

/// Per-user accumulating record of successfully accessed genes, checked
/// against the tier quota for display only.  The quota is advisory: going
/// over it never blocks new genes.
pub struct UsageLedger {
    site_db: Arc<SiteDB>,
}

impl UsageLedger {
    pub fn new(site_db: Arc<SiteDB>) -> UsageLedger {
        UsageLedger {
            site_db,
        }
    }

    /// Idempotently guarantee a tier binding and a ledger entry for the
    /// user.  A user with no tier is bound to "Free" (quota 100), creating
    /// that tier row itself when missing.
    pub fn ensure_provisioned(&self, user: &UserId) -> rusqlite::Result<ProvisionedUser> {
        let tier_name = self.site_db.user_tier_name(user)?;

        let tier = match tier_name {
            Some(tier_name) => {
                match self.site_db.tier_by_name(&tier_name)? {
                    Some(tier) => tier,
                    None => self.default_free_tier()?,
                }
            },
            None => {
                let free_tier = self.default_free_tier()?;
                self.site_db.set_user_tier(user, &free_tier.name)?;
                free_tier
            },
        };

        let request = self.site_db.ensure_user_request(user)?;

        let usage_percentage =
            100.0 * request.gene_count() as f64 / tier.max_genes as f64;

        Ok(ProvisionedUser {
            user_tier: UserTier {
                user: user.clone(),
                tier,
            },
            request,
            usage_percentage,
        })
    }

    fn default_free_tier(&self) -> rusqlite::Result<Tier> {
        let free_name = FREE_TIER_NAME.to_shared_str();

        if let Some(tier) = self.site_db.tier_by_name(&free_name)? {
            return Ok(tier);
        }

        let tier = Tier {
            name: free_name,
            description: None,
            max_genes: DEFAULT_MAX_GENES,
        };
        self.site_db.store_tier(&tier)?;

        Ok(tier)
    }

    /// Add each not-yet-present gene to the user's ledger and report which
    /// were added and which were already there.  The add is one transaction:
    /// all new genes land or none do.
    ///
    /// A storage failure degrades to an empty outcome with a warning rather
    /// than failing the caller's query: plots should still render when usage
    /// tracking is transiently broken.
    pub fn record(&self, user: &UserId, accessible_genes: &[Gene]) -> RecordOutcome {
        match self.try_record(user, accessible_genes) {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::warn!("ledger update failed for {}: {}", user, err);
                RecordOutcome::default()
            },
        }
    }

    fn try_record(&self, user: &UserId, accessible_genes: &[Gene])
        -> rusqlite::Result<RecordOutcome>
    {
        let request = self.site_db.ensure_user_request(user)?;

        let mut outcome = RecordOutcome::default();

        for gene in accessible_genes {
            let df_key = gene.df_key();
            if request.genes.contains(&df_key) {
                outcome.skipped.push(df_key);
            } else {
                outcome.added.push(df_key);
            }
        }

        self.site_db.add_request_genes(user, &outcome.added)?;

        Ok(outcome)
    }
}
