use std::collections::BTreeSet;
use std::sync::Mutex;

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};

use flexstr::{SharedStr as FlexStr, ToSharedStr};

use crate::data_types::{AnalysisOutput, Gene, GeneCollection, IdAnalysisMap,
                        NameCollectionMap, Tier, UserGeneRequest};
use crate::types::{AnalysisId, CollectionName, DfKey, TierName, UserId};

const TABLE_DEFINITIONS: [&str; 9] = [
    "CREATE TABLE IF NOT EXISTS genes (
        ensembl_id  TEXT PRIMARY KEY,
        gene_name   TEXT NOT NULL,
        long_name   TEXT
     )",
    "CREATE TABLE IF NOT EXISTS collections (
        collection_name     TEXT PRIMARY KEY,
        description         TEXT NOT NULL,
        created_by          TEXT,
        private_collection  INTEGER NOT NULL,
        customer_visible    INTEGER NOT NULL
     )",
    "CREATE TABLE IF NOT EXISTS collection_genes (
        collection_name  TEXT NOT NULL,
        df_key           TEXT NOT NULL,
        UNIQUE(collection_name, df_key)
     )",
    "CREATE TABLE IF NOT EXISTS collection_analyses (
        collection_name  TEXT NOT NULL,
        analysis_id      INTEGER NOT NULL,
        UNIQUE(collection_name, analysis_id)
     )",
    "CREATE TABLE IF NOT EXISTS analyses (
        id                             INTEGER PRIMARY KEY,
        project                        TEXT,
        product                        TEXT,
        description                    TEXT,
        origin                         TEXT,
        created_at                     TEXT NOT NULL,
        is_visible_in_commercial_app   INTEGER NOT NULL,
        file_path                      TEXT NOT NULL,
        conditions                     TEXT NOT NULL
     )",
    "CREATE TABLE IF NOT EXISTS tiers (
        name         TEXT PRIMARY KEY,
        description  TEXT,
        max_genes    INTEGER NOT NULL
     )",
    "CREATE TABLE IF NOT EXISTS user_tiers (
        user       TEXT PRIMARY KEY,
        tier_name  TEXT NOT NULL
     )",
    "CREATE TABLE IF NOT EXISTS user_gene_requests (
        user        TEXT PRIMARY KEY,
        created_at  TEXT NOT NULL
     )",
    "CREATE TABLE IF NOT EXISTS user_request_genes (
        user    TEXT NOT NULL,
        df_key  TEXT NOT NULL,
        UNIQUE(user, df_key)
     )",
];

/// SQLite-backed store for the directory, collections, tiers, the usage
/// ledger and the analysis descriptors.  The connection is shared behind a
/// mutex; every multi-row write runs in one transaction.
pub struct SiteDB {
    conn: Mutex<Connection>,
}

fn parse_timestamp(text: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

impl SiteDB {
    pub fn new(db_path: &str) -> Result<SiteDB> {
        let conn = Connection::open(db_path)?;
        let site_db = SiteDB {
            conn: Mutex::new(conn),
        };
        site_db.make_tables()?;
        Ok(site_db)
    }

    pub fn new_in_memory() -> Result<SiteDB> {
        let conn = Connection::open_in_memory()?;
        let site_db = SiteDB {
            conn: Mutex::new(conn),
        };
        site_db.make_tables()?;
        Ok(site_db)
    }

    fn make_tables(&self) -> rusqlite::Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        for table_definition in TABLE_DEFINITIONS.iter() {
            tx.execute(table_definition, ())?;
        }

        tx.commit()?;

        Ok(())
    }

    pub fn store_genes(&self, genes: &[Gene]) -> rusqlite::Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        for gene in genes {
            tx.execute("INSERT OR REPLACE INTO genes (ensembl_id, gene_name, long_name)
                        VALUES (?1, ?2, ?3)",
                       params![gene.ensembl_id.as_str(), gene.gene_name.as_str(),
                               gene.long_name.as_ref().map(|l| l.as_str())])?;
        }

        tx.commit()?;

        Ok(())
    }

    pub fn load_genes(&self) -> rusqlite::Result<Vec<Gene>> {
        let conn = self.conn.lock().unwrap();
        let mut statement =
            conn.prepare("SELECT ensembl_id, gene_name, long_name FROM genes")?;

        let rows = statement.query_map([], |row| {
            let ensembl_id: String = row.get(0)?;
            let gene_name: String = row.get(1)?;
            let long_name: Option<String> = row.get(2)?;
            Ok(Gene {
                ensembl_id: ensembl_id.to_shared_str(),
                gene_name: gene_name.to_shared_str(),
                long_name: long_name.map(|l| l.to_shared_str()),
            })
        })?;

        rows.collect()
    }

    pub fn store_collection(&self, collection: &GeneCollection) -> rusqlite::Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        tx.execute("INSERT OR REPLACE INTO collections
                      (collection_name, description, created_by,
                       private_collection, customer_visible)
                    VALUES (?1, ?2, ?3, ?4, ?5)",
                   params![collection.collection_name.as_str(),
                           collection.description.as_str(),
                           collection.created_by.as_ref().map(|u| u.as_str()),
                           collection.private_collection,
                           collection.customer_visible])?;

        tx.execute("DELETE FROM collection_genes WHERE collection_name = ?1",
                   params![collection.collection_name.as_str()])?;
        tx.execute("DELETE FROM collection_analyses WHERE collection_name = ?1",
                   params![collection.collection_name.as_str()])?;

        for df_key in &collection.included_genes {
            tx.execute("INSERT INTO collection_genes (collection_name, df_key)
                        VALUES (?1, ?2)",
                       params![collection.collection_name.as_str(), df_key.as_str()])?;
        }

        for analysis_id in &collection.linked_analyses {
            tx.execute("INSERT INTO collection_analyses (collection_name, analysis_id)
                        VALUES (?1, ?2)",
                       params![collection.collection_name.as_str(), analysis_id])?;
        }

        tx.commit()?;

        Ok(())
    }

    pub fn delete_collection(&self, collection_name: &CollectionName) -> rusqlite::Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        tx.execute("DELETE FROM collections WHERE collection_name = ?1",
                   params![collection_name.as_str()])?;
        tx.execute("DELETE FROM collection_genes WHERE collection_name = ?1",
                   params![collection_name.as_str()])?;
        tx.execute("DELETE FROM collection_analyses WHERE collection_name = ?1",
                   params![collection_name.as_str()])?;

        tx.commit()?;

        Ok(())
    }

    pub fn load_collections(&self) -> rusqlite::Result<NameCollectionMap> {
        let conn = self.conn.lock().unwrap();
        let mut collections = NameCollectionMap::new();

        {
            let mut statement =
                conn.prepare("SELECT collection_name, description, created_by,
                                     private_collection, customer_visible
                                FROM collections")?;
            let rows = statement.query_map([], |row| {
                let collection_name: String = row.get(0)?;
                let description: String = row.get(1)?;
                let created_by: Option<String> = row.get(2)?;
                Ok(GeneCollection {
                    collection_name: collection_name.to_shared_str(),
                    description: description.to_shared_str(),
                    created_by: created_by.map(|u| u.to_shared_str()),
                    included_genes: BTreeSet::new(),
                    linked_analyses: BTreeSet::new(),
                    private_collection: row.get(3)?,
                    customer_visible: row.get(4)?,
                })
            })?;

            for collection in rows {
                let collection = collection?;
                collections.insert(collection.collection_name.clone(), collection);
            }
        }

        {
            let mut statement =
                conn.prepare("SELECT collection_name, df_key FROM collection_genes")?;
            let rows = statement.query_map([], |row| {
                let collection_name: String = row.get(0)?;
                let df_key: String = row.get(1)?;
                Ok((collection_name.to_shared_str(), df_key.to_shared_str()))
            })?;

            for row in rows {
                let (collection_name, df_key): (CollectionName, DfKey) = row?;
                if let Some(collection) = collections.get_mut(&collection_name) {
                    collection.included_genes.insert(df_key);
                }
            }
        }

        {
            let mut statement =
                conn.prepare("SELECT collection_name, analysis_id FROM collection_analyses")?;
            let rows = statement.query_map([], |row| {
                let collection_name: String = row.get(0)?;
                let analysis_id: AnalysisId = row.get(1)?;
                Ok((collection_name.to_shared_str(), analysis_id))
            })?;

            for row in rows {
                let (collection_name, analysis_id): (CollectionName, AnalysisId) = row?;
                if let Some(collection) = collections.get_mut(&collection_name) {
                    collection.linked_analyses.insert(analysis_id);
                }
            }
        }

        Ok(collections)
    }

    pub fn store_analysis(&self, analysis: &AnalysisOutput) -> Result<()> {
        let conditions_json = serde_json::to_string(&analysis.conditions)?;
        let conn = self.conn.lock().unwrap();

        conn.execute("INSERT OR REPLACE INTO analyses
                        (id, project, product, description, origin, created_at,
                         is_visible_in_commercial_app, file_path, conditions)
                      VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                     params![analysis.id,
                             analysis.project.as_ref().map(|v| v.as_str()),
                             analysis.product.as_ref().map(|v| v.as_str()),
                             analysis.description.as_ref().map(|v| v.as_str()),
                             analysis.origin.as_ref().map(|v| v.as_str()),
                             analysis.created_at.to_rfc3339(),
                             analysis.is_visible_in_commercial_app,
                             analysis.file_path.as_str(),
                             conditions_json])?;

        Ok(())
    }

    pub fn load_analyses(&self) -> Result<IdAnalysisMap> {
        let conn = self.conn.lock().unwrap();
        let mut statement =
            conn.prepare("SELECT id, project, product, description, origin, created_at,
                                 is_visible_in_commercial_app, file_path, conditions
                            FROM analyses")?;

        let rows = statement.query_map([], |row| {
            let project: Option<String> = row.get(1)?;
            let product: Option<String> = row.get(2)?;
            let description: Option<String> = row.get(3)?;
            let origin: Option<String> = row.get(4)?;
            let created_at: String = row.get(5)?;
            let file_path: String = row.get(7)?;
            let conditions_json: String = row.get(8)?;
            Ok((row.get::<_, AnalysisId>(0)?, project, product, description, origin,
                created_at, row.get::<_, bool>(6)?, file_path, conditions_json))
        })?;

        let mut analyses = IdAnalysisMap::new();

        for row in rows {
            let (id, project, product, description, origin,
                 created_at, is_visible_in_commercial_app, file_path, conditions_json) = row?;

            let conditions: Vec<FlexStr> = serde_json::from_str(&conditions_json)?;

            analyses.insert(id, AnalysisOutput {
                id,
                project: project.map(|v| v.to_shared_str()),
                product: product.map(|v| v.to_shared_str()),
                description: description.map(|v| v.to_shared_str()),
                origin: origin.map(|v| v.to_shared_str()),
                created_at: parse_timestamp(&created_at),
                is_visible_in_commercial_app,
                file_path: file_path.to_shared_str(),
                conditions,
            });
        }

        Ok(analyses)
    }

    pub fn tier_by_name(&self, tier_name: &TierName) -> rusqlite::Result<Option<Tier>> {
        let conn = self.conn.lock().unwrap();
        let mut statement =
            conn.prepare("SELECT name, description, max_genes FROM tiers WHERE name = ?1")?;

        let mut rows = statement.query_map(params![tier_name.as_str()], |row| {
            let name: String = row.get(0)?;
            let description: Option<String> = row.get(1)?;
            Ok(Tier {
                name: name.to_shared_str(),
                description: description.map(|d| d.to_shared_str()),
                max_genes: row.get(2)?,
            })
        })?;

        rows.next().transpose()
    }

    pub fn store_tier(&self, tier: &Tier) -> rusqlite::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("INSERT OR REPLACE INTO tiers (name, description, max_genes)
                      VALUES (?1, ?2, ?3)",
                     params![tier.name.as_str(),
                             tier.description.as_ref().map(|d| d.as_str()),
                             tier.max_genes])?;
        Ok(())
    }

    pub fn user_tier_name(&self, user: &UserId) -> rusqlite::Result<Option<TierName>> {
        let conn = self.conn.lock().unwrap();
        let mut statement =
            conn.prepare("SELECT tier_name FROM user_tiers WHERE user = ?1")?;

        let mut rows = statement.query_map(params![user.as_str()], |row| {
            let tier_name: String = row.get(0)?;
            Ok(tier_name.to_shared_str())
        })?;

        rows.next().transpose()
    }

    pub fn set_user_tier(&self, user: &UserId, tier_name: &TierName) -> rusqlite::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("INSERT OR REPLACE INTO user_tiers (user, tier_name) VALUES (?1, ?2)",
                     params![user.as_str(), tier_name.as_str()])?;
        Ok(())
    }

    /// Fetch a user's ledger entry, creating an empty one if this is the
    /// first time the user is seen.
    pub fn ensure_user_request(&self, user: &UserId) -> rusqlite::Result<UserGeneRequest> {
        {
            let conn = self.conn.lock().unwrap();
            conn.execute("INSERT OR IGNORE INTO user_gene_requests (user, created_at)
                          VALUES (?1, ?2)",
                         params![user.as_str(), Utc::now().to_rfc3339()])?;
        }

        self.user_request(user)?.ok_or(rusqlite::Error::QueryReturnedNoRows)
    }

    pub fn user_request(&self, user: &UserId) -> rusqlite::Result<Option<UserGeneRequest>> {
        let conn = self.conn.lock().unwrap();

        let mut statement =
            conn.prepare("SELECT created_at FROM user_gene_requests WHERE user = ?1")?;
        let mut rows = statement.query_map(params![user.as_str()], |row| {
            let created_at: String = row.get(0)?;
            Ok(created_at)
        })?;

        let Some(created_at) = rows.next().transpose()?
        else {
            return Ok(None);
        };

        let mut gene_statement =
            conn.prepare("SELECT df_key FROM user_request_genes WHERE user = ?1")?;
        let gene_rows = gene_statement.query_map(params![user.as_str()], |row| {
            let df_key: String = row.get(0)?;
            Ok(df_key.to_shared_str())
        })?;

        let genes: rusqlite::Result<BTreeSet<DfKey>> = gene_rows.collect();

        Ok(Some(UserGeneRequest {
            user: user.clone(),
            genes: genes?,
            created_at: parse_timestamp(&created_at),
        }))
    }

    /// Add genes to a user's ledger in one transaction.  Rows that already
    /// exist are ignored, so concurrent adds of the same gene collapse to
    /// one set member.
    pub fn add_request_genes(&self, user: &UserId, df_keys: &[DfKey]) -> rusqlite::Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        tx.execute("INSERT OR IGNORE INTO user_gene_requests (user, created_at)
                    VALUES (?1, ?2)",
                   params![user.as_str(), Utc::now().to_rfc3339()])?;

        for df_key in df_keys {
            tx.execute("INSERT OR IGNORE INTO user_request_genes (user, df_key)
                        VALUES (?1, ?2)",
                       params![user.as_str(), df_key.as_str()])?;
        }

        tx.commit()?;

        Ok(())
    }
}
