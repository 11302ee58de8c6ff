use std::fmt;
use std::fmt::Display;

use flexstr::{SharedStr as FlexStr, shared_fmt as flex_fmt};

use crate::data_types::{Gene, SymbolGeneMap, DfKeyGeneMap};
use crate::types::DfKey;

fn join(v: &[FlexStr], connector: &str) -> String {
    itertools::join(v.iter(), connector)
}

/// Canonical registry of gene records, indexed for the lookup forms the
/// selection inputs use: bare symbol, accession prefix and composite df_key.
pub struct GeneDirectory {
    genes: Vec<Gene>,
    by_symbol: SymbolGeneMap,
    by_df_key: DfKeyGeneMap,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum GeneLookupError {
    NotFound { token: FlexStr },
    // the token matched more than one record; the caller must re-submit
    // using the composite df_key form
    Ambiguous { token: FlexStr, candidates: Vec<DfKey> },
}

impl Display for GeneLookupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GeneLookupError::NotFound { token } =>
                write!(f, "no gene found for: {}", token),
            GeneLookupError::Ambiguous { token, candidates } =>
                write!(f, "multiple genes found for {}: {}", token,
                       join(candidates, ", ")),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct AmbiguousToken {
    pub token: FlexStr,
    pub candidates: Vec<DfKey>,
}

/// All-or-nothing failure report from [`GeneDirectory::resolve_many()`].
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolutionReport {
    #[serde(skip_serializing_if="Vec::is_empty", default)]
    pub unknown_tokens: Vec<FlexStr>,
    #[serde(skip_serializing_if="Vec::is_empty", default)]
    pub ambiguous_tokens: Vec<AmbiguousToken>,
}

impl ResolutionReport {
    pub fn is_empty(&self) -> bool {
        self.unknown_tokens.is_empty() && self.ambiguous_tokens.is_empty()
    }
}

impl Display for ResolutionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.unknown_tokens.is_empty() {
            write!(f, "unknown genes: {}", join(&self.unknown_tokens, ", "))?;
            if !self.ambiguous_tokens.is_empty() {
                write!(f, "; ")?;
            }
        }
        if !self.ambiguous_tokens.is_empty() {
            let tokens: Vec<_> =
                self.ambiguous_tokens.iter().map(|a| a.token.clone()).collect();
            write!(f, "ambiguous genes: {}", join(&tokens, ", "))?;
        }
        Ok(())
    }
}

#[derive(Serialize, Debug, Clone)]
pub struct GeneCompleteMatch {
    pub id: DfKey,
    pub label: FlexStr,
}

const MAX_COMPLETE_MATCHES: usize = 10;

impl GeneDirectory {
    pub fn new(genes: Vec<Gene>) -> GeneDirectory {
        let mut by_symbol: SymbolGeneMap = SymbolGeneMap::new();
        let mut by_df_key = DfKeyGeneMap::new();

        for gene in &genes {
            by_symbol.entry(gene.gene_name.clone())
                .or_insert_with(Vec::new)
                .push(gene.clone());
            by_df_key.insert(gene.df_key(), gene.clone());
        }

        GeneDirectory {
            genes,
            by_symbol,
            by_df_key,
        }
    }

    pub fn gene_count(&self) -> usize {
        self.genes.len()
    }

    pub fn gene_by_df_key(&self, df_key: &DfKey) -> Option<&Gene> {
        self.by_df_key.get(df_key)
    }

    fn candidate_keys(genes: &[Gene]) -> Vec<DfKey> {
        genes.iter().map(Gene::df_key).collect()
    }

    /// Resolve a bare symbol or accession-prefix token to a single gene
    /// record.  A symbol shared by several records is reported as ambiguous
    /// rather than silently picking one.
    pub fn resolve_one(&self, token: &FlexStr) -> Result<Gene, GeneLookupError> {
        if let Some(symbol_matches) = self.by_symbol.get(token) {
            if symbol_matches.len() == 1 {
                return Ok(symbol_matches[0].clone());
            }
            return Err(GeneLookupError::Ambiguous {
                token: token.clone(),
                candidates: Self::candidate_keys(symbol_matches),
            });
        }

        let accession_matches: Vec<Gene> =
            self.genes.iter()
            .filter(|gene| gene.ensembl_id.starts_with(token.as_str()))
            .cloned()
            .collect();

        match accession_matches.len() {
            0 => Err(GeneLookupError::NotFound { token: token.clone() }),
            1 => Ok(accession_matches.into_iter().next().unwrap()),
            _ => Err(GeneLookupError::Ambiguous {
                token: token.clone(),
                candidates: Self::candidate_keys(&accession_matches),
            }),
        }
    }

    /// Resolve every token or fail with one aggregated report.  Succeeds
    /// only when all tokens resolve unambiguously, returning the genes in
    /// input order.  This validation runs before any gene is treated as
    /// selected.
    pub fn resolve_many(&self, tokens: &[FlexStr])
        -> Result<Vec<Gene>, ResolutionReport>
    {
        let mut resolved = vec![];
        let mut report = ResolutionReport::default();

        for token in tokens {
            match self.resolve_one(token) {
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

    /// Resolve a composite "{accession}_{symbol}" key.  The symbol lookup is
    /// tried first; when several records share the symbol the accession
    /// prefix narrows them down.
    pub fn resolve_by_df_key(&self, df_key: &DfKey)
        -> Result<Gene, GeneLookupError>
    {
        let Some((accession, symbol)) = df_key.split_once('_')
        else {
            return Err(GeneLookupError::NotFound { token: df_key.clone() });
        };

        let Some(symbol_matches) = self.by_symbol.get(&FlexStr::from(symbol))
        else {
            return Err(GeneLookupError::NotFound { token: df_key.clone() });
        };

        if symbol_matches.len() == 1 {
            return Ok(symbol_matches[0].clone());
        }

        let narrowed: Vec<Gene> =
            symbol_matches.iter()
            .filter(|gene| gene.base_id() == accession)
            .cloned()
            .collect();

        match narrowed.len() {
            0 => Err(GeneLookupError::NotFound { token: df_key.clone() }),
            1 => Ok(narrowed.into_iter().next().unwrap()),
            _ => Err(GeneLookupError::Ambiguous {
                token: df_key.clone(),
                candidates: Self::candidate_keys(&narrowed),
            }),
        }
    }

    /// Case-insensitive substring search on symbol or accession, for the
    /// gene selection autocomplete widget.
    pub fn complete(&self, term: &str) -> Vec<GeneCompleteMatch> {
        let term = term.trim().to_lowercase();

        if term.is_empty() {
            return vec![];
        }

        self.genes.iter()
            .filter(|gene| {
                gene.gene_name.to_lowercase().contains(&term) ||
                gene.ensembl_id.to_lowercase().contains(&term)
            })
            .take(MAX_COMPLETE_MATCHES)
            .map(|gene| GeneCompleteMatch {
                id: gene.df_key(),
                label: flex_fmt!("{} - {}", gene.ensembl_id, gene.gene_name),
            })
            .collect()
    }
}
