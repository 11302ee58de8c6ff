use std::fmt;
use std::fmt::Display;

use flexstr::SharedStr as FlexStr;

use crate::directory::ResolutionReport;
use crate::matrix::MatrixError;
use crate::normalize::NormalizationOptions;
use crate::types::{AnalysisId, CollectionName, DfKey, ReplicateColumn};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum QueryError {
    // unknown or ambiguous selection tokens; always carries the offending
    // token lists
    GeneResolution(ResolutionReport),
    NoMatchingConditions,
    SourceUnavailable { source: FlexStr, detail: FlexStr },
    MalformedMatrix { detail: FlexStr },
    UnknownAnalysis(AnalysisId),
    UnknownCollection(CollectionName),
    Internal(FlexStr),
}

impl Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryError::GeneResolution(report) =>
                write!(f, "gene resolution failed: {}", report),
            QueryError::NoMatchingConditions =>
                write!(f, "no matching conditions"),
            QueryError::SourceUnavailable { source, detail } =>
                write!(f, "matrix source unavailable: {}: {}", source, detail),
            QueryError::MalformedMatrix { detail } =>
                write!(f, "malformed matrix: {}", detail),
            QueryError::UnknownAnalysis(analysis_id) =>
                write!(f, "no analysis with id: {}", analysis_id),
            QueryError::UnknownCollection(collection_name) =>
                write!(f, "no collection named: {}", collection_name),
            QueryError::Internal(detail) =>
                write!(f, "internal error: {}", detail),
        }
    }
}

impl From<MatrixError> for QueryError {
    fn from(matrix_error: MatrixError) -> QueryError {
        match matrix_error {
            MatrixError::SourceUnavailable { source, detail } =>
                QueryError::SourceUnavailable { source, detail },
            MatrixError::MalformedMatrix { detail } =>
                QueryError::MalformedMatrix { detail },
        }
    }
}

impl From<rusqlite::Error> for QueryError {
    fn from(db_error: rusqlite::Error) -> QueryError {
        QueryError::Internal(db_error.to_string().into())
    }
}

/// The plot-ready shape of a successful query: one row for a single
/// accessible gene, a 2-D table for several, nothing when every requested
/// gene was denied.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "plot_type")]
pub enum PlotPayload {
    #[serde(rename = "empty")]
    Empty,
    #[serde(rename = "series")]
    Series {
        gene: DfKey,
        conditions: Vec<ReplicateColumn>,
        values: Vec<f64>,
    },
    #[serde(rename = "heatmap")]
    Heatmap {
        genes: Vec<DfKey>,
        conditions: Vec<ReplicateColumn>,
        matrix: Vec<Vec<f64>>,
    },
}

#[derive(Serialize, Debug, Clone)]
pub struct ExploreApiResult {
    pub id: FlexStr,
    pub status: FlexStr,
    pub payload: PlotPayload,
    pub accessible_genes: Vec<DfKey>,
    pub denied_genes: Vec<DfKey>,
    pub added_genes: Vec<DfKey>,
    pub skipped_genes: Vec<DfKey>,
    pub applied_normalization: NormalizationOptions,
    pub usage_percentage: f64,
}
