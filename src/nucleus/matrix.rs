use std::fmt;
use std::fmt::Display;
use std::fs::File;
use std::io::Read;

use flate2::read::GzDecoder;
use indexmap::IndexMap;

use flexstr::{SharedStr as FlexStr, ToSharedStr};

use crate::types::{ConditionName, DfKey, ReplicateColumn};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum MatrixError {
    // the backing object or file couldn't be read
    SourceUnavailable { source: FlexStr, detail: FlexStr },
    // the row/column structure is not rectangular, the index column is
    // missing, or an addressed row/column doesn't exist
    MalformedMatrix { detail: FlexStr },
}

impl Display for MatrixError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatrixError::SourceUnavailable { source, detail } =>
                write!(f, "matrix source unavailable: {}: {}", source, detail),
            MatrixError::MalformedMatrix { detail } =>
                write!(f, "malformed matrix: {}", detail),
        }
    }
}

impl std::error::Error for MatrixError {}

fn source_unavailable(source: &str, detail: impl Display) -> MatrixError {
    MatrixError::SourceUnavailable {
        source: source.to_shared_str(),
        detail: detail.to_string().to_shared_str(),
    }
}

fn malformed(detail: impl Display) -> MatrixError {
    MatrixError::MalformedMatrix {
        detail: detail.to_string().to_shared_str(),
    }
}

/// In-memory gene-by-condition numeric table.  Rows are keyed by df_key,
/// columns by fully-qualified replicate names; values are row-major.
#[derive(Debug, Clone)]
pub struct ExpressionMatrix {
    row_index: IndexMap<DfKey, usize>,
    columns: Vec<ReplicateColumn>,
    values: Vec<Vec<f64>>,
}

/// Mean of a row; NaN for an empty row.
pub fn row_mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation (ddof = 1); NaN for fewer than two values.
pub fn row_std(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return f64::NAN;
    }
    let mean = row_mean(values);
    let sum_sq: f64 =
        values.iter().map(|value| (value - mean) * (value - mean)).sum();
    (sum_sq / (values.len() - 1) as f64).sqrt()
}

impl ExpressionMatrix {
    pub fn from_rows(columns: Vec<ReplicateColumn>,
                     rows: Vec<(DfKey, Vec<f64>)>)
        -> Result<ExpressionMatrix, MatrixError>
    {
        let mut row_index = IndexMap::new();
        let mut values = vec![];

        for (df_key, row_values) in rows {
            if row_values.len() != columns.len() {
                return Err(malformed(format!("row {} has {} values, expected {}",
                                             df_key, row_values.len(), columns.len())));
            }
            row_index.insert(df_key, values.len());
            values.push(row_values);
        }

        Ok(ExpressionMatrix {
            row_index,
            columns,
            values,
        })
    }

    pub fn row_count(&self) -> usize {
        self.values.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[ReplicateColumn] {
        &self.columns
    }

    pub fn row_keys(&self) -> impl Iterator<Item = &DfKey> {
        self.row_index.keys()
    }

    pub fn row(&self, df_key: &DfKey) -> Option<&[f64]> {
        self.row_index.get(df_key)
            .map(|&row_position| self.values[row_position].as_slice())
    }

    pub fn rows_mut(&mut self) -> impl Iterator<Item = &mut Vec<f64>> {
        self.values.iter_mut()
    }

    fn column_positions(&self, wanted: &[ReplicateColumn])
        -> Result<Vec<usize>, MatrixError>
    {
        wanted.iter().map(|column| {
            self.columns.iter().position(|col| col == column)
                .ok_or_else(|| malformed(format!("no such column: {}", column)))
        })
        .collect()
    }

    /// A new matrix with only the given rows, in the given order, and only
    /// the given columns.  A missing row or column is a data error.
    pub fn slice(&self, row_keys: &[DfKey], columns: &[ReplicateColumn])
        -> Result<ExpressionMatrix, MatrixError>
    {
        let column_positions = self.column_positions(columns)?;

        let mut rows = vec![];

        for df_key in row_keys {
            let Some(row_values) = self.row(df_key)
            else {
                return Err(malformed(format!("no such row: {}", df_key)));
            };

            let selected: Vec<f64> =
                column_positions.iter().map(|&pos| row_values[pos]).collect();
            rows.push((df_key.clone(), selected));
        }

        ExpressionMatrix::from_rows(columns.to_vec(), rows)
    }

    /// Collapse replicate columns: each (group name, member columns) entry
    /// becomes one output column holding the row-wise mean of its members.
    pub fn averaged_by_group(&self,
                             groups: &[(ConditionName, Vec<ReplicateColumn>)])
        -> Result<ExpressionMatrix, MatrixError>
    {
        let group_positions: Vec<(ConditionName, Vec<usize>)> =
            groups.iter()
            .map(|(group_name, member_columns)| {
                Ok((group_name.clone(), self.column_positions(member_columns)?))
            })
            .collect::<Result<_, MatrixError>>()?;

        let group_names: Vec<ConditionName> =
            group_positions.iter().map(|(name, _)| name.clone()).collect();

        let rows: Vec<(DfKey, Vec<f64>)> =
            self.row_index.iter()
            .map(|(df_key, &row_position)| {
                let row_values = &self.values[row_position];
                let averaged: Vec<f64> =
                    group_positions.iter()
                    .map(|(_, positions)| {
                        let members: Vec<f64> =
                            positions.iter().map(|&pos| row_values[pos]).collect();
                        row_mean(&members)
                    })
                    .collect();
                (df_key.clone(), averaged)
            })
            .collect();

        ExpressionMatrix::from_rows(group_names, rows)
    }
}

fn parse_value(field: &str) -> Result<f64, MatrixError> {
    let field = field.trim();

    if field.is_empty() || field == "NA" || field == "NaN" {
        return Ok(f64::NAN);
    }

    field.parse().map_err(|_| malformed(format!("not a number: {}", field)))
}

/// Parse tab-separated matrix text: first row is the header, first column is
/// consumed as the row index.
pub fn parse_matrix(text: &str) -> Result<ExpressionMatrix, MatrixError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .delimiter(b'\t')
        .flexible(false)
        .from_reader(text.as_bytes());

    let headers = csv_reader.headers()
        .map_err(|err| malformed(err))?
        .clone();

    if headers.len() < 2 {
        return Err(malformed("no condition columns after the index column"));
    }

    let columns: Vec<ReplicateColumn> =
        headers.iter().skip(1).map(|header| header.to_shared_str()).collect();

    let mut rows = vec![];

    for record in csv_reader.records() {
        let record = record.map_err(|err| malformed(err))?;

        let Some(df_key) = record.get(0)
        else {
            return Err(malformed("record with no index value"));
        };

        let row_values: Vec<f64> =
            record.iter().skip(1)
            .map(parse_value)
            .collect::<Result<_, _>>()?;

        rows.push((df_key.to_shared_str(), row_values));
    }

    ExpressionMatrix::from_rows(columns, rows)
}

/// Fetches expression matrices from the opaque byte store: a path under the
/// local data directory, or an "s3://bucket/key" locator resolved against
/// the configured object-store HTTP gateway.
pub struct MatrixLoader {
    data_dir: String,
    object_store_url: Option<String>,
    client: reqwest::Client,
}

impl MatrixLoader {
    pub fn new(data_dir: &str, object_store_url: Option<&str>) -> MatrixLoader {
        MatrixLoader {
            data_dir: data_dir.to_owned(),
            object_store_url: object_store_url.map(|url| url.to_owned()),
            client: reqwest::Client::new(),
        }
    }

    pub async fn load(&self, source_ref: &str) -> Result<ExpressionMatrix, MatrixError> {
        let text =
            if source_ref.to_lowercase().starts_with("s3://") {
                self.fetch_remote(source_ref).await?
            } else {
                self.read_local(source_ref)?
            };

        parse_matrix(&text)
    }

    async fn fetch_remote(&self, source_ref: &str) -> Result<String, MatrixError> {
        let Some(ref gateway) = self.object_store_url
        else {
            return Err(source_unavailable(source_ref, "no object store gateway configured"));
        };

        let Some((bucket, key)) = source_ref[5..].split_once('/')
        else {
            return Err(source_unavailable(source_ref, "locator has no key part"));
        };

        let url = format!("{}/{}/{}", gateway, bucket, key);

        let response = self.client.get(&url).send().await
            .map_err(|err| source_unavailable(source_ref, err))?;

        if !response.status().is_success() {
            return Err(source_unavailable(source_ref,
                                          format!("gateway returned {}", response.status())));
        }

        response.text().await
            .map_err(|err| source_unavailable(source_ref, err))
    }

    fn read_local(&self, source_ref: &str) -> Result<String, MatrixError> {
        let full_path = format!("{}/{}", self.data_dir, source_ref);

        let file = File::open(&full_path)
            .map_err(|err| source_unavailable(source_ref, err))?;

        let mut text = String::new();

        if source_ref.ends_with(".gz") {
            GzDecoder::new(file).read_to_string(&mut text)
                .map_err(|err| source_unavailable(source_ref, err))?;
        } else {
            let mut file = file;
            file.read_to_string(&mut text)
                .map_err(|err| source_unavailable(source_ref, err))?;
        }

        Ok(text)
    }
}
