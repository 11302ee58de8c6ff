use std::fs::File;
use std::io::{BufRead, BufReader};

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use indexmap::IndexMap;
use regex::Regex;

use flexstr::ToSharedStr;

use crate::data_types::Gene;
use crate::types::EnsemblId;

lazy_static! {
    static ref ATTRIBUTE_RE: Regex =
        Regex::new(r#"(\w+)\s+"([^"]*)""#).unwrap();
}

const GENE_FEATURE_TYPE: &str = "gene";

/// Parse a GTF-style annotation feed into gene records for the directory.
///
/// Only `gene` feature rows are read.  The attribute string (column 9) must
/// contain `gene_id` and `gene_name`; rows without both are skipped.  A
/// `gene_id` seen twice keeps the later record, matching the upsert
/// behaviour of the ingestion process.
pub fn parse_annotation_feed(reader: impl BufRead) -> Result<Vec<Gene>> {
    let mut genes: IndexMap<EnsemblId, Gene> = IndexMap::new();

    for (line_number, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("read failed at line {}", line_number + 1))?;

        if line.starts_with('#') || line.trim().is_empty() {
            continue;
        }

        let columns: Vec<&str> = line.split('\t').collect();

        if columns.len() < 9 {
            eprintln!("skipping line {}: expected 9 columns, got {}",
                      line_number + 1, columns.len());
            continue;
        }

        if columns[2] != GENE_FEATURE_TYPE {
            continue;
        }

        let mut gene_id = None;
        let mut gene_name = None;
        let mut long_name = None;

        for capture in ATTRIBUTE_RE.captures_iter(columns[8]) {
            let value = capture[2].to_shared_str();
            match &capture[1] {
                "gene_id" => gene_id = Some(value),
                "gene_name" => gene_name = Some(value),
                "gene_long_name" => long_name = Some(value),
                _ => (),
            }
        }

        let (Some(ensembl_id), Some(gene_name)) = (gene_id, gene_name)
        else {
            continue;
        };

        genes.insert(ensembl_id.clone(),
                     Gene {
                         ensembl_id,
                         gene_name,
                         long_name,
                     });
    }

    Ok(genes.into_values().collect())
}

/// Read an annotation feed from disk, decompressing when the file name ends
/// with ".gz".
pub fn read_annotation_file(file_name: &str) -> Result<Vec<Gene>> {
    let file = File::open(file_name)
        .with_context(|| format!("failed to open {}", file_name))?;

    if file_name.ends_with(".gz") {
        let decoder = GzDecoder::new(file);
        parse_annotation_feed(BufReader::new(decoder))
    } else {
        parse_annotation_feed(BufReader::new(file))
    }
}
