//! Delimited text reading and writing for count matrices, sample sheets, and results
//!
//! Tab and comma separated files are both accepted; the delimiter is taken
//! from the header line.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use csv::{ReaderBuilder, StringRecord, Trim, WriterBuilder};
use ndarray::Array2;

use super::results::DeResults;
use crate::data::{CountMatrix, SampleSheet};
use crate::error::{DeError, Result};

/// Tab if the header line has one, comma otherwise
fn detect_delimiter(path: &Path) -> Result<u8> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut header = String::new();
    reader.read_line(&mut header)?;
    if header.trim().is_empty() {
        return Err(DeError::malformed(format!("{} is empty", path.display())));
    }
    Ok(if header.contains('\t') { b'\t' } else { b',' })
}

fn open_reader(path: &Path) -> Result<csv::Reader<File>> {
    let delimiter = detect_delimiter(path)?;
    let reader = ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .trim(Trim::All)
        .from_path(path)?;
    Ok(reader)
}

fn line_of(record: &StringRecord) -> u64 {
    record.position().map(|p| p.line()).unwrap_or(0)
}

/// Read a sample sheet: first column sample ids, group labels from
/// `group_column` (the second column when `None`)
pub fn read_sample_sheet<P: AsRef<Path>>(path: P, group_column: Option<&str>) -> Result<SampleSheet> {
    let path = path.as_ref();
    let mut reader = open_reader(path)?;
    let headers = reader.headers()?.clone();

    let group_idx = match group_column {
        Some(name) => headers.iter().position(|h| h == name).ok_or_else(|| {
            DeError::malformed(format!(
                "column '{}' not found in sample sheet {}",
                name,
                path.display()
            ))
        })?,
        None => 1,
    };
    if group_idx == 0 || group_idx >= headers.len() {
        return Err(DeError::malformed(format!(
            "sample sheet {} needs a sample id column and a group column",
            path.display()
        )));
    }

    let mut sample_ids = Vec::new();
    let mut groups = Vec::new();
    for record in reader.records() {
        let record = record?;
        if record.iter().all(|field| field.is_empty()) {
            continue;
        }
        let (Some(sample), Some(group)) = (record.get(0), record.get(group_idx)) else {
            return Err(DeError::malformed(format!(
                "line {} of {} has too few columns",
                line_of(&record),
                path.display()
            )));
        };
        sample_ids.push(sample.to_string());
        groups.push(group.to_string());
    }

    if sample_ids.is_empty() {
        return Err(DeError::malformed(format!(
            "no samples found in {}",
            path.display()
        )));
    }

    log::debug!("Read {} samples from {}", sample_ids.len(), path.display());
    SampleSheet::new(sample_ids, groups)
}

/// Read a count matrix: first column gene ids, header row of sample ids.
///
/// The sample sheet may list samples in any order; it is reordered to the
/// column order of the matrix. Every column must appear in the sheet.
pub fn read_count_matrix<P: AsRef<Path>>(path: P, samples: &SampleSheet) -> Result<CountMatrix> {
    let path = path.as_ref();
    let mut reader = open_reader(path)?;
    let headers = reader.headers()?.clone();
    if headers.len() < 2 {
        return Err(DeError::malformed(format!(
            "count matrix {} has no sample columns",
            path.display()
        )));
    }

    let sample_order: Vec<String> = headers.iter().skip(1).map(str::to_string).collect();
    let samples = samples.reordered(&sample_order)?;
    let n_samples = sample_order.len();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        if record.iter().all(|field| field.is_empty()) {
            continue;
        }
        if record.len() != n_samples + 1 {
            return Err(DeError::malformed(format!(
                "line {} of {} has {} columns, expected {}",
                line_of(&record),
                path.display(),
                record.len(),
                n_samples + 1
            )));
        }

        let gene_id = record[0].to_string();
        let counts = record
            .iter()
            .skip(1)
            .map(|field| {
                field.parse::<f64>().map_err(|_| {
                    DeError::malformed(format!(
                        "invalid count '{}' for gene '{}' on line {}",
                        field,
                        gene_id,
                        line_of(&record)
                    ))
                })
            })
            .collect::<Result<Vec<f64>>>()?;
        rows.push((gene_id, counts));
    }

    if rows.is_empty() {
        return Err(DeError::malformed(format!(
            "no genes found in {}",
            path.display()
        )));
    }

    log::debug!(
        "Read {} genes x {} samples from {}",
        rows.len(),
        n_samples,
        path.display()
    );
    CountMatrix::from_rows(rows, samples)
}

fn fmt_opt(value: Option<f64>, scientific: bool) -> String {
    match value {
        Some(v) if v.is_finite() => {
            if scientific {
                format!("{:.6e}", v)
            } else {
                format!("{:.6}", v)
            }
        }
        _ => "NA".to_string(),
    }
}

/// Write the sorted results table as TSV; missing values are written as `NA`
pub fn write_results<P: AsRef<Path>>(path: P, results: &DeResults) -> Result<()> {
    let mut writer = WriterBuilder::new().delimiter(b'\t').from_path(path)?;

    writer.write_record([
        "gene_id",
        "baseMean",
        "log2FoldChange",
        "lfcSE",
        "stat",
        "pvalue",
        "padj",
        "dispersion",
        "significant",
        "status",
    ])?;

    for row in &results.rows {
        writer.write_record([
            row.gene_id.clone(),
            fmt_opt(Some(row.base_mean), false),
            fmt_opt(row.log2_fold_change, false),
            fmt_opt(row.lfc_se, false),
            fmt_opt(row.stat, false),
            fmt_opt(row.pvalue, true),
            fmt_opt(Some(row.padj), true),
            fmt_opt(row.dispersion, true),
            row.significant.to_string(),
            row.status.to_string(),
        ])?;
    }

    writer.flush()?;
    Ok(())
}

/// Write a normalized count matrix as TSV, genes in rows
pub fn write_normalized_counts<P: AsRef<Path>>(
    path: P,
    gene_ids: &[String],
    sample_ids: &[String],
    normalized: &Array2<f64>,
) -> Result<()> {
    let mut writer = WriterBuilder::new().delimiter(b'\t').from_path(path)?;

    let mut header = Vec::with_capacity(sample_ids.len() + 1);
    header.push("gene_id".to_string());
    header.extend(sample_ids.iter().cloned());
    writer.write_record(&header)?;

    for (gene_id, row) in gene_ids.iter().zip(normalized.rows()) {
        let mut record = Vec::with_capacity(row.len() + 1);
        record.push(gene_id.clone());
        record.extend(row.iter().map(|v| format!("{:.4}", v)));
        writer.write_record(&record)?;
    }

    writer.flush()?;
    Ok(())
}
