//! Persisted index snapshot: fitted vectorizer, item rows, vector rows.
//!
//! The trainer writes three artifacts into one directory; the serving
//! process loads them instead of fitting against the database at startup.
//! Row `i` of `vectors.jsonl` belongs to row `i` of `items.jsonl`, and every
//! load re-validates that pairing before the snapshot is trusted. Anything
//! structurally off means "rebuild from the store", never a half-loaded
//! index.

use std::fmt;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::catalog::CatalogItem;
use crate::vectorizer::VectorizerState;

/// Fitted vectorizer state artifact.
pub const VECTORIZER_FILE: &str = "vectorizer.json";
/// Item attribute rows artifact, one JSON object per line.
pub const ITEMS_FILE: &str = "items.jsonl";
/// Vector rows artifact, one JSON object per line.
pub const VECTORS_FILE: &str = "vectors.jsonl";

/// One persisted vector row. The id doubles as the row-correspondence check
/// against the items artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRecord {
    /// Product the vector belongs to.
    pub id: i64,
    /// Feature values over the persisted vocabulary.
    pub values: Vec<f64>,
}

/// A parsed and validated snapshot, ready to back a catalog index.
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Fitted vectorizer state.
    pub vectorizer: VectorizerState,
    /// Item attributes in row order.
    pub items: Vec<CatalogItem>,
    /// Feature vectors, row i belonging to `items[i]`.
    pub vectors: Vec<Vec<f64>>,
}

/// Why a snapshot could not be used.
#[derive(Debug)]
pub enum SnapshotError {
    /// No complete snapshot at the directory; callers fall back to a fresh
    /// build without logging more than a note.
    Missing(PathBuf),
    /// Artifacts exist but failed parsing or structural validation.
    Invalid(String),
    /// Underlying filesystem failure.
    Io(std::io::Error),
}

impl fmt::Display for SnapshotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotError::Missing(dir) => {
                write!(f, "no snapshot at {}", dir.display())
            }
            SnapshotError::Invalid(reason) => write!(f, "invalid snapshot: {reason}"),
            SnapshotError::Io(err) => write!(f, "snapshot io error: {err}"),
        }
    }
}

impl std::error::Error for SnapshotError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SnapshotError::Io(err) => Some(err),
            _ => None,
        }
    }
}

/// Loads and validates the snapshot in `dir`.
pub fn load(dir: &Path) -> Result<Snapshot, SnapshotError> {
    let vectorizer_path = dir.join(VECTORIZER_FILE);
    let items_path = dir.join(ITEMS_FILE);
    let vectors_path = dir.join(VECTORS_FILE);
    if !vectorizer_path.is_file() || !items_path.is_file() || !vectors_path.is_file() {
        return Err(SnapshotError::Missing(dir.to_path_buf()));
    }

    let vectorizer_file = File::open(&vectorizer_path).map_err(SnapshotError::Io)?;
    let vectorizer: VectorizerState = serde_json::from_reader(BufReader::new(vectorizer_file))
        .map_err(|err| SnapshotError::Invalid(format!("{VECTORIZER_FILE}: {err}")))?;
    let items: Vec<CatalogItem> = read_jsonl(&items_path, ITEMS_FILE)?;
    let records: Vec<VectorRecord> = read_jsonl(&vectors_path, VECTORS_FILE)?;

    validate(&vectorizer, &items, &records)?;
    let vectors = records.into_iter().map(|record| record.values).collect();
    Ok(Snapshot {
        vectorizer,
        items,
        vectors,
    })
}

/// Writes the three artifacts into `dir`, creating it when needed.
pub fn save(
    dir: &Path,
    vectorizer: &VectorizerState,
    items: &[CatalogItem],
    vectors: &[Vec<f64>],
) -> Result<()> {
    anyhow::ensure!(
        items.len() == vectors.len(),
        "item count {} does not match vector count {}",
        items.len(),
        vectors.len()
    );
    fs::create_dir_all(dir)
        .with_context(|| format!("failed to create snapshot directory {}", dir.display()))?;

    let vectorizer_path = dir.join(VECTORIZER_FILE);
    let file = File::create(&vectorizer_path)
        .with_context(|| format!("failed to create {}", vectorizer_path.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(file), vectorizer)
        .with_context(|| format!("failed to write {}", vectorizer_path.display()))?;

    write_jsonl(&dir.join(ITEMS_FILE), items.iter())?;
    let records: Vec<VectorRecord> = items
        .iter()
        .zip(vectors)
        .map(|(item, values)| VectorRecord {
            id: item.id,
            values: values.clone(),
        })
        .collect();
    write_jsonl(&dir.join(VECTORS_FILE), records.iter())?;
    Ok(())
}

fn validate(
    vectorizer: &VectorizerState,
    items: &[CatalogItem],
    records: &[VectorRecord],
) -> Result<(), SnapshotError> {
    if vectorizer.vocabulary.is_empty() {
        return Err(SnapshotError::Invalid(
            "vectorizer vocabulary is empty".to_string(),
        ));
    }
    if vectorizer.idf.len() != vectorizer.vocabulary.len() {
        return Err(SnapshotError::Invalid(format!(
            "idf length {} does not match vocabulary length {}",
            vectorizer.idf.len(),
            vectorizer.vocabulary.len()
        )));
    }
    if items.len() != records.len() {
        return Err(SnapshotError::Invalid(format!(
            "{} items but {} vectors",
            items.len(),
            records.len()
        )));
    }
    let dimension = vectorizer.vocabulary.len();
    for (row, (item, record)) in items.iter().zip(records).enumerate() {
        if item.id != record.id {
            return Err(SnapshotError::Invalid(format!(
                "row {row}: item id {} does not match vector id {}",
                item.id, record.id
            )));
        }
        if record.values.len() != dimension {
            return Err(SnapshotError::Invalid(format!(
                "row {row}: vector length {} does not match vocabulary length {dimension}",
                record.values.len()
            )));
        }
    }
    Ok(())
}

fn read_jsonl<T: DeserializeOwned>(path: &Path, label: &str) -> Result<Vec<T>, SnapshotError> {
    let file = File::open(path).map_err(SnapshotError::Io)?;
    let reader = BufReader::new(file);
    let mut records = Vec::new();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line.map_err(SnapshotError::Io)?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line).map_err(|err| {
            SnapshotError::Invalid(format!("{label} line {}: {err}", line_no + 1))
        })?;
        records.push(record);
    }
    Ok(records)
}

fn write_jsonl<T: Serialize>(path: &Path, records: impl Iterator<Item = T>) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    for record in records {
        serde_json::to_writer(&mut writer, &record)
            .with_context(|| format!("failed to write record to {}", path.display()))?;
        writer.write_all(b"\n")?;
    }
    writer
        .flush()
        .with_context(|| format!("failed to flush {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::vectorizer::TfidfVectorizer;

    fn sample_items() -> Vec<CatalogItem> {
        vec![
            CatalogItem {
                id: 1,
                name: "Synthetic Engine Oil".to_string(),
                description: "High performance oil".to_string(),
                price: 35.0,
                shop_id: 1,
                shop_name: "AutoParts Zone".to_string(),
                image_url: None,
            },
            CatalogItem {
                id: 2,
                name: "Oil Filter".to_string(),
                description: "Premium filter".to_string(),
                price: 4.5,
                shop_id: 1,
                shop_name: "AutoParts Zone".to_string(),
                image_url: Some("https://example.test/filter.jpg".to_string()),
            },
        ]
    }

    fn fitted_state_and_vectors(items: &[CatalogItem]) -> (VectorizerState, Vec<Vec<f64>>) {
        let corpus: Vec<String> = items.iter().map(CatalogItem::content).collect();
        let mut vectorizer = TfidfVectorizer::default();
        let vectors = vectorizer.fit_transform(&corpus).unwrap();
        (vectorizer.state(), vectors)
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let items = sample_items();
        let (state, vectors) = fitted_state_and_vectors(&items);
        save(dir.path(), &state, &items, &vectors).unwrap();

        let snapshot = load(dir.path()).unwrap();
        assert_eq!(snapshot.items, items);
        assert_eq!(snapshot.vectors, vectors);
        assert_eq!(snapshot.vectorizer.vocabulary, state.vocabulary);
    }

    #[test]
    fn empty_directory_reports_missing() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load(dir.path()),
            Err(SnapshotError::Missing(_))
        ));
    }

    #[test]
    fn partial_artifacts_report_missing() {
        let dir = tempfile::tempdir().unwrap();
        let items = sample_items();
        let (state, vectors) = fitted_state_and_vectors(&items);
        save(dir.path(), &state, &items, &vectors).unwrap();
        fs::remove_file(dir.path().join(VECTORS_FILE)).unwrap();

        assert!(matches!(
            load(dir.path()),
            Err(SnapshotError::Missing(_))
        ));
    }

    #[test]
    fn row_count_mismatch_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let items = sample_items();
        let (state, vectors) = fitted_state_and_vectors(&items);
        save(dir.path(), &state, &items, &vectors).unwrap();

        // Drop the second vector line.
        let path = dir.path().join(VECTORS_FILE);
        let contents = fs::read_to_string(&path).unwrap();
        let first_line = contents.lines().next().unwrap().to_string();
        fs::write(&path, format!("{first_line}\n")).unwrap();

        assert!(matches!(load(dir.path()), Err(SnapshotError::Invalid(_))));
    }

    #[test]
    fn vector_id_mismatch_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let items = sample_items();
        let (state, vectors) = fitted_state_and_vectors(&items);
        save(dir.path(), &state, &items, &vectors).unwrap();

        let path = dir.path().join(VECTORS_FILE);
        let contents = fs::read_to_string(&path).unwrap();
        let swapped: Vec<String> = contents.lines().rev().map(ToString::to_string).collect();
        fs::write(&path, swapped.join("\n")).unwrap();

        assert!(matches!(load(dir.path()), Err(SnapshotError::Invalid(_))));
    }

    #[test]
    fn wrong_vector_length_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let items = sample_items();
        let (state, vectors) = fitted_state_and_vectors(&items);
        let mut truncated = vectors.clone();
        truncated[0].pop();
        save(dir.path(), &state, &items, &truncated).unwrap();

        assert!(matches!(load(dir.path()), Err(SnapshotError::Invalid(_))));
    }

    #[test]
    fn garbage_artifact_is_invalid_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let items = sample_items();
        let (state, vectors) = fitted_state_and_vectors(&items);
        save(dir.path(), &state, &items, &vectors).unwrap();
        fs::write(dir.path().join(ITEMS_FILE), "not json\n").unwrap();

        assert!(matches!(load(dir.path()), Err(SnapshotError::Invalid(_))));
    }
}
