//! Experiment directory layout and file formats.
//!
//! Defines only where artifacts live and how they are encoded, so the
//! evaluation run and the metrics run never drift apart:
//! - `evaluation_output.jsonl`: one record per line, sorted by id
//! - `results.json`: metric id → `{alias, score, bootstrap_runs_scores?}`
//! - `{buckets_dir}/{bucketing_id}.json`: bucket id → problem ids
//!
//! Every write goes through a temporary file in the target directory and is
//! renamed into place.

use crate::buckets::BucketingData;
use crate::error::{GaugeError, Result};
use crate::results::Results;
use crate::store::{EvaluationRecord, EvaluationStore};
use crate::types::{Prediction, Problem, ProblemSet};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{error, info};

pub const EVALUATION_OUTPUT_FILE: &str = "evaluation_output.jsonl";
pub const RESULTS_FILE: &str = "results.json";

pub fn evaluation_output_path(exp_dir: &Path) -> PathBuf {
    exp_dir.join(EVALUATION_OUTPUT_FILE)
}

pub fn results_path(exp_dir: &Path) -> PathBuf {
    exp_dir.join(RESULTS_FILE)
}

pub fn bucketing_data_path(buckets_dir: &Path, bucketing_id: &str) -> PathBuf {
    buckets_dir.join(format!("{}.json", bucketing_id))
}

fn write_atomically<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut BufWriter<&mut NamedTempFile>) -> Result<()>,
{
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    {
        let mut writer = BufWriter::new(&mut tmp);
        write(&mut writer)?;
        writer.flush()?;
    }
    tmp.persist(path).map_err(|e| GaugeError::Io(e.error))?;
    Ok(())
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    write_atomically(path, |writer| {
        serde_json::to_writer(&mut *writer, value)?;
        Ok(())
    })
}

fn line_id(value: &Value, path: &Path, line_no: usize) -> Result<String> {
    value
        .get("id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            GaugeError::schema(
                format!("{}:{}", path.display(), line_no + 1),
                "line has no string `id`",
            )
        })
}

/// Read the evaluation output of an experiment; a missing file is an empty store.
pub fn read_evaluation_output(exp_dir: &Path) -> Result<EvaluationStore> {
    let path = evaluation_output_path(exp_dir);
    if !path.is_file() {
        info!(path = %path.display(), "No evaluation output found, starting empty");
        return Ok(EvaluationStore::new());
    }

    let reader = BufReader::new(File::open(&path)?);
    let mut records = Vec::new();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let value: Value = serde_json::from_str(&line)?;
        let id = line_id(&value, &path, line_no)?;
        let record: EvaluationRecord =
            serde_json::from_value(value).map_err(|e| GaugeError::schema(&id, e.to_string()))?;
        records.push(record);
    }

    let store = EvaluationStore::from_records(records)?;
    info!(path = %path.display(), records = store.len(), "Loaded evaluation output");
    Ok(store)
}

pub fn write_evaluation_output(exp_dir: &Path, store: &EvaluationStore) -> Result<()> {
    let path = evaluation_output_path(exp_dir);
    write_atomically(&path, |writer| {
        for record in store.records() {
            serde_json::to_writer(&mut *writer, record)?;
            writer.write_all(b"\n")?;
        }
        Ok(())
    })?;
    info!(path = %path.display(), records = store.len(), "Wrote evaluation output");
    Ok(())
}

pub fn read_results(exp_dir: &Path) -> Result<Results> {
    let path = results_path(exp_dir);
    if !path.is_file() {
        return Ok(Results::new());
    }
    let reader = BufReader::new(File::open(&path)?);
    Ok(serde_json::from_reader(reader)?)
}

pub fn write_results(exp_dir: &Path, results: &Results) -> Result<()> {
    write_json(&results_path(exp_dir), results)
}

pub fn read_bucketing_data(buckets_dir: &Path, bucketing_id: &str) -> Result<BucketingData> {
    let path = bucketing_data_path(buckets_dir, bucketing_id);
    let file = File::open(&path).map_err(|e| {
        GaugeError::InvalidConfig(format!(
            "cannot open bucketing data `{}`: {}",
            path.display(),
            e
        ))
    })?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

pub fn write_bucketing_data(buckets_dir: &Path, bucketing_id: &str, data: &BucketingData) -> Result<()> {
    let path = bucketing_data_path(buckets_dir, bucketing_id);
    info!(
        datapoints = data.values().map(Vec::len).sum::<usize>(),
        buckets = data.len(),
        path = %path.display(),
        "Writing bucketing data"
    );
    write_json(&path, data)
}

/// Problems from a JSON-lines file
pub fn read_problems(path: &Path) -> Result<ProblemSet> {
    let reader = BufReader::new(File::open(path)?);
    let mut problems = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let problem: Problem = serde_json::from_str(&line)?;
        problems.push(problem);
    }
    info!(path = %path.display(), problems = problems.len(), "Loaded problems");
    ProblemSet::from_problems(problems)
}

/// Predictions from every `*.jsonl` file of a directory.
///
/// Distributed inference may emit the same id more than once; entries are
/// merged key by key and the last one read wins. Undecodable lines are
/// logged and skipped.
pub fn read_predictions(predictions_dir: &Path) -> Result<Vec<Prediction>> {
    let mut files: Vec<PathBuf> = fs::read_dir(predictions_dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().is_some_and(|ext| ext == "jsonl"))
        .collect();
    files.sort();

    let mut merged: BTreeMap<String, serde_json::Map<String, Value>> = BTreeMap::new();
    for path in &files {
        let reader = BufReader::new(File::open(path)?);
        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            let value: Value = match serde_json::from_str(&line) {
                Ok(value) => value,
                Err(e) => {
                    error!(path = %path.display(), line = line_no, error = %e, "Failed to decode line");
                    continue;
                }
            };
            let id = line_id(&value, path, line_no)?;
            if let Value::Object(fields) = value {
                merged.entry(id).or_default().extend(fields);
            }
        }
    }

    let predictions = merged
        .into_iter()
        .map(|(id, fields)| {
            serde_json::from_value(Value::Object(fields)).map_err(|e| GaugeError::schema(id, e.to_string()))
        })
        .collect::<Result<Vec<Prediction>>>()?;
    info!(
        dir = %predictions_dir.display(),
        files = files.len(),
        predictions = predictions.len(),
        "Loaded predictions"
    );
    Ok(predictions)
}
