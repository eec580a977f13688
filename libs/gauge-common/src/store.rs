//! Evaluation Record Store: problem id → per-judge verdict lists.
//!
//! Records are kept in a `BTreeMap` so every listing, and therefore every
//! persisted file, is ordered by problem id.

use crate::error::{GaugeError, Result};
use crate::types::CandidateIndex;
use crate::verdict::Verdict;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

/// Verdicts of every judge for one problem, one verdict per candidate in
/// generation order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRecord {
    pub id: String,
    #[serde(flatten)]
    pub judges: BTreeMap<String, Vec<Verdict>>,
}

impl EvaluationRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            judges: BTreeMap::new(),
        }
    }

    pub fn verdicts(&self, judge_name: &str) -> Option<&[Verdict]> {
        self.judges.get(judge_name).map(Vec::as_slice)
    }
}

fn default_verdicts(num_candidates: usize) -> Vec<Verdict> {
    vec![Verdict::FailedSubmission; num_candidates]
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvaluationStore {
    records: BTreeMap<String, EvaluationRecord>,
}

impl EvaluationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: Vec<EvaluationRecord>) -> Result<Self> {
        let mut by_id = BTreeMap::new();
        for record in records {
            let id = record.id.clone();
            if by_id.insert(id.clone(), record).is_some() {
                return Err(GaugeError::schema(id, "duplicated id in evaluation output"));
            }
        }
        Ok(Self { records: by_id })
    }

    pub fn get(&self, id: &str) -> Option<&EvaluationRecord> {
        self.records.get(id)
    }

    /// Records sorted by problem id
    pub fn records(&self) -> impl Iterator<Item = &EvaluationRecord> {
        self.records.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Bring the store in line with the candidates about to be judged.
    ///
    /// Missing records and missing judge keys are created with every verdict
    /// set to `failed submission`. Existing verdict lists must hold exactly
    /// one verdict per candidate; records without candidates are orphans.
    pub fn initialize_or_validate(
        mut self,
        judge_name: &str,
        candidates: &CandidateIndex,
    ) -> Result<Self> {
        for id in self.records.keys() {
            if !candidates.contains_key(id) {
                return Err(GaugeError::schema(id, "evaluation record has no candidate solutions"));
            }
        }

        for (id, &num_candidates) in candidates {
            let record = self
                .records
                .entry(id.clone())
                .or_insert_with(|| EvaluationRecord::new(id.clone()));

            match record.judges.get(judge_name) {
                None => {
                    debug!(problem_id = %id, judge = judge_name, "Initializing verdicts");
                    record
                        .judges
                        .insert(judge_name.to_string(), default_verdicts(num_candidates));
                }
                Some(verdicts) if verdicts.len() != num_candidates => {
                    return Err(GaugeError::schema(
                        id,
                        format!(
                            "judge `{}` has {} verdicts for {} candidate solutions",
                            judge_name,
                            verdicts.len(),
                            num_candidates
                        ),
                    ));
                }
                Some(_) => {}
            }
        }

        Ok(self)
    }

    /// Key set must equal the candidates' problem ids, and every judge key
    /// must hold one verdict per candidate.
    pub fn ensure_aligned(&self, candidates: &CandidateIndex) -> Result<()> {
        let store_ids: BTreeSet<&String> = self.records.keys().collect();
        let candidate_ids: BTreeSet<&String> = candidates.keys().collect();

        if let Some(orphan) = store_ids.difference(&candidate_ids).next() {
            return Err(GaugeError::schema(*orphan, "evaluation record has no candidate solutions"));
        }
        if let Some(missing) = candidate_ids.difference(&store_ids).next() {
            return Err(GaugeError::schema(*missing, "candidate solutions have no evaluation record"));
        }

        for record in self.records.values() {
            let expected = candidates[&record.id];
            for (judge_name, verdicts) in &record.judges {
                if verdicts.len() != expected {
                    return Err(GaugeError::schema(
                        &record.id,
                        format!(
                            "judge `{}` has {} verdicts for {} candidate solutions",
                            judge_name,
                            verdicts.len(),
                            expected
                        ),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Replace the `judge_name` verdicts of record `id`, leaving every other
    /// judge key untouched.
    pub fn merge(&mut self, id: &str, judge_name: &str, verdicts: Vec<Verdict>) {
        self.records
            .entry(id.to_string())
            .or_insert_with(|| EvaluationRecord::new(id))
            .judges
            .insert(judge_name.to_string(), verdicts);
    }

    pub fn view(&self) -> StoreView<'_> {
        StoreView {
            records: self.records.values().collect(),
        }
    }

    pub fn into_records(self) -> Vec<EvaluationRecord> {
        self.records.into_values().collect()
    }
}

/// Borrowed, possibly filtered or resampled listing of records.
///
/// A resampled view is a multiset: the same record may appear several times.
#[derive(Debug, Clone)]
pub struct StoreView<'a> {
    records: Vec<&'a EvaluationRecord>,
}

impl<'a> StoreView<'a> {
    pub fn records(&self) -> &[&'a EvaluationRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records whose id is in `ids_to_keep`. An empty result is an error: a
    /// silent empty bucket would corrupt every average built on top of it.
    pub fn filter<S: AsRef<str>>(&self, bucket_id: &str, ids_to_keep: &[S]) -> Result<StoreView<'a>> {
        let keep: BTreeSet<&str> = ids_to_keep.iter().map(AsRef::as_ref).collect();
        let records: Vec<_> = self
            .records
            .iter()
            .copied()
            .filter(|record| keep.contains(record.id.as_str()))
            .collect();

        if records.is_empty() {
            return Err(GaugeError::EmptyBucket {
                bucket_id: bucket_id.to_string(),
            });
        }
        Ok(StoreView { records })
    }

    /// Bootstrap resample: `len()` draws with replacement, `seed` being the
    /// only source of randomness. Draws come from ChaCha8, whose stream for a
    /// seed is fixed across rand releases; cached bootstrap scores rely on it.
    pub fn resample(&self, seed: u64) -> StoreView<'a> {
        let n = self.records.len();
        if n == 1 {
            info!("Bootstrapping is enabled but the evaluation output contains only one problem.");
        }
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let records = (0..n)
            .map(|_| self.records[rng.gen_range(0..n)])
            .collect();
        StoreView { records }
    }
}
