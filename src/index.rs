//! In-memory signature store with a bucketed inverted index.
//!
//! The index is a plain data structure with no internal locking. Queries
//! only read the index and keep their scores in per-call maps, so shared
//! references may be queried from several threads, but any mutation
//! (insert, remove, reset, load) needs exclusive access. Callers that index
//! and search concurrently must serialize through their own lock.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use log::{debug, warn};
use serde::Serialize;

use crate::error::Result;
use crate::haar::NUM_PIXELS2;
use crate::heap::BoundedHeap;
use crate::signature::{decode, Signature, NUM_COEFS};
use crate::weights::{weight, SketchMode, WeightBins, CHANNELS};

pub(crate) const NUM_BUCKETS: usize = CHANNELS * 2 * NUM_PIXELS2;

/// Owned, mutable subset of the store consumed by threshold queries.
pub type WorkingSet = BTreeMap<i64, Signature>;

/// A ranked query result. Lower scores are more similar.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Match {
    pub id: i64,
    pub score: f64,
}

impl PartialEq for Match {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Match {}

impl Ord for Match {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then(self.id.cmp(&other.id))
    }
}

impl PartialOrd for Match {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[inline]
pub(crate) fn bucket_slot(channel: usize, sign: usize, position: usize) -> usize {
    (channel * 2 + sign) * NUM_PIXELS2 + position
}

fn average_score(mode: SketchMode, a: &[f64; CHANNELS], b: &[f64; CHANNELS]) -> f64 {
    (0..CHANNELS)
        .map(|c| weight(mode, 0, c) * (a[c] - b[c]).abs())
        .sum()
}

#[derive(Debug, Clone)]
pub struct SimilarityIndex {
    pub(crate) sigs: HashMap<i64, Signature>,
    pub(crate) buckets: Vec<Vec<i64>>,
    // id -> the bucket slots it occupies, so removal touches only those
    memberships: HashMap<i64, Vec<usize>>,
    bins: WeightBins,
}

impl SimilarityIndex {
    pub fn new() -> SimilarityIndex {
        SimilarityIndex {
            sigs: HashMap::new(),
            buckets: vec![Vec::new(); NUM_BUCKETS],
            memberships: HashMap::new(),
            bins: WeightBins::new(),
        }
    }

    /// Rebuild an index from persisted parts, trusting the bucket contents.
    pub(crate) fn from_parts(buckets: Vec<Vec<i64>>, sigs: HashMap<i64, Signature>) -> SimilarityIndex {
        let mut memberships: HashMap<i64, Vec<usize>> = HashMap::with_capacity(sigs.len());
        for (slot, bucket) in buckets.iter().enumerate() {
            for id in bucket {
                memberships.entry(*id).or_default().push(slot);
            }
        }
        SimilarityIndex {
            sigs,
            buckets,
            memberships,
            bins: WeightBins::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.sigs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sigs.is_empty()
    }

    pub fn contains(&self, id: i64) -> bool {
        self.sigs.contains_key(&id)
    }

    pub fn get(&self, id: i64) -> Option<&Signature> {
        self.sigs.get(&id)
    }

    pub fn ids(&self) -> impl Iterator<Item = i64> + '_ {
        self.sigs.keys().copied()
    }

    /// An owned copy of the whole store, for threshold queries and
    /// clustering.
    pub fn signatures(&self) -> WorkingSet {
        self.sigs.iter().map(|(id, sig)| (*id, sig.clone())).collect()
    }

    /// Ids in the bucket for `(channel, sign, position)`.
    pub fn bucket(&self, channel: usize, sign: usize, position: usize) -> &[i64] {
        &self.buckets[bucket_slot(channel, sign, position)]
    }

    /// Add `sig` under `sig.id`, replacing any signature already stored
    /// under that id. Signatures with out-of-plane coefficients are
    /// rejected before the index is touched.
    pub fn insert(&mut self, sig: Signature) -> Result<()> {
        sig.validate()?;
        let id = sig.id;
        if self.sigs.contains_key(&id) {
            warn!("Signature collision on id {}, replacing", id);
            self.unlink(id);
        }

        let mut slots = Vec::with_capacity(CHANNELS * NUM_COEFS);
        for (c, sign, position) in sig.bucket_keys() {
            let slot = bucket_slot(c, sign, position);
            self.buckets[slot].push(id);
            slots.push(slot);
        }
        self.memberships.insert(id, slots);
        self.sigs.insert(id, sig);
        Ok(())
    }

    /// Drop `id` from the store and every bucket. Returns whether it was
    /// present.
    pub fn remove(&mut self, id: i64) -> bool {
        if self.sigs.remove(&id).is_none() {
            debug!("Remove of unknown id {}", id);
            return false;
        }
        self.unlink(id);
        true
    }

    fn unlink(&mut self, id: i64) {
        let slots = match self.memberships.remove(&id) {
            Some(slots) => slots,
            None => return,
        };
        for slot in slots {
            let bucket = &mut self.buckets[slot];
            if let Some(pos) = bucket.iter().rposition(|&other| other == id) {
                bucket.remove(pos);
            }
        }
    }

    pub fn reset(&mut self) {
        self.sigs.clear();
        self.memberships.clear();
        for bucket in self.buckets.iter_mut() {
            bucket.clear();
        }
    }

    /// Subtract the weight of every coefficient shared with `query` from the
    /// scores of ids already present in `scores`.
    fn score_coefficients(&self, query: &Signature, mode: SketchMode, scores: &mut HashMap<i64, f64>) {
        for (c, sign, position) in query.bucket_keys() {
            let w = weight(mode, self.bins.classify(position), c);
            for id in self.bucket(c, sign, position) {
                if let Some(score) = scores.get_mut(id) {
                    *score -= w;
                }
            }
        }
    }

    fn score_all(&self, query: &Signature, mode: SketchMode) -> HashMap<i64, f64> {
        let mut scores: HashMap<i64, f64> = self
            .sigs
            .iter()
            .map(|(id, sig)| (*id, average_score(mode, &sig.avg, &query.avg)))
            .collect();
        self.score_coefficients(query, mode, &mut scores);
        scores
    }

    /// The `max_results` stored signatures most similar to `query`.
    ///
    /// Results come back sorted by ascending score. The order of entries
    /// with equal scores is unspecified.
    pub fn query(&self, query: &Signature, max_results: usize, mode: SketchMode) -> Vec<Match> {
        let mut heap = BoundedHeap::with_capacity(max_results);
        for (id, score) in self.score_all(query, mode) {
            heap.offer(Match { id, score });
        }
        heap.into_sorted_vec()
    }

    /// Every stored signature whose score against `query` lies in
    /// `min..=max`, sorted by ascending score. Setting `min` above the
    /// self-match score skips exact duplicates.
    pub fn query_in_range(&self, query: &Signature, min: f64, max: f64, mode: SketchMode) -> Vec<Match> {
        let mut hits: Vec<Match> = self
            .score_all(query, mode)
            .into_iter()
            .filter(|&(_, score)| score >= min && score <= max)
            .map(|(id, score)| Match { id, score })
            .collect();
        hits.sort();
        hits
    }

    /// Like [`query`](Self::query), using the signature stored under `id`.
    /// Unknown ids yield no results.
    pub fn query_by_id(&self, id: i64, max_results: usize, mode: SketchMode) -> Vec<Match> {
        match self.sigs.get(&id) {
            Some(sig) => self.query(sig, max_results, mode),
            None => {
                debug!("Query by unknown id {}", id);
                Vec::new()
            }
        }
    }

    /// Remove from `working` and return every id scoring below `threshold`
    /// against `query`, most similar first.
    pub fn query_by_threshold(
        &self,
        working: &mut WorkingSet,
        query: &Signature,
        threshold: f64,
        mode: SketchMode,
    ) -> Vec<i64> {
        let mut scores: HashMap<i64, f64> = working
            .iter()
            .map(|(id, sig)| (*id, average_score(mode, &sig.avg, &query.avg)))
            .collect();
        self.score_coefficients(query, mode, &mut scores);
        extract_below(working, scores, threshold)
    }

    /// Threshold query scored on the averages alone. Much cheaper than
    /// [`query_by_threshold`](Self::query_by_threshold) and much coarser.
    pub fn query_by_threshold_average_only(
        working: &mut WorkingSet,
        query: &Signature,
        threshold: f64,
        mode: SketchMode,
    ) -> Vec<i64> {
        let scores = working
            .iter()
            .map(|(id, sig)| (*id, average_score(mode, &sig.avg, &query.avg)))
            .collect();
        extract_below(working, scores, threshold)
    }

    /// Unweighted sum of per-channel average differences between two stored
    /// images.
    pub fn average_difference(&self, a: i64, b: i64) -> Option<f64> {
        let (a, b) = (self.sigs.get(&a)?, self.sigs.get(&b)?);
        Some((0..CHANNELS).map(|c| (a.avg[c] - b.avg[c]).abs()).sum())
    }

    /// Score of stored image `b` measured against stored image `a`, as
    /// [`query`](Self::query) would compute it.
    pub fn pair_score(&self, a: i64, b: i64, mode: SketchMode) -> Option<f64> {
        let (a, b) = (self.sigs.get(&a)?, self.sigs.get(&b)?);
        let mut score = average_score(mode, &a.avg, &b.avg);
        for (c, coeffs) in a.coeffs.iter().enumerate() {
            for &e in coeffs.iter() {
                let shared = b.coeffs[c].iter().filter(|&&other| other == e).count();
                if shared > 0 {
                    let (_, position) = decode(e);
                    score -= weight(mode, self.bins.classify(position), c) * shared as f64;
                }
            }
        }
        Some(score)
    }
}

impl Default for SimilarityIndex {
    fn default() -> Self {
        Self::new()
    }
}

fn extract_below(working: &mut WorkingSet, scores: HashMap<i64, f64>, threshold: f64) -> Vec<i64> {
    let mut hits: Vec<Match> = scores
        .into_iter()
        .filter(|&(_, score)| score < threshold)
        .map(|(id, score)| Match { id, score })
        .collect();
    hits.sort();
    for hit in &hits {
        working.remove(&hit.id);
    }
    hits.into_iter().map(|hit| hit.id).collect()
}
