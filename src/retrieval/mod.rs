//! Nearest-neighbour matching over an in-memory corpus snapshot
//!
//! Both matching modes are pure functions of the query embedding and the
//! records, generic over any record shape that exposes its embedding.


use serde::Serialize;

/// A corpus entry that can be compared against a query embedding
pub trait Embedded {
    fn embedding(&self) -> &[f32];
}

/// A record together with its similarity to the query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredRecord<R> {
    #[serde(flatten)]
    pub record: R,
    pub similarity: f32,
}

/// Result of top-N averaged matching
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopMatches<R> {
    /// Best matches, highest similarity first
    pub matches: Vec<ScoredRecord<R>>,
    /// Arithmetic mean of the similarities in `matches`
    pub average_similarity: f32,
}

impl<R> TopMatches<R> {
    /// The single closest record
    #[inline]
    pub fn best(&self) -> Option<&ScoredRecord<R>> {
        self.matches.first()
    }
}

/// How a query is turned into an accepted match
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AcceptancePolicy {
    /// Single best record, rejected when its similarity is below the floor
    Threshold(f32),
    /// The N closest records and their mean similarity, no floor
    TopNAverage(usize),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MatchOutcome<R> {
    Single(ScoredRecord<R>),
    Averaged(TopMatches<R>),
}

impl<R> MatchOutcome<R> {
    /// The closest record, whichever mode produced the outcome
    #[inline]
    pub fn into_best(self) -> Option<ScoredRecord<R>> {
        match self {
            Self::Single(best) => Some(best),
            Self::Averaged(top) => top.matches.into_iter().next(),
        }
    }

    /// The outcome as a ranked list; a single match is a list of one
    #[inline]
    pub fn into_top(self) -> TopMatches<R> {
        match self {
            Self::Single(best) => TopMatches {
                average_similarity: best.similarity,
                matches: vec![best],
            },
            Self::Averaged(top) => top,
        }
    }
}

/// Cosine similarity clamped to [-1, 1].
///
/// Returns `None` for degenerate input: empty vectors, mismatched dimensions or a
/// zero norm on either side.
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.is_empty() || a.len() != b.len() {
        return None;
    }

    let (dot, norm_a, norm_b) = a
        .iter()
        .zip(b.iter())
        .fold((0.0f32, 0.0f32, 0.0f32), |(d, na, nb), (x, y)| {
            (x.mul_add(*y, d), x.mul_add(*x, na), y.mul_add(*y, nb))
        });

    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }

    let similarity = dot / (norm_a.sqrt() * norm_b.sqrt());
    similarity
        .is_finite()
        .then_some(similarity.clamp(-1.0, 1.0))
}

/// Similarity of every record to the query, in corpus order. Degenerate pairs score 0.0.
#[inline]
pub fn score_all<R: Embedded>(query: &[f32], records: &[R]) -> Vec<f32> {
    records
        .iter()
        .map(|record| cosine_similarity(query, record.embedding()).unwrap_or(0.0))
        .collect()
}

/// Single-best matching with a similarity floor.
///
/// Ties keep the earliest record. A best similarity equal to `threshold` is accepted.
#[inline]
pub fn best_match<R: Embedded + Clone>(
    query: &[f32],
    records: &[R],
    threshold: f32,
) -> Option<ScoredRecord<R>> {
    let scores = score_all(query, records);

    let (best_index, best_score) =
        scores
            .iter()
            .copied()
            .enumerate()
            .fold(None, |best: Option<(usize, f32)>, (index, score)| match best {
                Some((_, best_score)) if score <= best_score => best,
                _ => Some((index, score)),
            })?;

    if best_score < threshold {
        tracing::debug!(
            "Best similarity {:.4} is below threshold {:.4}",
            best_score,
            threshold
        );
        return None;
    }

    Some(ScoredRecord {
        record: records[best_index].clone(),
        similarity: best_score,
    })
}

/// The `n` closest records and their mean similarity.
///
/// Works over however many records exist when there are fewer than `n`. Only an
/// empty corpus (or `n == 0`) yields `None`.
#[inline]
pub fn top_n_average<R: Embedded + Clone>(
    query: &[f32],
    records: &[R],
    n: usize,
) -> Option<TopMatches<R>> {
    if n == 0 || records.is_empty() {
        return None;
    }

    let mut ranked: Vec<(usize, f32)> =
        score_all(query, records).into_iter().enumerate().collect();
    // stable sort keeps corpus order among equal scores
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    ranked.truncate(n);

    let matches: Vec<ScoredRecord<R>> = ranked
        .into_iter()
        .map(|(index, similarity)| ScoredRecord {
            record: records[index].clone(),
            similarity,
        })
        .collect();

    let average_similarity =
        matches.iter().map(|m| m.similarity).sum::<f32>() / matches.len() as f32;

    Some(TopMatches {
        matches,
        average_similarity,
    })
}

/// Dispatch to the matching mode selected by `policy`
#[inline]
pub fn apply_policy<R: Embedded + Clone>(
    query: &[f32],
    records: &[R],
    policy: AcceptancePolicy,
) -> Option<MatchOutcome<R>> {
    match policy {
        AcceptancePolicy::Threshold(threshold) => {
            best_match(query, records, threshold).map(MatchOutcome::Single)
        }
        AcceptancePolicy::TopNAverage(n) => {
            top_n_average(query, records, n).map(MatchOutcome::Averaged)
        }
    }
}

/// Round to 4 decimal places for stable logging and comparison
#[inline]
pub fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}
