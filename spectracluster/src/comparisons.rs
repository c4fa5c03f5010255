//! A bounded record of the best scoring comparisons a cluster has taken part in.
use std::cmp::Ordering;

use crate::similarity::SimilarityScore;

/// The default number of comparison results a cluster retains
pub const DEFAULT_RETAINED_COMPARISONS: usize = 30;

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ComparisonMatch {
    pub id: String,
    pub score: SimilarityScore,
    #[cfg_attr(feature = "serde", serde(skip))]
    order: u64,
}

impl ComparisonMatch {
    pub fn new(id: String, score: SimilarityScore) -> Self {
        Self { id, score, order: 0 }
    }
}

/// Retains the `capacity` highest scoring comparison partners, keyed by partner id.
///
/// A new partner is admitted when there is room or when its score strictly exceeds
/// the current minimum, in which case the minimum is evicted. Among several entries
/// tied at the minimum, the one inserted earliest goes first. Recording a known
/// partner again keeps the better of the two scores.
#[derive(Debug, Clone)]
pub struct ComparisonMatches {
    capacity: usize,
    matches: Vec<ComparisonMatch>,
    counter: u64,
}

impl Default for ComparisonMatches {
    fn default() -> Self {
        Self::new(DEFAULT_RETAINED_COMPARISONS)
    }
}

impl ComparisonMatches {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            matches: Vec::with_capacity(capacity),
            counter: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.matches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    fn minimum_index(&self) -> Option<usize> {
        self.matches
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| {
                a.score
                    .total_cmp(&b.score)
                    .then_with(|| a.order.cmp(&b.order))
            })
            .map(|(i, _)| i)
    }

    pub fn minimum_score(&self) -> Option<SimilarityScore> {
        self.minimum_index().map(|i| self.matches[i].score)
    }

    /// Offer a comparison result. Returns `true` if the result is retained.
    pub fn insert(&mut self, id: &str, score: SimilarityScore) -> bool {
        if self.capacity == 0 || score.is_nan() {
            return false;
        }
        self.counter += 1;
        let order = self.counter;

        if let Some(existing) = self.matches.iter_mut().find(|m| m.id == id) {
            if score > existing.score {
                existing.score = score;
            }
            return true;
        }

        let entry = ComparisonMatch {
            id: id.to_string(),
            score,
            order,
        };

        if self.matches.len() < self.capacity {
            self.matches.push(entry);
            return true;
        }

        match self.minimum_index() {
            Some(i) if score > self.matches[i].score => {
                self.matches[i] = entry;
                true
            }
            _ => false,
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.matches.iter().any(|m| m.id == id)
    }

    pub fn get(&self, id: &str) -> Option<SimilarityScore> {
        self.matches.iter().find(|m| m.id == id).map(|m| m.score)
    }

    /// Iterate over the retained results in no particular order
    pub fn iter(&self) -> std::slice::Iter<'_, ComparisonMatch> {
        self.matches.iter()
    }

    /// The retained results from best to worst
    pub fn sorted(&self) -> Vec<&ComparisonMatch> {
        let mut sorted: Vec<_> = self.matches.iter().collect();
        sorted.sort_by(|a, b| match b.score.total_cmp(&a.score) {
            Ordering::Equal => a.id.cmp(&b.id),
            ord => ord,
        });
        sorted
    }

    pub fn clear(&mut self) {
        self.matches.clear();
    }
}

impl<'a> IntoIterator for &'a ComparisonMatches {
    type Item = &'a ComparisonMatch;

    type IntoIter = std::slice::Iter<'a, ComparisonMatch>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_retains_top_k() {
        let mut matches = ComparisonMatches::new(30);
        for i in 0..91 {
            let score = (10 + i) as f64 / 100.0;
            matches.insert(&i.to_string(), score);
            assert!(matches.len() <= 30);
        }
        assert_eq!(matches.len(), 30);
        // scores 0.10 and 0.69
        assert!(!matches.contains("0"));
        assert!(!matches.contains("59"));
        // 0.70 is the 31st best
        assert!(!matches.contains("60"));
        assert!(matches.contains("61"));
        assert!(matches.contains("90"));
        assert_eq!(matches.minimum_score(), Some(0.71));
    }

    #[test]
    fn test_ties_evict_earliest() {
        let mut matches = ComparisonMatches::new(2);
        assert!(matches.insert("a", 0.5));
        assert!(matches.insert("b", 0.5));
        // equal to the minimum is not enough
        assert!(!matches.insert("c", 0.5));
        assert!(matches.insert("d", 0.6));
        assert!(!matches.contains("a"));
        assert!(matches.contains("b"));
        assert!(matches.contains("d"));
    }

    #[test]
    fn test_rerecord_keeps_best() {
        let mut matches = ComparisonMatches::new(3);
        matches.insert("a", 0.7);
        matches.insert("a", 0.4);
        assert_eq!(matches.get("a"), Some(0.7));
        matches.insert("a", 0.9);
        assert_eq!(matches.get("a"), Some(0.9));
        assert_eq!(matches.len(), 1);

        assert!(!matches.insert("b", f64::NAN));
        assert!(ComparisonMatches::new(0).is_empty());
    }

    #[test]
    fn test_sorted() {
        let mut matches = ComparisonMatches::new(5);
        matches.insert("x", 0.2);
        matches.insert("y", 0.9);
        matches.insert("z", 0.5);
        let ids: Vec<&str> = matches.sorted().iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["y", "z", "x"]);
    }
}
