//! Sparse row-stochastic transition matrix over interned state labels.
//!
//! Counts are accumulated per (source, destination) pair and normalized per
//! source row on demand. States with no outgoing observations (sinks) keep an
//! empty row; normalization never divides by zero.

use std::collections::HashMap;

/// Observed state-to-state transition counts, sparse by row.
#[derive(Debug, Clone, Default)]
pub struct TransitionMatrix {
    labels: Vec<String>,
    index: HashMap<String, u32>,
    rows: Vec<HashMap<u32, u64>>,
    row_totals: Vec<u64>,
    observations: u64,
}

impl TransitionMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a matrix from session-grouped `(state, next-state)` pairs.
    pub fn from_transitions<S: AsRef<str>>(pairs: &[(S, S)]) -> Self {
        let mut matrix = Self::new();
        for (from, to) in pairs {
            matrix.observe(from.as_ref(), to.as_ref());
        }
        matrix
    }

    /// Intern a state label, returning its dense index.
    pub fn intern(&mut self, label: &str) -> u32 {
        if let Some(&ix) = self.index.get(label) {
            return ix;
        }
        let ix = self.labels.len() as u32;
        self.labels.push(label.to_string());
        self.index.insert(label.to_string(), ix);
        self.rows.push(HashMap::new());
        self.row_totals.push(0);
        ix
    }

    /// Record one observed transition.
    pub fn observe(&mut self, from: &str, to: &str) {
        let from_ix = self.intern(from);
        let to_ix = self.intern(to);
        *self.rows[from_ix as usize].entry(to_ix).or_insert(0) += 1;
        self.row_totals[from_ix as usize] += 1;
        self.observations += 1;
    }

    /// Number of distinct states (matrix dimension).
    pub fn state_count(&self) -> usize {
        self.labels.len()
    }

    /// Number of distinct (source, destination) pairs with nonzero count.
    pub fn transition_count(&self) -> usize {
        self.rows.iter().map(|r| r.len()).sum()
    }

    /// Total observations accumulated.
    pub fn observations(&self) -> u64 {
        self.observations
    }

    pub fn label(&self, ix: u32) -> Option<&str> {
        self.labels.get(ix as usize).map(String::as_str)
    }

    pub fn index_of(&self, label: &str) -> Option<u32> {
        self.index.get(label).copied()
    }

    /// True when the state has no outgoing observations.
    pub fn is_sink(&self, ix: u32) -> bool {
        self.row_totals
            .get(ix as usize)
            .map(|&total| total == 0)
            .unwrap_or(true)
    }

    /// Outgoing count for one (source, destination) pair.
    pub fn count(&self, from: u32, to: u32) -> u64 {
        self.rows
            .get(from as usize)
            .and_then(|row| row.get(&to))
            .copied()
            .unwrap_or(0)
    }

    /// Normalized outgoing probabilities for one state row.
    /// Empty for sink states; never NaN.
    pub fn row_probabilities(&self, ix: u32) -> Vec<(u32, f64)> {
        let row = match self.rows.get(ix as usize) {
            Some(row) => row,
            None => return Vec::new(),
        };
        let total = self.row_totals[ix as usize];
        if total == 0 {
            return Vec::new();
        }
        let mut probs: Vec<(u32, f64)> = row
            .iter()
            .map(|(&to, &count)| (to, count as f64 / total as f64))
            .collect();
        probs.sort_unstable_by_key(|&(to, _)| to);
        probs
    }

    /// Normalized transition probability between two labeled states.
    pub fn probability(&self, from: &str, to: &str) -> f64 {
        let (from_ix, to_ix) = match (self.index_of(from), self.index_of(to)) {
            (Some(f), Some(t)) => (f, t),
            _ => return 0.0,
        };
        let total = self.row_totals[from_ix as usize];
        if total == 0 {
            return 0.0;
        }
        self.count(from_ix, to_ix) as f64 / total as f64
    }

    /// Destination indices reachable in one step from `ix`.
    pub fn out_neighbors(&self, ix: u32) -> impl Iterator<Item = u32> + '_ {
        self.rows
            .get(ix as usize)
            .into_iter()
            .flat_map(|row| row.keys().copied())
    }

    /// Raw outgoing count row, keyed by destination label. Used when two
    /// matrices over different internings must be compared.
    pub fn row_counts_by_label(&self, ix: u32) -> HashMap<&str, u64> {
        self.rows
            .get(ix as usize)
            .map(|row| {
                row.iter()
                    .map(|(&to, &count)| (self.labels[to as usize].as_str(), count))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.labels.iter().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rows_normalize_to_one() {
        let mut m = TransitionMatrix::new();
        m.observe("a", "b");
        m.observe("a", "b");
        m.observe("a", "c");
        m.observe("b", "a");

        let a = m.index_of("a").unwrap();
        let row = m.row_probabilities(a);
        let sum: f64 = row.iter().map(|&(_, p)| p).sum();
        assert!((sum - 1.0).abs() < 1e-12);
        assert!((m.probability("a", "b") - 2.0 / 3.0).abs() < 1e-12);
        assert!((m.probability("a", "c") - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_sink_state_has_empty_row() {
        let mut m = TransitionMatrix::new();
        m.observe("a", "done");

        let done = m.index_of("done").unwrap();
        assert!(m.is_sink(done));
        assert!(m.row_probabilities(done).is_empty());
        assert_eq!(m.probability("done", "a"), 0.0);
    }

    #[test]
    fn test_counts_and_dimensions() {
        let pairs = vec![("a", "b"), ("b", "c"), ("a", "b"), ("c", "a")];
        let m = TransitionMatrix::from_transitions(&pairs);
        assert_eq!(m.state_count(), 3);
        assert_eq!(m.transition_count(), 3); // a->b, b->c, c->a
        assert_eq!(m.observations(), 4);
        let a = m.index_of("a").unwrap();
        let b = m.index_of("b").unwrap();
        assert_eq!(m.count(a, b), 2);
    }

    #[test]
    fn test_row_counts_by_label() {
        let m = TransitionMatrix::from_transitions(&[("a", "b"), ("a", "b"), ("a", "c")]);
        let a = m.index_of("a").unwrap();
        let row = m.row_counts_by_label(a);
        assert_eq!(row.get("b"), Some(&2));
        assert_eq!(row.get("c"), Some(&1));
    }
}
