//! Weighted sampling without replacement over count histograms.

use rand::Rng;

/// A sampler over a histogram of non-negative counts, backed by an
/// implicit complete binary tree stored in a flat array.
///
/// Leaves hold the remaining counts; every internal node holds the sum
/// of its two children. Sampling descends from the root, taking
/// decrements a leaf and all of its ancestors, so repeated
/// sample-and-take draws are weighted sampling without replacement.
#[derive(Clone, Debug)]
pub struct HistogramSampler {
    tree: Vec<usize>,
    first_leaf_index: usize,
    num_bins: usize,
}

impl HistogramSampler {
    /// Build a sampler from a histogram. Leaf capacity is the next
    /// power of two at or above the histogram length; the unused
    /// leaves read as zero.
    pub fn new(histogram: &[usize]) -> Self {
        let capacity = histogram.len().next_power_of_two().max(1);
        let first_leaf_index = capacity - 1;

        let mut tree = vec![0; 2 * capacity - 1];

        for (leaf, &count) in histogram.iter().enumerate() {
            tree[first_leaf_index + leaf] = count;
        }

        for node in (0..first_leaf_index).rev() {
            tree[node] = tree[2 * node + 1] + tree[2 * node + 2];
        }

        HistogramSampler {
            tree: tree,
            first_leaf_index: first_leaf_index,
            num_bins: histogram.len(),
        }
    }

    /// Draw a bin with probability proportional to its remaining
    /// count. Panics when the sampler is empty.
    pub fn sample<R: Rng>(&self, rng: &mut R) -> usize {
        assert!(!self.is_empty(), "sampling from an empty histogram");

        let mut node = 0;

        while node < self.first_leaf_index {
            let left = 2 * node + 1;
            let draw = rng.gen_range(0, self.tree[node]);

            node = if draw < self.tree[left] {
                left
            } else {
                left + 1
            };
        }

        node - self.first_leaf_index
    }

    /// Remove one unit of count from a bin, updating every ancestor.
    /// Panics when the bin is out of range or already empty.
    pub fn take(&mut self, bin: usize) {
        assert!(bin < self.num_bins, "bin {} out of range", bin);

        let mut node = self.first_leaf_index + bin;

        assert!(self.tree[node] > 0, "taking from an exhausted bin {}", bin);

        loop {
            self.tree[node] -= 1;

            if node == 0 {
                break;
            }

            node = (node - 1) / 2;
        }
    }

    /// Whether all counts have been exhausted.
    pub fn is_empty(&self) -> bool {
        self.tree[0] == 0
    }

    /// The total remaining count.
    pub fn total(&self) -> usize {
        self.tree[0]
    }
}

#[cfg(test)]
mod tests {

    use rand::{SeedableRng, XorShiftRng};

    use super::*;

    #[test]
    fn internal_nodes_sum_children() {
        let sampler = HistogramSampler::new(&[3, 1, 4, 1, 5]);

        for node in 0..sampler.first_leaf_index {
            assert_eq!(
                sampler.tree[node],
                sampler.tree[2 * node + 1] + sampler.tree[2 * node + 2]
            );
        }

        assert_eq!(sampler.total(), 14);
    }

    #[test]
    fn is_empty_is_idempotent() {
        let sampler = HistogramSampler::new(&[0, 0]);

        assert!(sampler.is_empty());
        assert!(sampler.is_empty());
    }

    #[test]
    fn take_exhausts_the_histogram() {
        let mut sampler = HistogramSampler::new(&[3, 0, 2]);

        sampler.take(0);
        sampler.take(0);
        sampler.take(0);
        sampler.take(2);
        sampler.take(2);

        assert!(sampler.is_empty());
    }

    #[test]
    #[should_panic(expected = "exhausted bin")]
    fn take_past_zero_panics() {
        let mut sampler = HistogramSampler::new(&[1, 2]);

        sampler.take(0);
        sampler.take(0);
    }

    #[test]
    #[should_panic(expected = "empty histogram")]
    fn sampling_empty_panics() {
        let sampler = HistogramSampler::new(&[0]);
        let mut rng = XorShiftRng::from_seed([17; 16]);

        sampler.sample(&mut rng);
    }

    #[test]
    fn sample_respects_zero_bins() {
        let mut sampler = HistogramSampler::new(&[0, 5, 0, 3]);
        let mut rng = XorShiftRng::from_seed([42; 16]);

        while !sampler.is_empty() {
            let bin = sampler.sample(&mut rng);
            assert!(bin == 1 || bin == 3);
            sampler.take(bin);
        }
    }

    #[test]
    fn sample_tracks_remaining_mass() {
        let mut sampler = HistogramSampler::new(&[2, 1]);
        let mut rng = XorShiftRng::from_seed([7; 16]);

        let mut drawn = [0, 0];

        for _ in 0..3 {
            let bin = sampler.sample(&mut rng);
            sampler.take(bin);
            drawn[bin] += 1;
        }

        assert_eq!(drawn, [2, 1]);
        assert!(sampler.is_empty());
    }
}
