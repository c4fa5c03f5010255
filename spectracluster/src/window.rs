//! A mass-ordered sliding window of open items
use std::ops::Range;

use crate::cluster::SpectralCluster;
use crate::consensus::ConsensusSpectrumBuilder;

/// Something positioned along the precursor m/z axis
pub trait MassLocated {
    fn mass(&self) -> f64;
}

impl<B: ConsensusSpectrumBuilder> MassLocated for SpectralCluster<B> {
    fn mass(&self) -> f64 {
        self.precursor_mz()
    }
}

/// A vector of items kept sorted by [`MassLocated::mass`]. Items with equal mass keep
/// their insertion order.
#[derive(Debug, Clone)]
pub struct ClusterWindow<T: MassLocated> {
    entries: Vec<T>,
}

impl<T: MassLocated> Default for ClusterWindow<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<T: MassLocated> ClusterWindow<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.entries.iter()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.entries
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.entries.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.entries.get_mut(index)
    }

    /// Mutable access to a contiguous run of entries. Changing their masses is only
    /// permitted through [`ClusterWindow::reposition`].
    pub fn slice_mut(&mut self, range: Range<usize>) -> &mut [T] {
        &mut self.entries[range]
    }

    pub fn lowest_mass(&self) -> Option<f64> {
        self.entries.first().map(|e| e.mass())
    }

    pub fn highest_mass(&self) -> Option<f64> {
        self.entries.last().map(|e| e.mass())
    }

    /// Insert `item` after any entries of equal or lower mass, returning its index
    pub fn insert(&mut self, item: T) -> usize {
        let mass = item.mass();
        let index = self.entries.partition_point(|e| e.mass() <= mass);
        self.entries.insert(index, item);
        index
    }

    pub fn remove(&mut self, index: usize) -> T {
        self.entries.remove(index)
    }

    /// Remove every entry with a mass below `threshold`, in ascending mass order
    pub fn evict_below(&mut self, threshold: f64) -> Vec<T> {
        let n = self.entries.partition_point(|e| e.mass() < threshold);
        self.entries.drain(..n).collect()
    }

    /// The index range of entries with masses in `[low, high]`
    pub fn range(&self, low: f64, high: f64) -> Range<usize> {
        let start = self.entries.partition_point(|e| e.mass() < low);
        let end = self.entries.partition_point(|e| e.mass() <= high);
        start..end.max(start)
    }

    /// Restore the ordering after the entry at `index` changed its mass, returning
    /// its new index
    pub fn reposition(&mut self, index: usize) -> usize {
        let item = self.entries.remove(index);
        self.insert(item)
    }

    /// Modify the entry at `index` in place and restore the ordering, returning the
    /// entry's new index
    pub fn update<F: FnOnce(&mut T)>(&mut self, index: usize, f: F) -> usize {
        f(&mut self.entries[index]);
        self.reposition(index)
    }

    /// Remove every entry, in ascending mass order
    pub fn drain_all(&mut self) -> Vec<T> {
        std::mem::take(&mut self.entries)
    }

    pub fn is_sorted(&self) -> bool {
        self.entries.windows(2).all(|w| w[0].mass() <= w[1].mass())
    }
}

impl<'a, T: MassLocated> IntoIterator for &'a ClusterWindow<T> {
    type Item = &'a T;

    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
