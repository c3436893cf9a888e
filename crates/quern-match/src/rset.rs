//! Relevance sets.

use std::collections::BTreeSet;

use quern_weight::DocId;

/// A set of documents marked relevant by the user.
///
/// Relevance feedback weighting uses the set to compute per-term relevant
/// document counts during the statistics phase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RSet {
    /// The marked document ids.
    dids: BTreeSet<DocId>,
}

impl RSet {
    /// Creates an empty relevance set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks a document as relevant.
    pub fn add_document(&mut self, did: DocId) {
        if did != 0 {
            self.dids.insert(did);
        }
    }

    /// Removes a document from the set.
    pub fn remove_document(&mut self, did: DocId) {
        self.dids.remove(&did);
    }

    /// Whether the set contains `did`.
    pub fn contains(&self, did: DocId) -> bool {
        self.dids.contains(&did)
    }

    /// The number of documents in the set.
    pub fn len(&self) -> u32 {
        self.dids.len() as u32
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.dids.is_empty()
    }

    /// Iterates the marked document ids in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = DocId> + '_ {
        self.dids.iter().copied()
    }

    /// Splits the set by shard, translating global docids to local ones.
    ///
    /// Global docids interleave shards: global `g` lives in shard
    /// `(g - 1) % n` as local document `(g - 1) / n + 1`.
    pub fn split_by_shard(&self, n_shards: usize) -> Vec<Self> {
        let mut subrsets = vec![Self::new(); n_shards];
        if n_shards == 1 {
            subrsets[0] = self.clone();
            return subrsets;
        }
        for did in self.iter() {
            let shard = ((did - 1) as usize) % n_shards;
            let local = (did - 1) / n_shards as u32 + 1;
            subrsets[shard].add_document(local);
        }
        subrsets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_translates_docids() {
        let mut rset = RSet::new();
        // Three shards: global 1,2,3 are shard 0,1,2 local 1; global 4 is
        // shard 0 local 2.
        rset.add_document(1);
        rset.add_document(4);
        rset.add_document(3);

        let split = rset.split_by_shard(3);
        assert_eq!(split[0].iter().collect::<Vec<_>>(), vec![1, 2]);
        assert!(split[1].is_empty());
        assert_eq!(split[2].iter().collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn zero_docid_is_ignored() {
        let mut rset = RSet::new();
        rset.add_document(0);
        assert!(rset.is_empty());
    }
}
