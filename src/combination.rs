//! Cohesion-constrained combination generation.
//!
//! Items arrive grouped into indivisible `Slice`s (one per party). The
//! generator picks whole slices until a validator reports the combination
//! complete, so a party's members are never split.
//!
//! The first slice of the input is an anchor: every combination produced by
//! one generator contains it and its index is never advanced. A split of the
//! input into teams is then produced exactly once, from the team holding the
//! anchor, instead of once per permutation of team labels.

use crate::deadline::Deadline;
use crate::types::RoleQuota;
use std::collections::{HashMap, HashSet};

/// An indivisible group of atomic items with a precomputed identity key
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Slice {
    key: String,
    items: Vec<u64>,
}

impl Slice {
    /// Key derived from the stringified items
    pub fn new(items: Vec<u64>) -> Self {
        let key = items
            .iter()
            .map(|item| item.to_string())
            .collect::<Vec<_>>()
            .join(",");
        Self { key, items }
    }

    pub fn with_key(key: impl Into<String>, items: Vec<u64>) -> Self {
        Self {
            key: key.into(),
            items,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn items(&self) -> &[u64] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Decides which slices may join the combination being built.
///
/// The generator calls `start`, then `accept` for each slice of a candidate
/// in order, then `is_complete`. Implementations keep running state between
/// those calls; `start` resets it.
pub trait CombinationValidator {
    fn start(&mut self);
    fn accept(&mut self, chosen: &[&Slice], candidate: &Slice) -> bool;
    fn is_complete(&self) -> bool;
}

/// Accepts slices while the item total stays within `capacity`
#[derive(Clone, Debug)]
pub struct CapacityValidator {
    capacity: usize,
    filled: usize,
}

impl CapacityValidator {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            filled: 0,
        }
    }
}

impl CombinationValidator for CapacityValidator {
    fn start(&mut self) {
        self.filled = 0;
    }

    fn accept(&mut self, _chosen: &[&Slice], candidate: &Slice) -> bool {
        if self.filled + candidate.len() > self.capacity {
            return false;
        }
        self.filled += candidate.len();
        true
    }

    fn is_complete(&self) -> bool {
        self.filled == self.capacity
    }
}

/// Capacity bound plus per-role quotas, looked up through an item -> role map
pub struct RoleQuotaValidator<'a> {
    capacity: CapacityValidator,
    quotas: &'a [RoleQuota],
    roles: &'a HashMap<u64, String>,
    role_counts: HashMap<&'a str, usize>,
}

impl<'a> RoleQuotaValidator<'a> {
    pub fn new(capacity: usize, quotas: &'a [RoleQuota], roles: &'a HashMap<u64, String>) -> Self {
        Self {
            capacity: CapacityValidator::new(capacity),
            quotas,
            roles,
            role_counts: HashMap::new(),
        }
    }
}

impl CombinationValidator for RoleQuotaValidator<'_> {
    fn start(&mut self) {
        self.capacity.start();
        self.role_counts.clear();
    }

    fn accept(&mut self, chosen: &[&Slice], candidate: &Slice) -> bool {
        let mut added: HashMap<&str, usize> = HashMap::new();
        for item in candidate.items() {
            if let Some(role) = self.roles.get(item) {
                *added.entry(role.as_str()).or_insert(0) += 1;
            }
        }
        for quota in self.quotas {
            let current = self.role_counts.get(quota.role.as_str()).copied().unwrap_or(0);
            let extra = added.get(quota.role.as_str()).copied().unwrap_or(0);
            if current + extra > quota.max {
                return false;
            }
        }
        if !self.capacity.accept(chosen, candidate) {
            return false;
        }
        for quota in self.quotas {
            if let Some(&extra) = added.get(quota.role.as_str()) {
                *self.role_counts.entry(quota.role.as_str()).or_insert(0) += extra;
            }
        }
        true
    }

    fn is_complete(&self) -> bool {
        self.capacity.is_complete()
            && self.quotas.iter().all(|quota| {
                self.role_counts.get(quota.role.as_str()).copied().unwrap_or(0) >= quota.min
            })
    }
}

/// Standard r-of-n index combinations in lexicographic order.
///
/// When anchored, index 0 stays pinned to the first element and the
/// iterator ends once every other position is saturated.
#[derive(Clone, Debug)]
pub struct IndexCombinations {
    n: usize,
    indices: Vec<usize>,
    anchored: bool,
    started: bool,
    done: bool,
}

impl IndexCombinations {
    pub fn new(n: usize, r: usize) -> Self {
        Self {
            n,
            indices: (0..r).collect(),
            anchored: false,
            started: false,
            done: r > n,
        }
    }

    pub fn anchored(n: usize, r: usize) -> Self {
        Self {
            anchored: true,
            done: r > n || (r == 0 && n > 0),
            ..Self::new(n, r)
        }
    }

    fn advance(&mut self) -> bool {
        let r = self.indices.len();
        let lowest = if self.anchored { 1 } else { 0 };
        // rightmost index not yet at its largest reachable value
        let pivot = (lowest..r)
            .rev()
            .find(|&i| self.indices[i] < self.n - r + i);
        match pivot {
            Some(i) => {
                self.indices[i] += 1;
                for j in i + 1..r {
                    self.indices[j] = self.indices[j - 1] + 1;
                }
                true
            }
            None => false,
        }
    }
}

impl Iterator for IndexCombinations {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if !self.started {
            self.started = true;
        } else if !self.advance() {
            self.done = true;
            return None;
        }
        Some(self.indices.clone())
    }
}

enum NodeState {
    Rejected(usize),
    Partial,
    Complete,
}

/// Yields disjoint combinations of whole slices, anchored on the first slice
pub struct CombinationGenerator<'a, V> {
    groups: Vec<&'a Slice>,
    validator: V,
    indices: Vec<usize>,
    started: bool,
    done: bool,
}

impl<'a, V: CombinationValidator> CombinationGenerator<'a, V> {
    pub fn new(groups: impl IntoIterator<Item = &'a Slice>, validator: V) -> Self {
        Self {
            groups: groups.into_iter().collect(),
            validator,
            indices: Vec::new(),
            started: false,
            done: false,
        }
    }

    /// The slices behind a combination returned by `next_combination`
    pub fn resolve(&self, combination: &[usize]) -> Vec<&'a Slice> {
        combination.iter().map(|&i| self.groups[i]).collect()
    }

    /// Next complete combination (as positions into the input), or `None`
    /// once the anchor would have to move
    pub fn next_combination(&mut self) -> Option<Vec<usize>> {
        if self.done {
            return None;
        }
        if !self.started {
            self.started = true;
            if self.groups.is_empty() {
                self.done = true;
                return None;
            }
            self.indices.push(0);
        } else if !self.next_sibling(self.indices.len() - 1) {
            return None;
        }

        loop {
            match self.evaluate() {
                NodeState::Complete => return Some(self.indices.clone()),
                NodeState::Partial => {
                    if !self.descend() {
                        return None;
                    }
                }
                // a rejected anchor ends generation in next_sibling
                NodeState::Rejected(pos) => {
                    if !self.next_sibling(pos) {
                        return None;
                    }
                }
            }
        }
    }

    fn evaluate(&mut self) -> NodeState {
        let groups = &self.groups;
        self.validator.start();
        let mut chosen: Vec<&Slice> = Vec::with_capacity(self.indices.len());
        for (pos, &idx) in self.indices.iter().enumerate() {
            let candidate = groups[idx];
            if !self.validator.accept(&chosen, candidate) {
                return NodeState::Rejected(pos);
            }
            chosen.push(candidate);
        }
        if self.validator.is_complete() {
            NodeState::Complete
        } else {
            NodeState::Partial
        }
    }

    fn descend(&mut self) -> bool {
        let last = self.indices.len() - 1;
        let next = self.indices[last] + 1;
        if next < self.groups.len() {
            self.indices.push(next);
            true
        } else {
            self.next_sibling(last)
        }
    }

    /// Move position `pos` to its next value, dropping everything after it.
    /// Saturated positions roll back to their parent; the anchor never moves.
    fn next_sibling(&mut self, pos: usize) -> bool {
        let mut pos = pos;
        loop {
            if pos == 0 {
                self.done = true;
                return false;
            }
            self.indices.truncate(pos + 1);
            self.indices[pos] += 1;
            if self.indices[pos] < self.groups.len() {
                return true;
            }
            self.indices.pop();
            pos -= 1;
        }
    }
}

impl<V: CombinationValidator> Iterator for CombinationGenerator<'_, V> {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_combination()
    }
}

/// One block of a split: the slices (as input indices) filling one capacity
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SplitBlock {
    pub capacity: usize,
    pub groups: Vec<usize>,
}

/// Totals for one streamed split enumeration
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SplitWalk {
    pub splits: u64,
    pub timed_out: bool,
}

/// Every way to split `groups` into blocks whose item counts match `sizes`.
///
/// Splits are label-free: blocks of equal capacity are interchangeable and
/// each split is produced once. The block holding the first remaining slice
/// is always built first.
pub fn disjoint_splits(groups: &[Slice], sizes: &[usize]) -> Vec<Vec<SplitBlock>> {
    let mut out = Vec::new();
    for_each_split(groups, sizes, CapacityValidator::new, &Deadline::never(), |split| {
        out.push(split.to_vec())
    });
    out
}

/// Stream the splits of `disjoint_splits` to `visit` without collecting
/// them. Each block is built by a validator from `make_validator(capacity)`.
/// The deadline is polled before every generator step; once it trips the
/// walk unwinds and reports `timed_out`.
pub fn for_each_split<V, F, G>(
    groups: &[Slice],
    sizes: &[usize],
    make_validator: F,
    deadline: &Deadline,
    visit: G,
) -> SplitWalk
where
    V: CombinationValidator,
    F: Fn(usize) -> V,
    G: FnMut(&[SplitBlock]),
{
    let total: usize = groups.iter().map(|g| g.len()).sum();
    if sizes.iter().sum::<usize>() != total {
        return SplitWalk::default();
    }

    let mut sizes = sizes.to_vec();
    sizes.sort_unstable();
    let remaining: Vec<usize> = (0..groups.len()).collect();
    let mut walker = SplitWalker {
        groups,
        make_validator,
        deadline,
        visit,
        used: HashSet::new(),
        current: Vec::new(),
        walk: SplitWalk::default(),
    };
    walker.compose(&remaining, &mut sizes);
    walker.walk
}

/// Non-decreasing block sizes in `[min, max]` adding up to `total`
pub fn size_multisets(total: usize, blocks: usize, min: usize, max: usize) -> Vec<Vec<usize>> {
    fn fill(left: usize, blocks: usize, lowest: usize, max: usize, current: &mut Vec<usize>, out: &mut Vec<Vec<usize>>) {
        if blocks == 0 {
            if left == 0 {
                out.push(current.clone());
            }
            return;
        }
        for size in lowest..=max.min(left) {
            // the remaining blocks are at least `size` each
            if size * blocks > left {
                break;
            }
            current.push(size);
            fill(left - size, blocks - 1, size, max, current, out);
            current.pop();
        }
    }

    let mut out = Vec::new();
    if min <= max {
        fill(total, blocks, min, max, &mut Vec::with_capacity(blocks), &mut out);
    }
    out
}

struct SplitWalker<'g, F, G> {
    groups: &'g [Slice],
    make_validator: F,
    deadline: &'g Deadline,
    visit: G,
    used: HashSet<&'g str>,
    current: Vec<SplitBlock>,
    walk: SplitWalk,
}

impl<'g, V, F, G> SplitWalker<'g, F, G>
where
    V: CombinationValidator,
    F: Fn(usize) -> V,
    G: FnMut(&[SplitBlock]),
{
    fn compose(&mut self, remaining: &[usize], sizes: &mut Vec<usize>) {
        if remaining.is_empty() {
            if sizes.iter().all(|&s| s == 0) {
                self.walk.splits += 1;
                (self.visit)(&self.current);
            }
            return;
        }
        if sizes.is_empty() {
            return;
        }

        let groups = self.groups;
        let mut distinct = sizes.clone();
        distinct.dedup();
        for size in distinct {
            let slot = match sizes.iter().position(|&s| s == size) {
                Some(slot) => slot,
                None => continue,
            };
            sizes.remove(slot);

            let mut generator = CombinationGenerator::new(
                remaining.iter().map(|&i| &groups[i]),
                (self.make_validator)(size),
            );
            loop {
                if self.walk.timed_out || self.deadline.is_expired() {
                    self.walk.timed_out = true;
                    break;
                }
                let Some(combination) = generator.next_combination() else {
                    break;
                };

                let block: Vec<usize> = combination.iter().map(|&k| remaining[k]).collect();
                for &g in &block {
                    self.used.insert(groups[g].key());
                }
                let rest: Vec<usize> = remaining
                    .iter()
                    .copied()
                    .filter(|&i| !self.used.contains(groups[i].key()))
                    .collect();

                self.current.push(SplitBlock {
                    capacity: size,
                    groups: block.clone(),
                });
                self.compose(&rest, sizes);
                self.current.pop();

                for &g in &block {
                    self.used.remove(groups[g].key());
                }
            }

            sizes.insert(slot, size);
            if self.walk.timed_out {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slices(groups: &[&[u64]]) -> Vec<Slice> {
        groups.iter().map(|g| Slice::new(g.to_vec())).collect()
    }

    #[test]
    fn test_slice_key_from_items() {
        let slice = Slice::new(vec![3, 14]);
        assert_eq!(slice.key(), "3,14");
        assert_eq!(slice.len(), 2);
        assert_eq!(Slice::with_key("party-7", vec![1]).key(), "party-7");
    }

    #[test]
    fn test_index_combinations_plain_and_anchored() {
        let plain: Vec<_> = IndexCombinations::new(4, 2).collect();
        assert_eq!(plain.len(), 6);
        assert_eq!(plain[0], vec![0, 1]);
        assert_eq!(plain[5], vec![2, 3]);

        let anchored: Vec<_> = IndexCombinations::anchored(4, 2).collect();
        assert_eq!(anchored, vec![vec![0, 1], vec![0, 2], vec![0, 3]]);

        assert_eq!(IndexCombinations::new(2, 3).count(), 0);
    }

    #[test]
    fn test_no_mirrored_duplicates() {
        let groups = slices(&[&[1, 2], &[3], &[4], &[5, 6]]);
        let mut generator = CombinationGenerator::new(&groups, CapacityValidator::new(3));

        let mut found = Vec::new();
        while let Some(combination) = generator.next_combination() {
            let items: Vec<u64> = generator
                .resolve(&combination)
                .iter()
                .flat_map(|s| s.items().iter().copied())
                .collect();
            found.push(items);
        }
        assert_eq!(found, vec![vec![1, 2, 3], vec![1, 2, 4]]);
    }

    #[test]
    fn test_rejected_anchor_yields_nothing() {
        let groups = slices(&[&[1, 2, 3, 4], &[5]]);
        let mut generator = CombinationGenerator::new(&groups, CapacityValidator::new(2));
        assert_eq!(generator.next_combination(), None);
        assert_eq!(generator.next_combination(), None);
    }

    #[test]
    fn test_incomplete_candidates_are_discarded() {
        // 2 + 2 can never make 3
        let groups = slices(&[&[1, 2], &[3, 4]]);
        let generator = CombinationGenerator::new(&groups, CapacityValidator::new(3));
        assert_eq!(generator.count(), 0);
    }

    #[test]
    fn test_rejection_skips_to_later_groups() {
        let groups = slices(&[&[1], &[2, 3, 4], &[5], &[6]]);
        let combos: Vec<_> = CombinationGenerator::new(&groups, CapacityValidator::new(2)).collect();
        assert_eq!(combos, vec![vec![0, 2], vec![0, 3]]);
    }

    #[test]
    fn test_role_quota_validator() {
        let groups = slices(&[&[1], &[2], &[3], &[4]]);
        let roles: HashMap<u64, String> = [(1, "tank"), (2, "tank"), (3, "dps"), (4, "dps")]
            .into_iter()
            .map(|(id, role)| (id, role.to_string()))
            .collect();
        let quotas = vec![RoleQuota {
            role: "tank".to_string(),
            min: 1,
            max: 1,
        }];
        let validator = RoleQuotaValidator::new(2, &quotas, &roles);
        let combos: Vec<_> = CombinationGenerator::new(&groups, validator).collect();
        // anchor is a tank; the second tank is refused
        assert_eq!(combos, vec![vec![0, 2], vec![0, 3]]);
    }

    #[test]
    fn test_splits_cover_every_item_once() {
        let groups = slices(&[&[1], &[2], &[3], &[4], &[5], &[6]]);
        let splits = disjoint_splits(&groups, &[2, 2, 2]);
        // 6! / (2!^3 * 3!)
        assert_eq!(splits.len(), 15);

        let mut seen = HashSet::new();
        for split in &splits {
            let mut covered: Vec<usize> = split.iter().flat_map(|b| b.groups.clone()).collect();
            covered.sort_unstable();
            assert_eq!(covered, vec![0, 1, 2, 3, 4, 5]);

            let mut canonical: Vec<Vec<usize>> = split.iter().map(|b| b.groups.clone()).collect();
            canonical.sort();
            assert!(seen.insert(canonical), "duplicate split {:?}", split);
        }
    }

    #[test]
    fn test_splits_with_unequal_sizes() {
        let groups = slices(&[&[1], &[2], &[3]]);
        let splits = disjoint_splits(&groups, &[2, 1]);
        assert_eq!(splits.len(), 3);
        for split in &splits {
            for block in split {
                let count: usize = block.groups.iter().map(|&g| groups[g].len()).sum();
                assert_eq!(count, block.capacity);
            }
        }
    }

    #[test]
    fn test_splits_respect_cohesion() {
        let groups = slices(&[&[1, 2], &[3], &[4]]);
        let splits = disjoint_splits(&groups, &[2, 2]);
        assert_eq!(splits.len(), 1);
        assert_eq!(splits[0][0].groups, vec![0]);
        assert_eq!(splits[0][1].groups, vec![1, 2]);
    }

    #[test]
    fn test_splits_with_role_quotas() {
        let groups = slices(&[&[1], &[2], &[3], &[4]]);
        let roles: HashMap<u64, String> = [(1, "tank"), (2, "tank"), (3, "dps"), (4, "dps")]
            .into_iter()
            .map(|(id, role)| (id, role.to_string()))
            .collect();
        let quotas = vec![RoleQuota {
            role: "tank".to_string(),
            min: 1,
            max: 1,
        }];
        let mut splits = Vec::new();
        let walk = for_each_split(
            &groups,
            &[2, 2],
            |capacity| RoleQuotaValidator::new(capacity, &quotas, &roles),
            &Deadline::never(),
            |split| splits.push(split.to_vec()),
        );
        // one tank per team: {1,3}/{2,4} and {1,4}/{2,3}
        assert_eq!(splits.len(), 2);
        assert_eq!(walk, SplitWalk { splits: 2, timed_out: false });
    }

    #[test]
    fn test_expired_deadline_stops_split_walk() {
        let groups: Vec<Slice> = (1..=16).map(|id| Slice::new(vec![id])).collect();
        let mut visited = 0u64;
        let walk = for_each_split(
            &groups,
            &[4, 4, 4, 4],
            CapacityValidator::new,
            &Deadline::expired_now(),
            |_| visited += 1,
        );
        assert!(walk.timed_out);
        assert_eq!(walk.splits, 0);
        assert_eq!(visited, 0);
    }

    #[test]
    fn test_split_walk_counts_what_it_visits() {
        let groups = slices(&[&[1], &[2], &[3], &[4], &[5], &[6]]);
        let mut visited = 0u64;
        let walk = for_each_split(&groups, &[2, 2, 2], CapacityValidator::new, &Deadline::never(), |split| {
            assert_eq!(split.len(), 3);
            visited += 1;
        });
        assert_eq!(walk, SplitWalk { splits: 15, timed_out: false });
        assert_eq!(visited, 15);
    }

    #[test]
    fn test_size_multisets() {
        assert_eq!(size_multisets(5, 2, 1, 3), vec![vec![2, 3]]);
        assert_eq!(size_multisets(4, 2, 0, 4), vec![vec![0, 4], vec![1, 3], vec![2, 2]]);
        assert!(size_multisets(7, 2, 1, 3).is_empty());
        assert!(size_multisets(2, 2, 3, 1).is_empty());
    }

    #[test]
    fn test_splits_reject_size_mismatch() {
        let groups = slices(&[&[1], &[2]]);
        assert!(disjoint_splits(&groups, &[1, 2]).is_empty());
    }
}
