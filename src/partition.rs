//! Complete greedy partitioning.
//!
//! Items are placed largest value first, each one tried in every partition
//! from the lowest running sum upwards. The walk is depth first over a single
//! mutable set of partitions: a placement is pushed before descending and
//! popped before its sibling is tried, so no branch allocates.
//!
//! Partitions that start empty are interchangeable. Unless partition order is
//! significant, an item may only open the lowest-indexed empty
//! interchangeable partition, which keeps first-item sequence numbers
//! increasing with partition index and removes label permutations.

use crate::deadline::Deadline;
use crate::error::{RebalanceError, Result};

/// n! for n in 0..=20, used to estimate search size after symmetry pruning
const FACTORIALS: [u64; 21] = [
    1,
    1,
    2,
    6,
    24,
    120,
    720,
    5_040,
    40_320,
    362_880,
    3_628_800,
    39_916_800,
    479_001_600,
    6_227_020_800,
    87_178_291_200,
    1_307_674_368_000,
    20_922_789_888_000,
    355_687_428_096_000,
    6_402_373_705_728_000,
    121_645_100_408_832_000,
    2_432_902_008_176_640_000,
];

/// An atomic scored unit (one party)
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Item {
    pub value: f64,
    /// Weight toward the partition count limit (players in the party)
    pub count: u32,
    pub id: u64,
    /// Position after sorting; only used for symmetry pruning
    pub sequence: usize,
}

impl Item {
    pub fn new(id: u64, value: f64, count: u32) -> Self {
        Self {
            value,
            count,
            id,
            sequence: 0,
        }
    }
}

/// Running accumulator for one team during search
#[derive(Clone, Debug, PartialEq)]
pub struct Partition {
    index: usize,
    sum: f64,
    count: u32,
    items: Vec<Item>,
    /// Sum before each push; pop restores it bit for bit
    saved_sums: Vec<f64>,
}

impl Partition {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            sum: 0.0,
            count: 0,
            items: Vec::new(),
            saved_sums: Vec::new(),
        }
    }

    pub fn push(&mut self, item: Item) {
        self.saved_sums.push(self.sum);
        self.sum += item.value;
        self.count += item.count;
        self.items.push(item);
    }

    /// Undo the most recent push
    pub fn pop(&mut self) -> Option<Item> {
        let item = self.items.pop()?;
        self.count -= item.count;
        self.sum = self.saved_sums.pop().unwrap_or(0.0);
        Some(item)
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn sum(&self) -> f64 {
        self.sum
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Sum per counted unit (0 for an empty partition)
    pub fn average(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }
}

/// Max-minus-min count, and max-minus-min average over non-empty partitions
pub fn partition_metrics(partitions: &[Partition]) -> (u32, f64) {
    let max_count = partitions.iter().map(|p| p.count).max().unwrap_or(0);
    let min_count = partitions.iter().map(|p| p.count).min().unwrap_or(0);

    let mut max_avg = f64::MIN;
    let mut min_avg = f64::MAX;
    for partition in partitions.iter().filter(|p| p.count > 0) {
        let avg = partition.average();
        max_avg = max_avg.max(avg);
        min_avg = min_avg.min(avg);
    }
    let spread = if max_avg >= min_avg { max_avg - min_avg } else { 0.0 };

    (max_count - min_count, spread)
}

#[derive(Clone, Copy, Debug)]
pub struct SearchOptions {
    pub partition_count: usize,
    /// Per-partition ceiling on summed item counts
    pub max_count: u32,
    /// Partition labels are significant (asymmetric rules); disables
    /// symmetry pruning
    pub ordered: bool,
    pub max_iterations: Option<u64>,
    pub deadline: Deadline,
}

impl SearchOptions {
    pub fn new(partition_count: usize, max_count: u32) -> Self {
        Self {
            partition_count,
            max_count,
            ordered: false,
            max_iterations: None,
            deadline: Deadline::never(),
        }
    }
}

/// Outcome of one partition search
#[derive(Clone, Debug)]
pub struct SearchResult {
    pub best_count_diff: u32,
    /// Only meaningful when `best` is set
    pub best_spread: f64,
    /// Snapshot of the best accepted assignment
    pub best: Option<Vec<Partition>>,
    /// Placements pushed
    pub iterations: u64,
    /// Complete assignments reached
    pub leaves: u64,
    pub is_timeout: bool,
    pub estimated_leaves: f64,
}

impl SearchResult {
    fn empty() -> Self {
        Self {
            best_count_diff: u32::MAX,
            best_spread: f64::INFINITY,
            best: None,
            iterations: 0,
            leaves: 0,
            is_timeout: false,
            estimated_leaves: 0.0,
        }
    }

    pub fn found(&self) -> bool {
        self.best.is_some()
    }
}

struct Frame {
    /// Partition indices sorted by running sum when the frame was entered
    order: Vec<usize>,
    cursor: usize,
}

/// Depth-first complete greedy search over a fixed number of partitions
pub struct PartitionSearch<F> {
    items: Vec<Item>,
    partitions: Vec<Partition>,
    interchangeable: Vec<bool>,
    options: SearchOptions,
    validator: F,
    result: SearchResult,
    stopped: bool,
}

impl<F> PartitionSearch<F>
where
    F: FnMut(&[Partition]) -> bool,
{
    /// `existing[i]` holds items pinned to partition `i` before the search
    pub fn new(
        mut items: Vec<Item>,
        existing: &[Vec<Item>],
        options: SearchOptions,
        validator: F,
    ) -> Result<Self> {
        if options.partition_count == 0 {
            return Err(RebalanceError::NoPartitions);
        }
        if existing.len() > options.partition_count {
            return Err(RebalanceError::TooManyExistingPartitions {
                existing: existing.len(),
                partition_count: options.partition_count,
            });
        }

        items.sort_by(|a, b| b.value.total_cmp(&a.value).then(a.id.cmp(&b.id)));
        for (sequence, item) in items.iter_mut().enumerate() {
            item.sequence = sequence;
        }

        let mut partitions: Vec<Partition> = (0..options.partition_count).map(Partition::new).collect();
        for (index, pinned) in existing.iter().enumerate() {
            for item in pinned {
                partitions[index].push(*item);
            }
        }
        let interchangeable: Vec<bool> = partitions.iter().map(|p| p.is_empty()).collect();

        let mut result = SearchResult::empty();
        result.estimated_leaves = estimate_leaves(
            items.len(),
            options.partition_count,
            if options.ordered {
                0
            } else {
                interchangeable.iter().filter(|&&free| free).count()
            },
        );

        Ok(Self {
            items,
            partitions,
            interchangeable,
            options,
            validator,
            result,
            stopped: false,
        })
    }

    pub fn run(mut self) -> SearchResult {
        if self.options.deadline.is_expired() {
            self.result.is_timeout = true;
            tracing::warn!("partition search started past its deadline");
            return self.result;
        }

        self.search();
        self.finish()
    }

    fn finish(self) -> SearchResult {
        tracing::debug!(
            items = self.items.len(),
            partitions = self.partitions.len(),
            iterations = self.result.iterations,
            leaves = self.result.leaves,
            estimated_leaves = self.result.estimated_leaves,
            timeout = self.result.is_timeout,
            found = self.result.found(),
            count_diff = self.result.best_count_diff,
            spread = self.result.best_spread,
            "partition search finished"
        );
        self.result
    }

    fn search(&mut self) {
        let depth_total = self.items.len();
        if depth_total == 0 {
            self.evaluate_leaf();
            return;
        }

        let n = self.partitions.len();
        let mut frames: Vec<Frame> = (0..depth_total)
            .map(|_| Frame {
                order: Vec::with_capacity(n),
                cursor: 0,
            })
            .collect();
        let mut depth = 0;
        self.sort_order(&mut frames[0].order);

        loop {
            let frame = &mut frames[depth];
            if frame.cursor == n {
                if depth == 0 {
                    return;
                }
                depth -= 1;
                let placed = frames[depth].order[frames[depth].cursor - 1];
                self.partitions[placed].pop();
                continue;
            }

            let p = frame.order[frame.cursor];
            frame.cursor += 1;
            let item = self.items[depth];
            if !self.can_place(p, &item) {
                continue;
            }
            if self.should_stop() {
                break;
            }

            self.result.iterations += 1;
            self.partitions[p].push(item);

            if depth + 1 == depth_total {
                self.evaluate_leaf();
                self.partitions[p].pop();
                if self.stopped {
                    break;
                }
                continue;
            }

            depth += 1;
            self.sort_order(&mut frames[depth].order);
            frames[depth].cursor = 0;
        }

        // unwind placements still on the stack
        for d in (0..depth).rev() {
            let placed = frames[d].order[frames[d].cursor - 1];
            self.partitions[placed].pop();
        }
    }

    fn sort_order(&self, order: &mut Vec<usize>) {
        order.clear();
        order.extend(0..self.partitions.len());
        let partitions = &self.partitions;
        order.sort_by(|&a, &b| {
            partitions[a]
                .sum
                .total_cmp(&partitions[b].sum)
                .then(a.cmp(&b))
        });
    }

    fn can_place(&self, p: usize, item: &Item) -> bool {
        let partition = &self.partitions[p];
        if partition.count + item.count > self.options.max_count {
            return false;
        }
        if !self.options.ordered && self.interchangeable[p] && partition.is_empty() {
            // an earlier interchangeable partition is still unopened
            let earlier_empty = (0..p).any(|q| self.interchangeable[q] && self.partitions[q].is_empty());
            if earlier_empty {
                return false;
            }
        }
        true
    }

    fn should_stop(&mut self) -> bool {
        let over_budget = self
            .options
            .max_iterations
            .map_or(false, |max| self.result.iterations >= max);
        if over_budget || self.options.deadline.is_expired() {
            self.result.is_timeout = true;
            self.stopped = true;
            return true;
        }
        false
    }

    fn evaluate_leaf(&mut self) {
        self.result.leaves += 1;
        let (count_diff, spread) = partition_metrics(&self.partitions);

        let better = count_diff < self.result.best_count_diff
            || (count_diff == self.result.best_count_diff && spread < self.result.best_spread);
        if !better {
            return;
        }
        if !(self.validator)(&self.partitions) {
            #[cfg(feature = "debug")]
            tracing::trace!(count_diff, spread, "candidate rejected by validator");
            return;
        }

        #[cfg(feature = "debug")]
        tracing::trace!(count_diff, spread, leaves = self.result.leaves, "new best assignment");

        self.result.best_count_diff = count_diff;
        self.result.best_spread = spread;
        self.result.best = Some(self.partitions.clone());

        if count_diff == 0 && spread <= 0.0 {
            self.stopped = true;
        }
    }
}

/// Rough leaf count: n^k assignments divided by the permutations of
/// interchangeable partitions
fn estimate_leaves(items: usize, partitions: usize, interchangeable: usize) -> f64 {
    let raw = (partitions as f64).powi(items as i32);
    let symmetry = FACTORIALS[interchangeable.min(items).min(FACTORIALS.len() - 1)] as f64;
    raw / symmetry
}

/// Run a complete greedy search; see `PartitionSearch`
pub fn run_partition_search<F>(
    items: Vec<Item>,
    existing: &[Vec<Item>],
    options: SearchOptions,
    validator: F,
) -> Result<SearchResult>
where
    F: FnMut(&[Partition]) -> bool,
{
    Ok(PartitionSearch::new(items, existing, options, validator)?.run())
}

#[cfg(test)]
impl<F> PartitionSearch<F>
where
    F: FnMut(&[Partition]) -> bool,
{
    /// Straightforward recursive walk; must match `run` node for node
    fn run_recursive(mut self) -> SearchResult {
        if self.options.deadline.is_expired() {
            self.result.is_timeout = true;
            return self.result;
        }
        if self.items.is_empty() {
            self.evaluate_leaf();
        } else {
            self.recurse(0);
        }
        self.result
    }

    fn recurse(&mut self, depth: usize) {
        let mut order = Vec::new();
        self.sort_order(&mut order);
        for p in order {
            let item = self.items[depth];
            if !self.can_place(p, &item) {
                continue;
            }
            if self.should_stop() {
                return;
            }
            self.result.iterations += 1;
            self.partitions[p].push(item);
            if depth + 1 == self.items.len() {
                self.evaluate_leaf();
            } else {
                self.recurse(depth + 1);
            }
            self.partitions[p].pop();
            if self.stopped {
                return;
            }
        }
    }
}
