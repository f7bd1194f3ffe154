use crate::deadline::Deadline;
use crate::types::{Ally, MatchingRule};
use crate::validator::CompositionValidator;

const EPSILON: f64 = 1e-9;

/// Result of a single `Swapper::step`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SwapOutcome {
    /// Moved parties between the teams; more swaps may follow
    Swapped,
    /// Swapped past equality; further swaps would overcorrect
    SwappedAndReversed,
    /// No acceptable swap left
    Done,
}

/// Totals for a driven swap loop
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SwapStats {
    pub swaps: usize,
    pub timed_out: bool,
}

struct SwapPlan {
    /// Position of the outgoing party in the higher team
    outgoing: usize,
    /// Positions of the incoming parties in the lower team
    incoming: Vec<usize>,
}

/// Local-search rebalancer for one pair of teams inside a layout
pub struct Swapper<'a, V: ?Sized> {
    teams: &'a mut [Ally],
    first: usize,
    second: usize,
    matching: &'a MatchingRule,
    validator: &'a V,
    done: bool,
}

impl<'a, V> Swapper<'a, V>
where
    V: CompositionValidator + ?Sized,
{
    pub fn new(
        teams: &'a mut [Ally],
        first: usize,
        second: usize,
        matching: &'a MatchingRule,
        validator: &'a V,
    ) -> Self {
        Self {
            teams,
            first,
            second,
            matching,
            validator,
            done: false,
        }
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Absolute difference of the two teams' average scores
    pub fn spread(&self) -> f64 {
        (self.teams[self.first].average(self.matching) - self.teams[self.second].average(self.matching)).abs()
    }

    /// Perform at most one swap
    pub fn step(&mut self) -> SwapOutcome {
        if self.done {
            return SwapOutcome::Done;
        }

        let avg_first = self.teams[self.first].average(self.matching);
        let avg_second = self.teams[self.second].average(self.matching);
        if (avg_first - avg_second).abs() <= EPSILON {
            self.done = true;
            return SwapOutcome::Done;
        }
        let (high, low) = if avg_first > avg_second {
            (self.first, self.second)
        } else {
            (self.second, self.first)
        };

        let high_order = self.unlocked_by_score(high, false);
        let low_order = self.unlocked_by_score(low, true);

        let old_high = self.teams[high].average(self.matching);
        let old_low = self.teams[low].average(self.matching);
        let old_spread = old_high - old_low;

        let mut reversing: Option<SwapPlan> = None;
        for &outgoing in &high_order {
            let needed = self.teams[high].parties[outgoing].player_count();
            for start in 0..low_order.len() {
                let incoming = match self.gather(low, &low_order[start..], needed) {
                    Some(incoming) => incoming,
                    None => continue,
                };
                let plan = SwapPlan { outgoing, incoming };
                let (new_high, new_low) = self.averages_after(high, low, &plan);

                // must move both teams toward each other
                if !(new_high < old_high - EPSILON && new_low > old_low + EPSILON) {
                    continue;
                }
                if !self.is_valid_after(high, low, &plan) {
                    continue;
                }

                if new_high >= new_low {
                    self.apply(high, low, &plan);
                    return SwapOutcome::Swapped;
                }
                if reversing.is_none() && (new_low - new_high) < old_spread {
                    reversing = Some(plan);
                }
            }
        }

        self.done = true;
        match reversing {
            Some(plan) => {
                self.apply(high, low, &plan);
                SwapOutcome::SwappedAndReversed
            }
            None => SwapOutcome::Done,
        }
    }

    /// Step until no swap is left, the deadline passes or `max_steps` swaps
    pub fn run_to_completion(&mut self, deadline: &Deadline, max_steps: usize) -> SwapStats {
        let mut stats = SwapStats::default();
        while stats.swaps < max_steps {
            if deadline.is_expired() {
                stats.timed_out = true;
                break;
            }
            match self.step() {
                SwapOutcome::Swapped => stats.swaps += 1,
                SwapOutcome::SwappedAndReversed => {
                    stats.swaps += 1;
                    break;
                }
                SwapOutcome::Done => break,
            }
        }
        stats
    }

    /// Positions of unlocked parties sorted by score
    fn unlocked_by_score(&self, team: usize, descending: bool) -> Vec<usize> {
        let parties = &self.teams[team].parties;
        let mut order: Vec<usize> = (0..parties.len())
            .filter(|&i| !parties[i].is_locked() && parties[i].player_count() > 0)
            .collect();
        let matching = self.matching;
        order.sort_by(|&a, &b| {
            let ord = parties[a]
                .score_of(matching)
                .total_cmp(&parties[b].score_of(matching));
            if descending {
                ord.reverse()
            } else {
                ord
            }
        });
        order
    }

    /// Parties from the front of `candidates` adding up to exactly `needed`
    /// players, always starting with the first one
    fn gather(&self, team: usize, candidates: &[usize], needed: usize) -> Option<Vec<usize>> {
        let parties = &self.teams[team].parties;
        let (&first, rest) = candidates.split_first()?;
        let mut filled = parties[first].player_count();
        if filled > needed {
            return None;
        }
        let mut picked = vec![first];
        for &extra in rest {
            if filled == needed {
                break;
            }
            let count = parties[extra].player_count();
            if filled + count <= needed {
                filled += count;
                picked.push(extra);
            }
        }
        (filled == needed).then_some(picked)
    }

    fn averages_after(&self, high: usize, low: usize, plan: &SwapPlan) -> (f64, f64) {
        let high_team = &self.teams[high];
        let low_team = &self.teams[low];
        let out_total = high_team.parties[plan.outgoing].total(self.matching);
        let in_total: f64 = plan
            .incoming
            .iter()
            .map(|&i| low_team.parties[i].total(self.matching))
            .sum();

        let high_count = high_team.player_count() as f64;
        let low_count = low_team.player_count() as f64;
        (
            (high_team.total(self.matching) - out_total + in_total) / high_count,
            (low_team.total(self.matching) - in_total + out_total) / low_count,
        )
    }

    fn is_valid_after(&self, high: usize, low: usize, plan: &SwapPlan) -> bool {
        let mut candidate = self.teams.to_vec();
        exchange(&mut candidate, high, low, plan);
        self.validator.validate_teams(&candidate, &[high, low]).is_ok()
    }

    fn apply(&mut self, high: usize, low: usize, plan: &SwapPlan) {
        tracing::debug!(
            high,
            low,
            outgoing = self.teams[high].parties[plan.outgoing].id,
            incoming = plan.incoming.len(),
            "swapping parties"
        );
        exchange(&mut *self.teams, high, low, plan);
    }
}

fn exchange(teams: &mut [Ally], high: usize, low: usize, plan: &SwapPlan) {
    let outgoing = teams[high].parties.remove(plan.outgoing);

    let mut positions = plan.incoming.clone();
    positions.sort_unstable_by(|a, b| b.cmp(a));
    let mut incoming: Vec<_> = positions
        .into_iter()
        .map(|i| teams[low].parties.remove(i))
        .collect();
    incoming.reverse();

    teams[high].parties.extend(incoming);
    teams[low].parties.push(outgoing);
}
