use crate::combination::{for_each_split, size_multisets, CapacityValidator, RoleQuotaValidator, SplitBlock};
use crate::deadline::Deadline;
use crate::error::{RebalanceError, Result};
use crate::group_combination::{generate_combinations, party_slices, GroupCombinationEngine};
use crate::partition::{run_partition_search, Item, Partition, SearchOptions};
use crate::swapper::Swapper;
use crate::types::*;
use crate::validator::{CompositionValidator, RuleValidator};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Before/after metrics for one rebalance pass
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RebalanceReport {
    pub strategy: Strategy,
    pub count_diff_before: usize,
    pub count_diff_after: usize,
    pub spread_before: f64,
    pub spread_after: f64,
    /// The returned layout is strictly better than the input
    pub improved: bool,
    pub timed_out: bool,
    /// Search nodes, swaps or enumerated sequences, depending on strategy
    pub iterations: u64,
    pub elapsed_ms: f64,
}

impl RebalanceReport {
    fn new(strategy: Strategy) -> Self {
        Self {
            strategy,
            count_diff_before: 0,
            count_diff_after: 0,
            spread_before: 0.0,
            spread_after: 0.0,
            improved: false,
            timed_out: false,
            iterations: 0,
            elapsed_ms: 0.0,
        }
    }
}

/// JSON response of `rebalance_json` and `rebalance_member_count_json`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RebalanceResponse {
    pub teams: Vec<Ally>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<RebalanceReport>,
}

/// JSON request of `generate_combinations_json`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CombinationsRequest {
    pub parties: Vec<Party>,
    pub rule: TeamRule,
}

/// Runs the rebalance pipelines with one configuration
pub struct Rebalancer {
    config: RebalanceConfig,
}

impl Default for Rebalancer {
    fn default() -> Self {
        Self::new(RebalanceConfig::default())
    }
}

impl Rebalancer {
    pub fn new(config: RebalanceConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RebalanceConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: RebalanceConfig) {
        self.config = config;
    }

    pub fn rebalance(
        &self,
        teams: &[Ally],
        rule: &TeamRule,
        matching: &MatchingRule,
        blocked: BlockedPlayerOption,
    ) -> Vec<Ally> {
        self.rebalance_with_report(teams, rule, matching, blocked).0
    }

    /// Rebalance with the configured strategy. Never fails: infeasible
    /// input, timeouts and malformed layouts all return the input unchanged.
    pub fn rebalance_with_report(
        &self,
        teams: &[Ally],
        rule: &TeamRule,
        matching: &MatchingRule,
        blocked: BlockedPlayerOption,
    ) -> (Vec<Ally>, RebalanceReport) {
        let strategy = self.config.strategy;
        let started = Deadline::never();
        let mut report = RebalanceReport::new(strategy);

        let outcome = match strategy {
            Strategy::Swap => self.rebalance_swap(teams, rule, matching, blocked, &mut report),
            Strategy::PartitionSearch => self.rebalance_partition(teams, rule, matching, blocked, &mut report),
            Strategy::Exhaustive => self.rebalance_exhaustive(teams, rule, matching, blocked, &mut report),
        };
        let result = match outcome {
            Ok(result) => result,
            Err(err) => {
                tracing::error!(%err, ?strategy, "rebalance failed, keeping current layout");
                teams.to_vec()
            }
        };

        report.count_diff_before = count_diff(teams);
        report.spread_before = score_spread(teams, matching);
        report.count_diff_after = count_diff(&result);
        report.spread_after = score_spread(&result, matching);
        report.improved = is_better(
            (report.count_diff_after, report.spread_after),
            (report.count_diff_before, report.spread_before),
        );
        report.elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        tracing::info!(
            ?strategy,
            teams = result.len(),
            count_diff_before = report.count_diff_before,
            count_diff_after = report.count_diff_after,
            spread_before = report.spread_before,
            spread_after = report.spread_after,
            timed_out = report.timed_out,
            elapsed_ms = report.elapsed_ms,
            "rebalance finished"
        );

        (result, report)
    }

    /// v1: pairwise swaps between adjacent teams
    fn rebalance_swap(
        &self,
        teams: &[Ally],
        rule: &TeamRule,
        matching: &MatchingRule,
        blocked: BlockedPlayerOption,
        report: &mut RebalanceReport,
    ) -> Result<Vec<Ally>> {
        let mut layout = adjust_team_count(teams, rule);
        if !has_unlocked(&layout) {
            tracing::debug!("no unlocked parties, nothing to swap");
            return Ok(teams.to_vec());
        }

        let validator = RuleValidator::new(rule, blocked);
        let deadline = Deadline::after_millis(self.config.swap_timeout_ms);
        for first in 0..layout.len().saturating_sub(1) {
            let mut swapper = Swapper::new(&mut layout, first, first + 1, matching, &validator);
            let stats = swapper.run_to_completion(&deadline, self.config.max_swap_steps);
            report.iterations += stats.swaps as u64;
            if stats.timed_out {
                report.timed_out = true;
                tracing::warn!(pair = first, "swap rebalance hit its deadline");
                break;
            }
        }

        Ok(layout)
    }

    /// v2: complete greedy partition search over every unlocked party
    fn rebalance_partition(
        &self,
        teams: &[Ally],
        rule: &TeamRule,
        matching: &MatchingRule,
        blocked: BlockedPlayerOption,
        report: &mut RebalanceReport,
    ) -> Result<Vec<Ally>> {
        let layout = adjust_team_count(teams, rule);

        // 1. Score every party; locked ones are pinned to their team
        let mut parties: Vec<&Party> = Vec::new();
        let mut items = Vec::new();
        let mut pinned: Vec<Vec<Item>> = vec![Vec::new(); rule.team_count];
        for (team, ally) in layout.iter().enumerate() {
            for party in &ally.parties {
                let item = Item::new(parties.len() as u64, party.total(matching), party.player_count() as u32);
                parties.push(party);
                if !party.is_locked() {
                    items.push(item);
                } else if team < rule.team_count {
                    pinned[team].push(item);
                } else {
                    return Err(RebalanceError::LockedTeamOutOfRange {
                        party: party.id,
                        team,
                        team_count: rule.team_count,
                    });
                }
            }
        }
        if items.is_empty() {
            tracing::debug!("no unlocked parties, nothing to search");
            return Ok(teams.to_vec());
        }

        // 2. Search, re-checking the full rule on every candidate
        let validator = RuleValidator::new(rule, blocked);
        let options = SearchOptions {
            partition_count: rule.team_count,
            max_count: u32::try_from(rule.largest_max_players()).unwrap_or(u32::MAX),
            ordered: rule.is_asymmetric() || self.config.ordered_partitions,
            max_iterations: Some(self.config.max_search_iterations),
            deadline: Deadline::after_millis(self.config.search_timeout_ms),
        };
        let result = run_partition_search(items, &pinned, options, |partitions: &[Partition]| {
            validator.validate(&to_allies(partitions, &parties)).is_ok()
        })?;
        report.iterations = result.iterations;
        report.timed_out = result.is_timeout;
        if result.is_timeout {
            tracing::warn!(
                iterations = result.iterations,
                found = result.found(),
                "partition search stopped early"
            );
        }

        let candidate = match result.best {
            Some(best) => to_allies(&best, &parties),
            None => {
                tracing::info!("no valid assignment found, keeping current layout");
                return Ok(teams.to_vec());
            }
        };

        // 3. Keep whichever of the candidate and the previous layout is better
        Ok(settle(teams, &layout, candidate, matching, &validator))
    }

    /// v2 variant: score every cohesive split of an unlocked lobby
    fn rebalance_exhaustive(
        &self,
        teams: &[Ally],
        rule: &TeamRule,
        matching: &MatchingRule,
        blocked: BlockedPlayerOption,
        report: &mut RebalanceReport,
    ) -> Result<Vec<Ally>> {
        let layout = adjust_team_count(teams, rule);
        if layout.iter().flat_map(|t| &t.parties).any(|p| p.is_locked()) {
            tracing::debug!("locked parties present, using partition search");
            return self.rebalance_partition(teams, rule, matching, blocked, report);
        }

        let parties: Vec<Party> = layout.iter().flat_map(|t| t.parties.iter().cloned()).collect();
        if parties.is_empty() {
            return Ok(teams.to_vec());
        }

        let validator = RuleValidator::new(rule, blocked);
        let mut scorer = SplitScorer::new(&parties, rule.team_count, matching, &validator);
        let deadline = Deadline::after_millis(self.config.search_timeout_ms);
        match self.score_splits(&parties, rule, &deadline, &mut scorer) {
            Ok(timed_out) => report.timed_out = timed_out,
            Err(err @ (RebalanceError::TooManyPlayers { .. } | RebalanceError::TooManyParties { .. })) => {
                tracing::debug!(%err, "lobby too large to enumerate, using partition search");
                return self.rebalance_partition(teams, rule, matching, blocked, report);
            }
            Err(err) => return Err(err),
        }
        report.iterations = scorer.scored;
        if report.timed_out {
            tracing::warn!(scored = scorer.scored, "split enumeration hit its deadline");
        }

        match scorer.best {
            Some((candidate, _)) => Ok(settle(teams, &layout, candidate, matching, &validator)),
            None => {
                tracing::info!(candidates = scorer.scored, "no valid split found, keeping current layout");
                Ok(teams.to_vec())
            }
        }
    }

    /// Feed every split to `scorer` as it is produced. Asymmetric rules and
    /// `ordered_partitions` use ordered team sequences; otherwise splits are
    /// label-free and pruned by role quotas. Returns whether the deadline
    /// cut enumeration short.
    fn score_splits(
        &self,
        parties: &[Party],
        rule: &TeamRule,
        deadline: &Deadline,
        scorer: &mut SplitScorer<'_>,
    ) -> Result<bool> {
        let slices = party_slices(parties);
        let engine = GroupCombinationEngine::new(
            &slices,
            rule.team_count,
            rule.smallest_min_players(),
            rule.largest_max_players(),
        )
        .with_player_limit(self.config.max_combination_players);
        if rule.is_asymmetric() || self.config.ordered_partitions {
            let set = engine.sequences(deadline)?;
            for sequence in &set.sequences {
                let teams: Vec<&[usize]> = sequence.iter().map(Vec::as_slice).collect();
                scorer.offer(&teams);
            }
            return Ok(set.timed_out);
        }
        engine.check_limits()?;

        let roles: HashMap<u64, String> = parties
            .iter()
            .flat_map(|p| &p.members)
            .filter_map(|m| m.role.clone().map(|role| (m.id, role)))
            .collect();
        let players: usize = slices.iter().map(|s| s.len()).sum();

        for sizes in size_multisets(players, rule.team_count, rule.min_players, rule.max_players) {
            let mut offer = |split: &[SplitBlock]| {
                let teams: Vec<&[usize]> = split.iter().map(|block| block.groups.as_slice()).collect();
                scorer.offer(&teams);
            };
            let walk = if rule.role_quotas.is_empty() {
                for_each_split(&slices, &sizes, CapacityValidator::new, deadline, &mut offer)
            } else {
                for_each_split(
                    &slices,
                    &sizes,
                    |capacity| RoleQuotaValidator::new(capacity, &rule.role_quotas, &roles),
                    deadline,
                    &mut offer,
                )
            };
            if walk.timed_out {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Even out player counts only: unlocked parties, largest first, go to
    /// the valid team with the fewest players. Any infeasible placement
    /// returns the input unchanged.
    pub fn rebalance_member_count(
        &self,
        teams: &[Ally],
        rule: &TeamRule,
        blocked: BlockedPlayerOption,
    ) -> Vec<Ally> {
        // 1. Strip unlocked parties, keeping locked ones in place
        let mut layout = adjust_team_count(teams, rule);
        let mut unlocked: Vec<Party> = Vec::new();
        for ally in layout.iter_mut() {
            let (locked, free): (Vec<Party>, Vec<Party>) = ally.parties.drain(..).partition(|p| p.is_locked());
            ally.parties = locked;
            unlocked.extend(free);
        }
        if unlocked.is_empty() {
            return teams.to_vec();
        }
        unlocked.sort_by(|a, b| b.player_count().cmp(&a.player_count()));

        // 2. Greedy placement, checking upper bounds per team
        let validator = RuleValidator::new(rule, blocked);
        for party in unlocked {
            let mut order: Vec<usize> = (0..layout.len()).collect();
            order.sort_by_key(|&team| layout[team].player_count());

            let party_id = party.id;
            let mut pending = Some(party);
            for team in order {
                let Some(party) = pending.take() else { break };
                layout[team].parties.push(party);
                if validator.validate_partial(team, &layout[team]).is_ok() {
                    break;
                }
                pending = layout[team].parties.pop();
            }
            if pending.is_some() {
                tracing::info!(party = party_id, "party fits no team, keeping current layout");
                return teams.to_vec();
            }
        }

        // 3. The finished layout must satisfy the whole rule
        if let Err(err) = validator.validate(&layout) {
            tracing::info!(%err, "member count layout invalid, keeping current layout");
            return teams.to_vec();
        }
        layout
    }

    /// Party-index combinations that can fill one team; refuses lobbies over
    /// `max_combination_players`
    pub fn generate_combinations(&self, parties: &[Party], rule: &TeamRule) -> Result<Vec<Vec<usize>>> {
        generate_combinations(parties, rule, self.config.max_combination_players)
    }

    pub fn rebalance_request(&self, request: &RebalanceRequest) -> RebalanceResponse {
        let (teams, report) = self.rebalance_with_report(
            &request.teams,
            &request.rule,
            &request.matching_rule,
            request.blocked_player_option,
        );
        RebalanceResponse {
            teams,
            report: Some(report),
        }
    }

    pub fn rebalance_json(&self, request_json: &str) -> Result<String> {
        let request: RebalanceRequest = serde_json::from_str(request_json)?;
        Ok(serde_json::to_string(&self.rebalance_request(&request))?)
    }

    pub fn rebalance_member_count_json(&self, request_json: &str) -> Result<String> {
        let request: RebalanceRequest = serde_json::from_str(request_json)?;
        let teams = self.rebalance_member_count(&request.teams, &request.rule, request.blocked_player_option);
        Ok(serde_json::to_string(&RebalanceResponse { teams, report: None })?)
    }

    pub fn generate_combinations_json(&self, request_json: &str) -> Result<String> {
        let request: CombinationsRequest = serde_json::from_str(request_json)?;
        let combinations = self.generate_combinations(&request.parties, &request.rule)?;
        Ok(serde_json::to_string(&combinations)?)
    }
}

/// Pad the layout with empty teams up to the rule's team count
fn adjust_team_count(teams: &[Ally], rule: &TeamRule) -> Vec<Ally> {
    let mut layout = teams.to_vec();
    if layout.len() < rule.team_count {
        layout.resize_with(rule.team_count, Ally::default);
    }
    layout
}

fn has_unlocked(teams: &[Ally]) -> bool {
    teams
        .iter()
        .flat_map(|t| &t.parties)
        .any(|p| !p.is_locked() && p.player_count() > 0)
}

fn to_allies(partitions: &[Partition], parties: &[&Party]) -> Vec<Ally> {
    partitions
        .iter()
        .map(|partition| {
            Ally::new(
                partition
                    .items()
                    .iter()
                    .map(|item| parties[item.id as usize].clone())
                    .collect(),
            )
        })
        .collect()
}

/// Lexicographic (count diff, spread) comparison
fn is_better(candidate: (usize, f64), current: (usize, f64)) -> bool {
    candidate.0 < current.0 || (candidate.0 == current.0 && candidate.1 < current.1)
}

/// Pick the candidate unless the previous layout is valid and strictly
/// better; fully empty teams are dropped from the result
fn settle<V: CompositionValidator>(
    input: &[Ally],
    previous: &[Ally],
    mut candidate: Vec<Ally>,
    matching: &MatchingRule,
    validator: &V,
) -> Vec<Ally> {
    let previous_metrics = (count_diff(previous), score_spread(previous, matching));
    let candidate_metrics = (count_diff(&candidate), score_spread(&candidate, matching));
    if validator.validate(previous).is_ok() && is_better(previous_metrics, candidate_metrics) {
        tracing::debug!(
            previous_spread = previous_metrics.1,
            candidate_spread = candidate_metrics.1,
            "previous layout is better, keeping it"
        );
        return input.to_vec();
    }

    candidate.retain(|team| !team.is_empty());
    candidate
}

/// Keeps the best valid split offered so far. Metrics come from cached
/// party totals; parties are cloned only for a candidate that beats the
/// current best.
struct SplitScorer<'a> {
    parties: &'a [Party],
    totals: Vec<f64>,
    team_count: usize,
    validator: &'a RuleValidator<'a>,
    best: Option<(Vec<Ally>, (usize, f64))>,
    scored: u64,
}

impl<'a> SplitScorer<'a> {
    fn new(parties: &'a [Party], team_count: usize, matching: &MatchingRule, validator: &'a RuleValidator<'a>) -> Self {
        Self {
            parties,
            totals: parties.iter().map(|p| p.total(matching)).collect(),
            team_count,
            validator,
            best: None,
            scored: 0,
        }
    }

    /// Same values as `count_diff` and `score_spread` on the built teams
    fn metrics(&self, teams: &[&[usize]]) -> (usize, f64) {
        let mut min_count = usize::MAX;
        let mut max_count = 0;
        let mut min_avg = f64::MAX;
        let mut max_avg = f64::MIN;
        for team in teams {
            let count: usize = team.iter().map(|&p| self.parties[p].player_count()).sum();
            min_count = min_count.min(count);
            max_count = max_count.max(count);
            if count > 0 {
                let total: f64 = team.iter().map(|&p| self.totals[p]).sum();
                let average = total / count as f64;
                min_avg = min_avg.min(average);
                max_avg = max_avg.max(average);
            }
        }
        if teams.len() < self.team_count {
            min_count = 0;
        }
        let spread = if max_avg >= min_avg { max_avg - min_avg } else { 0.0 };
        (max_count - min_count.min(max_count), spread)
    }

    fn offer(&mut self, teams: &[&[usize]]) {
        self.scored += 1;
        let metrics = self.metrics(teams);
        if let Some((_, best_metrics)) = &self.best {
            if !is_better(metrics, *best_metrics) {
                return;
            }
        }

        let mut candidate: Vec<Ally> = teams
            .iter()
            .map(|team| Ally::new(team.iter().map(|&p| self.parties[p].clone()).collect()))
            .collect();
        candidate.resize_with(self.team_count.max(candidate.len()), Ally::default);
        if self.validator.validate(&candidate).is_ok() {
            self.best = Some((candidate, metrics));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solo_team(values: &[(u64, f64)]) -> Ally {
        Ally::new(values.iter().map(|&(id, v)| Party::solo(id, "mmr", v)).collect())
    }

    fn ids(ally: &Ally) -> Vec<u64> {
        let mut ids: Vec<u64> = ally.members().map(|m| m.id).collect();
        ids.sort_unstable();
        ids
    }

    fn rebalancer(strategy: Strategy) -> Rebalancer {
        Rebalancer::new(RebalanceConfig {
            strategy,
            ..RebalanceConfig::default()
        })
    }

    fn unbalanced() -> Vec<Ally> {
        vec![
            solo_team(&[(10, 10.0), (8, 8.0), (9, 9.0)]),
            solo_team(&[(7, 7.0)]),
        ]
    }

    #[test]
    fn test_partition_search_end_to_end() {
        let matching = MatchingRule::single("mmr");
        let rule = TeamRule::new(2, 2, 2);
        let (teams, report) = rebalancer(Strategy::PartitionSearch).rebalance_with_report(
            &unbalanced(),
            &rule,
            &matching,
            BlockedPlayerOption::Ignore,
        );

        assert_eq!(teams.len(), 2);
        let mut splits: Vec<Vec<u64>> = teams.iter().map(ids).collect();
        splits.sort();
        assert_eq!(splits, vec![vec![7, 10], vec![8, 9]]);
        assert_eq!(score_spread(&teams, &matching), 0.0);

        assert!(report.improved);
        assert_eq!(report.spread_before, 2.0);
        assert_eq!(report.spread_after, 0.0);
        assert_eq!(report.count_diff_before, 2);
        assert_eq!(report.count_diff_after, 0);
        assert!(!report.timed_out);
    }

    #[test]
    fn test_exhaustive_end_to_end() {
        let matching = MatchingRule::single("mmr");
        let rule = TeamRule::new(2, 2, 2);
        let (teams, report) = rebalancer(Strategy::Exhaustive).rebalance_with_report(
            &unbalanced(),
            &rule,
            &matching,
            BlockedPlayerOption::Ignore,
        );
        let mut splits: Vec<Vec<u64>> = teams.iter().map(ids).collect();
        splits.sort();
        assert_eq!(splits, vec![vec![7, 10], vec![8, 9]]);
        assert!(report.improved);
        assert!(report.iterations > 0);
    }

    #[test]
    fn test_all_locked_is_idempotent() {
        let matching = MatchingRule::single("mmr");
        let rule = TeamRule::new(2, 1, 3);
        let teams = vec![
            Ally::new(vec![Party::solo(1, "mmr", 10.0).locked(), Party::solo(2, "mmr", 9.0).locked()]),
            Ally::new(vec![Party::solo(3, "mmr", 1.0).locked()]),
        ];
        for strategy in Strategy::all() {
            let (result, report) =
                rebalancer(strategy).rebalance_with_report(&teams, &rule, &matching, BlockedPlayerOption::Ignore);
            assert_eq!(result, teams, "{:?}", strategy);
            assert!(!report.improved);
        }
        let counted = Rebalancer::default().rebalance_member_count(&teams, &rule, BlockedPlayerOption::Ignore);
        assert_eq!(counted, teams);
    }

    #[test]
    fn test_expired_search_returns_input() {
        let matching = MatchingRule::single("mmr");
        let rule = TeamRule::new(2, 2, 2);
        let rebalancer = Rebalancer::new(RebalanceConfig {
            search_timeout_ms: 0,
            ..RebalanceConfig::default()
        });
        let (teams, report) =
            rebalancer.rebalance_with_report(&unbalanced(), &rule, &matching, BlockedPlayerOption::Ignore);
        assert_eq!(teams, unbalanced());
        assert!(report.timed_out);
        assert!(!report.improved);
    }

    #[test]
    fn test_locked_party_outside_rule_returns_input() {
        let matching = MatchingRule::single("mmr");
        let rule = TeamRule::new(2, 1, 3);
        let teams = vec![
            solo_team(&[(1, 5.0)]),
            solo_team(&[(2, 6.0)]),
            Ally::new(vec![Party::solo(3, "mmr", 7.0).locked()]),
        ];
        let result = Rebalancer::default().rebalance(&teams, &rule, &matching, BlockedPlayerOption::Ignore);
        assert_eq!(result, teams);
    }

    #[test]
    fn test_locked_parties_stay_on_their_team() {
        let matching = MatchingRule::single("mmr");
        let rule = TeamRule::new(2, 2, 2);
        let teams = vec![
            Ally::new(vec![Party::solo(1, "mmr", 10.0).locked(), Party::solo(2, "mmr", 9.0)]),
            Ally::new(vec![Party::solo(3, "mmr", 8.0), Party::solo(4, "mmr", 7.0)]),
        ];
        let result = Rebalancer::default().rebalance(&teams, &rule, &matching, BlockedPlayerOption::Ignore);
        assert_eq!(ids(&result[0]), vec![1, 4]);
        assert_eq!(ids(&result[1]), vec![2, 3]);
    }

    #[test]
    fn test_balanced_input_is_not_reported_as_improved() {
        let matching = MatchingRule::single("mmr");
        let rule = TeamRule::new(2, 2, 2);
        let teams = vec![solo_team(&[(1, 10.0), (4, 7.0)]), solo_team(&[(2, 9.0), (3, 8.0)])];
        let (result, report) =
            Rebalancer::default().rebalance_with_report(&teams, &rule, &matching, BlockedPlayerOption::Ignore);
        assert_eq!(score_spread(&result, &matching), 0.0);
        assert!(!report.improved);
    }

    #[test]
    fn test_swap_strategy_keeps_headcount() {
        let matching = MatchingRule::single("mmr");
        let rule = TeamRule::new(2, 2, 2);
        let teams = vec![solo_team(&[(1, 10.0), (2, 8.0)]), solo_team(&[(3, 9.0), (4, 7.0)])];
        let (result, report) =
            rebalancer(Strategy::Swap).rebalance_with_report(&teams, &rule, &matching, BlockedPlayerOption::Ignore);
        assert_eq!(ids(&result[0]), vec![1, 4]);
        assert_eq!(ids(&result[1]), vec![2, 3]);
        assert_eq!(report.iterations, 1);
        assert!(report.improved);
    }

    #[test]
    fn test_swap_strategy_pads_missing_teams() {
        let matching = MatchingRule::single("mmr");
        let rule = TeamRule::new(3, 0, 3);
        let teams = vec![solo_team(&[(1, 4.0)]), solo_team(&[(2, 5.0)])];
        let result = rebalancer(Strategy::Swap).rebalance(&teams, &rule, &matching, BlockedPlayerOption::Ignore);
        assert_eq!(result.len(), 3);
        assert!(result[2].is_empty());
    }

    #[test]
    fn test_asymmetric_rule_respects_slots() {
        let matching = MatchingRule::single("mmr");
        let rule = TeamRule {
            team_overrides: vec![TeamOverride {
                team: 0,
                min_players: Some(1),
                max_players: Some(1),
                role_quotas: None,
            }],
            ..TeamRule::new(2, 3, 3)
        };
        let teams = vec![solo_team(&[(1, 5.0), (2, 6.0)]), solo_team(&[(3, 7.0), (4, 8.0)])];
        for strategy in [Strategy::PartitionSearch, Strategy::Exhaustive] {
            let result = rebalancer(strategy).rebalance(&teams, &rule, &matching, BlockedPlayerOption::Ignore);
            assert_eq!(result[0].player_count(), 1, "{:?}", strategy);
            assert_eq!(result[1].player_count(), 3, "{:?}", strategy);
        }
    }

    #[test]
    fn test_exhaustive_honours_role_quotas() {
        let matching = MatchingRule::single("mmr");
        let rule = TeamRule {
            role_quotas: vec![RoleQuota {
                role: "tank".to_string(),
                min: 1,
                max: 1,
            }],
            ..TeamRule::new(2, 2, 2)
        };
        let player = |id: u64, role: &str, mmr: f64| {
            Party::new(id, vec![Member::new(id).with_role(role).with_attribute("mmr", mmr)])
        };
        let teams = vec![
            Ally::new(vec![player(1, "tank", 10.0), player(2, "tank", 9.0)]),
            Ally::new(vec![player(3, "dps", 8.0), player(4, "dps", 7.0)]),
        ];
        let (result, report) =
            rebalancer(Strategy::Exhaustive).rebalance_with_report(&teams, &rule, &matching, BlockedPlayerOption::Ignore);
        let mut splits: Vec<Vec<u64>> = result.iter().map(ids).collect();
        splits.sort();
        assert_eq!(splits, vec![vec![1, 4], vec![2, 3]]);
        // only the two one-tank splits are enumerated
        assert_eq!(report.iterations, 2);
    }

    #[test]
    fn test_blocked_players_are_separated() {
        let matching = MatchingRule::single("mmr");
        let rule = TeamRule::new(2, 2, 2);
        let teams = vec![
            Ally::new(vec![
                Party::new(1, vec![Member::new(1).with_attribute("mmr", 10.0).with_blocked(&[4])]),
                Party::solo(2, "mmr", 9.0),
            ]),
            solo_team(&[(3, 8.0), (4, 7.0)]),
        ];
        let result =
            Rebalancer::default().rebalance(&teams, &rule, &matching, BlockedPlayerOption::SeparateTeams);
        let validator = RuleValidator::new(&rule, BlockedPlayerOption::SeparateTeams);
        assert_eq!(validator.validate(&result), Ok(()));
        assert!(result.iter().all(|team| !(ids(team).contains(&1) && ids(team).contains(&4))));
    }

    #[test]
    fn test_exhaustive_matches_partition_search() {
        let matching = MatchingRule::single("mmr");
        let rule = TeamRule::new(2, 3, 3);
        let teams = vec![solo_team(&[(1, 1.0), (2, 2.0), (3, 3.0), (4, 4.0), (5, 5.0), (6, 6.0)])];

        let searched = rebalancer(Strategy::PartitionSearch).rebalance(&teams, &rule, &matching, BlockedPlayerOption::Ignore);
        let enumerated = rebalancer(Strategy::Exhaustive).rebalance(&teams, &rule, &matching, BlockedPlayerOption::Ignore);
        let expected = 1.0 / 3.0;
        assert!((score_spread(&searched, &matching) - expected).abs() < 1e-9);
        assert!((score_spread(&enumerated, &matching) - expected).abs() < 1e-9);
    }

    #[test]
    fn test_exhaustive_falls_back_for_large_lobbies() {
        let matching = MatchingRule::single("mmr");
        let rule = TeamRule::new(2, 2, 2);
        let rebalancer = Rebalancer::new(RebalanceConfig {
            strategy: Strategy::Exhaustive,
            max_combination_players: 2,
            ..RebalanceConfig::default()
        });
        let teams = rebalancer.rebalance(&unbalanced(), &rule, &matching, BlockedPlayerOption::Ignore);
        assert_eq!(score_spread(&teams, &matching), 0.0);
    }

    #[test]
    fn test_exhaustive_stops_at_deadline_on_full_lobby() {
        // 16 solos into 4 teams of 4 has over two million label-free splits
        let matching = MatchingRule::single("mmr");
        let rule = TeamRule::new(4, 4, 4);
        let teams: Vec<Ally> = (0..4u64)
            .map(|team| {
                let values: Vec<(u64, f64)> = (1..=4u64)
                    .map(|k| {
                        let id = team * 4 + k;
                        (id, id as f64)
                    })
                    .collect();
                solo_team(&values)
            })
            .collect();
        let rebalancer = Rebalancer::new(RebalanceConfig {
            strategy: Strategy::Exhaustive,
            search_timeout_ms: 1,
            ..RebalanceConfig::default()
        });

        let (result, report) = rebalancer.rebalance_with_report(&teams, &rule, &matching, BlockedPlayerOption::Ignore);
        assert!(report.timed_out);
        assert!(report.iterations < 2_627_625);
        assert!(report.elapsed_ms < 1_000.0, "took {} ms", report.elapsed_ms);
        assert!(report.spread_after <= report.spread_before);
        let validator = RuleValidator::new(&rule, BlockedPlayerOption::Ignore);
        assert_eq!(validator.validate(&result), Ok(()));
    }

    #[test]
    fn test_ordered_partitions_enumerate_labelled_sequences() {
        let matching = MatchingRule::single("mmr");
        let rule = TeamRule::new(2, 2, 2);
        let (_, label_free) =
            rebalancer(Strategy::Exhaustive).rebalance_with_report(&unbalanced(), &rule, &matching, BlockedPlayerOption::Ignore);
        let ordered = Rebalancer::new(RebalanceConfig {
            strategy: Strategy::Exhaustive,
            ordered_partitions: true,
            ..RebalanceConfig::default()
        });
        let (teams, labelled) = ordered.rebalance_with_report(&unbalanced(), &rule, &matching, BlockedPlayerOption::Ignore);

        // {a,b}/{c,d} is scored once per team order
        assert_eq!(label_free.iterations, 3);
        assert_eq!(labelled.iterations, 6);
        assert_eq!(score_spread(&teams, &matching), 0.0);
    }

    #[test]
    fn test_swap_ignores_teams_outside_the_pair() {
        // team 2 is short of the minimum and stays that way
        let matching = MatchingRule::single("mmr");
        let rule = TeamRule::new(3, 2, 2);
        let teams = vec![
            solo_team(&[(1, 10.0), (2, 8.0)]),
            solo_team(&[(3, 9.0), (4, 7.0)]),
            solo_team(&[(5, 5.0)]),
        ];
        let (result, report) =
            rebalancer(Strategy::Swap).rebalance_with_report(&teams, &rule, &matching, BlockedPlayerOption::Ignore);
        assert_eq!(ids(&result[0]), vec![1, 4]);
        assert_eq!(ids(&result[1]), vec![2, 3]);
        assert_eq!(ids(&result[2]), vec![5]);
        assert_eq!(report.iterations, 1);
        assert!(report.improved);
    }

    #[test]
    fn test_member_count_places_largest_first() {
        let rule = TeamRule::new(2, 1, 2);
        let duo = Party::new(1, vec![Member::new(1), Member::new(2)]);
        let teams = vec![Ally::new(vec![
            duo,
            Party::new(3, vec![Member::new(3)]),
            Party::new(4, vec![Member::new(4)]),
        ])];
        let result = Rebalancer::default().rebalance_member_count(&teams, &rule, BlockedPlayerOption::Ignore);
        assert_eq!(result.len(), 2);
        assert_eq!(ids(&result[0]), vec![1, 2]);
        assert_eq!(ids(&result[1]), vec![3, 4]);
    }

    #[test]
    fn test_member_count_keeps_locked_parties() {
        let rule = TeamRule::new(2, 1, 3);
        let teams = vec![
            Ally::new(vec![
                Party::new(1, vec![Member::new(1)]).locked(),
                Party::new(2, vec![Member::new(2)]),
                Party::new(3, vec![Member::new(3)]),
            ]),
            Ally::default(),
        ];
        let result = Rebalancer::default().rebalance_member_count(&teams, &rule, BlockedPlayerOption::Ignore);
        assert!(result[0].parties.iter().any(|p| p.id == 1));
        assert_eq!(count_diff(&result), 1);
    }

    #[test]
    fn test_member_count_infeasible_returns_input() {
        let rule = TeamRule::new(2, 1, 1);
        let teams = vec![Ally::new(vec![Party::new(1, vec![Member::new(1), Member::new(2)])])];
        let result = Rebalancer::default().rebalance_member_count(&teams, &rule, BlockedPlayerOption::Ignore);
        assert_eq!(result, teams);
    }

    #[test]
    fn test_rebalance_json() {
        let request = r#"{
            "teams": [
                {"parties": [
                    {"id": 1, "members": [{"id": 1, "attributes": {"mmr": 10.0}}]},
                    {"id": 2, "members": [{"id": 2, "attributes": {"mmr": 8.0}}]},
                    {"id": 3, "members": [{"id": 3, "attributes": {"mmr": 9.0}}]}
                ]},
                {"parties": [{"id": 4, "members": [{"id": 4, "attributes": {"mmr": 7.0}}]}]}
            ],
            "rule": {"team_count": 2, "min_players": 2, "max_players": 2},
            "matching_rule": {"attributes": [{"name": "mmr"}]}
        }"#;
        let json = Rebalancer::default().rebalance_json(request).unwrap();
        let response: RebalanceResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(response.teams.len(), 2);
        let report = response.report.unwrap();
        assert!(report.improved);
        assert_eq!(report.strategy, Strategy::PartitionSearch);
    }

    #[test]
    fn test_json_errors_surface() {
        assert!(matches!(
            Rebalancer::default().rebalance_json("not json"),
            Err(RebalanceError::Json(_))
        ));

        let request = r#"{
            "parties": [
                {"id": 1, "members": [{"id": 1}, {"id": 2}]},
                {"id": 2, "members": [{"id": 3}]}
            ],
            "rule": {"team_count": 2, "min_players": 1, "max_players": 2}
        }"#;
        let small = Rebalancer::new(RebalanceConfig {
            max_combination_players: 2,
            ..RebalanceConfig::default()
        });
        assert!(matches!(
            small.generate_combinations_json(request),
            Err(RebalanceError::TooManyPlayers { count: 3, limit: 2 })
        ));

        let json = Rebalancer::default().generate_combinations_json(request).unwrap();
        let combinations: Vec<Vec<usize>> = serde_json::from_str(&json).unwrap();
        assert_eq!(combinations, vec![vec![0], vec![1]]);
    }
}
