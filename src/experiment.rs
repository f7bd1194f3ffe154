use crate::error::Result;
use crate::rebalance::Rebalancer;
use crate::types::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

const ATTRIBUTE: &str = "mmr";

/// Shape of the random lobbies used by `compare_strategies`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LobbyConfig {
    pub lobbies: usize,
    pub team_count: usize,
    pub team_size: usize,
    /// Fraction of players queued in parties of 2-4
    pub party_player_fraction: f64,
    /// Probability that a party is already committed to its team
    pub locked_fraction: f64,
    pub skill_mean: f64,
    pub skill_spread: f64,
}

impl Default for LobbyConfig {
    fn default() -> Self {
        Self {
            lobbies: 50,
            team_count: 2,
            team_size: 5,
            party_player_fraction: 0.4,
            locked_fraction: 0.0,
            skill_mean: 1500.0,
            skill_spread: 500.0,
        }
    }
}

impl LobbyConfig {
    pub fn rule(&self) -> TeamRule {
        TeamRule::new(self.team_count, self.team_size, self.team_size)
    }

    pub fn matching_rule(&self) -> MatchingRule {
        MatchingRule {
            attributes: vec![AttributeRange {
                name: ATTRIBUTE.to_string(),
                min: Some(self.skill_mean - 2.0 * self.skill_spread),
                max: Some(self.skill_mean + 2.0 * self.skill_spread),
            }],
        }
    }
}

/// Aggregate results for one strategy over every lobby
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StrategyResult {
    pub strategy: Strategy,
    pub lobbies: usize,
    pub avg_spread_before: f64,
    pub avg_spread_after: f64,
    pub avg_count_diff_after: f64,
    /// Fraction of lobbies whose layout strictly improved
    pub improvement_rate: f64,
    pub timeout_rate: f64,
    pub avg_elapsed_ms: f64,
}

/// Skill around `mean`, roughly normal, clamped to two spreads
fn generate_skill(rng: &mut impl Rng, mean: f64, spread: f64) -> f64 {
    // Sum of uniforms approximates N(0,1)
    let sum: f64 = (0..12).map(|_| rng.gen::<f64>()).sum();
    let z = (sum - 6.0).clamp(-2.0, 2.0);
    mean + z * spread
}

fn sample_party_size(rng: &mut impl Rng, remaining: usize, party_fraction: f64) -> usize {
    let max_size = remaining.min(4);
    if max_size < 2 || !rng.gen_bool(party_fraction.clamp(0.0, 1.0)) {
        return 1;
    }
    match max_size {
        2 => 2,
        3 => {
            if rng.gen_bool(0.6) {
                3
            } else {
                2
            }
        }
        _ => {
            // bias toward 2-3 person parties
            let r: f64 = rng.gen();
            if r < 0.5 {
                2
            } else if r < 0.85 {
                3
            } else {
                4
            }
        }
    }
}

/// A full, valid lobby: every team holds exactly `team_size` players
pub fn generate_lobby(config: &LobbyConfig, rng: &mut impl Rng) -> Vec<Ally> {
    let mut next_member = 0u64;
    let mut next_party = 0u64;
    let mut teams = Vec::with_capacity(config.team_count);

    for _ in 0..config.team_count {
        let mut ally = Ally::default();
        let mut remaining = config.team_size;
        while remaining > 0 {
            let size = sample_party_size(rng, remaining, config.party_player_fraction);
            let members = (0..size)
                .map(|_| {
                    next_member += 1;
                    let skill = generate_skill(rng, config.skill_mean, config.skill_spread);
                    Member::new(next_member).with_attribute(ATTRIBUTE, skill)
                })
                .collect();
            next_party += 1;
            let mut party = Party::new(next_party, members);
            party.locked = rng.gen_bool(config.locked_fraction.clamp(0.0, 1.0));
            ally.parties.push(party);
            remaining -= size;
        }
        teams.push(ally);
    }

    teams
}

/// Run every strategy over the same seeded lobbies
pub fn compare_strategies(base: &RebalanceConfig, lobby: &LobbyConfig, seed: u64) -> Vec<StrategyResult> {
    let mut rng = StdRng::seed_from_u64(seed);
    let lobbies: Vec<Vec<Ally>> = (0..lobby.lobbies).map(|_| generate_lobby(lobby, &mut rng)).collect();
    let rule = lobby.rule();
    let matching = lobby.matching_rule();

    Strategy::all()
        .into_iter()
        .map(|strategy| {
            let rebalancer = Rebalancer::new(RebalanceConfig {
                strategy,
                ..base.clone()
            });

            let mut spread_before = 0.0;
            let mut spread_after = 0.0;
            let mut count_diff_after = 0.0;
            let mut improved = 0usize;
            let mut timed_out = 0usize;
            let mut elapsed_ms = 0.0;
            for teams in &lobbies {
                let (_, report) =
                    rebalancer.rebalance_with_report(teams, &rule, &matching, BlockedPlayerOption::Ignore);
                spread_before += report.spread_before;
                spread_after += report.spread_after;
                count_diff_after += report.count_diff_after as f64;
                improved += report.improved as usize;
                timed_out += report.timed_out as usize;
                elapsed_ms += report.elapsed_ms;
            }

            let n = lobbies.len().max(1) as f64;
            let result = StrategyResult {
                strategy,
                lobbies: lobbies.len(),
                avg_spread_before: spread_before / n,
                avg_spread_after: spread_after / n,
                avg_count_diff_after: count_diff_after / n,
                improvement_rate: improved as f64 / n,
                timeout_rate: timed_out as f64 / n,
                avg_elapsed_ms: elapsed_ms / n,
            };
            tracing::info!(
                ?strategy,
                lobbies = result.lobbies,
                avg_spread_before = result.avg_spread_before,
                avg_spread_after = result.avg_spread_after,
                improvement_rate = result.improvement_rate,
                "strategy compared"
            );
            result
        })
        .collect()
}

pub fn compare_strategies_json(base_config_json: &str, lobby_config_json: &str, seed: u64) -> Result<String> {
    let base: RebalanceConfig = serde_json::from_str(base_config_json)?;
    let lobby: LobbyConfig = serde_json::from_str(lobby_config_json)?;
    Ok(serde_json::to_string(&compare_strategies(&base, &lobby, seed))?)
}
