use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A single player inside a party
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Member {
    pub id: u64,
    /// Role the player queued as (e.g. "tank", "healer")
    #[serde(default)]
    pub role: Option<String>,
    /// Raw attribute values (e.g. "mmr" -> 1830.0)
    #[serde(default)]
    pub attributes: HashMap<String, f64>,
    /// Players this member refuses to share a team with
    #[serde(default)]
    pub blocked: Vec<u64>,
}

impl Member {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            role: None,
            attributes: HashMap::new(),
            blocked: Vec::new(),
        }
    }

    pub fn with_attribute(mut self, name: &str, value: f64) -> Self {
        self.attributes.insert(name.to_string(), value);
        self
    }

    pub fn with_role(mut self, role: &str) -> Self {
        self.role = Some(role.to_string());
        self
    }

    pub fn with_blocked(mut self, blocked: &[u64]) -> Self {
        self.blocked.extend_from_slice(blocked);
        self
    }

    /// Normalized average of the matching attributes for this player.
    /// Missing attributes count as 0.
    pub fn score(&self, matching: &MatchingRule) -> f64 {
        if matching.attributes.is_empty() {
            return 0.0;
        }
        let sum: f64 = matching
            .attributes
            .iter()
            .map(|attr| {
                let raw = self.attributes.get(&attr.name).copied().unwrap_or(0.0);
                attr.normalize(raw)
            })
            .sum();
        sum / matching.attributes.len() as f64
    }
}

/// An indivisible group of players that always lands on the same team
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Party {
    pub id: u64,
    pub members: Vec<Member>,
    /// Locked parties are already committed to their team (e.g. backfill)
    #[serde(default)]
    pub locked: bool,
}

impl Party {
    pub fn new(id: u64, members: Vec<Member>) -> Self {
        Self {
            id,
            members,
            locked: false,
        }
    }

    /// Single-player party whose one member carries `value` for `attribute`
    pub fn solo(id: u64, attribute: &str, value: f64) -> Self {
        Self::new(id, vec![Member::new(id).with_attribute(attribute, value)])
    }

    pub fn locked(mut self) -> Self {
        self.locked = true;
        self
    }

    pub fn player_count(&self) -> usize {
        self.members.len()
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Sum of member scores
    pub fn total(&self, matching: &MatchingRule) -> f64 {
        self.members.iter().map(|m| m.score(matching)).sum()
    }

    /// Average member score (0 for an empty party)
    pub fn score_of(&self, matching: &MatchingRule) -> f64 {
        if self.members.is_empty() {
            return 0.0;
        }
        self.total(matching) / self.members.len() as f64
    }

    pub fn role_count(&self, role: &str) -> usize {
        self.members
            .iter()
            .filter(|m| m.role.as_deref() == Some(role))
            .count()
    }
}

/// One side of a match: an ordered list of parties
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Ally {
    pub parties: Vec<Party>,
}

impl Ally {
    pub fn new(parties: Vec<Party>) -> Self {
        Self { parties }
    }

    pub fn player_count(&self) -> usize {
        self.parties.iter().map(|p| p.player_count()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.parties.iter().all(|p| p.members.is_empty())
    }

    pub fn total(&self, matching: &MatchingRule) -> f64 {
        self.parties.iter().map(|p| p.total(matching)).sum()
    }

    /// Average player score across the team (0 for an empty team)
    pub fn average(&self, matching: &MatchingRule) -> f64 {
        let count = self.player_count();
        if count == 0 {
            return 0.0;
        }
        self.total(matching) / count as f64
    }

    pub fn role_count(&self, role: &str) -> usize {
        self.parties.iter().map(|p| p.role_count(role)).sum()
    }

    pub fn members(&self) -> impl Iterator<Item = &Member> {
        self.parties.iter().flat_map(|p| p.members.iter())
    }
}

/// Player-count bounds for a single role on a team
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoleQuota {
    pub role: String,
    #[serde(default)]
    pub min: usize,
    pub max: usize,
}

/// Per-slot overrides; any override turns the rule asymmetric
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TeamOverride {
    pub team: usize,
    #[serde(default)]
    pub min_players: Option<usize>,
    #[serde(default)]
    pub max_players: Option<usize>,
    #[serde(default)]
    pub role_quotas: Option<Vec<RoleQuota>>,
}

/// Team composition rule for one match
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TeamRule {
    pub team_count: usize,
    pub min_players: usize,
    pub max_players: usize,
    #[serde(default)]
    pub role_quotas: Vec<RoleQuota>,
    #[serde(default)]
    pub team_overrides: Vec<TeamOverride>,
}

impl Default for TeamRule {
    fn default() -> Self {
        Self {
            team_count: 2,
            min_players: 1,
            max_players: 5,
            role_quotas: Vec::new(),
            team_overrides: Vec::new(),
        }
    }
}

impl TeamRule {
    pub fn new(team_count: usize, min_players: usize, max_players: usize) -> Self {
        Self {
            team_count,
            min_players,
            max_players,
            ..Self::default()
        }
    }

    /// Slot identity matters when any team carries its own limits
    pub fn is_asymmetric(&self) -> bool {
        !self.team_overrides.is_empty()
    }

    fn override_for(&self, team: usize) -> Option<&TeamOverride> {
        self.team_overrides.iter().find(|o| o.team == team)
    }

    pub fn min_players_for(&self, team: usize) -> usize {
        self.override_for(team)
            .and_then(|o| o.min_players)
            .unwrap_or(self.min_players)
    }

    pub fn max_players_for(&self, team: usize) -> usize {
        self.override_for(team)
            .and_then(|o| o.max_players)
            .unwrap_or(self.max_players)
    }

    pub fn role_quotas_for(&self, team: usize) -> &[RoleQuota] {
        self.override_for(team)
            .and_then(|o| o.role_quotas.as_deref())
            .unwrap_or(&self.role_quotas)
    }

    /// Largest per-team player limit across all slots
    pub fn largest_max_players(&self) -> usize {
        (0..self.team_count)
            .map(|team| self.max_players_for(team))
            .max()
            .unwrap_or(self.max_players)
    }

    /// Smallest per-team player minimum across all slots
    pub fn smallest_min_players(&self) -> usize {
        (0..self.team_count)
            .map(|team| self.min_players_for(team))
            .min()
            .unwrap_or(self.min_players)
    }
}

/// One attribute contributing to the balancing score
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AttributeRange {
    pub name: String,
    /// Optional normalization range; values are mapped into [0, 1]
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
}

impl AttributeRange {
    pub fn normalize(&self, value: f64) -> f64 {
        match (self.min, self.max) {
            (Some(min), Some(max)) if max > min => ((value - min) / (max - min)).clamp(0.0, 1.0),
            _ => value,
        }
    }
}

/// Which attributes the balancer evens out across teams
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchingRule {
    pub attributes: Vec<AttributeRange>,
}

impl MatchingRule {
    /// Balance on a single raw (unnormalized) attribute
    pub fn single(name: &str) -> Self {
        Self {
            attributes: vec![AttributeRange {
                name: name.to_string(),
                min: None,
                max: None,
            }],
        }
    }
}

/// How blocked-player lists are enforced
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockedPlayerOption {
    /// Block lists are ignored by the balancer
    #[default]
    Ignore,
    /// Players that blocked each other must end up on different teams
    SeparateTeams,
}

/// Max-minus-min of per-team player counts
pub fn count_diff(teams: &[Ally]) -> usize {
    let counts = teams.iter().map(|t| t.player_count());
    let max = counts.clone().max().unwrap_or(0);
    let min = counts.min().unwrap_or(0);
    max - min
}

/// Max-minus-min of per-team average score, ignoring empty teams
pub fn score_spread(teams: &[Ally], matching: &MatchingRule) -> f64 {
    let averages: Vec<f64> = teams
        .iter()
        .filter(|t| t.player_count() > 0)
        .map(|t| t.average(matching))
        .collect();
    if averages.is_empty() {
        return 0.0;
    }
    let max = averages.iter().cloned().fold(f64::MIN, f64::max);
    let min = averages.iter().cloned().fold(f64::MAX, f64::min);
    max - min
}

/// Which rebalance pipeline `Rebalancer::rebalance` runs
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Strategy {
    /// v1: pairwise local-search swaps between adjacent teams
    Swap,
    /// v2: complete greedy partition search over all unlocked parties
    PartitionSearch,
    /// v2 variant: enumerate every cohesive split (unlocked lobbies only)
    Exhaustive,
}

impl Strategy {
    pub fn all() -> [Strategy; 3] {
        [Strategy::Swap, Strategy::PartitionSearch, Strategy::Exhaustive]
    }
}

/// Rebalancer configuration parameters
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RebalanceConfig {
    /// Pipeline used by `rebalance`
    pub strategy: Strategy,
    /// Wall-clock budget for the swap pipeline (ms)
    pub swap_timeout_ms: u64,
    /// Wall-clock budget for partition search and exhaustive enumeration (ms)
    pub search_timeout_ms: u64,
    /// Node ceiling for a single partition search
    pub max_search_iterations: u64,
    /// Swap steps allowed per team pair
    pub max_swap_steps: usize,
    /// Above this many unlocked players the combination engine refuses to run
    pub max_combination_players: usize,
    /// Treat partition order as significant even for symmetric rules
    pub ordered_partitions: bool,
}

impl Default for RebalanceConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::PartitionSearch,
            swap_timeout_ms: 200,
            search_timeout_ms: 300,
            max_search_iterations: 2_000_000,
            max_swap_steps: 64,
            max_combination_players: 16,
            ordered_partitions: false,
        }
    }
}

/// JSON request accepted by the rebalance entry points
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RebalanceRequest {
    pub teams: Vec<Ally>,
    pub rule: TeamRule,
    pub matching_rule: MatchingRule,
    #[serde(default)]
    pub blocked_player_option: BlockedPlayerOption,
}
