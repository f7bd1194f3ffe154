use crate::combination::{IndexCombinations, Slice};
use crate::deadline::Deadline;
use crate::error::{RebalanceError, Result};
use crate::types::{Party, TeamRule};
use std::collections::{BTreeSet, HashMap};
use std::rc::Rc;

/// Parties are tracked in a u64 bitmask during composition
const MAX_PARTIES: usize = 64;

/// A set of parties whose players fill one team
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartyCombination {
    /// Party indices, ascending
    pub parties: Vec<usize>,
    pub players: usize,
    mask: u64,
}

/// Ordered team candidates produced by `GroupCombinationEngine::sequences`
#[derive(Clone, Debug, Default)]
pub struct SequenceSet {
    /// Each sequence holds one party-index list per team
    pub sequences: Vec<Vec<Vec<usize>>>,
    pub timed_out: bool,
}

/// Enumerates every split of whole parties into `team_count` ordered teams
/// whose player counts fall in `[min_players, max_players]`
pub struct GroupCombinationEngine<'a> {
    parties: &'a [Slice],
    team_count: usize,
    min_players: usize,
    max_players: usize,
    player_limit: usize,
}

impl<'a> GroupCombinationEngine<'a> {
    pub fn new(parties: &'a [Slice], team_count: usize, min_players: usize, max_players: usize) -> Self {
        Self {
            parties,
            team_count,
            min_players,
            max_players,
            player_limit: usize::MAX,
        }
    }

    /// Refuse lobbies with more players than `limit`
    pub fn with_player_limit(mut self, limit: usize) -> Self {
        self.player_limit = limit;
        self
    }

    fn player_count(&self) -> usize {
        self.parties.iter().map(|p| p.len()).sum()
    }

    /// Fails when the lobby exceeds the player limit or the party mask width
    pub fn check_limits(&self) -> Result<()> {
        let players = self.player_count();
        if players > self.player_limit {
            return Err(RebalanceError::TooManyPlayers {
                count: players,
                limit: self.player_limit,
            });
        }
        if self.parties.len() > MAX_PARTIES {
            return Err(RebalanceError::TooManyParties {
                count: self.parties.len(),
                limit: MAX_PARTIES,
            });
        }
        Ok(())
    }

    /// Every cohesive party combination for team sizes `max_players` down to
    /// `min_players`
    pub fn party_combinations(&self) -> Result<Vec<PartyCombination>> {
        self.check_limits()?;

        // 1. Flatten players, remembering which party owns each one
        let owners: Vec<usize> = self
            .parties
            .iter()
            .enumerate()
            .flat_map(|(party, slice)| std::iter::repeat(party).take(slice.len()))
            .collect();
        let total = owners.len();

        let mut seen: BTreeSet<Vec<usize>> = BTreeSet::new();
        let mut combinations = Vec::new();
        let mut taken = vec![0usize; self.parties.len()];

        let upper = self.max_players.min(total);
        if upper < self.min_players {
            return Ok(combinations);
        }
        for size in (self.min_players..=upper).rev() {
            for players in IndexCombinations::new(total, size) {
                // 2. Reject combinations holding part of a party
                taken.iter_mut().for_each(|t| *t = 0);
                for &player in &players {
                    taken[owners[player]] += 1;
                }
                let cohesive = taken
                    .iter()
                    .enumerate()
                    .all(|(party, &count)| count == 0 || count == self.parties[party].len());
                if !cohesive {
                    continue;
                }

                // 3. Collapse to party indices
                let parties: Vec<usize> = taken
                    .iter()
                    .enumerate()
                    .filter(|(_, &count)| count > 0)
                    .map(|(party, _)| party)
                    .collect();
                if seen.insert(parties.clone()) {
                    let mask = parties.iter().fold(0u64, |mask, &p| mask | (1u64 << p));
                    combinations.push(PartyCombination {
                        parties,
                        players: size,
                        mask,
                    });
                }
            }
        }

        Ok(combinations)
    }

    /// Compose party combinations into full ordered team sequences that use
    /// every party exactly once. An empty result means the lobby cannot be
    /// split under these bounds.
    pub fn sequences(&self, deadline: &Deadline) -> Result<SequenceSet> {
        let combinations = self.party_combinations()?;
        let full_mask = if self.parties.len() == MAX_PARTIES {
            u64::MAX
        } else {
            (1u64 << self.parties.len()) - 1
        };

        let mut composer = Composer {
            combinations: &combinations,
            by_remaining: HashMap::new(),
            team_count: self.team_count,
            min_players: self.min_players,
            max_players: self.max_players,
            full_mask,
            deadline,
            result: SequenceSet::default(),
        };
        let mut current = Vec::with_capacity(self.team_count);
        composer.compose(0, 0, self.player_count(), &mut current);

        if composer.result.timed_out {
            tracing::warn!(
                sequences = composer.result.sequences.len(),
                "combination composition hit its deadline"
            );
        }
        Ok(composer.result)
    }
}

struct Composer<'c> {
    combinations: &'c [PartyCombination],
    /// Candidate combinations keyed by remaining player count only; which
    /// parties remain is checked against the used mask afterwards
    by_remaining: HashMap<usize, Rc<[usize]>>,
    team_count: usize,
    min_players: usize,
    max_players: usize,
    full_mask: u64,
    deadline: &'c Deadline,
    result: SequenceSet,
}

impl Composer<'_> {
    fn candidates(&mut self, remaining: usize) -> Rc<[usize]> {
        let combinations = self.combinations;
        self.by_remaining
            .entry(remaining)
            .or_insert_with(|| {
                combinations
                    .iter()
                    .enumerate()
                    .filter(|(_, c)| c.players <= remaining)
                    .map(|(i, _)| i)
                    .collect()
            })
            .clone()
    }

    fn compose(&mut self, depth: usize, used: u64, remaining: usize, current: &mut Vec<usize>) {
        if self.result.timed_out {
            return;
        }
        if depth == self.team_count {
            if used == self.full_mask && remaining == 0 {
                let sequence = current
                    .iter()
                    .map(|&c| self.combinations[c].parties.clone())
                    .collect();
                self.result.sequences.push(sequence);
            }
            return;
        }
        if self.deadline.is_expired() {
            self.result.timed_out = true;
            return;
        }

        let teams_left = self.team_count - depth;
        if remaining < teams_left * self.min_players || remaining > teams_left * self.max_players {
            return;
        }

        for &candidate in self.candidates(remaining).iter() {
            let combination = &self.combinations[candidate];
            if combination.mask & used != 0 {
                continue;
            }
            let (mask, players) = (combination.mask, combination.players);
            current.push(candidate);
            self.compose(depth + 1, used | mask, remaining - players, current);
            current.pop();
            if self.result.timed_out {
                return;
            }
        }
    }
}

/// Slices for the given parties, keyed by party id
pub fn party_slices(parties: &[Party]) -> Vec<Slice> {
    parties
        .iter()
        .map(|party| {
            Slice::with_key(
                party.id.to_string(),
                party.members.iter().map(|m| m.id).collect(),
            )
        })
        .collect()
}

/// Party-index combinations that can fill one team under `rule`
pub fn generate_combinations(
    parties: &[Party],
    rule: &TeamRule,
    player_limit: usize,
) -> Result<Vec<Vec<usize>>> {
    let slices = party_slices(parties);
    let engine = GroupCombinationEngine::new(
        &slices,
        rule.team_count,
        rule.smallest_min_players(),
        rule.largest_max_players(),
    )
    .with_player_limit(player_limit);
    Ok(engine
        .party_combinations()?
        .into_iter()
        .map(|c| c.parties)
        .collect())
}
