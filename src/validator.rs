use crate::error::ValidationError;
use crate::types::*;
use std::collections::HashSet;

/// Checks a complete candidate layout against team composition rules.
///
/// The balancing core never interprets rule semantics itself; it only asks
/// a validator about fully formed candidates (and, for greedy placement,
/// about one team at a time via `validate_partial`).
pub trait CompositionValidator {
    fn validate(&self, teams: &[Ally]) -> Result<(), ValidationError>;

    /// Upper-bound checks for a team that may still grow
    fn validate_partial(&self, _team: usize, _ally: &Ally) -> Result<(), ValidationError> {
        Ok(())
    }

    /// Checks scoped to the teams at `indices`; the rest of the layout is
    /// taken as it is. Falls back to the full check.
    fn validate_teams(&self, teams: &[Ally], _indices: &[usize]) -> Result<(), ValidationError> {
        self.validate(teams)
    }
}

impl<F> CompositionValidator for F
where
    F: Fn(&[Ally]) -> Result<(), ValidationError>,
{
    fn validate(&self, teams: &[Ally]) -> Result<(), ValidationError> {
        self(teams)
    }
}

/// Validator backed by a `TeamRule` and the match's blocked-player option
pub struct RuleValidator<'a> {
    rule: &'a TeamRule,
    blocked: BlockedPlayerOption,
}

impl<'a> RuleValidator<'a> {
    pub fn new(rule: &'a TeamRule, blocked: BlockedPlayerOption) -> Self {
        Self { rule, blocked }
    }

    fn check_upper_bounds(&self, team: usize, ally: &Ally) -> Result<(), ValidationError> {
        let count = ally.player_count();
        let max = self.rule.max_players_for(team);
        if count > max {
            return Err(ValidationError::TooManyPlayers { team, count, max });
        }

        for quota in self.rule.role_quotas_for(team) {
            let role_count = ally.role_count(&quota.role);
            if role_count > quota.max {
                return Err(ValidationError::RoleQuota {
                    team,
                    role: quota.role.clone(),
                    count: role_count,
                    min: quota.min,
                    max: quota.max,
                });
            }
        }

        self.check_blocked(team, ally)
    }

    /// Every bound of the rule for one team
    fn check_team(&self, team: usize, ally: &Ally) -> Result<(), ValidationError> {
        // 1. Player count and role upper bounds, blocked players
        self.check_upper_bounds(team, ally)?;

        // 2. Lower bounds
        let count = ally.player_count();
        let min = self.rule.min_players_for(team);
        if count < min {
            return Err(ValidationError::TooFewPlayers { team, count, min });
        }
        for quota in self.rule.role_quotas_for(team) {
            let role_count = ally.role_count(&quota.role);
            if role_count < quota.min {
                return Err(ValidationError::RoleQuota {
                    team,
                    role: quota.role.clone(),
                    count: role_count,
                    min: quota.min,
                    max: quota.max,
                });
            }
        }
        Ok(())
    }

    fn check_blocked(&self, team: usize, ally: &Ally) -> Result<(), ValidationError> {
        if self.blocked == BlockedPlayerOption::Ignore {
            return Ok(());
        }
        let ids: HashSet<u64> = ally.members().map(|m| m.id).collect();
        for member in ally.members() {
            if let Some(&blocked) = member.blocked.iter().find(|b| ids.contains(b)) {
                return Err(ValidationError::BlockedPlayer {
                    team,
                    player: member.id,
                    blocked,
                });
            }
        }
        Ok(())
    }
}

impl CompositionValidator for RuleValidator<'_> {
    fn validate(&self, teams: &[Ally]) -> Result<(), ValidationError> {
        // 1. Team count
        if teams.len() != self.rule.team_count {
            return Err(ValidationError::TeamCount {
                expected: self.rule.team_count,
                actual: teams.len(),
            });
        }

        for (team, ally) in teams.iter().enumerate() {
            self.check_team(team, ally)?;
        }

        Ok(())
    }

    fn validate_partial(&self, team: usize, ally: &Ally) -> Result<(), ValidationError> {
        self.check_upper_bounds(team, ally)
    }

    fn validate_teams(&self, teams: &[Ally], indices: &[usize]) -> Result<(), ValidationError> {
        if teams.len() != self.rule.team_count {
            return Err(ValidationError::TeamCount {
                expected: self.rule.team_count,
                actual: teams.len(),
            });
        }
        for &team in indices {
            if let Some(ally) = teams.get(team) {
                self.check_team(team, ally)?;
            }
        }
        Ok(())
    }
}
