//! Configurable urgency rules (§4.4): operator-defined overrides that bump a
//! queued session's score when its ticket matches a keyword, game, or
//! declared-priority condition.

use cs_core::domain::TicketPriority;
use cs_core::ids::GameId;
use serde::{Deserialize, Serialize};

/// All conditions present on a rule must hold for it to match; absent
/// conditions are treated as wildcards.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UrgencyRuleConditions {
    /// Case-insensitive substring match against the ticket description.
    pub keyword: Option<String>,
    pub game_id: Option<GameId>,
    pub ticket_priority: Option<TicketPriority>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UrgencyRule {
    pub name: String,
    pub conditions: UrgencyRuleConditions,
    /// Added to the score when this rule matches, clamped with everything
    /// else to [0, 100] by the caller.
    pub priority_weight: f64,
}

impl UrgencyRule {
    pub fn matches(&self, description: &str, game_id: GameId, ticket_priority: TicketPriority) -> bool {
        if let Some(keyword) = &self.conditions.keyword {
            if !description.to_lowercase().contains(&keyword.to_lowercase()) {
                return false;
            }
        }
        if let Some(rule_game_id) = self.conditions.game_id {
            if rule_game_id != game_id {
                return false;
            }
        }
        if let Some(rule_priority) = self.conditions.ticket_priority {
            if rule_priority != ticket_priority {
                return false;
            }
        }
        true
    }
}

/// Immutable snapshot of the active urgency rules, evaluated in order; only
/// the highest-weight match contributes to the score.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UrgencyRulesSnapshot {
    pub rules: Vec<UrgencyRule>,
}

impl UrgencyRulesSnapshot {
    pub fn new(rules: Vec<UrgencyRule>) -> Self {
        Self { rules }
    }

    /// Highest `priority_weight` among rules whose conditions all hold, or
    /// `0.0` if none match.
    pub fn best_match(&self, description: &str, game_id: GameId, ticket_priority: TicketPriority) -> f64 {
        self.rules
            .iter()
            .filter(|rule| rule.matches(description, game_id, ticket_priority))
            .map(|rule| rule.priority_weight)
            .fold(0.0_f64, f64::max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(keyword: Option<&str>, weight: f64) -> UrgencyRule {
        UrgencyRule {
            name: "test".to_string(),
            conditions: UrgencyRuleConditions {
                keyword: keyword.map(str::to_string),
                game_id: None,
                ticket_priority: None,
            },
            priority_weight: weight,
        }
    }

    #[test]
    fn matches_case_insensitive_keyword() {
        let r = rule(Some("Refund"), 40.0);
        assert!(r.matches("player wants a REFUND now", GameId::new(), TicketPriority::Normal));
    }

    #[test]
    fn no_conditions_match_means_no_match() {
        let r = rule(Some("chargeback"), 40.0);
        assert!(!r.matches("unrelated text", GameId::new(), TicketPriority::Normal));
    }

    #[test]
    fn snapshot_picks_highest_matching_weight() {
        let snapshot = UrgencyRulesSnapshot::new(vec![rule(Some("refund"), 20.0), rule(Some("refund"), 55.0)]);
        assert_eq!(snapshot.best_match("refund please", GameId::new(), TicketPriority::Low), 55.0);
    }

    #[test]
    fn snapshot_defaults_to_zero() {
        let snapshot = UrgencyRulesSnapshot::default();
        assert_eq!(snapshot.best_match("anything", GameId::new(), TicketPriority::Low), 0.0);
    }
}
