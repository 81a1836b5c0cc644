//! Pure priority scoring (§4.4). No I/O, no async: a plain function over
//! owned/borrowed inputs so it can be unit-tested exhaustively and reused
//! identically by the scheduler and by any score-preview HTTP handler.

use chrono::{DateTime, Utc};
use cs_core::domain::{IssueType, Session, Ticket, Urgency};

use crate::rules::UrgencyRulesSnapshot;

/// Wait time after which queue aging is fully saturated (§4.4).
const AGING_SATURATION_MINUTES: f64 = 30.0;
/// Maximum additive bump from queue aging.
const AGING_MAX_BONUS: f64 = 30.0;
/// Additive bump when the AI triage flagged the session urgent.
const AI_URGENT_BONUS: f64 = 20.0;

/// `score(session, ticket, issueTypes, rulesSnapshot, now)` from §4.4.
///
/// `issue_types` should be the subset of the game's issue types referenced by
/// `ticket.issue_type_ids`; only their `clamped_weight()` is used, so passing
/// a superset (or all of the game's issue types) is harmless.
pub fn score(
    session: &Session,
    ticket: &Ticket,
    issue_types: &[IssueType],
    rules: &UrgencyRulesSnapshot,
    now: DateTime<Utc>,
) -> f64 {
    let issue_type_weight = issue_types
        .iter()
        .filter(|issue_type| ticket.issue_type_ids.contains(&issue_type.id))
        .map(|issue_type| issue_type.clamped_weight())
        .fold(0.0_f64, f64::max);

    let rule_weight = rules.best_match(&ticket.description, ticket.game_id, ticket.priority);

    let base = issue_type_weight.max(ticket.priority.base_score()).max(rule_weight);

    let ai_bonus = match session.ai_urgency {
        Some(Urgency::Urgent) => AI_URGENT_BONUS,
        _ => 0.0,
    };

    let aging_bonus = session
        .queued_at
        .map(|queued_at| aging_bonus(queued_at, now))
        .unwrap_or(0.0);

    (base + ai_bonus + aging_bonus).clamp(0.0, 100.0)
}

fn aging_bonus(queued_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let elapsed_minutes = now.signed_duration_since(queued_at).num_seconds().max(0) as f64 / 60.0;
    let fraction = (elapsed_minutes / AGING_SATURATION_MINUTES).clamp(0.0, 1.0);
    fraction * AGING_MAX_BONUS
}

/// Ordering key for queue position (§4.5, §8): higher score first, then
/// earlier `queuedAt`, then earlier `createdAt`.
pub fn ordering_key(session: &Session) -> (i64, i64, i64) {
    let score_key = -(session.priority_score * 1_000.0).round() as i64;
    let queued_key = session.queued_at.map(|t| t.timestamp_micros()).unwrap_or(i64::MAX);
    let created_key = session.created_at.timestamp_micros();
    (score_key, queued_key, created_key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cs_core::domain::{SessionStatus, TicketPriority, TicketStatus};
    use cs_core::ids::{GameId, IssueTypeId, SessionId, TicketId};
    use std::collections::BTreeMap;

    fn base_ticket(priority: TicketPriority) -> Ticket {
        Ticket {
            id: TicketId::new(),
            ticket_no: "G1-20260727-001".to_string(),
            token: "tok".to_string(),
            game_id: GameId::new(),
            server_id: None,
            server_name: None,
            player_id_or_name: "player1".to_string(),
            description: "cannot log in after refund".to_string(),
            occurred_at: None,
            payment_order_no: None,
            status: TicketStatus::New,
            priority,
            issue_type_ids: Default::default(),
            attachments: vec![],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn base_session(queued_at: Option<DateTime<Utc>>, ai_urgency: Option<Urgency>) -> Session {
        Session {
            id: SessionId::new(),
            ticket_id: TicketId::new(),
            status: SessionStatus::Queued,
            agent_id: None,
            priority_score: 0.0,
            detected_intent: None,
            ai_urgency,
            ai_conversation_handle: None,
            allow_manual_transfer: true,
            queued_at,
            started_at: None,
            closed_at: None,
            transfer_at: None,
            transfer_reason: None,
            metadata: BTreeMap::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn low_priority_no_aging_scores_base_only() {
        let ticket = base_ticket(TicketPriority::Low);
        let session = base_session(None, None);
        let now = Utc::now();
        assert_eq!(score(&session, &ticket, &[], &UrgencyRulesSnapshot::default(), now), 0.0);
    }

    #[test]
    fn urgent_ticket_scores_ninety() {
        let ticket = base_ticket(TicketPriority::Urgent);
        let session = base_session(None, None);
        let now = Utc::now();
        assert_eq!(score(&session, &ticket, &[], &UrgencyRulesSnapshot::default(), now), 90.0);
    }

    #[test]
    fn ai_urgent_bonus_is_additive_and_capped_at_hundred() {
        let ticket = base_ticket(TicketPriority::Urgent);
        let session = base_session(None, Some(Urgency::Urgent));
        let now = Utc::now();
        assert_eq!(score(&session, &ticket, &[], &UrgencyRulesSnapshot::default(), now), 100.0);
    }

    #[test]
    fn aging_saturates_after_thirty_minutes() {
        let ticket = base_ticket(TicketPriority::Low);
        let now = Utc::now();
        let queued_at = now - chrono::Duration::minutes(45);
        let session = base_session(Some(queued_at), None);
        assert_eq!(score(&session, &ticket, &[], &UrgencyRulesSnapshot::default(), now), 30.0);
    }

    #[test]
    fn aging_is_linear_before_saturation() {
        let ticket = base_ticket(TicketPriority::Low);
        let now = Utc::now();
        let queued_at = now - chrono::Duration::minutes(15);
        let session = base_session(Some(queued_at), None);
        let got = score(&session, &ticket, &[], &UrgencyRulesSnapshot::default(), now);
        assert!((got - 15.0).abs() < 0.01, "expected ~15.0, got {got}");
    }

    #[test]
    fn issue_type_weight_contributes_when_higher_than_ticket_priority() {
        let mut ticket = base_ticket(TicketPriority::Low);
        let issue_type_id = IssueTypeId::new();
        ticket.issue_type_ids.insert(issue_type_id);
        let issue_type = IssueType {
            id: issue_type_id,
            game_id: ticket.game_id,
            name: "payment".to_string(),
            priority_weight: 70,
            require_direct_transfer: false,
            enabled: true,
            sort_order: 0,
        };
        let session = base_session(None, None);
        let now = Utc::now();
        assert_eq!(score(&session, &ticket, &[issue_type], &UrgencyRulesSnapshot::default(), now), 70.0);
    }

    #[test]
    fn ordering_key_prefers_higher_score_then_earlier_queue_time() {
        let now = Utc::now();
        let mut high = base_session(Some(now), None);
        high.priority_score = 80.0;
        let mut low = base_session(Some(now), None);
        low.priority_score = 20.0;
        assert!(ordering_key(&high) < ordering_key(&low));
    }
}
