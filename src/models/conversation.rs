use serde::Serialize;
use uuid::Uuid;

use crate::models::message::Message;

/// Canonical identifier for the thread between two users: the participant ids
/// sorted and joined with '_'. Both directions of a pair must always map to
/// the same id so all their messages aggregate into one thread.
///
/// Uuid ordering is byte order, which for the lowercase hyphenated form is
/// the same as lexicographic string order.
pub fn conversation_id(a: Uuid, b: Uuid) -> String {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    format!("{lo}_{hi}")
}

/// Derived view over the message store: one entry per conversation a user
/// participates in, carrying the latest message and the count of messages
/// addressed to them they have not read yet.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationSummary {
    pub conversation_id: String,
    pub peer_id: Uuid,
    pub last_message: Message,
    pub unread_count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivation_is_order_independent() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_eq!(conversation_id(a, b), conversation_id(b, a));
    }

    #[test]
    fn derivation_sorts_lexicographically() {
        let a: Uuid = "00000000-0000-0000-0000-000000000001".parse().unwrap();
        let b: Uuid = "00000000-0000-0000-0000-000000000002".parse().unwrap();
        assert_eq!(
            conversation_id(b, a),
            format!("{a}_{b}"),
            "smaller id must always come first"
        );
    }

    #[test]
    fn derivation_is_stable_for_self_pairs() {
        let a = Uuid::new_v4();
        assert_eq!(conversation_id(a, a), format!("{a}_{a}"));
    }
}
