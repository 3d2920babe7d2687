use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Per-room active-session registry.
///
/// Enforces the one-active-session-per-room invariant with compare-and-swap
/// claim semantics: a claim succeeds only if the room has no active session.
/// A second presence trigger while one is active simply fails to claim and
/// is ignored.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    rooms: Arc<RwLock<HashMap<String, Uuid>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the room for `session_id`. Returns false if another session
    /// already holds it.
    pub async fn try_claim(&self, room_id: &str, session_id: Uuid) -> bool {
        let mut rooms = self.rooms.write().await;
        if rooms.contains_key(room_id) {
            return false;
        }
        rooms.insert(room_id.to_string(), session_id);
        true
    }

    /// Release the room, but only if `session_id` still holds it.
    pub async fn release(&self, room_id: &str, session_id: Uuid) {
        let mut rooms = self.rooms.write().await;
        if rooms.get(room_id) == Some(&session_id) {
            rooms.remove(room_id);
        }
    }

    pub async fn active(&self, room_id: &str) -> Option<Uuid> {
        let rooms = self.rooms.read().await;
        rooms.get(room_id).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_claim_on_active_room_is_rejected() {
        let registry = SessionRegistry::new();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        assert!(registry.try_claim("lh-101", first).await);
        assert!(!registry.try_claim("lh-101", second).await);
        // Independent rooms do not contend.
        assert!(registry.try_claim("lh-102", second).await);

        // Release by a non-holder is a no-op.
        registry.release("lh-101", second).await;
        assert_eq!(registry.active("lh-101").await, Some(first));

        registry.release("lh-101", first).await;
        assert!(registry.try_claim("lh-101", second).await);
    }
}
