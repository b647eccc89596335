use std::fmt::{Display, Formatter};

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use tokio::sync::RwLock;
use tracing::debug;

use crate::chat::chat_message::ChatMessage;
use crate::dis::entity_id::EntityId;

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct UserRecord {
    pub id: EntityId,
    /// the display name from this user's most recent message
    pub name: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub last_message: DateTime<Utc>,
}

impl Display for UserRecord {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.id, self.name)
    }
}

/// one user per line, in the order given
pub fn render_roster(users: &[UserRecord]) -> String {
    users.iter()
        .map(|u| format!("{}\n", u))
        .collect()
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum RosterChangeKind {
    NewUser,
    Refreshed,
}

#[derive(Default)]
struct RosterState {
    users: Vec<UserRecord>,
    index: FxHashMap<EntityId, usize>,
}

/// Everybody who was heard from since the session started, in the order they were first heard
///  from. Users are never removed.
#[derive(Default)]
pub struct UserRoster {
    state: RwLock<RosterState>,
}

impl RosterState {
    fn observe(&mut self, message: &ChatMessage, now: DateTime<Utc>) -> RosterChangeKind {
        if let Some(&idx) = self.index.get(&message.sender_id) {
            let user = &mut self.users[idx];
            if now < user.last_seen {
                debug!("observation of {} at {} predates the last one at {}", user.id, now, user.last_seen);
            }
            user.last_seen = user.last_seen.max(now);
            user.last_message = user.last_seen;
            if user.name != message.sender_name {
                debug!("user {} changed name from {:?} to {:?}", user.id, user.name, message.sender_name);
                user.name.clone_from(&message.sender_name);
            }
            return RosterChangeKind::Refreshed;
        }

        debug!("new user {} ({})", message.sender_id, message.sender_name);
        let idx = self.users.len();
        self.users.push(UserRecord {
            id: message.sender_id,
            name: message.sender_name.clone(),
            first_seen: now,
            last_seen: now,
            last_message: now,
        });
        self.index.insert(message.sender_id, idx);
        RosterChangeKind::NewUser
    }
}

impl UserRoster {
    pub fn new() -> UserRoster {
        Default::default()
    }

    pub async fn observe(&self, message: &ChatMessage) -> RosterChangeKind {
        let mut state = self.state.write().await;
        // the clock is read under the lock, so concurrent observations are timestamped in order
        state.observe(message, Utc::now())
    }

    pub async fn observe_at(&self, message: &ChatMessage, now: DateTime<Utc>) -> RosterChangeKind {
        self.state.write().await
            .observe(message, now)
    }

    pub async fn snapshot(&self) -> Vec<UserRecord> {
        self.state.read().await
            .users
            .clone()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await
            .users
            .len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn message(sender_id: EntityId, name: &str) -> ChatMessage {
        ChatMessage::new("hi", name, sender_id, EntityId::NONE, 1)
    }

    fn at(second: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, second).unwrap()
    }

    #[tokio::test]
    async fn test_observe_same_sender() {
        let roster = UserRoster::new();
        let id = EntityId::new(1, 1, 100);

        assert_eq!(roster.observe_at(&message(id, "alice"), at(1)).await, RosterChangeKind::NewUser);
        for second in 2..=5 {
            assert_eq!(roster.observe_at(&message(id, "alice"), at(second)).await, RosterChangeKind::Refreshed);
        }

        let users = roster.snapshot().await;
        assert_eq!(users, vec![UserRecord {
            id,
            name: "alice".to_string(),
            first_seen: at(1),
            last_seen: at(5),
            last_message: at(5),
        }]);
    }

    #[tokio::test]
    async fn test_last_seen_never_moves_backwards() {
        let roster = UserRoster::new();
        let id = EntityId::new(1, 1, 100);
        roster.observe_at(&message(id, "alice"), at(1)).await;
        roster.observe_at(&message(id, "alice"), at(5)).await;
        roster.observe_at(&message(id, "alice"), at(3)).await;

        let users = roster.snapshot().await;
        assert_eq!(users[0].first_seen, at(1));
        assert_eq!(users[0].last_seen, at(5));
        assert_eq!(users[0].last_message, at(5));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_observe_keeps_last_seen_monotonic() {
        let roster = Arc::new(UserRoster::new());
        let id = EntityId::new(1, 1, 100);

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let roster = roster.clone();
            tasks.push(tokio::spawn(async move {
                let mut previous: Option<DateTime<Utc>> = None;
                for _ in 0..200 {
                    roster.observe(&message(id, "alice")).await;
                    let last_seen = roster.snapshot().await[0].last_seen;
                    if let Some(previous) = previous {
                        assert!(last_seen >= previous);
                    }
                    previous = Some(last_seen);
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_insertion_order() {
        let roster = UserRoster::new();
        roster.observe_at(&message(EntityId::new(9, 9, 9), "zed"), at(1)).await;
        roster.observe_at(&message(EntityId::new(1, 1, 1), "amy"), at(2)).await;
        roster.observe_at(&message(EntityId::new(9, 9, 9), "zed"), at(3)).await;
        roster.observe_at(&message(EntityId::new(5, 5, 5), "max"), at(4)).await;

        let ids = roster.snapshot().await.iter()
            .map(|u| u.id)
            .collect::<Vec<_>>();
        assert_eq!(ids, vec![EntityId::new(9, 9, 9), EntityId::new(1, 1, 1), EntityId::new(5, 5, 5)]);
    }

    #[tokio::test]
    async fn test_name_follows_latest_message() {
        let roster = UserRoster::new();
        let id = EntityId::new(1, 1, 100);
        roster.observe_at(&message(id, "alice"), at(1)).await;
        roster.observe_at(&message(id, "Alice B."), at(2)).await;

        let users = roster.snapshot().await;
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].name, "Alice B.");
        assert_eq!(users[0].to_string(), "1:1:100 (Alice B.)");
    }

    #[tokio::test]
    async fn test_render_roster() {
        let roster = UserRoster::new();
        roster.observe_at(&message(EntityId::new(1, 1, 100), "alice"), at(1)).await;
        roster.observe_at(&message(EntityId::new(1, 1, 200), "bob"), at(2)).await;

        assert_eq!(render_roster(&roster.snapshot().await), "1:1:100 (alice)\n1:1:200 (bob)\n");
        assert_eq!(render_roster(&[]), "");
    }

    #[tokio::test]
    async fn test_snapshot_is_a_copy() {
        let roster = UserRoster::new();
        roster.observe_at(&message(EntityId::new(1, 1, 100), "alice"), at(1)).await;

        let mut snapshot = roster.snapshot().await;
        snapshot[0].name = "mallory".to_string();
        snapshot.clear();

        assert_eq!(roster.snapshot().await[0].name, "alice");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_observe() {
        let roster = Arc::new(UserRoster::new());

        let mut tasks = Vec::new();
        for task in 0..8u16 {
            let roster = roster.clone();
            tasks.push(tokio::spawn(async move {
                let mut new_users = 0;
                for entity in 0..50u16 {
                    let id = EntityId::new(1, 1, entity);
                    if roster.observe(&message(id, &format!("user {} via {}", entity, task))).await == RosterChangeKind::NewUser {
                        new_users += 1;
                    }
                    let _ = roster.snapshot().await;
                }
                new_users
            }));
        }

        let mut total_new = 0;
        for task in tasks {
            total_new += task.await.unwrap();
        }

        assert_eq!(total_new, 50);
        assert_eq!(roster.len().await, 50);
    }
}
