pub mod events;

use dashmap::DashMap;
use log::{debug, info, warn};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

use crate::error::{PollError, PollResult};
use crate::models::{Claims, Poll};
use crate::service::PollOrchestrator;

pub use events::{ClientEvent, ServerEvent};

const DEFAULT_SESSION_BUFFER: usize = 32;

/// A live connection bound to verified claims.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: Uuid,
    pub claims: Claims,
}

struct SessionHandle {
    id: Uuid,
    user_id: String,
    sender: mpsc::Sender<ServerEvent>,
}

/// One broadcast room per poll, plus the real-time entry points that feed it.
///
/// Session handles are only delivery endpoints; poll data always comes from the
/// orchestrator. Delivery uses `try_send`, so a session that stops reading loses
/// events instead of holding up the rest of its room.
pub struct SessionHub {
    service: Arc<PollOrchestrator>,
    rooms: DashMap<String, Vec<SessionHandle>>,
    session_buffer: usize,
}

impl fmt::Debug for SessionHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHub")
            .field("room_count", &self.rooms.len())
            .field("session_buffer", &self.session_buffer)
            .finish()
    }
}

impl SessionHub {
    pub fn new(service: Arc<PollOrchestrator>) -> Self {
        Self::with_buffer(service, DEFAULT_SESSION_BUFFER)
    }

    pub fn with_buffer(service: Arc<PollOrchestrator>, session_buffer: usize) -> Self {
        Self {
            service,
            rooms: DashMap::new(),
            session_buffer: session_buffer.max(1),
        }
    }

    pub fn service(&self) -> &Arc<PollOrchestrator> {
        &self.service
    }

    /// Joins the poll's room, records the participant and tells the room.
    pub async fn connect(
        &self,
        claims: Claims,
    ) -> PollResult<(Session, mpsc::Receiver<ServerEvent>)> {
        let (sender, receiver) = mpsc::channel(self.session_buffer);
        let session = Session {
            id: Uuid::new_v4(),
            claims,
        };

        self.rooms
            .entry(session.claims.poll_id.clone())
            .or_default()
            .push(SessionHandle {
                id: session.id,
                user_id: session.claims.user_id.clone(),
                sender,
            });
        info!(
            "Session {} for user {} joined room {} ({} connected)",
            session.id,
            session.claims.user_id,
            session.claims.poll_id,
            self.room_size(&session.claims.poll_id)
        );

        match self.service.add_participant(&session.claims).await {
            Ok(poll) => {
                self.broadcast(&poll.id, ServerEvent::PollUpdated(poll.clone()));
                Ok((session, receiver))
            }
            Err(e) => {
                self.leave_room(&session);
                Err(e)
            }
        }
    }

    /// Drops the session's delivery endpoint. The participant stays on the poll.
    pub fn disconnect(&self, session: &Session) {
        self.leave_room(session);
        info!(
            "Session {} for user {} left room {} (still connected: {:?})",
            session.id,
            session.claims.user_id,
            session.claims.poll_id,
            self.connected_users(&session.claims.poll_id)
        );
    }

    /// Applies one inbound event. Failures go back to the originating session only.
    pub async fn handle(&self, session: &Session, event: ClientEvent) {
        debug!("Session {} sent {:?}", session.id, event);

        if let Err(e) = self.dispatch(session, event).await {
            warn!("Event from session {} failed: {}", session.id, e);
            self.send_to(session, ServerEvent::from(&e));
        }
    }

    async fn dispatch(&self, session: &Session, event: ClientEvent) -> PollResult<()> {
        if event.requires_admin() {
            self.authorize_admin(session).await?;
        }

        let poll_id = session.claims.poll_id.as_str();
        let user_id = session.claims.user_id.as_str();

        let updated = match event {
            ClientEvent::Nominate { text } => {
                Some(self.service.add_nomination(poll_id, user_id, &text).await?)
            }
            ClientEvent::RemoveNomination { id } => {
                Some(self.service.remove_nomination(poll_id, &id).await?)
            }
            ClientEvent::RemoveParticipant { id } => {
                self.service.remove_participant(poll_id, &id).await?
            }
            ClientEvent::StartVote => Some(self.service.start_poll(poll_id).await?),
            ClientEvent::SubmitRankings { rankings } => {
                Some(self.service.submit_rankings(poll_id, user_id, rankings).await?)
            }
            ClientEvent::ClosePoll => {
                let poll = self.service.compute_results(poll_id).await?;
                if let Some(winner) = poll.winner() {
                    info!("Room {} gets results; winner {}", poll_id, winner.nomination_id);
                }
                Some(poll)
            }
            ClientEvent::CancelPoll => {
                self.service.cancel_poll(poll_id).await?;
                self.broadcast(poll_id, ServerEvent::PollCancelled);
                self.close_room(poll_id);
                None
            }
        };

        if let Some(poll) = updated {
            self.broadcast(poll_id, ServerEvent::PollUpdated(poll));
        }
        Ok(())
    }

    /// Loads the poll and checks the session belongs to its admin.
    pub async fn authorize_admin(&self, session: &Session) -> PollResult<Poll> {
        let poll = self.service.get_poll(&session.claims.poll_id).await?;

        if !poll.is_admin(&session.claims.user_id) {
            warn!(
                "User {} attempted an admin action on poll {}",
                session.claims.user_id, session.claims.poll_id
            );
            return Err(PollError::Unauthorized("admin privileges required".to_string()));
        }
        Ok(poll)
    }

    /// Pushes `event` to every session currently in the room. Returns how many accepted it.
    pub fn broadcast(&self, poll_id: &str, event: ServerEvent) -> usize {
        let Some(room) = self.rooms.get(poll_id) else {
            return 0;
        };

        let mut delivered = 0;
        for handle in room.iter() {
            match handle.sender.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(
                        "Session {} in room {} is not keeping up; dropping event",
                        handle.id, poll_id
                    )
                }
                Err(TrySendError::Closed(_)) => {
                    debug!("Session {} in room {} already closed", handle.id, poll_id)
                }
            }
        }
        debug!("Broadcast to room {} reached {}/{} sessions", poll_id, delivered, room.len());
        delivered
    }

    pub fn room_size(&self, poll_id: &str) -> usize {
        self.rooms.get(poll_id).map(|room| room.len()).unwrap_or(0)
    }

    /// User ids with at least one live session in the room.
    pub fn connected_users(&self, poll_id: &str) -> Vec<String> {
        let mut users: Vec<String> = self
            .rooms
            .get(poll_id)
            .map(|room| room.iter().map(|handle| handle.user_id.clone()).collect())
            .unwrap_or_default();
        users.sort();
        users.dedup();
        users
    }

    /// Delivers `event` to one session only.
    pub fn send_to(&self, session: &Session, event: ServerEvent) {
        if let Some(room) = self.rooms.get(&session.claims.poll_id) {
            if let Some(handle) = room.iter().find(|handle| handle.id == session.id) {
                if let Err(e) = handle.sender.try_send(event) {
                    warn!("Could not deliver to session {}: {}", session.id, e);
                }
            }
        }
    }

    fn leave_room(&self, session: &Session) {
        let poll_id = &session.claims.poll_id;
        if let Some(mut room) = self.rooms.get_mut(poll_id) {
            room.retain(|handle| handle.id != session.id);
        }
        self.rooms.remove_if(poll_id, |_, room| room.is_empty());
    }

    // Dropping the senders ends every session's receive loop
    fn close_room(&self, poll_id: &str) {
        if let Some((_, room)) = self.rooms.remove(poll_id) {
            info!("Closed room {} with {} sessions", poll_id, room.len());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::JwtIssuer;
    use crate::db::Database;
    use crate::models::Outcome;
    use std::time::Duration;
    use tokio::sync::mpsc::error::TryRecvError;

    const TTL: Duration = Duration::from_secs(60);

    async fn hub_with_buffer(buffer: usize) -> SessionHub {
        let store = Database::in_memory(TTL).await.unwrap();
        let tokens = Arc::new(JwtIssuer::new("test-secret"));
        let service = PollOrchestrator::new(Arc::new(store), tokens, TTL);
        SessionHub::with_buffer(Arc::new(service), buffer)
    }

    async fn hub() -> SessionHub {
        hub_with_buffer(DEFAULT_SESSION_BUFFER).await
    }

    /// Creates a poll and returns the admin's claims.
    async fn admin_claims(hub: &SessionHub) -> Claims {
        let created = hub.service().create_poll("Lunch", "Ada", 3).await.unwrap();
        hub.service().verify_token(&created.access_token).unwrap()
    }

    fn participant(poll_id: &str, user_id: &str) -> Claims {
        Claims {
            poll_id: poll_id.to_string(),
            user_id: user_id.to_string(),
            name: user_id.to_uppercase(),
        }
    }

    fn nominate(text: &str) -> ClientEvent {
        ClientEvent::Nominate {
            text: text.to_string(),
        }
    }

    fn remove_participant(id: &str) -> ClientEvent {
        ClientEvent::RemoveParticipant { id: id.to_string() }
    }

    fn rank(rankings: Vec<String>) -> ClientEvent {
        ClientEvent::SubmitRankings { rankings }
    }

    fn expect_update(rx: &mut mpsc::Receiver<ServerEvent>) -> Poll {
        match rx.try_recv() {
            Ok(ServerEvent::PollUpdated(poll)) => poll,
            other => panic!("expected poll_updated, got {:?}", other),
        }
    }

    fn drain(rx: &mut mpsc::Receiver<ServerEvent>) {
        while rx.try_recv().is_ok() {}
    }

    #[tokio::test]
    async fn connect_records_participant_and_broadcasts_to_room() {
        let hub = hub().await;
        let admin = admin_claims(&hub).await;
        let poll_id = admin.poll_id.clone();

        let (_admin_session, mut admin_rx) = hub.connect(admin).await.unwrap();
        expect_update(&mut admin_rx);

        let (_bob, mut bob_rx) = hub.connect(participant(&poll_id, "bob")).await.unwrap();
        let seen_by_admin = expect_update(&mut admin_rx);
        let seen_by_bob = expect_update(&mut bob_rx);

        assert!(seen_by_admin.participants.contains_key("bob"));
        assert_eq!(seen_by_admin, seen_by_bob);
        assert_eq!(hub.room_size(&poll_id), 2);
    }

    #[tokio::test]
    async fn connect_to_missing_poll_fails_and_leaves_no_room() {
        let hub = hub().await;
        let err = hub.connect(participant("GONE00", "bob")).await.unwrap_err();
        assert!(matches!(err, PollError::NotFound(_)));
        assert_eq!(hub.room_size("GONE00"), 0);
    }

    #[tokio::test]
    async fn disconnect_keeps_participant() {
        let hub = hub().await;
        let admin = admin_claims(&hub).await;
        let poll_id = admin.poll_id.clone();

        let (bob, _bob_rx) = hub.connect(participant(&poll_id, "bob")).await.unwrap();
        hub.disconnect(&bob);

        assert_eq!(hub.room_size(&poll_id), 0);
        let poll = hub.service().get_poll(&poll_id).await.unwrap();
        assert!(poll.participants.contains_key("bob"));
    }

    #[tokio::test]
    async fn non_admin_action_is_rejected_without_broadcast() {
        let hub = hub().await;
        let admin = admin_claims(&hub).await;
        let poll_id = admin.poll_id.clone();

        let (_admin_session, mut admin_rx) = hub.connect(admin).await.unwrap();
        let (bob, mut bob_rx) = hub.connect(participant(&poll_id, "bob")).await.unwrap();
        drain(&mut admin_rx);
        drain(&mut bob_rx);

        hub.handle(&bob, ClientEvent::StartVote).await;
        hub.handle(&bob, remove_participant("bob")).await;

        for _ in 0..2 {
            match bob_rx.try_recv() {
                Ok(ServerEvent::Exception { kind, .. }) => assert_eq!(kind, "unauthorized"),
                other => panic!("expected exception, got {:?}", other),
            }
        }
        assert!(matches!(admin_rx.try_recv(), Err(TryRecvError::Empty)));

        let poll = hub.service().get_poll(&poll_id).await.unwrap();
        assert!(!poll.has_started);
        assert!(poll.participants.contains_key("bob"));
    }

    #[tokio::test]
    async fn admin_removes_participant_before_start() {
        let hub = hub().await;
        let admin = admin_claims(&hub).await;
        let poll_id = admin.poll_id.clone();

        let (admin_session, mut admin_rx) = hub.connect(admin).await.unwrap();
        let (_bob, mut bob_rx) = hub.connect(participant(&poll_id, "bob")).await.unwrap();
        drain(&mut admin_rx);
        drain(&mut bob_rx);

        hub.handle(&admin_session, remove_participant("bob")).await;

        assert!(!expect_update(&mut admin_rx).participants.contains_key("bob"));
        assert!(!expect_update(&mut bob_rx).participants.contains_key("bob"));
    }

    #[tokio::test]
    async fn removal_after_start_broadcasts_nothing() {
        let hub = hub().await;
        let admin = admin_claims(&hub).await;
        let poll_id = admin.poll_id.clone();

        let (admin_session, mut admin_rx) = hub.connect(admin).await.unwrap();
        hub.connect(participant(&poll_id, "bob")).await.unwrap();
        hub.handle(&admin_session, ClientEvent::StartVote).await;
        drain(&mut admin_rx);

        hub.handle(&admin_session, remove_participant("bob")).await;
        assert!(matches!(admin_rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn full_round_of_voting_over_the_hub() {
        let hub = hub().await;
        let admin = admin_claims(&hub).await;
        let poll_id = admin.poll_id.clone();

        let (admin_session, mut admin_rx) = hub.connect(admin).await.unwrap();
        let (bob, mut bob_rx) = hub.connect(participant(&poll_id, "bob")).await.unwrap();

        hub.handle(&bob, nominate("Pizza")).await;
        hub.handle(&admin_session, nominate("Sushi")).await;
        hub.handle(&admin_session, ClientEvent::StartVote).await;
        drain(&mut admin_rx);

        let poll = hub.service().get_poll(&poll_id).await.unwrap();
        let pizza = poll
            .nominations
            .iter()
            .find(|(_, n)| n.text == "Pizza")
            .map(|(id, _)| id.clone())
            .unwrap();

        hub.handle(&bob, rank(vec![pizza.clone()])).await;
        hub.handle(&admin_session, rank(vec![pizza.clone()])).await;
        hub.handle(&admin_session, ClientEvent::ClosePoll).await;

        drain(&mut bob_rx);
        let poll = hub.service().get_poll(&poll_id).await.unwrap();
        let winner = poll.results.last().unwrap();
        assert_eq!(winner.nomination_id, pizza);
        assert_eq!(winner.outcome, Outcome::Winner);

        // the last update the admin saw carries the results
        let mut last = None;
        while let Ok(event) = admin_rx.try_recv() {
            last = Some(event);
        }
        match last {
            Some(ServerEvent::PollUpdated(seen)) => assert_eq!(seen.results, poll.results),
            other => panic!("expected poll_updated, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn failed_event_only_reaches_sender() {
        let hub = hub().await;
        let admin = admin_claims(&hub).await;
        let poll_id = admin.poll_id.clone();

        let (_admin_session, mut admin_rx) = hub.connect(admin).await.unwrap();
        let (bob, mut bob_rx) = hub.connect(participant(&poll_id, "bob")).await.unwrap();
        drain(&mut admin_rx);
        drain(&mut bob_rx);

        hub.handle(&bob, rank(vec!["X".into()])).await;

        match bob_rx.try_recv() {
            Ok(ServerEvent::Exception { kind, .. }) => assert_eq!(kind, "invalid_state"),
            other => panic!("expected exception, got {:?}", other),
        }
        assert!(matches!(admin_rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn slow_session_does_not_block_the_room() {
        let hub = hub_with_buffer(1).await;
        let admin = admin_claims(&hub).await;
        let poll_id = admin.poll_id.clone();

        // never drained
        let (_slow, _slow_rx) = hub.connect(participant(&poll_id, "slow")).await.unwrap();
        let (admin_session, mut admin_rx) = hub.connect(admin).await.unwrap();

        for text in ["a", "b", "c"] {
            drain(&mut admin_rx);
            hub.handle(&admin_session, nominate(text)).await;
            assert!(!expect_update(&mut admin_rx).nominations.is_empty());
        }
    }

    #[tokio::test]
    async fn cancel_notifies_room_and_closes_it() {
        let hub = hub().await;
        let admin = admin_claims(&hub).await;
        let poll_id = admin.poll_id.clone();

        let (admin_session, mut admin_rx) = hub.connect(admin).await.unwrap();
        let (_bob, mut bob_rx) = hub.connect(participant(&poll_id, "bob")).await.unwrap();
        drain(&mut admin_rx);
        drain(&mut bob_rx);

        hub.handle(&admin_session, ClientEvent::CancelPoll).await;

        assert_eq!(bob_rx.recv().await, Some(ServerEvent::PollCancelled));
        assert_eq!(bob_rx.recv().await, None);
        assert_eq!(admin_rx.recv().await, Some(ServerEvent::PollCancelled));
        assert_eq!(hub.room_size(&poll_id), 0);
        assert!(matches!(hub.service().get_poll(&poll_id).await, Err(PollError::NotFound(_))));
    }

    #[tokio::test]
    async fn connected_users_are_unique_per_room() {
        let hub = hub().await;
        let admin = admin_claims(&hub).await;
        let poll_id = admin.poll_id.clone();

        hub.connect(participant(&poll_id, "bob")).await.unwrap();
        hub.connect(participant(&poll_id, "bob")).await.unwrap();
        assert_eq!(hub.connected_users(&poll_id), vec!["bob".to_string()]);
        assert_eq!(hub.room_size(&poll_id), 2);
    }
}
