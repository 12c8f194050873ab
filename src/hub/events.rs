use serde::{Deserialize, Serialize};

use crate::error::PollError;
use crate::models::Poll;

/// Events a connected participant may send.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    Nominate { text: String },
    RemoveNomination { id: String },
    RemoveParticipant { id: String },
    StartVote,
    SubmitRankings { rankings: Vec<String> },
    ClosePoll,
    CancelPoll,
}

impl ClientEvent {
    pub fn requires_admin(&self) -> bool {
        matches!(
            self,
            ClientEvent::RemoveNomination { .. }
                | ClientEvent::RemoveParticipant { .. }
                | ClientEvent::StartVote
                | ClientEvent::ClosePoll
                | ClientEvent::CancelPoll
        )
    }
}

/// Events pushed to connected participants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    PollUpdated(Poll),
    PollCancelled,
    Exception { kind: String, message: String },
}

impl From<&PollError> for ServerEvent {
    fn from(err: &PollError) -> Self {
        ServerEvent::Exception {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_events_parse_from_wire_format() {
        let event: ClientEvent =
            serde_json::from_str(r#"{"event":"nominate","data":{"text":"Pizza"}}"#).unwrap();
        assert_eq!(event, ClientEvent::Nominate { text: "Pizza".into() });

        let event: ClientEvent = serde_json::from_str(r#"{"event":"start_vote"}"#).unwrap();
        assert_eq!(event, ClientEvent::StartVote);
        assert!(event.requires_admin());

        let raw = r#"{"event":"submit_rankings","data":{"rankings":["A","B"]}}"#;
        let event: ClientEvent = serde_json::from_str(raw).unwrap();
        assert!(!event.requires_admin());
    }

    #[test]
    fn unknown_client_event_is_rejected() {
        assert!(serde_json::from_str::<ClientEvent>(r#"{"event":"drop_tables"}"#).is_err());
    }

    #[test]
    fn exception_carries_kind_and_message() {
        let event = ServerEvent::from(&PollError::Unauthorized("admin privileges required".into()));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "exception");
        assert_eq!(json["data"]["kind"], "unauthorized");
    }
}
