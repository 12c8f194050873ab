use log::{debug, info};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::TokenIssuer;
use crate::db::PollStore;
use crate::error::{PollError, PollResult};
use crate::ids::{create_nomination_id, create_poll_id, create_user_id, is_valid_poll_id};
use crate::models::{Claims, Nomination, Poll};
use crate::voting;

const MAX_TOPIC_LEN: usize = 100;
const MAX_NAME_LEN: usize = 25;
const MAX_NOMINATION_LEN: usize = 100;
const MAX_VOTES_PER_VOTER: u32 = 5;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollWithToken {
    pub poll: Poll,
    pub access_token: String,
}

/// Application-facing entry point for every poll operation.
///
/// Holds no poll state of its own; rules that span fields of a poll (start gating,
/// admin membership, ballot validation) are checked here against a fresh snapshot
/// before the store is asked to write.
pub struct PollOrchestrator {
    store: Arc<dyn PollStore>,
    tokens: Arc<dyn TokenIssuer>,
    token_ttl: Duration,
}

impl PollOrchestrator {
    pub fn new(
        store: Arc<dyn PollStore>,
        tokens: Arc<dyn TokenIssuer>,
        token_ttl: Duration,
    ) -> Self {
        Self {
            store,
            tokens,
            token_ttl,
        }
    }

    pub async fn create_poll(
        &self,
        topic: &str,
        name: &str,
        votes_per_voter: u32,
    ) -> PollResult<PollWithToken> {
        let topic = bounded_text("topic", topic, MAX_TOPIC_LEN)?;
        let name = bounded_text("name", name, MAX_NAME_LEN)?;
        if votes_per_voter == 0 || votes_per_voter > MAX_VOTES_PER_VOTER {
            return Err(PollError::Validation(format!(
                "votesPerVoter must be between 1 and {}",
                MAX_VOTES_PER_VOTER
            )));
        }

        let poll_id = create_poll_id();
        let user_id = create_user_id();

        let poll = self
            .store
            .create_poll(&poll_id, (user_id.as_str(), name), topic, votes_per_voter)
            .await?;
        let access_token = self.issue(&poll.id, &user_id, name)?;

        info!("Poll {} created by {}", poll.id, user_id);
        Ok(PollWithToken { poll, access_token })
    }

    /// Hands out a token for an existing poll. The participant is only recorded once
    /// they connect (or rejoin) with that token.
    pub async fn join_poll(&self, poll_id: &str, name: &str) -> PollResult<PollWithToken> {
        let name = bounded_text("name", name, MAX_NAME_LEN)?;
        if !is_valid_poll_id(poll_id) {
            return Err(PollError::Validation(format!("{:?} is not a valid poll id", poll_id)));
        }

        let poll = self.store.get_poll(poll_id).await?;
        let user_id = create_user_id();
        let access_token = self.issue(&poll.id, &user_id, name)?;

        info!("User {} ({}) joining poll {}", user_id, name, poll.id);
        Ok(PollWithToken { poll, access_token })
    }

    pub async fn rejoin_poll(&self, claims: &Claims) -> PollResult<Poll> {
        info!("User {} rejoining poll {}", claims.user_id, claims.poll_id);
        self.add_participant(claims).await
    }

    pub async fn add_participant(&self, claims: &Claims) -> PollResult<Poll> {
        self.store.set_participant(&claims.poll_id, &claims.user_id, &claims.name).await
    }

    /// Returns `None` without touching the poll once voting has started.
    pub async fn remove_participant(
        &self,
        poll_id: &str,
        user_id: &str,
    ) -> PollResult<Option<Poll>> {
        let poll = self.store.get_poll(poll_id).await?;

        if poll.has_started {
            info!("Ignoring removal of {} from poll {}: voting has started", user_id, poll_id);
            return Ok(None);
        }
        if poll.is_admin(user_id) {
            return Err(PollError::InvalidState(
                "the admin cannot be removed from their poll".to_string(),
            ));
        }

        self.store.remove_participant(poll_id, user_id).await.map(Some)
    }

    pub async fn get_poll(&self, poll_id: &str) -> PollResult<Poll> {
        self.store.get_poll(poll_id).await
    }

    pub async fn add_nomination(
        &self,
        poll_id: &str,
        user_id: &str,
        text: &str,
    ) -> PollResult<Poll> {
        let text = bounded_text("nomination", text, MAX_NOMINATION_LEN)?;
        let poll = self.store.get_poll(poll_id).await?;
        ensure_not_started(&poll, "nominations cannot be added")?;

        let nomination = Nomination {
            user_id: user_id.to_string(),
            text: text.to_string(),
        };
        self.store.set_nomination(poll_id, &create_nomination_id(), &nomination).await
    }

    pub async fn remove_nomination(&self, poll_id: &str, nomination_id: &str) -> PollResult<Poll> {
        let poll = self.store.get_poll(poll_id).await?;
        ensure_not_started(&poll, "nominations cannot be removed")?;

        self.store.remove_nomination(poll_id, nomination_id).await
    }

    pub async fn start_poll(&self, poll_id: &str) -> PollResult<Poll> {
        self.store.mark_started(poll_id).await
    }

    /// Stores a ballot. Choices must be distinct current nominations; anything past
    /// `votesPerVoter` is dropped.
    pub async fn submit_rankings(
        &self,
        poll_id: &str,
        user_id: &str,
        ranking: Vec<String>,
    ) -> PollResult<Poll> {
        let poll = self.store.get_poll(poll_id).await?;

        if !poll.has_started {
            return Err(PollError::InvalidState(
                "participants cannot rank until the poll has started".to_string(),
            ));
        }
        if ranking.is_empty() {
            return Err(PollError::Validation("a ranking needs at least one choice".to_string()));
        }

        let mut seen = HashSet::new();
        for nomination_id in &ranking {
            if !poll.nominations.contains_key(nomination_id) {
                return Err(PollError::Validation(format!("unknown nomination {}", nomination_id)));
            }
            if !seen.insert(nomination_id.as_str()) {
                return Err(PollError::Validation(format!(
                    "nomination {} ranked twice",
                    nomination_id
                )));
            }
        }

        let mut ranking = ranking;
        ranking.truncate(poll.votes_per_voter as usize);

        self.store.set_ranking(poll_id, user_id, &ranking).await
    }

    pub async fn compute_results(&self, poll_id: &str) -> PollResult<Poll> {
        let poll = self.store.get_poll(poll_id).await?;

        if !poll.has_started {
            return Err(PollError::InvalidState("results need a started poll".to_string()));
        }

        let tally = voting::tally_rounds(&poll.rankings, &poll.nominations, poll.votes_per_voter);
        debug!("Tally for poll {}:\n{}", poll_id, tally.summary(&poll.nominations));
        match tally.winner() {
            Some(winner) => info!(
                "Poll {} closed; {} wins in round {}",
                poll_id, winner.text, winner.round
            ),
            None => info!("Poll {} closed without any ballots", poll_id),
        }

        self.store.set_results(poll_id, &tally.results).await
    }

    pub async fn cancel_poll(&self, poll_id: &str) -> PollResult<()> {
        info!("Cancelling poll {}", poll_id);
        self.store.delete(poll_id).await
    }

    pub fn verify_token(&self, token: &str) -> PollResult<Claims> {
        self.tokens.verify(token)
    }

    fn issue(&self, poll_id: &str, user_id: &str, name: &str) -> PollResult<String> {
        let claims = Claims {
            poll_id: poll_id.to_string(),
            user_id: user_id.to_string(),
            name: name.to_string(),
        };
        self.tokens.issue(&claims, self.token_ttl)
    }
}

fn ensure_not_started(poll: &Poll, what: &str) -> PollResult<()> {
    if poll.has_started {
        return Err(PollError::InvalidState(format!("{} after voting has started", what)));
    }
    Ok(())
}

fn bounded_text<'a>(field: &str, value: &'a str, max_len: usize) -> PollResult<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(PollError::Validation(format!("{} must not be empty", field)));
    }
    if trimmed.chars().count() > max_len {
        return Err(PollError::Validation(format!(
            "{} must be at most {} characters",
            field, max_len
        )));
    }
    Ok(trimmed)
}
