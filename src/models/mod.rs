use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub type Participants = HashMap<String, String>;
pub type Nominations = HashMap<String, Nomination>;
pub type Rankings = HashMap<String, Vec<String>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Poll {
    pub id: String,
    pub topic: String,
    pub votes_per_voter: u32,
    pub participants: Participants,
    #[serde(rename = "adminID")]
    pub admin_id: String,
    pub nominations: Nominations,
    pub rankings: Rankings,
    pub results: Vec<ResultEntry>,
    pub has_started: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Nomination {
    #[serde(rename = "userID")]
    pub user_id: String,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Eliminated,
    Winner,
}

/// One line of a computed tally. Entries are ordered by elimination, winner last.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultEntry {
    #[serde(rename = "nominationID")]
    pub nomination_id: String,
    pub text: String,
    pub round: u32,
    pub outcome: Outcome,
}

/// Verified identity carried by a token and by every live session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    #[serde(rename = "pollID")]
    pub poll_id: String,
    #[serde(rename = "userID")]
    pub user_id: String,
    pub name: String,
}

impl Poll {
    pub fn new(
        id: String,
        topic: String,
        votes_per_voter: u32,
        admin_id: String,
        admin_name: String,
    ) -> Self {
        let mut participants = HashMap::new();
        participants.insert(admin_id.clone(), admin_name);

        Self {
            id,
            topic,
            votes_per_voter,
            participants,
            admin_id,
            nominations: HashMap::new(),
            rankings: HashMap::new(),
            results: Vec::new(),
            has_started: false,
        }
    }

    pub fn is_admin(&self, user_id: &str) -> bool {
        self.admin_id == user_id
    }

    pub fn winner(&self) -> Option<&ResultEntry> {
        self.results.iter().find(|entry| entry.outcome == Outcome::Winner)
    }
}
