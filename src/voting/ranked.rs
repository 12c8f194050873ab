use crate::models::{Nominations, Outcome, Rankings, ResultEntry};
use std::collections::{BTreeMap, BTreeSet};

/// First-choice counts and bookkeeping for one elimination round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundTally {
    pub round: u32,
    pub counts: BTreeMap<String, u32>,
    /// Ballots with no surviving choice this round. They are left out of the majority
    /// denominator but stay in the history.
    pub exhausted: u32,
    pub eliminated: Vec<String>,
    pub winner: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tally {
    pub results: Vec<ResultEntry>,
    pub rounds: Vec<RoundTally>,
    pub ballots: usize,
}

/// Instant-runoff tally. Output is in elimination order with the winner last.
///
/// `votes_per_voter` only bounds ballots at submission time; whatever was stored is
/// counted here as-is.
pub fn tally(
    rankings: &Rankings,
    nominations: &Nominations,
    votes_per_voter: u32,
) -> Vec<ResultEntry> {
    tally_rounds(rankings, nominations, votes_per_voter).results
}

pub fn tally_rounds(
    rankings: &Rankings,
    nominations: &Nominations,
    _votes_per_voter: u32,
) -> Tally {
    if nominations.is_empty() || rankings.is_empty() {
        return Tally::default();
    }

    let ballots: Vec<&Vec<String>> = rankings.values().collect();
    let mut active: BTreeSet<&str> = nominations.keys().map(String::as_str).collect();
    let mut tally = Tally {
        ballots: ballots.len(),
        ..Tally::default()
    };
    let mut round: u32 = 1;

    loop {
        // Count each ballot's highest-ranked choice that is still in the running
        let mut counts: BTreeMap<&str, u32> = active.iter().map(|id| (*id, 0)).collect();
        let mut exhausted: u32 = 0;
        for ballot in &ballots {
            match ballot.iter().find(|choice| active.contains(choice.as_str())) {
                Some(choice) => {
                    if let Some(count) = counts.get_mut(choice.as_str()) {
                        *count += 1;
                    }
                }
                None => exhausted += 1,
            }
        }

        let continuing = ballots.len() as u32 - exhausted;
        let mut record = RoundTally {
            round,
            counts: counts.iter().map(|(id, count)| (id.to_string(), *count)).collect(),
            exhausted,
            eliminated: Vec::new(),
            winner: None,
        };

        let majority = counts
            .iter()
            .find(|(_, count)| u64::from(**count) * 2 > u64::from(continuing))
            .map(|(id, _)| *id);
        let winner = if active.len() == 1 { active.first().copied() } else { majority };

        if let Some(winner) = winner {
            record.winner = Some(winner.to_string());
            tally.results.push(entry(nominations, winner, round, Outcome::Winner));
            tally.rounds.push(record);
            break;
        }

        let fewest = counts.values().copied().min().unwrap_or(0);
        // BTreeMap iteration gives ascending ids, which is the tie-break order
        let losers: Vec<&str> = counts
            .iter()
            .filter(|(_, count)| **count == fewest)
            .map(|(id, _)| *id)
            .collect();

        if losers.len() == active.len() {
            // Everyone left is tied: smallest id wins, the rest go out this round
            if let Some((winner, rest)) = losers.split_first() {
                for id in rest {
                    tally.results.push(entry(nominations, id, round, Outcome::Eliminated));
                    record.eliminated.push(id.to_string());
                }
                tally.results.push(entry(nominations, winner, round, Outcome::Winner));
                record.winner = Some(winner.to_string());
            }
            tally.rounds.push(record);
            break;
        }

        for id in &losers {
            tally.results.push(entry(nominations, id, round, Outcome::Eliminated));
            record.eliminated.push(id.to_string());
            active.remove(id);
        }
        tally.rounds.push(record);
        round += 1;
    }

    tally
}

impl Tally {
    pub fn winner(&self) -> Option<&ResultEntry> {
        self.results.last().filter(|entry| entry.outcome == Outcome::Winner)
    }

    /// Round-by-round breakdown for logs.
    pub fn summary(&self, nominations: &Nominations) -> String {
        if self.rounds.is_empty() {
            return "No rankings were submitted.".to_string();
        }

        let mut summary = String::new();
        for round in &self.rounds {
            summary.push_str(&format!("Round {}\n", round.round));

            let mut counts: Vec<(&String, &u32)> = round.counts.iter().collect();
            counts.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));

            let continuing = self.ballots as u32 - round.exhausted;
            for (id, count) in counts {
                let percentage = if continuing > 0 {
                    f64::from(*count) * 100.0 / f64::from(continuing)
                } else {
                    0.0
                };
                summary.push_str(&format!(
                    "  {}: {} votes ({:.1}%)\n",
                    text_of(nominations, id),
                    count,
                    percentage
                ));
            }
            if round.exhausted > 0 {
                summary.push_str(&format!("  exhausted ballots: {}\n", round.exhausted));
            }
            if !round.eliminated.is_empty() {
                let names: Vec<String> =
                    round.eliminated.iter().map(|id| text_of(nominations, id)).collect();
                summary.push_str(&format!("  eliminated: {}\n", names.join(", ")));
            }
            if let Some(winner) = &round.winner {
                summary.push_str(&format!("  winner: {}\n", text_of(nominations, winner)));
            }
        }
        summary
    }
}

fn entry(
    nominations: &Nominations,
    nomination_id: &str,
    round: u32,
    outcome: Outcome,
) -> ResultEntry {
    ResultEntry {
        nomination_id: nomination_id.to_string(),
        text: text_of(nominations, nomination_id),
        round,
        outcome,
    }
}

fn text_of(nominations: &Nominations, nomination_id: &str) -> String {
    nominations
        .get(nomination_id)
        .map(|nomination| nomination.text.clone())
        .unwrap_or_else(|| "Unknown Option".to_string())
}
