pub mod ranked;

pub use ranked::{tally, tally_rounds, RoundTally, Tally};
