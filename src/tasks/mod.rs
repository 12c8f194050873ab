pub mod poll_reaper;
