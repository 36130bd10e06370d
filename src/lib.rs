//! Per-job execution agent.
//!
//! A job run is a state machine: reserve and claim the job, start the
//! background services, lay out the job directory, launch and wait on the
//! user process, then stop everything and report the final status. Every
//! run ends in [`state_machine::State::Done`] or, after a fatal failure and
//! the cleanup chain, in [`state_machine::State::Failed`].

pub mod cli;
pub mod config;
pub mod control_plane;
pub mod error;
pub mod orchestrator;
pub mod services;
pub mod stages;
pub mod state_machine;
pub mod ui;
