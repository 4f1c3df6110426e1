//! End-to-end scenarios over mocked collaborators and a real filesystem

mod backup;
mod disaster_recovery;
mod restore;
mod retention;
mod schedule;
