//! Scheduling and referential-integrity engine.
//!
//! Everything that must stay correct under concurrent requests lives here:
//! slot generation, the booking transaction, appointment status transitions,
//! and cascade deletion across the dependent collections.

pub mod booking;
pub mod cascade;
pub mod slots;
