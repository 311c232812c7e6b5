//! Client-side coordination for timed, multi-participant writing matches.
//!
//! Every client of a match talks only to a shared versioned document store;
//! there is no match server and no client-to-client channel. This crate
//! implements one client's seat: creating or adopting the session document,
//! heartbeating presence, advancing the draft / peer-review / revision
//! phases exactly once across the party, recording write-once submissions
//! with scoring fallbacks, and playing the synthetic party members from a
//! persisted schedule that survives any single client vanishing.
//!
//! [`session::MatchSession`] is the entry point; [`store::DocumentStore`] is
//! the seam a real document backend plugs into.

pub mod clock;
pub mod config;
pub mod error;
pub mod model;
pub mod scoring;
pub mod session;
pub mod store;

pub use error::{SyncError, SyncResult};
pub use session::{JoinOptions, JoinParams, MatchEvent, MatchSession, MatchSetup, RosterEntry};
