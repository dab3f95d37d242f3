//! Library surface for the KoepelX dome controller daemon, split out from
//! the binary so integration tests can drive the full stack against the
//! `StubPort`/`StubTelescopeLink` test doubles.

pub mod config;
pub mod error;
pub mod motion;
pub mod port;
pub mod position;
pub mod protocol;
pub mod server;
pub mod state;
pub mod telescope_link;
