//! Plain data shared across the client: the datafile and its cache envelope,
//! user identities and the override precedence rules.

pub mod datafile;
pub mod identity;

pub use datafile::*;
pub use identity::*;
