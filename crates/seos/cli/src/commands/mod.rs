//! Subcommand handlers

mod credential;
mod keys;
mod session;

pub use credential::*;
pub use keys::*;
pub use session::*;
