//! Client-side pieces of the private agent system: locating a user's
//! agents from locally derivable commitments, and keeping the master
//! secret wrapped while a session is unlocked.

pub mod discovery;
pub mod session;

pub use discovery::{discover_all, find_by_commitment, next_free_nonce, AgentHandle, DiscoveredAgent};
pub use session::MasterKeyCell;
