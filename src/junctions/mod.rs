//! Routing rules ("junctions") and the first-match-wins matcher.
//!
//! A junction maps recipient/sender conditions to an Apprise destination and
//! optional title/body templates. Junctions are evaluated strictly in
//! configuration order; the first one whose `to` and `from` conditions both
//! hold is used.

pub mod matcher;
pub mod model;

pub use matcher::{from_matches, select_junction, to_matches};
pub use model::{FromCondition, Junction, JunctionSet, Selected, ToCondition};
