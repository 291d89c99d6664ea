//! Questlink Core - Entity Types
//!
//! Pure data structures shared by the protocol codec and the sync client:
//! typed ids, status enums, the agent/quest/connection/activity entities,
//! leveling arithmetic and the error taxonomy. No I/O lives here.

mod entities;
mod enums;
mod error;
mod identity;
pub mod leveling;

pub use entities::*;
pub use enums::*;
pub use error::*;
pub use identity::*;
pub use leveling::{LevelUpResult, XpCurve, DEFAULT_XP_PER_LEVEL};
