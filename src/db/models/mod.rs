//! Database models split into domain-specific modules.

pub mod hardware;
pub mod logbook;
pub mod user;

pub use hardware::*;
pub use logbook::*;
pub use user::*;
