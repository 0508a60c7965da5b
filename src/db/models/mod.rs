//! Database models split into domain-specific modules.

pub mod appointment;
pub mod content;
pub mod counselor;
pub mod user;

pub use appointment::*;
pub use content::*;
pub use counselor::*;
pub use user::*;
