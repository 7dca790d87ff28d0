//! Database entities.

#![allow(missing_docs)]

pub mod campaign;
pub mod email_sent;
pub mod fan;

pub use campaign::Entity as Campaign;
pub use email_sent::Entity as EmailSent;
pub use fan::Entity as Fan;
