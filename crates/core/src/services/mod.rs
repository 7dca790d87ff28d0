//! Domain services.

pub mod campaign;
pub mod mailer;
pub mod recorder;
