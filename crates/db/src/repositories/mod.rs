//! Database repositories.

pub mod campaign;
pub mod email_sent;
pub mod fan;

pub use campaign::{CampaignRepository, StatCounter};
pub use email_sent::EmailSentRepository;
pub use fan::FanRepository;
