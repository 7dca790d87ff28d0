//! Core domain services for fanwave.
//!
//! This crate provides the domain logic sitting between the database layer
//! and the delivery pipeline:
//!
//! - **Mail transport**: the [`MailTransport`] trait with SMTP and SendGrid
//!   providers, classifying failures as transient or permanent
//! - **Delivery recorder**: idempotent per-recipient delivery-state recording
//! - **Campaign service**: lifecycle validation and recovery helpers

pub mod services;

pub use services::campaign::CampaignService;
pub use services::mailer::{
    MailError, MailTransport, OutgoingEmail, SendGridMailer, SendReceipt, SmtpMailer,
    build_transport,
};
pub use services::recorder::DeliveryRecorder;
