//! Post relay — forwards Telegram posts to an email inbox.
//!
//! Bursts of grouped messages (albums) are coalesced into one logical post
//! before being composed into a single HTML email.

pub mod channels;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod workspace;
