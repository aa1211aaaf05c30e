//! Delivery-channel seam.
//!
//! The engine never talks to a messaging gateway directly; it hands the
//! rendered title/body to an injected [`Sender`]. The gateway reports
//! failures as transient (retry next poll) or blocked (pause deliveries).

use async_trait::async_trait;

use crate::error::SendError;

/// Outbound delivery channel.
#[async_trait]
pub trait Sender: Send + Sync {
    async fn send(&self, owner_id: &str, title: &str, body: &str) -> Result<(), SendError>;
}

/// Sender that prints to stdout — the default channel for local runs.
pub struct ConsoleSender;

#[async_trait]
impl Sender for ConsoleSender {
    async fn send(&self, owner_id: &str, title: &str, body: &str) -> Result<(), SendError> {
        println!("🔔 [{owner_id}] {title}\n{body}\n");
        Ok(())
    }
}
