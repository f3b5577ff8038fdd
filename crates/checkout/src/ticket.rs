//! Ticket entity: keyed, single-writer availability state.

use journal::Journal;
use runtime::{EntityStore, Result, Runtime};
use serde::{Deserialize, Serialize};

/// Journal namespace holding ticket state.
pub const TICKET_NAMESPACE: &str = "ticket";

/// Availability of a ticket.
///
/// State transitions:
/// ```text
/// Available ◄──► Reserved ──► Sold
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum TicketStatus {
    #[default]
    Available,
    Reserved,
    Sold,
}

impl TicketStatus {
    /// Returns true if a ticket may move from this status to `next`.
    pub fn can_transition_to(&self, next: TicketStatus) -> bool {
        matches!(
            (self, next),
            (TicketStatus::Available, TicketStatus::Reserved)
                | (TicketStatus::Reserved, TicketStatus::Available)
                | (TicketStatus::Reserved, TicketStatus::Sold)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Available => "Available",
            TicketStatus::Reserved => "Reserved",
            TicketStatus::Sold => "Sold",
        }
    }
}

impl std::fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Handlers of the ticket entity.
///
/// Each handler is a single compare-and-set on the ticket's key, so they
/// are linearized per ticket and only ever perform the allowed transitions.
pub struct TicketService<J> {
    store: EntityStore<J, TicketStatus>,
}

impl<J: Clone> Clone for TicketService<J> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<J: Journal + Clone> TicketService<J> {
    /// Opens the ticket store of `runtime`. Services opened from one runtime
    /// share its per-ticket locks.
    pub fn new(runtime: &Runtime<J>) -> Self {
        Self {
            store: runtime.entity_store(TICKET_NAMESPACE),
        }
    }

    /// Returns the current status; unknown tickets are `Available`.
    pub async fn status(&self, ticket: &str) -> Result<TicketStatus> {
        self.store.get(ticket).await
    }

    /// Reserves an available ticket. Returns false if it is reserved or sold.
    pub async fn reserve(&self, ticket: &str) -> Result<bool> {
        let reserved = self
            .transition(ticket, TicketStatus::Available, TicketStatus::Reserved)
            .await?;
        if reserved {
            tracing::info!(ticket, "ticket reserved");
        } else {
            tracing::info!(ticket, "ticket not available");
        }
        Ok(reserved)
    }

    /// Puts a reserved ticket back on sale. A no-op for any other status.
    pub async fn unreserve(&self, ticket: &str) -> Result<()> {
        if self
            .transition(ticket, TicketStatus::Reserved, TicketStatus::Available)
            .await?
        {
            tracing::info!(ticket, "ticket released");
        }
        Ok(())
    }

    /// Sells a reserved ticket. Returns false if it was not reserved.
    pub async fn mark_sold(&self, ticket: &str) -> Result<bool> {
        let sold = self
            .transition(ticket, TicketStatus::Reserved, TicketStatus::Sold)
            .await?;
        if sold {
            tracing::info!(ticket, "ticket sold");
            metrics::counter!("tickets_sold_total").increment(1);
        }
        Ok(sold)
    }

    async fn transition(&self, ticket: &str, from: TicketStatus, to: TicketStatus) -> Result<bool> {
        debug_assert!(from.can_transition_to(to));
        self.store.try_set(ticket, &from, to).await
    }
}

impl<J: Journal + Clone + 'static> TicketService<J> {
    /// Marks the ticket sold in the background without waiting for the outcome.
    pub fn send_mark_sold(&self, ticket: &str) -> tokio::task::JoinHandle<()> {
        let service = self.clone();
        let ticket = ticket.to_string();
        tokio::spawn(async move {
            match service.mark_sold(&ticket).await {
                Ok(true) => {}
                Ok(false) => tracing::warn!(%ticket, "mark sold ignored, ticket was not reserved"),
                Err(e) => tracing::error!(%ticket, error = %e, "mark sold failed"),
            }
        })
    }
}
