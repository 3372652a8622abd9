//! Applies confirmed actions to the record store.

use crate::assistant::action::{CancelBookingArgs, CreateEventArgs, EventRef};
use chrono::{DateTime, Utc};
use ems_store::{
    ActionKind, EventStatus, Identity, NewEvent, PendingAction, Store, StoreError, VenueRef,
};

pub const NOT_IMPLEMENTED_REPLY: &str = "I don't yet know how to execute this type of action.";
pub const EXECUTION_FAULT_REPLY: &str =
    "Something went wrong while applying that action, so no changes were made. Please try again later.";

/// Result of executing a confirmed action. Both arms carry user-safe text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Committed(String),
    Failed(String),
}

impl ExecutionOutcome {
    pub fn text(&self) -> &str {
        match self {
            Self::Committed(text) | Self::Failed(text) => text,
        }
    }

    pub fn into_text(self) -> String {
        match self {
            Self::Committed(text) | Self::Failed(text) => text,
        }
    }

    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed(_))
    }
}

pub struct ActionExecutor {
    store: Store,
}

impl ActionExecutor {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Executes `action` on behalf of its owner. Never fails; every problem is
    /// described in an [`ExecutionOutcome::Failed`].
    #[tracing::instrument(
        level = "info",
        skip_all,
        fields(account_id = action.account_id, pending_id = action.id, kind = %action.kind)
    )]
    pub async fn execute(&self, action: &PendingAction, now: DateTime<Utc>) -> ExecutionOutcome {
        // Organizer approval may have changed since the action was staged.
        let identity = match self.store.identity_by_id(action.account_id).await {
            Ok(Some(identity)) => identity,
            Ok(None) => {
                return ExecutionOutcome::Failed(
                    "I couldn't find your account anymore, so nothing was changed.".to_string(),
                );
            }
            Err(e) => return store_fault(e),
        };

        let outcome = match action.kind {
            ActionKind::CreateEvent => self.create_event(&identity, action, now).await,
            ActionKind::DeleteEvent => self.delete_event(&identity, action).await,
            ActionKind::CancelBooking => self.cancel_booking(&identity, action).await,
            ActionKind::UpdateEvent | ActionKind::CreateVenue => {
                ExecutionOutcome::Failed(NOT_IMPLEMENTED_REPLY.to_string())
            }
        };
        match &outcome {
            ExecutionOutcome::Committed(_) => tracing::info!("pending action committed"),
            ExecutionOutcome::Failed(reason) => {
                tracing::warn!(reason = %reason, "pending action failed")
            }
        }
        outcome
    }

    async fn create_event(
        &self,
        identity: &Identity,
        action: &PendingAction,
        now: DateTime<Utc>,
    ) -> ExecutionOutcome {
        let Some(organizer_id) = identity.approved_organizer_id() else {
            return ExecutionOutcome::Failed(
                "I couldn't find an organizer profile linked to your account, so I can't create the event."
                    .to_string(),
            );
        };
        let args = match CreateEventArgs::from_params(&action.params) {
            Ok(args) => args,
            Err(e) => return ExecutionOutcome::Failed(e.to_string()),
        };
        let Some(venue_name) = args.venue_name else {
            return ExecutionOutcome::Failed(
                "I'm missing the venue name for this event.".to_string(),
            );
        };

        let new_event = NewEvent {
            organizer_id,
            venue: VenueRef::Name(venue_name.clone()),
            title: args.title.unwrap_or_else(|| "Untitled event".to_string()),
            description: args.description,
            start_time: args.start,
            end_time: args.end,
            capacity: args.capacity,
            status: args.status.unwrap_or(EventStatus::Draft),
            ticket_price_cents: args.ticket_price_cents,
        };
        match self.store.create_event(new_event, now).await {
            Ok(event) => ExecutionOutcome::Committed(format!(
                "✅ Event '{}' has been created (ID: {}).",
                event.title, event.id
            )),
            Err(StoreError::NotFound { entity: "venue", .. }) => {
                ExecutionOutcome::Failed(format!(
                    "I couldn't find a venue called '{venue_name}'. Please create that venue first or specify a different name."
                ))
            }
            Err(StoreError::Validation(errors)) => ExecutionOutcome::Failed(format!(
                "I tried to create the event but validation failed: {errors}"
            )),
            Err(e) => store_fault(e),
        }
    }

    async fn delete_event(&self, identity: &Identity, action: &PendingAction) -> ExecutionOutcome {
        let Some(organizer_id) = identity.approved_organizer_id() else {
            return ExecutionOutcome::Failed(
                "I couldn't find an organizer profile linked to your account, so I can't delete events."
                    .to_string(),
            );
        };
        let Some(identifier) = EventRef::from_params(&action.params).identifier else {
            return ExecutionOutcome::Failed(
                "I didn't receive an event identifier to delete.".to_string(),
            );
        };
        let not_found = || {
            ExecutionOutcome::Failed(format!(
                "I couldn't find an event matching '{identifier}' under your organizer account."
            ))
        };

        let event = match self
            .store
            .find_organizer_event(organizer_id, &identifier)
            .await
        {
            Ok(Some(event)) => event,
            Ok(None) => return not_found(),
            Err(e) => return store_fault(e),
        };
        match self.store.delete_organizer_event(organizer_id, event.id).await {
            Ok(deleted) => {
                ExecutionOutcome::Committed(format!("🗑️ Event '{}' has been deleted.", deleted.title))
            }
            Err(StoreError::Protected { dependents, .. }) => ExecutionOutcome::Failed(format!(
                "Event '{}' still has {dependents} booking(s), so I left it in place. Cancel those bookings first.",
                event.title
            )),
            Err(StoreError::NotFound { .. }) => not_found(),
            Err(e) => store_fault(e),
        }
    }

    async fn cancel_booking(&self, identity: &Identity, action: &PendingAction) -> ExecutionOutcome {
        let missing_id =
            || ExecutionOutcome::Failed("I didn't receive a booking id to cancel.".to_string());
        let Some(organizer_id) = identity.approved_organizer_id() else {
            return ExecutionOutcome::Failed(
                "I couldn't find an organizer profile linked to your account, so I can't cancel bookings."
                    .to_string(),
            );
        };
        let booking_id = match CancelBookingArgs::from_params(&action.params) {
            Ok(CancelBookingArgs {
                booking_id: Some(id),
            }) => id,
            Ok(_) | Err(_) => return missing_id(),
        };

        match self
            .store
            .cancel_organizer_booking(organizer_id, booking_id)
            .await
        {
            Ok(cancelled) if cancelled.was_already_cancelled => ExecutionOutcome::Committed(
                format!("Booking {booking_id} was already cancelled."),
            ),
            Ok(cancelled) => ExecutionOutcome::Committed(format!(
                "✅ Booking {} has been cancelled.",
                cancelled.booking.id
            )),
            Err(StoreError::NotFound { .. }) => ExecutionOutcome::Failed(
                "I couldn't find that booking under your events.".to_string(),
            ),
            Err(e) => store_fault(e),
        }
    }
}

fn store_fault(error: StoreError) -> ExecutionOutcome {
    tracing::error!(error = %error, "record store fault while executing action");
    ExecutionOutcome::Failed(EXECUTION_FAULT_REPLY.to_string())
}
