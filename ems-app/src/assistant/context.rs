use chrono::{DateTime, Utc};
use ems_store::{EventListing, Identity, Store, format_cents};
use std::fmt::Write;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextLimits {
    pub upcoming_events: usize,
    pub bookings: usize,
    pub organizer_events: usize,
}

impl Default for ContextLimits {
    fn default() -> Self {
        Self {
            upcoming_events: 20,
            bookings: 20,
            organizer_events: 30,
        }
    }
}

/// Builds the compact record snapshot handed to the answering model.
pub struct ContextBuilder {
    store: Store,
    limits: ContextLimits,
}

impl ContextBuilder {
    pub fn new(store: Store, limits: ContextLimits) -> Self {
        Self { store, limits }
    }

    #[tracing::instrument(level = "debug", skip_all, fields(account_id = identity.account_id))]
    pub async fn build(&self, identity: &Identity, now: DateTime<Utc>) -> ems_store::Result<String> {
        let mut out = String::new();
        let _ = writeln!(out, "USER ROLE: {}", identity.role_label());
        let email = if identity.email.trim().is_empty() {
            "unknown"
        } else {
            identity.email.as_str()
        };
        let _ = writeln!(out, "USER EMAIL: {email}");
        let _ = writeln!(out, "USERNAME: {}", identity.username);

        let limit = self.limits.upcoming_events;
        let upcoming = self.store.upcoming_published_events(now, limit).await?;
        if upcoming.is_empty() {
            out.push_str("\nUPCOMING PUBLISHED EVENTS: none found.\n");
        } else {
            let _ = writeln!(out, "\nUPCOMING PUBLISHED EVENTS (max {limit}):");
            for listing in &upcoming {
                let _ = writeln!(out, "{}", event_line(listing, false));
            }
        }

        if !identity.email.trim().is_empty() {
            let limit = self.limits.bookings;
            let bookings = self.store.bookings_for_email(&identity.email, limit).await?;
            if bookings.is_empty() {
                out.push_str("\nBOOKINGS FOR THIS USER: none found.\n");
            } else {
                let _ = writeln!(out, "\nBOOKINGS FOR THIS USER (max {limit}):");
                for listing in &bookings {
                    let b = &listing.booking;
                    let booked_at = b
                        .booked_at
                        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                        .unwrap_or_else(|| "unknown".to_string());
                    let _ = writeln!(
                        out,
                        "- Booking #{} for event #{} '{}', tickets={}, status={}, total={}, booked_at={}",
                        b.id,
                        b.event_id,
                        listing.event_title,
                        b.ticket_qty,
                        b.status,
                        format_cents(b.total_price_cents),
                        booked_at
                    );
                }
            }
        }

        if let Some(organizer_id) = identity.approved_organizer_id() {
            let limit = self.limits.organizer_events;
            let owned = self.store.organizer_events(organizer_id, limit).await?;
            if owned.is_empty() {
                out.push_str("\nEVENTS OWNED BY THIS ORGANIZER: none found.\n");
            } else {
                let _ = writeln!(out, "\nEVENTS OWNED BY THIS ORGANIZER (max {limit}):");
                for listing in &owned {
                    let _ = writeln!(out, "{}", event_line(listing, true));
                }
            }
        }

        Ok(out.trim_end().to_string())
    }
}

fn event_line(listing: &EventListing, with_bookings: bool) -> String {
    let event = &listing.event;
    let starts = event
        .start_time
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "unscheduled".to_string());
    let capacity = event
        .capacity
        .map(|c| c.to_string())
        .unwrap_or_else(|| "unset".to_string());
    let price = event
        .ticket_price_cents
        .map(format_cents)
        .unwrap_or_else(|| "free".to_string());
    let bookings = if with_bookings {
        format!(", bookings={}", listing.booking_count)
    } else {
        String::new()
    };
    format!(
        "- Event #{}: '{}' @ {} ({}), starts {}, status={}{}, capacity={}, price={}",
        event.id,
        event.title,
        listing.venue_name,
        listing.venue_type,
        starts,
        event.status,
        bookings,
        capacity,
        price
    )
}
