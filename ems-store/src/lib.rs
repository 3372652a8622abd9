//! SQLite-backed record store for the EMS service.
//!
//! Holds accounts, organizers, venues, events and bookings, plus the
//! `pending_actions` table used by the assistant's confirmation flow.

mod db;
mod error;
mod models;
mod pending;
mod records;
mod validation;

pub use db::Store;
pub use error::{Result, StoreError};
pub use models::{
    Account, Booking, BookingListing, BookingStatus, CancelledBooking, Customer, Event,
    EventListing, EventStatus, Identity, MAX_CAPACITY, MAX_TICKETS_PER_BOOKING, MAX_TITLE_CHARS,
    NewBooking, NewEvent, NewOrganizer, NewVenue, Organizer, OrganizerLink, OrganizerStatus, Venue,
    VenueRef, VenueType, format_cents,
};
pub use pending::{ActionKind, ActionParams, PendingAction};
pub use validation::{ValidationErrors, validate_booking, validate_event, validate_venue};
