//! Record types for accounts, organizers, venues, events and bookings.

use crate::error::{Result, StoreError};
use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

/// Enum persisted as a fixed text value.
macro_rules! text_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $text)] $variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = StoreError;

            fn from_str(s: &str) -> Result<Self> {
                let trimmed = s.trim();
                $(
                    if trimmed.eq_ignore_ascii_case($text) {
                        return Ok($name::$variant);
                    }
                )+
                Err(StoreError::InvalidValue(format!(
                    "unknown {} {trimmed:?}",
                    stringify!($name)
                )))
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse()
                    .map_err(|e: StoreError| FromSqlError::Other(Box::new(e)))
            }
        }
    };
}

pub(crate) use text_enum;

text_enum!(
    /// Admin approval state of an organizer.
    OrganizerStatus {
        Pending => "PENDING",
        Approved => "APPROVED",
        Rejected => "REJECTED",
    }
);

text_enum!(VenueType {
    Exhibition => "Exhibition",
    Conference => "Conference",
    Concert => "Concert",
    Sports => "Sports",
});

impl VenueType {
    /// Ticketed venue types need a positive price once an event is published.
    pub fn requires_ticket_price(self) -> bool {
        matches!(self, Self::Concert | Self::Sports)
    }
}

text_enum!(EventStatus {
    Draft => "DRAFT",
    Published => "PUBLISHED",
    Cancelled => "CANCELLED",
});

text_enum!(BookingStatus {
    Pending => "PENDING",
    Approved => "APPROVED",
    Cancelled => "CANCELLED",
});

pub const MAX_CAPACITY: i64 = 50_000;
pub const MAX_TITLE_CHARS: usize = 150;
pub const MAX_TICKETS_PER_BOOKING: i64 = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Account {
    pub id: i64,
    pub username: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Organizer {
    pub id: i64,
    pub account_id: Option<i64>,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub status: OrganizerStatus,
}

#[derive(Debug, Clone)]
pub struct NewOrganizer {
    pub account_id: Option<i64>,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub status: OrganizerStatus,
}

/// Organizer role attached to an identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrganizerLink {
    pub organizer_id: i64,
    pub name: String,
    pub status: OrganizerStatus,
}

/// The authenticated actor behind a chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub account_id: i64,
    pub username: String,
    pub email: String,
    pub organizer: Option<OrganizerLink>,
}

impl Identity {
    /// Only approved organizers may stage or commit mutations.
    pub fn is_privileged(&self) -> bool {
        self.approved_organizer_id().is_some()
    }

    pub fn approved_organizer_id(&self) -> Option<i64> {
        self.organizer
            .as_ref()
            .filter(|o| o.status == OrganizerStatus::Approved)
            .map(|o| o.organizer_id)
    }

    pub fn role_label(&self) -> &'static str {
        match self.organizer.as_ref().map(|o| o.status) {
            Some(OrganizerStatus::Approved) => "organizer",
            Some(OrganizerStatus::Pending) => "organizer (pending approval)",
            Some(OrganizerStatus::Rejected) => "participant (organizer application rejected)",
            None => "participant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Customer {
    pub id: i64,
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Venue {
    pub id: i64,
    pub name: String,
    pub address: String,
    pub capacity: i64,
    pub venue_type: VenueType,
}

#[derive(Debug, Clone)]
pub struct NewVenue {
    pub name: String,
    pub address: String,
    pub capacity: i64,
    pub venue_type: VenueType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Event {
    pub id: i64,
    pub organizer_id: i64,
    pub venue_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub capacity: Option<i64>,
    pub status: EventStatus,
    pub ticket_price_cents: Option<i64>,
}

/// How a new event names its venue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VenueRef {
    Id(i64),
    /// Exact, case-insensitive name match.
    Name(String),
}

#[derive(Debug, Clone)]
pub struct NewEvent {
    pub organizer_id: i64,
    pub venue: VenueRef,
    pub title: String,
    pub description: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub capacity: Option<i64>,
    pub status: EventStatus,
    pub ticket_price_cents: Option<i64>,
}

/// An event joined with its venue and booking count, for listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventListing {
    pub event: Event,
    pub venue_name: String,
    pub venue_type: VenueType,
    pub booking_count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Booking {
    pub id: i64,
    pub event_id: i64,
    pub customer_id: i64,
    pub ticket_qty: i64,
    pub unit_price_cents: i64,
    pub total_price_cents: i64,
    pub status: BookingStatus,
    pub booked_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewBooking {
    pub event_id: i64,
    pub customer_id: i64,
    pub ticket_qty: i64,
    pub unit_price_cents: i64,
    pub status: BookingStatus,
    pub booked_at: Option<DateTime<Utc>>,
}

/// A booking joined with its event title, for listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookingListing {
    pub booking: Booking,
    pub event_title: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelledBooking {
    pub booking: Booking,
    pub was_already_cancelled: bool,
}

/// Renders integer cents as `12.50`.
pub fn format_cents(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{sign}{}.{:02}", abs / 100, abs % 100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_enums_parse_case_insensitively() {
        assert_eq!(
            "approved".parse::<OrganizerStatus>().expect("status"),
            OrganizerStatus::Approved
        );
        assert_eq!(" concert ".parse::<VenueType>().expect("type"), VenueType::Concert);
        assert!("festival".parse::<VenueType>().is_err());
    }

    #[test]
    fn only_approved_organizers_are_privileged() {
        let mut identity = Identity {
            account_id: 1,
            username: "dana".to_string(),
            email: "dana@example.com".to_string(),
            organizer: None,
        };
        assert!(!identity.is_privileged());

        identity.organizer = Some(OrganizerLink {
            organizer_id: 7,
            name: "Dana Events".to_string(),
            status: OrganizerStatus::Pending,
        });
        assert!(!identity.is_privileged());
        assert_eq!(identity.role_label(), "organizer (pending approval)");

        if let Some(link) = identity.organizer.as_mut() {
            link.status = OrganizerStatus::Approved;
        }
        assert!(identity.is_privileged());
        assert_eq!(identity.approved_organizer_id(), Some(7));
    }

    #[test]
    fn cents_render_with_two_decimals() {
        assert_eq!(format_cents(0), "0.00");
        assert_eq!(format_cents(1250), "12.50");
        assert_eq!(format_cents(5), "0.05");
        assert_eq!(format_cents(-199), "-1.99");
    }
}
