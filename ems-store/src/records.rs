//! Record operations: accounts, organizers, customers, venues, events, bookings.

use crate::db::Store;
use crate::error::{Result, StoreError};
use crate::models::{
    Account, Booking, BookingListing, BookingStatus, CancelledBooking, Customer, Event,
    EventListing, EventStatus, Identity, NewBooking, NewEvent, NewOrganizer, NewVenue, Organizer,
    OrganizerLink, OrganizerStatus, Venue, VenueRef,
};
use crate::validation::{checked_booking_total, validate_booking, validate_event, validate_venue};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};

const EVENT_COLUMNS: &str = "e.id, e.organizer_id, e.venue_id, e.title, e.description, \
     e.start_time, e.end_time, e.capacity, e.status, e.ticket_price_cents";

const LISTING_COLUMNS: &str = "e.id, e.organizer_id, e.venue_id, e.title, e.description, \
     e.start_time, e.end_time, e.capacity, e.status, e.ticket_price_cents, \
     v.name, v.venue_type, \
     (SELECT COUNT(*) FROM bookings b WHERE b.event_id = e.id)";

const BOOKING_COLUMNS: &str = "b.id, b.event_id, b.customer_id, b.ticket_qty, \
     b.unit_price_cents, b.total_price_cents, b.status, b.booked_at";

impl Store {
    pub async fn create_account(&self, username: &str, email: &str) -> Result<Account> {
        let username = username.trim().to_string();
        let email = email.trim().to_string();
        if username.is_empty() {
            return Err(StoreError::InvalidValue("username is required".to_string()));
        }
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO accounts (username, email) VALUES (?1, ?2)",
                params![username, email],
            )?;
            Ok(Account {
                id: conn.last_insert_rowid(),
                username,
                email,
            })
        })
        .await
    }

    pub async fn identity_by_username(&self, username: &str) -> Result<Option<Identity>> {
        let username = username.trim().to_string();
        self.with_conn(move |conn| {
            query_identity(conn, "a.username = ?1", rusqlite::types::Value::Text(username))
        })
        .await
    }

    pub async fn identity_by_id(&self, account_id: i64) -> Result<Option<Identity>> {
        self.with_conn(move |conn| {
            query_identity(conn, "a.id = ?1", rusqlite::types::Value::Integer(account_id))
        })
        .await
    }

    pub async fn create_organizer(&self, new: NewOrganizer) -> Result<Organizer> {
        if new.name.trim().is_empty() || new.email.trim().is_empty() {
            return Err(StoreError::InvalidValue(
                "organizer name and email are required".to_string(),
            ));
        }
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO organizers (account_id, name, email, phone, status) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    new.account_id,
                    new.name.trim(),
                    new.email.trim(),
                    new.phone,
                    new.status
                ],
            )?;
            organizer_by_id(conn, conn.last_insert_rowid())
        })
        .await
    }

    #[tracing::instrument(level = "info", skip(self))]
    pub async fn set_organizer_status(
        &self,
        organizer_id: i64,
        status: OrganizerStatus,
    ) -> Result<Organizer> {
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE organizers SET status = ?1 WHERE id = ?2",
                params![status, organizer_id],
            )?;
            if changed == 0 {
                return Err(StoreError::not_found("organizer", organizer_id));
            }
            organizer_by_id(conn, organizer_id)
        })
        .await
    }

    pub async fn create_customer(&self, name: &str, email: &str) -> Result<Customer> {
        let name = name.trim().to_string();
        let email = email.trim().to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO customers (name, email) VALUES (?1, ?2)",
                params![name, email],
            )?;
            Ok(Customer {
                id: conn.last_insert_rowid(),
                name,
                email,
            })
        })
        .await
    }

    pub async fn create_venue(&self, new: NewVenue) -> Result<Venue> {
        validate_venue(&new).map_err(StoreError::Validation)?;
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO venues (name, address, capacity, venue_type) VALUES (?1, ?2, ?3, ?4)",
                params![new.name.trim(), new.address.trim(), new.capacity, new.venue_type],
            )?;
            venue_by_id(conn, conn.last_insert_rowid())?
                .ok_or_else(|| StoreError::not_found("venue", "just inserted"))
        })
        .await
    }

    pub async fn find_venue_by_name(&self, name: &str) -> Result<Option<Venue>> {
        let name = name.trim().to_string();
        self.with_conn(move |conn| venue_by_name(conn, &name)).await
    }

    /// Creates an event in one transaction: venue resolution, validation and
    /// insert either all happen or nothing is written.
    #[tracing::instrument(level = "info", skip_all, fields(organizer_id = new.organizer_id))]
    pub async fn create_event(&self, new: NewEvent, now: DateTime<Utc>) -> Result<Event> {
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let venue = match &new.venue {
                VenueRef::Id(id) => {
                    venue_by_id(&tx, *id)?.ok_or_else(|| StoreError::not_found("venue", id))?
                }
                VenueRef::Name(name) => venue_by_name(&tx, name)?
                    .ok_or_else(|| StoreError::not_found("venue", name))?,
            };
            validate_event(&new, &venue, now).map_err(StoreError::Validation)?;

            let description = new
                .description
                .as_deref()
                .map(str::trim)
                .filter(|d| !d.is_empty());
            tx.execute(
                "INSERT INTO events (organizer_id, venue_id, title, description, start_time, \
                 end_time, capacity, status, ticket_price_cents) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    new.organizer_id,
                    venue.id,
                    new.title.trim(),
                    description,
                    new.start_time,
                    new.end_time,
                    new.capacity,
                    new.status,
                    new.ticket_price_cents
                ],
            )?;
            let event = event_by_id(&tx, tx.last_insert_rowid())?
                .ok_or_else(|| StoreError::not_found("event", "just inserted"))?;
            tx.commit()?;
            Ok(event)
        })
        .await
    }

    pub async fn event_by_id(&self, event_id: i64) -> Result<Option<Event>> {
        self.with_conn(move |conn| event_by_id(conn, event_id)).await
    }

    /// Resolves an organizer's event by numeric id first, then by exact
    /// case-insensitive title.
    pub async fn find_organizer_event(
        &self,
        organizer_id: i64,
        identifier: &str,
    ) -> Result<Option<Event>> {
        let identifier = identifier.trim().to_string();
        self.with_conn(move |conn| find_owned_event(conn, organizer_id, &identifier))
            .await
    }

    /// Deletes an event owned by the organizer. Events that still have
    /// bookings are protected and left untouched.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn delete_organizer_event(&self, organizer_id: i64, event_id: i64) -> Result<Event> {
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let event = event_by_id(&tx, event_id)?
                .filter(|e| e.organizer_id == organizer_id)
                .ok_or_else(|| StoreError::not_found("event", event_id))?;
            let bookings: i64 = tx.query_row(
                "SELECT COUNT(*) FROM bookings WHERE event_id = ?1",
                params![event_id],
                |row| row.get(0),
            )?;
            if bookings > 0 {
                return Err(StoreError::Protected {
                    entity: "event",
                    id: event_id,
                    dependents: bookings,
                    dependent_kind: "booking(s)",
                });
            }
            tx.execute("DELETE FROM events WHERE id = ?1", params![event_id])?;
            tx.commit()?;
            Ok(event)
        })
        .await
    }

    pub async fn create_booking(&self, new: NewBooking) -> Result<Booking> {
        validate_booking(&new).map_err(StoreError::Validation)?;
        let total_price_cents = checked_booking_total(&new).map_err(StoreError::Validation)?;
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO bookings (event_id, customer_id, ticket_qty, unit_price_cents, \
                 total_price_cents, status, booked_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    new.event_id,
                    new.customer_id,
                    new.ticket_qty,
                    new.unit_price_cents,
                    total_price_cents,
                    new.status,
                    new.booked_at
                ],
            )?;
            booking_by_id(conn, conn.last_insert_rowid())?
                .ok_or_else(|| StoreError::not_found("booking", "just inserted"))
        })
        .await
    }

    pub async fn booking_by_id(&self, booking_id: i64) -> Result<Option<Booking>> {
        self.with_conn(move |conn| booking_by_id(conn, booking_id))
            .await
    }

    /// Cancels a booking on one of the organizer's events.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn cancel_organizer_booking(
        &self,
        organizer_id: i64,
        booking_id: i64,
    ) -> Result<CancelledBooking> {
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let sql = format!(
                "SELECT {BOOKING_COLUMNS} FROM bookings b \
                 JOIN events e ON e.id = b.event_id \
                 WHERE b.id = ?1 AND e.organizer_id = ?2"
            );
            let booking = tx
                .query_row(&sql, params![booking_id, organizer_id], booking_from_row)
                .optional()?
                .ok_or_else(|| StoreError::not_found("booking", booking_id))?;
            let was_already_cancelled = booking.status == BookingStatus::Cancelled;
            tx.execute(
                "UPDATE bookings SET status = ?1 WHERE id = ?2",
                params![BookingStatus::Cancelled, booking_id],
            )?;
            tx.commit()?;
            Ok(CancelledBooking {
                booking: Booking {
                    status: BookingStatus::Cancelled,
                    ..booking
                },
                was_already_cancelled,
            })
        })
        .await
    }

    /// Published events starting at or after `now`, soonest first.
    pub async fn upcoming_published_events(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<EventListing>> {
        self.with_conn(move |conn| {
            let sql = format!(
                "SELECT {LISTING_COLUMNS} FROM events e JOIN venues v ON v.id = e.venue_id \
                 WHERE e.status = ?1 AND e.start_time IS NOT NULL AND e.start_time >= ?2 \
                 ORDER BY e.start_time ASC, e.id ASC LIMIT ?3"
            );
            let mut stmt = conn.prepare_cached(&sql)?;
            let rows = stmt.query_map(
                params![EventStatus::Published, now, limit as i64],
                listing_from_row,
            )?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    /// Every event owned by the organizer, scheduled ones first.
    pub async fn organizer_events(
        &self,
        organizer_id: i64,
        limit: usize,
    ) -> Result<Vec<EventListing>> {
        self.with_conn(move |conn| {
            let sql = format!(
                "SELECT {LISTING_COLUMNS} FROM events e JOIN venues v ON v.id = e.venue_id \
                 WHERE e.organizer_id = ?1 \
                 ORDER BY e.start_time IS NULL, e.start_time ASC, e.id ASC LIMIT ?2"
            );
            let mut stmt = conn.prepare_cached(&sql)?;
            let rows = stmt.query_map(params![organizer_id, limit as i64], listing_from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    /// Bookings made by the customer whose email matches, newest first.
    pub async fn bookings_for_email(
        &self,
        email: &str,
        limit: usize,
    ) -> Result<Vec<BookingListing>> {
        let email = email.trim().to_string();
        self.with_conn(move |conn| {
            let sql = format!(
                "SELECT {BOOKING_COLUMNS}, e.title FROM bookings b \
                 JOIN customers c ON c.id = b.customer_id \
                 JOIN events e ON e.id = b.event_id \
                 WHERE c.email = ?1 COLLATE NOCASE \
                 ORDER BY b.booked_at IS NULL, b.booked_at DESC, b.id DESC LIMIT ?2"
            );
            let mut stmt = conn.prepare_cached(&sql)?;
            let rows = stmt.query_map(params![email, limit as i64], |row| {
                Ok(BookingListing {
                    booking: booking_from_row(row)?,
                    event_title: row.get(8)?,
                })
            })?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }
}

fn query_identity(
    conn: &Connection,
    predicate: &str,
    key: rusqlite::types::Value,
) -> Result<Option<Identity>> {
    let sql = format!(
        "SELECT a.id, a.username, a.email, o.id, o.name, o.status \
         FROM accounts a LEFT JOIN organizers o ON o.account_id = a.id \
         WHERE {predicate}"
    );
    let identity = conn
        .query_row(&sql, params![key], |row| {
            let organizer_id: Option<i64> = row.get(3)?;
            let organizer = match organizer_id {
                Some(organizer_id) => Some(OrganizerLink {
                    organizer_id,
                    name: row.get(4)?,
                    status: row.get(5)?,
                }),
                None => None,
            };
            Ok(Identity {
                account_id: row.get(0)?,
                username: row.get(1)?,
                email: row.get(2)?,
                organizer,
            })
        })
        .optional()?;
    Ok(identity)
}

fn organizer_by_id(conn: &Connection, organizer_id: i64) -> Result<Organizer> {
    conn.query_row(
        "SELECT id, account_id, name, email, phone, status FROM organizers WHERE id = ?1",
        params![organizer_id],
        |row| {
            Ok(Organizer {
                id: row.get(0)?,
                account_id: row.get(1)?,
                name: row.get(2)?,
                email: row.get(3)?,
                phone: row.get(4)?,
                status: row.get(5)?,
            })
        },
    )
    .optional()?
    .ok_or_else(|| StoreError::not_found("organizer", organizer_id))
}

fn venue_from_row(row: &Row<'_>) -> rusqlite::Result<Venue> {
    Ok(Venue {
        id: row.get(0)?,
        name: row.get(1)?,
        address: row.get(2)?,
        capacity: row.get(3)?,
        venue_type: row.get(4)?,
    })
}

fn venue_by_id(conn: &Connection, venue_id: i64) -> Result<Option<Venue>> {
    Ok(conn
        .query_row(
            "SELECT id, name, address, capacity, venue_type FROM venues WHERE id = ?1",
            params![venue_id],
            venue_from_row,
        )
        .optional()?)
}

fn venue_by_name(conn: &Connection, name: &str) -> Result<Option<Venue>> {
    let name = name.trim();
    if name.is_empty() {
        return Ok(None);
    }
    Ok(conn
        .query_row(
            "SELECT id, name, address, capacity, venue_type FROM venues \
             WHERE name = ?1 COLLATE UNICODE_NOCASE ORDER BY id ASC LIMIT 1",
            params![name],
            venue_from_row,
        )
        .optional()?)
}

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<Event> {
    Ok(Event {
        id: row.get(0)?,
        organizer_id: row.get(1)?,
        venue_id: row.get(2)?,
        title: row.get(3)?,
        description: row.get(4)?,
        start_time: row.get(5)?,
        end_time: row.get(6)?,
        capacity: row.get(7)?,
        status: row.get(8)?,
        ticket_price_cents: row.get(9)?,
    })
}

fn listing_from_row(row: &Row<'_>) -> rusqlite::Result<EventListing> {
    Ok(EventListing {
        event: event_from_row(row)?,
        venue_name: row.get(10)?,
        venue_type: row.get(11)?,
        booking_count: row.get(12)?,
    })
}

fn event_by_id(conn: &Connection, event_id: i64) -> Result<Option<Event>> {
    let sql = format!("SELECT {EVENT_COLUMNS} FROM events e WHERE e.id = ?1");
    Ok(conn
        .query_row(&sql, params![event_id], event_from_row)
        .optional()?)
}

fn find_owned_event(
    conn: &Connection,
    organizer_id: i64,
    identifier: &str,
) -> Result<Option<Event>> {
    if identifier.is_empty() {
        return Ok(None);
    }
    if let Ok(id) = identifier.parse::<i64>() {
        let sql = format!("SELECT {EVENT_COLUMNS} FROM events e WHERE e.id = ?1 AND e.organizer_id = ?2");
        if let Some(event) = conn
            .query_row(&sql, params![id, organizer_id], event_from_row)
            .optional()?
        {
            return Ok(Some(event));
        }
    }
    let sql = format!(
        "SELECT {EVENT_COLUMNS} FROM events e \
         WHERE e.title = ?1 COLLATE UNICODE_NOCASE AND e.organizer_id = ?2 \
         ORDER BY e.id ASC LIMIT 1"
    );
    Ok(conn
        .query_row(&sql, params![identifier, organizer_id], event_from_row)
        .optional()?)
}

fn booking_from_row(row: &Row<'_>) -> rusqlite::Result<Booking> {
    Ok(Booking {
        id: row.get(0)?,
        event_id: row.get(1)?,
        customer_id: row.get(2)?,
        ticket_qty: row.get(3)?,
        unit_price_cents: row.get(4)?,
        total_price_cents: row.get(5)?,
        status: row.get(6)?,
        booked_at: row.get(7)?,
    })
}

fn booking_by_id(conn: &Connection, booking_id: i64) -> Result<Option<Booking>> {
    let sql = format!("SELECT {BOOKING_COLUMNS} FROM bookings b WHERE b.id = ?1");
    Ok(conn
        .query_row(&sql, params![booking_id], booking_from_row)
        .optional()?)
}
