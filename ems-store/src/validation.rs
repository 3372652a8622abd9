use crate::models::{
    EventStatus, MAX_CAPACITY, MAX_TICKETS_PER_BOOKING, MAX_TITLE_CHARS, NewBooking, NewEvent,
    NewVenue, Venue,
};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;

/// Field-keyed validation messages. All violations are collected, not just the first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors {
    fields: BTreeMap<&'static str, Vec<String>>,
}

impl ValidationErrors {
    pub fn add(&mut self, field: &'static str, message: impl Into<String>) {
        self.fields.entry(field).or_default().push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn messages_for(&self, field: &str) -> &[String] {
        self.fields.get(field).map(Vec::as_slice).unwrap_or(&[])
    }

    fn into_result(self) -> Result<(), ValidationErrors> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, messages) in &self.fields {
            for message in messages {
                if !first {
                    f.write_str("; ")?;
                }
                first = false;
                write!(f, "{field}: {message}")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

pub fn validate_venue(venue: &NewVenue) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::default();
    if venue.name.trim().is_empty() {
        errors.add("name", "Venue name is required.");
    }
    check_capacity(&mut errors, venue.capacity);
    errors.into_result()
}

/// Event rules, evaluated against the resolved venue and the current time.
pub fn validate_event(
    event: &NewEvent,
    venue: &Venue,
    now: DateTime<Utc>,
) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::default();

    let title = event.title.trim();
    if title.is_empty() {
        errors.add("title", "Title is required.");
    } else if title.chars().count() > MAX_TITLE_CHARS {
        errors.add(
            "title",
            format!("Title must be at most {MAX_TITLE_CHARS} characters."),
        );
    }

    match (event.start_time, event.end_time) {
        (Some(start), Some(end)) => {
            if start < now {
                errors.add("start_time", "Start time cannot be in the past.");
            }
            if end <= start {
                errors.add("end_time", "End time must be after the start time.");
            }
        }
        (Some(_), None) => errors.add("end_time", "End time is required when a start time is set."),
        (None, Some(_)) => errors.add("start_time", "Start time is required when an end time is set."),
        (None, None) => {
            if event.status == EventStatus::Published {
                errors.add("start_time", "Published events need a start and end time.");
            }
        }
    }

    if let Some(capacity) = event.capacity {
        check_capacity(&mut errors, capacity);
        if venue.capacity > 0 && capacity > venue.capacity {
            errors.add(
                "capacity",
                format!(
                    "Capacity {capacity} exceeds the capacity of {} ({}).",
                    venue.name, venue.capacity
                ),
            );
        }
    }

    match event.ticket_price_cents {
        Some(price) if price < 0 => errors.add("ticket_price", "Ticket price cannot be negative."),
        Some(price)
            if price == 0
                && event.status == EventStatus::Published
                && venue.venue_type.requires_ticket_price() =>
        {
            errors.add(
                "ticket_price",
                format!("{} events need a positive ticket price.", venue.venue_type),
            )
        }
        None if event.status == EventStatus::Published
            && venue.venue_type.requires_ticket_price() =>
        {
            errors.add(
                "ticket_price",
                format!("{} events need a positive ticket price.", venue.venue_type),
            )
        }
        _ => {}
    }

    errors.into_result()
}

const TOTAL_TOO_LARGE: &str = "Total price is too large.";

/// `None` when unit price times quantity overflows.
fn booking_total_cents(booking: &NewBooking) -> Option<i64> {
    booking.unit_price_cents.checked_mul(booking.ticket_qty)
}

/// Total for a booking, reported against `unit_price` when it overflows.
pub(crate) fn checked_booking_total(booking: &NewBooking) -> Result<i64, ValidationErrors> {
    booking_total_cents(booking).ok_or_else(|| {
        let mut errors = ValidationErrors::default();
        errors.add("unit_price", TOTAL_TOO_LARGE);
        errors
    })
}

pub fn validate_booking(booking: &NewBooking) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::default();
    if !(1..=MAX_TICKETS_PER_BOOKING).contains(&booking.ticket_qty) {
        errors.add(
            "ticket_qty",
            format!("Ticket quantity must be between 1 and {MAX_TICKETS_PER_BOOKING}."),
        );
    }
    if booking.unit_price_cents < 0 {
        errors.add("unit_price", "Unit price cannot be negative.");
    } else if booking_total_cents(booking).is_none() {
        errors.add("unit_price", TOTAL_TOO_LARGE);
    }
    errors.into_result()
}

fn check_capacity(errors: &mut ValidationErrors, capacity: i64) {
    if !(0..=MAX_CAPACITY).contains(&capacity) {
        errors.add(
            "capacity",
            format!("Capacity must be between 0 and {MAX_CAPACITY}."),
        );
    }
}
