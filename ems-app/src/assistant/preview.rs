use crate::assistant::action::{CreateVenueArgs, EventRef, text};
use ems_store::{ActionKind, ActionParams};
use serde_json::Value;

pub const CONFIRM_INSTRUCTION: &str =
    "If this looks correct, type **yes** to confirm. To cancel, type **no**.";

/// Renders the staged action the way the user will be asked to confirm it.
///
/// Values are shown as the model extracted them; nothing is resolved against
/// the record store here.
pub fn render(kind: ActionKind, params: &ActionParams, reason: &str) -> String {
    let mut lines = vec![format!("Here's what I plan to do (`{kind}`):"), String::new()];

    match kind {
        ActionKind::CreateEvent => {
            let title = text(params, &["title"]).unwrap_or_else(|| "(missing title)".into());
            let venue = text(params, &["venue_name", "venue"])
                .unwrap_or_else(|| "(venue not specified)".into());
            lines.push(format!("• **Title** (required): {title}"));
            lines.push(format!("• **Venue** (required): {venue}"));
            if let Some(start) = text(params, &["start", "start_time"]) {
                lines.push(format!("• **Starts at**: {start}"));
            }
            if let Some(end) = text(params, &["end", "end_time"]) {
                lines.push(format!("• **Ends at**: {end}"));
            }
            if let Some(capacity) = text(params, &["capacity"]) {
                lines.push(format!("• **Capacity**: {capacity}"));
            }
            if let Some(price) = text(params, &["ticket_price"]) {
                lines.push(format!("• **Ticket price**: ${}", price.trim_start_matches('$')));
            }
            if let Some(status) = text(params, &["status"]) {
                lines.push(format!("• Status: {status}"));
            }
            if let Some(description) = text(params, &["description"]) {
                lines.push(format!("• Description: {description}"));
            }
        }
        ActionKind::DeleteEvent => {
            let identifier = EventRef::from_params(params)
                .identifier
                .unwrap_or_else(|| "(no identifier)".into());
            lines.push(format!("• Delete the event identified by: {identifier}"));
        }
        ActionKind::UpdateEvent => {
            let identifier = EventRef::from_params(params)
                .identifier
                .unwrap_or_else(|| "(no identifier)".into());
            lines.push(format!("• Update the event identified by: {identifier}"));
            let mut changes: Vec<String> = params
                .iter()
                .filter(|(key, _)| !matches!(key.as_str(), "identifier" | "event_id"))
                .map(|(key, value)| format!("{key}={}", display_value(value)))
                .collect();
            changes.sort();
            let changes = if changes.is_empty() {
                "(none)".to_string()
            } else {
                changes.join(", ")
            };
            lines.push(format!("• With changes: {changes}"));
        }
        ActionKind::CreateVenue => {
            let venue = CreateVenueArgs::from_params(params);
            lines.push(format!(
                "• Create a **venue** named: {}",
                venue.name.as_deref().unwrap_or("(missing name)")
            ));
            if let Some(address) = venue.address {
                lines.push(format!("• Address: {address}"));
            }
            if let Some(capacity) = venue.capacity {
                lines.push(format!("• Capacity: {capacity}"));
            }
            if let Some(venue_type) = venue.venue_type {
                lines.push(format!("• Type: {venue_type}"));
            }
        }
        ActionKind::CancelBooking => {
            let booking_id =
                text(params, &["booking_id"]).unwrap_or_else(|| "(missing id)".into());
            lines.push(format!("• Cancel booking with ID: {booking_id}"));
        }
    }

    lines.push(String::new());
    lines.push(CONFIRM_INSTRUCTION.to_string());

    let reason = reason.trim();
    if !reason.is_empty() {
        lines.push(String::new());
        lines.push(format!("_Why I chose this action_: {reason}"));
    }
    lines.join("\n")
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: Value) -> ActionParams {
        value.as_object().cloned().expect("object params")
    }

    #[test]
    fn create_event_preview_lists_known_fields() {
        let preview = render(
            ActionKind::CreateEvent,
            &params(json!({
                "title": "Launch",
                "venue_name": "Hall A",
                "capacity": 100,
                "ticket_price": null,
                "start": "2025-12-05 19:00",
            })),
            "The user asked to create an event.",
        );
        assert!(preview.starts_with("Here's what I plan to do (`create_event`):"));
        assert!(preview.contains("• **Title** (required): Launch"));
        assert!(preview.contains("• **Venue** (required): Hall A"));
        assert!(preview.contains("• **Starts at**: 2025-12-05 19:00"));
        assert!(preview.contains("• **Capacity**: 100"));
        assert!(!preview.contains("Ticket price"));
        assert!(preview.contains(CONFIRM_INSTRUCTION));
        assert!(preview.ends_with("_Why I chose this action_: The user asked to create an event."));
    }

    #[test]
    fn missing_fields_get_placeholders() {
        let preview = render(ActionKind::CreateEvent, &ActionParams::new(), "");
        assert!(preview.contains("(missing title)"));
        assert!(preview.contains("(venue not specified)"));
        assert!(!preview.contains("Why I chose"));
    }

    #[test]
    fn update_preview_lists_changes_without_identifier() {
        let preview = render(
            ActionKind::UpdateEvent,
            &params(json!({"identifier": 7, "capacity": 80, "title": "Gala"})),
            "",
        );
        assert!(preview.contains("• Update the event identified by: 7"));
        assert!(preview.contains("• With changes: capacity=80, title=Gala"));
    }

    #[test]
    fn cancel_booking_preview_shows_id() {
        let preview = render(
            ActionKind::CancelBooking,
            &params(json!({"booking_id": 12})),
            "",
        );
        assert!(preview.contains("• Cancel booking with ID: 12"));
    }

    #[test]
    fn venue_preview_shows_supplied_details() {
        let preview = render(
            ActionKind::CreateVenue,
            &params(json!({"name": "Dome", "capacity": 9000, "type": "Sports"})),
            "",
        );
        assert!(preview.contains("• Create a **venue** named: Dome"));
        assert!(preview.contains("• Capacity: 9000"));
        assert!(preview.contains("• Type: Sports"));
        assert!(!preview.contains("Address"));
    }
}
