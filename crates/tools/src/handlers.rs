//! Demonstration tool handlers.
//!
//! The back-end REST surface these would call in production is out of
//! scope (§1): each handler here is backed by an in-memory record store so
//! the CLI and integration tests can exercise a full turn without network
//! access. Schemas follow the same JSON-Schema-literal style used to
//! describe every tool offered to the model.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use cso_domain::error::{ToolErrorKind, ToolResult};
use cso_domain::tool::ToolDefinition;

use crate::registry::ToolHandler;

/// In-memory book of records shared by the demo handlers.
#[derive(Default)]
pub struct RecordBook {
    customers: Mutex<HashMap<String, Value>>,
    tasks: Mutex<HashMap<String, Value>>,
    bookings: Mutex<HashMap<String, Value>>,
}

impl RecordBook {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

pub fn customer_lookup_schema() -> ToolDefinition {
    ToolDefinition {
        name: "customer.lookup".into(),
        description: "Look up a customer record by phone number or customer id.".into(),
        parameters: json!({
            "type": "object",
            "properties": {
                "phone": { "type": "string", "description": "Customer phone number" },
                "customer_id": { "type": "string", "description": "Existing customer id" }
            }
        }),
    }
}

pub struct CustomerLookup(pub Arc<RecordBook>);

#[async_trait]
impl ToolHandler for CustomerLookup {
    async fn handle(&self, args: Value, _sid: &str, _cancel: &CancellationToken) -> ToolResult {
        let key = args
            .get("customer_id")
            .and_then(|v| v.as_str())
            .or_else(|| args.get("phone").and_then(|v| v.as_str()));
        let Some(key) = key else {
            return ToolResult::err(ToolErrorKind::ArgInvalid, "phone or customer_id required");
        };
        match self.0.customers.lock().get(key) {
            Some(record) => ToolResult::ok(record.clone()),
            None => ToolResult::err(ToolErrorKind::NotFound, format!("no customer matching \"{key}\"")),
        }
    }
}

pub fn customer_create_schema() -> ToolDefinition {
    ToolDefinition {
        name: "customer.create".into(),
        description: "Create a new customer record.".into(),
        parameters: json!({
            "type": "object",
            "properties": {
                "name": { "type": "string" },
                "phone": { "type": "string" },
                "email": { "type": "string" }
            },
            "required": ["name", "phone"]
        }),
    }
}

pub struct CustomerCreate(pub Arc<RecordBook>);

#[async_trait]
impl ToolHandler for CustomerCreate {
    async fn handle(&self, args: Value, _sid: &str, _cancel: &CancellationToken) -> ToolResult {
        let Some(phone) = args.get("phone").and_then(|v| v.as_str()) else {
            return ToolResult::err(ToolErrorKind::ArgInvalid, "phone is required");
        };
        let customer_id = Uuid::new_v4().to_string();
        let record = json!({
            "customer_id": customer_id,
            "name": args.get("name").cloned().unwrap_or(Value::Null),
            "phone": phone,
            "email": args.get("email").cloned().unwrap_or(Value::Null),
        });
        self.0
            .customers
            .lock()
            .insert(phone.to_string(), record.clone());
        ToolResult::ok(record)
    }
}

pub fn task_create_schema() -> ToolDefinition {
    ToolDefinition {
        name: "task.create".into(),
        description: "Create a follow-up task for the service team.".into(),
        parameters: json!({
            "type": "object",
            "properties": {
                "title": { "type": "string" },
                "notes": { "type": "string", "description": "Free-form context for the assignee" }
            },
            "required": ["title"]
        }),
    }
}

pub struct TaskCreate(pub Arc<RecordBook>);

#[async_trait]
impl ToolHandler for TaskCreate {
    async fn handle(&self, args: Value, _sid: &str, _cancel: &CancellationToken) -> ToolResult {
        let Some(title) = args.get("title").and_then(|v| v.as_str()) else {
            return ToolResult::err(ToolErrorKind::ArgInvalid, "title is required");
        };
        let task_id = Uuid::new_v4().to_string();
        let record = json!({
            "task_id": task_id,
            "title": title,
            "notes": args.get("notes").cloned().unwrap_or(Value::Null),
            "created_at": Utc::now().to_rfc3339(),
        });
        self.0.tasks.lock().insert(task_id.clone(), record.clone());
        ToolResult::ok(record)
    }
}

pub fn calendar_book_schema() -> ToolDefinition {
    ToolDefinition {
        name: "calendar.book".into(),
        description: "Book a calendar appointment slot for the customer.".into(),
        parameters: json!({
            "type": "object",
            "properties": {
                "slot_iso8601": { "type": "string", "description": "Appointment start time" },
                "duration_minutes": { "type": "integer" }
            },
            "required": ["slot_iso8601"]
        }),
    }
}

pub struct CalendarBook(pub Arc<RecordBook>);

#[async_trait]
impl ToolHandler for CalendarBook {
    async fn handle(&self, args: Value, _sid: &str, _cancel: &CancellationToken) -> ToolResult {
        let Some(slot) = args.get("slot_iso8601").and_then(|v| v.as_str()) else {
            return ToolResult::err(ToolErrorKind::ArgInvalid, "slot_iso8601 is required");
        };
        if self.0.bookings.lock().contains_key(slot) {
            return ToolResult::err(ToolErrorKind::UpstreamFailed, "slot already booked");
        }
        let booking_id = Uuid::new_v4().to_string();
        let record = json!({
            "booking_id": booking_id,
            "slot_iso8601": slot,
            "duration_minutes": args.get("duration_minutes").cloned().unwrap_or(json!(30)),
        });
        self.0
            .bookings
            .lock()
            .insert(slot.to_string(), record.clone());
        ToolResult::ok(record)
    }
}

/// A hangup signal for a terminal goal's `call_hangup` termination step
/// (§9). Carries no side effects of its own beyond confirming completion —
/// transport-level disconnection is the collaborator's concern.
pub fn hangup_schema() -> ToolDefinition {
    ToolDefinition {
        name: "call_hangup".into(),
        description: "Signal that the conversation is complete and the call may end.".into(),
        parameters: json!({ "type": "object", "properties": {} }),
    }
}

pub struct Hangup;

#[async_trait]
impl ToolHandler for Hangup {
    async fn handle(&self, _args: Value, _sid: &str, _cancel: &CancellationToken) -> ToolResult {
        ToolResult::ok(json!({ "hung_up": true }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn customer_create_then_lookup_by_phone() {
        let book = RecordBook::new();
        let create = CustomerCreate(book.clone());
        let created = create
            .handle(
                json!({"name": "Ada", "phone": "555"}),
                "s1",
                &CancellationToken::new(),
            )
            .await;
        assert!(created.is_ok());

        let lookup = CustomerLookup(book.clone());
        let found = lookup
            .handle(json!({"phone": "555"}), "s1", &CancellationToken::new())
            .await;
        assert!(found.is_ok());
    }

    #[tokio::test]
    async fn calendar_book_rejects_double_booking() {
        let book = RecordBook::new();
        let handler = CalendarBook(book);
        let args = json!({"slot_iso8601": "2026-08-01T10:00:00Z"});
        let first = handler
            .handle(args.clone(), "s1", &CancellationToken::new())
            .await;
        assert!(first.is_ok());
        let second = handler.handle(args, "s1", &CancellationToken::new()).await;
        assert!(matches!(
            second,
            ToolResult::Err {
                kind: ToolErrorKind::UpstreamFailed,
                ..
            }
        ));
    }
}
