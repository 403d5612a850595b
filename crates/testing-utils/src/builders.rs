//! Test data builders for creating test entities
//!
//! This module provides builder patterns for creating test data with
//! sensible defaults and easy customization.

use chrono::{DateTime, Utc};
use webhook_domain::entities::{
    DeliveryRecord, DeliveryStatus, Endpoint, EndpointScope, SubjectRef, SubjectType, UnitId,
};
use webhook_domain::events::{
    ClientSummary, EventPayload, LeadSnapshot, SaleSnapshot, UnitSummary, UserSummary,
};

/// Builder for creating test Endpoint entities
pub struct EndpointBuilder {
    endpoint: Endpoint,
}

impl EndpointBuilder {
    pub fn new() -> Self {
        Self {
            endpoint: Endpoint::new("https://hooks.example.com/webhook".to_string(), EndpointScope::Global),
        }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.endpoint.id = id;
        self
    }

    pub fn with_url(mut self, url: &str) -> Self {
        self.endpoint.url = url.to_string();
        self
    }

    pub fn with_unit(mut self, unit_id: UnitId) -> Self {
        self.endpoint.scope = EndpointScope::Unit { unit_id };
        self
    }

    pub fn inactive(mut self) -> Self {
        self.endpoint.active = false;
        self
    }

    pub fn build(self) -> Endpoint {
        self.endpoint
    }
}

impl Default for EndpointBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for creating test DeliveryRecord entities
pub struct DeliveryRecordBuilder {
    record: DeliveryRecord,
}

impl DeliveryRecordBuilder {
    pub fn new() -> Self {
        Self {
            record: DeliveryRecord::pending(
                1,
                SubjectRef::new(SubjectType::Lead, "L-1"),
                serde_json::json!({"event": "lead.registered", "data": {"id": "L-1"}}),
            ),
        }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.record.id = id;
        self
    }

    pub fn with_endpoint(mut self, endpoint_id: i64) -> Self {
        self.record.endpoint_id = endpoint_id;
        self
    }

    pub fn with_subject(mut self, subject_type: SubjectType, subject_id: &str) -> Self {
        self.record.subject = SubjectRef::new(subject_type, subject_id);
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.record.payload = payload;
        self
    }

    pub fn with_status(mut self, status: DeliveryStatus) -> Self {
        self.record.status = status;
        self
    }

    pub fn with_attempt_count(mut self, attempt_count: i32) -> Self {
        self.record.attempt_count = attempt_count;
        self
    }

    pub fn with_next_retry_at(mut self, next_retry_at: DateTime<Utc>) -> Self {
        self.record.next_retry_at = Some(next_retry_at);
        self
    }

    /// IN_FLIGHT 且在指定时间被认领
    pub fn claimed_at(mut self, at: DateTime<Utc>) -> Self {
        self.record.status = DeliveryStatus::InFlight;
        self.record.claimed_at = Some(at);
        self.record.last_attempt_at = Some(at);
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.record.created_at = created_at;
        self
    }

    pub fn build(self) -> DeliveryRecord {
        self.record
    }
}

impl Default for DeliveryRecordBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for lead registration events
pub struct LeadEventBuilder {
    lead: LeadSnapshot,
}

impl LeadEventBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            lead: LeadSnapshot {
                id: id.to_string(),
                name: "Test Lead".to_string(),
                email: Some("lead@example.com".to_string()),
                phone: None,
                source: None,
                unit: None,
                registered_at: Utc::now(),
            },
        }
    }

    pub fn with_unit(mut self, unit_id: UnitId) -> Self {
        self.lead.unit = Some(UnitSummary {
            id: unit_id,
            name: format!("Unit {unit_id}"),
        });
        self
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.lead.name = name.to_string();
        self
    }

    pub fn build(self) -> EventPayload {
        EventPayload::LeadRegistered(self.lead)
    }
}

/// Builder for sale completion events
pub struct SaleEventBuilder {
    sale: SaleSnapshot,
}

impl SaleEventBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            sale: SaleSnapshot {
                id: id.to_string(),
                amount: 100.0,
                currency: "EUR".to_string(),
                product: None,
                client: ClientSummary {
                    id: 1,
                    name: "Test Client".to_string(),
                    email: None,
                    phone: None,
                },
                unit: None,
                created_by: UserSummary {
                    id: 1,
                    name: "Test User".to_string(),
                    email: None,
                },
                completed_at: Utc::now(),
            },
        }
    }

    pub fn with_unit(mut self, unit_id: UnitId) -> Self {
        self.sale.unit = Some(UnitSummary {
            id: unit_id,
            name: format!("Unit {unit_id}"),
        });
        self
    }

    pub fn with_amount(mut self, amount: f64) -> Self {
        self.sale.amount = amount;
        self
    }

    pub fn build(self) -> EventPayload {
        EventPayload::SaleCompleted(self.sale)
    }
}
