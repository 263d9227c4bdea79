//! Payment event shapes.
//!
//! External payment-provider plugins match on these field names; renaming a
//! field is a wire-level break. The provider itself is injected through
//! [`crate::services::PaymentEvents`] at host startup.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckoutCompleted {
    pub session_id: String,
    pub payment_intent_id: String,
    pub amount_total: i64,
    pub currency: String,
    pub customer_email: String,
    pub customer_name: String,
    pub tax_amount: i64,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckoutExpired {
    pub session_id: String,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentSucceeded {
    pub payment_intent_id: String,
    pub amount: i64,
    pub currency: String,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentFailed {
    pub payment_intent_id: String,
    pub failure_reason: String,
    pub failure_code: String,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefundProcessed {
    pub payment_intent_id: String,
    pub refund_id: String,
    pub refund_amount: i64,
    pub reason: String,
    pub metadata: HashMap<String, String>,
}

/// Union of all payment events, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PaymentEvent {
    CheckoutCompleted(CheckoutCompleted),
    CheckoutExpired(CheckoutExpired),
    PaymentSucceeded(PaymentSucceeded),
    PaymentFailed(PaymentFailed),
    RefundProcessed(RefundProcessed),
}
