pub mod health;
pub mod invoices;

use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};

/// The success half of the response envelope.
pub fn success<T: Serialize>(data: T) -> Json<Value> {
    Json(json!({ "success": true, "data": data }))
}
