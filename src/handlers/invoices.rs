//! Gateway invoice surface.
//!
//! Bodies are parsed by hand from the buffered bytes so malformed JSON
//! stays inside the response envelope instead of leaking extractor
//! rejections.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Extension,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::db::models::{Invoice, InvoiceStatus, Merchant};
use crate::db::queries;
use crate::error::ApiError;
use crate::handlers::success;
use crate::middleware::auth::AuthedMerchant;
use crate::services::invoice::{self, CheckOutcome, NewInvoice};
use crate::AppState;

const MAX_LIST_LIMIT: i64 = 200;
const DEFAULT_LIST_LIMIT: i64 = 20;
const MAX_EVENT_LIMIT: i64 = 100;

#[derive(Debug, Deserialize)]
pub struct CreateInvoiceBody {
    pub username: Option<String>,
    pub token: Option<String>,
    pub amount: Option<i64>,
    pub qris_static: Option<String>,
    pub reference_id: Option<String>,
    pub metadata: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct CheckBody {
    pub username: Option<String>,
    pub token: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct RefundBody {
    pub amount: Option<i64>,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Pagination {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub async fn create(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthedMerchant>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let body: CreateInvoiceBody = parse_body(&body)?;

    let username = require(body.username, "username")?;
    // The upstream token travels on every call by contract; creation only
    // checks presence, polling is what spends it.
    require(body.token, "token")?;
    let qris_static = require(body.qris_static, "qris_static")?;
    let amount = body.amount.ok_or_else(|| ApiError::MissingParams("amount".into()))?;
    if amount <= 0 {
        return Err(ApiError::InvalidAmount);
    }

    let merchant = load_merchant(&state, &auth).await?;
    let now = Utc::now().timestamp();
    let created = invoice::create(
        &state,
        &merchant,
        auth.env,
        NewInvoice {
            principal: &username,
            base_amount: amount,
            qris_static: &qris_static,
            reference_id: body.reference_id,
            metadata: body.metadata,
        },
        now,
    )
    .await?;

    let mut data = invoice_json(&created);
    data["expires_in"] = json!(created.expires_at - now);
    Ok((StatusCode::CREATED, success(data)))
}

pub async fn list(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthedMerchant>,
    Query(pagination): Query<Pagination>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = pagination
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT);
    let offset = pagination.offset.unwrap_or(0).max(0);

    let invoices =
        queries::list_invoices(&state.db, &auth.merchant_id, auth.env, limit, offset).await?;
    let items: Vec<Value> = invoices.iter().map(invoice_json).collect();

    Ok(success(json!({
        "invoices": items,
        "limit": limit,
        "offset": offset,
    })))
}

pub async fn get_one(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthedMerchant>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let invoice = queries::get_invoice_for_merchant(&state.db, &id, &auth.merchant_id, auth.env)
        .await?
        .ok_or(ApiError::NotFound)?;
    Ok(success(invoice_json(&invoice)))
}

pub async fn check(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthedMerchant>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let body: CheckBody = parse_body(&body)?;
    let username = require(body.username, "username")?;
    let token = require(body.token, "token")?;

    let merchant = load_merchant(&state, &auth).await?;
    let now = Utc::now().timestamp();
    let outcome =
        invoice::check(&state, &merchant, auth.env, &id, &username, &token, now).await?;

    let data = match outcome {
        CheckOutcome::Paid { paid_at } => json!({
            "invoice_id": id,
            "status": InvoiceStatus::Paid.as_str(),
            "paid_at": paid_at,
        }),
        CheckOutcome::Expired => json!({
            "invoice_id": id,
            "status": InvoiceStatus::Expired.as_str(),
        }),
        CheckOutcome::Pending { expires_in } => json!({
            "invoice_id": id,
            "status": InvoiceStatus::Pending.as_str(),
            "expires_in": expires_in,
        }),
    };
    Ok(success(data))
}

pub async fn events(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthedMerchant>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    // Ownership first, so foreign invoice ids are indistinguishable from
    // absent ones.
    queries::get_invoice_for_merchant(&state.db, &id, &auth.merchant_id, auth.env)
        .await?
        .ok_or(ApiError::NotFound)?;

    let events = queries::list_events(&state.db, &id, MAX_EVENT_LIMIT).await?;
    let items: Vec<Value> = events
        .iter()
        .map(|e| {
            json!({
                "id": e.id,
                "event_type": e.event_type,
                "payload": serde_json::from_str::<Value>(&e.payload).unwrap_or(Value::Null),
                "created_at": e.created_at,
            })
        })
        .collect();

    Ok(success(json!({ "events": items })))
}

pub async fn refund(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthedMerchant>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let body: RefundBody = if body.is_empty() {
        RefundBody::default()
    } else {
        parse_body(&body)?
    };

    let merchant = load_merchant(&state, &auth).await?;
    let now = Utc::now().timestamp();
    let refund =
        invoice::request_refund(&state, &merchant, auth.env, &id, body.amount, body.reason, now)
            .await?;

    Ok((
        StatusCode::CREATED,
        success(json!({
            "refund_id": refund.id,
            "invoice_id": refund.invoice_id,
            "amount": refund.amount,
            "reason": refund.reason,
            "status": refund.status,
        })),
    ))
}

async fn load_merchant(state: &AppState, auth: &AuthedMerchant) -> Result<Merchant, ApiError> {
    queries::get_merchant(&state.db, &auth.merchant_id)
        .await?
        .ok_or(ApiError::Internal)
}

fn parse_body<T: serde::de::DeserializeOwned>(bytes: &Bytes) -> Result<T, ApiError> {
    serde_json::from_slice(bytes).map_err(|_| ApiError::MissingParams("body".into()))
}

fn require(value: Option<String>, name: &str) -> Result<String, ApiError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ApiError::MissingParams(name.into())),
    }
}

fn invoice_json(invoice: &Invoice) -> Value {
    json!({
        "id": invoice.id,
        "reference_id": invoice.reference_id,
        "principal": invoice.principal,
        "env": invoice.env,
        "base_amount": invoice.base_amount,
        "unique_suffix": invoice.unique_suffix,
        "final_amount": invoice.final_amount,
        "status": invoice.status,
        "qris_string": invoice.qris_string,
        "metadata": invoice
            .metadata
            .as_deref()
            .and_then(|m| serde_json::from_str::<Value>(m).ok()),
        "created_at": invoice.created_at,
        "expires_at": invoice.expires_at,
        "paid_at": invoice.paid_at,
    })
}
