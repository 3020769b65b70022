//! Request routing and endpoint handlers

use std::{
    fs,
    panic::{self, AssertUnwindSafe},
    path::PathBuf,
    sync::Arc,
};

use base64::{
    alphabet,
    engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
    Engine,
};
use blockweave_common::{RestError, RestResponse, Transaction};
use blockweave_module_ledger::Ledger;
use serde_json::json;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    parsing::{extract_json_value, multipart_boundary, parse_multipart},
    request::HttpRequest,
};

/// Standard alphabet, padding optional
const PAYLOAD_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Smallest reward units per whole fee unit
const FEE_SCALE: f64 = 1_000_000.0;

const FILE_STORAGE_TARGET: &str = "file_storage";
const DEFAULT_UPLOAD_NAME: &str = "uploaded_file";
const RAW_UPLOAD_NAME: &str = "raw_upload";

/// State shared by all request handlers
pub struct HandlerContext {
    pub ledger: Arc<Ledger>,
    pub data_dir: PathBuf,
    pub miner_address: String,
}

/// Route a request and turn the outcome into a response. A panicking handler
/// yields a 500 rather than taking the worker down.
pub fn handle_request(context: &HandlerContext, request: &HttpRequest) -> RestResponse {
    guarded(request, || route(context, request))
}

fn guarded<F>(request: &HttpRequest, handler: F) -> RestResponse
where
    F: FnOnce() -> Result<RestResponse, RestError>,
{
    match panic::catch_unwind(AssertUnwindSafe(handler)) {
        Ok(Ok(response)) => response,
        Ok(Err(e)) => {
            debug!(
                "{} {} failed with {}: {}",
                request.method,
                request.path,
                e.status_code(),
                e.message()
            );
            e.into()
        }
        Err(_) => {
            error!("Handler for {} {} panicked", request.method, request.path);
            RestError::internal().into()
        }
    }
}

fn route(context: &HandlerContext, request: &HttpRequest) -> Result<RestResponse, RestError> {
    let path = request.path.as_str();
    match request.method.as_str() {
        "GET" => {
            if path == "/chain" {
                handle_chain(context)
            } else if let Some(hash) = path.strip_prefix("/block/") {
                handle_block(context, hash)
            } else if let Some(tx_id) = path.strip_prefix("/data/") {
                handle_data(context, tx_id)
            } else {
                warn!("GET endpoint not found: {path}");
                Err(RestError::not_found())
            }
        }
        "POST" => match path {
            "/transaction" => handle_transaction(context, &request.body),
            "/files" => handle_file_upload(context, request),
            "/mine/start" => handle_mine_start(context),
            "/mine/stop" => handle_mine_stop(context),
            _ => {
                warn!("POST endpoint not found: {path}");
                Err(RestError::not_found())
            }
        },
        _ => Err(RestError::method_not_allowed()),
    }
}

/// Handle `GET /chain`
fn handle_chain(context: &HandlerContext) -> Result<RestResponse, RestError> {
    Ok(RestResponse::ok(&json!({
        "mempool_size": context.ledger.mempool_size(),
        "mining_enabled": context.ledger.is_mining_enabled(),
    })))
}

/// Handle `GET /block/{hash}`
fn handle_block(_context: &HandlerContext, _hash: &str) -> Result<RestResponse, RestError> {
    Err(RestError::not_implemented())
}

/// Handle `GET /data/{tx_id}`
fn handle_data(_context: &HandlerContext, _tx_id: &str) -> Result<RestResponse, RestError> {
    Err(RestError::not_implemented())
}

fn prefix(value: &str, chars: usize) -> String {
    value.chars().take(chars).collect()
}

fn parse_fee(fee: &str) -> Result<u64, RestError> {
    match fee.parse::<f64>() {
        Ok(value) if value.is_finite() && value >= 0.0 => Ok((value * FEE_SCALE) as u64),
        _ => {
            warn!("Invalid fee value: {fee}");
            Err(RestError::invalid_value("fee value"))
        }
    }
}

/// Handle `POST /transaction`
fn handle_transaction(context: &HandlerContext, body: &[u8]) -> Result<RestResponse, RestError> {
    let body = String::from_utf8_lossy(body);
    let field = |key: &str| extract_json_value(&body, key).filter(|value| !value.is_empty());

    let (Some(from), Some(to), Some(encoded)) = (field("from"), field("to"), field("data")) else {
        warn!("POST /transaction: missing required fields");
        return Err(RestError::missing_fields(&["from", "to", "data"]));
    };

    let data = PAYLOAD_ENGINE.decode(encoded)?;
    if data.is_empty() {
        return Err(RestError::invalid_value("base64 data"));
    }

    let fee = field("fee").map(parse_fee).transpose()?.unwrap_or(0);

    let tx = Arc::new(Transaction::new(from, to, data, fee));
    context.ledger.submit_transaction(tx.clone());

    info!(
        "Transaction created: {}... (from: {}..., to: {}..., size: {} bytes)",
        tx.id.short(16),
        prefix(from, 16),
        prefix(to, 16),
        tx.data_size
    );

    Ok(RestResponse::ok(&json!({
        "status": "success",
        "transaction_id": format!("{}...", tx.id.short(32)),
        "from": format!("{}...", prefix(from, 16)),
        "to": format!("{}...", prefix(to, 16)),
        "data_size": tx.data_size,
        "fee": tx.reward,
    })))
}

/// Handle `POST /files`, either multipart/form-data or a raw body
fn handle_file_upload(
    context: &HandlerContext,
    request: &HttpRequest,
) -> Result<RestResponse, RestError> {
    let (filename, data) = if request.content_type.contains("multipart/form-data") {
        let boundary = multipart_boundary(&request.content_type).ok_or_else(|| {
            RestError::BadRequest("Missing boundary in Content-Type".to_string())
        })?;
        let file = parse_multipart(&request.body, boundary)
            .ok_or_else(|| RestError::BadRequest("Failed to parse multipart data".to_string()))?;
        (
            file.filename.unwrap_or_else(|| DEFAULT_UPLOAD_NAME.to_string()),
            file.data,
        )
    } else {
        (RAW_UPLOAD_NAME.to_string(), request.body.clone())
    };

    if data.is_empty() {
        return Err(RestError::BadRequest("Empty file data".to_string()));
    }

    let id = Uuid::new_v4().to_string();

    fs::create_dir_all(&context.data_dir).map_err(|e| {
        error!("Failed to create data directory {}: {e}", context.data_dir.display());
        RestError::InternalServerError("Failed to create data directory".to_string())
    })?;

    let path = context.data_dir.join(&id);
    fs::write(&path, &data).map_err(|e| {
        error!("Failed to write upload to {}: {e}", path.display());
        RestError::InternalServerError("Failed to save file".to_string())
    })?;

    let size = data.len();
    let tx = Arc::new(Transaction::new(
        &context.miner_address,
        FILE_STORAGE_TARGET,
        data,
        0,
    ));
    context.ledger.submit_transaction(tx.clone());

    info!(
        "File uploaded: {filename} -> {id} ({size} bytes, tx: {}...)",
        tx.id.short(16)
    );

    Ok(RestResponse::ok(&json!({
        "status": "success",
        "transaction_id": format!("{}...", tx.id.short(32)),
        "uuid": id,
        "original_filename": filename,
        "saved_path": path.display().to_string(),
        "size": size,
        "message": "File uploaded and saved to disk",
    })))
}

/// Handle `POST /mine/start`
fn handle_mine_start(context: &HandlerContext) -> Result<RestResponse, RestError> {
    context.ledger.start_mining();
    Ok(RestResponse::ok(&json!({ "status": "Mining started" })))
}

/// Handle `POST /mine/stop`
fn handle_mine_stop(context: &HandlerContext) -> Result<RestResponse, RestError> {
    context.ledger.stop_mining();
    Ok(RestResponse::ok(&json!({ "status": "Mining stopped" })))
}
