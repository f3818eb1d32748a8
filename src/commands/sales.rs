use chrono::Utc;
use serde_json::{json, Value};
use tracing::info;

use super::{require_sale_id, sale_view, value_bool, value_str};
use crate::inventory::InventoryApi;
use crate::reconcile::{ReloadOutcome, RESET_WARNING};
use crate::session::Session;
use crate::sheets::SheetsApi;

type Cmd = Result<Value, String>;

fn to_json<T: serde::Serialize>(value: &T) -> Cmd {
    serde_json::to_value(value).map_err(|e| e.to_string())
}

pub async fn sales_sync<S: SheetsApi, I: InventoryApi>(session: &Session<S, I>) -> Cmd {
    let report = session.sync().await.map_err(|e| e.to_string())?;
    to_json(&report)
}

/// Reload from scratch. Without `confirm: true` nothing happens and the
/// warning to show is returned.
pub async fn sales_reload<S: SheetsApi, I: InventoryApi>(
    session: &Session<S, I>,
    arg0: Option<Value>,
) -> Cmd {
    let confirmed = arg0
        .as_ref()
        .and_then(|payload| value_bool(payload, &["confirm", "confirmed"]))
        .unwrap_or(false);

    let outcome = session
        .reload(|_: &str| confirmed)
        .await
        .map_err(|e| e.to_string())?;

    match outcome {
        ReloadOutcome::Declined => Ok(json!({
            "status": "declined",
            "warning": RESET_WARNING,
        })),
        reloaded => to_json(&reloaded),
    }
}

/// Both work queues plus the progress header.
pub fn sales_pending<S: SheetsApi, I: InventoryApi>(session: &Session<S, I>) -> Cmd {
    let pending = session.pending().map_err(|e| e.to_string())?;
    let progress = session.progress().map_err(|e| e.to_string())?;
    Ok(json!({
        "toEnter": pending.to_enter.iter().map(sale_view).collect::<Vec<_>>(),
        "toAuthorize": pending.to_authorize.iter().map(sale_view).collect::<Vec<_>>(),
        "progress": progress,
    }))
}

pub async fn sale_enter<S: SheetsApi, I: InventoryApi>(
    session: &Session<S, I>,
    arg0: Option<Value>,
) -> Cmd {
    let sale_id = require_sale_id(arg0.as_ref())?;
    let weekday = arg0
        .as_ref()
        .and_then(|payload| value_str(payload, &["weekday", "day", "entryDay"]))
        .ok_or("Missing required field: weekday")?;

    let outcome = session
        .enter_order(&sale_id, &weekday)
        .await
        .map_err(|e| e.to_string())?;
    info!(sale_id = %sale_id, weekday = %weekday, "sale entered from UI");
    to_json(&outcome)
}

pub async fn sale_unenter<S: SheetsApi, I: InventoryApi>(
    session: &Session<S, I>,
    arg0: Option<Value>,
) -> Cmd {
    let sale_id = require_sale_id(arg0.as_ref())?;
    let outcome = session
        .unenter_order(&sale_id)
        .await
        .map_err(|e| e.to_string())?;
    Ok(json!({
        "saleId": sale_id,
        "removed": outcome.is_some(),
        "outcome": outcome,
    }))
}

pub fn sale_mark_authorized<S: SheetsApi, I: InventoryApi>(
    session: &Session<S, I>,
    arg0: Option<Value>,
) -> Cmd {
    let sale_id = require_sale_id(arg0.as_ref())?;
    let sale = session
        .mark_authorized(&sale_id, Utc::now())
        .map_err(|e| e.to_string())?;
    Ok(sale_view(&sale))
}

pub fn sales_authorize_entered<S: SheetsApi, I: InventoryApi>(session: &Session<S, I>) -> Cmd {
    let ids = session
        .authorize_entered(Utc::now())
        .map_err(|e| e.to_string())?;
    Ok(json!({ "authorized": ids }))
}

pub async fn sale_fulfil<S: SheetsApi, I: InventoryApi>(
    session: &Session<S, I>,
    arg0: Option<Value>,
) -> Cmd {
    let sale_id = require_sale_id(arg0.as_ref())?;
    let record = session
        .fulfil_sale(&sale_id, Utc::now())
        .await
        .map_err(|e| e.to_string())?;
    to_json(&record)
}

/// Weekdays and categories the open spreadsheet supports.
pub fn layout_info<S: SheetsApi, I: InventoryApi>(session: &Session<S, I>) -> Cmd {
    let layout = session.layout();
    Ok(json!({
        "spreadsheetId": session.spreadsheet_id(),
        "variant": layout.variant,
        "weekdays": layout.weekdays(),
        "categories": layout
            .categories()
            .map(|(product_type, config)| json!({
                "type": product_type.as_str(),
                "rows": [config.start(), config.end()],
                "products": config.columns.len(),
            }))
            .collect::<Vec<_>>(),
        "maxColumn": layout.max_column,
    }))
}
