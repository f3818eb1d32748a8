//! Inventory-side fulfilment: advances a sale through pick, pack and ship.
//!
//! Each step's request is built from the previous step's response. A sale
//! that is already picked resumes from the pick recorded on its first
//! fulfilment.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::info;

use crate::error::FulfilmentError;
use crate::inventory::{InventoryApi, SaleSnapshot};

/// Carrier written on every shipment line.
pub const CARRIER: &str = " Canada Post Standard US";

/// Box every picked line is packed into.
const BOX: &str = "1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Ordered,
    Picked,
    Packed,
}

impl Stage {
    fn parse(sale_id: &str, status: &str) -> Result<Self, FulfilmentError> {
        match status.trim().to_ascii_uppercase().as_str() {
            "ORDERED" => Ok(Stage::Ordered),
            "PICKED" => Ok(Stage::Picked),
            "PACKED" => Ok(Stage::Packed),
            _ => Err(FulfilmentError::UnexpectedStatus {
                sale_id: sale_id.to_string(),
                status: status.to_string(),
            }),
        }
    }
}

/// Responses of the steps that ran, without their task IDs.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FulfilmentRecord {
    pub pick: Option<Value>,
    pub pack: Option<Value>,
    pub ship: Option<Value>,
}

fn without_task_id(mut response: Value) -> Value {
    if let Some(object) = response.as_object_mut() {
        object.remove("TaskID");
    }
    response
}

pub fn pick_request(sale_id: &str) -> Value {
    json!({
        "TaskID": sale_id,
        "AutoPickMode": "AUTOPICK",
    })
}

/// The pick, with every line assigned to box 1.
pub fn pack_request(sale_id: &str, pick: &Value) -> Value {
    let mut body = pick.clone();
    if let Some(lines) = body.get_mut("Lines").and_then(Value::as_array_mut) {
        for line in lines.iter_mut().filter_map(Value::as_object_mut) {
            line.insert("Box".into(), json!(BOX));
        }
    }
    if let Some(object) = body.as_object_mut() {
        object.insert("TaskID".into(), json!(sale_id));
    }
    body
}

pub fn ship_request(sale: &SaleSnapshot, shipment_date: DateTime<Utc>) -> Value {
    json!({
        "TaskID": sale.id,
        "Status": "AUTHORISED",
        "ShippingAddress": sale.shipping_address,
        "RequireBy": null,
        "Lines": [{
            "ShipmentDate": shipment_date.format("%Y-%m-%d").to_string(),
            "Carrier": CARRIER,
            "Box": BOX,
            "TrackingNumber": "",
            "TrackingURL": "",
            "IsShipped": true,
        }],
    })
}

/// Drive a sale from its current fulfilment status to shipped.
pub async fn authorize_fulfilment<A: InventoryApi>(
    api: &A,
    sale: &SaleSnapshot,
    now: DateTime<Utc>,
) -> Result<FulfilmentRecord, FulfilmentError> {
    let mut stage = Stage::parse(&sale.id, &sale.status)?;
    let mut record = FulfilmentRecord::default();
    let mut pick = sale.recorded_pick().cloned();

    loop {
        match stage {
            Stage::Ordered => {
                let picked = without_task_id(api.pick(&pick_request(&sale.id)).await?);
                info!(sale_id = %sale.id, "sale picked");
                pick = Some(picked.clone());
                record.pick = Some(picked);
                stage = Stage::Picked;
            }
            Stage::Picked => {
                let recorded = pick
                    .as_ref()
                    .ok_or_else(|| FulfilmentError::MissingPick(sale.id.clone()))?;
                let packed = api.pack(&pack_request(&sale.id, recorded)).await?;
                info!(sale_id = %sale.id, "sale packed");
                record.pack = Some(without_task_id(packed));
                stage = Stage::Packed;
            }
            Stage::Packed => {
                let shipped = api.ship(&ship_request(sale, now)).await?;
                info!(sale_id = %sale.id, "sale shipped");
                record.ship = Some(without_task_id(shipped));
                return Ok(record);
            }
        }
    }
}
