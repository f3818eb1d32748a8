//! JSON facade for UI event handlers.
//!
//! Every command takes an optional JSON payload and returns
//! `Result<Value, String>`, with errors already rendered for display.

pub mod diagnostics;
pub mod sales;
pub mod settings;

use serde_json::{json, Value};

use crate::inventory::{Product, Sale};

// ---------------------------------------------------------------------------
// Payload helpers
// ---------------------------------------------------------------------------

/// First non-blank string among `keys`.
pub(crate) fn value_str(v: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| v.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

/// Booleans, `0`/`1` and the usual string spellings.
pub(crate) fn value_bool(v: &Value, keys: &[&str]) -> Option<bool> {
    keys.iter().filter_map(|key| v.get(*key)).find_map(|node| {
        if let Some(flag) = node.as_bool() {
            return Some(flag);
        }
        if let Some(n) = node.as_i64() {
            return Some(n == 1);
        }
        match node.as_str()?.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Some(true),
            "false" | "0" | "no" | "off" => Some(false),
            _ => None,
        }
    })
}

/// The payload itself when it is a bare string, else the first of `keys`.
pub(crate) fn payload_arg0_as_string(arg0: Option<&Value>, keys: &[&str]) -> Option<String> {
    match arg0? {
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        payload @ Value::Object(_) => value_str(payload, keys),
        _ => None,
    }
}

pub(crate) fn require_sale_id(arg0: Option<&Value>) -> Result<String, String> {
    payload_arg0_as_string(arg0, &["saleId", "sale_id", "id"])
        .ok_or_else(|| "Missing required field: saleId".to_string())
}

// ---------------------------------------------------------------------------
// Views
// ---------------------------------------------------------------------------

fn product_view(product: &Product) -> Value {
    json!({
        "id": product.product_id,
        "sku": product.sku,
        "name": product.name,
        "quantity": product.quantity,
        "url": product.url(),
    })
}

/// What a sale card shows.
pub(crate) fn sale_view(sale: &Sale) -> Value {
    let snapshot = &sale.snapshot;
    json!({
        "id": snapshot.id,
        "customer": snapshot.customer_name(),
        "isRetail": snapshot.is_retail(),
        "invoiceNumber": snapshot.invoice_number(),
        "orderDate": snapshot.order_date().map(|d| d.to_rfc3339()),
        "orderDateLabel": snapshot.order_date_label(),
        "notes": snapshot.notes(),
        "url": snapshot.url(),
        "state": sale.workflow_state().to_string(),
        "entered": sale.workflow.entry_day,
        "authorizedAt": sale.workflow.authorized_at.map(|d| d.to_rfc3339()),
        "items": snapshot.items().iter().map(product_view).collect::<Vec<_>>(),
        "enteredItems": sale.entered_items().into_iter().map(product_view).collect::<Vec<_>>(),
        "unenteredItems": sale.unentered_items().iter().map(product_view).collect::<Vec<_>>(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{product, sale_snapshot};

    #[test]
    fn test_value_str_skips_blank_values() {
        let payload = json!({ "saleId": "  ", "sale_id": " s-1 " });
        assert_eq!(value_str(&payload, &["saleId", "sale_id"]).as_deref(), Some("s-1"));
        assert_eq!(value_str(&payload, &["id"]), None);
    }

    #[test]
    fn test_value_bool_spellings() {
        assert_eq!(value_bool(&json!({ "confirm": true }), &["confirm"]), Some(true));
        assert_eq!(value_bool(&json!({ "confirm": 0 }), &["confirm"]), Some(false));
        assert_eq!(value_bool(&json!({ "confirm": "Yes" }), &["confirm"]), Some(true));
        assert_eq!(value_bool(&json!({ "confirm": "maybe" }), &["confirm"]), None);
    }

    #[test]
    fn test_sale_id_from_string_or_object() {
        assert_eq!(require_sale_id(Some(&json!("s-1"))).unwrap(), "s-1");
        assert_eq!(require_sale_id(Some(&json!({ "saleId": "s-2" }))).unwrap(), "s-2");
        assert!(require_sale_id(None).is_err());
        assert!(require_sale_id(Some(&json!(42))).is_err());
    }

    #[test]
    fn test_sale_view_splits_entered_items() {
        let mut sale = Sale::new(sale_snapshot("s-1", "Acme", "1001", &[("A", 1), ("B", 2)]));
        sale.workflow.entry_day = Some("Monday".into());
        sale.workflow.skipped = Some(vec![product("B", 2)]);

        let view = sale_view(&sale);
        assert_eq!(view["invoiceNumber"], "1001");
        assert_eq!(view["orderDateLabel"], "3/7");
        assert_eq!(view["entered"], "Monday");
        assert_eq!(view["enteredItems"].as_array().unwrap().len(), 1);
        assert_eq!(view["unenteredItems"][0]["sku"], "B");
    }
}
