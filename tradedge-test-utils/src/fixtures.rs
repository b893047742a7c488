//! Builders for raw trade rows as emitted by the research gateway.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Map, Value};

/// Builds a raw trade row using the gateway's snake_case field names.
#[derive(Clone, Debug)]
pub struct TradeRowBuilder {
    fields: Map<String, Value>,
}

impl TradeRowBuilder {
    pub fn new(trade_id: impl Into<Value>, symbol: &str) -> Self {
        let mut fields = Map::new();
        fields.insert("trade_id".into(), trade_id.into());
        fields.insert("stock_symbol".into(), json!(symbol));
        fields.insert("trade_type".into(), json!("buy"));
        fields.insert("entry_price".into(), json!("100.00"));
        fields.insert("target_price".into(), json!("110.00"));
        fields.insert("stop_loss".into(), json!("95.00"));
        Self { fields }
    }

    #[must_use]
    pub fn created_at(mut self, at: DateTime<Utc>) -> Self {
        self.fields.insert(
            "created_at".into(),
            json!(at.to_rfc3339_opts(SecondsFormat::Secs, true)),
        );
        self
    }

    #[must_use]
    pub fn direction(mut self, label: &str) -> Self {
        self.fields.insert("trade_type".into(), json!(label));
        self
    }

    #[must_use]
    pub fn package(mut self, subtype_id: &str) -> Self {
        self.fields.insert("subtype_id".into(), json!(subtype_id));
        self
    }

    #[must_use]
    pub fn field(mut self, key: &str, value: Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    #[must_use]
    pub fn build(self) -> Value {
        Value::Object(self.fields)
    }
}
