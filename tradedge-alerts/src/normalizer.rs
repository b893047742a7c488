//! Conversion of heterogeneous trade payloads into canonical [`Trade`] records.

use std::collections::BTreeSet;

use chrono::{DateTime, FixedOffset, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;
use tradedge_core::{
    offset_from_minutes, parse_decimal, parse_identifier, parse_timestamp, Direction, Price,
    RiskLevel, SubtypeId, Trade, TradeOrigin,
};

const ID_KEYS: &[&str] = &["trade_id", "tradeId", "id"];
const SYMBOL_KEYS: &[&str] = &["stock_symbol", "stockSymbol", "symbol"];
const NAME_KEYS: &[&str] = &["stock_name", "stockName"];
const DIRECTION_KEYS: &[&str] = &["trade_type", "type", "direction", "/prediction/type"];
const ENTRY_KEYS: &[&str] = &["entry_price", "entryPrice"];
const TARGET_KEYS: &[&str] = &["target_price", "targetPrice"];
const STOP_KEYS: &[&str] = &["stop_loss", "stopLoss"];
const TIMEFRAME_KEYS: &[&str] = &["time_frame", "timeFrame"];
const RISK_KEYS: &[&str] = &["risk_level", "riskLevel"];
const CREATED_KEYS: &[&str] = &["created_at", "createdAt", "timestamp"];
const ANALYSIS_KEYS: &[&str] = &["description", "analysis"];
const SUPPORT_KEYS: &[&str] = &["support_number", "supportNumber"];
const CONFIDENCE_KEYS: &[&str] = &["confidence"];
const PROFIT_KEYS: &[&str] = &["potential_profit", "potentialProfit"];
const LOSS_KEYS: &[&str] = &["potential_loss", "potentialLoss"];
const INVESTMENT_KEYS: &[&str] = &["recommended_investment", "recommendedInvestment"];
const TAG_KEYS: &[&str] = &["package_id", "subtype_id", "packageId", "subtypeId"];
const TAG_LIST_KEYS: &[&str] = &["package_ids", "subtype_ids", "packages"];

/// Helpline shown on alerts that carry no support number of their own.
pub const DEFAULT_SUPPORT_NUMBER: &str = "9876543210";

/// Values substituted for fields the source omitted.
#[derive(Clone, Debug)]
pub struct NormalizerDefaults {
    pub risk_level: RiskLevel,
    pub confidence: Decimal,
    pub potential_profit_pct: Decimal,
    pub potential_loss_pct: Decimal,
    pub recommended_investment: Decimal,
    pub timeframe: String,
    pub support_number: Option<String>,
}

impl Default for NormalizerDefaults {
    fn default() -> Self {
        Self {
            risk_level: RiskLevel::Medium,
            confidence: Decimal::from(70),
            potential_profit_pct: Decimal::from(5),
            potential_loss_pct: Decimal::from(2),
            recommended_investment: Decimal::from(50_000),
            timeframe: "1 Week".into(),
            support_number: Some(DEFAULT_SUPPORT_NUMBER.into()),
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("trade payload must be a JSON object, got {0}")]
    NotAnObject(&'static str),
    #[error("trade payload has no symbol")]
    MissingSymbol,
    #[error("trade {symbol} has no direction")]
    MissingDirection { symbol: String },
    #[error("trade {symbol} has unrecognized direction '{label}'")]
    UnknownDirection { symbol: String, label: String },
}

/// Stateless converter shared by the bulk and live paths.
#[derive(Clone, Debug)]
pub struct TradeNormalizer {
    defaults: NormalizerDefaults,
    source_offset: FixedOffset,
}

impl Default for TradeNormalizer {
    fn default() -> Self {
        Self::new(NormalizerDefaults::default(), offset_from_minutes(330))
    }
}

impl TradeNormalizer {
    /// `source_offset` is applied to naive timestamps found in payloads.
    pub fn new(defaults: NormalizerDefaults, source_offset: FixedOffset) -> Self {
        Self {
            defaults,
            source_offset,
        }
    }

    /// Build a canonical trade from `raw`.
    ///
    /// `received_at` stands in for a missing creation timestamp. Identifiers are
    /// derived deterministically so redelivered payloads collapse to the same id.
    pub fn normalize(
        &self,
        raw: &Value,
        origin: TradeOrigin,
        received_at: DateTime<Utc>,
    ) -> Result<Trade, NormalizeError> {
        let raw = unwrap_envelope(raw);
        if !raw.is_object() {
            return Err(NormalizeError::NotAnObject(json_kind(raw)));
        }

        let symbol = lookup(raw, SYMBOL_KEYS)
            .and_then(Value::as_str)
            .map(|symbol| symbol.trim().to_ascii_uppercase())
            .filter(|symbol| !symbol.is_empty())
            .ok_or(NormalizeError::MissingSymbol)?;
        let direction = match lookup(raw, DIRECTION_KEYS).and_then(Value::as_str) {
            Some(label) => Direction::from_label(label).ok_or_else(|| {
                NormalizeError::UnknownDirection {
                    symbol: symbol.clone(),
                    label: label.to_string(),
                }
            })?,
            None => return Err(NormalizeError::MissingDirection { symbol }),
        };

        let created = lookup(raw, CREATED_KEYS)
            .and_then(|value| parse_timestamp(value, self.source_offset));
        let id = match lookup(raw, ID_KEYS).and_then(parse_identifier) {
            Some(id) => id,
            None => derive_id(&symbol, created, raw),
        };

        let trade = Trade {
            id,
            name: text(raw, NAME_KEYS).unwrap_or_else(|| symbol.clone()),
            direction,
            entry_price: price(raw, ENTRY_KEYS),
            target_price: price(raw, TARGET_KEYS),
            stop_loss: price(raw, STOP_KEYS),
            timeframe: text(raw, TIMEFRAME_KEYS)
                .unwrap_or_else(|| self.defaults.timeframe.clone()),
            analysis: text(raw, ANALYSIS_KEYS).unwrap_or_default(),
            risk_level: text(raw, RISK_KEYS)
                .map(|label| RiskLevel::from_label(&label))
                .unwrap_or(self.defaults.risk_level),
            confidence: number(raw, CONFIDENCE_KEYS).unwrap_or(self.defaults.confidence),
            potential_profit_pct: number(raw, PROFIT_KEYS)
                .unwrap_or(self.defaults.potential_profit_pct),
            potential_loss_pct: number(raw, LOSS_KEYS).unwrap_or(self.defaults.potential_loss_pct),
            recommended_investment: number(raw, INVESTMENT_KEYS)
                .unwrap_or(self.defaults.recommended_investment),
            support_number: lookup(raw, SUPPORT_KEYS)
                .and_then(parse_identifier)
                .or_else(|| self.defaults.support_number.clone()),
            created_at: created.unwrap_or(received_at),
            entitlement_tags: entitlement_tags(raw),
            origin,
            symbol,
        };
        Ok(trade)
    }
}

/// Live events sometimes wrap the trade in `{"trade": {...}}`.
fn unwrap_envelope(raw: &Value) -> &Value {
    match raw.get("trade") {
        Some(inner) if inner.is_object() => inner,
        _ => raw,
    }
}

/// First non-null value among `keys`; keys starting with `/` are JSON pointers.
fn lookup<'a>(raw: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|key| {
            if key.starts_with('/') {
                raw.pointer(key)
            } else {
                raw.get(*key)
            }
        })
        .find(|value| !value.is_null())
}

fn text(raw: &Value, keys: &[&str]) -> Option<String> {
    lookup(raw, keys)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn number(raw: &Value, keys: &[&str]) -> Option<Decimal> {
    lookup(raw, keys).and_then(parse_decimal)
}

fn price(raw: &Value, keys: &[&str]) -> Price {
    match number(raw, keys) {
        Some(value) if value >= Decimal::ZERO => value,
        Some(value) => {
            debug!(field = keys[0], %value, "negative price clamped to zero");
            Decimal::ZERO
        }
        None => Decimal::ZERO,
    }
}

fn entitlement_tags(raw: &Value) -> BTreeSet<SubtypeId> {
    let mut tags: BTreeSet<SubtypeId> = TAG_KEYS
        .iter()
        .filter_map(|key| raw.get(*key))
        .filter_map(parse_identifier)
        .collect();
    for key in TAG_LIST_KEYS {
        if let Some(Value::Array(entries)) = raw.get(*key) {
            tags.extend(entries.iter().filter_map(|entry| {
                parse_identifier(entry).or_else(|| {
                    entry
                        .get("subtype_id")
                        .or_else(|| entry.get("id"))
                        .and_then(parse_identifier)
                })
            }));
        }
    }
    tags
}

fn derive_id(symbol: &str, created: Option<DateTime<Utc>>, raw: &Value) -> String {
    match created {
        Some(created) => format!("{symbol}-{}", created.timestamp_millis()),
        None => {
            // serde_json maps are ordered, so the rendering is canonical.
            let digest = Sha256::digest(raw.to_string().as_bytes());
            format!("{symbol}-{}", &hex::encode(digest)[..16])
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn received() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 11, 6, 0, 0).unwrap()
    }

    fn normalize(raw: Value) -> Result<Trade, NormalizeError> {
        TradeNormalizer::default().normalize(&raw, TradeOrigin::Bulk, received())
    }

    #[test]
    fn fills_documented_defaults() {
        let trade = normalize(json!({
            "trade_id": 41,
            "stock_symbol": "infy",
            "trade_type": "BUY",
            "entry_price": "1500.5",
            "target_price": 1600,
            "stop_loss": "1450",
            "created_at": "2024-03-11 09:30:00"
        }))
        .unwrap();
        assert_eq!(trade.id, "41");
        assert_eq!(trade.symbol, "INFY");
        assert_eq!(trade.name, "INFY");
        assert_eq!(trade.direction, Direction::Buy);
        assert_eq!(trade.entry_price, Decimal::new(15005, 1));
        assert_eq!(trade.risk_level, RiskLevel::Medium);
        assert_eq!(trade.confidence, Decimal::from(70));
        assert_eq!(trade.potential_profit_pct, Decimal::from(5));
        assert_eq!(trade.potential_loss_pct, Decimal::from(2));
        assert_eq!(trade.recommended_investment, Decimal::from(50_000));
        assert_eq!(trade.timeframe, "1 Week");
        assert_eq!(trade.support_number.as_deref(), Some(DEFAULT_SUPPORT_NUMBER));
        assert_eq!(trade.created_at, Utc.with_ymd_and_hms(2024, 3, 11, 4, 0, 0).unwrap());
        assert!(trade.entitlement_tags.is_empty());
    }

    #[test]
    fn accepts_camel_case_aliases() {
        let trade = normalize(json!({
            "tradeId": "abc",
            "stockSymbol": "TCS",
            "stockName": "Tata Consultancy",
            "prediction": {"type": "bearish"},
            "entryPrice": 3900,
            "targetPrice": 3700,
            "stopLoss": 4000,
            "timeFrame": "2 Weeks",
            "riskLevel": "High Risk",
            "createdAt": "2024-03-11T04:00:00Z",
            "analysis": "Breakdown below support",
            "supportNumber": 9876543210u64,
            "packages": [3, {"subtype_id": "7"}]
        }))
        .unwrap();
        assert_eq!(trade.id, "abc");
        assert_eq!(trade.name, "Tata Consultancy");
        assert_eq!(trade.direction, Direction::Sell);
        assert_eq!(trade.timeframe, "2 Weeks");
        assert_eq!(trade.risk_level, RiskLevel::High);
        assert_eq!(trade.analysis, "Breakdown below support");
        assert_eq!(trade.support_number.as_deref(), Some("9876543210"));
        let tags: Vec<_> = trade.entitlement_tags.iter().cloned().collect();
        assert_eq!(tags, vec!["3".to_string(), "7".to_string()]);
    }

    #[test]
    fn derives_id_from_symbol_and_timestamp() {
        let raw = json!({
            "stock_symbol": "SBIN",
            "trade_type": "long",
            "created_at": "2024-03-11T04:00:00Z"
        });
        let first = normalize(raw.clone()).unwrap();
        let again = TradeNormalizer::default()
            .normalize(&raw, TradeOrigin::Live, received() + chrono::Duration::minutes(5))
            .unwrap();
        assert_eq!(first.id, again.id);
        assert!(first.id.starts_with("SBIN-"));
    }

    #[test]
    fn missing_timestamp_uses_payload_digest_for_id() {
        let raw = json!({"stock_symbol": "SBIN", "trade_type": "buy", "entry_price": 600});
        let first = normalize(raw.clone()).unwrap();
        let later = TradeNormalizer::default()
            .normalize(&raw, TradeOrigin::Live, received() + chrono::Duration::hours(1))
            .unwrap();
        assert_eq!(first.id, later.id);
        assert_eq!(first.created_at, received());
        let other =
            normalize(json!({"stock_symbol": "SBIN", "trade_type": "buy", "entry_price": 601}))
                .unwrap();
        assert_ne!(first.id, other.id);
    }

    #[test]
    fn negative_or_invalid_prices_become_zero() {
        let trade = normalize(json!({
            "stock_symbol": "ITC",
            "trade_type": "sell",
            "entry_price": -4,
            "target_price": "n/a"
        }))
        .unwrap();
        assert_eq!(trade.entry_price, Decimal::ZERO);
        assert_eq!(trade.target_price, Decimal::ZERO);
        assert_eq!(trade.stop_loss, Decimal::ZERO);
    }

    #[test]
    fn rejects_payloads_without_symbol_or_direction() {
        assert_eq!(
            normalize(json!({"trade_type": "buy"})).unwrap_err(),
            NormalizeError::MissingSymbol
        );
        assert!(matches!(
            normalize(json!({"stock_symbol": "ITC"})).unwrap_err(),
            NormalizeError::MissingDirection { .. }
        ));
        assert!(matches!(
            normalize(json!({"stock_symbol": "ITC", "trade_type": "hold"})).unwrap_err(),
            NormalizeError::UnknownDirection { .. }
        ));
        assert!(matches!(
            normalize(json!(["INFY"])).unwrap_err(),
            NormalizeError::NotAnObject(_)
        ));
    }

    #[test]
    fn unwraps_trade_envelope_and_scalar_tags() {
        let trade = TradeNormalizer::default()
            .normalize(
                &json!({"trade": {"id": 9, "symbol": "WIPRO", "direction": "B", "subtype_id": 3}}),
                TradeOrigin::Live,
                received(),
            )
            .unwrap();
        assert_eq!(trade.id, "9");
        assert_eq!(trade.origin, TradeOrigin::Live);
        assert!(trade.entitlement_tags.contains("3"));
    }

    #[test]
    fn support_number_falls_back_to_configured_helpline() {
        let raw = json!({"trade_id": 5, "symbol": "ITC", "trade_type": "buy"});
        let own = normalize(json!({
            "trade_id": 6,
            "symbol": "ITC",
            "trade_type": "buy",
            "supportNumber": "1800123456"
        }))
        .unwrap();
        assert_eq!(own.support_number.as_deref(), Some("1800123456"));

        let custom = TradeNormalizer::new(
            NormalizerDefaults {
                support_number: Some("2222222222".into()),
                ..NormalizerDefaults::default()
            },
            offset_from_minutes(330),
        );
        let trade = custom.normalize(&raw, TradeOrigin::Live, received()).unwrap();
        assert_eq!(trade.support_number.as_deref(), Some("2222222222"));

        let silent = TradeNormalizer::new(
            NormalizerDefaults {
                support_number: None,
                ..NormalizerDefaults::default()
            },
            offset_from_minutes(330),
        );
        let trade = silent.normalize(&raw, TradeOrigin::Live, received()).unwrap();
        assert_eq!(trade.support_number, None);
    }
}
