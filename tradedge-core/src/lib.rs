//! Fundamental data types shared across the entire workspace.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Offset, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Alias for price precision.
pub type Price = Decimal;
/// Alias used for exchange tickers (e.g., `RELIANCE`).
pub type Symbol = String;
/// Stable identifier of a trade alert.
pub type TradeId = String;
/// Identifier of a purchasable package subtype (e.g., "Stock Option Basic").
pub type SubtypeId = String;

/// Recommended action carried by a trade alert.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Buy,
    Sell,
}

impl Direction {
    /// Map the free-text vocabularies used by the research desk onto a direction.
    #[must_use]
    pub fn from_label(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "buy" | "b" | "long" | "bullish" | "bull" | "accumulate" => Some(Self::Buy),
            "sell" | "s" | "short" | "bearish" | "bear" | "exit" => Some(Self::Sell),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::from_label(value).ok_or_else(|| format!("unrecognized trade direction '{value}'"))
    }
}

/// Coarse risk bucket advertised with each alert.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    #[default]
    Medium,
    High,
}

impl RiskLevel {
    /// Derive a risk bucket from labels such as "Low Risk" or "high".
    ///
    /// Unknown labels fall back to [`RiskLevel::Medium`].
    #[must_use]
    pub fn from_label(value: &str) -> Self {
        let lowered = value.trim().to_ascii_lowercase();
        if lowered.contains("low") {
            Self::Low
        } else if lowered.contains("high") {
            Self::High
        } else {
            Self::Medium
        }
    }
}

/// Path a trade took into the pipeline.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeOrigin {
    Bulk,
    Live,
}

/// Canonical trade alert produced by the normalizer.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Trade {
    pub id: TradeId,
    pub symbol: Symbol,
    pub name: String,
    pub direction: Direction,
    pub entry_price: Price,
    pub target_price: Price,
    pub stop_loss: Price,
    pub timeframe: String,
    pub analysis: String,
    pub risk_level: RiskLevel,
    pub confidence: Decimal,
    pub potential_profit_pct: Decimal,
    pub potential_loss_pct: Decimal,
    pub recommended_investment: Decimal,
    pub support_number: Option<String>,
    pub created_at: DateTime<Utc>,
    pub entitlement_tags: BTreeSet<SubtypeId>,
    pub origin: TradeOrigin,
}

impl Trade {
    /// Calendar day on which the trade was created, as seen from `offset`.
    #[must_use]
    pub fn local_date(&self, offset: FixedOffset) -> NaiveDate {
        self.created_at.with_timezone(&offset).date_naive()
    }

    /// True when the trade was created on the same local day as `now`.
    #[must_use]
    pub fn is_same_day(&self, now: DateTime<Utc>, offset: FixedOffset) -> bool {
        self.local_date(offset) == local_day(now, offset)
    }

    #[must_use]
    pub fn is_untagged(&self) -> bool {
        self.entitlement_tags.is_empty()
    }

    /// Short human-readable summary used by notifications and logs.
    #[must_use]
    pub fn headline(&self) -> String {
        format!(
            "{} {} @ {} (target {}, stop {})",
            self.direction, self.symbol, self.entry_price, self.target_price, self.stop_loss
        )
    }
}

/// Local calendar day of `now` under `offset`.
#[must_use]
pub fn local_day(now: DateTime<Utc>, offset: FixedOffset) -> NaiveDate {
    now.with_timezone(&offset).date_naive()
}

/// Offset `minutes` east of UTC. Out-of-range values fall back to UTC.
#[must_use]
pub fn offset_from_minutes(minutes: i32) -> FixedOffset {
    minutes
        .checked_mul(60)
        .and_then(FixedOffset::east_opt)
        .unwrap_or_else(|| Utc.fix())
}

/// Purchased packages of the signed-in user along with their expiry.
///
/// Snapshots are immutable; refreshes build a new snapshot and swap it in whole.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct EntitlementSnapshot {
    pub purchased_subtype_ids: BTreeSet<SubtypeId>,
    /// Missing entries are treated as non-expiring.
    pub validity_by_package: HashMap<SubtypeId, DateTime<Utc>>,
    pub fetched_at: DateTime<Utc>,
}

impl EntitlementSnapshot {
    #[must_use]
    pub fn new(
        purchased_subtype_ids: impl IntoIterator<Item = SubtypeId>,
        validity_by_package: HashMap<SubtypeId, DateTime<Utc>>,
    ) -> Self {
        Self {
            purchased_subtype_ids: purchased_subtype_ids.into_iter().collect(),
            validity_by_package,
            fetched_at: Utc::now(),
        }
    }

    /// Snapshot for a user without any purchase (also used before the first fetch).
    #[must_use]
    pub fn empty() -> Self {
        Self::new(Vec::new(), HashMap::new())
    }

    /// Whether `subtype` is owned and has not expired at `now`.
    #[must_use]
    pub fn is_active(&self, subtype: &str, now: DateTime<Utc>) -> bool {
        if !self.purchased_subtype_ids.contains(subtype) {
            return false;
        }
        match self.validity_by_package.get(subtype) {
            Some(expiry) => *expiry > now,
            None => true,
        }
    }

    #[must_use]
    pub fn has_active_package(&self, now: DateTime<Utc>) -> bool {
        self.purchased_subtype_ids
            .iter()
            .any(|subtype| self.is_active(subtype, now))
    }

    pub fn active_subtypes(&self, now: DateTime<Utc>) -> impl Iterator<Item = &SubtypeId> {
        self.purchased_subtype_ids
            .iter()
            .filter(move |subtype| self.is_active(subtype, now))
    }
}

impl Default for EntitlementSnapshot {
    fn default() -> Self {
        Self::empty()
    }
}

/// Visibility rule for trades whose source omitted package scoping.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UntaggedTradePolicy {
    /// Visible to users holding at least one active package.
    #[default]
    AnyActivePackage,
    /// Never visible.
    Deny,
    /// Visible to every signed-in user, subscribed or not.
    Everyone,
}

/// Connectivity of the broadcast channel. Drives the UI indicator only.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl ConnectionState {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of the alert dispatcher.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatcherPhase {
    #[default]
    Init,
    LoadingBulk,
    Ready,
    Teardown,
}

/// Named event received on the broadcast channel.
#[derive(Clone, Debug, PartialEq)]
pub enum ChannelEvent {
    /// `new-trade`: a raw trade payload.
    NewTrade(Value),
    /// `new-notification`: free-form announcement for the user.
    Announcement(Value),
    /// `follow-up-due`: a follow-up reminder for a previously published trade.
    FollowUpDue(Value),
    /// `pending-count` / `all-pending-followups`: outstanding follow-up counters.
    PendingFollowUps(Value),
    /// Any other event on the channel; logged and ignored.
    Other { name: String, payload: Value },
}

impl ChannelEvent {
    /// Build an event from its wire name and decoded payload.
    #[must_use]
    pub fn from_wire(name: &str, payload: Value) -> Self {
        match name {
            "new-trade" => Self::NewTrade(payload),
            "new-notification" => Self::Announcement(payload),
            "follow-up-due" => Self::FollowUpDue(payload),
            "pending-count" | "all-pending-followups" => Self::PendingFollowUps(payload),
            other => Self::Other {
                name: other.to_string(),
                payload,
            },
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::NewTrade(_) => "new-trade",
            Self::Announcement(_) => "new-notification",
            Self::FollowUpDue(_) => "follow-up-due",
            Self::PendingFollowUps(_) => "pending-count",
            Self::Other { name, .. } => name,
        }
    }
}

/// Item emitted by a live channel: either a state transition or an inbound event.
#[derive(Clone, Debug, PartialEq)]
pub enum ChannelUpdate {
    State(ConnectionState),
    Event(ChannelEvent),
}

/// Credentials and contact details of the signed-in user.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct Session {
    pub user_id: String,
    pub access_token: String,
    #[serde(default)]
    pub phone_number: Option<String>,
}

impl Session {
    #[must_use]
    pub fn new(user_id: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            access_token: access_token.into(),
            phone_number: None,
        }
    }

    #[must_use]
    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone_number = Some(phone.into());
        self
    }

    /// Login ids are issued with an `LNUSR` prefix that the REST gateway does not accept.
    #[must_use]
    pub fn gateway_user_id(&self) -> &str {
        self.user_id.trim().trim_start_matches("LNUSR")
    }

    /// Ten-digit national number suitable for outbound messages, if one is known.
    #[must_use]
    pub fn phone_digits(&self) -> Option<String> {
        let raw = self.phone_number.as_deref()?;
        let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
        let national = match digits.len() {
            10 => digits,
            12 if digits.starts_with("91") => digits[2..].to_string(),
            11 if digits.starts_with('0') => digits[1..].to_string(),
            _ => return None,
        };
        Some(national)
    }
}

/// Read a decimal from a JSON number or numeric string.
#[must_use]
pub fn parse_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(number) => Decimal::from_str(&number.to_string())
            .or_else(|_| Decimal::from_scientific(&number.to_string()))
            .ok(),
        Value::String(text) => {
            let cleaned = text.trim().trim_end_matches('%').replace(',', "");
            Decimal::from_str(cleaned.trim()).ok()
        }
        _ => None,
    }
}

/// Read an identifier from a JSON string or integer. Blank strings yield `None`.
#[must_use]
pub fn parse_identifier(value: &Value) -> Option<String> {
    match value {
        Value::String(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

/// Parse the timestamp encodings emitted by the research gateway.
///
/// Accepts RFC 3339, naive `YYYY-MM-DD HH:MM:SS` / `YYYY-MM-DDTHH:MM:SS` (interpreted
/// in `source_offset`), bare dates (start of day in `source_offset`) and epoch
/// seconds or milliseconds.
#[must_use]
pub fn parse_timestamp(value: &Value, source_offset: FixedOffset) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(number) => number.as_i64().and_then(epoch_to_datetime),
        Value::String(text) => {
            let text = text.trim();
            if text.is_empty() {
                return None;
            }
            if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
                return Some(parsed.with_timezone(&Utc));
            }
            for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
                if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
                    return naive
                        .and_local_timezone(source_offset)
                        .single()
                        .map(|local| local.with_timezone(&Utc));
                }
            }
            if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
                return date
                    .and_hms_opt(0, 0, 0)?
                    .and_local_timezone(source_offset)
                    .single()
                    .map(|local| local.with_timezone(&Utc));
            }
            text.parse::<i64>().ok().and_then(epoch_to_datetime)
        }
        _ => None,
    }
}

/// Parse the end of a validity window.
///
/// Same encodings as [`parse_timestamp`], except that a bare date covers the
/// whole day: `2024-04-10` stays valid until 23:59:59.999 in `source_offset`.
#[must_use]
pub fn parse_validity_end(value: &Value, source_offset: FixedOffset) -> Option<DateTime<Utc>> {
    if let Some(text) = value.as_str() {
        if let Ok(date) = NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d") {
            return date
                .and_hms_milli_opt(23, 59, 59, 999)?
                .and_local_timezone(source_offset)
                .single()
                .map(|local| local.with_timezone(&Utc));
        }
    }
    parse_timestamp(value, source_offset)
}

fn epoch_to_datetime(raw: i64) -> Option<DateTime<Utc>> {
    // Anything past year 5138 in seconds is treated as milliseconds.
    if raw.abs() >= 100_000_000_000 {
        Utc.timestamp_millis_opt(raw).single()
    } else {
        Utc.timestamp_opt(raw, 0).single()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn ist() -> FixedOffset {
        offset_from_minutes(330)
    }

    #[test]
    fn offsets_clamp_to_utc() {
        assert_eq!(offset_from_minutes(330).local_minus_utc(), 19_800);
        assert_eq!(offset_from_minutes(-300).local_minus_utc(), -18_000);
        assert_eq!(offset_from_minutes(100_000).local_minus_utc(), 0);
    }

    #[test]
    fn direction_accepts_desk_vocabulary() {
        assert_eq!(Direction::from_label("buy"), Some(Direction::Buy));
        assert_eq!(Direction::from_label(" BUY "), Some(Direction::Buy));
        assert_eq!(Direction::from_label("Bullish"), Some(Direction::Buy));
        assert_eq!(Direction::from_label("short"), Some(Direction::Sell));
        assert_eq!(Direction::from_label("bearish"), Some(Direction::Sell));
        assert_eq!(Direction::from_label("hold"), None);
    }

    #[test]
    fn risk_level_defaults_to_medium() {
        assert_eq!(RiskLevel::from_label("Low Risk"), RiskLevel::Low);
        assert_eq!(RiskLevel::from_label("HIGH"), RiskLevel::High);
        assert_eq!(RiskLevel::from_label("moderate"), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_label(""), RiskLevel::Medium);
    }

    #[test]
    fn snapshot_respects_expiry() {
        let now = Utc::now();
        let mut validity = HashMap::new();
        validity.insert("3".to_string(), now + Duration::days(1));
        validity.insert("4".to_string(), now - Duration::seconds(1));
        let snapshot =
            EntitlementSnapshot::new(["3".to_string(), "4".to_string(), "5".to_string()], validity);
        assert!(snapshot.is_active("3", now));
        assert!(!snapshot.is_active("4", now));
        assert!(snapshot.is_active("5", now));
        assert!(!snapshot.is_active("9", now));
        assert_eq!(snapshot.active_subtypes(now).count(), 2);
    }

    #[test]
    fn expiry_equal_to_now_is_expired() {
        let now = Utc::now();
        let mut validity = HashMap::new();
        validity.insert("3".to_string(), now);
        let snapshot = EntitlementSnapshot::new(["3".to_string()], validity);
        assert!(!snapshot.has_active_package(now));
    }

    #[test]
    fn same_day_uses_viewer_offset() {
        // 20:00 UTC is already the next morning in IST.
        let created = Utc.with_ymd_and_hms(2024, 3, 10, 20, 0, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 3, 11, 4, 0, 0).unwrap();
        let trade = sample_trade(created);
        assert!(trade.is_same_day(now, ist()));
        assert!(!trade.is_same_day(now, FixedOffset::east_opt(0).unwrap()));
    }

    #[test]
    fn channel_events_map_wire_names() {
        let payload = serde_json::json!({"count": 2});
        assert!(matches!(
            ChannelEvent::from_wire("all-pending-followups", payload.clone()),
            ChannelEvent::PendingFollowUps(_)
        ));
        assert!(matches!(
            ChannelEvent::from_wire("pending-count", payload.clone()),
            ChannelEvent::PendingFollowUps(_)
        ));
        let other = ChannelEvent::from_wire("price-tick", payload);
        assert_eq!(other.name(), "price-tick");
    }

    #[test]
    fn phone_digits_strip_country_code() {
        let session = Session::new("LNUSR42", "token").with_phone("+91 98765 43210");
        assert_eq!(session.phone_digits().as_deref(), Some("9876543210"));
        assert_eq!(session.gateway_user_id(), "42");
        let bad = Session::new("42", "token").with_phone("12345");
        assert_eq!(bad.phone_digits(), None);
        assert_eq!(Session::new("42", "token").phone_digits(), None);
    }

    #[test]
    fn decimals_accept_numbers_and_strings() {
        assert_eq!(parse_decimal(&serde_json::json!(1520.5)), Some(Decimal::new(15205, 1)));
        assert_eq!(parse_decimal(&serde_json::json!("1,520")), Some(Decimal::new(1520, 0)));
        assert_eq!(parse_decimal(&serde_json::json!("5%")), Some(Decimal::new(5, 0)));
        assert_eq!(parse_decimal(&serde_json::json!("n/a")), None);
        assert_eq!(parse_decimal(&Value::Null), None);
    }

    #[test]
    fn timestamps_cover_gateway_encodings() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 11, 4, 0, 0).unwrap();
        let rfc = serde_json::json!("2024-03-11T04:00:00Z");
        assert_eq!(parse_timestamp(&rfc, ist()), Some(expected));
        let naive = serde_json::json!("2024-03-11 09:30:00");
        assert_eq!(parse_timestamp(&naive, ist()), Some(expected));
        let millis = serde_json::json!(expected.timestamp_millis());
        assert_eq!(parse_timestamp(&millis, ist()), Some(expected));
        let secs = serde_json::json!(expected.timestamp().to_string());
        assert_eq!(parse_timestamp(&secs, ist()), Some(expected));
        assert_eq!(parse_timestamp(&serde_json::json!("yesterday"), ist()), None);
    }

    #[test]
    fn bare_validity_dates_cover_the_whole_day() {
        let end = parse_validity_end(&serde_json::json!("2024-04-10"), ist()).unwrap();
        let last_minute = Utc.with_ymd_and_hms(2024, 4, 10, 18, 29, 0).unwrap();
        assert!(end > last_minute);
        assert!(end < Utc.with_ymd_and_hms(2024, 4, 10, 18, 30, 0).unwrap());
        let exact = serde_json::json!("2024-04-10T12:00:00Z");
        assert_eq!(parse_validity_end(&exact, ist()), parse_timestamp(&exact, ist()));
    }

    #[test]
    fn identifiers_accept_numbers() {
        assert_eq!(parse_identifier(&serde_json::json!(17)).as_deref(), Some("17"));
        assert_eq!(parse_identifier(&serde_json::json!(" 17 ")).as_deref(), Some("17"));
        assert_eq!(parse_identifier(&serde_json::json!("")), None);
    }

    fn sample_trade(created_at: DateTime<Utc>) -> Trade {
        Trade {
            id: "t-1".into(),
            symbol: "INFY".into(),
            name: "INFY".into(),
            direction: Direction::Buy,
            entry_price: Decimal::new(1500, 0),
            target_price: Decimal::new(1600, 0),
            stop_loss: Decimal::new(1450, 0),
            timeframe: "1 Week".into(),
            analysis: String::new(),
            risk_level: RiskLevel::Medium,
            confidence: Decimal::new(70, 0),
            potential_profit_pct: Decimal::new(5, 0),
            potential_loss_pct: Decimal::new(2, 0),
            recommended_investment: Decimal::new(50_000, 0),
            support_number: None,
            created_at,
            entitlement_tags: BTreeSet::new(),
            origin: TradeOrigin::Bulk,
        }
    }
}
