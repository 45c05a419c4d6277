use std::{fmt, str::FromStr};

use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{Datatype, EntityId};

/// Unit marker Wikibase uses for dimensionless quantities.
pub const UNITLESS: &str = "1";

const PRECISION_DAY: u8 = 11;
const PRECISION_YEAR: u8 = 9;
const DEFAULT_COORDINATE_PRECISION: f64 = 0.000_001;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("cannot read '{raw}' as {datatype}: {reason}")]
pub struct ValueError {
    pub datatype: Datatype,
    pub raw: String,
    pub reason: String,
}

impl ValueError {
    pub fn new(datatype: Datatype, raw: &str, reason: impl Into<String>) -> Self {
        Self {
            datatype,
            raw: raw.to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "kebab-case")]
pub enum Value {
    Item(EntityId),
    String(String),
    Url(String),
    ExternalId(String),
    Quantity {
        amount: Decimal,
        unit: String,
    },
    Time {
        time: String,
        precision: u8,
    },
    GlobeCoordinate {
        latitude: f64,
        longitude: f64,
        precision: f64,
    },
    /// Remote values this crate never writes (monolingual text, somevalue, ...).
    /// Kept opaque so merges can still address the statement by id.
    Unsupported(String),
}

impl Value {
    /// Parses rendered text for every datatype except item references, which
    /// need a label lookup and are resolved by the caller.
    pub fn parse(
        raw: &str,
        datatype: Datatype,
        decimal_separator: char,
    ) -> Result<Value, ValueError> {
        let text = raw.trim();
        match datatype {
            Datatype::WikibaseItem => EntityId::parse_item(text)
                .map(Value::Item)
                .ok_or_else(|| ValueError::new(datatype, raw, "expected an item id like Q42")),
            Datatype::String => Ok(Value::String(text.to_string())),
            Datatype::Url => Ok(Value::Url(text.to_string())),
            Datatype::ExternalId => Ok(Value::ExternalId(text.to_string())),
            Datatype::Quantity => parse_decimal(text, decimal_separator)
                .map(|amount| Value::Quantity {
                    amount,
                    unit: UNITLESS.to_string(),
                })
                .ok_or_else(|| ValueError::new(datatype, raw, "not a number")),
            Datatype::Time => parse_time(text)
                .map(|(time, precision)| Value::Time { time, precision })
                .ok_or_else(|| {
                    ValueError::new(datatype, raw, "expected YYYY-MM-DD, DD/MM/YYYY or YYYY")
                }),
            Datatype::GlobeCoordinate => parse_coordinate(text, decimal_separator)
                .map(|(latitude, longitude)| Value::GlobeCoordinate {
                    latitude,
                    longitude,
                    precision: DEFAULT_COORDINATE_PRECISION,
                })
                .ok_or_else(|| ValueError::new(datatype, raw, "expected 'latitude,longitude'")),
        }
    }

    pub fn as_item(&self) -> Option<&EntityId> {
        match self {
            Value::Item(id) => Some(id),
            _ => None,
        }
    }

    /// Canonical text used for identity lookups and cache keys; quantities
    /// are normalized so `12.0` and `12` address the same item.
    pub fn identity_key(&self) -> String {
        match self {
            Value::Item(id) => id.to_string(),
            Value::String(s) | Value::Url(s) | Value::ExternalId(s) => s.trim().to_string(),
            Value::Quantity { amount, .. } => amount.normalize().to_string(),
            Value::Time { time, .. } => time.clone(),
            Value::GlobeCoordinate {
                latitude,
                longitude,
                ..
            } => format!("{latitude},{longitude}"),
            Value::Unsupported(raw) => raw.clone(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Quantity { amount, unit } if unit != UNITLESS => {
                write!(f, "{} {unit}", amount.normalize())
            }
            other => write!(f, "{}", other.identity_key()),
        }
    }
}

fn parse_decimal(text: &str, decimal_separator: char) -> Option<Decimal> {
    let thousands = if decimal_separator == ',' { '.' } else { ',' };
    let cleaned: String = text
        .trim_start_matches('+')
        .chars()
        .filter(|ch| *ch != thousands && !ch.is_whitespace())
        .map(|ch| if ch == decimal_separator { '.' } else { ch })
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    Decimal::from_str(&cleaned)
        .or_else(|_| Decimal::from_scientific(&cleaned))
        .ok()
}

fn parse_time(text: &str) -> Option<(String, u8)> {
    const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%d-%m-%Y", "%Y/%m/%d"];
    for fmt in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(text, fmt) {
            return Some((wikibase_time(date.year(), date.month(), date.day()), PRECISION_DAY));
        }
    }
    if text.len() == 4 {
        if let Ok(year) = text.parse::<i32>() {
            return Some((wikibase_time(year, 0, 0), PRECISION_YEAR));
        }
    }
    None
}

fn wikibase_time(year: i32, month: u32, day: u32) -> String {
    format!("+{year:04}-{month:02}-{day:02}T00:00:00Z")
}

fn parse_coordinate(text: &str, decimal_separator: char) -> Option<(f64, f64)> {
    let separator = if text.contains(';') {
        ';'
    } else if decimal_separator == '.' && text.contains(',') {
        ','
    } else {
        ' '
    };
    let mut parts = text.split(separator).map(str::trim).filter(|p| !p.is_empty());
    let latitude = parse_decimal(parts.next()?, decimal_separator)?;
    let longitude = parse_decimal(parts.next()?, decimal_separator)?;
    if parts.next().is_some() {
        return None;
    }
    let latitude = latitude.to_string().parse::<f64>().ok()?;
    let longitude = longitude.to_string().parse::<f64>().ok()?;
    if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
        return None;
    }
    Some((latitude, longitude))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantity_respects_decimal_separator() {
        let comma = Value::parse("1.234,50", Datatype::Quantity, ',').unwrap();
        let dot = Value::parse("1,234.5", Datatype::Quantity, '.').unwrap();
        assert_eq!(comma, dot);
        assert_eq!(comma.identity_key(), "1234.5");
        assert!(Value::parse("abc", Datatype::Quantity, '.').is_err());
    }

    #[test]
    fn quantity_identity_key_drops_trailing_zeros() {
        let value = Value::parse("+12.00", Datatype::Quantity, '.').unwrap();
        assert_eq!(value.identity_key(), "12");
    }

    #[test]
    fn time_supports_day_and_year_precision() {
        let day = Value::parse("05/03/2021", Datatype::Time, '.').unwrap();
        assert_eq!(
            day,
            Value::Time {
                time: "+2021-03-05T00:00:00Z".to_string(),
                precision: PRECISION_DAY
            }
        );
        let year = Value::parse("1998", Datatype::Time, '.').unwrap();
        assert_eq!(
            year,
            Value::Time {
                time: "+1998-00-00T00:00:00Z".to_string(),
                precision: PRECISION_YEAR
            }
        );
        assert!(Value::parse("next tuesday", Datatype::Time, '.').is_err());
    }

    #[test]
    fn coordinates_accept_comma_or_semicolon() {
        let dot = Value::parse("-35.42, -71.65", Datatype::GlobeCoordinate, '.').unwrap();
        let comma = Value::parse("-35,42;-71,65", Datatype::GlobeCoordinate, ',').unwrap();
        assert_eq!(dot, comma);
        assert!(Value::parse("120,10", Datatype::GlobeCoordinate, '.').is_err());
    }

    #[test]
    fn item_values_require_an_item_id() {
        let value = Value::parse("Q42", Datatype::WikibaseItem, '.').unwrap();
        assert_eq!(value.as_item().map(EntityId::as_str), Some("Q42"));
        assert!(Value::parse("Talca", Datatype::WikibaseItem, '.').is_err());
    }
}
