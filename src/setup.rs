use crate::db;
use crate::ledger::{ReceiptStrategy, DEFAULT_RECEIPT_PREFIX};
use crate::schedule::{ConflictScan, DEFAULT_MAX_COURSE_MINUTES};
use rusqlite::Connection;
use serde_json::{json, Map, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SetupSection {
    Scheduling,
    Payments,
}

impl SetupSection {
    pub const ALL: [SetupSection; 2] = [SetupSection::Scheduling, SetupSection::Payments];

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "scheduling" => Some(Self::Scheduling),
            "payments" => Some(Self::Payments),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Scheduling => "scheduling",
            Self::Payments => "payments",
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Scheduling => "setup.scheduling",
            Self::Payments => "setup.payments",
        }
    }
}

pub fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Scheduling => json!({
            "maxCourseMinutes": DEFAULT_MAX_COURSE_MINUTES,
            "conflictScan": ConflictScan::default().as_str()
        }),
        SetupSection::Payments => json!({
            "receiptPrefix": DEFAULT_RECEIPT_PREFIX,
            "receiptStrategy": ReceiptStrategy::Sequence.as_str(),
            "currency": "FCFA"
        }),
    }
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_string_max(v: &Value, key: &str, max_len: usize) -> Result<String, String> {
    let s = v.as_str().ok_or_else(|| format!("{} must be string", key))?;
    let s = s.trim();
    if s.len() > max_len {
        return Err(format!("{} length must be <= {}", key, max_len));
    }
    Ok(s.to_string())
}

pub fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = current
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())?;
    for (k, v) in patch {
        match section {
            SetupSection::Scheduling => match k.as_str() {
                "maxCourseMinutes" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 15, 480)?));
                }
                "conflictScan" => {
                    let raw = parse_string_max(v, k, 16)?;
                    let Some(scan) = ConflictScan::parse(&raw) else {
                        return Err("conflictScan must be one of: all, firstMatch".into());
                    };
                    obj.insert(k.clone(), Value::String(scan.as_str().to_string()));
                }
                _ => return Err(format!("unknown scheduling field: {}", k)),
            },
            SetupSection::Payments => match k.as_str() {
                "receiptPrefix" => {
                    let s = parse_string_max(v, k, 8)?;
                    if s.is_empty() || !s.chars().all(|c| c.is_ascii_alphanumeric()) {
                        return Err("receiptPrefix must be 1-8 letters or digits".into());
                    }
                    obj.insert(k.clone(), Value::String(s.to_ascii_uppercase()));
                }
                "receiptStrategy" => {
                    let raw = parse_string_max(v, k, 16)?;
                    let Some(strategy) = ReceiptStrategy::parse(&raw) else {
                        return Err(
                            "receiptStrategy must be one of: sequence, uuid, timeRandom".into(),
                        );
                    };
                    obj.insert(k.clone(), Value::String(strategy.as_str().to_string()));
                }
                "currency" => {
                    let s = parse_string_max(v, k, 8)?;
                    if s.is_empty() {
                        return Err("currency must not be empty".into());
                    }
                    obj.insert(k.clone(), Value::String(s.to_ascii_uppercase()));
                }
                _ => return Err(format!("unknown payments field: {}", k)),
            },
        }
    }
    Ok(())
}

/// Defaults overlaid with whatever the workspace has saved. With no
/// workspace the defaults are returned as-is.
pub fn load_section(conn: Option<&Connection>, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    let Some(conn) = conn else {
        return Ok(current);
    };
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Malformed historical values fall back to defaults field by field.
            for (k, v) in saved_obj {
                let mut one = Map::new();
                one.insert(k.clone(), v.clone());
                let _ = merge_section_patch(section, &mut current, &one);
            }
        }
    }
    Ok(current)
}

pub fn save_section(conn: &Connection, section: SetupSection, value: &Value) -> anyhow::Result<()> {
    db::settings_set_json(conn, section.key(), value)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulingSettings {
    pub max_course_minutes: i64,
    pub conflict_scan: ConflictScan,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentSettings {
    pub receipt_prefix: String,
    pub receipt_strategy: ReceiptStrategy,
    pub currency: String,
}

pub fn scheduling_settings(conn: Option<&Connection>) -> anyhow::Result<SchedulingSettings> {
    let v = load_section(conn, SetupSection::Scheduling)?;
    Ok(SchedulingSettings {
        max_course_minutes: v
            .get("maxCourseMinutes")
            .and_then(|x| x.as_i64())
            .unwrap_or(DEFAULT_MAX_COURSE_MINUTES),
        conflict_scan: v
            .get("conflictScan")
            .and_then(|x| x.as_str())
            .and_then(ConflictScan::parse)
            .unwrap_or_default(),
    })
}

pub fn payment_settings(conn: Option<&Connection>) -> anyhow::Result<PaymentSettings> {
    let v = load_section(conn, SetupSection::Payments)?;
    Ok(PaymentSettings {
        receipt_prefix: v
            .get("receiptPrefix")
            .and_then(|x| x.as_str())
            .unwrap_or(DEFAULT_RECEIPT_PREFIX)
            .to_string(),
        receipt_strategy: v
            .get("receiptStrategy")
            .and_then(|x| x.as_str())
            .and_then(ReceiptStrategy::parse)
            .unwrap_or(ReceiptStrategy::Sequence),
        currency: v
            .get("currency")
            .and_then(|x| x.as_str())
            .unwrap_or("FCFA")
            .to_string(),
    })
}
