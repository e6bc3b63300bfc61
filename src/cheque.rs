use serde::{Deserialize, Serialize};
use std::fmt;

/// An opaque, serializable description of a chosen schedule.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cheque(pub serde_json::Value);

/// A measured tick count for a [Cheque]. Lower is better.
///
/// Integral and fractional ticks are kept apart so that bank files rewritten by
/// this crate keep the number formatting they were read with. Anything else
/// (`null`, `""`, ...) is carried verbatim as an unknown tick.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Tick {
    Int(i64),
    Float(f64),
    Other(serde_json::Value),
}

/// A stored bank value: the cheque and the tick it was measured at.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BankEntry(pub Cheque, pub Tick);

impl Cheque {
    pub fn empty() -> Self {
        Cheque(serde_json::Value::Array(vec![]))
    }

    pub fn is_empty(&self) -> bool {
        match &self.0 {
            serde_json::Value::Null => true,
            serde_json::Value::Array(a) => a.is_empty(),
            serde_json::Value::Object(o) => o.is_empty(),
            serde_json::Value::String(s) => s.is_empty(),
            serde_json::Value::Bool(_) | serde_json::Value::Number(_) => false,
        }
    }
}

impl From<serde_json::Value> for Cheque {
    fn from(value: serde_json::Value) -> Self {
        Cheque(value)
    }
}

impl fmt::Display for Cheque {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Tick {
    pub fn unknown() -> Self {
        Tick::Other(serde_json::Value::Null)
    }

    /// The tick as a number, or `None` if it is zero or unknown.
    pub fn value(&self) -> Option<f64> {
        match *self {
            Tick::Int(n) if n != 0 => Some(n as f64),
            Tick::Float(f) if f != 0.0 && f.is_finite() => Some(f),
            _ => None,
        }
    }

    /// The value used to order competing entries; unknown ticks sort as zero.
    pub fn rank(&self) -> f64 {
        self.value().unwrap_or(0.0)
    }
}

impl From<i64> for Tick {
    fn from(value: i64) -> Self {
        Tick::Int(value)
    }
}

impl From<f64> for Tick {
    fn from(value: f64) -> Self {
        Tick::Float(value)
    }
}

impl fmt::Display for Tick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tick::Int(n) => write!(f, "{n}"),
            Tick::Float(x) => write!(f, "{x}"),
            Tick::Other(v) => write!(f, "{v}"),
        }
    }
}

impl BankEntry {
    pub fn new(cheque: Cheque, tick: Tick) -> Self {
        BankEntry(cheque, tick)
    }

    pub fn cheque(&self) -> &Cheque {
        &self.0
    }

    pub fn tick(&self) -> &Tick {
        &self.1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_entry_is_a_pair() {
        let entry = BankEntry::new(Cheque(json!([[0, "split", 2]])), Tick::Int(1200));
        assert_eq!(
            serde_json::to_string(&entry).unwrap(),
            r#"[[[0,"split",2]],1200]"#
        );
        let back: BankEntry = serde_json::from_str(r#"[[[0,"split",2]],1200]"#).unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn test_tick_keeps_its_number_kind() {
        let int: Tick = serde_json::from_str("35").unwrap();
        let float: Tick = serde_json::from_str("35.5").unwrap();
        let null: Tick = serde_json::from_str("null").unwrap();
        let empty: Tick = serde_json::from_str(r#""""#).unwrap();
        assert_eq!(int, Tick::Int(35));
        assert_eq!(float, Tick::Float(35.5));
        assert_eq!(null, Tick::unknown());
        assert_eq!(serde_json::to_string(&empty).unwrap(), r#""""#);
    }

    #[test]
    fn test_zero_and_unknown_ticks_have_no_value() {
        assert_eq!(Tick::Int(0).value(), None);
        assert_eq!(Tick::Float(0.0).value(), None);
        assert_eq!(Tick::unknown().value(), None);
        assert_eq!(Tick::Int(7).value(), Some(7.0));
        assert_eq!(Tick::unknown().rank(), 0.0);
    }

    #[test]
    fn test_empty_cheques() {
        assert!(Cheque::empty().is_empty());
        assert!(Cheque(json!(null)).is_empty());
        assert!(Cheque(json!({})).is_empty());
        assert!(!Cheque(json!([1])).is_empty());
    }
}
