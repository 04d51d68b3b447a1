//! InfluxDB line-protocol points.

use std::fmt::Write as _;

use chrono::{DateTime, Utc};

/// Typed field value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Float(f64),
    Integer(i64),
    Bool(bool),
    Text(String),
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Integer(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Text(v.to_string())
    }
}

/// One measurement with tags, fields and a millisecond timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    measurement: String,
    tags: Vec<(String, String)>,
    fields: Vec<(String, FieldValue)>,
    timestamp: Option<DateTime<Utc>>,
}

impl Point {
    pub fn new(measurement: impl Into<String>) -> Self {
        Self {
            measurement: measurement.into(),
            tags: Vec::new(),
            fields: Vec::new(),
            timestamp: None,
        }
    }

    #[must_use]
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn field(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn time(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn measurement(&self) -> &str {
        &self.measurement
    }

    pub fn tag_value(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn field_value(&self, key: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Render to line protocol with millisecond precision.
    ///
    /// Tags are sorted by key. Non-finite floats are dropped. A point left
    /// without fields renders as `None`; InfluxDB rejects such lines.
    pub fn to_line_protocol(&self) -> Option<String> {
        let fields: Vec<&(String, FieldValue)> = self
            .fields
            .iter()
            .filter(|(_, v)| !matches!(v, FieldValue::Float(f) if !f.is_finite()))
            .collect();
        if fields.is_empty() {
            return None;
        }

        let mut line = String::with_capacity(128);
        escape_into(&mut line, &self.measurement, &[',', ' ']);

        let mut tags: Vec<&(String, String)> =
            self.tags.iter().filter(|(_, v)| !v.is_empty()).collect();
        tags.sort_by(|a, b| a.0.cmp(&b.0));
        for (key, value) in tags {
            line.push(',');
            escape_into(&mut line, key, &[',', '=', ' ']);
            line.push('=');
            escape_into(&mut line, value, &[',', '=', ' ']);
        }

        line.push(' ');
        for (i, (key, value)) in fields.into_iter().enumerate() {
            if i > 0 {
                line.push(',');
            }
            escape_into(&mut line, key, &[',', '=', ' ']);
            line.push('=');
            match value {
                FieldValue::Float(v) => {
                    let _ = write!(line, "{v}");
                }
                FieldValue::Integer(v) => {
                    let _ = write!(line, "{v}i");
                }
                FieldValue::Bool(v) => line.push_str(if *v { "true" } else { "false" }),
                FieldValue::Text(v) => {
                    line.push('"');
                    escape_into(&mut line, v, &['"', '\\']);
                    line.push('"');
                }
            }
        }

        if let Some(ts) = self.timestamp {
            let _ = write!(line, " {}", ts.timestamp_millis());
        }
        Some(line)
    }
}

fn escape_into(out: &mut String, raw: &str, special: &[char]) {
    for c in raw.chars() {
        match c {
            '\n' => out.push_str("\\n"),
            c if special.contains(&c) => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts() -> DateTime<Utc> {
        DateTime::from_timestamp_millis(1_700_000_000_123).unwrap()
    }

    #[test]
    fn renders_tags_fields_and_millis() {
        let line = Point::new("AirValve")
            .tag("sensor_name", "V1")
            .tag("line_name", "L1")
            .field("value", 412_i64)
            .field("model_avg", 401.25)
            .time(ts())
            .to_line_protocol()
            .unwrap();
        assert_eq!(
            line,
            "AirValve,line_name=L1,sensor_name=V1 value=412i,model_avg=401.25 1700000000123"
        );
    }

    #[test]
    fn escapes_special_characters() {
        let line = Point::new("my meas,x")
            .tag("machine name", "a=b,c")
            .field("note", "say \"hi\"")
            .to_line_protocol()
            .unwrap();
        assert_eq!(
            line,
            r#"my\ meas\,x,machine\ name=a\=b\,c note="say \"hi\"""#
        );
    }

    #[test]
    fn empty_tag_values_are_skipped() {
        let line = Point::new("m")
            .tag("operation_type", "")
            .field("v", 1.5)
            .to_line_protocol()
            .unwrap();
        assert_eq!(line, "m v=1.5");
    }

    #[test]
    fn point_without_fields_is_not_rendered() {
        assert!(Point::new("m").tag("a", "b").to_line_protocol().is_none());
        assert!(Point::new("m").field("v", f64::NAN).to_line_protocol().is_none());
    }
}
