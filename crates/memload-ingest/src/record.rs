//! Install-record parsing
//!
//! One input line is five tab-separated fields:
//!
//! ```text
//! device_type \t device_id \t latitude \t longitude \t app_id,app_id,...
//! ```
//!
//! Only the line structure and the device identity are hard requirements.
//! Coordinates and app ids are parsed leniently: bad values are set aside in
//! a [`Partial`] and the record still counts as a good line.

use thiserror::Error;

/// Number of tab-separated fields in a well-formed line
pub const FIELD_COUNT: usize = 5;

/// A record parsed from one input line
#[derive(Debug, Clone, PartialEq)]
pub struct InstallRecord {
    /// Device type, also the shard-routing key
    pub device_type: String,
    pub device_id: String,
    /// `None` when the coordinate could not be parsed
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub apps: Vec<i64>,
}

impl InstallRecord {
    /// Backend key, `"{device_type}:{device_id}"`
    pub fn key(&self) -> String {
        format!("{}:{}", self.device_type, self.device_id)
    }
}

/// Value plus the raw tokens that had to be ignored to produce it
#[derive(Debug, Clone, PartialEq)]
pub struct Partial<T> {
    pub value: T,
    pub ignored: Vec<String>,
}

impl<T> Partial<T> {
    pub fn complete(value: T) -> Self {
        Self {
            value,
            ignored: Vec::new(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.ignored.is_empty()
    }
}

/// Result of a successful parse, with the lenient fields broken out
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedLine {
    pub record: InstallRecord,
    /// App tokens that were not integers
    pub ignored_apps: Vec<String>,
    /// Raw latitude/longitude values that were not floats
    pub ignored_coords: Vec<String>,
}

impl ParsedLine {
    pub fn is_degraded(&self) -> bool {
        !self.ignored_apps.is_empty() || !self.ignored_coords.is_empty()
    }
}

/// Line-level parse failures; each one counts as an error line
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("expected {FIELD_COUNT} tab-separated fields, found {found}")]
    MalformedLine { found: usize },

    #[error("missing {field}")]
    MissingIdentity { field: &'static str },
}

/// Parse one line
///
/// Surrounding whitespace is stripped except tabs, so empty leading or
/// trailing fields keep their position.
pub fn parse(line: &str) -> Result<ParsedLine, ParseError> {
    let line = line.trim_matches(|c: char| c.is_whitespace() && c != '\t');
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() != FIELD_COUNT {
        return Err(ParseError::MalformedLine {
            found: fields.len(),
        });
    }

    let device_type = fields[0].trim();
    let device_id = fields[1].trim();
    if device_type.is_empty() {
        return Err(ParseError::MissingIdentity {
            field: "device_type",
        });
    }
    if device_id.is_empty() {
        return Err(ParseError::MissingIdentity { field: "device_id" });
    }

    let latitude = parse_coordinate(fields[2]);
    let longitude = parse_coordinate(fields[3]);
    let apps = parse_apps(fields[4]);

    let ignored_coords = [latitude.ignored, longitude.ignored].concat();

    Ok(ParsedLine {
        record: InstallRecord {
            device_type: device_type.to_string(),
            device_id: device_id.to_string(),
            latitude: latitude.value,
            longitude: longitude.value,
            apps: apps.value,
        },
        ignored_apps: apps.ignored,
        ignored_coords,
    })
}

/// Parse a comma-separated app id list, dropping tokens that are not integers
///
/// Empty tokens (`"1,,2"`, or an empty field) are skipped without being
/// reported.
pub fn parse_apps(raw: &str) -> Partial<Vec<i64>> {
    let mut apps = Vec::new();
    let mut ignored = Vec::new();

    for token in raw.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        match token.parse::<i64>() {
            Ok(app) => apps.push(app),
            Err(_) => ignored.push(token.to_string()),
        }
    }

    Partial {
        value: apps,
        ignored,
    }
}

/// Parse a coordinate; an unparseable value becomes absent
pub fn parse_coordinate(raw: &str) -> Partial<Option<f64>> {
    let raw = raw.trim();
    match raw.parse::<f64>() {
        Ok(value) => Partial::complete(Some(value)),
        Err(_) => Partial {
            value: None,
            ignored: vec![raw.to_string()],
        },
    }
}
