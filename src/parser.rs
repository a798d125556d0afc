use std::fmt::Display;

use chrono::{DateTime, Local};

/// How many comma separated values a sensor line carries.
pub const VALUES_PER_LINE: usize = 6;

/// The header of the CSV log.
/// The first column is the receive timestamp, the rest are the sensor values in order.
pub const CSV_HEADER: [&str; VALUES_PER_LINE + 1] = [
    "timestamp",
    "acel_x",
    "acel_y",
    "acel_z",
    "gyro_x",
    "gyro_y",
    "gyro_z",
];

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// A line received from the device, along with its values if it was well formed.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedLine {
    timestamp: DateTime<Local>,
    raw: String,
    values: Option<[f64; VALUES_PER_LINE]>,
}

impl ParsedLine {
    /// When the line was received.
    pub fn timestamp(&self) -> DateTime<Local> {
        self.timestamp
    }

    /// The line as received, trimmed.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// The parsed values, if the line had exactly six numbers.
    pub fn values(&self) -> Option<&[f64; VALUES_PER_LINE]> {
        self.values.as_ref()
    }

    /// Whether the line carried sensor values.
    pub fn is_valid(&self) -> bool {
        self.values.is_some()
    }

    /// The timestamp with millisecond precision, as written to the log.
    pub fn timestamp_string(&self) -> String {
        self.timestamp.format(TIMESTAMP_FORMAT).to_string()
    }

    /// The row to log.
    ///
    /// Valid lines become `[timestamp, v1..v6]`,
    /// anything else `[timestamp, raw]`.
    pub fn csv_record(&self) -> Vec<String> {
        let timestamp = self.timestamp_string();

        match &self.values {
            Some(values) => std::iter::once(timestamp)
                .chain(values.iter().copied().map(format_value))
                .collect(),
            None => vec![timestamp, self.raw.clone()],
        }
    }
}

/// Shortest round-trip text, with exponents signed and at least two digits wide
/// (`1e+16`, `1.5e-07`), as the existing logs have them.
fn format_value(value: f64) -> String {
    if value.is_nan() {
        return "nan".into();
    }

    let text = format!("{value:?}");

    match text.split_once('e') {
        Some((mantissa, exponent)) => {
            let (sign, digits) = match exponent.strip_prefix('-') {
                Some(digits) => ('-', digits),
                None => ('+', exponent),
            };
            format!("{mantissa}e{sign}{digits:0>2}")
        }
        None => text,
    }
}

impl Display for ParsedLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.csv_record().join(","))
    }
}

/// Turns raw lines into [`ParsedLine`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct LineParser;

impl LineParser {
    /// Create a parser.
    pub fn new() -> Self {
        Self
    }

    /// Parse a raw line received at the given time.
    ///
    /// Never fails: lines which are not six comma separated numbers
    /// are kept as they are, without values.
    pub fn parse(&self, raw: &str, received: DateTime<Local>) -> ParsedLine {
        let raw = raw.trim();

        ParsedLine {
            timestamp: received,
            raw: raw.to_owned(),
            values: Self::six_floats(raw),
        }
    }

    fn six_floats(line: &str) -> Option<[f64; VALUES_PER_LINE]> {
        let parts = line.split(',').map(str::trim).collect::<Vec<_>>();

        if parts.len() != VALUES_PER_LINE {
            return None;
        }

        let mut values = [0.0; VALUES_PER_LINE];
        for (value, part) in values.iter_mut().zip(parts) {
            *value = part.parse().ok()?;
        }

        Some(values)
    }
}
