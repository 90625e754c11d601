// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Wire protocol: the handshake frame and the log entry frames.
//!
//! A client sends exactly one handshake line, `{"major":1,"minor":0}`, followed
//! by any number of log lines. Log lines are JSON objects of the form
//! `{"level":"WARN","serviceName":"api","message":"..."}`; anything else is kept
//! verbatim as the message of an `INFO` entry.

use std::fmt;

use serde::{Deserialize, Deserializer};

use crate::errors::VersionError;

/// The only protocol version accepted by the server.
pub const SUPPORTED_VERSION: VersionSpecifier = VersionSpecifier { major: 1, minor: 0 };

/// Level assigned to lines that are not structured entries.
pub const FALLBACK_LEVEL: &str = "INFO";

/// Protocol version announced by a client in its handshake line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, derive_more::Display)]
#[display("{major}.{minor}")]
pub struct VersionSpecifier {
    #[serde(default)]
    pub major: i64,
    #[serde(default)]
    pub minor: i64,
}

impl VersionSpecifier {
    /// Strictly decodes a handshake line. Unlike [`parse_entry`], malformed
    /// input is an error.
    pub fn from_line(line: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(line)
    }
}

/// Checks a handshake against [`SUPPORTED_VERSION`]. Newer versions are
/// rejected as well; there is no compatibility window.
pub fn validate_version(version: VersionSpecifier) -> Result<(), VersionError> {
    if version != SUPPORTED_VERSION {
        return Err(VersionError::Unsupported(version));
    }
    Ok(())
}

/// A single log record received from a client.
///
/// Field names also match in their capitalized, upper and lower case forms.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct LogEntry {
    #[serde(
        default,
        alias = "Level",
        alias = "LEVEL",
        deserialize_with = "null_as_empty"
    )]
    pub level: String,
    #[serde(
        default,
        rename = "serviceName",
        alias = "ServiceName",
        alias = "servicename",
        alias = "SERVICENAME",
        deserialize_with = "null_as_empty"
    )]
    pub service: String,
    #[serde(
        default,
        alias = "Message",
        alias = "MESSAGE",
        deserialize_with = "null_as_empty"
    )]
    pub message: String,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// Decodes one line into a [`LogEntry`].
///
/// This never fails: input that is not a structured entry becomes the message
/// of an entry with level `INFO` and no service. A JSON `null` decodes to an
/// empty entry.
pub fn parse_entry(line: &[u8]) -> LogEntry {
    match serde_json::from_slice::<Option<LogEntry>>(line) {
        Ok(entry) => entry.unwrap_or_default(),
        Err(_) => LogEntry {
            level: FALLBACK_LEVEL.to_string(),
            service: String::new(),
            message: String::from_utf8_lossy(line).into_owned(),
        },
    }
}

/// Renders as `[service] LEVEL: message`, omitting empty segments.
impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.service.is_empty() {
            write!(f, "[{}] ", self.service)?;
        }
        if !self.level.is_empty() {
            write!(f, "{}: ", self.level)?;
        }
        f.write_str(&self.message)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn entry(level: &str, service: &str, message: &str) -> LogEntry {
        LogEntry {
            level: level.to_string(),
            service: service.to_string(),
            message: message.to_string(),
        }
    }

    #[test]
    fn test_parse_structured_entry() {
        let parsed =
            parse_entry(br#"{"level":"WARN","serviceName":"billing","message":"disk at 91%"}"#);
        assert_eq!(parsed, entry("WARN", "billing", "disk at 91%"));
    }

    #[test]
    fn test_parse_plain_text_falls_back() {
        assert_eq!(parse_entry(b"plain text"), entry("INFO", "", "plain text"));
    }

    #[test]
    fn test_parse_empty_line_falls_back() {
        assert_eq!(parse_entry(b""), entry("INFO", "", ""));
    }

    #[test]
    fn test_parse_partial_entry_defaults_missing_fields() {
        assert_eq!(parse_entry(br#"{"message":"hi"}"#), entry("", "", "hi"));
        assert_eq!(
            parse_entry(br#"{"level":null,"serviceName":"svc","message":"hi","extra":3}"#),
            entry("", "svc", "hi")
        );
    }

    #[test]
    fn test_parse_wrong_field_type_falls_back() {
        let raw = r#"{"level":5,"serviceName":"svc","message":"hi"}"#;
        assert_eq!(parse_entry(raw.as_bytes()), entry("INFO", "", raw));
    }

    #[test]
    fn test_parse_field_name_casings() {
        assert_eq!(
            parse_entry(br#"{"Level":"WARN","ServiceName":"svc","Message":"m"}"#),
            entry("WARN", "svc", "m")
        );
        assert_eq!(
            parse_entry(br#"{"LEVEL":"ERROR","servicename":"svc","MESSAGE":"m"}"#),
            entry("ERROR", "svc", "m")
        );
    }

    #[test]
    fn test_parse_null_is_empty_entry() {
        assert_eq!(parse_entry(b"null"), LogEntry::default());
        assert_eq!(parse_entry(b" null "), LogEntry::default());
    }

    #[test]
    fn test_parse_non_object_json_falls_back() {
        assert_eq!(parse_entry(b"\"quoted\""), entry("INFO", "", "\"quoted\""));
        assert_eq!(parse_entry(b"42"), entry("INFO", "", "42"));
    }

    #[test]
    fn test_parse_invalid_utf8_is_lossy() {
        let parsed = parse_entry(&[0x66, 0x6f, 0xff, 0x6f]);
        assert_eq!(parsed.level, "INFO");
        assert_eq!(parsed.message, "fo\u{fffd}o");
    }

    #[test]
    fn test_render() {
        assert_eq!(entry("", "", "hi").to_string(), "hi");
        assert_eq!(entry("WARN", "", "hi").to_string(), "WARN: hi");
        assert_eq!(entry("", "svc", "hi").to_string(), "[svc] hi");
        assert_eq!(entry("WARN", "svc", "hi").to_string(), "[svc] WARN: hi");
    }

    #[test]
    fn test_validate_supported_version() {
        assert!(validate_version(VersionSpecifier { major: 1, minor: 0 }).is_ok());
    }

    #[test]
    fn test_validate_rejects_other_versions() {
        for (major, minor) in [(0, 0), (0, 9), (1, 1), (2, 0), (-1, 0)] {
            let version = VersionSpecifier { major, minor };
            assert_eq!(
                validate_version(version),
                Err(VersionError::Unsupported(version))
            );
        }
    }

    #[test]
    fn test_version_from_line() {
        assert_eq!(
            VersionSpecifier::from_line(br#"{"major":1,"minor":0}"#).unwrap(),
            SUPPORTED_VERSION
        );
        // missing fields default to zero and fail validation later
        assert_eq!(
            VersionSpecifier::from_line(br#"{"major":1}"#).unwrap(),
            VersionSpecifier { major: 1, minor: 0 }
        );
        assert_eq!(
            VersionSpecifier::from_line(b"{}").unwrap(),
            VersionSpecifier::default()
        );
    }

    #[test]
    fn test_version_from_line_rejects_malformed() {
        assert!(VersionSpecifier::from_line(b"1.0").is_err());
        assert!(VersionSpecifier::from_line(b"").is_err());
        assert!(VersionSpecifier::from_line(br#"{"major":"1","minor":0}"#).is_err());
        assert!(VersionSpecifier::from_line(br#"{"major":1.5,"minor":0}"#).is_err());
    }

    #[test]
    fn test_version_display() {
        assert_eq!(VersionSpecifier { major: 3, minor: 7 }.to_string(), "3.7");
    }

    proptest! {
        #[test]
        fn parse_entry_is_total(bytes in proptest::collection::vec(any::<u8>(), 0..256)) {
            let parsed = parse_entry(&bytes);
            if serde_json::from_slice::<serde_json::Value>(&bytes)
                .map_or(true, |v| !v.is_object() && !v.is_null())
            {
                prop_assert_eq!(parsed.level, FALLBACK_LEVEL);
                prop_assert_eq!(parsed.service, "");
                prop_assert_eq!(parsed.message, String::from_utf8_lossy(&bytes).into_owned());
            }
        }

        #[test]
        fn plain_text_is_kept_verbatim(text in "[a-zA-Z ][a-zA-Z0-9 .,:;!?-]{0,64}") {
            let parsed = parse_entry(text.as_bytes());
            prop_assert_eq!(parsed, entry("INFO", "", &text));
        }
    }
}
