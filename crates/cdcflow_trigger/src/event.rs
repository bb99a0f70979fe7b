//! Notification decoding.

use cdcflow_protocol::ObjectCreatedEvent;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

use crate::adapter::TriggerError;

/// Characters left as-is when encoding an object key for a notification.
/// Space is handled separately (`+`).
const KEY_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b' ');

/// Where a new object landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectLocation {
    pub bucket: String,
    /// Decoded object key.
    pub key: String,
    /// Final `/`-separated segment of the key.
    pub file_name: String,
}

/// Extract the bucket and file name from the first notification record.
pub fn decode_notification(event: &ObjectCreatedEvent) -> Result<ObjectLocation, TriggerError> {
    let record = event
        .records
        .first()
        .ok_or_else(|| malformed("notification has no records"))?;
    let s3 = record
        .s3
        .as_ref()
        .ok_or_else(|| malformed("record has no s3 entity"))?;

    let bucket = s3
        .bucket
        .as_ref()
        .and_then(|b| b.name.as_deref())
        .filter(|name| !name.is_empty())
        .ok_or_else(|| malformed("missing s3.bucket.name"))?;
    let raw_key = s3
        .object
        .as_ref()
        .and_then(|o| o.key.as_deref())
        .filter(|key| !key.is_empty())
        .ok_or_else(|| malformed("missing s3.object.key"))?;

    let key = decode_key(raw_key)?;
    let file_name = key.rsplit('/').next().unwrap_or_default();
    if file_name.is_empty() {
        return Err(malformed(format!("object key '{}' has no file name", key)));
    }

    Ok(ObjectLocation {
        bucket: bucket.to_string(),
        file_name: file_name.to_string(),
        key,
    })
}

/// Decode a notification key: `+` is a space, then percent-decoding.
pub fn decode_key(raw: &str) -> Result<String, TriggerError> {
    let spaced = raw.replace('+', " ");
    percent_decode_str(&spaced)
        .decode_utf8()
        .map(|decoded| decoded.into_owned())
        .map_err(|e| malformed(format!("object key '{}' is not valid UTF-8: {}", raw, e)))
}

/// Encode a key the way object-created notifications carry it.
pub fn encode_key(key: &str) -> String {
    utf8_percent_encode(key, KEY_ENCODE_SET)
        .to_string()
        .replace(' ', "+")
}

fn malformed(reason: impl Into<String>) -> TriggerError {
    TriggerError::MalformedEvent(reason.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(json: &str) -> Result<ObjectLocation, TriggerError> {
        decode_notification(&serde_json::from_str(json).unwrap())
    }

    #[test]
    fn test_decodes_bucket_and_file_name() {
        let location = decode(
            r#"{"Records":[{"s3":{"bucket":{"name":"people"},"object":{"key":"intermediate_data/world/Person_Lewis/batch_0001.csv"}}}]}"#,
        )
        .unwrap();
        assert_eq!(location.bucket, "people");
        assert_eq!(location.file_name, "batch_0001.csv");
        assert_eq!(location.key, "intermediate_data/world/Person_Lewis/batch_0001.csv");
    }

    #[test]
    fn test_unquote_plus_semantics() {
        assert_eq!(decode_key("in/my+file%2B1.csv").unwrap(), "in/my file+1.csv");
        assert_eq!(decode_key("in/caf%C3%A9.csv").unwrap(), "in/café.csv");
        assert_eq!(decode_key("in%2Fnested%2Fa.csv").unwrap(), "in/nested/a.csv");
        assert!(matches!(
            decode_key("in/%FF.csv"),
            Err(TriggerError::MalformedEvent(_))
        ));
    }

    #[test]
    fn test_encode_key_is_inverse_of_decode() {
        for key in ["in/a.csv", "in/my file+1.csv", "in/café & co.csv", "in/50%.csv"] {
            assert_eq!(decode_key(&encode_key(key)).unwrap(), key);
        }
        assert_eq!(encode_key("in/my file+1.csv"), "in/my+file%2B1.csv");
    }

    #[test]
    fn test_rejects_malformed_events() {
        for json in [
            r#"{}"#,
            r#"{"Records":[]}"#,
            r#"{"Records":[{}]}"#,
            r#"{"Records":[{"s3":{"object":{"key":"in/a.csv"}}}]}"#,
            r#"{"Records":[{"s3":{"bucket":{"name":""},"object":{"key":"in/a.csv"}}}]}"#,
            r#"{"Records":[{"s3":{"bucket":{"name":"people"}}}]}"#,
            r#"{"Records":[{"s3":{"bucket":{"name":"people"},"object":{"key":""}}}]}"#,
            r#"{"Records":[{"s3":{"bucket":{"name":"people"},"object":{"key":"in/folder/"}}}]}"#,
        ] {
            assert!(
                matches!(decode(json), Err(TriggerError::MalformedEvent(_))),
                "expected MalformedEvent for {}",
                json
            );
        }
    }

    #[test]
    fn test_key_without_prefix() {
        let location = decode(
            r#"{"Records":[{"s3":{"bucket":{"name":"people"},"object":{"key":"top.csv","size":12}}}]}"#,
        )
        .unwrap();
        assert_eq!(location.file_name, "top.csv");
    }
}
