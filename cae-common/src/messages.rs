//! Queue message payloads
//!
//! Bodies are JSON objects carrying a correlation id so that the web tier can
//! match completions to requests regardless of arrival order. A body that is
//! not JSON is read as a bare document id, the format older producers emit.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result};

/// Request to analyse a stored image (`new-work` queue)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewWork {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,
    pub image_id: String,
}

/// Notice that a result has been persisted (`work-done` queue)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkDone {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_id: Option<String>,
    pub result_id: String,
}

impl NewWork {
    pub fn new(correlation_id: Uuid, image_id: impl Into<String>) -> Self {
        Self {
            correlation_id: Some(correlation_id),
            image_id: image_id.into(),
        }
    }

    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(body: &str) -> Result<Self> {
        decode_or_bare(body, |id| Self {
            correlation_id: None,
            image_id: id,
        })
    }
}

impl WorkDone {
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(body: &str) -> Result<Self> {
        decode_or_bare(body, |id| Self {
            correlation_id: None,
            image_id: None,
            result_id: id,
        })
    }
}

fn decode_or_bare<T, F>(body: &str, bare: F) -> Result<T>
where
    T: for<'de> Deserialize<'de>,
    F: FnOnce(String) -> T,
{
    let trimmed = body.trim();
    if trimmed.starts_with('{') {
        return Ok(serde_json::from_str(trimmed)?);
    }
    if trimmed.is_empty() {
        return Err(Error::InvalidInput("empty message body".to_string()));
    }
    Ok(bare(trimmed.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_work_structured_body() {
        let correlation_id = Uuid::new_v4();
        let msg = NewWork::new(correlation_id, "img-1");

        let decoded = NewWork::decode(&msg.encode().unwrap()).unwrap();
        assert_eq!(decoded.correlation_id, Some(correlation_id));
        assert_eq!(decoded.image_id, "img-1");
    }

    #[test]
    fn test_bare_id_bodies() {
        let work = NewWork::decode("605a698c80b5eaf424b1bb78").unwrap();
        assert_eq!(work.correlation_id, None);
        assert_eq!(work.image_id, "605a698c80b5eaf424b1bb78");

        let done = WorkDone::decode("some_color_id\n").unwrap();
        assert_eq!(done.result_id, "some_color_id");
        assert_eq!(done.image_id, None);
    }

    #[test]
    fn test_empty_body_rejected() {
        assert!(matches!(NewWork::decode("  "), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_malformed_json_rejected() {
        assert!(matches!(
            WorkDone::decode("{\"result\":"),
            Err(Error::Serialization(_))
        ));
    }

    #[test]
    fn test_work_done_omits_missing_correlation() {
        let done = WorkDone {
            correlation_id: None,
            image_id: None,
            result_id: "r1".to_string(),
        };
        assert_eq!(done.encode().unwrap(), r#"{"result_id":"r1"}"#);
    }
}
