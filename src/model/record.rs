//! News records and their index projection

use crate::common::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A news item. The primary store is the only authoritative source for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: i64,
    pub author: String,
    pub body: String,
    pub created: DateTime<Utc>,
}

impl Record {
    pub fn new(
        id: i64,
        author: impl Into<String>,
        body: impl Into<String>,
        created: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            author: author.into(),
            body: body.into(),
            created,
        }
    }

    /// Check required fields before the record enters the pipeline.
    pub fn validate(&self) -> Result<()> {
        if self.id <= 0 {
            return Err(Error::Invalid(format!(
                "id must be positive, got {}",
                self.id
            )));
        }
        if self.author.trim().is_empty() {
            return Err(Error::Invalid("author is required".into()));
        }
        if self.body.trim().is_empty() {
            return Err(Error::Invalid("body is required".into()));
        }
        // Stores keep `created` as i64 nanoseconds since the epoch.
        if self.created.timestamp_nanos_opt().is_none() {
            return Err(Error::Invalid(format!(
                "created {} is outside the storable range (1677-2262)",
                self.created.to_rfc3339()
            )));
        }
        Ok(())
    }

    /// The slim projection kept by the search index.
    pub fn index_entry(&self) -> IndexEntry {
        IndexEntry {
            id: self.id,
            created: self.created,
        }
    }

    pub fn apply(&mut self, patch: &RecordPatch) {
        if let Some(author) = &patch.author {
            self.author = author.clone();
        }
        if let Some(body) = &patch.body {
            self.body = body.clone();
        }
    }

    /// Wire form carried by the message channel.
    pub fn to_payload(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::Internal(format!("encode record: {}", e)))
    }

    pub fn from_payload(payload: &[u8]) -> Result<Self> {
        serde_json::from_slice(payload).map_err(|e| Error::Decode(format!("record payload: {}", e)))
    }
}

/// Search index projection of a [`Record`]. Never a content source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub id: i64,
    pub created: DateTime<Utc>,
}

/// Write-path input; `created` defaults to the acceptance time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordDraft {
    pub id: i64,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
}

impl RecordDraft {
    pub fn into_record(self, now: DateTime<Utc>) -> Record {
        Record {
            id: self.id,
            author: self.author,
            body: self.body,
            created: self.created.unwrap_or(now),
        }
    }
}

/// Partial update. Absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

impl RecordPatch {
    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.author.is_none() && self.body.is_none()
    }

    pub fn validate(&self) -> Result<()> {
        if self.is_empty() {
            return Err(Error::Invalid("patch has no fields".into()));
        }
        if matches!(&self.author, Some(a) if a.trim().is_empty()) {
            return Err(Error::Invalid("author cannot be empty".into()));
        }
        if matches!(&self.body, Some(b) if b.trim().is_empty()) {
            return Err(Error::Invalid("body cannot be empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::ErrorKind;
    use chrono::TimeZone;

    fn sample() -> Record {
        Record::new(
            1,
            "Alex",
            "Hello this is news from Alex",
            Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
        )
    }

    #[test]
    fn test_validate() {
        assert!(sample().validate().is_ok());

        let mut missing_author = sample();
        missing_author.author = "  ".into();
        assert_eq!(
            missing_author.validate().unwrap_err().kind(),
            ErrorKind::Invalid
        );

        let mut bad_id = sample();
        bad_id.id = 0;
        assert!(bad_id.validate().is_err());

        let mut ancient = sample();
        ancient.created = Utc.with_ymd_and_hms(1500, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(ancient.validate().unwrap_err().kind(), ErrorKind::Invalid);

        let mut far_future = sample();
        far_future.created = Utc.with_ymd_and_hms(2300, 1, 1, 0, 0, 0).unwrap();
        assert!(far_future.validate().is_err());
    }

    #[test]
    fn test_wire_shape() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["id"], 1);
        assert_eq!(json["author"], "Alex");
        assert_eq!(json["created"], "2024-03-01T12:00:00Z");

        let entry = serde_json::to_value(sample().index_entry()).unwrap();
        assert_eq!(entry, serde_json::json!({"id": 1, "created": "2024-03-01T12:00:00Z"}));
    }

    #[test]
    fn test_payload_decode_error() {
        let err = Record::from_payload(b"{\"id\": \"seven\"}").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Decode);

        let payload = sample().to_payload().unwrap();
        assert_eq!(Record::from_payload(&payload).unwrap(), sample());
    }

    #[test]
    fn test_patch() {
        assert!(RecordPatch::default().validate().is_err());
        assert!(RecordPatch::default().author("").validate().is_err());

        let patch = RecordPatch::default().author("Alex UPDATED");
        assert!(patch.validate().is_ok());

        let mut record = sample();
        record.apply(&patch);
        assert_eq!(record.author, "Alex UPDATED");
        assert_eq!(record.body, sample().body);
    }

    #[test]
    fn test_draft_defaults_created() {
        let now = Utc.with_ymd_and_hms(2024, 5, 5, 0, 0, 0).unwrap();
        let draft: RecordDraft =
            serde_json::from_str(r#"{"id": 9, "author": "Bacca", "body": "hi"}"#).unwrap();
        let record = draft.into_record(now);
        assert_eq!(record.created, now);
        assert_eq!(record.id, 9);
    }
}
