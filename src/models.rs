use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A short link as stored in the `urls` collection.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct UrlRecord {
    #[serde(rename = "_id")]
    pub id: String,
    pub original_url: String,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    pub visits: i64,
}

impl UrlRecord {
    #[must_use]
    pub fn new(id: String, original_url: String) -> Self {
        Self {
            id,
            original_url,
            created_at: Utc::now(),
            visits: 0,
        }
    }
}

#[derive(Deserialize)]
pub struct ShortenRequest {
    #[serde(default)]
    pub url: String,
}

#[derive(Serialize)]
pub struct ShortenResponse {
    pub original_url: String,
    pub short_url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_document_shape() {
        let record = UrlRecord::new("srkwwb7N".to_owned(), "http://example.com/page".to_owned());
        let doc = bson::to_document(&record).unwrap();

        assert_eq!(doc.get_str("_id").unwrap(), "srkwwb7N");
        assert_eq!(doc.get_str("original_url").unwrap(), "http://example.com/page");
        assert!(doc.get_datetime("created_at").is_ok());
        assert_eq!(doc.get_i64("visits").unwrap(), 0);
    }

    #[test]
    fn request_without_url_is_empty() {
        let req = serde_json::from_str::<ShortenRequest>("{}").unwrap();
        assert!(req.url.is_empty());
    }
}
