/// A source referenced by the research output.
///
/// Citations are unique by `url`; the first occurrence wins.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Citation {
    #[serde(default, deserialize_with = "null_to_default")]
    pub url: String,
    #[serde(default, deserialize_with = "null_to_default")]
    pub title: String,
    #[serde(
        default,
        alias = "snippet",
        alias = "content",
        deserialize_with = "null_to_default"
    )]
    pub description: String,
}

/// Treats an explicit JSON `null` like a missing field.
pub(crate) fn null_to_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Default + serde::Deserialize<'de>,
{
    use serde::Deserialize as _;
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Reads a count sent either as a JSON number or as a numeric string.
///
/// Anything else reads as `None` instead of failing the whole record.
pub(crate) fn lenient_u64<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::Deserialize as _;
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        serde_json::Value::String(raw) => raw.trim().parse().ok(),
        _ => None,
    })
}

impl Citation {
    /// Creates a citation.
    pub fn new(
        url: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            description: description.into(),
        }
    }
}

/// Timing and usage record attached to the terminal completion event.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CompletionMetadata {
    /// Server-side processing time, when reported.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        alias = "processing_time_ms",
        deserialize_with = "lenient_u64"
    )]
    pub duration_ms: Option<u64>,
    /// Total tokens consumed, when reported.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        alias = "total_tokens",
        deserialize_with = "lenient_u64"
    )]
    pub tokens_used: Option<u64>,
    /// Model that produced the answer, when reported.
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "null_to_default")]
    pub model: Option<String>,
    /// Any additional fields the server sent.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Server-reported progress hint attached to socket frames.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Progress {
    #[serde(default)]
    pub phase: String,
    #[serde(default)]
    pub percentage: f64,
    #[serde(default)]
    pub detail: Option<String>,
}

/// A choice offered by the backend while it waits for feedback.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FeedbackOption {
    pub text: String,
    pub value: String,
}

/// The backend paused and asked the caller for feedback.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FeedbackRequest {
    pub id: String,
    pub prompt: String,
    pub options: Vec<FeedbackOption>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn citation_accepts_snippet_alias() {
        let citation: Citation = serde_json::from_value(serde_json::json!({
            "url": "https://example.com",
            "title": "Example",
            "snippet": "An example page"
        }))
        .expect("citation");
        assert_eq!(citation.description, "An example page");
    }

    #[test]
    fn citation_tolerates_null_fields() {
        let citation: Citation = serde_json::from_value(serde_json::json!({
            "url": "https://example.com",
            "title": null
        }))
        .expect("citation");
        assert_eq!(citation.title, "");
        assert_eq!(citation.description, "");
    }

    #[test]
    fn metadata_keeps_unknown_fields() {
        let metadata: CompletionMetadata = serde_json::from_value(serde_json::json!({
            "processing_time_ms": 1200,
            "tokens_used": 900,
            "sources_count": 4
        }))
        .expect("metadata");
        assert_eq!(metadata.duration_ms, Some(1200));
        assert_eq!(metadata.tokens_used, Some(900));
        assert_eq!(metadata.extra.get("sources_count"), Some(&serde_json::json!(4)));
    }

    #[test]
    fn citation_without_url_still_parses() {
        let citation: Citation =
            serde_json::from_value(serde_json::json!({ "title": "Internal note" })).expect("citation");
        assert_eq!(citation.url, "");
        assert_eq!(citation.title, "Internal note");
    }

    #[test]
    fn metadata_reads_counts_sent_as_strings() {
        let metadata: CompletionMetadata = serde_json::from_value(serde_json::json!({
            "tokens_used": "1200",
            "duration_ms": "soon"
        }))
        .expect("metadata");
        assert_eq!(metadata.tokens_used, Some(1200));
        assert_eq!(metadata.duration_ms, None);
    }
}
