use std::fmt;
use std::sync::Arc;

/// Media type of a request or response body.
///
/// The common types the pipeline negotiates on get their own variants so
/// that matching stays allocation-free in the hot path; anything else is
/// carried verbatim in `Other`. Parameters (`; charset=...`) are stripped
/// during parsing and never participate in negotiation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MediaType {
    Json,
    Text,
    Html,
    EventStream,
    FormUrlEncoded,
    MultipartForm,
    OctetStream,
    Other(Arc<str>),
}

impl MediaType {
    /// Parse a `Content-Type` style header value, ignoring parameters.
    pub fn parse(raw: &str) -> Self {
        let essence = raw.split(';').next().unwrap_or("").trim();
        match essence.to_ascii_lowercase().as_str() {
            "application/json" => MediaType::Json,
            "text/plain" => MediaType::Text,
            "text/html" => MediaType::Html,
            "text/event-stream" => MediaType::EventStream,
            "application/x-www-form-urlencoded" => MediaType::FormUrlEncoded,
            "multipart/form-data" => MediaType::MultipartForm,
            "application/octet-stream" => MediaType::OctetStream,
            _ => MediaType::Other(Arc::from(essence)),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            MediaType::Json => "application/json",
            MediaType::Text => "text/plain",
            MediaType::Html => "text/html",
            MediaType::EventStream => "text/event-stream",
            MediaType::FormUrlEncoded => "application/x-www-form-urlencoded",
            MediaType::MultipartForm => "multipart/form-data",
            MediaType::OctetStream => "application/octet-stream",
            MediaType::Other(s) => s,
        }
    }

    #[inline]
    pub fn is_event_stream(&self) -> bool {
        matches!(self, MediaType::EventStream)
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_strips_parameters() {
        assert_eq!(MediaType::parse("application/json; charset=utf-8"), MediaType::Json);
        assert_eq!(MediaType::parse("multipart/form-data; boundary=xyz"), MediaType::MultipartForm);
    }

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!(MediaType::parse("Text/Plain"), MediaType::Text);
    }

    #[test]
    fn test_unknown_types_round_trip() {
        let mt = MediaType::parse("application/vnd.acme+json");
        assert_eq!(mt.as_str(), "application/vnd.acme+json");
        assert_eq!(mt.to_string(), "application/vnd.acme+json");
    }
}
