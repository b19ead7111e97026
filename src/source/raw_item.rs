//! The raw item shape shared by all fetchers.
//!
//! `RawItem` is what a fetcher hands back before any feed-kind specific
//! interpretation: dates are still strings, sizes are still strings, and
//! extension attributes are kept as plain name/value pairs.

/// MIME type that marks an enclosure as the downloadable payload.
pub const PAYLOAD_MIME_TYPE: &str = "application/x-bittorrent";

/// One `<enclosure>` element.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct Enclosure {
    pub mime_type: String,
    pub url: String,
    /// Length attribute exactly as published (usually a byte count).
    pub length: String,
}

/// A single feed item as parsed, before normalization.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct RawItem {
    pub title: String,
    pub link: String,
    /// Published date in whatever format the feed uses.
    pub published: Option<String>,
    pub categories: Vec<String>,
    pub description: Option<String>,
    pub enclosures: Vec<Enclosure>,
    /// Extension attributes such as `<torznab:attr name="size" value="..."/>`,
    /// flattened to `(name, value)` pairs in document order.
    pub attributes: Vec<(String, String)>,
}

impl RawItem {
    /// First enclosure carrying the payload MIME type.
    pub fn payload_enclosure(&self) -> Option<&Enclosure> {
        self.enclosures
            .iter()
            .find(|e| e.mime_type == PAYLOAD_MIME_TYPE)
    }

    /// Value of the last extension attribute called `name`.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enclosure(mime: &str, url: &str) -> Enclosure {
        Enclosure {
            mime_type: mime.to_string(),
            url: url.to_string(),
            length: "10".to_string(),
        }
    }

    #[test]
    fn payload_enclosure_skips_other_mime_types() {
        let item = RawItem {
            enclosures: vec![
                enclosure("image/jpeg", "https://example.com/cover.jpg"),
                enclosure(PAYLOAD_MIME_TYPE, "https://example.com/a.torrent"),
            ],
            ..Default::default()
        };

        let payload = item.payload_enclosure().unwrap();
        assert_eq!(payload.url, "https://example.com/a.torrent");
    }

    #[test]
    fn payload_enclosure_none_without_torrent() {
        let item = RawItem {
            enclosures: vec![enclosure("audio/mpeg", "https://example.com/a.mp3")],
            ..Default::default()
        };
        assert!(item.payload_enclosure().is_none());
    }

    #[test]
    fn attribute_returns_last_value() {
        let item = RawItem {
            attributes: vec![
                ("size".into(), "1 GB".into()),
                ("category".into(), "TV, HD".into()),
                ("size".into(), "2 GB".into()),
            ],
            ..Default::default()
        };
        assert_eq!(item.attribute("size"), Some("2 GB"));
        assert_eq!(item.attribute("category"), Some("TV, HD"));
        assert_eq!(item.attribute("missing"), None);
    }
}
