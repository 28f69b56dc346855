// src/plex/types.rs

//! Serde models for the slice of the Plex API the daemon consumes.

use std::path::PathBuf;

use serde::{de, Deserialize, Deserializer};

/// Response body of `GET /library/sections`.
#[derive(Debug, Deserialize)]
pub struct SectionsResponse {
    #[serde(rename = "MediaContainer")]
    pub media_container: MediaContainer,
}

#[derive(Debug, Default, Deserialize)]
pub struct MediaContainer {
    #[serde(rename = "Directory", default)]
    pub directories: Vec<SectionDirectory>,
}

/// One library section as reported by the server.
#[derive(Debug, Deserialize)]
pub struct SectionDirectory {
    /// Section id. The server emits this as a JSON string; accept either.
    #[serde(deserialize_with = "int_or_string")]
    pub key: i64,

    #[serde(rename = "Location", default)]
    pub locations: Vec<SectionLocation>,
}

#[derive(Debug, Deserialize)]
pub struct SectionLocation {
    pub path: PathBuf,
}

/// A library section flattened for the watcher: id plus its root paths.
#[derive(Debug, Clone)]
pub struct LibrarySection {
    pub id: i64,
    pub locations: Vec<PathBuf>,
}

fn int_or_string<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(i64),
        Str(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Int(value) => Ok(value),
        Raw::Str(value) => value
            .trim()
            .parse()
            .map_err(|_| de::Error::custom(format!("invalid section key: {value:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sections_with_string_keys() {
        let body = r#"{
            "MediaContainer": {
                "Directory": [
                    {"key": "1", "Location": [{"path": "/media/Movies"}]},
                    {"key": 2, "Location": [{"path": "/media/TV"}, {"path": "/media/TV2"}]}
                ]
            }
        }"#;

        let parsed: SectionsResponse = serde_json::from_str(body).unwrap();
        let dirs = &parsed.media_container.directories;
        assert_eq!(dirs.len(), 2);
        assert_eq!(dirs[0].key, 1);
        assert_eq!(dirs[1].key, 2);
        assert_eq!(dirs[1].locations.len(), 2);
        assert_eq!(dirs[0].locations[0].path, PathBuf::from("/media/Movies"));
    }

    #[test]
    fn missing_locations_default_to_empty() {
        let body = r#"{"MediaContainer": {"Directory": [{"key": "3"}]}}"#;
        let parsed: SectionsResponse = serde_json::from_str(body).unwrap();
        assert!(parsed.media_container.directories[0].locations.is_empty());
    }
}
