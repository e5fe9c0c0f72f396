//! Mapping remote audio URLs onto local cache paths

/// Whether a location names a remote resource
pub fn is_url(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}

/// djb2 string hash
pub fn djb2(input: &str) -> u32 {
    input
        .bytes()
        .fold(5381u32, |hash, b| hash.wrapping_mul(33).wrapping_add(b as u32))
}

/// Derive the storage path used to cache `url` under `audio_dir`.
///
/// The last path segment is kept (sanitized) when it carries an extension;
/// otherwise a hashed name is generated with `ext` or `mp3`.
pub fn local_audio_path(url: &str, ext: Option<&str>, audio_dir: &str) -> String {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    let without_scheme = without_query
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(without_query);

    // Only look at the path, never the host
    let segment = without_scheme
        .split_once('/')
        .map(|(_, path)| path.rsplit('/').next().unwrap_or(""))
        .unwrap_or("");

    let sanitized: String = segment
        .chars()
        .filter_map(|c| match c {
            ' ' => Some('_'),
            c if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') => Some(c),
            _ => None,
        })
        .collect();

    let has_extension = sanitized
        .rsplit_once('.')
        .map(|(stem, e)| !stem.is_empty() && !e.is_empty())
        .unwrap_or(false);

    let filename = if has_extension {
        sanitized
    } else {
        let ext = ext
            .map(|e| e.trim_start_matches('.'))
            .filter(|e| !e.is_empty())
            .unwrap_or("mp3");
        format!("audio_{:08x}.{}", djb2(url), ext)
    };

    let dir = audio_dir.trim_end_matches('/');
    if dir.is_empty() {
        filename
    } else {
        format!("{}/{}", dir, filename)
    }
}

/// File extension of a path or URL, lowercased, without the query string
pub fn extension_of(location: &str) -> Option<String> {
    let without_query = location.split(['?', '#']).next().unwrap_or(location);
    let name = without_query.rsplit('/').next().unwrap_or(without_query);
    name.rsplit_once('.')
        .filter(|(stem, e)| !stem.is_empty() && !e.is_empty())
        .map(|(_, e)| e.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keeps_named_segment() {
        assert_eq!(
            local_audio_path("http://example.com/clips/My Song.mp3?x=1", None, "audio"),
            "audio/My_Song.mp3"
        );
    }

    #[test]
    fn test_hashes_when_no_extension() {
        let url = "https://example.com/stream";
        let path = local_audio_path(url, Some("wav"), "audio/");
        assert_eq!(path, format!("audio/audio_{:08x}.wav", djb2(url)));

        let fallback = local_audio_path(url, None, "audio");
        assert!(fallback.ends_with(".mp3"));
    }

    #[test]
    fn test_host_is_not_a_filename() {
        let path = local_audio_path("http://example.com", None, "audio");
        assert!(path.starts_with("audio/audio_"));
    }

    #[test]
    fn test_djb2_known_value() {
        assert_eq!(djb2(""), 5381);
        assert_eq!(djb2("a"), 5381 * 33 + 97);
    }

    #[test]
    fn test_extension_of() {
        assert_eq!(extension_of("http://h/a/b.MP3?q=1").as_deref(), Some("mp3"));
        assert_eq!(extension_of("audio/clip.wav").as_deref(), Some("wav"));
        assert_eq!(extension_of("http://h/stream"), None);
    }
}
