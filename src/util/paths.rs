use url::Url;

/// Fallback base name when a media URL has no usable path segment
const DEFAULT_BASENAME: &str = "episode";

/// Make a feed-supplied string safe to use as a single path component.
///
/// Path separators, NUL and control characters become `_`; surrounding
/// whitespace and trailing dots are trimmed. Names that would resolve to the
/// current or parent directory collapse to `_`.
pub fn sanitize_path_component(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '\0' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    let trimmed = replaced.trim().trim_end_matches('.').trim_end();
    if trimmed.is_empty() || trimmed == "." || trimmed == ".." {
        return "_".to_string();
    }
    trimmed.to_string()
}

/// Destination file name for a downloaded episode: `{id}_{basename}`.
///
/// The base name is the last non-empty path segment of the media URL, query
/// and fragment excluded. The id prefix keeps two episodes that share a base
/// name apart.
pub fn episode_file_name(episode_id: i64, media_url: &str) -> String {
    let basename = match Url::parse(media_url) {
        Ok(url) => url
            .path_segments()
            .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
            .map(str::to_string),
        Err(_) => media_url
            .split(|c: char| c == '?' || c == '#')
            .next()
            .and_then(|path| path.rsplit('/').find(|s| !s.is_empty()))
            .map(str::to_string),
    };

    let basename = basename
        .map(|b| sanitize_path_component(&b))
        .filter(|b| b != "_")
        .unwrap_or_else(|| DEFAULT_BASENAME.to_string());

    format!("{}_{}", episode_id, basename)
}
