//! Chunk file naming.

use url::Url;

/// File name a chunk is saved under inside the output directory
///
/// With `ascending` the name is the zero-padded index plus the URL's
/// extension (`00000042.ts`). Otherwise it is the last segment of the URL
/// path, falling back to the ascending form when the path has none.
pub fn chunk_filename(url: &str, index: usize, ascending: bool) -> String {
    if !ascending
        && let Some(name) = last_path_segment(url)
    {
        return name;
    }
    match url_extension(url) {
        Some(ext) => format!("{index:08}.{ext}"),
        None => format!("{index:08}"),
    }
}

/// Extension of the URL path's last segment, without the dot
///
/// Query strings and fragments are ignored.
pub fn url_extension(url: &str) -> Option<String> {
    let name = last_path_segment(url)?;
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_string())
}

fn last_path_segment(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let segment = parsed.path_segments()?.next_back()?;
    if segment.is_empty() {
        return None;
    }
    Some(segment.to_string())
}
