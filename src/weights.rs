use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

const APP_DIR: &str = "aves-detect";

/// `<platform cache dir>/aves-detect/models`, falling back to `./models`.
pub fn cache_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|dir| dir.join(APP_DIR).join("models"))
        .unwrap_or_else(|| PathBuf::from("models"))
}

fn is_url(identifier: &str) -> bool {
    identifier.starts_with("http://") || identifier.starts_with("https://")
}

fn is_model_name(identifier: &str) -> bool {
    !identifier.is_empty()
        && identifier
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

fn file_name_from_url(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    match path.rsplit('/').next() {
        Some(name) if !name.is_empty() && !url_path(path).is_empty() => name.to_string(),
        _ => "model.onnx".to_string(),
    }
}

/// The part of `url` after `scheme://host`, without query or fragment.
fn url_path(url: &str) -> &str {
    let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
    rest.find('/').map_or("", |i| &rest[i..])
}

fn cache_segment(raw: &str) -> Option<String> {
    let segment: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') { c } else { '_' })
        .collect();
    match segment.as_str() {
        "" | "." | ".." => None,
        _ => Some(segment),
    }
}

/// Cache location of a downloaded URL: `<cache>/<host>/<path dirs>[/<query>]/<file name>`.
///
/// The host, every path directory and the query take part so that different URLs
/// sharing a file name never share a cache entry.
pub(crate) fn cache_path_for_url(cache: &Path, url: &str) -> PathBuf {
    let without_fragment = url.split('#').next().unwrap_or(url);
    let (location, query) = without_fragment
        .split_once('?')
        .unwrap_or((without_fragment, ""));
    let rest = location.split_once("://").map_or(location, |(_, rest)| rest);
    let host = rest.split('/').next().unwrap_or_default();
    let path = url_path(location);

    let mut dest = cache.join(cache_segment(host).unwrap_or_else(|| "_".to_string()));
    let dirs = path.rsplit_once('/').map_or("", |(dirs, _)| dirs);
    for segment in dirs.split('/').filter_map(cache_segment) {
        dest.push(segment);
    }
    if let Some(query) = cache_segment(query) {
        dest.push(query);
    }
    dest.join(file_name_from_url(location))
}

/// Resolves a weights identifier to a local `.onnx` file.
///
/// Accepts a path to an existing file, an http(s) URL (downloaded into the cache once)
/// or a bare model name looked up as `<name>.onnx` in `./models` and the cache.
pub fn resolve_weights(identifier: &str) -> Result<PathBuf> {
    resolve_in(identifier, &[PathBuf::from("models"), cache_dir()], &cache_dir())
}

pub(crate) fn resolve_in(identifier: &str, search: &[PathBuf], cache: &Path) -> Result<PathBuf> {
    let as_path = Path::new(identifier);
    if as_path.is_file() {
        return Ok(as_path.to_path_buf());
    }

    if is_url(identifier) {
        let dest = cache_path_for_url(cache, identifier);
        if dest.is_file() {
            tracing::debug!("using cached weights {}", dest.display());
            return Ok(dest);
        }
        download(identifier, &dest)?;
        return Ok(dest);
    }

    if is_model_name(identifier) {
        let file_name = if identifier.ends_with(".onnx") {
            identifier.to_string()
        } else {
            format!("{identifier}.onnx")
        };
        if let Some(found) = search.iter().map(|dir| dir.join(&file_name)).find(|p| p.is_file()) {
            return Ok(found);
        }
    }

    bail!(
        "cannot resolve model weights '{}': not a file, URL or known model in {:?}",
        identifier,
        search
    )
}

/// Downloads `url` to `dest` through a `.part` file renamed into place on success.
pub fn download(url: &str, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    tracing::info!("downloading {} -> {}", url, dest.display());
    let response = ureq::get(url)
        .call()
        .with_context(|| format!("failed to download {url}"))?;
    let bytes = write_atomically(&mut response.into_reader(), dest)
        .with_context(|| format!("failed while downloading {url}"))?;
    tracing::info!("downloaded {} bytes", bytes);
    Ok(())
}

/// Streams `reader` into `<dest>.part` and renames it to `dest`.
/// The partial file is removed on any failure.
fn write_atomically<R: Read + ?Sized>(reader: &mut R, dest: &Path) -> Result<u64> {
    let part = dest.with_extension("part");
    let result = copy_then_rename(reader, &part, dest);
    if result.is_err() && part.exists() {
        if let Err(e) = fs::remove_file(&part) {
            tracing::warn!("failed to remove {}: {}", part.display(), e);
        }
    }
    result
}

fn copy_then_rename<R: Read + ?Sized>(reader: &mut R, part: &Path, dest: &Path) -> Result<u64> {
    let mut writer = BufWriter::new(
        File::create(part).with_context(|| format!("failed to create {}", part.display()))?,
    );
    let bytes = io::copy(reader, &mut writer)?;
    writer.flush()?;
    drop(writer);
    fs::rename(part, dest).with_context(|| format!("failed to move weights to {}", dest.display()))?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn existing_path_is_used_as_is() {
        let dir = tempfile::tempdir().unwrap();
        let model = dir.path().join("custom.onnx");
        fs::write(&model, b"onnx").unwrap();
        let found = resolve_in(model.to_str().unwrap(), &[], dir.path()).unwrap();
        assert_eq!(found, model);
    }

    #[test]
    fn bare_name_is_searched_in_order() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        fs::write(second.path().join("yolov8n.onnx"), b"onnx").unwrap();
        let search = vec![first.path().to_path_buf(), second.path().to_path_buf()];

        let found = resolve_in("yolov8n", &search, first.path()).unwrap();
        assert_eq!(found, second.path().join("yolov8n.onnx"));

        fs::write(first.path().join("yolov8n.onnx"), b"onnx").unwrap();
        let found = resolve_in("yolov8n.onnx", &search, first.path()).unwrap();
        assert_eq!(found, first.path().join("yolov8n.onnx"));
    }

    #[test]
    fn cached_url_is_not_downloaded_again() {
        let cache = tempfile::tempdir().unwrap();
        let url = "https://example.invalid/models/birds.onnx?dl=1";
        let cached = cache.path().join("example.invalid/models/dl_1/birds.onnx");
        fs::create_dir_all(cached.parent().unwrap()).unwrap();
        fs::write(&cached, b"onnx").unwrap();
        let found = resolve_in(url, &[], cache.path()).unwrap();
        assert_eq!(found, cached);
    }

    #[test]
    fn urls_sharing_a_file_name_get_separate_cache_entries() {
        let cache = Path::new("/cache");
        let herons = cache_path_for_url(cache, "https://a.example.invalid/herons/best.onnx");
        let gulls = cache_path_for_url(cache, "https://b.example.invalid/gulls/best.onnx");
        let same_host = cache_path_for_url(cache, "https://a.example.invalid/gulls/best.onnx");
        let versioned = cache_path_for_url(cache, "https://a.example.invalid/herons/best.onnx?v=2");
        assert_eq!(herons, cache.join("a.example.invalid/herons/best.onnx"));
        assert_eq!(gulls, cache.join("b.example.invalid/gulls/best.onnx"));
        assert_ne!(herons, same_host);
        assert_ne!(herons, versioned);
        assert_eq!(herons.file_name().unwrap(), "best.onnx");
    }

    #[test]
    fn cache_path_stays_inside_cache() {
        let cache = Path::new("/cache");
        let path = cache_path_for_url(cache, "https://host.invalid/../../etc/x.onnx");
        assert_eq!(path, cache.join("host.invalid/etc/x.onnx"));
    }

    #[test]
    fn unknown_identifier_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = resolve_in("yolov99x", &[dir.path().to_path_buf()], dir.path()).unwrap_err();
        assert!(err.to_string().contains("yolov99x"));
        assert!(resolve_in("not a/model name", &[], dir.path()).is_err());
    }

    #[test]
    fn url_file_names() {
        assert_eq!(file_name_from_url("https://host/a/b/yolov8s.onnx"), "yolov8s.onnx");
        assert_eq!(file_name_from_url("https://host/a/"), "model.onnx");
        assert_eq!(file_name_from_url("https://host"), "model.onnx");
    }

    struct FailingReader;

    impl Read for FailingReader {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "connection reset"))
        }
    }

    #[test]
    fn interrupted_download_leaves_no_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("birds.onnx");
        assert!(write_atomically(&mut FailingReader, &dest).is_err());
        assert!(!dest.exists());
        assert!(!dir.path().join("birds.part").exists());
    }

    #[test]
    fn failed_rename_leaves_no_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        // a non-empty directory in the way of the final name
        let dest = dir.path().join("birds.onnx");
        fs::create_dir(&dest).unwrap();
        fs::write(dest.join("keep"), b"x").unwrap();

        assert!(write_atomically(&mut io::Cursor::new(b"onnx".to_vec()), &dest).is_err());
        assert!(!dir.path().join("birds.part").exists());
    }

    #[test]
    fn completed_download_is_renamed_into_place() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("birds.onnx");
        let bytes = write_atomically(&mut io::Cursor::new(b"onnx".to_vec()), &dest).unwrap();
        assert_eq!(bytes, 4);
        assert_eq!(fs::read(&dest).unwrap(), b"onnx");
        assert!(!dir.path().join("birds.part").exists());
    }
}
