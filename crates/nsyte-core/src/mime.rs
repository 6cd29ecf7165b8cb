//! Extension-based mime detection for the reconciler: "a contract, not a suggestion" — the table below and
//! its test are kept in lockstep.

const DEFAULT_MIME: &str = "application/octet-stream";

const TABLE: &[(&str, &str)] = &[
    ("html", "text/html"),
    ("htm", "text/html"),
    ("css", "text/css"),
    ("js", "text/javascript"),
    ("mjs", "text/javascript"),
    ("json", "application/json"),
    ("xml", "application/xml"),
    ("txt", "text/plain"),
    ("md", "text/markdown"),
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("gif", "image/gif"),
    ("webp", "image/webp"),
    ("svg", "image/svg+xml"),
    ("ico", "image/x-icon"),
    ("avif", "image/avif"),
    ("woff", "font/woff"),
    ("woff2", "font/woff2"),
    ("ttf", "font/ttf"),
    ("otf", "font/otf"),
    ("eot", "application/vnd.ms-fontobject"),
    ("mp3", "audio/mpeg"),
    ("wav", "audio/wav"),
    ("ogg", "audio/ogg"),
    ("mp4", "video/mp4"),
    ("webm", "video/webm"),
    ("pdf", "application/pdf"),
    ("wasm", "application/wasm"),
    ("zip", "application/zip"),
    ("gz", "application/gzip"),
];

/// Looks up the mime type for `path` by its extension (case-sensitive,
/// matching the table above). Defaults to `application/octet-stream`
/// for an unknown or missing extension.
pub fn mime_for_path(path: &str) -> &'static str {
    let Some(ext) = path.rsplit('.').next().filter(|e| *e != path) else {
        return DEFAULT_MIME;
    };
    TABLE
        .iter()
        .find(|(candidate, _)| *candidate == ext)
        .map(|(_, mime)| *mime)
        .unwrap_or(DEFAULT_MIME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_table_entry_resolves_to_its_own_mime() {
        let expected: &[(&str, &str)] = &[
            ("/index.html", "text/html"),
            ("/about.htm", "text/html"),
            ("/styles/main.css", "text/css"),
            ("/app.js", "text/javascript"),
            ("/module.mjs", "text/javascript"),
            ("/data.json", "application/json"),
            ("/feed.xml", "application/xml"),
            ("/readme.txt", "text/plain"),
            ("/notes.md", "text/markdown"),
            ("/logo.png", "image/png"),
            ("/photo.jpg", "image/jpeg"),
            ("/photo.jpeg", "image/jpeg"),
            ("/anim.gif", "image/gif"),
            ("/hero.webp", "image/webp"),
            ("/icon.svg", "image/svg+xml"),
            ("/favicon.ico", "image/x-icon"),
            ("/hero.avif", "image/avif"),
            ("/font.woff", "font/woff"),
            ("/font.woff2", "font/woff2"),
            ("/font.ttf", "font/ttf"),
            ("/font.otf", "font/otf"),
            ("/font.eot", "application/vnd.ms-fontobject"),
            ("/track.mp3", "audio/mpeg"),
            ("/track.wav", "audio/wav"),
            ("/track.ogg", "audio/ogg"),
            ("/clip.mp4", "video/mp4"),
            ("/clip.webm", "video/webm"),
            ("/doc.pdf", "application/pdf"),
            ("/module.wasm", "application/wasm"),
            ("/archive.zip", "application/zip"),
            ("/archive.tar.gz", "application/gzip"),
        ];

        for (path, mime) in expected {
            assert_eq!(mime_for_path(path), *mime, "mismatch for {path}");
        }
    }

    #[test]
    fn unknown_extension_defaults_to_octet_stream() {
        assert_eq!(mime_for_path("/binary.bin"), DEFAULT_MIME);
    }

    #[test]
    fn missing_extension_defaults_to_octet_stream() {
        assert_eq!(mime_for_path("/Makefile"), DEFAULT_MIME);
        assert_eq!(mime_for_path("/"), DEFAULT_MIME);
    }
}
