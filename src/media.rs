pub const MEDIA_EXTENSIONS: &[&str] = &[
    ".mp4", ".mkv", ".ts", ".iso", ".rmvb", ".avi", ".mov", ".mpeg", ".mpg",
    ".wmv", ".3gp", ".asf", ".m4v", ".flv", ".m2ts", ".strm", ".tp", ".f4v",
];

/// Case-insensitive check of the final extension against [`MEDIA_EXTENSIONS`].
pub fn is_media_file(name: &str) -> bool {
    let lower = name.to_lowercase();
    let filename = lower.rsplit('/').next().unwrap_or(&lower);
    match filename.rfind('.') {
        // A leading dot is a hidden file, not an extension.
        Some(0) | None => false,
        Some(idx) => MEDIA_EXTENSIONS.contains(&&filename[idx..]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_media_extensions_in_any_case() {
        assert!(is_media_file("Show.S01E01.mkv"));
        assert!(is_media_file("MOVIE.MP4"));
        assert!(is_media_file("/remote/dir/clip.M2TS"));
    }

    #[test]
    fn rejects_other_files() {
        assert!(!is_media_file("Show.S01E01.nfo"));
        assert!(!is_media_file("poster.jpg"));
        assert!(!is_media_file("subs.ass"));
        assert!(!is_media_file("README"));
        assert!(!is_media_file(".mkv"));
    }

    #[test]
    fn only_the_last_extension_counts() {
        assert!(!is_media_file("archive.mkv.rar"));
        assert!(is_media_file("weird.name.with.dots.avi"));
    }
}
