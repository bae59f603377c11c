//! Format families, conversion targets, credit cost and heavy-job classification.

/// Group key used for files whose name carries no extension.
pub const UNKNOWN_FORMAT: &str = "_unknown_";

const IMAGE: &[&str] = &[
    "png", "jpg", "jpeg", "jp2", "webp", "bmp", "tif", "tiff", "gif", "ico", "heic", "avif",
    "psd", "svg", "eps",
];
const AUDIO: &[&str] = &[
    "mp3", "ogg", "opus", "wav", "flac", "wma", "oga", "m4a", "aac", "aiff", "amr",
];
const VIDEO: &[&str] = &[
    "mp4", "avi", "wmv", "mkv", "3gp", "mpg", "mpeg", "webm", "ts", "mov", "flv", "vob",
];
const EBOOK: &[&str] = &["epub", "mobi", "azw3", "fb2", "cbz", "cbr", "djvu"];
const DOCUMENT: &[&str] = &["doc", "docx", "odt", "rtf", "txt"];
const SHEET: &[&str] = &["xls", "xlsx", "ods"];
const SLIDES: &[&str] = &["ppt", "pptx", "pps", "ppsx", "odp"];

/// Coarse family a source format belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    Image,
    Audio,
    Video,
    Ebook,
    Document,
    Sheet,
    Slides,
    Pdf,
}

/// Lowercase, trimmed extension without a leading dot.
pub fn normalize(ext: &str) -> String {
    ext.trim().trim_start_matches('.').to_ascii_lowercase()
}

/// Extension of a file name (normalized), or an empty string when there is none.
pub fn extension_of(file_name: &str) -> String {
    match file_name.trim().rsplit_once('.') {
        Some((_, ext)) => normalize(ext),
        None => String::new(),
    }
}

/// Key under which the aggregator groups a file.
pub fn group_key(file_name: &str) -> String {
    let ext = extension_of(file_name);
    if ext.is_empty() {
        UNKNOWN_FORMAT.to_string()
    } else {
        ext
    }
}

pub fn family_of(ext: &str) -> Option<Family> {
    let ext = normalize(ext);
    let ext = ext.as_str();
    if IMAGE.contains(&ext) {
        Some(Family::Image)
    } else if AUDIO.contains(&ext) {
        Some(Family::Audio)
    } else if VIDEO.contains(&ext) {
        Some(Family::Video)
    } else if EBOOK.contains(&ext) {
        Some(Family::Ebook)
    } else if DOCUMENT.contains(&ext) {
        Some(Family::Document)
    } else if SHEET.contains(&ext) {
        Some(Family::Sheet)
    } else if SLIDES.contains(&ext) {
        Some(Family::Slides)
    } else if ext == "pdf" {
        Some(Family::Pdf)
    } else {
        None
    }
}

/// Conversion targets offered for a source extension, sorted, source excluded.
pub fn targets_for(source_ext: &str) -> Vec<String> {
    let source = normalize(source_ext);
    let Some(family) = family_of(&source) else {
        return Vec::new();
    };

    let mut targets: Vec<&str> = match family {
        Family::Image => IMAGE.to_vec(),
        Family::Audio => AUDIO.to_vec(),
        Family::Video => [VIDEO, AUDIO, &["gif"][..]].concat(),
        Family::Ebook => [EBOOK, &["pdf"][..]].concat(),
        Family::Document => [DOCUMENT, &["pdf"][..]].concat(),
        Family::Sheet => [SHEET, &["pdf"][..]].concat(),
        Family::Slides => [SLIDES, &["pdf"][..]].concat(),
        Family::Pdf => vec!["txt"],
    };
    targets.retain(|t| *t != source);
    targets.sort_unstable();
    targets.dedup();
    targets.into_iter().map(str::to_string).collect()
}

/// Whether a file of this extension can be offered a single target for a whole group.
pub fn supports_group_choice(ext: &str) -> bool {
    ext != UNKNOWN_FORMAT && !targets_for(ext).is_empty()
}

/// Credits charged for converting one file. Flat for every pair today.
pub fn credits_for(_source_ext: &str, _target_ext: &str, _file_size: i64) -> i64 {
    1
}

/// Heuristic heavy-job classification: video work or large inputs.
pub fn is_heavy(source_ext: &str, target_ext: &str, file_size: i64, heavy_size_bytes: u64) -> bool {
    if family_of(source_ext) == Some(Family::Video) || family_of(target_ext) == Some(Family::Video)
    {
        return true;
    }
    file_size > 0 && file_size as u64 >= heavy_size_bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_and_group_key() {
        assert_eq!(extension_of("Photo.JPG"), "jpg");
        assert_eq!(extension_of("archive.tar.gz"), "gz");
        assert_eq!(extension_of("README"), "");
        assert_eq!(group_key("README"), UNKNOWN_FORMAT);
        assert_eq!(group_key("clip.MOV"), "mov");
    }

    #[test]
    fn targets_exclude_source_and_are_sorted() {
        let t = targets_for("PNG");
        assert!(!t.contains(&"png".to_string()));
        assert!(t.contains(&"jpg".to_string()));
        let mut sorted = t.clone();
        sorted.sort();
        assert_eq!(t, sorted);

        assert_eq!(targets_for(".pdf"), vec!["txt".to_string()]);
        assert!(targets_for("xyz").is_empty());
    }

    #[test]
    fn video_targets_include_audio_and_gif() {
        let t = targets_for("mp4");
        assert!(t.contains(&"mp3".to_string()));
        assert!(t.contains(&"gif".to_string()));
        assert!(t.contains(&"webm".to_string()));
    }

    #[test]
    fn group_choice_requires_known_format() {
        assert!(supports_group_choice("jpg"));
        assert!(!supports_group_choice(UNKNOWN_FORMAT));
        assert!(!supports_group_choice("xyz"));
    }

    #[test]
    fn heavy_classification() {
        assert!(is_heavy("mp4", "mp3", 10, u64::MAX));
        assert!(is_heavy("png", "webm", 10, u64::MAX));
        assert!(!is_heavy("png", "jpg", 10, 1_000));
        assert!(is_heavy("png", "jpg", 1_000, 1_000));
        assert!(!is_heavy("docx", "pdf", 0, 0));
    }
}
