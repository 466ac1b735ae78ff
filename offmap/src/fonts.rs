//! Pre-built glyph ranges.
//!
//! Fonts are stored as `<fonts dir>/<font name>/<start>-<end>.pbf`, one
//! directory per font, with each file covering 256 code points.

use std::io;
use std::path::PathBuf;

use tracing::debug;
use walkdir::WalkDir;

/// Number of code points in every glyph range file
pub const GLYPH_RANGE_SIZE: u32 = 256;

/// Largest code point of the Basic Multilingual Plane, the last range ends here
pub const MAX_CODEPOINT: u32 = 0xFFFF;

#[derive(thiserror::Error, Debug)]
pub enum FontError {
    #[error("Font {0} not found")]
    FontNotFound(String),

    #[error("Invalid font name '{0}'")]
    InvalidFontName(String),

    #[error("Invalid font range {0}-{1}: ranges start at a multiple of 256 and cover 256 code points")]
    InvalidFontRange(u32, u32),

    #[error("Unable to read {1}: {0}")]
    IoError(#[source] io::Error, PathBuf),
}

#[derive(Clone, Debug)]
pub struct FontStore {
    root: PathBuf,
}

impl FontStore {
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Names of all font directories, sorted
    #[must_use]
    pub fn font_names(&self) -> Vec<String> {
        WalkDir::new(&self.root)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_dir())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect()
    }

    /// Read the glyph range of the first font of a comma-separated stack that has it.
    pub async fn get_font_range(
        &self,
        fontstack: &str,
        start: u32,
        end: u32,
    ) -> Result<Vec<u8>, FontError> {
        if start % GLYPH_RANGE_SIZE != 0
            || start.checked_add(GLYPH_RANGE_SIZE - 1) != Some(end)
            || end > MAX_CODEPOINT
        {
            return Err(FontError::InvalidFontRange(start, end));
        }

        for name in fontstack.split(',').map(str::trim) {
            if !is_valid_font_name(name) {
                return Err(FontError::InvalidFontName(name.to_string()));
            }
            let path = self.root.join(name).join(format!("{start}-{end}.pbf"));
            match tokio::fs::read(&path).await {
                Ok(data) => return Ok(data),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    debug!("Glyph range {} does not exist", path.display());
                }
                Err(e) => return Err(FontError::IoError(e, path)),
            }
        }
        Err(FontError::FontNotFound(fontstack.to_string()))
    }
}

fn is_valid_font_name(name: &str) -> bool {
    !name.is_empty() && !name.starts_with('.') && !name.contains(['/', '\\'])
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn store() -> (tempfile::TempDir, FontStore) {
        let dir = tempfile::tempdir().unwrap();
        for (font, range, data) in [
            ("Noto Sans Regular", "0-255", b"noto-0".as_slice()),
            ("Noto Sans Regular", "256-511", b"noto-256"),
            ("Open Sans Bold", "256-511", b"open-256"),
        ] {
            let font_dir = dir.path().join(font);
            std::fs::create_dir_all(&font_dir).unwrap();
            std::fs::write(font_dir.join(format!("{range}.pbf")), data).unwrap();
        }
        let store = FontStore::new(dir.path().to_path_buf());
        (dir, store)
    }

    #[tokio::test]
    async fn reads_ranges() {
        let (_dir, store) = store();
        assert_eq!(
            store.font_names(),
            vec!["Noto Sans Regular".to_string(), "Open Sans Bold".to_string()]
        );
        let data = store.get_font_range("Noto Sans Regular", 0, 255).await.unwrap();
        assert_eq!(data, b"noto-0");
    }

    #[tokio::test]
    async fn first_font_of_a_stack_wins() {
        let (_dir, store) = store();
        let stack = "Open Sans Bold, Noto Sans Regular";
        let data = store.get_font_range(stack, 256, 511).await.unwrap();
        assert_eq!(data, b"open-256");
        let data = store.get_font_range(stack, 0, 255).await.unwrap();
        assert_eq!(data, b"noto-0");
        assert!(matches!(
            store.get_font_range(stack, 512, 767).await,
            Err(FontError::FontNotFound(_))
        ));
    }

    #[rstest]
    #[case(1, 256)]
    #[case(0, 511)]
    #[case(65536, 65791)]
    #[tokio::test]
    async fn invalid_ranges(#[case] start: u32, #[case] end: u32) {
        let (_dir, store) = store();
        assert!(matches!(
            store.get_font_range("Noto Sans Regular", start, end).await,
            Err(FontError::InvalidFontRange(..))
        ));
    }

    #[tokio::test]
    async fn names_cannot_escape_the_fonts_dir() {
        let (_dir, store) = store();
        assert!(matches!(
            store.get_font_range("../Noto Sans Regular", 0, 255).await,
            Err(FontError::InvalidFontName(_))
        ));
    }
}
