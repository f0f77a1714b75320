//! Extension-based categorization for `organize`.
//!
//! A [`CategoryMap`] is an immutable value built once from configuration and
//! handed to the classifier. Lookups are case-insensitive and the longest
//! matching suffix wins, so `.tar.gz` is consulted before `.gz`.
//!
//! # Examples
//!
//! ```
//! use tidykit::category::CategoryMap;
//!
//! let map = CategoryMap::standard();
//! assert_eq!(map.category_for("Report.PDF"), "Documents");
//! assert_eq!(map.category_for("backup.tar.gz"), "Archives");
//! assert_eq!(map.category_for("notes.xyz"), "Other");
//! ```

use std::path::Path;

/// Category used for files whose extension is not mapped.
pub const DEFAULT_CATEGORY: &str = "Other";

/// Multi-part suffixes treated as a single extension.
const MULTI_PART_SUFFIXES: &[&str] = &[".tar.gz", ".tar.bz2", ".tar.xz", ".tar.zst"];

/// Returns the normalized extension of a file name: lowercase, with its
/// leading dot, multi-part suffixes kept whole.
///
/// ```
/// use tidykit::category::file_extension;
///
/// assert_eq!(file_extension("Photo.JPG").as_deref(), Some(".jpg"));
/// assert_eq!(file_extension("site.TAR.GZ").as_deref(), Some(".tar.gz"));
/// assert_eq!(file_extension(".bashrc"), None);
/// assert_eq!(file_extension("Makefile"), None);
/// ```
pub fn file_extension(file_name: &str) -> Option<String> {
    let lower = file_name.to_lowercase();
    if let Some(suffix) = MULTI_PART_SUFFIXES
        .iter()
        .find(|suffix| lower.len() > suffix.len() && lower.ends_with(*suffix))
    {
        return Some((*suffix).to_string());
    }

    Path::new(&lower)
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
}

/// Maps extension suffixes to category directory names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryMap {
    /// `(suffix, category)`, longest suffix first.
    entries: Vec<(String, String)>,
    default_category: String,
}

impl CategoryMap {
    /// A map with no entries; everything resolves to `default_category`.
    pub fn empty(default_category: &str) -> Self {
        Self {
            entries: Vec::new(),
            default_category: default_category.to_string(),
        }
    }

    /// The built-in mapping.
    pub fn standard() -> Self {
        let mut map = Self::empty(DEFAULT_CATEGORY);
        for (ext, category) in [
            (".pdf", "Documents"),
            (".docx", "Documents"),
            (".md", "Documents"),
            (".jpg", "Images"),
            (".jpeg", "Images"),
            (".png", "Images"),
            (".webp", "Images"),
            (".zip", "Archives"),
            (".tar.gz", "Archives"),
            (".mp4", "Videos"),
            (".mov", "Videos"),
            (".mp3", "Music"),
            (".iso", "OS_Images"),
            (".dmg", "OS_Images"),
        ] {
            map.insert(ext, category);
        }
        map
    }

    /// Replaces the fallback category.
    pub fn with_default(mut self, default_category: &str) -> Self {
        self.default_category = default_category.to_string();
        self
    }

    /// Adds or replaces a mapping. The suffix may be given with or without
    /// its leading dot and in any case.
    pub fn insert(&mut self, suffix: &str, category: &str) {
        let suffix = format!(".{}", suffix.trim_start_matches('.').to_lowercase());
        self.entries.retain(|(existing, _)| *existing != suffix);
        self.entries.push((suffix, category.to_string()));
        self.entries
            .sort_by(|(a, _), (b, _)| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
    }

    /// Returns the longest mapped suffix of `file_name` and its category.
    pub fn lookup(&self, file_name: &str) -> Option<(&str, &str)> {
        let lower = file_name.to_lowercase();
        self.entries
            .iter()
            .find(|(suffix, _)| lower.len() > suffix.len() && lower.ends_with(suffix.as_str()))
            .map(|(suffix, category)| (suffix.as_str(), category.as_str()))
    }

    /// Category directory for `file_name`, falling back to the default.
    pub fn category_for(&self, file_name: &str) -> &str {
        self.lookup(file_name)
            .map(|(_, category)| category)
            .unwrap_or(&self.default_category)
    }

    pub fn default_category(&self) -> &str {
        &self.default_category
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for CategoryMap {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_is_case_insensitive() {
        let map = CategoryMap::standard();
        assert_eq!(map.category_for("photo.PNG"), "Images");
        assert_eq!(map.category_for("Photo.Jpeg"), "Images");
    }

    #[test]
    fn test_longest_suffix_wins() {
        let mut map = CategoryMap::empty("Other");
        map.insert(".gz", "Compressed");
        map.insert(".tar.gz", "Tarballs");

        assert_eq!(map.category_for("site.tar.gz"), "Tarballs");
        assert_eq!(map.category_for("log.gz"), "Compressed");
        assert_eq!(map.lookup("site.tar.gz"), Some((".tar.gz", "Tarballs")));
    }

    #[test]
    fn test_unmapped_resolves_to_default() {
        let map = CategoryMap::standard().with_default("Misc");
        assert_eq!(map.category_for("data.bin"), "Misc");
        assert_eq!(map.category_for("README"), "Misc");
    }

    #[test]
    fn test_bare_suffix_is_not_a_match() {
        // A file literally named ".pdf" has no extension.
        let map = CategoryMap::standard();
        assert_eq!(map.category_for(".pdf"), "Other");
    }

    #[test]
    fn test_insert_normalizes_and_replaces() {
        let mut map = CategoryMap::empty("Other");
        map.insert("PDF", "Papers");
        map.insert(".pdf", "Documents");
        assert_eq!(map.len(), 1);
        assert_eq!(map.category_for("x.pdf"), "Documents");
    }

    #[test]
    fn test_file_extension_multi_part() {
        assert_eq!(file_extension("a.tar.bz2").as_deref(), Some(".tar.bz2"));
        assert_eq!(file_extension("a.gz").as_deref(), Some(".gz"));
        assert_eq!(file_extension(".tar.gz").as_deref(), Some(".gz"));
    }
}
