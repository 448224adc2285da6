//! Extension → LSP language identifier table.

use std::collections::HashMap;
use std::path::Path;

/// Language identifier for extensions the table does not know.
pub const PLAINTEXT: &str = "plaintext";

const DEFAULT_LANGUAGES: &[(&str, &str)] = &[
    ("py", "python"),
    ("go", "go"),
    ("js", "javascript"),
    ("ts", "typescript"),
    ("tsx", "typescriptreact"),
    ("jsx", "javascriptreact"),
    ("rs", "rust"),
    ("c", "c"),
    ("h", "c"),
    ("cpp", "cpp"),
    ("cc", "cpp"),
    ("cxx", "cpp"),
    ("hpp", "cpp"),
    ("java", "java"),
    ("rb", "ruby"),
    ("json", "json"),
    ("yaml", "yaml"),
    ("yml", "yaml"),
    ("md", "markdown"),
    ("html", "html"),
    ("css", "css"),
    ("sh", "shellscript"),
];

/// Immutable extension → language-id mapping, built once and handed to the client.
#[derive(Debug, Clone)]
pub struct LanguageTable {
    by_extension: HashMap<String, String>,
}

impl Default for LanguageTable {
    fn default() -> Self {
        Self {
            by_extension: DEFAULT_LANGUAGES
                .iter()
                .map(|(ext, id)| ((*ext).to_string(), (*id).to_string()))
                .collect(),
        }
    }
}

impl LanguageTable {
    /// The default table with `overrides` layered on top.
    ///
    /// Override keys may be written with or without a leading dot.
    #[must_use]
    pub fn with_overrides(overrides: &HashMap<String, String>) -> Self {
        let mut table = Self::default();
        for (ext, id) in overrides {
            let ext = ext.trim_start_matches('.').to_ascii_lowercase();
            table.by_extension.insert(ext, id.clone());
        }
        table
    }

    /// Language id for `path`, matched case-insensitively on its extension.
    #[must_use]
    pub fn language_id(&self, path: &Path) -> &str {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| self.by_extension.get(&ext.to_ascii_lowercase()))
            .map_or(PLAINTEXT, String::as_str)
    }
}
