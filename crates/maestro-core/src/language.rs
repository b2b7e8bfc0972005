//! Extension → language-id mapping.
//!
//! One fixed table shared by the upstream workspace walk (documents opened
//! at session start) and the LSP bridge (server selection by file type).

use std::path::Path;

/// Extension (without dot) → language id, as understood by language servers.
pub const LANGUAGE_IDS: &[(&str, &str)] = &[
    ("py", "python"),
    ("pyi", "python"),
    ("js", "javascript"),
    ("jsx", "javascriptreact"),
    ("ts", "typescript"),
    ("tsx", "typescriptreact"),
    ("go", "go"),
    ("rs", "rust"),
    ("java", "java"),
    ("rb", "ruby"),
    ("c", "c"),
    ("h", "c"),
    ("cpp", "cpp"),
    ("cxx", "cpp"),
    ("cc", "cpp"),
    ("hpp", "cpp"),
    ("cs", "csharp"),
    ("html", "html"),
    ("css", "css"),
    ("json", "json"),
    ("md", "markdown"),
    ("sh", "shellscript"),
    ("yaml", "yaml"),
    ("yml", "yaml"),
    ("xml", "xml"),
    ("sql", "sql"),
    ("toml", "toml"),
];

/// Language id for a file path, from its extension.
///
/// Returns `None` for unrecognised extensions.
#[must_use]
pub fn language_id_for_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    LANGUAGE_IDS
        .iter()
        .find(|(e, _)| *e == ext)
        .map(|(_, lang)| *lang)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn maps_common_extensions() {
        assert_eq!(
            language_id_for_path(&PathBuf::from("src/main.rs")),
            Some("rust")
        );
        assert_eq!(
            language_id_for_path(&PathBuf::from("app.PY")),
            Some("python")
        );
        assert_eq!(
            language_id_for_path(&PathBuf::from("a/b/component.tsx")),
            Some("typescriptreact")
        );
    }

    #[test]
    fn unknown_extension_is_none() {
        assert_eq!(language_id_for_path(&PathBuf::from("data.bin")), None);
        assert_eq!(language_id_for_path(&PathBuf::from("Makefile")), None);
    }
}
