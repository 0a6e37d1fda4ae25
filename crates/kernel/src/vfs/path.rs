// kernel/src/vfs/path.rs
//! Path normalization
//!
//! An absolute path has the form `LABEL:\comp1\comp2\name`; `/` is accepted
//! and unified to `\`. A normalized path keeps the mount label, the
//! directory components, the final name, and the rebuilt absolute string
//! used as the open-file table key.

use vesta_os_abi::{KernelError, Result};

/// Path separator used on the wire and in normalized form.
pub const SEPARATOR: char = '\\';

/// A normalized path: `(mount, directory components, final name)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Path {
    mount: String,
    components: Vec<String>,
    file: String,
    absolute: String,
}

impl Path {
    /// Normalize `raw` against the caller's working directory.
    ///
    /// Rules: separators unified, empty components and `.` removed, `..`
    /// pops the previous component and is absorbed at the root. Inputs
    /// without a mount prefix are resolved against `working_dir`.
    ///
    /// # Errors
    ///
    /// `FileNotFound` for unparseable input (empty label, missing working
    /// directory for a relative path); malformed and missing paths are
    /// deliberately not distinguished.
    pub fn normalize(raw: &str, working_dir: Option<&str>) -> Result<Self> {
        let unified: String = raw.replace('/', "\\");

        let full = match unified.find(':') {
            Some(_) => unified,
            None => {
                let base = working_dir.ok_or(KernelError::FileNotFound)?;
                let mut joined = base.replace('/', "\\");
                joined.push(SEPARATOR);
                joined.push_str(&unified);
                joined
            }
        };

        let colon = full.find(':').ok_or(KernelError::FileNotFound)?;
        let mount = full[..colon].to_string();
        if mount.is_empty() || mount.contains(SEPARATOR) {
            return Err(KernelError::FileNotFound);
        }

        let mut parts: Vec<String> = Vec::new();
        for component in full[colon + 1..].split(SEPARATOR) {
            match component {
                "" | "." => {}
                ".." => {
                    // Popping past the root is absorbed.
                    parts.pop();
                }
                name => parts.push(name.to_string()),
            }
        }

        let file = parts.pop().unwrap_or_default();
        Ok(Self::assemble(mount, parts, file))
    }

    fn assemble(mount: String, components: Vec<String>, file: String) -> Self {
        let mut absolute = format!("{mount}:{SEPARATOR}");
        for component in &components {
            absolute.push_str(component);
            absolute.push(SEPARATOR);
        }
        absolute.push_str(&file);
        Self {
            mount,
            components,
            file,
            absolute,
        }
    }

    /// Mount label.
    #[must_use]
    pub fn mount(&self) -> &str {
        &self.mount
    }

    /// Directory components between the mount root and the final name.
    #[must_use]
    pub fn components(&self) -> &[String] {
        &self.components
    }

    /// Final path component; empty for the mount root.
    #[must_use]
    pub fn file_name(&self) -> &str {
        &self.file
    }

    /// The rebuilt absolute form, e.g. `C:\a\b.txt`.
    #[must_use]
    pub fn absolute(&self) -> &str {
        &self.absolute
    }

    /// Whether this path names the mount root.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.file.is_empty() && self.components.is_empty()
    }

    /// Path of the containing directory; the root is its own parent.
    #[must_use]
    pub fn parent(&self) -> Self {
        let mut components = self.components.clone();
        let file = components.pop().unwrap_or_default();
        Self::assemble(self.mount.clone(), components, file)
    }
}

impl core::fmt::Display for Path {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.absolute)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absolute_path() {
        let path = Path::normalize("C:\\a\\b\\c.txt", None).unwrap();
        assert_eq!(path.mount(), "C");
        assert_eq!(path.components(), ["a", "b"]);
        assert_eq!(path.file_name(), "c.txt");
        assert_eq!(path.absolute(), "C:\\a\\b\\c.txt");
    }

    #[test]
    fn test_forward_slashes_unified() {
        let path = Path::normalize("C:/a/b.txt", None).unwrap();
        assert_eq!(path.absolute(), "C:\\a\\b.txt");
    }

    #[test]
    fn test_relative_resolved_against_working_dir() {
        let path = Path::normalize("sub\\f.txt", Some("C:\\home")).unwrap();
        assert_eq!(path.absolute(), "C:\\home\\sub\\f.txt");
    }

    #[test]
    fn test_relative_without_working_dir_fails() {
        assert_eq!(
            Path::normalize("f.txt", None),
            Err(KernelError::FileNotFound)
        );
    }

    #[test]
    fn test_dot_and_empty_components_removed() {
        let path = Path::normalize("C:\\a\\.\\\\b\\.", None).unwrap();
        assert_eq!(path.absolute(), "C:\\a\\b");
    }

    #[test]
    fn test_dotdot_pops() {
        let path = Path::normalize("C:\\a\\b\\..\\c", None).unwrap();
        assert_eq!(path.absolute(), "C:\\a\\c");
    }

    #[test]
    fn test_dotdot_absorbed_at_root() {
        let path = Path::normalize("C:\\..\\..\\x", None).unwrap();
        assert_eq!(path.absolute(), "C:\\x");
    }

    #[test]
    fn test_root_path() {
        let path = Path::normalize("C:\\", None).unwrap();
        assert!(path.is_root());
        assert_eq!(path.file_name(), "");
        assert_eq!(path.absolute(), "C:\\");
    }

    #[test]
    fn test_parent_of_nested() {
        let path = Path::normalize("C:\\a\\b\\c.txt", None).unwrap();
        let parent = path.parent();
        assert_eq!(parent.absolute(), "C:\\a\\b");
        assert!(path.parent().parent().parent().is_root());
    }

    #[test]
    fn test_empty_label_rejected() {
        assert_eq!(
            Path::normalize(":\\a", None),
            Err(KernelError::FileNotFound)
        );
    }
}
