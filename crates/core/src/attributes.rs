//! Text model of the repository's LFS tracking manifest (the
//! `.gitattributes`-equivalent). The whole file is read, patched in memory,
//! and written back — the hosting protocol has no partial-line update.

/// Attribute suffix written for newly tracked paths.
const TRACK_ATTRS: &str = "filter=lfs diff=lfs merge=lfs -text";

/// Older trackers omitted `-text`; those lines must still be recognized for
/// removal and rename.
const TRACK_ATTRS_LEGACY: &str = "filter=lfs diff=lfs merge=lfs";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackingManifest {
    lines: Vec<String>,
}

impl TrackingManifest {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse manifest text. Every line is kept verbatim (including lines
    /// that are not LFS tracking rules) so a write-back only changes what a
    /// patch operation touched.
    pub fn parse(text: &str) -> Self {
        Self {
            lines: text.lines().map(str::to_string).collect(),
        }
    }

    pub fn to_text(&self) -> String {
        if self.lines.is_empty() {
            return String::new();
        }
        let mut out = self.lines.join("\n");
        out.push('\n');
        out
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn is_tracked(&self, path: &str) -> bool {
        self.lines.iter().any(|line| line_tracks(line, path))
    }

    /// Append a tracking line for `path` unless one already exists in either
    /// suffix variant. Returns whether the manifest changed.
    pub fn add_entry(&mut self, path: &str) -> bool {
        if self.is_tracked(path) {
            return false;
        }
        self.lines
            .push(format!("{} {TRACK_ATTRS}", escape_path(path)));
        true
    }

    /// Drop every tracking line (both suffix variants) for each given path.
    /// Returns whether the manifest changed.
    pub fn remove_entries(&mut self, paths: &[impl AsRef<str>]) -> bool {
        let before = self.lines.len();
        self.lines
            .retain(|line| !paths.iter().any(|p| line_tracks(line, p.as_ref())));
        self.lines.len() != before
    }

    /// Replace the path token of tracking lines in place for every
    /// `(old, new)` pair, in one pass over the manifest. Returns whether the
    /// manifest changed.
    pub fn rename_entries(&mut self, pairs: &[(String, String)]) -> bool {
        let mut changed = false;
        for line in &mut self.lines {
            for (old, new) in pairs {
                if line_tracks(line, old) {
                    let attrs = line
                        .trim()
                        .splitn(2, char::is_whitespace)
                        .nth(1)
                        .unwrap_or(TRACK_ATTRS)
                        .to_string();
                    *line = format!("{} {attrs}", escape_path(new));
                    changed = true;
                    break;
                }
            }
        }
        changed
    }
}

/// Does this manifest line declare LFS tracking for `path`?
///
/// The path token matches in raw or `[[:space:]]`-escaped form, and the
/// attribute suffix may be either variant.
fn line_tracks(line: &str, path: &str) -> bool {
    let trimmed = line.trim();
    let Some(token) = trimmed.split_whitespace().next() else {
        return false;
    };
    if token != path && token != escape_path(path) {
        return false;
    }
    let attrs = trimmed[token.len()..].trim();
    attrs == TRACK_ATTRS || attrs == TRACK_ATTRS_LEGACY
}

/// Git attribute syntax cannot carry a raw space in the path token.
fn escape_path(path: &str) -> String {
    path.replace(' ', "[[:space:]]")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_is_idempotent() {
        let mut manifest = TrackingManifest::empty();
        assert!(manifest.add_entry("assets/video.mp4"));
        assert!(!manifest.add_entry("assets/video.mp4"));
        assert_eq!(
            manifest.to_text(),
            "assets/video.mp4 filter=lfs diff=lfs merge=lfs -text\n"
        );
    }

    #[test]
    fn add_recognizes_legacy_suffix_as_already_tracked() {
        let mut manifest =
            TrackingManifest::parse("assets/video.mp4 filter=lfs diff=lfs merge=lfs\n");
        assert!(!manifest.add_entry("assets/video.mp4"));
    }

    #[test]
    fn remove_drops_both_variants() {
        let text = "a.bin filter=lfs diff=lfs merge=lfs -text\n\
                    a.bin filter=lfs diff=lfs merge=lfs\n\
                    b.bin filter=lfs diff=lfs merge=lfs -text\n";
        let mut manifest = TrackingManifest::parse(text);
        assert!(manifest.remove_entries(&["a.bin"]));
        assert_eq!(
            manifest.to_text(),
            "b.bin filter=lfs diff=lfs merge=lfs -text\n"
        );
    }

    #[test]
    fn remove_unknown_path_is_noop() {
        let mut manifest = TrackingManifest::parse("a.bin filter=lfs diff=lfs merge=lfs -text\n");
        assert!(!manifest.remove_entries(&["missing.bin"]));
    }

    #[test]
    fn rename_rewrites_both_variants_in_one_pass() {
        let text = "old.bin filter=lfs diff=lfs merge=lfs -text\n\
                    legacy.bin filter=lfs diff=lfs merge=lfs\n";
        let mut manifest = TrackingManifest::parse(text);
        let pairs = vec![
            ("old.bin".to_string(), "new.bin".to_string()),
            ("legacy.bin".to_string(), "renamed.bin".to_string()),
        ];
        assert!(manifest.rename_entries(&pairs));
        assert!(manifest.is_tracked("new.bin"));
        assert!(manifest.is_tracked("renamed.bin"));
        assert!(!manifest.is_tracked("old.bin"));
        assert!(!manifest.is_tracked("legacy.bin"));
        // The legacy suffix survives a rename untouched.
        assert!(
            manifest
                .to_text()
                .contains("renamed.bin filter=lfs diff=lfs merge=lfs\n")
        );
    }

    #[test]
    fn paths_with_spaces_are_escaped_and_matched() {
        let mut manifest = TrackingManifest::empty();
        assert!(manifest.add_entry("my file.bin"));
        assert_eq!(
            manifest.to_text(),
            "my[[:space:]]file.bin filter=lfs diff=lfs merge=lfs -text\n"
        );
        assert!(manifest.is_tracked("my file.bin"));
        assert!(manifest.remove_entries(&["my file.bin"]));
        assert!(manifest.is_empty());
    }

    #[test]
    fn unrelated_lines_survive_patching() {
        let text = "# comment\n*.png binary\nold.bin filter=lfs diff=lfs merge=lfs -text\n";
        let mut manifest = TrackingManifest::parse(text);
        manifest.remove_entries(&["old.bin"]);
        assert_eq!(manifest.to_text(), "# comment\n*.png binary\n");
    }
}
