//! Lexical discovery of Playwright tests on disk
//!
//! Test files are never executed or parsed as JavaScript. Each file ending in
//! the configured suffix is scanned for `test('<title>', ...)` declarations.

use crate::types::{DiscoveredTest, TestRef};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

/// Suffix of the files treated as test files.
pub const DEFAULT_TEST_SUFFIX: &str = ".spec.js";

/// `test(` followed by a single-, double- or backtick-quoted title and a comma.
static TEST_DECLARATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\btest\s*\(\s*(?:'([^'\n]*)'|"([^"\n]*)"|`([^`]*)`)\s*,"#)
        .expect("test declaration pattern is valid")
});

/// Extract the titles declared in one test file, in source order.
pub fn scan_declarations(source: &str) -> Vec<String> {
    TEST_DECLARATION
        .captures_iter(source)
        .filter_map(|caps| {
            caps.get(1)
                .or_else(|| caps.get(2))
                .or_else(|| caps.get(3))
                .map(|m| m.as_str().to_string())
        })
        .collect()
}

/// Filesystem scanner for test declarations.
#[derive(Debug, Clone)]
pub struct TestDiscovery {
    suffix: String,
}

impl Default for TestDiscovery {
    fn default() -> Self {
        Self::new(DEFAULT_TEST_SUFFIX)
    }
}

impl TestDiscovery {
    pub fn new(suffix: impl Into<String>) -> Self {
        Self {
            suffix: suffix.into(),
        }
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    /// Walk `root` and return every declared test.
    ///
    /// With `folder` set, only the top-level directory of that name is
    /// walked. Files are visited in name order so the result is stable.
    /// A missing root yields an empty list; unreadable entries are skipped.
    pub fn discover(&self, root: &Path, folder: Option<&str>) -> Vec<DiscoveredTest> {
        if !root.is_dir() {
            debug!("Tests root {:?} does not exist, nothing to discover", root);
            return Vec::new();
        }

        let walker = WalkDir::new(root)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| keep_entry(entry, folder));

        let mut tests = Vec::new();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable entry under {:?}: {}", root, e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let file_name = entry.file_name().to_string_lossy();
            if !file_name.ends_with(&self.suffix) {
                continue;
            }

            let source = match std::fs::read_to_string(entry.path()) {
                Ok(source) => source,
                Err(e) => {
                    warn!("Skipping unreadable test file {:?}: {}", entry.path(), e);
                    continue;
                }
            };

            let Some(relative) = relative_path(root, entry.path()) else {
                continue;
            };
            let folder_path = self.folder_of(&relative);
            for test_name in scan_declarations(&source) {
                tests.push(DiscoveredTest {
                    test_name,
                    test_file: relative.clone(),
                    folder_path: folder_path.clone(),
                });
            }
        }

        debug!("Discovered {} tests under {:?}", tests.len(), root);
        tests
    }

    /// First path component, or the file name minus the test suffix for
    /// files directly under the root.
    fn folder_of(&self, relative: &str) -> String {
        match relative.split_once('/') {
            Some((first, _)) => first.to_string(),
            None => relative
                .strip_suffix(&self.suffix)
                .unwrap_or(relative)
                .to_string(),
        }
    }
}

fn keep_entry(entry: &DirEntry, folder: Option<&str>) -> bool {
    match folder {
        Some(folder) if entry.depth() == 1 => {
            entry.file_type().is_dir() && entry.file_name().to_string_lossy() == folder
        }
        _ => true,
    }
}

fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(parts.join("/"))
}

/// Keep the discovered tests whose `(test_name, test_file)` appears in the
/// selection. Discovery order is preserved.
pub fn select_tests(discovered: Vec<DiscoveredTest>, selection: &[TestRef]) -> Vec<DiscoveredTest> {
    discovered
        .into_iter()
        .filter(|test| selection.iter().any(|selected| test.matches(selected)))
        .collect()
}

/// Tests grouped under one top-level folder, for selection screens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCategory {
    pub name: String,
    pub display_name: String,
    pub tests: Vec<DiscoveredTest>,
}

/// Group tests by `folder_path`, categories sorted by name.
pub fn group_by_folder(tests: Vec<DiscoveredTest>) -> Vec<TestCategory> {
    let mut groups: BTreeMap<String, Vec<DiscoveredTest>> = BTreeMap::new();
    for test in tests {
        groups.entry(test.folder_path.clone()).or_default().push(test);
    }
    groups
        .into_iter()
        .map(|(name, tests)| TestCategory {
            display_name: display_name(&name),
            name,
            tests,
        })
        .collect()
}

/// `the-furniture-store` -> `The Furniture Store`
pub fn display_name(folder: &str) -> String {
    folder
        .split(['-', '_'])
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, body: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, body).unwrap();
    }

    fn fixture() -> TempDir {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "shop/cart.spec.js",
            "test('adds item', async ({ page }) => {});\ntest(\"removes item\", async () => {});",
        );
        write(
            dir.path(),
            "shop/nested/checkout.spec.js",
            "test(`pays by card`, async () => {});",
        );
        write(dir.path(), "auth/login.spec.js", "test('logs in', async () => {});");
        write(dir.path(), "smoke.spec.js", "test('home loads', async () => {});");
        write(dir.path(), "shop/helpers.js", "test('not a test file', () => {});");
        dir
    }

    #[test]
    fn test_scan_declarations_quote_styles() {
        let source = r#"
            test.describe('group', () => {
              test('single', async () => {});
              test( "double" , async () => {});
              test(`backtick`, async () => {});
              test.skip('skipped', async () => {});
              contest('not a test', () => {});
            });
        "#;
        assert_eq!(scan_declarations(source), vec!["single", "double", "backtick"]);
    }

    #[test]
    fn test_scan_requires_comma_after_title() {
        assert!(scan_declarations("test('dangling')").is_empty());
    }

    #[test]
    fn test_discover_whole_tree() {
        let dir = fixture();
        let tests = TestDiscovery::default().discover(dir.path(), None);

        let pairs: Vec<(&str, &str, &str)> = tests
            .iter()
            .map(|t| (t.test_name.as_str(), t.test_file.as_str(), t.folder_path.as_str()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("logs in", "auth/login.spec.js", "auth"),
                ("adds item", "shop/cart.spec.js", "shop"),
                ("removes item", "shop/cart.spec.js", "shop"),
                ("pays by card", "shop/nested/checkout.spec.js", "shop"),
                ("home loads", "smoke.spec.js", "smoke"),
            ]
        );
    }

    #[test]
    fn test_discover_with_folder_filter() {
        let dir = fixture();
        let tests = TestDiscovery::default().discover(dir.path(), Some("shop"));
        assert_eq!(tests.len(), 3);
        assert!(tests.iter().all(|t| t.folder_path == "shop"));
        assert!(tests.iter().all(|t| t.test_file.starts_with("shop/")));
    }

    #[test]
    fn test_discover_missing_root_or_folder() {
        let dir = fixture();
        let discovery = TestDiscovery::default();
        assert!(discovery
            .discover(&dir.path().join("nope"), None)
            .is_empty());
        assert!(discovery.discover(dir.path(), Some("missing")).is_empty());
    }

    #[test]
    fn test_custom_suffix() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "a/one.test.ts", "test('typed', async () => {});");
        write(dir.path(), "a/two.spec.js", "test('plain', async () => {});");
        let tests = TestDiscovery::new(".test.ts").discover(dir.path(), None);
        assert_eq!(tests.len(), 1);
        assert_eq!(tests[0].test_name, "typed");
    }

    #[test]
    fn test_select_tests_uses_name_and_file() {
        let dir = fixture();
        let discovered = TestDiscovery::default().discover(dir.path(), None);
        let selection = vec![
            TestRef::new("adds item", "shop/cart.spec.js"),
            TestRef::new("logs in", "shop/cart.spec.js"),
        ];
        let selected = select_tests(discovered, &selection);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].test_name, "adds item");
    }

    #[test]
    fn test_group_by_folder() {
        let dir = fixture();
        let categories = group_by_folder(TestDiscovery::default().discover(dir.path(), None));
        let names: Vec<_> = categories.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["auth", "shop", "smoke"]);
        assert_eq!(categories[1].tests.len(), 3);
    }

    #[test]
    fn test_display_name() {
        assert_eq!(display_name("the-furniture-store"), "The Furniture Store");
        assert_eq!(display_name("auth"), "Auth");
        assert_eq!(display_name("snake_case-mix"), "Snake Case Mix");
    }
}
