//! Typed view of Playwright's `--reporter=json` output

use serde::Deserialize;

/// Root of a Playwright JSON report.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlaywrightReport {
    #[serde(default)]
    pub suites: Vec<ReportSuite>,
    /// Errors raised outside any test, e.g. a syntax error in a spec file.
    #[serde(default)]
    pub errors: Vec<ReportError>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReportSuite {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub file: String,
    #[serde(default)]
    pub specs: Vec<ReportSpec>,
    #[serde(default)]
    pub suites: Vec<ReportSuite>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReportSpec {
    pub title: String,
    #[serde(default)]
    pub ok: bool,
    #[serde(default)]
    pub file: String,
    #[serde(default)]
    pub tests: Vec<ReportTest>,
}

/// One project's execution of a spec.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportTest {
    #[serde(default)]
    pub project_name: String,
    #[serde(default)]
    pub results: Vec<ReportAttempt>,
}

/// One attempt. Retries produce more than one.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReportAttempt {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub duration: f64,
    #[serde(default)]
    pub retry: u32,
    #[serde(default)]
    pub errors: Vec<ReportError>,
    #[serde(default)]
    pub attachments: Vec<ReportAttachment>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReportError {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
}

impl ReportError {
    pub fn text(&self) -> Option<&str> {
        self.message
            .as_deref()
            .or(self.value.as_deref())
            .filter(|text| !text.trim().is_empty())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportAttachment {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub content_type: String,
    #[serde(default)]
    pub path: Option<String>,
}

impl ReportAttempt {
    pub fn passed(&self) -> bool {
        self.status == "passed"
    }

    pub fn duration_ms(&self) -> i64 {
        self.duration.max(0.0).round() as i64
    }

    /// All error messages of the attempt, one per line.
    pub fn error_text(&self) -> Option<String> {
        let parts: Vec<&str> = self.errors.iter().filter_map(ReportError::text).collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n"))
        }
    }

    pub fn video_path(&self) -> Option<&str> {
        self.attachments
            .iter()
            .find(|a| a.content_type == "video/webm")
            .and_then(|a| a.path.as_deref())
    }
}

/// Parse reporter output. Anything printed around the JSON document, such as
/// a web server's startup banner, is ignored.
pub fn parse_report(stdout: &str) -> Option<PlaywrightReport> {
    if let Ok(report) = serde_json::from_str(stdout.trim()) {
        return Some(report);
    }
    let start = stdout.find('{')?;
    let end = stdout.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&stdout[start..=end]).ok()
}

impl PlaywrightReport {
    fn specs(&self) -> Vec<(&ReportSpec, &str)> {
        fn walk<'a>(suite: &'a ReportSuite, out: &mut Vec<(&'a ReportSpec, &'a str)>) {
            for spec in &suite.specs {
                let file = if spec.file.is_empty() {
                    suite.file.as_str()
                } else {
                    spec.file.as_str()
                };
                out.push((spec, file));
            }
            for child in &suite.suites {
                walk(child, out);
            }
        }

        let mut out = Vec::new();
        for suite in &self.suites {
            walk(suite, &mut out);
        }
        out
    }

    /// The report entry titled `title` declared in `file`.
    ///
    /// Report paths are relative to Playwright's test dir, which need not be
    /// the discovery root, so files match on a path suffix. If no file
    /// matches, a title that is unique in the report is accepted.
    pub fn find_spec(&self, title: &str, file: &str) -> Option<&ReportSpec> {
        let titled: Vec<(&ReportSpec, &str)> = self
            .specs()
            .into_iter()
            .filter(|(spec, _)| spec.title == title)
            .collect();

        titled
            .iter()
            .find(|(_, spec_file)| same_file(spec_file, file))
            .or_else(|| if titled.len() == 1 { titled.first() } else { None })
            .map(|(spec, _)| *spec)
    }

    /// The final attempt of the first project that ran the test.
    pub fn find_attempt(&self, title: &str, file: &str) -> Option<&ReportAttempt> {
        self.find_spec(title, file)?
            .tests
            .iter()
            .find_map(|test| test.results.last())
    }

    /// Errors reported outside any test.
    pub fn global_error_text(&self) -> Option<String> {
        let parts: Vec<&str> = self.errors.iter().filter_map(ReportError::text).collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n"))
        }
    }
}

fn same_file(reported: &str, expected: &str) -> bool {
    let reported = reported.replace('\\', "/");
    let expected = expected.replace('\\', "/");
    if reported.is_empty() || expected.is_empty() {
        return false;
    }
    reported == expected
        || reported.ends_with(&format!("/{}", expected))
        || expected.ends_with(&format!("/{}", reported))
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPORT: &str = r#"{
      "config": {"version": "1.40.0"},
      "suites": [
        {
          "title": "shop/cart.spec.js",
          "file": "shop/cart.spec.js",
          "specs": [
            {
              "title": "adds an item",
              "ok": true,
              "file": "shop/cart.spec.js",
              "tests": [{
                "projectName": "chromium",
                "results": [{
                  "status": "passed",
                  "duration": 1234.6,
                  "retry": 0,
                  "errors": [],
                  "attachments": [
                    {"name": "video", "contentType": "video/webm", "path": "/tmp/out/video.webm"},
                    {"name": "trace", "contentType": "application/zip", "path": "/tmp/out/trace.zip"}
                  ]
                }]
              }]
            }
          ],
          "suites": [
            {
              "title": "checkout",
              "file": "shop/cart.spec.js",
              "specs": [{
                "title": "pays",
                "ok": false,
                "tests": [{
                  "projectName": "chromium",
                  "results": [
                    {"status": "failed", "duration": 10, "retry": 0,
                     "errors": [{"message": "first try"}]},
                    {"status": "failed", "duration": 20, "retry": 1,
                     "errors": [{"message": "Timeout 30000ms exceeded."}, {"value": "second"}]}
                  ]
                }]
              }]
            }
          ]
        },
        {
          "title": "home.spec.js",
          "file": "home.spec.js",
          "specs": [{"title": "adds an item", "ok": true, "file": "home.spec.js",
                     "tests": [{"results": [{"status": "passed", "duration": 5}]}]}]
        }
      ],
      "errors": []
    }"#;

    #[test]
    fn test_parse_report_with_noise() {
        let noisy = format!("[WebServer] listening on 3000\n{}\nDone\n", REPORT);
        let report = parse_report(&noisy).unwrap();
        assert_eq!(report.suites.len(), 2);
        assert!(parse_report("no json here").is_none());
        assert!(parse_report("} {").is_none());
    }

    #[test]
    fn test_find_attempt_by_title_and_file() {
        let report = parse_report(REPORT).unwrap();

        let cart = report.find_attempt("adds an item", "shop/cart.spec.js").unwrap();
        assert!(cart.passed());
        assert_eq!(cart.duration_ms(), 1235);
        assert_eq!(cart.video_path(), Some("/tmp/out/video.webm"));

        let home = report.find_attempt("adds an item", "home.spec.js").unwrap();
        assert_eq!(home.duration_ms(), 5);
        assert_eq!(home.video_path(), None);
    }

    #[test]
    fn test_nested_spec_inherits_suite_file_and_uses_last_attempt() {
        let report = parse_report(REPORT).unwrap();
        let attempt = report.find_attempt("pays", "tests/shop/cart.spec.js").unwrap();
        assert!(!attempt.passed());
        assert_eq!(attempt.retry, 1);
        assert_eq!(
            attempt.error_text().as_deref(),
            Some("Timeout 30000ms exceeded.\nsecond")
        );
    }

    #[test]
    fn test_ambiguous_title_without_file_match() {
        let report = parse_report(REPORT).unwrap();
        assert!(report.find_attempt("adds an item", "other.spec.js").is_none());
        // Unique title falls back even when the file path differs
        assert!(report.find_attempt("pays", "elsewhere.spec.js").is_some());
        assert!(report.find_attempt("missing", "home.spec.js").is_none());
    }

    #[test]
    fn test_global_errors() {
        let report = parse_report(
            r#"{"suites": [], "errors": [{"message": "SyntaxError: Unexpected token"}]}"#,
        )
        .unwrap();
        assert_eq!(
            report.global_error_text().as_deref(),
            Some("SyntaxError: Unexpected token")
        );
    }
}
