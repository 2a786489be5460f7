//! Changelog parsing
//!
//! Turns a free-form, newest-first changelog into per-version release notes.
//! A version section starts at an H1/H2 heading such as
//!
//! ```text
//! ## 4.2.1 - 2024-03-05 [critical]
//! ## [v1.0.0](https://example.com/compare/v0.9.0...v1.0.0) - 2021.01.01
//! ## Release 2.0.0.1 - 2022-05-06
//! ```
//!
//! and runs until the next heading. Bodies are rendered from Markdown,
//! sanitized, and `{note}` / `**Note**` style blockquotes become callouts.

use std::collections::HashSet;
use std::sync::LazyLock;

use chrono::NaiveDate;
use indexmap::IndexMap;
use pulldown_cmark::{Options, Parser, html};
use regex::{Captures, Regex};
use tracing::{debug, warn};

use crate::store::ReleaseNotes;
use crate::version::NormalizedVersion;

static HEADING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^#{1,2} (?:.*? )?\[?v?(\d+\.\d+\.\d+(?:\.\d+)?(?:-[0-9a-z.-]+)?)\]?(?:\(.*?\)|\[.*?\])? +[-–] +(\d{4}[-.]\d\d?[-.]\d\d?)(?: +(\[critical\]))?",
    )
    .expect("changelog heading regex is valid")
});

static CALLOUT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)<blockquote>\s*<p>\s*(?:\{(note|tip|warning)\}|<strong>(note|tip|warning)</strong>:?)\s*",
    )
    .expect("callout regex is valid")
});

/// Notes found for one version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangelogEntry {
    /// Version as written in the heading
    pub version: String,
    pub notes: ReleaseNotes,
}

/// Which sections of a changelog to keep
#[derive(Debug, Clone, Default)]
pub struct ExtractOptions {
    /// Stop at the first heading whose version is at or below this one
    pub from_version: Option<String>,
    /// Record notes only for these versions (raw or normalized)
    pub only_versions: Option<Vec<String>>,
}

impl ExtractOptions {
    pub fn only(version: &str) -> Self {
        Self {
            from_version: None,
            only_versions: Some(vec![version.to_string()]),
        }
    }
}

struct OpenSection {
    normalized: String,
    version: String,
    date: Option<NaiveDate>,
    critical: bool,
    body: String,
}

/// Parse `text` into normalized version -> entry, in document order
pub fn extract(text: &str, options: &ExtractOptions) -> IndexMap<String, ChangelogEntry> {
    let from_version = options.from_version.as_deref().and_then(|raw| {
        NormalizedVersion::parse(raw)
            .inspect_err(|e| warn!("Ignoring changelog lower bound {}: {}", raw, e))
            .ok()
    });
    let only_versions: Option<HashSet<String>> = options.only_versions.as_ref().map(|versions| {
        versions
            .iter()
            .filter_map(|v| NormalizedVersion::parse(v).ok())
            .map(|v| v.to_string())
            .collect()
    });

    let mut sections: Vec<OpenSection> = Vec::new();
    let mut current: Option<OpenSection> = None;

    for line in text.lines() {
        let Some(caps) = HEADING_RE.captures(line) else {
            if let Some(section) = current.as_mut() {
                section.body.push_str(line);
                section.body.push('\n');
            }
            continue;
        };

        if let Some(section) = current.take() {
            sections.push(section);
        }

        let raw_version = &caps[1];
        let Ok(version) = NormalizedVersion::parse(raw_version) else {
            debug!("Skipping changelog heading with invalid version: {}", line);
            continue;
        };

        if from_version.as_ref().is_some_and(|from| version <= *from) {
            break;
        }

        let normalized = version.to_string();
        if only_versions
            .as_ref()
            .is_some_and(|only| !only.contains(&normalized))
        {
            continue;
        }
        if sections.iter().any(|s| s.normalized == normalized) {
            debug!("Ignoring repeated changelog section for {}", raw_version);
            continue;
        }

        current = Some(OpenSection {
            normalized,
            version: raw_version.to_string(),
            date: parse_date(&caps[2]),
            critical: caps.get(3).is_some(),
            body: String::new(),
        });
    }

    if let Some(section) = current.take() {
        sections.push(section);
    }

    sections
        .into_iter()
        .map(|section| {
            let body = section.body.trim();
            let notes = (!body.is_empty()).then(|| render_notes(body));
            (
                section.normalized,
                ChangelogEntry {
                    version: section.version,
                    notes: ReleaseNotes {
                        date: section.date,
                        critical: section.critical,
                        notes,
                    },
                },
            )
        })
        .collect()
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(&raw.replace('.', "-"), "%Y-%m-%d")
        .inspect_err(|e| debug!("Invalid changelog date {}: {}", raw, e))
        .ok()
}

/// Markdown -> sanitized HTML with callout blockquotes
pub fn render_notes(markdown: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);

    let mut rendered = String::new();
    html::push_html(&mut rendered, Parser::new_ext(markdown, options));

    let sanitized = ammonia::clean(&rendered);

    CALLOUT_RE
        .replace_all(&sanitized, |caps: &Captures| {
            let kind = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str().to_ascii_lowercase())
                .unwrap_or_default();
            let class = match kind.as_str() {
                "note" => "note".to_string(),
                other => format!("note {}", other),
            };
            format!("<blockquote class=\"{}\"><p>", class)
        })
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const CHANGELOG: &str = "# Release Notes for Plugin

## v2.0.0 - 2021-01-01
- Added a thing

## v1.0.0 - 2020-01-01
- Initial release
";

    fn only(versions: &[&str]) -> ExtractOptions {
        ExtractOptions {
            from_version: None,
            only_versions: Some(versions.iter().map(|v| v.to_string()).collect()),
        }
    }

    #[test]
    fn extract_reads_all_sections_newest_first() {
        let entries = extract(CHANGELOG, &ExtractOptions::default());

        assert_eq!(
            entries.keys().collect::<Vec<_>>(),
            vec!["2.0.0.0", "1.0.0.0"]
        );
        let first = &entries["2.0.0.0"];
        assert_eq!(first.version, "2.0.0");
        assert_eq!(first.notes.date, NaiveDate::from_ymd_opt(2021, 1, 1));
        assert!(!first.notes.critical);
        assert!(
            first
                .notes
                .notes
                .as_deref()
                .unwrap()
                .contains("<li>Added a thing</li>")
        );
    }

    #[test]
    fn extract_stops_at_from_version() {
        let options = ExtractOptions {
            from_version: Some("1.0.0".to_string()),
            only_versions: None,
        };

        let entries = extract(CHANGELOG, &options);

        assert_eq!(entries.keys().collect::<Vec<_>>(), vec!["2.0.0.0"]);
    }

    #[test]
    fn extract_only_versions_skips_unlisted_bodies() {
        let entries = extract(CHANGELOG, &only(&["1.0.0"]));

        assert_eq!(entries.keys().collect::<Vec<_>>(), vec!["1.0.0.0"]);
        let notes = entries["1.0.0.0"].notes.notes.as_deref().unwrap();
        assert!(notes.contains("Initial release"));
        assert!(!notes.contains("Added a thing"));
    }

    #[rstest]
    #[case("## 4.2.1 - 2024-03-05 [critical]", "4.2.1.0", true)]
    #[case("## 4.2.1 - 2024-03-05 [CRITICAL]", "4.2.1.0", true)]
    #[case("# 4.2.1 - 2024.03.05", "4.2.1.0", false)]
    #[case("## [v1.0.0](https://example.com/compare) - 2024-03-05", "1.0.0.0", false)]
    #[case("## [1.0.0] - 2024-03-05", "1.0.0.0", false)]
    #[case("## Release 2.0.0.1 - 2024-03-05", "2.0.0.1", false)]
    #[case("## 3.0.0-beta.2 - 2024-03-05", "3.0.0.0-beta2", false)]
    fn extract_recognizes_heading_forms(
        #[case] heading: &str,
        #[case] expected: &str,
        #[case] critical: bool,
    ) {
        let text = format!("{}\n- Fixed a bug\n", heading);

        let entries = extract(&text, &ExtractOptions::default());

        let entry = entries.get(expected).unwrap();
        assert_eq!(entry.notes.critical, critical);
        assert_eq!(entry.notes.date, NaiveDate::from_ymd_opt(2024, 3, 5));
    }

    #[rstest]
    #[case("### 1.0.0 - 2024-03-05")]
    #[case("## 1.0 - 2024-03-05")]
    #[case("## Unreleased")]
    #[case("## 1.0.0")]
    fn extract_ignores_non_version_headings(#[case] heading: &str) {
        let text = format!("{}\n- Fixed a bug\n", heading);
        assert!(extract(&text, &ExtractOptions::default()).is_empty());
    }

    #[test]
    fn extract_keeps_sub_headings_in_body() {
        let text = "## 1.0.0 - 2024-01-01\n### Added\n- Thing\n";

        let entries = extract(text, &ExtractOptions::default());

        let notes = entries["1.0.0.0"].notes.notes.as_deref().unwrap();
        assert!(notes.contains("<h3>Added</h3>"));
    }

    #[test]
    fn extract_marks_empty_sections_as_no_notes() {
        let text = "## 1.0.1 - 2024-01-02\n\n## 1.0.0 - 2024-01-01\n- Thing\n";

        let entries = extract(text, &ExtractOptions::default());

        assert_eq!(entries["1.0.1.0"].notes.notes, None);
        assert!(entries["1.0.0.0"].notes.notes.is_some());
    }

    #[test]
    fn extract_keeps_first_section_for_repeated_version() {
        let text = "## 1.0.0 - 2024-01-02\n- First\n## 1.0.0 - 2023-01-01\n- Second\n";

        let entries = extract(text, &ExtractOptions::default());

        assert_eq!(entries.len(), 1);
        let notes = entries["1.0.0.0"].notes.notes.as_deref().unwrap();
        assert!(notes.contains("First"));
        assert!(!notes.contains("Second"));
    }

    #[test]
    fn render_notes_strips_unsafe_markup() {
        let html = render_notes("- Fixed <script>alert(1)</script> XSS");
        assert!(!html.contains("<script>"));
        assert!(html.contains("Fixed"));
    }

    #[rstest]
    #[case("> {note} Remember to clear caches.", "<blockquote class=\"note\"><p>Remember")]
    #[case("> {Tip} Use the CLI.", "<blockquote class=\"note tip\"><p>Use")]
    #[case("> {warning} Back up first.", "<blockquote class=\"note warning\"><p>Back")]
    #[case("> **Note**\n> Remember to clear caches.", "<blockquote class=\"note\"><p>Remember")]
    #[case("> **Warning**\n> Back up first.", "<blockquote class=\"note warning\"><p>Back")]
    fn render_notes_converts_callouts(#[case] markdown: &str, #[case] expected: &str) {
        let html = render_notes(markdown);
        assert!(html.contains(expected), "{}", html);
    }

    #[test]
    fn render_notes_leaves_plain_blockquotes_alone() {
        let html = render_notes("> Just a quote");
        assert!(html.contains("<blockquote>"));
        assert!(!html.contains("class="));
    }
}
