//! Rule-file rendering.
//!
//! Turns synthesized rules into editor-consumable Markdown files with a
//! YAML front-matter block, one file per rule, in a configurable rules
//! directory.

use crate::models::SynthesizedRule;
use crate::rules::slugify;
use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Extension used for generated rule files.
const RULE_FILE_EXTENSION: &str = "mdc";

/// Front-matter block at the top of every rule file.
#[derive(Debug, Serialize)]
struct RuleFrontMatter<'a> {
    description: &'a str,
    globs: Vec<&'a str>,
    #[serde(rename = "type")]
    attachment: &'a str,
}

/// Render one rule as Markdown with YAML front matter.
pub fn render_rule(rule: &SynthesizedRule) -> Result<String> {
    let front_matter = RuleFrontMatter {
        description: &rule.description,
        globs: if rule.scope_glob.is_empty() {
            vec!["**/*"]
        } else {
            vec![rule.scope_glob.as_str()]
        },
        attachment: "autoAttached",
    };

    let yaml = serde_yaml::to_string(&front_matter)
        .with_context(|| format!("Failed to render front matter for {}", rule.slug))?;

    let mut content = String::new();
    content.push_str("---\n");
    content.push_str(yaml.trim_end());
    content.push_str("\n---\n\n");
    for bullet in &rule.bullets {
        content.push_str(&format!("- {}\n", bullet));
    }

    Ok(content)
}

/// Write every rule into `rules_dir`, returning the created paths.
/// Filenames derive from the sanitized slug; collisions get a numeric
/// suffix.
pub fn write_rules(rules: &[SynthesizedRule], rules_dir: &Path) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(rules_dir)
        .with_context(|| format!("Failed to create rules directory {}", rules_dir.display()))?;

    let mut used_names: BTreeSet<String> = BTreeSet::new();
    let mut written = Vec::with_capacity(rules.len());

    for rule in rules {
        let name = unique_file_name(&rule.slug, &mut used_names);
        let path = rules_dir.join(&name);
        let content = render_rule(rule)?;

        fs::write(&path, content)
            .with_context(|| format!("Failed to write rule file {}", path.display()))?;
        written.push(path);
    }

    info!("Wrote {} rule files to {}", written.len(), rules_dir.display());
    Ok(written)
}

fn unique_file_name(slug: &str, used: &mut BTreeSet<String>) -> String {
    // Slugs come back from the model untrusted; re-slugify so they
    // cannot name subdirectories or escape the rules directory.
    let sanitized = slugify(slug);
    let base = if sanitized.is_empty() {
        "rule"
    } else {
        sanitized.as_str()
    };

    let mut name = format!("{}.{}", base, RULE_FILE_EXTENSION);
    let mut counter = 2;
    while used.contains(&name) {
        name = format!("{}-{}.{}", base, counter, RULE_FILE_EXTENSION);
        counter += 1;
    }

    used.insert(name.clone());
    name
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn rule(slug: &str) -> SynthesizedRule {
        SynthesizedRule {
            slug: slug.to_string(),
            description: "Wrap errors with context at module boundaries".to_string(),
            scope_glob: "**/*.rs".to_string(),
            bullets: vec![
                "Use anyhow::Context on fallible calls".to_string(),
                "Reserve panics for invariant violations".to_string(),
            ],
            score: 6.0,
            support_files: 3,
        }
    }

    #[test]
    fn test_render_rule_contains_front_matter_and_bullets() {
        let content = render_rule(&rule("error-handling")).unwrap();

        assert!(content.starts_with("---\n"));
        assert!(content.contains("description: Wrap errors with context at module boundaries"));
        assert!(content.contains("type: autoAttached"));
        assert!(content.contains("'**/*.rs'") || content.contains("**/*.rs"));
        assert!(content.contains("- Use anyhow::Context on fallible calls"));
        assert!(content.contains("\n---\n\n"));
    }

    #[test]
    fn test_empty_scope_glob_falls_back_to_everything() {
        let mut r = rule("bare");
        r.scope_glob = String::new();
        let content = render_rule(&r).unwrap();
        assert!(content.contains("**/*"));
    }

    #[test]
    fn test_colliding_slugs_get_numeric_suffixes() {
        let mut used = BTreeSet::new();
        assert_eq!(unique_file_name("dup", &mut used), "dup.mdc");
        assert_eq!(unique_file_name("dup", &mut used), "dup-2.mdc");
        assert_eq!(unique_file_name("dup", &mut used), "dup-3.mdc");
        assert_eq!(unique_file_name("", &mut used), "rule.mdc");
    }

    #[test]
    fn test_untrusted_slugs_are_sanitized_into_flat_names() {
        let mut used = BTreeSet::new();
        assert_eq!(unique_file_name("error/handling", &mut used), "error-handling.mdc");
        assert_eq!(unique_file_name("../x", &mut used), "x.mdc");
        assert_eq!(unique_file_name("..", &mut used), "rule.mdc");
    }

    #[test]
    fn test_traversal_slug_cannot_escape_the_rules_dir() {
        let dir = TempDir::new().unwrap();
        let rules_dir = dir.path().join("rules");

        let written = write_rules(&[rule("../escape")], &rules_dir).unwrap();

        assert_eq!(written, vec![rules_dir.join("escape.mdc")]);
        assert!(rules_dir.join("escape.mdc").exists());
        assert!(!dir.path().join("escape.mdc").exists());
    }

    #[test]
    fn test_write_rules_creates_files() {
        let dir = TempDir::new().unwrap();
        let rules_dir = dir.path().join(".cursor").join("rules");

        let written = write_rules(&[rule("error-handling"), rule("error-handling")], &rules_dir)
            .unwrap();

        assert_eq!(written.len(), 2);
        assert!(rules_dir.join("error-handling.mdc").exists());
        assert!(rules_dir.join("error-handling-2.mdc").exists());
    }
}
