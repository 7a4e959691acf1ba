//! Filesystem rule source feeding the hot-reload watcher.
//!
//! Scans a directory recursively for `*.yml` / `*.yaml` / `*.json` files
//! (dotfiles skipped) and parses each into rule inputs. The strict
//! [`RuleSource::load`] fails the whole load on any parse error so a bad
//! edit aborts the reload cycle and keeps the previous rule set; the
//! per-file [`scan`](FileRuleSource::scan) variant reports each file's
//! outcome for linting.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use reflex_core::{validate_rule, EngineError, RuleInput};
use reflex_engine::RuleSource;

use crate::document::{parse_document, DocFormat, RuleDocument};

/// Outcome of loading one file during a scan.
#[derive(Debug, Clone)]
pub enum LoadStatus {
    Loaded { rule_ids: Vec<String> },
    Template { template_id: String },
    Skipped { reason: String },
    Failed { error: String },
}

#[derive(Debug, Clone)]
pub struct LoadResult {
    pub path: PathBuf,
    pub status: LoadStatus,
}

pub struct FileRuleSource {
    dir: PathBuf,
    name: String,
    /// Active filesystem watcher (held to keep it alive).
    _watcher: Option<RecommendedWatcher>,
}

impl FileRuleSource {
    /// Create a source over a directory, creating it if missing.
    pub fn new(dir: PathBuf) -> Result<Self, EngineError> {
        if !dir.exists() {
            fs::create_dir_all(&dir)?;
        }
        let name = format!("file:{}", dir.display());
        Ok(Self { dir, name, _watcher: None })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Scan the directory, reporting a per-file outcome. Parse errors do
    /// not abort the scan.
    pub fn scan(&self) -> Result<Vec<LoadResult>, EngineError> {
        let mut results = Vec::new();
        scan_dir(&self.dir, &mut results)?;
        Ok(results)
    }

    /// Install a filesystem watcher that nudges the returned notify handle
    /// on any relevant change, prompting an early reload poll.
    pub fn watch(&mut self) -> Result<Arc<Notify>, EngineError> {
        let nudge = Arc::new(Notify::new());
        let nudge_ref = Arc::clone(&nudge);
        let mut watcher = notify::recommended_watcher(
            move |res: Result<notify::Event, notify::Error>| match res {
                Ok(event) => {
                    if event.paths.iter().any(|p| is_rule_file(p)) {
                        nudge_ref.notify_one();
                    }
                }
                Err(e) => warn!(error = %e, "filesystem watcher error"),
            },
        )
        .map_err(|e| EngineError::Io(std::io::Error::other(e)))?;
        watcher
            .watch(&self.dir, RecursiveMode::Recursive)
            .map_err(|e| EngineError::Io(std::io::Error::other(e)))?;
        info!(path = %self.dir.display(), "watching rules directory for changes");
        self._watcher = Some(watcher);
        Ok(nudge)
    }
}

#[async_trait]
impl RuleSource for FileRuleSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn load(&self) -> Result<Vec<RuleInput>, EngineError> {
        let mut rules = Vec::new();
        for result in self.scan()? {
            match result.status {
                LoadStatus::Loaded { .. } => {
                    // Re-parse for the rules themselves; scan only keeps ids.
                    let text = fs::read_to_string(&result.path)?;
                    let format = file_format(&result.path).expect("scanned file has a format");
                    if let RuleDocument::Rules(parsed) = parse_document(&text, format)? {
                        rules.extend(parsed);
                    }
                }
                LoadStatus::Template { template_id } => {
                    debug!(
                        template_id = %template_id,
                        path = %result.path.display(),
                        "template file skipped by rule source"
                    );
                }
                LoadStatus::Skipped { .. } => {}
                LoadStatus::Failed { error } => {
                    return Err(EngineError::Validation(format!(
                        "{}: {}",
                        result.path.display(),
                        error
                    )));
                }
            }
        }
        Ok(rules)
    }
}

fn scan_dir(dir: &Path, results: &mut Vec<LoadResult>) -> Result<(), EngineError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(path = %dir.display(), error = %e, "failed to read directory");
            return Ok(());
        }
    };

    for entry in entries {
        let entry = entry?;
        let path = entry.path();

        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            if name.starts_with('.') {
                continue;
            }
        }

        if path.is_dir() {
            scan_dir(&path, results)?;
            continue;
        }

        let Some(format) = file_format(&path) else {
            results.push(LoadResult {
                path,
                status: LoadStatus::Skipped { reason: "not a rule file".to_string() },
            });
            continue;
        };

        let status = match load_file(&path, format) {
            Ok(status) => status,
            Err(e) => LoadStatus::Failed { error: e.to_string() },
        };
        results.push(LoadResult { path, status });
    }
    Ok(())
}

fn load_file(path: &Path, format: DocFormat) -> Result<LoadStatus, EngineError> {
    let text = fs::read_to_string(path)?;
    match parse_document(&text, format)? {
        RuleDocument::Rules(rules) => {
            for rule in &rules {
                let issues = validate_rule(rule);
                if !issues.is_empty() {
                    let summary = issues
                        .iter()
                        .map(|i| i.to_string())
                        .collect::<Vec<_>>()
                        .join("; ");
                    return Err(EngineError::Validation(format!(
                        "rule '{}': {}",
                        rule.id, summary
                    )));
                }
            }
            Ok(LoadStatus::Loaded { rule_ids: rules.iter().map(|r| r.id.clone()).collect() })
        }
        RuleDocument::Template(template) => {
            Ok(LoadStatus::Template { template_id: template.template_id })
        }
    }
}

fn file_format(path: &Path) -> Option<DocFormat> {
    path.extension()
        .and_then(|e| e.to_str())
        .and_then(DocFormat::from_extension)
}

fn is_rule_file(path: &Path) -> bool {
    if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
        if name.starts_with('.') {
            return false;
        }
    }
    file_format(path).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &Path, name: &str, contents: &str) {
        let mut file = fs::File::create(dir.join(name)).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
    }

    const GOOD_RULE: &str = r#"
id: r1
name: R1
trigger: {type: event, topic: a}
actions: [{type: log, level: info, message: m}]
"#;

    #[tokio::test]
    async fn loads_rules_from_yaml_and_json() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "one.yml", GOOD_RULE);
        write_file(
            dir.path(),
            "two.json",
            r#"{"id": "r2", "name": "R2",
                "trigger": {"type": "event", "topic": "b"},
                "actions": [{"type": "log", "level": "info", "message": "m"}]}"#,
        );

        let source = FileRuleSource::new(dir.path().to_path_buf()).unwrap();
        let mut rules = source.load().await.unwrap();
        rules.sort_by(|a, b| a.id.cmp(&b.id));
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].id, "r1");
        assert_eq!(rules[1].id, "r2");
    }

    #[tokio::test]
    async fn scans_subdirectories_and_skips_dotfiles() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        write_file(&dir.path().join("nested"), "deep.yaml", GOOD_RULE);
        write_file(dir.path(), ".hidden.yml", GOOD_RULE);
        write_file(dir.path(), "notes.txt", "not rules");

        let source = FileRuleSource::new(dir.path().to_path_buf()).unwrap();
        let rules = source.load().await.unwrap();
        assert_eq!(rules.len(), 1);

        let results = source.scan().unwrap();
        assert!(results
            .iter()
            .any(|r| matches!(r.status, LoadStatus::Skipped { .. })));
    }

    #[tokio::test]
    async fn strict_load_fails_on_any_bad_file() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "good.yml", GOOD_RULE);
        write_file(dir.path(), "bad.yml", "id: [broken");

        let source = FileRuleSource::new(dir.path().to_path_buf()).unwrap();
        assert!(source.load().await.is_err());

        // The lint scan still reports both files.
        let results = source.scan().unwrap();
        assert_eq!(results.len(), 2);
        assert!(results
            .iter()
            .any(|r| matches!(r.status, LoadStatus::Failed { .. })));
        assert!(results
            .iter()
            .any(|r| matches!(r.status, LoadStatus::Loaded { .. })));
    }

    #[tokio::test]
    async fn invalid_rule_content_is_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        write_file(
            dir.path(),
            "empty-actions.yml",
            r#"
id: r1
name: R1
trigger: {type: event, topic: a}
actions: []
"#,
        );

        let source = FileRuleSource::new(dir.path().to_path_buf()).unwrap();
        assert!(source.load().await.is_err());
    }

    #[tokio::test]
    async fn template_files_are_not_rules() {
        let dir = tempfile::tempdir().unwrap();
        write_file(
            dir.path(),
            "template.json",
            r#"{"template": {
                "templateId": "t1",
                "parameters": [],
                "blueprint": {"id": "x", "name": "X",
                    "trigger": {"type": "event", "topic": "t"},
                    "actions": [{"type": "log", "level": "info", "message": "m"}]}
            }}"#,
        );

        let source = FileRuleSource::new(dir.path().to_path_buf()).unwrap();
        let rules = source.load().await.unwrap();
        assert!(rules.is_empty());

        let results = source.scan().unwrap();
        assert!(matches!(results[0].status, LoadStatus::Template { .. }));
    }

    #[tokio::test]
    async fn creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("does/not/exist");
        let source = FileRuleSource::new(nested.clone()).unwrap();
        assert!(nested.exists());
        assert!(source.load().await.unwrap().is_empty());
    }
}
