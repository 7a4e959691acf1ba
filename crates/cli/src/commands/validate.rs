//! `reflex validate` — lint rule files without starting the engine.

use std::path::Path;

use anyhow::{bail, Context};

use reflex_core::validate_rule;
use reflex_loader::{parse_document, DocFormat, FileRuleSource, LoadStatus, RuleDocument};

pub fn run(path: &Path) -> anyhow::Result<()> {
    if path.is_dir() {
        validate_dir(path)
    } else {
        validate_file(path)
    }
}

fn validate_dir(dir: &Path) -> anyhow::Result<()> {
    let source = FileRuleSource::new(dir.to_path_buf())
        .with_context(|| format!("opening {}", dir.display()))?;
    let results = source.scan().context("scanning rules directory")?;

    let mut rules = 0usize;
    let mut templates = 0usize;
    let mut failures = 0usize;
    for result in &results {
        match &result.status {
            LoadStatus::Loaded { rule_ids } => {
                rules += rule_ids.len();
                println!("ok      {} ({} rules)", result.path.display(), rule_ids.len());
            }
            LoadStatus::Template { template_id } => {
                templates += 1;
                println!("ok      {} (template '{}')", result.path.display(), template_id);
            }
            LoadStatus::Skipped { reason } => {
                println!("skip    {} ({})", result.path.display(), reason);
            }
            LoadStatus::Failed { error } => {
                failures += 1;
                println!("FAIL    {}: {}", result.path.display(), error);
            }
        }
    }

    println!("\n{} rules, {} templates, {} failures", rules, templates, failures);
    if failures > 0 {
        bail!("{} file(s) failed validation", failures);
    }
    Ok(())
}

fn validate_file(path: &Path) -> anyhow::Result<()> {
    let format = path
        .extension()
        .and_then(|e| e.to_str())
        .and_then(DocFormat::from_extension)
        .with_context(|| format!("{}: not a .json/.yml/.yaml file", path.display()))?;
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;

    match parse_document(&text, format)? {
        RuleDocument::Rules(rules) => {
            let mut failures = 0usize;
            for rule in &rules {
                let issues = validate_rule(rule);
                if issues.is_empty() {
                    println!("ok      rule '{}'", rule.id);
                } else {
                    failures += 1;
                    for issue in issues {
                        println!("FAIL    rule '{}': {}", rule.id, issue);
                    }
                }
            }
            if failures > 0 {
                bail!("{} rule(s) failed validation", failures);
            }
        }
        RuleDocument::Template(template) => {
            println!("ok      template '{}'", template.template_id);
        }
    }
    Ok(())
}
