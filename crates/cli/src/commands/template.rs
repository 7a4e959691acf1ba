//! `reflex template` — instantiate a rule template and print the rule.

use std::path::Path;

use anyhow::{bail, Context};
use serde_json::{Map, Value};

use reflex_loader::{parse_document, DocFormat, RuleDocument};

pub fn run(file: &Path, params: &str) -> anyhow::Result<()> {
    let format = file
        .extension()
        .and_then(|e| e.to_str())
        .and_then(DocFormat::from_extension)
        .with_context(|| format!("{}: not a .json/.yml/.yaml file", file.display()))?;
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("reading {}", file.display()))?;

    let template = match parse_document(&text, format)? {
        RuleDocument::Template(template) => template,
        RuleDocument::Rules(_) => bail!("{} is a rule document, not a template", file.display()),
    };

    let params: Map<String, Value> = serde_json::from_str(params)
        .context("parsing --params as a JSON object")?;

    let rule = template.instantiate(&params)?;
    println!("{}", serde_json::to_string_pretty(&rule)?);
    Ok(())
}
