use anyhow::Context;
use colored::Colorize;
use stackflow_core::ManifestParser;
use std::path::Path;

pub fn handle(manifest: &Path) -> anyhow::Result<()> {
    println!("{}", "Validating manifest...".blue());

    let text = std::fs::read_to_string(manifest)
        .with_context(|| format!("failed to read {}", manifest.display()))?;
    let parser = ManifestParser::new()?;
    let report = parser.validate(&text);

    for warning in &report.warnings {
        println!("  {} {}", "⚠".yellow(), warning);
    }

    if !report.is_valid {
        eprintln!();
        eprintln!("{}", "✗ Manifest is invalid".red().bold());
        for error in &report.errors {
            eprintln!("  {}", error);
        }
        anyhow::bail!("{} error(s) in {}", report.errors.len(), manifest.display());
    }

    let stack = parser.parse(&text)?;
    println!("{}", "✓ Manifest is valid".green().bold());
    println!();
    println!("Summary:");
    println!("  services: {}", stack.services.len());
    for service in &stack.services {
        println!("    - {} ({})", service.name.cyan(), service.image);
    }
    if !stack.variables.is_empty() {
        println!("  variables: {}", stack.variables.len());
        for variable in &stack.variables {
            let default = match &variable.default {
                Some(_) if variable.is_secret() => " = ****".to_string(),
                Some(value) => format!(" = {value}"),
                None => String::new(),
            };
            let required = if variable.required { " (required)" } else { "" };
            println!(
                "    - {} [{}]{}{}",
                variable.name.cyan(),
                variable.kind.tag(),
                default,
                required
            );
        }
    }

    Ok(())
}
