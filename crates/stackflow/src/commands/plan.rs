use crate::utils::to_variables;
use anyhow::Context;
use colored::Colorize;
use stackflow_core::{ManifestParser, PlanBuilder, ResourceSpec};
use std::path::Path;

pub fn handle(manifest: &Path, stack: Option<&str>, vars: &[(String, String)]) -> anyhow::Result<()> {
    let parser = ManifestParser::new()?;
    let definition = parser
        .parse_file(manifest)
        .with_context(|| format!("failed to parse {}", manifest.display()))?;

    let stack_name = stack
        .map(str::to_string)
        .or_else(|| definition.name.clone())
        .or_else(|| {
            manifest
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
        })
        .context("cannot derive a stack name; pass --stack")?;

    let plan = PlanBuilder::new()?.build(&definition, &to_variables(vars.to_vec()), &stack_name)?;

    println!(
        "Plan for stack {} ({})",
        plan.stack_name.cyan().bold(),
        plan.summary()
    );
    for (index, step) in plan.steps.iter().enumerate() {
        let detail = match &step.spec {
            ResourceSpec::Service(service) => service.image.clone(),
            ResourceSpec::Network(network) if network.external => "external".to_string(),
            ResourceSpec::Volume(volume) if volume.external => "external".to_string(),
            ResourceSpec::Network(network) => network.driver_or_default().to_string(),
            ResourceSpec::Volume(volume) => volume.driver.clone().unwrap_or_else(|| "local".to_string()),
        };
        println!(
            "  {:>2}. {:<8} {} {}",
            index + 1,
            step.kind().to_string(),
            step.name.cyan(),
            detail.dimmed()
        );
    }

    Ok(())
}
