use colored::Colorize;
use stackflow_deploy::{ProductDeployment, ProductStatus, StackStatus};
use stackflow_core::Variables;

/// `KEY=VALUE` command-line variable
pub fn parse_var(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got `{s}`")),
    }
}

pub fn to_variables(vars: Vec<(String, String)>) -> Variables {
    vars.into_iter().collect()
}

pub fn product_status(status: ProductStatus) -> colored::ColoredString {
    let text = status.to_string();
    match status {
        ProductStatus::Running => text.green(),
        ProductStatus::PartiallyFailed => text.yellow(),
        ProductStatus::Failed => text.red(),
        ProductStatus::Removed => text.dimmed(),
        _ => text.cyan(),
    }
}

fn stack_status(status: StackStatus) -> colored::ColoredString {
    let text = status.to_string();
    match status {
        StackStatus::Running => text.green(),
        StackStatus::Failed => text.red(),
        StackStatus::Removed => text.dimmed(),
        _ => text.cyan(),
    }
}

/// Print a deployment and its stacks
pub fn print_deployment(deployment: &ProductDeployment) {
    println!(
        "{} {} ({})",
        deployment.product_name.bold(),
        deployment.version.cyan(),
        product_status(deployment.status())
    );
    println!("  id: {}", deployment.id);
    if let Some(previous) = &deployment.previous_version {
        println!("  previous version: {}", previous);
    }
    if deployment.upgrade_count > 0 {
        println!("  upgrades: {}", deployment.upgrade_count);
    }

    let mut stacks: Vec<_> = deployment.stacks.iter().collect();
    stacks.sort_by_key(|s| s.order);
    for stack in stacks {
        let new = if stack.is_new_in_upgrade { " (new)" } else { "" };
        println!(
            "  • {}{} [{}] {} services",
            stack.display_name.cyan(),
            new,
            stack_status(stack.status),
            stack.service_count
        );
        if let Some(error) = &stack.error {
            println!("      {}", error.red());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_var() {
        assert_eq!(
            parse_var("DB_PASSWORD=s3cr=t").unwrap(),
            ("DB_PASSWORD".to_string(), "s3cr=t".to_string())
        );
        assert_eq!(parse_var("EMPTY=").unwrap().1, "");
        assert!(parse_var("novalue").is_err());
        assert!(parse_var("=x").is_err());
    }
}
