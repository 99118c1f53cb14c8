use crate::context::Context;
use crate::utils::{print_deployment, product_status};
use colored::Colorize;
use stackflow_deploy::{DeployError, DeploymentRepository, ProductGroupId};

pub async fn status(ctx: &Context, group: Option<&str>, json: bool) -> anyhow::Result<()> {
    let repository = ctx.repository();

    let deployments = match group {
        Some(group) => {
            repository
                .history(&ctx.environment, &ProductGroupId::new(group))
                .await?
        }
        None => repository.list(&ctx.environment).await?,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&deployments)?);
        return Ok(());
    }

    if deployments.is_empty() {
        println!("No deployments in {}", ctx.environment.to_string().cyan());
        return Ok(());
    }

    match group {
        // History of one product: newest in full, older ones as a line each
        Some(_) => {
            print_deployment(&deployments[0]);
            for older in &deployments[1..] {
                println!(
                    "  {} {} {} ({})",
                    older.created_at.format("%Y-%m-%d %H:%M:%S"),
                    older.version,
                    product_status(older.status()),
                    older.id
                );
            }
        }
        None => {
            let mut seen = Vec::new();
            for deployment in &deployments {
                if seen.contains(&&deployment.group) {
                    continue;
                }
                seen.push(&deployment.group);
                print_deployment(deployment);
                println!();
            }
        }
    }

    Ok(())
}

pub async fn check_upgrade(ctx: &Context, group: &str, json: bool) -> anyhow::Result<()> {
    let group = ProductGroupId::new(group);
    let deployment = ctx
        .repository()
        .active(&ctx.environment, &group)
        .await?
        .ok_or_else(|| DeployError::ProductNotFound(format!("{group} in {}", ctx.environment)))?;

    let info = ctx.upgrade_engine().await?.check_upgrade(&deployment).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    println!("{} {}", group.to_string().bold(), info.current_version.cyan());
    match &info.latest_version {
        Some(latest) if info.upgrade_available => {
            println!("  {} {}", "upgrade available:".green(), latest.cyan());
        }
        Some(latest) => println!("  latest: {latest}"),
        None => {}
    }
    for name in &info.new_variables {
        println!("  {} {}", "+".green(), name);
    }
    for name in &info.removed_variables {
        println!("  {} {}", "-".red(), name);
    }
    if info.can_upgrade {
        println!("{}", "✓ Ready to upgrade".green().bold());
    } else if let Some(reason) = &info.reason {
        println!("  {} {}", "✗".yellow(), reason);
    }

    Ok(())
}
