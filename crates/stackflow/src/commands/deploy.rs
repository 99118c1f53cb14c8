use crate::context::Context;
use crate::utils::{print_deployment, product_status, to_variables};
use colored::Colorize;
use stackflow_deploy::{
    DeployRequest, DeploymentLocks, EnvironmentId, ProductDeployment, ProductGroupId, ProductStatus,
};
use tracing::warn;

/// Cancel the pass of the pair on Ctrl-C; a second Ctrl-C exits at once
fn cancel_on_interrupt(locks: &DeploymentLocks, environment: &EnvironmentId, group: &ProductGroupId) {
    let locks = locks.clone();
    let (environment, group) = (environment.clone(), group.clone());
    tokio::spawn(async move {
        if watch_interrupts(tokio::signal::ctrl_c, &locks, &environment, &group).await {
            std::process::exit(130);
        }
    });
}

/// Returns `true` on the second interrupt, after dropping the pass's lock
/// file that an immediate exit would otherwise leave behind
async fn watch_interrupts<F, Fut>(
    mut interrupted: F,
    locks: &DeploymentLocks,
    environment: &EnvironmentId,
    group: &ProductGroupId,
) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<()>>,
{
    if interrupted().await.is_err() {
        return false;
    }
    warn!("Interrupted; cancelling after the current step");
    eprintln!(
        "{}",
        "Interrupted; stopping after the current step (Ctrl-C again to exit now)...".yellow()
    );
    locks.cancel(environment, group);

    if interrupted().await.is_err() {
        return false;
    }
    warn!("Interrupted again; exiting");
    eprintln!("{}", "Interrupted again; exiting".red());
    if let Some(path) = locks.lock_file(environment, group)
        && let Err(e) = std::fs::remove_file(&path)
        && e.kind() != std::io::ErrorKind::NotFound
    {
        warn!(path = %path.display(), error = %e, "Failed to remove lock file");
    }
    true
}

fn finish(deployment: &ProductDeployment, expected: ProductStatus) -> anyhow::Result<()> {
    println!();
    print_deployment(deployment);

    let status = deployment.status();
    if status != expected {
        anyhow::bail!("{} finished as {}", deployment.group, product_status(status));
    }
    Ok(())
}

pub async fn deploy(
    ctx: &Context,
    group: &str,
    version: Option<String>,
    vars: Vec<(String, String)>,
    continue_on_error: bool,
) -> anyhow::Result<()> {
    let orchestrator = ctx.orchestrator().await?;
    let mut request = DeployRequest::new(ctx.environment.as_str(), group)
        .continue_on_error(continue_on_error || ctx.settings.continue_on_error);
    request.version = version;
    request.variables = to_variables(vars);

    println!(
        "{} {} to {}",
        "Deploying".blue(),
        group.cyan(),
        ctx.environment.to_string().cyan()
    );
    cancel_on_interrupt(orchestrator.locks(), &request.environment, &request.group);

    let deployment = orchestrator.deploy(request).await?;
    finish(&deployment, ProductStatus::Running)
}

pub async fn upgrade(ctx: &Context, group: &str, vars: Vec<(String, String)>) -> anyhow::Result<()> {
    let orchestrator = ctx.orchestrator().await?;
    let group = ProductGroupId::new(group);

    println!("{} {}", "Upgrading".blue(), group.to_string().cyan());
    cancel_on_interrupt(orchestrator.locks(), &ctx.environment, &group);

    let deployment = orchestrator
        .upgrade(&ctx.environment, &group, &to_variables(vars))
        .await?;
    finish(&deployment, ProductStatus::Running)
}

pub async fn rollback(ctx: &Context, group: &str) -> anyhow::Result<()> {
    let orchestrator = ctx.orchestrator().await?;
    let group = ProductGroupId::new(group);

    println!("{} {}", "Rolling back".blue(), group.to_string().cyan());
    cancel_on_interrupt(orchestrator.locks(), &ctx.environment, &group);

    let deployment = orchestrator.rollback(&ctx.environment, &group).await?;
    finish(&deployment, ProductStatus::Running)
}

pub async fn remove(ctx: &Context, group: &str, purge_volumes: bool) -> anyhow::Result<()> {
    let orchestrator = ctx.orchestrator().await?;
    let group = ProductGroupId::new(group);

    println!("{} {}", "Removing".blue(), group.to_string().cyan());
    if !purge_volumes {
        println!("  {}", "named volumes are kept (use --purge-volumes to delete them)".dimmed());
    }
    cancel_on_interrupt(orchestrator.locks(), &ctx.environment, &group);

    let deployment = orchestrator
        .remove(&ctx.environment, &group, purge_volumes)
        .await?;
    finish(&deployment, ProductStatus::Removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_interrupt_cancels_second_exits() {
        let temp_dir = tempfile::tempdir().unwrap();
        let locks = DeploymentLocks::with_lock_dir(temp_dir.path());
        let (env, group) = (EnvironmentId::from("prod"), ProductGroupId::from("shop"));
        let guard = locks.acquire(&env, &group).unwrap();
        let lock_file = locks.lock_file(&env, &group).unwrap();
        assert!(lock_file.exists());

        let mut signals = 0;
        let exit = watch_interrupts(
            || {
                signals += 1;
                std::future::ready(Ok(()))
            },
            &locks,
            &env,
            &group,
        )
        .await;

        assert!(exit);
        assert_eq!(signals, 2);
        assert!(guard.token().is_cancelled());
        assert!(!lock_file.exists());
    }

    #[tokio::test]
    async fn test_failed_signal_handler_does_not_exit() {
        let locks = DeploymentLocks::new();
        let (env, group) = (EnvironmentId::from("prod"), ProductGroupId::from("shop"));
        let guard = locks.acquire(&env, &group).unwrap();

        let exit = watch_interrupts(
            || std::future::ready(Err(std::io::Error::other("no signal handler"))),
            &locks,
            &env,
            &group,
        )
        .await;

        assert!(!exit);
        assert!(!guard.token().is_cancelled());
    }
}
