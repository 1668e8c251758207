use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::{
    apply::{BatchRuleApplier, CancelSignal},
    error::{BlockerError, ControlError},
    model::{Component, ComponentRule, RuleApplyResult},
    rule,
};

use super::args::{Args, Command, Target};
use super::loader::{Device, SettingsLoader};

/// Run the selected subcommand and return the process exit code
pub async fn execute(args: Args) -> Result<i32, BlockerError> {
    let config = SettingsLoader::load(&args)?;
    let device = SettingsLoader::device(&config);
    let controller = &device.controller;

    match args.command {
        Command::Block(target) => switch(&device, &target, false).await,
        Command::Unblock(target) => switch(&device, &target, true).await,
        Command::Status(target) => {
            let component = parse_target(&target)?;
            let enabled = controller
                .get_component_state(target.method, &component)
                .await?;
            let state = if enabled { "enabled" } else { "disabled" };
            println!("{component} [{}]: {state}", target.method);
            Ok(0)
        }
        Command::Apply { bundle } => {
            let content = tokio::fs::read_to_string(&bundle).await?;
            let bundle = rule::decode(&content)?;
            log::info!(
                "Importing {} rules for {}",
                bundle.components.len(),
                bundle.package_name
            );
            Ok(apply_rules(device.applier(), &bundle.components).await)
        }
        Command::Export {
            package,
            output,
            ifw_only,
        } => {
            let bundle = match (&device.catalog, ifw_only) {
                (Some(catalog), false) => {
                    rule::export_declared(controller, &**catalog, &package).await?
                }
                _ => rule::export_ifw_blocks(controller, &package).await?,
            };
            let json = rule::encode(&bundle)?;
            write_output(output.as_deref(), &json).await?;
            Ok(0)
        }
        Command::ImportIfw { path, package } => {
            let (rules, unreadable) = read_ifw_rules(&path, package.as_deref()).await?;
            let code = apply_rules(device.applier(), &rules).await;
            Ok(if unreadable > 0 { 1 } else { code })
        }
        Command::Clear { package, all } => {
            if all {
                let cleared = controller.ifw().clear_all().await?;
                println!("Cleared intent firewall rules of {} packages", cleared.len());
            } else if let Some(package) = package {
                controller.ifw().clear(&package).await?;
                println!("Cleared intent firewall rules of {package}");
            }
            Ok(0)
        }
    }
}

async fn switch(device: &Device, target: &Target, enabled: bool) -> Result<i32, BlockerError> {
    let component = parse_target(target)?;
    // Unblocking stays possible for entries whose component is gone
    if !enabled
        && let Some(catalog) = &device.catalog
        && !catalog.contains(&component).await
    {
        return Err(ControlError::ComponentNotFound {
            component: component.flatten(),
        }
        .into());
    }
    device
        .controller
        .switch_component(target.method, &component, enabled)
        .await?;
    let action = if enabled { "Unblocked" } else { "Blocked" };
    println!("{action} {component} [{}]", target.method);
    Ok(0)
}

/// Apply a batch, letting Ctrl-C stop it between items
async fn apply_rules(applier: BatchRuleApplier, rules: &[ComponentRule]) -> i32 {
    let cancel = CancelSignal::new();
    let watcher = {
        let cancel = Arc::clone(&cancel);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::warn!("Interrupted, stopping after the current rule");
                cancel.cancel();
            }
        })
    };

    let result = applier.apply_with_cancel(rules, cancel).await;
    watcher.abort();

    report(&result);
    if result.is_succeeded() { 0 } else { 1 }
}

/// IFW block rules from one file or every `.xml` file of a directory
///
/// Unreadable files of a directory are logged, counted and skipped; a single
/// unreadable file is an error.
async fn read_ifw_rules(
    path: &Path,
    package: Option<&str>,
) -> Result<(Vec<ComponentRule>, usize), BlockerError> {
    if !tokio::fs::metadata(path).await?.is_dir() {
        let package = match package {
            Some(package) => package.to_string(),
            None => package_of(path)?,
        };
        let content = tokio::fs::read_to_string(path).await?;
        let bundle = rule::bundle_from_ifw_xml(&package, &content)?;
        return Ok((bundle.components, 0));
    }

    let mut files: Vec<PathBuf> = Vec::new();
    let mut entries = tokio::fs::read_dir(path).await?;
    while let Some(entry) = entries.next_entry().await? {
        let file = entry.path();
        if file.extension().is_some_and(|extension| extension == "xml") {
            files.push(file);
        }
    }
    files.sort();

    let mut rules = Vec::new();
    let mut unreadable = 0;
    for file in files {
        let package = package_of(&file)?;
        let content = tokio::fs::read_to_string(&file).await?;
        match rule::bundle_from_ifw_xml(&package, &content) {
            Ok(bundle) => rules.extend(bundle.components),
            Err(err) => {
                log::error!("Skipping {}: {err}", file.display());
                unreadable += 1;
            }
        }
    }
    log::info!("Read {} IFW rules from {}", rules.len(), path.display());
    Ok((rules, unreadable))
}

fn package_of(file: &Path) -> Result<String, BlockerError> {
    file.file_stem()
        .and_then(|stem| stem.to_str())
        .filter(|stem| !stem.is_empty())
        .map(str::to_string)
        .ok_or_else(|| BlockerError::InvalidComponent {
            entry: file.display().to_string(),
            reason: "cannot derive a package name from the file name".to_string(),
        })
}

fn report(result: &RuleApplyResult) {
    println!(
        "Applied {} rules: {} succeeded, {} failed, {} skipped",
        result.total(),
        result.succeed_count(),
        result.failed_count(),
        result.skipped_count()
    );
}

async fn write_output(output: Option<&Path>, content: &str) -> Result<(), BlockerError> {
    match output {
        Some(path) => {
            tokio::fs::write(path, content).await?;
            log::info!("Wrote rule bundle to {}", path.display());
        }
        None => println!("{content}"),
    }
    Ok(())
}

fn parse_target(target: &Target) -> Result<Component, BlockerError> {
    Component::unflatten(&target.component, target.component_type).ok_or_else(|| {
        BlockerError::InvalidComponent {
            entry: target.component.clone(),
            reason: "expected package/class".to_string(),
        }
    })
}
