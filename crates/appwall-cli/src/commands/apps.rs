use std::fs;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};

use appwall_core::error::AppwallError;
use appwall_core::ids::EntityId;
use appwall_core::store::{JsonPolicyStore, PolicyStore};
use appwall_core::types::{AppInfo, PackageInfo};
use policy_engine::filter::sort_for_listing;
use policy_engine::resolver::resolve_label;
use policy_engine::{CommitOutcome, Confirmation, Filter, FirewallAction, FirewallController};

#[derive(Debug)]
pub enum AppsAction {
    Import { file: PathBuf },
    Remove { package: String },
    List { filter: Filter, json: bool },
    Toggle {
        target: String,
        action: FirewallAction,
        yes: bool,
    },
}

pub fn execute(config_path: Option<PathBuf>, action: AppsAction) -> Result<()> {
    let mut session = super::open(config_path)?;
    let controller = &mut session.controller;

    match action {
        AppsAction::Import { file } => {
            let contents = fs::read_to_string(&file)
                .with_context(|| format!("read inventory {}", file.display()))?;
            let packages: Vec<PackageInfo> =
                serde_json::from_str(&contents).context("parse inventory JSON")?;
            let count = controller.store_mut().import_packages(packages)?;
            println!("Imported {count} packages");
        }
        AppsAction::Remove { package } => {
            if controller.store_mut().remove_package(&package)? {
                println!("Removed {package}");
            } else {
                return Err(anyhow!("no installed package named {package}"));
            }
        }
        AppsAction::List { filter, json } => {
            let mut apps = controller.list(&filter)?;
            sort_for_listing(&mut apps);
            if json {
                println!("{}", serde_json::to_string_pretty(&apps)?);
            } else {
                print_rows(&apps);
            }
        }
        AppsAction::Toggle {
            target,
            action,
            yes,
        } => toggle(controller, &target, action, yes)?,
    }
    Ok(())
}

fn toggle(
    controller: &mut FirewallController<JsonPolicyStore>,
    target: &str,
    action: FirewallAction,
    yes: bool,
) -> Result<()> {
    let entity = resolve_target(controller.store(), target)?;
    let plan = match controller.plan_action(entity, action)? {
        Ok(plan) => plan,
        Err(refusal) => {
            println!("No change: {refusal}");
            return Ok(());
        }
    };

    let confirmation = if yes {
        Confirmation::Granted
    } else {
        Confirmation::Withheld
    };
    match controller.commit(&plan, confirmation)? {
        CommitOutcome::Applied(policy) => {
            println!(
                "uid {}: {}",
                entity,
                resolve_label(policy.firewall_status, policy.connection_status)
            );
        }
        CommitOutcome::NeedsConfirmation => {
            println!(
                "uid {} is shared by {} packages; re-run with --yes to {} for all of them:",
                entity,
                plan.packages.len(),
                plan.action
            );
            for package in &plan.packages {
                println!("  {package}");
            }
        }
    }
    Ok(())
}

/// Accepts a numeric uid or a package name.
fn resolve_target(store: &JsonPolicyStore, target: &str) -> Result<EntityId> {
    if let Ok(entity) = target.parse::<EntityId>() {
        if store.packages_for(entity)?.is_empty() {
            return Err(AppwallError::UnknownEntity(entity).into());
        }
        return Ok(entity);
    }
    store
        .state()
        .packages
        .iter()
        .find(|package| package.package_name == target)
        .map(|package| package.uid)
        .ok_or_else(|| anyhow!("no installed package named {target}"))
}

fn print_rows(apps: &[AppInfo]) {
    if apps.is_empty() {
        println!("No apps match.");
        return;
    }
    for app in apps {
        println!(
            "{:>6}  {:<24} {} ({})",
            app.uid(),
            resolve_label(app.firewall_status(), app.connection_status()).as_str(),
            app.app_name(),
            app.package_name()
        );
    }
    println!("{} apps", apps.len());
}
