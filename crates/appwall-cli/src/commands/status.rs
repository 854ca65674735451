use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::Result;

use policy_engine::resolver::resolve_label;
use policy_engine::Filter;

pub fn execute(config_path: Option<PathBuf>) -> Result<()> {
    let session = super::open(config_path)?;
    let controller = &session.controller;

    println!("Config: {}", session.config_path.display());
    println!("State: {}", session.paths.state_path.display());
    println!(
        "VPN lockdown: {}",
        if session.config.controller.vpn_lockdown {
            "on"
        } else {
            "off"
        }
    );
    match controller.coupler().platform() {
        Some(version) => println!("Platform: {version}"),
        None => println!("Platform: unknown"),
    }

    let dial_retry = controller.dial_retry()?.config;
    println!(
        "Dial/retry: {} / {}",
        dial_retry.dial_strategy, dial_retry.retry_strategy
    );

    let apps = controller.list(&Filter::default())?;
    let mut per_uid = BTreeMap::new();
    for app in &apps {
        per_uid.insert(app.uid(), app.policy);
    }
    let mut by_label: BTreeMap<&'static str, usize> = BTreeMap::new();
    for policy in per_uid.values() {
        let label = resolve_label(policy.firewall_status, policy.connection_status);
        *by_label.entry(label.as_str()).or_default() += 1;
    }
    println!("Apps: {} packages, {} uids", apps.len(), per_uid.len());
    for (label, count) in by_label {
        println!("  {label}: {count}");
    }
    Ok(())
}
