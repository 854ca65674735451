use std::path::PathBuf;

use anyhow::Result;

use appwall_core::anticensor::{DialRetryConfig, DialStrategy, RetryStrategy};
use policy_engine::CouplerEvent;

pub fn dial(config_path: Option<PathBuf>, requested: Option<DialStrategy>) -> Result<()> {
    let mut session = super::open(config_path)?;
    let controller = &mut session.controller;

    let Some(requested) = requested else {
        let current = controller.dial_retry()?;
        print_pair(&current.config);
        let available: Vec<String> = controller
            .coupler()
            .available_dials()
            .iter()
            .map(|dial| dial.to_string())
            .collect();
        println!("Available dial strategies: {}", available.join(", "));
        return Ok(());
    };

    let selection = controller.select_dial(requested)?;
    for event in &selection.events {
        print_event(event);
    }
    print_pair(&selection.config);
    Ok(())
}

pub fn retry(config_path: Option<PathBuf>, requested: Option<RetryStrategy>) -> Result<()> {
    let mut session = super::open(config_path)?;
    let controller = &mut session.controller;

    let Some(requested) = requested else {
        let current = controller.dial_retry()?.config;
        print_pair(&current);
        if controller.coupler().retry_locked(&current) {
            println!("Retry options are disabled while the dial strategy is never-split.");
        }
        return Ok(());
    };

    let selection = controller.select_retry(requested)?;
    if let Some(notice) = &selection.notice {
        print_event(notice);
    }
    print_pair(&selection.config);
    Ok(())
}

fn print_pair(config: &DialRetryConfig) {
    println!(
        "Dial: {} ({})",
        config.dial_strategy,
        config.dial_strategy.calm_label()
    );
    println!(
        "Retry: {} ({})",
        config.retry_strategy,
        config.retry_strategy.calm_label()
    );
}

fn print_event(event: &CouplerEvent) {
    match event {
        CouplerEvent::CapabilityRejected {
            requested,
            applied,
            required,
            platform,
        } => {
            let platform = platform
                .map(|version| version.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            println!(
                "Note: {requested} needs kernel {required} or newer (found {platform}); using {applied}."
            );
        }
        CouplerEvent::RetryCascaded { from, to } => {
            println!("Note: retry strategy changed from {from} to {to}.");
        }
        CouplerEvent::RetryLocked { requested } => {
            println!("Note: {requested} is unavailable while connections are never split.");
        }
    }
}
