use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use appwall_core::ids::EntityId;
use appwall_core::types::AppInfo;
use policy_engine::{BlockType, BulkSession, EntityOutcome, Filter};

#[derive(Debug)]
pub struct BulkInputs {
    pub config_path: Option<PathBuf>,
    pub block_type: BlockType,
    pub filter: Filter,
    pub confirmed: bool,
    pub json: bool,
}

pub fn execute(inputs: BulkInputs) -> Result<()> {
    let mut session = super::open(inputs.config_path)?;
    let mut directions = load_session(&session.paths.session_path)?;

    if !inputs.confirmed {
        let matched = session.controller.list(&inputs.filter)?;
        println!(
            "{} {} would touch {} uids ({} packages); re-run with --yes to apply",
            directions.direction(inputs.block_type),
            inputs.block_type,
            distinct_uids(&matched),
            matched.len()
        );
        return Ok(());
    }

    let report = session
        .controller
        .apply_bulk(&mut directions, inputs.block_type, &inputs.filter)?;
    save_session(&session.paths.session_path, &directions)?;

    if inputs.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    println!("Batch {}: {}", report.batch_id, report.human_summary());
    for result in &report.results {
        match &result.outcome {
            EntityOutcome::Applied { .. } => {}
            EntityOutcome::Skipped { refusal } => {
                println!("  skipped uid {}: {}", result.entity_id, refusal)
            }
            EntityOutcome::Failed { reason } => {
                println!("  failed uid {}: {}", result.entity_id, reason)
            }
        }
    }
    Ok(())
}

/// Bulk writes once per uid, however many packages share it.
fn distinct_uids(apps: &[AppInfo]) -> usize {
    apps.iter()
        .map(|app| app.uid())
        .collect::<BTreeSet<EntityId>>()
        .len()
}

fn load_session(path: &Path) -> Result<BulkSession> {
    if !path.exists() {
        return Ok(BulkSession::new());
    }
    let contents = fs::read_to_string(path)
        .with_context(|| format!("read bulk session {}", path.display()))?;
    serde_json::from_str(&contents).context("parse bulk session JSON")
}

fn save_session(path: &Path, session: &BulkSession) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create state dir {}", parent.display()))?;
    }
    let contents = serde_json::to_string_pretty(session)?;
    fs::write(path, contents)
        .with_context(|| format!("write bulk session {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use appwall_core::status::AppPolicy;
    use appwall_core::types::PackageInfo;

    fn row(uid: u32, name: &str) -> AppInfo {
        AppInfo::new(
            PackageInfo {
                uid: EntityId(uid),
                package_name: name.to_string(),
                app_name: name.to_string(),
                is_system_app: false,
                app_category: "Other".to_string(),
            },
            AppPolicy::new(EntityId(uid)),
        )
    }

    #[test]
    fn test_preview_counts_shared_uid_once() {
        let apps = vec![
            row(10_001, "com.example.chat"),
            row(10_001, "com.example.chat.push"),
            row(10_002, "com.example.maps"),
        ];
        assert_eq!(distinct_uids(&apps), 2);
        assert_eq!(distinct_uids(&[]), 0);
    }

    #[test]
    fn test_session_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        assert_eq!(load_session(&path).unwrap(), BulkSession::new());

        let mut session = BulkSession::new();
        session.advance(BlockType::Exclude);
        save_session(&path, &session).unwrap();
        assert_eq!(load_session(&path).unwrap(), session);
    }
}
