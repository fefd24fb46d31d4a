//! `delete-with-confirmation`: destructive delete behind a confirmation gate.
//!
//! Unless `skipConfirmation` is set, the user is asked first. The answer may
//! override the backup choices from the arguments. A backup of a file lands at
//! `<location><name>.<unix-millis>.bak`; a directory backup copies the whole
//! subtree under `<location><name>.<unix-millis>.bak/`.

use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::info;

use super::{Tool, ToolContext, ToolError, ToolKind, ToolSettings};
use crate::elicitation::{ConfirmationRequest, ElicitationSchema};
use crate::store::{DeleteOptions, Node, NodePath, PathStore, StoreError};

/// Delete a file or directory tree, optionally backing it up first.
#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DeleteWithConfirmationArgs {
    #[schemars(description = "File or directory (trailing '/') to delete")]
    pub path: NodePath,
    #[schemars(description = "Delete without asking for confirmation")]
    #[serde(default)]
    pub skip_confirmation: bool,
    #[schemars(description = "Copy the target to the backup location before deleting")]
    #[serde(default)]
    pub create_backup: bool,
    #[schemars(description = "Backup directory (default from server config)")]
    #[serde(default)]
    pub backup_location: Option<NodePath>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DeleteWithConfirmationTool;

/// Backup choices after merging arguments with the confirmation form.
#[derive(Debug, PartialEq)]
struct BackupPlan {
    enabled: bool,
    location: NodePath,
}

fn backup_plan(
    args: &DeleteWithConfirmationArgs,
    form: Option<&Map<String, Value>>,
    settings: &ToolSettings,
) -> Result<BackupPlan, ToolError> {
    let enabled = form
        .and_then(|f| f.get("createBackup"))
        .and_then(Value::as_bool)
        .unwrap_or(args.create_backup);

    let location = match form
        .and_then(|f| f.get("backupLocation"))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
    {
        Some(raw) => NodePath::parse(raw)?,
        None => args
            .backup_location
            .clone()
            .unwrap_or_else(|| settings.backup_location.clone()),
    };

    Ok(BackupPlan {
        enabled,
        location: location.as_dir(),
    })
}

fn unix_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
}

/// Copy `target` under `location`, returning the backup's path.
fn back_up(ctx: &ToolContext, target: &NodePath, location: &NodePath) -> Result<NodePath, ToolError> {
    if location == target || location.is_descendant_of(target) {
        return Err(ToolError::InvalidArguments(format!(
            "backup location {location} lies inside {target}"
        )));
    }

    let stamp = unix_millis();
    ctx.mutate(|store| store.mkdir_all(location))?;

    if !target.is_dir() {
        let content = match ctx.store().get(target) {
            Some(Node::File(content)) => content,
            _ => return Err(StoreError::not_found(target.as_str()).into()),
        };
        let backup = location.join(&format!("{}.{stamp}.bak", target.name()))?;
        ctx.mutate(|store| store.write(&backup, content))?;
        return Ok(backup);
    }

    let subtree = ctx.store().snapshot_subtree(target)?;
    let root = location.join(&format!("{}.{stamp}.bak/", target.name()))?;
    for (key, node) in subtree {
        let dest = root.join(key.relative_to(target).unwrap_or(""))?;
        match node {
            Node::Directory => {
                ctx.mutate(|store| store.mkdir_all(&dest))?;
            }
            Node::File(content) => {
                ctx.mutate(|store| store.write(&dest, content))?;
            }
        }
    }
    Ok(root)
}

#[async_trait]
impl Tool for DeleteWithConfirmationTool {
    type Args = DeleteWithConfirmationArgs;

    const KIND: ToolKind = ToolKind::DeleteWithConfirmation;
    const DESCRIPTION: &'static str = "Delete a file or a directory with everything below it. \
        Asks for confirmation first unless skipConfirmation is set, and can back the target up.";
    const DESTRUCTIVE: bool = true;

    fn validate(&self, args: &DeleteWithConfirmationArgs) -> Result<(), String> {
        if args.path.is_root() {
            return Err("the root directory cannot be deleted".into());
        }
        Ok(())
    }

    fn confirmation(
        &self,
        args: &DeleteWithConfirmationArgs,
        store: &PathStore,
        settings: &ToolSettings,
    ) -> Option<ConfirmationRequest> {
        // Nothing to confirm; run() reports NotFound.
        if args.skip_confirmation || !store.exists(&args.path) {
            return None;
        }

        let what = if args.path.is_dir() {
            "directory and everything in it"
        } else {
            "file"
        };
        let location = args
            .backup_location
            .clone()
            .unwrap_or_else(|| settings.backup_location.clone())
            .as_dir();

        Some(ConfirmationRequest {
            action: format!("delete {}", args.path),
            question: format!(
                "Delete the {what} at {}? This cannot be undone.",
                args.path
            ),
            schema: ElicitationSchema::new()
                .boolean("confirm", "Confirm the deletion", None, true)
                .boolean(
                    "createBackup",
                    "Create a backup before deleting",
                    Some(args.create_backup),
                    false,
                )
                .string(
                    "backupLocation",
                    "Directory to store the backup in",
                    Some(location.to_string()),
                    false,
                ),
        })
    }

    async fn run(
        &self,
        args: DeleteWithConfirmationArgs,
        ctx: &mut ToolContext,
    ) -> Result<String, ToolError> {
        if !ctx.store().exists(&args.path) {
            return Err(StoreError::not_found(args.path.as_str()).into());
        }

        let plan = backup_plan(&args, ctx.confirmation(), ctx.settings())?;
        let backup = if plan.enabled {
            let backup = back_up(ctx, &args.path, &plan.location)?;
            info!(path = %args.path, backup = %backup, "backed up before delete");
            Some(backup)
        } else {
            None
        };

        ctx.check_cancelled()?;
        let removed = ctx.mutate(|store| store.delete(&args.path, DeleteOptions { cascade: true }))?;

        Ok(match backup {
            Some(backup) => format!(
                "Deleted {} ({} entries); backup at {backup}",
                args.path,
                removed.len()
            ),
            None => format!("Deleted {} ({} entries)", args.path, removed.len()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn p(raw: &str) -> NodePath {
        NodePath::parse(raw).unwrap()
    }

    fn args(value: Value) -> DeleteWithConfirmationArgs {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_plan_from_arguments() {
        let plan = backup_plan(
            &args(json!({"path": "/a", "createBackup": true, "backupLocation": "/bak"})),
            None,
            &ToolSettings::default(),
        )
        .unwrap();
        assert_eq!(plan, BackupPlan { enabled: true, location: p("/bak/") });
    }

    #[test]
    fn test_form_overrides_arguments() {
        let form = json!({"confirm": true, "createBackup": true, "backupLocation": "/saved/"});
        let plan = backup_plan(
            &args(json!({"path": "/a"})),
            form.as_object(),
            &ToolSettings::default(),
        )
        .unwrap();
        assert_eq!(plan, BackupPlan { enabled: true, location: p("/saved/") });
    }

    #[test]
    fn test_plan_defaults() {
        let plan = backup_plan(
            &args(json!({"path": "/a"})),
            json!({"confirm": true}).as_object(),
            &ToolSettings::default(),
        )
        .unwrap();
        assert_eq!(plan, BackupPlan { enabled: false, location: p("/backups/") });
    }

    #[test]
    fn test_bad_form_location_is_invalid_path() {
        let err = backup_plan(
            &args(json!({"path": "/a"})),
            json!({"confirm": true, "backupLocation": "/x/../y"}).as_object(),
            &ToolSettings::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ToolError::Store(StoreError::InvalidPath(_))));
    }

    #[test]
    fn test_confirmation_skipped_when_flagged_or_absent() {
        let store = PathStore::new();
        store.write(&p("/a"), "x").unwrap();
        let settings = ToolSettings::default();
        let tool = DeleteWithConfirmationTool;

        assert!(tool
            .confirmation(&args(json!({"path": "/a", "skipConfirmation": true})), &store, &settings)
            .is_none());
        assert!(tool
            .confirmation(&args(json!({"path": "/missing"})), &store, &settings)
            .is_none());

        let request = tool
            .confirmation(&args(json!({"path": "/a"})), &store, &settings)
            .unwrap();
        let schema = request.schema.to_json();
        assert_eq!(schema["required"], json!(["confirm"]));
        assert_eq!(schema["properties"]["backupLocation"]["default"], "/backups/");
    }

    #[test]
    fn test_root_is_rejected() {
        assert!(DeleteWithConfirmationTool.validate(&args(json!({"path": "/"}))).is_err());
    }
}
