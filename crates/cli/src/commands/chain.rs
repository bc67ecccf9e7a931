use std::sync::Arc;

use concord_core::config::LoadOptions;
use concord_core::domain::approval::EntityType;
use concord_core::events::TracingEventSink;
use concord_db::Coordinator;
use serde_json::json;

use crate::commands::{application_failure, load_config, open_database, runtime, CommandResult};

/// Replaces the approval chain for an entity type with `approvers`, level 1 first.
pub fn run(entity_type: &str, approvers: &[String], inactive: bool) -> CommandResult {
    run_with(LoadOptions::default(), entity_type, approvers, inactive)
}

pub fn run_with(
    options: LoadOptions,
    entity_type: &str,
    approvers: &[String],
    inactive: bool,
) -> CommandResult {
    let Some(entity_type) = EntityType::parse(entity_type) else {
        return CommandResult::failure(
            "chain",
            "invalid_input",
            format!(
                "unknown entity type `{entity_type}` (expected quotation|purchase_order|delivery|payment)"
            ),
            6,
        );
    };

    let result = load_config(options).and_then(|config| {
        runtime()?.block_on(async {
            let pool = open_database(&config).await?;
            let concord = Coordinator::sql(pool.clone(), &config, Arc::new(TracingEventSink));

            let configured = concord
                .chains
                .configure_with(entity_type, approvers.iter().cloned(), !inactive)
                .await;
            pool.close().await;

            configured.map_err(application_failure)
        })
    });

    match result {
        Ok(template) => CommandResult::success_with(
            "chain",
            format!(
                "configured {} approval levels for {}",
                template.total_levels(),
                template.entity_type
            ),
            Some(json!({
                "entity_type": template.entity_type,
                "active": template.active,
                "approvers": template.levels.iter().map(|level| &level.approver_id).collect::<Vec<_>>(),
            })),
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("chain", error_class, message, exit_code)
        }
    }
}
