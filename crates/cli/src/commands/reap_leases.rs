use std::sync::Arc;

use concord_core::config::LoadOptions;
use concord_db::repositories::SqlLeaseRepository;
use concord_db::LockManager;
use serde_json::json;

use crate::commands::{load_config, open_database, runtime, CommandResult, Failure};

pub fn run() -> CommandResult {
    run_with(LoadOptions::default())
}

pub fn run_with(options: LoadOptions) -> CommandResult {
    let result = load_config(options).and_then(|config| {
        runtime()?.block_on(async {
            let pool = open_database(&config).await?;
            let locks =
                LockManager::new(Arc::new(SqlLeaseRepository::new(pool.clone())), &config.locks);
            let reaped = locks
                .reap_expired()
                .await
                .map_err(|error| ("persistence", error.to_string(), 9));
            pool.close().await;
            Ok::<u64, Failure>(reaped?)
        })
    });

    match result {
        Ok(reaped) => CommandResult::success_with(
            "reap-leases",
            format!("removed {reaped} expired leases"),
            Some(json!({ "reaped": reaped })),
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("reap-leases", error_class, message, exit_code)
        }
    }
}
