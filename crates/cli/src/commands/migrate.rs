use concord_core::config::LoadOptions;

use crate::commands::{load_config, open_database, runtime, CommandResult, Failure};

pub fn run() -> CommandResult {
    run_with(LoadOptions::default())
}

pub fn run_with(options: LoadOptions) -> CommandResult {
    let result = load_config(options).and_then(|config| {
        runtime()?.block_on(async {
            let pool = open_database(&config).await?;
            pool.close().await;
            Ok::<(), Failure>(())
        })
    });

    match result {
        Ok(()) => CommandResult::success("migrate", "applied pending migrations"),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("migrate", error_class, message, exit_code)
        }
    }
}
