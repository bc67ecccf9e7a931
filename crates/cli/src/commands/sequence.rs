use std::sync::Arc;

use chrono::Utc;
use concord_core::config::LoadOptions;
use concord_core::domain::sequence::PeriodKey;
use concord_core::events::TracingEventSink;
use concord_core::ApplicationError;
use concord_db::Coordinator;
use serde_json::json;

use crate::commands::{application_failure, load_config, open_database, runtime, CommandResult};

/// Issues the next number for `period` (current two-digit year when omitted),
/// rendered as a document code when `prefix` is given.
pub fn run(period: Option<&str>, prefix: Option<&str>) -> CommandResult {
    run_with(LoadOptions::default(), period, prefix)
}

pub fn run_with(options: LoadOptions, period: Option<&str>, prefix: Option<&str>) -> CommandResult {
    let result = load_config(options).and_then(|config| {
        let period_key = match period {
            Some(raw) => PeriodKey::new(raw)
                .map_err(|error| application_failure(ApplicationError::from(error)))?,
            None => PeriodKey::for_year(Utc::now()),
        };

        runtime()?.block_on(async {
            let pool = open_database(&config).await?;
            let concord = Coordinator::sql(pool.clone(), &config, Arc::new(TracingEventSink));

            let issued = match prefix {
                Some(prefix) => concord
                    .sequences
                    .next_code_in(prefix, &period_key)
                    .await
                    .map(|code| json!({ "period_key": period_key.as_str(), "code": code })),
                None => concord
                    .sequences
                    .next(&period_key)
                    .await
                    .map(|value| json!({ "period_key": period_key.as_str(), "value": value })),
            };
            pool.close().await;

            issued.map_err(application_failure)
        })
    });

    match result {
        Ok(data) => CommandResult::success_with("sequence", "issued sequence value", Some(data)),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("sequence", error_class, message, exit_code)
        }
    }
}
