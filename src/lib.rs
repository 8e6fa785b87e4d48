pub mod api;
pub mod core;
pub mod db;
pub mod repositories;
pub mod schemas;
pub mod services;
pub(crate) mod tasks;

#[cfg(test)]
mod test_support;

use anyhow::Context;
use validator::Validate;

use crate::core::{config::Settings, telemetry};
use crate::db::models::Test;
use crate::schemas::rehearsal::RehearsalScript;
use crate::tasks::rehearsal::{read_json, rehearse};

pub use crate::api::errors::ExamError;
pub use crate::api::events::SessionEvent;
pub use crate::api::session::{Collaborators, ExamSessionController};

/// Runs a scripted rehearsal of the configured test and prints the stored result.
pub async fn run() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::load()?;
    telemetry::init_tracing(&settings)?;
    core::metrics::init(&settings)?;

    let rehearsal = settings.rehearsal();
    let test_file = rehearsal.test_file.as_deref().context("REHEARSAL_TEST_FILE is not set")?;
    let test: Test = read_json(test_file).await?;
    let script: RehearsalScript = match rehearsal.script_file.as_deref() {
        Some(path) => read_json(path).await?,
        None => RehearsalScript::default(),
    };
    script.validate().context("Invalid rehearsal script")?;

    tracing::info!(
        test_id = %test.id,
        environment = %settings.runtime().environment.as_str(),
        scripted_answers = script.answers.len(),
        "Starting exam rehearsal"
    );

    let result =
        rehearse(test, &script, settings.exam().clone(), &rehearsal.student_email).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);

    if let Some(rendered) = core::metrics::render() {
        tracing::debug!(metrics = %rendered, "Rehearsal metrics");
    }
    Ok(())
}
