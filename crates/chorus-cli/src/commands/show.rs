use anyhow::Result;
use chorus_core::ChorusError;
use chorus_core::session::SessionRepository;
use std::process::ExitCode;

use super::CliContext;

pub async fn execute(context: &CliContext, session_id: &str) -> Result<ExitCode> {
    let record = context
        .repository()?
        .find_by_id(session_id)
        .await?
        .ok_or_else(|| ChorusError::not_found("session", session_id))?;

    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(ExitCode::SUCCESS)
}
