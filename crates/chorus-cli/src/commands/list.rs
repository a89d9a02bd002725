use anyhow::Result;
use chorus_core::session::SessionRepository;
use std::process::ExitCode;

use super::CliContext;
use crate::render::status_label;

pub async fn execute(context: &CliContext) -> Result<ExitCode> {
    let records = context.repository()?.list_all().await?;
    if records.is_empty() {
        println!("No stored sessions");
        return Ok(ExitCode::SUCCESS);
    }

    for record in records {
        let session = &record.session;
        println!(
            "{}  {:<10} {:>12}  {}  {}",
            session.id,
            status_label(session),
            session.progress().to_string(),
            session.updated_at.format("%Y-%m-%d %H:%M:%S"),
            session.participants.join(",")
        );
    }
    Ok(ExitCode::SUCCESS)
}
