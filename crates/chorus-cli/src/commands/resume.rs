use anyhow::Result;
use chorus_core::ChorusError;
use chorus_core::session::SessionRepository;
use colored::Colorize;
use std::process::ExitCode;

use super::{CliContext, follow};
use crate::DispatchArgs;

pub async fn execute(
    context: &CliContext,
    session_id: &str,
    dispatch: &DispatchArgs,
) -> Result<ExitCode> {
    let config = context.config(dispatch)?;
    let record = context
        .repository()?
        .find_by_id(session_id)
        .await?
        .ok_or_else(|| ChorusError::not_found("session", session_id))?;

    let controller = context.controller(&config)?;
    let session = controller.resume(record).await?;
    println!(
        "{} {} ({}, {} pending)",
        "Resuming".bold(),
        session.id,
        session.status,
        session.pending_keys().len()
    );

    follow(&controller).await
}
