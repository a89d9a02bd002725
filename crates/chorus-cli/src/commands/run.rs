use anyhow::{Result, bail};
use chorus_core::dispatch::PromptPayload;
use chorus_interaction::load_attachment;
use colored::Colorize;
use std::process::ExitCode;

use super::{CliContext, follow};
use crate::RunArgs;

pub async fn execute(context: &CliContext, args: RunArgs) -> Result<ExitCode> {
    let config = context.config(&args.dispatch)?;

    let models = if args.models.is_empty() {
        config.default_models.clone()
    } else {
        args.models
    };
    if models.is_empty() {
        bail!("No models selected: pass --model or set default_models in config.toml");
    }

    let mut prompt = PromptPayload::text(args.prompt);
    for image in &args.images {
        prompt = prompt.with_attachment(load_attachment(image).await?);
    }
    if prompt.is_empty() {
        bail!("Prompt is empty");
    }

    let controller = context.controller(&config)?;
    let session = controller.submit(models, prompt).await?;
    println!(
        "{} {} ({} models, {})",
        "Session".bold(),
        session.id,
        session.participants.len(),
        config.endpoint
    );

    follow(&controller).await
}
