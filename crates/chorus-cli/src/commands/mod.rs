pub mod list;
pub mod resume;
pub mod run;
pub mod show;

use anyhow::{Context, Result};
use chorus_application::SessionController;
use chorus_core::config::ChorusConfig;
use chorus_core::session::{Session, SessionStatus};
use chorus_infrastructure::{ChorusPaths, ConfigService, JsonSessionRepository};
use chorus_interaction::HttpEventTransport;
use std::process::ExitCode;
use std::sync::Arc;

use crate::DispatchArgs;
use crate::render::ProgressRenderer;

/// Exit status for a session stopped with Ctrl-C.
const EXIT_CANCELLED: u8 = 130;

/// Shared state for command handlers.
pub struct CliContext {
    paths: ChorusPaths,
    config: ConfigService,
}

impl CliContext {
    pub fn new(paths: ChorusPaths) -> Self {
        let config = ConfigService::new(&paths);
        Self { paths, config }
    }

    /// Effective config: file, then environment, then command-line flags.
    pub fn config(&self, overrides: &DispatchArgs) -> Result<ChorusConfig> {
        let mut config = self.config.load()?;
        if let Some(endpoint) = &overrides.endpoint {
            config.endpoint = endpoint.clone();
        }
        if let Some(secs) = overrides.poll_interval {
            config.poll_interval_secs = secs;
        }
        Ok(config)
    }

    pub fn repository(&self) -> Result<Arc<JsonSessionRepository>> {
        Ok(Arc::new(JsonSessionRepository::new(self.paths.sessions_dir())?))
    }

    pub fn controller(&self, config: &ChorusConfig) -> Result<SessionController> {
        let transport = HttpEventTransport::from_config(config)
            .context("Failed to set up dispatcher transport")?;
        let mut controller = SessionController::new(Arc::new(transport))
            .with_poll_interval(config.poll_interval());
        if config.persist_sessions {
            controller = controller.with_repository(self.repository()?);
        }
        Ok(controller)
    }
}

/// Renders the active session until it settles; Ctrl-C cancels it.
pub async fn follow(controller: &SessionController) -> Result<ExitCode> {
    let mut renderer = ProgressRenderer::default();
    let mut updates = controller.subscribe();

    let session = loop {
        let latest = updates.borrow_and_update().clone();
        if let Some(session) = latest {
            for line in renderer.changes(&session) {
                println!("{line}");
            }
            if session.is_settled() {
                break session;
            }
        }

        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break controller
                        .snapshot()
                        .await
                        .context("Session ended without a final state")?;
                }
            }
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl-C")?;
                controller.cancel().await;
            }
        }
    };

    for line in renderer.summary(&session) {
        println!("{line}");
    }
    Ok(exit_code(&session))
}

fn exit_code(session: &Session) -> ExitCode {
    if session.cancelled {
        return ExitCode::from(EXIT_CANCELLED);
    }
    match session.status {
        SessionStatus::Completed => ExitCode::SUCCESS,
        _ => ExitCode::FAILURE,
    }
}
