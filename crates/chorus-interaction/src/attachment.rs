//! Loading local files into prompt attachments.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use chorus_core::dispatch::Attachment;
use chorus_core::{ChorusError, Result};
use std::path::Path;

/// Reads `path` and encodes it as a base64 attachment.
///
/// The mime type is guessed from the file extension and falls back to
/// `application/octet-stream`.
///
/// # Errors
///
/// Returns an `Io` error if the file cannot be read.
pub async fn load_attachment(path: &Path) -> Result<Attachment> {
    let bytes = tokio::fs::read(path).await.map_err(|err| {
        ChorusError::io(format!("Failed to read attachment {}: {err}", path.display()))
    })?;

    let mime_type = mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string();
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "attachment".to_string());

    tracing::debug!(
        "[Attachment] Loaded {} ({}, {} bytes)",
        name,
        mime_type,
        bytes.len()
    );

    Ok(Attachment {
        name,
        mime_type,
        data: BASE64_STANDARD.encode(bytes),
    })
}
