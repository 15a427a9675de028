use anyhow::Context;
use bytes::Bytes;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::PhotoConfig;
use crate::storage::StorageClient;

/// Image types accepted for the avatar, with the extension used for the stored key.
pub const ACCEPTED_TYPES: &[(&str, &str)] = &[
    ("image/jpeg", "jpg"),
    ("image/jpg", "jpg"),
    ("image/png", "png"),
    ("image/webp", "webp"),
    ("image/gif", "gif"),
];

pub struct PhotoUpload {
    pub body: Bytes,
    pub content_type: String,
}

/// An upload that passed the type and size checks.
pub struct CheckedPhoto {
    body: Bytes,
    content_type: String,
    ext: &'static str,
}

fn ext_from_mime(ct: &str) -> Option<&'static str> {
    ACCEPTED_TYPES
        .iter()
        .find(|(mime, _)| mime.eq_ignore_ascii_case(ct))
        .map(|(_, ext)| *ext)
}

pub fn check(upload: PhotoUpload, cfg: &PhotoConfig) -> Result<CheckedPhoto, String> {
    let Some(ext) = ext_from_mime(&upload.content_type) else {
        return Err("The photo must be an image (jpeg, png, webp, gif).".into());
    };
    if upload.body.len() > cfg.max_bytes {
        return Err(format!(
            "The photo may not be greater than {} kilobytes.",
            cfg.max_bytes / 1024
        ));
    }
    Ok(CheckedPhoto {
        body: upload.body,
        content_type: upload.content_type.to_ascii_lowercase(),
        ext,
    })
}

pub fn object_key(directory: &str, ext: &str) -> String {
    let directory = directory.trim_matches('/');
    if directory.is_empty() {
        format!("{}.{}", Uuid::new_v4(), ext)
    } else {
        format!("{}/{}.{}", directory, Uuid::new_v4(), ext)
    }
}

/// Writes the photo under `directory` and returns the reference to save on the record.
pub async fn store(
    storage: &dyn StorageClient,
    directory: &str,
    photo: CheckedPhoto,
) -> anyhow::Result<String> {
    let key = object_key(directory, photo.ext);
    storage
        .put_object(&key, photo.body, &photo.content_type)
        .await
        .with_context(|| format!("put_object {}", key))?;
    debug!(key = %key, "photo stored");
    Ok(key)
}

/// Best-effort removal of a stored photo; failures are logged, not returned.
pub async fn discard(storage: &dyn StorageClient, key: &str) {
    if let Err(e) = storage.delete_object(key).await {
        warn!(error = %e, key = %key, "failed to delete photo object");
    }
}

/// The stored reference when there is one, the placeholder otherwise.
pub fn resolve_photo(photo: Option<&str>, placeholder: &str) -> String {
    match photo {
        Some(reference) if !reference.is_empty() => reference.to_string(),
        _ => placeholder.to_string(),
    }
}
