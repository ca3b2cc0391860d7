//! Image storage for ad photos and profile pictures.
//!
//! Uploads are sniffed with `infer` and stored under a random
//! `<uuid>.<ext>` key, either on local disk (served back through
//! `GET /api/uploads/{key}`) or in a public Supabase Storage bucket.

use std::path::PathBuf;

use reqwest::Client;
use uuid::Uuid;

use crate::{
    config::{Settings, SupabaseStorageSettings},
    error::{ApiError, ApiResult},
};

/// Largest accepted upload.
pub const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;

const ALLOWED: &[(&str, &str)] = &[("image/jpeg", "jpg"), ("image/png", "png"), ("image/webp", "webp")];

/// A validated image ready to store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageKind {
    pub mime: &'static str,
    pub ext: &'static str,
}

/// Checks the declared content type and the sniffed bytes.
///
/// # Errors
/// * 413 when larger than [`MAX_IMAGE_BYTES`]
/// * 400 when empty
/// * 415 when not declared as `image/*` or not a jpeg/png/webp
pub fn validate_image(content_type: &str, body: &[u8]) -> ApiResult<ImageKind> {
    if body.is_empty() {
        return Err(ApiError::bad_request("Image body is empty"));
    }
    if body.len() > MAX_IMAGE_BYTES {
        return Err(ApiError::PayloadTooLarge("Images must be at most 5 MiB".into()));
    }
    if !content_type.starts_with("image/") {
        return Err(ApiError::UnsupportedMediaType("Only image/* types allowed".into()));
    }

    let detected = infer::get(body)
        .map(|k| k.mime_type())
        .ok_or_else(|| ApiError::UnsupportedMediaType("Could not detect image type".into()))?;

    ALLOWED
        .iter()
        .find(|(mime, _)| *mime == detected)
        .map(|(mime, ext)| ImageKind { mime, ext })
        .ok_or_else(|| {
            ApiError::UnsupportedMediaType(format!("Only jpg, png, webp are allowed, got {detected}"))
        })
}

/// Fresh random storage key for an image.
pub fn new_key(kind: &ImageKind) -> String {
    format!("{}.{}", Uuid::new_v4(), kind.ext)
}

/// Accepts only keys produced by [`new_key`], which rules out path traversal.
pub fn parse_key(key: &str) -> Option<&'static str> {
    let (stem, ext) = key.rsplit_once('.')?;
    Uuid::parse_str(stem).ok()?;
    ALLOWED.iter().find(|(_, e)| *e == ext).map(|(mime, _)| *mime)
}

/// Where images live.
#[derive(Debug)]
pub enum ImageStore {
    Local {
        dir: PathBuf,
        public_base_url: String,
    },
    Supabase {
        client: Client,
        settings: SupabaseStorageSettings,
    },
}

impl ImageStore {
    /// Supabase when fully configured, local disk otherwise.
    pub fn from_settings(settings: &Settings) -> Self {
        match &settings.supabase {
            Some(supabase) => Self::Supabase { client: Client::new(), settings: supabase.clone() },
            None => Self::Local {
                dir: settings.upload_dir.clone(),
                public_base_url: settings.public_base_url.clone(),
            },
        }
    }

    /// Stores `bytes` under `key` and returns the public URL.
    pub async fn put(&self, key: &str, bytes: &[u8], kind: &ImageKind) -> ApiResult<String> {
        match self {
            Self::Local { dir, public_base_url } => {
                tokio::fs::create_dir_all(dir)
                    .await
                    .map_err(|e| ApiError::Internal(format!("create upload dir: {e}")))?;
                tokio::fs::write(dir.join(key), bytes)
                    .await
                    .map_err(|e| ApiError::Internal(format!("write upload: {e}")))?;
                Ok(format!("{public_base_url}/api/uploads/{key}"))
            }
            Self::Supabase { client, settings } => {
                let res = client
                    .post(format!("{}/storage/v1/object/{}/{}", settings.url, settings.bucket, key))
                    .bearer_auth(&settings.service_key)
                    .header("apikey", &settings.service_key)
                    .header("Content-Type", kind.mime)
                    .body(bytes.to_vec())
                    .send()
                    .await?;

                if !res.status().is_success() {
                    let status = res.status();
                    let body = res.text().await.unwrap_or_default();
                    tracing::error!(status = %status, body = %body, "Supabase Storage rejected upload");
                    return Err(ApiError::Upstream(format!("storage upload failed with {status}")));
                }

                Ok(format!(
                    "{}/storage/v1/object/public/{}/{}",
                    settings.url, settings.bucket, key
                ))
            }
        }
    }

    /// Reads a locally stored image. Remote stores serve their own URLs, so
    /// this returns `None` for them.
    pub async fn get(&self, key: &str) -> ApiResult<Option<(Vec<u8>, &'static str)>> {
        let Some(mime) = parse_key(key) else {
            return Ok(None);
        };
        match self {
            Self::Local { dir, .. } => match tokio::fs::read(dir.join(key)).await {
                Ok(bytes) => Ok(Some((bytes, mime))),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(ApiError::Internal(format!("read upload: {e}"))),
            },
            Self::Supabase { .. } => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_HEADER: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0x0D];
    const GIF_HEADER: &[u8] = b"GIF89a\x01\x00\x01\x00";

    #[test]
    fn accepts_png_and_rejects_other_formats() {
        let kind = validate_image("image/png", PNG_HEADER).unwrap();
        assert_eq!(kind, ImageKind { mime: "image/png", ext: "png" });

        let err = validate_image("image/gif", GIF_HEADER).unwrap_err();
        assert!(matches!(err, ApiError::UnsupportedMediaType(_)));

        let err = validate_image("application/octet-stream", PNG_HEADER).unwrap_err();
        assert!(matches!(err, ApiError::UnsupportedMediaType(_)));
    }

    #[test]
    fn rejects_empty_and_oversized_bodies() {
        assert!(matches!(validate_image("image/png", &[]), Err(ApiError::BadRequest(_))));
        let big = vec![0u8; MAX_IMAGE_BYTES + 1];
        assert!(matches!(validate_image("image/png", &big), Err(ApiError::PayloadTooLarge(_))));
    }

    #[test]
    fn keys_are_uuid_with_known_extension() {
        let kind = ImageKind { mime: "image/webp", ext: "webp" };
        let key = new_key(&kind);
        assert_eq!(parse_key(&key), Some("image/webp"));
        assert_eq!(parse_key("../../etc/passwd"), None);
        assert_eq!(parse_key("not-a-uuid.png"), None);
        assert_eq!(parse_key(&format!("{}.exe", Uuid::new_v4())), None);
    }

    #[tokio::test]
    async fn local_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = ImageStore::Local { dir: dir.path().to_path_buf(), public_base_url: String::new() };
        let kind = validate_image("image/png", PNG_HEADER).unwrap();
        let key = new_key(&kind);

        let url = store.put(&key, PNG_HEADER, &kind).await.unwrap();
        assert_eq!(url, format!("/api/uploads/{key}"));

        let (bytes, mime) = store.get(&key).await.unwrap().unwrap();
        assert_eq!(bytes, PNG_HEADER);
        assert_eq!(mime, "image/png");

        let missing = new_key(&kind);
        assert!(store.get(&missing).await.unwrap().is_none());
    }
}
