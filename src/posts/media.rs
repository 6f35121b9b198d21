//! Media payload checks and object-storage layout.

use std::path::Path;

use bytes::Bytes;
use uuid::Uuid;

use crate::{db::NewMedia, error::ApiError};

pub const MAX_MEDIA_BYTES: usize = 25 * 1024 * 1024;

const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "gif"];
const VIDEO_EXTENSIONS: [&str; 4] = ["mp4", "mov", "avi", "mkv"];

/// Presigned media URLs stay valid this long.
pub const URL_TTL_SECS: u64 = 30 * 60;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MediaError {
    #[error("Unsupported file extension for {file_name}. Allowed: .jpg, .jpeg, .png, .gif, .mp4, .mov, .avi, .mkv.")]
    UnsupportedExtension { file_name: String },
    #[error("File {file_name} is too large. Max size is {} MB.", MAX_MEDIA_BYTES / (1024 * 1024))]
    TooLarge { file_name: String },
    #[error("File {file_name} is empty.")]
    Empty { file_name: String },
    #[error("File {file_name} is not valid base64.")]
    BadEncoding { file_name: String },
}

impl From<MediaError> for ApiError {
    fn from(e: MediaError) -> Self {
        ApiError::field("media", e.to_string())
    }
}

/// A payload received from the client, not yet stored.
#[derive(Debug, Clone)]
pub struct MediaUpload {
    pub file_name: String,
    pub body: Bytes,
}

/// A payload that passed validation, with its storage key assigned.
#[derive(Debug, Clone)]
pub struct CheckedMedia {
    pub key: String,
    pub file_name: String,
    pub content_type: &'static str,
    pub is_video: bool,
    pub body: Bytes,
}

impl CheckedMedia {
    pub fn record(&self) -> NewMedia {
        NewMedia {
            file_key: self.key.clone(),
            file_name: self.file_name.clone(),
            is_video: self.is_video,
            size: self.body.len() as i64,
        }
    }
}

fn extension(file_name: &str) -> Option<String> {
    Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
}

fn content_type(ext: &str) -> &'static str {
    match ext {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "mp4" => "video/mp4",
        "mov" => "video/quicktime",
        "avi" => "video/x-msvideo",
        "mkv" => "video/x-matroska",
        _ => "application/octet-stream",
    }
}

pub fn check(upload: MediaUpload) -> Result<CheckedMedia, MediaError> {
    let ext = extension(&upload.file_name).unwrap_or_default();
    let is_video = VIDEO_EXTENSIONS.contains(&ext.as_str());
    if !is_video && !IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        return Err(MediaError::UnsupportedExtension {
            file_name: upload.file_name,
        });
    }
    if upload.body.is_empty() {
        return Err(MediaError::Empty {
            file_name: upload.file_name,
        });
    }
    if upload.body.len() > MAX_MEDIA_BYTES {
        return Err(MediaError::TooLarge {
            file_name: upload.file_name,
        });
    }

    Ok(CheckedMedia {
        key: format!("post_media/{}.{}", Uuid::new_v4().simple(), ext),
        file_name: upload.file_name,
        content_type: content_type(&ext),
        is_video,
        body: upload.body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upload(name: &str, len: usize) -> MediaUpload {
        MediaUpload {
            file_name: name.into(),
            body: Bytes::from(vec![0u8; len]),
        }
    }

    #[test]
    fn extension_decides_kind_case_insensitively() {
        let img = check(upload("Cat.JPG", 3)).unwrap();
        assert!(!img.is_video);
        assert_eq!(img.content_type, "image/jpeg");
        assert!(img.key.starts_with("post_media/") && img.key.ends_with(".jpg"));

        let vid = check(upload("clip.MkV", 3)).unwrap();
        assert!(vid.is_video);
        assert_eq!(vid.content_type, "video/x-matroska");
    }

    #[test]
    fn rejects_unknown_extensions() {
        for name in ["notes.txt", "archive.tar.gz", "noext", ".png.exe"] {
            assert!(matches!(
                check(upload(name, 3)),
                Err(MediaError::UnsupportedExtension { .. })
            ));
        }
    }

    #[test]
    fn size_limit_is_inclusive() {
        assert!(check(upload("a.mp4", MAX_MEDIA_BYTES)).is_ok());
        assert!(matches!(
            check(upload("a.png", MAX_MEDIA_BYTES + 1)),
            Err(MediaError::TooLarge { .. })
        ));
        assert!(matches!(check(upload("a.png", 0)), Err(MediaError::Empty { .. })));
    }

    #[test]
    fn keys_are_unique() {
        let a = check(upload("a.png", 1)).unwrap();
        let b = check(upload("a.png", 1)).unwrap();
        assert_ne!(a.key, b.key);
        assert_eq!(a.record().size, 1);
    }
}
