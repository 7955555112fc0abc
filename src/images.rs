use std::path::{Path, PathBuf};

use image::ImageFormat;
use rocket::fs::TempFile;
use rocket::tokio::io::AsyncReadExt;

use crate::config::UploadConfig;
use crate::models::portfolio::PortfolioImage;

pub const ALLOWED_MIME_TYPES: [&str; 4] = ["image/jpeg", "image/png", "image/webp", "image/gif"];
pub const ALLOWED_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "webp", "gif"];
pub const MAX_FILES_PER_FIELD: usize = 10;

/// Public URL prefix the portfolio directory is served under.
pub const PORTFOLIO_URL_PREFIX: &str = "/uploads/portfolio";

/// Bytes read from the head of a file to recognise its format.
const SNIFF_LEN: u64 = 64;

/// Where portfolio images go and how large they may be.
#[derive(Debug, Clone)]
pub struct UploadPolicy {
    pub dir: PathBuf,
    pub max_file_bytes: u64,
}

impl UploadPolicy {
    pub fn from_config(config: &UploadConfig) -> Self {
        Self {
            dir: config.portfolio_dir(),
            max_file_bytes: config.max_file_bytes(),
        }
    }
}

/// An upload that passed every check and is ready to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckedUpload {
    pub extension: &'static str,
    pub content_type: &'static str,
    pub original_name: Option<String>,
    pub size: u64,
}

fn format_info(format: ImageFormat) -> Option<(&'static str, &'static str)> {
    match format {
        ImageFormat::Jpeg => Some(("jpg", "image/jpeg")),
        ImageFormat::Png => Some(("png", "image/png")),
        ImageFormat::WebP => Some(("webp", "image/webp")),
        ImageFormat::Gif => Some(("gif", "image/gif")),
        _ => None,
    }
}

pub fn check_count(field: &str, count: usize) -> Result<(), String> {
    if count > MAX_FILES_PER_FIELD {
        return Err(format!(
            "{}: at most {} files allowed, got {}",
            field, MAX_FILES_PER_FIELD, count
        ));
    }
    Ok(())
}

/// Checks on what the client declared: MIME type, file extension and size.
pub fn check_declared(
    field: &str,
    content_type: Option<&str>,
    file_name: Option<&str>,
    size: u64,
    max_bytes: u64,
) -> Result<(), String> {
    let name = file_name.unwrap_or("file");
    if size > max_bytes {
        return Err(format!(
            "{}: {} is larger than {} bytes",
            field, name, max_bytes
        ));
    }
    let mime = content_type
        .map(|ct| ct.split(';').next().unwrap_or("").trim().to_ascii_lowercase())
        .unwrap_or_default();
    if !ALLOWED_MIME_TYPES.contains(&mime.as_str()) {
        return Err(format!("{}: {} has unsupported type '{}'", field, name, mime));
    }
    let ext = file_name
        .and_then(|n| n.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    if !ALLOWED_EXTENSIONS.contains(&ext.as_str()) {
        return Err(format!("{}: {} has unsupported extension", field, name));
    }
    Ok(())
}

/// Recognise the image format from the first bytes of the file.
pub fn sniff(field: &str, head: &[u8]) -> Result<(&'static str, &'static str), String> {
    image::guess_format(head)
        .ok()
        .and_then(format_info)
        .ok_or_else(|| format!("{}: file content is not a supported image", field))
}

fn raw_file_name(file: &TempFile<'_>) -> Option<String> {
    file.raw_name()
        .map(|n| n.dangerous_unsafe_unsanitized_raw().as_str().to_string())
        .filter(|n| !n.is_empty())
}

fn content_type_of(file: &TempFile<'_>) -> Option<String> {
    file.content_type()
        .map(|ct| format!("{}/{}", ct.top(), ct.sub()))
}

/// Validate one uploaded file without storing it. Empty parts (an unused file
/// input) yield `None`.
pub async fn check_upload(
    field: &str,
    file: &TempFile<'_>,
    policy: &UploadPolicy,
) -> Result<Option<CheckedUpload>, String> {
    let size = file.len();
    if size == 0 {
        return Ok(None);
    }
    let original_name = raw_file_name(file);
    check_declared(
        field,
        content_type_of(file).as_deref(),
        original_name.as_deref(),
        size,
        policy.max_file_bytes,
    )?;

    let reader = file
        .open()
        .await
        .map_err(|e| format!("{}: cannot read upload: {}", field, e))?;
    rocket::tokio::pin!(reader);
    let mut head = Vec::with_capacity(SNIFF_LEN as usize);
    reader
        .take(SNIFF_LEN)
        .read_to_end(&mut head)
        .await
        .map_err(|e| format!("{}: cannot read upload: {}", field, e))?;
    let (extension, content_type) = sniff(field, &head)?;

    Ok(Some(CheckedUpload {
        extension,
        content_type,
        original_name,
        size,
    }))
}

/// Validate a whole field group. Nothing is written.
pub async fn check_group(
    field: &str,
    files: &[TempFile<'_>],
    policy: &UploadPolicy,
) -> Result<Vec<Option<CheckedUpload>>, String> {
    let non_empty = files.iter().filter(|f| f.len() > 0).count();
    check_count(field, non_empty)?;
    let mut out = Vec::with_capacity(files.len());
    for file in files {
        out.push(check_upload(field, file, policy).await?);
    }
    Ok(out)
}

/// Move a checked upload into the portfolio directory under a fresh name.
pub async fn save_upload(
    file: &mut TempFile<'_>,
    checked: &CheckedUpload,
    dir: &Path,
) -> Result<PortfolioImage, String> {
    std::fs::create_dir_all(dir).map_err(|e| e.to_string())?;
    let id = uuid::Uuid::new_v4().to_string();
    let filename = format!("portfolio_{}.{}", id, checked.extension);
    let dest = dir.join(&filename);
    file.move_copy_to(&dest)
        .await
        .map_err(|e| format!("cannot store {}: {}", filename, e))?;

    Ok(PortfolioImage {
        id,
        url: format!("{}/{}", PORTFOLIO_URL_PREFIX, filename),
        filename,
        original_name: checked.original_name.clone(),
        size: checked.size,
        content_type: checked.content_type.to_string(),
    })
}

/// Store every checked file of a group, in order.
pub async fn save_group(
    files: &mut [TempFile<'_>],
    checked: &[Option<CheckedUpload>],
    dir: &Path,
    saved: &mut Vec<PortfolioImage>,
) -> Result<Vec<PortfolioImage>, String> {
    let mut out = Vec::new();
    for (file, check) in files.iter_mut().zip(checked) {
        if let Some(check) = check {
            let image = save_upload(file, check, dir).await?;
            saved.push(image.clone());
            out.push(image);
        }
    }
    Ok(out)
}

/// Remove a stored image file. Missing files are not an error.
pub fn delete_image(dir: &Path, image: &PortfolioImage) {
    // Only ever touch a plain file name inside `dir`.
    let Some(name) = Path::new(&image.filename).file_name() else {
        return;
    };
    let path = dir.join(name);
    match std::fs::remove_file(&path) {
        Ok(()) => log::info!("Deleted upload {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => log::warn!("Cannot delete upload {}: {}", path.display(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_HEAD: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0x0D];
    const JPEG_HEAD: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0, 0x10, b'J', b'F', b'I', b'F'];

    #[test]
    fn test_check_declared_accepts_images() {
        assert!(check_declared("images", Some("image/png"), Some("unit.PNG"), 10, 100).is_ok());
        assert!(check_declared("images", Some("image/jpeg"), Some("a.b.jpeg"), 10, 100).is_ok());
    }

    #[test]
    fn test_check_declared_rejects() {
        assert!(check_declared("images", Some("application/pdf"), Some("quote.pdf"), 10, 100).is_err());
        assert!(check_declared("images", Some("image/png"), Some("script.php"), 10, 100).is_err());
        assert!(check_declared("images", None, Some("a.png"), 10, 100).is_err());
        assert!(check_declared("images", Some("image/png"), Some("noext"), 10, 100).is_err());
        let err = check_declared("images", Some("image/png"), Some("big.png"), 101, 100).unwrap_err();
        assert!(err.contains("larger"));
    }

    #[test]
    fn test_sniff() {
        assert_eq!(sniff("images", PNG_HEAD), Ok(("png", "image/png")));
        assert_eq!(sniff("images", JPEG_HEAD), Ok(("jpg", "image/jpeg")));
        assert!(sniff("images", b"<?php echo 1; ?>").is_err());
        assert!(sniff("images", b"BM\x00\x00").is_err());
    }

    #[test]
    fn test_check_count() {
        assert!(check_count("afterImages", MAX_FILES_PER_FIELD).is_ok());
        assert!(check_count("afterImages", MAX_FILES_PER_FIELD + 1).is_err());
    }

    #[test]
    fn test_delete_image_missing_is_quiet() {
        let dir = std::env::temp_dir().join(format!("aircon-img-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let image = PortfolioImage {
            id: "x".into(),
            url: "/uploads/portfolio/x.png".into(),
            filename: "x.png".into(),
            original_name: None,
            size: 1,
            content_type: "image/png".into(),
        };
        std::fs::write(dir.join("x.png"), PNG_HEAD).unwrap();
        delete_image(&dir, &image);
        assert!(!dir.join("x.png").exists());
        delete_image(&dir, &image);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
