//! Multipart form reading and upload limits.
//!
//! Every check here runs on the fully buffered form, before anything is
//! written to the store or the database.

use std::collections::HashMap;

use axum::extract::Multipart;
use bytes::Bytes;

use crate::error::{AppError, AppResult, FieldErrors};

pub const MAX_UPLOAD_BYTES: usize = 1024 * 1024;
pub const MAX_IMAGES_PER_POST: usize = 10;
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp"];
/// Resource files must end in this suffix, matched case-sensitively.
pub const RESOURCE_SUFFIX: &str = ".json";

#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub field: String,
    pub file_name: String,
    pub content_type: Option<String>,
    pub data: Bytes,
}

impl UploadedFile {
    /// Lower-cased extension of the client file name.
    pub fn extension(&self) -> Option<String> {
        self.file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .filter(|ext| !ext.is_empty())
    }

    /// Content type for serving: the guessed type of the file name.
    pub fn guessed_mime(&self) -> String {
        mime_guess::from_path(&self.file_name)
            .first_or_octet_stream()
            .essence_str()
            .to_string()
    }
}

/// A buffered multipart body: text parts by name, file parts in order.
#[derive(Debug, Default)]
pub struct MultipartForm {
    pub fields: HashMap<String, String>,
    pub files: Vec<UploadedFile>,
}

impl MultipartForm {
    pub async fn read(mut multipart: Multipart) -> AppResult<Self> {
        let mut form = MultipartForm::default();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| AppError::BadRequest(e.body_text()))?
        {
            let name = field.name().unwrap_or_default().to_string();
            match field.file_name().map(str::to_string) {
                Some(file_name) => {
                    let content_type = field.content_type().map(str::to_string);
                    let data = field
                        .bytes()
                        .await
                        .map_err(|e| AppError::BadRequest(e.body_text()))?;
                    form.files.push(UploadedFile {
                        field: name,
                        file_name,
                        content_type,
                        data,
                    });
                }
                None => {
                    let value = field
                        .text()
                        .await
                        .map_err(|e| AppError::BadRequest(e.body_text()))?;
                    form.fields.insert(name, value);
                }
            }
        }
        Ok(form)
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    pub fn files_named(&self, name: &str) -> Vec<&UploadedFile> {
        self.files.iter().filter(|f| f.field == name).collect()
    }

    pub fn take_file(&mut self, name: &str) -> Option<UploadedFile> {
        let index = self.files.iter().position(|f| f.field == name)?;
        Some(self.files.remove(index))
    }
}

fn size_error(file: &UploadedFile) -> Option<String> {
    (file.data.len() > MAX_UPLOAD_BYTES).then(|| {
        format!(
            "File \"{}\" exceeds the maximum size of 1 MB.",
            file.file_name
        )
    })
}

fn image_errors(file: &UploadedFile) -> Vec<String> {
    let mut errors = Vec::new();
    let allowed = file
        .extension()
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()));
    let declared_image = file
        .content_type
        .as_deref()
        .map(|ct| ct.starts_with("image/") || ct == "application/octet-stream")
        .unwrap_or(true);
    if !allowed || !declared_image {
        errors.push(format!(
            "File \"{}\" is not a supported image ({}).",
            file.file_name,
            IMAGE_EXTENSIONS.join(", ")
        ));
    }
    errors.extend(size_error(file));
    errors
}

fn reject(field: &str, errors: Vec<String>) -> AppResult<()> {
    if errors.is_empty() {
        return Ok(());
    }
    let mut map = FieldErrors::new();
    map.insert(field.to_string(), errors);
    Err(AppError::Validation(map))
}

/// Check a batch of post images against the per-file and per-post limits.
pub fn validate_post_images(existing: usize, files: &[&UploadedFile]) -> AppResult<()> {
    if files.is_empty() {
        return reject("images", vec!["No images were provided.".to_string()]);
    }
    check_image_capacity(existing, files.len())?;
    reject("images", files.iter().flat_map(|f| image_errors(f)).collect())
}

/// Whether `incoming` more images still fit on a post holding `existing`.
pub fn check_image_capacity(existing: usize, incoming: usize) -> AppResult<()> {
    if existing + incoming > MAX_IMAGES_PER_POST {
        return reject(
            "images",
            vec![format!(
                "A post can have at most {} images ({} already attached, {} uploaded).",
                MAX_IMAGES_PER_POST, existing, incoming
            )],
        );
    }
    Ok(())
}

pub fn validate_avatar(file: &UploadedFile) -> AppResult<()> {
    reject("avatar", image_errors(file))
}

pub fn validate_resource_file(file: &UploadedFile) -> AppResult<()> {
    if !file.file_name.ends_with(RESOURCE_SUFFIX) {
        return reject("file", vec!["Only JSON files are allowed.".to_string()]);
    }
    let mut errors: Vec<String> = size_error(file).into_iter().collect();
    if errors.is_empty() && serde_json::from_slice::<serde_json::Value>(&file.data).is_err() {
        errors.push("File does not contain valid JSON.".to_string());
    }
    reject("file", errors)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str, content_type: Option<&str>, size: usize) -> UploadedFile {
        UploadedFile {
            field: "images".to_string(),
            file_name: name.to_string(),
            content_type: content_type.map(str::to_string),
            data: Bytes::from(vec![b'x'; size]),
        }
    }

    fn messages(result: AppResult<()>, field: &str) -> Vec<String> {
        match result {
            Err(AppError::Validation(mut errors)) => errors.remove(field).unwrap_or_default(),
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn extension_is_lowercased() {
        assert_eq!(file("A.PNG", None, 1).extension().as_deref(), Some("png"));
        assert_eq!(file("noext", None, 1).extension(), None);
        assert_eq!(file("trailing.", None, 1).extension(), None);
    }

    #[test]
    fn ten_images_are_accepted() {
        let files: Vec<UploadedFile> = (0..10)
            .map(|i| file(&format!("{}.jpg", i), Some("image/jpeg"), 10))
            .collect();
        let refs: Vec<&UploadedFile> = files.iter().collect();
        assert!(validate_post_images(0, &refs).is_ok());
    }

    #[test]
    fn capacity_counts_existing_images() {
        assert!(check_image_capacity(4, 6).is_ok());
        let errors = messages(check_image_capacity(6, 6), "images");
        assert!(errors[0].contains("6 already attached"));
    }

    #[test]
    fn eleventh_image_is_rejected() {
        let files: Vec<UploadedFile> = (0..11)
            .map(|i| file(&format!("{}.jpg", i), Some("image/jpeg"), 10))
            .collect();
        let refs: Vec<&UploadedFile> = files.iter().collect();
        let errors = messages(validate_post_images(0, &refs), "images");
        assert!(errors[0].contains("at most 10 images"));
    }

    #[test]
    fn existing_images_count_toward_limit() {
        let one = file("a.png", Some("image/png"), 10);
        assert!(validate_post_images(9, &[&one]).is_ok());
        assert!(validate_post_images(10, &[&one]).is_err());
    }

    #[test]
    fn oversized_image_is_rejected() {
        let big = file("big.png", Some("image/png"), MAX_UPLOAD_BYTES + 1);
        let errors = messages(validate_post_images(0, &[&big]), "images");
        assert!(errors[0].contains("1 MB"));

        let exact = file("exact.png", Some("image/png"), MAX_UPLOAD_BYTES);
        assert!(validate_post_images(0, &[&exact]).is_ok());
    }

    #[test]
    fn non_image_is_rejected() {
        let pdf = file("doc.pdf", Some("application/pdf"), 10);
        assert!(validate_post_images(0, &[&pdf]).is_err());

        let disguised = file("doc.png", Some("text/html"), 10);
        assert!(validate_post_images(0, &[&disguised]).is_err());
    }

    #[test]
    fn empty_batch_is_rejected() {
        assert!(validate_post_images(0, &[]).is_err());
    }

    #[test]
    fn resource_must_be_json() {
        let mut txt = file("notes.txt", Some("text/plain"), 0);
        txt.data = Bytes::from_static(b"{}");
        let errors = messages(validate_resource_file(&txt), "file");
        assert_eq!(errors, vec!["Only JSON files are allowed.".to_string()]);

        let mut json = file("flow.json", Some("application/json"), 0);
        json.data = Bytes::from_static(b"{\"nodes\": []}");
        assert!(validate_resource_file(&json).is_ok());
    }

    #[test]
    fn resource_suffix_is_case_sensitive() {
        let mut upper = file("FLOW.JSON", Some("application/json"), 0);
        upper.data = Bytes::from_static(b"{}");
        let errors = messages(validate_resource_file(&upper), "file");
        assert_eq!(errors, vec!["Only JSON files are allowed.".to_string()]);
    }

    #[test]
    fn resource_with_broken_json_is_rejected() {
        let mut json = file("flow.json", Some("application/json"), 0);
        json.data = Bytes::from_static(b"{nodes");
        assert!(validate_resource_file(&json).is_err());
    }

    #[test]
    fn avatar_uses_image_rules() {
        assert!(validate_avatar(&file("me.webp", Some("image/webp"), 10)).is_ok());
        assert!(validate_avatar(&file("me.svg", Some("image/svg+xml"), 10)).is_err());
    }
}
