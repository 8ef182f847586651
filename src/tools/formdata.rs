//! FormData and file handling utilities
//!
//! Request bodies built from key/value fields are sent as JSON unless at
//! least one field carries a file, in which case the whole body becomes a
//! multipart form.

use serde_json::Value;
use std::path::Path;

/// Represents a file to be uploaded.
#[derive(Debug, Clone, PartialEq)]
pub struct FileData {
    /// The file name.
    pub name: String,
    /// The file content as bytes.
    pub data: Vec<u8>,
    /// The MIME type of the file.
    pub mime_type: Option<String>,
}

impl FileData {
    /// Creates a new FileData instance.
    pub fn new(name: &str, data: Vec<u8>, mime_type: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            data,
            mime_type: mime_type.map(|s| s.to_string()),
        }
    }

    /// Creates a FileData from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read.
    pub fn from_path<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("file")
            .to_string();
        let data = std::fs::read(path)?;
        let mime_type = guess_mime_type(&name);

        Ok(Self {
            name,
            data,
            mime_type,
        })
    }
}

/// Guesses the MIME type based on the file extension.
pub fn guess_mime_type(filename: &str) -> Option<String> {
    let extension = Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase());

    let mime = match extension.as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("svg") => "image/svg+xml",
        Some("ico") => "image/x-icon",
        Some("pdf") => "application/pdf",
        Some("txt") => "text/plain",
        Some("html") | Some("htm") => "text/html",
        Some("css") => "text/css",
        Some("json") => "application/json",
        Some("csv") => "text/csv",
        Some("zip") => "application/zip",
        Some("mp3") => "audio/mpeg",
        Some("mp4") => "video/mp4",
        _ => "application/octet-stream",
    };

    Some(mime.to_string())
}

/// A single form field value.
#[derive(Debug, Clone, PartialEq)]
pub enum FormValue {
    /// A plain text value.
    Text(String),
    /// A structured value. Sent as-is in JSON bodies and stringified in multipart forms.
    Json(Value),
    /// A file to upload.
    File(FileData),
    /// Multiple files under the same field name.
    Files(Vec<FileData>),
}

impl FormValue {
    /// Returns true if the value carries at least one file.
    pub fn is_file(&self) -> bool {
        matches!(self, FormValue::File(_) | FormValue::Files(_))
    }

    /// JSON representation used when the body stays a JSON object.
    pub(crate) fn to_json(&self) -> Value {
        match self {
            FormValue::Text(s) => Value::String(s.clone()),
            FormValue::Json(v) => v.clone(),
            FormValue::File(f) => Value::String(f.name.clone()),
            FormValue::Files(files) => {
                Value::Array(files.iter().map(|f| Value::String(f.name.clone())).collect())
            }
        }
    }
}

impl From<String> for FormValue {
    fn from(value: String) -> Self {
        FormValue::Text(value)
    }
}

impl From<&str> for FormValue {
    fn from(value: &str) -> Self {
        FormValue::Text(value.to_string())
    }
}

impl From<FileData> for FormValue {
    fn from(value: FileData) -> Self {
        FormValue::File(value)
    }
}

impl From<Vec<FileData>> for FormValue {
    fn from(value: Vec<FileData>) -> Self {
        FormValue::Files(value)
    }
}

impl From<Value> for FormValue {
    fn from(value: Value) -> Self {
        match value {
            Value::String(s) => FormValue::Text(s),
            other => FormValue::Json(other),
        }
    }
}

/// A builder for key/value request bodies.
#[derive(Debug, Default, Clone)]
pub struct FormDataBuilder {
    fields: Vec<(String, FormValue)>,
}

impl FormDataBuilder {
    /// Creates a new FormDataBuilder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a text field.
    pub fn text(mut self, name: &str, value: impl Into<String>) -> Self {
        self.fields
            .push((name.to_string(), FormValue::Text(value.into())));
        self
    }

    /// Adds a structured field.
    pub fn json(mut self, name: &str, value: Value) -> Self {
        self.fields.push((name.to_string(), value.into()));
        self
    }

    /// Adds a file field.
    pub fn file(mut self, name: &str, file: FileData) -> Self {
        self.fields.push((name.to_string(), FormValue::File(file)));
        self
    }

    /// Adds multiple files to a field.
    pub fn files(mut self, name: &str, files: Vec<FileData>) -> Self {
        self.fields.push((name.to_string(), FormValue::Files(files)));
        self
    }

    /// Checks if any field contains a file.
    pub fn has_files(&self) -> bool {
        has_file_value(&self.fields)
    }

    /// Returns the collected fields.
    pub fn build(self) -> Vec<(String, FormValue)> {
        self.fields
    }
}

/// Checks if at least one of the fields carries a file.
pub fn has_file_value(fields: &[(String, FormValue)]) -> bool {
    fields.iter().any(|(_, v)| v.is_file())
}

/// Collapses the fields into a JSON object (later keys win).
pub(crate) fn fields_to_json(fields: &[(String, FormValue)]) -> Value {
    let map = fields
        .iter()
        .map(|(k, v)| (k.clone(), v.to_json()))
        .collect::<serde_json::Map<_, _>>();
    Value::Object(map)
}

/// Builds a reqwest multipart form from the fields.
pub(crate) fn to_multipart(
    fields: Vec<(String, FormValue)>,
) -> Result<reqwest::multipart::Form, reqwest::Error> {
    let mut form = reqwest::multipart::Form::new();

    for (name, value) in fields {
        match value {
            FormValue::Text(text) => form = form.text(name, text),
            FormValue::Json(json) => form = form.text(name, json.to_string()),
            FormValue::File(file) => form = form.part(name, file_part(file)?),
            FormValue::Files(files) => {
                for file in files {
                    form = form.part(name.clone(), file_part(file)?);
                }
            }
        }
    }

    Ok(form)
}

fn file_part(file: FileData) -> Result<reqwest::multipart::Part, reqwest::Error> {
    let mime = file
        .mime_type
        .clone()
        .or_else(|| guess_mime_type(&file.name))
        .unwrap_or_else(|| "application/octet-stream".to_string());

    reqwest::multipart::Part::bytes(file.data)
        .file_name(file.name)
        .mime_str(&mime)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_guess_mime_type() {
        assert_eq!(guess_mime_type("test.JPG"), Some("image/jpeg".to_string()));
        assert_eq!(
            guess_mime_type("unknown.xyz"),
            Some("application/octet-stream".to_string())
        );
    }

    #[test]
    fn test_has_files() {
        let form_without_files = FormDataBuilder::new().text("name", "test");
        assert!(!form_without_files.has_files());

        let form_with_files = FormDataBuilder::new().text("name", "test").files(
            "docs",
            vec![FileData::new("a.txt", vec![1, 2, 3], None)],
        );
        assert!(form_with_files.has_files());
    }

    #[test]
    fn test_fields_to_json() {
        let fields = FormDataBuilder::new()
            .text("title", "hello")
            .json("tags", json!(["a", "b"]))
            .json("count", json!(3))
            .build();

        assert_eq!(
            fields_to_json(&fields),
            json!({"title": "hello", "tags": ["a", "b"], "count": 3})
        );
    }
}
