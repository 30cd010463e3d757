//! `multipart/form-data` bodies.
//!
//! Every part carries `Content-Disposition: form-data; name="<field>"`;
//! file parts add `filename` and a `Content-Type` for the declared media
//! type. The body is assembled eagerly into one buffer.
//!
//! A file that cannot be read fails the whole build with
//! [`CourierError::Multipart`], naming every field that failed, instead of
//! producing a truncated body the server would reject later.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::{BufMut, Bytes, BytesMut};
use sha2::{Digest, Sha256};

use crate::{CourierError, Params, Result};

const CRLF: &[u8] = b"\r\n";

static BOUNDARY_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone)]
enum Part {
    File {
        field: String,
        path: PathBuf,
        media_type: String,
    },
    Bytes {
        field: String,
        filename: String,
        media_type: String,
        data: Bytes,
    },
    Text {
        field: String,
        value: String,
    },
}

/// Builder for a multipart form.
///
/// ```rust,no_run
/// # use courier::MultipartForm;
/// let body = MultipartForm::new()
///     .file("avatar", "/tmp/me.png", "image/png")
///     .text("name", "ada")
///     .build()?;
/// assert!(body.content_type().starts_with("multipart/form-data; boundary="));
/// # Ok::<(), courier::CourierError>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct MultipartForm {
    parts: Vec<Part>,
    boundary: Option<String>,
}

impl MultipartForm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Form from a `field -> (file, media type)` map plus optional string fields.
    pub fn from_parts<I, F, P, M>(files: I, params: Option<&Params>) -> Self
    where
        I: IntoIterator<Item = (F, (P, M))>,
        F: Into<String>,
        P: Into<PathBuf>,
        M: Into<String>,
    {
        let mut form = files
            .into_iter()
            .fold(Self::new(), |form, (field, (path, media_type))| {
                form.file(field, path, media_type)
            });
        if let Some(params) = params {
            for (field, value) in params.iter() {
                form = form.text(field, value);
            }
        }
        form
    }

    /// Add a file part read from disk at build time.
    pub fn file(
        mut self,
        field: impl Into<String>,
        path: impl Into<PathBuf>,
        media_type: impl Into<String>,
    ) -> Self {
        self.parts.push(Part::File {
            field: field.into(),
            path: path.into(),
            media_type: media_type.into(),
        });
        self
    }

    /// Add a file part from memory.
    pub fn file_bytes(
        mut self,
        field: impl Into<String>,
        filename: impl Into<String>,
        media_type: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        self.parts.push(Part::Bytes {
            field: field.into(),
            filename: filename.into(),
            media_type: media_type.into(),
            data: data.into(),
        });
        self
    }

    /// Add a plain string field.
    pub fn text(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.parts.push(Part::Text {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    /// Use a fixed boundary instead of a generated one.
    pub fn boundary(mut self, boundary: impl Into<String>) -> Self {
        self.boundary = Some(boundary.into());
        self
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Read every file and assemble the body.
    pub fn build(self) -> Result<MultipartBody> {
        let boundary = self.boundary.unwrap_or_else(generate_boundary);
        let mut body = BytesMut::new();
        let mut failed = Vec::new();
        let mut messages = Vec::new();

        for part in self.parts {
            let (field, filename, media_type, data) = match part {
                Part::Text { field, value } => (field, None, None, Bytes::from(value)),
                Part::Bytes {
                    field,
                    filename,
                    media_type,
                    data,
                } => (field, Some(filename), Some(media_type), data),
                Part::File {
                    field,
                    path,
                    media_type,
                } => match std::fs::read(&path) {
                    Ok(data) => (field, Some(file_name(&path)), Some(media_type), data.into()),
                    Err(e) => {
                        messages.push(format!("{}: {e}", path.display()));
                        failed.push(field);
                        continue;
                    }
                },
            };

            if let Some(media_type) = &media_type
                && !is_media_type(media_type)
            {
                messages.push(format!("invalid media type '{media_type}'"));
                failed.push(field);
                continue;
            }

            write_part(
                &mut body,
                &boundary,
                &field,
                filename.as_deref(),
                media_type.as_deref(),
                &data,
            );
        }

        if !failed.is_empty() {
            return Err(CourierError::Multipart {
                fields: failed,
                message: messages.join("; "),
            });
        }

        body.put_slice(b"--");
        body.put_slice(boundary.as_bytes());
        body.put_slice(b"--");
        body.put_slice(CRLF);

        Ok(MultipartBody {
            content_type: format!("multipart/form-data; boundary={boundary}"),
            boundary,
            data: body.freeze(),
        })
    }
}

/// An assembled multipart body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartBody {
    content_type: String,
    boundary: String,
    data: Bytes,
}

impl MultipartBody {
    /// `multipart/form-data; boundary=...`
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    pub fn bytes(&self) -> &Bytes {
        &self.data
    }
}

fn write_part(
    body: &mut BytesMut,
    boundary: &str,
    field: &str,
    filename: Option<&str>,
    media_type: Option<&str>,
    data: &[u8],
) {
    body.put_slice(b"--");
    body.put_slice(boundary.as_bytes());
    body.put_slice(CRLF);

    let mut disposition = format!("Content-Disposition: form-data; name=\"{}\"", quote(field));
    if let Some(filename) = filename {
        disposition.push_str(&format!("; filename=\"{}\"", quote(filename)));
    }
    body.put_slice(disposition.as_bytes());
    body.put_slice(CRLF);

    if let Some(media_type) = media_type {
        body.put_slice(format!("Content-Type: {media_type}").as_bytes());
        body.put_slice(CRLF);
    }
    body.put_slice(format!("Content-Length: {}", data.len()).as_bytes());
    body.put_slice(CRLF);
    body.put_slice(CRLF);
    body.put_slice(data);
    body.put_slice(CRLF);
}

/// Escape characters that would break out of a quoted header parameter.
fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\n' => out.push_str("%0A"),
            '\r' => out.push_str("%0D"),
            '"' => out.push_str("%22"),
            c => out.push(c),
        }
    }
    out
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn is_media_type(value: &str) -> bool {
    let essence = value.split(';').next().unwrap_or_default().trim();
    match essence.split_once('/') {
        Some((kind, subtype)) => {
            let token = |s: &str| {
                !s.is_empty()
                    && s.chars()
                        .all(|c| c.is_ascii_alphanumeric() || "!#$&-^_.+".contains(c))
            };
            token(kind) && token(subtype)
        }
        None => false,
    }
}

fn generate_boundary() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(nanos.to_le_bytes());
    hasher.update(BOUNDARY_COUNTER.fetch_add(1, Ordering::Relaxed).to_le_bytes());
    hasher.update(std::process::id().to_le_bytes());
    format!("courier-{}", &hex::encode(hasher.finalize())[..32])
}
