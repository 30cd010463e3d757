//! Response parsers.
//!
//! A [`ResponseParser`] turns a [`NetworkResponse`] into the value a
//! [`Resource`](crate::Resource) promises its callers. The parser is fixed
//! per resource, so dispatch is static for a given endpoint:
//!
//! - [`TextParser`] — body as a string in the response charset
//! - [`JsonParser<T>`] — body deserialized into `T` with `serde_json`
//! - [`ImageParser`] — body decoded into an image, optionally scaled down
//!
//! Parse failures surface as [`CourierError::Parse`] and are never retried.
//! The cached bytes stay put; a bad payload is the consumer's problem, not
//! the cache's.

use std::fmt;
use std::marker::PhantomData;

use image::DynamicImage;
use image::imageops::FilterType;
use serde::de::DeserializeOwned;

use crate::transport::NetworkResponse;
use crate::{Charset, Result};

/// Converts raw response bytes into a typed value.
pub trait ResponseParser: Send + Sync {
    type Output: Send + 'static;

    fn parse(&self, response: &NetworkResponse) -> Result<Self::Output>;
}

/// Body as text, decoded with the charset named in `Content-Type`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextParser {
    default_charset: Charset,
}

impl TextParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Charset used when the response does not declare one (default UTF-8).
    pub fn default_charset(mut self, charset: Charset) -> Self {
        self.default_charset = charset;
        self
    }
}

impl ResponseParser for TextParser {
    type Output = String;

    fn parse(&self, response: &NetworkResponse) -> Result<String> {
        let charset = Charset::from_headers(&response.headers, self.default_charset)?;
        charset.decode(&response.data)
    }
}

/// Body deserialized from JSON into `T`.
pub struct JsonParser<T> {
    text: TextParser,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonParser<T> {
    pub fn new() -> Self {
        Self {
            text: TextParser::new(),
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonParser<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for JsonParser<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for JsonParser<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonParser")
            .field("type", &std::any::type_name::<T>())
            .finish()
    }
}

impl<T> ResponseParser for JsonParser<T>
where
    T: DeserializeOwned + Send + 'static,
{
    type Output = T;

    fn parse(&self, response: &NetworkResponse) -> Result<T> {
        let json = self.text.parse(response)?;
        Ok(serde_json::from_str(&json)?)
    }
}

/// Body decoded as an image.
///
/// With bounds set, images larger than the bounds are scaled down to fit
/// while keeping their aspect ratio. Smaller images are never upscaled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImageParser {
    pub max_width: Option<u32>,
    pub max_height: Option<u32>,
}

impl ImageParser {
    pub fn new(max_width: Option<u32>, max_height: Option<u32>) -> Self {
        Self {
            max_width: max_width.filter(|w| *w > 0),
            max_height: max_height.filter(|h| *h > 0),
        }
    }

    /// Dimensions `width x height` should be scaled to.
    pub fn target_size(&self, width: u32, height: u32) -> (u32, u32) {
        let bound_w = self.max_width.unwrap_or(width).min(width);
        let bound_h = self.max_height.unwrap_or(height).min(height);
        if (bound_w, bound_h) == (width, height) || width == 0 || height == 0 {
            return (width, height);
        }

        let ratio = f64::min(
            f64::from(bound_w) / f64::from(width),
            f64::from(bound_h) / f64::from(height),
        );
        let scaled = |v: u32| ((f64::from(v) * ratio).round() as u32).max(1);
        (scaled(width), scaled(height))
    }
}

impl ResponseParser for ImageParser {
    type Output = DynamicImage;

    fn parse(&self, response: &NetworkResponse) -> Result<DynamicImage> {
        let decoded = image::load_from_memory(&response.data)?;
        let (width, height) = (decoded.width(), decoded.height());
        let (target_w, target_h) = self.target_size(width, height);
        if (target_w, target_h) == (width, height) {
            return Ok(decoded);
        }
        Ok(decoded.resize_exact(target_w, target_h, FilterType::Triangle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CourierError;
    use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
    use serde::Deserialize;

    fn response(content_type: Option<&'static str>, body: &[u8]) -> NetworkResponse {
        let mut headers = HeaderMap::new();
        if let Some(ct) = content_type {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(ct));
        }
        NetworkResponse::new(200, headers, body.to_vec())
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct User {
        id: u64,
        name: String,
    }

    #[test]
    fn text_defaults_to_utf8() {
        let parsed = TextParser::new().parse(&response(None, "héllo".as_bytes())).unwrap();
        assert_eq!(parsed, "héllo");
    }

    #[test]
    fn text_honours_declared_charset() {
        let parsed = TextParser::new()
            .parse(&response(Some("text/plain; charset=ISO-8859-1"), &[0x63, 0xE9]))
            .unwrap();
        assert_eq!(parsed, "cé");
    }

    #[test]
    fn text_rejects_invalid_bytes() {
        let err = TextParser::new()
            .parse(&response(Some("text/plain; charset=utf-8"), &[0xC3]))
            .unwrap_err();
        assert!(matches!(err, CourierError::Parse(_)));
    }

    #[test]
    fn json_deserializes_typed_value() {
        let body = br#"{"id": 7, "name": "ada"}"#;
        let user = JsonParser::<User>::new()
            .parse(&response(Some("application/json"), body))
            .unwrap();
        assert_eq!(
            user,
            User {
                id: 7,
                name: "ada".into()
            }
        );
    }

    #[test]
    fn malformed_json_is_parse_error() {
        let err = JsonParser::<User>::new()
            .parse(&response(Some("application/json"), b"{\"id\": "))
            .unwrap_err();
        assert!(matches!(err, CourierError::Parse(_)));
    }

    #[test]
    fn image_bounds_keep_aspect_ratio() {
        let parser = ImageParser::new(Some(40), None);
        assert_eq!(parser.target_size(100, 50), (40, 20));

        let parser = ImageParser::new(Some(40), Some(10));
        assert_eq!(parser.target_size(100, 50), (20, 10));
    }

    #[test]
    fn image_never_upscales() {
        let parser = ImageParser::new(Some(400), Some(400));
        assert_eq!(parser.target_size(100, 50), (100, 50));
        assert_eq!(ImageParser::default().target_size(100, 50), (100, 50));
    }

    #[test]
    fn garbage_image_is_parse_error() {
        let err = ImageParser::default()
            .parse(&response(Some("image/png"), b"not a png"))
            .unwrap_err();
        assert!(matches!(err, CourierError::Parse(_)));
    }
}
