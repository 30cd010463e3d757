//! Resource descriptors: one per logical API endpoint.

use std::fmt;
use std::sync::Arc;

use reqwest::Method;
use serde::de::DeserializeOwned;

use crate::parser::{JsonParser, ResponseParser, TextParser};
use crate::request::FireRequest;
use crate::{Charset, Params, template};

/// Shared handle to the parser bound to a resource.
pub type SharedParser<T> = Arc<dyn ResponseParser<Output = T>>;

/// An API endpoint: base URL, optional skeleton path, and the parser that
/// turns its responses into `T`.
///
/// Built once and reused for every call to the endpoint:
///
/// ```rust
/// # use courier::{Params, Resource};
/// # #[derive(serde::Deserialize)] struct User { id: u64 }
/// let user = Resource::<User>::json("https://api.example.com").skeleton_path("/users/{{ id }}");
/// assert_eq!(
///     user.url(Some(&Params::from([("id", "42")]))),
///     "https://api.example.com/users/42"
/// );
/// ```
pub struct Resource<T> {
    base_url: String,
    skeleton_path: Option<String>,
    parser: SharedParser<T>,
}

impl Resource<String> {
    /// A resource whose responses are returned as text.
    pub fn text(base_url: impl Into<String>) -> Self {
        Self::with_parser(base_url, TextParser::new())
    }
}

impl<T> Resource<T>
where
    T: DeserializeOwned + Send + 'static,
{
    /// A resource whose JSON responses are deserialized into `T`.
    pub fn json(base_url: impl Into<String>) -> Self {
        Self::with_parser(base_url, JsonParser::<T>::new())
    }
}

impl<T: Send + 'static> Resource<T> {
    /// A resource with a custom parser.
    pub fn with_parser(
        base_url: impl Into<String>,
        parser: impl ResponseParser<Output = T> + 'static,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            skeleton_path: None,
            parser: Arc::new(parser),
        }
    }

    /// Set the skeleton path, e.g. `/user/{{ userId }}`.
    pub fn skeleton_path(mut self, path: impl Into<String>) -> Self {
        self.skeleton_path = Some(path.into());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn skeleton(&self) -> Option<&str> {
        self.skeleton_path.as_deref()
    }

    pub fn parser(&self) -> &SharedParser<T> {
        &self.parser
    }

    /// Skeleton path with placeholders filled in; empty without a skeleton.
    pub fn resource_path(&self, placeholders: Option<&Params>) -> String {
        match &self.skeleton_path {
            Some(skeleton) => template::resolve_path(skeleton, placeholders),
            None => String::new(),
        }
    }

    /// Base URL joined with the resolved path.
    pub fn url(&self, placeholders: Option<&Params>) -> String {
        template::build_url(
            &self.base_url,
            &self.resource_path(placeholders),
            None,
            Charset::Utf8,
        )
    }

    /// Base URL, resolved path and an encoded query string.
    ///
    /// Pairs that cannot be encoded in `charset` are left out.
    pub fn url_with_query(
        &self,
        placeholders: Option<&Params>,
        query: &Params,
        charset: Charset,
    ) -> String {
        template::build_url(
            &self.base_url,
            &self.resource_path(placeholders),
            Some(query),
            charset,
        )
    }

    /// A request against this resource.
    ///
    /// `params` become the query string for `GET` and the form body for
    /// every other method.
    pub fn request(
        &self,
        method: Method,
        placeholders: Option<&Params>,
        params: Option<&Params>,
    ) -> FireRequest {
        FireRequest::new(method, self.url(placeholders), params)
    }
}

impl<T> Clone for Resource<T> {
    fn clone(&self) -> Self {
        Self {
            base_url: self.base_url.clone(),
            skeleton_path: self.skeleton_path.clone(),
            parser: Arc::clone(&self.parser),
        }
    }
}

impl<T> fmt::Debug for Resource<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("base_url", &self.base_url)
            .field("skeleton_path", &self.skeleton_path)
            .finish_non_exhaustive()
    }
}
