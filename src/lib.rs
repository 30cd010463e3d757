//! Courier - declarative, cache-backed HTTP request dispatch
//!
//! Describe each endpoint once as a [`Resource`], then fire requests at it.
//! A process-wide [`Dispatcher`] builds the request, serves it from the
//! persistent response cache or the network, parses the body into the
//! resource's type and hands the result to a callback.
//!
//! # Example
//!
//! ```rust,no_run
//! use courier::{Courier, Method, Params, Resource};
//!
//! #[derive(serde::Deserialize)]
//! struct Repo {
//!     name: String,
//!     stargazers_count: u64,
//! }
//!
//! fn main() -> courier::Result<()> {
//!     Courier::builder().app_name("Stars").load()?;
//!
//!     let repos = Resource::<Vec<Repo>>::json("https://api.example.com").skeleton_path("/repos");
//!     Courier::fire(
//!         Method::GET,
//!         &repos,
//!         Some(&Params::from([("sort", "stars")])),
//!         |repos| {
//!             for repo in repos {
//!                 println!("{}: {}", repo.name, repo.stargazers_count);
//!             }
//!         },
//!         |err| eprintln!("request failed: {err}"),
//!     )?;
//!     Ok(())
//! }
//! ```
//!
//! # Images
//!
//! ```rust,no_run
//! # async fn demo(dispatcher: &courier::Dispatcher) -> courier::Result<()> {
//! let thumb = dispatcher
//!     .image("https://cdn.example.com/a.png", Some(128), Some(128))
//!     .await?;
//! println!("{}x{}", thumb.width(), thumb.height());
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod charset;
pub mod delivery;
pub mod dispatcher;
pub mod error;
pub mod identity;
pub mod multipart;
pub mod params;
pub mod parser;
pub mod request;
pub mod resource;
pub mod telemetry;
pub mod template;
pub mod transport;

// Re-export main types at crate root
pub use charset::Charset;
pub use dispatcher::{Courier, CourierBuilder, Dispatcher, DispatcherConfig, LoadState};
pub use error::{CourierError, ErrorKind, Result};
pub use multipart::{MultipartBody, MultipartForm};
pub use params::Params;
pub use parser::{ImageParser, JsonParser, ResponseParser, TextParser};
pub use request::{Body, FireRequest};
pub use resource::{Resource, SharedParser};
pub use transport::{NetworkResponse, ReqwestTransport, Transport, TransportRequest};

pub use reqwest::Method;
