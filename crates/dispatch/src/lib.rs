//! Downstream dispatch for admitted requests.
//!
//! A [`RouteTable`] maps each request type to an HTTP method and default
//! path; [`HttpDispatcher`] turns a row into one call and normalizes the
//! answer into a JSON payload or a typed [`DispatchError`].

pub mod dispatcher;
pub mod error;
pub mod http;
pub mod route;

pub use dispatcher::{Dispatcher, DynDispatcher};
pub use error::DispatchError;
pub use http::{DispatchConfig, HttpDispatcher};
pub use route::{HttpMethod, Route, RouteTable};
