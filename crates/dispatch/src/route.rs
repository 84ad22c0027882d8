use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use relay_core::Request;

/// HTTP method used for a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    /// Read call. Scalar fields of `request_data` become query parameters.
    Get,
    /// `request_data` is sent as the JSON body.
    Post,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }
}

/// How one request type is sent downstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub method: HttpMethod,
    /// Path used when the row has no `endpoint`. Defaults to `/<type>`.
    #[serde(default)]
    pub path: Option<String>,
}

impl Route {
    pub fn get() -> Self {
        Self {
            method: HttpMethod::Get,
            path: None,
        }
    }

    pub fn post() -> Self {
        Self {
            method: HttpMethod::Post,
            path: None,
        }
    }

    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }
}

/// Static map from request type to [`Route`], built once at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteTable {
    routes: BTreeMap<String, Route>,
}

impl RouteTable {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in routes: the NPC write calls are POSTs, status lookups
    /// are GETs.
    pub fn with_defaults() -> Self {
        let mut table = Self::new();
        for ty in ["dialogue", "decision", "movement", "async"] {
            table.register(ty, Route::post());
        }
        for ty in ["status", "query"] {
            table.register(ty, Route::get());
        }
        table
    }

    /// Built-in routes with `overrides` layered on top.
    #[allow(clippy::implicit_hasher)]
    pub fn from_overrides(overrides: &HashMap<String, Route>) -> Self {
        let mut table = Self::with_defaults();
        for (ty, route) in overrides {
            table.register(ty.clone(), route.clone());
        }
        table
    }

    pub fn register(&mut self, request_type: impl Into<String>, route: Route) {
        self.routes.insert(request_type.into(), route);
    }

    pub fn get(&self, request_type: &str) -> Option<&Route> {
        self.routes.get(request_type)
    }

    /// Registered request types, sorted.
    pub fn request_types(&self) -> Vec<String> {
        self.routes.keys().cloned().collect()
    }

    /// Resolve the route and path for a row. The row's own `endpoint` wins
    /// over the route's default path.
    pub fn resolve<'a>(&'a self, request: &Request) -> Option<(&'a Route, String)> {
        let route = self.get(&request.request_type)?;
        let path = if request.endpoint.is_empty() {
            route
                .path
                .clone()
                .unwrap_or_else(|| format!("/{}", request.request_type))
        } else {
            request.endpoint.clone()
        };
        let path = if path.starts_with('/') {
            path
        } else {
            format!("/{path}")
        };
        Some((route, path))
    }
}
