//! Request model: method, endpoint, headers, body and the built wire request.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use url::Url;

use super::errors::CourierError;

/// HTTP method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
    Options,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::Options => "OPTIONS",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Header map with case-insensitive, unique keys.
///
/// Keys are stored lowercased; inserting an existing key replaces its value
/// and `merge` is last-write-wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Headers(BTreeMap<String, String>);

impl Headers {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn insert(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        self.0.insert(name.as_ref().to_ascii_lowercase(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.0.remove(&name.to_ascii_lowercase())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(&name.to_ascii_lowercase())
    }

    /// `other` の値で上書きしながら取り込む
    pub fn merge(&mut self, other: &Headers) {
        for (name, value) in &other.0 {
            self.0.insert(name.clone(), value.clone());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.insert(name, value);
        }
        headers
    }
}

/// Request body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Body {
    #[default]
    Empty,
    Bytes(Bytes),
    File(PathBuf),
}

impl Body {
    pub fn is_empty(&self) -> bool {
        matches!(self, Body::Empty)
    }
}

/// Target descriptor: base URL plus path segments and query pairs appended
/// at build time.
///
/// The base is kept as text so that configuring a task never fails; parsing
/// happens when the request is built.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Endpoint {
    base: String,
    segments: Vec<String>,
    query: Vec<(String, String)>,
}

impl Endpoint {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            segments: Vec::new(),
            query: Vec::new(),
        }
    }

    pub fn with_path(mut self, segment: impl Into<String>) -> Self {
        self.push_path(segment);
        self
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.push_query(key, value);
        self
    }

    /// "a/b" のような値はセグメントごとに分けて追加する
    pub fn push_path(&mut self, segment: impl Into<String>) {
        let segment = segment.into();
        self.segments.extend(
            segment
                .split('/')
                .filter(|s| !s.is_empty())
                .map(str::to_string),
        );
    }

    pub fn push_query(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.query.push((key.into(), value.into()));
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    /// Resolve into an absolute URL.
    pub fn to_url(&self) -> Result<Url, CourierError> {
        let mut url = Url::parse(&self.base)
            .map_err(|e| CourierError::InvalidEndpoint(format!("{}: {e}", self.base)))?;
        if url.cannot_be_a_base() || url.host_str().is_none() {
            return Err(CourierError::InvalidEndpoint(format!(
                "{}: missing host",
                self.base
            )));
        }

        if !self.segments.is_empty() {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| CourierError::InvalidEndpoint(self.base.clone()))?;
            path.pop_if_empty();
            path.extend(&self.segments);
        }

        if !self.query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &self.query {
                pairs.append_pair(key, value);
            }
        }

        Ok(url)
    }
}

/// The built wire request handed to the Retrofitter and the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    pub url: Url,
    pub headers: Headers,
    pub body: Body,
}

impl Request {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: Headers::new(),
            body: Body::Empty,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn set_header(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        self.headers.insert(name, value);
    }
}
