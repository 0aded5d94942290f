//! Request routing
//!
//! The dispatcher knows nothing about HTTP framing. It turns a [`Request`]
//! into a [`Reply`] which the server module renders onto the wire.

use std::fmt::Write as _;
use std::sync::Arc;

use http::Method;

use crate::content::resolve;
use crate::error::{RecoveryError, Result};
use crate::listing::{open_listing, DirectoryListing};
use crate::raw::RawImageStreamer;
use crate::storage::{Document, Medium};

pub const LIST_PATH: &str = "/list";
pub const RAW_PATH: &str = "/raw";

/// Argument that forces a document to be served as an attachment
pub const DOWNLOAD_ARG: &str = "download";

/// A decoded request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    /// Percent-decoded path, without the query string
    pub uri: String,
    /// Query arguments in the order they were sent
    pub args: Vec<(String, String)>,
}

impl Request {
    pub fn new(method: Method, uri: impl Into<String>) -> Self {
        Self {
            method,
            uri: uri.into(),
            args: Vec::new(),
        }
    }

    pub fn with_arg(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.args.push((name.into(), value.into()));
        self
    }

    /// First value of the argument called `name`
    pub fn arg(&self, name: &str) -> Option<&str> {
        self.args
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn has_arg(&self, name: &str) -> bool {
        self.args.iter().any(|(n, _)| n == name)
    }
}

/// What the server should send back
#[derive(Debug)]
pub enum Reply {
    /// Directory listing, streamed as a JSON array
    Listing(DirectoryListing),
    /// Full raw image of the device
    RawImage(RawImageStreamer),
    /// A file from the medium
    Document(Document),
    /// Request validation failure
    Failure { reason: &'static str },
    /// Plain-text description of an unserviceable request
    Diagnostic(String),
}

impl Reply {
    /// Body of a [`Reply::Failure`]
    pub fn failure_body(reason: &str) -> String {
        format!("{}\r\n", reason)
    }
}

/// Routes requests against the medium attached at startup.
///
/// `None` means the medium was never attached; every request then receives
/// the diagnostic reply.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    medium: Option<Arc<Medium>>,
}

impl Dispatcher {
    pub fn new(medium: Option<Arc<Medium>>) -> Self {
        Self { medium }
    }

    pub fn is_available(&self) -> bool {
        self.medium.is_some()
    }

    /// The attached medium, or [`RecoveryError::DeviceUnavailable`]
    pub fn medium(&self) -> Result<&Arc<Medium>> {
        self.medium.as_ref().ok_or(RecoveryError::DeviceUnavailable)
    }

    pub fn dispatch(&self, request: &Request) -> Reply {
        let medium = match self.medium() {
            Ok(medium) => medium,
            Err(e) => {
                tracing::debug!("{} {}: {}", request.method, request.uri, e);
                return self.diagnostic(request);
            }
        };

        tracing::debug!(
            "{} {} ({} arguments)",
            request.method,
            request.uri,
            request.args.len()
        );

        if request.method == Method::GET {
            match request.uri.as_str() {
                LIST_PATH => return self.list(medium, request),
                RAW_PATH => return Reply::RawImage(RawImageStreamer::new(medium.device())),
                _ => {}
            }
        }

        self.serve_static(medium, request)
    }

    fn list(&self, medium: &Medium, request: &Request) -> Reply {
        let volume = medium.volume();
        match open_listing(volume.as_ref(), request.arg("dir")) {
            Ok(listing) => Reply::Listing(listing),
            Err(e) => match e.client_reason() {
                Some(reason) => {
                    tracing::debug!("Rejected listing request: {}", e);
                    Reply::Failure { reason }
                }
                None => {
                    tracing::warn!("Listing failed: {}", e);
                    self.diagnostic(request)
                }
            },
        }
    }

    fn serve_static(&self, medium: &Medium, request: &Request) -> Reply {
        match medium.open_document(resolve(&request.uri)) {
            Ok(document) if request.has_arg(DOWNLOAD_ARG) => {
                Reply::Document(document.force_download())
            }
            Ok(document) => Reply::Document(document),
            Err(RecoveryError::Path(path)) => {
                tracing::debug!("No such document: {}", path);
                self.diagnostic(request)
            }
            Err(e) => {
                tracing::warn!("Cannot serve {}: {}", request.uri, e);
                self.diagnostic(request)
            }
        }
    }

    fn diagnostic(&self, request: &Request) -> Reply {
        let body = diagnostic_body(request, self.is_available());
        tracing::warn!(
            "Unserviceable request {} {}{}",
            request.method,
            request.uri,
            if self.is_available() {
                ""
            } else {
                " (medium not detected)"
            }
        );
        Reply::Diagnostic(body)
    }
}

/// Render the plain-text description of a request
pub fn diagnostic_body(request: &Request, available: bool) -> String {
    let mut body = String::new();
    if !available {
        body.push_str("SDCARD Not Detected\n\n");
    }
    let _ = writeln!(body, "URI: {}", request.uri);
    let _ = writeln!(body, "Method: {}", request.method);
    let _ = writeln!(body, "Arguments: {}", request.args.len());
    for (name, value) in &request.args {
        let _ = writeln!(body, " NAME:{}\n VALUE:{}", name, value);
    }
    body
}
