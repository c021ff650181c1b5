//! Static asset mounts.
//!
//! A [`StaticMountHandler`] answers requests under its path prefix from a
//! local directory. Existing files are served through `tower-http`'s
//! [`ServeFile`], which handles range and conditional requests and picks the
//! MIME type from the extension. Directories serve their index file.
//! Anything else falls back to the mount's `fallback` file when one is
//! configured (single-page apps), otherwise to a 404 or the configured
//! error page. Paths that try to leave the mount directory are always 404.

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::path::{Path, PathBuf};

use axum::body::Body;
use axum::response::IntoResponse;
use http::{Request, Response, StatusCode};
use percent_encoding::percent_decode_str;
use tower::ServiceExt;
use tower_http::services::ServeFile;

use crate::config::model::StaticMount;

pub const FAVICON_PATH: &str = "/favicon.ico";
const FAVICON_FILE: &str = "favicon.ico";

#[derive(Debug, Clone)]
pub struct StaticMountHandler {
    prefix: String,
    root: PathBuf,
    index: String,
    fallback: Option<String>,
    error_pages: BTreeMap<u16, String>,
}

impl StaticMountHandler {
    #[must_use]
    pub fn new(mount: &StaticMount) -> Self {
        Self {
            prefix: mount.path.clone(),
            root: PathBuf::from(&mount.dir),
            index: mount.index_file().to_string(),
            fallback: mount.fallback.clone().filter(|f| !f.is_empty()),
            error_pages: mount.error_pages.clone(),
        }
    }

    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn matches(&self, path: &str) -> bool {
        path.starts_with(&self.prefix)
    }

    pub async fn serve(&self, req: Request<Body>) -> Response<Body> {
        let Some(relative) = self.relative_path(req.uri().path()) else {
            return self.error_response(StatusCode::NOT_FOUND).await;
        };

        if let Some(file) = self.resolve(&relative).await {
            return serve_file(&file, req).await;
        }

        if let Some(fallback) = &self.fallback {
            let file = self.root.join(fallback);
            if is_file(&file).await {
                return serve_file(&file, req).await;
            }
            tracing::warn!(
                mount = %self.prefix,
                fallback = %file.display(),
                "fallback file is missing"
            );
        }

        self.error_response(StatusCode::NOT_FOUND).await
    }

    /// Request path below the prefix, decoded and split into safe segments.
    /// `None` when the path escapes the mount or is not valid UTF-8.
    fn relative_path(&self, path: &str) -> Option<PathBuf> {
        let rest = path.strip_prefix(&self.prefix)?;
        let decoded = percent_decode_str(rest).decode_utf8().ok()?;

        let mut relative = PathBuf::new();
        for segment in decoded.split('/') {
            match segment {
                "" | "." => {}
                ".." => return None,
                s if s.contains('\0') || s.contains('\\') => return None,
                s => relative.push(s),
            }
        }
        Some(relative)
    }

    /// The file to serve for `relative`: the file itself, or the index of a
    /// directory.
    async fn resolve(&self, relative: &Path) -> Option<PathBuf> {
        let path = self.root.join(relative);
        let meta = tokio::fs::metadata(&path).await.ok()?;

        if meta.is_file() {
            return Some(path);
        }
        if meta.is_dir() {
            let index = path.join(&self.index);
            if is_file(&index).await {
                return Some(index);
            }
        }
        None
    }

    async fn error_response(&self, status: StatusCode) -> Response<Body> {
        if let Some(page) = self.error_pages.get(&status.as_u16()) {
            let file = self.root.join(page);
            if is_file(&file).await {
                let mut response = serve_file(&file, Request::new(Body::empty())).await;
                *response.status_mut() = status;
                return response;
            }
        }
        status.into_response()
    }
}

/// Serve the first `favicon.ico` found in the mount directories, in
/// declaration order, or `204 No Content` when none has one.
pub async fn serve_favicon(mounts: &[StaticMountHandler], req: Request<Body>) -> Response<Body> {
    for mount in mounts {
        let file = mount.root.join(FAVICON_FILE);
        if is_file(&file).await {
            return serve_file(&file, req).await;
        }
    }
    StatusCode::NO_CONTENT.into_response()
}

async fn serve_file(path: &Path, req: Request<Body>) -> Response<Body> {
    let result: Result<_, Infallible> = ServeFile::new(path).oneshot(req).await;
    match result {
        Ok(response) => response.map(Body::new),
        Err(never) => match never {},
    }
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}
