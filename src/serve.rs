//! Static file route: downloads, with range support, from a directory.
//!
//! Paths are jailed under the root. Anything that resolves outside it, or
//! does not exist, is a 404. Directory listings, uploads and deletes are not
//! offered; verbs other than GET, HEAD and OPTIONS get a 405.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use percent_encoding::percent_decode_str;
use tracing::debug;

use crate::http::mime;
use crate::http::request::{Method, Request};
use crate::http::response::{Response, StatusCode};
use crate::routing::Route;
use crate::session::Session;

const ALLOW: &str = "GET, HEAD, OPTIONS";

#[derive(Debug, Clone)]
pub struct StaticFiles {
    mount: String,
    root: PathBuf,
    allow_download: bool,
}

impl StaticFiles {
    pub fn new(mount: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            mount: mount.into().trim_end_matches('/').to_string(),
            root: root.into(),
            allow_download: true,
        }
    }

    pub fn allow_download(mut self, allow: bool) -> Self {
        self.allow_download = allow;
        self
    }

    /// The route serving everything below the mount point.
    pub fn route(self) -> Result<Route, regex::Error> {
        let pattern = format!("{}/(.*)", regex::escape(&self.mount));
        let files = Arc::new(self);
        Route::pattern(None, &pattern, move |session: Session, request: Request| {
            let files = Arc::clone(&files);
            async move { files.serve(session, request).await }
        })
    }

    /// Maps a request path below the mount point to a file under the root.
    pub fn resolve(&self, relative: &str) -> Option<PathBuf> {
        let mut path = self.root.clone();
        for segment in relative.split('/') {
            let segment = percent_decode_str(segment).decode_utf8().ok()?;
            match segment.as_ref() {
                "" | "." => continue,
                ".." => return None,
                s if s.contains(['/', '\\', '\0']) => return None,
                s => path.push(s),
            }
        }

        let root = self.root.canonicalize().ok()?;
        let resolved = path.canonicalize().ok()?;
        resolved.starts_with(&root).then_some(resolved)
    }

    async fn serve(&self, session: Session, request: Request) -> anyhow::Result<()> {
        match request.method {
            Method::GET | Method::HEAD => {}
            Method::OPTIONS => {
                let response = Response::builder(StatusCode::Ok).header("Allow", ALLOW).build();
                session.send(response).commit().await?;
                return Ok(());
            }
            _ => {
                let response = Response::builder(StatusCode::MethodNotAllowed)
                    .header("Allow", ALLOW)
                    .build();
                session.send(response).commit().await?;
                return Ok(());
            }
        }

        if !self.allow_download {
            session
                .send_standard_response(StatusCode::Forbidden, Some("downloads are disabled"))
                .commit()
                .await?;
            return Ok(());
        }

        let relative = request.captures.first().map(String::as_str).unwrap_or("");
        let Some(file) = self.resolve(relative).and_then(|p| open_file(&p).map(|f| (p, f))) else {
            debug!(path = %request.path, "File not found");
            session
                .send_standard_response(StatusCode::NotFound, Some(request.path_only()))
                .commit()
                .await?;
            return Ok(());
        };

        let (path, file) = file;
        session.send_file(&request, file, mime::for_path(&path)).await?;
        Ok(())
    }
}

fn open_file(path: &Path) -> Option<File> {
    let file = File::open(path).ok()?;
    file.metadata().ok()?.is_file().then_some(file)
}
