//! Ephemeral static file server for install payloads.
//!
//! The server is bound before anything needs its URL, so consumers never
//! poll for readiness. It runs on a detached thread with its own runtime and
//! is never stopped: its lifetime is the hosting process's, which is
//! short-lived and test scoped. Joining it would block the VM boot that it
//! exists to feed.

use axum::body::Body;
use axum::extract::{Path as UrlPath, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use std::io;
use std::net::TcpListener;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio_util::io::ReaderStream;

/// Handle to a running content server. Only the URL leaks out.
#[derive(Debug, Clone)]
pub struct ContentServer {
    base_url: String,
    port: u16,
}

impl ContentServer {
    /// Serve `root` on an OS-assigned port. `host_ip` is the address the
    /// guest uses to reach this host and goes into the base URL.
    pub fn start(root: &Path, host_ip: &str) -> io::Result<Self> {
        let listener = TcpListener::bind(("0.0.0.0", 0))?;
        listener.set_nonblocking(true)?;
        let port = listener.local_addr()?.port();

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_io()
            .thread_name("content-server-io")
            .build()?;
        let app = router(root.to_path_buf());

        std::thread::Builder::new()
            .name(format!("content-server-{port}"))
            .spawn(move || {
                runtime.block_on(async move {
                    let listener = match tokio::net::TcpListener::from_std(listener) {
                        Ok(l) => l,
                        Err(e) => {
                            tracing::error!(port, error = %e, "content server listener");
                            return;
                        }
                    };
                    if let Err(e) = axum::serve(listener, app).await {
                        tracing::error!(port, error = %e, "content server stopped");
                    }
                })
            })?;

        let base_url = format!("http://{host_ip}:{port}");
        tracing::info!(root = %root.display(), url = %base_url, "content server listening");
        Ok(Self { base_url, port })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

fn router(root: PathBuf) -> Router {
    Router::new()
        .route("/{*path}", get(serve_file))
        .with_state(Arc::new(root))
}

/// Reject anything that could escape the content root.
fn relative_request_path(raw: &str) -> Option<PathBuf> {
    let candidate = Path::new(raw.trim_start_matches('/'));
    if candidate.as_os_str().is_empty() {
        return None;
    }
    for component in candidate.components() {
        if matches!(
            component,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        ) {
            return None;
        }
    }
    Some(candidate.to_path_buf())
}

async fn serve_file(State(root): State<Arc<PathBuf>>, UrlPath(path): UrlPath<String>) -> Response {
    let Some(relative) = relative_request_path(&path) else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    let full = root.join(relative);

    let file = match tokio::fs::File::open(&full).await {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return StatusCode::NOT_FOUND.into_response()
        }
        Err(e) => {
            tracing::warn!(path = %full.display(), error = %e, "opening served file");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    let len = match file.metadata().await {
        Ok(meta) if meta.is_file() => meta.len(),
        Ok(_) => return StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            tracing::warn!(path = %full.display(), error = %e, "stat of served file");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    tracing::debug!(path = %full.display(), len, "serving");

    (
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_LENGTH, len.to_string()),
        ],
        Body::from_stream(ReaderStream::new(file)),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn fetch(server: &ContentServer, path: &str) -> reqwest::blocking::Response {
        let url = format!("http://127.0.0.1:{}/{}", server.port(), path);
        reqwest::blocking::get(url).unwrap()
    }

    #[test]
    fn rejects_traversal() {
        assert!(relative_request_path("../etc/passwd").is_none());
        assert!(relative_request_path("a/../../b").is_none());
        assert!(relative_request_path("").is_none());
        assert_eq!(
            relative_request_path("boot/grub2/grub.cfg"),
            Some(PathBuf::from("boot/grub2/grub.cfg"))
        );
    }

    #[test]
    fn base_url_uses_guest_visible_host() {
        let root = TempDir::new().unwrap();
        let server = ContentServer::start(root.path(), "10.0.2.2").unwrap();
        assert_eq!(
            server.base_url(),
            format!("http://10.0.2.2:{}", server.port())
        );
        assert_ne!(server.port(), 0);
    }

    #[test]
    fn serves_files_and_symlinks() {
        let root = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        fs::write(root.path().join("config.ign"), b"{}").unwrap();
        fs::write(outside.path().join("kernel"), b"vmlinuz").unwrap();
        std::os::unix::fs::symlink(outside.path().join("kernel"), root.path().join("kernel"))
            .unwrap();
        fs::create_dir_all(root.path().join("boot/grub2")).unwrap();
        fs::write(root.path().join("boot/grub2/grub.cfg"), b"default=0").unwrap();

        let server = ContentServer::start(root.path(), "127.0.0.1").unwrap();

        let resp = fetch(&server, "config.ign");
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
        assert_eq!(resp.bytes().unwrap().as_ref(), b"{}");
        assert_eq!(fetch(&server, "kernel").bytes().unwrap().as_ref(), b"vmlinuz");
        assert_eq!(
            fetch(&server, "boot/grub2/grub.cfg").bytes().unwrap().as_ref(),
            b"default=0"
        );
        assert_eq!(
            fetch(&server, "missing").status(),
            reqwest::StatusCode::NOT_FOUND
        );
        assert_eq!(fetch(&server, "boot").status(), reqwest::StatusCode::NOT_FOUND);
    }
}
