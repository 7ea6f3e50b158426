use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::rc::Rc;

use crate::config::{Access, Config, ShareConfig};
use crate::http::handler::{BodySink, Completion, Handler};
use crate::http::multipart::{MultipartDecoder, MultipartError};
use crate::http::request::{LoginState, Method, Request};
use crate::http::response::{Response, ResponseBuilder, StatusCode};
use crate::share::{is_unsafe_path, resolve};

/// Where a request body goes.
pub enum ShareBody {
    Discard,
    Upload(MultipartDecoder),
    /// The upload was refused before its first byte
    Rejected(MultipartError),
}

impl BodySink for ShareBody {
    fn feed(&mut self, data: &[u8]) {
        if let ShareBody::Upload(decoder) = self {
            decoder.append_data(data);
        }
    }
}

/// Serves files from the configured shares and accepts multipart uploads
/// into writable ones.
pub struct ShareHandler {
    config: Rc<Config>,
}

impl ShareHandler {
    pub fn new(config: Rc<Config>) -> Self {
        Self { config }
    }

    fn share_for<'p>(&self, request: &'p Request) -> Option<(&ShareConfig, &'p str)> {
        resolve(&self.config.shares, &request.path)
    }

    fn local_path(share: &ShareConfig, rest: &str) -> PathBuf {
        share.path.join(rest.trim_start_matches('/'))
    }

    fn serve_file(&self, request: &Request) -> Response {
        if is_unsafe_path(&request.path) {
            return Response::error(StatusCode::BadRequest);
        }
        let Some((share, rest)) = self.share_for(request) else {
            return Response::not_found();
        };
        if share.read == Access::Denied {
            return Response::error(StatusCode::Forbidden);
        }
        let path = Self::local_path(share, rest);

        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Response::not_found(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "open failed");
                return Response::text(StatusCode::InternalServerError, e.to_string());
            }
        };
        match file.metadata() {
            Ok(meta) if meta.is_dir() => return Response::error(StatusCode::Forbidden),
            Ok(_) => {}
            Err(e) => return Response::text(StatusCode::InternalServerError, e.to_string()),
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().replace('"', "_"))
            .unwrap_or_default();
        ResponseBuilder::new(StatusCode::Ok)
            .header("Content-Type", "application/octet-stream")
            .header("Content-Disposition", format!("inline; filename=\"{name}\""))
            .file(file)
            .build()
    }

    /// Directory an upload to `request` would land in.
    fn upload_dir(&self, request: &Request) -> Result<PathBuf, Response> {
        if is_unsafe_path(&request.path) {
            return Err(Response::error(StatusCode::BadRequest));
        }
        let Some((share, rest)) = self.share_for(request) else {
            return Err(Response::not_found());
        };
        if share.write == Access::Denied {
            return Err(Response::error(StatusCode::Forbidden));
        }

        let dir = Self::local_path(share, rest);
        match std::fs::metadata(&dir) {
            Ok(meta) if meta.is_dir() => Ok(dir),
            Ok(_) => Err(Response::error(StatusCode::Conflict)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(Response::not_found()),
            Err(e) => Err(Response::text(StatusCode::InternalServerError, e.to_string())),
        }
    }

    fn finish_upload(&self, request: &Request, body: ShareBody) -> Response {
        let decoder = match body {
            ShareBody::Upload(decoder) => decoder,
            ShareBody::Rejected(e) => return Response::text(StatusCode::BadRequest, e.to_string()),
            ShareBody::Discard => {
                return match self.upload_dir(request) {
                    Err(response) => response,
                    Ok(_) => Response::text(
                        StatusCode::BadRequest,
                        MultipartError::NotMultipart.to_string(),
                    ),
                };
            }
        };

        match decoder.finish() {
            Ok(parts) => {
                let mut summary = String::new();
                let mut files = 0;
                for part in &parts {
                    if let Some(filename) = &part.filename {
                        files += 1;
                        summary.push_str(&format!("{filename}: {} bytes\n", part.size()));
                    }
                }
                tracing::info!(path = %request.path, files, "upload stored");
                Response::ok(format!("uploaded {files} file(s)\n{summary}"))
            }
            Err(e) => {
                tracing::info!(path = %request.path, error = %e, "upload rejected");
                Response::text(StatusCode::BadRequest, e.to_string())
            }
        }
    }
}

impl Handler for ShareHandler {
    type Body = ShareBody;

    fn allows(&self, request: &Request) -> bool {
        let Some((share, _)) = self.share_for(request) else {
            return true;
        };
        let needed = if request.method == Method::POST {
            share.write
        } else {
            share.read
        };
        match needed {
            Access::Authenticated => matches!(request.login, LoginState::LoggedIn(_)),
            Access::Anonymous | Access::Denied => true,
        }
    }

    fn begin(&self, request: &Request) -> ShareBody {
        if request.method != Method::POST {
            return ShareBody::Discard;
        }
        let Ok(dir) = self.upload_dir(request) else {
            return ShareBody::Discard;
        };
        match request.header("Content-Type") {
            Some(content_type) => {
                match MultipartDecoder::from_content_type(content_type, Some(dir)) {
                    Ok(decoder) => ShareBody::Upload(decoder),
                    Err(e) => ShareBody::Rejected(e),
                }
            }
            None => ShareBody::Rejected(MultipartError::NotMultipart),
        }
    }

    fn complete(&self, request: &Request, body: ShareBody) -> Completion {
        let response = match &request.method {
            Method::GET | Method::HEAD => self.serve_file(request),
            Method::POST => self.finish_upload(request, body),
            Method::Extension(_) => Response::error(StatusCode::NotImplemented),
            _ => ResponseBuilder::new(StatusCode::MethodNotAllowed)
                .header("Allow", "GET, HEAD, POST")
                .header("Content-Type", "text/plain; charset=utf-8")
                .body(b"405 Method Not Allowed".to_vec())
                .build(),
        };
        Completion::Ready(response)
    }
}
