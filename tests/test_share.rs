mod common;

use std::rc::Rc;

use common::TempDir;
use dirserve::config::Config;
use dirserve::http::handler::{BodySink, Completion, Handler};
use dirserve::http::request::{LoginState, Method, Request, RequestBuilder};
use dirserve::http::response::{Response, StatusCode};
use dirserve::share::{ShareBody, ShareHandler};

fn handler(root: &TempDir) -> ShareHandler {
    let yaml = format!(
        "shares:\n  - mount: /pub\n    path: \"{0}\"\n  - mount: /priv\n    path: \"{0}\"\n    read: authenticated\n    write: authenticated\n",
        root.path().display()
    );
    ShareHandler::new(Rc::new(Config::from_yaml(&yaml).unwrap()))
}

fn request(method: Method, path: &str) -> Request {
    RequestBuilder::new().method(method).path(path).build().unwrap()
}

fn ready(completion: Completion) -> Response {
    match completion {
        Completion::Ready(response) => response,
        Completion::Deferred(_) => panic!("share responses are immediate"),
    }
}

fn run(handler: &ShareHandler, request: &Request, body: &[u8]) -> Response {
    let mut sink = handler.begin(request);
    sink.feed(body);
    ready(handler.complete(request, sink))
}

#[test]
fn test_policy_follows_share_access() {
    let root = TempDir::new("share-policy");
    let handler = handler(&root);

    assert!(handler.allows(&request(Method::GET, "/pub/x")));
    assert!(handler.allows(&request(Method::POST, "/pub/x")), "write: none is a 403, not a 401");
    assert!(!handler.allows(&request(Method::GET, "/priv/x")));

    let mut logged_in = request(Method::GET, "/priv/x");
    logged_in.login = LoginState::LoggedIn("bob".to_string());
    assert!(handler.allows(&logged_in));

    let mut failed = request(Method::GET, "/priv/x");
    failed.login = LoginState::LoginFailed;
    assert!(!handler.allows(&failed));
}

#[test]
fn test_file_response_is_backed_by_the_file() {
    let root = TempDir::new("share-file");
    root.write("doc.txt", b"contents");
    let handler = handler(&root);

    let response = run(&handler, &request(Method::GET, "/pub/doc.txt"), b"");
    assert_eq!(response.status, StatusCode::Ok);
    assert!(response.body.is_empty());
    assert!(response.file.is_some());
    assert_eq!(
        response.headers.get("Content-Disposition"),
        Some("inline; filename=\"doc.txt\"")
    );
}

#[test]
fn test_unreadable_share_is_forbidden() {
    let root = TempDir::new("share-unreadable");
    root.write("secret.txt", b"hidden");
    let yaml = format!(
        "shares:\n  - mount: /s\n    path: \"{}\"\n    read: none\n",
        root.path().display()
    );
    let handler = ShareHandler::new(Rc::new(Config::from_yaml(&yaml).unwrap()));

    for method in [Method::GET, Method::HEAD] {
        let response = run(&handler, &request(method, "/s/secret.txt"), b"");
        assert_eq!(response.status, StatusCode::Forbidden);
        assert!(response.file.is_none());
    }
}

#[test]
fn test_unmatched_path_is_not_found() {
    let root = TempDir::new("share-none");
    let handler = handler(&root);
    assert_eq!(
        run(&handler, &request(Method::GET, "/elsewhere"), b"").status,
        StatusCode::NotFound
    );
}

#[test]
fn test_upload_to_read_only_share_is_forbidden() {
    let root = TempDir::new("share-ro");
    let handler = handler(&root);

    let mut req = request(Method::POST, "/pub");
    req.headers
        .append("Content-Type", "multipart/form-data; boundary=b");
    assert!(matches!(handler.begin(&req), ShareBody::Discard));
    assert_eq!(run(&handler, &req, b"").status, StatusCode::Forbidden);
}

#[test]
fn test_upload_without_multipart_type_is_rejected() {
    let root = TempDir::new("share-type");
    let handler = handler(&root);

    let mut req = request(Method::POST, "/priv");
    req.headers.append("Content-Type", "text/plain");
    let response = run(&handler, &req, b"hello");
    assert_eq!(response.status, StatusCode::BadRequest);
    assert_eq!(response.body, b"request body is not multipart/form-data");
}

#[test]
fn test_upload_into_writable_share() {
    let root = TempDir::new("share-upload");
    let handler = handler(&root);

    let mut req = request(Method::POST, "/priv/");
    req.headers
        .append("Content-Type", "multipart/form-data; boundary=b");
    let body = b"--b\r\nContent-Disposition: form-data; name=\"f\"; filename=\"n.txt\"\r\n\r\nnew\r\n--b--\r\n";

    let response = run(&handler, &req, body);
    assert_eq!(response.status, StatusCode::Ok);
    assert_eq!(std::fs::read(root.path().join("n.txt")).unwrap(), b"new");
}
