mod common;

use common::TempDir;
use dirserve::http::multipart::{MultipartDecoder, MultipartError, MultipartPart, parse_boundary};

const BOUNDARY: &str = "XyZ";

fn body(file_bytes: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(b"preamble to ignore\r\n--XyZ\r\n");
    body.extend_from_slice(b"Content-Disposition: form-data; name=\"field\"\r\n\r\n");
    body.extend_from_slice(b"value\r\n--XyA near miss\r\n-\r\n--");
    body.extend_from_slice(b"\r\n--XyZ\r\n");
    body.extend_from_slice(
        b"Content-Disposition: form-data; name=\"file\"; filename=\"C:\\\\tmp\\\\up.bin\"\r\n",
    );
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(file_bytes);
    body.extend_from_slice(b"\r\n--XyZ--\r\nepilogue\r\n");
    body
}

fn file_bytes() -> Vec<u8> {
    let mut bytes: Vec<u8> = (0..300u32).map(|i| (i % 256) as u8).collect();
    bytes.extend_from_slice(b"\r\n--X");
    bytes.extend_from_slice(b"\r\n-\r\n--Xy!");
    bytes
}

fn decode(
    data: &[u8],
    step: usize,
    dest: Option<&TempDir>,
) -> Result<Vec<MultipartPart>, MultipartError> {
    let mut decoder = MultipartDecoder::new(BOUNDARY, dest.map(|d| d.path().to_path_buf()));
    for piece in data.chunks(step) {
        decoder.append_data(piece);
    }
    decoder.finish()
}

#[test]
fn test_in_memory_parts() {
    let parts = decode(&body(b"payload"), usize::MAX, None).unwrap();
    assert_eq!(parts.len(), 2);

    assert_eq!(parts[0].name, "field");
    assert_eq!(parts[0].filename, None);
    assert_eq!(parts[0].text(), Some("value\r\n--XyA near miss\r\n-\r\n--"));

    assert_eq!(parts[1].name, "file");
    assert_eq!(parts[1].filename.as_deref(), Some("C:\\tmp\\up.bin"));
    assert_eq!(parts[1].data(), Some(&b"payload"[..]));
    assert_eq!(
        parts[1].headers.get("content-type"),
        Some("application/octet-stream")
    );
    assert!(parts.iter().all(|p| p.is_ok()));
}

#[test]
fn test_byte_at_a_time_matches_single_call() {
    let data = body(&file_bytes());
    let whole = decode(&data, data.len(), None).unwrap();

    for step in [1, 2, 3, 7, 64] {
        let pieces = decode(&data, step, None).unwrap();
        assert_eq!(pieces.len(), whole.len(), "step {step}");
        for (a, b) in pieces.iter().zip(&whole) {
            assert_eq!(a.name, b.name, "step {step}");
            assert_eq!(a.filename, b.filename, "step {step}");
            assert_eq!(a.data(), b.data(), "step {step}");
        }
    }
    assert_eq!(whole[1].data(), Some(&file_bytes()[..]));
}

#[test]
fn test_file_parts_stream_to_destination() {
    for step in [1, 5, usize::MAX] {
        let dir = TempDir::new("multipart-dest");
        let parts = decode(&body(&file_bytes()), step, Some(&dir)).unwrap();

        let stored = dir.path().join("up.bin");
        assert_eq!(parts[1].path(), Some(stored.as_path()));
        assert_eq!(parts[1].size(), file_bytes().len() as u64);
        drop(parts);
        assert_eq!(std::fs::read(&stored).unwrap(), file_bytes());
    }
}

#[test]
fn test_missing_name_fails_everything() {
    let dir = TempDir::new("multipart-noname");
    let mut data = Vec::new();
    data.extend_from_slice(b"--XyZ\r\nContent-Disposition: form-data; name=\"f\"; filename=\"a.txt\"\r\n\r\nAAA");
    data.extend_from_slice(b"\r\n--XyZ\r\nContent-Disposition: form-data\r\n\r\nBBB\r\n--XyZ--\r\n");

    assert_eq!(
        decode(&data, 4, Some(&dir)).unwrap_err(),
        MultipartError::MissingName
    );
    assert!(!dir.path().join("a.txt").exists());
}

#[test]
fn test_truncated_body_removes_written_files() {
    let dir = TempDir::new("multipart-trunc");
    let data = b"--XyZ\r\nContent-Disposition: form-data; name=\"f\"; filename=\"half.bin\"\r\n\r\nsome bytes";

    assert_eq!(
        decode(data, 3, Some(&dir)).unwrap_err(),
        MultipartError::Truncated
    );
    assert!(!dir.path().join("half.bin").exists());
}

#[test]
fn test_boundary_never_found() {
    assert_eq!(
        decode(b"no delimiter anywhere", 5, None).unwrap_err(),
        MultipartError::BoundaryNotFound
    );
}

#[test]
fn test_unfinished_part_headers() {
    assert_eq!(
        decode(b"--XyZ\r\nContent-Disposition: form-data; na", 5, None).unwrap_err(),
        MultipartError::PartHeadersIncomplete
    );
}

#[test]
fn test_existing_file_is_not_overwritten() {
    let dir = TempDir::new("multipart-exists");
    dir.write("taken.txt", b"original");
    let data = b"--XyZ\r\nContent-Disposition: form-data; name=\"f\"; filename=\"taken.txt\"\r\n\r\nnew\r\n--XyZ--";

    assert_eq!(
        decode(data, usize::MAX, Some(&dir)).unwrap_err(),
        MultipartError::FileExists("taken.txt".to_string())
    );
    assert_eq!(std::fs::read(dir.path().join("taken.txt")).unwrap(), b"original");
}

#[test]
fn test_dot_dot_filename_is_rejected() {
    let dir = TempDir::new("multipart-dotdot");
    let data = b"--XyZ\r\nContent-Disposition: form-data; name=\"f\"; filename=\"..\"\r\n\r\nx\r\n--XyZ--";
    assert_eq!(
        decode(data, usize::MAX, Some(&dir)).unwrap_err(),
        MultipartError::InvalidFilename("..".to_string())
    );
}

#[test]
fn test_dropped_decoder_cleans_up() {
    let dir = TempDir::new("multipart-drop");
    let mut decoder = MultipartDecoder::new(BOUNDARY, Some(dir.path().to_path_buf()));
    decoder.append_data(b"--XyZ\r\nContent-Disposition: form-data; name=\"f\"; filename=\"done.txt\"\r\n\r\nok\r\n--XyZ\r\n");
    assert!(dir.path().join("done.txt").exists());

    drop(decoder);
    assert!(!dir.path().join("done.txt").exists());
}

#[test]
fn test_boundary_from_header() {
    assert_eq!(
        parse_boundary("multipart/form-data; charset=utf-8; boundary=----WebKitFormBoundary7MA4").unwrap(),
        "----WebKitFormBoundary7MA4"
    );
    assert!(MultipartDecoder::from_content_type("application/json", None).is_err());
}
