//! Content codecs: raw bytes, UTF-8 text, JSON and downloaded files.

use std::marker::PhantomData;
use std::path::PathBuf;

use bytes::Bytes;
use serde::de::DeserializeOwned;

use crate::domain::{Content, CourierError, Response};
use crate::ports::ContentCodec;

fn read_bytes(content: &Content) -> Result<Bytes, CourierError> {
    match content {
        Content::Bytes(bytes) => Ok(bytes.clone()),
        Content::File { path, .. } => std::fs::read(path)
            .map(Bytes::from)
            .map_err(|e| CourierError::io(Some(path.clone()), e)),
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BytesCodec;

impl ContentCodec for BytesCodec {
    type Output = Bytes;

    fn decode(&self, content: &Content, _response: &Response) -> Result<Bytes, CourierError> {
        read_bytes(content)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TextCodec;

impl ContentCodec for TextCodec {
    type Output = String;

    fn decode(&self, content: &Content, _response: &Response) -> Result<String, CourierError> {
        let bytes = read_bytes(content)?;
        String::from_utf8(bytes.to_vec()).map_err(|e| CourierError::decoding("utf-8 text", e))
    }
}

/// JSON codec.
///
/// A declared content-type that is not JSON is rejected with
/// `InvalidContent`; a missing content-type is accepted.
pub struct JsonCodec<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonCodec<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: DeserializeOwned + Send + 'static> ContentCodec for JsonCodec<T> {
    type Output = T;

    fn decode(&self, content: &Content, response: &Response) -> Result<T, CourierError> {
        if let Some(content_type) = response.content_type()
            && !content_type.to_ascii_lowercase().contains("json")
        {
            return Err(CourierError::InvalidContent(format!(
                "expected json, got {content_type}"
            )));
        }
        let bytes = read_bytes(content)?;
        serde_json::from_slice(&bytes).map_err(|e| CourierError::decoding("json", e))
    }
}

/// Hands out the location of a downloaded file.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileCodec;

impl ContentCodec for FileCodec {
    type Output = PathBuf;

    fn decode(&self, content: &Content, _response: &Response) -> Result<PathBuf, CourierError> {
        match content {
            Content::File { path, .. } => Ok(path.clone()),
            Content::Bytes(_) => Err(CourierError::InvalidContent(
                "expected a downloaded file, got in-memory bytes".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::io::Write;

    #[derive(Debug, Deserialize, PartialEq)]
    struct User {
        id: u32,
        name: String,
    }

    fn json_response() -> Response {
        Response::new(200).with_header("Content-Type", "application/json; charset=utf-8")
    }

    #[test]
    fn json_decodes_bytes() {
        let content = Content::Bytes(Bytes::from_static(br#"{"id":7,"name":"ada"}"#));
        let user = JsonCodec::<User>::new()
            .decode(&content, &json_response())
            .unwrap();
        assert_eq!(
            user,
            User {
                id: 7,
                name: "ada".to_string()
            }
        );
    }

    #[test]
    fn json_rejects_other_content_types() {
        let content = Content::Bytes(Bytes::from_static(b"<html></html>"));
        let response = Response::new(200).with_header("content-type", "text/html");
        let err = JsonCodec::<User>::new().decode(&content, &response).unwrap_err();
        assert!(matches!(err, CourierError::InvalidContent(_)));
    }

    #[test]
    fn json_reports_decoding_failure() {
        let content = Content::Bytes(Bytes::from_static(b"{\"id\":"));
        let err = JsonCodec::<User>::new()
            .decode(&content, &json_response())
            .unwrap_err();
        assert!(matches!(err, CourierError::DecodingFailure { .. }));
    }

    #[test]
    fn text_reads_downloaded_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all("héllo".as_bytes()).unwrap();
        let content = Content::File {
            path: file.path().to_path_buf(),
            temporary: false,
        };

        let text = TextCodec.decode(&content, &Response::new(200)).unwrap();
        assert_eq!(text, "héllo");
    }

    #[test]
    fn text_rejects_invalid_utf8() {
        let content = Content::Bytes(Bytes::from_static(&[0xff, 0xfe]));
        let err = TextCodec.decode(&content, &Response::new(200)).unwrap_err();
        assert!(matches!(err, CourierError::DecodingFailure { .. }));
    }

    #[test]
    fn file_codec_requires_a_file() {
        let err = FileCodec
            .decode(&Content::Bytes(Bytes::new()), &Response::new(200))
            .unwrap_err();
        assert!(matches!(err, CourierError::InvalidContent(_)));
    }
}
