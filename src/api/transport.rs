//! REST transport to the farm-record server.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::error::ApiError;
use crate::queue::{FilePart, Payload};

/// Form field that tunnels the real verb through a multipart POST.
pub const METHOD_OVERRIDE_FIELD: &str = "_method";

/// The calls the sync engine makes against the server.
///
/// Paths are relative to the API root: `/{entity}` or `/{entity}/{id}`.
#[async_trait]
pub trait RestTransport: Send + Sync {
  async fn get(&self, path: &str) -> Result<Value, ApiError>;
  async fn create(&self, entity: &str, payload: &Payload) -> Result<Value, ApiError>;
  async fn update(&self, entity: &str, id: &str, payload: &Payload) -> Result<Value, ApiError>;
  async fn delete(&self, entity: &str, id: &str) -> Result<Value, ApiError>;
}

/// reqwest-backed transport.
#[derive(Clone)]
pub struct HttpTransport {
  client: reqwest::Client,
  base_url: Url,
  token: Option<String>,
}

impl HttpTransport {
  pub fn new(base_url: &str, timeout: Duration, token: Option<String>) -> Result<Self, ApiError> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| ApiError::Transport(format!("failed to build HTTP client: {e}")))?;
    Self::with_client(client, base_url, token)
  }

  /// Use a preconfigured client (proxy, TLS roots, timeouts).
  pub fn with_client(
    client: reqwest::Client,
    base_url: &str,
    token: Option<String>,
  ) -> Result<Self, ApiError> {
    let base_url = Url::parse(base_url).map_err(|e| ApiError::InvalidUrl(format!("{base_url}: {e}")))?;
    Ok(Self {
      client,
      base_url,
      token,
    })
  }

  pub fn base_url(&self) -> &Url {
    &self.base_url
  }

  /// Absolute URL for an API-relative path.
  pub fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
    let joined = format!(
      "{}/{}",
      self.base_url.as_str().trim_end_matches('/'),
      path.trim_start_matches('/')
    );
    Url::parse(&joined).map_err(|e| ApiError::InvalidUrl(format!("{joined}: {e}")))
  }

  fn request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
    let builder = self
      .client
      .request(method, url)
      .header(reqwest::header::ACCEPT, "application/json");
    match &self.token {
      Some(token) => builder.bearer_auth(token),
      None => builder,
    }
  }

  async fn send(&self, builder: reqwest::RequestBuilder) -> Result<Value, ApiError> {
    let response = builder.send().await?;
    let status = response.status();
    let bytes = response.bytes().await?;

    if !status.is_success() {
      let body = serde_json::from_slice(&bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
      return Err(ApiError::Application {
        status: status.as_u16(),
        body,
      });
    }

    if bytes.iter().all(u8::is_ascii_whitespace) {
      return Ok(Value::Null);
    }
    serde_json::from_slice(&bytes).map_err(|e| ApiError::Decode(e.to_string()))
  }

  async fn send_payload(
    &self,
    method: reqwest::Method,
    path: &str,
    payload: &Payload,
  ) -> Result<Value, ApiError> {
    let url = self.endpoint(path)?;
    debug!(%method, %url, multipart = payload.is_multipart(), "sending write");

    match payload {
      Payload::Json(body) => self.send(self.request(method, url).json(body)).await,
      Payload::Multipart { fields, file } => {
        let mut form = multipart_form(fields, file)?;
        // Multipart bodies are only accepted on POST; the real verb rides along
        let method = if method == reqwest::Method::POST {
          method
        } else {
          form = form.text(METHOD_OVERRIDE_FIELD, method.as_str().to_string());
          reqwest::Method::POST
        };
        self.send(self.request(method, url).multipart(form)).await
      }
    }
  }
}

#[async_trait]
impl RestTransport for HttpTransport {
  async fn get(&self, path: &str) -> Result<Value, ApiError> {
    let url = self.endpoint(path)?;
    debug!(%url, "GET");
    self.send(self.request(reqwest::Method::GET, url)).await
  }

  async fn create(&self, entity: &str, payload: &Payload) -> Result<Value, ApiError> {
    self
      .send_payload(reqwest::Method::POST, &format!("/{entity}"), payload)
      .await
  }

  async fn update(&self, entity: &str, id: &str, payload: &Payload) -> Result<Value, ApiError> {
    self
      .send_payload(reqwest::Method::PUT, &format!("/{entity}/{id}"), payload)
      .await
  }

  async fn delete(&self, entity: &str, id: &str) -> Result<Value, ApiError> {
    let url = self.endpoint(&format!("/{entity}/{id}"))?;
    debug!(%url, "DELETE");
    self.send(self.request(reqwest::Method::DELETE, url)).await
  }
}

/// Text value of a JSON field as a form would carry it.
pub fn form_value(value: &Value) -> String {
  match value {
    Value::Null => String::new(),
    Value::String(s) => s.clone(),
    other => other.to_string(),
  }
}

fn multipart_form(
  fields: &serde_json::Map<String, Value>,
  file: &FilePart,
) -> Result<Form, ApiError> {
  let mut form = Form::new();
  for (name, value) in fields {
    form = form.text(name.clone(), form_value(value));
  }

  let mut part = Part::bytes(file.bytes.clone()).file_name(file.file_name.clone());
  if let Some(mime) = &file.mime_type {
    part = part
      .mime_str(mime)
      .map_err(|e| ApiError::Decode(format!("invalid mime type '{mime}': {e}")))?;
  }
  Ok(form.part(file.field.clone(), part))
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;
  use tokio::io::{AsyncReadExt, AsyncWriteExt};
  use tokio::net::{TcpListener, TcpStream};
  use tokio::task::JoinHandle;

  fn transport(base: &str) -> HttpTransport {
    HttpTransport::new(base, Duration::from_secs(5), None).unwrap()
  }

  #[test]
  fn test_endpoint_joins_paths() {
    let t = transport("https://kebun.example.com/api");
    assert_eq!(
      t.endpoint("/pokok").unwrap().as_str(),
      "https://kebun.example.com/api/pokok"
    );

    let t = transport("https://kebun.example.com/api/");
    assert_eq!(
      t.endpoint("pokok/4").unwrap().as_str(),
      "https://kebun.example.com/api/pokok/4"
    );
  }

  #[test]
  fn test_invalid_base_url() {
    let result = HttpTransport::new("not a url", Duration::from_secs(1), None);
    assert!(matches!(result, Err(ApiError::InvalidUrl(_))));
  }

  #[test]
  fn test_form_values() {
    assert_eq!(form_value(&json!("teks")), "teks");
    assert_eq!(form_value(&json!(12)), "12");
    assert_eq!(form_value(&json!(true)), "true");
    assert_eq!(form_value(&Value::Null), "");
  }

  fn local(base: &str) -> HttpTransport {
    let client = reqwest::Client::builder()
      .no_proxy()
      .timeout(Duration::from_secs(5))
      .build()
      .unwrap();
    HttpTransport::with_client(client, base, Some("rahsia".into())).unwrap()
  }

  /// Answer one request on a loopback port with `status` and `body`.
  /// The handle yields the raw request as received.
  async fn serve_once(status: &'static str, body: &'static str) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}/api", listener.local_addr().unwrap());
    let handle = tokio::spawn(async move {
      let (mut socket, _) = listener.accept().await.unwrap();
      let request = read_request(&mut socket).await;
      let response = format!(
        "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
        body.len()
      );
      socket.write_all(response.as_bytes()).await.unwrap();
      let _ = socket.shutdown().await;
      request
    });
    (base, handle)
  }

  async fn read_request(socket: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
      let n = socket.read(&mut chunk).await.unwrap();
      if n == 0 {
        break;
      }
      buf.extend_from_slice(&chunk[..n]);

      let text = String::from_utf8_lossy(&buf).into_owned();
      let Some(end) = text.find("\r\n\r\n") else {
        continue;
      };
      let head = text[..end].to_ascii_lowercase();
      let length = head
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|v| v.trim().parse::<usize>().ok());
      let complete = match length {
        Some(len) => buf.len() >= end + 4 + len,
        None if head.contains("transfer-encoding: chunked") => text.ends_with("0\r\n\r\n"),
        None => true,
      };
      if complete {
        break;
      }
    }
    String::from_utf8_lossy(&buf).into_owned()
  }

  #[tokio::test]
  async fn test_multipart_update_tunnels_verb_through_post() {
    let (base, server) = serve_once("200 OK", r#"{"data": {"id": 8}}"#).await;
    let t = local(&base);

    let mut fields = serde_json::Map::new();
    fields.insert("catatan".into(), json!("daun kuning"));
    let payload = Payload::Multipart {
      fields,
      file: FilePart {
        field: "gambar".into(),
        file_name: "daun.jpg".into(),
        mime_type: Some("image/jpeg".into()),
        bytes: b"jpegdata".to_vec(),
      },
    };

    let body = t.update("pemeriksaan", "8", &payload).await.unwrap();
    assert_eq!(body, json!({"data": {"id": 8}}));

    let request = server.await.unwrap();
    assert!(request.starts_with("POST /api/pemeriksaan/8 HTTP/1.1"), "{request}");
    assert!(request.to_ascii_lowercase().contains("authorization: bearer rahsia"));
    assert!(request.contains("name=\"_method\"\r\n\r\nPUT\r\n"), "{request}");
    assert!(request.contains("name=\"catatan\"\r\n\r\ndaun kuning\r\n"));
    assert!(request.contains("filename=\"daun.jpg\""));
    assert!(request.contains("jpegdata"));
  }

  #[tokio::test]
  async fn test_json_update_keeps_put() {
    let (base, server) = serve_once("200 OK", "").await;
    let t = local(&base);

    let body = t
      .update("pokok", "3", &Payload::Json(json!({"id": 3, "varieti": "D24"})))
      .await
      .unwrap();
    assert_eq!(body, Value::Null);

    let request = server.await.unwrap();
    assert!(request.starts_with("PUT /api/pokok/3 HTTP/1.1"), "{request}");
    assert!(!request.contains(METHOD_OVERRIDE_FIELD));
  }

  #[tokio::test]
  async fn test_error_status_is_application_error() {
    let (base, server) = serve_once(
      "422 Unprocessable Entity",
      r#"{"errors": {"varieti": ["required"]}}"#,
    )
    .await;
    let t = local(&base);

    let err = t
      .create("pokok", &Payload::Json(json!({"varieti": ""})))
      .await
      .unwrap_err();
    match err {
      ApiError::Application { status, body } => {
        assert_eq!(status, 422);
        assert_eq!(body["errors"]["varieti"][0], "required");
      }
      other => panic!("unexpected error: {other:?}"),
    }
    assert!(server.await.unwrap().starts_with("POST /api/pokok HTTP/1.1"));
  }

  #[tokio::test]
  async fn test_refused_connection_is_transport_error() {
    // Bind and release a port so nothing is listening on it
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let t = local(&format!("http://{addr}/api"));
    let err = t.get("/pokok").await.unwrap_err();
    assert!(err.is_transport(), "unexpected error: {err:?}");

    let err = t.delete("pokok", "1").await.unwrap_err();
    assert!(err.is_transport(), "unexpected error: {err:?}");
  }
}
