//! [`ReqwestTransport`]: the production [`HttpTransport`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method};
use tether_core::http::{HttpRequest, HttpResponse, HttpTransport, TransportError};

#[derive(Clone)]
pub struct ReqwestTransport {
  client: Client,
}

impl ReqwestTransport {
  pub fn new(timeout: Duration) -> Result<Self, TransportError> {
    let client = Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| TransportError::Other(Box::new(e)))?;
    Ok(Self { client })
  }
}

fn transport_error(err: reqwest::Error) -> TransportError {
  if err.is_timeout() {
    TransportError::Timeout
  } else {
    TransportError::Other(Box::new(err))
  }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
  async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
    let method = Method::from_bytes(request.method.as_bytes())
      .map_err(|e| TransportError::Other(Box::new(e)))?;

    let mut builder = self.client.request(method, &request.url);
    for (name, value) in &request.headers {
      builder = builder.header(name, value);
    }
    if let Some(body) = request.body {
      builder = builder.body(body);
    }

    let resp = builder.send().await.map_err(transport_error)?;
    let status = resp.status().as_u16();
    let headers = resp
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_owned(), v.to_owned()))
      })
      .collect();
    let body = resp.text().await.map_err(transport_error)?;

    tracing::debug!(component = "transport", status, url = %request.url, "provider call settled");
    Ok(HttpResponse { status, headers, body })
  }
}
