use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use meter_auth::{Encryptor, SIGNATURE_HEADER, Signer};
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};

use crate::transport::{DeliveryError, Envelope, Transport, TransportError};

/// Posts JSON payloads to the collector's HTTP endpoints.
///
/// Every body is compressed with gzip, then encrypted if a public key is configured and finally
/// signed if a shared secret is configured, so the signature covers the bytes on the wire.
#[derive(Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
    address: String,
    signer: Option<Signer>,
    encryptor: Option<Encryptor>,
    real_ip: Option<IpAddr>,
}

impl HttpTransport {
    /// Creates a transport for the collector at `address`.
    pub fn new(
        address: impl Into<String>,
        timeout: Duration,
        signer: Option<Signer>,
        encryptor: Option<Encryptor>,
    ) -> Result<Self, reqwest::Error> {
        let address = address.into().trim_end_matches('/').to_owned();
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let real_ip = super::outbound_ip(&address);

        Ok(Self {
            client,
            address,
            signer,
            encryptor,
            real_ip,
        })
    }

    fn url(&self, envelope: &Envelope) -> String {
        let path = match envelope {
            Envelope::Metric(_) => "/update",
            Envelope::Batch(_) => "/updates",
        };
        format!("{}{path}", self.address)
    }

    fn body(&self, envelope: &Envelope) -> Result<Vec<u8>, TransportError> {
        let json = match envelope {
            Envelope::Metric(metric) => serde_json::to_vec(metric)?,
            Envelope::Batch(metrics) => serde_json::to_vec(metrics)?,
        };

        let packed = meter_common::pack(&json).map_err(TransportError::Compress)?;
        match self.encryptor {
            Some(ref encryptor) => Ok(encryptor.encrypt(&packed)?),
            None => Ok(packed),
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn deliver(&self, envelope: &Envelope) -> Result<(), DeliveryError> {
        let body = self.body(envelope).map_err(DeliveryError::Fatal)?;

        let mut request = self
            .client
            .post(self.url(envelope))
            .header(CONTENT_TYPE, "application/json")
            .header(CONTENT_ENCODING, "gzip")
            .header("X-Request-Id", uuid::Uuid::new_v4().to_string());

        if let Some(ref signer) = self.signer {
            request = request.header(SIGNATURE_HEADER, signer.sign(&body));
        }

        if let Some(ip) = self.real_ip {
            request = request.header("X-Real-IP", ip.to_string());
        }

        // Only failures where the collector cannot have seen the request are retried. Any
        // response, including a 5xx, may already have been applied.
        let response = match request.body(body).send().await {
            Ok(response) => response,
            Err(error) if error.is_connect() || error.is_timeout() => {
                return Err(DeliveryError::retriable(error));
            }
            Err(error) => return Err(DeliveryError::fatal(error)),
        };

        let status = response.status();
        if !status.is_success() {
            return Err(DeliveryError::fatal(TransportError::Status(status)));
        }

        meter_log::trace!(metrics = envelope.len(), "envelope delivered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use meter_metrics::{MetricExchange, Record};
    use similar_asserts::assert_eq;

    use super::*;

    fn transport(signer: Option<Signer>) -> HttpTransport {
        HttpTransport::new("http://127.0.0.1:8080/", Duration::from_secs(1), signer, None).unwrap()
    }

    #[test]
    fn test_urls() {
        let transport = transport(None);
        let metric = MetricExchange::from(&Record::counter("PollCount", 1).unwrap());

        assert_eq!(
            transport.url(&Envelope::Metric(metric.clone())),
            "http://127.0.0.1:8080/update"
        );
        assert_eq!(
            transport.url(&Envelope::Batch(vec![metric])),
            "http://127.0.0.1:8080/updates"
        );
    }

    #[test]
    fn test_body_is_gzipped_json() {
        let transport = transport(None);
        let metric = MetricExchange::from(&Record::gauge("Alloc", 1.5).unwrap());

        let body = transport.body(&Envelope::Batch(vec![metric])).unwrap();
        let json = meter_common::unpack(&body).unwrap();
        assert_eq!(
            String::from_utf8(json).unwrap(),
            r#"[{"id":"Alloc","type":"gauge","value":1.5}]"#
        );
    }

    #[tokio::test]
    async fn test_unreachable_is_retriable() {
        // Port 9 (discard) is not expected to accept HTTP connections.
        let transport =
            HttpTransport::new("http://127.0.0.1:9", Duration::from_millis(500), None, None)
                .unwrap();
        let metric = MetricExchange::from(&Record::counter("PollCount", 1).unwrap());

        let error = transport
            .deliver(&Envelope::Metric(metric))
            .await
            .unwrap_err();
        assert!(error.is_retriable());
    }

    async fn serve(status: reqwest::StatusCode) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let app = axum::Router::new().fallback(move || async move { status });
        tokio::spawn(async move { axum::serve(listener, app).await });
        format!("http://{address}")
    }

    async fn deliver_to(address: String) -> Result<(), DeliveryError> {
        let transport = HttpTransport::new(address, Duration::from_secs(1), None, None).unwrap();
        let metric = MetricExchange::from(&Record::counter("PollCount", 1).unwrap());
        transport.deliver(&Envelope::Metric(metric)).await
    }

    #[tokio::test]
    async fn test_server_error_is_fatal() {
        let address = serve(reqwest::StatusCode::INTERNAL_SERVER_ERROR).await;
        let error = deliver_to(address).await.unwrap_err();

        assert!(!error.is_retriable());
        assert!(matches!(
            error,
            DeliveryError::Fatal(TransportError::Status(status))
                if status == reqwest::StatusCode::INTERNAL_SERVER_ERROR
        ));
    }

    #[tokio::test]
    async fn test_unavailable_is_fatal() {
        let address = serve(reqwest::StatusCode::SERVICE_UNAVAILABLE).await;
        let error = deliver_to(address).await.unwrap_err();
        assert!(!error.is_retriable());
    }

    #[tokio::test]
    async fn test_client_error_is_fatal() {
        let address = serve(reqwest::StatusCode::BAD_REQUEST).await;
        let error = deliver_to(address).await.unwrap_err();
        assert!(!error.is_retriable());
    }

    #[tokio::test]
    async fn test_success() {
        let address = serve(reqwest::StatusCode::OK).await;
        deliver_to(address).await.unwrap();
    }
}
