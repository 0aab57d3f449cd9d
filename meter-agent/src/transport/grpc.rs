use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use meter_auth::{Encryptor, Signer};
use meter_proto::metrics_client::MetricsClient;
use meter_proto::{
    BatchUpdateEncryptedRequest, BatchUpdateRequest, Metric, REAL_IP_METADATA, SIGNATURE_METADATA,
};
use prost::Message;
use tonic::codec::CompressionEncoding;
use tonic::metadata::MetadataValue;
use tonic::transport::{Channel, Endpoint};
use tonic::{Code, Request, Status};

use crate::transport::{DeliveryError, Envelope, Transport, TransportError};

/// Sends batches through the `meter.v1.Metrics` service.
///
/// With a public key configured the encoded batch is encrypted and sent through
/// `BatchUpdateEncrypted`. The signature always covers the bytes that are sent.
#[derive(Debug)]
pub struct GrpcTransport {
    client: MetricsClient<Channel>,
    signer: Option<Signer>,
    encryptor: Option<Encryptor>,
    real_ip: Option<IpAddr>,
}

impl GrpcTransport {
    /// Creates a transport for the collector at `address`.
    ///
    /// The connection is established lazily on the first call.
    pub fn new(
        address: impl Into<String>,
        timeout: Duration,
        signer: Option<Signer>,
        encryptor: Option<Encryptor>,
    ) -> Result<Self, tonic::transport::Error> {
        let address = address.into();
        let real_ip = super::outbound_ip(&address);

        let channel = Endpoint::from_shared(address)?
            .connect_timeout(timeout)
            .timeout(timeout)
            .connect_lazy();

        let client = MetricsClient::new(channel)
            .send_compressed(CompressionEncoding::Gzip)
            .accept_compressed(CompressionEncoding::Gzip);

        Ok(Self {
            client,
            signer,
            encryptor,
            real_ip,
        })
    }

    fn request<T>(&self, message: T, signed: &[u8]) -> Request<T> {
        let mut request = Request::new(message);
        let metadata = request.metadata_mut();

        if let Some(ref signer) = self.signer {
            if let Ok(value) = MetadataValue::try_from(signer.sign(signed)) {
                metadata.insert(SIGNATURE_METADATA, value);
            }
        }

        if let Some(ip) = self.real_ip {
            if let Ok(value) = MetadataValue::try_from(ip.to_string()) {
                metadata.insert(REAL_IP_METADATA, value);
            }
        }

        request
    }
}

/// Classifies a failed call.
///
/// Only `Unavailable` guarantees the collector did not process the batch. Any other code may
/// follow a partial write.
fn classify(status: Status) -> DeliveryError {
    match status.code() {
        Code::Unavailable => DeliveryError::retriable(status),
        _ => DeliveryError::fatal(status),
    }
}

#[async_trait]
impl Transport for GrpcTransport {
    async fn deliver(&self, envelope: &Envelope) -> Result<(), DeliveryError> {
        let batch = BatchUpdateRequest {
            metrics: envelope.metrics().iter().cloned().map(Metric::from).collect(),
        };

        let mut client = self.client.clone();
        let result = match self.encryptor {
            Some(ref encryptor) => {
                let encrypted_data = encryptor
                    .encrypt(&batch.encode_to_vec())
                    .map_err(|e| DeliveryError::Fatal(TransportError::Encrypt(e)))?;
                let request = self.request(
                    BatchUpdateEncryptedRequest {
                        encrypted_data: encrypted_data.clone(),
                    },
                    &encrypted_data,
                );
                client.batch_update_encrypted(request).await
            }
            None => {
                let encoded = batch.encode_to_vec();
                let request = self.request(batch, &encoded);
                client.batch_update(request).await
            }
        };

        match result {
            Ok(response) => {
                meter_log::trace!(
                    metrics = response.get_ref().metrics.len(),
                    "envelope delivered"
                );
                Ok(())
            }
            Err(status) => Err(classify(status)),
        }
    }
}
