//! gRPC services of the collector.

use std::net::IpAddr;

use ipnetwork::IpNetwork;
use meter_proto::health_server::{Health as HealthRpc, HealthServer};
use meter_proto::metrics_server::{Metrics, MetricsServer};
use meter_proto::{
    BatchUpdateEncryptedRequest, BatchUpdateRequest, BatchUpdateResponse, Metric, PingRequest,
    PingResponse, REAL_IP_METADATA, SIGNATURE_METADATA,
};
use prost::Message;
use tonic::codec::CompressionEncoding;
use tonic::metadata::MetadataMap;
use tonic::service::Interceptor;
use tonic::service::interceptor::InterceptedService;
use tonic::{Request, Response, Status};

use crate::ingest::IngestError;
use crate::service::ServiceState;
use crate::services::{Health, check_health};

fn signature(metadata: &MetadataMap) -> Option<String> {
    metadata
        .get(SIGNATURE_METADATA)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.trim().is_empty())
        .map(str::to_owned)
}

/// Implementation of `meter.v1.Metrics`.
#[derive(Clone, Debug)]
pub struct MetricsService {
    state: ServiceState,
}

impl MetricsService {
    /// Creates the service on the shared state.
    pub fn new(state: ServiceState) -> Self {
        Self { state }
    }

    async fn aggregate(
        &self,
        request: BatchUpdateRequest,
    ) -> Result<BatchUpdateResponse, IngestError> {
        if request.metrics.is_empty() {
            return Err(IngestError::EmptyBatch);
        }

        let records = request.into_records()?;
        let stored = self.state.aggregator().push_list(records).await?;
        meter_log::debug!(metrics = stored.len(), "batch ingested");

        Ok(BatchUpdateResponse {
            metrics: stored.iter().map(Metric::from).collect(),
        })
    }
}

#[tonic::async_trait]
impl Metrics for MetricsService {
    async fn batch_update(
        &self,
        request: Request<BatchUpdateRequest>,
    ) -> Result<Response<BatchUpdateResponse>, Status> {
        let ingest = self.state.ingest();
        if ingest.is_encrypted() {
            return Err(IngestError::PlaintextRejected.into());
        }

        let signature = signature(request.metadata());
        let request = request.into_inner();
        if signature.is_some() {
            ingest.verify(&request.encode_to_vec(), signature.as_deref())?;
        }

        Ok(Response::new(self.aggregate(request).await?))
    }

    async fn batch_update_encrypted(
        &self,
        request: Request<BatchUpdateEncryptedRequest>,
    ) -> Result<Response<BatchUpdateResponse>, Status> {
        let ingest = self.state.ingest();

        let signature = signature(request.metadata());
        let request = request.into_inner();
        ingest.verify(&request.encrypted_data, signature.as_deref())?;

        let data = ingest.decrypt_required(&request.encrypted_data)?;
        let request = BatchUpdateRequest::decode(data.as_slice()).map_err(IngestError::from)?;

        Ok(Response::new(self.aggregate(request).await?))
    }
}

/// Implementation of `meter.v1.Health`.
#[derive(Clone, Debug)]
pub struct HealthService {
    state: ServiceState,
}

impl HealthService {
    /// Creates the service on the shared state.
    pub fn new(state: ServiceState) -> Self {
        Self { state }
    }
}

#[tonic::async_trait]
impl HealthRpc for HealthService {
    async fn ping(&self, _request: Request<PingRequest>) -> Result<Response<PingResponse>, Status> {
        match check_health(self.state.storage()).await {
            Health::Healthy => Ok(Response::new(PingResponse {})),
            Health::Unsupported => Err(Status::unimplemented("storage does not support ping")),
            Health::Unhealthy => Err(Status::internal("storage is unreachable")),
        }
    }
}

/// Rejects calls from clients outside of the trusted subnet.
///
/// The client address is taken from the `x-real-ip` metadata, falling back to the peer address
/// of the connection.
#[derive(Clone, Copy, Debug)]
pub struct SubnetInterceptor {
    subnet: Option<IpNetwork>,
}

impl SubnetInterceptor {
    /// Creates an interceptor. Without a subnet every call is allowed.
    pub fn new(subnet: Option<IpNetwork>) -> Self {
        Self { subnet }
    }
}

impl Interceptor for SubnetInterceptor {
    fn call(&mut self, request: Request<()>) -> Result<Request<()>, Status> {
        let Some(subnet) = self.subnet else {
            return Ok(request);
        };

        let client = request
            .metadata()
            .get(REAL_IP_METADATA)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<IpAddr>().ok())
            .or_else(|| request.remote_addr().map(|addr| addr.ip()));

        match client {
            Some(ip) if subnet.contains(ip) => Ok(request),
            _ => Err(Status::permission_denied("client address is not trusted")),
        }
    }
}

/// The metrics service with compression and the subnet check applied.
pub type MetricsGrpc = InterceptedService<MetricsServer<MetricsService>, SubnetInterceptor>;

/// The health service with compression and the subnet check applied.
pub type HealthGrpc = InterceptedService<HealthServer<HealthService>, SubnetInterceptor>;

/// Builds both gRPC services for the shared state.
pub fn grpc_services(state: ServiceState) -> (MetricsGrpc, HealthGrpc) {
    let interceptor = SubnetInterceptor::new(state.config().trusted_subnet());

    let metrics = MetricsServer::new(MetricsService::new(state.clone()))
        .accept_compressed(CompressionEncoding::Gzip)
        .send_compressed(CompressionEncoding::Gzip);

    let health = HealthServer::new(HealthService::new(state))
        .accept_compressed(CompressionEncoding::Gzip)
        .send_compressed(CompressionEncoding::Gzip);

    (
        InterceptedService::new(metrics, interceptor),
        InterceptedService::new(health, interceptor),
    )
}
