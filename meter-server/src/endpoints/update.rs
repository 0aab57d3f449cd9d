//! Endpoints storing metrics.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use bytes::Bytes;
use meter_metrics::{MetricExchange, Record};

use crate::ingest::{self, IngestError};
use crate::service::ServiceState;

/// `POST /update/{kind}/{name}/{value}`, echoes the stored value as text.
pub async fn handle_plain(
    State(state): State<ServiceState>,
    Path((kind, name, value)): Path<(String, String, String)>,
) -> Result<String, IngestError> {
    let record = Record::parse(&kind, &name, &value)?;
    let stored = state.aggregator().push(record).await?;
    Ok(stored.value().to_string())
}

/// `POST /update`, echoes the stored metric as JSON.
pub async fn handle_json(
    State(state): State<ServiceState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<MetricExchange>, IngestError> {
    let data = state.ingest().unwrap_body(&headers, body)?;
    let record = ingest::parse_record(&data)?;

    let stored = state.aggregator().push(record).await?;
    Ok(Json(MetricExchange::from(&stored)))
}

/// `POST /updates`, echoes the stored metrics as a JSON array.
pub async fn handle_batch(
    State(state): State<ServiceState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Vec<MetricExchange>>, IngestError> {
    let data = state.ingest().unwrap_body(&headers, body)?;
    let records = ingest::parse_records(&data)?;

    let stored = state.aggregator().push_list(records).await?;
    meter_log::debug!(metrics = stored.len(), "batch ingested");

    Ok(Json(stored.iter().map(MetricExchange::from).collect()))
}
