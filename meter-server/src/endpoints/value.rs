//! Endpoints reading metrics.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use bytes::Bytes;
use meter_metrics::{MetricExchange, MetricType, validate_name};

use crate::ingest::IngestError;
use crate::service::ServiceState;

/// `GET /value/{kind}/{name}`, returns the stored value as text.
pub async fn handle_plain(
    State(state): State<ServiceState>,
    Path((kind, name)): Path<(String, String)>,
) -> Result<String, IngestError> {
    let kind: MetricType = kind.parse()?;
    validate_name(&name)?;

    let record = state.aggregator().get(kind, &name).await?;
    Ok(record.value().to_string())
}

/// `POST /value`, looks up the metric named by `{"id", "type"}` and returns it as JSON.
pub async fn handle_json(
    State(state): State<ServiceState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<MetricExchange>, IngestError> {
    let data = state.ingest().unwrap_query(&headers, body)?;
    let query: MetricExchange = serde_json::from_slice(&data)?;
    let kind = query.validate_key()?;

    let record = state.aggregator().get(kind, &query.id).await?;
    Ok(Json(MetricExchange::from(&record)))
}
