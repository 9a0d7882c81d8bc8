use axum::body::{to_bytes, Body};
use axum::http::header::CONTENT_TYPE;
use axum::http::{Method, Request};
use serde_json::Value;
use crate::error::DispatchError;
use crate::protocol::{PredictRequest, PredictResponse};
use super::downstream::Downstream;

/// Sends one batch downstream and decodes its predictions.
///
/// The concatenated `instances` are POSTed as `{"instances": [...]}` to
/// `path`. A transport failure, a non-success status or a body that is not a
/// predict response all come back as a [`DispatchError`]; alignment of the
/// predictions with the instances is checked by the caller during fan-out.
pub(crate) async fn dispatch<D>(
    downstream: &D,
    path: &str,
    instances: &[Value],
) -> Result<Vec<Value>, DispatchError>
where D: Downstream + ?Sized
{
    let payload = serde_json::to_vec(&PredictRequest { instances: instances.to_vec() })
        .map_err(DispatchError::Encode)?;

    let request = Request::builder()
        .method(Method::POST)
        .uri(path)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(payload))
        .map_err(|e| DispatchError::Transport(e.into()))?;

    let response = downstream.call(request).await.map_err(DispatchError::Transport)?;
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX)
        .await
        .map_err(|e| DispatchError::Transport(e.into()))?;

    if !status.is_success() {
        return Err(DispatchError::Status {
            status,
            body: String::from_utf8_lossy(&body).into_owned(),
        });
    }

    let decoded: PredictResponse = serde_json::from_slice(&body).map_err(DispatchError::Decode)?;
    Ok(decoded.predictions)
}
