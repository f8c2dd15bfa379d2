//! Shared handler helpers.

use crate::error::{ApiError, ApiResult};
use crate::metrics::record_upload_error;
use crate::state::AppState;
use axum::extract::{FromRequest, Multipart, Request};
use axum::http::header::CONTENT_TYPE;

/// Fields of a submitted HTML form, in submission order.
///
/// Repeated fields such as `chunkHashes[]` keep every value.
#[derive(Debug, Default, Clone)]
pub struct FormFields {
    fields: Vec<(String, String)>,
}

impl FormFields {
    /// Decode an `application/x-www-form-urlencoded` body.
    pub fn from_urlencoded(body: &[u8]) -> Self {
        Self {
            fields: url::form_urlencoded::parse(body).into_owned().collect(),
        }
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.push((name.into(), value.into()));
    }

    /// First value of `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// First value of `name`, or a bad request naming the missing field.
    pub fn require(&self, name: &str) -> ApiResult<&str> {
        match self.get(name) {
            Some(value) if !value.is_empty() => Ok(value),
            _ => Err(ApiError::BadRequest(format!("{name} is required"))),
        }
    }

    /// Every value of `name`, in submission order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.fields
            .iter()
            .filter(move |(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Read a form body, urlencoded or multipart, bounded by `server.max_form_size`.
pub async fn read_form(state: &AppState, req: Request) -> ApiResult<FormFields> {
    let limit = state.config.server.max_form_size;
    let is_multipart = req
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("multipart/form-data"));

    if !is_multipart {
        let bytes = axum::body::to_bytes(req.into_body(), limit)
            .await
            .map_err(|e| ApiError::BadRequest(format!("failed to read body: {e}")))?;
        return Ok(FormFields::from_urlencoded(&bytes));
    }

    let mut multipart = Multipart::from_request(req, state)
        .await
        .map_err(|e| ApiError::BadRequest(format!("invalid multipart body: {e}")))?;

    let mut form = FormFields::default();
    let mut total = 0usize;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("invalid multipart field: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        let value = field
            .text()
            .await
            .map_err(|e| ApiError::BadRequest(format!("invalid value for {name}: {e}")))?;
        total += name.len() + value.len();
        if total > limit {
            return Err(ApiError::BadRequest(format!(
                "form exceeds maximum size of {limit} bytes"
            )));
        }
        form.push(name, value);
    }
    Ok(form)
}

/// Count a failed request in the error metrics before handing it back.
pub(crate) fn observe<T>(result: ApiResult<T>) -> ApiResult<T> {
    if let Err(e) = &result {
        record_upload_error(e.metric_label());
    }
    result
}
