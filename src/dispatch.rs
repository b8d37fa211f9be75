//! Job trigger shims.
//!
//! Reach traces are started either by an HTTP request carrying the reach id
//! as a query parameter or by a queue message holding a feature record. Both
//! reduce to extracting a reach id; the hosting runtime does the rest.

use crate::model::{ReachError, Result};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;

pub const UNPROCESSABLE_ENTITY: u16 = 422;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorDetail {
    pub title: String,
    pub description: String,
}

/// JSON body returned with a rejected request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorPayload {
    pub errors: Vec<ErrorDetail>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    pub status: u16,
    pub payload: ErrorPayload,
}

impl Rejection {
    pub fn body(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.payload)?)
    }
}

/// Reads `reachid`, or failing that `reach_id`, from request query parameters.
pub fn reach_id_from_query(params: &HashMap<String, String>) -> std::result::Result<String, Rejection> {
    ["reachid", "reach_id"]
        .iter()
        .filter_map(|key| params.get(*key))
        .map(|value| value.trim())
        .find(|value| !value.is_empty())
        .map(String::from)
        .ok_or_else(|| Rejection {
            status: UNPROCESSABLE_ENTITY,
            payload: ErrorPayload {
                errors: vec![ErrorDetail {
                    title: "missing reachid query parameter".to_string(),
                    description: "A reach id must be provided as a query parameter in the request, \
                                  for example ?reachid=3306"
                        .to_string(),
                }],
            },
        })
}

/// Reads `attributes.reach_id` from a queued feature, as a string or number.
pub fn reach_id_from_queue_message(body: &str) -> Result<String> {
    let message: Value = serde_json::from_str(body)?;
    match message.pointer("/attributes/reach_id") {
        Some(Value::String(id)) if !id.trim().is_empty() => Ok(id.trim().to_string()),
        Some(Value::Number(id)) => Ok(id.to_string()),
        _ => Err(ReachError::Parse(
            "queue message has no attributes.reach_id".to_string(),
        )),
    }
}
