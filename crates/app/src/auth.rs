use std::fmt;

use serde::Serialize;
use serde_json::Value;
use tracing::debug;
use ureq::Agent;

use crate::error::{ApiError, Method};

/// Bearer token issued by `/auth/token`.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Credential").field(&"<redacted>").finish()
    }
}

#[derive(Serialize)]
struct TokenRequest<'a> {
    username: &'a str,
    password: &'a str,
}

/// Exchange operator credentials for a bearer token. One POST, no retry.
pub fn obtain_credential(
    agent: &Agent,
    base_url: &str,
    username: &str,
    password: &str,
) -> Result<Credential, ApiError> {
    let url = format!("{}/auth/token", base_url.trim_end_matches('/'));
    let mut response = agent
        .post(&url)
        .send_json(TokenRequest { username, password })
        .map_err(|err| ApiError::Transport {
            method: Method::Post,
            url: url.clone(),
            source: Box::new(err),
        })?;
    let status = response.status().as_u16();
    let raw = response
        .body_mut()
        .read_to_string()
        .map_err(|err| ApiError::Transport {
            method: Method::Post,
            url: url.clone(),
            source: Box::new(err),
        })?;

    let fail = |detail: String| ApiError::Authentication {
        url: url.clone(),
        status,
        detail,
    };

    let body: Value =
        serde_json::from_str(&raw).map_err(|err| fail(format!("response is not JSON ({err})")))?;
    match body.get("access_token") {
        Some(Value::String(token)) if !token.is_empty() => {
            debug!(%url, status, "obtained access token");
            Ok(Credential(token.clone()))
        }
        Some(Value::String(_)) => Err(fail("access_token is empty".into())),
        Some(other) => Err(fail(format!("access_token is not a string: {other}"))),
        None => Err(fail(format!("response has no access_token: {raw}"))),
    }
}
