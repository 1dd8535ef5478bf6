use std::sync::{Arc, Mutex};

use reqwest::header;
use serde_json::{json, Value};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, error, warn};

use crate::logger::MessageLogger;
use crate::protocol::{APP_VERSION, json_f64};
use crate::{Error, Result};

/// Owns the login cookie and the last login payload. Shared by every
/// device; re-login is serialized through the internal mutex so
/// concurrent 401 observers collapse into one in-flight attempt.
#[derive(Debug)]
pub struct SessionManager {
    http: reqwest::Client,
    base_url: String,
    email: String,
    password: String,
    state: AsyncMutex<SessionState>,
}

#[derive(Debug, Default)]
struct SessionState {
    cookie: Option<String>,
    login_body: Option<Value>,
}

impl SessionManager {
    pub(crate) fn new(
        http: reqwest::Client,
        base_url: String,
        email: String,
        password: String,
    ) -> Self {
        Self {
            http,
            base_url,
            email,
            password,
            state: AsyncMutex::new(SessionState::default()),
        }
    }

    /// Authenticate and store a fresh cookie. Any failure clears the
    /// previous cookie; there is no retry at this layer.
    pub async fn login(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        self.login_locked(&mut state).await
    }

    /// Re-login after a 401, skipping the network call if another task
    /// already replaced the cookie the caller observed.
    pub(crate) async fn refresh_login(&self, observed_cookie: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        // A cleared cookie means the last login failed, not that one
        // already ran; only a *different* cookie counts as refreshed.
        if let Some(current) = state.cookie.as_deref()
            && current != observed_cookie
        {
            debug!("cookie already refreshed by a concurrent login, skipping");
            return Ok(());
        }
        self.login_locked(&mut state).await
    }

    async fn login_locked(&self, state: &mut SessionState) -> Result<()> {
        state.cookie = None;
        state.login_body = None;

        let url = format!("{}/login.aspx", self.base_url);
        debug!(url = %url, "logging in to MELView");
        let resp = self
            .http
            .post(&url)
            .json(&json!({
                "user": self.email,
                "pass": self.password,
                "appversion": APP_VERSION,
            }))
            .send()
            .await?;

        let status = resp.status().as_u16();
        if status != 200 {
            error!(status, "login rejected");
            return Err(Error::AuthFailed(format!("login returned status {status}")));
        }

        let cookie = extract_auth_cookie(resp.headers());
        state.login_body = resp.json().await.ok();

        match cookie {
            Some(value) => {
                debug!("login succeeded");
                state.cookie = Some(value);
                Ok(())
            }
            None => {
                error!("login response missing auth cookie");
                Err(Error::AuthFailed("missing auth cookie in login response".into()))
            }
        }
    }

    pub async fn is_logged_in(&self) -> bool {
        self.state.lock().await.cookie.is_some()
    }

    /// Cookie for authenticated calls; fails fast if no login succeeded.
    pub(crate) async fn cookie(&self) -> Result<String> {
        self.state
            .lock()
            .await
            .cookie
            .clone()
            .ok_or(Error::NotAuthenticated)
    }

    /// Device count from the last login payload; `None` if never logged
    /// in or the field is absent/malformed.
    pub async fn unit_count(&self) -> Option<u64> {
        let state = self.state.lock().await;
        let count = json_f64(state.login_body.as_ref()?.get("userunits"))?;
        if count.fract() == 0.0 && count >= 0.0 {
            Some(count as u64)
        } else {
            None
        }
    }
}

fn extract_auth_cookie(headers: &header::HeaderMap) -> Option<String> {
    for value in headers.get_all(header::SET_COOKIE) {
        let Ok(raw) = value.to_str() else { continue };
        if let Some(rest) = raw.strip_prefix("auth=") {
            let cookie = rest.split(';').next().unwrap_or("").trim();
            if !cookie.is_empty() {
                return Some(cookie.to_string());
            }
        }
    }
    None
}

/// Shared HTTP plumbing for all authenticated cloud calls. A single
/// 401 triggers one re-login and one retry; a second 401 is terminal.
#[derive(Clone, Debug)]
pub(crate) struct Transport {
    pub(crate) http: reqwest::Client,
    pub(crate) base_url: String,
    pub(crate) session: Arc<SessionManager>,
    pub(crate) logger: Option<Arc<Mutex<MessageLogger>>>,
}

impl Transport {
    pub(crate) async fn post_authenticated(&self, path: &str, body: &Value) -> Result<Value> {
        for attempt in 0..2 {
            let cookie = self.session.cookie().await?;

            if let Some(ref logger) = self.logger
                && let Ok(mut logger) = logger.lock()
            {
                logger.log_request(path, body);
            }

            let resp = self
                .http
                .post(format!("{}{}", self.base_url, path))
                .header(header::COOKIE, format!("auth={cookie}"))
                .json(body)
                .send()
                .await?;

            let status = resp.status().as_u16();
            match status {
                200 => {
                    let data: Value = resp.json().await?;
                    if let Some(ref logger) = self.logger
                        && let Ok(mut logger) = logger.lock()
                    {
                        logger.log_response(path, status, &data);
                    }
                    return Ok(data);
                }
                401 if attempt == 0 => {
                    warn!(path, "authenticated call returned 401, re-logging in");
                    self.session.refresh_login(&cookie).await?;
                }
                401 => {
                    error!(path, "401 persisted after re-login");
                    return Err(Error::AuthFailed(
                        "request rejected again after re-login".into(),
                    ));
                }
                other => {
                    error!(path, status = other, "unexpected status");
                    return Err(Error::UnexpectedStatus(other));
                }
            }
        }
        unreachable!("authenticated call loops at most twice")
    }
}
