//! One-shot completion of a redirect-based authorization attempt.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, warn};

use dropsync_core::SyncError;

/// Query parameters that carry the authorization code, in order of preference.
///
/// OAuth 2 providers send `code`; OAuth 1 providers send `oauth_token`.
const CODE_PARAMS: [&str; 2] = ["code", "oauth_token"];

type SharedSender = Arc<Mutex<Option<oneshot::Sender<String>>>>;

/// The waiting half of one authorization attempt.
#[derive(Debug)]
pub struct AuthorizationContext {
    redirect_uri: String,
    receiver: oneshot::Receiver<String>,
    callback: RedirectCallback,
}

impl AuthorizationContext {
    /// Start an attempt whose provider will redirect to `redirect_uri`.
    pub fn new(redirect_uri: impl Into<String>) -> Self {
        let (sender, receiver) = oneshot::channel();
        Self {
            redirect_uri: redirect_uri.into(),
            receiver,
            callback: RedirectCallback {
                sender: Arc::new(Mutex::new(Some(sender))),
            },
        }
    }

    /// Where the provider should send the user back to.
    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    /// A callback that completes this attempt.
    pub fn callback(&self) -> RedirectCallback {
        self.callback.clone()
    }

    /// Wait for the redirect to deliver an authorization code.
    ///
    /// Fails when `timeout` elapses first, or when every callback was dropped
    /// without completing the attempt.
    pub async fn wait(self, timeout: Duration) -> Result<String, SyncError> {
        let Self {
            receiver, callback, ..
        } = self;
        // Only external clones may complete the attempt from here on
        drop(callback);

        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(code)) => {
                debug!("authorization code received");
                Ok(code)
            }
            Ok(Err(_)) => Err(SyncError::Authorization {
                message: "redirect callback dropped before completion".into(),
            }),
            Err(_) => {
                warn!(?timeout, "timed out waiting for authorization redirect");
                Err(SyncError::Authorization {
                    message: format!("no redirect received within {timeout:?}"),
                })
            }
        }
    }
}

/// Completes an [`AuthorizationContext`]. Cheap to clone.
///
/// Only the first completion across all clones is delivered.
#[derive(Debug, Clone)]
pub struct RedirectCallback {
    sender: SharedSender,
}

impl RedirectCallback {
    /// Deliver `code`. Returns `false` if the attempt was already completed
    /// or nobody is waiting any more.
    pub fn complete(&self, code: impl Into<String>) -> bool {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();

        match sender {
            Some(sender) => sender.send(code.into()).is_ok(),
            None => {
                debug!("ignoring repeated authorization redirect");
                false
            }
        }
    }

    /// Deliver the code found in redirect query parameters.
    ///
    /// Returns `false` without completing when no code parameter is present.
    pub fn complete_from_query<K, V>(&self, params: impl IntoIterator<Item = (K, V)>) -> bool
    where
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut found: Option<(usize, String)> = None;
        for (key, value) in params {
            let Some(rank) = CODE_PARAMS.iter().position(|p| *p == key.as_ref()) else {
                continue;
            };
            if found.as_ref().is_none_or(|(best, _)| rank < *best) {
                found = Some((rank, value.into()));
            }
        }

        match found {
            Some((_, code)) if !code.is_empty() => self.complete(code),
            _ => {
                warn!("authorization redirect carried no code");
                false
            }
        }
    }

    /// Whether the attempt has already been completed.
    pub fn is_completed(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_none()
    }
}
