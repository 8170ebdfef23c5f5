//! Authorization broker contract.

use std::sync::RwLock;

use async_trait::async_trait;
use tracing::info;

use dropsync_core::SyncError;

use crate::context::AuthorizationContext;

/// Obtains and holds the tokens a change feed authenticates with.
#[async_trait]
pub trait AuthorizationBroker: Send + Sync {
    /// Current access token, if authenticated.
    fn access_token(&self) -> Option<String>;

    /// Current refresh token, if the provider issued one.
    fn refresh_token(&self) -> Option<String>;

    /// Run the authorization flow to completion.
    ///
    /// Implementations direct the user to the provider, then wait on `context`
    /// for the redirect and exchange the code for tokens.
    async fn authenticate(&self, context: AuthorizationContext) -> Result<(), SyncError>;
}

/// Broker for tokens issued out of band, such as a long-lived app token.
///
/// [`authenticate`](AuthorizationBroker::authenticate) succeeds immediately
/// when an access token is present and never waits for a redirect.
#[derive(Debug, Default)]
pub struct StaticTokenBroker {
    tokens: RwLock<(Option<String>, Option<String>)>,
}

impl StaticTokenBroker {
    /// Create a broker holding `access_token`.
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            tokens: RwLock::new((Some(access_token.into()), None)),
        }
    }

    /// Also hold a refresh token.
    pub fn with_refresh_token(self, refresh_token: impl Into<String>) -> Self {
        let (access, _) = self
            .tokens
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Self {
            tokens: RwLock::new((access, Some(refresh_token.into()))),
        }
    }

    /// Replace the held tokens, e.g. after an external refresh.
    pub fn set_tokens(&self, access_token: impl Into<String>, refresh_token: Option<String>) {
        let mut tokens = self
            .tokens
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *tokens = (Some(access_token.into()), refresh_token);
    }

    fn read(&self) -> (Option<String>, Option<String>) {
        self.tokens
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl AuthorizationBroker for StaticTokenBroker {
    fn access_token(&self) -> Option<String> {
        self.read().0
    }

    fn refresh_token(&self) -> Option<String> {
        self.read().1
    }

    async fn authenticate(&self, context: AuthorizationContext) -> Result<(), SyncError> {
        if self.access_token().is_none() {
            return Err(SyncError::Authorization {
                message: format!(
                    "no access token configured; interactive login via {} is not supported",
                    context.redirect_uri()
                ),
            });
        }
        info!("using pre-issued access token");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    /// Broker that completes its own redirect, standing in for a provider.
    #[derive(Default)]
    struct LoopbackBroker {
        token: RwLock<Option<String>>,
    }

    #[async_trait]
    impl AuthorizationBroker for LoopbackBroker {
        fn access_token(&self) -> Option<String> {
            self.token.read().unwrap().clone()
        }

        fn refresh_token(&self) -> Option<String> {
            None
        }

        async fn authenticate(&self, context: AuthorizationContext) -> Result<(), SyncError> {
            let callback = context.callback();
            tokio::spawn(async move {
                callback.complete_from_query([("code", "granted")]);
            });
            let code = context.wait(Duration::from_secs(5)).await?;
            *self.token.write().unwrap() = Some(format!("token-for-{code}"));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_static_broker_authenticates_immediately() {
        let broker = StaticTokenBroker::new("sl.abc").with_refresh_token("r.def");

        broker
            .authenticate(AuthorizationContext::new("http://localhost:8000/"))
            .await
            .unwrap();

        assert_eq!(broker.access_token().as_deref(), Some("sl.abc"));
        assert_eq!(broker.refresh_token().as_deref(), Some("r.def"));
    }

    #[tokio::test]
    async fn test_empty_static_broker_fails() {
        let broker = StaticTokenBroker::default();

        let err = broker
            .authenticate(AuthorizationContext::new("http://localhost:8000/"))
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::Authorization { .. }));
    }

    #[test]
    fn test_set_tokens_replaces_both() {
        let broker = StaticTokenBroker::new("old").with_refresh_token("old-refresh");

        broker.set_tokens("new", None);

        assert_eq!(broker.access_token().as_deref(), Some("new"));
        assert_eq!(broker.refresh_token(), None);
    }

    #[tokio::test]
    async fn test_redirect_flow_through_trait_object() {
        let broker: Arc<dyn AuthorizationBroker> = Arc::new(LoopbackBroker::default());
        assert!(broker.access_token().is_none());

        broker
            .authenticate(AuthorizationContext::new("http://localhost:8000/oauth2/callback"))
            .await
            .unwrap();

        assert_eq!(broker.access_token().as_deref(), Some("token-for-granted"));
    }
}
