use async_trait::async_trait;

use super::MessageStore;
use crate::error::TransportError;
use crate::message::{Envelope, MessageContext};

/// Mailboxes hosted by `grid-server`'s HTTP API
pub struct HttpStore {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpStore {
    pub fn new(base_url: &str, token: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        }
    }

    fn auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.header("Authorization", format!("Bearer {}", self.token))
    }

    /// `base/api/mailbox/<module>/<kind>/<id>`, each segment percent-encoded
    fn mailbox_url(&self, context: &MessageContext) -> Result<reqwest::Url, TransportError> {
        let invalid = || TransportError::InvalidAddress(self.base_url.clone());
        let mut url = reqwest::Url::parse(&self.base_url).map_err(|_| invalid())?;
        url.path_segments_mut().map_err(|_| invalid())?.pop_if_empty().extend([
            "api",
            "mailbox",
            context.module.as_str(),
            context.kind.as_str(),
            context.id.as_str(),
        ]);
        Ok(url)
    }
}

#[async_trait]
impl MessageStore for HttpStore {
    async fn put(&self, envelope: &Envelope) -> Result<(), TransportError> {
        let url = self.mailbox_url(&envelope.context)?;
        let resp = self.auth(self.http.post(url)).json(envelope).send().await?;
        if !resp.status().is_success() {
            return Err(TransportError::Rejected(resp.status().as_u16()));
        }
        Ok(())
    }

    async fn take(
        &self,
        context: &MessageContext,
        remove: bool,
    ) -> Result<Option<Envelope>, TransportError> {
        let url = self.mailbox_url(context)?;
        let resp = self
            .auth(self.http.get(url))
            .query(&[("remove", remove)])
            .send()
            .await?;
        // an empty mailbox is 204; a 404 means a wrong URL and is an error
        if resp.status() == reqwest::StatusCode::NO_CONTENT {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(TransportError::Rejected(resp.status().as_u16()));
        }
        let envelope: Envelope = resp.json().await?;
        Ok(Some(envelope))
    }
}
