//! HTTP object-store backend.
//!
//! Addresses one private object per user at
//! `{base_url}/users/{user}/document`, authenticated with the user's bearer
//! credential. The server is expected to behave like any object-folder API:
//! `HEAD`/`GET` on the object, `PUT` to replace it wholesale.
//!
//! Status mapping:
//! - 401/403 → [`RemoteError::Unauthorized`] (fatal to the sync loop)
//! - connection errors, timeouts, 5xx → [`RemoteError::Unavailable`] (retryable)

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::{debug, info, instrument};

use super::{ObjectHandle, RemoteBackend, RemoteCredential};
use crate::codec;
use crate::error::{RemoteError, Result};
use crate::model::UserDocument;

/// Remote backend over a per-user HTTP object store.
///
/// The `Client` is shared across sessions (connection pooling); the
/// credential is per-user.
#[derive(Clone, Debug)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
    credential: RemoteCredential,
}

impl HttpBackend {
    /// Creates a backend for one user's credential.
    ///
    /// `base_url` must not end with a slash; trailing slashes are trimmed.
    pub fn new(client: Client, base_url: impl Into<String>, credential: RemoteCredential) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            client,
            base_url,
            credential,
        }
    }

    /// URL of the user's document object.
    fn object_url(&self, user: &str) -> String {
        format!("{}/users/{}/document", self.base_url, user)
    }

    /// Maps an error status to the engine's remote error taxonomy.
    fn check_status(status: StatusCode) -> std::result::Result<(), RemoteError> {
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(RemoteError::Unauthorized);
        }
        if !status.is_success() {
            return Err(RemoteError::unavailable(format!(
                "remote returned status {status}"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteBackend for HttpBackend {
    /// Probes for the user's object with `HEAD`; a 404 seeds the object
    /// with an empty encoded document so the first download always decodes.
    #[instrument(skip(self))]
    async fn locate_or_create(&self, user: &str) -> Result<ObjectHandle> {
        let url = self.object_url(user);

        let response = self
            .client
            .head(&url)
            .bearer_auth(self.credential.token())
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            info!(user = %user, "Remote document absent; creating empty document");
            let seed = codec::encode(&mut UserDocument::empty())?;
            let response = self
                .client
                .put(&url)
                .bearer_auth(self.credential.token())
                .body(seed)
                .send()
                .await?;
            Self::check_status(response.status())?;
        } else {
            Self::check_status(status)?;
        }

        Ok(ObjectHandle {
            user_id: user.to_string(),
            location: url,
        })
    }

    #[instrument(skip(self), fields(user = %handle.user_id))]
    async fn download(&self, handle: &ObjectHandle) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(&handle.location)
            .bearer_auth(self.credential.token())
            .send()
            .await?;
        Self::check_status(response.status())?;

        let bytes = response.bytes().await?;
        debug!(bytes = bytes.len(), "Downloaded remote document");
        Ok(bytes.to_vec())
    }

    #[instrument(skip(self, bytes), fields(user = %handle.user_id, bytes = bytes.len()))]
    async fn upload(&self, handle: &ObjectHandle, bytes: Vec<u8>) -> Result<()> {
        let response = self
            .client
            .put(&handle.location)
            .bearer_auth(self.credential.token())
            .body(bytes)
            .send()
            .await?;
        Self::check_status(response.status())?;

        debug!("Uploaded remote document");
        Ok(())
    }
}
