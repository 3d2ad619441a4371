//! HTTP implementation of the remote client

use super::{RemoteClient, RemoteEntity, RemoteError};
use crate::domain::Collection;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// Remote client over reqwest.
pub struct HttpRemoteClient {
	client: reqwest::Client,
	base_url: String,
	auth_token: Option<String>,
}

impl HttpRemoteClient {
	/// `timeout` bounds every individual call; there is no whole-drain
	/// timeout anywhere above this.
	pub fn new(
		base_url: impl Into<String>,
		timeout: Duration,
		auth_token: Option<String>,
	) -> Result<Self, RemoteError> {
		let client = reqwest::Client::builder()
			.timeout(timeout)
			.build()
			.map_err(|e| RemoteError::Network(e.to_string()))?;
		Ok(Self {
			client,
			base_url: base_url.into().trim_end_matches('/').to_string(),
			auth_token,
		})
	}

	fn url(&self, path: &str) -> String {
		format!("{}/{}", self.base_url, path.trim_start_matches('/'))
	}

	fn apply_auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
		match &self.auth_token {
			Some(token) => req.header("authorization", format!("Bearer {token}")),
			None => req,
		}
	}

	async fn send(&self, req: reqwest::RequestBuilder) -> Result<reqwest::Response, RemoteError> {
		self.apply_auth(req)
			.send()
			.await
			.map_err(|e| RemoteError::Network(e.to_string()))
	}

	/// Map a non-2xx response into the engine's error taxonomy.
	async fn classify_failure(response: reqwest::Response) -> RemoteError {
		let status = response.status().as_u16();
		if status == 409 {
			// The conflict body is the server's current version
			match response.json::<RemoteEntity>().await {
				Ok(current) => return RemoteError::Conflict { current },
				Err(e) => {
					return RemoteError::UnexpectedResponse(format!(
						"409 with unreadable body: {e}"
					))
				}
			}
		}
		let message = response.text().await.unwrap_or_default();
		if (400..500).contains(&status) {
			RemoteError::Validation { status, message }
		} else {
			// 5xx and everything else: the server is in trouble, treat it
			// like an unreachable remote so the write gets queued and retried
			RemoteError::Network(format!("server returned {status}: {message}"))
		}
	}

	async fn parse<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, RemoteError> {
		response
			.json::<T>()
			.await
			.map_err(|e| RemoteError::UnexpectedResponse(e.to_string()))
	}
}

#[async_trait]
impl RemoteClient for HttpRemoteClient {
	async fn create(
		&self,
		collection: Collection,
		payload: &serde_json::Value,
		idempotency_key: Uuid,
	) -> Result<RemoteEntity, RemoteError> {
		debug!(%collection, %idempotency_key, "POST create");
		let response = self
			.send(
				self.client
					.post(self.url(collection.as_str()))
					.header(IDEMPOTENCY_HEADER, idempotency_key.to_string())
					.json(payload),
			)
			.await?;

		if !response.status().is_success() {
			return Err(Self::classify_failure(response).await);
		}
		Self::parse(response).await
	}

	async fn update(
		&self,
		collection: Collection,
		id: &str,
		patch: &serde_json::Value,
		idempotency_key: Uuid,
		force: bool,
	) -> Result<RemoteEntity, RemoteError> {
		debug!(%collection, id, force, "PATCH update");
		let mut url = self.url(&format!("{}/{id}", collection.as_str()));
		if force {
			url.push_str("?force=true");
		}
		let response = self
			.send(
				self.client
					.patch(url)
					.header(IDEMPOTENCY_HEADER, idempotency_key.to_string())
					.json(patch),
			)
			.await?;

		if !response.status().is_success() {
			return Err(Self::classify_failure(response).await);
		}
		Self::parse(response).await
	}

	async fn delete(
		&self,
		collection: Collection,
		id: &str,
		idempotency_key: Uuid,
	) -> Result<(), RemoteError> {
		debug!(%collection, id, "DELETE");
		let response = self
			.send(
				self.client
					.delete(self.url(&format!("{}/{id}", collection.as_str())))
					.header(IDEMPOTENCY_HEADER, idempotency_key.to_string()),
			)
			.await?;

		// 404 counts as success: the entity is gone either way
		if response.status().is_success() || response.status().as_u16() == 404 {
			return Ok(());
		}
		Err(Self::classify_failure(response).await)
	}

	async fn fetch_all(&self, collection: Collection) -> Result<Vec<RemoteEntity>, RemoteError> {
		let response = self.send(self.client.get(self.url(collection.as_str()))).await?;
		if !response.status().is_success() {
			return Err(Self::classify_failure(response).await);
		}
		Self::parse(response).await
	}

	async fn fetch_one(
		&self,
		collection: Collection,
		id: &str,
	) -> Result<RemoteEntity, RemoteError> {
		let response = self
			.send(
				self.client
					.get(self.url(&format!("{}/{id}", collection.as_str()))),
			)
			.await?;
		if !response.status().is_success() {
			return Err(Self::classify_failure(response).await);
		}
		Self::parse(response).await
	}

	async fn fetch_raw(&self, path: &str) -> Result<serde_json::Value, RemoteError> {
		let response = self.send(self.client.get(self.url(path))).await?;
		if !response.status().is_success() {
			return Err(Self::classify_failure(response).await);
		}
		Self::parse(response).await
	}
}
