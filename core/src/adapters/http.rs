//! Homeserver HTTP calls used around the rendezvous
//!
//! Only the two requests the linking flow needs: the token login performed by the new
//! device and the one-time token request performed by the existing device.

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::service::rendezvous::{
	LinkingError, LoginClient, LoginRequest, LoginToken, LoginTokenIssuer, Result,
	SessionCredentials,
};

const LOGIN_PATH: &str = "/_matrix/client/v3/login";
const GET_TOKEN_PATH: &str = "/_matrix/client/v1/login/get_token";

fn endpoint(homeserver: &str, path: &str) -> String {
	format!("{}{}", homeserver.trim_end_matches('/'), path)
}

fn login_body(
	device_id: Option<&str>,
	request: &LoginRequest,
	display_name: Option<&str>,
) -> Value {
	let mut body = match request {
		LoginRequest::Token(token) => json!({
			"type": request.method(),
			"token": token.expose(),
		}),
	};
	if let Some(device_id) = device_id {
		body["device_id"] = json!(device_id);
	}
	if let Some(display_name) = display_name {
		body["initial_device_display_name"] = json!(display_name);
	}
	body
}

fn status_error(
	status: StatusCode,
	body: &str,
	kind: fn(String) -> LinkingError,
) -> LinkingError {
	kind(format!("Homeserver returned {}: {}", status, body))
}

/// Map a non-success response to `kind`, keeping the homeserver's error body
async fn error_for_status(
	response: Response,
	kind: fn(String) -> LinkingError,
) -> Result<Response> {
	let status = response.status();
	if status.is_success() {
		return Ok(response);
	}
	let body = response.text().await.unwrap_or_default();
	Err(status_error(status, &body, kind))
}

#[derive(Deserialize)]
struct LoginResponse {
	user_id: String,
	device_id: String,
	access_token: String,
}

/// Performs `m.login.token` logins
pub struct HttpLoginClient {
	client: Client,
	display_name: Option<String>,
}

impl HttpLoginClient {
	pub fn new(client: Client) -> Self {
		Self {
			client,
			display_name: None,
		}
	}

	/// Display name given to the device created by the login
	pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
		self.display_name = Some(display_name.into());
		self
	}
}

#[async_trait]
impl LoginClient for HttpLoginClient {
	async fn send_login_request(
		&self,
		homeserver: &str,
		device_id: Option<&str>,
		request: LoginRequest,
	) -> Result<SessionCredentials> {
		let url = endpoint(homeserver, LOGIN_PATH);
		debug!(%url, method = request.method(), "Sending login request");

		let response = self
			.client
			.post(&url)
			.json(&login_body(device_id, &request, self.display_name.as_deref()))
			.send()
			.await?;
		let login: LoginResponse = error_for_status(response, LinkingError::Login)
			.await?
			.json()
			.await?;

		Ok(SessionCredentials {
			user_id: login.user_id,
			device_id: login.device_id,
			access_token: login.access_token,
			homeserver: homeserver.to_string(),
		})
	}
}

#[derive(Deserialize)]
struct GetTokenResponse {
	login_token: String,
}

/// Requests one-time login tokens on behalf of a signed-in session
pub struct HttpLoginTokenIssuer {
	client: Client,
	homeserver: String,
	user_id: String,
	access_token: String,
}

impl HttpLoginTokenIssuer {
	pub fn new(client: Client, credentials: &SessionCredentials) -> Self {
		Self {
			client,
			homeserver: credentials.homeserver.clone(),
			user_id: credentials.user_id.clone(),
			access_token: credentials.access_token.clone(),
		}
	}
}

#[async_trait]
impl LoginTokenIssuer for HttpLoginTokenIssuer {
	fn user_id(&self) -> &str {
		&self.user_id
	}

	fn homeserver(&self) -> &str {
		&self.homeserver
	}

	async fn request_login_token(&self) -> Result<LoginToken> {
		let url = endpoint(&self.homeserver, GET_TOKEN_PATH);
		debug!(%url, "Requesting login token");

		let response = self
			.client
			.post(&url)
			.bearer_auth(&self.access_token)
			.json(&json!({}))
			.send()
			.await?;
		let token: GetTokenResponse = error_for_status(response, LinkingError::TokenRequest)
			.await?
			.json()
			.await?;

		Ok(LoginToken::new(token.login_token))
	}
}
