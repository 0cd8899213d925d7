use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Method, RequestBuilder, Response, StatusCode, Url};
use serde::Serialize;

use crate::{
    core::truncate_message,
    error::{EngineError, SourceError},
    model::{FetchResponse, Principal, TriggerResponse},
    settings::{normalize_base_url, EngineSettings},
};

/// Server-side collaborator that stores notifications and computes due
/// reminders. Implementations translate every transport failure into
/// [`SourceError`] and report an unknown principal as
/// [`SourceError::Unauthenticated`].
#[async_trait]
pub trait NotificationSource: Send + Sync {
    /// Full set when `since` is `None`, otherwise only rows created after it.
    async fn fetch_notifications(
        &self,
        principal: &Principal,
        since: Option<DateTime<Utc>>,
    ) -> Result<FetchResponse, SourceError>;

    async fn mark_notification_read(&self, id: &str) -> Result<(), SourceError>;

    async fn mark_all_notifications_read(&self, principal: &Principal)
        -> Result<(), SourceError>;

    async fn delete_notification(&self, id: &str) -> Result<(), SourceError>;

    async fn delete_all_read_notifications(
        &self,
        principal: &Principal,
    ) -> Result<(), SourceError>;

    /// Asks the server to materialise due reminders. Idempotent on the server
    /// side; `force` bypasses its internal throttling.
    async fn trigger_reminder_computation(
        &self,
        force: bool,
    ) -> Result<TriggerResponse, SourceError>;
}

pub struct HttpNotificationSource {
    client: reqwest::Client,
    base_url: Url,
    token: Option<String>,
    timeout: Duration,
}

#[derive(Serialize)]
struct TriggerBody {
    force: bool,
}

impl HttpNotificationSource {
    pub fn new(settings: &EngineSettings) -> Result<Self, EngineError> {
        let timeout = settings.request_timeout();
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| EngineError::Settings(format!("Failed to build HTTP client: {error}")))?;
        let base_url = Url::parse(&normalize_base_url(&settings.base_url)?)
            .map_err(|error| EngineError::Settings(format!("Invalid server URL: {error}")))?;
        if base_url.cannot_be_a_base() {
            return Err(EngineError::Settings(format!(
                "Server URL cannot carry a path: {base_url}"
            )));
        }
        Ok(Self {
            client,
            base_url,
            token: settings.token().map(str::to_string),
            timeout,
        })
    }

    /// Appends `segments` to the base path. Each segment is percent-encoded
    /// on its own, so ids containing `/` or `?` stay a single segment.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn request(&self, method: Method, segments: &[&str]) -> RequestBuilder {
        let builder = self.client.request(method, self.endpoint(segments));
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder, label: &str) -> Result<Response, SourceError> {
        let response = builder.send().await.map_err(|error| {
            if error.is_timeout() {
                SourceError::Timeout(self.timeout)
            } else {
                SourceError::Transport(format!("{label}: {error}"))
            }
        })?;
        check_status(response, label).await
    }
}

async fn check_status(response: Response, label: &str) -> Result<Response, SourceError> {
    let status = response.status();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(SourceError::Unauthenticated);
    }
    if status.is_success() {
        return Ok(response);
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<unable to read response body>".to_string());
    tracing::debug!("{label} failed http={}", status.as_u16());
    Err(SourceError::Rejected {
        status: status.as_u16(),
        detail: truncate_message(&body, 200),
    })
}

fn principal_query(principal: &Principal) -> Vec<(&'static str, String)> {
    let mut query = vec![("principalId", principal.id.clone())];
    if let Some(role) = &principal.role {
        query.push(("role", role.clone()));
    }
    query
}

#[async_trait]
impl NotificationSource for HttpNotificationSource {
    async fn fetch_notifications(
        &self,
        principal: &Principal,
        since: Option<DateTime<Utc>>,
    ) -> Result<FetchResponse, SourceError> {
        let mut query = principal_query(principal);
        if let Some(since) = since {
            query.push(("since", since.to_rfc3339_opts(SecondsFormat::Millis, true)));
        }
        let response = self
            .send(
                self.request(Method::GET, &["notifications"]).query(&query),
                "fetch notifications",
            )
            .await?;
        response
            .json::<FetchResponse>()
            .await
            .map_err(|error| SourceError::Decode(format!("notifications: {error}")))
    }

    async fn mark_notification_read(&self, id: &str) -> Result<(), SourceError> {
        self.send(
            self.request(Method::PATCH, &["notifications", id, "read"]),
            "mark read",
        )
        .await?;
        Ok(())
    }

    async fn mark_all_notifications_read(
        &self,
        principal: &Principal,
    ) -> Result<(), SourceError> {
        self.send(
            self.request(Method::PATCH, &["notifications", "read-all"])
                .query(&principal_query(principal)),
            "mark all read",
        )
        .await?;
        Ok(())
    }

    async fn delete_notification(&self, id: &str) -> Result<(), SourceError> {
        match self
            .send(
                self.request(Method::DELETE, &["notifications", id]),
                "delete",
            )
            .await
        {
            Ok(_) => Ok(()),
            // Already gone on the server: the local removal is still correct.
            Err(SourceError::Rejected { status: 404, .. }) => Ok(()),
            Err(error) => Err(error),
        }
    }

    async fn delete_all_read_notifications(
        &self,
        principal: &Principal,
    ) -> Result<(), SourceError> {
        self.send(
            self.request(Method::DELETE, &["notifications", "read"])
                .query(&principal_query(principal)),
            "delete read",
        )
        .await?;
        Ok(())
    }

    async fn trigger_reminder_computation(
        &self,
        force: bool,
    ) -> Result<TriggerResponse, SourceError> {
        let response = self
            .send(
                self.request(Method::POST, &["reminders", "trigger"])
                    .json(&TriggerBody { force }),
                "trigger reminders",
            )
            .await?;
        response
            .json::<TriggerResponse>()
            .await
            .map_err(|error| SourceError::Decode(format!("trigger: {error}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn principal_query_includes_role_when_present() {
        let staff = Principal::new("u1", Some("staff".into()));
        assert_eq!(
            principal_query(&staff),
            vec![("principalId", "u1".to_string()), ("role", "staff".to_string())]
        );
        assert_eq!(
            principal_query(&Principal::new("u2", None)),
            vec![("principalId", "u2".to_string())]
        );
    }

    #[test]
    fn client_uses_normalized_base_url() {
        let settings = EngineSettings {
            base_url: " https://inv.example.com/api/ ".into(),
            token: Some(" t0k ".into()),
            ..EngineSettings::default()
        };
        let source = HttpNotificationSource::new(&settings).unwrap();
        assert_eq!(
            source.endpoint(&["notifications"]).as_str(),
            "https://inv.example.com/api/notifications"
        );
        assert_eq!(source.token.as_deref(), Some("t0k"));
    }

    #[test]
    fn client_rejects_unusable_base_url() {
        let settings = EngineSettings {
            base_url: "ftp://inv.example.com".into(),
            ..EngineSettings::default()
        };
        assert!(HttpNotificationSource::new(&settings).is_err());
    }

    #[test]
    fn ids_are_escaped_as_single_path_segments() {
        let settings = EngineSettings {
            base_url: "https://inv.example.com/api".into(),
            ..EngineSettings::default()
        };
        let source = HttpNotificationSource::new(&settings).unwrap();
        assert_eq!(
            source.endpoint(&["notifications", "a/b?c", "read"]).as_str(),
            "https://inv.example.com/api/notifications/a%2Fb%3Fc/read"
        );
        assert_eq!(
            source.endpoint(&["notifications", "n 1#x"]).as_str(),
            "https://inv.example.com/api/notifications/n%201%23x"
        );
    }

    #[test]
    fn endpoint_on_host_root() {
        let settings = EngineSettings {
            base_url: "http://inv.example.com".into(),
            ..EngineSettings::default()
        };
        let source = HttpNotificationSource::new(&settings).unwrap();
        assert_eq!(
            source.endpoint(&["reminders", "trigger"]).as_str(),
            "http://inv.example.com/reminders/trigger"
        );
    }
}
