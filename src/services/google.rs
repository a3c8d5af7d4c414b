//! Google Calendar v3 adapter.
//!
//! Only the two list calls the plugin needs are implemented. The access token is
//! read from a credentials file written by an external authorization tool.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, info};

use crate::config::GoogleConfig;
use crate::error::{AppError, AppResult};
use crate::services::calendar::{CalendarEvent, FetchedEvent};
use crate::services::provider::{CalendarConnector, CalendarListEntry, CalendarProvider};

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Page<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CalendarListItem {
    id: String,
    #[serde(default)]
    summary: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventTime {
    date_time: Option<String>,
    date: Option<String>,
}

impl EventTime {
    /// Timed events carry `dateTime`, all-day events only `date`.
    fn into_value(self) -> String {
        self.date_time.or(self.date).unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventItem {
    id: String,
    #[serde(default)]
    start: EventTime,
    #[serde(default)]
    end: EventTime,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    kind: String,
    #[serde(default)]
    html_link: String,
    #[serde(default)]
    updated: String,
    #[serde(default, rename = "iCalUID")]
    ical_uid: String,
}

impl From<EventItem> for FetchedEvent {
    fn from(item: EventItem) -> Self {
        FetchedEvent {
            id: item.id,
            event: CalendarEvent {
                start: item.start.into_value(),
                end: item.end.into_value(),
                summary: item.summary,
                description: item.description,
                status: item.status,
                kind: item.kind,
                html_link: item.html_link,
                updated: item.updated,
                ical_uid: item.ical_uid,
            },
        }
    }
}

/// Contents of the credentials file.
#[derive(Debug, Deserialize)]
struct StoredCredential {
    access_token: String,
    #[serde(default)]
    expiry: Option<DateTime<Utc>>,
}

// ============================================================================
// Client
// ============================================================================

#[derive(Debug, Clone)]
pub struct GoogleCalendarClient {
    client: Client,
    base_url: String,
    access_token: String,
}

impl GoogleCalendarClient {
    pub fn new(base_url: &str, access_token: String, timeout: Duration) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token,
        })
    }

    fn api_url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }

    async fn get_page<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> AppResult<Page<T>> {
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.access_token)
            .query(query)
            .send()
            .await
            .map_err(|e| AppError::RemoteFetch(format!("Calendar request failed: {}", e)))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::Authorization(format!(
                "Calendar API rejected credentials ({}): {}",
                status, error_text
            )));
        }
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::RemoteFetch(format!(
                "Calendar API error ({}): {}",
                status, error_text
            )));
        }

        response
            .json()
            .await
            .map_err(|e| AppError::RemoteFetch(format!("Malformed calendar response: {}", e)))
    }

    /// Collect every page of a list endpoint.
    async fn get_all<T: DeserializeOwned>(
        &self,
        url: &str,
        query: Vec<(&str, String)>,
    ) -> AppResult<Vec<T>> {
        let mut items = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut params = query.clone();
            if let Some(token) = page_token.take() {
                params.push(("pageToken", token));
            }

            let page: Page<T> = self.get_page(url, &params).await?;
            items.extend(page.items);

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        Ok(items)
    }
}

fn rfc3339(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[async_trait]
impl CalendarProvider for GoogleCalendarClient {
    async fn list_calendars(&self) -> AppResult<Vec<CalendarListEntry>> {
        let url = self.api_url("/users/me/calendarList");
        let items: Vec<CalendarListItem> = self.get_all(&url, Vec::new()).await?;

        Ok(items
            .into_iter()
            .map(|item| CalendarListEntry {
                id: item.id,
                summary: item.summary,
            })
            .collect())
    }

    async fn list_events(
        &self,
        calendar_id: &str,
        time_min: DateTime<Utc>,
        time_max: DateTime<Utc>,
    ) -> AppResult<Vec<FetchedEvent>> {
        let url = self.api_url(&format!(
            "/calendars/{}/events",
            urlencoding::encode(calendar_id)
        ));
        let query = vec![
            ("timeMin", rfc3339(time_min)),
            ("timeMax", rfc3339(time_max)),
            ("singleEvents", "true".to_string()),
            ("orderBy", "startTime".to_string()),
        ];

        let items: Vec<EventItem> = self.get_all(&url, query).await?;
        debug!("Fetched {} events from calendar {}", items.len(), calendar_id);
        Ok(items.into_iter().map(FetchedEvent::from).collect())
    }
}

// ============================================================================
// Connector
// ============================================================================

/// Builds a `GoogleCalendarClient` from the stored credential.
pub struct GoogleConnector {
    credentials_path: PathBuf,
    base_url: String,
    timeout: Duration,
}

impl GoogleConnector {
    pub fn new(config: &GoogleConfig) -> Self {
        GoogleConnector {
            credentials_path: PathBuf::from(&config.credentials_path),
            base_url: config.api_base_url.clone(),
            timeout: Duration::from_secs(config.request_timeout_seconds),
        }
    }

    async fn read_credential(&self) -> AppResult<StoredCredential> {
        let raw = tokio::fs::read_to_string(&self.credentials_path)
            .await
            .map_err(|e| {
                AppError::Authorization(format!(
                    "No calendar credential at {}: {}",
                    self.credentials_path.display(),
                    e
                ))
            })?;

        let credential: StoredCredential = serde_json::from_str(&raw).map_err(|e| {
            AppError::Authorization(format!("Unreadable calendar credential: {}", e))
        })?;

        if credential.access_token.trim().is_empty() {
            return Err(AppError::Authorization(
                "Calendar credential has no access token".to_string(),
            ));
        }
        if let Some(expiry) = credential.expiry {
            if expiry <= Utc::now() {
                return Err(AppError::Authorization(format!(
                    "Calendar credential expired at {}",
                    expiry
                )));
            }
        }

        Ok(credential)
    }
}

#[async_trait]
impl CalendarConnector for GoogleConnector {
    async fn connect(&self) -> AppResult<Arc<dyn CalendarProvider>> {
        let credential = self.read_credential().await?;
        let client =
            GoogleCalendarClient::new(&self.base_url, credential.access_token, self.timeout)?;
        info!(
            "Loaded calendar credential from {}",
            self.credentials_path.display()
        );
        Ok(Arc::new(client))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> GoogleCalendarClient {
        GoogleCalendarClient::new(&server.uri(), "token-123".to_string(), Duration::from_secs(5))
            .unwrap()
    }

    #[tokio::test]
    async fn events_follow_page_tokens_and_flatten_times() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/calendars/work%40example.com/events"))
            .and(header("authorization", "Bearer token-123"))
            .and(query_param("singleEvents", "true"))
            .and(query_param("orderBy", "startTime"))
            .and(query_param("pageToken", "p2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [{
                    "id": "b",
                    "summary": "Holiday",
                    "start": {"date": "2030-01-02"},
                    "end": {"date": "2030-01-03"}
                }]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/calendars/work%40example.com/events"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [{
                    "id": "a",
                    "summary": "Board Meeting",
                    "htmlLink": "https://calendar.example/a",
                    "iCalUID": "a@google.com",
                    "start": {"dateTime": "2030-01-01T10:00:00+01:00"},
                    "end": {"dateTime": "2030-01-01T11:00:00+01:00"}
                }],
                "nextPageToken": "p2"
            })))
            .mount(&server)
            .await;

        let now = Utc::now();
        let events = client(&server)
            .list_events("work@example.com", now, now + chrono::Duration::days(1))
            .await
            .unwrap();

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].id, "a");
        assert_eq!(events[0].event.start, "2030-01-01T10:00:00+01:00");
        assert_eq!(events[0].event.html_link, "https://calendar.example/a");
        assert_eq!(events[0].event.ical_uid, "a@google.com");
        assert_eq!(events[1].event.start, "2030-01-02");
        assert_eq!(events[1].event.description, "");
    }

    #[tokio::test]
    async fn rejected_token_is_an_authorization_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/me/calendarList"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let err = client(&server).list_calendars().await.unwrap_err();
        assert!(err.is_authorization());
    }

    #[tokio::test]
    async fn server_errors_are_remote_fetch_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let now = Utc::now();
        let err = client(&server)
            .list_events("primary", now, now)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::RemoteFetch(_)));
    }

    #[tokio::test]
    async fn calendar_list_is_mapped() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/me/calendarList"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [
                    {"id": "primary@example.com", "summary": "Me"},
                    {"id": "holidays", "summary": "Holidays"}
                ]
            })))
            .mount(&server)
            .await;

        let calendars = client(&server).list_calendars().await.unwrap();
        assert_eq!(
            calendars,
            vec![
                CalendarListEntry {
                    id: "primary@example.com".into(),
                    summary: "Me".into()
                },
                CalendarListEntry {
                    id: "holidays".into(),
                    summary: "Holidays".into()
                },
            ]
        );
    }

    fn connector_for(path: PathBuf) -> GoogleConnector {
        GoogleConnector {
            credentials_path: path,
            base_url: "http://127.0.0.1:9".to_string(),
            timeout: Duration::from_secs(1),
        }
    }

    fn temp_file(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("{}-{}", uuid::Uuid::new_v4(), name));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[tokio::test]
    async fn connector_requires_a_valid_credential() {
        let missing = connector_for(std::env::temp_dir().join("does-not-exist.json"));
        assert!(missing.connect().await.err().unwrap().is_authorization());

        let expired = connector_for(temp_file(
            "expired.json",
            r#"{"access_token": "x", "expiry": "2000-01-01T00:00:00Z"}"#,
        ));
        assert!(expired.connect().await.err().unwrap().is_authorization());

        let valid = connector_for(temp_file(
            "valid.json",
            r#"{"access_token": "x", "expiry": "2999-01-01T00:00:00Z"}"#,
        ));
        assert!(valid.connect().await.is_ok());
    }
}
