//! Moodle REST web-service client.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, instrument};
use url::Url;

use super::{ApiError, ContentSource};
use crate::model::{Category, Course, DiscussionPage, Section, SiteInfo};

/// Path of the REST endpoint relative to the site root.
const REST_ENDPOINT: &str = "webservice/rest/server.php";

const FN_SITE_INFO: &str = "core_webservice_get_site_info";
const FN_ENROLLED_COURSES: &str = "core_enrol_get_users_courses";
const FN_ALL_COURSES: &str = "core_course_get_courses_by_field";
const FN_CATEGORIES: &str = "core_course_get_categories";
const FN_COURSE_CONTENTS: &str = "core_course_get_contents";
const FN_FORUM_DISCUSSIONS: &str = "mod_forum_get_forum_discussions_paginated";
const FN_SELF_ENROL: &str = "enrol_self_enrol_user";

/// Client for the Moodle web service.
///
/// Cheap to clone: the underlying `reqwest::Client` is reference counted and
/// shares its connection pool with the download transport.
#[derive(Debug, Clone)]
pub struct MoodleClient {
    http: Client,
    site_url: Url,
    endpoint: Url,
    token: String,
}

#[derive(Debug, Deserialize)]
struct CourseListing {
    courses: Vec<Course>,
}

#[derive(Debug, Deserialize)]
struct EnrolStatus {
    status: bool,
}

impl MoodleClient {
    /// Creates a client for `site_url` authenticating with `token`.
    ///
    /// # Errors
    ///
    /// Returns [`url::ParseError`] if the REST endpoint cannot be joined onto
    /// the site URL.
    pub fn new(
        http: Client,
        site_url: Url,
        token: impl Into<String>,
    ) -> Result<Self, url::ParseError> {
        let mut base = site_url.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let endpoint = base.join(REST_ENDPOINT)?;
        Ok(Self {
            http,
            site_url,
            endpoint,
            token: token.into(),
        })
    }

    fn function_url(&self, function: &str, params: &[(&str, String)]) -> Url {
        let mut url = self.endpoint.clone();
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("wsfunction", function)
                .append_pair("moodlewsrestformat", "json")
                .append_pair("wstoken", &self.token);
            for (key, value) in params {
                query.append_pair(key, value);
            }
        }
        url
    }

    /// Calls `function` and returns the raw JSON value.
    async fn call_raw(&self, function: &str, params: &[(&str, String)]) -> Result<Value, ApiError> {
        let url = self.function_url(function, params);
        debug!(function, "calling web service");

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| ApiError::http(function, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::status(function, status.as_u16()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ApiError::http(function, e))?;
        serde_json::from_str(&body).map_err(|e| ApiError::decode(function, e))
    }

    /// Calls `function`, turning exception payloads into [`ApiError::Remote`].
    async fn call<T: DeserializeOwned>(
        &self,
        function: &str,
        params: &[(&str, String)],
    ) -> Result<T, ApiError> {
        let value = self.call_raw(function, params).await?;
        if let Some(exception) = exception_of(&value) {
            return Err(ApiError::remote(function, exception.0, exception.1));
        }
        serde_json::from_value(value).map_err(|e| ApiError::decode(function, e))
    }

    /// Returns information about the token owner.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::InvalidToken`] when the token is rejected.
    #[instrument(skip(self))]
    pub async fn site_info(&self) -> Result<SiteInfo, ApiError> {
        self.call(FN_SITE_INFO, &[]).await
    }

    /// Returns the courses `user_id` is enrolled in.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] on transport, status or decoding failures.
    #[instrument(skip(self))]
    pub async fn enrolled_courses(&self, user_id: u64) -> Result<Vec<Course>, ApiError> {
        self.call(FN_ENROLLED_COURSES, &[("userid", user_id.to_string())])
            .await
    }

    /// Returns every course on the site.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] on transport, status or decoding failures.
    #[instrument(skip(self))]
    pub async fn all_courses(&self) -> Result<Vec<Course>, ApiError> {
        let listing: CourseListing = self.call(FN_ALL_COURSES, &[]).await?;
        Ok(listing.courses)
    }

    /// Returns every course category.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] on transport, status or decoding failures.
    #[instrument(skip(self))]
    pub async fn categories(&self) -> Result<Vec<Category>, ApiError> {
        self.call(FN_CATEGORIES, &[]).await
    }

    /// Resolves a category display name to its id.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::UnknownCategory`] when no category has that name.
    pub async fn category_id(&self, name: &str) -> Result<u64, ApiError> {
        self.categories()
            .await?
            .into_iter()
            .find(|category| category.name == name)
            .map(|category| category.id)
            .ok_or_else(|| ApiError::UnknownCategory {
                name: name.to_string(),
            })
    }

    /// Self-enrols the token owner into a course. Returns the server's status flag.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] on transport, status or decoding failures.
    #[instrument(skip(self))]
    pub async fn self_enrol(&self, course_id: u64) -> Result<bool, ApiError> {
        let status: EnrolStatus = self
            .call(FN_SELF_ENROL, &[("courseid", course_id.to_string())])
            .await?;
        Ok(status.status)
    }
}

fn exception_of(value: &Value) -> Option<(String, String)> {
    let object = value.as_object()?;
    object.get("exception")?;
    let errorcode = object
        .get("errorcode")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string();
    let message = object
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    Some((errorcode, message))
}

#[async_trait]
impl ContentSource for MoodleClient {
    fn site_url(&self) -> &Url {
        &self.site_url
    }

    fn authorize_url(&self, file_url: &str) -> String {
        match Url::parse(file_url) {
            Ok(mut url) => {
                url.query_pairs_mut().append_pair("token", &self.token);
                url.to_string()
            }
            Err(_) => {
                let separator = if file_url.contains('?') { '&' } else { '?' };
                format!("{file_url}{separator}token={}", self.token)
            }
        }
    }

    #[instrument(skip(self))]
    async fn course_contents(&self, course_id: u64) -> Result<Vec<Section>, ApiError> {
        self.call(FN_COURSE_CONTENTS, &[("courseid", course_id.to_string())])
            .await
    }

    #[instrument(skip(self))]
    async fn forum_discussions(
        &self,
        forum_id: u64,
        page: u32,
        per_page: u32,
    ) -> Result<DiscussionPage, ApiError> {
        let value = self
            .call_raw(
                FN_FORUM_DISCUSSIONS,
                &[
                    ("sortby", "timemodified".to_string()),
                    ("sortdirection", "DESC".to_string()),
                    ("forumid", forum_id.to_string()),
                    ("page", page.to_string()),
                    ("perpage", per_page.to_string()),
                ],
            )
            .await?;
        serde_json::from_value(value).map_err(|e| ApiError::decode(FN_FORUM_DISCUSSIONS, e))
    }
}
