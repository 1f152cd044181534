//! Integration tests for complete mirror runs against a mock Moodle site.

use std::path::Path;
use std::time::Duration;

use cms_scraper_core::{ApiError, Mirror, MirrorConfig, MirrorError};
use serde_json::{Value, json};
use tempfile::TempDir;
use url::Url;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

mod support;
use support::socket_guard::start_mock_server_or_skip;

const REST_PATH: &str = "/webservice/rest/server.php";
const TOKEN: &str = "t0k3n";

const NOTES: &[u8] = b"%PDF-1.4 lecture notes";
const SCHEDULE: &[u8] = b"midsem: 12 march";

/// Mounts a JSON answer for one web-service function.
async fn mount_function(server: &MockServer, function: &str, body: Value) {
    Mock::given(method("GET"))
        .and(path(REST_PATH))
        .and(query_param("wsfunction", function))
        .and(query_param("wstoken", TOKEN))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

async fn mount_site(server: &MockServer) {
    mount_function(
        server,
        "core_webservice_get_site_info",
        json!({"userid": 7, "sitename": "CMS Test"}),
    )
    .await;
    mount_function(
        server,
        "core_enrol_get_users_courses",
        json!([
            {"id": 1, "fullname": "CS F111 Computer Programming L1", "category": 3},
            {"id": 2, "fullname": "MATH F112 Mathematics II T2", "category": 4}
        ]),
    )
    .await;
    mount_function(
        server,
        "core_course_get_categories",
        json!([
            {"id": 3, "name": "Semester II 2019-20"},
            {"id": 4, "name": "Summer Term 2020"}
        ]),
    )
    .await;
}

/// Course 1 has a resource and a forum with one attachment; course 2 is empty.
async fn mount_contents(server: &MockServer, notes_size: u64) {
    let base = server.uri();
    Mock::given(method("GET"))
        .and(path(REST_PATH))
        .and(query_param("wsfunction", "core_course_get_contents"))
        .and(query_param("courseid", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "name": "Week 1",
            "summary": "",
            "modules": [
                {
                    "name": "Lecture Notes",
                    "modname": "resource",
                    "instance": 5,
                    "contents": [{
                        "type": "file",
                        "filename": "notes.pdf",
                        "fileurl": format!("{base}/webservice/pluginfile.php/1/notes.pdf"),
                        "filesize": notes_size
                    }]
                },
                {"name": "Announcements", "modname": "forum", "instance": 11},
                {"name": "Q&A", "modname": "forum", "instance": 12}
            ]
        }])))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(REST_PATH))
        .and(query_param("wsfunction", "core_course_get_contents"))
        .and(query_param("courseid", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path(REST_PATH))
        .and(query_param("wsfunction", "mod_forum_get_forum_discussions_paginated"))
        .and(query_param("forumid", "11"))
        .and(query_param("page", "0"))
        .and(query_param("perpage", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "discussions": [{
                "name": "Midsem schedule",
                "message": "<p>See attached</p>",
                "attachments": [{
                    "filename": "schedule.txt",
                    "fileurl": format!("{base}/webservice/pluginfile.php/2/schedule.txt"),
                    "filesize": SCHEDULE.len()
                }]
            }]
        })))
        .mount(server)
        .await;
    // Forums without discussions answer with an exception payload
    Mock::given(method("GET"))
        .and(path(REST_PATH))
        .and(query_param("wsfunction", "mod_forum_get_forum_discussions_paginated"))
        .and(query_param("forumid", "12"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "exception": "moodle_exception",
            "errorcode": "nodiscussions",
            "message": "No discussions"
        })))
        .mount(server)
        .await;
}

fn config(server: &MockServer, destination: &Path) -> MirrorConfig {
    let mut config = MirrorConfig::new(Url::parse(&server.uri()).unwrap(), TOKEN);
    config.destination = destination.to_path_buf();
    config
}

fn course_dir(base: &Path) -> std::path::PathBuf {
    base.join("CS F111 Computer Programming")
        .join("L1")
        .join("Week 1")
}

#[tokio::test]
async fn test_second_run_downloads_nothing() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_site(&server).await;
    mount_contents(&server, NOTES.len() as u64).await;

    Mock::given(method("GET"))
        .and(path("/webservice/pluginfile.php/1/notes.pdf"))
        .and(query_param("token", TOKEN))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(NOTES))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/webservice/pluginfile.php/2/schedule.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(SCHEDULE))
        .expect(1)
        .mount(&server)
        .await;

    let temp_dir = TempDir::new().unwrap();
    let mirror = Mirror::new(config(&server, temp_dir.path())).unwrap();

    let first = mirror.run().await.unwrap();
    assert_eq!(first.courses, 2);
    assert_eq!(first.discovered, 2);
    assert_eq!(first.queued, 2);
    assert_eq!(first.downloads.completed, 2);
    assert_eq!(first.downloads.failed, 0);

    let dir = course_dir(&temp_dir.path().join("CMS"));
    assert_eq!(
        std::fs::read(dir.join("Lecture Notes").join("notes.pdf")).unwrap(),
        NOTES
    );
    assert_eq!(
        std::fs::read(
            dir.join("Announcements")
                .join("Midsem schedule")
                .join("schedule.txt")
        )
        .unwrap(),
        SCHEDULE
    );
    assert!(dir.join("QA").is_dir());

    let second = mirror.run().await.unwrap();
    assert_eq!(second.discovered, 2);
    assert_eq!(second.queued, 0);
    assert_eq!(second.downloads.total(), 0);
}

#[tokio::test]
async fn test_category_filter_selects_courses_and_base_dir() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_site(&server).await;
    mount_contents(&server, NOTES.len() as u64).await;
    Mock::given(method("GET"))
        .and(path("/webservice/pluginfile.php/1/notes.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(NOTES))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/webservice/pluginfile.php/2/schedule.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(SCHEDULE))
        .mount(&server)
        .await;

    let temp_dir = TempDir::new().unwrap();
    let mut config = config(&server, temp_dir.path());
    config.category = Some("Semester II 2019-20".to_string());
    let summary = Mirror::new(config).unwrap().run().await.unwrap();

    assert_eq!(summary.courses, 1);
    let dir = course_dir(&temp_dir.path().join("Semester II 2019-20"));
    assert!(dir.join("Lecture Notes").join("notes.pdf").is_file());
    assert!(!temp_dir.path().join("CMS").exists());
}

#[tokio::test]
async fn test_unknown_category_fails_run() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_site(&server).await;

    let temp_dir = TempDir::new().unwrap();
    let mut config = config(&server, temp_dir.path());
    config.category = Some("Semester IX".to_string());
    let error = Mirror::new(config).unwrap().run().await.unwrap_err();

    assert!(matches!(
        error,
        MirrorError::Api(ApiError::UnknownCategory { .. })
    ));
}

#[tokio::test]
async fn test_files_over_ceiling_are_never_requested() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_site(&server).await;
    mount_contents(&server, 3 * 1024 * 1024).await;

    Mock::given(method("GET"))
        .and(path("/webservice/pluginfile.php/1/notes.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(NOTES))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/webservice/pluginfile.php/2/schedule.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(SCHEDULE))
        .expect(1)
        .mount(&server)
        .await;

    let temp_dir = TempDir::new().unwrap();
    let mut config = config(&server, temp_dir.path());
    config.max_download_size = 1024 * 1024;
    let summary = Mirror::new(config).unwrap().run().await.unwrap();

    assert_eq!(summary.discovered, 2);
    assert_eq!(summary.queued, 1);
    assert_eq!(summary.downloads.completed, 1);
}

#[tokio::test]
async fn test_html_pages_saved_when_enabled() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_site(&server).await;
    mount_contents(&server, NOTES.len() as u64).await;
    Mock::given(method("GET"))
        .and(path("/webservice/pluginfile.php/1/notes.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(NOTES))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/webservice/pluginfile.php/2/schedule.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(SCHEDULE))
        .mount(&server)
        .await;

    let temp_dir = TempDir::new().unwrap();
    let mut config = config(&server, temp_dir.path());
    config.save_html = true;
    let mirror = Mirror::new(config).unwrap();
    let summary = mirror.run().await.unwrap();

    assert_eq!(summary.pages.completed, 1);
    let page = course_dir(&temp_dir.path().join("CMS"))
        .join("Announcements")
        .join("Midsem schedule")
        .join("Midsem schedule.html");
    assert_eq!(std::fs::read_to_string(page).unwrap(), "<p>See attached</p>");

    let again = mirror.run().await.unwrap();
    assert_eq!(again.pages.total(), 0);
}

#[tokio::test]
async fn test_invalid_token_stops_run() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_function(
        &server,
        "core_webservice_get_site_info",
        json!({
            "exception": "moodle_exception",
            "errorcode": "invalidtoken",
            "message": "Invalid token - token not found"
        }),
    )
    .await;

    let temp_dir = TempDir::new().unwrap();
    let error = Mirror::new(config(&server, temp_dir.path()))
        .unwrap()
        .run()
        .await
        .unwrap_err();

    assert!(matches!(error, MirrorError::Api(ApiError::InvalidToken)));
    assert!(!temp_dir.path().join("CMS").exists());
}

#[tokio::test]
async fn test_run_timeout_abandons_slow_transfers() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_site(&server).await;
    mount_contents(&server, NOTES.len() as u64).await;
    Mock::given(method("GET"))
        .and(path("/webservice/pluginfile.php/1/notes.pdf"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(NOTES)
                .set_delay(Duration::from_secs(10)),
        )
        .mount(&server)
        .await;

    let temp_dir = TempDir::new().unwrap();
    let mut config = config(&server, temp_dir.path());
    config.batch_timeout = Some(Duration::from_secs(1));
    let error = Mirror::new(config).unwrap().run().await.unwrap_err();

    assert!(matches!(error, MirrorError::TimedOut { .. }));
}

#[tokio::test]
async fn test_handouts_only_mode() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_site(&server).await;
    let base = server.uri();
    Mock::given(method("GET"))
        .and(path(REST_PATH))
        .and(query_param("wsfunction", "core_course_get_contents"))
        .and(query_param("courseid", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "name": "General",
            "summary": "",
            "modules": [
                {
                    "name": "Handout",
                    "modname": "resource",
                    "contents": [{
                        "type": "file",
                        "filename": "cs f111 handout.pdf",
                        "fileurl": format!("{base}/webservice/pluginfile.php/9/handout.pdf"),
                        "filesize": 7
                    }]
                },
                {
                    "name": "Slides",
                    "modname": "resource",
                    "contents": [{
                        "type": "file",
                        "filename": "slides.pdf",
                        "fileurl": format!("{base}/webservice/pluginfile.php/9/slides.pdf"),
                        "filesize": 6
                    }]
                }
            ]
        }])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(REST_PATH))
        .and(query_param("wsfunction", "core_course_get_contents"))
        .and(query_param("courseid", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/webservice/pluginfile.php/9/handout.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"handout"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/webservice/pluginfile.php/9/slides.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"slides"))
        .expect(0)
        .mount(&server)
        .await;

    let temp_dir = TempDir::new().unwrap();
    let mut config = config(&server, temp_dir.path());
    config.handouts_only = true;
    let summary = Mirror::new(config).unwrap().run().await.unwrap();

    assert_eq!(summary.downloads.completed, 1);
    let handout = temp_dir
        .path()
        .join("CMS")
        .join("CS F111 Computer Programming_HANDOUT.pdf");
    assert_eq!(std::fs::read(handout).unwrap(), b"handout");
}

#[tokio::test]
async fn test_enrol_all_skips_enrolled_courses() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_site(&server).await;
    mount_function(
        &server,
        "core_course_get_courses_by_field",
        json!({"courses": [
            {"id": 1, "fullname": "CS F111 Computer Programming L1", "categoryid": 3},
            {"id": 5, "fullname": "CHEM F111 General Chemistry L2", "categoryid": 3},
            {"id": 6, "fullname": "BIO F111 General Biology L1", "categoryid": 3},
            {"id": 9, "fullname": "ECON F211 Principles of Economics L1", "categoryid": 4}
        ]}),
    )
    .await;
    Mock::given(method("GET"))
        .and(path(REST_PATH))
        .and(query_param("wsfunction", "enrol_self_enrol_user"))
        .and(query_param("courseid", "5"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": true})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(REST_PATH))
        .and(query_param("wsfunction", "enrol_self_enrol_user"))
        .and(query_param("courseid", "6"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "exception": "moodle_exception",
            "errorcode": "canntenrol",
            "message": "Enrolment is disabled or inactive"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let temp_dir = TempDir::new().unwrap();
    let mut config = config(&server, temp_dir.path());
    config.category = Some("Semester II 2019-20".to_string());
    let summary = Mirror::new(config).unwrap().enrol_all().await.unwrap();

    assert_eq!(summary.applied, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.unchanged, 0);
}
