//! Tests for the HTTP fetch backend against a mock server

use listing_harvester::config::FetchConfig;
use listing_harvester::fetch::{FetchError, HttpSessionFactory, SessionFactory};
use listing_harvester::Target;
use url::Url;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const LISTING: &str = r#"<html><body>
<div class="content">
  <div class="dataItem"><h4>福田区社会福利中心</h4></div>
  <div class="dataItem"><h4>南山区养老院</h4></div>
</div>
</body></html>"#;

fn fetch_config(server: &MockServer) -> FetchConfig {
    FetchConfig {
        url_template: format!("{}/cn/isz/{{key}}/index.html", server.uri()),
        page_load_timeout_secs: 5,
        content_selector: ".content".to_string(),
        item_selector: ".dataItem".to_string(),
        user_agents: vec!["TestAgent/1.0".to_string()],
    }
}

fn target(server: &MockServer, key: &str) -> Target {
    Target {
        key: key.to_string(),
        description: String::new(),
        schema_id: "institutions".to_string(),
        url: Url::parse(&format!("{}/cn/isz/{}/index.html", server.uri(), key)).unwrap(),
        rules: Vec::new(),
    }
}

#[tokio::test]
async fn test_session_collects_item_fragments() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/cn/isz/yljg/index.html"))
        .and(header("user-agent", "TestAgent/1.0"))
        .respond_with(ResponseTemplate::new(200).set_body_string(LISTING))
        .mount(&server)
        .await;

    let factory = HttpSessionFactory::new(&fetch_config(&server));
    let target = target(&server, "yljg");
    let mut session = factory.open(&target).await.unwrap();

    session.navigate(&target.url).await.unwrap();
    assert!(session.wait_for_content(".content").await.unwrap());
    assert!(!session.wait_for_content(".loading").await.unwrap());
    assert_eq!(session.content_extent().await.unwrap(), LISTING.len() as u64);

    let fragments = session.item_fragments(".dataItem").await.unwrap();
    assert_eq!(fragments.len(), 2);
    assert!(fragments[0].contains("福田区社会福利中心"));

    session.refresh().await.unwrap();
    session.close().await;
}

#[tokio::test]
async fn test_not_found_is_permanent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let factory = HttpSessionFactory::new(&fetch_config(&server));
    let target = target(&server, "gone");
    let mut session = factory.open(&target).await.unwrap();

    let result = session.navigate(&target.url).await;
    assert_eq!(result, Err(FetchError::Permanent("HTTP 404".to_string())));
}

#[tokio::test]
async fn test_server_errors_are_transient() {
    for status in [503, 429] {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(status))
            .mount(&server)
            .await;

        let factory = HttpSessionFactory::new(&fetch_config(&server));
        let target = target(&server, "yljg");
        let mut session = factory.open(&target).await.unwrap();

        let result = session.navigate(&target.url).await;
        assert_eq!(result, Err(FetchError::Transient(format!("HTTP {}", status))));
    }
}
