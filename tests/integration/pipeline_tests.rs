//! End-to-end harvest runs against a mock listing site

use listing_harvester::config::parse_config;
use listing_harvester::fetch::HttpSessionFactory;
use listing_harvester::{Catalog, Harvester, SqliteStore, Store, TaskStatus};
use std::sync::Arc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const CONFIG: &str = r#"
[pool]
crawl-workers = 3
parse-workers = 3
queue-capacity = 200
monitor-interval-ms = 50

[retry]
max-attempts = 2
base-delay-ms = 10
backoff-factor = 2.0
max-delay-ms = 50
op-max-retries = 2
op-retry-delay-ms = 10

[scroll]
step = 800
settle-delay-ms = 1
no-growth-threshold = 3
max-scroll-attempts = 5

[fetch]
url-template = "SERVER/cn/isz/{key}/index.html"
page-load-timeout-secs = 5
content-selector = ".content"
item-selector = ".dataItem"
user-agents = ["TestAgent/1.0"]

[output]
database-path = ":memory:"

[[schemas]]
id = "elderly_care_institutions"
description = "Shenzhen elderly care institutions"
natural-key = "name"
fields = [
    { name = "name" },
    { name = "district" },
    { name = "nature" },
    { name = "address" },
    { name = "bed_count", type = "INTEGER" },
    { name = "office_phone" },
]

[[targets]]
key = "yljg"
schema = "elderly_care_institutions"
rules = [
    { field = "name", css = "h4" },
    { field = "district", label = "所属区" },
    { field = "nature", label = "机构性质" },
    { field = "address", label = "地址" },
    { field = "bed_count", label = "床位", processor = "extract-number" },
    { field = "office_phone", label = "办公电话", processor = "extract-phone" },
]

[[targets]]
key = "gone"
schema = "elderly_care_institutions"
rules = [{ field = "name", css = "h4" }]
"#;

fn item(name: &str, district: &str, beds: &str, phone: &str) -> String {
    format!(
        r#"<div class="dataItem">
  <h4>{}</h4>
  <ul>
    <li><label>所属区：</label><p>{}</p></li>
    <li><label>机构性质：</label><p>公办</p></li>
    <li><label>地址：</label><p>{}某路1号</p></li>
    <li><label>床位：</label><p>{}</p></li>
    <li><label>办公电话：</label><p>{}</p></li>
  </ul>
</div>"#,
        name, district, district, beds, phone
    )
}

fn listing(items: &[String]) -> String {
    format!(
        r#"<html><body><div class="content">{}</div></body></html>"#,
        items.join("\n")
    )
}

async fn serve_listing(server: &MockServer, body: String) {
    Mock::given(method("GET"))
        .and(path("/cn/isz/yljg/index.html"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/cn/isz/gone/index.html"))
        .respond_with(ResponseTemplate::new(404))
        .mount(server)
        .await;
}

fn harvester(server: &MockServer, store: &Arc<SqliteStore>) -> Harvester {
    let config = parse_config(&CONFIG.replace("SERVER", &server.uri())).unwrap();
    let catalog = Catalog::from_config(&config).unwrap();
    let factory = Arc::new(HttpSessionFactory::new(&config.fetch));
    Harvester::new(&config, catalog, store.clone(), factory)
}

fn first_listing() -> Vec<String> {
    vec![
        item("福田区社会福利中心", "福田区", "120张(护理型60张)", "0755-8888 6666"),
        item("南山区养老院", "南山区", "80张", "0755-26660000"),
    ]
}

#[tokio::test]
async fn test_full_harvest_persists_records() {
    let server = MockServer::start().await;
    serve_listing(&server, listing(&first_listing())).await;
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());

    let harvester = harvester(&server, &store);
    let report = harvester.run().await.unwrap();

    assert_eq!(report.targets_total, 2);
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(report.store.inserted, 2);
    assert_eq!(report.store.errors, 0);

    let gone = report.outcomes.iter().find(|o| o.key == "gone").unwrap();
    assert_eq!(gone.status, TaskStatus::Aborted);
    assert_eq!(gone.attempts, 1);

    let schema = harvester
        .catalog()
        .schema("elderly_care_institutions")
        .unwrap();
    let row = store
        .fetch_row(schema, "福田区社会福利中心")
        .unwrap()
        .unwrap();

    let value = |field: &str| row.get(field).cloned().flatten();
    assert_eq!(value("bed_count").as_deref(), Some("120"));
    assert_eq!(value("district").as_deref(), Some("福田区"));
    assert_eq!(value("nature").as_deref(), Some("公办"));
    assert_eq!(value("address").as_deref(), Some("福田区某路1号"));
    assert_eq!(value("office_phone").as_deref(), Some("0755-88886666"));
}

#[tokio::test]
async fn test_rerun_of_unchanged_listing_only_counts_duplicates() {
    let server = MockServer::start().await;
    serve_listing(&server, listing(&first_listing())).await;
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());

    let first = harvester(&server, &store).run().await.unwrap();
    assert_eq!(first.store.inserted, 2);

    let second = harvester(&server, &store).run().await.unwrap();
    assert_eq!(second.store.inserted, 0);
    assert_eq!(second.store.updated, 0);
    assert_eq!(second.store.duplicates, 2);
    assert_eq!(store.stats().inserted, 2);
}

#[tokio::test]
async fn test_changed_listing_updates_only_changed_rows() {
    let server = MockServer::start().await;
    serve_listing(&server, listing(&first_listing())).await;
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());

    harvester(&server, &store).run().await.unwrap();

    server.reset().await;
    serve_listing(
        &server,
        listing(&[
            item("福田区社会福利中心", "福田区", "150张(护理型60张)", "0755-8888 6666"),
            item("南山区养老院", "南山区", "80张", "0755-26660000"),
            item("宝安区福利院", "宝安区", "300张", "0755-27770000"),
        ]),
    )
    .await;

    let report = harvester(&server, &store).run().await.unwrap();
    assert_eq!(report.store.inserted, 1);
    assert_eq!(report.store.updated, 1);
    assert_eq!(report.store.duplicates, 1);
}

#[tokio::test]
async fn test_empty_listing_is_retried_then_aborted() {
    let server = MockServer::start().await;
    serve_listing(&server, listing(&[])).await;
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());

    let report = harvester(&server, &store).run().await.unwrap();

    let yljg = report.outcomes.iter().find(|o| o.key == "yljg").unwrap();
    assert_eq!(yljg.status, TaskStatus::Aborted);
    assert_eq!(yljg.attempts, 2);
    assert!(yljg.last_error.as_deref().unwrap().starts_with("DataNotFound"));
    assert!(report.all_failed());
    assert_eq!(report.pool.parse_submitted, 0);
}
