use anyhow::Result;
use sapb1::cache::CacheManager;
use sapb1::config::{CacheConfig, ServiceLayerConfig};
use sapb1::model::{ModelContext, ModelDefinition, ModelRegistry};
use sapb1::service_layer::{
    EntityKey, HttpServiceLayer, ODataQuery, ServiceLayer, ServiceLayerError, SortDirection,
};
use serde_json::json;
use std::sync::Arc;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config(server: &MockServer, with_credentials: bool) -> ServiceLayerConfig {
    let mut config = ServiceLayerConfig {
        base_url: format!("{}/b1s/v1", server.uri()),
        max_retries: 2,
        retry_base_ms: 1,
        ..ServiceLayerConfig::default()
    };
    if with_credentials {
        config.company_db = Some("SBODEMOUS".into());
        config.username = Some("manager".into());
        config.password = Some("secret".into());
    }
    config
}

async fn mount_login(server: &MockServer, expected_logins: u64) {
    Mock::given(method("POST"))
        .and(path("/b1s/v1/Login"))
        .and(body_json(json!({
            "CompanyDB": "SBODEMOUS",
            "UserName": "manager",
            "Password": "secret"
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .append_header("Set-Cookie", "B1SESSION=abc-123; HttpOnly")
                .append_header("Set-Cookie", "ROUTEID=.node1; path=/b1s")
                .set_body_json(json!({"SessionId": "abc-123", "SessionTimeout": 30})),
        )
        .expect(expected_logins)
        .mount(server)
        .await;
}

#[tokio::test]
async fn query_logs_in_and_sends_session_cookies() -> Result<()> {
    let server = MockServer::start().await;
    mount_login(&server, 1).await;

    Mock::given(method("GET"))
        .and(path("/b1s/v1/Items"))
        .and(header("Cookie", "B1SESSION=abc-123; ROUTEID=.node1"))
        .and(header("Prefer", "odata.maxpagesize=2"))
        .and(query_param("$filter", "Valid eq 'tYES'"))
        .and(query_param("$select", "ItemCode,ItemName"))
        .and(query_param("$orderby", "ItemCode asc"))
        .and(query_param("$top", "2"))
        .and(query_param("$skip", "4"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "odata.metadata": "$metadata#Items",
            "value": [
                {"ItemCode": "A005", "ItemName": "Five"},
                {"ItemCode": "A006", "ItemName": "Six"}
            ]
        })))
        .expect(2)
        .mount(&server)
        .await;

    let client = HttpServiceLayer::new(&config(&server, true))?;
    let query = ODataQuery::new()
        .filter("Valid eq 'tYES'")
        .select(["ItemCode", "ItemName"])
        .order_by("ItemCode", SortDirection::Asc)
        .top(2)
        .skip(4);

    let page = client.query("Items", &query).await?;
    assert_eq!(page.value.len(), 2);
    assert_eq!(page.value[0]["ItemCode"], "A005");

    // The session is reused.
    client.query("Items", &query).await?;
    Ok(())
}

#[tokio::test]
async fn unbounded_reads_follow_next_links() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/b1s/v1/Items"))
        .and(query_param("$skip", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [{"ItemCode": "A3"}]
        })))
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/b1s/v1/Items"))
        .and(query_param("$filter", "Valid eq 'tYES'"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [{"ItemCode": "A1"}, {"ItemCode": "A2"}],
            "odata.nextLink": "Items?$filter=Valid%20eq%20'tYES'&$skip=2"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = HttpServiceLayer::new(&config(&server, false))?;
    let page = client
        .query("Items", &ODataQuery::new().filter("Valid eq 'tYES'"))
        .await?;

    let codes: Vec<_> = page.value.iter().map(|r| r["ItemCode"].clone()).collect();
    assert_eq!(codes, vec![json!("A1"), json!("A2"), json!("A3")]);
    assert_eq!(page.next_link, None);

    let requests = server.received_requests().await.unwrap_or_default();
    assert_eq!(requests.len(), 2);
    assert!(requests[0].headers.get("Prefer").is_none());
    Ok(())
}

#[tokio::test]
async fn model_queries_return_every_server_page() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/b1s/v1/Items"))
        .and(query_param("$skip", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [{"ItemCode": "A3"}]
        })))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/b1s/v1/Items"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [{"ItemCode": "A1"}, {"ItemCode": "A2"}],
            "odata.nextLink": "Items?$skip=2"
        })))
        .mount(&server)
        .await;

    let registry = Arc::new(ModelRegistry::new());
    registry.register(ModelDefinition::new("Items", "ItemCode"));
    let cache = CacheManager::new(&CacheConfig {
        enabled: false,
        ..CacheConfig::default()
    });
    let ctx = ModelContext::new(
        Arc::new(HttpServiceLayer::new(&config(&server, false))?),
        cache,
        registry,
    );

    assert_eq!(ctx.query("Items")?.get().await?.len(), 3);
    assert_eq!(ctx.query("Items")?.pluck("ItemCode").await?.len(), 3);
    Ok(())
}

#[tokio::test]
async fn bounded_reads_stop_at_the_requested_page() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/b1s/v1/Items"))
        .and(header("Prefer", "odata.maxpagesize=2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [{"ItemCode": "A1"}, {"ItemCode": "A2"}],
            "odata.nextLink": "Items?$top=2&$skip=2"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = HttpServiceLayer::new(&config(&server, false))?;
    let page = client.query("Items", &ODataQuery::new().top(2)).await?;
    assert_eq!(page.value.len(), 2);
    assert_eq!(page.next_link.as_deref(), Some("Items?$top=2&$skip=2"));
    Ok(())
}

#[tokio::test]
async fn expired_session_triggers_one_relogin() -> Result<()> {
    let server = MockServer::start().await;
    mount_login(&server, 2).await;

    Mock::given(method("GET"))
        .and(path("/b1s/v1/Orders(12)"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": {"code": 301, "message": {"lang": "en-us", "value": "Invalid session."}}
        })))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/b1s/v1/Orders(12)"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"DocEntry": 12})))
        .mount(&server)
        .await;

    let client = HttpServiceLayer::new(&config(&server, true))?;
    let order = client.find("Orders", &EntityKey::Int(12)).await?;
    assert_eq!(order.unwrap()["DocEntry"], 12);
    Ok(())
}

#[tokio::test]
async fn rejected_login_is_an_authentication_error() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/b1s/v1/Login"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": {"code": 100000027, "message": {"lang": "en-us", "value": "Login failed"}}
        })))
        .mount(&server)
        .await;

    let client = HttpServiceLayer::new(&config(&server, true))?;
    let err = client.count("Items", &ODataQuery::new()).await.unwrap_err();
    assert!(matches!(err, ServiceLayerError::Authentication { ref details } if details.contains("Login failed")));
    Ok(())
}

#[tokio::test]
async fn count_reads_a_bare_integer() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/b1s/v1/Items/$count"))
        .and(query_param("$filter", "QuantityOnStock gt 0"))
        .respond_with(ResponseTemplate::new(200).set_body_string("\u{feff}42"))
        .expect(1)
        .mount(&server)
        .await;

    let client = HttpServiceLayer::new(&config(&server, false))?;
    let query = ODataQuery::new().filter("QuantityOnStock gt 0").top(5);
    assert_eq!(client.count("Items", &query).await?, 42);
    Ok(())
}

#[tokio::test]
async fn transient_failures_are_retried() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/b1s/v1/Warehouses"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/b1s/v1/Warehouses"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"value": []})))
        .expect(1)
        .mount(&server)
        .await;

    let client = HttpServiceLayer::new(&config(&server, false))?;
    let page = client.query("Warehouses", &ODataQuery::new()).await?;
    assert!(page.value.is_empty());
    Ok(())
}

#[tokio::test]
async fn client_errors_surface_the_sap_message_without_retry() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/b1s/v1/Orders(7)"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": {"code": -5002, "message": {"lang": "en-us", "value": "Document is closed"}}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = HttpServiceLayer::new(&config(&server, false))?;
    let payload = json!({"Comments": "late"}).as_object().cloned().unwrap();
    let err = client
        .update("Orders", &EntityKey::Int(7), &payload)
        .await
        .unwrap_err();

    match err {
        ServiceLayerError::Http {
            status,
            code,
            message,
        } => {
            assert_eq!(status, 400);
            assert_eq!(code, Some(-5002));
            assert_eq!(message, "Document is closed");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn missing_record_reads_as_none() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/b1s/v1/Orders(99)"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": {"code": -2028, "message": {"lang": "en-us", "value": "No matching records found (ODBC -2028)"}}
        })))
        .mount(&server)
        .await;

    let client = HttpServiceLayer::new(&config(&server, false))?;
    assert!(client.find("Orders", &EntityKey::Int(99)).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn actions_post_to_the_bound_path() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/b1s/v1/Orders(7)/Close"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let client = HttpServiceLayer::new(&config(&server, false))?;
    let response = client.action("Orders", &EntityKey::Int(7), "Close").await?;
    assert!(response.is_none());
    Ok(())
}
