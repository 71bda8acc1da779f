use actix_web::{test, web, App};
use alloy::signers::local::PrivateKeySigner;

use x402_a2a::{
    create_payment_submission_message, process_payment_required, AssetMetadata,
    AuthorizationBuilder, ConfiguredFacilitator, InMemoryLedger, LocalFacilitator, LocalSigner,
    Message, NegotiatorConfig, PaymentCapability, PaymentNegotiator, PaymentStatus, TaskRequest,
    TaskResponse, TaskState, BASE_SEPOLIA_CHAIN_ID, BASE_SEPOLIA_USDC, EXTENSIONS_HEADER,
    EXTENSION_URI,
};
use x402_merchant::{product_price, routes, AppState, MerchantConfig, MerchantDelegate};

fn config(metrics_token: Option<&str>) -> MerchantConfig {
    MerchantConfig::from_lookup(|key| match key {
        "METRICS_TOKEN" => metrics_token.map(str::to_string),
        _ => None,
    })
    .unwrap()
}

fn make_state(config: &MerchantConfig) -> web::Data<AppState> {
    let negotiator = PaymentNegotiator::new(
        MerchantDelegate::from_config(config),
        ConfiguredFacilitator::Local(LocalFacilitator::approving()),
        NegotiatorConfig::default(),
    );
    web::Data::new(AppState::new(negotiator, config))
}

macro_rules! app {
    ($state:expr) => {
        test::init_service(
            App::new()
                .app_data($state)
                .app_data(web::JsonConfig::default().limit(65_536))
                .service(routes::tasks)
                .service(routes::agent_card)
                .service(routes::health)
                .service(routes::metrics_endpoint),
        )
        .await
    };
}

#[actix_rt::test]
async fn test_agent_card_advertises_extension() {
    let app = app!(make_state(&config(None)));

    let req = test::TestRequest::get()
        .uri("/.well-known/agent.json")
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["name"], "x402 Merchant Agent");
    assert_eq!(body["url"], "http://localhost:10000");
    assert_eq!(body["capabilities"]["extensions"][0]["uri"], EXTENSION_URI);
    assert_eq!(body["capabilities"]["extensions"][0]["required"], true);
    assert_eq!(body["skills"][0]["id"], "get_product_info");
}

#[actix_rt::test]
async fn test_health() {
    let app = app!(make_state(&config(None)));

    let req = test::TestRequest::get().uri("/health").to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["activeTasks"], 0);
}

#[actix_rt::test]
async fn test_without_extension_returns_quote() {
    let app = app!(make_state(&config(None)));

    let req = test::TestRequest::post()
        .uri("/tasks")
        .set_json(TaskRequest::new(Message::user("buy a widget")))
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), 200);
    assert!(resp.headers().get(EXTENSIONS_HEADER).is_none());
    let body: TaskResponse = test::read_body_json(resp).await;
    assert_eq!(body.state, TaskState::Completed);
    assert!(body.payment_status.is_none());
    assert!(body.output.unwrap().text.contains("widget costs"));
}

#[actix_rt::test]
async fn test_purchase_over_http() {
    let app = app!(make_state(&config(None)));

    // Activated through the header only.
    let req = test::TestRequest::post()
        .uri("/tasks")
        .insert_header((EXTENSIONS_HEADER, EXTENSION_URI))
        .set_json(TaskRequest::new(Message::user("I want to buy a red stapler")))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    assert_eq!(
        resp.headers().get(EXTENSIONS_HEADER).unwrap().to_str().unwrap(),
        EXTENSION_URI
    );
    let first: TaskResponse = test::read_body_json(resp).await;
    assert_eq!(first.state, TaskState::InputRequired);
    assert_eq!(first.payment_status, Some(PaymentStatus::PaymentRequired));

    let required = first.payment_required().unwrap().unwrap();
    assert_eq!(
        required.accepts[0].max_amount_required,
        product_price("red stapler").to_string()
    );

    let ledger = InMemoryLedger::new().with_asset(AssetMetadata {
        name: "USDC".to_string(),
        version: "2".to_string(),
        chain_id: BASE_SEPOLIA_CHAIN_ID,
        contract_address: BASE_SEPOLIA_USDC.parse().unwrap(),
    });
    let signer = LocalSigner::new(PrivateKeySigner::random());
    let caps = [PaymentCapability::new("base-sepolia", BASE_SEPOLIA_USDC)];
    let payload = process_payment_required(
        &required,
        &caps,
        None,
        &AuthorizationBuilder::new(),
        &signer,
        &ledger,
    )
    .await
    .unwrap();

    let submission = create_payment_submission_message(&first.task_id, &payload).unwrap();
    let req = test::TestRequest::post()
        .uri("/tasks")
        .set_json(TaskRequest::new(submission).with_extension(EXTENSION_URI))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let done: TaskResponse = test::read_body_json(resp).await;

    assert_eq!(done.state, TaskState::Completed);
    assert_eq!(done.payment_status, Some(PaymentStatus::Completed));
    assert!(done
        .output
        .as_ref()
        .unwrap()
        .text
        .contains("Your order is being prepared"));
    assert!(done.receipts().unwrap()[0].success);
}

#[actix_rt::test]
async fn test_malformed_task_body_is_bad_request() {
    let app = app!(make_state(&config(None)));

    let req = test::TestRequest::post()
        .uri("/tasks")
        .set_payload("{\"message\": 7}")
        .insert_header(("Content-Type", "application/json"))
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), 400);
}

#[actix_rt::test]
async fn test_metrics_require_token() {
    let app = app!(make_state(&config(Some("s3cret"))));

    let req = test::TestRequest::get().uri("/metrics").to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 401);

    let req = test::TestRequest::get()
        .uri("/metrics")
        .insert_header(("Authorization", "Bearer wrong"))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 401);

    let req = test::TestRequest::get()
        .uri("/metrics")
        .insert_header(("Authorization", "Bearer s3cret"))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 200);
}

#[actix_rt::test]
async fn test_metrics_forbidden_without_token() {
    let app = app!(make_state(&config(None)));

    let req = test::TestRequest::get().uri("/metrics").to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 403);
}
