//! Cart, pincode and operational endpoints over HTTP.

mod common;

use axum::http::{Method, StatusCode};
use common::{body_json, TestApp, SERVICEABLE_PINCODE};
use nursery_api::entities::CatalogItemStatus;
use serde_json::json;
use uuid::Uuid;

#[tokio::test]
async fn cart_lines_are_priced_from_the_catalog() {
    let app = TestApp::new().await;
    let plant = app
        .seed_variant_product("Jade", &[("4 inch", 250, 5), ("8 inch", 600, 5)])
        .await;
    let token = app.customer_token(Uuid::new_v4());

    let response = app
        .request(
            Method::POST,
            "/api/v1/cart/items",
            Some(json!({
                "catalogItemId": plant.id,
                "size": "8 inch",
                "quantity": 2,
                "price": 1
            })),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let lines = body["data"]["items"].as_array().unwrap();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["price"], 600);
    assert_eq!(lines[0]["size"], "8 inch");
    assert_eq!(lines[0]["available"], true);
    assert_eq!(body["data"]["totals"]["subtotal"], 1200);
    assert_eq!(body["data"]["totals"]["shippingCost"], 0);
}

#[tokio::test]
async fn variant_items_need_a_size_in_the_cart() {
    let app = TestApp::new().await;
    let plant = app
        .seed_variant_product("Jade", &[("4 inch", 250, 5)])
        .await;
    let response = app
        .request(
            Method::POST,
            "/api/v1/cart/items",
            Some(json!({ "catalogItemId": plant.id, "quantity": 1 })),
            Some(&app.customer_token(Uuid::new_v4())),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn cart_quantity_is_bounded() {
    let app = TestApp::new().await;
    let plant = app.seed_product("Fern", 200, 50).await;
    let response = app
        .request(
            Method::POST,
            "/api/v1/cart/items",
            Some(json!({ "catalogItemId": plant.id, "quantity": 11 })),
            Some(&app.customer_token(Uuid::new_v4())),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn cart_lines_can_be_updated_and_removed_by_their_owner() {
    let app = TestApp::new().await;
    let plant = app.seed_product("Fern", 200, 50).await;
    let owner = Uuid::new_v4();
    let token = app.customer_token(owner);
    app.add_to_cart(owner, plant.id, None, 1).await;

    let cart = body_json(
        app.request(Method::GET, "/api/v1/cart", None, Some(&token))
            .await,
    )
    .await;
    let line_id = cart["data"]["items"][0]["lineId"].as_str().unwrap().to_string();

    let stranger = app.customer_token(Uuid::new_v4());
    let response = app
        .request(
            Method::PATCH,
            &format!("/api/v1/cart/items/{line_id}"),
            Some(json!({ "quantity": 3 })),
            Some(&stranger),
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .request(
            Method::PATCH,
            &format!("/api/v1/cart/items/{line_id}"),
            Some(json!({ "quantity": 3 })),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"]["items"][0]["quantity"], 3);
    assert_eq!(body["data"]["totals"]["total"], 699);

    let response = app
        .request(
            Method::DELETE,
            &format!("/api/v1/cart/items/{line_id}"),
            None,
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert!(body["data"]["items"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn clearing_a_cart_only_touches_that_user() {
    let app = TestApp::new().await;
    let plant = app.seed_product("Fern", 200, 50).await;
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    app.add_to_cart(a, plant.id, None, 1).await;
    app.add_to_cart(a, plant.id, None, 4).await;
    app.add_to_cart(b, plant.id, None, 2).await;

    let carts = app.state.cart_service();
    // Re-adding the same item overwrote the quantity instead of adding a line.
    let view = carts.view(a).await.unwrap();
    assert_eq!(view.items.len(), 1);
    assert_eq!(view.items[0].item.quantity, 4);

    assert_eq!(carts.clear(a).await.unwrap(), 1);
    assert!(carts.view(a).await.unwrap().items.is_empty());
    assert_eq!(carts.view(b).await.unwrap().items.len(), 1);
}

#[tokio::test]
async fn unlisted_items_show_as_unavailable_and_leave_totals() {
    let app = TestApp::new().await;
    let kept = app.seed_product("Fern", 200, 5).await;
    let retired = app.seed_product("Orchid", 900, 5).await;
    let user = Uuid::new_v4();
    app.add_to_cart(user, kept.id, None, 1).await;
    app.add_to_cart(user, retired.id, None, 1).await;

    let mut active: nursery_api::entities::catalog_item::ActiveModel = retired.into();
    active.status = sea_orm::Set(CatalogItemStatus::Archived);
    sea_orm::ActiveModelTrait::update(active, app.db()).await.unwrap();

    let body = body_json(
        app.request(
            Method::GET,
            "/api/v1/cart",
            None,
            Some(&app.customer_token(user)),
        )
        .await,
    )
    .await;
    let lines = body["data"]["items"].as_array().unwrap();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines.iter().filter(|l| l["available"] == false).count(), 1);
    assert_eq!(body["data"]["totals"]["subtotal"], 200);
}

#[tokio::test]
async fn cart_requires_authentication() {
    let app = TestApp::new().await;
    let response = app.request(Method::GET, "/api/v1/cart", None, None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .request(Method::GET, "/api/v1/cart", None, Some("not-a-jwt"))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn pincode_lookup_reports_serviceability() {
    let app = TestApp::new().await;
    app.seed_pincode(SERVICEABLE_PINCODE, true).await;
    app.seed_pincode("110001", false).await;

    let body = body_json(
        app.request(
            Method::GET,
            &format!("/api/v1/pincodes/{SERVICEABLE_PINCODE}"),
            None,
            None,
        )
        .await,
    )
    .await;
    assert_eq!(body["data"]["serviceable"], true);
    assert_eq!(body["data"]["city"], "Bengaluru");

    for code in ["110001", "400001", "abc"] {
        let response = app
            .request(Method::GET, &format!("/api/v1/pincodes/{code}"), None, None)
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["data"]["serviceable"], false);
    }
}

#[tokio::test]
async fn health_reports_database_up() {
    let app = TestApp::new().await;
    let response = app.request(Method::GET, "/health", None, None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "up");
    assert_eq!(body["database"]["status"], "up");
}

#[tokio::test]
async fn responses_carry_a_request_id() {
    let app = TestApp::new().await;
    let response = app.request(Method::GET, "/health", None, None).await;
    assert!(response.headers().contains_key("x-request-id"));

    let response = app
        .request(Method::GET, "/api/v1/pincodes/560001", None, None)
        .await;
    let request_id = response
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body = body_json(response).await;
    assert_eq!(body["meta"]["request_id"].as_str(), request_id.as_deref());
}

#[tokio::test]
async fn openapi_document_is_served() {
    let app = TestApp::new().await;
    let response = app
        .request(Method::GET, "/api-docs/openapi.json", None, None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert!(body["paths"]["/api/v1/payments/create-order"].is_object());
}
