use axum::{extract::State, http::StatusCode, Json};
use tracing::{error, info};

use crate::{
    db,
    error::{AppError, AppResult},
    models::{Balance, CreateProduct, Payload, Product, ProductId, UpdateProduct},
    AppState,
};

// ── List ──────────────────────────────────────────────────────────────────────

pub async fn list_products(State(state): State<AppState>) -> AppResult<Json<Vec<Product>>> {
    let products = state
        .db
        .with_connection(|conn| Box::pin(async move { db::fetch_all_products(conn).await }))
        .await?;

    info!(count = products.len(), "Listed products");

    Ok(Json(products))
}

// ── Create ────────────────────────────────────────────────────────────────────

pub async fn create_product(
    State(state): State<AppState>,
    payload: Payload,
) -> AppResult<(StatusCode, Json<Product>)> {
    let input = CreateProduct::try_from(payload)?;

    let product = state
        .db
        .with_write_connection(move |conn| {
            Box::pin(async move { db::insert_product(conn, &input).await })
        })
        .await?;

    info!(id = product.id, name = %product.name, "Created product");

    Ok((StatusCode::CREATED, Json(product)))
}

// ── Balance ───────────────────────────────────────────────────────────────────

pub async fn get_balance(State(state): State<AppState>) -> AppResult<Json<Balance>> {
    let balance = state
        .db
        .with_connection(|conn| Box::pin(async move { db::total_balance(conn).await }))
        .await
        .map_err(|err| {
            error!(error = %err, "Balance query failed");
            AppError::Internal("Failed to compute total balance".to_string())
        })?;

    info!(total_balance = balance.total_balance, "Computed balance");

    Ok(Json(balance))
}

// ── Get by ID ─────────────────────────────────────────────────────────────────

pub async fn get_product(
    State(state): State<AppState>,
    id: ProductId,
) -> AppResult<Json<Product>> {
    let id = id.get()?;
    let product = state
        .db
        .with_connection(move |conn| {
            Box::pin(async move { db::fetch_product_by_id(conn, id).await })
        })
        .await?;

    info!(id, "Fetched product");

    Ok(Json(product))
}

// ── Update ────────────────────────────────────────────────────────────────────

pub async fn update_product(
    State(state): State<AppState>,
    id: ProductId,
    payload: Payload,
) -> AppResult<Json<Product>> {
    // Shape errors win over a missing row.
    let changes = UpdateProduct::try_from(payload)?;
    let id = id.get()?;

    let product = state
        .db
        .with_write_connection(move |conn| {
            Box::pin(async move {
                if !db::product_exists(conn, id).await? {
                    return Err(AppError::product_not_found());
                }
                db::update_product_fields(conn, id, &changes).await
            })
        })
        .await?;

    info!(id, "Updated product");

    Ok(Json(product))
}

// ── Delete ────────────────────────────────────────────────────────────────────

pub async fn delete_product(
    State(state): State<AppState>,
    id: ProductId,
) -> AppResult<StatusCode> {
    let id = id.get()?;
    state
        .db
        .with_write_connection(move |conn| {
            Box::pin(async move { db::delete_product(conn, id).await })
        })
        .await?;

    info!(id, "Deleted product");

    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use axum::{
        body::{to_bytes, Body},
        http::{header, Method, Request, StatusCode},
        Router,
    };
    use serde_json::{json, Value};
    use tempfile::{tempdir, TempDir};
    use tower::ServiceExt;
    use tower_http::normalize_path::NormalizePath;

    use crate::{build_app, db::Database, AppState};

    async fn test_app_with_db(prefix: &str) -> (NormalizePath<Router>, Database, TempDir) {
        let dir = tempdir().unwrap();
        let db = Database::connect(&dir.path().join("products.db"), 2)
            .await
            .expect("Failed to open test database");
        (build_app(AppState { db: db.clone() }, prefix), db, dir)
    }

    async fn test_app(prefix: &str) -> (NormalizePath<Router>, TempDir) {
        let (app, _db, dir) = test_app_with_db(prefix).await;
        (app, dir)
    }

    async fn send(
        app: &NormalizePath<Router>,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => request.body(Body::empty()),
        }
        .unwrap();

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn create(app: &NormalizePath<Router>, name: &str, price: f64, quantity: i64) -> Value {
        let (status, body) = send(
            app,
            Method::POST,
            "/products",
            Some(json!({ "name": name, "price": price, "quantity": quantity })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "create failed: {}", body);
        body
    }

    #[tokio::test]
    async fn health_reports_healthy() {
        let (app, _dir) = test_app("").await;
        let (status, body) = send(&app, Method::GET, "/", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "message": "Healthy" }));
    }

    #[tokio::test]
    async fn empty_store_lists_nothing_and_balances_to_zero() {
        let (app, _dir) = test_app("").await;

        let (status, body) = send(&app, Method::GET, "/products", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!([]));

        let (status, body) = send(&app, Method::GET, "/products/balance", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "total_balance": 0.0 }));
    }

    #[tokio::test]
    async fn create_then_get_returns_same_fields() {
        let (app, _dir) = test_app("").await;
        let created = create(&app, "Hammer", 12.5, 3).await;
        let id = created["id"].as_i64().unwrap();

        let (status, body) = send(&app, Method::GET, &format!("/products/{}", id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({ "id": id, "name": "Hammer", "price": 12.5, "quantity": 3 })
        );
    }

    #[tokio::test]
    async fn duplicate_names_are_allowed() {
        let (app, _dir) = test_app("").await;
        let a = create(&app, "Same", 1.0, 1).await;
        let b = create(&app, "Same", 1.0, 1).await;
        assert_ne!(a["id"], b["id"]);
    }

    #[tokio::test]
    async fn create_with_negative_values_is_rejected_and_store_unchanged() {
        let (app, _dir) = test_app("").await;
        let (status, body) = send(
            &app,
            Method::POST,
            "/products",
            Some(json!({ "name": "Bad", "price": -1.0, "quantity": -5 })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["errors"]["json"]["price"].is_array());
        assert!(body["errors"]["json"]["quantity"].is_array());

        let (_, list) = send(&app, Method::GET, "/products", None).await;
        assert_eq!(list, json!([]));
    }

    #[tokio::test]
    async fn create_with_missing_fields_lists_them() {
        let (app, _dir) = test_app("").await;
        let (status, body) = send(
            &app,
            Method::POST,
            "/products",
            Some(json!({ "name": "Only name" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(
            body["errors"]["json"]["price"][0],
            "Missing data for required field."
        );
        assert_eq!(
            body["errors"]["json"]["quantity"][0],
            "Missing data for required field."
        );
    }

    #[tokio::test]
    async fn get_missing_product_is_404() {
        let (app, _dir) = test_app("").await;
        let (status, body) = send(&app, Method::GET, "/products/42", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["message"], "Product not found");
    }

    #[tokio::test]
    async fn non_integer_id_is_rejected_by_router() {
        let (app, _dir) = test_app("").await;
        for uri in ["/products/abc", "/products/-1", "/products/1.5"] {
            let (status, body) = send(&app, Method::GET, uri, None).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{}", uri);
            assert_eq!(body["code"], 400, "{}", uri);
            assert_eq!(body["status"], "Bad Request");
            assert!(body["message"].is_string());
        }

        let (status, body) = send(&app, Method::DELETE, "/products/abc", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], 400);
    }

    #[tokio::test]
    async fn id_beyond_storable_range_is_404() {
        let (app, _dir) = test_app("").await;
        let uri = format!("/products/{}", u64::MAX);
        let (status, body) = send(&app, Method::GET, &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["message"], "Product not found");
    }

    #[tokio::test]
    async fn partial_update_leaves_other_fields() {
        let (app, _dir) = test_app("").await;
        let created = create(&app, "A", 1.0, 2).await;
        let id = created["id"].as_i64().unwrap();

        let (status, body) = send(
            &app,
            Method::PUT,
            &format!("/products/{}", id),
            Some(json!({ "price": 5.0 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({ "id": id, "name": "A", "price": 5.0, "quantity": 2 })
        );
    }

    #[tokio::test]
    async fn full_update_replaces_all_fields() {
        let (app, _dir) = test_app("").await;
        let created = create(&app, "A", 1.0, 2).await;
        let id = created["id"].as_i64().unwrap();

        let (status, body) = send(
            &app,
            Method::PUT,
            &format!("/products/{}", id),
            Some(json!({ "name": "B", "price": 0.5, "quantity": 10 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({ "id": id, "name": "B", "price": 0.5, "quantity": 10 })
        );
    }

    #[tokio::test]
    async fn empty_update_is_a_validation_error_even_for_missing_id() {
        let (app, _dir) = test_app("").await;
        let (status, body) =
            send(&app, Method::PUT, "/products/999", Some(json!({}))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(
            body["errors"]["json"]["_schema"][0],
            "No fields provided to update."
        );
    }

    #[tokio::test]
    async fn update_missing_product_is_404() {
        let (app, _dir) = test_app("").await;
        let (status, _) = send(
            &app,
            Method::PUT,
            "/products/999",
            Some(json!({ "quantity": 1 })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn negative_update_is_rejected_and_row_unchanged() {
        let (app, _dir) = test_app("").await;
        let created = create(&app, "A", 1.0, 2).await;
        let id = created["id"].as_i64().unwrap();
        let uri = format!("/products/{}", id);

        let (status, _) = send(&app, Method::PUT, &uri, Some(json!({ "quantity": -1 }))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let (_, body) = send(&app, Method::GET, &uri, None).await;
        assert_eq!(body, created);
    }

    #[tokio::test]
    async fn delete_twice_is_404_the_second_time() {
        let (app, _dir) = test_app("").await;
        let created = create(&app, "Temp", 1.0, 1).await;
        let uri = format!("/products/{}", created["id"]);

        let (status, body) = send(&app, Method::DELETE, &uri, None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(body, Value::Null);

        let (status, _) = send(&app, Method::DELETE, &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&app, Method::GET, &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn balance_sums_all_products() {
        let (app, _dir) = test_app("").await;
        create(&app, "A", 2.0, 3).await;
        create(&app, "B", 1.5, 2).await;

        let (status, body) = send(&app, Method::GET, "/products/balance", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total_balance"], 9.0);
    }

    #[tokio::test]
    async fn balance_storage_failure_is_a_safe_500() {
        let (app, db, _dir) = test_app_with_db("").await;
        create(&app, "A", 2.0, 3).await;
        sqlx::query("DROP TABLE products")
            .execute(db.pool())
            .await
            .unwrap();

        let (status, body) = send(&app, Method::GET, "/products/balance", None).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["code"], 500);
        assert_eq!(body["message"], "Failed to compute total balance");
        assert!(!body.to_string().contains("no such table"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_updates_to_one_product_all_succeed() {
        let (app, _dir) = test_app("").await;
        let created = create(&app, "Shared", 1.0, 0).await;
        let uri = format!("/products/{}", created["id"]);

        let mut tasks = Vec::new();
        for quantity in 0..40 {
            let app = app.clone();
            let uri = uri.clone();
            tasks.push(tokio::spawn(async move {
                send(&app, Method::PUT, &uri, Some(json!({ "quantity": quantity }))).await
            }));
        }

        for task in tasks {
            let (status, body) = task.await.unwrap();
            assert_eq!(status, StatusCode::OK, "update failed: {}", body);
        }

        let (status, body) = send(&app, Method::GET, &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "Shared");
        let quantity = body["quantity"].as_i64().unwrap();
        assert!((0..40).contains(&quantity));
    }

    #[tokio::test]
    async fn list_is_ordered_by_id_after_updates() {
        let (app, _dir) = test_app("").await;
        let first = create(&app, "Zeta", 1.0, 1).await;
        let second = create(&app, "Alpha", 1.0, 1).await;
        send(
            &app,
            Method::PUT,
            &format!("/products/{}", first["id"]),
            Some(json!({ "name": "Omega" })),
        )
        .await;

        let (_, body) = send(&app, Method::GET, "/products", None).await;
        let ids: Vec<i64> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|p| p["id"].as_i64().unwrap())
            .collect();
        assert_eq!(
            ids,
            vec![first["id"].as_i64().unwrap(), second["id"].as_i64().unwrap()]
        );
    }

    #[tokio::test]
    async fn trailing_slash_is_ignored() {
        let (app, _dir) = test_app("").await;
        create(&app, "A", 1.0, 1).await;

        let (status, body) = send(&app, Method::GET, "/products/", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn routes_mount_under_prefix() {
        let (app, _dir) = test_app("/api").await;

        let (status, body) = send(&app, Method::GET, "/api/", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Healthy");

        let (status, _) = send(&app, Method::GET, "/api/products", None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = send(&app, Method::GET, "/products", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn malformed_json_is_rejected() {
        let (app, _dir) = test_app("").await;
        let request = Request::builder()
            .method(Method::POST)
            .uri("/products")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
