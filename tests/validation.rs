use std::collections::HashSet;

use axum::extract::FromRequestParts;
use axum::http::{Request, StatusCode};
use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use utoipa::OpenApi;

use bookstore_api::{
    config::AppConfig,
    dto::{auth::Claims, books::UpdateBookRequest, orders::OrderItemRequest},
    error::AppError,
    middleware::auth::AuthUser,
    models::User,
    routes::{doc::ApiDoc, params::Pagination},
    services::{auth_service::issue_token, order_service::validate_items},
    state::AppState,
};

fn item(book_id: i64, quantity: i32) -> OrderItemRequest {
    OrderItemRequest { book_id, quantity }
}

#[test]
fn empty_item_list_is_rejected() {
    let err = validate_items(&[]).unwrap_err();
    match err {
        AppError::BadRequest(msg) => assert_eq!(msg, "items must be a non-empty array"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn zero_and_negative_quantities_are_rejected() {
    for quantity in [0, -3] {
        let err = validate_items(&[item(7, quantity)]).unwrap_err();
        match err {
            AppError::BadRequest(msg) => {
                assert_eq!(msg, "quantity must be at least 1 for book 7")
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}

#[test]
fn duplicate_book_ids_are_rejected() {
    let err = validate_items(&[item(1, 1), item(2, 1), item(1, 3)]).unwrap_err();
    match err {
        AppError::BadRequest(msg) => assert_eq!(msg, "Duplicate book 1 in order items"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn well_formed_items_pass_validation() {
    assert!(validate_items(&[item(1, 1), item(2, 5)]).is_ok());
}

#[test]
fn pagination_normalization_clamps_bounds() {
    let (page, per_page, offset) = Pagination {
        page: Some(0),
        per_page: Some(1000),
    }
    .normalize();
    assert_eq!((page, per_page, offset), (1, 100, 0));

    let (page, per_page, offset) = Pagination::default().normalize();
    assert_eq!((page, per_page, offset), (1, 20, 0));

    let (page, per_page, offset) = Pagination {
        page: Some(3),
        per_page: Some(10),
    }
    .normalize();
    assert_eq!((page, per_page, offset), (3, 10, 20));
}

#[test]
fn empty_book_patch_is_detected() {
    assert!(UpdateBookRequest::default().is_empty());

    let patch = UpdateBookRequest {
        title: Some("Refactoring".into()),
        ..Default::default()
    };
    assert!(!patch.is_empty());
}

#[test]
fn error_variants_map_to_expected_statuses() {
    assert_eq!(AppError::NotFound.status_code(), StatusCode::NOT_FOUND);
    assert_eq!(
        AppError::BadRequest("bad".into()).status_code(),
        StatusCode::BAD_REQUEST
    );
    assert_eq!(
        AppError::Unauthorized("no".into()).status_code(),
        StatusCode::UNAUTHORIZED
    );
    assert_eq!(AppError::Forbidden.status_code(), StatusCode::FORBIDDEN);
    assert_eq!(
        AppError::Conflict("taken".into()).status_code(),
        StatusCode::CONFLICT
    );
}

fn test_config(token_ttl_hours: i64) -> AppConfig {
    AppConfig {
        database_url: String::new(),
        host: "127.0.0.1".into(),
        port: 0,
        jwt_secret: "test-secret".into(),
        token_ttl_hours,
    }
}

fn test_user() -> User {
    User {
        id: 42,
        email: "reader@example.com".into(),
        name: "Reader".into(),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

/// State for driving the `AuthUser` extractor without a database: the lazy
/// pool never connects because the extractor only reads the config.
fn extractor_state(token_ttl_hours: i64) -> AppState {
    let pool = sqlx::postgres::PgPoolOptions::new()
        .connect_lazy("postgres://localhost:5432/unused")
        .expect("lazy pool");
    let orm = sea_orm::SqlxPostgresConnector::from_sqlx_postgres_pool(pool.clone());
    AppState {
        pool,
        orm,
        config: test_config(token_ttl_hours),
    }
}

async fn extract_auth(state: &AppState, request: Request<()>) -> Result<AuthUser, AppError> {
    let (mut parts, ()) = request.into_parts();
    AuthUser::from_request_parts(&mut parts, state).await
}

#[test]
fn issued_tokens_carry_subject_email_and_name() {
    let config = test_config(2);
    let user = test_user();

    let token = issue_token(&config, &user).unwrap();

    let decoded = decode::<Claims>(
        &token,
        &DecodingKey::from_secret(b"test-secret"),
        &Validation::new(Algorithm::HS256),
    )
    .unwrap();
    assert_eq!(decoded.claims.sub, "42");
    assert_eq!(decoded.claims.email, "reader@example.com");
    assert_eq!(decoded.claims.name, "Reader");
    assert!(decoded.claims.exp > Utc::now().timestamp() as usize);

    // A different secret must not verify.
    assert!(
        decode::<Claims>(
            &token,
            &DecodingKey::from_secret(b"wrong-secret"),
            &Validation::new(Algorithm::HS256),
        )
        .is_err()
    );
}

#[tokio::test]
async fn extractor_accepts_a_valid_bearer_token() {
    let state = extractor_state(2);
    let token = issue_token(&state.config, &test_user()).unwrap();

    let request = Request::builder()
        .header("Authorization", format!("Bearer {token}"))
        .body(())
        .unwrap();
    let auth = extract_auth(&state, request).await.unwrap();
    assert_eq!(auth.user_id, 42);
    assert_eq!(auth.email, "reader@example.com");
    assert_eq!(auth.name, "Reader");
}

#[tokio::test]
async fn extractor_rejects_missing_header_and_bad_scheme() {
    let state = extractor_state(2);

    let request = Request::builder().body(()).unwrap();
    match extract_auth(&state, request).await.unwrap_err() {
        AppError::Unauthorized(msg) => assert_eq!(msg, "Missing Authorization header"),
        other => panic!("unexpected error: {other:?}"),
    }

    let request = Request::builder()
        .header("Authorization", "Basic cmVhZGVyOnBhc3M=")
        .body(())
        .unwrap();
    match extract_auth(&state, request).await.unwrap_err() {
        AppError::Unauthorized(msg) => assert_eq!(msg, "Invalid Authorization scheme"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn extractor_rejects_expired_and_forged_tokens() {
    let state = extractor_state(2);

    // A token that expired two hours ago is past any default leeway.
    let expired = issue_token(&test_config(-2), &test_user()).unwrap();
    let request = Request::builder()
        .header("Authorization", format!("Bearer {expired}"))
        .body(())
        .unwrap();
    match extract_auth(&state, request).await.unwrap_err() {
        AppError::Unauthorized(msg) => assert_eq!(msg, "Invalid or expired token"),
        other => panic!("unexpected error: {other:?}"),
    }

    // Signed under a different secret.
    let forged = issue_token(
        &AppConfig {
            jwt_secret: "other-secret".into(),
            ..test_config(2)
        },
        &test_user(),
    )
    .unwrap();
    let request = Request::builder()
        .header("Authorization", format!("Bearer {forged}"))
        .body(())
        .unwrap();
    match extract_auth(&state, request).await.unwrap_err() {
        AppError::Unauthorized(msg) => assert_eq!(msg, "Invalid or expired token"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn openapi_document_has_no_dangling_schema_refs() {
    let doc = serde_json::to_value(ApiDoc::openapi()).expect("serializable document");

    let schemas: HashSet<String> = doc["components"]["schemas"]
        .as_object()
        .expect("schemas object")
        .keys()
        .cloned()
        .collect();

    let mut refs = Vec::new();
    collect_schema_refs(&doc, &mut refs);
    assert!(!refs.is_empty());
    for reference in refs {
        let name = reference.rsplit('/').next().unwrap();
        assert!(
            schemas.contains(name),
            "unresolved $ref {reference} in the OpenAPI document"
        );
    }
}

fn collect_schema_refs(value: &serde_json::Value, out: &mut Vec<String>) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, inner) in map {
                if key == "$ref" {
                    if let Some(path) = inner.as_str() {
                        if path.starts_with("#/components/schemas/") {
                            out.push(path.to_string());
                        }
                    }
                } else {
                    collect_schema_refs(inner, out);
                }
            }
        }
        serde_json::Value::Array(items) => {
            for inner in items {
                collect_schema_refs(inner, out);
            }
        }
        _ => {}
    }
}
