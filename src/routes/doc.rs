use axum::Json;
use utoipa::{
    Modify, OpenApi,
    openapi::{
        self,
        OpenApi as OpenApiSpec,
        security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    },
};
use utoipa_scalar::{Scalar, Servable};

use crate::{
    dto::{
        auth::{AuthResponse, LoginRequest, RegisterRequest},
        books::{BookList, CreateBookRequest, UpdateBookRequest},
        orders::{OrderDetail, OrderItemRequest, OrderList, PlaceOrderRequest},
    },
    models::{Book, Order, OrderItem, User},
    response::{ApiResponse, Meta},
    routes::{auth, books, health, orders, params},
};

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health_check,
        auth::register,
        auth::login,
        auth::me,
        books::list_books,
        books::get_book,
        books::create_book,
        books::update_book,
        books::delete_book,
        orders::place_order,
        orders::list_orders,
        orders::get_order
    ),
    components(
        schemas(
            User,
            Book,
            Order,
            OrderItem,
            RegisterRequest,
            LoginRequest,
            AuthResponse,
            CreateBookRequest,
            UpdateBookRequest,
            BookList,
            OrderItemRequest,
            PlaceOrderRequest,
            OrderList,
            OrderDetail,
            params::Pagination,
            params::BookQuery,
            Meta,
            health::HealthData,
            ApiResponse<Book>,
            ApiResponse<BookList>,
            ApiResponse<AuthResponse>,
            ApiResponse<OrderDetail>,
            ApiResponse<OrderList>,
            ApiResponse<User>,
            ApiResponse<health::HealthData>
        )
    ),
    security(
        ("bearer_auth" = [])
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Health check endpoint"),
        (name = "Auth", description = "Authentication endpoints"),
        (name = "Books", description = "Endpoints for browsing and managing books"),
        (name = "Orders", description = "Endpoints for placing and reading orders"),
    )
)]
pub struct ApiDoc;

pub fn scalar_docs() -> Scalar<OpenApiSpec> {
    Scalar::with_url("/docs", ApiDoc::openapi())
}

pub async fn openapi_json() -> Json<OpenApiSpec> {
    Json(ApiDoc::openapi())
}
