mod common;

use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};

use bookstore_api::{
    dto::{
        auth::RegisterRequest,
        books::CreateBookRequest,
        orders::{OrderItemRequest, PlaceOrderRequest},
    },
    entity::{AuditLogs, audit_logs},
    error::AppError,
    middleware::auth::AuthUser,
    services::{auth_service, book_service, order_service},
    state::AppState,
};

// Integration flow: register users -> stock the catalog -> place orders,
// exercising stock enforcement, atomicity, ownership and delete conflicts.
#[tokio::test]
async fn order_placement_flow_enforces_stock_and_ownership() -> anyhow::Result<()> {
    let Some(state) = common::setup_state().await? else {
        return Ok(());
    };

    let alice = register(&state, "alice@example.com", "Alice").await?;
    let bob = register(&state, "bob@example.com", "Bob").await?;

    let clean_code = create_book(
        &state,
        &alice,
        "Clean Code",
        "Robert C. Martin",
        Decimal::new(2999, 2),
        50,
    )
    .await?;
    let rare = create_book(
        &state,
        &alice,
        "Rare Volume",
        "Unknown",
        Decimal::new(12000, 2),
        2,
    )
    .await?;

    // Happy path: 2 x 29.99 + 1 x 120.00 = 179.98, snapshots and stock in step.
    let resp = order_service::place_order(
        &state,
        &alice,
        PlaceOrderRequest {
            items: vec![
                OrderItemRequest {
                    book_id: clean_code,
                    quantity: 2,
                },
                OrderItemRequest {
                    book_id: rare,
                    quantity: 1,
                },
            ],
        },
    )
    .await?;
    let detail = resp.data.expect("order detail");
    assert_eq!(detail.order.user_id, alice.user_id);
    assert_eq!(detail.order.status, "pending");
    assert_eq!(detail.order.total_amount, Decimal::new(17998, 2));
    assert_eq!(detail.items.len(), 2);

    let line_sum: Decimal = detail.items.iter().map(|i| i.line_total).sum();
    assert_eq!(line_sum, detail.order.total_amount);

    let first = &detail.items[0];
    assert_eq!(first.book_id, clean_code);
    assert_eq!(first.book_title, "Clean Code");
    assert_eq!(first.book_author, "Robert C. Martin");
    assert_eq!(first.unit_price, Decimal::new(2999, 2));
    assert_eq!(first.line_total, Decimal::new(5998, 2));

    assert_eq!(book_stock(&state, clean_code).await?, 48);
    assert_eq!(book_stock(&state, rare).await?, 1);

    // Requesting more than the shelf holds fails and decrements nothing.
    let err = order_service::place_order(
        &state,
        &alice,
        PlaceOrderRequest {
            items: vec![OrderItemRequest {
                book_id: rare,
                quantity: 3,
            }],
        },
    )
    .await
    .unwrap_err();
    match err {
        AppError::BadRequest(msg) => {
            assert_eq!(msg, format!("Insufficient stock for book {rare}"))
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(book_stock(&state, rare).await?, 1);

    // One unknown book id sinks the whole request, valid items included.
    let err = order_service::place_order(
        &state,
        &alice,
        PlaceOrderRequest {
            items: vec![
                OrderItemRequest {
                    book_id: clean_code,
                    quantity: 1,
                },
                OrderItemRequest {
                    book_id: 999_999,
                    quantity: 1,
                },
            ],
        },
    )
    .await
    .unwrap_err();
    match err {
        AppError::BadRequest(msg) => assert_eq!(msg, "Book 999999 not found"),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(book_stock(&state, clean_code).await?, 48);
    assert_eq!(order_count(&state).await?, 1);

    // Ownership: another user gets forbidden, a missing id gets not found.
    let err = order_service::get_my_order_detail(&state, &bob, detail.order.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden));

    let err = order_service::get_my_order_detail(&state, &bob, 404_404)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound));

    let reread = order_service::get_my_order_detail(&state, &alice, detail.order.id)
        .await?
        .data
        .expect("order detail");
    assert_eq!(reread.order.id, detail.order.id);
    assert_eq!(reread.items.len(), 2);

    // Summaries come back newest first.
    let second = order_service::place_order(
        &state,
        &alice,
        PlaceOrderRequest {
            items: vec![OrderItemRequest {
                book_id: rare,
                quantity: 1,
            }],
        },
    )
    .await?
    .data
    .expect("order detail");

    let list = order_service::list_my_orders(&state, &alice).await?;
    let meta = list.meta.expect("meta");
    let list = list.data.expect("order list");
    assert_eq!(list.items.len(), 2);
    assert_eq!(meta.total, Some(2));
    assert_eq!(list.items[0].id, second.order.id);
    assert!(list.items[0].id > list.items[1].id);

    // Two racers for the last copy: exactly one wins, stock lands at zero.
    let last_copy = create_book(
        &state,
        &alice,
        "Last Copy",
        "Small Press",
        Decimal::new(999, 2),
        1,
    )
    .await?;
    let request = || PlaceOrderRequest {
        items: vec![OrderItemRequest {
            book_id: last_copy,
            quantity: 1,
        }],
    };
    let (a, b) = tokio::join!(
        order_service::place_order(&state, &alice, request()),
        order_service::place_order(&state, &bob, request()),
    );
    assert_eq!(
        [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count(),
        1,
        "exactly one concurrent placement should win the last copy"
    );
    let loser = if a.is_ok() { b } else { a };
    match loser.unwrap_err() {
        AppError::BadRequest(msg) => {
            assert_eq!(msg, format!("Insufficient stock for book {last_copy}"))
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(book_stock(&state, last_copy).await?, 0);

    // A book held by order items refuses deletion; an untouched one goes.
    let err = book_service::delete_book(&state, &alice, clean_code)
        .await
        .unwrap_err();
    match err {
        AppError::Conflict(msg) => {
            assert_eq!(msg, "Cannot delete this book due to existing references")
        }
        other => panic!("unexpected error: {other:?}"),
    }

    let disposable = create_book(
        &state,
        &alice,
        "Unreferenced",
        "Nobody",
        Decimal::new(500, 2),
        5,
    )
    .await?;
    book_service::delete_book(&state, &alice, disposable).await?;
    let err = book_service::get_book(&state, disposable).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound));

    // Overlapping two-book orders, issued with their items in opposite
    // order, both commit: the locking read takes book rows in id order, so
    // neither placement can deadlock against the other.
    let tea_notes = create_book(
        &state,
        &alice,
        "Tea Notes",
        "Anonymous",
        Decimal::new(1500, 2),
        10,
    )
    .await?;
    let (a, b) = tokio::join!(
        order_service::place_order(
            &state,
            &alice,
            PlaceOrderRequest {
                items: vec![
                    OrderItemRequest {
                        book_id: clean_code,
                        quantity: 1,
                    },
                    OrderItemRequest {
                        book_id: tea_notes,
                        quantity: 1,
                    },
                ],
            },
        ),
        order_service::place_order(
            &state,
            &bob,
            PlaceOrderRequest {
                items: vec![
                    OrderItemRequest {
                        book_id: tea_notes,
                        quantity: 2,
                    },
                    OrderItemRequest {
                        book_id: clean_code,
                        quantity: 2,
                    },
                ],
            },
        ),
    );
    a?;
    b?;
    assert_eq!(book_stock(&state, clean_code).await?, 45);
    assert_eq!(book_stock(&state, tea_notes).await?, 7);

    // Every successful placement left an audit row.
    let audits = AuditLogs::find()
        .filter(audit_logs::Column::Action.eq("order_place"))
        .all(&state.orm)
        .await?;
    assert_eq!(audits.len(), 5);
    assert!(audits.iter().all(|row| row.resource.as_deref() == Some("orders")));

    Ok(())
}

async fn register(state: &AppState, email: &str, name: &str) -> anyhow::Result<AuthUser> {
    let resp = auth_service::register_user(
        state,
        RegisterRequest {
            email: email.into(),
            password: "password123".into(),
            name: name.into(),
        },
    )
    .await?;
    let auth = resp.data.expect("auth response");
    Ok(AuthUser {
        user_id: auth.user.id,
        email: auth.user.email,
        name: auth.user.name,
    })
}

async fn create_book(
    state: &AppState,
    user: &AuthUser,
    title: &str,
    author: &str,
    price: Decimal,
    stock: i32,
) -> anyhow::Result<i64> {
    let resp = book_service::create_book(
        state,
        user,
        CreateBookRequest {
            title: title.into(),
            author: author.into(),
            description: format!("{title} by {author}"),
            price,
            stock,
            cover_image: None,
        },
    )
    .await?;
    Ok(resp.data.expect("book").id)
}

async fn book_stock(state: &AppState, id: i64) -> anyhow::Result<i32> {
    let (stock,): (i32,) = sqlx::query_as("SELECT stock FROM books WHERE id = $1")
        .bind(id)
        .fetch_one(&state.pool)
        .await?;
    Ok(stock)
}

async fn order_count(state: &AppState) -> anyhow::Result<i64> {
    let (count,): (i64,) = sqlx::query_as("SELECT count(*) FROM orders")
        .fetch_one(&state.pool)
        .await?;
    Ok(count)
}
