use std::collections::{HashMap, HashSet};

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::ActiveValue::NotSet;
use sea_orm::sea_query::Expr;
use sea_orm::sea_query::LockType;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set, TransactionTrait,
};

use crate::{
    audit::log_audit,
    dto::orders::{OrderDetail, OrderItemRequest, OrderList, PlaceOrderRequest},
    entity::{
        books::{Column as BookCol, Entity as Books, Model as BookModel},
        order_items::{
            ActiveModel as OrderItemActive, Column as OrderItemCol, Entity as OrderItems,
            Model as OrderItemModel,
        },
        orders::{ActiveModel as OrderActive, Column as OrderCol, Entity as Orders, Model as OrderModel},
    },
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::{Order, OrderItem},
    response::{ApiResponse, Meta},
    state::AppState,
};

/// Shape checks that need no database access: the item list must be
/// non-empty, every quantity at least 1, and no book id repeated.
pub fn validate_items(items: &[OrderItemRequest]) -> AppResult<()> {
    if items.is_empty() {
        return Err(AppError::BadRequest("items must be a non-empty array".into()));
    }

    let mut seen = HashSet::new();
    for item in items {
        if item.quantity < 1 {
            return Err(AppError::BadRequest(format!(
                "quantity must be at least 1 for book {}",
                item.book_id
            )));
        }
        if !seen.insert(item.book_id) {
            return Err(AppError::BadRequest(format!(
                "Duplicate book {} in order items",
                item.book_id
            )));
        }
    }
    Ok(())
}

pub async fn place_order(
    state: &AppState,
    user: &AuthUser,
    payload: PlaceOrderRequest,
) -> AppResult<ApiResponse<OrderDetail>> {
    let items = payload.items;
    validate_items(&items)?;

    let txn = state.orm.begin().await?;

    // Lock the book rows up front so concurrent placements against the same
    // books serialize on the stock check instead of both passing it. Locks
    // are taken in id order so overlapping placements cannot deadlock.
    let book_ids: Vec<i64> = items.iter().map(|it| it.book_id).collect();
    let book_map: HashMap<i64, BookModel> = Books::find()
        .filter(BookCol::Id.is_in(book_ids))
        .order_by_asc(BookCol::Id)
        .lock(LockType::Update)
        .all(&txn)
        .await?
        .into_iter()
        .map(|b| (b.id, b))
        .collect();

    // Validate everything before writing anything. An early return drops the
    // transaction, which rolls it back.
    let mut resolved: Vec<(&OrderItemRequest, &BookModel)> = Vec::with_capacity(items.len());
    for item in &items {
        match book_map.get(&item.book_id) {
            Some(book) => resolved.push((item, book)),
            None => {
                return Err(AppError::BadRequest(format!(
                    "Book {} not found",
                    item.book_id
                )));
            }
        }
    }
    for (item, book) in &resolved {
        if book.stock < item.quantity {
            return Err(AppError::BadRequest(format!(
                "Insufficient stock for book {}",
                book.id
            )));
        }
    }

    let order = OrderActive {
        id: NotSet,
        user_id: Set(user.user_id),
        total_amount: Set(Decimal::ZERO),
        status: Set("pending".into()),
        created_at: NotSet,
        updated_at: NotSet,
    }
    .insert(&txn)
    .await?;

    let mut total = Decimal::ZERO;
    for (item, book) in &resolved {
        let unit_price = book.price;
        let line_total = unit_price * Decimal::from(item.quantity);
        total += line_total;

        OrderItemActive {
            id: NotSet,
            order_id: Set(order.id),
            book_id: Set(item.book_id),
            quantity: Set(item.quantity),
            unit_price: Set(unit_price),
            line_total: Set(line_total),
            created_at: NotSet,
            updated_at: NotSet,
        }
        .insert(&txn)
        .await?;

        // reduce stock under the lock taken above
        Books::update_many()
            .col_expr(BookCol::Stock, Expr::col(BookCol::Stock).sub(item.quantity))
            .filter(BookCol::Id.eq(item.book_id))
            .exec(&txn)
            .await?;
    }

    let mut active: OrderActive = order.into();
    active.total_amount = Set(total);
    active.updated_at = Set(Utc::now().into());
    let order = active.update(&txn).await?;

    let detail = match find_order_with_items(&txn, order.id).await? {
        Some(detail) => detail,
        None => {
            return Err(AppError::Internal(anyhow::anyhow!(
                "order {} missing inside its own transaction",
                order.id
            )));
        }
    };

    txn.commit().await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "order_place",
        Some("orders"),
        Some(serde_json::json!({
            "order_id": detail.order.id,
            "total_amount": detail.order.total_amount,
        })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Order placed",
        detail,
        Some(Meta::empty()),
    ))
}

pub async fn list_my_orders(
    state: &AppState,
    user: &AuthUser,
) -> AppResult<ApiResponse<OrderList>> {
    let orders: Vec<Order> = Orders::find()
        .filter(OrderCol::UserId.eq(user.user_id))
        .order_by_desc(OrderCol::Id)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(order_from_entity)
        .collect();

    let total = orders.len() as i64;
    Ok(ApiResponse::success(
        "Ok",
        OrderList { items: orders },
        Some(Meta::total_only(total)),
    ))
}

pub async fn get_my_order_detail(
    state: &AppState,
    user: &AuthUser,
    id: i64,
) -> AppResult<ApiResponse<OrderDetail>> {
    let detail = match find_order_with_items(&state.orm, id).await? {
        Some(detail) => detail,
        None => return Err(AppError::NotFound),
    };

    // Existence is reported before ownership, so a missing id reads the same
    // for every caller.
    if detail.order.user_id != user.user_id {
        return Err(AppError::Forbidden);
    }

    Ok(ApiResponse::success("OK", detail, Some(Meta::empty())))
}

/// Composes an order with its items, each item carrying the referenced
/// book's current title and author. Works inside or outside a transaction.
pub async fn find_order_with_items<C>(conn: &C, id: i64) -> AppResult<Option<OrderDetail>>
where
    C: ConnectionTrait,
{
    let order = match Orders::find_by_id(id).one(conn).await? {
        Some(order) => order,
        None => return Ok(None),
    };

    let rows = OrderItems::find()
        .find_also_related(Books)
        .filter(OrderItemCol::OrderId.eq(order.id))
        .order_by_asc(OrderItemCol::Id)
        .all(conn)
        .await?;

    let mut items = Vec::with_capacity(rows.len());
    for (item, book) in rows {
        let book = book.ok_or_else(|| {
            AppError::Internal(anyhow::anyhow!("order item {} has no book row", item.id))
        })?;
        items.push(order_item_from_entity(item, &book));
    }

    Ok(Some(OrderDetail {
        order: order_from_entity(order),
        items,
    }))
}

fn order_from_entity(model: OrderModel) -> Order {
    Order {
        id: model.id,
        user_id: model.user_id,
        total_amount: model.total_amount,
        status: model.status,
        created_at: model.created_at.with_timezone(&Utc),
        updated_at: model.updated_at.with_timezone(&Utc),
    }
}

fn order_item_from_entity(model: OrderItemModel, book: &BookModel) -> OrderItem {
    OrderItem {
        id: model.id,
        book_id: model.book_id,
        book_title: book.title.clone(),
        book_author: book.author.clone(),
        quantity: model.quantity,
        unit_price: model.unit_price,
        line_total: model.line_total,
        created_at: model.created_at.with_timezone(&Utc),
        updated_at: model.updated_at.with_timezone(&Utc),
    }
}
