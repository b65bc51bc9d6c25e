use rust_decimal::Decimal;

use crate::{
    audit::log_audit,
    entity::books::{ActiveModel, Column, Entity as Books, Model as BookModel},
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::Book,
    response::{ApiResponse, Meta},
    routes::params::{BookQuery, BookSortBy, Pagination, SortOrder},
    state::AppState,
};
use crate::dto::books::{BookList, CreateBookRequest, UpdateBookRequest};
use chrono::Utc;
use sea_orm::ActiveValue::NotSet;
use sea_orm::sea_query::Expr;
use sea_orm::sea_query::extension::postgres::PgExpr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect, Set, SqlErr,
};

pub async fn list_books(
    state: &AppState,
    pagination: Pagination,
    query: BookQuery,
) -> AppResult<ApiResponse<BookList>> {
    let (page, limit, offset) = pagination.normalize();
    let mut condition = Condition::all();

    if let Some(search) = query.q.as_ref().filter(|s| !s.is_empty()) {
        let pattern = format!("%{}%", search);
        condition = condition.add(
            Condition::any()
                .add(Expr::col(Column::Title).ilike(pattern.clone()))
                .add(Expr::col(Column::Author).ilike(pattern)),
        );
    }

    if let Some(author) = query.author.as_ref().filter(|s| !s.is_empty()) {
        condition = condition.add(Expr::col(Column::Author).ilike(format!("%{}%", author)));
    }

    if let Some(min_price) = query.min_price {
        condition = condition.add(Column::Price.gte(min_price));
    }

    if let Some(max_price) = query.max_price {
        condition = condition.add(Column::Price.lte(max_price));
    }

    let sort_by = query.sort_by.unwrap_or(BookSortBy::CreatedAt);
    let sort_order = query.sort_order.unwrap_or(SortOrder::Desc);
    let sort_col = match sort_by {
        BookSortBy::CreatedAt => Column::CreatedAt,
        BookSortBy::Price => Column::Price,
        BookSortBy::Title => Column::Title,
    };

    let mut finder = Books::find().filter(condition);
    finder = match sort_order {
        SortOrder::Asc => finder.order_by_asc(sort_col),
        SortOrder::Desc => finder.order_by_desc(sort_col),
    };

    let total = finder.clone().count(&state.orm).await? as i64;

    let items = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(book_from_entity)
        .collect();

    let meta = Meta::new(page, limit, total);
    let data = BookList { items };
    Ok(ApiResponse::success("Books", data, Some(meta)))
}

pub async fn get_book(state: &AppState, id: i64) -> AppResult<ApiResponse<Book>> {
    let result = Books::find_by_id(id)
        .one(&state.orm)
        .await?
        .map(book_from_entity);
    let result = match result {
        Some(b) => b,
        None => return Err(AppError::NotFound),
    };
    Ok(ApiResponse::success("Book", result, None))
}

pub async fn create_book(
    state: &AppState,
    user: &AuthUser,
    payload: CreateBookRequest,
) -> AppResult<ApiResponse<Book>> {
    if payload.title.is_empty() || payload.author.is_empty() || payload.description.is_empty() {
        return Err(AppError::BadRequest(
            "title, author, description, price, stock are required".into(),
        ));
    }
    validate_amounts(Some(payload.price), Some(payload.stock))?;

    let active = ActiveModel {
        id: NotSet,
        title: Set(payload.title),
        author: Set(payload.author),
        description: Set(payload.description),
        price: Set(payload.price),
        stock: Set(payload.stock),
        cover_image: Set(payload.cover_image),
        created_at: NotSet,
        updated_at: NotSet,
    };
    let book = active.insert(&state.orm).await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "book_create",
        Some("books"),
        Some(serde_json::json!({ "book_id": book.id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Book created",
        book_from_entity(book),
        Some(Meta::empty()),
    ))
}

pub async fn update_book(
    state: &AppState,
    user: &AuthUser,
    id: i64,
    payload: UpdateBookRequest,
) -> AppResult<ApiResponse<Book>> {
    if payload.is_empty() {
        return Err(AppError::BadRequest("No fields to update".into()));
    }
    validate_amounts(payload.price, payload.stock)?;

    let existing = Books::find_by_id(id).one(&state.orm).await?;
    let existing = match existing {
        Some(b) => b,
        None => return Err(AppError::NotFound),
    };

    let mut active: ActiveModel = existing.into();
    if let Some(title) = payload.title {
        active.title = Set(title);
    }
    if let Some(author) = payload.author {
        active.author = Set(author);
    }
    if let Some(description) = payload.description {
        active.description = Set(description);
    }
    if let Some(price) = payload.price {
        active.price = Set(price);
    }
    if let Some(stock) = payload.stock {
        active.stock = Set(stock);
    }
    if let Some(cover_image) = payload.cover_image {
        active.cover_image = Set(Some(cover_image));
    }
    active.updated_at = Set(Utc::now().into());

    let book = active.update(&state.orm).await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "book_update",
        Some("books"),
        Some(serde_json::json!({ "book_id": book.id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Updated",
        book_from_entity(book),
        Some(Meta::empty()),
    ))
}

pub async fn delete_book(
    state: &AppState,
    user: &AuthUser,
    id: i64,
) -> AppResult<ApiResponse<serde_json::Value>> {
    // Referenced order items hold the book with ON DELETE RESTRICT; surface
    // that as a conflict instead of a generic database error.
    let result = match Books::delete_by_id(id).exec(&state.orm).await {
        Ok(result) => result,
        Err(err) => {
            return Err(match err.sql_err() {
                Some(SqlErr::ForeignKeyConstraintViolation(_)) => AppError::Conflict(
                    "Cannot delete this book due to existing references".into(),
                ),
                _ => err.into(),
            });
        }
    };

    if result.rows_affected == 0 {
        return Err(AppError::NotFound);
    }

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "book_delete",
        Some("books"),
        Some(serde_json::json!({ "book_id": id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Deleted",
        serde_json::json!({}),
        Some(Meta::empty()),
    ))
}

fn validate_amounts(price: Option<Decimal>, stock: Option<i32>) -> Result<(), AppError> {
    if let Some(price) = price {
        if price.is_sign_negative() {
            return Err(AppError::BadRequest("price must be non-negative".into()));
        }
    }
    if let Some(stock) = stock {
        if stock < 0 {
            return Err(AppError::BadRequest("stock must be non-negative".into()));
        }
    }
    Ok(())
}

fn book_from_entity(model: BookModel) -> Book {
    Book {
        id: model.id,
        title: model.title,
        author: model.author,
        description: model.description,
        price: model.price,
        stock: model.stock,
        cover_image: model.cover_image,
        created_at: model.created_at.with_timezone(&Utc),
        updated_at: model.updated_at.with_timezone(&Utc),
    }
}
