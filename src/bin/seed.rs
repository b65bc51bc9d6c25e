use argon2::{
    Argon2, PasswordHasher,
    password_hash::{SaltString, rand_core::OsRng},
};
use bookstore_api::{config::AppConfig, db::create_pool};
use rust_decimal::Decimal;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env()?;

    let pool = create_pool(&config.database_url).await?;
    // Ensure migrations are applied.
    sqlx::migrate!("./migrations").run(&pool).await?;

    let user_id = ensure_user(&pool, "user@example.com", "user123", "Demo User").await?;
    seed_books(&pool).await?;

    println!("Seed completed. Demo user ID: {user_id}");
    Ok(())
}

async fn ensure_user(
    pool: &sqlx::PgPool,
    email: &str,
    password: &str,
    name: &str,
) -> anyhow::Result<i64> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let password_hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!(e.to_string()))?
        .to_string();

    let row: Option<(i64,)> = sqlx::query_as(
        r#"
        INSERT INTO users (email, password_hash, name)
        VALUES ($1, $2, $3)
        ON CONFLICT (email) DO NOTHING
        RETURNING id
        "#,
    )
    .bind(email)
    .bind(password_hash)
    .bind(name)
    .fetch_optional(pool)
    .await?;

    // If user already exists, fetch id
    let user_id = match row {
        Some((id,)) => id,
        None => {
            let existing: (i64,) = sqlx::query_as("SELECT id FROM users WHERE email = $1")
                .bind(email)
                .fetch_one(pool)
                .await?;
            existing.0
        }
    };

    println!("Ensured user {email}");
    Ok(user_id)
}

async fn seed_books(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    let books = vec![
        (
            "Clean Code",
            "Robert C. Martin",
            "A Handbook of Agile Software Craftsmanship with best practices for writing clean, maintainable code.",
            Decimal::new(2999, 2),
            50,
            Some("https://images-na.ssl-images-amazon.com/images/I/41xShlnTZTL._SX374_BO1,204,203,200_.jpg"),
        ),
        (
            "The Pragmatic Programmer",
            "Andrew Hunt, David Thomas",
            "Journey to Mastery with timeless practical advice for software developers.",
            Decimal::new(3499, 2),
            40,
            Some("https://images-na.ssl-images-amazon.com/images/I/518FqJvR9aL._SX377_BO1,204,203,200_.jpg"),
        ),
        (
            "Design Patterns",
            "Erich Gamma, Richard Helm, Ralph Johnson, John Vlissides",
            "Elements of Reusable Object-Oriented Software covering classic design patterns.",
            Decimal::new(3999, 2),
            30,
            Some("https://images-na.ssl-images-amazon.com/images/I/41gtGZ2bS-L._SX396_BO1,204,203,200_.jpg"),
        ),
        (
            "You Don't Know JS Yet: Scope & Closures",
            "Kyle Simpson",
            "Deep dive into JavaScript fundamentals focusing on scope and closures.",
            Decimal::new(1999, 2),
            100,
            Some("https://images-na.ssl-images-amazon.com/images/I/41kTnJz4vWL._SX331_BO1,204,203,200_.jpg"),
        ),
    ];

    for (title, author, description, price, stock, cover_image) in books {
        // Titles carry no unique constraint, so skip ones already present.
        let existing: Option<(i64,)> = sqlx::query_as("SELECT id FROM books WHERE title = $1")
            .bind(title)
            .fetch_optional(pool)
            .await?;
        if existing.is_some() {
            continue;
        }

        sqlx::query(
            r#"
            INSERT INTO books (title, author, description, price, stock, cover_image)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(title)
        .bind(author)
        .bind(description)
        .bind(price)
        .bind(stock)
        .bind(cover_image)
        .execute(pool)
        .await?;
    }

    println!("Seeded books");
    Ok(())
}
