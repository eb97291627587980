use chrono::Utc;
use sea_orm::{DatabaseConnection, EntityTrait, Set, sea_query::OnConflict};
use secrecy::ExposeSecret;
use storefront_checkout::{
    config::AppConfig,
    db::{create_orm_conn, run_migrations},
    entity::{
        Products,
        products::{ActiveModel as ProductActive, Column as ProdCol},
    },
    middleware::auth::{ADMIN_ROLE, issue_token},
};
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env()?;

    let orm = create_orm_conn(&config.database_url).await?;
    run_migrations(&orm).await?;

    seed_products(&orm).await?;

    // Demo identities for trying the API locally.
    let secret = config.jwt_secret.expose_secret();
    let ttl = chrono::Duration::days(7);
    let user_id = Uuid::now_v7();
    let admin_id = Uuid::now_v7();
    let user_token = issue_token(secret, user_id, "user", ttl)?;
    let admin_token = issue_token(secret, admin_id, ADMIN_ROLE, ttl)?;

    println!("Seed completed.");
    println!("User  {user_id}: {user_token}");
    println!("Admin {admin_id}: {admin_token}");
    Ok(())
}

async fn seed_products(orm: &DatabaseConnection) -> anyhow::Result<()> {
    // prices in yen, which has no minor unit
    let products = vec![
        ("Axum Hoodie", "Warm hoodie for Rustaceans", 5500, 50),
        ("Ferris Mug", "Coffee tastes better with Ferris", 1200, 100),
        ("Rust Sticker Pack", "Decorate your laptop", 500, 200),
        ("E-book: Async Rust", "Learn async Rust patterns", 2500, 75),
    ];

    for (name, desc, price, stock) in products {
        Products::insert(ProductActive {
            id: Set(Uuid::now_v7()),
            name: Set(name.to_string()),
            description: Set(Some(desc.to_string())),
            price: Set(price),
            stock: Set(stock),
            created_at: Set(Utc::now().into()),
        })
        .on_conflict(OnConflict::column(ProdCol::Name).do_nothing().to_owned())
        .exec_without_returning(orm)
        .await?;
    }

    println!("Seeded products");
    Ok(())
}
