mod auth;
mod config;
mod database;
mod error;
mod fts_tree;
mod model;
mod routes;
mod vote;

use actix_web::{middleware::Logger, web, App, HttpServer};
use auth::TokenService;
use chrono::Utc;
use config::{AdminSeed, Config};
use database::*;
use error::ApiError;
use log::{error, info};
use model::*;
use std::io;

fn log_error<E: std::fmt::Display>(err: E, message: &'static str) -> io::Error {
    error!("{}: {}", message, err);
    io::Error::new(io::ErrorKind::Other, message)
}

/// Creates the configured admin account unless its email is already taken.
fn bootstrap_admin(db: &sled::Db, seed: &AdminSeed, bcrypt_cost: u32) -> Result<(), ApiError> {
    if db.get_user_by_email(&seed.email)?.is_some() {
        return Ok(());
    }
    let admin = User {
        username: seed.username.clone(),
        email: seed.email.clone(),
        password_hash: auth::hash_password(&seed.password, bcrypt_cost)?,
        role: Role::Admin,
        created_at: Utc::now(),
    };
    match db.add_user(&admin)? {
        Some(id) => info!("created admin {} ({})", seed.username, id),
        None => error!(
            "could not create admin {}: username already taken",
            seed.username
        ),
    }
    Ok(())
}

#[actix_rt::main]
async fn main() -> io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("moviehub=debug,actix_web=info"),
    )
    .init();

    let config = Config::from_env().map_err(|err| log_error(err, "Configuration error"))?;
    info!("starting with {:?}", config);

    let db = config
        .open_db()
        .map_err(|err| log_error(err, "Database error"))?;
    if let Some(seed) = &config.admin {
        bootstrap_admin(&db, seed, config.bcrypt_cost)
            .map_err(|err| log_error(err, "Admin bootstrap error"))?;
    }

    let bind = (config.host.clone(), config.port);
    let db = web::Data::new(db);
    let tokens = web::Data::new(TokenService::new(&config.jwt_secret, config.token_ttl));
    let settings = web::Data::new(config);

    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .app_data(db.clone())
            .app_data(tokens.clone())
            .app_data(settings.clone())
            .configure(routes::configure)
    })
    .bind(bind)?
    .run()
    .await
}
