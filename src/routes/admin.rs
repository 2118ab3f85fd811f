//! Catalog maintenance and user lookup, restricted to admins.
//!
//! The admin check uses the role currently stored for the caller.

use super::{run_blocking, Db, Settings};
use crate::auth::{resolve_identity, Bearer, Identity};
use crate::database::{MovieDb, UserDb};
use crate::error::ApiError;
use crate::model::{MovieDetails, Role, UserProfile};
use actix_web::{web, HttpResponse};
use log::info;
use serde_json::json;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/admin")
            .route("/movies", web::post().to(create_movie))
            .route("/movies/{id}", web::put().to(update_movie))
            .route("/movies/{id}", web::delete().to(delete_movie))
            .route("/users", web::get().to(list_users))
            .route("/users/{id}", web::get().to(get_user))
            .route("/users/{id}", web::delete().to(delete_user)),
    );
}

fn admin(db: &sled::Db, bearer: &Bearer) -> Result<Identity, ApiError> {
    let identity = resolve_identity(db, bearer.claims())?
        .ok_or_else(|| ApiError::unauthorized("User not found"))?;
    identity.require_admin()?;
    Ok(identity)
}

async fn create_movie(
    bearer: Bearer,
    details: web::Json<MovieDetails>,
    db: Db,
    settings: Settings,
) -> actix_web::Result<HttpResponse> {
    let details = details.into_inner();
    details.validate()?;
    let (identity, movie) = run_blocking(&settings, move || {
        let identity = admin(&db, &bearer)?;
        Ok((identity, db.add_movie(details)?))
    })
    .await?;
    info!("{} created movie {}", identity.username, movie.id);
    Ok(HttpResponse::Created().json(movie))
}

async fn update_movie(
    bearer: Bearer,
    id: web::Path<u64>,
    details: web::Json<MovieDetails>,
    db: Db,
    settings: Settings,
) -> actix_web::Result<HttpResponse> {
    let id = id.into_inner();
    let details = details.into_inner();
    details.validate()?;
    let (identity, movie) = run_blocking(&settings, move || {
        let identity = admin(&db, &bearer)?;
        Ok((identity, db.replace_movie_details(id, details)?))
    })
    .await?;
    info!("{} updated movie {}", identity.username, id);
    Ok(HttpResponse::Ok().json(movie))
}

async fn delete_movie(
    bearer: Bearer,
    id: web::Path<u64>,
    db: Db,
    settings: Settings,
) -> actix_web::Result<HttpResponse> {
    let id = id.into_inner();
    let identity = run_blocking(&settings, move || {
        let identity = admin(&db, &bearer)?;
        db.remove_movie(id)?
            .ok_or_else(|| ApiError::not_found("Movie not found"))?;
        Ok(identity)
    })
    .await?;
    info!("{} deleted movie {}", identity.username, id);
    Ok(HttpResponse::Ok().json(json!({ "message": "Movie deleted successfully" })))
}

async fn list_users(bearer: Bearer, db: Db, settings: Settings) -> actix_web::Result<HttpResponse> {
    let users = run_blocking(&settings, move || {
        admin(&db, &bearer)?;
        Ok(db
            .users()?
            .into_iter()
            .filter(|(_, user)| user.role == Role::User)
            .map(|(id, user)| UserProfile::new(id, user))
            .collect::<Vec<_>>())
    })
    .await?;
    Ok(HttpResponse::Ok().json(users))
}

async fn get_user(
    bearer: Bearer,
    id: web::Path<u64>,
    db: Db,
    settings: Settings,
) -> actix_web::Result<HttpResponse> {
    let id = id.into_inner();
    let user = run_blocking(&settings, move || {
        admin(&db, &bearer)?;
        db.get_user(id)?
            .ok_or_else(|| ApiError::not_found("User not found"))
    })
    .await?;
    Ok(HttpResponse::Ok().json(UserProfile::new(id, user)))
}

async fn delete_user(
    bearer: Bearer,
    id: web::Path<u64>,
    db: Db,
    settings: Settings,
) -> actix_web::Result<HttpResponse> {
    let id = id.into_inner();
    let (identity, user) = run_blocking(&settings, move || {
        let identity = admin(&db, &bearer)?;
        let user = db
            .remove_user(id)?
            .ok_or_else(|| ApiError::not_found("User not found"))?;
        Ok((identity, user))
    })
    .await?;
    info!("{} deleted user {} ({})", identity.username, id, user.username);
    Ok(HttpResponse::Ok().json(json!({ "message": "User deleted successfully" })))
}
