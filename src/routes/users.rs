use super::{run_blocking, Db, Settings, Tokens};
use crate::auth::{hash_password, verify_password, Bearer};
use crate::database::UserDb;
use crate::error::ApiError;
use crate::model::{Role, User, UserProfile};
use actix_web::{web, HttpResponse};
use chrono::Utc;
use log::info;
use serde::Deserialize;
use serde_json::json;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/users")
            .route("/register", web::post().to(register))
            .route("/login", web::post().to(login))
            .route("/profile", web::get().to(profile))
            .route("/update-password", web::put().to(update_password)),
    );
}

fn required(field: &str, value: Option<String>) -> Result<String, ApiError> {
    value
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| ApiError::Validation(format!("{} is required", field)))
}

#[derive(Deserialize)]
struct RegisterParams {
    username: Option<String>,
    email: Option<String>,
    password: Option<String>,
}

async fn register(
    params: web::Json<RegisterParams>,
    db: Db,
    settings: Settings,
) -> actix_web::Result<HttpResponse> {
    let params = params.into_inner();
    let username = required("username", params.username)?.trim().to_owned();
    let email = required("email", params.email)?.trim().to_owned();
    let password = required("password", params.password)?;
    let cost = settings.bcrypt_cost;
    let id = run_blocking(&settings, move || {
        let user = User {
            username,
            email,
            password_hash: hash_password(&password, cost)?,
            role: Role::User,
            created_at: Utc::now(),
        };
        db.add_user(&user)?
            .ok_or_else(|| ApiError::validation("User already exists"))
    })
    .await?;
    info!("registered user {}", id);
    Ok(HttpResponse::Created().json(json!({ "message": "User registered successfully" })))
}

#[derive(Deserialize)]
struct LoginParams {
    email: String,
    password: String,
}

async fn login(
    params: web::Json<LoginParams>,
    db: Db,
    tokens: Tokens,
    settings: Settings,
) -> actix_web::Result<HttpResponse> {
    let LoginParams { email, password } = params.into_inner();
    let (id, user) = run_blocking(&settings, move || {
        if let Some((id, user)) = db.get_user_by_email(&email)? {
            if verify_password(&password, &user.password_hash)? {
                return Ok((id, user));
            }
        }
        Err(ApiError::unauthorized("Invalid credentials"))
    })
    .await?;
    let token = tokens.issue(id, user.role)?;
    Ok(HttpResponse::Ok().json(json!({ "token": token, "role": user.role })))
}

async fn profile(bearer: Bearer, db: Db, settings: Settings) -> actix_web::Result<HttpResponse> {
    let id = bearer.claims().user_id()?;
    let user = run_blocking(&settings, move || {
        db.get_user(id)?
            .ok_or_else(|| ApiError::not_found("User not found"))
    })
    .await?;
    Ok(HttpResponse::Ok().json(UserProfile::new(id, user)))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PasswordParams {
    current_password: Option<String>,
    new_password: Option<String>,
}

async fn update_password(
    bearer: Bearer,
    params: web::Json<PasswordParams>,
    db: Db,
    settings: Settings,
) -> actix_web::Result<HttpResponse> {
    let id = bearer.claims().user_id()?;
    let params = params.into_inner();
    let (current, new) = match (params.current_password, params.new_password) {
        (Some(current), Some(new)) if !current.is_empty() && !new.is_empty() => (current, new),
        _ => {
            return Err(
                ApiError::validation("Current and new passwords are required").into(),
            )
        }
    };
    let cost = settings.bcrypt_cost;
    run_blocking(&settings, move || {
        let mut user = db
            .get_user(id)?
            .ok_or_else(|| ApiError::not_found("User not found"))?;
        if !verify_password(&current, &user.password_hash)? {
            return Err(ApiError::validation("Current password is incorrect"));
        }
        user.password_hash = hash_password(&new, cost)?;
        db.update_user(id, &user)?;
        Ok(())
    })
    .await?;
    info!("user {} changed their password", id);
    Ok(HttpResponse::Ok().json(json!({ "message": "Password updated successfully" })))
}
