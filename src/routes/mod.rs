pub mod admin;
pub mod movies;
pub mod users;

use crate::auth::TokenService;
use crate::config::Config;
use crate::error::ApiError;
use actix_web::web;
use log::warn;

type Db = web::Data<sled::Db>;
type Tokens = web::Data<TokenService>;
type Settings = web::Data<Config>;

/// Registers every route plus the extractor settings that turn malformed
/// requests into JSON 400 responses.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().error_handler(|err, _req| {
        ApiError::Validation(format!("Invalid request body: {}", err)).into()
    }))
    .app_data(web::PathConfig::default().error_handler(|err, _req| {
        ApiError::Validation(format!("Invalid path: {}", err)).into()
    }))
    .app_data(web::QueryConfig::default().error_handler(|err, _req| {
        ApiError::Validation(format!("Invalid query: {}", err)).into()
    }));
    movies::configure(cfg);
    users::configure(cfg);
    admin::configure(cfg);
}

/// Runs storage work on the blocking pool, bounded by the request timeout.
///
/// A timed out closure is not cancelled; its write may still land.
async fn run_blocking<F, T>(settings: &Config, f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    match actix_rt::time::timeout(settings.request_timeout, web::block(f)).await {
        Ok(Ok(result)) => result,
        Ok(Err(err)) => Err(ApiError::Internal(format!("blocking task failed: {}", err))),
        Err(_) => {
            warn!(
                "storage work exceeded {:?}, giving up",
                settings.request_timeout
            );
            Err(ApiError::Timeout)
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::auth::hash_password;
    use crate::config::tests::test_config;
    use crate::database::UserDb;
    use crate::model::{Role, User};
    use actix_web::test::TestRequest;
    use chrono::Utc;
    use std::time::Duration;

    pub struct TestState {
        pub db: Db,
        pub tokens: Tokens,
        pub settings: Settings,
    }

    impl TestState {
        pub fn new() -> Self {
            let settings = test_config();
            TestState {
                db: web::Data::new(sled::Config::new().temporary(true).open().unwrap()),
                tokens: web::Data::new(TokenService::new(&settings.jwt_secret, settings.token_ttl)),
                settings: web::Data::new(settings),
            }
        }

        /// Stores a user with password "password" and returns its id and a
        /// bearer header value.
        pub fn user(&self, username: &str, role: Role) -> (u64, String) {
            let id = self
                .db
                .add_user(&User {
                    username: username.to_owned(),
                    email: format!("{}@example.com", username),
                    password_hash: hash_password("password", 4).unwrap(),
                    role,
                    created_at: Utc::now(),
                })
                .unwrap()
                .unwrap();
            let token = self.tokens.issue(id, role).unwrap();
            (id, format!("Bearer {}", token))
        }
    }

    macro_rules! test_app {
        ($state:expr) => {
            actix_web::test::init_service(
                actix_web::App::new()
                    .app_data($state.db.clone())
                    .app_data($state.tokens.clone())
                    .app_data($state.settings.clone())
                    .configure(crate::routes::configure),
            )
            .await
        };
    }
    pub(crate) use test_app;

    pub fn authorized(req: TestRequest, bearer: &str) -> TestRequest {
        req.insert_header(("Authorization", bearer.to_owned()))
    }

    #[actix_rt::test]
    async fn slow_storage_times_out() {
        let mut settings = test_config();
        settings.request_timeout = Duration::from_millis(20);
        let result = run_blocking(&settings, || {
            std::thread::sleep(Duration::from_millis(300));
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(ApiError::Timeout)));

        let result = run_blocking(&settings, || Ok(5)).await;
        assert_eq!(result.unwrap(), 5);
    }

    #[actix_rt::test]
    async fn malformed_body_is_a_bad_request() {
        let state = TestState::new();
        let (_, bearer) = state.user("foo", Role::User);
        let app = test_app!(state);
        let req = authorized(TestRequest::post().uri("/movies/1/reviews"), &bearer)
            .insert_header(("Content-Type", "application/json"))
            .set_payload("{not json")
            .to_request();
        let resp = actix_web::test::call_service(&app, req).await;
        assert_eq!(resp.status(), 400);
    }
}
