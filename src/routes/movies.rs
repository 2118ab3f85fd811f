//! Public catalog routes and the review endpoints nested under a movie.

use super::{run_blocking, Db, Settings};
use crate::auth::{resolve_identity, Bearer};
use crate::database::{MovieDb, ReviewDb};
use crate::error::ApiError;
use crate::model::ReviewDraft;
use crate::vote::VoteDirection;
use actix_web::{web, HttpResponse};
use log::info;
use serde::Deserialize;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/movies")
            .route("", web::get().to(list_movies))
            .route("/featured-random", web::get().to(featured_movie))
            .route("/search", web::get().to(search_movies))
            .route("/category", web::get().to(list_genres))
            .route("/category/{genre}", web::get().to(movies_by_genre))
            .route("/{id}", web::get().to(get_movie))
            .route("/{id}/reviews", web::get().to(list_reviews))
            .route("/{id}/reviews", web::post().to(create_review))
            .route("/{movie_id}/reviews/{review_id}", web::get().to(get_review))
            .route(
                "/{movie_id}/reviews/{review_id}/like",
                web::post().to(like_review),
            )
            .route(
                "/{movie_id}/reviews/{review_id}/dislike",
                web::post().to(dislike_review),
            ),
    );
}

async fn list_movies(db: Db, settings: Settings) -> actix_web::Result<HttpResponse> {
    let movies = run_blocking(&settings, move || Ok(db.movies()?)).await?;
    Ok(HttpResponse::Ok().json(movies))
}

async fn featured_movie(db: Db, settings: Settings) -> actix_web::Result<HttpResponse> {
    let movie = run_blocking(&settings, move || {
        db.random_movie()?
            .ok_or_else(|| ApiError::not_found("No movie found"))
    })
    .await?;
    Ok(HttpResponse::Ok().json(movie))
}

#[derive(Deserialize)]
struct SearchParams {
    query: Option<String>,
}

async fn search_movies(
    params: web::Query<SearchParams>,
    db: Db,
    settings: Settings,
) -> actix_web::Result<HttpResponse> {
    let query = params
        .into_inner()
        .query
        .filter(|query| !query.trim().is_empty())
        .ok_or_else(|| ApiError::validation("Query parameter is required"))?;
    let movies = run_blocking(&settings, move || Ok(db.search_movies(&query)?)).await?;
    Ok(HttpResponse::Ok().json(movies))
}

async fn list_genres(db: Db, settings: Settings) -> actix_web::Result<HttpResponse> {
    let genres = run_blocking(&settings, move || Ok(db.genres()?)).await?;
    Ok(HttpResponse::Ok().json(genres))
}

async fn movies_by_genre(
    genre: web::Path<String>,
    db: Db,
    settings: Settings,
) -> actix_web::Result<HttpResponse> {
    let genre = genre.into_inner();
    let movies = run_blocking(&settings, move || Ok(db.movies_by_genre(&genre)?)).await?;
    Ok(HttpResponse::Ok().json(movies))
}

async fn get_movie(
    id: web::Path<u64>,
    db: Db,
    settings: Settings,
) -> actix_web::Result<HttpResponse> {
    let id = id.into_inner();
    let movie = run_blocking(&settings, move || {
        db.get_movie(id)?
            .ok_or_else(|| ApiError::not_found("Movie not found"))
    })
    .await?;
    Ok(HttpResponse::Ok().json(movie))
}

async fn list_reviews(
    id: web::Path<u64>,
    db: Db,
    settings: Settings,
) -> actix_web::Result<HttpResponse> {
    let id = id.into_inner();
    let reviews = run_blocking(&settings, move || Ok(db.reviews(id)?)).await?;
    Ok(HttpResponse::Ok().json(reviews))
}

async fn get_review(
    ids: web::Path<(u64, u64)>,
    db: Db,
    settings: Settings,
) -> actix_web::Result<HttpResponse> {
    let (movie_id, review_id) = ids.into_inner();
    let review = run_blocking(&settings, move || Ok(db.find_review(movie_id, review_id)?)).await?;
    Ok(HttpResponse::Ok().json(review))
}

#[derive(Deserialize)]
struct ReviewParams {
    content: String,
}

async fn create_review(
    bearer: Bearer,
    id: web::Path<u64>,
    params: web::Json<ReviewParams>,
    db: Db,
    settings: Settings,
) -> actix_web::Result<HttpResponse> {
    let movie_id = id.into_inner();
    let content = params.into_inner().content;
    if content.trim().is_empty() {
        return Err(ApiError::validation("content is required").into());
    }
    let claims = bearer.into_claims();
    let review = run_blocking(&settings, move || {
        let author = resolve_identity(db.get_ref(), &claims)?
            .ok_or_else(|| ApiError::not_found("User not found"))?;
        let draft = ReviewDraft {
            user_id: author.id,
            username: author.username,
            content,
        };
        Ok(db.append_review(movie_id, draft)?)
    })
    .await?;
    info!(
        "{} reviewed movie {} (review {})",
        review.username, movie_id, review.id
    );
    Ok(HttpResponse::Created().json(review))
}

async fn vote(
    direction: VoteDirection,
    bearer: Bearer,
    ids: web::Path<(u64, u64)>,
    db: Db,
    settings: Settings,
) -> actix_web::Result<HttpResponse> {
    let (movie_id, review_id) = ids.into_inner();
    let claims = bearer.into_claims();
    let (voter, tally) = run_blocking(&settings, move || {
        let voter = resolve_identity(db.get_ref(), &claims)?
            .ok_or_else(|| ApiError::unauthorized("Unauthorized"))?;
        let tally = db.vote_review(movie_id, review_id, voter.id, direction)?;
        Ok((voter, tally))
    })
    .await?;
    info!(
        "{} voted {} on review {} of movie {}",
        voter.username, direction, review_id, movie_id
    );
    Ok(HttpResponse::Ok().json(tally))
}

async fn like_review(
    bearer: Bearer,
    ids: web::Path<(u64, u64)>,
    db: Db,
    settings: Settings,
) -> actix_web::Result<HttpResponse> {
    vote(VoteDirection::Like, bearer, ids, db, settings).await
}

async fn dislike_review(
    bearer: Bearer,
    ids: web::Path<(u64, u64)>,
    db: Db,
    settings: Settings,
) -> actix_web::Result<HttpResponse> {
    vote(VoteDirection::Dislike, bearer, ids, db, settings).await
}

#[cfg(test)]
mod tests {
    use crate::database::{MovieDb, ReviewDb};
    use crate::model::tests::sample_details;
    use crate::model::{ReviewDraft, Role};
    use crate::routes::tests::{authorized, test_app, TestState};
    use actix_web::test::{call_service, read_body_json, TestRequest};
    use serde_json::{json, Value};

    fn seed(state: &TestState) -> (u64, u64) {
        let movie = state.db.add_movie(sample_details("Pulp Fiction")).unwrap();
        let review = state
            .db
            .append_review(
                movie.id,
                ReviewDraft {
                    user_id: 0,
                    username: "critic".to_owned(),
                    content: "Royale with cheese".to_owned(),
                },
            )
            .unwrap();
        (movie.id, review.id)
    }

    fn tally(liked_by: &[u64], disliked_by: &[u64]) -> Value {
        json!({
            "likes": liked_by.len(),
            "dislikes": disliked_by.len(),
            "likedBy": liked_by,
            "dislikedBy": disliked_by,
        })
    }

    #[actix_rt::test]
    async fn vote_scenario() {
        let state = TestState::new();
        let (u1, bearer1) = state.user("u1", Role::User);
        let (u2, bearer2) = state.user("u2", Role::User);
        let (movie, review) = seed(&state);
        let app = test_app!(state);

        let vote = |bearer: &str, direction: &str| {
            authorized(
                TestRequest::post().uri(&format!(
                    "/movies/{}/reviews/{}/{}",
                    movie, review, direction
                )),
                bearer,
            )
            .to_request()
        };

        let steps = vec![
            (vote(&bearer1, "like"), tally(&[u1], &[])),
            (vote(&bearer1, "like"), tally(&[], &[])),
            (vote(&bearer1, "dislike"), tally(&[], &[u1])),
            (vote(&bearer2, "like"), tally(&[u2], &[u1])),
            (vote(&bearer2, "dislike"), tally(&[], &[u1, u2])),
        ];
        for (req, expected) in steps {
            let resp = call_service(&app, req).await;
            assert_eq!(resp.status(), 200);
            let body: Value = read_body_json(resp).await;
            assert_eq!(body, expected);
        }

        let stored = state.db.find_review(movie, review).unwrap();
        assert_eq!(stored.votes().dislikes(), 2);
    }

    #[actix_rt::test]
    async fn vote_without_token_is_rejected() {
        let state = TestState::new();
        let (movie, review) = seed(&state);
        let before = state.db.get_movie(movie).unwrap().unwrap().version;
        let app = test_app!(state);

        let req = TestRequest::post()
            .uri(&format!("/movies/{}/reviews/{}/like", movie, review))
            .to_request();
        let resp = call_service(&app, req).await;
        assert_eq!(resp.status(), 401);
        let body: Value = read_body_json(resp).await;
        assert_eq!(body, json!({"error": "No token provided"}));

        let req = authorized(
            TestRequest::post().uri(&format!("/movies/{}/reviews/{}/dislike", movie, review)),
            "Bearer garbage",
        )
        .to_request();
        assert_eq!(call_service(&app, req).await.status(), 401);

        assert_eq!(state.db.get_movie(movie).unwrap().unwrap().version, before);
    }

    #[actix_rt::test]
    async fn vote_by_deleted_user_is_rejected() {
        let state = TestState::new();
        let (movie, review) = seed(&state);
        let token = state.tokens.issue(9999, Role::User).unwrap();
        let app = test_app!(state);

        let req = authorized(
            TestRequest::post().uri(&format!("/movies/{}/reviews/{}/like", movie, review)),
            &format!("Bearer {}", token),
        )
        .to_request();
        assert_eq!(call_service(&app, req).await.status(), 401);
    }

    #[actix_rt::test]
    async fn vote_on_missing_targets() {
        let state = TestState::new();
        let (_, bearer) = state.user("u1", Role::User);
        let (movie, review) = seed(&state);
        let before = state.db.get_movie(movie).unwrap().unwrap();
        let app = test_app!(state);

        let req = authorized(
            TestRequest::post().uri(&format!("/movies/{}/reviews/{}/like", movie, review + 1000)),
            &bearer,
        )
        .to_request();
        let resp = call_service(&app, req).await;
        assert_eq!(resp.status(), 404);
        let body: Value = read_body_json(resp).await;
        assert_eq!(body, json!({"error": "Review not found"}));

        let req = authorized(
            TestRequest::post().uri(&format!("/movies/{}/reviews/{}/like", movie + 1000, review)),
            &bearer,
        )
        .to_request();
        let resp = call_service(&app, req).await;
        assert_eq!(resp.status(), 404);
        let body: Value = read_body_json(resp).await;
        assert_eq!(body, json!({"error": "Movie not found"}));

        let after = state.db.get_movie(movie).unwrap().unwrap();
        assert_eq!(after.version, before.version);
        assert_eq!(after.reviews, before.reviews);
    }

    #[actix_rt::test]
    async fn create_and_list_reviews() {
        let state = TestState::new();
        let (author, bearer) = state.user("vincent", Role::User);
        let (movie, _) = seed(&state);
        let app = test_app!(state);

        let req = authorized(
            TestRequest::post().uri(&format!("/movies/{}/reviews", movie)),
            &bearer,
        )
        .set_json(json!({"content": "Say what again"}))
        .to_request();
        let resp = call_service(&app, req).await;
        assert_eq!(resp.status(), 201);
        let created: Value = read_body_json(resp).await;
        assert_eq!(created["username"], "vincent");
        assert_eq!(created["userId"], author);
        assert_eq!(created["content"], "Say what again");
        assert_eq!(created["likes"], 0);
        assert_eq!(created["dislikedBy"], json!([]));

        let req = TestRequest::get()
            .uri(&format!("/movies/{}/reviews", movie))
            .to_request();
        let resp = call_service(&app, req).await;
        assert_eq!(resp.status(), 200);
        let reviews: Vec<Value> = read_body_json(resp).await;
        let contents: Vec<_> = reviews.iter().map(|r| r["content"].clone()).collect();
        assert_eq!(contents, vec![json!("Royale with cheese"), json!("Say what again")]);
        assert_eq!(reviews[1]["id"], created["id"]);
    }

    #[actix_rt::test]
    async fn create_review_failures() {
        let state = TestState::new();
        let (_, bearer) = state.user("vincent", Role::User);
        let (movie, _) = seed(&state);
        let ghost = format!("Bearer {}", state.tokens.issue(9999, Role::User).unwrap());
        let app = test_app!(state);

        let post = |uri: String, bearer: &str, content: &str| {
            authorized(TestRequest::post().uri(&uri), bearer)
                .set_json(json!({ "content": content }))
                .to_request()
        };

        let reviews = format!("/movies/{}/reviews", movie);
        let missing = format!("/movies/{}/reviews", movie + 1000);
        let resp = call_service(&app, post(missing, &bearer, "hi")).await;
        assert_eq!(resp.status(), 404);
        let resp = call_service(&app, post(reviews.clone(), &ghost, "hi")).await;
        assert_eq!(resp.status(), 404);
        let resp = call_service(&app, post(reviews, &bearer, "  ")).await;
        assert_eq!(resp.status(), 400);
        let req = TestRequest::post()
            .uri(&format!("/movies/{}/reviews", movie))
            .set_json(json!({"content": "hi"}))
            .to_request();
        assert_eq!(call_service(&app, req).await.status(), 401);
    }

    #[actix_rt::test]
    async fn list_reviews_of_missing_movie() {
        let state = TestState::new();
        let app = test_app!(state);
        let req = TestRequest::get().uri("/movies/77/reviews").to_request();
        assert_eq!(call_service(&app, req).await.status(), 404);
    }

    #[actix_rt::test]
    async fn get_single_review() {
        let state = TestState::new();
        let (movie, review) = seed(&state);
        let app = test_app!(state);

        let get = |movie: u64, review: u64| {
            TestRequest::get()
                .uri(&format!("/movies/{}/reviews/{}", movie, review))
                .to_request()
        };
        let resp = call_service(&app, get(movie, review)).await;
        assert_eq!(resp.status(), 200);
        let body: Value = read_body_json(resp).await;
        assert_eq!(body["id"], review);
        assert_eq!(body["content"], "Royale with cheese");
        assert_eq!(body["likedBy"], json!([]));

        let resp = call_service(&app, get(movie, review + 1)).await;
        assert_eq!(resp.status(), 404);
        let body: Value = read_body_json(resp).await;
        assert_eq!(body, json!({"error": "Review not found"}));
        let resp = call_service(&app, get(movie + 1, review)).await;
        assert_eq!(resp.status(), 404);
    }

    #[actix_rt::test]
    async fn featured_movie_needs_a_catalog() {
        let state = TestState::new();
        let db = state.db.clone();
        let app = test_app!(state);
        let featured = || TestRequest::get().uri("/movies/featured-random").to_request();

        let resp = call_service(&app, featured()).await;
        assert_eq!(resp.status(), 404);
        let body: Value = read_body_json(resp).await;
        assert_eq!(body, json!({"error": "No movie found"}));

        let pulp = db.add_movie(sample_details("Pulp Fiction")).unwrap();
        let heat = db.add_movie(sample_details("Heat")).unwrap();
        for _ in 0..5 {
            let resp = call_service(&app, featured()).await;
            assert_eq!(resp.status(), 200);
            let movie: Value = read_body_json(resp).await;
            assert!(movie["id"] == pulp.id || movie["id"] == heat.id);
        }
    }

    #[actix_rt::test]
    async fn catalog_routes() {
        let state = TestState::new();
        let pulp = state.db.add_movie(sample_details("Pulp Fiction")).unwrap();
        let mut heat = sample_details("Heat");
        heat.genre.insert("Crime".to_owned());
        let heat = state.db.add_movie(heat).unwrap();
        let app = test_app!(state);

        let get = |uri: &str| TestRequest::get().uri(uri).to_request();

        let movies: Vec<Value> = read_body_json(call_service(&app, get("/movies")).await).await;
        assert_eq!(movies.len(), 2);
        assert_eq!(movies[0]["title"], "Pulp Fiction");
        assert_eq!(movies[0]["releaseDate"], "1994-10-14");

        let movie: Value =
            read_body_json(call_service(&app, get(&format!("/movies/{}", heat.id))).await).await;
        assert_eq!(movie["title"], "Heat");
        assert_eq!(call_service(&app, get("/movies/12345")).await.status(), 404);
        assert_eq!(call_service(&app, get("/movies/abc")).await.status(), 400);

        let found: Vec<Value> =
            read_body_json(call_service(&app, get("/movies/search?query=PULP")).await).await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0]["id"], pulp.id);
        assert_eq!(call_service(&app, get("/movies/search")).await.status(), 400);

        let genres: Value = read_body_json(call_service(&app, get("/movies/category")).await).await;
        assert_eq!(genres, json!(["Crime", "Drama"]));
        let crime: Vec<Value> =
            read_body_json(call_service(&app, get("/movies/category/Crime")).await).await;
        assert_eq!(crime.len(), 1);
        assert_eq!(crime[0]["id"], heat.id);
    }
}
