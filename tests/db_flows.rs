//! Flows that need a real Postgres database: idempotent sends, atomic point
//! movements, stream replay, read receipts, view counts, search and the inbox.
//!
//! They run when `DATABASE_URL` is set and return early otherwise. Each test
//! registers its own users and uses its own city, so they can share one
//! database and run in parallel.

use std::time::Duration;

use rentwala::{
    AdService, ApiError, AppState, AuthService, ChatEvent, GoogleIdentity, MessageService,
    PointsService, SearchFilter, Settings,
    handlers::data::{AdSearch, CreateAdRequest, SendMessageRequest, UpdateAdRequest},
    models::{Ad, AdStatus, User},
};
use serde_json::json;
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

async fn db_state() -> Option<AppState> {
    let url = std::env::var("DATABASE_URL").ok()?;
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await
        .expect("failed to connect to DATABASE_URL");
    rentwala::run_migrations(&pool).await.expect("failed to run migrations");
    Some(AppState::with_pool(Settings::for_tests(&url), pool))
}

macro_rules! state_or_skip {
    () => {
        match db_state().await {
            Some(state) => state,
            None => {
                eprintln!("DATABASE_URL is not set, skipping");
                return;
            }
        }
    };
}

async fn register(state: &AppState, name: &str) -> User {
    let email = format!("{}-{}@example.com", name.to_lowercase(), Uuid::new_v4());
    AuthService::register(state, name, &email, "secret1").await.expect("register")
}

async fn set_points(state: &AppState, user_id: Uuid, points: i64) {
    sqlx::query("UPDATE users SET points = $2 WHERE id = $1")
        .bind(user_id)
        .bind(points)
        .execute(state.db.as_ref())
        .await
        .expect("set points");
}

fn unique_city() -> String {
    format!("Testpur {}", Uuid::new_v4().simple())
}

fn ad_request(city: &str, title: &str, lat: f64, lng: f64) -> CreateAdRequest {
    serde_json::from_value(json!({
        "category": "real_estate",
        "subcategory": "houses",
        "title": title,
        "description": "Sunny flat, fully furnished",
        "price_per_day": 1500.0,
        "images": ["/api/uploads/1.jpg"],
        "location": { "city": city, "lat": lat, "lng": lng },
        "contact_number": "+91 9876543210"
    }))
    .expect("valid ad body")
}

async fn post_ad(state: &AppState, owner: &User, city: &str) -> Ad {
    AdService::create(state, owner.id, ad_request(city, "2BHK near Koramangala", 12.93, 77.62))
        .await
        .expect("post ad")
}

fn message(ad: &Ad, to: Uuid, body: &str, client_id: Option<&str>) -> SendMessageRequest {
    SendMessageRequest {
        ad_id: ad.id,
        receiver_id: to,
        message: body.to_string(),
        image: None,
        client_message_id: client_id.map(str::to_string),
    }
}

async fn count(state: &AppState, sql: &str, id: Uuid) -> i64 {
    sqlx::query_scalar(sql)
        .bind(id)
        .fetch_one(state.db.as_ref())
        .await
        .expect("count query")
}

/// Keeps `created_at` strictly increasing between statements.
async fn tick() {
    tokio::time::sleep(Duration::from_millis(5)).await;
}

#[actix_web::test]
async fn resending_a_client_id_returns_the_stored_message() {
    let state = state_or_skip!();
    let owner = register(&state, "Asha").await;
    let renter = register(&state, "Ravi").await;
    let ad = post_ad(&state, &owner, &unique_city()).await;

    let mut owner_rx = state.chat.subscribe(owner.id);
    let (first, created) =
        MessageService::send(&state, renter.id, &renter.name, message(&ad, owner.id, "Hi", Some("c-1")))
            .await
            .unwrap();
    assert!(created);
    while owner_rx.try_recv().is_ok() {}

    let (again, created) =
        MessageService::send(&state, renter.id, &renter.name, message(&ad, owner.id, "Hi", Some("c-1")))
            .await
            .unwrap();
    assert!(!created);
    assert_eq!(again.id, first.id);
    assert!(owner_rx.try_recv().is_err(), "a retried send must not notify again");

    let stored = count(&state, "SELECT COUNT(*) FROM messages WHERE ad_id = $1", ad.id).await;
    assert_eq!(stored, 1);
}

#[actix_web::test]
async fn client_id_reused_on_another_ad_conflicts() {
    let state = state_or_skip!();
    let owner = register(&state, "Asha").await;
    let renter = register(&state, "Ravi").await;
    let city = unique_city();
    let flat = post_ad(&state, &owner, &city).await;
    let car = post_ad(&state, &owner, &city).await;

    MessageService::send(&state, renter.id, &renter.name, message(&flat, owner.id, "Hi", Some("c-1")))
        .await
        .unwrap();
    let err = MessageService::send(
        &state,
        renter.id,
        &renter.name,
        message(&car, owner.id, "Hi", Some("c-1")),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ApiError::Conflict(_)));

    let on_car = count(&state, "SELECT COUNT(*) FROM messages WHERE ad_id = $1", car.id).await;
    assert_eq!(on_car, 0);
}

#[actix_web::test]
async fn ad_post_without_points_leaves_no_trace() {
    let state = state_or_skip!();
    let owner = register(&state, "Meera").await;
    set_points(&state, owner.id, 0).await;

    let err = AdService::create(&state, owner.id, ad_request(&unique_city(), "Scooter", 12.9, 77.6))
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::BadRequest(_)));

    let ads = count(&state, "SELECT COUNT(*) FROM ads WHERE owner_id = $1", owner.id).await;
    assert_eq!(ads, 0);
    let charges = count(
        &state,
        "SELECT COUNT(*) FROM point_transactions WHERE from_user_id = $1 AND kind = 'ad_post'",
        owner.id,
    )
    .await;
    assert_eq!(charges, 0);
    assert_eq!(PointsService::balance(&state.db, owner.id).await.unwrap(), 0);

    set_points(&state, owner.id, 5).await;
    post_ad(&state, &owner, &unique_city()).await;
    assert_eq!(PointsService::balance(&state.db, owner.id).await.unwrap(), 4);
    let charges = count(
        &state,
        "SELECT COUNT(*) FROM point_transactions WHERE from_user_id = $1 AND kind = 'ad_post'",
        owner.id,
    )
    .await;
    assert_eq!(charges, 1);
}

#[actix_web::test]
async fn transfer_moves_both_balances_with_one_ledger_row() {
    let state = state_or_skip!();
    let sender = register(&state, "Asha").await;
    let recipient = register(&state, "Ravi").await;

    let receipt = PointsService::transfer(&state, sender.id, recipient.id, 250, Some("rent"))
        .await
        .unwrap();
    assert_eq!(receipt.new_balance, 750);
    assert_eq!(receipt.transaction.amount, 250);
    assert_eq!(PointsService::balance(&state.db, sender.id).await.unwrap(), 750);
    assert_eq!(PointsService::balance(&state.db, recipient.id).await.unwrap(), 1250);

    let err = PointsService::transfer(&state, sender.id, recipient.id, 10_000, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::BadRequest(_)));
    assert_eq!(PointsService::balance(&state.db, sender.id).await.unwrap(), 750);
    assert_eq!(PointsService::balance(&state.db, recipient.id).await.unwrap(), 1250);

    let transfers = count(
        &state,
        "SELECT COUNT(*) FROM point_transactions WHERE from_user_id = $1 AND kind = 'transfer'",
        sender.id,
    )
    .await;
    assert_eq!(transfers, 1);
}

#[actix_web::test]
async fn backlog_replays_only_newer_messages() {
    let state = state_or_skip!();
    let owner = register(&state, "Asha").await;
    let renter = register(&state, "Ravi").await;
    let ad = post_ad(&state, &owner, &unique_city()).await;

    let (old, _) =
        MessageService::send(&state, renter.id, &renter.name, message(&ad, owner.id, "First", None))
            .await
            .unwrap();
    tick().await;
    let (new, _) =
        MessageService::send(&state, renter.id, &renter.name, message(&ad, owner.id, "Second", None))
            .await
            .unwrap();

    let replay = MessageService::backlog(&state.db, owner.id, old.created_at).await.unwrap();
    let ids: Vec<Uuid> = replay.iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![new.id]);

    let nothing_for_sender = MessageService::backlog(&state.db, renter.id, old.created_at)
        .await
        .unwrap();
    assert!(nothing_for_sender.is_empty());
}

#[actix_web::test]
async fn opening_a_thread_marks_it_seen_and_tells_the_sender() {
    let state = state_or_skip!();
    let owner = register(&state, "Asha").await;
    let renter = register(&state, "Ravi").await;
    let ad = post_ad(&state, &owner, &unique_city()).await;

    for body in ["Hello", "Is it free this weekend?"] {
        MessageService::send(&state, renter.id, &renter.name, message(&ad, owner.id, body, None))
            .await
            .unwrap();
        tick().await;
    }
    assert_eq!(MessageService::unread_count(&state.db, owner.id).await.unwrap(), 2);

    let mut renter_rx = state.chat.subscribe(renter.id);
    let thread = MessageService::thread(&state, owner.id, ad.id, renter.id).await.unwrap();
    assert_eq!(thread.len(), 2);
    assert_eq!(thread[0].body, "Hello");
    assert_eq!(MessageService::unread_count(&state.db, owner.id).await.unwrap(), 0);

    match renter_rx.try_recv() {
        Ok(ChatEvent::MessagesSeen { ad_id, reader_id, count }) => {
            assert_eq!(ad_id, ad.id);
            assert_eq!(reader_id, owner.id);
            assert_eq!(count, 2);
        }
        other => panic!("expected messages_seen, got {other:?}"),
    }

    MessageService::thread(&state, owner.id, ad.id, renter.id).await.unwrap();
    assert!(renter_rx.try_recv().is_err(), "nothing new was marked");
}

#[actix_web::test]
async fn each_fetch_counts_one_view() {
    let state = state_or_skip!();
    let owner = register(&state, "Asha").await;
    let ad = post_ad(&state, &owner, &unique_city()).await;
    assert_eq!(ad.views, 0);

    let first = AdService::get_and_count_view(&state.db, ad.id).await.unwrap();
    assert_eq!(first.ad.views, 1);
    let second = AdService::get_and_count_view(&state.db, ad.id).await.unwrap();
    assert_eq!(second.ad.views, 2);

    let missing = AdService::get_and_count_view(&state.db, Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(missing, ApiError::NotFound(_)));
}

#[actix_web::test]
async fn search_pages_and_filters_by_distance() {
    let state = state_or_skip!();
    let owner = register(&state, "Asha").await;
    let city = unique_city();

    // Two in central Bengaluru, one in Mysuru (~125 km away)
    for (title, lat, lng) in [
        ("Flat near MG Road", 12.9756, 77.6066),
        ("Flat in Indiranagar", 12.9784, 77.6408),
        ("Flat in Mysuru", 12.2958, 76.6394),
    ] {
        AdService::create(&state, owner.id, ad_request(&city, title, lat, lng)).await.unwrap();
        tick().await;
    }

    let by_city = |page: i64| AdSearch {
        city: Some(city.clone()),
        page: Some(page),
        limit: Some(2),
        ..AdSearch::default()
    };

    let first = AdService::search(&state.db, &SearchFilter::from_query(by_city(1)).unwrap())
        .await
        .unwrap();
    assert_eq!(first.total, 3);
    assert_eq!(first.pages, 2);
    assert_eq!(first.ads.len(), 2);
    assert_eq!(first.ads[0].ad.title, "Flat in Mysuru");

    let second = AdService::search(&state.db, &SearchFilter::from_query(by_city(2)).unwrap())
        .await
        .unwrap();
    assert_eq!(second.ads.len(), 1);

    let near = SearchFilter::from_query(AdSearch {
        city: Some(city.clone()),
        lat: Some(12.9716),
        lng: Some(77.5946),
        max_distance: Some(20.0),
        ..AdSearch::default()
    })
    .unwrap();
    let nearby = AdService::search(&state.db, &near).await.unwrap();
    assert_eq!(nearby.total, 2);
    assert_eq!(nearby.ads[0].ad.title, "Flat near MG Road");
    assert!(nearby.ads.iter().all(|a| a.distance_km.is_some_and(|d| d <= 20.0)));
}

#[actix_web::test]
async fn owner_cannot_reinstate_a_rejected_ad() {
    let state = state_or_skip!();
    let owner = register(&state, "Asha").await;
    let ad = post_ad(&state, &owner, &unique_city()).await;
    sqlx::query("UPDATE ads SET status = 'rejected' WHERE id = $1")
        .bind(ad.id)
        .execute(state.db.as_ref())
        .await
        .unwrap();

    let reinstate = UpdateAdRequest { status: Some(AdStatus::Active), ..UpdateAdRequest::default() };
    let err = AdService::update(&state.db, owner.id, ad.id, reinstate).await.unwrap_err();
    assert!(matches!(err, ApiError::Forbidden(_)));

    let retitle =
        UpdateAdRequest { title: Some("Renovated 2BHK".into()), ..UpdateAdRequest::default() };
    let updated = AdService::update(&state.db, owner.id, ad.id, retitle).await.unwrap();
    assert_eq!(updated.title, "Renovated 2BHK");
    assert_eq!(updated.status, AdStatus::Rejected);
}

#[actix_web::test]
async fn inbox_has_one_entry_per_thread_with_unread_counts() {
    let state = state_or_skip!();
    let owner = register(&state, "Asha").await;
    let ravi = register(&state, "Ravi").await;
    let neha = register(&state, "Neha").await;
    let city = unique_city();
    let flat = post_ad(&state, &owner, &city).await;
    let car = post_ad(&state, &owner, &city).await;

    for body in ["Hello", "Still available?"] {
        MessageService::send(&state, ravi.id, &ravi.name, message(&flat, owner.id, body, None))
            .await
            .unwrap();
        tick().await;
    }
    MessageService::send(&state, neha.id, &neha.name, message(&car, owner.id, "Diesel?", None))
        .await
        .unwrap();
    tick().await;
    MessageService::send(&state, owner.id, &owner.name, message(&flat, ravi.id, "Yes it is", None))
        .await
        .unwrap();

    let inbox = MessageService::conversations(&state.db, owner.id).await.unwrap();
    assert_eq!(inbox.len(), 2);

    assert_eq!(inbox[0].ad_id, flat.id);
    assert_eq!(inbox[0].other_user_id, ravi.id);
    assert_eq!(inbox[0].last_message, "Yes it is");
    assert_eq!(inbox[0].last_sender_id, owner.id);
    assert_eq!(inbox[0].unread_count, 2);

    assert_eq!(inbox[1].ad_id, car.id);
    assert_eq!(inbox[1].unread_count, 1);
    assert_eq!(inbox[1].other_user.as_ref().map(|u| u.name.as_str()), Some("Neha"));
    assert_eq!(inbox[1].ad_title.as_deref(), Some("2BHK near Koramangala"));
    assert_eq!(inbox[1].ad_image.as_deref(), Some("/api/uploads/1.jpg"));

    let ravis = MessageService::conversations(&state.db, ravi.id).await.unwrap();
    assert_eq!(ravis.len(), 1);
    assert_eq!(ravis[0].unread_count, 1);
}

#[actix_web::test]
async fn google_sign_in_links_once_per_email() {
    let state = state_or_skip!();
    let user = register(&state, "Meera").await;
    let identity = |google_id: &str| GoogleIdentity {
        google_id: google_id.to_string(),
        email: user.email.clone(),
        name: None,
        picture: None,
    };
    let first_id = format!("g-{}", Uuid::new_v4());

    let linked = AuthService::google_sign_in(&state, identity(&first_id)).await.unwrap();
    assert_eq!(linked.id, user.id);
    assert_eq!(linked.google_id.as_deref(), Some(first_id.as_str()));

    let again = AuthService::google_sign_in(&state, identity(&first_id)).await.unwrap();
    assert_eq!(again.id, user.id);

    let other_id = format!("g-{}", Uuid::new_v4());
    let err = AuthService::google_sign_in(&state, identity(&other_id)).await.unwrap_err();
    assert!(matches!(err, ApiError::Conflict(_)));

    let still = AuthService::find_by_id(&state.db, user.id).await.unwrap();
    assert_eq!(still.google_id.as_deref(), Some(first_id.as_str()));
}
