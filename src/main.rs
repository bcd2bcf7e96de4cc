use actix_web::{error, get, middleware, post, put, web, App, HttpResponse, HttpServer, Responder};
use chrono::Local;
use diesel::{prelude::*, r2d2};
use regex::Regex;
use lab_reservations::{
    actions::{self, DbError},
    config::Config,
    filter::ReservationQuery,
    models,
    queue::LifecycleTimerService,
    stats,
    validation,
};

type DbPool = r2d2::Pool<r2d2::ConnectionManager<PgConnection>>;

#[derive(Debug, serde::Serialize)]
struct Res {
    message: String,
}

/// Whether the pool could hand out a connection when last asked.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ConnectionState {
    Connected,
    Unavailable(String),
}

impl ConnectionState {
    fn probe(pool: &DbPool) -> Self {
        match pool.get() {
            Ok(_) => ConnectionState::Connected,
            Err(e) => ConnectionState::Unavailable(e.to_string()),
        }
    }
}

fn matches_pattern(pattern: &str, value: &str) -> bool {
    Regex::new(pattern).map(|re| re.is_match(value)).unwrap_or(false)
}

fn bad_request(message: impl Into<String>) -> HttpResponse {
    HttpResponse::BadRequest().json(Res { message: message.into() })
}

/// Maps a data-access failure to the JSON error response for `what`.
fn error_response(e: DbError, what: &str) -> error::Error {
    let detail = e.to_string();

    let response = if let Some(diesel_error) = e.downcast_ref::<diesel::result::Error>() {
        match diesel_error {
            diesel::result::Error::NotFound => {
                HttpResponse::NotFound().json(Res { message: format!("{} not found", what) })
            }
            diesel::result::Error::DatabaseError(diesel::result::DatabaseErrorKind::UniqueViolation, _) => {
                bad_request(format!("{} already exists", what))
            }
            diesel::result::Error::DatabaseError(diesel::result::DatabaseErrorKind::ForeignKeyViolation, _) => {
                bad_request("referenced room or user does not exist")
            }
            _ => HttpResponse::InternalServerError().json(Res { message: "Error con DB".to_string() }),
        }
    } else if e.downcast_ref::<::r2d2::Error>().is_some() {
        HttpResponse::ServiceUnavailable().json(Res { message: "No se ha podido conectar a la base de datos".to_string() })
    } else {
        bad_request(detail.clone())
    };

    error::InternalError::from_response(detail, response).into()
}

fn schedule_timers(timer_service: &web::Data<LifecycleTimerService>, reservation: &models::Reservation) {
    let timer_service = timer_service.clone();
    let reservation = reservation.clone();
    tokio::spawn(async move {
        if let Err(e) = timer_service.schedule_reservation(&reservation).await {
            log::error!("Failed to schedule lifecycle timers for reservation {}: {:?}", reservation.reservation_id, e);
        }
    });
}

#[get("/")]
async fn index() -> impl Responder {
    HttpResponse::Ok().body("Ruta funcionando")
}

#[get("/test")]
async fn connection_test(pool: web::Data<DbPool>) -> actix_web::Result<impl Responder> {
    let state = web::block(move || ConnectionState::probe(&pool)).await?;

    Ok(match state {
        ConnectionState::Connected => HttpResponse::Ok().body("Conectado a la base de datos"),
        ConnectionState::Unavailable(reason) => {
            log::warn!("Database probe failed: {}", reason);
            HttpResponse::InternalServerError()
                .body("No se ha podido conectar a la base de datos, intentando conectar")
        }
    })
}

#[get("/rooms")]
async fn get_rooms(pool: web::Data<DbPool>) -> actix_web::Result<impl Responder> {
    let rooms = web::block(move || {
        let mut conn = pool.get()?;
        actions::list_rooms(&mut conn)
    })
    .await?
    .map_err(|e| {
        log::error!("Failed to list rooms: {:?}", e);
        error_response(e, "Room")
    })?;

    Ok(HttpResponse::Ok().json(rooms))
}

#[get("/reservations")]
async fn get_reservations(
    pool: web::Data<DbPool>,
    query: web::Query<ReservationQuery>,
) -> actix_web::Result<impl Responder> {
    let filter = match query.to_filter() {
        Ok(filter) => filter,
        Err(message) => return Ok(bad_request(message)),
    };

    let views = web::block(move || {
        let mut conn = pool.get()?;
        let rooms = actions::load_room_directory(&mut conn)?;
        let reservations = filter.apply(actions::list_reservations(&mut conn)?, &rooms);

        Ok(reservations
            .into_iter()
            .map(|reservation| models::ReservationView::resolve(reservation, &rooms))
            .collect::<Vec<_>>())
    })
    .await?
    .map_err(|e: DbError| {
        log::error!("Failed to list reservations: {:?}", e);
        error_response(e, "Reservation")
    })?;

    Ok(HttpResponse::Ok().json(views))
}

#[get("/reservations/upcoming")]
async fn get_upcoming_reservations(pool: web::Data<DbPool>) -> actix_web::Result<impl Responder> {
    let views = web::block(move || {
        let mut conn = pool.get()?;
        let rooms = actions::load_room_directory(&mut conn)?;
        let upcoming = actions::list_upcoming_reservations(&mut conn, Local::now().naive_local())?;

        Ok(upcoming
            .into_iter()
            .map(|reservation| models::ReservationView::resolve(reservation, &rooms))
            .collect::<Vec<_>>())
    })
    .await?
    .map_err(|e: DbError| {
        log::error!("Failed to list upcoming reservations: {:?}", e);
        error_response(e, "Reservation")
    })?;

    Ok(HttpResponse::Ok().json(views))
}

#[get("/reservations/{reservation_id}")]
async fn get_reservation(pool: web::Data<DbPool>, path: web::Path<i32>) -> actix_web::Result<impl Responder> {
    let reservation_id = path.into_inner();

    let view = web::block(move || {
        let mut conn = pool.get()?;
        let reservation = actions::get_reservation_by_id(&mut conn, reservation_id)?;
        let rooms = actions::load_room_directory(&mut conn)?;
        Ok(models::ReservationView::resolve(reservation, &rooms))
    })
    .await?
    .map_err(|e: DbError| {
        log::error!("Failed to get reservation {}: {:?}", reservation_id, e);
        error_response(e, "Reservation")
    })?;

    Ok(HttpResponse::Ok().json(view))
}

#[post("/reservations")]
async fn add_reservation(
    pool: web::Data<DbPool>,
    timer_service: web::Data<LifecycleTimerService>,
    form: web::Json<models::ReservationForm>,
) -> actix_web::Result<impl Responder> {
    if !matches_pattern(r"^[a-zA-Z0-9]{1,10}$", &form.user_id) {
        return Ok(bad_request("user_id should be Alphanumeric with at most 10 characters"));
    }

    let changes = match actions::prepare_reservation(&form, true) {
        Ok(changes) => changes,
        Err(e) => return Ok(bad_request(e.to_string())),
    };

    let view = web::block(move || {
        let mut conn = pool.get()?;
        let reservation = actions::create_reservation(&mut conn, &changes)?;
        let rooms = actions::load_room_directory(&mut conn)?;
        Ok(models::ReservationView::resolve(reservation, &rooms))
    })
    .await?
    .map_err(|e: DbError| {
        log::error!("Failed to add reservation: {:?}", e);
        error_response(e, "Reservation")
    })?;

    schedule_timers(&timer_service, &view.reservation);

    Ok(HttpResponse::Created().json(view))
}

#[put("/reservations/{reservation_id}")]
async fn update_reservation(
    pool: web::Data<DbPool>,
    path: web::Path<i32>,
    form: web::Json<models::ReservationForm>,
) -> actix_web::Result<impl Responder> {
    let reservation_id = path.into_inner();

    if !matches_pattern(r"^[a-zA-Z0-9]{1,10}$", &form.user_id) {
        return Ok(bad_request("user_id should be Alphanumeric with at most 10 characters"));
    }

    let changes = match actions::prepare_reservation(&form, false) {
        Ok(changes) => changes,
        Err(e) => return Ok(bad_request(e.to_string())),
    };

    let view = web::block(move || {
        let mut conn = pool.get()?;
        let reservation = actions::update_reservation(&mut conn, reservation_id, &changes)?;
        let rooms = actions::load_room_directory(&mut conn)?;
        Ok(models::ReservationView::resolve(reservation, &rooms))
    })
    .await?
    .map_err(|e: DbError| {
        log::error!("Failed to update reservation {}: {:?}", reservation_id, e);
        error_response(e, "Reservation")
    })?;

    Ok(HttpResponse::Ok().json(view))
}

#[put("/reservations/set-deleted/{reservation_id}")]
async fn set_reservation_deleted(pool: web::Data<DbPool>, path: web::Path<i32>) -> actix_web::Result<impl Responder> {
    let reservation_id = path.into_inner();

    web::block(move || {
        let mut conn = pool.get()?;
        actions::set_reservation_deleted(&mut conn, reservation_id)
    })
    .await?
    .map_err(|e| {
        log::error!("Failed to mark reservation {} as deleted: {:?}", reservation_id, e);
        error_response(e, "Reservation")
    })?;

    log::info!("Reservation {} marked as deleted", reservation_id);

    Ok(HttpResponse::Ok().json(models::ApiResponse {
        message: "Reservation marked as deleted".to_string(),
    }))
}

#[post("/reservations/validate-start")]
async fn validate_start(form: web::Json<models::ValidateStartRequest>) -> impl Responder {
    let outcome = form
        .minute
        .parse::<validation::Minute>()
        .and_then(|minute| validation::validate(form.hour, minute, form.meridiem));

    let response = match outcome {
        Ok(start) => models::ValidateStartResponse {
            accepted: true,
            message: None,
            hour24: Some(start.hour()),
            minute: Some(start.minute().value()),
        },
        Err(e) => models::ValidateStartResponse {
            accepted: false,
            message: Some(e.to_string()),
            hour24: None,
            minute: None,
        },
    };

    HttpResponse::Ok().json(response)
}

#[get("/users")]
async fn get_users(pool: web::Data<DbPool>) -> actix_web::Result<impl Responder> {
    let users = web::block(move || {
        let mut conn = pool.get()?;
        actions::list_users(&mut conn)
    })
    .await?
    .map_err(|e| {
        log::error!("Failed to list users: {:?}", e);
        error_response(e, "User")
    })?;

    Ok(HttpResponse::Ok().json(users))
}

#[get("/users/{user_id}")]
async fn get_user(pool: web::Data<DbPool>, path: web::Path<String>) -> actix_web::Result<impl Responder> {
    let user_id = path.into_inner();

    let user = web::block(move || {
        let mut conn = pool.get()?;
        actions::get_user_by_id(&mut conn, &user_id)
    })
    .await?
    .map_err(|e| {
        log::error!("Failed to get user: {:?}", e);
        error_response(e, "User")
    })?;

    Ok(HttpResponse::Ok().json(user))
}

#[post("/users")]
async fn add_user(pool: web::Data<DbPool>, form: web::Json<models::NewUser>) -> actix_web::Result<impl Responder> {
    if !matches_pattern(r"^[a-zA-Z0-9]{1,10}$", &form.user_id) {
        return Ok(bad_request("user_id should be Alphanumeric with at most 10 characters"));
    }
    if form.first_name.trim().is_empty() || form.last_names.trim().is_empty() {
        return Ok(bad_request("first_name and last_names are required"));
    }

    let user = web::block(move || {
        let mut conn = pool.get()?;
        actions::insert_new_user(&mut conn, &form)
    })
    .await?
    .map_err(|e| {
        log::error!("Failed to add user: {:?}", e);
        error_response(e, "User")
    })?;

    Ok(HttpResponse::Created().json(user))
}

#[get("/api/statistics")]
async fn get_statistics(
    pool: web::Data<DbPool>,
    query: web::Query<stats::StatisticsQuery>,
) -> actix_web::Result<impl Responder> {
    if let Err(message) = query.check() {
        return Ok(bad_request(message));
    }
    let (from, to) = (query.start_date, query.end_date);

    let statistics = web::block(move || {
        let mut conn = pool.get()?;
        let rooms = actions::load_room_directory(&mut conn)?;
        let reservations = actions::reservations_between(&mut conn, from, to)?;
        Ok(stats::compute(&reservations, &rooms))
    })
    .await?
    .map_err(|e: DbError| {
        log::error!("Failed to compute statistics: {:?}", e);
        error_response(e, "Statistics")
    })?;

    Ok(HttpResponse::Ok().json(statistics))
}

fn json_config() -> web::JsonConfig {
    web::JsonConfig::default().error_handler(|err, _req| {
        let detail = err.to_string();
        let response = match err {
            error::JsonPayloadError::ContentType => {
                HttpResponse::UnsupportedMediaType().body("Unsupported Media Type")
            }
            error::JsonPayloadError::Deserialize(ref err) => {
                HttpResponse::BadRequest().json(Res { message: err.to_string() })
            }
            _ => HttpResponse::BadRequest().json(Res { message: detail }),
        };
        error::InternalError::from_response(err, response).into()
    })
}

fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(index)
        .service(connection_test)
        .service(get_rooms)
        .service(get_reservations)
        // before the {reservation_id} routes
        .service(get_upcoming_reservations)
        .service(validate_start)
        .service(set_reservation_deleted)
        .service(get_reservation)
        .service(add_reservation)
        .service(update_reservation)
        .service(get_users)
        .service(get_user)
        .service(add_user)
        .service(get_statistics);
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = Config::from_env().map_err(|e| std::io::Error::other(e.to_string()))?;

    // initialize DB pool outside of `HttpServer::new` so that it is shared across all workers
    let (pool, state) = initialize_db_pool(&config.database_url);
    match &state {
        ConnectionState::Connected => log::info!("Connected to database"),
        ConnectionState::Unavailable(reason) => {
            log::warn!("Database connection failed, requests will retry: {}", reason)
        }
    }

    let mut timer_service = LifecycleTimerService::new(pool.clone(), config.amqp.clone());
    match timer_service.initialize().await {
        Ok(()) => {
            if let Err(e) = timer_service.start_consuming_transitions().await {
                log::error!("Error starting lifecycle consumer: {:?}", e);
            }
        }
        Err(e) => log::warn!("RabbitMQ unavailable, reservation lifecycle timers are disabled: {:?}", e),
    }
    let timer_service = web::Data::new(timer_service);

    log::info!("starting HTTP server at http://{}:{}", config.bind_address, config.port);

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(pool.clone()))
            .app_data(timer_service.clone())
            .app_data(json_config())
            .wrap(middleware::Logger::default())
            .configure(routes)
    })
    .bind((config.bind_address.as_str(), config.port))?
    .run()
    .await
}

/// Builds the pool without connecting and reports whether a connection works.
fn initialize_db_pool(database_url: &str) -> (DbPool, ConnectionState) {
    let manager = r2d2::ConnectionManager::<PgConnection>::new(database_url);
    let pool = r2d2::Pool::builder()
        .connection_timeout(std::time::Duration::from_secs(5))
        .build_unchecked(manager);
    let state = ConnectionState::probe(&pool);
    (pool, state)
}
