use actix_web::{web, App, HttpServer};
use realtime_messaging_service::{
    config, db, error, logging, routes,
    services::delivery::DeliveryCoordinator,
    state::AppState,
    websocket::{ConversationRooms, PresenceRegistry},
};
use std::sync::Arc;
use tracing_actix_web::TracingLogger;

#[tokio::main]
async fn main() -> Result<(), error::AppError> {
    logging::init_tracing();
    let cfg = Arc::new(config::Config::from_env()?);

    let db = db::init_pool(&cfg.database_url).await?;
    db::run_migrations(&db)
        .await
        .map_err(|e| error::AppError::StartServer(format!("migrations: {e}")))?;

    // Presence and rooms are process-local and in-memory; a restart empties
    // them and clients re-identify on reconnect.
    let presence = PresenceRegistry::new();
    let rooms = ConversationRooms::new();
    let delivery = DeliveryCoordinator::new(presence, rooms);

    let state = AppState {
        db: db.clone(),
        delivery,
        config: cfg.clone(),
    };

    let bind_addr = format!("0.0.0.0:{}", cfg.port);
    tracing::info!(%bind_addr, "starting realtime-messaging-service");

    HttpServer::new(move || {
        let cors = actix_cors::Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .wrap(cors)
            .wrap(TracingLogger::default())
            .app_data(web::Data::new(state.clone()))
            .service(routes::messages::send_message)
            .service(routes::messages::get_conversation_messages)
            .service(routes::messages::search_user_messages)
            .service(routes::messages::search_conversation)
            .service(routes::messages::edit_message)
            .service(routes::messages::delete_message)
            .service(routes::messages::mark_conversation_read)
            .service(routes::conversations::get_conversations)
            .service(routes::wsroute::ws_handler)
            .route("/health", web::get().to(|| async { "OK" }))
    })
    .bind(&bind_addr)
    .map_err(|e| error::AppError::StartServer(format!("bind: {e}")))?
    .run()
    .await
    .map_err(|e| error::AppError::StartServer(format!("run server: {e}")))
}
