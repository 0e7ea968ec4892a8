use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use dotenv::dotenv;
use tower_http::cors::CorsLayer;

use gradegate_server::actions::ActionLogService;
use gradegate_server::alerts::{AlertEngine, AlertLogService, DEFAULT_ALERT_COOLDOWN};
use gradegate_server::anticheat::AntiCheatService;
use gradegate_server::archive::{ArchiveStore, DirArchiveStore};
use gradegate_server::engine::{ExecutionEngine, PistonEngine};
use gradegate_server::handlers::{self, AppContext};
use gradegate_server::init::InitService;
use gradegate_server::judge::{JudgeService, JudgeSettings};
use gradegate_server::network::StudentNetworkService;
use gradegate_server::notify::{BroadcastNotifier, Notification, Notifier};
use gradegate_server::scoreboard::ScoreboardService;
use gradegate_server::store::memory::MemoryConfigStore;
use gradegate_server::store::mongo::{
    self, MongoActionLogRepo, MongoAlertLogRepo, MongoScoreboardRepo, MongoStudentNetworkRepo,
    MongoViolationLogRepo,
};
use gradegate_server::store::{
    ActionLogRepo, AlertLogRepo, ConfigStore, ScoreboardRepo, StudentNetworkRepo, ViolationLogRepo,
};
use gradegate_server::violations::ViolationLogService;

#[tokio::main]
async fn main() {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let mongo_uri = env::var("MONGO_URI").expect("MONGO_URI must be set");
    let db_name = env::var("MONGO_DB").unwrap_or_else(|_| "gradegate_db".to_string());
    let db = match mongo::connect(&mongo_uri, &db_name).await {
        Ok(db) => db,
        Err(e) => {
            eprintln!("[error] failed to connect to database: {}", e);
            std::process::exit(1);
        }
    };

    let judger_url = env::var("JUDGER_URL").unwrap_or_else(|_| "http://localhost:2000".to_string());
    let upload_dir = env::var("UPLOAD_DIR").unwrap_or_else(|_| "upload".to_string());
    let cooldown = env::var("ALERT_COOLDOWN_MS")
        .ok()
        .and_then(|raw| raw.parse().ok())
        .map(Duration::from_millis)
        .unwrap_or(DEFAULT_ALERT_COOLDOWN);

    // repositories
    let scoreboard_repo: Arc<dyn ScoreboardRepo> = Arc::new(MongoScoreboardRepo::new(&db));
    let network_repo: Arc<dyn StudentNetworkRepo> = Arc::new(MongoStudentNetworkRepo::new(&db));
    let violation_repo: Arc<dyn ViolationLogRepo> = Arc::new(MongoViolationLogRepo::new(&db));
    let alert_repo: Arc<dyn AlertLogRepo> = Arc::new(MongoAlertLogRepo::new(&db));
    let action_repo: Arc<dyn ActionLogRepo> = Arc::new(MongoActionLogRepo::new(&db));
    let config_store: Arc<dyn ConfigStore> = Arc::new(MemoryConfigStore::default());

    // external collaborators
    let notifier = Arc::new(BroadcastNotifier::new(64));
    let notifier_dyn: Arc<dyn Notifier> = notifier.clone();
    let execution_engine: Arc<dyn ExecutionEngine> = Arc::new(PistonEngine::new(&judger_url));
    let archive: Arc<dyn ArchiveStore> = Arc::new(DirArchiveStore::new(&upload_dir));

    // services, wired once and shared by reference
    let scoreboard = Arc::new(ScoreboardService::new(
        Arc::clone(&scoreboard_repo),
        Arc::clone(&notifier_dyn),
    ));
    let network = Arc::new(StudentNetworkService::new(Arc::clone(&network_repo)));
    let violations = Arc::new(ViolationLogService::new(Arc::clone(&violation_repo)));
    let judge = Arc::new(JudgeService::new(
        execution_engine,
        archive,
        Arc::clone(&config_store),
        Arc::clone(&scoreboard),
        JudgeSettings::from_env(),
    ));
    let alert_engine = Arc::new(AlertEngine::new(
        Arc::clone(&action_repo),
        Arc::clone(&alert_repo),
        Arc::clone(&notifier_dyn),
    ));
    let alerts = Arc::new(AlertLogService::new(
        Arc::clone(&alert_repo),
        alert_engine,
        cooldown,
    ));
    let anticheat = Arc::new(AntiCheatService::new(
        Arc::clone(&action_repo),
        Arc::clone(&network),
        Arc::clone(&violations),
        Arc::clone(&notifier_dyn),
    ));
    let actions = Arc::new(ActionLogService::new(Arc::clone(&action_repo)));
    let init = Arc::new(InitService::new(
        scoreboard_repo,
        action_repo,
        violation_repo,
        alert_repo,
        Arc::clone(&network),
        config_store,
    ));

    let ctx = Arc::new(AppContext {
        judge,
        anticheat,
        scoreboard,
        network,
        violations,
        alerts,
        actions,
        init,
    });

    // delivery log for the push channel; real transports subscribe the same way
    let mut pushes = notifier.subscribe();
    tokio::spawn(async move {
        loop {
            match pushes.recv().await {
                Ok(notification) => match &notification {
                    Notification::ScoreboardUpdated(rows) => {
                        tracing::info!("[notify] scoreboard snapshot pushed ({} rows)", rows.len());
                    }
                    Notification::Violations(rows) => {
                        tracing::info!("[notify] violation list pushed ({} rows)", rows.len());
                    }
                    Notification::Alerts(rows) => {
                        tracing::info!("[notify] alert list pushed ({} rows)", rows.len());
                    }
                },
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("[notify] delivery log lagged, skipped {}", skipped);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let app = Router::new()
        .route("/health", get(handlers::health_checker))
        .route(
            "/api/logs",
            get(handlers::get_action_logs).post(handlers::ingest_logs),
        )
        .route("/api/judge/:student_id", post(handlers::judge_student))
        .route("/api/scoreboard", get(handlers::get_scoreboard))
        .route(
            "/api/scoreboard/:student_id",
            get(handlers::get_student_score),
        )
        .route("/api/psk/:student_id", post(handlers::issue_psk))
        .route("/api/violations", get(handlers::get_violations))
        .route(
            "/api/violations/:id",
            get(handlers::get_violation).delete(handlers::delete_violation),
        )
        .route("/api/violations/:id/ack", post(handlers::ack_violation))
        .route(
            "/api/violations/student/:student_id",
            get(handlers::get_student_violations),
        )
        .route("/api/alerts", get(handlers::get_alerts))
        .route("/api/alerts/check", post(handlers::check_alerts))
        .route(
            "/api/alerts/:id",
            get(handlers::get_alert).delete(handlers::delete_alert),
        )
        .route("/api/alerts/:id/ack", post(handlers::ack_alert))
        .route(
            "/api/network/:student_id",
            get(handlers::get_network_record),
        )
        .route(
            "/api/admin/network/:student_id/clear",
            post(handlers::clear_network_devices),
        )
        .route(
            "/api/admin/network/:student_id/psk",
            post(handlers::set_psk_issued),
        )
        .route("/api/admin/init", post(handlers::admin_init))
        .route("/api/admin/reset", post(handlers::admin_reset))
        // exam clients connect from the lab network
        .layer(CorsLayer::permissive())
        .with_state(ctx);

    let addr: SocketAddr = env::var("BIND_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:3000".to_string())
        .parse()
        .expect("BIND_ADDR must be host:port");
    tracing::info!("[server] started on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
