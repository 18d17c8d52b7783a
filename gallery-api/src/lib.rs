pub mod config;
pub mod errors;
pub mod http;
pub mod metrics_defs;
mod router;

use crate::errors::ApiError;
use crate::http::ApiBody;
use hyper::body::Incoming;
use hyper::service::Service;
use hyper::{Request, Response};
use settings_store::SettingsStore;
use shared::admin_service::AdminService;
use shared::http::run_http_service;
use std::future::Future;
use std::pin::Pin;
use tokio::sync::watch;

pub use router::Router;

/// Serves the settings API and the admin listener until `shutdown` flips to
/// `true`. The store is owned by the caller, which decides its lifetime.
pub async fn run(
    config: config::Config,
    store: SettingsStore,
    shutdown: watch::Receiver<bool>,
) -> Result<(), ApiError> {
    let api_service = SettingsApiService {
        router: Router::new(store.clone(), config.legacy_project.clone()),
    };
    let admin_service = AdminService::<_, ApiError>::new(move || store.is_ready());

    let api_task = run_http_service(
        &config.listener.host,
        config.listener.port,
        api_service,
        wait_for_shutdown(shutdown.clone()),
    );
    let admin_task = run_http_service(
        &config.admin_listener.host,
        config.admin_listener.port,
        admin_service,
        wait_for_shutdown(shutdown),
    );

    tokio::try_join!(api_task, admin_task)?;
    Ok(())
}

async fn wait_for_shutdown(mut shutdown: watch::Receiver<bool>) {
    // A dropped sender also means shutdown
    let _ = shutdown.wait_for(|stop| *stop).await;
}

struct SettingsApiService {
    router: Router,
}

impl Service<Request<Incoming>> for SettingsApiService {
    type Response = Response<ApiBody>;
    type Error = ApiError;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let router = self.router.clone();
        Box::pin(async move { Ok(router.route(req).await) })
    }
}
