use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::errors::EcallError;
use crate::events::AppEventListener;
use crate::navigator::{Navigator, Route};
use crate::screens::{HomeScreen, LoginScreen};
use crate::services::AppServices;

/// Application root: the service context plus the two-route navigator.
pub struct App {
    services: AppServices,
    navigator: Navigator,
    router: Option<JoinHandle<()>>,
}

impl App {
    pub fn new(services: AppServices) -> Self {
        let navigator = Navigator::new(services.emitter.clone());
        Self {
            services,
            navigator,
            router: None,
        }
    }

    /// Start following the session stream. Must run inside a tokio runtime.
    pub fn start(&mut self) {
        if self.router.is_some() {
            return;
        }
        let sessions = self.services.identity.on_session_change();
        self.router = Some(
            self.navigator
                .spawn_session_router(sessions, self.services.emitter.clone()),
        );
        tracing::info!("app started");
    }

    pub fn add_listener(&self, listener: Arc<dyn AppEventListener>) {
        self.services.emitter.add_listener(listener);
    }

    pub fn services(&self) -> &AppServices {
        &self.services
    }

    pub fn navigator(&self) -> &Navigator {
        &self.navigator
    }

    pub fn route(&self) -> Route {
        self.navigator.current()
    }

    pub fn login_screen(&self) -> LoginScreen {
        LoginScreen::new(self.services.clone(), self.navigator.clone())
    }

    /// Home renders nothing until a session is present.
    pub fn home_screen(&self) -> Result<Option<HomeScreen>, EcallError> {
        match self.services.identity.on_session_change().current() {
            Some(session) => HomeScreen::mount(&self.services, session).map(Some),
            None => Ok(None),
        }
    }
}

impl Drop for App {
    fn drop(&mut self) {
        if let Some(router) = self.router.take() {
            router.abort();
        }
    }
}
