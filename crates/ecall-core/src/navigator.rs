use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;

use crate::auth::SessionSubscription;
use crate::events::{AppEvent, EventEmitter, Session};
use crate::sync::lock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// `/`
    Login,
    /// `/home`
    Home,
}

impl Route {
    pub fn path(self) -> &'static str {
        match self {
            Route::Login => "/",
            Route::Home => "/home",
        }
    }
}

/// Two-route navigator. Redirects are driven by the session subscription.
#[derive(Clone)]
pub struct Navigator {
    current: Arc<Mutex<Route>>,
    emitter: EventEmitter,
}

impl Navigator {
    pub fn new(emitter: EventEmitter) -> Self {
        Self {
            current: Arc::new(Mutex::new(Route::Login)),
            emitter,
        }
    }

    pub fn current(&self) -> Route {
        *lock(&self.current)
    }

    /// Navigate to `route`. Returns false if already there.
    pub fn navigate(&self, route: Route) -> bool {
        {
            let mut current = lock(&self.current);
            if *current == route {
                return false;
            }
            *current = route;
        }
        tracing::info!("navigated to {}", route.path());
        self.emitter.emit(AppEvent::Navigated(route));
        true
    }

    /// Apply the redirect rule for a session notification: a session moves
    /// `/` to `/home`, no session moves `/home` to `/`.
    pub fn on_session(&self, session: Option<&Session>) -> Route {
        match (session.is_some(), self.current()) {
            (true, Route::Login) => {
                self.navigate(Route::Home);
            }
            (false, Route::Home) => {
                self.navigate(Route::Login);
            }
            _ => {}
        }
        self.current()
    }

    /// Drain `sessions` for the lifetime of the app, redirecting on each
    /// notification.
    pub fn spawn_session_router(
        &self,
        mut sessions: SessionSubscription,
        emitter: EventEmitter,
    ) -> JoinHandle<()> {
        let navigator = self.clone();
        tokio::spawn(async move {
            while let Some(session) = sessions.next().await {
                emitter.emit(AppEvent::SessionChanged(session.clone()));
                navigator.on_session(session.as_ref());
            }
            tracing::debug!("session router ended");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthState;
    use std::time::Duration;

    fn session() -> Session {
        Session {
            uid: "u1".into(),
            phone_number: "+881711000000".into(),
            id_token: "tok".into(),
            refresh_token: None,
        }
    }

    #[test]
    fn paths() {
        assert_eq!(Route::Login.path(), "/");
        assert_eq!(Route::Home.path(), "/home");
    }

    #[test]
    fn session_presence_redirects_login_to_home() {
        let nav = Navigator::new(EventEmitter::new());
        assert_eq!(nav.on_session(Some(&session())), Route::Home);
        assert_eq!(nav.on_session(Some(&session())), Route::Home);
    }

    #[test]
    fn session_absence_redirects_home_to_login() {
        let nav = Navigator::new(EventEmitter::new());
        nav.navigate(Route::Home);
        assert_eq!(nav.on_session(None), Route::Login);
        assert_eq!(nav.on_session(None), Route::Login);
    }

    #[test]
    fn navigate_to_current_route_is_a_noop() {
        let nav = Navigator::new(EventEmitter::new());
        assert!(!nav.navigate(Route::Login));
        assert!(nav.navigate(Route::Home));
    }

    #[tokio::test]
    async fn router_follows_session_changes() {
        let emitter = EventEmitter::new();
        let nav = Navigator::new(emitter.clone());
        let state = AuthState::default();
        let router = nav.spawn_session_router(state.subscribe(), emitter);

        state.set(Some(session()));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(nav.current(), Route::Home);

        state.set(None);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(nav.current(), Route::Login);

        router.abort();
    }
}
