use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};

use crate::model::CurrentUser;

/// Live connectivity as reported by the host OS or browser.
pub trait ConnectivitySignal: Send + Sync {
    fn is_online(&self) -> bool;
}

/// Signal whose value is set by the shell (or a test).
#[derive(Debug)]
pub struct StaticSignal(AtomicBool);

impl StaticSignal {
    pub fn new(online: bool) -> Self {
        Self(AtomicBool::new(online))
    }

    pub fn set(&self, online: bool) {
        self.0.store(online, Ordering::SeqCst);
    }
}

impl ConnectivitySignal for StaticSignal {
    fn is_online(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Read-only view of the signed-in user.
pub trait SessionProvider: Send + Sync {
    fn current_user(&self) -> Option<CurrentUser>;
}

/// Session pushed in by the auth shell on sign-in/sign-out.
#[derive(Debug, Default)]
pub struct StaticSession {
    user: RwLock<Option<CurrentUser>>,
}

impl StaticSession {
    pub fn signed_out() -> Self {
        Self::default()
    }

    pub fn signed_in(user: CurrentUser) -> Self {
        Self {
            user: RwLock::new(Some(user)),
        }
    }

    pub fn sign_in(&self, user: CurrentUser) {
        *self.user.write().unwrap_or_else(PoisonError::into_inner) = Some(user);
    }

    pub fn sign_out(&self) {
        *self.user.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl SessionProvider for StaticSession {
    fn current_user(&self) -> Option<CurrentUser> {
        self.user
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
