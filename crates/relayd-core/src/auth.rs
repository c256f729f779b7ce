use std::collections::BTreeSet;

use tracing::{info, warn};

use crate::{
    domain::SenderId,
    store::{StateStore, ADMIN_KEY, ALLOWLIST_KEY},
    Result,
};

// ============== Authorization State ==============

/// Admin identity plus the allow-list, owned by the bot loop.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AuthorizationState {
    admin: Option<SenderId>,
    allowed: BTreeSet<SenderId>,
}

impl AuthorizationState {
    pub fn admin(&self) -> Option<SenderId> {
        self.admin
    }

    /// Allow-list in ascending order.
    pub fn members(&self) -> Vec<SenderId> {
        self.allowed.iter().copied().collect()
    }

    pub fn is_admin(&self, id: SenderId) -> bool {
        self.admin == Some(id)
    }

    pub fn is_authorized(&self, id: SenderId) -> bool {
        self.allowed.contains(&id) || self.is_admin(id)
    }

    fn raw_allowed(&self) -> BTreeSet<i64> {
        self.allowed.iter().map(|id| id.0).collect()
    }
}

/// Outcome of [`Authorizer::bootstrap`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Bootstrap {
    /// The sender is the first ever observed and is now admin.
    BecameAdmin,
    /// Admin was already known but missing from the allow-list; re-added.
    Reconciled,
    Unchanged,
}

/// Outcome of [`Authorizer::revoke`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Revoke {
    Removed,
    NotPresent,
    /// The admin cannot be removed from the allow-list.
    Refused,
}

// ============== Authorization Engine ==============

/// Applies the bootstrap/grant/revoke rules and flushes every mutation to
/// the store before returning.
pub struct Authorizer<S> {
    store: S,
    state: AuthorizationState,
}

impl<S: StateStore> Authorizer<S> {
    /// Load durable state, degrading to empty/absent on any storage error.
    ///
    /// `seed` ids (from config) are merged into the allow-list.
    pub fn load(store: S, seed: &[i64]) -> Self {
        let admin = match store.load_scalar(ADMIN_KEY) {
            Ok(v) => v.map(SenderId),
            Err(e) => {
                warn!("admin record unusable, starting admin-less: {e}");
                None
            }
        };
        let allowed = match store.load_set(ALLOWLIST_KEY) {
            Ok(set) => set.into_iter().map(SenderId).collect(),
            Err(e) => {
                warn!("allow-list unusable, starting empty: {e}");
                BTreeSet::new()
            }
        };

        let mut auth = Self {
            store,
            state: AuthorizationState { admin, allowed },
        };

        let before = auth.state.allowed.len();
        auth.state
            .allowed
            .extend(seed.iter().copied().map(SenderId));
        if auth.state.allowed.len() != before {
            auth.flush_allowed_logged();
        }

        info!(
            admin = ?auth.state.admin.map(|a| a.0),
            allowed = auth.state.allowed.len(),
            "authorization state loaded"
        );
        auth
    }

    pub fn state(&self) -> &AuthorizationState {
        &self.state
    }

    pub fn is_authorized(&self, id: SenderId) -> bool {
        self.state.is_authorized(id)
    }

    pub fn is_admin(&self, id: SenderId) -> bool {
        self.state.is_admin(id)
    }

    /// Runs for every inbound update before the authorization gate.
    ///
    /// Sets the admin on first contact and always reconciles the admin into
    /// the allow-list, so a lost allow-list file cannot lock the admin out.
    pub fn bootstrap(&mut self, sender: SenderId) -> Bootstrap {
        match self.state.admin {
            None => {
                self.state.admin = Some(sender);
                self.state.allowed.insert(sender);
                if let Err(e) = self.store.save_scalar(ADMIN_KEY, sender.0) {
                    warn!(admin = sender.0, "failed to persist admin: {e}");
                }
                self.flush_allowed_logged();
                info!(admin = sender.0, "admin learned");
                Bootstrap::BecameAdmin
            }
            Some(admin) if !self.state.allowed.contains(&admin) => {
                self.state.allowed.insert(admin);
                self.flush_allowed_logged();
                info!(admin = admin.0, "admin re-added to allow-list");
                Bootstrap::Reconciled
            }
            Some(_) => Bootstrap::Unchanged,
        }
    }

    /// Add `target` to the allow-list. Returns `true` if it was not present.
    pub fn grant(&mut self, target: SenderId) -> Result<bool> {
        let added = self.state.allowed.insert(target);
        if added {
            self.flush_allowed()?;
            info!(target = target.0, "sender allowed");
        }
        Ok(added)
    }

    pub fn revoke(&mut self, target: SenderId) -> Result<Revoke> {
        if self.state.is_admin(target) {
            return Ok(Revoke::Refused);
        }
        if !self.state.allowed.remove(&target) {
            return Ok(Revoke::NotPresent);
        }
        self.flush_allowed()?;
        info!(target = target.0, "sender revoked");
        Ok(Revoke::Removed)
    }

    fn flush_allowed(&self) -> Result<()> {
        self.store
            .save_set(ALLOWLIST_KEY, &self.state.raw_allowed())
    }

    fn flush_allowed_logged(&self) {
        if let Err(e) = self.flush_allowed() {
            warn!("failed to persist allow-list: {e}");
        }
    }
}
