//! Control arbitration: which single session may drive the desktop.
//!
//! The host pointer lives in the [`Registry`] and every transition goes
//! through its table lock, so concurrent requests, takes, gives, releases
//! and disconnects are linearized and at most one session is ever host.

use cohost_types::{ControlHost, ServerMessage, SessionId};
use tracing::{debug, info, warn};

use crate::error::ServerError;
use crate::registry::Registry;

/// Result of a control request that was not refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlOutcome {
    /// The requester is now host.
    Granted,
    /// The requester already was host.
    AlreadyHost,
    /// Another session holds control. It has been told who is asking.
    HostBusy(SessionId),
}

impl Registry {
    /// Ask for control.
    ///
    /// Non-admins are refused while controls are locked, in private mode,
    /// and while control protection is on with no admin connected. A refused requester gets a
    /// `control/locked` message. When someone else is host, the requester
    /// is told who and the host gets `control/requesting`.
    pub fn request_control(&self, id: &SessionId) -> Result<ControlOutcome, ServerError> {
        let _emit = self.emit.lock();
        let (session, outcome, events) = {
            let mut state = self.state.lock();
            let Some(session) = state.sessions.get(id).cloned() else {
                warn!(session_id = %id, "control request from unknown session");
                return Err(ServerError::NotFound(id.clone()));
            };
            let profile = session.profile();
            if !profile.can_host {
                debug!(session_id = %id, "control request without host permission");
                return Err(ServerError::Unauthorized(format!("{id} may not host")));
            }
            if state.host.as_ref() == Some(id) {
                return Ok(ControlOutcome::AlreadyHost);
            }

            let refusal = if profile.is_admin {
                None
            } else if state.settings.locked_controls {
                Some("controls are locked")
            } else if state.settings.private_mode {
                Some("private mode is enabled")
            } else if state.settings.control_protection && !state.admin_connected() {
                Some("no admin is connected")
            } else {
                None
            };
            if let Some(reason) = refusal {
                let host_id = state.host.clone();
                drop(state);
                debug!(session_id = %id, reason, "control request refused");
                session.notify(&ServerMessage::ControlLocked {
                    has_host: host_id.is_some(),
                    host_id,
                    reason: reason.to_string(),
                });
                return Err(ServerError::Forbidden(reason.to_string()));
            }

            match state.host.clone() {
                Some(host) => (session, ControlOutcome::HostBusy(host), Vec::new()),
                None => {
                    let events: Vec<_> = state.replace_host(Some(id.clone())).into_iter().collect();
                    (session, ControlOutcome::Granted, events)
                }
            }
        };

        match &outcome {
            ControlOutcome::Granted => info!(session_id = %id, "control granted"),
            ControlOutcome::HostBusy(host) => {
                debug!(session_id = %id, host_id = %host, "control requested while host busy");
                session.notify(&ServerMessage::ControlHost(ControlHost::new(Some(
                    host.clone(),
                ))));
                if let Some(host) = self.get(host) {
                    host.notify(&ServerMessage::ControlRequesting { id: id.clone() });
                }
            }
            ControlOutcome::AlreadyHost => {}
        }
        self.dispatch(&events);
        Ok(outcome)
    }

    /// Give up control. Only the host may release.
    pub fn release_control(&self, id: &SessionId) -> Result<(), ServerError> {
        let _emit = self.emit.lock();
        let event = {
            let mut state = self.state.lock();
            if !state.sessions.contains_key(id) {
                warn!(session_id = %id, "control release from unknown session");
                return Err(ServerError::NotFound(id.clone()));
            }
            state
                .release_if_host(id)
                .ok_or_else(|| ServerError::Forbidden(format!("{id} is not the host")))?
        };
        info!(session_id = %id, "control released");
        self.dispatch(&[event]);
        Ok(())
    }

    /// Admin takes control regardless of who holds it.
    pub fn take_control(&self, admin_id: &SessionId) -> Result<(), ServerError> {
        let _emit = self.emit.lock();
        let events: Vec<_> = {
            let mut state = self.state.lock();
            require_admin(&state.sessions, admin_id)?;
            state.replace_host(Some(admin_id.clone())).into_iter().collect()
        };
        info!(session_id = %admin_id, "control taken");
        self.dispatch(&events);
        Ok(())
    }

    /// Admin hands control to `target_id`, which must exist and be allowed
    /// to host.
    pub fn give_control(&self, admin_id: &SessionId, target_id: &SessionId) -> Result<(), ServerError> {
        let _emit = self.emit.lock();
        let events: Vec<_> = {
            let mut state = self.state.lock();
            require_admin(&state.sessions, admin_id)?;
            let Some(target) = state.sessions.get(target_id) else {
                warn!(session_id = %admin_id, target_id = %target_id, "control give to unknown session");
                return Err(ServerError::NotFound(target_id.clone()));
            };
            if !target.profile().can_host {
                return Err(ServerError::Unauthorized(format!("{target_id} may not host")));
            }
            if state.is_private_for(target) {
                return Err(ServerError::Forbidden("private mode is enabled".into()));
            }
            state.replace_host(Some(target_id.clone())).into_iter().collect()
        };
        info!(session_id = %admin_id, target_id = %target_id, "control given");
        self.dispatch(&events);
        Ok(())
    }

    /// Admin clears the host.
    pub fn reset_control(&self, admin_id: &SessionId) -> Result<(), ServerError> {
        let _emit = self.emit.lock();
        let events: Vec<_> = {
            let mut state = self.state.lock();
            require_admin(&state.sessions, admin_id)?;
            state.replace_host(None).into_iter().collect()
        };
        info!(session_id = %admin_id, "control reset");
        self.dispatch(&events);
        Ok(())
    }

    /// Admin locks controls for non-admins.
    pub fn lock_control(&self, admin_id: &SessionId) -> Result<(), ServerError> {
        self.set_controls_locked(admin_id, true)
    }

    /// Admin unlocks controls.
    pub fn unlock_control(&self, admin_id: &SessionId) -> Result<(), ServerError> {
        self.set_controls_locked(admin_id, false)
    }

    fn set_controls_locked(&self, admin_id: &SessionId, locked: bool) -> Result<(), ServerError> {
        let _emit = self.emit.lock();
        require_admin(&self.state.lock().sessions, admin_id)?;
        self.update_settings(|s| s.locked_controls = locked);
        Ok(())
    }
}

fn require_admin(
    sessions: &std::collections::HashMap<SessionId, std::sync::Arc<crate::session::Session>>,
    id: &SessionId,
) -> Result<(), ServerError> {
    match sessions.get(id) {
        None => {
            warn!(session_id = %id, "admin control action from unknown session");
            Err(ServerError::NotFound(id.clone()))
        }
        Some(s) if !s.is_admin() => {
            debug!(session_id = %id, "admin control action by non-admin");
            Err(ServerError::Unauthorized(format!("{id} is not an admin")))
        }
        Some(_) => Ok(()),
    }
}
