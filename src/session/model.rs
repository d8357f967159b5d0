use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

use crate::apps::App;

/// BI: durable pointer to the browser's audit session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowserCookie {
    pub v: u32,
    pub session: Uuid,
}

/// The authenticated part shared by pending and final sessions.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: Uuid,
    pub groups: Vec<String>,
    pub access_token: Uuid,
    pub logout_token: Uuid,
    pub session: Uuid,
    /// Apps the user consented to from this browser.
    #[serde(default)]
    pub confirmed: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_id: Option<String>,
}

impl Identity {
    #[must_use]
    pub fn is_confirmed(&self, app_id: &str) -> bool {
        self.confirmed.contains(app_id)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingTfa {
    pub secret: String,
}

/// Request context captured at credential entry, consumed at `setup-token`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingLogin {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cb: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub challenge: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub location: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tfa: Option<PendingTfa>,
}

/// Login progress carried by II (pending) or LI (final).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum SessionState {
    Pending { base: Identity, temp: PendingLogin },
    Final { base: Identity },
}

impl SessionState {
    #[must_use]
    pub fn base(&self) -> &Identity {
        match self {
            Self::Pending { base, .. } | Self::Final { base } => base,
        }
    }

    pub fn base_mut(&mut self) -> &mut Identity {
        match self {
            Self::Pending { base, .. } | Self::Final { base } => base,
        }
    }

    #[must_use]
    pub fn pending(&self) -> Option<&PendingLogin> {
        match self {
            Self::Pending { temp, .. } => Some(temp),
            Self::Final { .. } => None,
        }
    }

    pub fn pending_mut(&mut self) -> Option<&mut PendingLogin> {
        match self {
            Self::Pending { temp, .. } => Some(temp),
            Self::Final { .. } => None,
        }
    }

    #[must_use]
    pub fn awaiting_tfa(&self) -> bool {
        self.pending().is_some_and(|temp| temp.tfa.is_some())
    }

    /// Drop the pending request context, keeping the identity.
    #[must_use]
    pub fn finalize(self) -> Self {
        match self {
            Self::Pending { base, .. } | Self::Final { base } => Self::Final { base },
        }
    }

    /// Project the session onto the stage the client must complete for `app`.
    ///
    /// `profile_pending` is true when the app gates on a profile pick that has not
    /// been made yet.
    #[must_use]
    pub fn stage(&self, app: &App, profile_pending: bool) -> Stage {
        if self.awaiting_tfa() {
            return Stage::Tfa;
        }
        if app.requires_confirmation() && !self.base().is_confirmed(&app.app_id) {
            return Stage::ConfirmApp;
        }
        if app.profile_required && profile_pending {
            return Stage::Profile;
        }
        Stage::LoggedIn
    }
}

/// II/LI payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityCookie {
    pub v: u32,
    pub state: SessionState,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Login,
    Tfa,
    ConfirmApp,
    Profile,
    LoggedIn,
}

impl Stage {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::Tfa => "tfa",
            Self::ConfirmApp => "confirmapp",
            Self::Profile => "profile",
            Self::LoggedIn => "loggedin",
        }
    }
}
