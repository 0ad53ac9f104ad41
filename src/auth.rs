// MIT License - Copyright (c) 2026 Peter Wright

//! Login state machine.
//!
//! Login can complete directly or detour through device authorization:
//! the cloud offers a list of account phones, an OTP is sent to the chosen
//! one, and verifying the received code authorizes the device. The machine
//! holds exactly one [`AuthState`] value; every transition computes a new
//! state from the old one, so a session and a pending OTP challenge can
//! never coexist.
//!
//! Network calls stay outside: the orchestrating client performs them and
//! feeds the outcomes in. The machine guards each transition against the
//! current state and persists the session on every transition into
//! `Authenticated`.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Result, VerisureError};
use crate::session::{Session, SessionStore};

/// One phone offered for OTP delivery. The number is masked by the vendor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtpPhone {
    pub id: i32,
    pub phone: String,
}

/// A pending device-authorization challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtpChallenge {
    pub phones: Vec<OtpPhone>,
    pub otp_hash: String,
    pub selected_phone_id: Option<i32>,
}

impl OtpChallenge {
    /// Build a challenge from the vendor's error extensions.
    ///
    /// An empty phone list or missing hash means the challenge data was
    /// cleared or malformed and OTP cannot proceed.
    pub fn new(phones: Vec<OtpPhone>, otp_hash: String) -> Result<Self> {
        if phones.is_empty() || otp_hash.is_empty() {
            return Err(VerisureError::otp("Invalid OTP data received"));
        }
        Ok(Self {
            phones,
            otp_hash,
            selected_phone_id: None,
        })
    }

    pub fn contains_phone(&self, id: i32) -> bool {
        self.phones.iter().any(|p| p.id == id)
    }
}

/// Result of submitting credentials (or an OTP verification) upstream.
#[derive(Debug, Clone)]
pub enum LoginOutcome {
    /// The cloud granted a session directly.
    Granted(Session),
    /// The cloud requires this device to be authorized via OTP first.
    /// `pending_token` is the provisional login token the OTP calls
    /// authenticate with.
    DeviceAuthRequired {
        phones: Vec<OtpPhone>,
        otp_hash: String,
        pending_token: String,
    },
}

/// Parameters for dispatching the OTP SMS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtpDispatch {
    pub record_id: i32,
    pub otp_hash: String,
    /// Provisional token for the send call.
    pub token: String,
}

/// Parameters for verifying a received OTP code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtpVerification {
    pub otp_hash: String,
    /// Provisional token for the verify call.
    pub token: String,
}

/// The authentication lifecycle.
#[derive(Debug, Clone, Default)]
pub enum AuthState {
    /// No credentials submitted (or logged out).
    #[default]
    Idle,
    /// Login accepted but the device needs authorization; a phone must be chosen.
    AwaitingDeviceAuth {
        challenge: OtpChallenge,
        pending_token: String,
    },
    /// A phone is selected; an OTP can be (re)sent and verified.
    AwaitingOtp {
        challenge: OtpChallenge,
        pending_token: String,
    },
    /// Holding a live session.
    Authenticated { session: Session },
    /// A non-recoverable failure; requires an explicit reset.
    Failed { reason: String },
}

impl AuthState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::AwaitingDeviceAuth { .. } => "AwaitingDeviceAuth",
            Self::AwaitingOtp { .. } => "AwaitingOtp",
            Self::Authenticated { .. } => "Authenticated",
            Self::Failed { .. } => "Failed",
        }
    }
}

/// Owns the [`AuthState`] and the session persistence side effects.
pub struct AuthMachine {
    state: AuthState,
    store: Box<dyn SessionStore>,
}

impl AuthMachine {
    pub fn new(store: Box<dyn SessionStore>) -> Self {
        Self {
            state: AuthState::Idle,
            store,
        }
    }

    pub fn state(&self) -> &AuthState {
        &self.state
    }

    /// The live session, if authenticated.
    pub fn session(&self) -> Option<&Session> {
        match &self.state {
            AuthState::Authenticated { session } => Some(session),
            _ => None,
        }
    }

    /// Phones of the pending challenge; empty outside the OTP flow.
    pub fn available_phones(&self) -> Vec<OtpPhone> {
        match &self.state {
            AuthState::AwaitingDeviceAuth { challenge, .. }
            | AuthState::AwaitingOtp { challenge, .. } => challenge.phones.clone(),
            _ => Vec::new(),
        }
    }

    /// Resume a persisted session if one exists and is still inside its
    /// validity window. Returns whether a session was restored.
    pub fn restore(&mut self, max_age_secs: i64) -> Result<bool> {
        if let Some(session) = self.store.load()? {
            if session.is_valid(max_age_secs) {
                info!("Resuming persisted session for {}", session.data.user);
                self.state = AuthState::Authenticated { session };
                return Ok(true);
            }
            debug!("Persisted session expired; login required");
        }
        Ok(false)
    }

    /// Guard for starting a login. A failed machine must be reset first;
    /// a fresh login attempt supersedes any pending OTP challenge.
    pub fn begin_login(&mut self) -> Result<()> {
        if let AuthState::Failed { reason } = &self.state {
            return Err(VerisureError::auth(format!(
                "Authentication previously failed ({reason}); reset before retrying"
            )));
        }
        if !matches!(self.state, AuthState::Idle) {
            debug!("Login superseding state {}", self.state.name());
            self.state = AuthState::Idle;
        }
        Ok(())
    }

    /// Apply the outcome of a credential submission.
    pub fn complete_login(&mut self, outcome: LoginOutcome) -> Result<&AuthState> {
        match outcome {
            LoginOutcome::Granted(session) => {
                self.persist(&session);
                info!("Authenticated as {}", session.data.user);
                self.state = AuthState::Authenticated { session };
            }
            LoginOutcome::DeviceAuthRequired {
                phones,
                otp_hash,
                pending_token,
            } => {
                let challenge = OtpChallenge::new(phones, otp_hash)?;
                info!(
                    "Device authorization required; {} phone(s) offered",
                    challenge.phones.len()
                );
                self.state = AuthState::AwaitingDeviceAuth {
                    challenge,
                    pending_token,
                };
            }
        }
        Ok(&self.state)
    }

    /// Record a non-recoverable failure.
    pub fn fail(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        warn!("Authentication failed: {reason}");
        self.state = AuthState::Failed { reason };
    }

    /// Select the phone that should receive the OTP.
    ///
    /// Returns true iff `id` names a phone of the current challenge; on
    /// false the state (including the phone list) is unchanged.
    pub fn select_phone(&mut self, id: i32) -> bool {
        let (challenge, pending_token) = match &self.state {
            AuthState::AwaitingDeviceAuth {
                challenge,
                pending_token,
            }
            | AuthState::AwaitingOtp {
                challenge,
                pending_token,
            } => (challenge, pending_token),
            _ => {
                warn!("select_phone({id}) in state {}", self.state.name());
                return false;
            }
        };
        if !challenge.contains_phone(id) {
            warn!("Phone id {id} not in the OTP challenge");
            return false;
        }
        let mut challenge = challenge.clone();
        let pending_token = pending_token.clone();
        challenge.selected_phone_id = Some(id);
        debug!("Phone {id} selected for OTP");
        self.state = AuthState::AwaitingOtp {
            challenge,
            pending_token,
        };
        true
    }

    /// Parameters for dispatching the OTP SMS.
    ///
    /// Dispatch is idempotent — the state stays `AwaitingOtp`, so the code
    /// can be re-sent. Fails when the challenge lost its hash or no phone
    /// is selected.
    pub fn otp_dispatch_params(&self) -> Result<OtpDispatch> {
        match &self.state {
            AuthState::AwaitingOtp {
                challenge,
                pending_token,
            } => {
                let record_id = challenge
                    .selected_phone_id
                    .ok_or_else(|| VerisureError::otp("No phone selected for OTP"))?;
                if challenge.otp_hash.is_empty() {
                    return Err(VerisureError::otp("No OTP hash available"));
                }
                Ok(OtpDispatch {
                    record_id,
                    otp_hash: challenge.otp_hash.clone(),
                    token: pending_token.clone(),
                })
            }
            AuthState::AwaitingDeviceAuth { .. } => {
                Err(VerisureError::otp("No phone selected for OTP"))
            }
            other => Err(VerisureError::otp(format!(
                "No OTP challenge pending (state: {})",
                other.name()
            ))),
        }
    }

    /// Validate an OTP code locally and return the verification parameters.
    ///
    /// An empty code is rejected here, before any network call.
    pub fn begin_verification(&self, code: &str) -> Result<OtpVerification> {
        if code.trim().is_empty() {
            return Err(VerisureError::otp("OTP code must not be empty"));
        }
        match &self.state {
            AuthState::AwaitingOtp {
                challenge,
                pending_token,
            } => Ok(OtpVerification {
                otp_hash: challenge.otp_hash.clone(),
                token: pending_token.clone(),
            }),
            other => Err(VerisureError::otp(format!(
                "No OTP challenge pending (state: {})",
                other.name()
            ))),
        }
    }

    /// Apply the upstream verdict on the submitted OTP code.
    ///
    /// Acceptance discards the challenge and enters `Authenticated`;
    /// rejection enters `Failed` (a fresh OTP request needs a reset).
    pub fn complete_verification(
        &mut self,
        verdict: std::result::Result<Session, String>,
    ) -> Result<&AuthState> {
        if !matches!(self.state, AuthState::AwaitingOtp { .. }) {
            return Err(VerisureError::otp(format!(
                "No OTP challenge pending (state: {})",
                self.state.name()
            )));
        }
        match verdict {
            Ok(session) => {
                self.persist(&session);
                info!("OTP verification successful");
                self.state = AuthState::Authenticated { session };
                Ok(&self.state)
            }
            Err(message) => {
                self.state = AuthState::Failed {
                    reason: message.clone(),
                };
                Err(VerisureError::otp(format!(
                    "OTP verification failed: {message}"
                )))
            }
        }
    }

    /// Drop the session (and its persisted copy) and return to `Idle`.
    pub fn logout(&mut self) -> Result<()> {
        if let Err(e) = self.store.clear() {
            warn!("Could not clear persisted session: {e}");
        }
        info!("Logged out (was {})", self.state.name());
        self.state = AuthState::Idle;
        Ok(())
    }

    /// Leave `Failed` explicitly. A no-op in any other state.
    pub fn reset(&mut self) {
        if matches!(self.state, AuthState::Failed { .. }) {
            debug!("Auth machine reset to Idle");
            self.state = AuthState::Idle;
        }
    }

    // Session persistence is best-effort: a full disk must not lose an
    // otherwise valid in-memory session.
    fn persist(&self, session: &Session) {
        if let Err(e) = self.store.save(session) {
            warn!("Could not persist session: {e}");
        }
    }
}
