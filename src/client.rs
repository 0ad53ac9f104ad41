// MIT License - Copyright (c) 2026 Peter Wright

use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

use crate::alarm::{AlarmStatus, AlarmStatusFlags, ArmResult, DisarmResult};
use crate::auth::{AuthMachine, LoginOutcome, OtpPhone};
use crate::cache::{CacheInfo, ServiceCache};
use crate::config::{ArmMode, ClientConfig};
use crate::device::DeviceIdentifiers;
use crate::error::{AuthErrorCode, Result, VerisureError};
use crate::event::{event_channel, CloudEvent, EventReceiver, EventSender};
use crate::installation::{Installation, InstallationServices};
use crate::session::{FileSessionStore, Session, SessionData, SessionStore};
use crate::transport::{
    CloudTransport, CommandPoll, Credentials, DeviceValidation, PanelContext, TokenGrant,
};

/// Default panel reported state sent with arm requests.
const DEFAULT_CURRENT_STATUS: &str = "E";

/// Result of a login attempt.
#[derive(Debug, Clone)]
pub enum LoginStatus {
    /// A session is live; installation calls can proceed.
    Authenticated,
    /// Login is paused at device authorization: pick a phone with
    /// `select_phone`, dispatch with `send_otp`, finish with `verify_otp`.
    OtpRequired(Vec<OtpPhone>),
}

/// The main public API for the My Verisure cloud.
///
/// Owns the auth state machine and the installation services cache and
/// orchestrates them over an injected [`CloudTransport`].
///
/// # Example
///
/// ```no_run
/// use verisure_cloud_bridge::{ArmMode, ClientConfig, HttpTransport, LoginStatus, VerisureCloud};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let config = ClientConfig::builder()
///         .user("12345678A")
///         .password("secret")
///         .build();
///
///     let transport = HttpTransport::new(config.clone())?;
///     let client = VerisureCloud::new(config, transport)?;
///
///     match client.login().await? {
///         LoginStatus::Authenticated => {}
///         LoginStatus::OtpRequired(phones) => {
///             client.select_phone(phones[0].id).await;
///             client.send_otp().await?;
///             // ...read the SMS...
///             client.verify_otp("123456").await?;
///         }
///     }
///
///     let installations = client.get_installations().await?;
///     client.arm(&installations[0].numinst, ArmMode::Away).await?;
///     Ok(())
/// }
/// ```
pub struct VerisureCloud<T: CloudTransport> {
    transport: T,
    config: ClientConfig,
    device: DeviceIdentifiers,
    auth: Mutex<AuthMachine>,
    cache: Mutex<ServiceCache>,
    last_alarm: Mutex<HashMap<String, AlarmStatusFlags>>,
    event_tx: EventSender,
}

impl<T: CloudTransport> VerisureCloud<T> {
    /// Build a client with file-backed session and device persistence,
    /// resuming a persisted session when one is still valid.
    pub fn new(config: ClientConfig, transport: T) -> Result<Self> {
        let device = DeviceIdentifiers::load_or_generate(
            &config.device_file(),
            &config.user,
            &config.app_version,
        )?;
        let store = Box::new(FileSessionStore::new(config.session_file()));
        Self::with_store(config, transport, store, device)
    }

    /// Build a client over an explicit session store and device identity.
    pub fn with_store(
        config: ClientConfig,
        transport: T,
        store: Box<dyn SessionStore>,
        device: DeviceIdentifiers,
    ) -> Result<Self> {
        let mut machine = AuthMachine::new(store);
        machine.restore(config.session_max_age_secs)?;

        let (event_tx, _rx) = event_channel(64);
        let cache = ServiceCache::new(config.cache_ttl_secs);
        Ok(Self {
            transport,
            config,
            device,
            auth: Mutex::new(machine),
            cache: Mutex::new(cache),
            last_alarm: Mutex::new(HashMap::new()),
            event_tx,
        })
    }

    /// Subscribe to client events.
    pub fn subscribe(&self) -> EventReceiver {
        self.event_tx.subscribe()
    }

    // --- Authentication ---

    /// Log in, resuming a still-valid session when possible.
    pub async fn login(&self) -> Result<LoginStatus> {
        let mut auth = self.auth.lock().await;

        if let Some(session) = auth.session() {
            if session.is_valid(self.config.session_max_age_secs) {
                debug!("Session still valid, skipping login");
                return Ok(LoginStatus::Authenticated);
            }
            debug!("Held session expired, performing fresh login");
        }

        auth.begin_login()?;

        let credentials = Credentials {
            user: self.config.user.clone(),
            password: self.config.password.clone(),
        };
        let grant = self.transport.login(&credentials, &self.device).await?;

        if !grant.need_device_authorization {
            let session = self.session_from(&grant);
            auth.complete_login(LoginOutcome::Granted(session))?;
            let _ = self.event_tx.send(CloudEvent::Authenticated {
                user: self.config.user.clone(),
            });
            return Ok(LoginStatus::Authenticated);
        }

        info!("Device authorization required, validating device");
        match self
            .transport
            .validate_device(&grant.hash, &self.device)
            .await?
        {
            DeviceValidation::Granted(fresh) => {
                let session = self.session_from(&fresh);
                auth.complete_login(LoginOutcome::Granted(session))?;
                let _ = self.event_tx.send(CloudEvent::Authenticated {
                    user: self.config.user.clone(),
                });
                Ok(LoginStatus::Authenticated)
            }
            DeviceValidation::OtpRequired { phones, otp_hash } => {
                auth.complete_login(LoginOutcome::DeviceAuthRequired {
                    phones: phones.clone(),
                    otp_hash,
                    pending_token: grant.hash,
                })?;
                let _ = self.event_tx.send(CloudEvent::OtpRequired {
                    phones: phones.clone(),
                });
                Ok(LoginStatus::OtpRequired(phones))
            }
        }
    }

    /// Phones offered by the pending OTP challenge.
    pub async fn get_available_phones(&self) -> Vec<OtpPhone> {
        self.auth.lock().await.available_phones()
    }

    /// Select the phone that should receive the OTP. Returns true iff the
    /// id names a phone of the challenge; state is unchanged on false.
    pub async fn select_phone(&self, id: i32) -> bool {
        self.auth.lock().await.select_phone(id)
    }

    /// Dispatch (or re-dispatch) the OTP SMS to the selected phone.
    pub async fn send_otp(&self) -> Result<()> {
        let dispatch = self.auth.lock().await.otp_dispatch_params()?;
        self.transport
            .send_otp(&dispatch.token, dispatch.record_id, &dispatch.otp_hash)
            .await
    }

    /// Verify the OTP code received via SMS.
    ///
    /// An empty code fails locally without a network call. On acceptance a
    /// fresh login fetches final tokens (falling back to the verification
    /// tokens if that refresh fails) and the session is persisted.
    pub async fn verify_otp(&self, code: &str) -> Result<bool> {
        let mut auth = self.auth.lock().await;
        let verification = auth.begin_verification(code)?;

        let grant = match self
            .transport
            .verify_otp(&verification.token, code, &verification.otp_hash, &self.device)
            .await
        {
            Ok(grant) => grant,
            Err(e) if e.is_retryable() => return Err(e),
            Err(e) => {
                let _ = auth.complete_verification(Err(e.to_string()));
                return Err(e);
            }
        };

        if grant.need_device_authorization {
            let reason = "Device authorization still required after OTP verification";
            auth.fail(reason);
            return Err(VerisureError::Authentication {
                message: reason.to_string(),
                code: Some(AuthErrorCode::DeviceUnauthorized),
            });
        }

        // Exchange the verification grant for fresh tokens; the grant we
        // already hold stays good enough if the refresh login fails.
        let credentials = Credentials {
            user: self.config.user.clone(),
            password: self.config.password.clone(),
        };
        let final_grant = match self.transport.login(&credentials, &self.device).await {
            Ok(fresh) => fresh,
            Err(e) => {
                warn!("Post-OTP login failed ({e}), keeping verification tokens");
                grant
            }
        };

        let session = self.session_from(&final_grant);
        auth.complete_verification(Ok(session))?;
        let _ = self.event_tx.send(CloudEvent::Authenticated {
            user: self.config.user.clone(),
        });
        Ok(true)
    }

    /// Drop the session, its persisted copy, and all cached state.
    pub async fn logout(&self) -> Result<()> {
        self.auth.lock().await.logout()?;
        self.cache.lock().await.clear(None);
        self.last_alarm.lock().await.clear();
        let _ = self.event_tx.send(CloudEvent::LoggedOut);
        Ok(())
    }

    /// Leave the `Failed` auth state.
    pub async fn reset_auth(&self) {
        self.auth.lock().await.reset();
    }

    /// Whether a session is held and inside its validity window.
    pub async fn is_authenticated(&self) -> bool {
        self.auth
            .lock()
            .await
            .session()
            .is_some_and(|s| s.is_valid(self.config.session_max_age_secs))
    }

    async fn current_token(&self) -> Result<String> {
        let auth = self.auth.lock().await;
        let session = auth.session().ok_or(VerisureError::NotAuthenticated)?;
        let age = session.age_secs(Utc::now().timestamp());
        if !session.is_valid(self.config.session_max_age_secs) {
            let _ = self.event_tx.send(CloudEvent::SessionExpired);
            return Err(VerisureError::SessionExpired { age_secs: age });
        }
        Ok(session.token.clone())
    }

    fn session_from(&self, grant: &TokenGrant) -> Session {
        Session {
            token: grant.hash.clone(),
            refresh_token: grant.refresh_token.clone(),
            cookies: HashMap::new(),
            data: SessionData {
                user: self.config.user.clone(),
                lang: grant.lang.clone().unwrap_or_else(|| self.config.lang.clone()),
                legals: grant.legals,
                change_password: grant.change_password,
                need_device_authorization: grant.need_device_authorization,
            },
            login_time: Utc::now().timestamp(),
        }
    }

    // --- Installations ---

    /// List the account's installations.
    pub async fn get_installations(&self) -> Result<Vec<Installation>> {
        let token = self.current_token().await?;
        self.transport.get_installations(&token).await
    }

    /// Services/panel/capabilities for one installation, cached by the
    /// services TTL. `force_refresh` bypasses (and refills) the cache.
    ///
    /// Concurrent callers racing on the same cold key will each hit the
    /// upstream; there is no request coalescing.
    pub async fn get_installation_services(
        &self,
        installation_id: &str,
        force_refresh: bool,
    ) -> Result<InstallationServices> {
        if installation_id.is_empty() {
            return Err(VerisureError::MissingInstallation);
        }

        if !force_refresh {
            if let Some(hit) = self.cache.lock().await.get(installation_id) {
                debug!("Using cached services for installation {installation_id}");
                return Ok(hit);
            }
        }

        let token = self.current_token().await?;
        let services = self
            .transport
            .get_installation_services(&token, installation_id)
            .await?;
        self.cache.lock().await.set(installation_id, services.clone());
        Ok(services)
    }

    async fn panel_context(&self, installation_id: &str) -> Result<PanelContext> {
        match self.get_installation_services(installation_id, false).await {
            Ok(services) => Ok(PanelContext {
                installation_id: installation_id.to_string(),
                panel: services.panel,
                capabilities: services.capabilities,
            }),
            Err(e) if e.is_retryable() || matches!(e, VerisureError::NotAuthenticated) => Err(e),
            Err(e) => {
                warn!("Could not get installation info for {installation_id}, using defaults: {e}");
                Ok(PanelContext {
                    installation_id: installation_id.to_string(),
                    panel: "PROTOCOL".to_string(),
                    capabilities: "default_capabilities".to_string(),
                })
            }
        }
    }

    // --- Cache bookkeeping (degrades, never propagates) ---

    /// Diagnostics snapshot of the services cache.
    pub async fn get_cache_info(&self) -> CacheInfo {
        self.cache.lock().await.info()
    }

    /// Clear one installation's cached services, or all of them.
    pub async fn clear_cache(&self, installation_id: Option<&str>) {
        self.cache.lock().await.clear(installation_id);
    }

    /// Change the cache TTL; applies to already-stored entries as well.
    pub async fn set_cache_ttl(&self, ttl_secs: u64) {
        self.cache.lock().await.set_ttl(ttl_secs);
    }

    // --- Alarm ---

    /// Real-time alarm state for an installation.
    ///
    /// Opens a check (reference id), then polls until the vendor leaves
    /// WAIT. Degrades to the disarmed default when the installation has no
    /// active EST service or the vendor never completes the check.
    pub async fn get_alarm_status(&self, installation_id: &str) -> Result<AlarmStatus> {
        let services = self.get_installation_services(installation_id, false).await?;
        let Some(est) = services.est_service().cloned() else {
            warn!("EST service not found or not active, cannot get real-time status");
            return Ok(AlarmStatus::disarmed());
        };

        let token = self.current_token().await?;
        let ctx = PanelContext {
            installation_id: installation_id.to_string(),
            panel: services.panel.clone(),
            capabilities: services.capabilities.clone(),
        };

        let reference_id = match self.transport.check_alarm(&token, &ctx).await {
            Ok(id) => id,
            Err(e) if e.is_retryable() => return Err(e),
            Err(e) => {
                warn!("Could not open alarm status check: {e}");
                return Ok(AlarmStatus::disarmed());
            }
        };

        for attempt in 1..=self.config.alarm_check_retries {
            let poll = self
                .transport
                .check_alarm_status(&token, &ctx, &est.id_service, &reference_id)
                .await?;
            match poll {
                CommandPoll::Completed {
                    message,
                    protom_response,
                    protom_response_date,
                } => {
                    let code = protom_response.as_deref().unwrap_or(&message);
                    let status = AlarmStatus {
                        flags: AlarmStatusFlags::from_protom(code),
                        message,
                        response_date: protom_response_date,
                    };
                    self.note_alarm_state(installation_id, status.flags).await;
                    return Ok(status);
                }
                CommandPoll::Wait => {
                    debug!(
                        "Alarm status check returned WAIT (attempt {attempt}/{})",
                        self.config.alarm_check_retries
                    );
                    sleep(Duration::from_millis(self.config.alarm_check_delay_ms)).await;
                }
                CommandPoll::Failed { message } => {
                    warn!("Alarm status check failed: {message}");
                    return Ok(AlarmStatus::disarmed());
                }
            }
        }

        warn!("Max retries reached for alarm status check");
        Ok(AlarmStatus::disarmed())
    }

    /// Arm the installation in the given mode.
    pub async fn arm(&self, installation_id: &str, mode: ArmMode) -> Result<ArmResult> {
        let request = mode.request_code();
        let ctx = self.panel_context(installation_id).await?;
        let token = self.current_token().await?;

        let reference_id = match self
            .transport
            .request_arm(&token, &ctx, request, DEFAULT_CURRENT_STATUS)
            .await
        {
            Ok(id) => id,
            Err(e) if e.is_retryable() => return Err(e),
            Err(e) => {
                return Ok(ArmResult {
                    success: false,
                    message: format!("Failed to send arm command '{request}': {e}"),
                    status: None,
                })
            }
        };

        for counter in 1..=self.config.command_poll_retries {
            let poll = self
                .transport
                .arm_status(&token, &ctx, request, &reference_id, counter)
                .await?;
            match poll {
                CommandPoll::Completed {
                    message,
                    protom_response,
                    ..
                } => {
                    info!("Arm '{request}' completed for installation {installation_id}");
                    self.invalidate_alarm_state(installation_id).await;
                    return Ok(ArmResult {
                        success: true,
                        message,
                        status: protom_response,
                    });
                }
                CommandPoll::Wait => {
                    debug!(
                        "Arm status WAIT (attempt {counter}/{})",
                        self.config.command_poll_retries
                    );
                    sleep(Duration::from_millis(self.config.command_poll_delay_ms)).await;
                }
                CommandPoll::Failed { message } => {
                    return Ok(ArmResult {
                        success: false,
                        message: format!("Failed to complete alarm command '{request}': {message}"),
                        status: None,
                    });
                }
            }
        }

        Ok(ArmResult {
            success: false,
            message: format!("Max retries reached for arm command '{request}'"),
            status: None,
        })
    }

    /// Disarm the installation.
    pub async fn disarm(&self, installation_id: &str) -> Result<DisarmResult> {
        let ctx = self.panel_context(installation_id).await?;
        let token = self.current_token().await?;

        let reference_id = match self.transport.request_disarm(&token, &ctx).await {
            Ok(id) => id,
            Err(e) if e.is_retryable() => return Err(e),
            Err(e) => {
                return Ok(DisarmResult {
                    success: false,
                    message: format!("Failed to send disarm command: {e}"),
                    status: None,
                })
            }
        };

        for counter in 1..=self.config.command_poll_retries {
            let poll = self
                .transport
                .disarm_status(&token, &ctx, &reference_id, counter)
                .await?;
            match poll {
                CommandPoll::Completed {
                    message,
                    protom_response,
                    ..
                } => {
                    info!("Disarm completed for installation {installation_id}");
                    self.invalidate_alarm_state(installation_id).await;
                    return Ok(DisarmResult {
                        success: true,
                        message,
                        status: protom_response,
                    });
                }
                CommandPoll::Wait => {
                    debug!(
                        "Disarm status WAIT (attempt {counter}/{})",
                        self.config.command_poll_retries
                    );
                    sleep(Duration::from_millis(self.config.command_poll_delay_ms)).await;
                }
                CommandPoll::Failed { message } => {
                    return Ok(DisarmResult {
                        success: false,
                        message: format!("Failed to complete disarm command: {message}"),
                        status: None,
                    });
                }
            }
        }

        Ok(DisarmResult {
            success: false,
            message: "Max retries reached for disarm command".to_string(),
            status: None,
        })
    }

    async fn note_alarm_state(&self, installation_id: &str, new_status: AlarmStatusFlags) {
        let mut last = self.last_alarm.lock().await;
        let old_status = last.insert(installation_id.to_string(), new_status);
        if let Some(old_status) = old_status {
            if old_status != new_status {
                let _ = self.event_tx.send(CloudEvent::AlarmStatusChanged {
                    installation_id: installation_id.to_string(),
                    old_status,
                    new_status,
                });
            }
        }
    }

    async fn invalidate_alarm_state(&self, installation_id: &str) {
        self.last_alarm.lock().await.remove(installation_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::DeviceValidation;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex as StdMutex;

    /// Scripted transport double. Counters observe what the client sent.
    #[derive(Default)]
    struct FakeTransport {
        need_device_auth: bool,
        wrong_credentials: bool,
        reject_otp: bool,
        fail_request: bool,
        fail_command: bool,
        never_complete: bool,
        wait_polls: u32,
        protom: String,
        no_est_service: bool,
        login_calls: AtomicU32,
        validate_calls: AtomicU32,
        send_otp_calls: AtomicU32,
        verify_calls: AtomicU32,
        services_calls: AtomicU32,
        check_polls: AtomicU32,
        sent_record: StdMutex<Option<(i32, String)>>,
    }

    impl FakeTransport {
        fn grant(hash: &str, need_device_auth: bool) -> TokenGrant {
            TokenGrant {
                hash: hash.to_string(),
                refresh_token: Some("refresh".to_string()),
                lang: Some("ES".to_string()),
                legals: true,
                change_password: false,
                need_device_authorization: need_device_auth,
            }
        }

        fn services(&self) -> InstallationServices {
            let services = if self.no_est_service {
                Vec::new()
            } else {
                vec![crate::installation::Service {
                    id_service: "11".to_string(),
                    request: "EST".to_string(),
                    active: true,
                    visible: true,
                    is_premium: false,
                }]
            };
            InstallationServices {
                numinst: "A".to_string(),
                alias: "Home".to_string(),
                status: "E".to_string(),
                panel: "PROTOCOL".to_string(),
                capabilities: "caps".to_string(),
                language: "es".to_string(),
                services,
            }
        }

        fn poll_outcome(&self, counter: u32) -> CommandPoll {
            if self.fail_command {
                CommandPoll::Failed {
                    message: "rejected".to_string(),
                }
            } else if self.never_complete || counter <= self.wait_polls {
                CommandPoll::Wait
            } else {
                CommandPoll::Completed {
                    message: "done".to_string(),
                    protom_response: Some(self.protom.clone()),
                    protom_response_date: Some("2026-02-07T10:00:00".to_string()),
                }
            }
        }
    }

    #[async_trait]
    impl CloudTransport for FakeTransport {
        async fn login(
            &self,
            _credentials: &Credentials,
            _device: &DeviceIdentifiers,
        ) -> Result<TokenGrant> {
            let n = self.login_calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.wrong_credentials {
                return Err(VerisureError::Authentication {
                    message: "Invalid user or password".to_string(),
                    code: Some(AuthErrorCode::InvalidCredentials),
                });
            }
            // Device authorization only blocks the first login; once the
            // device is validated the follow-up login is clean.
            Ok(Self::grant(&format!("token-{n}"), self.need_device_auth && n == 1))
        }

        async fn validate_device(
            &self,
            _token: &str,
            _device: &DeviceIdentifiers,
        ) -> Result<DeviceValidation> {
            self.validate_calls.fetch_add(1, Ordering::SeqCst);
            Ok(DeviceValidation::OtpRequired {
                phones: vec![
                    OtpPhone { id: 0, phone: "**********975".to_string() },
                    OtpPhone { id: 1, phone: "**********123".to_string() },
                ],
                otp_hash: "otp-hash".to_string(),
            })
        }

        async fn send_otp(&self, _token: &str, record_id: i32, otp_hash: &str) -> Result<()> {
            self.send_otp_calls.fetch_add(1, Ordering::SeqCst);
            *self.sent_record.lock().unwrap() = Some((record_id, otp_hash.to_string()));
            Ok(())
        }

        async fn verify_otp(
            &self,
            _token: &str,
            _code: &str,
            _otp_hash: &str,
            _device: &DeviceIdentifiers,
        ) -> Result<TokenGrant> {
            self.verify_calls.fetch_add(1, Ordering::SeqCst);
            if self.reject_otp {
                return Err(VerisureError::otp("OTP verification failed: wrong code"));
            }
            Ok(Self::grant("verified-token", false))
        }

        async fn get_installations(&self, _token: &str) -> Result<Vec<Installation>> {
            Ok(vec![Installation {
                numinst: "A".to_string(),
                alias: "Home".to_string(),
                panel: "PROTOCOL".to_string(),
                installation_type: "1".to_string(),
                address: "Calle Mayor 1".to_string(),
                city: "Madrid".to_string(),
                postcode: "28001".to_string(),
                phone: "600000000".to_string(),
                email: "user@example.com".to_string(),
                role: "OWNER".to_string(),
            }])
        }

        async fn get_installation_services(
            &self,
            _token: &str,
            _installation_id: &str,
        ) -> Result<InstallationServices> {
            self.services_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.services())
        }

        async fn check_alarm(&self, _token: &str, _ctx: &PanelContext) -> Result<String> {
            if self.fail_request {
                return Err(VerisureError::Api {
                    message: "no reference".to_string(),
                });
            }
            Ok("ref-check".to_string())
        }

        async fn check_alarm_status(
            &self,
            _token: &str,
            _ctx: &PanelContext,
            _id_service: &str,
            _reference_id: &str,
        ) -> Result<CommandPoll> {
            let n = self.check_polls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(self.poll_outcome(n))
        }

        async fn request_arm(
            &self,
            _token: &str,
            _ctx: &PanelContext,
            _request: &str,
            _current_status: &str,
        ) -> Result<String> {
            if self.fail_request {
                return Err(VerisureError::Api {
                    message: "arm refused".to_string(),
                });
            }
            Ok("ref-arm".to_string())
        }

        async fn arm_status(
            &self,
            _token: &str,
            _ctx: &PanelContext,
            _request: &str,
            _reference_id: &str,
            counter: u32,
        ) -> Result<CommandPoll> {
            Ok(self.poll_outcome(counter))
        }

        async fn request_disarm(&self, _token: &str, _ctx: &PanelContext) -> Result<String> {
            if self.fail_request {
                return Err(VerisureError::Api {
                    message: "disarm refused".to_string(),
                });
            }
            Ok("ref-disarm".to_string())
        }

        async fn disarm_status(
            &self,
            _token: &str,
            _ctx: &PanelContext,
            _reference_id: &str,
            counter: u32,
        ) -> Result<CommandPoll> {
            Ok(self.poll_outcome(counter))
        }
    }

    fn client_with(
        fake: FakeTransport,
    ) -> (VerisureCloud<FakeTransport>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = ClientConfig::builder()
            .user("12345678A")
            .password("pw")
            .storage_dir(dir.path())
            .command_poll_delay_ms(0)
            .alarm_check_delay_ms(0)
            .command_poll_retries(3)
            .alarm_check_retries(3)
            .build();
        let device = DeviceIdentifiers::generate("12345678A", "10.154.0");
        let store = Box::new(FileSessionStore::new(config.session_file()));
        let client = VerisureCloud::with_store(config, fake, store, device).unwrap();
        (client, dir)
    }

    async fn authenticated_client(
        fake: FakeTransport,
    ) -> (VerisureCloud<FakeTransport>, tempfile::TempDir) {
        let (client, dir) = client_with(fake);
        let status = client.login().await.unwrap();
        assert!(matches!(status, LoginStatus::Authenticated));
        (client, dir)
    }

    #[tokio::test]
    async fn test_direct_login() {
        let (client, _dir) = client_with(FakeTransport::default());
        let status = client.login().await.unwrap();
        assert!(matches!(status, LoginStatus::Authenticated));
        assert!(client.is_authenticated().await);

        // Session persisted to the file store
        let store = FileSessionStore::new(client.config.session_file());
        let persisted = store.load().unwrap().expect("session file written");
        assert_eq!(persisted.token, "token-1");
    }

    #[tokio::test]
    async fn test_login_skips_when_session_valid() {
        let (client, _dir) = authenticated_client(FakeTransport::default()).await;
        client.login().await.unwrap();
        assert_eq!(client.transport.login_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_wrong_credentials() {
        let fake = FakeTransport {
            wrong_credentials: true,
            ..Default::default()
        };
        let (client, _dir) = client_with(fake);
        let err = client.login().await.unwrap_err();
        assert!(matches!(
            err,
            VerisureError::Authentication {
                code: Some(AuthErrorCode::InvalidCredentials),
                ..
            }
        ));
        assert!(!client.is_authenticated().await);
    }

    #[tokio::test]
    async fn test_otp_flow_end_to_end() {
        let fake = FakeTransport {
            need_device_auth: true,
            ..Default::default()
        };
        let (client, _dir) = client_with(fake);

        let status = client.login().await.unwrap();
        let phones = match status {
            LoginStatus::OtpRequired(phones) => phones,
            other => panic!("expected OtpRequired, got {other:?}"),
        };
        assert_eq!(phones.len(), 2);
        assert!(!client.is_authenticated().await);

        assert!(!client.select_phone(99).await);
        assert_eq!(client.get_available_phones().await, phones);
        assert!(client.select_phone(1).await);

        client.send_otp().await.unwrap();
        assert_eq!(
            *client.transport.sent_record.lock().unwrap(),
            Some((1, "otp-hash".to_string()))
        );

        assert!(client.verify_otp("123456").await.unwrap());
        assert!(client.is_authenticated().await);
        // Initial login + post-OTP token refresh
        assert_eq!(client.transport.login_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_empty_otp_code_fails_without_network() {
        let fake = FakeTransport {
            need_device_auth: true,
            ..Default::default()
        };
        let (client, _dir) = client_with(fake);
        client.login().await.unwrap();
        client.select_phone(0).await;

        let err = client.verify_otp("").await.unwrap_err();
        assert!(matches!(err, VerisureError::Otp { .. }));
        assert_eq!(client.transport.verify_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_otp_rejection_requires_reset() {
        let fake = FakeTransport {
            need_device_auth: true,
            reject_otp: true,
            ..Default::default()
        };
        let (client, _dir) = client_with(fake);
        client.login().await.unwrap();
        client.select_phone(0).await;
        client.send_otp().await.unwrap();

        let err = client.verify_otp("000000").await.unwrap_err();
        assert!(matches!(err, VerisureError::Otp { .. }));

        // Machine is Failed: login refuses until reset
        assert!(client.login().await.is_err());
        client.reset_auth().await;
        // After reset the (still device-auth-flagged) login restarts the flow
        assert!(client.login().await.is_ok());
    }

    #[tokio::test]
    async fn test_services_are_cached() {
        let (client, _dir) = authenticated_client(FakeTransport::default()).await;

        let first = client.get_installation_services("A", false).await.unwrap();
        assert_eq!(first.panel, "PROTOCOL");
        client.get_installation_services("A", false).await.unwrap();
        assert_eq!(client.transport.services_calls.load(Ordering::SeqCst), 1);

        // force_refresh bypasses the cache
        client.get_installation_services("A", true).await.unwrap();
        assert_eq!(client.transport.services_calls.load(Ordering::SeqCst), 2);

        // clearing drops the entry
        client.clear_cache(Some("A")).await;
        client.get_installation_services("A", false).await.unwrap();
        assert_eq!(client.transport.services_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_empty_installation_id_rejected() {
        let (client, _dir) = authenticated_client(FakeTransport::default()).await;
        let err = client.get_installation_services("", false).await.unwrap_err();
        assert!(matches!(err, VerisureError::MissingInstallation));
    }

    #[tokio::test]
    async fn test_cache_info_and_logout() {
        let (client, _dir) = authenticated_client(FakeTransport::default()).await;
        client.get_installation_services("A", false).await.unwrap();

        let info = client.get_cache_info().await;
        assert_eq!(info.size, 1);
        assert_eq!(info.keys, vec!["A".to_string()]);

        client.logout().await.unwrap();
        let info = client.get_cache_info().await;
        assert_eq!(info.size, 0);
        assert!(!client.is_authenticated().await);
        assert!(matches!(
            client.get_installations().await.unwrap_err(),
            VerisureError::NotAuthenticated
        ));
    }

    #[tokio::test]
    async fn test_queries_require_authentication() {
        let (client, _dir) = client_with(FakeTransport::default());
        assert!(matches!(
            client.get_installations().await.unwrap_err(),
            VerisureError::NotAuthenticated
        ));
        assert!(matches!(
            client.get_alarm_status("A").await.unwrap_err(),
            VerisureError::NotAuthenticated
        ));
    }

    #[tokio::test]
    async fn test_arm_polls_until_complete() {
        let fake = FakeTransport {
            wait_polls: 2,
            protom: "T".to_string(),
            ..Default::default()
        };
        let (client, _dir) = authenticated_client(fake).await;

        let result = client.arm("A", ArmMode::Away).await.unwrap();
        assert!(result.success);
        assert_eq!(result.status.as_deref(), Some("T"));
    }

    #[tokio::test]
    async fn test_arm_gives_up_after_max_retries() {
        let fake = FakeTransport {
            never_complete: true,
            ..Default::default()
        };
        let (client, _dir) = authenticated_client(fake).await;

        let result = client.arm("A", ArmMode::Night).await.unwrap();
        assert!(!result.success);
        assert!(result.message.contains("Max retries"));
    }

    #[tokio::test]
    async fn test_arm_rejected_by_vendor() {
        let fake = FakeTransport {
            fail_command: true,
            ..Default::default()
        };
        let (client, _dir) = authenticated_client(fake).await;

        let result = client.arm("A", ArmMode::Home).await.unwrap();
        assert!(!result.success);
        assert!(result.message.contains("PERI1"));
    }

    #[tokio::test]
    async fn test_arm_request_refused() {
        let fake = FakeTransport {
            fail_request: true,
            ..Default::default()
        };
        let (client, _dir) = authenticated_client(fake).await;

        let result = client.arm("A", ArmMode::Away).await.unwrap();
        assert!(!result.success);
        assert!(result.message.contains("ARM1"));
    }

    #[tokio::test]
    async fn test_disarm() {
        let fake = FakeTransport {
            protom: "D".to_string(),
            ..Default::default()
        };
        let (client, _dir) = authenticated_client(fake).await;

        let result = client.disarm("A").await.unwrap();
        assert!(result.success);
        assert_eq!(result.status.as_deref(), Some("D"));
    }

    #[tokio::test]
    async fn test_alarm_status_parses_protom() {
        let fake = FakeTransport {
            wait_polls: 1,
            protom: "TE".to_string(),
            ..Default::default()
        };
        let (client, _dir) = authenticated_client(fake).await;

        let status = client.get_alarm_status("A").await.unwrap();
        assert!(status.internal_total());
        assert!(status.external());
        assert!(!status.internal_night());
    }

    #[tokio::test]
    async fn test_alarm_status_without_est_service() {
        let fake = FakeTransport {
            no_est_service: true,
            ..Default::default()
        };
        let (client, _dir) = authenticated_client(fake).await;

        let status = client.get_alarm_status("A").await.unwrap();
        assert!(status.is_disarmed());
        assert_eq!(client.transport.check_polls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_alarm_status_change_event() {
        let fake = FakeTransport {
            protom: "T".to_string(),
            ..Default::default()
        };
        let (client, _dir) = authenticated_client(fake).await;
        let mut events = client.subscribe();

        client.get_alarm_status("A").await.unwrap();
        // Same state again: no event
        client.get_alarm_status("A").await.unwrap();

        client.invalidate_alarm_state("A").await;
        client.get_alarm_status("A").await.unwrap();

        // Only the Authenticated-era events plus no AlarmStatusChanged,
        // since the observed state never differed.
        while let Ok(event) = events.try_recv() {
            assert!(!matches!(event, CloudEvent::AlarmStatusChanged { .. }));
        }
    }
}
