// MIT License - Copyright (c) 2026 Peter Wright

//! Transport seam between the core and the vendor cloud.
//!
//! The core talks to [`CloudTransport`] only; [`HttpTransport`] is the one
//! production implementation. Tests substitute their own.

pub mod http;

use async_trait::async_trait;

use crate::auth::OtpPhone;
use crate::device::DeviceIdentifiers;
use crate::error::Result;
use crate::installation::{Installation, InstallationServices};

pub use http::HttpTransport;

/// Account credentials submitted at login.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

/// Token material granted by a successful login or device validation.
#[derive(Debug, Clone)]
pub struct TokenGrant {
    pub hash: String,
    pub refresh_token: Option<String>,
    pub lang: Option<String>,
    pub legals: bool,
    pub change_password: bool,
    /// Still true after verification means the device was not authorized.
    pub need_device_authorization: bool,
}

/// Outcome of a device validation call.
#[derive(Debug, Clone)]
pub enum DeviceValidation {
    /// The device is already authorized; fresh tokens were issued.
    Granted(TokenGrant),
    /// The device must be authorized by OTP.
    OtpRequired {
        phones: Vec<OtpPhone>,
        otp_hash: String,
    },
}

/// Installation addressing for alarm operations. Panel and capabilities
/// come from the (cached) installation services.
#[derive(Debug, Clone)]
pub struct PanelContext {
    pub installation_id: String,
    pub panel: String,
    pub capabilities: String,
}

/// One poll of a two-phase command's status.
#[derive(Debug, Clone)]
pub enum CommandPoll {
    /// The vendor reported completion.
    Completed {
        message: String,
        protom_response: Option<String>,
        protom_response_date: Option<String>,
    },
    /// Still in flight; poll again after a delay.
    Wait,
    /// The vendor rejected the command.
    Failed { message: String },
}

/// The vendor cloud API surface consumed by the core.
///
/// Authenticated operations take the session token explicitly; the
/// transport itself holds no login state.
#[async_trait]
pub trait CloudTransport: Send + Sync {
    /// Submit credentials. Returns the (possibly provisional) token grant.
    async fn login(
        &self,
        credentials: &Credentials,
        device: &DeviceIdentifiers,
    ) -> Result<TokenGrant>;

    /// Validate this device against the account.
    async fn validate_device(
        &self,
        token: &str,
        device: &DeviceIdentifiers,
    ) -> Result<DeviceValidation>;

    /// Dispatch the OTP SMS to the phone selected by `record_id`.
    async fn send_otp(&self, token: &str, record_id: i32, otp_hash: &str) -> Result<()>;

    /// Exchange a received OTP code for a token grant.
    async fn verify_otp(
        &self,
        token: &str,
        code: &str,
        otp_hash: &str,
        device: &DeviceIdentifiers,
    ) -> Result<TokenGrant>;

    /// List the account's installations.
    async fn get_installations(&self, token: &str) -> Result<Vec<Installation>>;

    /// Fetch services/panel/capabilities for one installation.
    async fn get_installation_services(
        &self,
        token: &str,
        installation_id: &str,
    ) -> Result<InstallationServices>;

    /// Open an alarm status check; returns the reference id to poll.
    async fn check_alarm(&self, token: &str, ctx: &PanelContext) -> Result<String>;

    /// Poll an alarm status check.
    async fn check_alarm_status(
        &self,
        token: &str,
        ctx: &PanelContext,
        id_service: &str,
        reference_id: &str,
    ) -> Result<CommandPoll>;

    /// Request arming; returns the reference id to poll.
    async fn request_arm(
        &self,
        token: &str,
        ctx: &PanelContext,
        request: &str,
        current_status: &str,
    ) -> Result<String>;

    /// Poll an arm request.
    async fn arm_status(
        &self,
        token: &str,
        ctx: &PanelContext,
        request: &str,
        reference_id: &str,
        counter: u32,
    ) -> Result<CommandPoll>;

    /// Request disarming; returns the reference id to poll.
    async fn request_disarm(&self, token: &str, ctx: &PanelContext) -> Result<String>;

    /// Poll a disarm request.
    async fn disarm_status(
        &self,
        token: &str,
        ctx: &PanelContext,
        reference_id: &str,
        counter: u32,
    ) -> Result<CommandPoll>;
}
