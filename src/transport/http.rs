// MIT License - Copyright (c) 2026 Peter Wright

//! HTTPS implementation of [`CloudTransport`] speaking the vendor's
//! GraphQL protocol with native-app header simulation.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE, USER_AGENT};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::device::DeviceIdentifiers;
use crate::error::{AuthErrorCode, Result, VerisureError};
use crate::installation::{Installation, InstallationServices, Service};
use crate::protocol::{self, GraphqlRequest};
use crate::transport::{
    CloudTransport, CommandPoll, Credentials, DeviceValidation, PanelContext, TokenGrant,
};

/// Session id literal sent in the `id` login variable and the auth header.
const CLIENT_SESSION_ID: &str = "OWI______________________";

/// Disarm request code (the only one; arming has one code per mode).
pub const DISARM_REQUEST_CODE: &str = "DARM1";

pub struct HttpTransport {
    http: reqwest::Client,
    config: ClientConfig,
}

impl HttpTransport {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(config.request_timeout_ms))
            .build()?;
        Ok(Self { http, config })
    }

    fn base_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(USER_AGENT, header_value("VerisureBridge/1.0")?);
        // Native app simulation; without these the cloud degrades the API.
        headers.insert(
            "app",
            header_value(&format!(
                "{{\"origin\": \"native\", \"appVersion\": \"{}\"}}",
                self.config.app_version
            ))?,
        );
        headers.insert("extension", HeaderValue::from_static("{\"mode\": \"full\"}"));
        Ok(headers)
    }

    /// The `auth` header accompanying every authenticated call.
    fn session_headers(&self, token: &str) -> Result<HeaderMap> {
        let mut headers = self.base_headers()?;
        let auth = json!({
            "loginTimestamp": Utc::now().timestamp_millis(),
            "user": self.config.user,
            "id": CLIENT_SESSION_ID,
            "country": self.config.country,
            "lang": self.config.lang,
            "callby": self.config.callby,
            "hash": token,
        });
        headers.insert("auth", header_value(&auth.to_string())?);
        Ok(headers)
    }

    fn panel_headers(&self, token: &str, ctx: &PanelContext) -> Result<HeaderMap> {
        let mut headers = self.session_headers(token)?;
        headers.insert("numinst", header_value(&ctx.installation_id)?);
        headers.insert("panel", header_value(&ctx.panel)?);
        headers.insert("x-capabilities", header_value(&ctx.capabilities)?);
        Ok(headers)
    }

    async fn execute(
        &self,
        operation: &str,
        query: &str,
        variables: Value,
        headers: HeaderMap,
    ) -> Result<Value> {
        let request = GraphqlRequest::new(query, variables);
        debug!("Executing {operation}");
        let response = self
            .http
            .post(&self.config.graphql_url)
            .headers(headers)
            .json(&request)
            .send()
            .await
            .map_err(|e| classify(operation, e))?;

        let status = response.status();
        let body: Value = response.json().await.map_err(|e| classify(operation, e))?;
        debug!("{operation} returned HTTP {status}");
        Ok(body)
    }

    fn device_variables(&self, device: &DeviceIdentifiers) -> Value {
        json!({
            "idDevice": device.id_device,
            "idDeviceIndigitall": device.id_device_indigitall,
            "uuid": device.uuid,
            "deviceName": device.device_name,
            "deviceBrand": device.device_brand,
            "deviceOsVersion": device.device_os_version,
            "deviceVersion": device.device_version,
        })
    }

    fn grant_from(&self, dto: protocol::LoginDto) -> Result<TokenGrant> {
        let hash = dto.hash.filter(|h| !h.is_empty()).ok_or_else(|| {
            VerisureError::auth("Login succeeded but no token was returned")
        })?;
        Ok(TokenGrant {
            hash,
            refresh_token: dto.refresh_token,
            lang: dto.lang,
            legals: dto.legals.unwrap_or(false),
            change_password: dto.change_password.unwrap_or(false),
            need_device_authorization: dto.need_device_authorization.unwrap_or(false),
        })
    }
}

fn header_value(s: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(s).map_err(|_| VerisureError::InvalidResponse {
        details: format!("value not usable as header: {s}"),
    })
}

/// Classify a reqwest failure: timeouts are their own retryable kind.
fn classify(operation: &str, error: reqwest::Error) -> VerisureError {
    if error.is_timeout() {
        VerisureError::RequestTimeout {
            operation: operation.to_string(),
        }
    } else {
        VerisureError::Http(error)
    }
}

fn poll_from(dto: protocol::CommandStatusDto) -> CommandPoll {
    if protocol::is_ok(&dto.res) {
        CommandPoll::Completed {
            message: dto.msg.unwrap_or_default(),
            protom_response: dto.protom_response,
            protom_response_date: dto.protom_response_date,
        }
    } else if protocol::is_wait(&dto.res) {
        CommandPoll::Wait
    } else {
        CommandPoll::Failed {
            message: dto.msg.unwrap_or_else(|| "Unknown error".to_string()),
        }
    }
}

#[async_trait]
impl CloudTransport for HttpTransport {
    async fn login(
        &self,
        credentials: &Credentials,
        device: &DeviceIdentifiers,
    ) -> Result<TokenGrant> {
        let mut variables = self.device_variables(device);
        let extra = json!({
            "id": CLIENT_SESSION_ID,
            "country": self.config.country,
            "callby": self.config.callby,
            "lang": self.config.lang,
            "user": credentials.user,
            "password": credentials.password,
            "deviceType": device.device_type,
            "deviceResolution": device.device_resolution,
        });
        merge(&mut variables, extra);

        let body = self
            .execute("login", protocol::LOGIN_MUTATION, variables, self.base_headers()?)
            .await?;

        if let Some(error) = protocol::first_error(&body) {
            let code = error.err.as_deref().and_then(AuthErrorCode::from_code);
            return Err(VerisureError::Authentication {
                message: error.message,
                code,
            });
        }

        let dto: protocol::LoginDto = protocol::data_field(&body, "xSLoginToken")?;
        if !protocol::is_ok(&dto.res) {
            return Err(VerisureError::auth(
                dto.msg.unwrap_or_else(|| "No response data".to_string()),
            ));
        }
        self.grant_from(dto)
    }

    async fn validate_device(
        &self,
        token: &str,
        device: &DeviceIdentifiers,
    ) -> Result<DeviceValidation> {
        let variables = self.device_variables(device);
        let body = self
            .execute(
                "validate_device",
                protocol::VALIDATE_DEVICE_MUTATION,
                variables,
                self.session_headers(token)?,
            )
            .await?;

        if let Some(error) = protocol::first_error(&body) {
            let code = error.auth_code.as_deref().and_then(AuthErrorCode::from_code);
            let otp_flagged = code == Some(AuthErrorCode::OtpRequired)
                || error.auth_type.as_deref() == Some("OTP");
            if otp_flagged {
                let otp_hash = error.otp_hash.unwrap_or_default();
                return Ok(DeviceValidation::OtpRequired {
                    phones: error.phones,
                    otp_hash,
                });
            }
            return Err(VerisureError::Authentication {
                message: error.message,
                code,
            });
        }

        let dto: protocol::LoginDto = protocol::data_field(&body, "xSValidateDevice")?;
        if !protocol::is_ok(&dto.res) {
            return Err(VerisureError::auth(
                dto.msg.unwrap_or_else(|| "Device validation failed".to_string()),
            ));
        }
        Ok(DeviceValidation::Granted(self.grant_from(dto)?))
    }

    async fn send_otp(&self, token: &str, record_id: i32, otp_hash: &str) -> Result<()> {
        let variables = json!({ "recordId": record_id, "otpHash": otp_hash });
        let body = self
            .execute(
                "send_otp",
                protocol::SEND_OTP_MUTATION,
                variables,
                self.session_headers(token)?,
            )
            .await?;

        if let Some(error) = protocol::first_error(&body) {
            return Err(VerisureError::otp(format!(
                "Failed to send OTP: {}",
                error.message
            )));
        }
        let dto: protocol::AckDto = protocol::data_field(&body, "xSSendOtp")?;
        if !protocol::is_ok(&dto.res) {
            return Err(VerisureError::otp(format!(
                "Failed to send OTP: {}",
                dto.msg.unwrap_or_else(|| "No response data".to_string())
            )));
        }
        debug!("OTP dispatched to record {record_id}");
        Ok(())
    }

    async fn verify_otp(
        &self,
        token: &str,
        code: &str,
        otp_hash: &str,
        device: &DeviceIdentifiers,
    ) -> Result<TokenGrant> {
        let variables = self.device_variables(device);
        let mut headers = self.session_headers(token)?;
        let security = json!({ "token": code, "type": "OTP", "otpHash": otp_hash });
        headers.insert("security", header_value(&security.to_string())?);

        let body = self
            .execute(
                "verify_otp",
                protocol::VALIDATE_DEVICE_MUTATION,
                variables,
                headers,
            )
            .await?;

        if let Some(error) = protocol::first_error(&body) {
            return Err(VerisureError::otp(format!(
                "OTP verification failed: {}",
                error.message
            )));
        }
        let dto: protocol::LoginDto = protocol::data_field(&body, "xSValidateDevice")?;
        if !protocol::is_ok(&dto.res) {
            return Err(VerisureError::otp(format!(
                "OTP verification failed: {}",
                dto.msg.unwrap_or_else(|| "No response data".to_string())
            )));
        }
        self.grant_from(dto)
    }

    async fn get_installations(&self, token: &str) -> Result<Vec<Installation>> {
        let body = self
            .execute(
                "installations",
                protocol::INSTALLATIONS_QUERY,
                json!({}),
                self.session_headers(token)?,
            )
            .await?;

        if let Some(error) = protocol::first_error(&body) {
            return Err(VerisureError::Api {
                message: format!("Failed to get installations: {}", error.message),
            });
        }
        let dto: protocol::InstallationListDto = protocol::data_field(&body, "xSInstallations")?;
        let installations = dto
            .installations
            .into_iter()
            .map(|i| Installation {
                numinst: i.numinst,
                alias: i.alias.unwrap_or_default(),
                panel: i.panel.unwrap_or_default(),
                installation_type: i.installation_type.unwrap_or_default(),
                address: i.address.unwrap_or_default(),
                city: i.city.unwrap_or_default(),
                postcode: i.postcode.unwrap_or_default(),
                phone: i.phone.unwrap_or_default(),
                email: i.email.unwrap_or_default(),
                role: i.role.unwrap_or_default(),
            })
            .collect();
        Ok(installations)
    }

    async fn get_installation_services(
        &self,
        token: &str,
        installation_id: &str,
    ) -> Result<InstallationServices> {
        let variables = json!({ "numinst": installation_id });
        let body = self
            .execute(
                "installation_services",
                protocol::INSTALLATION_SERVICES_QUERY,
                variables,
                self.session_headers(token)?,
            )
            .await?;

        if let Some(error) = protocol::first_error(&body) {
            return Err(VerisureError::Api {
                message: format!("Failed to get installation services: {}", error.message),
            });
        }
        let dto: protocol::SrvDto = protocol::data_field(&body, "xSSrv")?;
        if !protocol::is_ok(&dto.res) {
            return Err(VerisureError::Api {
                message: format!(
                    "Failed to get installation services: {}",
                    dto.msg.unwrap_or_else(|| "No response data".to_string())
                ),
            });
        }
        let installation = dto.installation.ok_or_else(|| VerisureError::InvalidResponse {
            details: "xSSrv: missing installation".to_string(),
        })?;

        Ok(InstallationServices {
            numinst: installation.numinst,
            alias: installation.alias.unwrap_or_default(),
            status: installation.status.unwrap_or_default(),
            panel: installation.panel.unwrap_or_default(),
            capabilities: installation.capabilities.unwrap_or_default(),
            language: dto.language.unwrap_or_default(),
            services: installation
                .services
                .into_iter()
                .map(|s| Service {
                    id_service: s.id_service,
                    request: s.request.unwrap_or_default(),
                    active: s.active,
                    visible: s.visible,
                    is_premium: s.is_premium,
                })
                .collect(),
        })
    }

    async fn check_alarm(&self, token: &str, ctx: &PanelContext) -> Result<String> {
        let variables = json!({ "numinst": ctx.installation_id, "panel": ctx.panel });
        let body = self
            .execute(
                "check_alarm",
                protocol::CHECK_ALARM_QUERY,
                variables,
                self.panel_headers(token, ctx)?,
            )
            .await?;
        reference_from(&body, "xSCheckAlarm")
    }

    async fn check_alarm_status(
        &self,
        token: &str,
        ctx: &PanelContext,
        id_service: &str,
        reference_id: &str,
    ) -> Result<CommandPoll> {
        let variables = json!({
            "numinst": ctx.installation_id,
            "panel": ctx.panel,
            "idService": id_service,
            "referenceId": reference_id,
        });
        let body = self
            .execute(
                "check_alarm_status",
                protocol::CHECK_ALARM_STATUS_QUERY,
                variables,
                self.panel_headers(token, ctx)?,
            )
            .await?;
        if let Some(error) = protocol::first_error(&body) {
            warn!("Alarm status check failed: {}", error.message);
            return Ok(CommandPoll::Failed {
                message: error.message,
            });
        }
        let dto: protocol::CommandStatusDto =
            protocol::data_field(&body, "xSCheckAlarmStatus")?;
        Ok(poll_from(dto))
    }

    async fn request_arm(
        &self,
        token: &str,
        ctx: &PanelContext,
        request: &str,
        current_status: &str,
    ) -> Result<String> {
        let variables = json!({
            "numinst": ctx.installation_id,
            "request": request,
            "panel": ctx.panel,
            "currentStatus": current_status,
        });
        let body = self
            .execute(
                "arm_panel",
                protocol::ARM_PANEL_MUTATION,
                variables,
                self.panel_headers(token, ctx)?,
            )
            .await?;
        reference_from(&body, "xSArmPanel")
    }

    async fn arm_status(
        &self,
        token: &str,
        ctx: &PanelContext,
        request: &str,
        reference_id: &str,
        counter: u32,
    ) -> Result<CommandPoll> {
        let variables = json!({
            "numinst": ctx.installation_id,
            "panel": ctx.panel,
            "request": request,
            "referenceId": reference_id,
            "counter": counter,
        });
        let body = self
            .execute(
                "arm_status",
                protocol::ARM_STATUS_QUERY,
                variables,
                self.panel_headers(token, ctx)?,
            )
            .await?;
        if let Some(error) = protocol::first_error(&body) {
            return Ok(CommandPoll::Failed {
                message: error.message,
            });
        }
        let dto: protocol::CommandStatusDto = protocol::data_field(&body, "xSArmStatus")?;
        Ok(poll_from(dto))
    }

    async fn request_disarm(&self, token: &str, ctx: &PanelContext) -> Result<String> {
        let variables = json!({
            "numinst": ctx.installation_id,
            "request": DISARM_REQUEST_CODE,
            "panel": ctx.panel,
        });
        let body = self
            .execute(
                "disarm_panel",
                protocol::DISARM_PANEL_MUTATION,
                variables,
                self.panel_headers(token, ctx)?,
            )
            .await?;
        reference_from(&body, "xSDisarmPanel")
    }

    async fn disarm_status(
        &self,
        token: &str,
        ctx: &PanelContext,
        reference_id: &str,
        counter: u32,
    ) -> Result<CommandPoll> {
        let variables = json!({
            "numinst": ctx.installation_id,
            "panel": ctx.panel,
            "request": DISARM_REQUEST_CODE,
            "referenceId": reference_id,
            "counter": counter,
        });
        let body = self
            .execute(
                "disarm_status",
                protocol::DISARM_STATUS_QUERY,
                variables,
                self.panel_headers(token, ctx)?,
            )
            .await?;
        if let Some(error) = protocol::first_error(&body) {
            return Ok(CommandPoll::Failed {
                message: error.message,
            });
        }
        let dto: protocol::CommandStatusDto = protocol::data_field(&body, "xSDisarmStatus")?;
        Ok(poll_from(dto))
    }
}

/// Extract a reference id from a check/arm/disarm initiation response.
fn reference_from(body: &Value, field: &str) -> Result<String> {
    if let Some(error) = protocol::first_error(body) {
        return Err(VerisureError::Api {
            message: error.message,
        });
    }
    let dto: protocol::ReferenceDto = protocol::data_field(body, field)?;
    if !protocol::is_ok(&dto.res) {
        return Err(VerisureError::Api {
            message: dto.msg.unwrap_or_else(|| "No response data".to_string()),
        });
    }
    dto.reference_id
        .filter(|r| !r.is_empty())
        .ok_or_else(|| VerisureError::InvalidResponse {
            details: format!("{field}: missing referenceId"),
        })
}

/// Merge `extra`'s keys into `target` (both must be objects).
fn merge(target: &mut Value, extra: Value) {
    if let (Value::Object(target), Value::Object(extra)) = (target, extra) {
        for (k, v) in extra {
            target.insert(k, v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_reference_from_ok() {
        let body = json!({ "data": { "xSArmPanel": { "res": "OK", "referenceId": "ref-9" } } });
        assert_eq!(reference_from(&body, "xSArmPanel").unwrap(), "ref-9");
    }

    #[test]
    fn test_reference_from_ko() {
        let body = json!({ "data": { "xSArmPanel": { "res": "KO", "msg": "not allowed" } } });
        assert!(matches!(
            reference_from(&body, "xSArmPanel"),
            Err(VerisureError::Api { .. })
        ));
    }

    #[test]
    fn test_reference_from_missing_id() {
        let body = json!({ "data": { "xSArmPanel": { "res": "OK" } } });
        assert!(matches!(
            reference_from(&body, "xSArmPanel"),
            Err(VerisureError::InvalidResponse { .. })
        ));
    }

    #[test]
    fn test_poll_from_states() {
        let ok = protocol::CommandStatusDto {
            res: "OK".into(),
            msg: Some("armed".into()),
            status: None,
            protom_response: Some("T".into()),
            protom_response_date: None,
            numinst: None,
            forced_armed: None,
        };
        assert!(matches!(poll_from(ok), CommandPoll::Completed { .. }));

        let wait = protocol::CommandStatusDto {
            res: "WAIT".into(),
            msg: None,
            status: None,
            protom_response: None,
            protom_response_date: None,
            numinst: None,
            forced_armed: None,
        };
        assert!(matches!(poll_from(wait), CommandPoll::Wait));

        let ko = protocol::CommandStatusDto {
            res: "KO".into(),
            msg: Some("rejected".into()),
            status: None,
            protom_response: None,
            protom_response_date: None,
            numinst: None,
            forced_armed: None,
        };
        assert!(matches!(poll_from(ko), CommandPoll::Failed { .. }));
    }
}
