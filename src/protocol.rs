// MIT License - Copyright (c) 2026 Peter Wright

//! GraphQL wire protocol for the My Verisure cloud.
//!
//! Every operation is a POST of `{query, variables}` to the single
//! endpoint. Results come back under `data.<field>` with a `res` of
//! `OK`, `KO` or `WAIT`; failures come back as `errors[0]` whose `data`
//! object carries the vendor extensions (`err`, `auth-code`, `auth-type`,
//! `auth-phones`, `auth-otp-hash`).

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::auth::OtpPhone;
use crate::error::{Result, VerisureError};

// ---------------------------------------------------------------------------
// Operation documents
// ---------------------------------------------------------------------------

/// Login mutation (native app simulation).
pub const LOGIN_MUTATION: &str = r#"
mutation mkLoginToken($user: String!, $password: String!, $id: String!, $country: String!, $idDevice: String, $idDeviceIndigitall: String, $deviceType: String, $deviceVersion: String, $deviceResolution: String, $lang: String!, $callby: String!, $uuid: String, $deviceName: String, $deviceBrand: String, $deviceOsVersion: String) {
    xSLoginToken(
        user: $user
        password: $password
        id: $id
        country: $country
        idDevice: $idDevice
        idDeviceIndigitall: $idDeviceIndigitall
        deviceType: $deviceType
        deviceVersion: $deviceVersion
        deviceResolution: $deviceResolution
        lang: $lang
        callby: $callby
        uuid: $uuid
        deviceName: $deviceName
        deviceBrand: $deviceBrand
        deviceOsVersion: $deviceOsVersion
    ) {
        res
        msg
        hash
        lang
        legals
        changePassword
        needDeviceAuthorization
        refreshToken
    }
}
"#;

/// Device validation mutation. Also used for OTP verification (with a
/// `Security` header carrying the code).
pub const VALIDATE_DEVICE_MUTATION: &str = r#"
mutation mkValidateDevice($idDevice: String, $idDeviceIndigitall: String, $uuid: String, $deviceName: String, $deviceBrand: String, $deviceOsVersion: String, $deviceVersion: String) {
    xSValidateDevice(
        idDevice: $idDevice
        idDeviceIndigitall: $idDeviceIndigitall
        uuid: $uuid
        deviceName: $deviceName
        deviceBrand: $deviceBrand
        deviceOsVersion: $deviceOsVersion
        deviceVersion: $deviceVersion
    ) {
        res
        msg
        hash
        refreshToken
        legals
    }
}
"#;

pub const SEND_OTP_MUTATION: &str = r#"
mutation mkSendOTP($recordId: Int!, $otpHash: String!) {
    xSSendOtp(recordId: $recordId, otpHash: $otpHash) {
        res
        msg
    }
}
"#;

pub const INSTALLATIONS_QUERY: &str = r#"
query mkInstallationList {
    xSInstallations {
        installations {
            numinst
            alias
            panel
            type
            name
            surname
            address
            city
            postcode
            province
            email
            phone
            due
            role
        }
    }
}
"#;

pub const INSTALLATION_SERVICES_QUERY: &str = r#"
query Srv($numinst: String!, $uuid: String) {
    xSSrv(numinst: $numinst, uuid: $uuid) {
        res
        msg
        language
        installation {
            numinst
            role
            alias
            status
            panel
            sim
            instIbs
            services {
                idService
                active
                visible
                bde
                isPremium
                codOper
                request
                minWrapperVersion
                unprotectActive
                unprotectDeviceStatus
                instDate
            }
            capabilities
        }
    }
}
"#;

pub const CHECK_ALARM_QUERY: &str = r#"
query CheckAlarm($numinst: String!, $panel: String!) {
    xSCheckAlarm(numinst: $numinst, panel: $panel) {
        res
        msg
        referenceId
    }
}
"#;

pub const CHECK_ALARM_STATUS_QUERY: &str = r#"
query CheckAlarmStatus($numinst: String!, $idService: String!, $panel: String!, $referenceId: String!) {
    xSCheckAlarmStatus(
        numinst: $numinst
        idService: $idService
        panel: $panel
        referenceId: $referenceId
    ) {
        res
        msg
        status
        numinst
        protomResponse
        protomResponseDate
        forcedArmed
    }
}
"#;

pub const ARM_PANEL_MUTATION: &str = r#"
mutation xSArmPanel($numinst: String!, $request: ArmCodeRequest!, $panel: String!, $currentStatus: String) {
    xSArmPanel(numinst: $numinst, request: $request, panel: $panel, currentStatus: $currentStatus) {
        res
        msg
        referenceId
    }
}
"#;

pub const ARM_STATUS_QUERY: &str = r#"
query ArmStatus($numinst: String!, $request: ArmCodeRequest, $panel: String!, $referenceId: String!, $counter: Int!) {
    xSArmStatus(
        numinst: $numinst
        panel: $panel
        referenceId: $referenceId
        counter: $counter
        request: $request
    ) {
        res
        msg
        status
        protomResponse
        protomResponseDate
        numinst
        requestId
    }
}
"#;

pub const DISARM_PANEL_MUTATION: &str = r#"
mutation xSDisarmPanel($numinst: String!, $request: DisarmCodeRequest!, $panel: String!) {
    xSDisarmPanel(numinst: $numinst, request: $request, panel: $panel) {
        res
        msg
        referenceId
    }
}
"#;

pub const DISARM_STATUS_QUERY: &str = r#"
query DisarmStatus($numinst: String!, $panel: String!, $referenceId: String!, $counter: Int!, $request: DisarmCodeRequest) {
    xSDisarmStatus(
        numinst: $numinst
        panel: $panel
        referenceId: $referenceId
        counter: $counter
        request: $request
    ) {
        res
        msg
        status
        protomResponse
        protomResponseDate
        numinst
        requestId
    }
}
"#;

// ---------------------------------------------------------------------------
// Request envelope
// ---------------------------------------------------------------------------

/// The POST body for one GraphQL operation.
#[derive(Debug, Serialize)]
pub struct GraphqlRequest<'a> {
    pub query: &'a str,
    pub variables: Value,
}

impl<'a> GraphqlRequest<'a> {
    pub fn new(query: &'a str, variables: Value) -> Self {
        Self { query, variables }
    }
}

// ---------------------------------------------------------------------------
// Response envelope
// ---------------------------------------------------------------------------

/// Result status reported in the `res` field.
pub fn is_ok(res: &str) -> bool {
    res == "OK"
}

/// The command is still in flight; poll again.
pub fn is_wait(res: &str) -> bool {
    res == "WAIT"
}

/// The first GraphQL error with its vendor extensions, if present.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ErrorInfo {
    pub message: String,
    /// Login error code (e.g. "60091").
    pub err: Option<String>,
    /// Device validation code (e.g. "10001", "10010").
    pub auth_code: Option<String>,
    /// "OTP" when two-factor is required.
    pub auth_type: Option<String>,
    /// Phones offered for OTP delivery.
    pub phones: Vec<OtpPhone>,
    /// Hash identifying the OTP transaction.
    pub otp_hash: Option<String>,
}

/// Extract the first error from a response envelope.
pub fn first_error(response: &Value) -> Option<ErrorInfo> {
    let error = response.get("errors")?.as_array()?.first()?;
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("Unknown error")
        .to_string();
    let data = error.get("data").cloned().unwrap_or(Value::Null);

    let phones = data
        .get("auth-phones")
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(|p| {
                    Some(OtpPhone {
                        id: p.get("id")?.as_i64()? as i32,
                        phone: p.get("phone")?.as_str()?.to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    Some(ErrorInfo {
        message,
        err: stringly(data.get("err")),
        auth_code: stringly(data.get("auth-code")),
        auth_type: stringly(data.get("auth-type")),
        phones,
        otp_hash: data
            .get("auth-otp-hash")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

/// Deserialize `data.<field>` from a response envelope.
///
/// Responses arriving through the raw transport are wrapped in `data`;
/// a bare `{field: ...}` form is also accepted.
pub fn data_field<T: DeserializeOwned>(response: &Value, field: &str) -> Result<T> {
    let node = response
        .get("data")
        .and_then(|d| d.get(field))
        .or_else(|| response.get(field))
        .ok_or_else(|| VerisureError::InvalidResponse {
            details: format!("missing field {field}"),
        })?;
    serde_json::from_value(node.clone()).map_err(|e| VerisureError::InvalidResponse {
        details: format!("{field}: {e}"),
    })
}

// Some deployments return numeric codes/ids where others return strings.
fn stringly(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn de_stringly<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<String, D::Error> {
    let value = Value::deserialize(deserializer)?;
    match value {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Response DTOs
// ---------------------------------------------------------------------------

/// xSLoginToken / xSValidateDevice payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginDto {
    pub res: String,
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub lang: Option<String>,
    #[serde(default)]
    pub legals: Option<bool>,
    #[serde(default)]
    pub change_password: Option<bool>,
    #[serde(default)]
    pub need_device_authorization: Option<bool>,
}

/// xSSendOtp payload.
#[derive(Debug, Clone, Deserialize)]
pub struct AckDto {
    pub res: String,
    #[serde(default)]
    pub msg: Option<String>,
}

/// xSCheckAlarm / xSArmPanel / xSDisarmPanel payload: a reference id to poll.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceDto {
    pub res: String,
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(default)]
    pub reference_id: Option<String>,
}

/// xSArmStatus / xSDisarmStatus / xSCheckAlarmStatus payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandStatusDto {
    pub res: String,
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub protom_response: Option<String>,
    #[serde(default)]
    pub protom_response_date: Option<String>,
    #[serde(default)]
    pub numinst: Option<String>,
    #[serde(default)]
    pub forced_armed: Option<bool>,
}

/// One entry of the xSInstallations list.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallationDto {
    pub numinst: String,
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    pub panel: Option<String>,
    #[serde(default, rename = "type")]
    pub installation_type: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub postcode: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InstallationListDto {
    #[serde(default)]
    pub installations: Vec<InstallationDto>,
}

/// One service record of the xSSrv response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDto {
    #[serde(deserialize_with = "de_stringly")]
    pub id_service: String,
    #[serde(default)]
    pub request: Option<String>,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub visible: bool,
    #[serde(default)]
    pub is_premium: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SrvInstallationDto {
    pub numinst: String,
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub panel: Option<String>,
    #[serde(default)]
    pub capabilities: Option<String>,
    #[serde(default)]
    pub services: Vec<ServiceDto>,
}

/// xSSrv payload.
#[derive(Debug, Clone, Deserialize)]
pub struct SrvDto {
    pub res: String,
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub installation: Option<SrvInstallationDto>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_data_field_extracts_login() {
        let response = json!({
            "data": {
                "xSLoginToken": {
                    "res": "OK",
                    "msg": "Login ok",
                    "hash": "jwt-token",
                    "refreshToken": "refresh",
                    "lang": "ES",
                    "legals": true,
                    "changePassword": false,
                    "needDeviceAuthorization": true
                }
            }
        });
        let dto: LoginDto = data_field(&response, "xSLoginToken").unwrap();
        assert!(is_ok(&dto.res));
        assert_eq!(dto.hash.as_deref(), Some("jwt-token"));
        assert_eq!(dto.need_device_authorization, Some(true));
    }

    #[test]
    fn test_data_field_accepts_bare_form() {
        let response = json!({
            "xSLoginToken": { "res": "OK", "hash": "jwt-token" }
        });
        let dto: LoginDto = data_field(&response, "xSLoginToken").unwrap();
        assert_eq!(dto.hash.as_deref(), Some("jwt-token"));
    }

    #[test]
    fn test_data_field_missing() {
        let response = json!({ "data": {} });
        let result: Result<LoginDto> = data_field(&response, "xSLoginToken");
        assert!(matches!(result, Err(VerisureError::InvalidResponse { .. })));
    }

    #[test]
    fn test_first_error_with_login_code() {
        let response = json!({
            "errors": [{
                "message": "Usuario o contraseña incorrectos",
                "data": { "err": "60091" }
            }]
        });
        let error = first_error(&response).unwrap();
        assert_eq!(error.err.as_deref(), Some("60091"));
        assert!(error.phones.is_empty());
    }

    #[test]
    fn test_first_error_with_otp_extensions() {
        let response = json!({
            "errors": [{
                "message": "Additional authentication required",
                "data": {
                    "auth-code": "10001",
                    "auth-type": "OTP",
                    "auth-otp-hash": "otp-hash-value",
                    "auth-phones": [
                        { "id": 0, "phone": "**********975" },
                        { "id": 1, "phone": "**********123" }
                    ]
                }
            }]
        });
        let error = first_error(&response).unwrap();
        assert_eq!(error.auth_code.as_deref(), Some("10001"));
        assert_eq!(error.auth_type.as_deref(), Some("OTP"));
        assert_eq!(error.otp_hash.as_deref(), Some("otp-hash-value"));
        assert_eq!(error.phones.len(), 2);
        assert_eq!(error.phones[1].id, 1);
        assert_eq!(error.phones[1].phone, "**********123");
    }

    #[test]
    fn test_first_error_numeric_code() {
        let response = json!({
            "errors": [{ "message": "nope", "data": { "auth-code": 10010 } }]
        });
        let error = first_error(&response).unwrap();
        assert_eq!(error.auth_code.as_deref(), Some("10010"));
    }

    #[test]
    fn test_first_error_absent() {
        assert!(first_error(&json!({ "data": {} })).is_none());
        assert!(first_error(&json!({ "errors": [] })).is_none());
    }

    #[test]
    fn test_service_id_accepts_number_or_string() {
        let srv: ServiceDto =
            serde_json::from_value(json!({ "idService": 11, "request": "EST", "active": true }))
                .unwrap();
        assert_eq!(srv.id_service, "11");

        let srv: ServiceDto =
            serde_json::from_value(json!({ "idService": "31", "active": false })).unwrap();
        assert_eq!(srv.id_service, "31");
    }

    #[test]
    fn test_command_status_parse() {
        let response = json!({
            "data": {
                "xSArmStatus": {
                    "res": "WAIT",
                    "msg": "Waiting for panel",
                    "status": null,
                    "protomResponse": null
                }
            }
        });
        let dto: CommandStatusDto = data_field(&response, "xSArmStatus").unwrap();
        assert!(is_wait(&dto.res));
        assert!(dto.protom_response.is_none());
    }

    #[test]
    fn test_reference_parse() {
        let response = json!({
            "data": {
                "xSCheckAlarm": { "res": "OK", "referenceId": "ref-1234" }
            }
        });
        let dto: ReferenceDto = data_field(&response, "xSCheckAlarm").unwrap();
        assert_eq!(dto.reference_id.as_deref(), Some("ref-1234"));
    }
}
