// MIT License - Copyright (c) 2026 Peter Wright

use serde::{Deserialize, Serialize};

/// One installation (a customer's alarm site) as listed by xSInstallations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Installation {
    /// Installation number, the id used by every other operation.
    pub numinst: String,
    pub alias: String,
    /// Panel protocol identifier (e.g. "PROTOCOL").
    pub panel: String,
    pub installation_type: String,
    pub address: String,
    pub city: String,
    pub postcode: String,
    pub phone: String,
    pub email: String,
    pub role: String,
}

/// One contracted service record from the xSSrv response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id_service: String,
    /// Panel request code this service answers to (e.g. "EST" for status).
    pub request: String,
    pub active: bool,
    pub visible: bool,
    pub is_premium: bool,
}

/// Detailed installation metadata returned by xSSrv.
///
/// This is the value the services cache holds; the alarm flow consumes
/// `panel` and `capabilities` from it on every command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallationServices {
    pub numinst: String,
    pub alias: String,
    pub status: String,
    pub panel: String,
    /// Opaque capabilities token forwarded in the `x-capabilities` header.
    pub capabilities: String,
    pub language: String,
    pub services: Vec<Service>,
}

impl InstallationServices {
    /// The active alarm-status service, if the installation has one.
    ///
    /// The vendor exposes real-time alarm state through the service whose
    /// request code is `EST`; without it only default status is available.
    pub fn est_service(&self) -> Option<&Service> {
        self.services.iter().find(|s| s.request == "EST" && s.active)
    }

    /// Ids of all active services.
    pub fn active_service_ids(&self) -> Vec<&str> {
        self.services
            .iter()
            .filter(|s| s.active)
            .map(|s| s.id_service.as_str())
            .collect()
    }
}
