// MIT License - Copyright (c) 2026 Peter Wright
//
//! # verisure-cloud-bridge
//!
//! Client for the My Verisure (Securitas Direct) cloud GraphQL API:
//! two-factor login with device authorization, session persistence,
//! installation metadata with a TTL cache, and arm/disarm/status commands
//! for the alarm installations on the account.
//!
//! ## Quick Start
//!
//! ```no_run
//! use verisure_cloud_bridge::{ArmMode, ClientConfig, HttpTransport, LoginStatus, VerisureCloud};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ClientConfig::builder()
//!         .user("12345678A")
//!         .password("secret")
//!         .build();
//!
//!     let transport = HttpTransport::new(config.clone())?;
//!     let client = VerisureCloud::new(config, transport)?;
//!
//!     match client.login().await? {
//!         LoginStatus::Authenticated => {}
//!         LoginStatus::OtpRequired(phones) => {
//!             // Pick a phone, dispatch the SMS, then verify the code.
//!             client.select_phone(phones[0].id).await;
//!             client.send_otp().await?;
//!             client.verify_otp("123456").await?;
//!         }
//!     }
//!
//!     for installation in client.get_installations().await? {
//!         let status = client.get_alarm_status(&installation.numinst).await?;
//!         println!("{}: {:?}", installation.alias, status.flags);
//!     }
//!     Ok(())
//! }
//! ```

pub mod alarm;
pub mod auth;
pub mod cache;
pub mod client;
pub mod config;
pub mod device;
pub mod error;
pub mod event;
pub mod installation;
pub mod protocol;
pub mod session;
pub mod transport;

// Re-exports for convenience
pub use alarm::{AlarmStatus, AlarmStatusFlags, ArmResult, DisarmResult};
pub use auth::{AuthState, OtpChallenge, OtpPhone};
pub use cache::{CacheInfo, ServiceCache};
pub use client::{LoginStatus, VerisureCloud};
pub use config::{ArmMode, ClientConfig, ClientConfigBuilder};
pub use device::DeviceIdentifiers;
pub use error::{AuthErrorCode, Result, VerisureError};
pub use event::{CloudEvent, EventReceiver};
pub use installation::{Installation, InstallationServices, Service};
pub use session::{FileSessionStore, Session, SessionStore};
pub use transport::{CloudTransport, HttpTransport};
