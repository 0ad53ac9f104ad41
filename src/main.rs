// MIT License - Copyright (c) 2026 Peter Wright
// MQTT bridge

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::{Deserialize, Serialize};
use tokio::signal::unix::{signal, SignalKind};
use tokio::time::{interval, Duration};
use tracing::{debug, error, info, warn};

use verisure_cloud_bridge::{
    ArmMode, ClientConfig, CloudEvent, HttpTransport, LoginStatus, VerisureCloud, VerisureError,
};

type Cloud = VerisureCloud<HttpTransport>;

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser)]
#[command(name = "verisure2mqtt")]
#[command(about = "Bridge between the My Verisure cloud alarm and MQTT")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "config.toml")]
    config: String,
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Config {
    account: AccountToml,
    mqtt: MqttToml,
}

#[derive(Debug, Deserialize)]
struct AccountToml {
    /// Account user id (DNI/NIE)
    user: String,
    password: String,
    #[serde(default = "default_country")]
    country: String,
    #[serde(default = "default_lang")]
    lang: String,
    /// Directory for the session and device identifier files. Optional:
    /// when omitted, ~/.verisure-bridge is used.
    #[serde(default)]
    storage_dir: Option<String>,
    #[serde(default = "default_cache_ttl")]
    cache_ttl_secs: u64,
    #[serde(default = "default_request_timeout")]
    request_timeout_ms: u64,
}

fn default_country() -> String {
    "ES".to_string()
}
fn default_lang() -> String {
    "es".to_string()
}
fn default_cache_ttl() -> u64 {
    300
}
fn default_request_timeout() -> u64 {
    30000
}

#[derive(Debug, Deserialize)]
struct MqttToml {
    url: String,
    #[serde(default = "default_client_id")]
    client_id: String,
    #[serde(default = "default_subscribe_topic")]
    subscribe_topic: String,
    #[serde(default = "default_publish_topic")]
    publish_topic: String,
    #[serde(default = "default_snapshot_interval")]
    snapshot_interval_secs: u64,
}

fn default_client_id() -> String {
    "verisure-bridge".to_string()
}
fn default_subscribe_topic() -> String {
    "verisure/cmd".to_string()
}
fn default_publish_topic() -> String {
    "verisure".to_string()
}
fn default_snapshot_interval() -> u64 {
    60
}

fn build_client_config(toml: &AccountToml) -> ClientConfig {
    let mut builder = ClientConfig::builder()
        .user(&toml.user)
        .password(&toml.password)
        .country(&toml.country)
        .lang(&toml.lang)
        .cache_ttl_secs(toml.cache_ttl_secs)
        .request_timeout_ms(toml.request_timeout_ms);
    if let Some(dir) = &toml.storage_dir {
        builder = builder.storage_dir(dir);
    }
    builder.build()
}

// ---------------------------------------------------------------------------
// MQTT JSON types
// ---------------------------------------------------------------------------

// Published messages — all share {now, op, ...} flat structure

#[derive(Serialize)]
struct MqttSnapshot {
    now: u64,
    op: String,
    state: MqttSnapshotState,
}

#[derive(Serialize)]
struct MqttSnapshotState {
    installations: Vec<MqttInstallationState>,
}

#[derive(Serialize)]
struct MqttInstallationState {
    numinst: String,
    alias: String,
    #[serde(rename = "armedTotal")]
    armed_total: bool,
    #[serde(rename = "armedNight")]
    armed_night: bool,
    #[serde(rename = "armedDay")]
    armed_day: bool,
    external: bool,
    disarmed: bool,
    message: String,
}

// OTP prompt: {now, op, phones}
#[derive(Serialize)]
struct MqttOtpPrompt {
    now: u64,
    op: String,
    phones: Vec<MqttOtpPhone>,
}

#[derive(Serialize)]
struct MqttOtpPhone {
    id: i32,
    phone: String,
}

// CMD_ACK response
#[derive(Serialize)]
struct MqttCmdAck {
    now: u64,
    op: String,
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    src: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<serde_json::Value>,
}

// Simple event with just {now, op}
#[derive(Serialize)]
struct MqttSimpleEvent {
    now: u64,
    op: String,
}

// Inbound command (subscribed)
#[derive(Deserialize)]
struct MqttCommand {
    op: String,
    #[serde(default)]
    #[allow(dead_code)]
    op_id: Option<String>,
    #[serde(default)]
    installation: Option<String>,
    #[serde(default)]
    phone: Option<i32>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    seconds: Option<u64>,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn now_epoch_ms() -> u64 {
    Utc::now().timestamp_millis() as u64
}

async fn publish_json(client: &AsyncClient, topic: &str, payload: &impl Serialize, retain: bool) {
    match serde_json::to_string(payload) {
        Ok(json) => {
            if let Err(e) = client.publish(topic, QoS::AtLeastOnce, retain, json).await {
                error!("Failed to publish to {topic}: {e}");
            }
        }
        Err(e) => error!("Failed to serialize MQTT payload: {e}"),
    }
}

async fn publish_simple_event(client: &AsyncClient, topic: &str, op: &str) {
    let msg = MqttSimpleEvent {
        now: now_epoch_ms(),
        op: op.to_string(),
    };
    publish_json(client, topic, &msg, false).await;
}

async fn publish_otp_prompt(
    client: &AsyncClient,
    topic: &str,
    phones: &[verisure_cloud_bridge::OtpPhone],
) {
    let msg = MqttOtpPrompt {
        now: now_epoch_ms(),
        op: "OTP_REQUIRED".to_string(),
        phones: phones
            .iter()
            .map(|p| MqttOtpPhone {
                id: p.id,
                phone: p.phone.clone(),
            })
            .collect(),
    };
    publish_json(client, topic, &msg, false).await;
}

async fn publish_cmd_ack(
    client: &AsyncClient,
    topic: &str,
    success: bool,
    src: Option<serde_json::Value>,
    data: Option<serde_json::Value>,
) {
    let msg = MqttCmdAck {
        now: now_epoch_ms(),
        op: "CMD_ACK".to_string(),
        success,
        src,
        data,
    };
    publish_json(client, topic, &msg, false).await;
}

async fn build_snapshot(cloud: &Cloud) -> MqttSnapshot {
    let mut states = Vec::new();
    match cloud.get_installations().await {
        Ok(installations) => {
            for installation in installations {
                match cloud.get_alarm_status(&installation.numinst).await {
                    Ok(status) => states.push(MqttInstallationState {
                        numinst: installation.numinst,
                        alias: installation.alias,
                        armed_total: status.internal_total(),
                        armed_night: status.internal_night(),
                        armed_day: status.internal_day(),
                        external: status.external(),
                        disarmed: status.is_disarmed(),
                        message: status.message,
                    }),
                    Err(e) => {
                        warn!("Status for {} unavailable: {e}", installation.numinst)
                    }
                }
            }
        }
        Err(e) => warn!("Could not list installations: {e}"),
    }
    MqttSnapshot {
        now: now_epoch_ms(),
        op: "SNAPSHOT".to_string(),
        state: MqttSnapshotState {
            installations: states,
        },
    }
}

async fn publish_snapshot(client: &AsyncClient, topic: &str, cloud: &Cloud) {
    let snapshot = build_snapshot(cloud).await;
    publish_json(client, topic, &snapshot, true).await;
}

/// Make sure a session is live, kicking off the OTP flow over MQTT when
/// the cloud demands device authorization. Returns whether commands can
/// proceed now.
async fn ensure_login(cloud: &Cloud, client: &AsyncClient, topic: &str) -> bool {
    if cloud.is_authenticated().await {
        return true;
    }
    match cloud.login().await {
        Ok(LoginStatus::Authenticated) => true,
        Ok(LoginStatus::OtpRequired(phones)) => {
            info!(
                "Device authorization required; offering {} phone(s) over MQTT",
                phones.len()
            );
            publish_otp_prompt(client, topic, &phones).await;
            false
        }
        Err(e) => {
            error!("Login failed: {e}");
            false
        }
    }
}

/// Pick the installation a command addresses: explicit id, else the
/// account's first installation.
async fn resolve_installation(cloud: &Cloud, requested: Option<String>) -> Option<String> {
    if let Some(id) = requested {
        return Some(id);
    }
    match cloud.get_installations().await {
        Ok(installations) => installations.into_iter().next().map(|i| i.numinst),
        Err(e) => {
            warn!("Could not resolve default installation: {e}");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Cloud event → MQTT
// ---------------------------------------------------------------------------

async fn handle_cloud_event(event: CloudEvent, client: &AsyncClient, topic: &str) {
    match event {
        CloudEvent::Authenticated { user } => {
            info!("Authenticated as {user}");
            publish_simple_event(client, topic, "AUTHENTICATED").await;
        }
        CloudEvent::LoggedOut => {
            publish_simple_event(client, topic, "LOGGED_OUT").await;
        }
        CloudEvent::SessionExpired => {
            warn!("Session expired");
            publish_simple_event(client, topic, "SESSION_EXPIRED").await;
        }
        CloudEvent::OtpRequired { phones } => {
            publish_otp_prompt(client, topic, &phones).await;
        }
        CloudEvent::AlarmStatusChanged {
            installation_id,
            old_status,
            new_status,
        } => {
            info!("Alarm state of {installation_id} changed: {old_status:?} -> {new_status:?}");
            publish_simple_event(client, topic, "ALARM_STATUS_CHANGE").await;
        }
    }
}

// ---------------------------------------------------------------------------
// MQTT command handler
// ---------------------------------------------------------------------------

/// Execute an arm/disarm future and log the outcome. Returns `true` on success.
async fn exec_alarm_cmd<R>(
    op: &str,
    label: &str,
    fut: impl std::future::Future<Output = std::result::Result<R, VerisureError>>,
    success: impl Fn(&R) -> bool,
    message: impl Fn(&R) -> String,
) -> bool {
    match fut.await {
        Ok(result) if success(&result) => {
            info!("{op} {label}: success");
            true
        }
        Ok(result) => {
            warn!("{op} {label}: {}", message(&result));
            false
        }
        Err(e) => {
            error!("{op} {label} failed: {e}");
            false
        }
    }
}

async fn handle_command(
    payload_str: &str,
    cmd: MqttCommand,
    client: &AsyncClient,
    topic: &str,
    cloud: &Cloud,
) {
    // Parse the raw payload as a JSON value for the CMD_ACK src field
    let src_json = serde_json::from_str::<serde_json::Value>(payload_str).ok();

    // OTP and diagnostics commands work without a live session.
    match cmd.op.as_str() {
        "PING" => {
            info!("Command: PING");
            publish_cmd_ack(client, topic, true, src_json, None).await;
            return;
        }

        "OTP_SELECT" => {
            let Some(phone) = cmd.phone else {
                warn!("OTP_SELECT: missing phone");
                publish_cmd_ack(client, topic, false, src_json, None).await;
                return;
            };
            info!("Command: OTP_SELECT {phone}");
            let mut success = cloud.select_phone(phone).await;
            if success {
                // Selecting a phone immediately dispatches the SMS.
                if let Err(e) = cloud.send_otp().await {
                    error!("OTP dispatch failed: {e}");
                    success = false;
                }
            }
            publish_cmd_ack(client, topic, success, src_json, None).await;
            return;
        }

        "OTP_SEND" => {
            info!("Command: OTP_SEND");
            let success = match cloud.send_otp().await {
                Ok(()) => true,
                Err(e) => {
                    error!("OTP dispatch failed: {e}");
                    false
                }
            };
            publish_cmd_ack(client, topic, success, src_json, None).await;
            return;
        }

        "OTP_VERIFY" => {
            let code = cmd.code.unwrap_or_default();
            info!("Command: OTP_VERIFY");
            let success = match cloud.verify_otp(&code).await {
                Ok(ok) => ok,
                Err(e) => {
                    error!("OTP verification failed: {e}");
                    cloud.reset_auth().await;
                    false
                }
            };
            publish_cmd_ack(client, topic, success, src_json, None).await;
            if success {
                publish_snapshot(client, topic, cloud).await;
            }
            return;
        }

        "CACHE_INFO" => {
            debug!("Command: CACHE_INFO");
            let info = cloud.get_cache_info().await;
            let data = serde_json::json!({
                "size": info.size,
                "ttl": info.ttl_secs,
                "keys": info.keys,
            });
            publish_cmd_ack(client, topic, true, src_json, Some(data)).await;
            return;
        }

        "CACHE_CLEAR" => {
            info!("Command: CACHE_CLEAR {:?}", cmd.installation);
            cloud.clear_cache(cmd.installation.as_deref()).await;
            publish_cmd_ack(client, topic, true, src_json, None).await;
            return;
        }

        "CACHE_TTL" => {
            let Some(seconds) = cmd.seconds else {
                warn!("CACHE_TTL: missing seconds");
                publish_cmd_ack(client, topic, false, src_json, None).await;
                return;
            };
            info!("Command: CACHE_TTL {seconds}");
            cloud.set_cache_ttl(seconds).await;
            publish_cmd_ack(client, topic, true, src_json, None).await;
            return;
        }

        "LOGOUT" => {
            info!("Command: LOGOUT");
            let success = cloud.logout().await.is_ok();
            publish_cmd_ack(client, topic, success, src_json, None).await;
            return;
        }

        _ => {}
    }

    // Everything below needs a session.
    if !ensure_login(cloud, client, topic).await {
        publish_cmd_ack(client, topic, false, src_json, None).await;
        return;
    }

    match cmd.op.as_str() {
        "SNAPSHOT" | "STATUS" => {
            debug!("Command: {}", cmd.op);
            let snapshot = build_snapshot(cloud).await;
            let snapshot_value = serde_json::to_value(&snapshot).ok();
            publish_json(client, topic, &snapshot, true).await;
            publish_cmd_ack(client, topic, true, src_json, snapshot_value).await;
        }

        "ARM_AWAY" | "ARM_HOME" | "ARM_NIGHT" => {
            let op = cmd.op.clone();
            let mode = match op.as_str() {
                "ARM_AWAY" => ArmMode::Away,
                "ARM_HOME" => ArmMode::Home,
                _ => ArmMode::Night,
            };
            let Some(id) = resolve_installation(cloud, cmd.installation).await else {
                publish_cmd_ack(client, topic, false, src_json, None).await;
                return;
            };
            info!("Command: {op} installation {id}");
            let label = format!("installation {id}");
            let success = exec_alarm_cmd(
                &op,
                &label,
                cloud.arm(&id, mode),
                |r| r.success,
                |r| r.message.clone(),
            )
            .await;
            publish_cmd_ack(client, topic, success, src_json, None).await;
        }

        "DISARM" => {
            let Some(id) = resolve_installation(cloud, cmd.installation).await else {
                publish_cmd_ack(client, topic, false, src_json, None).await;
                return;
            };
            info!("Command: DISARM installation {id}");
            let label = format!("installation {id}");
            let success = exec_alarm_cmd(
                "DISARM",
                &label,
                cloud.disarm(&id),
                |r| r.success,
                |r| r.message.clone(),
            )
            .await;
            publish_cmd_ack(client, topic, success, src_json, None).await;
        }

        other => {
            warn!("Unknown command: {other}");
            publish_cmd_ack(client, topic, false, src_json, None).await;
        }
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG controls verbosity (e.g. RUST_LOG=debug or RUST_LOG=verisure_cloud_bridge=trace).
    // Default: info.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    // systemd journal already adds timestamps, so omit them when running under systemd
    if std::env::var_os("JOURNAL_STREAM").is_some() {
        tracing_subscriber::fmt().without_time().with_env_filter(env_filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let cli = Cli::parse();

    // Load config
    let config_text =
        std::fs::read_to_string(&cli.config).context("Failed to read config file")?;
    let mut config: Config = toml::from_str(&config_text).context("Failed to parse config file")?;

    let mut sighup = signal(SignalKind::hangup())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    loop {
        let client_config = build_client_config(&config.account);
        let (mqtt_host, mqtt_port) = parse_mqtt_url(&config.mqtt.url)?;
        let publish_topic = config.mqtt.publish_topic.clone();
        let subscribe_topic = config.mqtt.subscribe_topic.clone();
        let snapshot_interval_secs = config.mqtt.snapshot_interval_secs;

        let transport = HttpTransport::new(client_config.clone())?;
        let cloud = Arc::new(VerisureCloud::new(client_config, transport)?);

        // Set up MQTT
        let mut mqtt_opts = MqttOptions::new(&config.mqtt.client_id, &mqtt_host, mqtt_port);
        mqtt_opts.set_keep_alive(Duration::from_secs(30));
        let (client, mut eventloop) = AsyncClient::new(mqtt_opts, 256);

        client
            .subscribe(&subscribe_topic, QoS::AtLeastOnce)
            .await
            .context("Failed to subscribe to MQTT topic")?;
        info!("MQTT: subscribed to {subscribe_topic}");

        // First login; a pending OTP challenge is surfaced over MQTT and
        // completed by OTP_SELECT/OTP_VERIFY commands.
        if ensure_login(&cloud, &client, &publish_topic).await {
            publish_snapshot(&client, &publish_topic, &cloud).await;
        }

        // Task 1: Cloud event listener
        let client_events = client.clone();
        let topic_events = publish_topic.clone();
        let mut event_rx = cloud.subscribe();
        let event_handle = tokio::spawn(async move {
            loop {
                match event_rx.recv().await {
                    Ok(event) => {
                        handle_cloud_event(event, &client_events, &topic_events).await;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Event receiver lagged, missed {n} events");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                        info!("Event channel closed");
                        break;
                    }
                }
            }
        });

        // Task 2: MQTT event loop (receives messages, handles commands)
        let cloud_cmds = Arc::clone(&cloud);
        let client_cmds = client.clone();
        let topic_cmds = publish_topic.clone();
        let sub_topic = subscribe_topic.clone();
        let mqtt_handle = tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        // (Re)subscribe after every broker connect/reconnect.
                        // rumqttc does not auto-resubscribe, so without this a
                        // broker restart silently drops our subscription and we
                        // stop receiving commands.
                        info!("MQTT: connected, subscribing to {sub_topic}");
                        if let Err(e) =
                            client_cmds.subscribe(&sub_topic, QoS::AtLeastOnce).await
                        {
                            error!("Failed to subscribe to {sub_topic}: {e}");
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(msg))) => {
                        if msg.topic == sub_topic {
                            let payload = String::from_utf8_lossy(&msg.payload);
                            match serde_json::from_str::<MqttCommand>(&payload) {
                                Ok(cmd) => {
                                    if cmd.op == "SNAPSHOT" || cmd.op == "STATUS" {
                                        debug!("MQTT command received: {payload}");
                                    } else {
                                        info!("MQTT command received: {payload}");
                                    }
                                    handle_command(
                                        &payload,
                                        cmd,
                                        &client_cmds,
                                        &topic_cmds,
                                        &cloud_cmds,
                                    )
                                    .await;
                                }
                                Err(e) => {
                                    warn!("Failed to parse MQTT command: {e}");
                                }
                            }
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!("MQTT event loop error: {e}");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        // Task 3: Snapshot timer — polls the cloud before publishing so
        // snapshots reflect live state rather than a stale cache.
        let cloud_snap = Arc::clone(&cloud);
        let client_snap = client.clone();
        let topic_snap = publish_topic.clone();
        let snap_handle = tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(snapshot_interval_secs));
            // Skip the first immediate tick (we already published an initial snapshot)
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if !ensure_login(&cloud_snap, &client_snap, &topic_snap).await {
                    continue;
                }
                publish_snapshot(&client_snap, &topic_snap, &cloud_snap).await;
            }
        });

        // Wait for a signal
        info!("MQTT bridge running. Send SIGHUP to restart, SIGINT/SIGTERM to stop.");
        let restart = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT, shutting down...");
                false
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down...");
                false
            }
            _ = sighup.recv() => {
                info!("Received SIGHUP, reloading config and restarting...");
                true
            }
        };

        // Abort tasks
        event_handle.abort();
        mqtt_handle.abort();
        snap_handle.abort();

        if !restart {
            break;
        }

        // Reload config from disk; keep previous config on failure
        info!("Reloading config from {}", cli.config);
        match std::fs::read_to_string(&cli.config)
            .context("Failed to read config file")
            .and_then(|text| {
                toml::from_str::<Config>(&text).context("Failed to parse config file")
            }) {
            Ok(new_config) => match parse_mqtt_url(&new_config.mqtt.url) {
                Ok(_) => {
                    config = new_config;
                    info!("Config reloaded successfully");
                }
                Err(e) => warn!("Invalid MQTT URL in new config, keeping previous: {e}"),
            },
            Err(e) => warn!("Failed to reload config, keeping previous: {e}"),
        }

        info!("Restarting...");
    }

    info!("Shutdown complete");
    Ok(())
}

/// Parse an MQTT URL like "mqtt://host:port" into (host, port).
fn parse_mqtt_url(url: &str) -> Result<(String, u16)> {
    let stripped = url
        .strip_prefix("mqtt://")
        .or_else(|| url.strip_prefix("tcp://"))
        .unwrap_or(url);

    let (host, port_str) = stripped
        .rsplit_once(':')
        .context("MQTT URL must be in format mqtt://host:port")?;

    let port: u16 = port_str
        .parse()
        .context("Invalid MQTT port number")?;

    Ok((host.to_string(), port))
}
