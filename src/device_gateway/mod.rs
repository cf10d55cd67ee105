//! DeviceGateway - ISAPI operations over digest authentication
//!
//! ## Responsibilities
//!
//! - Device info, event search, user provisioning, relay control,
//!   webhook target configuration
//! - Ordered dialect fallback for event search
//! - Turning device failures into `GatewayFault` values
//!
//! Every call takes the `Device` explicitly; the gateway holds no
//! per-device state.

mod requests;
mod types;

pub use requests::{is_parameter_fault, paths};
pub use types::*;

use crate::digest_auth::{DigestAuthClient, DigestError, DigestRequest, DigestResponse};
use crate::event_normalizer::xml::extract_xml_value;
use chrono_tz::Tz;
use reqwest::Method;
use std::time::Duration;

/// ISAPI gateway
#[derive(Clone)]
pub struct DeviceGateway {
    client: DigestAuthClient,
    /// Zone used when formatting search windows for the device
    timezone: Tz,
}

impl DeviceGateway {
    /// Create new gateway
    pub fn new(timeout: Duration, timezone: Tz) -> Self {
        Self {
            client: DigestAuthClient::new(timeout),
            timezone,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.client.timeout()
    }

    /// GET device information (XML)
    pub async fn get_device_info(&self, device: &Device) -> Result<DeviceInfo, GatewayFault> {
        let response = self
            .call(device, Method::GET, paths::DEVICE_INFO, None, None)
            .await?;
        let response = Self::require_success(device, response)?;

        let body = &response.body;
        Ok(DeviceInfo {
            device_name: extract_xml_value(body, "deviceName"),
            device_id: extract_xml_value(body, "deviceID"),
            model: extract_xml_value(body, "model"),
            serial_number: extract_xml_value(body, "serialNumber"),
            mac_address: extract_xml_value(body, "macAddress"),
            firmware_version: extract_xml_value(body, "firmwareVersion"),
            firmware_released_date: extract_xml_value(body, "firmwareReleasedDate"),
        })
    }

    /// Search access events, falling back through the strategy plan.
    ///
    /// A strategy rejected for parameter reasons moves on to the next one;
    /// network and authentication failures end the search immediately.
    pub async fn search_events(
        &self,
        device: &Device,
        query: &EventSearchQuery,
    ) -> Result<SearchOutcome, GatewayFault> {
        let plan = SearchStrategy::plan(device, query.window.is_some());
        let mut rejected: Vec<StrategyAttempt> = Vec::new();
        let mut last_body = String::new();

        for strategy in plan {
            let request = requests::search_request(strategy, query, &self.timezone);
            let response = self
                .call(
                    device,
                    Method::POST,
                    request.path,
                    Some(request.body),
                    Some(request.content_type),
                )
                .await?;

            let status = response.status.as_u16();
            if status == 401 {
                return Err(Self::auth_fault(device, response));
            }

            if requests::accepts(strategy, &response) {
                if !rejected.is_empty() {
                    tracing::info!(
                        device_id = %device.id,
                        strategy = ?strategy,
                        rejected = rejected.len(),
                        "Event search accepted after fallback"
                    );
                }
                return Ok(SearchOutcome {
                    strategy,
                    dialect: strategy.dialect(),
                    body: response.body,
                    rejected,
                });
            }

            tracing::debug!(
                device_id = %device.id,
                strategy = ?strategy,
                status = status,
                "Event search strategy rejected"
            );
            rejected.push(StrategyAttempt { strategy, status });
            last_body = response.body;
        }

        let status = rejected.last().map(|a| a.status).unwrap_or(0);
        tracing::warn!(
            device_id = %device.id,
            attempts = rejected.len(),
            status = status,
            "Event search rejected in every dialect"
        );
        Err(GatewayFault::ProtocolMismatch {
            status,
            body: last_body,
            attempts: rejected,
        })
    }

    /// Create or update a user record (JSON)
    pub async fn set_user(&self, device: &Device, user: &UserProvision) -> Result<(), GatewayFault> {
        let body = requests::user_body(user, &self.timezone);
        let response = self
            .call(
                device,
                Method::PUT,
                paths::USER_SETUP,
                Some(body.to_string()),
                Some(requests::CONTENT_JSON),
            )
            .await?;
        Self::require_success(device, response)?;

        tracing::info!(device_id = %device.id, user_id = %user.id, "User provisioned");
        Ok(())
    }

    /// Open or close door 1 (XML)
    pub async fn control_relay(&self, device: &Device, open: bool) -> Result<(), GatewayFault> {
        let response = self
            .call(
                device,
                Method::PUT,
                paths::REMOTE_CONTROL_DOOR,
                Some(requests::relay_body(open)),
                Some(requests::CONTENT_XML),
            )
            .await?;
        Self::require_success(device, response)?;

        tracing::info!(device_id = %device.id, open = open, "Relay command executed");
        Ok(())
    }

    /// Point the device's HTTP event push at `url` (XML)
    pub async fn configure_webhook_target(
        &self,
        device: &Device,
        url: &str,
    ) -> Result<(), GatewayFault> {
        let body = requests::http_host_body(url).map_err(|message| GatewayFault::Rejected {
            status: 0,
            body: message,
        })?;
        let response = self
            .call(
                device,
                Method::PUT,
                paths::HTTP_HOSTS,
                Some(body),
                Some(requests::CONTENT_XML),
            )
            .await?;
        Self::require_success(device, response)?;

        tracing::info!(device_id = %device.id, url = %url, "Webhook target configured");
        Ok(())
    }

    async fn call(
        &self,
        device: &Device,
        method: Method,
        path: &str,
        body: Option<String>,
        content_type: Option<&str>,
    ) -> Result<DigestResponse, GatewayFault> {
        let request = DigestRequest {
            method,
            path,
            body,
            content_type,
        };

        self.client
            .send(&device.address, &device.credentials, &request)
            .await
            .map_err(|e| {
                tracing::warn!(
                    device_id = %device.id,
                    address = %device.address,
                    path = %path,
                    error = %e,
                    "Device unreachable"
                );
                match e {
                    DigestError::Connection(message) | DigestError::InvalidRequest(message) => {
                        GatewayFault::Network { message }
                    }
                    DigestError::Timeout(d) => GatewayFault::Network {
                        message: format!("timed out after {}ms", d.as_millis()),
                    },
                }
            })
    }

    fn require_success(
        device: &Device,
        response: DigestResponse,
    ) -> Result<DigestResponse, GatewayFault> {
        if response.status.as_u16() == 401 {
            return Err(Self::auth_fault(device, response));
        }
        if !response.is_success() || is_parameter_fault(&response.body) {
            tracing::warn!(
                device_id = %device.id,
                status = %response.status,
                "Device rejected request"
            );
            return Err(GatewayFault::Rejected {
                status: response.status.as_u16(),
                body: response.body,
            });
        }
        Ok(response)
    }

    fn auth_fault(device: &Device, response: DigestResponse) -> GatewayFault {
        tracing::error!(
            device_id = %device.id,
            address = %device.address,
            answered_challenge = response.authenticated,
            "Device rejected credentials"
        );
        GatewayFault::Authentication {
            status: response.status.as_u16(),
            body: response.body,
        }
    }
}
