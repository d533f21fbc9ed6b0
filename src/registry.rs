//! Live clients for a set of configured receivers.
//!
//! A [`Registry`] owns one [`Client`] per device, keyed by device id. Adding a
//! device connects to it (and starts power monitoring if requested), removing
//! it stops monitoring and closes the connection.
//!
//! ```rust
//! # use nadproto::{registry::{DeviceConfig, Registry}, ClientOptions};
//! # fn wrapper() -> Result<(), nadproto::Error> {
//! let mut registry = Registry::new(ClientOptions::new());
//! registry.on_power(|device_id, on| println!("{device_id} is now {}", if on { "on" } else { "off" }));
//! registry.add(DeviceConfig::new("Living room", "192.168.1.50"))?;
//!
//! let client = registry.get("nad_192_168_1_50").unwrap();
//! client.set_volume(30)?;
//! # Ok(())
//! # }
//! ```

use crate::{
    backend::DEFAULT_PORT,
    client::{Client, ClientOptions},
    error::Error,
};
use std::{collections::BTreeMap, sync::Arc, time::Duration};

/// The id of the device at `host`: `nad_` followed by the host with every `.`
/// replaced by `_`.
///
/// ```
/// # use nadproto::registry::device_id_for;
/// assert_eq!(device_id_for("192.168.1.50"), "nad_192_168_1_50");
/// ```
pub fn device_id_for(host: &str) -> String {
    format!("nad_{}", host.replace('.', "_"))
}

/// The configuration of one receiver.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceConfig {
    /// The unique id of the device.
    pub device_id: String,
    /// A human readable name.
    pub name: String,
    /// The host name or IP address.
    pub address: String,
    /// The TCP port.
    pub port: u16,
    /// Whether the device is loaded by [`Registry::add_all`].
    pub enabled: bool,
    /// Whether power changes made at the device are monitored.
    pub monitor_power: bool,
}

impl DeviceConfig {
    /// Create an enabled, monitored configuration on the default port, with an
    /// id derived from the address.
    pub fn new<N: Into<String>, A: Into<String>>(name: N, address: A) -> Self {
        let address = address.into();
        DeviceConfig {
            device_id: device_id_for(&address),
            name: name.into(),
            address,
            port: DEFAULT_PORT,
            enabled: true,
            monitor_power: true,
        }
    }
}

/// How [`Registry::resume`] retries a connection.
///
/// The delay after the n-th failed attempt is n times the step, so the
/// default policy waits 2 and then 4 seconds between its 3 attempts.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct RetryPolicy {
    /// The total number of attempts.
    pub attempts: u32,
    /// The increase in delay after each failed attempt.
    pub step: Duration,
}

impl RetryPolicy {
    /// The delay after the given failed attempt, counted from 1.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.step * attempt
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            attempts: 3,
            step: Duration::from_secs(2),
        }
    }
}

type Factory = dyn Fn(&DeviceConfig, &ClientOptions) -> Result<Client, Error> + Send + Sync;
type PowerHandler = Arc<dyn Fn(&str, bool) + Send + Sync>;

struct Device {
    config: DeviceConfig,
    client: Client,
}

/// Live clients keyed by device id.
pub struct Registry {
    options: ClientOptions,
    retry: RetryPolicy,
    factory: Box<Factory>,
    on_power: Option<PowerHandler>,
    devices: BTreeMap<String, Device>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("devices", &self.devices.keys().collect::<Vec<_>>())
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

/// Build an unconnected TCP client for a device.
fn tcp_client(config: &DeviceConfig, options: &ClientOptions) -> Result<Client, Error> {
    options
        .clone()
        .port(config.port)
        .name(config.name.as_str())
        .build(&config.address)
}

impl Registry {
    /// Create an empty registry whose clients connect over TCP.
    ///
    /// `options` applies to every client, except for the port and name which
    /// come from each device's configuration.
    pub fn new(options: ClientOptions) -> Self {
        Registry::with_factory(options, tcp_client)
    }

    /// Create an empty registry that builds its (unconnected) clients with
    /// `factory`.
    pub fn with_factory<F>(options: ClientOptions, factory: F) -> Self
    where
        F: Fn(&DeviceConfig, &ClientOptions) -> Result<Client, Error> + Send + Sync + 'static,
    {
        Registry {
            options,
            retry: RetryPolicy::default(),
            factory: Box::new(factory),
            on_power: None,
            devices: BTreeMap::new(),
        }
    }

    /// Set the handler called with a device's id and power state whenever a
    /// monitored device reports a power change.
    ///
    /// Only devices added afterwards use the new handler.
    pub fn on_power<F>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(&str, bool) + Send + Sync + 'static,
    {
        self.on_power = Some(Arc::new(handler));
        self
    }

    /// Set how [`resume`](Self::resume) retries connections.
    pub fn set_retry_policy(&mut self, policy: RetryPolicy) -> RetryPolicy {
        std::mem::replace(&mut self.retry, policy)
    }

    fn start_monitoring(&self, device_id: &str, client: &Client) -> Result<(), Error> {
        let handler = self.on_power.clone();
        let device_id = device_id.to_string();
        client.start_power_monitoring(move |on| {
            if let Some(handler) = &handler {
                handler(&device_id, on);
            }
        })
    }

    /// Connect to a device and keep its client.
    ///
    /// Adding a device id that is already present does nothing. If the device
    /// cannot be reached, the error is returned and nothing is kept.
    pub fn add(&mut self, config: DeviceConfig) -> Result<(), Error> {
        if self.devices.contains_key(&config.device_id) {
            log::info!("{} is already registered", config.device_id);
            return Ok(());
        }
        log::info!(
            "adding {} ({}) at {}:{}",
            config.device_id,
            config.name,
            config.address,
            config.port
        );
        let client = (self.factory)(&config, &self.options)?;
        if let Err(e) = client.connect() {
            log::error!("could not connect to {}: {}", config.device_id, e);
            return Err(e);
        }
        if config.monitor_power {
            self.start_monitoring(&config.device_id, &client)?;
        }
        self.devices
            .insert(config.device_id.clone(), Device { config, client });
        Ok(())
    }

    /// Add every enabled device, returning the ids of those that failed.
    pub fn add_all<I>(&mut self, configs: I) -> Vec<(String, Error)>
    where
        I: IntoIterator<Item = DeviceConfig>,
    {
        let mut failed = Vec::new();
        for config in configs.into_iter().filter(|config| config.enabled) {
            let device_id = config.device_id.clone();
            if let Err(e) = self.add(config) {
                failed.push((device_id, e));
            }
        }
        failed
    }

    /// Stop monitoring, disconnect and forget a device.
    ///
    /// Returns `false` if the id is unknown.
    pub fn remove(&mut self, device_id: &str) -> bool {
        let Some(device) = self.devices.remove(device_id) else {
            log::warn!("cannot remove unknown device {device_id}");
            return false;
        };
        device.client.stop_power_monitoring();
        device.client.close();
        log::info!("removed {device_id}");
        true
    }

    /// The client of a device.
    pub fn get(&self, device_id: &str) -> Option<&Client> {
        self.devices.get(device_id).map(|device| &device.client)
    }

    /// The configuration of a device.
    pub fn config(&self, device_id: &str) -> Option<&DeviceConfig> {
        self.devices.get(device_id).map(|device| &device.config)
    }

    /// The ids of every device, in order.
    pub fn ids(&self) -> impl Iterator<Item = &str> + '_ {
        self.devices.keys().map(String::as_str)
    }

    /// The number of devices.
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Whether there are no devices.
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Recreate the connections of every monitored device, after the host
    /// resumed from a suspend for example.
    ///
    /// Each connection is retried according to the
    /// [`RetryPolicy`]. Monitoring restarts either way, so devices that could not
    /// be reached are retried by the monitor. Returns the ids of the devices
    /// that could not be reconnected.
    pub fn resume(&mut self) -> Vec<String> {
        let mut failed = Vec::new();
        for (device_id, device) in &self.devices {
            if !device.config.monitor_power {
                continue;
            }
            log::info!("reconnecting {device_id}");
            let client = &device.client;
            client.stop_power_monitoring();
            client.close();
            if !self.reconnect(device_id, client) {
                log::error!(
                    "failed to reconnect {} after {} attempts",
                    device_id,
                    self.retry.attempts
                );
                failed.push(device_id.clone());
            }
            if let Err(e) = self.start_monitoring(device_id, client) {
                log::warn!("could not restart power monitoring of {device_id}: {e}");
            }
        }
        failed
    }

    fn reconnect(&self, device_id: &str, client: &Client) -> bool {
        for attempt in 1..=self.retry.attempts {
            match client.connect() {
                Ok(()) => {
                    log::info!("{device_id} reconnected");
                    return true;
                }
                Err(e) => log::warn!(
                    "attempt {}/{} to reconnect {} failed: {}",
                    attempt,
                    self.retry.attempts,
                    device_id,
                    e
                ),
            }
            if attempt < self.retry.attempts {
                std::thread::sleep(self.retry.delay(attempt));
            }
        }
        false
    }
}
