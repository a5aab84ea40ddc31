//! Bus registry and dispatch
//!
//! A bus is named by a string of the form `name` or
//! `name:key1=value1,key2=value2`. This module parses the string, opens
//! the matching transport and hands it back boxed so the commands don't
//! care which bus they talk to.

use gcmemcard_core::transport::Transport;
use std::collections::HashMap;

/// Boxed transport returned by [`open_bus`]
pub type BoxedBus = Box<dyn Transport + Send>;

/// Information about a bus
pub struct BusInfo {
    /// Primary name (used for matching)
    pub name: &'static str,
    /// Alternative names/aliases
    pub aliases: &'static [&'static str],
    /// Short description
    pub description: &'static str,
}

/// Get information about all buses enabled at compile time
#[allow(unused_mut, clippy::vec_init_then_push)]
pub fn available_buses() -> Vec<BusInfo> {
    let mut buses = Vec::new();

    #[cfg(feature = "dummy")]
    buses.push(BusInfo {
        name: "dummy",
        aliases: &[],
        description: "Emulated card in memory (size=<megabits>,image=<path>,int=<0|1>)",
    });

    #[cfg(feature = "linux-spi")]
    buses.push(BusInfo {
        name: "linux_spi",
        aliases: &["linux-spi", "spidev"],
        description:
            "Linux spidev (dev=/dev/spidevX.Y,spispeed=<kHz>,mode=<0-3>,gpiochip=<N>,int=<line>)",
    });

    buses
}

/// Comma separated bus names for help text
pub fn bus_names_short() -> String {
    available_buses()
        .iter()
        .map(|b| b.name)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Parsed bus parameters
pub struct BusParams {
    /// Bus name as given
    pub name: String,
    /// Key-value parameters
    pub params: HashMap<String, String>,
}

impl BusParams {
    /// Parameters as borrowed pairs for the backend `parse_options` functions
    pub fn options(&self) -> Vec<(&str, &str)> {
        self.params
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect()
    }
}

/// Parse a bus string into name and parameters
///
/// Format: "name" or "name:key1=value1,key2=value2"
pub fn parse_bus_params(s: &str) -> Result<BusParams, Box<dyn std::error::Error>> {
    let (name, opts_str) = s.split_once(':').unwrap_or((s, ""));

    let mut params = HashMap::new();
    if !opts_str.is_empty() {
        for opt in opts_str.split(',') {
            if let Some((key, value)) = opt.split_once('=') {
                params.insert(key.to_string(), value.to_string());
            } else {
                return Err(
                    format!("Invalid parameter format: '{}' (expected key=value)", opt).into(),
                );
            }
        }
    }

    Ok(BusParams {
        name: name.to_string(),
        params,
    })
}

/// Open the bus named by `bus`
pub fn open_bus(bus: &str) -> Result<BoxedBus, Box<dyn std::error::Error>> {
    let params = parse_bus_params(bus)?;

    match params.name.as_str() {
        #[cfg(feature = "dummy")]
        "dummy" => open_dummy(&params),

        #[cfg(feature = "linux-spi")]
        "linux_spi" | "linux-spi" | "spidev" => open_linux_spi(&params),

        _ => Err(format!(
            "Unknown bus: {} (available: {})",
            params.name,
            bus_names_short()
        )
        .into()),
    }
}

#[cfg(feature = "dummy")]
fn open_dummy(params: &BusParams) -> Result<BoxedBus, Box<dyn std::error::Error>> {
    use gcmemcard_dummy::{DummyCard, DummyCardConfig};

    let mut config = DummyCardConfig::default();
    if let Some(size) = params.params.get("size") {
        let megabits: u16 = size
            .parse()
            .map_err(|_| format!("Invalid dummy size: {}", size))?;
        config = config.with_megabits(megabits);
    }
    if let Some(int) = params.params.get("int") {
        config = config.with_ready_line(int == "1" || int == "true");
    }

    let card = match params.params.get("image") {
        Some(path) => {
            let data = std::fs::read(path)
                .map_err(|e| format!("Failed to load dummy image {}: {}", path, e))?;
            log::info!("Opening dummy card from {} ({} bytes)", path, data.len());
            DummyCard::with_data(config, &data)
        }
        None => {
            log::info!("Opening erased dummy card");
            DummyCard::new(config)
        }
    };

    Ok(Box::new(card))
}

#[cfg(feature = "linux-spi")]
fn open_linux_spi(params: &BusParams) -> Result<BoxedBus, Box<dyn std::error::Error>> {
    log::info!("Opening Linux SPI bus...");

    gcmemcard_linux_spi::open_linux_spi(&params.options()).map_err(|e| {
        format!(
            "Failed to open Linux SPI: {}\nMake sure spidev is enabled and you have permissions.",
            e
        )
        .into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bus_params() {
        let params = parse_bus_params("linux_spi:dev=/dev/spidev0.0,int=25").unwrap();
        assert_eq!(params.name, "linux_spi");
        assert_eq!(params.params.get("dev").map(String::as_str), Some("/dev/spidev0.0"));
        assert_eq!(params.params.get("int").map(String::as_str), Some("25"));

        let params = parse_bus_params("dummy").unwrap();
        assert_eq!(params.name, "dummy");
        assert!(params.params.is_empty());
    }

    #[test]
    fn test_parse_bus_params_rejects_bare_key() {
        assert!(parse_bus_params("dummy:size").is_err());
    }

    #[test]
    fn test_unknown_bus() {
        assert!(open_bus("parport").is_err());
    }

    #[cfg(feature = "dummy")]
    #[test]
    fn test_open_dummy_with_size() {
        assert!(open_bus("dummy:size=16").is_ok());
        assert!(open_bus("dummy:size=big").is_err());
    }
}
