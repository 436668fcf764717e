use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;
use thiserror::Error;

/// OBIS register code in the `A-B:C.D.E*F` notation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObisCode {
    pub medium: u8,      // 0: abstract, 1: electricity, etc.
    pub channel: u8,     // 0-255
    pub indicator: u8,   // Physical value indicator
    pub mode: u8,        // Processing method
    pub tariff: u8,      // Tariff/time
    pub previous: u8,    // Historical value indicator
}

impl ObisCode {
    /// SML transports the code as six raw bytes
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() == 6 {
            Some(ObisCode {
                medium: bytes[0],
                channel: bytes[1],
                indicator: bytes[2],
                mode: bytes[3],
                tariff: bytes[4],
                previous: bytes[5],
            })
        } else {
            None
        }
    }

    /// The `A-B:C.D.E` part used for descriptions, without the storage field
    pub fn short(&self) -> String {
        format!("{}-{}:{}.{}.{}", self.medium, self.channel, self.indicator, self.mode, self.tariff)
    }
}

impl fmt::Display for ObisCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}:{}.{}.{}*{}",
            self.medium, self.channel,
            self.indicator, self.mode,
            self.tariff, self.previous)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("invalid OBIS code '{0}'")]
pub struct InvalidObisCode(pub String);

impl FromStr for ObisCode {
    type Err = InvalidObisCode;

    /// Accepts `A-B:C.D.E*F`, `A-B:C.D.E` (storage defaults to 255) and the
    /// twelve hex digit form `0100010800ff`
    fn from_str(code: &str) -> Result<Self, Self::Err> {
        let code = normalize_obis_code(code);
        let invalid = || InvalidObisCode(code.to_string());

        if code.len() == 12 && code.chars().all(|c| c.is_ascii_hexdigit()) {
            let bytes = hex::decode(&code).map_err(|_| invalid())?;
            return ObisCode::from_bytes(&bytes).ok_or_else(invalid);
        }

        let (ab, rest) = code.split_once(':').ok_or_else(invalid)?;
        let (medium, channel) = ab.split_once('-').ok_or_else(invalid)?;
        let (cde, previous) = match rest.split_once('*') {
            Some((cde, f)) => (cde, f),
            None => (rest, "255"),
        };

        let cde_parts: Vec<&str> = cde.split('.').collect();
        if cde_parts.len() != 3 {
            return Err(invalid());
        }

        let num = |part: &str| part.parse::<u8>().map_err(|_| invalid());
        Ok(ObisCode {
            medium: num(medium)?,
            channel: num(channel)?,
            indicator: num(cde_parts[0])?,
            mode: num(cde_parts[1])?,
            tariff: num(cde_parts[2])?,
            previous: num(previous)?,
        })
    }
}

/// Register id as published for a raw SML object name: the OBIS notation
/// for six byte names, hex for anything else
pub fn format_obis_code(obis_bytes: &[u8]) -> String {
    match ObisCode::from_bytes(obis_bytes) {
        Some(obis) => obis.to_string(),
        None => hex::encode(obis_bytes),
    }
}

/// Bring a configured register key into the form used by decoded readings.
/// Keys that are not OBIS codes are returned unchanged.
pub fn canonical_register_id(key: &str) -> String {
    match key.parse::<ObisCode>() {
        Ok(obis) => obis.to_string(),
        Err(_) => normalize_obis_code(key).to_string(),
    }
}

pub fn get_obis_description(obis: &ObisCode) -> Option<&'static str> {
    get_standard_obis_descriptions().get(obis.short().as_str()).copied()
}

/// Description table, built on first use
pub fn get_standard_obis_descriptions() -> &'static HashMap<&'static str, &'static str> {
    static DESCRIPTIONS: OnceLock<HashMap<&'static str, &'static str>> = OnceLock::new();
    DESCRIPTIONS.get_or_init(build_obis_descriptions)
}

fn build_obis_descriptions() -> HashMap<&'static str, &'static str> {
    let mut map = HashMap::new();

    // Energy values
    map.insert("1-0:1.8.0", "Active energy + (total)");
    map.insert("1-0:1.8.1", "Active energy + (tariff 1)");
    map.insert("1-0:1.8.2", "Active energy + (tariff 2)");
    map.insert("1-0:2.8.0", "Active energy - (total)");
    map.insert("1-0:2.8.1", "Active energy - (tariff 1)");
    map.insert("1-0:2.8.2", "Active energy - (tariff 2)");
    map.insert("1-0:15.8.0", "Absolute active energy total");

    // Power values
    map.insert("1-0:1.7.0", "Active power + (total)");
    map.insert("1-0:2.7.0", "Active power - (total)");
    map.insert("1-0:15.7.0", "Absolute active instantaneous power");
    map.insert("1-0:16.7.0", "Sum active instantaneous power");
    map.insert("1-0:21.7.0", "Active power + (L1)");
    map.insert("1-0:41.7.0", "Active power + (L2)");
    map.insert("1-0:61.7.0", "Active power + (L3)");
    map.insert("1-0:36.7.0", "Sum reactive instantaneous power");

    // Voltage values
    map.insert("1-0:32.7.0", "Voltage (L1)");
    map.insert("1-0:52.7.0", "Voltage (L2)");
    map.insert("1-0:72.7.0", "Voltage (L3)");

    // Current values
    map.insert("1-0:31.7.0", "Current (L1)");
    map.insert("1-0:51.7.0", "Current (L2)");
    map.insert("1-0:71.7.0", "Current (L3)");

    // Phase angles
    map.insert("1-0:81.7.1", "Phase angle U-L2 to U-L1");
    map.insert("1-0:81.7.2", "Phase angle U-L3 to U-L1");
    map.insert("1-0:81.7.4", "Phase angle I-L1 to U-L1");
    map.insert("1-0:81.7.15", "Phase angle I-L2 to U-L2");
    map.insert("1-0:81.7.26", "Phase angle I-L3 to U-L3");

    // Frequency and power factor
    map.insert("1-0:14.7.0", "Supply frequency");
    map.insert("1-0:13.7.0", "Power factor");

    // Identification
    map.insert("1-0:0.0.0", "Equipment identifier");
    map.insert("1-0:0.0.9", "Server ID");
    map.insert("1-0:96.1.0", "Meter serial number");
    map.insert("1-0:96.50.1", "Manufacturer identification");
    map.insert("1-0:96.5.0", "Operating status");
    map.insert("129-129:199.130.3", "Manufacturer");
    map.insert("129-129:199.130.5", "Public key");

    map
}

pub fn normalize_obis_code(code: &str) -> &str {
    code.trim()
}
