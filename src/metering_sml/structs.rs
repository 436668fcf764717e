// SML Protocol Data Structures

/// One decoded SML element
#[derive(Debug, Clone, PartialEq)]
pub enum SmlValue {
    /// Optional element that was not transmitted (`0x01`)
    Absent,
    /// `0x00` closing a message
    EndOfMessage,
    Bool(bool),
    Int(i64),
    UInt(u64),
    OctetString(Vec<u8>),
    List(Vec<SmlValue>),
}

impl SmlValue {
    pub fn as_octets(&self) -> Option<&[u8]> {
        match self {
            SmlValue::OctetString(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            SmlValue::UInt(u) => Some(*u),
            SmlValue::Int(i) if *i >= 0 => Some(*i as u64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SmlValue::Int(i) => Some(*i),
            SmlValue::UInt(u) => i64::try_from(*u).ok(),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[SmlValue]> {
        match self {
            SmlValue::List(values) => Some(values),
            _ => None,
        }
    }

    /// Numeric reading of a register value; strings carry none
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SmlValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            SmlValue::Int(i) => Some(*i as f64),
            SmlValue::UInt(u) => Some(*u as f64),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SmlFile {
    pub messages: Vec<SmlMessage>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SmlMessage {
    pub transaction_id: Vec<u8>,
    pub group_no: u8,
    pub abort_on_error: u8,
    pub message_body: SmlMessageBody,
    pub crc: Option<u16>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SmlMessageBody {
    OpenResponse(SmlOpenResponse),
    GetListResponse(SmlGetListResponse),
    CloseResponse,
    /// Any other message type, kept by tag only
    Other(u32),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SmlOpenResponse {
    pub client_id: Option<Vec<u8>>,
    pub req_file_id: Vec<u8>,
    pub server_id: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SmlGetListResponse {
    pub client_id: Option<Vec<u8>>,
    pub server_id: Vec<u8>,
    pub list_name: Option<Vec<u8>>,
    pub act_sensor_time: Option<u32>,
    pub val_list: Vec<SmlListEntry>,
    pub list_signature: Option<Vec<u8>>,
    pub act_gateway_time: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SmlListEntry {
    pub obis_code: Vec<u8>,
    pub status: Option<u64>,
    pub val_time: Option<u32>,
    pub unit: Option<u8>,
    pub scaler: Option<i8>,
    pub value: Option<SmlValue>,
    pub value_signature: Option<Vec<u8>>,
}

// Unit mappings for SML values (DLMS unit codes)
pub fn get_sml_unit_name(unit_code: u8) -> Option<&'static str> {
    match unit_code {
        1 => Some("a"),      // year
        2 => Some("mo"),     // month
        3 => Some("wk"),     // week
        4 => Some("d"),      // day
        5 => Some("h"),      // hour
        6 => Some("min"),    // minute
        7 => Some("s"),      // second
        8 => Some("°"),      // degree
        9 => Some("°C"),     // degree celsius
        10 => Some("currency"),
        11 => Some("m"),     // meter
        12 => Some("m/s"),   // meter per second
        13 => Some("m³"),    // cubic meter
        14 => Some("m³"),    // corrected cubic meter
        15 => Some("m³/h"),  // volume flux
        16 => Some("m³/h"),  // corrected volume flux
        17 => Some("m³/d"),  // volume flux per day
        18 => Some("m³/d"),  // corrected volume flux per day
        19 => Some("l"),     // liter
        20 => Some("kg"),    // kilogram
        21 => Some("N"),     // newton
        22 => Some("Nm"),    // newton meter
        23 => Some("Pa"),    // pascal
        24 => Some("bar"),   // bar
        25 => Some("J"),     // joule
        26 => Some("J/h"),   // thermal power
        27 => Some("W"),     // watt
        28 => Some("VA"),    // volt ampere
        29 => Some("var"),   // volt ampere reactive
        30 => Some("Wh"),    // watt hour
        31 => Some("VAh"),   // volt ampere hour
        32 => Some("varh"),  // reactive energy
        33 => Some("A"),     // ampere
        34 => Some("C"),     // coulomb
        35 => Some("V"),     // volt
        36 => Some("V/m"),   // electric field strength
        37 => Some("F"),     // farad
        38 => Some("Ω"),     // ohm
        39 => Some("Ωm²/m"), // resistivity
        40 => Some("Wb"),    // weber
        41 => Some("T"),     // tesla
        42 => Some("A/m"),   // magnetic field strength
        43 => Some("H"),     // henry
        44 => Some("Hz"),    // hertz
        45 => Some("1/(Wh)"),
        46 => Some("1/(varh)"),
        47 => Some("1/(VAh)"),
        48 => Some("V²h"),
        49 => Some("A²h"),
        50 => Some("kg/s"),
        51 => Some("S"),     // siemens
        52 => Some("K"),     // kelvin
        53 => Some("1/(V²h)"),
        54 => Some("1/(A²h)"),
        55 => Some("1/m³"),
        56 => Some("%"),
        57 => Some("Ah"),    // ampere hour
        255 => Some(""),     // count, no unit
        _ => None,
    }
}
