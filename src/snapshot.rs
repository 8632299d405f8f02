use serde::Serialize;
use serde_json::Value;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Document {
    Status,
    Miner,
    Speed,
    Dig,
}

impl Document {
    pub const ALL: [Document; 4] = [
        Document::Status,
        Document::Miner,
        Document::Speed,
        Document::Dig,
    ];

    pub fn path(self) -> &'static str {
        match self {
            Document::Status => "/status.json",
            Document::Miner => "/miner.json",
            Document::Speed => "/speed.json",
            Document::Dig => "/dig.json",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Document::Status => "status",
            Document::Miner => "miner",
            Document::Speed => "speed",
            Document::Dig => "dig",
        }
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.json", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContractError {
    #[error("{document}: body is not valid JSON: {message}")]
    InvalidJson { document: Document, message: String },
    #[error("{document}: missing field {field}")]
    MissingField { document: Document, field: String },
    #[error("{document}: field {field} must be {expected}")]
    WrongType {
        document: Document,
        field: String,
        expected: &'static str,
    },
    #[error("{document}: field {field} has malformed value '{value}'")]
    Malformed {
        document: Document,
        field: String,
        value: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    pub status: String,
    pub gap: i64,
    pub miner_height: i64,
    pub blockchain_height: i64,
    pub epoch: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MinerSnapshot {
    pub state: String,
    pub container_status: String,
    pub temp0: i64,
    pub temp1: i64,
    pub errors: String,
    pub p2p_status: Vec<String>,
    pub height: Vec<String>,
    pub peerbook: Vec<String>,
    pub public_ip: String,
    pub private_ip: String,
    pub epoch: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpeedSnapshot {
    pub download_speed: i64,
    pub upload_speed: i64,
    pub latency: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DigSnapshot {
    pub raw: Value,
}

#[derive(Debug, Clone)]
pub struct Snapshots {
    pub status: StatusSnapshot,
    pub miner: MinerSnapshot,
    pub speed: SpeedSnapshot,
    pub dig: Option<DigSnapshot>,
}

pub const CELSIUS: &str = "°C";
pub const MBITS: &str = "Mbit/s";
pub const MILLIS: &str = "ms";

pub fn parse_document(document: Document, body: &str) -> Result<Value, ContractError> {
    serde_json::from_str(body).map_err(|err| ContractError::InvalidJson {
        document,
        message: err.to_string(),
    })
}

impl StatusSnapshot {
    pub fn from_json(body: &str) -> Result<Self, ContractError> {
        Self::from_value(&parse_document(Document::Status, body)?)
    }

    pub fn from_value(root: &Value) -> Result<Self, ContractError> {
        let fields = Fields::new(Document::Status, root)?;
        Ok(Self {
            status: fields.text("status")?.to_string(),
            gap: fields.integer("gap")?,
            miner_height: fields.integer("miner_height")?,
            blockchain_height: fields.integer("blockchain_height")?,
            epoch: fields.display("epoch")?,
        })
    }
}

impl MinerSnapshot {
    pub fn from_json(body: &str) -> Result<Self, ContractError> {
        Self::from_value(&parse_document(Document::Miner, body)?)
    }

    pub fn from_value(root: &Value) -> Result<Self, ContractError> {
        let fields = Fields::new(Document::Miner, root)?;
        Ok(Self {
            state: fields.text("miner.State")?.to_string(),
            container_status: fields.text("miner.Status")?.to_string(),
            temp0: fields.measurement("temp0", CELSIUS)?,
            temp1: fields.measurement("temp1", CELSIUS)?,
            errors: fields.text("errors")?.to_string(),
            p2p_status: fields.lines("p2p_status")?,
            height: fields.lines("height")?,
            peerbook: fields.lines("peerbook")?,
            public_ip: fields.text("public_ip")?.to_string(),
            private_ip: fields.text("private_ip")?.to_string(),
            epoch: fields.display("epoch")?,
        })
    }
}

impl SpeedSnapshot {
    pub fn from_json(body: &str) -> Result<Self, ContractError> {
        Self::from_value(&parse_document(Document::Speed, body)?)
    }

    pub fn from_value(root: &Value) -> Result<Self, ContractError> {
        let fields = Fields::new(Document::Speed, root)?;
        Ok(Self {
            download_speed: fields.measurement("DownloadSpeed", MBITS)?,
            upload_speed: fields.measurement("UploadSpeed", MBITS)?,
            latency: fields.measurement("Latency", MILLIS)?,
        })
    }
}

impl DigSnapshot {
    pub fn from_json(body: &str) -> Result<Self, ContractError> {
        Ok(Self {
            raw: parse_document(Document::Dig, body)?,
        })
    }
}

pub fn parse_number(text: &str) -> Option<i64> {
    let text = text.trim();
    if !text.contains('.') {
        return text.parse().ok();
    }
    let unsigned = text.strip_prefix('-').unwrap_or(text);
    if unsigned.is_empty() || !unsigned.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return None;
    }
    let value: f64 = text.parse().ok()?;
    let truncated = value.trunc();
    if !truncated.is_finite() || truncated.abs() >= i64::MAX as f64 {
        return None;
    }
    Some(truncated as i64)
}

// "38 °C" gives 38 and "7.669083ms" gives 7
pub fn parse_measurement(raw: &str, unit: &str) -> Option<i64> {
    let number = raw.trim().strip_suffix(unit)?;
    parse_number(number)
}

struct Fields<'a> {
    document: Document,
    root: &'a Value,
}

impl<'a> Fields<'a> {
    fn new(document: Document, root: &'a Value) -> Result<Self, ContractError> {
        if !root.is_object() {
            return Err(ContractError::WrongType {
                document,
                field: "<root>".to_string(),
                expected: "an object",
            });
        }
        Ok(Self { document, root })
    }

    fn get(&self, path: &str) -> Result<&'a Value, ContractError> {
        let mut current = self.root;
        for key in path.split('.') {
            current = current
                .get(key)
                .filter(|v| !v.is_null())
                .ok_or_else(|| ContractError::MissingField {
                    document: self.document,
                    field: path.to_string(),
                })?;
        }
        Ok(current)
    }

    fn wrong_type(&self, path: &str, expected: &'static str) -> ContractError {
        ContractError::WrongType {
            document: self.document,
            field: path.to_string(),
            expected,
        }
    }

    fn malformed(&self, path: &str, value: &str) -> ContractError {
        ContractError::Malformed {
            document: self.document,
            field: path.to_string(),
            value: value.to_string(),
        }
    }

    fn text(&self, path: &str) -> Result<&'a str, ContractError> {
        self.get(path)?
            .as_str()
            .ok_or_else(|| self.wrong_type(path, "a string"))
    }

    // epoch arrives as a string on most firmware and as a number on some
    fn display(&self, path: &str) -> Result<String, ContractError> {
        match self.get(path)? {
            Value::String(s) => Ok(s.clone()),
            Value::Number(n) => Ok(n.to_string()),
            _ => Err(self.wrong_type(path, "a string or a number")),
        }
    }

    fn integer(&self, path: &str) -> Result<i64, ContractError> {
        match self.get(path)? {
            Value::String(s) => parse_number(s).ok_or_else(|| self.malformed(path, s)),
            Value::Number(n) => n
                .as_i64()
                .ok_or_else(|| self.malformed(path, &n.to_string())),
            _ => Err(self.wrong_type(path, "an integer or a numeric string")),
        }
    }

    fn measurement(&self, path: &str, unit: &str) -> Result<i64, ContractError> {
        let raw = self.text(path)?;
        parse_measurement(raw, unit).ok_or_else(|| self.malformed(path, raw))
    }

    fn lines(&self, path: &str) -> Result<Vec<String>, ContractError> {
        match self.get(path)? {
            Value::Array(items) => items
                .iter()
                .map(|item| {
                    item.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| self.wrong_type(path, "an array of strings"))
                })
                .collect(),
            Value::String(blob) => Ok(blob.lines().map(str::to_string).collect()),
            _ => Err(self.wrong_type(path, "an array of strings")),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn parses_sample_documents() {
        let status = StatusSnapshot::from_json(STATUS).unwrap();
        assert_eq!(status.status, "Synced");
        assert_eq!(status.gap, 0);
        assert_eq!(status.blockchain_height, 1148539);

        let miner = MinerSnapshot::from_json(MINER).unwrap();
        assert_eq!(miner.state, "running");
        assert_eq!(miner.container_status, "Up 36 hours");
        assert_eq!((miner.temp0, miner.temp1), (38, 37));
        assert_eq!(miner.public_ip, "33.117.96.28");
        assert_eq!(miner.height, vec!["30157    1148539".to_string(), String::new()]);

        let speed = SpeedSnapshot::from_json(SPEED).unwrap();
        assert_eq!(speed.download_speed, 94);
        assert_eq!(speed.upload_speed, 57);
        assert_eq!(speed.latency, 7);

        assert!(DigSnapshot::from_json(DIG).unwrap().raw.is_object());
    }

    #[test]
    fn unit_suffixes_are_stripped() {
        assert_eq!(parse_measurement("38 °C", CELSIUS), Some(38));
        assert_eq!(parse_measurement("94 Mbit/s", MBITS), Some(94));
        assert_eq!(parse_measurement("7.669083ms", MILLIS), Some(7));
        assert_eq!(parse_measurement("50ms", MILLIS), Some(50));
        assert_eq!(parse_measurement("51ms", MILLIS), Some(51));
        assert_eq!(parse_measurement("50.9ms", MILLIS), Some(50));
        assert_eq!(parse_measurement("-3 °C", CELSIUS), Some(-3));
    }

    #[test]
    fn unexpected_units_are_rejected() {
        assert_eq!(parse_measurement("38 °F", CELSIUS), None);
        assert_eq!(parse_measurement("38", CELSIUS), None);
        assert_eq!(parse_measurement("94 kbit/s", MBITS), None);
        assert_eq!(parse_measurement("fast ms", MILLIS), None);
        assert_eq!(parse_measurement("ms", MILLIS), None);
        assert_eq!(parse_measurement("1.2.3ms", MILLIS), None);
        assert_eq!(parse_measurement("infms", MILLIS), None);
    }

    #[test]
    fn unknown_gap_is_a_contract_error() {
        let body = STATUS.replace(r#""gap": "0""#, r#""gap": "unknown""#);
        let err = StatusSnapshot::from_json(&body).unwrap_err();
        assert_eq!(
            err,
            ContractError::Malformed {
                document: Document::Status,
                field: "gap".to_string(),
                value: "unknown".to_string(),
            }
        );
    }

    #[test]
    fn numeric_gap_is_accepted() {
        let body = STATUS.replace(r#""gap": "0""#, r#""gap": 512"#);
        assert_eq!(StatusSnapshot::from_json(&body).unwrap().gap, 512);
    }

    #[test]
    fn missing_nested_field_names_the_path() {
        let body = MINER.replace(r#""State": "running","#, "");
        let err = MinerSnapshot::from_json(&body).unwrap_err();
        assert_eq!(
            err.to_string(),
            "miner.json: missing field miner.State".to_string()
        );
    }

    #[test]
    fn malformed_temperature_is_not_defaulted() {
        let body = MINER.replace("38 °C", "N/A");
        assert!(matches!(
            MinerSnapshot::from_json(&body),
            Err(ContractError::Malformed { field, .. }) if field == "temp0"
        ));
    }

    #[test]
    fn non_json_body_is_rejected() {
        assert!(matches!(
            SpeedSnapshot::from_json("<html>busy</html>"),
            Err(ContractError::InvalidJson {
                document: Document::Speed,
                ..
            })
        ));
        assert!(matches!(
            StatusSnapshot::from_json("[]"),
            Err(ContractError::WrongType { .. })
        ));
    }

    #[test]
    fn table_may_arrive_as_one_blob() {
        let body = MINER.replace(
            r#""height": ["30157    1148539", ""]"#,
            r#""height": "30157    1148539\nerror: timeout""#,
        );
        let miner = MinerSnapshot::from_json(&body).unwrap();
        assert_eq!(miner.height.len(), 2);
        assert_eq!(miner.height[1], "error: timeout");
    }
}
