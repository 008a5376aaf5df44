use serde::{
    de::{Error, Unexpected},
    Deserialize, Deserializer, Serialize, Serializer,
};
use serde_json::Value;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Id {
    Number(u64),
    String(String),
    #[default]
    Null,
}

#[derive(Clone, Copy, Debug)]
pub struct TwoPointZero;

impl Serialize for TwoPointZero {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str("2.0")
    }
}

impl<'de> Deserialize<'de> for TwoPointZero {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        if s == "2.0" {
            Ok(TwoPointZero)
        } else {
            Err(D::Error::invalid_value(Unexpected::Str(&s), &"\"2.0\""))
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorObj {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: TwoPointZero,
    pub method: String,
    pub params: Value,
    pub id: Id,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: &str, params: Value) -> Self {
        Self {
            jsonrpc: TwoPointZero,
            method: method.to_string(),
            params,
            id: Id::Number(id),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct JsonRpcResponse {
    #[allow(dead_code)]
    pub jsonrpc: TwoPointZero,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<ErrorObj>,
    #[serde(default)]
    pub id: Id,
}

impl JsonRpcResponse {
    /// Turns the response into the `result` value or the error object it carries.
    pub fn into_result(self, method: &str) -> crate::Result<Value> {
        if let Some(error) = self.error {
            return Err(crate::Error::RpcError {
                method: method.to_string(),
                code: error.code,
                message: error.message,
            });
        }
        self.result
            .ok_or_else(|| crate::Error::RpcMissingResult(method.to_string()))
    }
}

/// Parses a `0x` prefixed hex quantity such as a block number.
pub fn parse_hex_quantity(s: &str) -> crate::Result<u64> {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .ok_or_else(|| crate::Error::InvalidHexQuantity(s.to_string()))?;
    u64::from_str_radix(digits, 16).map_err(|_| crate::Error::InvalidHexQuantity(s.to_string()))
}

pub fn to_hex_quantity(n: u64) -> String {
    format!("{n:#x}")
}
