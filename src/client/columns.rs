use serde::{Deserialize, Serialize};
use std::fmt;

/// Column data type as reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Int8,
    Int16,
    Int32,
    Int64,
    Uint16,
    Uint32,
    Uint64,
    Float,
    Double,
    #[default]
    Varchar,
    String,
    Text,
    Json,
    Datetime,
    Ipv4,
    Ipv6,
    Binary,
    Bool,
}

impl DataType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            DataType::Int8 => "int8",
            DataType::Int16 => "int16",
            DataType::Int32 => "int32",
            DataType::Int64 => "int64",
            DataType::Uint16 => "uint16",
            DataType::Uint32 => "uint32",
            DataType::Uint64 => "uint64",
            DataType::Float => "float",
            DataType::Double => "double",
            DataType::Varchar => "varchar",
            DataType::String => "string",
            DataType::Text => "text",
            DataType::Json => "json",
            DataType::Datetime => "datetime",
            DataType::Ipv4 => "ipv4",
            DataType::Ipv6 => "ipv6",
            DataType::Binary => "binary",
            DataType::Bool => "bool",
        }
    }

    /// Case-insensitive; `None` for unknown names.
    #[must_use]
    pub fn parse(name: &str) -> Option<DataType> {
        Some(match name.to_ascii_lowercase().as_str() {
            "int8" | "byte" => DataType::Int8,
            "int16" | "short" => DataType::Int16,
            "int32" | "integer" => DataType::Int32,
            "int64" | "long" => DataType::Int64,
            "uint16" | "ushort" => DataType::Uint16,
            "uint32" | "uinteger" => DataType::Uint32,
            "uint64" | "ulong" => DataType::Uint64,
            "float" => DataType::Float,
            "double" => DataType::Double,
            "varchar" => DataType::Varchar,
            "string" => DataType::String,
            "text" => DataType::Text,
            "json" => DataType::Json,
            "datetime" => DataType::Datetime,
            "ipv4" => DataType::Ipv4,
            "ipv6" => DataType::Ipv6,
            "binary" => DataType::Binary,
            "bool" | "boolean" => DataType::Bool,
            _ => return None,
        })
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: DataType,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub length: usize,
}

fn is_zero(v: &usize) -> bool {
    *v == 0
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            length: 0,
        }
    }
}

/// Ordered column schema of a result set or pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Columns(pub Vec<Column>);

impl Columns {
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.0.iter().map(|c| c.name.clone()).collect()
    }

    #[must_use]
    pub fn types(&self) -> Vec<DataType> {
        self.0.iter().map(|c| c.data_type).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Column> {
        self.0.iter()
    }
}

impl From<Vec<Column>> for Columns {
    fn from(cols: Vec<Column>) -> Self {
        Columns(cols)
    }
}

/// Kind of table an appender writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TableType {
    #[default]
    Log,
    Fixed,
    Volatile,
    Lookup,
    KeyValue,
    Tag,
}
