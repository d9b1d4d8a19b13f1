//! Sparkplug B payload messages.
//!
//! Only the parts of `sparkplug_b.proto` the directory reads or writes are declared here.
//! Fields that are not declared (datasets, property sets, metadata) are skipped when decoding.

pub use prost::Message;

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Payload {
    #[prost(uint64, optional, tag = "1")]
    pub timestamp: Option<u64>,
    #[prost(message, repeated, tag = "2")]
    pub metrics: Vec<Metric>,
    #[prost(uint64, optional, tag = "3")]
    pub seq: Option<u64>,
    #[prost(string, optional, tag = "4")]
    pub uuid: Option<String>,
    #[prost(bytes = "vec", optional, tag = "5")]
    pub body: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Template {
    #[prost(string, optional, tag = "1")]
    pub version: Option<String>,
    #[prost(message, repeated, tag = "2")]
    pub metrics: Vec<Metric>,
    #[prost(string, optional, tag = "4")]
    pub template_ref: Option<String>,
    #[prost(bool, optional, tag = "5")]
    pub is_definition: Option<bool>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Metric {
    #[prost(string, optional, tag = "1")]
    pub name: Option<String>,
    #[prost(uint64, optional, tag = "2")]
    pub alias: Option<u64>,
    #[prost(uint64, optional, tag = "3")]
    pub timestamp: Option<u64>,
    #[prost(uint32, optional, tag = "4")]
    pub datatype: Option<u32>,
    #[prost(bool, optional, tag = "5")]
    pub is_historical: Option<bool>,
    #[prost(bool, optional, tag = "6")]
    pub is_transient: Option<bool>,
    #[prost(bool, optional, tag = "7")]
    pub is_null: Option<bool>,
    #[prost(oneof = "metric::Value", tags = "10, 11, 12, 13, 14, 15, 16, 18")]
    pub value: Option<metric::Value>,
}

pub mod metric {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Value {
        #[prost(uint32, tag = "10")]
        IntValue(u32),
        #[prost(uint64, tag = "11")]
        LongValue(u64),
        #[prost(float, tag = "12")]
        FloatValue(f32),
        #[prost(double, tag = "13")]
        DoubleValue(f64),
        #[prost(bool, tag = "14")]
        BooleanValue(bool),
        #[prost(string, tag = "15")]
        StringValue(String),
        #[prost(bytes, tag = "16")]
        BytesValue(Vec<u8>),
        #[prost(message, tag = "18")]
        TemplateValue(super::Template),
    }
}

/// Sparkplug B metric datatypes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum DataType {
    Unknown = 0,
    Int8 = 1,
    Int16 = 2,
    Int32 = 3,
    Int64 = 4,
    UInt8 = 5,
    UInt16 = 6,
    UInt32 = 7,
    UInt64 = 8,
    Float = 9,
    Double = 10,
    Boolean = 11,
    String = 12,
    DateTime = 13,
    Text = 14,
    Uuid = 15,
    DataSet = 16,
    Bytes = 17,
    File = 18,
    Template = 19,
}

impl Metric {
    pub fn new() -> Self {
        Self {
            name: None,
            alias: None,
            timestamp: None,
            datatype: None,
            is_historical: None,
            is_transient: None,
            is_null: Some(true),
            value: None,
        }
    }

    pub fn set_name(&mut self, name: String) -> &mut Self {
        self.name = Some(name);
        self
    }

    pub fn set_alias(&mut self, alias: u64) -> &mut Self {
        self.alias = Some(alias);
        self
    }

    pub fn set_datatype(&mut self, datatype: DataType) -> &mut Self {
        self.datatype = Some(datatype as u32);
        self
    }

    pub fn set_timestamp(&mut self, timestamp: u64) -> &mut Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn set_value<V: Into<metric::Value>>(&mut self, value: V) -> &mut Self {
        self.value = Some(value.into());
        self.is_null = None;
        self
    }

    /// Builds a named metric with a value in one go.
    pub fn with_value<S: Into<String>, V: Into<metric::Value>>(
        name: S,
        datatype: DataType,
        value: V,
    ) -> Self {
        let mut metric = Self::new();
        metric
            .set_name(name.into())
            .set_datatype(datatype)
            .set_value(value);
        metric
    }

    /// Get the value of the metric if it is a boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self.value {
            Some(metric::Value::BooleanValue(b)) => Some(b),
            _ => None,
        }
    }

    /// Get the value of the metric if it is a string (String, Text and UUID datatypes)
    pub fn as_str(&self) -> Option<&str> {
        match &self.value {
            Some(metric::Value::StringValue(s)) => Some(s),
            _ => None,
        }
    }
}

macro_rules! impl_metric_value_from {
    ($from_type:ty, $variant:ident) => {
        impl From<$from_type> for metric::Value {
            fn from(value: $from_type) -> Self {
                metric::Value::$variant(value.into())
            }
        }
    };
}

impl_metric_value_from!(bool, BooleanValue);
impl_metric_value_from!(u32, IntValue);
impl_metric_value_from!(u64, LongValue);
impl_metric_value_from!(f64, DoubleValue);
impl_metric_value_from!(String, StringValue);
impl_metric_value_from!(&str, StringValue);
impl_metric_value_from!(Template, TemplateValue);

impl From<uuid::Uuid> for metric::Value {
    fn from(value: uuid::Uuid) -> Self {
        metric::Value::StringValue(value.to_string())
    }
}

impl Payload {
    /// Create a payload with the provided timestamp and metrics
    pub fn new(timestamp: u64, metrics: Vec<Metric>) -> Self {
        Self {
            timestamp: Some(timestamp),
            metrics,
            seq: None,
            uuid: None,
            body: None,
        }
    }
}

impl From<Payload> for Vec<u8> {
    fn from(value: Payload) -> Self {
        value.encode_to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_value_accessors() {
        let flag = Metric::with_value("Alerts/Foo/Active", DataType::Boolean, true);
        assert_eq!(flag.as_bool(), Some(true));
        assert_eq!(flag.as_str(), None);
        assert_eq!(flag.is_null, None);

        let text = Metric::with_value("Instance_UUID", DataType::Uuid, "abc");
        assert_eq!(text.as_str(), Some("abc"));
        assert_eq!(text.as_bool(), None);
    }

    #[test]
    fn payload_decodes_what_it_encodes() {
        let mut template = Template::default();
        template.template_ref = Some("Command_Request_Template".into());
        template
            .metrics
            .push(Metric::with_value("Tag_Path", DataType::String, "x"));

        let payload = Payload::new(
            10,
            vec![Metric::with_value("cmd", DataType::Template, template)],
        );
        let bytes: Vec<u8> = payload.clone().into();
        assert_eq!(Payload::decode(bytes.as_slice()).unwrap(), payload);
    }
}
