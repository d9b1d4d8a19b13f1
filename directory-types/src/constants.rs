pub const SPBV01: &str = "spBv1.0";

pub const BIRTH: &str = "BIRTH";
pub const DEATH: &str = "DEATH";
pub const DATA: &str = "DATA";
pub const CMD: &str = "CMD";

pub const NODE_CONTROL_REBIRTH: &str = "Node Control/Rebirth";
pub const BDSEQ: &str = "bdSeq";

/// Metric names making up an instance sub-tree.
pub mod metrics {
    pub const SCHEMA_UUID: &str = "Schema_UUID";
    pub const INSTANCE_UUID: &str = "Instance_UUID";

    pub const ALERT_TYPE: &str = "Type";
    pub const ALERT_ACTIVE: &str = "Active";

    pub const LINK_RELATION: &str = "Relation";
    pub const LINK_TARGET: &str = "Target";

    pub const SERVICE_UUID: &str = "Service_UUID";
    pub const SERVICE_URL: &str = "Service_URL";

    pub const LAST_CHANGED: &str = "Last_Changed";
}

/// Well known UUIDs.
pub mod uuids {
    use uuid::Uuid;

    /// Payload header marker used by publishers that follow the metric tree conventions.
    pub const FACTORY_PLUS: Uuid = Uuid::from_u128(0x11ad7b32_1d32_4c4a_b0c9_fa049208939a);

    pub const SCHEMA_ALERT: Uuid = Uuid::from_u128(0x8853aa15_2228_4309_b98e_e086cefbc72c);
    pub const SCHEMA_SERVICE: Uuid = Uuid::from_u128(0x05688a03_730e_4cda_9932_172e2c62e45c);
    pub const SCHEMA_DEVICE_INFORMATION: Uuid =
        Uuid::from_u128(0x2dd093e9_1450_44c5_be8c_c0d78e48219b);

    pub const SERVICE_DIRECTORY: Uuid = Uuid::from_u128(0xaf4a1d66_e6f7_43c4_8a67_0fa3be2b1cf9);
}
