//! The closed set of archive tables.
//!
//! Each `StoreIdentifier` names one database table and one ingestion pipeline.
//! Identifiers prefixed `Sse` belong to the SSE half of a dual telemetry stream;
//! everything else is FSW.

use crate::session::Domain;
use serde::{Deserialize, Serialize};

/// Table kinds known to the archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum StoreIdentifier {
    Session,
    Host,
    EndSession,
    ContextConfig,
    Frame,
    Packet,
    SsePacket,
    LogMessage,
    CommandMessage,
    Evr,
    SseEvr,
    Product,
    ChannelValue,
    SseChannelValue,
    ChannelAggregate,
    HeaderChannelAggregate,
    MonitorChannelAggregate,
    SseChannelAggregate,
    CfdpIndication,
    CfdpFileGeneration,
    CfdpFileUplinkFinished,
    CfdpRequestReceived,
    CfdpRequestResult,
    CfdpPduReceived,
    CfdpPduSent,
}

/// Export groups; one config flag covers every table in a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportCategory {
    Frame,
    Log,
    Packet,
    Product,
    Cfdp,
    ChannelAggregate,
    Evr,
    Command,
    Channel,
}

impl StoreIdentifier {
    /// Every identifier, in registry order.
    pub const ALL: [StoreIdentifier; 25] = [
        StoreIdentifier::Session,
        StoreIdentifier::Host,
        StoreIdentifier::EndSession,
        StoreIdentifier::ContextConfig,
        StoreIdentifier::Frame,
        StoreIdentifier::Packet,
        StoreIdentifier::SsePacket,
        StoreIdentifier::LogMessage,
        StoreIdentifier::CommandMessage,
        StoreIdentifier::Evr,
        StoreIdentifier::SseEvr,
        StoreIdentifier::Product,
        StoreIdentifier::ChannelValue,
        StoreIdentifier::SseChannelValue,
        StoreIdentifier::ChannelAggregate,
        StoreIdentifier::HeaderChannelAggregate,
        StoreIdentifier::MonitorChannelAggregate,
        StoreIdentifier::SseChannelAggregate,
        StoreIdentifier::CfdpIndication,
        StoreIdentifier::CfdpFileGeneration,
        StoreIdentifier::CfdpFileUplinkFinished,
        StoreIdentifier::CfdpRequestReceived,
        StoreIdentifier::CfdpRequestResult,
        StoreIdentifier::CfdpPduReceived,
        StoreIdentifier::CfdpPduSent,
    ];

    /// Identifiers that are needed in every configuration.
    ///
    /// Log messages and header channel aggregates carry the session bookkeeping
    /// that every other table refers to.
    pub const ALWAYS_NEEDED: [StoreIdentifier; 2] = [
        StoreIdentifier::LogMessage,
        StoreIdentifier::HeaderChannelAggregate,
    ];

    /// Database table name.
    pub fn table_name(&self) -> &'static str {
        match self {
            StoreIdentifier::Session => "Session",
            StoreIdentifier::Host => "Host",
            StoreIdentifier::EndSession => "EndSession",
            StoreIdentifier::ContextConfig => "ContextConfig",
            StoreIdentifier::Frame => "Frame",
            StoreIdentifier::Packet => "Packet",
            StoreIdentifier::SsePacket => "SsePacket",
            StoreIdentifier::LogMessage => "LogMessage",
            StoreIdentifier::CommandMessage => "CommandMessage",
            StoreIdentifier::Evr => "Evr",
            StoreIdentifier::SseEvr => "SseEvr",
            StoreIdentifier::Product => "Product",
            StoreIdentifier::ChannelValue => "ChannelValue",
            StoreIdentifier::SseChannelValue => "SseChannelValue",
            StoreIdentifier::ChannelAggregate => "ChannelAggregate",
            StoreIdentifier::HeaderChannelAggregate => "HeaderChannelAggregate",
            StoreIdentifier::MonitorChannelAggregate => "MonitorChannelAggregate",
            StoreIdentifier::SseChannelAggregate => "SseChannelAggregate",
            StoreIdentifier::CfdpIndication => "CfdpIndication",
            StoreIdentifier::CfdpFileGeneration => "CfdpFileGeneration",
            StoreIdentifier::CfdpFileUplinkFinished => "CfdpFileUplinkFinished",
            StoreIdentifier::CfdpRequestReceived => "CfdpRequestReceived",
            StoreIdentifier::CfdpRequestResult => "CfdpRequestResult",
            StoreIdentifier::CfdpPduReceived => "CfdpPduReceived",
            StoreIdentifier::CfdpPduSent => "CfdpPduSent",
        }
    }

    /// Key used for the per-table "use archive" configuration flag.
    ///
    /// The SSE marker is dropped so one flag covers both halves of a table pair.
    pub fn use_archive_key(&self) -> String {
        strip_sse_marker(self.table_name())
    }

    /// Telemetry domain this table belongs to.
    pub fn domain(&self) -> Domain {
        match self {
            StoreIdentifier::SsePacket
            | StoreIdentifier::SseEvr
            | StoreIdentifier::SseChannelValue
            | StoreIdentifier::SseChannelAggregate => Domain::Sse,
            _ => Domain::Fsw,
        }
    }

    /// Session bookkeeping tables, started before anything else.
    pub fn is_session_store(&self) -> bool {
        matches!(
            self,
            StoreIdentifier::Session | StoreIdentifier::Host | StoreIdentifier::EndSession
        )
    }

    /// Session bookkeeping shared by both domains.
    pub fn is_domain_neutral(&self) -> bool {
        self.is_session_store() || *self == StoreIdentifier::ContextConfig
    }

    /// Tables whose rows roll up many channel samples.
    pub fn is_aggregate(&self) -> bool {
        matches!(
            self,
            StoreIdentifier::ChannelAggregate
                | StoreIdentifier::HeaderChannelAggregate
                | StoreIdentifier::MonitorChannelAggregate
                | StoreIdentifier::SseChannelAggregate
        )
    }

    /// Whether this identifier bypasses configuration and domain gating.
    pub fn is_always_needed(&self) -> bool {
        Self::ALWAYS_NEEDED.contains(self)
    }

    /// Export group, if the table can be exported at all.
    pub fn export_category(&self) -> Option<ExportCategory> {
        match self {
            StoreIdentifier::Session
            | StoreIdentifier::Host
            | StoreIdentifier::EndSession
            | StoreIdentifier::ContextConfig => None,
            StoreIdentifier::Frame => Some(ExportCategory::Frame),
            StoreIdentifier::Packet | StoreIdentifier::SsePacket => Some(ExportCategory::Packet),
            StoreIdentifier::LogMessage => Some(ExportCategory::Log),
            StoreIdentifier::CommandMessage => Some(ExportCategory::Command),
            StoreIdentifier::Evr | StoreIdentifier::SseEvr => Some(ExportCategory::Evr),
            StoreIdentifier::Product => Some(ExportCategory::Product),
            StoreIdentifier::ChannelValue | StoreIdentifier::SseChannelValue => {
                Some(ExportCategory::Channel)
            }
            StoreIdentifier::ChannelAggregate
            | StoreIdentifier::HeaderChannelAggregate
            | StoreIdentifier::MonitorChannelAggregate
            | StoreIdentifier::SseChannelAggregate => Some(ExportCategory::ChannelAggregate),
            StoreIdentifier::CfdpIndication
            | StoreIdentifier::CfdpFileGeneration
            | StoreIdentifier::CfdpFileUplinkFinished
            | StoreIdentifier::CfdpRequestReceived
            | StoreIdentifier::CfdpRequestResult
            | StoreIdentifier::CfdpPduReceived
            | StoreIdentifier::CfdpPduSent => Some(ExportCategory::Cfdp),
        }
    }

    /// Look up an identifier by its table name.
    pub fn from_table_name(name: &str) -> Option<StoreIdentifier> {
        Self::ALL.iter().copied().find(|id| id.table_name() == name)
    }
}

impl std::fmt::Display for StoreIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.table_name())
    }
}

impl std::str::FromStr for StoreIdentifier {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        StoreIdentifier::from_table_name(s).ok_or_else(|| format!("unknown store: {}", s))
    }
}

/// Remove the first `Sse` marker from a table name.
pub fn strip_sse_marker(table: &str) -> String {
    table.replacen("Sse", "", 1)
}
