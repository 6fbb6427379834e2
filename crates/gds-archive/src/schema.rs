//! Column layouts for archive tables.
//!
//! Column order here is the order of fields in every bulk-load row for the
//! table; producers build `Record::values` in the same order.

use gds_common::StoreIdentifier;

const SESSION: &[&str] = &[
    "sessionId",
    "sessionFragment",
    "hostId",
    "host",
    "processId",
    "domain",
    "startTime",
];

const HOST: &[&str] = &["hostId", "hostName", "hostOffset"];

const END_SESSION: &[&str] = &[
    "sessionId",
    "sessionFragment",
    "hostId",
    "endTime",
    "recordCount",
];

const CONTEXT_CONFIG: &[&str] = &["sessionId", "hostId", "keyName", "value"];

const FRAME: &[&str] = &[
    "sessionId",
    "hostId",
    "frameId",
    "ert",
    "relaySpacecraftId",
    "vcid",
    "vcfc",
    "bodyLength",
    "badReason",
];

const PACKET: &[&str] = &[
    "sessionId",
    "hostId",
    "packetId",
    "frameId",
    "apid",
    "spsc",
    "sclk",
    "ert",
    "bodyLength",
];

const LOG_MESSAGE: &[&str] = &[
    "sessionId",
    "hostId",
    "eventTime",
    "classification",
    "message",
    "type",
];

const COMMAND_MESSAGE: &[&str] = &[
    "sessionId",
    "hostId",
    "requestId",
    "message",
    "type",
    "eventTime",
    "status",
];

const EVR: &[&str] = &[
    "sessionId",
    "hostId",
    "evrId",
    "name",
    "eventId",
    "ert",
    "sclk",
    "level",
    "message",
];

const PRODUCT: &[&str] = &[
    "sessionId",
    "hostId",
    "apid",
    "creationTime",
    "fullPath",
    "totalParts",
    "groundStatus",
];

const CHANNEL_VALUE: &[&str] = &[
    "sessionId",
    "hostId",
    "channelIndex",
    "ert",
    "sclk",
    "dnValue",
    "euValue",
    "status",
];

const CHANNEL_AGGREGATE: &[&str] = &[
    "sessionId",
    "hostId",
    "channelType",
    "beginErt",
    "endErt",
    "sampleCount",
    "contents",
];

const CFDP_EVENT: &[&str] = &[
    "sessionId",
    "hostId",
    "eventTime",
    "cfdpProcessorInstanceId",
    "transactionSequenceNumber",
    "detail",
];

const CFDP_PDU: &[&str] = &[
    "sessionId",
    "hostId",
    "pduTime",
    "cfdpProcessorInstanceId",
    "pduId",
    "pduBytes",
];

/// Column names for a table, in row order.
pub fn columns(id: StoreIdentifier) -> &'static [&'static str] {
    match id {
        StoreIdentifier::Session => SESSION,
        StoreIdentifier::Host => HOST,
        StoreIdentifier::EndSession => END_SESSION,
        StoreIdentifier::ContextConfig => CONTEXT_CONFIG,
        StoreIdentifier::Frame => FRAME,
        StoreIdentifier::Packet | StoreIdentifier::SsePacket => PACKET,
        StoreIdentifier::LogMessage => LOG_MESSAGE,
        StoreIdentifier::CommandMessage => COMMAND_MESSAGE,
        StoreIdentifier::Evr | StoreIdentifier::SseEvr => EVR,
        StoreIdentifier::Product => PRODUCT,
        StoreIdentifier::ChannelValue | StoreIdentifier::SseChannelValue => CHANNEL_VALUE,
        StoreIdentifier::ChannelAggregate
        | StoreIdentifier::HeaderChannelAggregate
        | StoreIdentifier::MonitorChannelAggregate
        | StoreIdentifier::SseChannelAggregate => CHANNEL_AGGREGATE,
        StoreIdentifier::CfdpIndication
        | StoreIdentifier::CfdpFileGeneration
        | StoreIdentifier::CfdpFileUplinkFinished
        | StoreIdentifier::CfdpRequestReceived
        | StoreIdentifier::CfdpRequestResult => CFDP_EVENT,
        StoreIdentifier::CfdpPduReceived | StoreIdentifier::CfdpPduSent => CFDP_PDU,
    }
}

/// Number of values a record for this table must carry.
pub fn column_count(id: StoreIdentifier) -> usize {
    columns(id).len()
}
