//! RTMP wire constants for the relay dialect

/// Default RTMP port
pub const RTMP_PORT: u16 = 1935;

/// Chunk size both sides start from (per RTMP spec)
pub const DEFAULT_CHUNK_SIZE: u32 = 128;

/// Chunk size the server announces for its own writes; cuts per-frame
/// header overhead compared to the 128-byte default
pub const OUTBOUND_CHUNK_SIZE: u32 = 4096;

// ============================================================================
// Message type IDs
// ============================================================================

/// Set Chunk Size (1) - replaces the receiver's read chunk size
pub const MSG_SET_CHUNK_SIZE: u8 = 0x01;

/// Bytes Read report (3) - peer's cumulative received-byte counter
pub const MSG_BYTES_READ: u8 = 0x03;

/// User Control (4)
pub const MSG_USER_CONTROL: u8 = 0x04;

/// Audio data (8)
pub const MSG_AUDIO: u8 = 0x08;

/// Video data (9)
pub const MSG_VIDEO: u8 = 0x09;

/// Invoke with AMF3 payload (17); first payload byte is skipped
pub const MSG_INVOKE_AMF3: u8 = 0x11;

/// Notify (18)
pub const MSG_NOTIFY: u8 = 0x12;

/// Invoke with AMF0 payload (20)
pub const MSG_INVOKE: u8 = 0x14;

/// FLV tunneling (22) - rejected
pub const MSG_FLV_TUNNEL: u8 = 0x16;

// ============================================================================
// Message endpoints (message stream ids)
// ============================================================================

/// Connection-scoped RPC endpoint
pub const CONTROL_ENDPOINT: u32 = 0;

/// The single live stream endpoint, also the value returned by createStream
pub const STREAM_ENDPOINT: u32 = 1337;

// ============================================================================
// Outbound chunk stream ids
// ============================================================================

/// Protocol control messages
pub const CSID_CONTROL: u8 = 2;

/// RPC results
pub const CSID_RESULT: u8 = 3;

/// Stream data; every message on the stream endpoint travels here
pub const CSID_STREAM: u8 = 4;

// ============================================================================
// User control event types
// ============================================================================

/// Stream Begin, sent to a subscriber right before its first video frame
pub const UC_CLEAR_STREAM: u16 = 0;

// ============================================================================
// FLV frame types (high nibble of the first video payload byte)
// ============================================================================

pub const FLV_KEY_FRAME: u8 = 0x1;

// ============================================================================
// Command and notify names
// ============================================================================

pub const CMD_CONNECT: &str = "connect";
pub const CMD_FC_PUBLISH: &str = "FCPublish";
pub const CMD_CREATE_STREAM: &str = "createStream";
pub const CMD_PUBLISH: &str = "publish";
pub const CMD_PLAY: &str = "play";
pub const CMD_PLAY2: &str = "play2";
pub const CMD_PAUSE: &str = "pause";

pub const CMD_RESULT: &str = "_result";
pub const CMD_ON_STATUS: &str = "onStatus";
pub const CMD_ON_FC_PUBLISH: &str = "onFCPublish";

pub const CMD_SET_DATA_FRAME: &str = "@setDataFrame";
pub const CMD_ON_METADATA: &str = "onMetaData";
pub const CMD_SAMPLE_ACCESS: &str = "|RtmpSampleAccess";

// ============================================================================
// Status codes
// ============================================================================

pub const NC_CONNECT_SUCCESS: &str = "NetConnection.Connect.Success";
pub const NS_PUBLISH_START: &str = "NetStream.Publish.Start";
pub const NS_PLAY_RESET: &str = "NetStream.Play.Reset";
pub const NS_PLAY_START: &str = "NetStream.Play.Start";
pub const NS_PAUSE_NOTIFY: &str = "NetStream.Pause.Notify";

// ============================================================================
// Connect reply fields
// ============================================================================

pub const FMS_VERSION: &str = "FMS/4,5,1,484";
pub const SERVER_CAPABILITIES: f64 = 255.0;
pub const SERVER_MODE: f64 = 1.0;

/// Object encoding advertised in the connect status (AMF3 capable)
pub const OBJECT_ENCODING_AMF3: f64 = 3.0;
